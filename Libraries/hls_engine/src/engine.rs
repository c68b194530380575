//! The segment pipeline: adaptive rendition selection, buffer-paced fetching,
//! and the recovery hooks the owning player drives.

use crate::error::EngineError;
use crate::playlist::parser;
use crate::playlist::{MasterPlaylist, MediaPlaylist, SubtitleTrack, VariantStream};
use crate::segment::fetcher::{fetch_segment, ThroughputEstimator};
use crate::{EngineCallback, EngineEvent, FaultKind};
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Buffering and startup tuning. Defaults match the upload pipeline's
/// recommended player settings (30s target, 60s ceiling).
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Target forward buffer in seconds; the fetch task idles once reached.
    pub max_buffer_seconds: f64,
    /// Hard ceiling the forward buffer may not exceed, segment overshoot included.
    pub max_max_buffer_seconds: f64,
    /// Safety factor applied to the throughput estimate before rendition selection.
    pub bandwidth_headroom: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_buffer_seconds: 30.0,
            max_max_buffer_seconds: 60.0,
            bandwidth_headroom: 0.95,
        }
    }
}

struct Timeline {
    /// Seconds of media delivered to the owner so far.
    delivered: f64,
    /// Last playhead position the owner reported.
    playhead: f64,
}

struct PipelineFault {
    kind: FaultKind,
    fatal: bool,
    detail: String,
}

pub struct HlsEngine {
    manifest_url: Url,
    client: Client,
    callback: EngineCallback,
    config: EngineConfig,
    master: MasterPlaylist,
    /// First variant's playlist; all variants share its segment timeline.
    reference: Arc<MediaPlaylist>,
    duration: f64,
    /// Media playlists fetched so far, keyed by variant URI.
    playlists: AsyncMutex<HashMap<String, Arc<MediaPlaylist>>>,
    /// Segment URLs already delivered; a restarted pipeline never re-emits these.
    delivered_urls: Mutex<HashSet<String>>,
    /// Variants whose init segment has been pushed.
    init_pushed: Mutex<HashSet<String>>,
    timeline: Mutex<Timeline>,
    estimator: Mutex<ThroughputEstimator>,
    /// Index of the next segment the fetch task will deliver.
    cursor: AtomicU64,
    /// Cancelled only by `destroy`.
    root: CancellationToken,
    /// Token of the currently running fetch task, child of `root`.
    run: Mutex<Option<CancellationToken>>,
    destroyed: AtomicBool,
}

impl HlsEngine {
    /// Fetch and parse the manifest at `url`. Emits `ManifestParsed` through
    /// `callback` once the presentation timeline is known; segment delivery
    /// does not begin until [`HlsEngine::start`].
    pub async fn new(url: &str, callback: EngineCallback) -> Result<Arc<Self>, EngineError> {
        Self::with_config(url, callback, EngineConfig::default()).await
    }

    pub async fn with_config(
        url: &str,
        callback: EngineCallback,
        config: EngineConfig,
    ) -> Result<Arc<Self>, EngineError> {
        let manifest_url = Url::parse(url).map_err(|e| EngineError::Parse {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        let client = Client::new();
        let text = fetch_text(&client, url).await?;

        // A bare media playlist plays as a single-variant presentation.
        let (master, preparsed) = if parser::is_master(&text) {
            (parser::parse_master(url, &text)?, None)
        } else {
            let media = Arc::new(parser::parse_media(url, &text)?);
            let master = MasterPlaylist {
                variants: vec![VariantStream {
                    uri: url.to_string(),
                    bandwidth: 0,
                    resolution: None,
                    codecs: None,
                }],
                subtitles: Vec::new(),
            };
            (master, Some(media))
        };

        let reference = match preparsed {
            Some(media) => media,
            None => {
                let first_uri = &master.variants[0].uri;
                let variant_url =
                    join_url(&manifest_url, first_uri).map_err(|detail| EngineError::Parse {
                        url: first_uri.clone(),
                        detail,
                    })?;
                let text = fetch_text(&client, variant_url.as_str()).await?;
                Arc::new(parser::parse_media(variant_url.as_str(), &text)?)
            }
        };
        let duration = reference.total_duration();

        let mut playlists = HashMap::new();
        playlists.insert(master.variants[0].uri.clone(), Arc::clone(&reference));

        let engine = Arc::new(Self {
            manifest_url,
            client,
            callback,
            config,
            master,
            reference,
            duration,
            playlists: AsyncMutex::new(playlists),
            delivered_urls: Mutex::new(HashSet::new()),
            init_pushed: Mutex::new(HashSet::new()),
            timeline: Mutex::new(Timeline {
                delivered: 0.0,
                playhead: 0.0,
            }),
            estimator: Mutex::new(ThroughputEstimator::new(0.25)),
            cursor: AtomicU64::new(0),
            root: CancellationToken::new(),
            run: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        (engine.callback)(EngineEvent::ManifestParsed {
            duration,
            variant_count: engine.master.variants.len(),
        });
        Ok(engine)
    }

    /// Spawn the segment fetch task. No-op while a run is already active.
    pub fn start(self: &Arc<Self>) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut run = self.run.lock().unwrap();
            if run.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return;
            }
            let token = self.root.child_token();
            *run = Some(token.clone());
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                engine.run_pipeline(token).await;
            });
        }
    }

    /// Restart the load pipeline from the current cursor. This is the
    /// network-error recovery hook; already-delivered segments are not re-emitted.
    pub fn start_load(self: &Arc<Self>) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(token) = self.run.lock().unwrap().take() {
            token.cancel();
        }
        (self.callback)(EngineEvent::Info("restarting load pipeline".to_string()));
        self.start();
    }

    /// In-place media recovery: forget which init segments were pushed so the
    /// next delivery re-primes the decoder.
    pub fn recover_media(&self) {
        self.init_pushed.lock().unwrap().clear();
        (self.callback)(EngineEvent::Info("attempting media recovery".to_string()));
    }

    /// Tear down the engine and stop all delivery. Safe to call repeatedly.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.root.cancel();
        debug!("engine for {} destroyed", self.manifest_url);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn manifest_url(&self) -> &Url {
        &self.manifest_url
    }

    /// Presentation duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Subtitle/text renditions discovered in the master playlist, with URIs
    /// resolved against the manifest URL.
    pub fn subtitle_tracks(&self) -> Vec<SubtitleTrack> {
        self.master
            .subtitles
            .iter()
            .map(|t| SubtitleTrack {
                name: t.name.clone(),
                language: t.language.clone(),
                uri: self
                    .manifest_url
                    .join(&t.uri)
                    .map(String::from)
                    .unwrap_or_else(|_| t.uri.clone()),
            })
            .collect()
    }

    /// The owner reports the playhead here so buffering can pace itself.
    pub fn update_playhead(&self, position: f64) {
        self.timeline.lock().unwrap().playhead = position;
    }

    async fn run_pipeline(self: Arc<Self>, token: CancellationToken) {
        let total = self.reference.segments.len() as u64;
        loop {
            if token.is_cancelled() {
                (self.callback)(EngineEvent::Info("segment pipeline stopped".to_string()));
                return;
            }
            let cursor = self.cursor.load(Ordering::SeqCst);
            if cursor >= total {
                (self.callback)(EngineEvent::EndOfStream);
                return;
            }
            let next_duration = self.reference.segments[cursor as usize].duration;
            if !self.should_fetch(next_duration) {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
                continue;
            }
            match self.deliver_next(cursor).await {
                Ok(()) => {
                    self.cursor.store(cursor + 1, Ordering::SeqCst);
                }
                Err(fault) => {
                    let fatal = fault.fatal;
                    (self.callback)(EngineEvent::Fault {
                        kind: fault.kind,
                        fatal,
                        detail: fault.detail,
                    });
                    if fatal {
                        return;
                    }
                }
            }
        }
    }

    fn should_fetch(&self, next_duration: f64) -> bool {
        let timeline = self.timeline.lock().unwrap();
        let ahead = (timeline.delivered - timeline.playhead).max(0.0);
        ahead < self.config.max_buffer_seconds
            && ahead + next_duration <= self.config.max_max_buffer_seconds
    }

    async fn deliver_next(&self, cursor: u64) -> Result<(), PipelineFault> {
        let estimate =
            self.estimator.lock().unwrap().estimate_bps() * self.config.bandwidth_headroom;
        let variant = select_variant(&self.master.variants, estimate);
        let playlist = self.variant_playlist(variant).await?;
        let Some(entry) = playlist.segments.get(cursor as usize) else {
            return Err(PipelineFault {
                kind: FaultKind::Other,
                fatal: true,
                detail: format!("variant {} has no segment {}", variant.uri, cursor),
            });
        };
        let playlist_url = join_url(&self.manifest_url, &variant.uri).map_err(other_fault)?;

        // Prime the decoder once per variant.
        if let Some(init_uri) = &playlist.init_uri {
            let need_init = self.init_pushed.lock().unwrap().insert(variant.uri.clone());
            if need_init {
                let init_url = join_url(&playlist_url, init_uri).map_err(other_fault)?;
                let (data, elapsed) = fetch_segment(&self.client, init_url.as_str())
                    .await
                    .map_err(network_fault)?;
                self.estimator.lock().unwrap().record(data.len(), elapsed);
                (self.callback)(EngineEvent::InitSegment {
                    data,
                    variant_id: variant.uri.clone(),
                    url: init_url.to_string(),
                });
            }
        }

        let segment_url = join_url(&playlist_url, &entry.uri).map_err(other_fault)?;
        if self
            .delivered_urls
            .lock()
            .unwrap()
            .contains(segment_url.as_str())
        {
            // A restarted pipeline can land on a segment the previous run pushed.
            return Ok(());
        }
        let (data, elapsed) = fetch_segment(&self.client, segment_url.as_str())
            .await
            .map_err(network_fault)?;
        self.estimator.lock().unwrap().record(data.len(), elapsed);
        self.delivered_urls
            .lock()
            .unwrap()
            .insert(segment_url.to_string());
        self.timeline.lock().unwrap().delivered += entry.duration;
        (self.callback)(EngineEvent::Segment {
            data,
            variant_id: variant.uri.clone(),
            sequence: cursor,
            duration: entry.duration,
            url: segment_url.to_string(),
        });
        Ok(())
    }

    async fn variant_playlist(
        &self,
        variant: &VariantStream,
    ) -> Result<Arc<MediaPlaylist>, PipelineFault> {
        {
            let cache = self.playlists.lock().await;
            if let Some(playlist) = cache.get(&variant.uri) {
                return Ok(Arc::clone(playlist));
            }
        }
        let url = join_url(&self.manifest_url, &variant.uri).map_err(other_fault)?;
        let text = fetch_text(&self.client, url.as_str())
            .await
            .map_err(|e| PipelineFault {
                kind: FaultKind::Network,
                fatal: true,
                detail: e.to_string(),
            })?;
        let parsed =
            Arc::new(
                parser::parse_media(url.as_str(), &text).map_err(|e| PipelineFault {
                    kind: FaultKind::Other,
                    fatal: true,
                    detail: e.to_string(),
                })?,
            );
        self.playlists
            .lock()
            .await
            .insert(variant.uri.clone(), Arc::clone(&parsed));
        Ok(parsed)
    }
}

/// Pick the best rendition the estimated throughput can sustain, or the
/// cheapest one when nothing fits.
fn select_variant(variants: &[VariantStream], estimate_bps: f64) -> &VariantStream {
    variants
        .iter()
        .filter(|v| v.bandwidth as f64 <= estimate_bps)
        .max_by_key(|v| v.bandwidth)
        .or_else(|| variants.iter().min_by_key(|v| v.bandwidth))
        .unwrap_or(&variants[0])
}

fn join_url(base: &Url, uri: &str) -> Result<Url, String> {
    base.join(uri).map_err(|e| format!("bad URI {uri}: {e}"))
}

fn other_fault(detail: String) -> PipelineFault {
    PipelineFault {
        kind: FaultKind::Other,
        fatal: true,
        detail,
    }
}

fn network_fault(e: crate::segment::fetcher::FetchError) -> PipelineFault {
    PipelineFault {
        kind: FaultKind::Network,
        fatal: true,
        detail: e.to_string(),
    }
}

async fn fetch_text(client: &Client, url: &str) -> Result<String, EngineError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| EngineError::Transport {
            url: url.to_string(),
            source: e,
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::Http {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    response.text().await.map_err(|e| EngineError::Transport {
        url: url.to_string(),
        source: e,
    })
}
