//! Resolves a manifest into a playing pipeline (native binding when the
//! element supports the format, a software engine otherwise) and owns the
//! one-shot recovery ledger for every fault class.

use crate::error::ErrorKind;
use crate::media::{AttachError, MediaElement, HLS_MIME_TYPE};
use hls_engine::playlist::SubtitleTrack;
use hls_engine::{EngineCallback, EngineError, EngineEvent, FaultKind, HlsEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Load pipeline transitions reported to the controller.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    Ready { duration: f64 },
    Error { kind: ErrorKind, message: String },
}

pub type LoadEventSink = Arc<dyn Fn(LoadEvent) + Send + Sync>;

/// The resolved pipeline behind the element: either it plays the manifest
/// natively, or a software engine feeds it. Selected in exactly one place
/// ([`ManifestLoader::load`]); nothing else type-checks the environment.
#[derive(Clone)]
enum StreamEngine {
    Native,
    Software(Arc<HlsEngine>),
}

/// The exclusive handle on one loaded pipeline. Exactly one exists per
/// mounted player; disposal is idempotent and a disposed loader drops every
/// late async completion on the floor.
pub struct ManifestLoader {
    element: Arc<dyn MediaElement>,
    source: Url,
    sink: LoadEventSink,
    /// `None` until selection resolves (or while a software engine is still
    /// being constructed).
    engine: Mutex<Option<StreamEngine>>,
    cancel: CancellationToken,
    disposed: AtomicBool,
    ready_emitted: AtomicBool,
    // One-shot recovery ledger, one flag per fault class.
    network_restart_used: AtomicBool,
    media_recovery_used: AtomicBool,
    rebuild_used: AtomicBool,
}

impl ManifestLoader {
    pub fn new(element: Arc<dyn MediaElement>, source: Url, sink: LoadEventSink) -> Arc<Self> {
        Arc::new(Self {
            element,
            source,
            sink,
            engine: Mutex::new(None),
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            ready_emitted: AtomicBool::new(false),
            network_restart_used: AtomicBool::new(false),
            media_recovery_used: AtomicBool::new(false),
            rebuild_used: AtomicBool::new(false),
        })
    }

    /// Resolve the source and drive it toward ready. Results arrive through
    /// the sink; this returns immediately.
    pub fn load(self: &Arc<Self>) {
        let loader = Arc::clone(self);
        tokio::spawn(async move {
            if loader.element.can_play(HLS_MIME_TYPE) {
                *loader.engine.lock().unwrap() = Some(StreamEngine::Native);
                loader.attach_native(false).await;
            } else {
                loader.spawn_software().await;
            }
        });
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    /// Subtitle/text tracks the software engine discovered. The native path
    /// exposes none.
    pub fn subtitle_tracks(&self) -> Vec<SubtitleTrack> {
        match self.engine() {
            Some(StreamEngine::Software(engine)) => engine.subtitle_tracks(),
            _ => Vec::new(),
        }
    }

    /// Forward the playhead so the engine can pace its buffer.
    pub fn note_playhead(&self, position: f64) {
        if let Some(StreamEngine::Software(engine)) = self.engine() {
            engine.update_playhead(position);
        }
    }

    /// Every media/engine fault funnels through here. One recovery attempt
    /// per class; exhaustion surfaces the error to the sink.
    pub fn handle_fault(self: &Arc<Self>, kind: FaultKind, fatal: bool, detail: String) {
        if self.gone() {
            return;
        }
        match kind {
            FaultKind::Network => {
                if !fatal && !self.is_native() {
                    // The software engine retries transient hiccups itself.
                    debug!("transient network fault, engine self-heals: {detail}");
                    return;
                }
                if !self.network_restart_used.swap(true, Ordering::SeqCst) {
                    info!("network fault, restarting load pipeline: {detail}");
                    self.restart_pipeline();
                } else {
                    self.emit_error(ErrorKind::Network, detail);
                }
            }
            FaultKind::Media => {
                if !fatal {
                    debug!("non-fatal media fault: {detail}");
                    return;
                }
                if !self.media_recovery_used.swap(true, Ordering::SeqCst) {
                    info!("media fault, attempting in-place recovery: {detail}");
                    match self.engine() {
                        Some(StreamEngine::Software(engine)) => engine.recover_media(),
                        // The native element has no recovery call; the single
                        // re-bind stands in for it.
                        _ => self.restart_pipeline(),
                    }
                } else {
                    self.emit_error(ErrorKind::Media, detail);
                }
            }
            FaultKind::Unsupported => self.emit_error(ErrorKind::Unsupported, detail),
            FaultKind::Other => {
                if !fatal {
                    debug!("non-fatal fault: {detail}");
                    return;
                }
                if let Some(StreamEngine::Software(engine)) = self.take_engine() {
                    engine.destroy();
                }
                if self.is_native() {
                    self.emit_error(ErrorKind::Fatal, detail);
                } else if !self.rebuild_used.swap(true, Ordering::SeqCst) {
                    warn!("fatal fault, reconstructing engine: {detail}");
                    let loader = Arc::clone(self);
                    tokio::spawn(async move {
                        loader.spawn_software().await;
                    });
                } else {
                    self.emit_error(ErrorKind::Fatal, detail);
                }
            }
        }
    }

    /// Release the pipeline and detach from the element. Safe to call any
    /// number of times.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Some(StreamEngine::Software(engine)) = self.take_engine() {
            engine.destroy();
        }
        debug!("loader for {} disposed", self.source);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    async fn attach_native(self: &Arc<Self>, is_restart: bool) {
        let resume_position = self.element.current_time();
        let result = self.element.attach_source(&self.source).await;
        if self.gone() {
            return;
        }
        match result {
            Ok(duration) => {
                if is_restart {
                    self.element.set_current_time(resume_position);
                }
                if !self.ready_emitted.swap(true, Ordering::SeqCst) {
                    self.emit(LoadEvent::Ready { duration });
                }
            }
            Err(AttachError::Unsupported) => {
                self.emit_error(
                    ErrorKind::Unsupported,
                    "this environment cannot play the stream".to_string(),
                );
            }
            Err(AttachError::Network(detail)) => {
                if !self.network_restart_used.swap(true, Ordering::SeqCst) {
                    info!("native bind failed, restarting: {detail}");
                    self.restart_pipeline();
                } else {
                    self.emit_error(ErrorKind::Network, detail);
                }
            }
        }
    }

    async fn spawn_software(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let callback: EngineCallback = Arc::new(move |event| {
            if let Some(loader) = weak.upgrade() {
                loader.on_engine_event(event);
            }
        });
        match HlsEngine::new(self.source.as_str(), callback).await {
            Ok(engine) => {
                if self.gone() {
                    engine.destroy();
                    return;
                }
                let duration = engine.duration();
                *self.engine.lock().unwrap() = Some(StreamEngine::Software(Arc::clone(&engine)));
                self.element.begin_stream(duration);
                engine.start();
                if !self.ready_emitted.swap(true, Ordering::SeqCst) {
                    self.emit(LoadEvent::Ready { duration });
                }
            }
            Err(error) => {
                if self.gone() {
                    return;
                }
                match error {
                    EngineError::NotHls(url) => self.emit_error(
                        ErrorKind::Unsupported,
                        format!("{url} is not an HLS playlist"),
                    ),
                    e @ (EngineError::Transport { .. } | EngineError::Http { .. }) => {
                        self.handle_fault(FaultKind::Network, true, e.to_string())
                    }
                    other => self.emit_error(ErrorKind::Fatal, other.to_string()),
                }
            }
        }
    }

    fn on_engine_event(self: &Arc<Self>, event: EngineEvent) {
        if self.gone() {
            return;
        }
        match event {
            // The timeline is announced once construction finishes.
            EngineEvent::ManifestParsed { .. } => {}
            EngineEvent::InitSegment { data, .. } => self.element.append_media(data, 0.0),
            EngineEvent::Segment { data, duration, .. } => self.element.append_media(data, duration),
            EngineEvent::EndOfStream => debug!("engine delivered the whole presentation"),
            EngineEvent::Fault {
                kind,
                fatal,
                detail,
            } => self.handle_fault(kind, fatal, detail),
            EngineEvent::Info(msg) => debug!("engine: {msg}"),
        }
    }

    fn restart_pipeline(self: &Arc<Self>) {
        match self.engine() {
            Some(StreamEngine::Native) => {
                let loader = Arc::clone(self);
                tokio::spawn(async move {
                    loader.attach_native(true).await;
                });
            }
            Some(StreamEngine::Software(engine)) => engine.start_load(),
            // Construction failed before an engine existed; build a new one.
            None => {
                let loader = Arc::clone(self);
                tokio::spawn(async move {
                    loader.spawn_software().await;
                });
            }
        }
    }

    fn is_native(&self) -> bool {
        matches!(self.engine(), Some(StreamEngine::Native))
    }

    fn engine(&self) -> Option<StreamEngine> {
        self.engine.lock().unwrap().clone()
    }

    fn take_engine(&self) -> Option<StreamEngine> {
        self.engine.lock().unwrap().take()
    }

    fn gone(&self) -> bool {
        self.disposed.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    fn emit(&self, event: LoadEvent) {
        if !self.gone() {
            (self.sink)(event);
        }
    }

    fn emit_error(&self, kind: ErrorKind, message: String) {
        warn!("surfacing {kind:?} error: {message}");
        self.emit(LoadEvent::Error { kind, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::sim::SimulatedMediaElement;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn collector() -> (LoadEventSink, Arc<Mutex<Vec<LoadEvent>>>) {
        let events: Arc<Mutex<Vec<LoadEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: LoadEventSink = Arc::new(move |event| sink.lock().unwrap().push(event));
        (callback, events)
    }

    async fn wait_until<F: Fn() -> bool>(predicate: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn any_ready(events: &Arc<Mutex<Vec<LoadEvent>>>) -> bool {
        events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, LoadEvent::Ready { .. }))
    }

    fn errors(events: &Arc<Mutex<Vec<LoadEvent>>>) -> Vec<ErrorKind> {
        events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                LoadEvent::Error { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn native_support_binds_directly() {
        let element = Arc::new(SimulatedMediaElement::with_native_hls(120.0));
        let (sink, events) = collector();
        let loader = ManifestLoader::new(
            element.clone(),
            Url::parse("https://cdn.example/movie/42/origin.m3u8").unwrap(),
            sink,
        );
        loader.load();
        wait_until(|| any_ready(&events)).await;

        assert!(matches!(
            events.lock().unwrap()[0],
            LoadEvent::Ready { duration } if duration == 120.0
        ));
        assert_eq!(element.attach_count.load(Ordering::SeqCst), 1);
        // No software engine was instantiated.
        assert!(loader.is_native());
        assert!(loader.subtitle_tracks().is_empty());
    }

    #[tokio::test]
    async fn native_stall_restarts_once_without_surfacing() {
        let element = Arc::new(SimulatedMediaElement::with_native_hls(120.0));
        let (sink, events) = collector();
        let loader = ManifestLoader::new(
            element.clone(),
            Url::parse("https://cdn.example/movie/42/origin.m3u8").unwrap(),
            sink,
        );
        loader.load();
        wait_until(|| any_ready(&events)).await;

        loader.handle_fault(FaultKind::Network, false, "buffer stall".to_string());
        wait_until(|| element.attach_count.load(Ordering::SeqCst) == 2).await;
        assert!(errors(&events).is_empty());

        // The one-shot restart is spent: the next stall surfaces.
        loader.handle_fault(FaultKind::Network, false, "buffer stall".to_string());
        wait_until(|| !errors(&events).is_empty()).await;
        assert_eq!(errors(&events), vec![ErrorKind::Network]);
        assert_eq!(element.attach_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn software_path_reaches_ready_and_feeds_the_element() {
        let server = MockServer::start().await;
        let media = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n\
            #EXTINF:4.0,\nseg_0.m4s\n#EXTINF:4.0,\nseg_1.m4s\n#EXT-X-ENDLIST\n";
        Mock::given(method("GET"))
            .and(path("/origin.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(media))
            .mount(&server)
            .await;
        for name in ["/seg_0.m4s", "/seg_1.m4s"] {
            Mock::given(method("GET"))
                .and(path(name))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 32]))
                .mount(&server)
                .await;
        }

        let element = Arc::new(SimulatedMediaElement::new());
        let (sink, events) = collector();
        let loader = ManifestLoader::new(
            element.clone(),
            Url::parse(&format!("{}/origin.m3u8", server.uri())).unwrap(),
            sink,
        );
        loader.load();
        wait_until(|| any_ready(&events)).await;
        assert!(matches!(
            events.lock().unwrap()[0],
            LoadEvent::Ready { duration } if duration == 8.0
        ));
        wait_until(|| element.buffered() >= 8.0).await;
        assert!(errors(&events).is_empty());
        assert!(!loader.is_native());
    }

    #[tokio::test]
    async fn manifest_fetch_failure_retries_once_then_surfaces_network() {
        // No server at this address: construction fails with a transport
        // error, gets the single restart, then surfaces NETWORK.
        let element = Arc::new(SimulatedMediaElement::new());
        let (sink, events) = collector();
        let loader = ManifestLoader::new(
            element,
            Url::parse("http://127.0.0.1:9/origin.m3u8").unwrap(),
            sink,
        );
        loader.load();
        wait_until(|| !errors(&events).is_empty()).await;
        assert_eq!(errors(&events), vec![ErrorKind::Network]);
    }

    #[tokio::test]
    async fn non_playlist_source_is_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/origin.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let element = Arc::new(SimulatedMediaElement::new());
        let (sink, events) = collector();
        let loader = ManifestLoader::new(
            element,
            Url::parse(&format!("{}/origin.m3u8", server.uri())).unwrap(),
            sink,
        );
        loader.load();
        wait_until(|| !errors(&events).is_empty()).await;
        assert_eq!(errors(&events), vec![ErrorKind::Unsupported]);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_silences_late_events() {
        let element = Arc::new(SimulatedMediaElement::with_native_hls(60.0));
        let (sink, events) = collector();
        let loader = ManifestLoader::new(
            element,
            Url::parse("https://cdn.example/movie/7/origin.m3u8").unwrap(),
            sink,
        );
        loader.load();
        wait_until(|| any_ready(&events)).await;

        loader.dispose();
        loader.dispose();
        assert!(loader.is_disposed());
        loader.handle_fault(FaultKind::Network, true, "late".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(errors(&events).is_empty());
    }
}
