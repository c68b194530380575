//! The playback state machine: owns the media element, reconciles user
//! intent with native state changes, and carries the session record.
//!
//! Every mutation of the element funnels through the intent handlers here;
//! nothing else writes to its time, volume, mute, or play state. One event
//! sink is installed per element lifetime and torn down exactly once.

use crate::error::ErrorKind;
use crate::loader::{LoadEvent, LoadEventSink, ManifestLoader};
use crate::media::{MediaElement, MediaEvent, MediaEventSink};
use crate::session::{MutePreference, SessionContinuity, SessionStore};
use crate::thumbs::{self, ThumbnailIndex};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Phases of the playback lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Loading,
    ReadyPaused,
    ReadyPlaying,
    Ended,
    Error,
}

/// The single authoritative snapshot of what the player is doing.
#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub phase: PlaybackPhase,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub volume: f64,
    pub is_muted: bool,
    pub is_fullscreen: bool,
    pub is_theater_mode: bool,
    /// True from source bind until the manifest is ready.
    pub loading: bool,
    /// Set only after recovery was exhausted; replaces the playback surface.
    pub error: Option<(ErrorKind, String)>,
}

/// Callbacks surfaced to the hosting page.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    Ready,
    TimeUpdate(f64),
    MuteChange(bool),
    Error { kind: ErrorKind, message: String },
}

pub type PlayerEventSink = Arc<dyn Fn(PlayerEvent) + Send + Sync>;

/// Host-provided configuration for one mounted player.
#[derive(Debug, Clone)]
pub struct PlayerProps {
    pub source_url: String,
    pub poster_url: Option<String>,
    pub asset_id: String,
    pub initial_time: f64,
    pub initial_muted: bool,
    pub has_user_interacted: bool,
    pub autoplay: bool,
}

struct IntentLedger {
    /// A play the user (or a sanctioned autoplay) actually asked for.
    play_requested: bool,
    /// Set when the tab went hidden: the pause that follows counts as
    /// user-driven and must not be overridden by an automatic resume.
    suppress_auto_resume: bool,
}

pub struct PlaybackController {
    element: Arc<dyn MediaElement>,
    state: RwLock<PlaybackState>,
    intent: Mutex<IntentLedger>,
    loader: Mutex<Option<Arc<ManifestLoader>>>,
    session: SessionContinuity,
    events: PlayerEventSink,
    props: PlayerProps,
    http: Client,
    thumbnails: Arc<RwLock<Option<ThumbnailIndex>>>,
    cancel: CancellationToken,
    unmounted: AtomicBool,
}

impl PlaybackController {
    /// Bind a controller to `element`: seed time/mute from the session
    /// record (stored preference wins over prop defaults), install the
    /// element's one event sink, and hand back the shared handle.
    pub fn mount(
        element: Arc<dyn MediaElement>,
        store: Arc<dyn SessionStore>,
        props: PlayerProps,
        events: PlayerEventSink,
    ) -> Arc<Self> {
        let session = SessionContinuity::new(store, &props.asset_id);
        let restored = session.restored();
        let record = session.record();
        let initial_time = if restored {
            record.position_seconds
        } else {
            props.initial_time
        };
        let initial_muted = if restored {
            record.mute_preference == MutePreference::Muted
        } else {
            props.initial_muted
        };
        if props.has_user_interacted {
            session.mark_interacted();
        }

        element.set_muted(initial_muted);
        element.set_current_time(initial_time);

        let controller = Arc::new(Self {
            state: RwLock::new(PlaybackState {
                phase: PlaybackPhase::Idle,
                current_time: initial_time,
                duration: None,
                volume: element.volume(),
                is_muted: initial_muted,
                is_fullscreen: false,
                is_theater_mode: false,
                loading: false,
                error: None,
            }),
            intent: Mutex::new(IntentLedger {
                play_requested: false,
                suppress_auto_resume: false,
            }),
            loader: Mutex::new(None),
            session,
            events,
            props,
            http: Client::new(),
            thumbnails: Arc::new(RwLock::new(None)),
            cancel: CancellationToken::new(),
            unmounted: AtomicBool::new(false),
            element,
        });

        let weak = Arc::downgrade(&controller);
        let sink: MediaEventSink = Arc::new(move |event| {
            if let Some(controller) = weak.upgrade() {
                controller.on_media_event(event);
            }
        });
        controller.element.set_event_sink(sink);
        controller
    }

    /// Bind the source and start the load pipeline. Any previous pipeline is
    /// fully torn down before the new one is constructed.
    pub fn load(self: &Arc<Self>) {
        if let Some(previous) = self.loader.lock().unwrap().take() {
            previous.dispose();
        }
        let source = match Url::parse(&self.props.source_url) {
            Ok(url) => url,
            Err(e) => {
                self.fail(ErrorKind::Fatal, format!("bad source URL: {e}"));
                return;
            }
        };
        {
            let mut state = self.state.write().unwrap();
            state.phase = PlaybackPhase::Loading;
            state.loading = true;
            state.error = None;
        }
        let weak = Arc::downgrade(self);
        let sink: LoadEventSink = Arc::new(move |event| {
            if let Some(controller) = weak.upgrade() {
                controller.on_load_event(event);
            }
        });
        let loader = ManifestLoader::new(Arc::clone(&self.element), source, sink);
        *self.loader.lock().unwrap() = Some(Arc::clone(&loader));
        loader.load();
    }

    pub fn state(&self) -> PlaybackState {
        self.state.read().unwrap().clone()
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.state.read().unwrap().phase
    }

    pub fn props(&self) -> &PlayerProps {
        &self.props
    }

    /// Nearest-time thumbnail data, shared with the preview resolver.
    pub fn thumbnails(&self) -> Arc<RwLock<Option<ThumbnailIndex>>> {
        Arc::clone(&self.thumbnails)
    }

    pub fn thumbnails_loaded(&self) -> bool {
        self.thumbnails
            .read()
            .unwrap()
            .as_ref()
            .is_some_and(|index| !index.is_empty())
    }

    /// Transport intent. From `Ended` this is a fresh replay from the start.
    pub async fn toggle_play(self: &Arc<Self>) {
        self.register_interaction();
        let phase = self.phase();
        match phase {
            PlaybackPhase::ReadyPlaying => {
                self.intent.lock().unwrap().play_requested = false;
                self.element.pause();
                self.state.write().unwrap().phase = PlaybackPhase::ReadyPaused;
            }
            PlaybackPhase::ReadyPaused => self.attempt_play().await,
            PlaybackPhase::Ended => {
                self.element.set_current_time(0.0);
                self.state.write().unwrap().current_time = 0.0;
                self.attempt_play().await;
            }
            _ => {}
        }
    }

    /// Seek intent. Legal from any ready/ended phase; never flips play/pause.
    pub fn seek(&self, position: f64) {
        self.register_interaction();
        let (phase, duration) = {
            let state = self.state.read().unwrap();
            (state.phase, state.duration)
        };
        if !matches!(
            phase,
            PlaybackPhase::ReadyPaused | PlaybackPhase::ReadyPlaying | PlaybackPhase::Ended
        ) {
            return;
        }
        let target = position.clamp(0.0, duration.unwrap_or(f64::MAX));
        self.element.set_current_time(target);
        let mut state = self.state.write().unwrap();
        state.current_time = target;
        // Seeking off the end marker leaves the player paused, not ended.
        if state.phase == PlaybackPhase::Ended {
            state.phase = PlaybackPhase::ReadyPaused;
        }
    }

    /// Volume slider intent. Slider-to-zero implies muted; a nonzero slider
    /// while muted unmutes. The stored volume always follows the slider.
    pub fn set_volume(&self, volume: f64) {
        self.register_interaction();
        let volume = volume.clamp(0.0, 1.0);
        self.element.set_volume(volume);
        let mute_change = if volume == 0.0 {
            Some(true)
        } else if self.state.read().unwrap().is_muted {
            Some(false)
        } else {
            None
        };
        self.state.write().unwrap().volume = volume;
        if let Some(muted) = mute_change {
            self.set_muted_internal(muted);
        }
    }

    /// Mute toggle intent: flips the flag only, preserving the stored volume
    /// so unmuting restores it exactly.
    pub fn toggle_mute(&self) {
        self.register_interaction();
        let muted = self.state.read().unwrap().is_muted;
        self.set_muted_internal(!muted);
    }

    /// An explicit `initial_muted` prop change after mount still applies and
    /// becomes the stored preference.
    pub fn apply_mute_prop(&self, muted: bool) {
        self.set_muted_internal(muted);
    }

    /// The environment's fullscreen-change signal. Keeps displayed state
    /// truthful when fullscreen is exited through Escape instead of the button.
    pub fn set_fullscreen_state(&self, active: bool) {
        self.state.write().unwrap().is_fullscreen = active;
    }

    /// Theater mode is local UI state only; never persisted.
    pub fn toggle_theater(&self) {
        let mut state = self.state.write().unwrap();
        state.is_theater_mode = !state.is_theater_mode;
    }

    /// The tab went hidden while playing: any pause that follows counts as
    /// user-driven, and the position is flushed.
    pub fn note_hidden(&self) {
        self.intent.lock().unwrap().suppress_auto_resume = true;
        let position = self.state.read().unwrap().current_time;
        self.session.flush(position);
    }

    /// First genuine user interaction with the page (click/key/touch).
    pub fn register_interaction(&self) {
        self.session.mark_interacted();
    }

    /// Tear down: flush the session, dispose the pipeline, detach the sink.
    /// Safe to call more than once.
    pub fn unmount(&self) {
        if self.unmounted.swap(true, Ordering::SeqCst) {
            return;
        }
        let position = self.state.read().unwrap().current_time;
        self.session.flush(position);
        self.cancel.cancel();
        if let Some(loader) = self.loader.lock().unwrap().take() {
            loader.dispose();
        }
        self.element.clear_event_sink();
        debug!("controller for asset {} unmounted", self.props.asset_id);
    }

    fn on_load_event(self: &Arc<Self>, event: LoadEvent) {
        if self.unmounted.load(Ordering::SeqCst) {
            return;
        }
        match event {
            LoadEvent::Ready { duration } => {
                {
                    let mut state = self.state.write().unwrap();
                    state.duration = Some(duration);
                    state.loading = false;
                    if state.phase == PlaybackPhase::Loading {
                        state.phase = PlaybackPhase::ReadyPaused;
                    }
                }
                (self.events)(PlayerEvent::Ready);
                // Cue-sheet work starts only once the manifest is ready.
                self.spawn_thumbnail_load();
                self.maybe_autoplay();
            }
            LoadEvent::Error { kind, message } => self.fail(kind, message),
        }
    }

    fn fail(&self, kind: ErrorKind, message: String) {
        {
            let mut state = self.state.write().unwrap();
            state.phase = PlaybackPhase::Error;
            state.loading = false;
            state.error = Some((kind, message.clone()));
        }
        (self.events)(PlayerEvent::Error { kind, message });
    }

    /// Resume playback automatically only when the session says the user
    /// already interacted, and never after the tab went hidden.
    fn maybe_autoplay(self: &Arc<Self>) {
        let interacted = self.props.has_user_interacted || self.session.record().has_interacted;
        if !self.props.autoplay || !interacted {
            return;
        }
        if self.intent.lock().unwrap().suppress_auto_resume {
            debug!("skipping auto-resume: pause was user-driven");
            return;
        }
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.attempt_play().await;
        });
    }

    /// Drive one play attempt, observing the result. A rejected unmuted
    /// attempt is retried exactly once with the element muted; a second
    /// rejection leaves the displayed state paused.
    async fn attempt_play(self: &Arc<Self>) {
        if self.unmounted.load(Ordering::SeqCst) {
            return;
        }
        self.intent.lock().unwrap().play_requested = true;
        match self.element.play().await {
            Ok(()) => self.note_playing(),
            Err(rejection) => {
                info!("play rejected ({rejection}), retrying muted");
                let was_muted = self.element.muted();
                self.set_muted_internal(true);
                match self.element.play().await {
                    Ok(()) => self.note_playing(),
                    Err(second) => {
                        warn!("muted retry rejected too: {second}");
                        self.set_muted_internal(was_muted);
                        self.intent.lock().unwrap().play_requested = false;
                    }
                }
            }
        }
    }

    fn note_playing(&self) {
        let mut state = self.state.write().unwrap();
        if state.phase != PlaybackPhase::Error {
            state.phase = PlaybackPhase::ReadyPlaying;
        }
    }

    fn set_muted_internal(&self, muted: bool) {
        let changed = {
            let mut state = self.state.write().unwrap();
            let changed = state.is_muted != muted;
            state.is_muted = muted;
            changed
        };
        self.element.set_muted(muted);
        if changed {
            self.session.record_mute(muted);
            (self.events)(PlayerEvent::MuteChange(muted));
        }
    }

    fn on_media_event(self: &Arc<Self>, event: MediaEvent) {
        if self.unmounted.load(Ordering::SeqCst) {
            return;
        }
        match event {
            MediaEvent::MetadataLoaded { duration } => {
                self.state.write().unwrap().duration = Some(duration);
            }
            MediaEvent::TimeUpdate { position } => {
                self.state.write().unwrap().current_time = position;
                self.session.record_position(position);
                if let Some(loader) = self.loader.lock().unwrap().clone() {
                    loader.note_playhead(position);
                }
                (self.events)(PlayerEvent::TimeUpdate(position));
            }
            MediaEvent::Played => {
                // Playback that did not originate here (OS media key) is
                // still real playback: reflect it and treat it as intent.
                self.intent.lock().unwrap().play_requested = true;
                self.note_playing();
            }
            MediaEvent::Paused => {
                let mut state = self.state.write().unwrap();
                if state.phase == PlaybackPhase::ReadyPlaying {
                    state.phase = PlaybackPhase::ReadyPaused;
                }
            }
            MediaEvent::Ended => {
                self.state.write().unwrap().phase = PlaybackPhase::Ended;
                // Replay must look like a fresh user-initiated play.
                {
                    let mut intent = self.intent.lock().unwrap();
                    intent.play_requested = false;
                    intent.suppress_auto_resume = false;
                }
                let position = self.state.read().unwrap().current_time;
                self.session.flush(position);
            }
            MediaEvent::Fault {
                kind,
                fatal,
                detail,
            } => {
                // The controller never retries; recovery policy lives in the
                // loader.
                if let Some(loader) = self.loader.lock().unwrap().clone() {
                    loader.handle_fault(kind, fatal, detail);
                }
            }
        }
    }

    fn spawn_thumbnail_load(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let (tracks, source) = {
                match controller.loader.lock().unwrap().clone() {
                    Some(loader) => (loader.subtitle_tracks(), loader.source().clone()),
                    None => return,
                }
            };
            let index =
                thumbs::load_thumbnail_index(&controller.http, &tracks, &source).await;
            if controller.unmounted.load(Ordering::SeqCst) || controller.cancel.is_cancelled() {
                return;
            }
            if index.is_empty() {
                debug!("no scrub thumbnails for {source}");
            }
            *controller.thumbnails.write().unwrap() = Some(index);
        });
    }
}
