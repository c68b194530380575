//! A deterministic media element for tests and headless sessions.

use super::{AttachError, MediaElement, MediaEvent, MediaEventSink, PlayRejection, HLS_MIME_TYPE};
use async_trait::async_trait;
use bytes::Bytes;
use hls_engine::FaultKind;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

#[derive(Debug, Clone)]
struct SimState {
    duration: Option<f64>,
    position: f64,
    volume: f64,
    muted: bool,
    playing: bool,
    buffered: f64,
    attached: bool,
}

/// Simulated playback surface. The clock advances only through [`tick`],
/// so every test drives time explicitly.
///
/// [`tick`]: SimulatedMediaElement::tick
pub struct SimulatedMediaElement {
    state: Mutex<SimState>,
    sink: Mutex<Option<MediaEventSink>>,
    /// Whether the element claims native HLS support.
    native_hls: AtomicBool,
    /// Whether unmuted playback may start without a user gesture.
    allow_unmuted_play: AtomicBool,
    /// Refuse every `play()` call, muted or not.
    block_all_play: AtomicBool,
    /// Duration reported when a native source binds.
    native_duration: Mutex<f64>,
    attach_error: Mutex<Option<AttachError>>,
    /// Number of times a source was (re)attached natively.
    pub attach_count: AtomicUsize,
}

impl SimulatedMediaElement {
    /// An element without native HLS support: loading goes through the
    /// software engine.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                duration: None,
                position: 0.0,
                volume: 1.0,
                muted: false,
                playing: false,
                buffered: 0.0,
                attached: false,
            }),
            sink: Mutex::new(None),
            native_hls: AtomicBool::new(false),
            allow_unmuted_play: AtomicBool::new(true),
            block_all_play: AtomicBool::new(false),
            native_duration: Mutex::new(0.0),
            attach_error: Mutex::new(None),
            attach_count: AtomicUsize::new(0),
        }
    }

    /// An element that plays HLS natively and reports `duration` at bind.
    pub fn with_native_hls(duration: f64) -> Self {
        let element = Self::new();
        element.native_hls.store(true, Ordering::SeqCst);
        *element.native_duration.lock().unwrap() = duration;
        element
    }

    pub fn set_allow_unmuted_play(&self, allow: bool) {
        self.allow_unmuted_play.store(allow, Ordering::SeqCst);
    }

    pub fn set_block_all_play(&self, block: bool) {
        self.block_all_play.store(block, Ordering::SeqCst);
    }

    pub fn set_attach_error(&self, error: Option<AttachError>) {
        *self.attach_error.lock().unwrap() = error;
    }

    /// Advance the clock by `dt` seconds while playing, emitting the same
    /// events a real element would.
    pub fn tick(&self, dt: f64) {
        let (position, ended) = {
            let mut state = self.state.lock().unwrap();
            if !state.playing {
                return;
            }
            let limit = state.duration.unwrap_or(f64::MAX);
            state.position = (state.position + dt).min(limit);
            let ended = state.duration.is_some_and(|d| state.position >= d);
            if ended {
                state.playing = false;
            }
            (state.position, ended)
        };
        self.emit(MediaEvent::TimeUpdate { position });
        if ended {
            self.emit(MediaEvent::Ended);
        }
    }

    /// A pause that did not come from the controller (OS media key, tab policy).
    pub fn external_pause(&self) {
        self.state.lock().unwrap().playing = false;
        self.emit(MediaEvent::Paused);
    }

    /// A play that did not come from the controller (OS media key).
    pub fn external_play(&self) {
        self.state.lock().unwrap().playing = true;
        self.emit(MediaEvent::Played);
    }

    /// Report a decoder/network fault to the sink.
    pub fn inject_fault(&self, kind: FaultKind, fatal: bool, detail: &str) {
        self.emit(MediaEvent::Fault {
            kind,
            fatal,
            detail: detail.to_string(),
        });
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    pub fn buffered(&self) -> f64 {
        self.state.lock().unwrap().buffered
    }

    fn emit(&self, event: MediaEvent) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }
}

impl Default for SimulatedMediaElement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaElement for SimulatedMediaElement {
    fn can_play(&self, mime_type: &str) -> bool {
        mime_type == HLS_MIME_TYPE && self.native_hls.load(Ordering::SeqCst)
    }

    async fn attach_source(&self, _url: &Url) -> Result<f64, AttachError> {
        if let Some(error) = self.attach_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.attach_count.fetch_add(1, Ordering::SeqCst);
        let duration = *self.native_duration.lock().unwrap();
        {
            let mut state = self.state.lock().unwrap();
            state.attached = true;
            state.duration = Some(duration);
        }
        self.emit(MediaEvent::MetadataLoaded { duration });
        Ok(duration)
    }

    fn begin_stream(&self, duration: f64) {
        {
            let mut state = self.state.lock().unwrap();
            state.attached = true;
            state.duration = Some(duration);
        }
        self.emit(MediaEvent::MetadataLoaded { duration });
    }

    fn append_media(&self, _data: Bytes, duration: f64) {
        self.state.lock().unwrap().buffered += duration;
    }

    async fn play(&self) -> Result<(), PlayRejection> {
        {
            let state = self.state.lock().unwrap();
            if !state.attached {
                return Err(PlayRejection::NoSource);
            }
            if self.block_all_play.load(Ordering::SeqCst) {
                return Err(PlayRejection::AutoplayBlocked);
            }
            if !state.muted && !self.allow_unmuted_play.load(Ordering::SeqCst) {
                return Err(PlayRejection::AutoplayBlocked);
            }
        }
        self.state.lock().unwrap().playing = true;
        self.emit(MediaEvent::Played);
        Ok(())
    }

    fn pause(&self) {
        self.state.lock().unwrap().playing = false;
        self.emit(MediaEvent::Paused);
    }

    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().position
    }

    fn set_current_time(&self, position: f64) {
        let position = {
            let mut state = self.state.lock().unwrap();
            let limit = state.duration.unwrap_or(f64::MAX);
            state.position = position.clamp(0.0, limit);
            state.position
        };
        self.emit(MediaEvent::TimeUpdate { position });
    }

    fn duration(&self) -> Option<f64> {
        self.state.lock().unwrap().duration
    }

    fn volume(&self) -> f64 {
        self.state.lock().unwrap().volume
    }

    fn set_volume(&self, volume: f64) {
        self.state.lock().unwrap().volume = volume.clamp(0.0, 1.0);
    }

    fn muted(&self) -> bool {
        self.state.lock().unwrap().muted
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().unwrap().muted = muted;
    }

    fn set_event_sink(&self, sink: MediaEventSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn clear_event_sink(&self) {
        *self.sink.lock().unwrap() = None;
    }
}
