//! The platform playback surface the controller commands and observes.

pub mod sim;

use async_trait::async_trait;
use bytes::Bytes;
use hls_engine::FaultKind;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// MIME type an element must support for direct manifest binding.
pub const HLS_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

/// State changes reported by the media element. One sink is installed per
/// element lifetime; ambient changes (OS media keys, tab policies) arrive
/// through the same events as controller-driven ones.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    MetadataLoaded {
        duration: f64,
    },
    TimeUpdate {
        position: f64,
    },
    Played,
    Paused,
    Ended,
    Fault {
        kind: FaultKind,
        fatal: bool,
        detail: String,
    },
}

pub type MediaEventSink = Arc<dyn Fn(MediaEvent) + Send + Sync>;

/// Why a `play()` call was refused.
#[derive(Debug, Clone, Error)]
pub enum PlayRejection {
    #[error("autoplay with sound requires a prior user gesture")]
    AutoplayBlocked,
    #[error("no media is attached")]
    NoSource,
}

/// Why a native source bind failed.
#[derive(Debug, Clone, Error)]
pub enum AttachError {
    #[error("the element cannot play this format")]
    Unsupported,
    #[error("network failure while opening the source: {0}")]
    Network(String),
}

/// A playback surface. Real integrations wrap the platform's media element;
/// [`sim::SimulatedMediaElement`] is a deterministic stand-in.
#[async_trait]
pub trait MediaElement: Send + Sync {
    /// Whether the element can play `mime_type` without a software engine.
    fn can_play(&self, mime_type: &str) -> bool;

    /// Bind a natively-supported source. Resolves once metadata is loaded,
    /// with the presentation duration.
    async fn attach_source(&self, url: &Url) -> Result<f64, AttachError>;

    /// Software-engine path: announce the presentation timeline.
    fn begin_stream(&self, duration: f64);

    /// Software-engine path: hand a segment payload to the decode buffer.
    fn append_media(&self, data: Bytes, duration: f64);

    /// Start playback. The result must be observed: a rejection means the
    /// element is NOT playing, whatever the caller intended to display.
    async fn play(&self) -> Result<(), PlayRejection>;

    fn pause(&self);

    fn current_time(&self) -> f64;
    fn set_current_time(&self, position: f64);
    fn duration(&self) -> Option<f64>;

    fn volume(&self) -> f64;
    fn set_volume(&self, volume: f64);
    fn muted(&self) -> bool;
    fn set_muted(&self, muted: bool);

    /// Install the single authoritative event sink for this element.
    fn set_event_sink(&self, sink: MediaEventSink);
    fn clear_event_sink(&self);
}
