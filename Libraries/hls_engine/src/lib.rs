pub mod engine;
pub mod error;
pub mod playlist;
pub mod segment;

use bytes::Bytes;
use std::sync::Arc;

/// Events emitted by the engine toward the component that owns the media element.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Playlists are parsed and the presentation timeline is known.
    ManifestParsed { duration: f64, variant_count: usize },
    /// Initialization segment for the variant that is about to be delivered.
    InitSegment {
        data: Bytes,
        variant_id: String,
        url: String,
    },
    /// A media segment payload, in presentation order.
    Segment {
        data: Bytes,
        variant_id: String,
        sequence: u64,
        duration: f64,
        url: String,
    },
    /// Every segment of the presentation has been delivered.
    EndOfStream,
    /// A fault. Fatal faults stop the fetch task; the owner decides what happens next.
    Fault {
        kind: FaultKind,
        fatal: bool,
        detail: String,
    },
    Info(String),
}

/// Fault classification consumed by the owner's recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Network,
    Media,
    Unsupported,
    Other,
}

pub type EngineCallback = Arc<dyn Fn(EngineEvent) + Send + Sync>;

pub use engine::{EngineConfig, HlsEngine};
pub use error::EngineError;
