//! Headless adaptive-streaming player core.
//!
//! The platform's playback surface is a [`media::MediaElement`] trait object.
//! Everything above it lives here and is drivable without a real decoder:
//! manifest loading with native/software engine selection, the playback
//! state machine, scrub-preview thumbnails, the control surface view-model,
//! and session continuity.

pub mod args;
pub mod controller;
pub mod error;
pub mod loader;
pub mod media;
pub mod preview;
pub mod session;
pub mod surface;
pub mod thumbs;

pub use controller::{
    PlaybackController, PlaybackPhase, PlaybackState, PlayerEvent, PlayerEventSink, PlayerProps,
};
pub use error::{ErrorKind, PlayerError};
