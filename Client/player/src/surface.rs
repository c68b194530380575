//! The control surface: render-ready props derived from playback state,
//! user gestures translated into controller intents, and the small pieces of
//! purely-local UI state (volume flyout hover, scrub preview popup).
//!
//! The surface never mutates the media element itself; every gesture goes
//! through the controller's intent handlers.

use crate::controller::{PlaybackController, PlaybackPhase, PlaybackState};
use crate::preview::{ScrubPreview, ScrubPreviewResolver, TrackRect};
use std::sync::Arc;

/// Elapsed-time clock: `M:SS`, or `H:MM:SS` from one hour up.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// Fraction of the track a pointer position corresponds to.
pub fn seek_fraction(pointer_x: f64, track: TrackRect) -> f64 {
    if track.width <= 0.0 {
        return 0.0;
    }
    ((pointer_x - track.left) / track.width).clamp(0.0, 1.0)
}

/// Hover state of the compound volume control (icon + slider). The slider
/// hides only once the pointer has left both parts, not just the icon.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumeFlyout {
    over_icon: bool,
    over_slider: bool,
}

impl VolumeFlyout {
    pub fn enter_icon(&mut self) {
        self.over_icon = true;
    }

    pub fn leave_icon(&mut self) {
        self.over_icon = false;
    }

    pub fn enter_slider(&mut self) {
        self.over_slider = true;
    }

    pub fn leave_slider(&mut self) {
        self.over_slider = false;
    }

    pub fn visible(&self) -> bool {
        self.over_icon || self.over_slider
    }
}

/// User gestures the surface translates into controller calls.
#[derive(Debug, Clone, Copy)]
pub enum ControlIntent {
    TogglePlay,
    SeekFromPointer { pointer_x: f64, track: TrackRect },
    SetVolume(f64),
    ToggleMute,
    ToggleFullscreen,
    ToggleTheater,
    EnterVolumeIcon,
    LeaveVolumeIcon,
    EnterVolumeSlider,
    LeaveVolumeSlider,
    HoverScrub { pointer_x: f64, track: TrackRect },
    LeaveScrub,
}

/// Side effects the host still has to perform; the surface cannot reach the
/// platform's fullscreen API itself. The resulting fullscreen-change signal
/// must be reported back through
/// [`PlaybackController::set_fullscreen_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEffect {
    RequestFullscreen(bool),
}

/// Render-ready snapshot of the whole control row.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSurfaceProps {
    pub is_playing: bool,
    pub elapsed_label: String,
    pub progress_percent: f64,
    pub volume: f64,
    pub volume_percent: u32,
    pub is_muted: bool,
    pub show_volume_slider: bool,
    pub is_fullscreen: bool,
    pub is_theater_mode: bool,
    pub loading: bool,
    /// Human-readable fatal error; replaces the playback surface entirely.
    pub error: Option<String>,
}

pub struct ControlSurface {
    flyout: VolumeFlyout,
    preview: Option<ScrubPreview>,
}

impl ControlSurface {
    pub fn new() -> Self {
        Self {
            flyout: VolumeFlyout::default(),
            preview: None,
        }
    }

    /// Translate one gesture. Controller state changes happen inside; the
    /// return value is the effect the host still has to apply.
    pub async fn handle(
        &mut self,
        intent: ControlIntent,
        controller: &Arc<PlaybackController>,
        resolver: &ScrubPreviewResolver,
    ) -> Option<SurfaceEffect> {
        match intent {
            ControlIntent::TogglePlay => {
                controller.toggle_play().await;
            }
            ControlIntent::SeekFromPointer { pointer_x, track } => {
                if let Some(duration) = controller.state().duration {
                    controller.seek(seek_fraction(pointer_x, track) * duration);
                }
            }
            ControlIntent::SetVolume(volume) => controller.set_volume(volume),
            ControlIntent::ToggleMute => controller.toggle_mute(),
            ControlIntent::ToggleFullscreen => {
                return Some(SurfaceEffect::RequestFullscreen(
                    !controller.state().is_fullscreen,
                ));
            }
            ControlIntent::ToggleTheater => controller.toggle_theater(),
            ControlIntent::EnterVolumeIcon => self.flyout.enter_icon(),
            ControlIntent::LeaveVolumeIcon => self.flyout.leave_icon(),
            ControlIntent::EnterVolumeSlider => self.flyout.enter_slider(),
            ControlIntent::LeaveVolumeSlider => self.flyout.leave_slider(),
            ControlIntent::HoverScrub { pointer_x, track } => {
                self.preview = controller
                    .state()
                    .duration
                    .and_then(|duration| resolver.resolve(pointer_x, track, duration));
            }
            ControlIntent::LeaveScrub => self.preview = None,
        }
        None
    }

    /// The active scrub preview popup, if any.
    pub fn preview(&self) -> Option<&ScrubPreview> {
        self.preview.as_ref()
    }

    /// Derive the full control row from the controller's snapshot. Recomputed
    /// on every time-update tick.
    pub fn props(&self, state: &PlaybackState) -> ControlSurfaceProps {
        let duration = state.duration.unwrap_or(0.0);
        let progress_percent = if duration > 0.0 {
            (state.current_time / duration * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        ControlSurfaceProps {
            is_playing: state.phase == PlaybackPhase::ReadyPlaying,
            elapsed_label: format_time(state.current_time),
            progress_percent,
            volume: state.volume,
            volume_percent: (state.volume * 100.0).round() as u32,
            is_muted: state.is_muted,
            show_volume_slider: self.flyout.visible(),
            is_fullscreen: state.is_fullscreen,
            is_theater_mode: state.is_theater_mode,
            loading: state.loading,
            error: state.error.as_ref().map(|(_, message)| message.clone()),
        }
    }
}

impl Default for ControlSurface {
    fn default() -> Self {
        Self::new()
    }
}
