//! Pure geometry for the scrub-preview popup, plus the sprite byte cache.
//! Geometry takes measured rects as input and never consults the layout
//! environment, so it is unit-testable as plain math.

use crate::surface::format_time;
use crate::thumbs::{ThumbnailCue, ThumbnailIndex};
use bytes::Bytes;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Measured geometry of the progress track, in screen pixels.
#[derive(Debug, Clone, Copy)]
pub struct TrackRect {
    pub left: f64,
    pub width: f64,
}

/// Pixel-exact crop of a sprite sheet: render the full sprite inside a
/// `width × height` viewport with the image shifted by `(offset_x, offset_y)`.
/// Equivalent to background-position `-x -y` over the cue's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteCrop {
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl SpriteCrop {
    pub fn for_cue(cue: &ThumbnailCue) -> Self {
        Self {
            width: cue.width,
            height: cue.height,
            offset_x: -(cue.x as i32),
            offset_y: -(cue.y as i32),
        }
    }
}

/// Everything needed to show one preview popup.
#[derive(Debug, Clone)]
pub struct ScrubPreview {
    pub time: f64,
    /// `M:SS` label rendered under the tile.
    pub time_label: String,
    pub cue: ThumbnailCue,
    pub crop: SpriteCrop,
    /// Absolute horizontal placement of the popup's left edge.
    pub screen_left: f64,
}

/// Resolves pointer positions over the track into preview placements.
pub struct ScrubPreviewResolver {
    index: Arc<RwLock<Option<ThumbnailIndex>>>,
    sprites: SpriteCache,
    viewport_width: f64,
}

impl ScrubPreviewResolver {
    pub fn new(index: Arc<RwLock<Option<ThumbnailIndex>>>, viewport_width: f64) -> Self {
        Self {
            index,
            sprites: SpriteCache::new(),
            viewport_width,
        }
    }

    /// Resolve a pointer position to a preview, or `None` when no thumbnail
    /// covers the computed time. Synchronous over in-memory data; safe to
    /// call on every pointer move.
    pub fn resolve(&self, pointer_x: f64, track: TrackRect, duration: f64) -> Option<ScrubPreview> {
        if track.width <= 0.0 || duration <= 0.0 {
            return None;
        }
        let fraction = ((pointer_x - track.left) / track.width).clamp(0.0, 1.0);
        let time = fraction * duration;
        let cue = {
            let guard = self.index.read().unwrap();
            guard.as_ref()?.lookup(time)?.clone()
        };
        let screen_left = self.popup_left(pointer_x, cue.width as f64, Some(track));
        Some(ScrubPreview {
            time,
            time_label: format_time(time),
            crop: SpriteCrop::for_cue(&cue),
            cue,
            screen_left,
        })
    }

    /// Horizontal placement: centered on the pointer, clamped inside the
    /// track when its rect is known, otherwise inside the viewport.
    pub fn popup_left(&self, pointer_x: f64, popup_width: f64, track: Option<TrackRect>) -> f64 {
        match track {
            Some(rect) if rect.width > 0.0 => clamp(
                pointer_x - popup_width / 2.0,
                rect.left,
                rect.left + rect.width - popup_width,
            ),
            _ => clamp(
                pointer_x - popup_width / 2.0,
                0.0,
                self.viewport_width - popup_width,
            ),
        }
    }

    /// Sprite images, fetched once per URL for this player's lifetime.
    pub fn sprites(&self) -> &SpriteCache {
        &self.sprites
    }
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// Sprite byte cache keyed by URL.
pub struct SpriteCache {
    client: Client,
    images: Mutex<HashMap<String, Bytes>>,
}

impl SpriteCache {
    fn new() -> Self {
        Self {
            client: Client::new(),
            images: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.images.lock().unwrap().contains_key(url)
    }

    /// Image bytes for `url`, fetching at most once. A failed fetch reports
    /// `None` and stays uncached so the next encounter can retry.
    pub async fn fetch(&self, url: &str) -> Option<Bytes> {
        if let Some(bytes) = self.images.lock().unwrap().get(url).cloned() {
            return Some(bytes);
        }
        let response = self.client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            debug!("sprite {url} answered {}", response.status());
            return None;
        }
        let bytes = response.bytes().await.ok()?;
        self.images
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes.clone());
        Some(bytes)
    }
}
