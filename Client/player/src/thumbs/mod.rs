//! Scrub-preview thumbnail data: cue-sheet discovery, parsing, and the
//! nearest-time index.

pub mod parser;

use hls_engine::playlist::SubtitleTrack;
use reqwest::Client;
use tracing::debug;
use url::Url;

/// Conventional sheet name the transcoding pipeline writes next to the manifest.
pub const DEFAULT_SHEET_NAME: &str = "origin_segment_Thumbnail_I-Frame.vtt";

/// One cue: a time range mapped to a sub-region of a sprite image.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailCue {
    pub start_time: f64,
    pub end_time: f64,
    pub sprite_url: String,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Read-only nearest-start-time lookup over the parsed cues.
#[derive(Debug, Default)]
pub struct ThumbnailIndex {
    cues: Vec<ThumbnailCue>,
}

impl ThumbnailIndex {
    pub fn new(mut cues: Vec<ThumbnailCue>) -> Self {
        cues.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        Self { cues }
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    /// The cue whose start time is nearest to `time`, ties going to the
    /// earlier cue. Times before the first or after the last cue clamp to
    /// the boundary cues. A linear scan is fine at tens of cues.
    pub fn lookup(&self, time: f64) -> Option<&ThumbnailCue> {
        let mut best: Option<(&ThumbnailCue, f64)> = None;
        for cue in &self.cues {
            let distance = (cue.start_time - time).abs();
            match best {
                Some((_, nearest)) if distance >= nearest => {}
                _ => best = Some((cue, distance)),
            }
        }
        best.map(|(cue, _)| cue)
    }
}

/// Candidate cue-sheet URLs, in preference order: a discovered subtitle
/// track that marks itself as a thumbnail rendition, then the conventional
/// sheet next to the manifest.
pub fn cue_sheet_candidates(tracks: &[SubtitleTrack], manifest_url: &Url) -> Vec<Url> {
    let mut candidates = Vec::new();
    for track in tracks {
        if track.uri.contains(".vtt") && track.uri.contains("Thumbnail") {
            if let Ok(url) = manifest_url.join(&track.uri) {
                candidates.push(url);
            }
        }
    }
    if let Ok(url) = manifest_url.join(DEFAULT_SHEET_NAME) {
        if !candidates.contains(&url) {
            candidates.push(url);
        }
    }
    candidates
}

/// Fetch and parse the first candidate sheet that yields cues. Sheet absence
/// is not an error: the result is simply an empty index and no previews.
pub async fn load_thumbnail_index(
    client: &Client,
    tracks: &[SubtitleTrack],
    manifest_url: &Url,
) -> ThumbnailIndex {
    for candidate in cue_sheet_candidates(tracks, manifest_url) {
        if let Some(text) = parser::fetch_cue_sheet(client, &candidate).await {
            let cues = parser::parse_cue_sheet(&text, &candidate);
            if !cues.is_empty() {
                return ThumbnailIndex::new(cues);
            }
            debug!("cue sheet {candidate} contained no usable cues");
        }
    }
    ThumbnailIndex::default()
}

/// Derive the first poster-frame URL the transcoder publishes next to a
/// manifest (`…/origin.m3u8` → `…/Thumbnail_000000001.jpg`).
pub fn poster_from_manifest_url(manifest_url: &str) -> Option<String> {
    manifest_url
        .strip_suffix("origin.m3u8")
        .map(|base| format!("{base}Thumbnail_000000001.jpg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(start: f64) -> ThumbnailCue {
        ThumbnailCue {
            start_time: start,
            end_time: start + 5.0,
            sprite_url: "http://cdn/sprite.jpg".to_string(),
            x: 0,
            y: 0,
            width: 160,
            height: 90,
        }
    }

    #[test]
    fn empty_index_always_misses() {
        let index = ThumbnailIndex::default();
        assert!(index.lookup(0.0).is_none());
        assert!(index.lookup(1e9).is_none());
    }

    #[test]
    fn lookup_clamps_to_boundary_cues() {
        let index = ThumbnailIndex::new(vec![cue(10.0), cue(20.0), cue(30.0)]);
        assert_eq!(index.lookup(-50.0).unwrap().start_time, 10.0);
        assert_eq!(index.lookup(500.0).unwrap().start_time, 30.0);
        assert_eq!(index.lookup(19.0).unwrap().start_time, 20.0);
    }

    #[test]
    fn lookup_ties_break_to_the_earlier_cue() {
        let index = ThumbnailIndex::new(vec![cue(10.0), cue(20.0)]);
        // 15 is equidistant from both start times.
        assert_eq!(index.lookup(15.0).unwrap().start_time, 10.0);
    }

    #[test]
    fn candidates_prefer_thumbnail_tracks_over_the_conventional_name() {
        let manifest = Url::parse("http://cdn/movie/42/origin.m3u8").unwrap();
        let tracks = vec![
            SubtitleTrack {
                name: Some("English".to_string()),
                language: Some("en".to_string()),
                uri: "subs_en.vtt".to_string(),
            },
            SubtitleTrack {
                name: Some("thumbs".to_string()),
                language: None,
                uri: "sprite_Thumbnail_track.vtt".to_string(),
            },
        ];
        let candidates = cue_sheet_candidates(&tracks, &manifest);
        assert_eq!(candidates.len(), 2);
        assert_eq!(
            candidates[0].as_str(),
            "http://cdn/movie/42/sprite_Thumbnail_track.vtt"
        );
        assert_eq!(
            candidates[1].as_str(),
            "http://cdn/movie/42/origin_segment_Thumbnail_I-Frame.vtt"
        );
    }

    #[test]
    fn candidates_fall_back_to_the_conventional_sheet() {
        let manifest = Url::parse("http://cdn/movie/42/origin.m3u8").unwrap();
        let candidates = cue_sheet_candidates(&[], &manifest);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0]
            .as_str()
            .ends_with("/42/origin_segment_Thumbnail_I-Frame.vtt"));
    }

    #[test]
    fn poster_url_derives_from_the_manifest_url() {
        assert_eq!(
            poster_from_manifest_url("https://cdn/public/movie/abc/origin.m3u8").as_deref(),
            Some("https://cdn/public/movie/abc/Thumbnail_000000001.jpg")
        );
        assert_eq!(poster_from_manifest_url("https://cdn/other.m3u8"), None);
    }
}
