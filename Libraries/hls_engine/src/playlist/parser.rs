//! Hand-rolled line parsers for the M3U8 subset the engine consumes.

use super::{MasterPlaylist, MediaPlaylist, MediaSegment, SubtitleTrack, VariantStream};
use crate::error::EngineError;
use std::collections::HashMap;

/// Whether the playlist text is a master playlist (as opposed to a media playlist).
pub fn is_master(text: &str) -> bool {
    text.contains("#EXT-X-STREAM-INF")
}

pub fn parse_master(url: &str, text: &str) -> Result<MasterPlaylist, EngineError> {
    ensure_m3u8(url, text)?;

    let mut variants = Vec::new();
    let mut subtitles = Vec::new();
    // Attributes of the #EXT-X-STREAM-INF waiting for its URI line.
    let mut pending: Option<(u64, Option<(u32, u32)>, Option<String>)> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let attrs = split_attributes(rest);
            let bandwidth = attrs
                .get("BANDWIDTH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let resolution = attrs.get("RESOLUTION").and_then(|v| parse_resolution(v));
            pending = Some((bandwidth, resolution, attrs.get("CODECS").cloned()));
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA:") {
            let attrs = split_attributes(rest);
            if attrs.get("TYPE").map(String::as_str) == Some("SUBTITLES") {
                if let Some(uri) = attrs.get("URI") {
                    subtitles.push(SubtitleTrack {
                        name: attrs.get("NAME").cloned(),
                        language: attrs.get("LANGUAGE").cloned(),
                        uri: uri.clone(),
                    });
                }
            }
        } else if !line.starts_with('#') {
            if let Some((bandwidth, resolution, codecs)) = pending.take() {
                variants.push(VariantStream {
                    uri: line.to_string(),
                    bandwidth,
                    resolution,
                    codecs,
                });
            }
        }
    }

    if variants.is_empty() {
        return Err(EngineError::NoVariants);
    }
    Ok(MasterPlaylist {
        variants,
        subtitles,
    })
}

pub fn parse_media(url: &str, text: &str) -> Result<MediaPlaylist, EngineError> {
    ensure_m3u8(url, text)?;

    let mut playlist = MediaPlaylist {
        target_duration: 0.0,
        init_uri: None,
        segments: Vec::new(),
        ended: false,
    };
    let mut pending_duration: Option<f64> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            playlist.target_duration = rest.trim().parse().unwrap_or(0.0);
        } else if let Some(rest) = line.strip_prefix("#EXT-X-MAP:") {
            playlist.init_uri = split_attributes(rest).get("URI").cloned();
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let duration = rest
                .split(',')
                .next()
                .unwrap_or("")
                .trim()
                .parse()
                .map_err(|_| EngineError::Parse {
                    url: url.to_string(),
                    detail: format!("bad EXTINF duration: {rest}"),
                })?;
            pending_duration = Some(duration);
        } else if line == "#EXT-X-ENDLIST" {
            playlist.ended = true;
        } else if !line.starts_with('#') {
            if let Some(duration) = pending_duration.take() {
                playlist.segments.push(MediaSegment {
                    uri: line.to_string(),
                    duration,
                });
            }
        }
    }

    Ok(playlist)
}

fn ensure_m3u8(url: &str, text: &str) -> Result<(), EngineError> {
    if text.trim_start().starts_with("#EXTM3U") {
        Ok(())
    } else {
        Err(EngineError::NotHls(url.to_string()))
    }
}

/// Split an attribute list on commas, honoring quoted values
/// (`CODECS="avc1.64001f,mp4a.40.2"` is a single attribute).
fn split_attributes(list: &str) -> HashMap<String, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    for ch in list.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }
    if !field.is_empty() {
        fields.push(field);
    }

    let mut attrs = HashMap::new();
    for f in fields {
        if let Some((key, value)) = f.split_once('=') {
            attrs.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    attrs
}

fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
        #EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"subs\",NAME=\"thumbs\",URI=\"origin_segment_Thumbnail_I-Frame.vtt\"\n\
        #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.64001f,mp4a.40.2\"\n\
        360p.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720\n\
        720p.m3u8\n";

    const MEDIA: &str = "#EXTM3U\n\
        #EXT-X-VERSION:7\n\
        #EXT-X-TARGETDURATION:4\n\
        #EXT-X-MAP:URI=\"init.mp4\"\n\
        #EXTINF:4.000,\n\
        seg_0.m4s\n\
        #EXTINF:4.000,\n\
        seg_1.m4s\n\
        #EXTINF:2.500,\n\
        seg_2.m4s\n\
        #EXT-X-ENDLIST\n";

    #[test]
    fn master_playlist_variants_and_subtitles() {
        let master = parse_master("http://cdn/origin.m3u8", MASTER).unwrap();
        assert_eq!(master.variants.len(), 2);
        assert_eq!(master.variants[0].bandwidth, 800_000);
        assert_eq!(master.variants[0].resolution, Some((640, 360)));
        assert_eq!(
            master.variants[0].codecs.as_deref(),
            Some("avc1.64001f,mp4a.40.2")
        );
        assert_eq!(master.variants[1].uri, "720p.m3u8");
        assert_eq!(master.subtitles.len(), 1);
        assert_eq!(
            master.subtitles[0].uri,
            "origin_segment_Thumbnail_I-Frame.vtt"
        );
    }

    #[test]
    fn media_playlist_segments() {
        let media = parse_media("http://cdn/360p.m3u8", MEDIA).unwrap();
        assert_eq!(media.target_duration, 4.0);
        assert_eq!(media.init_uri.as_deref(), Some("init.mp4"));
        assert_eq!(media.segments.len(), 3);
        assert_eq!(media.segments[2].uri, "seg_2.m4s");
        assert!(media.ended);
        assert!((media.total_duration() - 10.5).abs() < 1e-9);
    }

    #[test]
    fn master_detection() {
        assert!(is_master(MASTER));
        assert!(!is_master(MEDIA));
    }

    #[test]
    fn rejects_non_m3u8_text() {
        let err = parse_media("http://cdn/x", "<html>not found</html>").unwrap_err();
        assert!(matches!(err, EngineError::NotHls(_)));
    }

    #[test]
    fn master_without_variants_is_an_error() {
        let err = parse_master("http://cdn/x.m3u8", "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\n").unwrap_err();
        assert!(matches!(err, EngineError::NoVariants));
    }
}
