//! Line-oriented cue sheet parsing (WebVTT-style thumbnail sheets).

use super::ThumbnailCue;
use reqwest::Client;
use tracing::debug;
use url::Url;

/// Fetch the sheet text. Any non-2xx answer or transport failure yields
/// `None`; a missing sheet only disables the preview feature.
pub async fn fetch_cue_sheet(client: &Client, url: &Url) -> Option<String> {
    match client.get(url.clone()).send().await {
        Ok(response) if response.status().is_success() => response.text().await.ok(),
        Ok(response) => {
            debug!("cue sheet {url} answered {}", response.status());
            None
        }
        Err(e) => {
            debug!("cue sheet fetch failed for {url}: {e}");
            None
        }
    }
}

/// Parse cue blocks: a `start --> end` timecode line followed by a
/// `path#xywh=x,y,w,h` reference line. A malformed cue is skipped; the rest
/// of the sheet still parses.
pub fn parse_cue_sheet(text: &str, sheet_url: &Url) -> Vec<ThumbnailCue> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let mut cues = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if !line.contains("-->") {
            continue;
        }
        let Some((start_text, end_text)) = line.split_once("-->") else {
            continue;
        };
        let (Some(start_time), Some(end_time)) = (
            parse_timecode(start_text.trim()),
            parse_timecode(end_text.trim()),
        ) else {
            continue;
        };
        if start_time >= end_time {
            continue;
        }
        let Some(reference) = lines.get(i + 1).copied() else {
            continue;
        };
        if let Some(cue) = parse_reference(reference, start_time, end_time, sheet_url) {
            cues.push(cue);
        }
    }
    cues
}

/// `HH:MM:SS.mmm` with optional hours, as seconds.
fn parse_timecode(text: &str) -> Option<f64> {
    let parts: Vec<&str> = text.split(':').collect();
    match parts.as_slice() {
        [h, m, s] => Some(
            h.parse::<u64>().ok()? as f64 * 3600.0
                + m.parse::<u64>().ok()? as f64 * 60.0
                + s.parse::<f64>().ok()?,
        ),
        [m, s] => Some(m.parse::<u64>().ok()? as f64 * 60.0 + s.parse::<f64>().ok()?),
        _ => None,
    }
}

fn parse_reference(
    line: &str,
    start_time: f64,
    end_time: f64,
    sheet_url: &Url,
) -> Option<ThumbnailCue> {
    let (image_path, coords) = line.split_once("#xywh=")?;
    if image_path.is_empty() {
        return None;
    }
    let values: Vec<u32> = coords
        .split(',')
        .map(|v| v.trim().parse().ok())
        .collect::<Option<Vec<_>>>()?;
    if values.len() != 4 {
        return None;
    }
    let sprite_url = if image_path.starts_with("http") {
        image_path.to_string()
    } else {
        sheet_url.join(image_path).ok()?.to_string()
    };
    Some(ThumbnailCue {
        start_time,
        end_time,
        sprite_url,
        x: values[0],
        y: values[1],
        width: values[2],
        height: values[3],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sheet_url() -> Url {
        Url::parse("http://cdn/movie/42/origin_segment_Thumbnail_I-Frame.vtt").unwrap()
    }

    const TWO_CUES: &str = "WEBVTT\n\n\
        00:00:00.000 --> 00:00:05.000\n\
        sprite.jpg#xywh=0,0,160,90\n\n\
        00:00:05.000 --> 00:00:10.000\n\
        sprite.jpg#xywh=160,0,160,90\n";

    #[test]
    fn parses_well_formed_blocks() {
        let cues = parse_cue_sheet(TWO_CUES, &sheet_url());
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_time, 0.0);
        assert_eq!(cues[0].end_time, 5.0);
        assert_eq!(cues[0].x, 0);
        assert_eq!(cues[1].start_time, 5.0);
        assert_eq!(cues[1].x, 160);
        // Relative sprite paths resolve against the sheet URL.
        assert_eq!(cues[0].sprite_url, "http://cdn/movie/42/sprite.jpg");
    }

    #[test]
    fn nearest_lookup_picks_the_second_cue_at_seven_seconds() {
        let index = super::super::ThumbnailIndex::new(parse_cue_sheet(TWO_CUES, &sheet_url()));
        let cue = index.lookup(7.0).unwrap();
        assert_eq!(cue.start_time, 5.0);
        assert_eq!(cue.x, 160);
    }

    #[test]
    fn malformed_coordinates_skip_only_that_cue() {
        let text = "WEBVTT\n\n\
            00:00:00.000 --> 00:00:05.000\n\
            sprite.jpg#xywh=abc,0,160,90\n\n\
            00:00:05.000 --> 00:00:10.000\n\
            sprite.jpg#xywh=160,0,160,90\n";
        let cues = parse_cue_sheet(text, &sheet_url());
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].start_time, 5.0);
    }

    #[test]
    fn malformed_timecodes_skip_only_that_cue() {
        let text = "00:xx:00.000 --> 00:00:05.000\n\
            sprite.jpg#xywh=0,0,160,90\n\n\
            00:00:05.000 --> 00:00:10.000\n\
            sprite.jpg#xywh=160,0,160,90\n";
        let cues = parse_cue_sheet(text, &sheet_url());
        assert_eq!(cues.len(), 1);
    }

    #[test]
    fn hours_are_optional_in_timecodes() {
        assert_eq!(parse_timecode("00:01:30.500"), Some(90.5));
        assert_eq!(parse_timecode("01:30.500"), Some(90.5));
        assert_eq!(parse_timecode("02:00:00.000"), Some(7200.0));
        assert_eq!(parse_timecode("90"), None);
        assert_eq!(parse_timecode(""), None);
    }

    #[test]
    fn inverted_time_ranges_are_dropped() {
        let text = "00:00:10.000 --> 00:00:05.000\n\
            sprite.jpg#xywh=0,0,160,90\n";
        assert!(parse_cue_sheet(text, &sheet_url()).is_empty());
    }

    #[test]
    fn absolute_sprite_urls_pass_through() {
        let text = "00:00:00.000 --> 00:00:05.000\n\
            http://other-cdn/big_sprite.jpg#xywh=0,0,160,90\n";
        let cues = parse_cue_sheet(text, &sheet_url());
        assert_eq!(cues[0].sprite_url, "http://other-cdn/big_sprite.jpg");
    }

    #[tokio::test]
    async fn missing_sheet_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movie/42/origin_segment_Thumbnail_I-Frame.vtt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = Client::new();
        let url = Url::parse(&format!(
            "{}/movie/42/origin_segment_Thumbnail_I-Frame.vtt",
            server.uri()
        ))
        .unwrap();
        assert!(fetch_cue_sheet(&client, &url).await.is_none());

        let manifest = Url::parse(&format!("{}/movie/42/origin.m3u8", server.uri())).unwrap();
        let index = super::super::load_thumbnail_index(&client, &[], &manifest).await;
        assert!(index.is_empty());
    }
}
