//! End-to-end session over the software engine: a mocked CDN serves the
//! playlists, segments, and cue sheet; the simulated element plays them.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use vod_player::controller::{PlaybackController, PlayerEvent, PlayerEventSink, PlayerProps};
use vod_player::media::sim::SimulatedMediaElement;
use vod_player::preview::{ScrubPreviewResolver, TrackRect};
use vod_player::session::{
    MemorySessionStore, SessionPlaybackRecord, SessionStore, SESSION_RECORD_KEY,
};
use vod_player::PlaybackPhase;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MASTER: &str = "#EXTM3U\n\
    #EXT-X-MEDIA:TYPE=SUBTITLES,NAME=\"thumbs\",URI=\"origin_segment_Thumbnail_I-Frame.vtt\"\n\
    #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
    360p.m3u8\n";

const MEDIA: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n\
    #EXTINF:4.0,\nseg_0.m4s\n#EXTINF:4.0,\nseg_1.m4s\n#EXTINF:2.0,\nseg_2.m4s\n#EXT-X-ENDLIST\n";

const CUES: &str = "WEBVTT\n\n\
    00:00:00.000 --> 00:00:05.000\n\
    sprite.jpg#xywh=0,0,160,90\n\n\
    00:00:05.000 --> 00:00:10.000\n\
    sprite.jpg#xywh=160,0,160,90\n";

async fn serve_stream(server: &MockServer, with_cue_sheet: bool) {
    Mock::given(method("GET"))
        .and(path("/movie/42/origin.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MASTER))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/movie/42/360p.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MEDIA))
        .mount(server)
        .await;
    for segment in ["/movie/42/seg_0.m4s", "/movie/42/seg_1.m4s", "/movie/42/seg_2.m4s"] {
        Mock::given(method("GET"))
            .and(path(segment))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 128]))
            .mount(server)
            .await;
    }
    let sheet = if with_cue_sheet {
        ResponseTemplate::new(200).set_body_string(CUES)
    } else {
        ResponseTemplate::new(404)
    };
    Mock::given(method("GET"))
        .and(path("/movie/42/origin_segment_Thumbnail_I-Frame.vtt"))
        .respond_with(sheet)
        .mount(server)
        .await;
}

fn props(server: &MockServer) -> PlayerProps {
    PlayerProps {
        source_url: format!("{}/movie/42/origin.m3u8", server.uri()),
        poster_url: None,
        asset_id: "42".to_string(),
        initial_time: 0.0,
        initial_muted: false,
        has_user_interacted: false,
        autoplay: false,
    }
}

fn collecting_events() -> (PlayerEventSink, Arc<Mutex<Vec<PlayerEvent>>>) {
    let events: Arc<Mutex<Vec<PlayerEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: PlayerEventSink = Arc::new(move |event| sink.lock().unwrap().push(event));
    (callback, events)
}

async fn wait_until<F: Fn() -> bool>(what: &str, predicate: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn full_session_with_thumbnails_and_resume() {
    let server = MockServer::start().await;
    serve_stream(&server, true).await;

    let element = Arc::new(SimulatedMediaElement::new());
    let store = Arc::new(MemorySessionStore::new());
    let (sink, _events) = collecting_events();
    let controller =
        PlaybackController::mount(element.clone(), store.clone(), props(&server), sink);
    controller.load();
    wait_until("ready", || {
        controller.phase() == PlaybackPhase::ReadyPaused
    })
    .await;
    assert_eq!(controller.state().duration, Some(10.0));

    // The engine prebuffers the whole short presentation.
    wait_until("buffer", || element.buffered() >= 10.0).await;

    // Cue sheet was discovered through the engine's subtitle track.
    wait_until("thumbnails", || controller.thumbnails_loaded()).await;
    let resolver = ScrubPreviewResolver::new(controller.thumbnails(), 1920.0);
    let track = TrackRect {
        left: 0.0,
        width: 1000.0,
    };
    let preview = resolver.resolve(700.0, track, 10.0).unwrap();
    assert_eq!(preview.cue.x, 160);
    assert_eq!(preview.crop.offset_x, -160);

    // Play, advance, and verify the position lands in the session store.
    controller.toggle_play().await;
    wait_until("playing", || {
        controller.phase() == PlaybackPhase::ReadyPlaying
    })
    .await;
    element.tick(1.5);
    controller.unmount();

    let record: SessionPlaybackRecord =
        serde_json::from_str(&store.get(SESSION_RECORD_KEY).unwrap()).unwrap();
    assert_eq!(record.asset_id, "42");
    assert!(record.position_seconds >= 1.5);
    assert!(record.has_interacted);
}

#[tokio::test]
async fn missing_cue_sheet_degrades_silently() {
    let server = MockServer::start().await;
    serve_stream(&server, false).await;

    let element = Arc::new(SimulatedMediaElement::new());
    let store = Arc::new(MemorySessionStore::new());
    let (sink, events) = collecting_events();
    let controller = PlaybackController::mount(element, store, props(&server), sink);
    controller.load();
    wait_until("ready", || {
        controller.phase() == PlaybackPhase::ReadyPaused
    })
    .await;

    // Give the cue-sheet task time to run and fail quietly.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!controller.thumbnails_loaded());
    assert_eq!(controller.phase(), PlaybackPhase::ReadyPaused);
    assert!(controller.state().error.is_none());
    assert!(!events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, PlayerEvent::Error { .. })));
    controller.unmount();
}

#[tokio::test]
async fn switching_assets_resets_the_seeded_position() {
    let server = MockServer::start().await;
    serve_stream(&server, false).await;

    let store = Arc::new(MemorySessionStore::new());
    {
        let element = Arc::new(SimulatedMediaElement::new());
        let (sink, _) = collecting_events();
        let controller =
            PlaybackController::mount(element.clone(), store.clone(), props(&server), sink);
        controller.load();
        wait_until("ready", || {
            controller.phase() == PlaybackPhase::ReadyPaused
        })
        .await;
        controller.toggle_play().await;
        element.tick(3.0);
        controller.unmount();
    }

    // Same asset resumes where playback left off.
    let element = Arc::new(SimulatedMediaElement::new());
    let (sink, _) = collecting_events();
    let resumed =
        PlaybackController::mount(element, store.clone(), props(&server), sink);
    assert!(resumed.state().current_time >= 3.0);
    resumed.unmount();

    // A different asset starts from zero.
    let element = Arc::new(SimulatedMediaElement::new());
    let (sink, _) = collecting_events();
    let mut other_props = props(&server);
    other_props.asset_id = "43".to_string();
    let other = PlaybackController::mount(element, store, other_props, sink);
    assert_eq!(other.state().current_time, 0.0);
    other.unmount();
}

#[tokio::test]
async fn element_faults_funnel_into_recovery_without_user_visible_errors() {
    let server = MockServer::start().await;
    serve_stream(&server, false).await;

    let element = Arc::new(SimulatedMediaElement::new());
    let store = Arc::new(MemorySessionStore::new());
    let (sink, events) = collecting_events();
    let controller =
        PlaybackController::mount(element.clone(), store, props(&server), sink);
    controller.load();
    wait_until("ready", || {
        controller.phase() == PlaybackPhase::ReadyPaused
    })
    .await;

    // A fatal decode fault gets one in-place recovery, invisibly.
    element.inject_fault(hls_engine::FaultKind::Media, true, "decode glitch");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(controller.state().error.is_none());

    // The second one is surfaced.
    element.inject_fault(hls_engine::FaultKind::Media, true, "decode glitch again");
    wait_until("error", || controller.state().error.is_some()).await;
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(
            e,
            PlayerEvent::Error {
                kind: vod_player::ErrorKind::Media,
                ..
            }
        )));
    controller.unmount();
}
