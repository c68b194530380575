use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, Layer};
use vod_player::args::{get_log_level_filter, parse_args};
use vod_player::controller::{PlaybackController, PlayerEvent, PlayerEventSink, PlayerProps};
use vod_player::media::sim::SimulatedMediaElement;
use vod_player::media::MediaElement;
use vod_player::session::MemorySessionStore;
use vod_player::thumbs;

#[tokio::main]
async fn main() {
    let args = parse_args();

    // Build the FmtSubscriber layer
    let fmt_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .compact()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_filter(get_log_level_filter(&args));
    let subscriber = tracing_subscriber::registry().with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default subscriber");

    info!("Starting headless player session");
    info!("{:?}", args);

    // With a real manifest URL the simulated element reports no native
    // support, so loading goes through the software engine; without one the
    // element itself plays a two-minute simulated stream.
    let element = Arc::new(match &args.source_url {
        Some(_) => SimulatedMediaElement::new(),
        None => SimulatedMediaElement::with_native_hls(120.0),
    });

    let source_url = args
        .source_url
        .clone()
        .unwrap_or_else(|| "https://localhost/media/demo/origin.m3u8".to_string());
    let props = PlayerProps {
        poster_url: thumbs::poster_from_manifest_url(&source_url),
        source_url,
        asset_id: args.asset_id.clone(),
        initial_time: 0.0,
        initial_muted: false,
        has_user_interacted: true,
        autoplay: args.autoplay,
    };

    let events: PlayerEventSink = Arc::new(|event| match event {
        PlayerEvent::Ready => info!("player ready"),
        PlayerEvent::TimeUpdate(t) => info!("time {t:.2}s"),
        PlayerEvent::MuteChange(muted) => info!("muted: {muted}"),
        PlayerEvent::Error { kind, message } => tracing::error!("error ({kind:?}): {message}"),
    });

    let store = Arc::new(MemorySessionStore::new());
    let dyn_element: Arc<dyn MediaElement> = element.clone();
    let controller = PlaybackController::mount(dyn_element, store, props, events);
    controller.load();

    // Give the load pipeline a moment, then press play unless autoplay did.
    tokio::time::sleep(Duration::from_secs(1)).await;
    if !args.autoplay {
        controller.toggle_play().await;
    }

    // Drive the simulated clock at 4 Hz for the requested wall time.
    for _ in 0..args.duration * 4 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        element.tick(0.25);
    }

    let state = controller.state();
    info!(
        "final phase {:?} at {:.1}s (buffered {:.1}s)",
        state.phase,
        state.current_time,
        element.buffered()
    );
    controller.unmount();
}
