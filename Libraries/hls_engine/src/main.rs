use hls_engine::{EngineEvent, HlsEngine};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let manifest_url = "http://localhost:3000/media/demo/origin.m3u8";

    let callback = |event: EngineEvent| match event {
        EngineEvent::ManifestParsed {
            duration,
            variant_count,
        } => {
            info!("manifest parsed: {duration:.1}s across {variant_count} variants");
        }
        EngineEvent::InitSegment { variant_id, .. } => {
            info!("init segment for {variant_id}");
        }
        EngineEvent::Segment {
            data,
            sequence,
            variant_id,
            ..
        } => {
            info!(
                "segment {sequence} from {variant_id}: {} bytes",
                data.len()
            );
        }
        EngineEvent::EndOfStream => info!("end of stream"),
        EngineEvent::Fault {
            kind,
            fatal,
            detail,
        } => error!("fault ({kind:?}, fatal={fatal}): {detail}"),
        EngineEvent::Info(msg) => info!("{msg}"),
    };

    match HlsEngine::new(manifest_url, Arc::new(callback)).await {
        Ok(engine) => {
            engine.start();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            engine.destroy();
        }
        Err(e) => error!("failed to load {manifest_url}: {e}"),
    }
}
