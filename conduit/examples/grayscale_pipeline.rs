//! Feeds synthetic frames through the reference routine and prints what comes
//! back. The last processed frame is written to `grayscale_pipeline.png` in
//! the system temp directory.

use std::sync::Arc;
use std::time::Duration;

use common::log_setup::LogConfig;
use conduit::prelude::*;
use conduit::reference::analysis::index;
use image::RgbaImage;
use tracing::info;

const SOURCE: (u32, u32) = (320, 240);
const TARGET: (u32, u32) = (160, 120);
const FRAMES: u32 = 30;

/// Dark frame with a bright square sliding left to right.
fn synthetic_frame(n: u32) -> Vec<u8> {
    let (width, height) = SOURCE;
    let left = n * (width - 40) / FRAMES;
    RgbaImage::from_fn(width, height, |x, y| {
        if (left..left + 40).contains(&x) && (100..140).contains(&y) {
            image::Rgba([250, 250, 250, 255])
        } else {
            image::Rgba([20, 30, 40, 255])
        }
    })
    .into_raw()
}

fn main() -> anyhow::Result<()> {
    conduit::runtime::init(&LogConfig::with_level("info"));

    let (channel, mut results) = ResultChannel::new();
    let stats = Arc::new(GpuStats::default());

    let mut processor = ImageProcessor::builder()
        .config(ProcessorConfig {
            start_timeout_ms: Some(5_000),
            ..ProcessorConfig::with_source_size(SOURCE.0, SOURCE.1)
        })
        .platform(SoftwarePlatform::default())
        .routine(Arc::new(ReferenceRoutine::new()))
        .gpu_factory(SoftwareGpu::factory(stats.clone()))
        .observer(Arc::new(channel))
        .build()?;

    processor.set_result_frame_type(ResultFrameType::DstWithOverlay)?;
    processor.start(TARGET.0, TARGET.1)?;

    let producer = processor.surface()?;
    for n in 0..FRAMES {
        producer.queue_frame(SOURCE.0, SOURCE.1, synthetic_frame(n))?;
        std::thread::sleep(Duration::from_millis(15));
    }
    std::thread::sleep(Duration::from_millis(100));

    processor.update_fps()?;
    info!(
        "{} results, {:.1} fps overall, {} frames overwritten before draw",
        processor.delivered_results()?,
        processor.total_fps()?,
        producer.overwritten_frames()
    );
    processor.release()?;

    let mut last_image = None;
    while let Ok(payload) = results.try_recv() {
        match payload {
            ResultPayload::Vector { values, .. } => {
                info!(
                    "frame {:>2}: mean {:6.2}, bright box at x={} w={}",
                    values[index::FRAME_INDEX],
                    values[index::MEAN],
                    values[index::BOX_X],
                    values[index::BOX_WIDTH]
                );
            }
            ResultPayload::Image {
                width,
                height,
                pixels,
            } => last_image = RgbaImage::from_raw(width, height, pixels),
        }
    }

    if let Some(image) = last_image {
        let path = std::env::temp_dir().join("grayscale_pipeline.png");
        image.save(&path)?;
        info!("Last frame written to {}", path.display());
    }

    info!("GPU draws: {}, live textures: {}", stats.draws(), stats.live_textures());
    Ok(())
}
