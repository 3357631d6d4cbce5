use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use common::log_setup::{setup_logging, LogConfig};
use glam::{Mat4, Vec3};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::config::ProcessorConfig;
use crate::gpu::{Gpu, GpuError, GpuFactory, GpuResult, GpuStats, SoftwareGpu, TextureId, TextureKind};
use crate::processor::{
    FrameInput, FrameObserver, ImageProcessor, ProcessingRoutine, ResultFrame, ResultFrameType,
    ResultSink, SessionId, STATUS_OK,
};
use crate::surface::{FrameDelivery, SoftwareFrame, SoftwarePlatform};

pub const WAIT: Duration = Duration::from_secs(10);

/// Status returned by [`RecordingRoutine`] for a scripted frame failure.
pub const FRAME_FAILURE: i32 = -5;

pub fn init_logging() {
    setup_logging(&LogConfig::with_level("debug"));
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

pub fn solid_frame(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    rgba.repeat(width as usize * height as usize)
}

/// Frame transform distinguishable by its z offset, sampling like the default.
pub fn tagged_transform(tag: u32) -> Mat4 {
    SoftwareFrame::default_transform() * Mat4::from_translation(Vec3::new(0.0, 0.0, tag as f32))
}

/// What the routine saw on one `process_frame` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub size: (u32, u32),
    pub transform: Mat4,
    pub first_pixel: [u8; 4],
    pub thread: Option<String>,
}

/// Routine that records every call, echoes the result frame type and returns
/// scripted status codes.
#[derive(Debug, Default)]
pub struct RecordingRoutine {
    sinks: Mutex<HashMap<SessionId, ResultSink>>,
    calls: Mutex<Vec<String>>,
    draws: Mutex<Vec<DrawRecord>>,
    frame_type: AtomicI32,
    pub refuse_sessions: AtomicBool,
    pub start_status: AtomicI32,
    pub stop_status: AtomicI32,
    pub set_type_status: AtomicI32,
    pub get_type_status: AtomicI32,
    pub deliver_results: AtomicBool,
    /// Number of upcoming frames answered with [`FRAME_FAILURE`].
    pub failing_frames: AtomicUsize,
    pub draw_delay: Mutex<Option<Duration>>,
}

impl RecordingRoutine {
    pub fn delivering() -> Self {
        let routine = Self::default();
        routine.deliver_results.store(true, Ordering::SeqCst);
        routine
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls.lock().iter().any(|call| call == name)
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.draws.lock().clone()
    }

    pub fn draw_count(&self) -> usize {
        self.draws.lock().len()
    }

    pub fn last_draw(&self) -> Option<DrawRecord> {
        self.draws.lock().last().cloned()
    }

    pub fn sink(&self, session: SessionId) -> Option<ResultSink> {
        self.sinks.lock().get(&session).cloned()
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }
}

impl ProcessingRoutine for RecordingRoutine {
    fn create_session(&self, sink: ResultSink) -> Option<SessionId> {
        self.record("create_session");
        if self.refuse_sessions.load(Ordering::SeqCst) {
            return None;
        }
        let id = SessionId::next();
        self.sinks.lock().insert(id, sink);
        Some(id)
    }

    fn start_session(&self, _session: SessionId, _width: u32, _height: u32) -> i32 {
        self.record("start_session");
        self.start_status.load(Ordering::SeqCst)
    }

    fn stop_session(&self, _session: SessionId) -> i32 {
        self.record("stop_session");
        self.stop_status.load(Ordering::SeqCst)
    }

    fn process_frame(&self, session: SessionId, input: &mut FrameInput<'_>) -> i32 {
        let mut pixels = Vec::new();
        let size = match input.read_pixels(&mut pixels) {
            Ok(size) => size,
            Err(_) => return FRAME_FAILURE,
        };
        let mut first_pixel = [0u8; 4];
        if pixels.len() >= 4 {
            first_pixel.copy_from_slice(&pixels[..4]);
        }

        if let Some(delay) = *self.draw_delay.lock() {
            std::thread::sleep(delay);
        }

        let index = {
            let mut draws = self.draws.lock();
            draws.push(DrawRecord {
                size,
                transform: *input.source_transform(),
                first_pixel,
                thread: std::thread::current().name().map(str::to_string),
            });
            draws.len()
        };

        let failing = self
            .failing_frames
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return FRAME_FAILURE;
        }

        if self.deliver_results.load(Ordering::SeqCst) {
            if let Some(sink) = self.sink(session) {
                let frame_type = ResultFrameType::from_code(self.frame_type.load(Ordering::SeqCst))
                    .unwrap_or(ResultFrameType::Src);
                sink.deliver(
                    frame_type,
                    Some(ResultFrame {
                        width: size.0,
                        height: size.1,
                        pixels: &pixels,
                    }),
                    Some(&[index as f32]),
                );
            }
        }
        STATUS_OK
    }

    fn set_result_frame_type(&self, _session: SessionId, frame_type: i32) -> i32 {
        self.record("set_result_frame_type");
        let status = self.set_type_status.load(Ordering::SeqCst);
        if status == STATUS_OK {
            self.frame_type.store(frame_type, Ordering::SeqCst);
        }
        status
    }

    fn result_frame_type(&self, _session: SessionId) -> i32 {
        let status = self.get_type_status.load(Ordering::SeqCst);
        if status < 0 {
            return status;
        }
        self.frame_type.load(Ordering::SeqCst)
    }

    fn release_session(&self, session: SessionId) {
        self.record("release_session");
        self.sinks.lock().remove(&session);
    }
}

/// Observer keeping every callback, optionally failing each one.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub frames: Mutex<Vec<(u32, u32)>>,
    pub results: Mutex<Vec<(ResultFrameType, Option<Vec<f32>>)>>,
    pub fail: AtomicBool,
}

impl RecordingObserver {
    pub fn failing() -> Self {
        let observer = Self::default();
        observer.fail.store(true, Ordering::SeqCst);
        observer
    }

    pub fn result_count(&self) -> usize {
        self.results.lock().len()
    }
}

impl FrameObserver for RecordingObserver {
    fn on_frame(&self, frame: ResultFrame<'_>) -> anyhow::Result<()> {
        self.frames.lock().push((frame.width, frame.height));
        if self.fail.load(Ordering::SeqCst) {
            panic!("observer failed on frame");
        }
        Ok(())
    }

    fn on_result(&self, frame_type: ResultFrameType, values: Option<&[f32]>) -> anyhow::Result<()> {
        self.results
            .lock()
            .push((frame_type, values.map(<[f32]>::to_vec)));
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("observer failed on result"));
        }
        Ok(())
    }
}

/// Everything a pipeline test needs to look at.
pub struct Harness {
    pub processor: ImageProcessor<SoftwarePlatform>,
    pub routine: Arc<RecordingRoutine>,
    pub observer: Arc<RecordingObserver>,
    pub stats: Arc<GpuStats>,
}

pub fn harness(config: ProcessorConfig) -> Harness {
    harness_with(config, RecordingRoutine::default(), FrameDelivery::Handler)
}

pub fn harness_with(
    config: ProcessorConfig,
    routine: RecordingRoutine,
    delivery: FrameDelivery,
) -> Harness {
    init_logging();

    let routine = Arc::new(routine);
    let observer = Arc::new(RecordingObserver::default());
    let stats = Arc::new(GpuStats::default());

    let processor = ImageProcessor::builder()
        .config(config)
        .platform(SoftwarePlatform::new(delivery))
        .routine(routine.clone())
        .gpu_factory(SoftwareGpu::factory(stats.clone()))
        .observer(observer.clone())
        .build()
        .unwrap();

    Harness {
        processor,
        routine,
        observer,
        stats,
    }
}

/// Software GPU factory that waits `delay` and then fails when `fail` is set.
pub fn slow_factory(stats: Arc<GpuStats>, delay: Duration, fail: bool) -> GpuFactory {
    Arc::new(move || {
        std::thread::sleep(delay);
        if fail {
            return Err(GpuError::ContextLost("display went away".into()));
        }
        Ok(Box::new(SoftwareGpu::with_stats(stats.clone())) as Box<dyn Gpu>)
    })
}

/// Software GPU whose draws fail with a lost context while `lost` is set.
pub struct LosableGpu {
    inner: SoftwareGpu,
    lost: Arc<AtomicBool>,
}

impl LosableGpu {
    pub fn factory(stats: Arc<GpuStats>, lost: Arc<AtomicBool>) -> GpuFactory {
        Arc::new(move || {
            Ok(Box::new(LosableGpu {
                inner: SoftwareGpu::with_stats(stats.clone()),
                lost: lost.clone(),
            }) as Box<dyn Gpu>)
        })
    }
}

impl Gpu for LosableGpu {
    fn make_current(&mut self) -> GpuResult<()> {
        self.inner.make_current()
    }

    fn create_texture(&mut self, kind: TextureKind, width: u32, height: u32) -> GpuResult<TextureId> {
        self.inner.create_texture(kind, width, height)
    }

    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32) -> GpuResult<()> {
        self.inner.resize_texture(texture, width, height)
    }

    fn delete_texture(&mut self, texture: TextureId) -> GpuResult<()> {
        self.inner.delete_texture(texture)
    }

    fn texture_size(&self, texture: TextureId) -> GpuResult<(u32, u32)> {
        self.inner.texture_size(texture)
    }

    fn upload(&mut self, texture: TextureId, width: u32, height: u32, pixels: &[u8]) -> GpuResult<()> {
        self.inner.upload(texture, width, height, pixels)
    }

    fn bind_target(&mut self, target: Option<TextureId>) -> GpuResult<()> {
        self.inner.bind_target(target)
    }

    fn draw(&mut self, source: TextureId, mvp: &Mat4, tex_matrix: &Mat4) -> GpuResult<()> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(GpuError::ContextLost("device reset".into()));
        }
        self.inner.draw(source, mvp, tex_matrix)
    }

    fn read_pixels(&mut self, out: &mut Vec<u8>) -> GpuResult<(u32, u32)> {
        self.inner.read_pixels(out)
    }

    fn clear(&mut self) {
        self.inner.clear()
    }

    fn flush(&mut self) {
        self.inner.flush()
    }
}
