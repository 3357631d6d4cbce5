use std::time::Instant;

/// Frame throughput over the last update interval and since the last reset.
#[derive(Debug, Clone)]
pub struct FrameRateCounter {
    frames: u64,
    frames_at_update: u64,
    started_at: Instant,
    updated_at: Instant,
    fps: f32,
    total_fps: f32,
}

impl Default for FrameRateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRateCounter {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            frames: 0,
            frames_at_update: 0,
            started_at: now,
            updated_at: now,
            fps: 0.0,
            total_fps: 0.0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn count(&mut self) {
        self.frames += 1;
    }

    pub fn total_frames(&self) -> u64 {
        self.frames
    }

    /// Recomputes both rates; call periodically.
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    pub fn update_at(&mut self, now: Instant) {
        let interval = now.saturating_duration_since(self.updated_at).as_secs_f32();
        if interval > 0.0 {
            self.fps = (self.frames - self.frames_at_update) as f32 / interval;
        }

        let total = now.saturating_duration_since(self.started_at).as_secs_f32();
        if total > 0.0 {
            self.total_fps = self.frames as f32 / total;
        }

        self.frames_at_update = self.frames;
        self.updated_at = now;
    }

    /// Frames per second over the last update interval.
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Frames per second since the last reset.
    pub fn total_fps(&self) -> f32 {
        self.total_fps
    }
}
