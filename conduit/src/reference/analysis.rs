use image::{GenericImageView, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::processor::ResultFrameType;

/// Length of the result vector.
pub const RESULT_LEN: usize = 20;

/// Positions in the result vector.
pub mod index {
    pub const WIDTH: usize = 0;
    pub const HEIGHT: usize = 1;
    pub const MEAN: usize = 2;
    pub const STDDEV: usize = 3;
    pub const MIN: usize = 4;
    pub const MAX: usize = 5;
    pub const BOX_X: usize = 6;
    pub const BOX_Y: usize = 7;
    pub const BOX_WIDTH: usize = 8;
    pub const BOX_HEIGHT: usize = 9;
    pub const BRIGHT_FRACTION: usize = 10;
    /// First of [`HISTOGRAM_BINS`](super::HISTOGRAM_BINS) normalized bins.
    pub const HISTOGRAM: usize = 11;
    pub const FRAME_INDEX: usize = 19;
}

pub const HISTOGRAM_BINS: usize = 8;

/// Luma at or above this counts as bright.
pub const BRIGHT_THRESHOLD: u8 = 200;

pub const OVERLAY_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub values: [f32; RESULT_LEN],
    /// Bounding box of bright pixels, top-left origin.
    pub bright_box: Option<Rect>,
}

pub fn to_gray<I>(rgba: &I) -> GrayImage
where
    I: GenericImageView<Pixel = Rgba<u8>>,
{
    image::imageops::grayscale(rgba)
}

pub fn analyze(gray: &GrayImage, frame_index: u64) -> Analysis {
    let mut values = [0.0f32; RESULT_LEN];
    let (width, height) = gray.dimensions();
    values[index::WIDTH] = width as f32;
    values[index::HEIGHT] = height as f32;
    values[index::FRAME_INDEX] = frame_index as f32;

    let total = width as usize * height as usize;
    if total == 0 {
        return Analysis {
            values,
            bright_box: None,
        };
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    let mut bright = 0usize;
    let mut histogram = [0usize; HISTOGRAM_BINS];
    let mut bounds: Option<(u32, u32, u32, u32)> = None;

    for (x, y, Luma([l])) in gray.enumerate_pixels() {
        let l = *l;
        sum += l as f64;
        sum_sq += (l as f64) * (l as f64);
        min = min.min(l);
        max = max.max(l);
        histogram[l as usize * HISTOGRAM_BINS / 256] += 1;

        if l >= BRIGHT_THRESHOLD {
            bright += 1;
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }

    let n = total as f64;
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    values[index::MEAN] = mean as f32;
    values[index::STDDEV] = variance.sqrt() as f32;
    values[index::MIN] = min as f32;
    values[index::MAX] = max as f32;
    values[index::BRIGHT_FRACTION] = (bright as f64 / n) as f32;
    for (bin, count) in histogram.iter().enumerate() {
        values[index::HISTOGRAM + bin] = (*count as f64 / n) as f32;
    }

    let bright_box = bounds.map(|(x0, y0, x1, y1)| {
        values[index::BOX_X] = x0 as f32;
        values[index::BOX_Y] = y0 as f32;
        values[index::BOX_WIDTH] = (x1 - x0 + 1) as f32;
        values[index::BOX_HEIGHT] = (y1 - y0 + 1) as f32;
        Rect::at(x0 as i32, y0 as i32).of_size(x1 - x0 + 1, y1 - y0 + 1)
    });

    Analysis { values, bright_box }
}

/// Builds the image returned for `frame_type`: the source or its gray
/// version, with the bright box outlined for the overlay types.
pub fn render<I>(frame_type: ResultFrameType, source: &I, gray: &GrayImage, analysis: &Analysis) -> RgbaImage
where
    I: GenericImageView<Pixel = Rgba<u8>>,
{
    let mut out = if frame_type.is_processed() {
        RgbaImage::from_fn(gray.width(), gray.height(), |x, y| {
            let Luma([l]) = *gray.get_pixel(x, y);
            Rgba([l, l, l, 255])
        })
    } else {
        RgbaImage::from_fn(source.width(), source.height(), |x, y| source.get_pixel(x, y))
    };

    if frame_type.has_overlay() {
        if let Some(rect) = analysis.bright_box {
            draw_hollow_rect_mut(&mut out, rect, OVERLAY_COLOR);
        }
    }
    out
}
