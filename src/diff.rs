//! Pixel diff engine.
//!
//! Compares two rasters and reports:
//! - a global perceptual diff (pixels that differ beyond a YIQ tolerance)
//! - the same counts over an R×C spatial grid
//! - mean absolute divergence per RGB channel
//!
//! Sources of different sizes are top-left aligned on an opaque white
//! canvas of the larger extent, so a size mismatch shows up as diff mass in
//! the padded region instead of being cropped away.

use image::{Rgba, RgbaImage, imageops};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default number of grid rows
pub const DEFAULT_GRID_ROWS: u32 = 3;

/// Default number of grid columns
pub const DEFAULT_GRID_COLS: u32 = 3;

/// Largest accepted grid rows or columns
pub const MAX_GRID_DIM: u32 = 100;

/// Default perceptual threshold (0 = exact, 1 = anything goes)
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Largest possible YIQ delta between two colors
const MAX_YIQ_DELTA: f64 = 35215.0;

const CANVAS_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const DIFF_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Opacity of the source image in unchanged regions of the diff raster
const FADE_ALPHA: f64 = 0.1;

/// Result type for diff operations
pub type DiffResult<T> = Result<T, DiffError>;

/// Errors that can occur while diffing
#[derive(Debug, Error)]
pub enum DiffError {
    /// Source could not be opened or decoded
    #[error("failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Diff raster could not be written
    #[error("failed to write diff image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Output directory could not be created
    #[error("failed to create directory for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Tuning for a comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffOptions {
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub threshold: f64,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            grid_rows: DEFAULT_GRID_ROWS,
            grid_cols: DEFAULT_GRID_COLS,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl DiffOptions {
    /// Set grid dimensions, clamped to `1..=MAX_GRID_DIM`
    pub fn grid(mut self, rows: u32, cols: u32) -> Self {
        self.grid_rows = rows.clamp(1, MAX_GRID_DIM);
        self.grid_cols = cols.clamp(1, MAX_GRID_DIM);
        self
    }

    /// Set the perceptual threshold, clamped to 0..=1
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Parse a grid spec like "3x3" or "4x2" (rows x cols)
    pub fn parse_grid(spec: &str) -> Option<(u32, u32)> {
        let (rows, cols) = spec.trim().split_once('x')?;
        let rows: u32 = rows.parse().ok()?;
        let cols: u32 = cols.parse().ok()?;
        let valid = |n: u32| (1..=MAX_GRID_DIM).contains(&n);
        (valid(rows) && valid(cols)).then_some((rows, cols))
    }
}

/// Diff counts for one grid cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCell {
    pub row: u32,
    pub col: u32,
    pub total_pixels: u64,
    pub diff_pixels: u64,
    pub diff_percentage: f64,
}

/// Mean absolute divergence per channel, 0-100
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelDivergence {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

/// Metrics for one comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffMetrics {
    pub total_pixels: u64,
    pub diff_pixels: u64,
    pub diff_percentage: f64,
    pub grid: Vec<GridCell>,
    pub channels: ChannelDivergence,
}

/// In-memory comparison output
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    pub metrics: DiffMetrics,
    /// Mismatch mask: red where pixels differ, faded source elsewhere
    pub diff_image: RgbaImage,
}

/// Compare two image files and write the diff raster to `diff_output`.
#[tracing::instrument(skip_all, fields(a = %path_a.display(), b = %path_b.display()))]
pub fn compare_images(
    path_a: &Path,
    path_b: &Path,
    diff_output: &Path,
    options: &DiffOptions,
) -> DiffResult<DiffMetrics> {
    let a = read_rgba(path_a)?;
    let b = read_rgba(path_b)?;

    let outcome = compare_rgba(&a, &b, options);

    if let Some(parent) = diff_output.parent() {
        std::fs::create_dir_all(parent).map_err(|source| DiffError::Io {
            path: diff_output.to_path_buf(),
            source,
        })?;
    }
    outcome
        .diff_image
        .save(diff_output)
        .map_err(|source| DiffError::Write {
            path: diff_output.to_path_buf(),
            source,
        })?;

    debug!(
        diff_pixels = outcome.metrics.diff_pixels,
        total_pixels = outcome.metrics.total_pixels,
        "diff written to {}",
        diff_output.display()
    );
    Ok(outcome.metrics)
}

fn read_rgba(path: &Path) -> DiffResult<RgbaImage> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|source| DiffError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Compare two in-memory rasters.
///
/// Grid cells are accumulated in the same pass as the global counts; each
/// pixel belongs to exactly one cell, so the per-cell numbers equal an
/// independent rescan of the cell bounds.
pub fn compare_rgba(a: &RgbaImage, b: &RgbaImage, options: &DiffOptions) -> DiffOutcome {
    let width = a.width().max(b.width());
    let height = a.height().max(b.height());
    let a = pad_to_canvas(a, width, height);
    let b = pad_to_canvas(b, width, height);

    let rows = options.grid_rows.clamp(1, MAX_GRID_DIM);
    let cols = options.grid_cols.clamp(1, MAX_GRID_DIM);
    let cell_width = width.div_ceil(cols);
    let cell_height = height.div_ceil(rows);
    let mut cells = vec![(0u64, 0u64); (rows * cols) as usize];

    let max_delta = MAX_YIQ_DELTA * options.threshold * options.threshold;
    let mut diff_image = RgbaImage::from_pixel(width, height, CANVAS_COLOR);
    let mut channel_sums = [0u64; 3];
    let mut diff_pixels = 0u64;

    for (x, y, pa) in a.enumerate_pixels() {
        let pb = b.get_pixel(x, y);

        for (channel, sum) in channel_sums.iter_mut().enumerate() {
            *sum += u64::from(pa[channel].abs_diff(pb[channel]));
        }

        let differs = pa != pb && color_delta(pa, pb) > max_delta;

        let index = (y / cell_height * cols + x / cell_width) as usize;
        let cell = &mut cells[index];
        cell.0 += 1;

        if differs {
            cell.1 += 1;
            diff_pixels += 1;
            diff_image.put_pixel(x, y, DIFF_COLOR);
        } else {
            diff_image.put_pixel(x, y, faded(pa));
        }
    }

    let total_pixels = u64::from(width) * u64::from(height);
    let grid = cells
        .into_iter()
        .enumerate()
        .map(|(index, (cell_total, cell_diff))| GridCell {
            row: index as u32 / cols,
            col: index as u32 % cols,
            total_pixels: cell_total,
            diff_pixels: cell_diff,
            diff_percentage: percentage(cell_diff, cell_total),
        })
        .collect();

    let channel = |sum: u64| {
        if total_pixels == 0 {
            0.0
        } else {
            sum as f64 / (total_pixels as f64 * 255.0) * 100.0
        }
    };

    DiffOutcome {
        metrics: DiffMetrics {
            total_pixels,
            diff_pixels,
            diff_percentage: percentage(diff_pixels, total_pixels),
            grid,
            channels: ChannelDivergence {
                r: channel(channel_sums[0]),
                g: channel(channel_sums[1]),
                b: channel(channel_sums[2]),
            },
        },
        diff_image,
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn pad_to_canvas(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width, height, CANVAS_COLOR);
    imageops::overlay(&mut canvas, source, 0, 0);
    canvas
}

/// Blend a channel value with white by alpha
fn blend(channel: u8, alpha: f64) -> f64 {
    255.0 + (f64::from(channel) - 255.0) * alpha
}

fn rgb_to_y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.298_895_31 + g * 0.586_622_47 + b * 0.114_482_23
}

fn rgb_to_i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.595_977_99 - g * 0.274_176_10 - b * 0.321_801_89
}

fn rgb_to_q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.211_470_17 - g * 0.522_617_11 + b * 0.311_146_94
}

/// Squared YIQ distance between two pixels, alpha-blended over white
fn color_delta(a: &Rgba<u8>, b: &Rgba<u8>) -> f64 {
    let alpha_a = f64::from(a[3]) / 255.0;
    let alpha_b = f64::from(b[3]) / 255.0;

    let (r1, g1, b1) = (blend(a[0], alpha_a), blend(a[1], alpha_a), blend(a[2], alpha_a));
    let (r2, g2, b2) = (blend(b[0], alpha_b), blend(b[1], alpha_b), blend(b[2], alpha_b));

    let y = rgb_to_y(r1, g1, b1) - rgb_to_y(r2, g2, b2);
    let i = rgb_to_i(r1, g1, b1) - rgb_to_i(r2, g2, b2);
    let q = rgb_to_q(r1, g1, b1) - rgb_to_q(r2, g2, b2);

    0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q
}

fn faded(pixel: &Rgba<u8>) -> Rgba<u8> {
    let alpha = FADE_ALPHA * f64::from(pixel[3]) / 255.0;
    let y = rgb_to_y(f64::from(pixel[0]), f64::from(pixel[1]), f64::from(pixel[2]));
    let value = (255.0 + (y - 255.0) * alpha).round().clamp(0.0, 255.0) as u8;
    Rgba([value, value, value, 255])
}
