pub mod palette;

use std::borrow::Cow;

use image::RgbaImage;

use super::error::ToneError;
use super::source::{self, PixelSource};
use palette::{Color, WeightedColor};

/// Default pixel count above which the first pass may run on a scaled copy.
pub const DEFAULT_DOWNSAMPLE_THRESHOLD: u64 = 512 * 512;

/// Default approximate pixel count of that scaled copy.
pub const DEFAULT_DOWNSAMPLE_TARGET: u64 = 256 * 256;

/// A color quantization strategy that can be fed pixels one at a time and
/// then turned into a weighted palette.
///
/// Instances are single-use: `extract_palette` consumes the accumulated state.
pub trait Quantizer: Default {
	/// Accounts for one pixel of the image being analyzed.
	fn insert(&mut self, pixel: Color);
	/// Produces at most `max_colors` weighted colors, heaviest first.
	///
	/// `max_colors` must be positive; `calculate_weighted_colors` checks this.
	fn extract_palette(self, max_colors: usize) -> Vec<WeightedColor>;
}

/// Controls whether and how the analysis pass works on a reduced copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalysisConfig {
	/// Whether large images may be analyzed through a downsampled copy.
	pub allow_downsample: bool,
	/// Images with more pixels than this are downsampled (if allowed).
	pub downsample_threshold: u64,
	/// Approximate pixel count of the downsampled copy.
	pub downsample_target: u64,
}

impl Default for AnalysisConfig {
	fn default() -> Self {
		AnalysisConfig {
			allow_downsample: false,
			downsample_threshold: DEFAULT_DOWNSAMPLE_THRESHOLD,
			downsample_target: DEFAULT_DOWNSAMPLE_TARGET,
		}
	}
}

impl AnalysisConfig {
	pub fn should_downsample(&self, width: u32, height: u32) -> bool {
		self.allow_downsample && width as u64 * height as u64 > self.downsample_threshold
	}
}

/// Feeds every pixel of `img` to `quantizer`, row by row.
pub fn analyze<Q: Quantizer>(quantizer: &mut Q, img: &RgbaImage) {
	let (width, height) = img.dimensions();
	for y in 0..height {
		for x in 0..width {
			quantizer.insert(*img.get_pixel(x, y));
		}
	}
}

/// Computes the weighted palette of `source` with the quantization strategy `Q`.
///
/// The pixel data is acquired once and held only for the duration of the
/// analysis pass. If `config` calls for it, the pass runs over a
/// nearest-neighbor downsampled copy instead, in which case the returned
/// weights sum to the copy's pixel count rather than the original's.
pub fn calculate_weighted_colors<Q, S>(
	source: &S,
	max_colors: usize,
	config: &AnalysisConfig
) -> Result<Vec<WeightedColor>, ToneError>
where
	Q: Quantizer,
	S: PixelSource + ?Sized,
{
	if max_colors == 0 {
		return Err(ToneError::InvalidArgument(
			"maximum color count must be positive".to_string()));
	}
	let mut quantizer = Q::default();
	{
		let pixels = source.acquire()?;
		let first_pass = if config.should_downsample(pixels.width(), pixels.height()) {
			Cow::Owned(source::downsample(&pixels, config.downsample_target))
		} else {
			Cow::Borrowed(&*pixels)
		};
		analyze(&mut quantizer, &first_pass);
		tracing::trace!(
			pixels = first_pass.width() as u64 * first_pass.height() as u64,
			width = first_pass.width(),
			height = first_pass.height(),
			"analysis pass finished"
		);
	}
	Ok(quantizer.extract_palette(max_colors))
}
