pub mod octree;

pub use octree::*;

pub use octree::error::ToneError;
pub use octree::quantize::palette::{pack_rgb, unpack_rgb, Color, WeightedColor};
pub use octree::quantize::{AnalysisConfig, Quantizer};
pub use octree::source::{ChannelOrder, PixelBuffer, PixelSource};

/// Extracts the `count` most dominant colors of images, weighted by how
/// many pixels each one covers.
///
/// Every call works on fresh state, so one extractor can be reused for any
/// number of images (and shared between threads).
#[derive(Clone, Debug)]
pub struct ToneExtractor {
	count: usize,
	config: AnalysisConfig,
}

impl ToneExtractor {
	/// `count` is the maximum number of colors to collect.
	///
	/// If `allow_downsample` is set, images over 512x512 pixels are analyzed
	/// through a nearest-neighbor copy of about 256x256 pixels.
	pub fn new(count: usize, allow_downsample: bool) -> Self {
		ToneExtractor {
			count,
			config: AnalysisConfig { allow_downsample, ..Default::default() },
		}
	}

	/// Overrides the pixel count above which a downsampled copy is used.
	pub fn with_downsample_threshold(mut self, pixels: u64) -> Self {
		self.config.downsample_threshold = pixels;
		self
	}

	/// Overrides the approximate pixel count of the downsampled copy.
	pub fn with_downsample_target(mut self, pixels: u64) -> Self {
		self.config.downsample_target = pixels;
		self
	}

	/// Returns up to `count` colors of `image`, heaviest first.
	///
	/// Fails with `ToneError::InvalidArgument` if `count` is zero, and with
	/// whatever the source reports if its pixels can't be acquired.
	pub fn get_weighted_colors<S: PixelSource + ?Sized>(
		&self,
		image: &S
	) -> Result<Vec<WeightedColor>, ToneError> {
		octree::quantize::calculate_weighted_colors::<ColorTree, S>(image, self.count, &self.config)
	}
}
