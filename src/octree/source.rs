use std::ops::Deref;
use std::sync::{RwLock, RwLockReadGuard, TryLockError};

use image::imageops::FilterType;
use image::RgbaImage;

use super::error::ToneError;
use super::quantize::palette::Color;

/// Number of bytes making up one analyzable pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// A held, readable view of some pixel data.
///
/// The acquisition lasts exactly as long as this value does; dropping it
/// (on any path, including early returns via `?`) releases it.
pub enum PixelLock<'a> {
	Borrowed(&'a RgbaImage),
	Guarded(RwLockReadGuard<'a, RgbaImage>),
	Owned(RgbaImage),
}

impl Deref for PixelLock<'_> {
	type Target = RgbaImage;

	fn deref(&self) -> &RgbaImage {
		match self {
			PixelLock::Borrowed(img) => *img,
			PixelLock::Guarded(guard) => &**guard,
			PixelLock::Owned(img) => img,
		}
	}
}

/// Anything that can hand out its pixels as 8-bit RGBA for a single
/// analysis pass.
pub trait PixelSource {
	/// Acquires the pixel data for reading.
	///
	/// Should fail with `ToneError::ResourceAcquisition` if the data can't be
	/// obtained right now; callers do not retry.
	fn acquire(&self) -> Result<PixelLock<'_>, ToneError>;
}

impl PixelSource for RgbaImage {
	fn acquire(&self) -> Result<PixelLock<'_>, ToneError> {
		Ok(PixelLock::Borrowed(self))
	}
}

impl PixelSource for image::DynamicImage {
	fn acquire(&self) -> Result<PixelLock<'_>, ToneError> {
		Ok(PixelLock::Owned(self.to_rgba8()))
	}
}

impl PixelSource for RwLock<RgbaImage> {
	fn acquire(&self) -> Result<PixelLock<'_>, ToneError> {
		match self.try_read() {
			Ok(guard) => Ok(PixelLock::Guarded(guard)),
			Err(TryLockError::WouldBlock) => Err(ToneError::ResourceAcquisition(
				"pixel buffer is locked for writing".to_string())),
			Err(TryLockError::Poisoned(_)) => Err(ToneError::ResourceAcquisition(
				"pixel buffer lock is poisoned".to_string())),
		}
	}
}

/// Byte order of the four channels within one pixel of a `PixelBuffer`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
	Rgba,
	/// Layout of 32-bit ARGB words stored little-endian.
	Bgra,
	Argb,
}

impl ChannelOrder {
	fn to_rgba(self, px: &[u8]) -> Color {
		match self {
			ChannelOrder::Rgba => image::Rgba([px[0], px[1], px[2], px[3]]),
			ChannelOrder::Bgra => image::Rgba([px[2], px[1], px[0], px[3]]),
			ChannelOrder::Argb => image::Rgba([px[1], px[2], px[3], px[0]]),
		}
	}
}

/// An owned, row-major buffer of raw pixel bytes in a known channel order.
#[derive(Clone, Debug)]
pub struct PixelBuffer {
	width: u32,
	height: u32,
	stride: usize,
	order: ChannelOrder,
	data: Vec<u8>,
}

impl PixelBuffer {
	/// Wraps raw pixel bytes.
	///
	/// Fails with `ToneError::UnsupportedFormat` unless every pixel is
	/// exactly four bytes and `data` holds exactly `width * height` of them.
	pub fn from_raw(
		width: u32,
		height: u32,
		bytes_per_pixel: usize,
		order: ChannelOrder,
		data: Vec<u8>
	) -> Result<Self, ToneError> {
		if bytes_per_pixel != BYTES_PER_PIXEL {
			return Err(ToneError::UnsupportedFormat(format!(
				"expected {} bytes per pixel, got {}", BYTES_PER_PIXEL, bytes_per_pixel)));
		}
		let stride = width as usize * BYTES_PER_PIXEL;
		let expected = stride * height as usize;
		if data.len() != expected {
			return Err(ToneError::UnsupportedFormat(format!(
				"buffer holds {} bytes but {}x{} pixels need {}",
				data.len(), width, height, expected)));
		}
		Ok(PixelBuffer { width, height, stride, order, data })
	}

	/// Copies the buffer into an `RgbaImage`, reordering channels.
	pub fn to_rgba_image(&self) -> RgbaImage {
		let mut out = RgbaImage::new(self.width, self.height);
		if self.stride == 0 {
			return out;
		}
		for (y, row) in self.data.chunks_exact(self.stride).enumerate() {
			for (x, px) in row.chunks_exact(BYTES_PER_PIXEL).enumerate() {
				out.put_pixel(x as u32, y as u32, self.order.to_rgba(px));
			}
		}
		out
	}
}

impl PixelSource for PixelBuffer {
	fn acquire(&self) -> Result<PixelLock<'_>, ToneError> {
		Ok(PixelLock::Owned(self.to_rgba_image()))
	}
}

/// Dimensions that bring `width * height` close to `target_pixels` while
/// keeping the aspect ratio. Never smaller than 1x1 or larger than the input.
pub fn downsampled_dimensions(width: u32, height: u32, target_pixels: u64) -> (u32, u32) {
	let area = width as f64 * height as f64;
	if area == 0. {
		return (width, height);
	}
	let factor = (target_pixels as f64 / area).sqrt();
	let scale = |n: u32| ((n as f64 * factor).floor() as u32).max(1).min(n);
	(scale(width), scale(height))
}

/// Makes a nearest-neighbor scaled copy of `img` of roughly `target_pixels`.
///
/// Nearest-neighbor never invents colors that aren't in the source, and
/// keeps the proportions of the colors that are.
pub fn downsample(img: &RgbaImage, target_pixels: u64) -> RgbaImage {
	let (width, height) = downsampled_dimensions(img.width(), img.height(), target_pixels);
	tracing::debug!(
		from_width = img.width(),
		from_height = img.height(),
		width,
		height,
		"downsampling first pass"
	);
	image::imageops::resize(img, width, height, FilterType::Nearest)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_three_channel_buffers() {
		let res = PixelBuffer::from_raw(2, 2, 3, ChannelOrder::Rgba, vec![0; 12]);
		assert!(matches!(res, Err(ToneError::UnsupportedFormat(_))));
	}

	#[test]
	fn rejects_short_buffers() {
		let res = PixelBuffer::from_raw(2, 2, 4, ChannelOrder::Rgba, vec![0; 15]);
		assert!(matches!(res, Err(ToneError::UnsupportedFormat(_))));
	}

	#[test]
	fn channel_orders_map_to_rgba() {
		let first = |order| {
			let buf = PixelBuffer::from_raw(1, 1, 4, order, vec![1, 2, 3, 4]).unwrap();
			*buf.to_rgba_image().get_pixel(0, 0)
		};
		assert_eq!(first(ChannelOrder::Rgba), image::Rgba([1, 2, 3, 4]));
		assert_eq!(first(ChannelOrder::Bgra), image::Rgba([3, 2, 1, 4]));
		assert_eq!(first(ChannelOrder::Argb), image::Rgba([2, 3, 4, 1]));
	}

	#[test]
	fn buffer_conversion_walks_rows() {
		let data = (0..6u8).flat_map(|n| vec![n, n, n, 255]).collect();
		let buf = PixelBuffer::from_raw(3, 2, 4, ChannelOrder::Rgba, data).unwrap();
		let img = buf.to_rgba_image();
		assert_eq!(img.dimensions(), (3, 2));
		assert_eq!(*img.get_pixel(2, 0), image::Rgba([2, 2, 2, 255]));
		assert_eq!(*img.get_pixel(0, 1), image::Rgba([3, 3, 3, 255]));
	}

	#[test]
	fn write_locked_buffer_is_not_acquired() {
		let lock = RwLock::new(RgbaImage::new(4, 4));
		let _writer = lock.write().unwrap();
		assert!(matches!(lock.acquire(), Err(ToneError::ResourceAcquisition(_))));
	}

	#[test]
	fn poisoned_buffer_is_not_acquired() {
		let lock = std::sync::Arc::new(RwLock::new(RgbaImage::new(4, 4)));
		let writer = std::sync::Arc::clone(&lock);
		let res = std::thread::spawn(move || {
			let _guard = writer.write().unwrap();
			panic!("writer gave up");
		}).join();
		assert!(res.is_err());
		assert!(lock.is_poisoned());
		assert!(matches!(lock.acquire(), Err(ToneError::ResourceAcquisition(_))));
	}

	#[test]
	fn downsampled_dimensions_track_target_area() {
		assert_eq!(downsampled_dimensions(20, 20, 100), (10, 10));
		assert_eq!(downsampled_dimensions(1024, 1024, 256 * 256), (256, 256));
		assert_eq!(downsampled_dimensions(300, 200, 600), (30, 20));
		assert_eq!(downsampled_dimensions(4000, 1, 100), (632, 1));
		assert_eq!(downsampled_dimensions(5, 5, 0), (1, 1));
	}

	#[test]
	fn downsampling_keeps_source_colors() {
		let red = image::Rgba([255, 0, 0, 255]);
		let blue = image::Rgba([0, 0, 255, 255]);
		let img = RgbaImage::from_fn(40, 40, |x, _| if x < 20 { red } else { blue });
		let small = downsample(&img, 100);
		assert_eq!(small.dimensions(), (10, 10));
		assert!(small.pixels().all(|p| *p == red || *p == blue));
		assert_eq!(small.pixels().filter(|p| **p == red).count(), 50);
	}
}
