use std::cmp::Reverse;

pub type Color = image::Rgba<u8>;

/// A palette color together with the number of pixels it stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WeightedColor {
	pub color: Color,
	pub weight: u64,
}

impl WeightedColor {
	pub fn new(color: Color, weight: u64) -> Self {
		WeightedColor { color, weight }
	}
}

/// Packs the RGB channels of a color into `0x00RRGGBB`. Alpha is ignored.
pub fn pack_rgb(color: &Color) -> u32 {
	(color.0[0] as u32) << 16 | (color.0[1] as u32) << 8 | color.0[2] as u32
}

/// Inverse of `pack_rgb`; the resulting color is fully opaque.
pub fn unpack_rgb(packed: u32) -> Color {
	image::Rgba::<u8>([
		(packed >> 16) as u8,
		(packed >> 8) as u8,
		packed as u8,
		255,
	])
}

/// Orders extracted colors by descending weight and cuts the list down
/// to at most `max_colors` entries.
///
/// Equal weights are ordered by `pack_rgb`, ascending, so the same set of
/// entries always comes out in the same order. Weights are left untouched.
pub fn build_weighted_palette(
	mut entries: Vec<WeightedColor>,
	max_colors: usize
) -> Vec<WeightedColor> {
	entries.sort_by_key(|wc| (Reverse(wc.weight), pack_rgb(&wc.color)));
	entries.truncate(max_colors);
	entries
}
