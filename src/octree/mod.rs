pub mod error;
pub mod quantize;
pub mod source;

use std::collections::BTreeSet;

use quantize::palette::{self, Color, WeightedColor};
use quantize::Quantizer;

/// Number of levels below the root; each level consumes one bit of each
/// of red, green and blue, most significant first.
pub const MAX_DEPTH: u8 = 8;

/// Index of the root node in the arena.
const ROOT: usize = 0;

/// Marks an empty child slot. The root is never anyone's child, so its
/// index is free to mean "absent".
const NO_CHILD: usize = ROOT;

/// Pixel count and per-channel sums of the pixels a node stands for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Tally {
	pixels: u64,
	red: u64,
	green: u64,
	blue: u64,
}

impl Tally {
	fn add_pixel(&mut self, pixel: &Color) {
		self.pixels += 1;
		self.red += pixel.0[0] as u64;
		self.green += pixel.0[1] as u64;
		self.blue += pixel.0[2] as u64;
	}

	fn absorb(&mut self, other: Tally) {
		self.pixels += other.pixels;
		self.red += other.red;
		self.green += other.green;
		self.blue += other.blue;
	}

	/// Rounded per-channel mean. Only meaningful for `pixels > 0`.
	fn average(&self) -> Color {
		let mean = |sum: u64| {
			let n = (sum + self.pixels / 2) / self.pixels.max(1);
			n.min(255) as u8
		};
		image::Rgba::<u8>([mean(self.red), mean(self.green), mean(self.blue), 255])
	}
}

/// Node in the color tree.
///
/// Leaves carry a tally of the pixels falling into their color bucket;
/// branches only route to up to eight children.
#[derive(Clone, Debug, Default)]
struct TreeNode {
	children: [usize; 8],
	leaf: bool,
	tally: Tally,
	depth: u8,
	/// The child slots taken from the root down to this node, three bits
	/// per level. Unique among nodes of the same depth.
	prefix: u32,
	/// Whether the node currently sits in its depth's `ReducibleSet`.
	reducible: bool,
}

impl TreeNode {
	fn child_indices(&self) -> impl Iterator<Item = usize> + '_ {
		self.children.iter().copied().filter(|&c| c != NO_CHILD)
	}
}

/// Branch nodes of a single depth whose children are all leaves.
///
/// Nodes are registered while the tree is still being filled, when their
/// weights aren't final; they are ranked by weight lazily, on the first
/// `take_lightest` after their registration.
#[derive(Debug, Default)]
struct ReducibleSet {
	pending: Vec<usize>,
	ranked: BTreeSet<(u64, u32, usize)>,
}

impl ReducibleSet {
	fn register(&mut self, index: usize) {
		self.pending.push(index);
	}

	/// Removes and returns the node whose children hold the fewest pixels,
	/// ties going to the lowest color prefix.
	fn take_lightest(&mut self, nodes: &[TreeNode]) -> Option<usize> {
		for index in self.pending.drain(..) {
			let node = &nodes[index];
			let weight = node.child_indices().map(|c| nodes[c].tally.pixels).sum();
			self.ranked.insert((weight, node.prefix, index));
		}
		let lightest = *self.ranked.iter().next()?;
		self.ranked.remove(&lightest);
		Some(lightest.2)
	}
}

/// Which child slot a color falls into below a node at depth `level`.
fn child_slot(pixel: &Color, level: u8) -> usize {
	let shift = 7 - level;
	let bit = |channel: u8| ((channel >> shift) & 1) as usize;
	bit(pixel.0[0]) << 2 | bit(pixel.0[1]) << 1 | bit(pixel.0[2])
}

/// Octree over RGB space, accumulating pixels into color buckets and
/// merging the least significant distinctions until few enough remain.
///
/// The tree is single-use: fill it through `Quantizer::insert`, then
/// consume it with `Quantizer::extract_palette`.
#[derive(Debug)]
pub struct ColorTree {
	nodes: Vec<TreeNode>,
	/// One set per branch depth, root included.
	reducible: [ReducibleSet; MAX_DEPTH as usize],
	leaf_count: usize,
}

impl Default for ColorTree {
	fn default() -> Self {
		ColorTree {
			nodes: vec![TreeNode::default()],
			reducible: Default::default(),
			leaf_count: 0,
		}
	}
}

impl ColorTree {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of distinct color buckets currently in the tree.
	pub fn leaf_count(&self) -> usize {
		self.leaf_count
	}

	/// Creates the child of `parent` in `slot` and returns its index.
	fn spawn(&mut self, parent: usize, slot: usize) -> usize {
		let index = self.nodes.len();
		let depth = self.nodes[parent].depth + 1;
		let prefix = self.nodes[parent].prefix << 3 | slot as u32;
		let leaf = depth == MAX_DEPTH;
		self.nodes.push(TreeNode { depth, prefix, leaf, ..Default::default() });
		self.nodes[parent].children[slot] = index;
		if leaf {
			self.leaf_count += 1;
			self.register_if_reducible(parent);
		}
		index
	}

	/// Puts `index` into its depth's reducible set if it is a branch whose
	/// children are all leaves and it isn't there already.
	fn register_if_reducible(&mut self, index: usize) {
		let node = &self.nodes[index];
		if node.leaf || node.reducible {
			return;
		}
		let has_children = node.children.iter().any(|&c| c != NO_CHILD);
		let all_leaves = node.children.iter()
			.all(|&c| c == NO_CHILD || self.nodes[c].leaf);
		if !has_children || !all_leaves {
			return;
		}
		let depth = node.depth as usize;
		self.nodes[index].reducible = true;
		self.reducible[depth].register(index);
	}

	/// Walks down from the root along the first `depth` levels of `prefix`.
	fn locate(&self, prefix: u32, depth: u8) -> usize {
		(0..depth).fold(ROOT, |current, level| {
			let slot = (prefix >> (3 * (depth - 1 - level) as u32)) & 0b111;
			self.nodes[current].children[slot as usize]
		})
	}

	fn take_deepest_reducible(&mut self) -> Option<usize> {
		let nodes = &self.nodes;
		self.reducible.iter_mut().rev().find_map(|set| set.take_lightest(nodes))
	}

	/// Merges all children of `index` into it, turning it into a leaf.
	fn fold(&mut self, index: usize) {
		let children = self.nodes[index].child_indices().collect::<Vec<_>>();
		let mut merged = Tally::default();
		for &child in &children {
			merged.absorb(std::mem::take(&mut self.nodes[child]).tally);
		}
		let node = &mut self.nodes[index];
		node.children = [NO_CHILD; 8];
		node.tally.absorb(merged);
		node.leaf = true;
		node.reducible = false;
		let (depth, prefix) = (node.depth, node.prefix);
		self.leaf_count -= children.len() - 1;
		if depth > 0 {
			let parent = self.locate(prefix >> 3, depth - 1);
			self.register_if_reducible(parent);
		}
	}

	/// Merges the `excess + 1` lightest children of `index` into the
	/// heaviest of them, removing exactly `excess` leaves. The node stays
	/// a reducible branch.
	fn fold_partial(&mut self, index: usize, excess: usize) {
		let mut children = self.nodes[index].children.iter()
			.enumerate()
			.filter(|(_, &c)| c != NO_CHILD)
			.map(|(slot, &c)| (self.nodes[c].tally.pixels, slot, c))
			.collect::<Vec<_>>();
		children.sort();
		children.truncate(excess + 1);
		if let Some((&(_, _, keeper), rest)) = children.split_last() {
			for &(_, slot, child) in rest {
				let tally = std::mem::take(&mut self.nodes[child]).tally;
				self.nodes[keeper].tally.absorb(tally);
				self.nodes[index].children[slot] = NO_CHILD;
			}
			self.leaf_count -= rest.len();
		}
		let depth = self.nodes[index].depth as usize;
		self.reducible[depth].register(index);
	}

	/// Merges color buckets, deepest and lightest first, until at most
	/// `max_colors` remain.
	fn reduce(&mut self, max_colors: usize) {
		tracing::debug!(leaves = self.leaf_count, max_colors, "reducing color tree");
		while self.leaf_count > max_colors {
			let index = match self.take_deepest_reducible() {
				Some(i) => i,
				None => break,
			};
			let children = self.nodes[index].child_indices().count();
			let excess = self.leaf_count - max_colors;
			if children - 1 <= excess {
				self.fold(index);
			} else {
				self.fold_partial(index, excess);
			}
		}
	}

	/// Lists every leaf as its average color and pixel count.
	fn leaves(&self) -> Vec<WeightedColor> {
		let mut out = Vec::with_capacity(self.leaf_count);
		let mut stack = vec![ROOT];
		while let Some(index) = stack.pop() {
			let node = &self.nodes[index];
			if node.leaf {
				out.push(WeightedColor::new(node.tally.average(), node.tally.pixels));
			} else {
				stack.extend(node.child_indices());
			}
		}
		out
	}
}

impl Quantizer for ColorTree {
	fn insert(&mut self, pixel: Color) {
		let mut current = ROOT;
		for level in 0..MAX_DEPTH {
			let slot = child_slot(&pixel, level);
			let child = self.nodes[current].children[slot];
			current = if child == NO_CHILD { self.spawn(current, slot) } else { child };
		}
		self.nodes[current].tally.add_pixel(&pixel);
	}

	fn extract_palette(mut self, max_colors: usize) -> Vec<WeightedColor> {
		if self.leaf_count > max_colors {
			self.reduce(max_colors);
		}
		tracing::trace!(leaves = self.leaf_count, "extracting weighted palette");
		palette::build_weighted_palette(self.leaves(), max_colors)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rgb(r: u8, g: u8, b: u8) -> Color {
		image::Rgba([r, g, b, 255])
	}

	fn tree_of(pixels: &[Color]) -> ColorTree {
		let mut tree = ColorTree::new();
		for p in pixels {
			tree.insert(*p);
		}
		tree
	}

	#[test]
	fn slots_take_one_bit_per_channel() {
		let c = rgb(0b1000_0000, 0b0000_0000, 0b1000_0001);
		assert_eq!(child_slot(&c, 0), 0b101);
		assert_eq!(child_slot(&c, 1), 0b000);
		assert_eq!(child_slot(&c, 7), 0b001);
	}

	#[test]
	fn one_leaf_per_distinct_color() {
		let tree = tree_of(&[rgb(1, 2, 3), rgb(1, 2, 3), rgb(200, 2, 3), rgb(1, 2, 4)]);
		assert_eq!(tree.leaf_count(), 3);
		let mut leaves = tree.leaves();
		leaves.sort_by_key(|wc| palette::pack_rgb(&wc.color));
		assert_eq!(leaves, vec![
			WeightedColor::new(rgb(1, 2, 3), 2),
			WeightedColor::new(rgb(1, 2, 4), 1),
			WeightedColor::new(rgb(200, 2, 3), 1),
		]);
	}

	#[test]
	fn folding_registers_the_parent_once() {
		let mut tree = tree_of(&[rgb(0, 0, 0), rgb(0, 0, 1)]);
		let branch = tree.take_deepest_reducible().unwrap();
		assert_eq!(tree.nodes[branch].depth, 7);
		tree.fold(branch);
		assert_eq!(tree.leaf_count(), 1);
		assert_eq!(tree.reducible[6].pending.len(), 1);
		let parent = tree.reducible[6].pending[0];
		assert!(tree.nodes[parent].reducible);
		tree.register_if_reducible(parent);
		assert_eq!(tree.reducible[6].pending.len(), 1);
		// The root still has a branch below it, so it must not be registered.
		assert!(tree.reducible[0].pending.is_empty());
	}

	#[test]
	fn only_deepest_branches_start_reducible() {
		let tree = tree_of(&[rgb(0, 0, 0), rgb(255, 255, 255), rgb(0, 0, 1)]);
		for depth in 0..7 {
			assert!(tree.reducible[depth].pending.is_empty());
		}
		assert_eq!(tree.reducible[7].pending.len(), 2);
	}

	#[test]
	fn reduction_merges_lightest_sibling_group_first() {
		// Two pairs of siblings under different depth-7 branches.
		let mut pixels = vec![rgb(0, 0, 0), rgb(0, 0, 1)];
		pixels.extend(vec![rgb(100, 100, 100); 5]);
		pixels.extend(vec![rgb(100, 100, 101); 5]);
		let tree = tree_of(&pixels);
		let out = tree.extract_palette(3);
		assert_eq!(out, vec![
			WeightedColor::new(rgb(100, 100, 100), 5),
			WeightedColor::new(rgb(100, 100, 101), 5),
			WeightedColor::new(rgb(0, 0, 1), 2),
		]);
	}

	#[test]
	fn merged_color_is_rounded_weighted_mean() {
		let tree = tree_of(&[rgb(10, 10, 10), rgb(10, 10, 11), rgb(10, 10, 11)]);
		let out = tree.extract_palette(1);
		assert_eq!(out, vec![WeightedColor::new(rgb(10, 10, 11), 3)]);
	}

	#[test]
	fn partial_fold_lands_on_requested_count() {
		// Eight colors differing only in their lowest bits share one branch.
		let pixels = (0..8u8)
			.map(|n| rgb(64 | (n >> 2) & 1, 64 | (n >> 1) & 1, 64 | n & 1))
			.collect::<Vec<_>>();
		let tree = tree_of(&pixels);
		assert_eq!(tree.leaf_count(), 8);
		let out = tree.extract_palette(5);
		assert_eq!(out.len(), 5);
		assert_eq!(out.iter().map(|wc| wc.weight).sum::<u64>(), 8);
		assert_eq!(out[0].weight, 4);
	}

	#[test]
	fn everything_collapses_into_the_root() {
		let pixels = vec![rgb(0, 0, 0), rgb(255, 255, 255), rgb(255, 0, 0), rgb(0, 255, 0)];
		let out = tree_of(&pixels).extract_palette(1);
		assert_eq!(out, vec![WeightedColor::new(rgb(128, 128, 64), 4)]);
	}

	#[test]
	fn empty_tree_has_no_palette() {
		assert!(ColorTree::new().extract_palette(4).is_empty());
	}

	#[test]
	fn insertion_order_does_not_change_the_result() {
		let pixels = (0..600u32)
			.map(|n| rgb((n * 7) as u8, (n * 13) as u8, (n * 29) as u8))
			.collect::<Vec<_>>();
		let forward = tree_of(&pixels).extract_palette(17);
		let mut reversed = pixels.clone();
		reversed.reverse();
		let backward = tree_of(&reversed).extract_palette(17);
		assert_eq!(forward, backward);
		assert_eq!(forward.len(), 17);
	}
}
