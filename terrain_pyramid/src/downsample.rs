//! Builds a coarse tile from up to 16 children at `zoom + 1`: the four true
//! children plus the one-tile frame around them, via 16 fixed copy kernels.

use terrain_core::{Tile, CORE_SAMPLES, flags};

const NEAR_EDGE: i64 = CORE_SAMPLES as i64 - 3; // one decimation step in from a neighbor's far edge
const BORDER_LOW: i64 = -1;
const BORDER_HIGH: i64 = CORE_SAMPLES as i64 - 1 + 1; // 257

/// The 4x4 neighborhood of tiles at `zoom + 1` spanning `{2x-1..2x+2} x {2y-1..2y+2}`,
/// indexed `[row][col]` with row/col 0 being the north/west frame neighbor.
pub struct ChildGrid<'a> {
	slots: [[Option<&'a Tile>; 4]; 4],
}

impl<'a> ChildGrid<'a> {
	#[must_use]
	pub fn new() -> Self {
		ChildGrid { slots: [[None; 4]; 4] }
	}

	pub fn set(&mut self, row: usize, col: usize, tile: Option<&'a Tile>) {
		self.slots[row][col] = tile;
	}

	#[must_use]
	pub fn get(&self, row: usize, col: usize) -> Option<&'a Tile> {
		self.slots[row][col]
	}

	#[must_use]
	pub fn all_missing(&self) -> bool {
		self.slots.iter().all(|row| row.iter().all(Option::is_none))
	}
}

impl<'a> Default for ChildGrid<'a> {
	fn default() -> Self {
		Self::new()
	}
}

fn copy_quadrant(tile: &mut Tile, child: &Tile, dest_row0: i64, dest_col0: i64) {
	for r in 0..=128i64 {
		for c in 0..=128i64 {
			tile.set(dest_row0 + r, dest_col0 + c, child.get(2 * r, 2 * c));
		}
	}
}

fn copy_row(tile: &mut Tile, child: &Tile, src_row: i64, dest_row: i64, dest_col0: i64) {
	for c in 0..=128i64 {
		tile.set(dest_row, dest_col0 + c, child.get(src_row, 2 * c));
	}
}

fn copy_col(tile: &mut Tile, child: &Tile, src_col: i64, dest_col: i64, dest_row0: i64) {
	for r in 0..=128i64 {
		tile.set(dest_row0 + r, dest_col, child.get(2 * r, src_col));
	}
}

/// Applies one of the 16 fixed kernels. `(gr, gc)` is this child's position in
/// the 4x4 neighborhood grid; kernels are applied in row-major `(gr, gc)` order
/// by the caller, so a later kernel's overlap with an earlier one (the shared
/// seam column/row at the 128 split) always wins — this is the documented
/// 128/129 seam behavior, reproduced literally rather than "fixed".
fn apply_kernel(tile: &mut Tile, child: &Tile, gr: usize, gc: usize) {
	match (gr, gc) {
		(1, 1) => {
			copy_quadrant(tile, child, 0, 0);
			tile.exists(flags::TL);
			tile.adjust_min_max(child.min, child.max);
		}
		(1, 2) => {
			copy_quadrant(tile, child, 0, 128);
			tile.exists(flags::TR);
			tile.adjust_min_max(child.min, child.max);
		}
		(2, 1) => {
			copy_quadrant(tile, child, 128, 0);
			tile.exists(flags::BL);
			tile.adjust_min_max(child.min, child.max);
		}
		(2, 2) => {
			copy_quadrant(tile, child, 128, 128);
			tile.exists(flags::BR);
			tile.adjust_min_max(child.min, child.max);
		}
		(0, 1) => copy_row(tile, child, NEAR_EDGE, BORDER_LOW, 0),
		(0, 2) => copy_row(tile, child, NEAR_EDGE, BORDER_LOW, 128),
		(3, 1) => copy_row(tile, child, 2, BORDER_HIGH, 0),
		(3, 2) => copy_row(tile, child, 2, BORDER_HIGH, 128),
		(1, 0) => copy_col(tile, child, NEAR_EDGE, BORDER_LOW, 0),
		(2, 0) => copy_col(tile, child, NEAR_EDGE, BORDER_LOW, 128),
		(1, 3) => copy_col(tile, child, 2, BORDER_HIGH, 0),
		(2, 3) => copy_col(tile, child, 2, BORDER_HIGH, 128),
		(0, 0) => tile.set(BORDER_LOW, BORDER_LOW, child.get(NEAR_EDGE, NEAR_EDGE)),
		(0, 3) => tile.set(BORDER_LOW, BORDER_HIGH, child.get(NEAR_EDGE, 2)),
		(3, 0) => tile.set(BORDER_HIGH, BORDER_LOW, child.get(2, NEAR_EDGE)),
		(3, 3) => tile.set(BORDER_HIGH, BORDER_HIGH, child.get(2, 2)),
		_ => unreachable!("4x4 grid only has positions 0..4 x 0..4"),
	}
}

/// Builds the coarse tile at `(x, y, zoom)` from `children`. Returns `None` if
/// every one of the 16 neighborhood slots is missing.
#[must_use]
pub fn downsample(x: u32, y: u32, zoom: u8, children: &ChildGrid) -> Option<Tile> {
	if children.all_missing() {
		return None;
	}

	let mut tile = Tile::new(x, y, zoom);
	for gr in 0..4usize {
		for gc in 0..4usize {
			if let Some(child) = children.get(gr, gc) {
				apply_kernel(&mut tile, child, gr, gc);
			}
		}
	}

	for (gr, gc) in [(1, 1), (1, 2), (2, 1), (2, 2)] {
		if children.get(gr, gc).is_none() {
			tile.adjust_min_max(0, 0);
		}
	}

	tile.recompute_min_max();
	Some(tile)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn filled_child(x: u32, y: u32, zoom: u8, value: i16) -> Tile {
		let mut tile = Tile::new(x, y, zoom);
		for m in -1i64..=257 {
			for n in -1i64..=257 {
				tile.set(m, n, value);
			}
		}
		tile.adjust_min_max(i32::from(value), i32::from(value));
		tile
	}

	#[test]
	fn all_missing_children_produce_no_tile() {
		let children = ChildGrid::new();
		assert!(downsample(0, 0, 12, &children).is_none());
	}

	#[test]
	fn single_interior_child_sets_its_flag_and_quadrant() {
		let tl = filled_child(0, 0, 13, 100);
		let mut children = ChildGrid::new();
		children.set(1, 1, Some(&tl));

		let coarse = downsample(0, 0, 12, &children).unwrap();
		assert_eq!(coarse.flags & flags::TL, flags::TL);
		assert_eq!(coarse.flags & flags::TR, 0);
		assert_eq!(coarse.get(0, 0), 100);
		assert_eq!(coarse.get(0, 128), 100);
		// an untouched quadrant stays at its initial zero value
		assert_eq!(coarse.get(200, 200), 0);
	}

	#[test]
	fn missing_interior_child_floors_min_max_at_zero() {
		let tl = filled_child(0, 0, 13, 500);
		let mut children = ChildGrid::new();
		children.set(1, 1, Some(&tl));
		// (1,2) / (2,1) / (2,2) all missing

		let coarse = downsample(0, 0, 12, &children).unwrap();
		assert!(coarse.min <= 0);
	}

	#[test]
	fn later_kernel_wins_the_shared_seam_column() {
		let tl = filled_child(0, 0, 13, 1);
		let tr = filled_child(1, 0, 13, 2);
		let mut children = ChildGrid::new();
		children.set(1, 1, Some(&tl));
		children.set(1, 2, Some(&tr));

		let coarse = downsample(0, 0, 12, &children).unwrap();
		// column 128 is written by both kernel 11 (value 1) and kernel 12 (value 2);
		// (1,2) is applied after (1,1) in row-major order, so its value wins.
		assert_eq!(coarse.get(0, 128), 2);
	}

	#[test]
	fn north_frame_neighbor_fills_top_border() {
		let north = filled_child(0, 0, 13, 42);
		let mut children = ChildGrid::new();
		children.set(0, 1, Some(&north));

		let coarse = downsample(0, 0, 12, &children).unwrap();
		assert_eq!(coarse.get(-1, 0), 42);
		assert_eq!(coarse.get(-1, 128), 42);
	}

	#[test]
	fn corner_frame_neighbor_fills_a_single_corner_sample() {
		let nw = filled_child(0, 0, 13, 7);
		let mut children = ChildGrid::new();
		children.set(0, 0, Some(&nw));

		let coarse = downsample(0, 0, 12, &children).unwrap();
		assert_eq!(coarse.get(-1, -1), 7);
		assert_eq!(coarse.get(-1, 0), 0);
	}
}
