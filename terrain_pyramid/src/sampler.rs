//! Produces a finest-level tile by resampling a 3x3 neighborhood of source
//! rasters at every sample position of the output grid.

use terrain_core::{BORDER, CORE_SAMPLES, SourceRaster, Tile, sample2coord};

/// Which family (or combination) participates in fine-level sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
	AOnly,
	BOnly,
	/// Both families sampled; A takes precedence where both cover a point.
	AOverB,
}

/// A 3x3 neighborhood of source rasters around a tile's integer (lat, lon)
/// origin, indexed by row/column offset in `-1..=1` (row increases southward,
/// matching the tile grid).
pub struct Neighborhood<'a> {
	slots: [[Option<&'a SourceRaster>; 3]; 3],
}

impl<'a> Neighborhood<'a> {
	#[must_use]
	pub fn new() -> Self {
		Neighborhood { slots: [[None; 3]; 3] }
	}

	pub fn set(&mut self, drow: i32, dcol: i32, raster: Option<&'a SourceRaster>) {
		self.slots[(drow + 1) as usize][(dcol + 1) as usize] = raster;
	}

	#[must_use]
	fn get(&self, drow: i32, dcol: i32) -> Option<&'a SourceRaster> {
		self.slots[(drow + 1) as usize][(dcol + 1) as usize]
	}

	/// The nine slots in the sampling-order policy: centre first (common case,
	/// cache-friendly), then the four edge neighbors, then the four corners.
	fn ordered(&self) -> [Option<&'a SourceRaster>; 9] {
		[
			self.get(0, 0),   // cc
			self.get(-1, 0),  // tc
			self.get(1, 0),   // bc
			self.get(0, -1),  // cl
			self.get(0, 1),   // cr
			self.get(-1, -1), // tl
			self.get(1, -1),  // bl
			self.get(-1, 1),  // tr
			self.get(1, 1),   // br
		]
	}
}

impl<'a> Default for Neighborhood<'a> {
	fn default() -> Self {
		Self::new()
	}
}

fn sample_ordered(neighborhood: &Neighborhood, lat: f64, lon: f64) -> Option<i16> {
	neighborhood.ordered().into_iter().flatten().find_map(|raster| raster.sample(lat, lon))
}

/// Resamples a finest-level tile from `neighborhood_a`/`neighborhood_b` per `mode`.
///
/// In `AOverB`, every sample is looked up against the B neighborhood first and
/// then the A neighborhood, with A overwriting B where both cover the point —
/// not a coordinate-precision tiebreak, purely the family's declared precedence.
#[must_use]
pub fn sample_fine_tile(x: u32, y: u32, zoom: u8, neighborhood_a: &Neighborhood, neighborhood_b: &Neighborhood, mode: SampleMode) -> Tile {
	let mut tile = Tile::new(x, y, zoom);

	let lo = -i64::from(BORDER);
	let hi = i64::from(CORE_SAMPLES) - 1 + i64::from(BORDER);

	for m in lo..=hi {
		for n in lo..=hi {
			let (lat, lon) = sample2coord(x, y, zoom, m, n);

			let mut height = None;
			if mode != SampleMode::AOnly {
				height = sample_ordered(neighborhood_b, lat, lon);
			}
			if mode != SampleMode::BOnly {
				if let Some(h) = sample_ordered(neighborhood_a, lat, lon) {
					height = Some(h);
				}
			}

			if let Some(h) = height {
				tile.set(m, n, h);
			}
		}
	}

	tile.recompute_min_max();
	tile
}

#[cfg(test)]
mod tests {
	use super::*;
	use terrain_core::Family;

	fn flat_raster(family: Family, lat_t: f64, lon_l: f64, lat_b: f64, lon_r: f64, value: i16) -> SourceRaster {
		SourceRaster { family, origin_lat: lat_b as i32, origin_lon: lon_l as i32, lat_t, lon_l, lat_b, lon_r, rows: 4, cols: 4, heights: vec![value; 16] }
	}

	// Tile (0, 0, zoom 0) spans the whole globe; its core sample (128, 128) sits
	// exactly at (lat 0, lon 0), so small rasters around the origin can cover it.

	#[test]
	fn a_only_mode_ignores_b_entirely() {
		let a = flat_raster(Family::A, 1.0, -1.0, -1.0, 1.0, 100);
		let b = flat_raster(Family::B, 1.0, -1.0, -1.0, 1.0, 999);

		let mut na = Neighborhood::new();
		na.set(0, 0, Some(&a));
		let mut nb = Neighborhood::new();
		nb.set(0, 0, Some(&b));

		let tile = sample_fine_tile(0, 0, 0, &na, &nb, SampleMode::AOnly);
		assert_eq!(tile.get(128, 128), 100);
	}

	#[test]
	fn a_over_b_mode_prefers_a_where_both_cover() {
		let a = flat_raster(Family::A, 1.0, -1.0, -1.0, 1.0, 100);
		let b = flat_raster(Family::B, 1.0, -1.0, -1.0, 1.0, 999);

		let mut na = Neighborhood::new();
		na.set(0, 0, Some(&a));
		let mut nb = Neighborhood::new();
		nb.set(0, 0, Some(&b));

		let tile = sample_fine_tile(0, 0, 0, &na, &nb, SampleMode::AOverB);
		assert_eq!(tile.get(128, 128), 100);
	}

	#[test]
	fn a_over_b_falls_back_to_b_outside_a_extent() {
		// A only covers lon 0.5..1 (misses the centre point at lon 0); B covers everything.
		let a = flat_raster(Family::A, 1.0, 0.5, -1.0, 1.0, 100);
		let b = flat_raster(Family::B, 1.0, -1.0, -1.0, 1.0, 999);

		let mut na = Neighborhood::new();
		na.set(0, 0, Some(&a));
		let mut nb = Neighborhood::new();
		nb.set(0, 0, Some(&b));

		let tile = sample_fine_tile(0, 0, 0, &na, &nb, SampleMode::AOverB);
		assert_eq!(tile.get(128, 128), 999);
	}

	#[test]
	fn centre_slot_wins_over_edge_slots_on_overlap() {
		let centre = flat_raster(Family::A, 1.0, -1.0, -1.0, 1.0, 1);
		let left = flat_raster(Family::A, 1.0, -1.0, -1.0, 1.0, 2);

		let mut na = Neighborhood::new();
		na.set(0, 0, Some(&centre));
		na.set(0, -1, Some(&left));
		let nb = Neighborhood::new();

		let tile = sample_fine_tile(0, 0, 0, &na, &nb, SampleMode::AOnly);
		assert_eq!(tile.get(128, 128), 1);
	}

	#[test]
	fn no_coverage_leaves_samples_at_zero() {
		let na = Neighborhood::new();
		let nb = Neighborhood::new();
		let tile = sample_fine_tile(0, 0, 0, &na, &nb, SampleMode::AOverB);
		assert_eq!(tile.get(10, 10), 0);
	}
}
