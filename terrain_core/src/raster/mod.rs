//! In-memory source rasters: the two vendor families, a shared bilinear sampler,
//! and the coastline/nodata fixup applied at sample time.

mod family_a;
mod family_b;

pub use family_a::load_family_a;
pub use family_b::{load_family_b, FamilyBLayout, TileEndian};

use crate::constants::COASTLINE_MAX_HEIGHT;

/// Which vendor family a [`SourceRaster`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
	A,
	B,
}

/// An in-memory elevation raster loaded from either source family.
///
/// Heights are stored in feet, already corrected for nodata/coastline artifacts
/// at load time is NOT done here — the fixup is applied lazily in [`SourceRaster::sample`]
/// so the raw buffer remains inspectable.
#[derive(Debug, Clone)]
pub struct SourceRaster {
	pub family: Family,
	/// Integer (lat, lon) origin used as the raster's cache key.
	pub origin_lat: i32,
	pub origin_lon: i32,
	pub lat_t: f64,
	pub lon_l: f64,
	pub lat_b: f64,
	pub lon_r: f64,
	pub rows: u32,
	pub cols: u32,
	/// Row-major signed 16-bit heights in feet, length `rows * cols`.
	pub heights: Vec<i16>,
}

impl SourceRaster {
	/// Approximate resident memory footprint, used by the cache's eviction budget.
	#[must_use]
	pub fn memory_size(&self) -> u64 {
		(self.heights.len() * std::mem::size_of::<i16>()) as u64 + 128
	}

	fn raw_at(&self, row: u32, col: u32) -> i32 {
		i32::from(self.heights[(row * self.cols + col) as usize])
	}

	/// Applies the coastline fixup: nodata or implausibly large (>32000ft) samples
	/// read as sea level.
	fn fixed_height(&self, row: u32, col: u32) -> f64 {
		let h = self.raw_at(row, col);
		if h > COASTLINE_MAX_HEIGHT {
			0.0
		} else {
			f64::from(h)
		}
	}

	/// Bilinear-samples the raster at `(lat, lon)`. Returns `None` if the point falls
	/// outside the raster's bounding box.
	#[must_use]
	pub fn sample(&self, lat: f64, lon: f64) -> Option<i16> {
		if self.cols < 2 || self.rows < 2 {
			return None;
		}

		let u = (lon - self.lon_l) / (self.lon_r - self.lon_l);
		let v = 1.0 - (lat - self.lat_b) / (self.lat_t - self.lat_b);

		if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
			return None;
		}

		let fx = u * f64::from(self.cols - 1);
		let fy = v * f64::from(self.rows - 1);

		let j0 = fx.floor() as u32;
		let i0 = fy.floor() as u32;
		let j1 = (j0 + 1).min(self.cols - 1);
		let i1 = (i0 + 1).min(self.rows - 1);

		let tx = fx - f64::from(j0);
		let ty = fy - f64::from(i0);

		let h00 = self.fixed_height(i0, j0);
		let h01 = self.fixed_height(i0, j1);
		let h10 = self.fixed_height(i1, j0);
		let h11 = self.fixed_height(i1, j1);

		let top = h00 + (h01 - h00) * tx;
		let bottom = h10 + (h11 - h10) * tx;
		let value = top + (bottom - top) * ty;

		Some(round_half_away_from_zero(value) as i16)
	}
}

fn round_half_away_from_zero(v: f64) -> i32 {
	if v >= 0.0 {
		(v + 0.5).floor() as i32
	} else {
		(v - 0.5).ceil() as i32
	}
}
