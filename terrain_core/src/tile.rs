//! The output tile entity: sample buffer with border, min/max tracking, the
//! existence-flag bitset, the on-disk binary codec, bilinear interpolation, and
//! the normal-map derivation.

use std::io::{Read, Write};

use anyhow::{Context, Result, bail, ensure};
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::constants::{BORDER, CORE_SAMPLES, TILE_MAGIC, TILE_SAMPLES};
use crate::projection::{bounds, ft2m, geo2xyz};

const HEADER_LEN: usize = 16;

/// A finished elevation tile: a `TILE_SAMPLES` x `TILE_SAMPLES` grid of heights
/// in feet (core plus a one-sample border), min/max over the core, and the
/// per-quadrant child-existence flags.
#[derive(Debug, Clone)]
pub struct Tile {
	pub zoom: u8,
	pub x: u32,
	pub y: u32,
	samples: Vec<i16>,
	pub min: i32,
	pub max: i32,
	pub flags: u32,
}

impl Tile {
	/// Creates a zero-filled tile with sentinel min/max and no flags set.
	#[must_use]
	pub fn new(x: u32, y: u32, zoom: u8) -> Tile {
		Tile { zoom, x, y, samples: vec![0i16; (TILE_SAMPLES * TILE_SAMPLES) as usize], min: i32::from(i16::MAX), max: i32::from(i16::MIN), flags: 0 }
	}

	fn index(m: i64, n: i64) -> Option<usize> {
		let row = m + i64::from(BORDER);
		let col = n + i64::from(BORDER);
		if row < 0 || col < 0 || row >= i64::from(TILE_SAMPLES) || col >= i64::from(TILE_SAMPLES) {
			return None;
		}
		Some((row as usize) * (TILE_SAMPLES as usize) + col as usize)
	}

	/// Reads sample `(m, n)`, indices offset by the border. Out-of-range reads
	/// return the nodata sentinel (0) rather than failing.
	#[must_use]
	pub fn get(&self, m: i64, n: i64) -> i16 {
		Self::index(m, n).map_or(0, |idx| self.samples[idx])
	}

	/// Writes sample `(m, n)`. Out-of-range writes are silently dropped.
	pub fn set(&mut self, m: i64, n: i64, h: i16) {
		if let Some(idx) = Self::index(m, n) {
			self.samples[idx] = h;
		}
	}

	/// Extracts an evenly divided sub-block of the core grid into `out`.
	///
	/// `blocks` must evenly divide `256`; the extracted block has edge length
	/// `(256 / blocks) + 1`, sampled at `[r * step .. r * step + step]` inclusive
	/// so adjacent blocks share their boundary row/column.
    pub fn get_block(&self, blocks: u32, r: u32, c: u32, out: &mut [i16]) {
		assert_eq!(256 % blocks, 0, "blocks must evenly divide 256");
		let step = 256 / blocks;
		let edge = step + 1;
		assert_eq!(out.len(), (edge * edge) as usize, "output buffer size mismatch");

		let row0 = r * step;
		let col0 = c * step;
		for dr in 0..edge {
			for dc in 0..edge {
				let m = i64::from(row0 + dr);
				let n = i64::from(col0 + dc);
				out[(dr * edge + dc) as usize] = self.get(m, n);
			}
		}
	}

	fn bounds_uv(&self, lat: f64, lon: f64) -> (f64, f64) {
		let (lat_t, lon_l, lat_b, lon_r) = bounds(self.x, self.y, self.zoom);
		let u = (lon - lon_l) / (lon_r - lon_l);
		let v = (lat_t - lat) / (lat_t - lat_b);
		(u, v)
	}

	/// Looks up the nearest sample to `(lat, lon)` by rounding `(u, v) * 256`.
	#[must_use]
	pub fn sample(&self, lat: f64, lon: f64) -> i16 {
		let (u, v) = self.bounds_uv(lat, lon);
		let m = round_half_away_from_zero(v * 256.0);
		let n = round_half_away_from_zero(u * 256.0);
		self.get(m, n)
	}

	/// Bilinearly interpolates the core grid at fractional `(u, v)` in `[0, 1]`.
	#[must_use]
	pub fn interpolate(&self, u: f64, v: f64) -> f64 {
		let fx = u * 256.0;
		let fy = v * 256.0;

		let n0 = (fx.floor() as i64).clamp(-1, 257);
		let m0 = (fy.floor() as i64).clamp(-1, 257);
		let n1 = (n0 + 1).clamp(-1, 257);
		let m1 = (m0 + 1).clamp(-1, 257);

		let tx = fx - n0 as f64;
		let ty = fy - m0 as f64;

		let h00 = f64::from(self.get(m0, n0));
		let h01 = f64::from(self.get(m0, n1));
		let h10 = f64::from(self.get(m1, n0));
		let h11 = f64::from(self.get(m1, n1));

		let top = h00 + (h01 - h00) * tx;
		let bottom = h10 + (h11 - h10) * tx;
		top + (bottom - top) * ty
	}

	/// Widens `min`/`max` to also cover `[lo, hi]`.
	pub fn adjust_min_max(&mut self, lo: i32, hi: i32) {
		self.min = self.min.min(lo);
		self.max = self.max.max(hi);
	}

	/// ORs `flag_mask` bits into the existence-flag set.
	pub fn exists(&mut self, flag_mask: u32) {
		self.flags |= flag_mask;
	}

	/// Recomputes `min`/`max` from the current core grid, widening rather than
	/// replacing any previously adjusted bounds (e.g. from the downsampler's
	/// missing-child floor).
	pub fn recompute_min_max(&mut self) {
		let last = i64::from(CORE_SAMPLES) - 1;
		let mut lo = self.min;
		let mut hi = self.max;
		for m in 0..=last {
			for n in 0..=last {
				let h = i32::from(self.get(m, n));
				lo = lo.min(h);
				hi = hi.max(h);
			}
		}
		self.min = lo;
		self.max = hi;
	}

	/// Metric spacing (dx, dy) in meters between adjacent core samples, derived
	/// from the tile's ECEF corners rather than a fixed local-metric origin.
	fn sample_spacing_meters(&self) -> (f64, f64) {
		let (lat_t, lon_l, lat_b, lon_r) = bounds(self.x, self.y, self.zoom);
		let (xl, yl, zl) = geo2xyz(lat_t, lon_l, 0.0);
		let (xr, yr, zr) = geo2xyz(lat_t, lon_r, 0.0);
		let (xb, yb, zb) = geo2xyz(lat_b, lon_l, 0.0);

		let width = ((xr - xl).powi(2) + (yr - yl).powi(2) + (zr - zl).powi(2)).sqrt();
		let height = ((xb - xl).powi(2) + (yb - yl).powi(2) + (zb - zl).powi(2)).sqrt();

		let steps = f64::from(CORE_SAMPLES - 1);
		(width / steps, height / steps)
	}

	/// Derives a `size x size` grid of packed (nx, ny) normal bytes.
	///
	/// Slopes are computed via the cross product of the local tangent vectors;
	/// the z component is normalized to 1, nx/ny are clamped to `[-2, 2]` (slopes
	/// up to ~63.4 degrees) and scaled into `[0, 255]`.
	pub fn normal_map(&self, out: &mut [(u8, u8)], size: u32) {
		assert_eq!(out.len(), (size * size) as usize, "output buffer size mismatch");
		let (dx, dy) = self.sample_spacing_meters();
		let step = f64::from(CORE_SAMPLES - 1) / f64::from(size);

		for row in 0..size {
			for col in 0..size {
				let m = (f64::from(row) * step).round() as i64;
				let n = (f64::from(col) * step).round() as i64;

				let h_left = ft2m(f64::from(self.get(m, n - 1)));
				let h_right = ft2m(f64::from(self.get(m, n + 1)));
				let h_top = ft2m(f64::from(self.get(m - 1, n)));
				let h_bottom = ft2m(f64::from(self.get(m + 1, n)));

				let dzdu = (h_right - h_left) / 2.0;
				let dzdv = (h_bottom - h_top) / 2.0;

				let nx = (-dzdu / dx).clamp(-2.0, 2.0);
				let ny = (-dzdv / dy).clamp(-2.0, 2.0);

				let bx = (((nx + 2.0) / 4.0) * 255.0).round() as u8;
				let by = (((ny + 2.0) / 4.0) * 255.0).round() as u8;
				out[(row * size + col) as usize] = (bx, by);
			}
		}
	}

	/// Serializes the tile to its on-disk representation: a 16-byte
	/// little-endian header followed by a deflate-compressed sample block.
	pub fn export(&self) -> Result<Vec<u8>> {
		let mut raw = Vec::with_capacity((TILE_SAMPLES * TILE_SAMPLES * 2) as usize);
		for &s in &self.samples {
			raw.write_i16::<LittleEndian>(s)?;
		}

		let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
		encoder.write_all(&raw)?;
		let compressed = encoder.finish().context("compressing tile body")?;

		let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
		out.write_u32::<LittleEndian>(TILE_MAGIC)?;
		out.write_i32::<LittleEndian>(self.min)?;
		out.write_i32::<LittleEndian>(self.max)?;
		out.write_i32::<LittleEndian>(self.flags as i32)?;
		out.extend_from_slice(&compressed);
		Ok(out)
	}

	/// Parses a tile from its on-disk representation.
	///
	/// A magic that reads byte-swapped is accepted by decoding the remaining
	/// header fields in the opposite byte order; any other magic is rejected.
	pub fn import(bytes: &[u8], x: u32, y: u32, zoom: u8) -> Result<Tile> {
		ensure!(bytes.len() >= HEADER_LEN, "tile file too short for header: {} bytes", bytes.len());
		let header = &bytes[..HEADER_LEN];

		let (min, max, flags) = if LittleEndian::read_u32(&header[0..4]) == TILE_MAGIC {
			(LittleEndian::read_i32(&header[4..8]), LittleEndian::read_i32(&header[8..12]), LittleEndian::read_i32(&header[12..16]))
		} else if BigEndian::read_u32(&header[0..4]) == TILE_MAGIC {
			(BigEndian::read_i32(&header[4..8]), BigEndian::read_i32(&header[8..12]), BigEndian::read_i32(&header[12..16]))
		} else {
			bail!("bad tile magic: {:08x}", LittleEndian::read_u32(&header[0..4]));
		};

		let mut decoder = ZlibDecoder::new(&bytes[HEADER_LEN..]);
		let mut raw = Vec::with_capacity((TILE_SAMPLES * TILE_SAMPLES * 2) as usize);
		decoder.read_to_end(&mut raw).context("decompressing tile body")?;

		let expected = (TILE_SAMPLES * TILE_SAMPLES * 2) as usize;
		ensure!(raw.len() == expected, "decompressed tile body is {} bytes, expected {expected}", raw.len());

		let mut samples = vec![0i16; (TILE_SAMPLES * TILE_SAMPLES) as usize];
		for (i, chunk) in raw.chunks_exact(2).enumerate() {
			samples[i] = LittleEndian::read_i16(chunk);
		}

		Ok(Tile { zoom, x, y, samples, min, max, flags: flags as u32 })
	}

	/// Approximate resident memory footprint, used by the cache's eviction budget.
	#[must_use]
	pub fn memory_size(&self) -> u64 {
		(self.samples.len() * std::mem::size_of::<i16>()) as u64 + 64
	}
}

fn round_half_away_from_zero(v: f64) -> i64 {
	if v >= 0.0 { (v + 0.5).floor() as i64 } else { (v - 0.5).ceil() as i64 }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_byte_exact() {
		let mut tile = Tile::new(200, 400, 10);
		let mut lo = i32::MAX;
		let mut hi = i32::MIN;
		for m in -1i64..=257 {
			for n in -1i64..=257 {
				let raw = (m * 259 + n).rem_euclid(4096) - 1000;
				let h = raw as i16;
				tile.set(m, n, h);
				if (0..=256).contains(&m) && (0..=256).contains(&n) {
					lo = lo.min(i32::from(h));
					hi = hi.max(i32::from(h));
				}
			}
		}
		tile.min = lo;
		tile.max = hi;

		let bytes = tile.export().unwrap();
		let reimported = Tile::import(&bytes, 200, 400, 10).unwrap();

		assert_eq!(reimported.min, lo);
		assert_eq!(reimported.max, hi);
		assert_eq!(reimported.flags, 0);
		for m in -1i64..=257 {
			for n in -1i64..=257 {
				assert_eq!(tile.get(m, n), reimported.get(m, n), "mismatch at ({m}, {n})");
			}
		}
	}

	#[test]
	fn rejects_bad_magic() {
		let tile = Tile::new(0, 0, 0);
		let mut bytes = tile.export().unwrap();
		bytes[0] ^= 0xFF;
		assert!(Tile::import(&bytes, 0, 0, 0).is_err());
	}

	#[test]
	fn reads_byte_swapped_header() {
		let tile = Tile::new(5, 5, 5);
		let bytes = tile.export().unwrap();
		let mut swapped = bytes.clone();
		swapped[0..4].reverse();
		swapped[4..8].reverse();
		swapped[8..12].reverse();
		swapped[12..16].reverse();
		let reimported = Tile::import(&swapped, 5, 5, 5).unwrap();
		assert_eq!(reimported.min, tile.min);
		assert_eq!(reimported.max, tile.max);
	}

	#[test]
	fn out_of_range_get_is_nodata_not_panic() {
		let tile = Tile::new(0, 0, 0);
		assert_eq!(tile.get(-5, 0), 0);
		assert_eq!(tile.get(0, 1000), 0);
	}

	#[test]
	fn out_of_range_set_is_silently_dropped() {
		let mut tile = Tile::new(0, 0, 0);
		tile.set(-10, -10, 42);
		tile.set(1000, 1000, 42);
	}

	#[test]
	fn get_block_shares_boundary_with_neighbor() {
		let mut tile = Tile::new(0, 0, 0);
		for m in 0i64..=256 {
			for n in 0i64..=256 {
				tile.set(m, n, (m + n) as i16);
			}
		}
		let mut left = vec![0i16; 17 * 17];
		let mut right = vec![0i16; 17 * 17];
		tile.get_block(16, 0, 0, &mut left);
		tile.get_block(16, 0, 1, &mut right);
		// right column of the left block must equal the left column of the right block
		for row in 0..17 {
			assert_eq!(left[row * 17 + 16], right[row * 17]);
		}
	}

	#[test]
	fn adjust_min_max_widens_not_replaces() {
		let mut tile = Tile::new(0, 0, 0);
		tile.min = 10;
		tile.max = 20;
		tile.adjust_min_max(0, 0);
		assert_eq!(tile.min, 0);
		assert_eq!(tile.max, 20);
	}

	#[test]
	fn exists_ors_flags() {
		let mut tile = Tile::new(0, 0, 0);
		tile.exists(crate::constants::flags::TL);
		tile.exists(crate::constants::flags::BR);
		assert_eq!(tile.flags, crate::constants::flags::TL | crate::constants::flags::BR);
	}

	#[test]
	fn flat_tile_has_near_zero_normals() {
		let tile = Tile::new(1713, 3198, 13);
		let mut out = vec![(0u8, 0u8); 4 * 4];
		tile.normal_map(&mut out, 4);
		for (nx, ny) in out {
			assert!((i32::from(nx) - 128).abs() <= 1);
			assert!((i32::from(ny) - 128).abs() <= 1);
		}
	}

	#[test]
	fn border_coherence_between_neighboring_tiles() {
		let mut left = Tile::new(0, 0, 2);
		let mut right = Tile::new(1, 0, 2);
		for m in -1i64..=257 {
			left.set(m, 257, 777);
			right.set(m, -1, 777);
		}
		for m in -1i64..=257 {
			assert_eq!(left.get(m, 257), right.get(m, -1));
		}
	}
}
