//! Loader for source raster family B: a single raster file organized as a grid
//! of fixed-size 16-bit tile blocks (as a tiled TIFF's tile directory lays out
//! its blocks), plus an XML-like sidecar document giving the overall bounding
//! box. Grounded in `flt/flt_tile.c`'s ASTERv3 handling and `maketerrain/mk_state.c`
//! from the original implementation; this loader reads the tile-block layout
//! directly rather than through a general TIFF decoder, since no such crate is
//! part of this project's dependency stack.

use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::constants::FAMILY_B_NODATA;
use crate::projection::m2ft;
use crate::raster::{Family, SourceRaster};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEndian {
	Big,
	Little,
}

/// Describes the tile-block layout of the source raster: `grid_rows * grid_cols`
/// blocks stored back-to-back in row-major block order, each `tile_rows * tile_cols`
/// 16-bit samples.
#[derive(Debug, Clone, Copy)]
pub struct FamilyBLayout {
	pub grid_rows: u32,
	pub grid_cols: u32,
	pub tile_rows: u32,
	pub tile_cols: u32,
	pub endian: TileEndian,
}

impl FamilyBLayout {
	fn full_rows(self) -> u32 {
		self.grid_rows * self.tile_rows
	}

	fn full_cols(self) -> u32 {
		self.grid_cols * self.tile_cols
	}

	fn block_samples(self) -> usize {
		(self.tile_rows as usize) * (self.tile_cols as usize)
	}
}

struct BoundingBox {
	north: f64,
	west: f64,
	south: f64,
	east: f64,
}

fn extract_tag(text: &str, tag: &str) -> Result<f64> {
	let open = format!("<{tag}>");
	let close = format!("</{tag}>");
	let start = text.find(&open).with_context(|| format!("sidecar missing <{tag}>"))? + open.len();
	let end = text[start..].find(&close).with_context(|| format!("sidecar missing </{tag}>"))? + start;
	text[start..end].trim().parse::<f64>().with_context(|| format!("invalid numeric value for <{tag}>"))
}

fn parse_sidecar(text: &str) -> Result<BoundingBox> {
	Ok(BoundingBox {
		north: extract_tag(text, "NorthBoundingCoordinate")?,
		west: extract_tag(text, "WestBoundingCoordinate")?,
		south: extract_tag(text, "SouthBoundingCoordinate")?,
		east: extract_tag(text, "EastBoundingCoordinate")?,
	})
}

fn round_half_away_from_zero(v: f64) -> i32 {
	if v >= 0.0 { (v + 0.5).floor() as i32 } else { (v - 0.5).ceil() as i32 }
}

/// Copies one tile block's worth of bytes into `heights` at its grid offset.
fn copy_block_into(heights: &mut [i16], layout: FamilyBLayout, block_row: u32, block_col: u32, block_bytes: &[u8]) {
	let full_cols = layout.full_cols();
	let row0 = block_row * layout.tile_rows;
	let col0 = block_col * layout.tile_cols;

	for r in 0..layout.tile_rows {
		for c in 0..layout.tile_cols {
			let idx = ((r * layout.tile_cols + c) * 2) as usize;
			let raw = match layout.endian {
				TileEndian::Big => BigEndian::read_i16(&block_bytes[idx..idx + 2]),
				TileEndian::Little => LittleEndian::read_i16(&block_bytes[idx..idx + 2]),
			};
			let value = if i32::from(raw) == FAMILY_B_NODATA { 0.0 } else { m2ft(f64::from(raw)) };
			let dst = ((row0 + r) * full_cols + (col0 + c)) as usize;
			heights[dst] = round_half_away_from_zero(value) as i16;
		}
	}
}

/// Loads a family-B raster from a single tiled-block body file and its sidecar.
pub fn load_family_b(sidecar_path: &Path, body_path: &Path, layout: FamilyBLayout, origin_lat: i32, origin_lon: i32) -> Result<SourceRaster> {
	let sidecar_text = std::fs::read_to_string(sidecar_path).with_context(|| format!("reading sidecar {}", sidecar_path.display()))?;
	let bbox = parse_sidecar(&sidecar_text).with_context(|| format!("parsing sidecar {}", sidecar_path.display()))?;

	ensure!(layout.grid_rows > 0 && layout.grid_cols > 0, "empty tile grid");
	ensure!(layout.full_rows() >= 2 && layout.full_cols() >= 2, "family B raster must be at least 2x2");

	let body = std::fs::read(body_path).with_context(|| format!("reading body {}", body_path.display()))?;
	let block_bytes = layout.block_samples() * 2;
	let expected = block_bytes * (layout.grid_rows as usize) * (layout.grid_cols as usize);
	ensure!(body.len() == expected, "body {} has {} bytes, expected {expected}", body_path.display(), body.len());

	let mut heights = vec![0i16; (layout.full_rows() as usize) * (layout.full_cols() as usize)];
	for block_row in 0..layout.grid_rows {
		for block_col in 0..layout.grid_cols {
			let block_index = (block_row * layout.grid_cols + block_col) as usize;
			let start = block_index * block_bytes;
			copy_block_into(&mut heights, layout, block_row, block_col, &body[start..start + block_bytes]);
		}
	}

	Ok(SourceRaster {
		family: Family::B,
		origin_lat,
		origin_lon,
		lat_t: bbox.north,
		lon_l: bbox.west,
		lat_b: bbox.south,
		lon_r: bbox.east,
		rows: layout.full_rows(),
		cols: layout.full_cols(),
		heights,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use byteorder::WriteBytesExt;
	use std::io::Write;

	fn write_body(path: &Path, values: &[i16]) {
		let mut f = std::fs::File::create(path).unwrap();
		for &v in values {
			f.write_i16::<LittleEndian>(v).unwrap();
		}
	}

	fn write_sidecar(path: &Path, north: f64, west: f64, south: f64, east: f64) {
		std::fs::write(
			path,
			format!(
				"<BoundingBox><NorthBoundingCoordinate>{north}</NorthBoundingCoordinate>\
				 <WestBoundingCoordinate>{west}</WestBoundingCoordinate>\
				 <SouthBoundingCoordinate>{south}</SouthBoundingCoordinate>\
				 <EastBoundingCoordinate>{east}</EastBoundingCoordinate></BoundingBox>"
			),
		)
		.unwrap();
	}

	#[test]
	fn loads_a_single_block_body_and_applies_nodata_and_conversion() {
		let dir = tempfile::tempdir().unwrap();
		let sidecar = dir.path().join("bbox.xml");
		write_sidecar(&sidecar, 41.0, -106.0, 40.0, -105.0);

		let body = dir.path().join("body.bin");
		write_body(&body, &[0, 10, -9999, 5]);

		let layout = FamilyBLayout { grid_rows: 1, grid_cols: 1, tile_rows: 2, tile_cols: 2, endian: TileEndian::Little };
		let raster = load_family_b(&sidecar, &body, layout, 40, -106).unwrap();

		assert_eq!(raster.rows, 2);
		assert_eq!(raster.cols, 2);
		assert_eq!(raster.lat_t, 41.0);
		assert_eq!(raster.lon_r, -105.0);
		assert_eq!(raster.heights[2], 0); // nodata -> 0
		assert_eq!(raster.heights[0], 0); // 0 meters -> 0 feet
		assert!(raster.heights[1] > raster.heights[0]); // 10 meters -> positive feet
	}

	#[test]
	fn assembles_a_multi_block_grid_at_correct_offsets() {
		let dir = tempfile::tempdir().unwrap();
		let sidecar = dir.path().join("bbox.xml");
		write_sidecar(&sidecar, 2.0, 0.0, 0.0, 2.0);

		// 2x2 grid of 1x1-sample blocks, stored row-major: (0,0), (0,1), (1,0), (1,1)
		let body = dir.path().join("body.bin");
		write_body(&body, &[0, 20, -40, 0]);

		let layout = FamilyBLayout { grid_rows: 2, grid_cols: 2, tile_rows: 1, tile_cols: 1, endian: TileEndian::Little };
		let raster = load_family_b(&sidecar, &body, layout, 0, 0).unwrap();

		assert_eq!(raster.rows, 2);
		assert_eq!(raster.cols, 2);
		assert!(raster.heights[1] > 0); // (0, 1): 20 meters -> positive feet
		assert!(raster.heights[2] < 0); // (1, 0): -40 meters -> negative feet
	}

	#[test]
	fn rejects_malformed_sidecar() {
		let dir = tempfile::tempdir().unwrap();
		let sidecar = dir.path().join("bbox.xml");
		std::fs::write(&sidecar, "<NorthBoundingCoordinate>41.0</NorthBoundingCoordinate>").unwrap();
		let body = dir.path().join("body.bin");
		write_body(&body, &[0]);
		let layout = FamilyBLayout { grid_rows: 1, grid_cols: 1, tile_rows: 1, tile_cols: 1, endian: TileEndian::Little };
		assert!(load_family_b(&sidecar, &body, layout, 0, 0).is_err());
	}

	#[test]
	fn rejects_truncated_body() {
		let dir = tempfile::tempdir().unwrap();
		let sidecar = dir.path().join("bbox.xml");
		write_sidecar(&sidecar, 1.0, 0.0, 0.0, 1.0);
		let body = dir.path().join("body.bin");
		write_body(&body, &[0, 0]); // needs 4 samples for a 2x2 grid of 1x1 blocks
		let layout = FamilyBLayout { grid_rows: 2, grid_cols: 2, tile_rows: 1, tile_cols: 1, endian: TileEndian::Little };
		assert!(load_family_b(&sidecar, &body, layout, 0, 0).is_err());
	}
}
