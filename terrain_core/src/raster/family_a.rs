//! Loader for source raster family A: an ASCII key/value header followed by a flat
//! binary body of 32-bit floats (meters), one per cell, row-major from the north-west
//! corner. Grounded in `flt/flt_tile.c` from the original implementation.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail, ensure};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use log::warn;

use crate::projection::m2ft;
use crate::raster::{Family, SourceRaster};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
	Big,
	Little,
}

struct Header {
	ncols: u32,
	nrows: u32,
	xllcorner: f64,
	yllcorner: f64,
	cellsize: f64,
	nodata: f64,
	byteorder: Endian,
}

fn parse_header(text: &str) -> Result<Header> {
	let mut fields: HashMap<String, String> = HashMap::new();
	for line in text.lines() {
		let mut parts = line.split_whitespace();
		let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
			continue;
		};
		fields.insert(key.to_ascii_lowercase(), value.to_string());
	}

	let get = |key: &str| -> Result<&String> { fields.get(key).with_context(|| format!("missing header field '{key}'")) };
	let get_f64 = |key: &str| -> Result<f64> { get(key)?.parse::<f64>().with_context(|| format!("invalid value for '{key}'")) };
	let get_u32 = |key: &str| -> Result<u32> { get(key)?.parse::<u32>().with_context(|| format!("invalid value for '{key}'")) };

	let byteorder = match get("byteorder")?.as_str() {
		"MSBFIRST" => Endian::Big,
		"LSBFIRST" => Endian::Little,
		other => bail!("unsupported byteorder '{other}'"),
	};

	Ok(Header {
		ncols: get_u32("ncols")?,
		nrows: get_u32("nrows")?,
		xllcorner: get_f64("xllcorner")?,
		yllcorner: get_f64("yllcorner")?,
		cellsize: get_f64("cellsize")?,
		nodata: get_f64("nodata_value")?,
		byteorder,
	})
}

/// Permissively reads a sibling projection file: unrecognized keys are logged, not fatal.
fn check_projection_file(path: &Path) {
	let Ok(text) = std::fs::read_to_string(path) else {
		return;
	};
	const KNOWN: &[&str] = &["projection", "datum", "spheroid", "units", "zunits", "parameters"];
	for line in text.lines() {
		let Some(key) = line.split_whitespace().next() else {
			continue;
		};
		if !KNOWN.contains(&key.to_ascii_lowercase().as_str()) {
			warn!("{}: unrecognized projection key '{key}'", path.display());
		}
	}
}

/// Loads a family-A raster from a header file and its adjacent binary body.
///
/// `header_path` and `body_path` are expected to describe the same grid; `prj_path`,
/// if it exists, is read permissively for diagnostics only.
pub fn load_family_a(header_path: &Path, body_path: &Path, prj_path: &Path, origin_lat: i32, origin_lon: i32) -> Result<SourceRaster> {
	let header_text = std::fs::read_to_string(header_path).with_context(|| format!("reading header {}", header_path.display()))?;
	let header = parse_header(&header_text).with_context(|| format!("parsing header {}", header_path.display()))?;

	check_projection_file(prj_path);

	let expected_len = (header.ncols as usize) * (header.nrows as usize) * 4;
	let mut body = Vec::new();
	std::fs::File::open(body_path)
		.with_context(|| format!("opening body {}", body_path.display()))?
		.read_to_end(&mut body)
		.with_context(|| format!("reading body {}", body_path.display()))?;
	ensure!(
		body.len() == expected_len,
		"body {} has {} bytes, expected {expected_len}",
		body_path.display(),
		body.len()
	);

	let mut heights = vec![0i16; (header.ncols * header.nrows) as usize];
	for (i, chunk) in body.chunks_exact(4).enumerate() {
		let meters = match header.byteorder {
			Endian::Big => BigEndian::read_f32(chunk),
			Endian::Little => LittleEndian::read_f32(chunk),
		};
		let value = if f64::from(meters) == header.nodata { 0.0 } else { m2ft(f64::from(meters)) };
		heights[i] = round_half_away_from_zero(value) as i16;
	}

	let lon_l = header.xllcorner;
	let lat_b = header.yllcorner;
	let lon_r = header.xllcorner + header.cellsize * f64::from(header.ncols - 1);
	let lat_t = header.yllcorner + header.cellsize * f64::from(header.nrows - 1);

	Ok(SourceRaster {
		family: Family::A,
		origin_lat,
		origin_lon,
		lat_t,
		lon_l,
		lat_b,
		lon_r,
		rows: header.nrows,
		cols: header.ncols,
		heights,
	})
}

fn round_half_away_from_zero(v: f64) -> i32 {
	if v >= 0.0 { (v + 0.5).floor() as i32 } else { (v - 0.5).ceil() as i32 }
}
