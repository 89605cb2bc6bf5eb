//! Pure coordinate-conversion functions: Web Mercator tile/sample math, WGS84
//! geodetic<->ECEF conversion, and meters<->feet unit conversion.
//!
//! Nothing in this module allocates or has side effects.

use std::f64::consts::PI;

use crate::constants::CORE_SAMPLES;

/// Converts an integer (or fractional) Web Mercator tile coordinate to geographic
/// (lat, lon) in decimal degrees, at the given zoom.
#[must_use]
pub fn tile2coord(x: f64, y: f64, zoom: u8) -> (f64, f64) {
	let scale = 2f64.powi(i32::from(zoom));
	let u = x / scale;
	let v = y / scale;
	let lon = (2.0 * PI * u - PI).to_degrees();
	let lat = (2.0 * (PI - 2.0 * PI * v).exp().atan() - PI / 2.0).to_degrees();
	(lat, lon)
}

/// Converts geographic (lat, lon) in decimal degrees to a real-valued Web Mercator
/// tile coordinate at the given zoom. Inverse of [`tile2coord`].
#[must_use]
pub fn coord2tile(lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
	let rad_lat = lat.to_radians();
	let rad_lon = lon.to_radians();
	let merc_y = (rad_lat.tan() + 1.0 / rad_lat.cos()).ln();
	let u = (rad_lon + PI) / (2.0 * PI);
	let v = (PI - merc_y) / (2.0 * PI);
	let scale = 2f64.powi(i32::from(zoom));
	(u * scale, v * scale)
}

/// Converts a sample position `(m, n)` inside tile `(x, y, zoom)` to geographic
/// coordinates. The tile is treated as a `CORE_SAMPLES`-wide grid, `(0, 0)` being
/// the top-left core sample and `(CORE_SAMPLES - 1, CORE_SAMPLES - 1)` the bottom-right.
#[must_use]
pub fn sample2coord(x: u32, y: u32, zoom: u8, m: i64, n: i64) -> (f64, f64) {
	let span = f64::from(CORE_SAMPLES - 1);
	let nn = n as f64 / span;
	let mm = m as f64 / span;
	tile2coord(f64::from(x) + nn, f64::from(y) + mm, zoom)
}

/// Returns the geographic bounding box `(latT, lonL, latB, lonR)` of tile `(x, y, zoom)`.
#[must_use]
pub fn bounds(x: u32, y: u32, zoom: u8) -> (f64, f64, f64, f64) {
	let (lat_t, lon_l) = sample2coord(x, y, zoom, 0, 0);
	let last = i64::from(CORE_SAMPLES) - 1;
	let (lat_b, lon_r) = sample2coord(x, y, zoom, last, last);
	(lat_t, lon_l, lat_b, lon_r)
}

/// Converts meters to feet.
#[must_use]
pub fn m2ft(m: f64) -> f64 {
	m * 5280.0 / 1609.344
}

/// Converts feet to meters.
#[must_use]
pub fn ft2m(f: f64) -> f64 {
	f * 1609.344 / 5280.0
}

/// WGS84 semi-major axis, in meters.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 inverse flattening.
const WGS84_INV_F: f64 = 298.257_223_563;

/// Converts WGS84 geodetic coordinates (degrees, degrees, meters) to earth-centered,
/// earth-fixed (ECEF) Cartesian coordinates in meters.
#[must_use]
pub fn geo2xyz(lat: f64, lon: f64, alt: f32) -> (f64, f64, f64) {
	let f = 1.0 / WGS84_INV_F;
	let e2 = f * (2.0 - f);
	let rad_lat = lat.to_radians();
	let rad_lon = lon.to_radians();
	let sin_lat = rad_lat.sin();
	let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
	let h = f64::from(alt);
	let x = (n + h) * rad_lat.cos() * rad_lon.cos();
	let y = (n + h) * rad_lat.cos() * rad_lon.sin();
	let z = (n * (1.0 - e2) + h) * sin_lat;
	(x, y, z)
}

/// Converts ECEF Cartesian coordinates (meters) back to WGS84 geodetic coordinates
/// (degrees, degrees, meters), using Vermeille's closed-form (non-iterative) method.
///
/// The constant names below (`AADC`, `BBDCC`, `EED2`, `EEEED4`, `EEEE`, `HMIN`, `INV3`,
/// `INV6`, `INVAA`, `INVCBRT2`, `P1MEE`, `P1MEEDAA`) mirror those documented for this
/// conversion; see the Open Questions entry in `DESIGN.md` for how they were recovered.
/// The `abs()` guard below on the `t` term's discriminant is the documented guard against
/// floating-point cancellation near the branch where `r` crosses zero.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn xyz2geo(x: f64, y: f64, z: f64) -> (f64, f64, f32) {
	let f = 1.0 / WGS84_INV_F;
	let b = WGS84_A * (1.0 - f);

	let aadc = WGS84_A * WGS84_A;
	let bbdcc = b * b;
	let invaa = 1.0 / aadc;
	let e2 = (aadc - bbdcc) * invaa;
	let eeee = e2 * e2;
	let eeeed4 = eeee / 4.0;
	let eed2 = e2 / 2.0;
	let p1mee = 1.0 - e2;
	let p1meedaa = p1mee * invaa;
	let inv3 = 1.0 / 3.0;
	let inv6 = 1.0 / 6.0;
	let invcbrt2 = 2f64.powf(-inv3);
	let hmin = 1e-12;

	let ww = x * x + y * y;
	let p = ww * invaa;
	let q = p1meedaa * z * z;
	let r = (p + q - eeee) * inv6;

	let t = if r.abs() < hmin {
		invcbrt2
	} else {
		let s = eeeed4 * p * q / (r * r * r);
		let discriminant = s * (2.0 + s);
		(1.0 + s + discriminant.abs().sqrt()).powf(inv3)
	};

	let u = r * (1.0 + t + 1.0 / t);
	let v = (u * u + eeee * q).sqrt().max(hmin);
	let w = eed2 * (u + v - q) / v;
	let k = (u + v + w * w).sqrt() - w;
	let d = k * ww.sqrt() / (k + e2);
	let dd_zz = (d * d + z * z).sqrt();

	let lat = 2.0 * z.atan2(d + dd_zz);
	let lon = y.atan2(x);
	let alt = (k + e2 - 1.0) / k * dd_zz;

	(lat.to_degrees(), lon.to_degrees(), alt as f32)
}
