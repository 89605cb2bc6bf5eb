//! The recursive pyramid build driver: resolves `get_terrain(x, y, zoom)` against
//! the cache, persisted tiles, source rasters, and recursive downsampling.
//!
//! Zoom 15 is the terminal, fine-sampled level. Zoom 13 prefetches the 3x3
//! raster neighborhood and decides the sampling mode for the whole subtree
//! below it, then falls through to the same "recurse into 16 children" logic
//! that governs every other non-terminal zoom (0..12 and 14) — the distilled
//! spec's step list never mentions zoom 14 explicitly, and this is the one
//! reading under which every zoom level between 0 and 15 is actually reachable.
//! The decided [`SampleMode`] is threaded down through that recursion as an
//! explicit parameter, not as mutable global state.

use std::rc::Rc;

use anyhow::{Context, Result};
use log::{debug, warn};

use terrain_core::{bounds, Family, SourceRaster, Tile, FINE_ZOOM, PREFETCH_ZOOM};

use crate::cache::{tile_key, Cache};
use crate::config::BuildConfig;
use crate::downsample::{downsample, ChildGrid};
use crate::sampler::{sample_fine_tile, Neighborhood, SampleMode};
use crate::source_provider::SourceProvider;

/// Owns the cache and the currently-active 3x3 raster neighborhood (set by the
/// zoom-13 prefetch, consumed by the zoom-15 fine sampler below it in the same
/// recursive call chain).
pub struct Driver<P: SourceProvider> {
	cache: Cache,
	config: BuildConfig,
	provider: P,
	active_a: [[Option<Rc<SourceRaster>>; 3]; 3],
	active_b: [[Option<Rc<SourceRaster>>; 3]; 3],
}

impl<P: SourceProvider> Driver<P> {
	#[must_use]
	pub fn new(config: BuildConfig, provider: P) -> Driver<P> {
		let cache = Cache::new(config.cache_budget_bytes);
		Driver { cache, config, provider, active_a: Default::default(), active_b: Default::default() }
	}

	#[must_use]
	pub fn cache(&self) -> &Cache {
		&self.cache
	}

	fn in_region(&self, x: u32, y: u32, zoom: u8) -> bool {
		let (lat_t, lon_l, lat_b, lon_r) = bounds(x, y, zoom);
		let (req_lat_t, req_lon_l, req_lat_b, req_lon_r) = self.config.bbox;
		lat_t >= req_lat_b && lat_b <= req_lat_t && lon_r >= req_lon_l && lon_l <= req_lon_r
	}

	fn load_or_cached(&mut self, family: Family, lat: i32, lon: i32) -> Result<Option<Rc<SourceRaster>>> {
		if let Some(r) = self.cache.find_raster(family, lat, lon) {
			return Ok(Some(r));
		}
		let loaded = match family {
			Family::A => self.provider.load_a(lat, lon),
			Family::B => self.provider.load_b(lat, lon),
		}
		.with_context(|| format!("loading family {family:?} raster at ({lat}, {lon})"))?;
		Ok(loaded.map(|r| self.cache.insert_raster(family, lat, lon, r)))
	}

	/// Prefetches the 3x3 raster neighborhood around `(x, y, zoom)`'s integer
	/// origin and decides the sampling mode for the subtree rooted here.
	/// Returns `Ok(None)` when neither family covers the centre cell.
	fn prefetch(&mut self, x: u32, y: u32, zoom: u8) -> Result<Option<SampleMode>> {
		let (lat_t, lon_l, _lat_b, _lon_r) = bounds(x, y, zoom);
		let origin_lat = lat_t.floor() as i32;
		let origin_lon = lon_l.floor() as i32;

		let mut neighborhood_a: [[Option<Rc<SourceRaster>>; 3]; 3] = Default::default();
		let mut a_complete = true;
		for drow in -1i32..=1 {
			for dcol in -1i32..=1 {
				let r = self.load_or_cached(Family::A, origin_lat - drow, origin_lon + dcol)?;
				if r.is_none() {
					a_complete = false;
				}
				neighborhood_a[(drow + 1) as usize][(dcol + 1) as usize] = r;
			}
		}

		let mut neighborhood_b: [[Option<Rc<SourceRaster>>; 3]; 3] = Default::default();
		if !a_complete {
			for drow in -1i32..=1 {
				for dcol in -1i32..=1 {
					let r = self.load_or_cached(Family::B, origin_lat - drow, origin_lon + dcol)?;
					neighborhood_b[(drow + 1) as usize][(dcol + 1) as usize] = r;
				}
			}
		}

		let centre_a = neighborhood_a[1][1].is_some();
		let centre_b = neighborhood_b[1][1].is_some();
		if !centre_a && !centre_b {
			return Ok(None);
		}

		self.active_a = neighborhood_a;
		self.active_b = neighborhood_b;
		Ok(Some(if a_complete { SampleMode::AOnly } else { SampleMode::AOverB }))
	}

	fn build_fine(&mut self, x: u32, y: u32, zoom: u8, mode: SampleMode) -> Result<Rc<Tile>> {
		let mut na = Neighborhood::new();
		let mut nb = Neighborhood::new();
		for drow in -1i32..=1 {
			for dcol in -1i32..=1 {
				na.set(drow, dcol, self.active_a[(drow + 1) as usize][(dcol + 1) as usize].as_deref());
				nb.set(drow, dcol, self.active_b[(drow + 1) as usize][(dcol + 1) as usize].as_deref());
			}
		}
		let tile = sample_fine_tile(x, y, zoom, &na, &nb, mode);
		self.persist_and_cache(x, y, zoom, tile)
	}

	fn build_coarse(&mut self, x: u32, y: u32, zoom: u8, mode: Option<SampleMode>) -> Result<Option<Rc<Tile>>> {
		let mut children: Vec<Option<Rc<Tile>>> = Vec::with_capacity(16);
		for gr in 0i64..4 {
			for gc in 0i64..4 {
				let cx = 2 * i64::from(x) + gc - 1;
				let cy = 2 * i64::from(y) + gr - 1;
				let child = if cx < 0 || cy < 0 { None } else { self.get_terrain_inner(cx as u32, cy as u32, zoom + 1, mode)? };
				children.push(child);
			}
		}

		let mut grid = ChildGrid::new();
		for gr in 0..4usize {
			for gc in 0..4usize {
				grid.set(gr, gc, children[gr * 4 + gc].as_deref());
			}
		}

		let built = downsample(x, y, zoom, &grid);
		drop(children);

		match built {
			None => Ok(None),
			Some(tile) => Ok(Some(self.persist_and_cache(x, y, zoom, tile)?)),
		}
	}

	fn persist_and_cache(&mut self, x: u32, y: u32, zoom: u8, tile: Tile) -> Result<Rc<Tile>> {
		let bytes = tile.export().with_context(|| format!("exporting tile {zoom}/{x}/{y}"))?;
		terrain_core::write_tile(&self.config.base_dir, zoom, x, y, &bytes).with_context(|| format!("writing tile {zoom}/{x}/{y}"))?;
		let rc = self.cache.insert_tile(zoom, x, y, tile);
		if zoom == PREFETCH_ZOOM {
			self.cache.trim();
		}
		Ok(rc)
	}

	fn try_import(&self, x: u32, y: u32, zoom: u8) -> Result<Option<Tile>> {
		let Some(bytes) = terrain_core::read_tile(&self.config.base_dir, zoom, x, y)? else {
			return Ok(None);
		};
		match Tile::import(&bytes, x, y, zoom) {
			Ok(tile) => Ok(Some(tile)),
			Err(e) => {
				warn!("corrupt persisted tile {zoom}/{x}/{y}, rebuilding: {e:#}");
				Ok(None)
			}
		}
	}

	/// Resolves a tile at `(x, y, zoom)`, building it from sources or from its
	/// children if necessary. `Ok(None)` means the region is outside the build's
	/// bounding box or genuinely has no source coverage.
	pub fn get_terrain(&mut self, x: u32, y: u32, zoom: u8) -> Result<Option<Rc<Tile>>> {
		self.get_terrain_inner(x, y, zoom, None)
	}

	fn get_terrain_inner(&mut self, x: u32, y: u32, zoom: u8, inherited_mode: Option<SampleMode>) -> Result<Option<Rc<Tile>>> {
		let scale = 1u32 << zoom;
		if x >= scale || y >= scale || !self.in_region(x, y, zoom) {
			return Ok(None);
		}

		if let Some(tile) = self.cache.find_tile(zoom, x, y) {
			debug!("cache hit {zoom}/{x}/{y}");
			if zoom == PREFETCH_ZOOM {
				self.cache.trim();
			}
			return Ok(Some(tile));
		}

		let key = tile_key(zoom, x, y);
		if zoom <= PREFETCH_ZOOM && self.cache.is_null(&key) {
			return Ok(None);
		}

		if zoom <= PREFETCH_ZOOM {
			if let Some(tile) = self.try_import(x, y, zoom)? {
				return Ok(Some(self.cache.insert_tile(zoom, x, y, tile)));
			}
		}

		if zoom == FINE_ZOOM {
			return Ok(Some(self.build_fine(x, y, zoom, inherited_mode.unwrap_or(SampleMode::AOverB))?));
		}

		let mode_for_children = if zoom == PREFETCH_ZOOM {
			match self.prefetch(x, y, zoom)? {
				Some(mode) => Some(mode),
				None => {
					self.cache.mark_null(&key);
					return Ok(None);
				}
			}
		} else {
			inherited_mode
		};

		match self.build_coarse(x, y, zoom, mode_for_children)? {
			Some(tile) => Ok(Some(tile)),
			None => {
				if zoom <= PREFETCH_ZOOM {
					self.cache.mark_null(&key);
				}
				Ok(None)
			}
		}
	}
}
