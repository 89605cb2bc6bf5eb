//! The parallel fine-level pipeline: a fixed worker pool samples finest-level
//! tiles from a column-major sliding window of source raster neighborhoods.
//!
//! This runs independently of the single-threaded [`crate::driver::Driver`]
//! recursion — it shares the fine-level sampler (`crate::sampler`) but not the
//! `Rc`-based cache, since workers need thread-safe shared ownership of the
//! raster neighborhood (`Arc`, not `Rc`), per the concurrency model.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use log::{error, info};

use terrain_core::{coord2tile, write_tile, Family, SourceRaster, FINE_ZOOM};

use crate::config::BuildConfig;
use crate::sampler::{sample_fine_tile, Neighborhood, SampleMode};
use crate::source_provider::SourceProvider;

/// One fine-level tile to sample and export.
#[derive(Debug, Clone, Copy)]
pub struct Job {
	pub x: u32,
	pub y: u32,
	pub mode: SampleMode,
}

/// An immutable snapshot of the 3x3 raster neighborhood active for a band of
/// jobs; shared read-only across workers via `Arc`.
#[derive(Default)]
pub struct NeighborhoodSnapshot {
	a: [[Option<Arc<SourceRaster>>; 3]; 3],
	b: [[Option<Arc<SourceRaster>>; 3]; 3],
}

impl NeighborhoodSnapshot {
	fn set(&mut self, family: Family, drow: i32, dcol: i32, raster: Option<Arc<SourceRaster>>) {
		let slots = match family {
			Family::A => &mut self.a,
			Family::B => &mut self.b,
		};
		slots[(drow + 1) as usize][(dcol + 1) as usize] = raster;
	}

	fn borrowed(&self) -> (Neighborhood<'_>, Neighborhood<'_>) {
		let mut na = Neighborhood::new();
		let mut nb = Neighborhood::new();
		for drow in -1i32..=1 {
			for dcol in -1i32..=1 {
				na.set(drow, dcol, self.a[(drow + 1) as usize][(dcol + 1) as usize].as_deref());
				nb.set(drow, dcol, self.b[(drow + 1) as usize][(dcol + 1) as usize].as_deref());
			}
		}
		(na, nb)
	}
}

struct WorkItem {
	job: Job,
	neighborhood: Arc<NeighborhoodSnapshot>,
}

/// The fixed worker pool. `enqueue` never blocks past the bounded queue's
/// capacity; callers are expected to call `drain` between bands, per the
/// band-synchronous ordering guarantee in the concurrency model.
pub struct Pipeline {
	tx: Option<SyncSender<WorkItem>>,
	handles: Vec<JoinHandle<()>>,
	inflight: Arc<Mutex<usize>>,
	failed: Arc<AtomicBool>,
}

impl Pipeline {
	#[must_use]
	pub fn start(config: &BuildConfig) -> Pipeline {
		let (tx, rx) = sync_channel::<WorkItem>(config.worker_count * 2);
		let rx = Arc::new(Mutex::new(rx));
		let failed = Arc::new(AtomicBool::new(false));
		let inflight = Arc::new(Mutex::new(0usize));

		let mut handles = Vec::with_capacity(config.worker_count);
		for id in 0..config.worker_count {
			let rx = Arc::clone(&rx);
			let failed = Arc::clone(&failed);
			let inflight = Arc::clone(&inflight);
			let base_dir = config.base_dir.clone();
			handles.push(std::thread::spawn(move || worker_loop(id, &rx, &failed, &inflight, &base_dir)));
		}

		Pipeline { tx: Some(tx), handles, inflight, failed }
	}

	/// Submits one job, tagged with the raster neighborhood it should be
	/// sampled against.
	pub fn enqueue(&self, job: Job, neighborhood: &Arc<NeighborhoodSnapshot>) {
		*self.inflight.lock().expect("inflight mutex poisoned") += 1;
		let tx = self.tx.as_ref().expect("enqueue called after shutdown");
		let _ = tx.send(WorkItem { job, neighborhood: Arc::clone(neighborhood) });
	}

	/// Blocks until every job enqueued so far has been picked up and finished
	/// (successfully or not). Matches the "wait for the pool to drain before
	/// advancing" rule between raster-neighborhood bands.
	pub fn drain(&self) {
		loop {
			if *self.inflight.lock().expect("inflight mutex poisoned") == 0 {
				return;
			}
			std::thread::yield_now();
		}
	}

	#[must_use]
	pub fn has_failed(&self) -> bool {
		self.failed.load(Ordering::SeqCst)
	}

	/// Closes the job queue and joins every worker thread.
	pub fn shutdown(mut self) {
		self.tx.take();
		for handle in self.handles.drain(..) {
			let _ = handle.join();
		}
	}
}

fn worker_loop(id: usize, rx: &Arc<Mutex<Receiver<WorkItem>>>, failed: &Arc<AtomicBool>, inflight: &Arc<Mutex<usize>>, base_dir: &Path) {
	loop {
		let received = rx.lock().expect("job queue mutex poisoned").recv();
		let Ok(item) = received else { break };

		if !failed.load(Ordering::SeqCst) {
			if let Err(e) = run_job(&item, base_dir) {
				error!("worker {id}: job ({}, {}) failed: {e:#}", item.job.x, item.job.y);
				failed.store(true, Ordering::SeqCst);
			}
		}

		*inflight.lock().expect("inflight mutex poisoned") -= 1;
	}
}

fn run_job(item: &WorkItem, base_dir: &Path) -> Result<()> {
	let (na, nb) = item.neighborhood.borrowed();
	let tile = sample_fine_tile(item.job.x, item.job.y, FINE_ZOOM, &na, &nb, item.job.mode);
	let bytes = tile.export().context("exporting fine-level tile")?;
	write_tile(base_dir, FINE_ZOOM, item.job.x, item.job.y, &bytes).context("writing fine-level tile")?;
	Ok(())
}

/// Drives the column-major sliding window of raster neighborhoods over a
/// latitude band, enqueueing every fine-level tile whose origin falls inside
/// the current centre column, and waiting for the pool to drain before each
/// advance.
pub struct BandRunner<'p, P: SourceProvider> {
	provider: &'p P,
	columns: [Option<i32>; 3],
	// Indexed `[family][row][col]`; row index is `drow + 1` (0 = north, 1 =
	// the band's own latitude, 2 = south), matching `Driver`'s prefetch
	// convention so the two neighborhoods agree on cell layout.
	loaded: [[[Option<Arc<SourceRaster>>; 3]; 3]; 2],
}

impl<'p, P: SourceProvider> BandRunner<'p, P> {
	#[must_use]
	pub fn new(provider: &'p P) -> Self {
		BandRunner { provider, columns: [None, None, None], loaded: Default::default() }
	}

	fn load_column(&self, family: Family, lat: i32, lon: i32) -> Result<Option<Arc<SourceRaster>>> {
		let raster = match family {
			Family::A => self.provider.load_a(lat, lon),
			Family::B => self.provider.load_b(lat, lon),
		}
		.with_context(|| format!("loading family {family:?} column at ({lat}, {lon})"))?;
		Ok(raster.map(Arc::new))
	}

	/// Shifts the window so its centre column becomes `lon`, loading whichever
	/// adjacent columns are not already resident (at all three latitude rows:
	/// north, centre, south) and dropping the ones that fall out of range
	/// (their `Arc`s simply drop once no job still holds one).
	pub fn advance_to(&mut self, lat: i32, lon: i32) -> Result<()> {
		let wanted = [lon - 1, lon, lon + 1];
		let mut new_loaded: [[[Option<Arc<SourceRaster>>; 3]; 3]; 2] = Default::default();

		for (col, &want) in wanted.iter().enumerate() {
			let reuse_col = self.columns.iter().position(|c| *c == Some(want));
			for (row, drow) in [-1i32, 0, 1].into_iter().enumerate() {
				if let Some(existing_col) = reuse_col {
					new_loaded[0][row][col] = self.loaded[0][row][existing_col].clone();
					new_loaded[1][row][col] = self.loaded[1][row][existing_col].clone();
				} else {
					new_loaded[0][row][col] = self.load_column(Family::A, lat - drow, want)?;
					new_loaded[1][row][col] = self.load_column(Family::B, lat - drow, want)?;
				}
			}
		}

		self.columns = wanted.map(Some);
		self.loaded = new_loaded;
		Ok(())
	}

	/// Builds a 3x3 neighborhood snapshot around the current centre cell from
	/// the resident rows and columns.
	#[must_use]
	pub fn snapshot(&self) -> Arc<NeighborhoodSnapshot> {
		let mut snap = NeighborhoodSnapshot::default();
		for drow in -1i32..=1 {
			let row = (drow + 1) as usize;
			for dcol in -1i32..=1 {
				let col = (dcol + 1) as usize;
				snap.set(Family::A, drow, dcol, self.loaded[0][row][col].clone());
				snap.set(Family::B, drow, dcol, self.loaded[1][row][col].clone());
			}
		}
		Arc::new(snap)
	}

	/// Computes the fine-level tile x/y range whose origin falls inside the
	/// centre cell's bounding box, clipped to the world extent at `zoom`.
	#[must_use]
	pub fn jobs_for_centre_column(&self, mode: SampleMode) -> Vec<Job> {
		let Some(raster) = self.loaded[0][1][1].clone().or_else(|| self.loaded[1][1][1].clone()) else {
			return Vec::new();
		};
		let scale = 1u32 << FINE_ZOOM;
		let (x0, y0) = coord2tile(raster.lat_t, raster.lon_l, FINE_ZOOM);
		let (x1, y1) = coord2tile(raster.lat_b, raster.lon_r, FINE_ZOOM);
		let x_lo = (x0.floor().max(0.0) as u32).min(scale - 1);
		let x_hi = (x1.ceil().max(0.0) as u32).min(scale - 1);
		let y_lo = (y0.floor().max(0.0) as u32).min(scale - 1);
		let y_hi = (y1.ceil().max(0.0) as u32).min(scale - 1);

		let mut jobs = Vec::new();
		for y in y_lo..=y_hi {
			for x in x_lo..=x_hi {
				jobs.push(Job { x, y, mode });
			}
		}
		jobs
	}
}

/// Runs the fine-level pipeline across one latitude band's longitude range.
pub fn run_band<P: SourceProvider>(config: &BuildConfig, provider: &P, lat: i32, lon_range: std::ops::RangeInclusive<i32>, mode: SampleMode) -> Result<()> {
	let pipeline = Pipeline::start(config);
	let mut band = BandRunner::new(provider);

	for lon in lon_range {
		band.advance_to(lat, lon)?;
		let snapshot = band.snapshot();
		let jobs = band.jobs_for_centre_column(mode);
		info!("band lat={lat} lon={lon}: {} fine tiles queued", jobs.len());
		for job in jobs {
			pipeline.enqueue(job, &snapshot);
		}
		pipeline.drain();
		if pipeline.has_failed() {
			pipeline.shutdown();
			anyhow::bail!("fine-level pipeline failed in band lat={lat} lon={lon}");
		}
	}

	pipeline.shutdown();
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	struct StubProvider {
		rasters: HashMap<(i32, i32), SourceRaster>,
	}

	impl SourceProvider for StubProvider {
		fn load_a(&self, lat: i32, lon: i32) -> Result<Option<SourceRaster>> {
			Ok(self.rasters.get(&(lat, lon)).cloned())
		}

		fn load_b(&self, _lat: i32, _lon: i32) -> Result<Option<SourceRaster>> {
			Ok(None)
		}
	}

	fn flat_raster(lat: i32, lon: i32, value: i16) -> SourceRaster {
		SourceRaster {
			family: Family::A,
			origin_lat: lat,
			origin_lon: lon,
			lat_t: f64::from(lat + 1),
			lon_l: f64::from(lon),
			lat_b: f64::from(lat),
			lon_r: f64::from(lon + 1),
			rows: 4,
			cols: 4,
			heights: vec![value; 16],
		}
	}

	#[test]
	fn band_runner_reuses_columns_already_in_the_window() {
		let mut rasters = HashMap::new();
		for lon in -1..=2 {
			rasters.insert((0, lon), flat_raster(0, lon, lon as i16));
		}
		let provider = StubProvider { rasters };
		let mut band = BandRunner::new(&provider);

		band.advance_to(0, 0).unwrap();
		let before = band.loaded[0][1][1].as_ref().map(Arc::as_ptr);
		band.advance_to(0, 1).unwrap();
		let after = band.loaded[0][1][0].as_ref().map(Arc::as_ptr);
		// the old centre column (lon 0) should now be the new left column,
		// reused rather than reloaded.
		assert_eq!(before, after);
	}

	#[test]
	fn jobs_for_centre_column_cover_the_rasters_extent() {
		let mut rasters = HashMap::new();
		rasters.insert((0, 0), flat_raster(0, 0, 1));
		rasters.insert((0, -1), flat_raster(0, -1, 1));
		rasters.insert((0, 1), flat_raster(0, 1, 1));
		let provider = StubProvider { rasters };
		let mut band = BandRunner::new(&provider);
		band.advance_to(0, 0).unwrap();
		let jobs = band.jobs_for_centre_column(SampleMode::AOnly);
		assert!(!jobs.is_empty());
	}

	#[test]
	fn pipeline_processes_enqueued_job_and_exports_a_tile() {
		let dir = tempfile::tempdir().unwrap();
		let config = BuildConfig::new(dir.path().to_path_buf(), (90.0, -180.0, -90.0, 180.0));
		let pipeline = Pipeline::start(&config);

		let mut snap = NeighborhoodSnapshot::default();
		snap.set(Family::A, 0, 0, Some(Arc::new(flat_raster(0, 0, 42))));
		let snapshot = Arc::new(snap);

		let (x, y) = coord2tile(0.5, 0.5, FINE_ZOOM);
		pipeline.enqueue(Job { x: x as u32, y: y as u32, mode: SampleMode::AOnly }, &snapshot);
		pipeline.drain();
		assert!(!pipeline.has_failed());
		pipeline.shutdown();

		let bytes = terrain_core::read_tile(dir.path(), FINE_ZOOM, x as u32, y as u32).unwrap();
		assert!(bytes.is_some());
	}
}
