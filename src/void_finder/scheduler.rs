//! Parallel, resumable growth of holes over the whole trial-center lattice.

use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bitvec::vec::BitVec;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::void_finder::checkpoint::{self, CheckpointRecord, CheckpointWriter, RunFingerprint};
use crate::void_finder::config::VoidFinderConfig;
use crate::void_finder::error::Result;
use crate::void_finder::geometry::Sphere;
use crate::void_finder::grid_index::GridIndex;
use crate::void_finder::growth::{GrowthOutcome, HoleGrowthEngine, Rejection};
use crate::void_finder::lattice::{HoleLattice, OccupiedCells};
use crate::void_finder::mask::SurveyMask;
use crate::void_finder::reduce::{MaximalSphereReducer, Void};

/// Per-kind counts of rejected trial centers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectionCounts {
	pub center_outside_mask: u64,
	pub left_survey: u64,
	pub non_convergence: u64,
	pub no_wall_galaxy: u64,
	pub degenerate: u64,
	pub occupied_cell: u64,
}

impl RejectionCounts {
	pub fn record(&mut self, rejection: Rejection) {
		match rejection {
			Rejection::CenterOutsideMask => self.center_outside_mask += 1,
			Rejection::LeftSurvey => self.left_survey += 1,
			Rejection::NonConvergence => self.non_convergence += 1,
			Rejection::NoWallGalaxy => self.no_wall_galaxy += 1,
			Rejection::Degenerate => self.degenerate += 1,
			Rejection::OccupiedCell => self.occupied_cell += 1,
		}
	}

	pub fn total(&self) -> u64 {
		self.center_outside_mask
			+ self.left_survey
			+ self.non_convergence
			+ self.no_wall_galaxy
			+ self.degenerate
			+ self.occupied_cell
	}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
	pub total_centers: u64,
	/// Trial centers recovered from the checkpoint.
	pub resumed: u64,
	/// Trial centers grown in this run.
	pub processed: u64,
	pub accepted: u64,
	pub rejections: RejectionCounts,
	/// Most trial centers found no wall galaxy; the input is probably malformed.
	pub sparse_index_warning: bool,
	pub elapsed: Duration,
}

impl RunSummary {
	fn record(&mut self, outcome: &GrowthOutcome) {
		match outcome {
			GrowthOutcome::Accepted(_) => self.accepted += 1,
			GrowthOutcome::Rejected(rejection) => self.rejections.record(*rejection),
		}
	}

	pub fn completed(&self) -> u64 {
		self.resumed + self.processed
	}

	pub fn is_complete(&self) -> bool {
		self.completed() == self.total_centers
	}
}

/// Final tables of a finished run.
#[derive(Debug, Clone, Default)]
pub struct VoidCatalog {
	/// Accepted holes in trial-center order.
	pub candidates: Vec<Sphere>,
	/// Maximal spheres, largest first.
	pub maximal: Vec<Sphere>,
	pub voids: Vec<Void>,
	/// Void id of each maximal sphere.
	pub membership: Vec<usize>,
	pub summary: RunSummary,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
	Finished(VoidCatalog),
	/// Stopped early; the checkpoint holds everything completed so far.
	Halted(RunSummary),
}

struct BatchResult {
	records: Vec<CheckpointRecord>,
}

pub struct BatchScheduler<'a> {
	config: &'a VoidFinderConfig,
	lattice: HoleLattice,
	index: &'a GridIndex,
	mask: &'a SurveyMask,
	occupied: OccupiedCells,
	cancel: Arc<AtomicBool>,
}

impl<'a> BatchScheduler<'a> {
	pub fn new(
		config: &'a VoidFinderConfig,
		lattice: HoleLattice,
		index: &'a GridIndex,
		mask: &'a SurveyMask,
		occupied: OccupiedCells,
	) -> Self {
		Self {
			config,
			lattice,
			index,
			mask,
			occupied,
			cancel: Arc::new(AtomicBool::new(false)),
		}
	}

	/// Flag that stops dispatch once set; in-flight batches still complete.
	pub fn cancel_handle(&self) -> Arc<AtomicBool> {
		Arc::clone(&self.cancel)
	}

	/// Consecutive index ranges of `batch_size` trial centers, skipping
	/// batches that are already fully done.
	fn pending_batches(&self, completed: &BitVec) -> Vec<Range<u64>> {
		let total = self.lattice.total_centers();
		let size = self.config.batch_size as u64;
		(0..total)
			.step_by(self.config.batch_size)
			.map(|start| start..(start + size).min(total))
			.filter(|batch| batch.clone().any(|i| !completed[i as usize]))
			.collect()
	}

	fn grow_trial(&self, engine: &HoleGrowthEngine<'_>, trial_index: u64) -> GrowthOutcome {
		if self.config.skip_occupied_cells && self.occupied.contains(&self.lattice.cell(trial_index)) {
			return GrowthOutcome::Rejected(Rejection::OccupiedCell);
		}
		engine.grow(self.lattice.center(trial_index))
	}

	fn worker(&self, jobs: &Mutex<mpsc::Receiver<Range<u64>>>, results: mpsc::Sender<BatchResult>, completed: &BitVec) {
		let engine = HoleGrowthEngine::new(self.index, self.mask, self.config);
		loop {
			if self.cancel.load(Ordering::Relaxed) {
				break;
			}
			let job = match jobs.lock() {
				Ok(queue) => queue.recv(),
				Err(_) => break,
			};
			let Ok(batch) = job else {
				break;
			};
			let records = batch
				.filter(|&i| !completed[i as usize])
				.map(|trial_index| CheckpointRecord {
					trial_index,
					outcome: self.grow_trial(&engine, trial_index),
				})
				.collect();
			if results.send(BatchResult { records }).is_err() {
				break;
			}
		}
	}

	/// Grow every trial center not already in the checkpoint, then reduce.
	///
	/// With `use_start_checkpoint` and an existing file at `checkpoint_path`
	/// the run resumes from it; otherwise a new checkpoint replaces it.
	pub fn run(&self, checkpoint_path: Option<&Path>) -> Result<RunOutcome> {
		self.config.validate()?;
		let start_time = Instant::now();
		let total = self.lattice.total_centers();

		let mut summary = RunSummary {
			total_centers: total,
			..Default::default()
		};
		let mut candidates: Vec<(u64, Sphere)> = Vec::new();

		let fingerprint = RunFingerprint::new(self.lattice, self.config, self.index, self.mask);
		let (completed, mut writer) = match checkpoint_path {
			Some(path) if self.config.use_start_checkpoint && path.exists() => {
				let state = checkpoint::replay(path, &fingerprint)?;
				let writer = CheckpointWriter::resume(path, &state)?;
				for record in &state.records {
					summary.record(&record.outcome);
					if let GrowthOutcome::Accepted(sphere) = record.outcome {
						candidates.push((record.trial_index, sphere));
					}
				}
				summary.resumed = state.records.len() as u64;
				(state.completed, Some(writer))
			}
			Some(path) => (
				BitVec::repeat(false, total as usize),
				Some(CheckpointWriter::create(path, &fingerprint)?),
			),
			None => (BitVec::repeat(false, total as usize), None),
		};

		let batches = self.pending_batches(&completed);
		let workers = self.config.workers().min(batches.len()).max(1);
		info!(
			"Growing holes from {} trial centers ({} resumed) in {} batches on {} workers",
			total,
			summary.resumed,
			batches.len(),
			workers
		);

		let pb = progress_bar(total, summary.resumed, self.config.verbosity > 0);
		let (job_tx, job_rx) = mpsc::channel::<Range<u64>>();
		for batch in batches {
			// The receiver is alive until the scope below ends.
			let _ = job_tx.send(batch);
		}
		drop(job_tx);
		let jobs = Mutex::new(job_rx);
		let (result_tx, result_rx) = mpsc::channel::<BatchResult>();

		let mut pending: Vec<CheckpointRecord> = Vec::new();
		let mut last_print = Instant::now();
		let run_result: Result<()> = thread::scope(|scope| {
			for _ in 0..workers {
				let results = result_tx.clone();
				let jobs = &jobs;
				let completed = &completed;
				scope.spawn(move || self.worker(jobs, results, completed));
			}
			drop(result_tx);

			for batch in result_rx.iter() {
				let done = batch.records.len() as u64;
				for record in &batch.records {
					summary.record(&record.outcome);
					if let GrowthOutcome::Accepted(sphere) = record.outcome {
						candidates.push((record.trial_index, sphere));
					}
				}
				summary.processed += done;
				pending.extend(batch.records);
				pb.inc(done);

				if pending.len() >= self.config.save_after {
					if let Some(writer) = writer.as_mut() {
						if let Err(e) = writer.append(&pending) {
							self.cancel.store(true, Ordering::Relaxed);
							return Err(e);
						}
					}
					pending.clear();
				}

				if last_print.elapsed() >= self.config.print_after {
					info!(
						"Processed {} of {} trial centers, {} holes so far",
						summary.completed(),
						total,
						candidates.len()
					);
					last_print = Instant::now();
				}

				if let Some(limit) = self.config.max_centers_per_run {
					if summary.processed >= limit {
						self.cancel.store(true, Ordering::Relaxed);
					}
				}
			}
			Ok(())
		});
		run_result?;

		if let Some(writer) = writer.as_mut() {
			writer.append(&pending)?;
		}
		pb.finish_and_clear();
		summary.elapsed = start_time.elapsed();

		let attempted = summary.completed();
		if attempted > 0 && summary.rejections.no_wall_galaxy * 2 > attempted {
			summary.sparse_index_warning = true;
			warn!(
				"{} of {} trial centers found no wall galaxy; check the wall galaxy input",
				summary.rejections.no_wall_galaxy, attempted
			);
		}

		if !summary.is_complete() {
			info!(
				"Halted after {} of {} trial centers in {:.2} s",
				summary.completed(),
				total,
				summary.elapsed.as_secs_f64()
			);
			return Ok(RunOutcome::Halted(summary));
		}

		candidates.sort_by_key(|&(index, _)| index);
		let candidates: Vec<Sphere> = candidates.into_iter().map(|(_, sphere)| sphere).collect();
		let reduction = MaximalSphereReducer::new(self.config.overlap, self.config.min_maximal_radius).reduce(&candidates);
		info!(
			"Found {} holes, {} maximal spheres, {} voids in {:.2} s",
			candidates.len(),
			reduction.maximal.len(),
			reduction.voids.len(),
			start_time.elapsed().as_secs_f64()
		);

		Ok(RunOutcome::Finished(VoidCatalog {
			candidates,
			maximal: reduction.maximal,
			voids: reduction.voids,
			membership: reduction.membership,
			summary,
		}))
	}
}

fn progress_bar(total: u64, position: u64, visible: bool) -> ProgressBar {
	let pb = if visible {
		ProgressBar::new(total)
	} else {
		ProgressBar::hidden()
	};
	if let Ok(style) = ProgressStyle::default_bar().template("Growing Holes: [{bar:40.cyan/blue}] {pos}/{len} ({eta})") {
		pb.set_style(style.progress_chars("#>-"));
	}
	pb.set_position(position);
	pb
}
