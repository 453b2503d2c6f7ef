use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::void_finder::error::{Result, VoidError};

/// Rule deciding whether two maximal spheres belong to the same void.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OverlapCriterion {
	/// Centers closer than `fraction * (r1 + r2)`.
	CenterDistance { fraction: f64 },
	/// Shared lens volume above `fraction` of the smaller sphere's volume.
	VolumeFraction { fraction: f64 },
}

impl Default for OverlapCriterion {
	fn default() -> Self {
		OverlapCriterion::VolumeFraction { fraction: 0.1 }
	}
}

/// Tunables for a void finding run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoidFinderConfig {
	/// Spacing of the trial-center lattice (Mpc/h).
	pub hole_grid_edge_length: f64,
	/// Cell edge of the galaxy index; derived from galaxy density when `None`.
	pub galaxy_map_grid_edge_length: Option<f64>,
	/// Distance a hole center moves per growth step.
	pub hole_center_iter_dist: f64,
	pub max_growth_iterations: usize,
	/// Minimum radius gain for a growth step to count.
	pub growth_tolerance: f64,
	/// Give up on nearest-galaxy searches beyond this distance.
	pub max_search_radius: Option<f64>,
	/// Trial centers per worker job.
	pub batch_size: usize,
	/// Completed trial centers between checkpoint writes.
	pub save_after: usize,
	pub use_start_checkpoint: bool,
	/// Worker threads; one less than available parallelism when `None`.
	pub num_workers: Option<usize>,
	/// Interval between progress log lines.
	pub print_after: Duration,
	pub verbosity: u8,
	/// Skip trial centers whose lattice cell holds a wall galaxy.
	pub skip_occupied_cells: bool,
	/// Candidates at or below this radius never become maximal spheres.
	pub min_maximal_radius: f64,
	pub overlap: OverlapCriterion,
	/// Stop after this many trial centers complete in one run.
	pub max_centers_per_run: Option<u64>,
}

impl Default for VoidFinderConfig {
	fn default() -> Self {
		Self {
			hole_grid_edge_length: 5.0,
			galaxy_map_grid_edge_length: None,
			hole_center_iter_dist: 1.0,
			max_growth_iterations: 1000,
			growth_tolerance: 1e-6,
			max_search_radius: None,
			batch_size: 10_000,
			save_after: 50_000,
			use_start_checkpoint: false,
			num_workers: None,
			print_after: Duration::from_secs(5),
			verbosity: 0,
			skip_occupied_cells: true,
			min_maximal_radius: 0.0,
			overlap: OverlapCriterion::default(),
			max_centers_per_run: None,
		}
	}
}

impl VoidFinderConfig {
	pub fn validate(&self) -> Result<()> {
		let positive = |name: &str, value: f64| {
			if value.is_finite() && value > 0.0 {
				Ok(())
			} else {
				Err(VoidError::InvalidConfig(format!("{name} must be positive, got {value}")))
			}
		};
		positive("hole_grid_edge_length", self.hole_grid_edge_length)?;
		positive("hole_center_iter_dist", self.hole_center_iter_dist)?;
		if let Some(edge) = self.galaxy_map_grid_edge_length {
			positive("galaxy_map_grid_edge_length", edge)?;
		}
		if let Some(radius) = self.max_search_radius {
			positive("max_search_radius", radius)?;
		}
		if self.growth_tolerance < 0.0 || !self.growth_tolerance.is_finite() {
			return Err(VoidError::InvalidConfig("growth_tolerance must be >= 0".to_string()));
		}
		if self.max_growth_iterations == 0 {
			return Err(VoidError::InvalidConfig("max_growth_iterations must be > 0".to_string()));
		}
		if self.batch_size == 0 {
			return Err(VoidError::InvalidConfig("batch_size must be > 0".to_string()));
		}
		if self.save_after == 0 {
			return Err(VoidError::InvalidConfig("save_after must be > 0".to_string()));
		}
		if self.num_workers == Some(0) {
			return Err(VoidError::InvalidConfig("num_workers must be > 0".to_string()));
		}
		if self.min_maximal_radius < 0.0 {
			return Err(VoidError::InvalidConfig("min_maximal_radius must be >= 0".to_string()));
		}
		let fraction = match self.overlap {
			OverlapCriterion::CenterDistance { fraction } | OverlapCriterion::VolumeFraction { fraction } => fraction,
		};
		if !(fraction > 0.0 && fraction <= 1.0) {
			return Err(VoidError::InvalidConfig(format!("overlap fraction must be in (0, 1], got {fraction}")));
		}
		Ok(())
	}

	/// Worker count actually used for a run.
	pub fn workers(&self) -> usize {
		self.num_workers.unwrap_or_else(|| {
			std::thread::available_parallelism()
				.map(|n| n.get().saturating_sub(1))
				.unwrap_or(1)
				.max(1)
		})
	}

	/// Galaxy index cell edge: three mean inter-galaxy spacings over the
	/// bounding volume unless set explicitly.
	pub fn galaxy_cell_edge(&self, bbox_volume: f64, wall_count: usize) -> f64 {
		if let Some(edge) = self.galaxy_map_grid_edge_length {
			return edge;
		}
		if wall_count == 0 || !(bbox_volume > 0.0) {
			return self.hole_grid_edge_length.max(1.0);
		}
		(3.0 * (bbox_volume / wall_count as f64).cbrt()).max(1.0)
	}
}
