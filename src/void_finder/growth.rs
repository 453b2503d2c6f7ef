//! Growth of a single empty sphere from a trial center.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::void_finder::config::VoidFinderConfig;
use crate::void_finder::geometry::{Position3D, Sphere};
use crate::void_finder::grid_index::GridIndex;
use crate::void_finder::mask::SurveyMask;

/// Why a trial center produced no sphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rejection {
	/// The trial center itself lies outside the mask.
	CenterOutsideMask,
	/// The sphere or its center left the survey while growing.
	LeftSurvey,
	/// Growth did not settle within the iteration cap.
	NonConvergence,
	/// No wall galaxy bounds the sphere.
	NoWallGalaxy,
	/// The trial center coincides with a wall galaxy.
	Degenerate,
	/// The trial center's lattice cell holds a wall galaxy.
	OccupiedCell,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GrowthOutcome {
	Accepted(Sphere),
	Rejected(Rejection),
}

impl GrowthOutcome {
	pub fn sphere(&self) -> Option<Sphere> {
		match self {
			GrowthOutcome::Accepted(sphere) => Some(*sphere),
			GrowthOutcome::Rejected(_) => None,
		}
	}
}

/// Surface probes: the 26 neighbour directions of a cube, normalized.
fn probe_directions() -> [Position3D; 26] {
	let mut dirs = [Position3D::ORIGIN; 26];
	let mut n = 0;
	for dx in -1i32..=1 {
		for dy in -1i32..=1 {
			for dz in -1i32..=1 {
				if dx == 0 && dy == 0 && dz == 0 {
					continue;
				}
				let d = Position3D::new(dx as f64, dy as f64, dz as f64);
				dirs[n] = d * (1.0 / d.norm());
				n += 1;
			}
		}
	}
	dirs
}

/// Grows empty spheres against a shared, read-only index and mask.
pub struct HoleGrowthEngine<'a> {
	index: &'a GridIndex,
	mask: &'a SurveyMask,
	step: f64,
	tolerance: f64,
	max_iterations: usize,
	search_radius: Option<f64>,
	probes: [Position3D; 26],
}

impl<'a> HoleGrowthEngine<'a> {
	pub fn new(index: &'a GridIndex, mask: &'a SurveyMask, config: &VoidFinderConfig) -> Self {
		Self {
			index,
			mask,
			step: config.hole_center_iter_dist,
			tolerance: config.growth_tolerance,
			max_iterations: config.max_growth_iterations,
			search_radius: config.max_search_radius,
			probes: probe_directions(),
		}
	}

	/// True if the whole sphere sits inside the radial limits and its center and
	/// surface probes fall in observed angular bins.
	pub fn sphere_within_survey(&self, sphere: &Sphere) -> bool {
		let limits = self.mask.limits();
		let r = sphere.center.norm();
		if (r - sphere.radius).max(0.0) < limits.min || r + sphere.radius > limits.max {
			return false;
		}
		if !self.mask.angular_contains(&sphere.center) {
			return false;
		}
		self.probes
			.iter()
			.all(|dir| self.mask.angular_contains(&(sphere.center + *dir * sphere.radius)))
	}

	/// Grow one sphere from `trial_center`.
	///
	/// Each step moves the center `hole_center_iter_dist` straight away from its
	/// current nearest wall galaxy and re-measures. Growth ends at the last
	/// center whose nearest-galaxy distance still increased by more than the
	/// tolerance, so the returned radius is exactly the distance to the nearest
	/// wall galaxy and the interior is empty.
	pub fn grow(&self, trial_center: Position3D) -> GrowthOutcome {
		if !self.mask.accepts(&trial_center) {
			return GrowthOutcome::Rejected(Rejection::CenterOutsideMask);
		}
		let Some(mut nearest) = self.index.nearest_wall_galaxy(&trial_center, self.search_radius) else {
			return GrowthOutcome::Rejected(Rejection::NoWallGalaxy);
		};
		if nearest.distance == 0.0 {
			return GrowthOutcome::Rejected(Rejection::Degenerate);
		}
		let mut sphere = Sphere::new(trial_center, nearest.distance);
		if !self.sphere_within_survey(&sphere) {
			return GrowthOutcome::Rejected(Rejection::LeftSurvey);
		}

		for _ in 0..self.max_iterations {
			let away = sphere.center - nearest.position;
			let direction = away * (1.0 / away.norm());
			let center = sphere.center + direction * self.step;
			if !self.mask.accepts(&center) {
				return GrowthOutcome::Rejected(Rejection::LeftSurvey);
			}
			let Some(next) = self.index.nearest_wall_galaxy(&center, self.search_radius) else {
				return GrowthOutcome::Rejected(Rejection::NoWallGalaxy);
			};
			if next.distance <= sphere.radius + self.tolerance {
				return GrowthOutcome::Accepted(sphere);
			}
			let grown = Sphere::new(center, next.distance);
			if !self.sphere_within_survey(&grown) {
				return GrowthOutcome::Rejected(Rejection::LeftSurvey);
			}
			sphere = grown;
			nearest = next;
		}

		debug!(
			"Hole at ({:.3}, {:.3}, {:.3}) did not converge in {} steps",
			trial_center.x, trial_center.y, trial_center.z, self.max_iterations
		);
		GrowthOutcome::Rejected(Rejection::NonConvergence)
	}
}
