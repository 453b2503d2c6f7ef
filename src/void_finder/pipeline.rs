use std::path::PathBuf;

use tracing::info;

use crate::void_finder::config::VoidFinderConfig;
use crate::void_finder::error::{Result, VoidError};
use crate::void_finder::geometry::Position3D;
use crate::void_finder::grid_index::GridIndex;
use crate::void_finder::lattice::{HoleLattice, OccupiedCells};
use crate::void_finder::mask::SurveyMask;
use crate::void_finder::output;
use crate::void_finder::scheduler::{BatchScheduler, RunOutcome};

/// Where a run writes its tables and checkpoint.
#[derive(Debug, Clone, Default)]
pub struct OutputPaths {
	pub maximal_spheres: PathBuf,
	pub void_table: PathBuf,
	/// All accepted holes before reduction.
	pub candidates: Option<PathBuf>,
	pub checkpoint: Option<PathBuf>,
}

/// Find voids among `wall` galaxies inside `mask`.
///
/// The lattice defaults to the bounding box of all galaxies at
/// `hole_grid_edge_length` spacing. Tables are written only when the run
/// finishes; a halted run leaves its progress in the checkpoint.
pub fn find_voids(
	wall: &[Position3D],
	field: &[Position3D],
	mask: &SurveyMask,
	lattice: Option<HoleLattice>,
	config: &VoidFinderConfig,
	paths: &OutputPaths,
) -> Result<RunOutcome> {
	config.validate()?;
	if wall.is_empty() {
		return Err(VoidError::InvalidInput("no wall galaxies".to_string()));
	}

	let lattice = match lattice {
		Some(lattice) => lattice,
		None => {
			let all: Vec<Position3D> = wall.iter().chain(field).copied().collect();
			HoleLattice::from_positions(&all, config.hole_grid_edge_length)
				.ok_or_else(|| VoidError::InvalidInput("galaxy positions are not finite".to_string()))?
		}
	};

	let span = lattice.shape().map(|n| n as f64 * lattice.edge_length);
	let volume = span[0] * span[1] * span[2];
	let cell_edge = config.galaxy_cell_edge(volume, wall.len());
	let index = GridIndex::from_positions(wall, cell_edge, lattice.coord_min);
	let occupied = if config.skip_occupied_cells {
		OccupiedCells::from_positions(&lattice, wall)
	} else {
		OccupiedCells::default()
	};
	info!(
		"Indexed {} wall galaxies ({} field ignored) in {} cells of {:.2} Mpc/h; lattice {:?} at {:.2} Mpc/h",
		index.len(),
		field.len(),
		index.occupied_cell_count(),
		cell_edge,
		lattice.shape(),
		lattice.edge_length
	);

	let scheduler = BatchScheduler::new(config, lattice, &index, mask, occupied);
	let outcome = scheduler.run(paths.checkpoint.as_deref())?;

	if let RunOutcome::Finished(catalog) = &outcome {
		output::write_maximal_spheres(catalog, &paths.maximal_spheres)?;
		output::write_void_table(catalog, &paths.void_table)?;
		if let Some(path) = &paths.candidates {
			output::write_sphere_table(&catalog.candidates, path)?;
		}
	}
	Ok(outcome)
}
