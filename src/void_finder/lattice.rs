use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::void_finder::geometry::Position3D;
use crate::void_finder::grid_index::GridCell;

/// Regular lattice of trial hole centers covering the survey volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoleLattice {
	pub len_i: usize,  // Number of centers along X
	pub len_j: usize,  // Number of centers along Y
	pub len_k: usize,  // Number of centers along Z
	pub edge_length: f64,  // Spacing between centers in Mpc/h
	pub coord_min: Position3D,  // Minimum corner, aligned with the galaxy index
}

impl HoleLattice {
	pub fn new(shape: [usize; 3], edge_length: f64, coord_min: Position3D) -> Self {
		Self {
			len_i: shape[0],
			len_j: shape[1],
			len_k: shape[2],
			edge_length,
			coord_min,
		}
	}

	/// Lattice spanning the bounding box of the given positions.
	/// Returns `None` when there are no finite positions.
	pub fn from_positions(positions: &[Position3D], edge_length: f64) -> Option<Self> {
		let mut min = Position3D::new(f64::MAX, f64::MAX, f64::MAX);
		let mut max = Position3D::new(f64::MIN, f64::MIN, f64::MIN);
		let mut counted = 0usize;

		for p in positions {
			if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
				continue;
			}
			counted += 1;
			min = min.min(p);
			max = max.max(p);
		}

		if counted == 0 {
			return None;
		}

		Some(Self {
			len_i: calculate_dimension(min.x, max.x, edge_length),
			len_j: calculate_dimension(min.y, max.y, edge_length),
			len_k: calculate_dimension(min.z, max.z, edge_length),
			edge_length,
			coord_min: min,
		})
	}

	pub fn shape(&self) -> [usize; 3] {
		[self.len_i, self.len_j, self.len_k]
	}

	pub fn total_centers(&self) -> u64 {
		self.len_i as u64 * self.len_j as u64 * self.len_k as u64
	}

	/// Convert (i, j, k) to a row-major trial index
	#[inline]
	pub fn ijk_to_index(&self, i: usize, j: usize, k: usize) -> u64 {
		((i as u64 * self.len_j as u64) + j as u64) * self.len_k as u64 + k as u64
	}

	/// Convert a row-major trial index back to (i, j, k)
	#[inline]
	pub fn index_to_ijk(&self, index: u64) -> (usize, usize, usize) {
		let k = index % self.len_k as u64;
		let j = (index / self.len_k as u64) % self.len_j as u64;
		let i = index / (self.len_k as u64 * self.len_j as u64);
		(i as usize, j as usize, k as usize)
	}

	/// Lattice cell containing a point (may lie outside the lattice).
	#[inline]
	pub fn cell_of(&self, point: &Position3D) -> GridCell {
		GridCell::new(
			((point.x - self.coord_min.x) / self.edge_length).floor() as i32,
			((point.y - self.coord_min.y) / self.edge_length).floor() as i32,
			((point.z - self.coord_min.z) / self.edge_length).floor() as i32,
		)
	}

	/// Trial center of a row-major index: the middle of its lattice cell.
	pub fn center(&self, index: u64) -> Position3D {
		let (i, j, k) = self.index_to_ijk(index);
		self.coord_min
			+ Position3D::new(i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5) * self.edge_length
	}

	/// Lattice cell of a trial index.
	pub fn cell(&self, index: u64) -> GridCell {
		let (i, j, k) = self.index_to_ijk(index);
		GridCell::new(i as i32, j as i32, k as i32)
	}
}

/// Lattice cells that hold at least one wall galaxy. Trial centers in these
/// cells cannot seed a hole.
#[derive(Debug, Clone, Default)]
pub struct OccupiedCells {
	cells: HashSet<GridCell>,
}

impl OccupiedCells {
	pub fn from_positions(lattice: &HoleLattice, positions: &[Position3D]) -> Self {
		Self {
			cells: positions.iter().map(|p| lattice.cell_of(p)).collect(),
		}
	}

	#[inline]
	pub fn contains(&self, cell: &GridCell) -> bool {
		self.cells.contains(cell)
	}

	pub fn len(&self) -> usize {
		self.cells.len()
	}

	pub fn is_empty(&self) -> bool {
		self.cells.is_empty()
	}
}

fn calculate_dimension(min: f64, max: f64, edge_length: f64) -> usize {
	let span = (max - min) / edge_length;
	(span.ceil() as usize).max(1)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn row_major_round_trip() {
		let lattice = HoleLattice::new([3, 4, 5], 2.0, Position3D::ORIGIN);
		assert_eq!(lattice.total_centers(), 60);
		for index in 0..lattice.total_centers() {
			let (i, j, k) = lattice.index_to_ijk(index);
			assert_eq!(lattice.ijk_to_index(i, j, k), index);
		}
		assert_eq!(lattice.index_to_ijk(1), (0, 0, 1));
		assert_eq!(lattice.index_to_ijk(5), (0, 1, 0));
		assert_eq!(lattice.index_to_ijk(20), (1, 0, 0));
	}

	#[test]
	fn centers_sit_mid_cell() {
		let lattice = HoleLattice::new([2, 2, 2], 5.0, Position3D::new(-10.0, 0.0, 10.0));
		assert_eq!(lattice.center(0), Position3D::new(-7.5, 2.5, 12.5));
		assert_eq!(lattice.center(7), Position3D::new(-2.5, 7.5, 17.5));
		assert_eq!(lattice.cell_of(&lattice.center(7)), lattice.cell(7));
	}

	#[test]
	fn from_positions_spans_bounding_box() {
		let points = vec![Position3D::new(-3.0, 0.0, 1.0), Position3D::new(7.0, 2.0, 1.0)];
		let lattice = HoleLattice::from_positions(&points, 2.5).unwrap();
		assert_eq!(lattice.coord_min, Position3D::new(-3.0, 0.0, 1.0));
		assert_eq!(lattice.shape(), [4, 1, 1]);
		assert!(HoleLattice::from_positions(&[], 1.0).is_none());
	}

	#[test]
	fn occupied_cells_follow_wall_galaxies() {
		let lattice = HoleLattice::new([4, 4, 4], 1.0, Position3D::ORIGIN);
		let occupied = OccupiedCells::from_positions(&lattice, &[Position3D::new(1.5, 2.5, 0.2)]);
		assert!(occupied.contains(&GridCell::new(1, 2, 0)));
		assert!(!occupied.contains(&GridCell::new(0, 0, 0)));
		assert_eq!(occupied.len(), 1);
	}
}
