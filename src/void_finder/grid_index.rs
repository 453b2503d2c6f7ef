//! Uniform linked-cell index over wall galaxy positions.
//!
//! Every galaxy lands in the cell `floor((p - coord_min) / edge)`. A cell
//! stores only the arena index of its most recent occupant, and every
//! occupant records the previous one, so membership lists are recovered by
//! walking the chain without any per-cell allocation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::void_finder::geometry::{Galaxy, Position3D};

const END_OF_CHAIN: usize = usize::MAX;

/// Integer cell coordinate in the partition of space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
	pub i: i32,
	pub j: i32,
	pub k: i32,
}

impl GridCell {
	pub const fn new(i: i32, j: i32, k: i32) -> Self {
		Self { i, j, k }
	}

	#[inline]
	fn axis(&self, axis: usize) -> i32 {
		match axis {
			0 => self.i,
			1 => self.j,
			_ => self.k,
		}
	}
}

/// Result of a nearest-neighbour query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
	/// Index into the slice the index was built from.
	pub index: usize,
	pub position: Position3D,
	pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct GridIndex {
	edge: f64,
	coord_min: Position3D,
	positions: Vec<Position3D>,
	source: Vec<usize>,
	next: Vec<usize>,
	heads: HashMap<GridCell, usize>,
	lo: GridCell,
	hi: GridCell,
}

impl GridIndex {
	/// Empty index; fill it with [`GridIndex::push`].
	pub fn new(cell_edge_length: f64, coord_min: Position3D) -> Self {
		Self {
			edge: cell_edge_length,
			coord_min,
			positions: Vec::new(),
			source: Vec::new(),
			next: Vec::new(),
			heads: HashMap::new(),
			lo: GridCell::new(i32::MAX, i32::MAX, i32::MAX),
			hi: GridCell::new(i32::MIN, i32::MIN, i32::MIN),
		}
	}

	/// Index the wall galaxies of `galaxies`; field galaxies are skipped but
	/// reported indices still refer to positions in `galaxies`.
	pub fn build(galaxies: &[Galaxy], cell_edge_length: f64, coord_min: Position3D) -> Self {
		let mut index = Self::new(cell_edge_length, coord_min);
		for (source, galaxy) in galaxies.iter().enumerate() {
			if galaxy.is_wall() {
				index.insert(galaxy.position, source);
			}
		}
		index
	}

	/// Index every position as a wall galaxy.
	pub fn from_positions(positions: &[Position3D], cell_edge_length: f64, coord_min: Position3D) -> Self {
		let mut index = Self::new(cell_edge_length, coord_min);
		index.positions.reserve(positions.len());
		for &p in positions {
			index.push(p);
		}
		index
	}

	/// Append a position; returns its index.
	pub fn push(&mut self, position: Position3D) -> usize {
		let source = self.positions.len();
		self.insert(position, source);
		source
	}

	fn insert(&mut self, position: Position3D, source: usize) {
		let slot = self.positions.len();
		let cell = self.cell_of(&position);
		let previous = self.heads.insert(cell, slot).unwrap_or(END_OF_CHAIN);
		self.positions.push(position);
		self.source.push(source);
		self.next.push(previous);
		self.lo = GridCell::new(self.lo.i.min(cell.i), self.lo.j.min(cell.j), self.lo.k.min(cell.k));
		self.hi = GridCell::new(self.hi.i.max(cell.i), self.hi.j.max(cell.j), self.hi.k.max(cell.k));
	}

	pub fn len(&self) -> usize {
		self.positions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.positions.is_empty()
	}

	pub fn cell_edge_length(&self) -> f64 {
		self.edge
	}

	pub fn occupied_cell_count(&self) -> usize {
		self.heads.len()
	}

	/// Cell containing `point`.
	#[inline]
	pub fn cell_of(&self, point: &Position3D) -> GridCell {
		GridCell::new(
			((point.x - self.coord_min.x) / self.edge).floor() as i32,
			((point.y - self.coord_min.y) / self.edge).floor() as i32,
			((point.z - self.coord_min.z) / self.edge).floor() as i32,
		)
	}

	/// Lower corner of a cell along one axis.
	#[inline]
	fn cell_lower(&self, cell: i32, axis: usize) -> f64 {
		self.coord_min.axis(axis) + cell as f64 * self.edge
	}

	/// Walk the occupant chain of one cell (most recent first), yielding arena slots.
	pub fn cell_members(&self, cell: GridCell) -> CellMembers<'_> {
		CellMembers {
			next: &self.next,
			cursor: self.heads.get(&cell).copied().unwrap_or(END_OF_CHAIN),
		}
	}

	/// Position stored in an arena slot.
	#[inline]
	pub fn position(&self, slot: usize) -> Position3D {
		self.positions[slot]
	}

	/// Caller-facing index of an arena slot.
	#[inline]
	pub fn source_index(&self, slot: usize) -> usize {
		self.source[slot]
	}

	/// Squared distance from a point to the closest point of a cell cube.
	fn cell_distance_squared(&self, cell: &GridCell, point: &Position3D) -> f64 {
		let mut d2 = 0.0;
		for axis in 0..3 {
			let lower = self.cell_lower(cell.axis(axis), axis);
			let upper = lower + self.edge;
			let p = point.axis(axis);
			let d = if p < lower {
				lower - p
			} else if p > upper {
				p - upper
			} else {
				0.0
			};
			d2 += d * d;
		}
		d2
	}

	/// Occupied cells whose cube intersects the closed ball, in row-major order.
	pub fn cells_within_radius(&self, center: &Position3D, radius: f64) -> Vec<GridCell> {
		let mut cells = Vec::new();
		if self.is_empty() || radius < 0.0 {
			return cells;
		}
		let low = self.cell_of(&(*center - Position3D::new(radius, radius, radius)));
		let high = self.cell_of(&(*center + Position3D::new(radius, radius, radius)));
		let r2 = radius * radius;
		for i in low.i.max(self.lo.i)..=high.i.min(self.hi.i) {
			for j in low.j.max(self.lo.j)..=high.j.min(self.hi.j) {
				for k in low.k.max(self.lo.k)..=high.k.min(self.hi.k) {
					let cell = GridCell::new(i, j, k);
					if self.heads.contains_key(&cell) && self.cell_distance_squared(&cell, center) <= r2 {
						cells.push(cell);
					}
				}
			}
		}
		cells
	}

	/// Indices of galaxies strictly inside the open ball, ascending.
	pub fn within_radius(&self, center: &Position3D, radius: f64) -> Vec<usize> {
		let r2 = radius * radius;
		let mut found: Vec<usize> = self
			.cells_within_radius(center, radius)
			.into_iter()
			.flat_map(|cell| self.cell_members(cell))
			.filter(|&slot| self.positions[slot].distance_squared(center) < r2)
			.map(|slot| self.source[slot])
			.collect();
		found.sort_unstable();
		found
	}

	/// Exact nearest indexed galaxy to `point`.
	///
	/// Cells are visited one Chebyshev shell at a time around the query cell.
	/// The search ends once the best distance is strictly smaller than the
	/// distance to the nearest face of the explored cube, once the cube covers every
	/// occupied cell, or once that face lies beyond `search_radius_hint`.
	/// Equally near galaxies resolve to the lowest index.
	pub fn nearest_wall_galaxy(&self, point: &Position3D, search_radius_hint: Option<f64>) -> Option<Neighbor> {
		self.search(point, 1, search_radius_hint, None).into_iter().next()
	}

	/// The `k` nearest indexed galaxies, closest first, optionally ignoring one
	/// index (the query galaxy itself).
	pub fn k_nearest(&self, point: &Position3D, k: usize, exclude: Option<usize>) -> Vec<Neighbor> {
		self.search(point, k, None, exclude)
	}

	fn search(&self, point: &Position3D, k: usize, hint: Option<f64>, exclude: Option<usize>) -> Vec<Neighbor> {
		if self.is_empty() || k == 0 {
			return Vec::new();
		}
		let q = self.cell_of(point);

		// Shells closer than the occupied bounding box are empty.
		let mut shell = 0i32;
		for axis in 0..3 {
			let c = q.axis(axis);
			let gap = (self.lo.axis(axis) - c).max(c - self.hi.axis(axis)).max(0);
			shell = shell.max(gap);
		}
		// Farthest the cube has to grow before it covers the bounding box.
		let mut cover = 0i32;
		for axis in 0..3 {
			let c = q.axis(axis);
			cover = cover.max((c - self.lo.axis(axis)).abs()).max((self.hi.axis(axis) - c).abs());
		}

		let mut best = Best { k, exclude, found: Vec::with_capacity(k + 1) };
		loop {
			self.visit_shell(q, shell, point, &mut best);

			let face = self.face_distance(q, shell, point);
			if let Some(d2) = best.bound() {
				if d2.sqrt() < face {
					break;
				}
			}
			if shell >= cover {
				break;
			}
			if let Some(limit) = hint {
				if face > limit {
					break;
				}
			}
			shell += 1;
		}

		best.found
			.into_iter()
			.map(|(d2, source, slot)| Neighbor {
				index: source,
				position: self.positions[slot],
				distance: d2.sqrt(),
			})
			.filter(|n| hint.is_none_or(|limit| n.distance <= limit))
			.collect()
	}

	/// Distance from `point` to the nearest face of the cube of cells within
	/// Chebyshev radius `shell` of `q`.
	fn face_distance(&self, q: GridCell, shell: i32, point: &Position3D) -> f64 {
		let mut face = f64::INFINITY;
		for axis in 0..3 {
			let lower = self.cell_lower(q.axis(axis) - shell, axis);
			let upper = self.cell_lower(q.axis(axis) + shell + 1, axis);
			let p = point.axis(axis);
			face = face.min(p - lower).min(upper - p);
		}
		face.max(0.0)
	}

	fn visit_shell(&self, q: GridCell, shell: i32, point: &Position3D, best: &mut Best) {
		let i_range = (q.i - shell).max(self.lo.i)..=(q.i + shell).min(self.hi.i);
		for i in i_range {
			let i_edge = (i - q.i).abs() == shell;
			for j in (q.j - shell).max(self.lo.j)..=(q.j + shell).min(self.hi.j) {
				let ij_edge = i_edge || (j - q.j).abs() == shell;
				if ij_edge {
					for k in (q.k - shell).max(self.lo.k)..=(q.k + shell).min(self.hi.k) {
						self.visit_cell(GridCell::new(i, j, k), point, best);
					}
				} else {
					// Interior column: only the two capping cells belong to this shell.
					for k in [q.k - shell, q.k + shell] {
						if k >= self.lo.k && k <= self.hi.k {
							self.visit_cell(GridCell::new(i, j, k), point, best);
						}
					}
				}
			}
		}
	}

	#[inline]
	fn visit_cell(&self, cell: GridCell, point: &Position3D, best: &mut Best) {
		for slot in self.cell_members(cell) {
			best.offer(self.positions[slot].distance_squared(point), self.source[slot], slot);
		}
	}
}

/// Running list of the `k` closest candidates, ordered by (distance, index).
struct Best {
	k: usize,
	exclude: Option<usize>,
	found: Vec<(f64, usize, usize)>,
}

impl Best {
	#[inline]
	fn offer(&mut self, d2: f64, source: usize, slot: usize) {
		if self.exclude == Some(source) {
			return;
		}
		let key = (d2, source);
		if self.found.len() == self.k {
			let (worst_d2, worst_source, _) = self.found[self.k - 1];
			if key >= (worst_d2, worst_source) {
				return;
			}
		}
		let at = self
			.found
			.partition_point(|&(d, s, _)| (d, s) < key);
		self.found.insert(at, (d2, source, slot));
		self.found.truncate(self.k);
	}

	/// Squared distance that must be beaten once `k` candidates are known.
	#[inline]
	fn bound(&self) -> Option<f64> {
		if self.found.len() == self.k {
			self.found.last().map(|&(d2, _, _)| d2)
		} else {
			None
		}
	}
}

/// Iterator over the arena slots chained into one cell.
pub struct CellMembers<'a> {
	next: &'a [usize],
	cursor: usize,
}

impl Iterator for CellMembers<'_> {
	type Item = usize;

	fn next(&mut self) -> Option<usize> {
		if self.cursor == END_OF_CHAIN {
			return None;
		}
		let slot = self.cursor;
		self.cursor = self.next[slot];
		Some(slot)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn brute_force(points: &[Position3D], q: &Position3D) -> (usize, f64) {
		let mut best = (0, f64::INFINITY);
		for (i, p) in points.iter().enumerate() {
			let d2 = p.distance_squared(q);
			if d2 < best.1 {
				best = (i, d2);
			}
		}
		(best.0, best.1.sqrt())
	}

	#[test]
	fn chain_recovers_cell_membership() {
		let points = vec![
			Position3D::new(0.5, 0.5, 0.5),
			Position3D::new(5.5, 0.5, 0.5),
			Position3D::new(0.1, 0.9, 0.2),
			Position3D::new(0.7, 0.3, 0.9),
		];
		let index = GridIndex::from_positions(&points, 1.0, Position3D::ORIGIN);
		let members: Vec<usize> = index.cell_members(GridCell::new(0, 0, 0)).collect();
		assert_eq!(members, vec![3, 2, 0]);
		assert_eq!(index.occupied_cell_count(), 2);
		assert_eq!(index.cell_members(GridCell::new(9, 9, 9)).count(), 0);
	}

	#[test]
	fn cells_below_coord_min_are_negative() {
		let index = GridIndex::from_positions(&[Position3D::new(-0.5, 2.5, 0.0)], 1.0, Position3D::ORIGIN);
		assert_eq!(index.cell_of(&Position3D::new(-0.5, 2.5, 0.0)), GridCell::new(-1, 2, 0));
	}

	#[test]
	fn nearest_matches_linear_scan_on_lattice() {
		let mut points = Vec::new();
		for i in 0..7 {
			for j in 0..5 {
				for k in 0..3 {
					let jitter = ((i * 31 + j * 17 + k * 7) % 11) as f64 * 0.37;
					points.push(Position3D::new(i as f64 * 4.1 + jitter, j as f64 * 3.3 - jitter, k as f64 * 5.7 + 0.5 * jitter));
				}
			}
		}
		let index = GridIndex::from_positions(&points, 2.5, Position3D::new(-1.0, -5.0, 0.0));
		for n in 0..200 {
			let t = n as f64;
			let q = Position3D::new((t * 0.731).sin() * 40.0, (t * 1.37).cos() * 30.0, (t * 0.291).sin() * 25.0);
			let found = index.nearest_wall_galaxy(&q, None).expect("non-empty index");
			let (bi, bd) = brute_force(&points, &q);
			assert!((found.distance - bd).abs() < 1e-12, "query {q:?}");
			assert_eq!(found.index, bi);
		}
	}

	#[test]
	fn ties_go_to_lowest_index() {
		let points = vec![
			Position3D::new(10.0, 0.0, 0.0),
			Position3D::new(-10.0, 0.0, 0.0),
			Position3D::new(0.0, 10.0, 0.0),
		];
		let index = GridIndex::from_positions(&points, 3.0, Position3D::new(-10.0, -10.0, -10.0));
		let found = index.nearest_wall_galaxy(&Position3D::ORIGIN, None).unwrap();
		assert_eq!(found.index, 0);
		assert_eq!(found.distance, 10.0);
	}

	#[test]
	fn empty_index_and_hint_report_not_found() {
		let empty = GridIndex::new(1.0, Position3D::ORIGIN);
		assert!(empty.nearest_wall_galaxy(&Position3D::ORIGIN, None).is_none());

		let index = GridIndex::from_positions(&[Position3D::new(50.0, 0.0, 0.0)], 2.0, Position3D::ORIGIN);
		assert!(index.nearest_wall_galaxy(&Position3D::ORIGIN, Some(10.0)).is_none());
		assert_eq!(index.nearest_wall_galaxy(&Position3D::ORIGIN, Some(60.0)).unwrap().index, 0);
	}

	#[test]
	fn k_nearest_skips_the_query_galaxy() {
		let points: Vec<Position3D> = (0..20).map(|i| Position3D::new(i as f64 * 1.5, (i % 3) as f64, 0.0)).collect();
		let index = GridIndex::from_positions(&points, 2.0, Position3D::ORIGIN);
		let found = index.k_nearest(&points[10], 3, Some(10));
		assert_eq!(found.len(), 3);
		assert!(found.iter().all(|n| n.index != 10));
		let mut brute: Vec<(f64, usize)> = points
			.iter()
			.enumerate()
			.filter(|(i, _)| *i != 10)
			.map(|(i, p)| (p.distance(&points[10]), i))
			.collect();
		brute.sort_by(|a, b| a.partial_cmp(b).unwrap());
		let expected: Vec<usize> = brute.iter().take(3).map(|&(_, i)| i).collect();
		assert_eq!(found.iter().map(|n| n.index).collect::<Vec<_>>(), expected);
		assert!(found.windows(2).all(|w| w[0].distance <= w[1].distance));
	}

	#[test]
	fn equally_near_galaxy_on_next_shell_face_wins_by_index() {
		// Galaxy 1 lies in the first shell exactly at its face distance; galaxy 0
		// is as near but one shell further out.
		let points = vec![Position3D::new(4.0, 1.0, 1.0), Position3D::new(3.0, 3.0, 2.0)];
		let index = GridIndex::from_positions(&points, 2.0, Position3D::ORIGIN);
		let found = index.nearest_wall_galaxy(&Position3D::new(1.0, 1.0, 1.0), None).unwrap();
		assert_eq!(found.index, 0);
		assert_eq!(found.distance, 3.0);
	}

	#[test]
	fn field_galaxies_are_not_indexed() {
		let galaxies = vec![
			Galaxy::field(Position3D::new(1.0, 0.0, 0.0)),
			Galaxy::wall(Position3D::new(5.0, 0.0, 0.0)),
		];
		let index = GridIndex::build(&galaxies, 2.0, Position3D::ORIGIN);
		assert_eq!(index.len(), 1);
		let found = index.nearest_wall_galaxy(&Position3D::ORIGIN, None).unwrap();
		assert_eq!(found.index, 1);
	}

	#[test]
	fn within_radius_is_open_ball() {
		let points = vec![
			Position3D::new(1.0, 0.0, 0.0),
			Position3D::new(2.0, 0.0, 0.0),
			Position3D::new(0.0, 3.0, 0.0),
		];
		let index = GridIndex::from_positions(&points, 1.0, Position3D::new(-5.0, -5.0, -5.0));
		assert_eq!(index.within_radius(&Position3D::ORIGIN, 2.0), vec![0]);
		assert_eq!(index.within_radius(&Position3D::ORIGIN, 3.5), vec![0, 1, 2]);
		assert!(!index.cells_within_radius(&Position3D::ORIGIN, 2.0).is_empty());
	}
}
