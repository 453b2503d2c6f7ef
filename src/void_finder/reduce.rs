//! Reduction of candidate holes to maximal spheres, and grouping into voids.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::void_finder::config::OverlapCriterion;
use crate::void_finder::geometry::{Position3D, Sphere};
use crate::void_finder::grid_index::GridIndex;

/// A connected group of overlapping maximal spheres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Void {
	pub id: usize,
	/// Indices into the maximal sphere table, ascending.
	pub members: Vec<usize>,
	/// Member with the largest radius.
	pub largest: usize,
	pub bbox_min: Position3D,
	pub bbox_max: Position3D,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reduction {
	/// Sorted by radius, largest first.
	pub maximal: Vec<Sphere>,
	pub voids: Vec<Void>,
	/// Void id of each maximal sphere.
	pub membership: Vec<usize>,
}

pub struct MaximalSphereReducer {
	overlap: OverlapCriterion,
	min_radius: f64,
}

/// Largest radius first; ties ordered by center so the sweep does not depend
/// on input order.
fn by_radius_desc(a: &Sphere, b: &Sphere) -> Ordering {
	b.radius
		.total_cmp(&a.radius)
		.then_with(|| a.center.x.total_cmp(&b.center.x))
		.then_with(|| a.center.y.total_cmp(&b.center.y))
		.then_with(|| a.center.z.total_cmp(&b.center.z))
}

impl MaximalSphereReducer {
	pub fn new(overlap: OverlapCriterion, min_radius: f64) -> Self {
		Self { overlap, min_radius }
	}

	/// Symmetric overlap test used to link two maximal spheres.
	pub fn overlaps(&self, a: &Sphere, b: &Sphere) -> bool {
		match self.overlap {
			OverlapCriterion::CenterDistance { fraction } => {
				a.center.distance(&b.center) < fraction * (a.radius + b.radius)
			}
			OverlapCriterion::VolumeFraction { fraction } => {
				let smaller = if a.radius <= b.radius { a } else { b };
				let shared = a.overlap_volume(b);
				shared > 0.0 && shared > fraction * smaller.volume()
			}
		}
	}

	pub fn reduce(&self, candidates: &[Sphere]) -> Reduction {
		let maximal = self.maximal_spheres(candidates);
		let (voids, membership) = self.group(&maximal);
		Reduction {
			maximal,
			voids,
			membership,
		}
	}

	/// Greedy largest-first sweep: keep a candidate unless its center lies
	/// strictly inside an already kept sphere.
	pub fn maximal_spheres(&self, candidates: &[Sphere]) -> Vec<Sphere> {
		let mut sorted: Vec<Sphere> = candidates
			.iter()
			.filter(|s| s.radius > self.min_radius && s.radius.is_finite())
			.copied()
			.collect();
		sorted.sort_by(by_radius_desc);

		let Some(first) = sorted.first() else {
			return Vec::new();
		};
		// Any sphere containing a center is no larger than the first, so its
		// own center sits within one cell-neighbourhood of that point.
		let max_radius = first.radius;
		let mut kept: Vec<Sphere> = Vec::new();
		let mut centers = GridIndex::new(max_radius, first.center);

		for sphere in sorted {
			let inside = centers
				.cells_within_radius(&sphere.center, max_radius)
				.into_iter()
				.flat_map(|cell| centers.cell_members(cell))
				.any(|slot| kept[centers.source_index(slot)].contains_point(&sphere.center));
			if !inside {
				centers.push(sphere.center);
				kept.push(sphere);
			}
		}
		kept
	}

	/// Connected components of the overlap graph. Void ids follow the order of
	/// each void's largest member.
	pub fn group(&self, maximal: &[Sphere]) -> (Vec<Void>, Vec<usize>) {
		if maximal.is_empty() {
			return (Vec::new(), Vec::new());
		}
		let max_radius = maximal.iter().map(|s| s.radius).fold(0.0, f64::max);
		let centers = GridIndex::from_positions(
			&maximal.iter().map(|s| s.center).collect::<Vec<_>>(),
			(2.0 * max_radius).max(f64::MIN_POSITIVE),
			maximal[0].center,
		);

		let mut sets = DisjointSet::new(maximal.len());
		for (a, sphere) in maximal.iter().enumerate() {
			for b in centers.within_radius(&sphere.center, sphere.radius + max_radius) {
				if b > a && self.overlaps(sphere, &maximal[b]) {
					sets.union(a, b);
				}
			}
		}

		let mut void_of_root: Vec<Option<usize>> = vec![None; maximal.len()];
		let mut voids: Vec<Void> = Vec::new();
		let mut membership = Vec::with_capacity(maximal.len());
		for (index, sphere) in maximal.iter().enumerate() {
			let root = sets.find(index);
			let id = match void_of_root[root] {
				Some(id) => id,
				None => {
					let id = voids.len();
					void_of_root[root] = Some(id);
					voids.push(Void {
						id,
						members: Vec::new(),
						largest: index,
						bbox_min: Position3D::new(f64::MAX, f64::MAX, f64::MAX),
						bbox_max: Position3D::new(f64::MIN, f64::MIN, f64::MIN),
					});
					id
				}
			};
			let void = &mut voids[id];
			let reach = Position3D::new(sphere.radius, sphere.radius, sphere.radius);
			void.members.push(index);
			if sphere.radius > maximal[void.largest].radius {
				void.largest = index;
			}
			void.bbox_min = void.bbox_min.min(&(sphere.center - reach));
			void.bbox_max = void.bbox_max.max(&(sphere.center + reach));
			membership.push(id);
		}
		(voids, membership)
	}
}

/// Union-find with path halving.
struct DisjointSet {
	parent: Vec<usize>,
	rank: Vec<u8>,
}

impl DisjointSet {
	fn new(n: usize) -> Self {
		Self {
			parent: (0..n).collect(),
			rank: vec![0; n],
		}
	}

	fn find(&mut self, mut x: usize) -> usize {
		while self.parent[x] != x {
			self.parent[x] = self.parent[self.parent[x]];
			x = self.parent[x];
		}
		x
	}

	fn union(&mut self, a: usize, b: usize) {
		let (ra, rb) = (self.find(a), self.find(b));
		if ra == rb {
			return;
		}
		match self.rank[ra].cmp(&self.rank[rb]) {
			Ordering::Less => self.parent[ra] = rb,
			Ordering::Greater => self.parent[rb] = ra,
			Ordering::Equal => {
				self.parent[rb] = ra;
				self.rank[ra] += 1;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn s(x: f64, y: f64, z: f64, r: f64) -> Sphere {
		Sphere::new(Position3D::new(x, y, z), r)
	}

	#[test]
	fn contained_centers_are_discarded() {
		let reducer = MaximalSphereReducer::new(OverlapCriterion::default(), 0.0);
		let maximal = reducer.maximal_spheres(&[s(0.0, 0.0, 0.0, 5.0), s(3.0, 0.0, 0.0, 4.0), s(12.0, 0.0, 0.0, 6.0), s(0.0, 0.0, 0.0, 5.0)]);
		assert_eq!(maximal, vec![s(12.0, 0.0, 0.0, 6.0), s(0.0, 0.0, 0.0, 5.0)]);
	}

	#[test]
	fn input_order_does_not_matter() {
		let reducer = MaximalSphereReducer::new(OverlapCriterion::default(), 0.0);
		let mut spheres = vec![
			s(0.0, 0.0, 0.0, 5.0),
			s(6.0, 0.0, 0.0, 5.0),
			s(3.0, 4.0, 0.0, 2.0),
			s(30.0, 0.0, 0.0, 1.0),
			s(-7.0, 0.0, 0.0, 3.0),
		];
		let forward = reducer.reduce(&spheres);
		spheres.reverse();
		let backward = reducer.reduce(&spheres);
		assert_eq!(forward, backward);
	}

	#[test]
	fn zero_radius_and_small_candidates_drop() {
		let reducer = MaximalSphereReducer::new(OverlapCriterion::default(), 2.0);
		let maximal = reducer.maximal_spheres(&[s(0.0, 0.0, 0.0, 0.0), s(10.0, 0.0, 0.0, 2.0), s(20.0, 0.0, 0.0, 3.0)]);
		assert_eq!(maximal, vec![s(20.0, 0.0, 0.0, 3.0)]);
	}

	#[test]
	fn chains_form_one_void() {
		let reducer = MaximalSphereReducer::new(OverlapCriterion::CenterDistance { fraction: 1.0 }, 0.0);
		// a-b and b-c overlap; a and c do not.
		let spheres = [s(0.0, 0.0, 0.0, 5.0), s(8.0, 0.0, 0.0, 4.9), s(16.0, 0.0, 0.0, 4.8), s(100.0, 0.0, 0.0, 3.0)];
		assert!(!reducer.overlaps(&spheres[0], &spheres[2]));
		let reduction = reducer.reduce(&spheres);
		assert_eq!(reduction.maximal.len(), 4);
		assert_eq!(reduction.voids.len(), 2);
		assert_eq!(reduction.voids[0].members, vec![0, 1, 2]);
		assert_eq!(reduction.voids[0].largest, 0);
		assert_eq!(reduction.voids[1].members, vec![3]);
		assert_eq!(reduction.membership, vec![0, 0, 0, 1]);
		assert_eq!(reduction.voids[0].bbox_min, Position3D::new(-5.0, -5.0, -5.0));
		assert!((reduction.voids[0].bbox_max.x - 20.8).abs() < 1e-12);
	}

	#[test]
	fn overlap_criteria_are_symmetric() {
		let a = s(0.0, 0.0, 0.0, 5.0);
		let b = s(6.0, 1.0, 0.0, 3.0);
		for criterion in [
			OverlapCriterion::CenterDistance { fraction: 0.8 },
			OverlapCriterion::VolumeFraction { fraction: 0.1 },
			OverlapCriterion::VolumeFraction { fraction: 0.5 },
		] {
			let reducer = MaximalSphereReducer::new(criterion, 0.0);
			assert_eq!(reducer.overlaps(&a, &b), reducer.overlaps(&b, &a));
		}
	}

	#[test]
	fn volume_fraction_threshold() {
		let a = s(0.0, 0.0, 0.0, 2.0);
		let b = s(2.0, 0.0, 0.0, 2.0);
		// These share 5/16 of a sphere volume.
		assert!(MaximalSphereReducer::new(OverlapCriterion::VolumeFraction { fraction: 0.3 }, 0.0).overlaps(&a, &b));
		assert!(!MaximalSphereReducer::new(OverlapCriterion::VolumeFraction { fraction: 0.32 }, 0.0).overlaps(&a, &b));
	}

	#[test]
	fn empty_input() {
		let reducer = MaximalSphereReducer::new(OverlapCriterion::default(), 0.0);
		let reduction = reducer.reduce(&[]);
		assert!(reduction.maximal.is_empty() && reduction.voids.is_empty());
	}
}
