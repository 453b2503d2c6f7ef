//! Wall/field split by k-th nearest neighbour distance.
//!
//! A galaxy is a field galaxy when its k-th nearest neighbour lies farther
//! than `mean + sigma_factor * std` of that distance over the whole sample.

use tracing::info;

use crate::void_finder::geometry::{Galaxy, Position3D};
use crate::void_finder::grid_index::GridIndex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifyParams {
	pub neighbor: usize,
	pub sigma_factor: f64,
}

impl Default for ClassifyParams {
	fn default() -> Self {
		Self {
			neighbor: 3,
			sigma_factor: 1.5,
		}
	}
}

/// Tag every position as wall or field. Samples with no more than `neighbor`
/// galaxies are all wall galaxies.
pub fn classify_galaxies(positions: &[Position3D], cell_edge_length: f64, params: ClassifyParams) -> Vec<Galaxy> {
	let k = params.neighbor.max(1);
	if positions.len() <= k {
		return positions.iter().map(|&p| Galaxy::wall(p)).collect();
	}
	let coord_min = positions.iter().fold(positions[0], |acc, p| acc.min(p));
	let index = GridIndex::from_positions(positions, cell_edge_length, coord_min);

	let distances: Vec<f64> = positions
		.iter()
		.enumerate()
		.map(|(i, p)| {
			index
				.k_nearest(p, k, Some(i))
				.last()
				.map(|n| n.distance)
				.unwrap_or(f64::INFINITY)
		})
		.collect();

	let n = distances.len() as f64;
	let mean = distances.iter().sum::<f64>() / n;
	let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
	let threshold = mean + params.sigma_factor * variance.sqrt();

	let galaxies: Vec<Galaxy> = positions
		.iter()
		.zip(&distances)
		.map(|(&p, &d)| if d > threshold { Galaxy::field(p) } else { Galaxy::wall(p) })
		.collect();
	let field = galaxies.iter().filter(|g| !g.is_wall()).count();
	info!(
		"Classified {} galaxies: {} wall, {} field (k = {}, threshold {:.3} Mpc/h)",
		galaxies.len(),
		galaxies.len() - field,
		field,
		k,
		threshold
	);
	galaxies
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn isolated_galaxy_becomes_field() {
		let mut positions = Vec::new();
		for i in 0..4 {
			for j in 0..4 {
				for k in 0..4 {
					positions.push(Position3D::new(i as f64, j as f64, k as f64));
				}
			}
		}
		positions.push(Position3D::new(40.0, 40.0, 40.0));
		let galaxies = classify_galaxies(&positions, 2.0, ClassifyParams::default());
		assert_eq!(galaxies.len(), 65);
		assert!(!galaxies[64].is_wall());
		assert!(galaxies[..64].iter().all(|g| g.is_wall()));
	}

	#[test]
	fn tiny_samples_are_all_wall() {
		let positions = vec![Position3D::ORIGIN, Position3D::new(100.0, 0.0, 0.0)];
		assert!(classify_galaxies(&positions, 5.0, ClassifyParams::default()).iter().all(|g| g.is_wall()));
	}
}
