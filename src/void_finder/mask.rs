//! Angular/radial survey footprint.
//!
//! The sky is binned once per radial shell. Shell `n` (1-based) holds
//! `n * 360 * resolution` RA bins and `n * 180 * resolution` Dec bins, so
//! angular bins keep roughly the same physical size as the shells get deeper.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bitvec::vec::BitVec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::void_finder::error::{Result, VoidError};
use crate::void_finder::geometry::{DEC_OFFSET, DEG_TO_RAD, Position3D, RadialLimits, xyz_to_sky};

const MASK_MAGIC: [u8; 4] = *b"VFMK";
const MASK_VERSION: u32 = 1;

/// Default shell depth: `n = 1 + floor(DEG_TO_RAD * r / 10)`.
pub const DEFAULT_SHELL_DEPTH: f64 = 10.0 / DEG_TO_RAD;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyMask {
	/// Angular bins per degree in shell 1.
	resolution: u32,
	shell_depth: f64,
	limits: RadialLimits,
	/// One RA-major bit grid per shell.
	shells: Vec<BitVec>,
}

impl SurveyMask {
	/// Empty footprint covering radii up to `limits.max`.
	///
	/// # Panics
	///
	/// Panics if `shell_depth` is not a positive finite number.
	pub fn new(resolution: u32, shell_depth: f64, limits: RadialLimits) -> Self {
		assert!(
			shell_depth.is_finite() && shell_depth > 0.0,
			"shell depth must be positive and finite, got {shell_depth}"
		);
		let resolution = resolution.max(1);
		let shell_count = Self::shells_for(limits, shell_depth);
		let shells = (1..=shell_count)
			.map(|n| {
				let (ra_bins, dec_bins) = Self::dims(resolution, n);
				BitVec::repeat(false, ra_bins * dec_bins)
			})
			.collect();
		Self {
			resolution,
			shell_depth,
			limits,
			shells,
		}
	}

	/// Footprint observed by a set of galaxies: each position marks its
	/// angular bin in every shell.
	pub fn from_positions(positions: &[Position3D], resolution: u32, shell_depth: f64, limits: RadialLimits) -> Self {
		let mut mask = Self::new(resolution, shell_depth, limits);
		for p in positions {
			let sky = xyz_to_sky(p);
			for n in 1..=mask.shells.len() {
				let (ra_bin, dec_bin) = mask.bin(n, sky.ra, sky.dec);
				mask.set(n, ra_bin, dec_bin, true);
			}
		}
		info!(
			"Survey mask built from {} positions: {} shells, {} of {} bins observed",
			positions.len(),
			mask.shells.len(),
			mask.observed_bins(),
			mask.total_bins()
		);
		mask
	}

	fn shells_for(limits: RadialLimits, shell_depth: f64) -> usize {
		1 + (limits.max.max(0.0) / shell_depth).floor() as usize
	}

	#[inline]
	fn dims(resolution: u32, shell: usize) -> (usize, usize) {
		let res = resolution as usize;
		(shell * 360 * res, shell * 180 * res)
	}

	/// (RA bins, Dec bins) of a 1-based shell.
	pub fn shell_dims(&self, shell: usize) -> (usize, usize) {
		Self::dims(self.resolution, shell)
	}

	pub fn shell_count(&self) -> usize {
		self.shells.len()
	}

	pub fn resolution(&self) -> u32 {
		self.resolution
	}

	pub fn shell_depth(&self) -> f64 {
		self.shell_depth
	}

	pub fn limits(&self) -> RadialLimits {
		self.limits
	}

	pub fn observed_bins(&self) -> usize {
		self.shells.iter().map(|s| s.count_ones()).sum()
	}

	pub fn total_bins(&self) -> usize {
		self.shells.iter().map(|s| s.len()).sum()
	}

	/// 1-based shell of a radius.
	#[inline]
	pub fn shell_of(&self, r: f64) -> usize {
		1 + (r / self.shell_depth).floor() as usize
	}

	/// RA/Dec bin of a sky direction in a given shell.
	#[inline]
	pub fn bin(&self, shell: usize, ra: f64, dec: f64) -> (usize, usize) {
		let (ra_bins, dec_bins) = self.shell_dims(shell);
		let scale = (shell as u64 * self.resolution as u64) as f64;
		let ra_bin = ((ra * scale).floor().max(0.0) as usize).min(ra_bins - 1);
		let dec_bin = (((dec - DEC_OFFSET) * scale).floor().max(0.0) as usize).min(dec_bins - 1);
		(ra_bin, dec_bin)
	}

	#[inline]
	fn offset(&self, shell: usize, ra_bin: usize, dec_bin: usize) -> usize {
		let (_, dec_bins) = self.shell_dims(shell);
		ra_bin * dec_bins + dec_bin
	}

	pub fn get(&self, shell: usize, ra_bin: usize, dec_bin: usize) -> bool {
		let offset = self.offset(shell, ra_bin, dec_bin);
		self.shells[shell - 1][offset]
	}

	pub fn set(&mut self, shell: usize, ra_bin: usize, dec_bin: usize, value: bool) {
		let offset = self.offset(shell, ra_bin, dec_bin);
		self.shells[shell - 1].set(offset, value);
	}

	/// Mark every bin of every shell as observed.
	pub fn fill(&mut self) {
		for shell in self.shells.iter_mut() {
			shell.fill(true);
		}
	}

	/// True if the point lies inside `limits` and its angular bin was observed.
	pub fn contains(&self, point: &Position3D, limits: RadialLimits) -> bool {
		let sky = xyz_to_sky(point);
		if !limits.contains(sky.r) {
			return false;
		}
		let shell = self.shell_of(sky.r);
		if shell > self.shells.len() {
			return false;
		}
		let (ra_bin, dec_bin) = self.bin(shell, sky.ra, sky.dec);
		self.get(shell, ra_bin, dec_bin)
	}

	/// [`SurveyMask::contains`] against the mask's own radial limits.
	#[inline]
	pub fn accepts(&self, point: &Position3D) -> bool {
		self.contains(point, self.limits)
	}

	/// Angular acceptance only; radii past the last shell use the last shell.
	pub fn angular_contains(&self, point: &Position3D) -> bool {
		let sky = xyz_to_sky(point);
		let shell = self.shell_of(sky.r).min(self.shells.len());
		let (ra_bin, dec_bin) = self.bin(shell, sky.ra, sky.dec);
		self.get(shell, ra_bin, dec_bin)
	}

	/// Fill unobserved bins whose four angular neighbours are all observed.
	/// RA wraps; the Dec edges count as unobserved. Returns bins filled.
	pub fn smooth(&mut self) -> usize {
		let mut filled = 0usize;
		for n in 1..=self.shells.len() {
			let (ra_bins, dec_bins) = self.shell_dims(n);
			let source = self.shells[n - 1].clone();
			let at = |ra: usize, dec: usize| source[ra * dec_bins + dec];
			for ra in 0..ra_bins {
				let west = (ra + ra_bins - 1) % ra_bins;
				let east = (ra + 1) % ra_bins;
				for dec in 1..dec_bins.saturating_sub(1) {
					if at(ra, dec) {
						continue;
					}
					if at(west, dec) && at(east, dec) && at(ra, dec - 1) && at(ra, dec + 1) {
						self.shells[n - 1].set(ra * dec_bins + dec, true);
						filled += 1;
					}
				}
			}
		}
		filled
	}

	/// Persist flags, resolution and limits.
	pub fn save(&self, path: &Path) -> Result<()> {
		let file = File::create(path).map_err(|e| VoidError::io(path, e))?;
		let mut writer = BufWriter::new(file);
		writer.write_all(&MASK_MAGIC).map_err(|e| VoidError::io(path, e))?;
		writer
			.write_all(&MASK_VERSION.to_le_bytes())
			.map_err(|e| VoidError::io(path, e))?;
		bincode::serialize_into(&mut writer, self).map_err(|e| VoidError::MaskArtifact {
			path: path.to_path_buf(),
			reason: e.to_string(),
		})?;
		writer.flush().map_err(|e| VoidError::io(path, e))?;
		Ok(())
	}

	pub fn load(path: &Path) -> Result<Self> {
		let file = File::open(path).map_err(|e| VoidError::io(path, e))?;
		let mut reader = BufReader::new(file);
		let bad = |reason: String| VoidError::MaskArtifact {
			path: path.to_path_buf(),
			reason,
		};

		let mut header = [0u8; 8];
		reader
			.read_exact(&mut header)
			.map_err(|e| bad(format!("failed to read header: {e}")))?;
		if header[..4] != MASK_MAGIC {
			return Err(bad("not a survey mask file".to_string()));
		}
		let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
		if version != MASK_VERSION {
			return Err(bad(format!("unsupported version {version}")));
		}
		let mask: SurveyMask = bincode::deserialize_from(&mut reader).map_err(|e| bad(e.to_string()))?;
		if mask.resolution == 0 {
			return Err(bad("resolution is zero".to_string()));
		}
		if !(mask.shell_depth.is_finite() && mask.shell_depth > 0.0) {
			return Err(bad(format!("shell depth {} is not positive", mask.shell_depth)));
		}
		if !(mask.limits.min.is_finite() && mask.limits.max.is_finite()) {
			return Err(bad(format!("radial limits {:?} are not finite", mask.limits)));
		}
		let expected = Self::shells_for(mask.limits, mask.shell_depth);
		if mask.shells.len() != expected {
			return Err(bad(format!("{} shells stored, expected {}", mask.shells.len(), expected)));
		}
		for (i, shell) in mask.shells.iter().enumerate() {
			let (ra_bins, dec_bins) = mask.shell_dims(i + 1);
			if shell.len() != ra_bins * dec_bins {
				return Err(bad(format!("shell {} has {} bins, expected {}", i + 1, shell.len(), ra_bins * dec_bins)));
			}
		}
		Ok(mask)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn permissive(rmax: f64) -> SurveyMask {
		let mut mask = SurveyMask::new(1, DEFAULT_SHELL_DEPTH, RadialLimits::new(0.0, rmax));
		mask.fill();
		mask
	}

	#[test]
	fn resolution_grows_with_shell() {
		let mask = SurveyMask::new(1, 100.0, RadialLimits::new(0.0, 250.0));
		assert_eq!(mask.shell_count(), 3);
		assert_eq!(mask.shell_dims(1), (360, 180));
		assert_eq!(mask.shell_dims(3), (1080, 540));
		assert_eq!(mask.shell_of(99.9), 1);
		assert_eq!(mask.shell_of(100.0), 2);
	}

	#[test]
	fn radial_limits_reject_first() {
		let mask = permissive(50.0);
		assert!(mask.accepts(&Position3D::new(10.0, 0.0, 0.0)));
		assert!(!mask.accepts(&Position3D::new(60.0, 0.0, 0.0)));
		assert!(!mask.contains(&Position3D::new(3.0, 0.0, 0.0), RadialLimits::new(5.0, 40.0)));
		assert!(mask.accepts(&Position3D::ORIGIN));
	}

	#[test]
	fn footprint_from_positions() {
		let limits = RadialLimits::new(0.0, 100.0);
		let galaxies = vec![Position3D::new(50.0, 0.5, 0.5), Position3D::new(-20.0, 20.0, 0.0)];
		let mask = SurveyMask::from_positions(&galaxies, 1, 30.0, limits);
		assert!(mask.accepts(&Position3D::new(60.0, 0.6, 0.6)));
		// Same direction in a nearer shell is observed too.
		assert!(mask.accepts(&Position3D::new(10.0, 0.1, 0.1)));
		assert!(mask.accepts(&Position3D::new(-70.0, 70.0, 0.1)));
		assert!(!mask.accepts(&Position3D::new(0.0, -50.0, 0.0)));
		assert!(!mask.accepts(&Position3D::new(0.0, 0.0, 50.0)));
	}

	#[test]
	fn smoothing_fills_isolated_holes() {
		let mut mask = SurveyMask::new(1, 1000.0, RadialLimits::new(0.0, 10.0));
		for ra in 9..=11 {
			for dec in 99..=101 {
				mask.set(1, ra, dec, true);
			}
		}
		mask.set(1, 10, 100, false);
		assert_eq!(mask.smooth(), 1);
		assert!(mask.get(1, 10, 100));
		assert_eq!(mask.smooth(), 0);
	}

	#[test]
	fn smoothing_wraps_in_ra() {
		let mut mask = SurveyMask::new(1, 1000.0, RadialLimits::new(0.0, 10.0));
		mask.set(1, 359, 50, true);
		mask.set(1, 1, 50, true);
		mask.set(1, 0, 49, true);
		mask.set(1, 0, 51, true);
		assert_eq!(mask.smooth(), 1);
		assert!(mask.get(1, 0, 50));
	}

	#[test]
	fn artifact_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("mask.bin");
		let mask = SurveyMask::from_positions(&[Position3D::new(5.0, 5.0, 5.0)], 2, 40.0, RadialLimits::new(1.0, 90.0));
		mask.save(&path).unwrap();
		let loaded = SurveyMask::load(&path).unwrap();
		assert_eq!(loaded, mask);
	}

	#[test]
	fn artifact_with_wrong_magic_is_refused() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("mask.bin");
		std::fs::write(&path, b"NOPE\x01\x00\x00\x00garbage").unwrap();
		assert!(matches!(SurveyMask::load(&path), Err(VoidError::MaskArtifact { .. })));
	}

	#[test]
	fn artifact_with_impossible_binning_is_refused() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("mask.bin");
		let valid = SurveyMask::new(1, 100.0, RadialLimits::new(0.0, 150.0));

		let zero_resolution = SurveyMask {
			resolution: 0,
			..valid.clone()
		};
		zero_resolution.save(&path).unwrap();
		assert!(matches!(SurveyMask::load(&path), Err(VoidError::MaskArtifact { .. })));

		let flat_shells = SurveyMask {
			shell_depth: 0.0,
			..valid.clone()
		};
		flat_shells.save(&path).unwrap();
		assert!(matches!(SurveyMask::load(&path), Err(VoidError::MaskArtifact { .. })));

		let missing_shell = SurveyMask {
			shells: valid.shells[..1].to_vec(),
			..valid.clone()
		};
		missing_shell.save(&path).unwrap();
		assert!(matches!(SurveyMask::load(&path), Err(VoidError::MaskArtifact { .. })));

		valid.save(&path).unwrap();
		assert_eq!(SurveyMask::load(&path).unwrap(), valid);
	}

	#[test]
	#[should_panic(expected = "shell depth")]
	fn non_positive_shell_depth_panics() {
		SurveyMask::new(1, 0.0, RadialLimits::new(0.0, 10.0));
	}
}
