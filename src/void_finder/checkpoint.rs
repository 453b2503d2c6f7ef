//! Append-only checkpoint log of per-trial-center growth outcomes.
//!
//! # File format
//!
//! 1. **Magic bytes**: `VFCK` (4 bytes)
//! 2. **Version**: `u32` little-endian
//! 3. **Header**: bincode-encoded [`RunFingerprint`] of the run
//! 4. **Frames**, repeated: `u32` little-endian payload length, the same
//!    length bit-inverted, then a bincode-encoded `Vec<CheckpointRecord>`
//!
//! Frames are written whole and synced. Replay keeps every complete frame; a
//! final frame cut short by termination mid-write is discarded and its trial
//! centers are simply processed again. A length prefix that fails its check
//! is corruption, wherever it sits.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bitvec::vec::BitVec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::void_finder::config::VoidFinderConfig;
use crate::void_finder::error::{Result, VoidError};
use crate::void_finder::geometry::RadialLimits;
use crate::void_finder::grid_index::GridIndex;
use crate::void_finder::growth::GrowthOutcome;
use crate::void_finder::lattice::HoleLattice;
use crate::void_finder::mask::SurveyMask;

pub const CHECKPOINT_MAGIC: [u8; 4] = *b"VFCK";
pub const CHECKPOINT_VERSION: u32 = 2;

const FRAME_PREFIX_LEN: usize = 8;

/// Everything that decides a trial center's outcome. A checkpoint only
/// resumes a run with an identical fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunFingerprint {
	pub lattice: HoleLattice,
	pub hole_center_iter_dist: f64,
	pub growth_tolerance: f64,
	pub max_growth_iterations: usize,
	pub max_search_radius: Option<f64>,
	pub skip_occupied_cells: bool,
	pub galaxy_cell_edge: f64,
	pub wall_count: usize,
	pub mask_resolution: u32,
	pub mask_shell_depth: f64,
	pub mask_limits: RadialLimits,
	pub mask_observed_bins: usize,
}

impl RunFingerprint {
	pub fn new(lattice: HoleLattice, config: &VoidFinderConfig, index: &GridIndex, mask: &SurveyMask) -> Self {
		Self {
			lattice,
			hole_center_iter_dist: config.hole_center_iter_dist,
			growth_tolerance: config.growth_tolerance,
			max_growth_iterations: config.max_growth_iterations,
			max_search_radius: config.max_search_radius,
			skip_occupied_cells: config.skip_occupied_cells,
			galaxy_cell_edge: index.cell_edge_length(),
			wall_count: index.len(),
			mask_resolution: mask.resolution(),
			mask_shell_depth: mask.shell_depth(),
			mask_limits: mask.limits(),
			mask_observed_bins: mask.observed_bins(),
		}
	}

	/// Names of the fields that differ from `other`.
	fn differences(&self, other: &RunFingerprint) -> Vec<&'static str> {
		let mut names = Vec::new();
		if self.lattice != other.lattice {
			names.push("lattice");
		}
		if self.hole_center_iter_dist != other.hole_center_iter_dist {
			names.push("hole_center_iter_dist");
		}
		if self.growth_tolerance != other.growth_tolerance {
			names.push("growth_tolerance");
		}
		if self.max_growth_iterations != other.max_growth_iterations {
			names.push("max_growth_iterations");
		}
		if self.max_search_radius != other.max_search_radius {
			names.push("max_search_radius");
		}
		if self.skip_occupied_cells != other.skip_occupied_cells {
			names.push("skip_occupied_cells");
		}
		if self.galaxy_cell_edge != other.galaxy_cell_edge || self.wall_count != other.wall_count {
			names.push("galaxy index");
		}
		if self.mask_resolution != other.mask_resolution
			|| self.mask_shell_depth != other.mask_shell_depth
			|| self.mask_limits != other.mask_limits
			|| self.mask_observed_bins != other.mask_observed_bins
		{
			names.push("survey mask");
		}
		names
	}
}

/// Length prefix followed by its bit-inverse.
fn frame_prefix(len: u32) -> [u8; FRAME_PREFIX_LEN] {
	let mut prefix = [0u8; FRAME_PREFIX_LEN];
	prefix[..4].copy_from_slice(&len.to_le_bytes());
	prefix[4..].copy_from_slice(&(!len).to_le_bytes());
	prefix
}

/// Payload length of an intact prefix.
fn checked_frame_len(prefix: &[u8; FRAME_PREFIX_LEN]) -> Option<u32> {
	let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
	let check = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
	(check == !len).then_some(len)
}

/// Outcome of one completed trial center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
	pub trial_index: u64,
	pub outcome: GrowthOutcome,
}

/// Everything recovered from a checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointState {
	/// One bit per trial center of the lattice.
	pub completed: BitVec,
	pub records: Vec<CheckpointRecord>,
	/// Byte length of the intact prefix of the file.
	valid_len: u64,
}

impl CheckpointState {
	pub fn completed_count(&self) -> usize {
		self.completed.count_ones()
	}
}

/// Appends frames to a checkpoint file owned by the coordinator.
pub struct CheckpointWriter {
	path: PathBuf,
	writer: BufWriter<File>,
}

impl CheckpointWriter {
	/// Start a fresh checkpoint, replacing any existing file.
	pub fn create(path: &Path, fingerprint: &RunFingerprint) -> Result<Self> {
		let file = File::create(path).map_err(|e| VoidError::io(path, e))?;
		let mut writer = BufWriter::new(file);
		writer.write_all(&CHECKPOINT_MAGIC).map_err(|e| VoidError::io(path, e))?;
		writer
			.write_all(&CHECKPOINT_VERSION.to_le_bytes())
			.map_err(|e| VoidError::io(path, e))?;
		bincode::serialize_into(&mut writer, fingerprint).map_err(|e| VoidError::CheckpointCorrupt {
			path: path.to_path_buf(),
			reason: format!("failed to encode header: {e}"),
		})?;
		let mut checkpoint = Self {
			path: path.to_path_buf(),
			writer,
		};
		checkpoint.sync()?;
		Ok(checkpoint)
	}

	/// Continue a replayed checkpoint, cutting off any torn trailing frame.
	pub fn resume(path: &Path, state: &CheckpointState) -> Result<Self> {
		let file = OpenOptions::new()
			.write(true)
			.open(path)
			.map_err(|e| VoidError::io(path, e))?;
		file.set_len(state.valid_len).map_err(|e| VoidError::io(path, e))?;
		let file = OpenOptions::new()
			.append(true)
			.open(path)
			.map_err(|e| VoidError::io(path, e))?;
		Ok(Self {
			path: path.to_path_buf(),
			writer: BufWriter::new(file),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Write one frame and make it durable.
	pub fn append(&mut self, records: &[CheckpointRecord]) -> Result<()> {
		if records.is_empty() {
			return Ok(());
		}
		let payload = bincode::serialize(records).map_err(|e| VoidError::CheckpointCorrupt {
			path: self.path.clone(),
			reason: format!("failed to encode frame: {e}"),
		})?;
		let len = u32::try_from(payload.len()).map_err(|_| VoidError::CheckpointCorrupt {
			path: self.path.clone(),
			reason: format!("frame of {} bytes is too large", payload.len()),
		})?;
		self.writer
			.write_all(&frame_prefix(len))
			.and_then(|_| self.writer.write_all(&payload))
			.map_err(|e| VoidError::io(&self.path, e))?;
		self.sync()
	}

	fn sync(&mut self) -> Result<()> {
		self.writer.flush().map_err(|e| VoidError::io(&self.path, e))?;
		self.writer
			.get_ref()
			.sync_data()
			.map_err(|e| VoidError::io(&self.path, e))
	}
}

/// Read until `buf` is full or the input ends; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
	let mut filled = 0;
	while filled < buf.len() {
		match reader.read(&mut buf[filled..]) {
			Ok(0) => break,
			Ok(n) => filled += n,
			Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
			Err(e) => return Err(e),
		}
	}
	Ok(filled)
}

/// Replay a checkpoint written for the run described by `fingerprint`.
///
/// Fails on a bad header, a header for a different run, a damaged length
/// prefix, an undecodable frame, or a record that is out of range or
/// repeated. Only a final frame that runs into the end of the file counts as
/// torn.
pub fn replay(path: &Path, fingerprint: &RunFingerprint) -> Result<CheckpointState> {
	let file = File::open(path).map_err(|e| VoidError::io(path, e))?;
	let file_len = file.metadata().map_err(|e| VoidError::io(path, e))?.len();
	let mut reader = BufReader::new(file);
	let corrupt = |reason: String| VoidError::CheckpointCorrupt {
		path: path.to_path_buf(),
		reason,
	};
	let mismatch = |reason: String| VoidError::CheckpointMismatch {
		path: path.to_path_buf(),
		reason,
	};

	let mut preamble = [0u8; 8];
	let n = read_full(&mut reader, &mut preamble).map_err(|e| VoidError::io(path, e))?;
	if n < preamble.len() {
		return Err(corrupt("file too short for a header".to_string()));
	}
	if preamble[..4] != CHECKPOINT_MAGIC {
		return Err(corrupt("not a checkpoint file".to_string()));
	}
	let version = u32::from_le_bytes([preamble[4], preamble[5], preamble[6], preamble[7]]);
	if version != CHECKPOINT_VERSION {
		return Err(corrupt(format!("unsupported version {version}")));
	}
	let recorded: RunFingerprint =
		bincode::deserialize_from(&mut reader).map_err(|e| corrupt(format!("failed to read header: {e}")))?;
	let changed = recorded.differences(fingerprint);
	if !changed.is_empty() {
		return Err(mismatch(format!("run parameters changed: {}", changed.join(", "))));
	}
	let mut valid_len = preamble.len() as u64 + bincode::serialized_size(&recorded).map_err(|e| corrupt(e.to_string()))?;

	let total = fingerprint.lattice.total_centers();
	let mut completed = BitVec::repeat(false, total as usize);
	let mut records = Vec::new();
	let mut frames = 0usize;
	loop {
		let mut prefix = [0u8; FRAME_PREFIX_LEN];
		let n = read_full(&mut reader, &mut prefix).map_err(|e| VoidError::io(path, e))?;
		if n == 0 {
			break;
		}
		if n < FRAME_PREFIX_LEN {
			warn!("Dropping torn frame at the end of checkpoint {}", path.display());
			break;
		}
		let Some(len) = checked_frame_len(&prefix) else {
			return Err(corrupt(format!("frame {frames} at byte {valid_len} has a damaged length")));
		};
		let len = len as u64;
		let remaining = file_len.saturating_sub(valid_len + FRAME_PREFIX_LEN as u64);
		if len > remaining {
			warn!("Dropping torn frame at the end of checkpoint {}", path.display());
			break;
		}
		let mut payload = vec![0u8; len as usize];
		let n = read_full(&mut reader, &mut payload).map_err(|e| VoidError::io(path, e))?;
		if (n as u64) < len {
			warn!("Dropping torn frame at the end of checkpoint {}", path.display());
			break;
		}
		let frame: Vec<CheckpointRecord> =
			bincode::deserialize(&payload).map_err(|e| corrupt(format!("frame {frames}: {e}")))?;
		for record in frame {
			if record.trial_index >= total {
				return Err(mismatch(format!(
					"trial center {} is outside a lattice of {} centers",
					record.trial_index, total
				)));
			}
			let slot = record.trial_index as usize;
			if completed[slot] {
				return Err(corrupt(format!("trial center {} recorded twice", record.trial_index)));
			}
			completed.set(slot, true);
			records.push(record);
		}
		valid_len += FRAME_PREFIX_LEN as u64 + len;
		frames += 1;
	}

	info!(
		"Replayed checkpoint {}: {} frames, {} of {} trial centers done",
		path.display(),
		frames,
		records.len(),
		total
	);
	Ok(CheckpointState {
		completed,
		records,
		valid_len,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::void_finder::geometry::{Position3D, Sphere};
	use crate::void_finder::growth::Rejection;

	fn fingerprint_for(shape: [usize; 3]) -> RunFingerprint {
		RunFingerprint {
			lattice: HoleLattice::new(shape, 5.0, Position3D::new(-10.0, -10.0, -10.0)),
			hole_center_iter_dist: 1.0,
			growth_tolerance: 1e-6,
			max_growth_iterations: 10_000,
			max_search_radius: None,
			skip_occupied_cells: true,
			galaxy_cell_edge: 4.0,
			wall_count: 12,
			mask_resolution: 1,
			mask_shell_depth: 10.0,
			mask_limits: RadialLimits { min: 0.0, max: 50.0 },
			mask_observed_bins: 40,
		}
	}

	fn fingerprint() -> RunFingerprint {
		fingerprint_for([2, 3, 4])
	}

	fn accepted(i: u64) -> CheckpointRecord {
		CheckpointRecord {
			trial_index: i,
			outcome: GrowthOutcome::Accepted(Sphere::new(Position3D::new(i as f64, 0.0, 0.0), 1.5)),
		}
	}

	fn rejected(i: u64) -> CheckpointRecord {
		CheckpointRecord {
			trial_index: i,
			outcome: GrowthOutcome::Rejected(Rejection::LeftSurvey),
		}
	}

	#[test]
	fn frames_replay_in_order() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("run.ckpt");
		let mut writer = CheckpointWriter::create(&path, &fingerprint()).unwrap();
		writer.append(&[accepted(0), rejected(1)]).unwrap();
		writer.append(&[accepted(7)]).unwrap();
		drop(writer);

		let state = replay(&path, &fingerprint()).unwrap();
		assert_eq!(state.records, vec![accepted(0), rejected(1), accepted(7)]);
		assert_eq!(state.completed_count(), 3);
		assert!(state.completed[7] && !state.completed[2]);
	}

	#[test]
	fn torn_tail_is_dropped_and_overwritten() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("run.ckpt");
		let mut writer = CheckpointWriter::create(&path, &fingerprint()).unwrap();
		writer.append(&[accepted(0)]).unwrap();
		drop(writer);
		let intact = std::fs::metadata(&path).unwrap().len();
		{
			let mut file = OpenOptions::new().append(true).open(&path).unwrap();
			file.write_all(&[200, 0, 0, 0, 1, 2, 3]).unwrap();
		}

		let state = replay(&path, &fingerprint()).unwrap();
		assert_eq!(state.records, vec![accepted(0)]);

		let mut writer = CheckpointWriter::resume(&path, &state).unwrap();
		assert!(std::fs::metadata(&path).unwrap().len() == intact);
		writer.append(&[rejected(3)]).unwrap();
		drop(writer);
		let state = replay(&path, &fingerprint()).unwrap();
		assert_eq!(state.records, vec![accepted(0), rejected(3)]);
	}

	#[test]
	fn final_frame_longer_than_the_file_is_torn() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("run.ckpt");
		let mut writer = CheckpointWriter::create(&path, &fingerprint()).unwrap();
		writer.append(&[accepted(2)]).unwrap();
		drop(writer);
		{
			let mut file = OpenOptions::new().append(true).open(&path).unwrap();
			file.write_all(&frame_prefix(u32::MAX - 1)).unwrap();
			file.write_all(&[1, 2, 3]).unwrap();
		}

		let state = replay(&path, &fingerprint()).unwrap();
		assert_eq!(state.records, vec![accepted(2)]);
	}

	#[test]
	fn damaged_length_in_a_middle_frame_is_corruption() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("run.ckpt");
		let mut writer = CheckpointWriter::create(&path, &fingerprint()).unwrap();
		writer.append(&[accepted(0)]).unwrap();
		drop(writer);
		let first_frame = std::fs::metadata(&path).unwrap().len();
		let mut writer = CheckpointWriter::resume(&path, &replay(&path, &fingerprint()).unwrap()).unwrap();
		writer.append(&[accepted(1)]).unwrap();
		writer.append(&[rejected(2)]).unwrap();
		drop(writer);

		let mut bytes = std::fs::read(&path).unwrap();
		bytes[first_frame as usize + 1] ^= 0x40;
		std::fs::write(&path, &bytes).unwrap();

		assert!(matches!(replay(&path, &fingerprint()), Err(VoidError::CheckpointCorrupt { .. })));
		assert_eq!(std::fs::read(&path).unwrap(), bytes);
	}

	#[test]
	fn different_run_parameters_are_refused() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("run.ckpt");
		CheckpointWriter::create(&path, &fingerprint()).unwrap();
		let other = fingerprint_for([2, 3, 5]);
		assert!(matches!(replay(&path, &other), Err(VoidError::CheckpointMismatch { .. })));

		let finer_steps = RunFingerprint {
			hole_center_iter_dist: 0.5,
			..fingerprint()
		};
		assert_eq!(finer_steps.differences(&fingerprint()), vec!["hole_center_iter_dist"]);
		assert!(matches!(replay(&path, &finer_steps), Err(VoidError::CheckpointMismatch { .. })));

		let other_mask = RunFingerprint {
			mask_observed_bins: 39,
			..fingerprint()
		};
		assert!(matches!(replay(&path, &other_mask), Err(VoidError::CheckpointMismatch { .. })));
	}

	#[test]
	fn garbage_and_duplicates_are_refused() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("garbage.ckpt");
		std::fs::write(&path, b"definitely not a checkpoint").unwrap();
		assert!(matches!(replay(&path, &fingerprint()), Err(VoidError::CheckpointCorrupt { .. })));

		let path = dir.path().join("dup.ckpt");
		let mut writer = CheckpointWriter::create(&path, &fingerprint()).unwrap();
		writer.append(&[accepted(4)]).unwrap();
		writer.append(&[rejected(4)]).unwrap();
		drop(writer);
		assert!(matches!(replay(&path, &fingerprint()), Err(VoidError::CheckpointCorrupt { .. })));

		let path = dir.path().join("range.ckpt");
		let mut writer = CheckpointWriter::create(&path, &fingerprint()).unwrap();
		writer.append(&[accepted(24)]).unwrap();
		drop(writer);
		assert!(matches!(replay(&path, &fingerprint()), Err(VoidError::CheckpointMismatch { .. })));
	}

	#[test]
	fn undecodable_frame_is_corruption() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("bad.ckpt");
		CheckpointWriter::create(&path, &fingerprint()).unwrap();
		{
			let mut file = OpenOptions::new().append(true).open(&path).unwrap();
			// Claims a huge record count inside a complete 8-byte frame.
			file.write_all(&frame_prefix(8)).unwrap();
			file.write_all(&[255; 8]).unwrap();
		}
		assert!(matches!(replay(&path, &fingerprint()), Err(VoidError::CheckpointCorrupt { .. })));
	}
}
