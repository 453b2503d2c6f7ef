//! Error types for void finding runs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Whole-run failures. Per-trial-center problems are `Rejection`s, not errors.
#[derive(Debug, Error)]
pub enum VoidError {
	/// A file could not be read or written.
	#[error("failed to access {}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	/// A checkpoint could not be decoded.
	#[error("corrupt checkpoint {}: {reason}", path.display())]
	CheckpointCorrupt { path: PathBuf, reason: String },

	/// A checkpoint was written for a different lattice or is internally inconsistent.
	#[error("checkpoint {} does not match this run: {reason}", path.display())]
	CheckpointMismatch { path: PathBuf, reason: String },

	/// A mask artifact could not be decoded.
	#[error("bad mask artifact {}: {reason}", path.display())]
	MaskArtifact { path: PathBuf, reason: String },

	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	#[error("invalid input: {0}")]
	InvalidInput(String),
}

impl VoidError {
	pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
		VoidError::Io {
			path: path.into(),
			source,
		}
	}
}

pub type Result<T> = std::result::Result<T, VoidError>;
