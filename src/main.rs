use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use tracing::Level;

use void_sphere::void_finder::classify::{ClassifyParams, classify_galaxies};
use void_sphere::void_finder::config::{OverlapCriterion, VoidFinderConfig};
use void_sphere::void_finder::geometry::{Galaxy, Position3D, RadialLimits};
use void_sphere::void_finder::info;
use void_sphere::void_finder::mask::{DEFAULT_SHELL_DEPTH, SurveyMask};
use void_sphere::void_finder::pipeline::{OutputPaths, find_voids};
use void_sphere::void_finder::scheduler::{RunOutcome, RunSummary};

#[derive(Parser)]
#[command(name = "void_sphere", about = "Find voids as unions of maximal empty spheres in a galaxy survey")]
struct Cli {
	/// Increase log detail (-v debug and progress bar, -vv trace).
	#[arg(short, long, action = ArgAction::Count, global = true)]
	verbose: u8,

	#[command(subcommand)]
	command: Commands,
}

#[derive(clap::Args)]
struct MaskArgs {
	/// Minimum comoving distance of the survey in Mpc/h.
	#[arg(long, default_value = "0.0")]
	rmin: f64,

	/// Maximum comoving distance (default: farthest galaxy).
	#[arg(long)]
	rmax: Option<f64>,

	/// Angular bins per degree in the innermost shell.
	#[arg(long, default_value = "1")]
	resolution: u32,

	/// Radial depth of one mask shell in Mpc/h.
	#[arg(long)]
	shell_depth: Option<f64>,

	/// Fill unobserved bins whose four angular neighbours are observed.
	#[arg(long)]
	smooth: bool,
}

#[derive(Subcommand)]
enum Commands {
	/// Build a survey mask artifact from galaxy positions.
	Mask {
		/// Whitespace-delimited `x y z` rows in Mpc/h.
		galaxies: PathBuf,

		/// Output mask artifact.
		#[arg(short, long)]
		output: PathBuf,

		#[command(flatten)]
		mask: MaskArgs,
	},

	/// Grow holes on a lattice of trial centers and reduce them to voids.
	Find {
		/// Wall galaxy positions, or all galaxies with --classify.
		galaxies: PathBuf,

		/// Field galaxy positions.
		#[arg(long, conflicts_with = "classify")]
		field: Option<PathBuf>,

		/// Split the input into wall and field galaxies by neighbour distance.
		#[arg(long)]
		classify: bool,

		/// Prebuilt mask artifact (default: built from the galaxies).
		#[arg(long)]
		mask_file: Option<PathBuf>,

		#[command(flatten)]
		mask: MaskArgs,

		/// Directory for output tables.
		#[arg(short, long, default_value = ".")]
		out_dir: PathBuf,

		/// File name prefix for output tables.
		#[arg(long, default_value = "voids")]
		prefix: String,

		/// Also write every accepted hole before reduction.
		#[arg(long)]
		candidates: bool,

		/// Trial center spacing in Mpc/h.
		#[arg(long, default_value = "5.0")]
		hole_grid_edge: f64,

		/// Galaxy index cell edge in Mpc/h (default: derived from density).
		#[arg(long)]
		galaxy_grid_edge: Option<f64>,

		/// Hole center step per growth iteration in Mpc/h.
		#[arg(long, default_value = "1.0")]
		iter_dist: f64,

		#[arg(long, default_value = "1000")]
		max_iterations: usize,

		/// Smallest radius gain in Mpc/h that keeps a hole growing.
		#[arg(long, default_value = "1e-6")]
		growth_tolerance: f64,

		/// Trial centers per worker job.
		#[arg(long, default_value = "10000")]
		batch_size: usize,

		/// Trial centers between checkpoint writes.
		#[arg(long, default_value = "50000")]
		save_after: usize,

		/// Seconds between progress reports.
		#[arg(long, default_value = "5.0")]
		print_after: f64,

		/// Checkpoint file.
		#[arg(long)]
		checkpoint: Option<PathBuf>,

		/// Resume from an existing checkpoint.
		#[arg(long, requires = "checkpoint")]
		resume: bool,

		/// Stop after this many trial centers (resume later with --resume).
		#[arg(long, requires = "checkpoint")]
		max_centers: Option<u64>,

		/// Worker threads (default: available cores minus one).
		#[arg(short = 'j', long)]
		workers: Option<usize>,

		/// Also grow holes from lattice cells containing a wall galaxy.
		#[arg(long)]
		keep_occupied_cells: bool,

		/// Minimum maximal sphere radius in Mpc/h.
		#[arg(long, default_value = "0.0")]
		min_radius: f64,

		/// Overlap fraction joining two spheres into one void.
		#[arg(long, default_value = "0.1")]
		overlap_fraction: f64,

		/// Compare center distance instead of lens volume.
		#[arg(long)]
		center_overlap: bool,
	},
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	let level = match cli.verbose {
		0 => Level::INFO,
		1 => Level::DEBUG,
		_ => Level::TRACE,
	};
	tracing_subscriber::fmt()
		.with_max_level(level)
		.with_writer(std::io::stderr)
		.init();

	info::print_citation();
	info::print_compile_info();

	match cli.command {
		Commands::Mask { galaxies, output, mask } => {
			let positions = read_positions(&galaxies)?;
			let survey = build_mask(&positions, &mask)?;
			survey
				.save(&output)
				.with_context(|| format!("failed to save mask to {}", output.display()))?;
			println!(
				"Mask saved: {} ({} of {} bins observed)",
				output.display(),
				survey.observed_bins(),
				survey.total_bins()
			);
		}
		Commands::Find {
			galaxies,
			field,
			classify,
			mask_file,
			mask,
			out_dir,
			prefix,
			candidates,
			hole_grid_edge,
			galaxy_grid_edge,
			iter_dist,
			max_iterations,
			growth_tolerance,
			batch_size,
			save_after,
			print_after,
			checkpoint,
			resume,
			max_centers,
			workers,
			keep_occupied_cells,
			min_radius,
			overlap_fraction,
			center_overlap,
		} => {
			let positions = read_positions(&galaxies)?;
			let (wall, field) = if classify {
				let cell_edge = galaxy_grid_edge.unwrap_or(hole_grid_edge);
				let (wall, field): (Vec<Galaxy>, Vec<Galaxy>) = classify_galaxies(&positions, cell_edge, ClassifyParams::default())
					.into_iter()
					.partition(Galaxy::is_wall);
				(
					wall.iter().map(|g| g.position).collect(),
					field.iter().map(|g| g.position).collect(),
				)
			} else {
				let field = match &field {
					Some(path) => read_positions(path)?,
					None => Vec::new(),
				};
				(positions, field)
			};

			let survey = match &mask_file {
				Some(path) => SurveyMask::load(path).with_context(|| format!("failed to load mask {}", path.display()))?,
				None => {
					let all: Vec<Position3D> = wall.iter().chain(&field).copied().collect();
					build_mask(&all, &mask)?
				}
			};

			let overlap = if center_overlap {
				OverlapCriterion::CenterDistance {
					fraction: overlap_fraction,
				}
			} else {
				OverlapCriterion::VolumeFraction {
					fraction: overlap_fraction,
				}
			};
			let config = VoidFinderConfig {
				hole_grid_edge_length: hole_grid_edge,
				galaxy_map_grid_edge_length: galaxy_grid_edge,
				hole_center_iter_dist: iter_dist,
				max_growth_iterations: max_iterations,
				growth_tolerance,
				batch_size,
				save_after,
				print_after: progress_interval(print_after)?,
				use_start_checkpoint: resume,
				num_workers: workers,
				verbosity: cli.verbose,
				skip_occupied_cells: !keep_occupied_cells,
				min_maximal_radius: min_radius,
				overlap,
				max_centers_per_run: max_centers,
				..Default::default()
			};

			std::fs::create_dir_all(&out_dir)
				.with_context(|| format!("failed to create output directory {}", out_dir.display()))?;
			let paths = OutputPaths {
				maximal_spheres: out_dir.join(format!("{prefix}_maximal.txt")),
				void_table: out_dir.join(format!("{prefix}_holes.txt")),
				candidates: candidates.then(|| out_dir.join(format!("{prefix}_candidates.txt"))),
				checkpoint,
			};

			match find_voids(&wall, &field, &survey, None, &config, &paths).context("void finding failed")? {
				RunOutcome::Finished(catalog) => {
					report(&catalog.summary);
					println!("Maximal spheres: {}", catalog.maximal.len());
					println!("Voids: {}", catalog.voids.len());
					println!("Maximal sphere table: {}", paths.maximal_spheres.display());
					println!("Void table: {}", paths.void_table.display());
				}
				RunOutcome::Halted(summary) => {
					report(&summary);
					println!("Run halted; rerun with --resume to continue.");
				}
			}
		}
	}
	Ok(())
}

fn build_mask(positions: &[Position3D], args: &MaskArgs) -> Result<SurveyMask> {
	if positions.is_empty() {
		bail!("cannot build a survey mask from zero galaxies");
	}
	let rmax = args
		.rmax
		.unwrap_or_else(|| positions.iter().map(Position3D::norm).fold(0.0, f64::max));
	if !(rmax > args.rmin) {
		bail!("rmax ({rmax}) must exceed rmin ({})", args.rmin);
	}
	let shell_depth = args.shell_depth.unwrap_or(DEFAULT_SHELL_DEPTH);
	if !(shell_depth.is_finite() && shell_depth > 0.0) {
		bail!("shell depth must be positive, got {shell_depth}");
	}
	let mut survey = SurveyMask::from_positions(positions, args.resolution, shell_depth, RadialLimits::new(args.rmin, rmax));
	if args.smooth {
		survey.smooth();
	}
	Ok(survey)
}

fn progress_interval(secs: f64) -> Result<Duration> {
	match Duration::try_from_secs_f64(secs) {
		Ok(interval) => Ok(interval),
		Err(e) => bail!("--print-after must be a non-negative number of seconds, got {secs}: {e}"),
	}
}

fn report(summary: &RunSummary) {
	println!(
		"Trial centers: {} total, {} resumed, {} processed this run",
		summary.total_centers, summary.resumed, summary.processed
	);
	println!("Holes accepted: {}", summary.accepted);
	let r = &summary.rejections;
	println!(
		"Rejected: {} outside mask, {} left survey, {} no convergence, {} no wall galaxy, {} degenerate, {} occupied cell",
		r.center_outside_mask, r.left_survey, r.non_convergence, r.no_wall_galaxy, r.degenerate, r.occupied_cell
	);
	println!("Elapsed: {:.2} s", summary.elapsed.as_secs_f64());
}

/// Read whitespace-delimited `x y z` rows; blank lines and `#` comments are skipped.
fn read_positions(path: &Path) -> Result<Vec<Position3D>> {
	let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
	parse_positions(BufReader::new(file)).with_context(|| format!("failed to read galaxies from {}", path.display()))
}

fn parse_positions<R: BufRead>(reader: R) -> Result<Vec<Position3D>> {
	let mut positions = Vec::new();
	for (line_no, line) in reader.lines().enumerate() {
		let line = line?;
		let data = line.split_once('#').map_or(line.as_str(), |(before, _)| before);
		let tokens: Vec<&str> = data.split_whitespace().collect();
		if tokens.is_empty() {
			continue;
		}
		if tokens.len() < 3 {
			bail!("line {}: expected `x y z`, got {:?}", line_no + 1, line.trim());
		}
		let mut xyz = [0.0f64; 3];
		for (value, token) in xyz.iter_mut().zip(&tokens) {
			*value = token
				.parse()
				.with_context(|| format!("line {}: bad coordinate {:?}", line_no + 1, token))?;
		}
		positions.push(Position3D::from_array(xyz));
	}
	Ok(positions)
}
