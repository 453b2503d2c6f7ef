use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use tracing::info;

use crate::void_finder::error::{Result, VoidError};
use crate::void_finder::geometry::{Sphere, xyz_to_sky};
use crate::void_finder::scheduler::VoidCatalog;

/// Write the maximal sphere table, replacing any existing file.
/// Columns: center, radius, center distance, RA, Dec (degrees), void id.
pub fn write_maximal_spheres(catalog: &VoidCatalog, path: &Path) -> Result<()> {
	let start_time = Instant::now();
	let file = File::create(path).map_err(|e| VoidError::io(path, e))?;
	let mut w = BufWriter::new(file);
	let write = |w: &mut BufWriter<File>| -> std::io::Result<()> {
		writeln!(w, "# x y z radius r ra dec void")?;
		for (sphere, void) in catalog.maximal.iter().zip(&catalog.membership) {
			let c = sphere.center;
			let sky = xyz_to_sky(&c);
			writeln!(
				w,
				"{:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {}",
				c.x, c.y, c.z, sphere.radius, sky.r, sky.ra, sky.dec, void
			)?;
		}
		w.flush()
	};
	write(&mut w).map_err(|e| VoidError::io(path, e))?;
	info!(
		"Maximal sphere table saved: {} ({} rows, {:.3} s)",
		path.display(),
		catalog.maximal.len(),
		start_time.elapsed().as_secs_f64()
	);
	Ok(())
}

/// Write void membership, one row per maximal sphere of each void.
/// `sphere` is the row of that sphere in the maximal sphere table.
pub fn write_void_table(catalog: &VoidCatalog, path: &Path) -> Result<()> {
	let file = File::create(path).map_err(|e| VoidError::io(path, e))?;
	let mut w = BufWriter::new(file);
	let write = |w: &mut BufWriter<File>| -> std::io::Result<()> {
		writeln!(w, "# void sphere x y z radius")?;
		for void in &catalog.voids {
			for &member in &void.members {
				let s = &catalog.maximal[member];
				writeln!(
					w,
					"{} {} {:.6} {:.6} {:.6} {:.6}",
					void.id, member, s.center.x, s.center.y, s.center.z, s.radius
				)?;
			}
		}
		w.flush()
	};
	write(&mut w).map_err(|e| VoidError::io(path, e))?;
	info!("Void table saved: {} ({} voids)", path.display(), catalog.voids.len());
	Ok(())
}

/// Write every accepted hole before reduction.
pub fn write_sphere_table(spheres: &[Sphere], path: &Path) -> Result<()> {
	let file = File::create(path).map_err(|e| VoidError::io(path, e))?;
	let mut w = BufWriter::new(file);
	let write = |w: &mut BufWriter<File>| -> std::io::Result<()> {
		writeln!(w, "# x y z radius")?;
		for s in spheres {
			writeln!(w, "{:.6} {:.6} {:.6} {:.6}", s.center.x, s.center.y, s.center.z, s.radius)?;
		}
		w.flush()
	};
	write(&mut w).map_err(|e| VoidError::io(path, e))
}
