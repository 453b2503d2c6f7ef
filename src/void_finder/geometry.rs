use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

pub const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;
pub const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;
/// Dec bins are counted from the south pole.
pub const DEC_OFFSET: f64 = -90.0;

/// Cartesian comoving position in Mpc/h.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position3D {
	pub x: f64,
	pub y: f64,
	pub z: f64,
}

impl Position3D {
	pub const ORIGIN: Position3D = Position3D { x: 0.0, y: 0.0, z: 0.0 };

	#[inline]
	pub const fn new(x: f64, y: f64, z: f64) -> Self {
		Self { x, y, z }
	}

	#[inline]
	pub fn norm_squared(&self) -> f64 {
		self.x * self.x + self.y * self.y + self.z * self.z
	}

	#[inline]
	pub fn norm(&self) -> f64 {
		self.norm_squared().sqrt()
	}

	#[inline]
	pub fn distance_squared(&self, other: &Position3D) -> f64 {
		(*self - *other).norm_squared()
	}

	#[inline]
	pub fn distance(&self, other: &Position3D) -> f64 {
		self.distance_squared(other).sqrt()
	}

	#[inline]
	pub fn axis(&self, axis: usize) -> f64 {
		match axis {
			0 => self.x,
			1 => self.y,
			_ => self.z,
		}
	}

	pub fn from_array(a: [f64; 3]) -> Self {
		Self::new(a[0], a[1], a[2])
	}

	/// Component-wise minimum.
	pub fn min(&self, other: &Position3D) -> Position3D {
		Position3D::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
	}

	/// Component-wise maximum.
	pub fn max(&self, other: &Position3D) -> Position3D {
		Position3D::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
	}
}

impl Add for Position3D {
	type Output = Position3D;
	#[inline]
	fn add(self, rhs: Position3D) -> Position3D {
		Position3D::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
	}
}

impl Sub for Position3D {
	type Output = Position3D;
	#[inline]
	fn sub(self, rhs: Position3D) -> Position3D {
		Position3D::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
	}
}

impl Mul<f64> for Position3D {
	type Output = Position3D;
	#[inline]
	fn mul(self, rhs: f64) -> Position3D {
		Position3D::new(self.x * rhs, self.y * rhs, self.z * rhs)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GalaxyClass {
	/// Boundary galaxy; blocks sphere growth.
	Wall,
	/// Isolated galaxy; ignored by the spatial index.
	Field,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Galaxy {
	pub position: Position3D,
	pub class: GalaxyClass,
}

impl Galaxy {
	pub fn wall(position: Position3D) -> Self {
		Self { position, class: GalaxyClass::Wall }
	}

	pub fn field(position: Position3D) -> Self {
		Self { position, class: GalaxyClass::Field }
	}

	pub fn is_wall(&self) -> bool {
		self.class == GalaxyClass::Wall
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
	pub center: Position3D,
	pub radius: f64,
}

impl Sphere {
	pub fn new(center: Position3D, radius: f64) -> Self {
		Self { center, radius }
	}

	pub fn volume(&self) -> f64 {
		4.0 / 3.0 * std::f64::consts::PI * self.radius.powi(3)
	}

	/// True if `point` lies strictly inside the sphere.
	#[inline]
	pub fn contains_point(&self, point: &Position3D) -> bool {
		self.center.distance(point) < self.radius
	}

	/// Volume of the lens shared by two spheres.
	pub fn overlap_volume(&self, other: &Sphere) -> f64 {
		let d = self.center.distance(&other.center);
		let (r1, r2) = (self.radius, other.radius);
		if d >= r1 + r2 {
			return 0.0;
		}
		if d <= (r1 - r2).abs() {
			return if r1 < r2 { self.volume() } else { other.volume() };
		}
		let sum = r1 + r2 - d;
		std::f64::consts::PI * sum * sum * (d * d + 2.0 * d * (r1 + r2) - 3.0 * (r1 - r2).powi(2))
			/ (12.0 * d)
	}
}

/// Inclusive radial distance limits of the survey.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadialLimits {
	pub min: f64,
	pub max: f64,
}

impl RadialLimits {
	pub fn new(min: f64, max: f64) -> Self {
		Self { min, max }
	}

	#[inline]
	pub fn contains(&self, r: f64) -> bool {
		r >= self.min && r <= self.max
	}
}

/// Sky position of a Cartesian point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPosition {
	pub r: f64,
	/// Degrees in [0, 360).
	pub ra: f64,
	/// Degrees in [-90, 90].
	pub dec: f64,
}

/// Right ascension in degrees following the survey convention.
///
/// `atan(y/x)` only resolves RA to within 180 degrees, so 180 is added when
/// `x < 0` and `y != 0` before wrapping into [0, 360). The x = 0 column has
/// no arctangent argument and is pinned to 90 or 270 by the sign of y.
pub fn right_ascension(p: &Position3D) -> f64 {
	let mut ra = if p.x == 0.0 {
		if p.y > 0.0 {
			90.0
		} else if p.y < 0.0 {
			270.0
		} else {
			0.0
		}
	} else {
		(p.y / p.x).atan() * RAD_TO_DEG
	};
	if p.x < 0.0 && p.y != 0.0 {
		ra += 180.0;
	}
	let ra = ra.rem_euclid(360.0);
	if ra >= 360.0 { 0.0 } else { ra }
}

/// Convert a Cartesian point to (r, RA, Dec). The origin maps to RA = Dec = 0.
pub fn xyz_to_sky(p: &Position3D) -> SkyPosition {
	let r = p.norm();
	if r == 0.0 {
		return SkyPosition { r, ra: 0.0, dec: 0.0 };
	}
	let dec = (p.z / r).clamp(-1.0, 1.0).asin() * RAD_TO_DEG;
	SkyPosition {
		r,
		ra: right_ascension(p),
		dec,
	}
}
