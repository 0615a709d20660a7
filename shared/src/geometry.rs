use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// A point (or vector) in world space.
///
/// x/y span the horizontal plane, z is height. Every value that leaves the
/// service is checked with [`Point3D::is_finite`] first.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3D {
    pub const ZERO: Point3D = Point3D {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const UP: Point3D = Point3D {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Returns the magnitude of the vector.
    pub fn length(&self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Magnitude in the horizontal plane only.
    pub fn length_2d(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(&self, other: &Point3D) -> f32 {
        (*other - *self).length()
    }

    pub fn distance_2d(&self, other: &Point3D) -> f32 {
        (*other - *self).length_2d()
    }

    pub fn dot(&self, other: &Point3D) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Point3D) -> Point3D {
        Point3D {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    /// Returns the normalized vector, or zero for a degenerate input.
    pub fn normalize(&self) -> Point3D {
        let mag = self.length();
        if mag <= f32::EPSILON {
            Point3D::ZERO
        } else {
            self.scale(1.0 / mag)
        }
    }

    pub fn scale(&self, scalar: f32) -> Point3D {
        Point3D {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }

    /// Linear interpolation, `t = 0` yields `self` and `t = 1` yields `other`.
    pub fn lerp(&self, other: &Point3D, t: f32) -> Point3D {
        *self + (*other - *self).scale(t)
    }

    /// Drops the vertical component.
    pub fn flatten(&self) -> Point3D {
        Point3D {
            x: self.x,
            y: self.y,
            z: 0.0,
        }
    }

    /// Rotates around the z axis by `angle` radians.
    pub fn rotate_z(&self, angle: f32) -> Point3D {
        let (sin, cos) = angle.sin_cos();
        Point3D {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
            z: self.z,
        }
    }
}

impl Add for Point3D {
    type Output = Point3D;

    fn add(self, rhs: Point3D) -> Point3D {
        Point3D::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3D {
    type Output = Point3D;

    fn sub(self, rhs: Point3D) -> Point3D {
        Point3D::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Point3D {
    type Output = Point3D;

    fn mul(self, rhs: f32) -> Point3D {
        self.scale(rhs)
    }
}

impl Neg for Point3D {
    type Output = Point3D;

    fn neg(self) -> Point3D {
        Point3D::new(-self.x, -self.y, -self.z)
    }
}

/// Wraps an angle into `[0, 2π)`.
pub fn normalize_orientation(angle: f32) -> f32 {
    let tau = std::f32::consts::TAU;
    let wrapped = angle.rem_euclid(tau);
    if wrapped >= tau {
        0.0
    } else {
        wrapped
    }
}
