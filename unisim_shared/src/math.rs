//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! Everything is `f64`: orbital distances and beam ranges overflow `f32` precision quickly.

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Magnitudes below this are treated as zero by the collision code.
pub const EPSILON: f64 = 1e-9;

/// Returns true if `x` is within [`EPSILON`] of zero.
pub fn almost_zero(x: f64) -> bool {
    x.abs() < EPSILON
}

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn len_sq(self) -> f64 {
        self.dot(self)
    }

    pub fn len(self) -> f64 {
        self.len_sq().sqrt()
    }

    /// Unit vector in the same direction, or zero for a (near) zero vector.
    pub fn normalized(self) -> Self {
        let len = self.len();
        if almost_zero(len) {
            Self::ZERO
        } else {
            self * (1.0 / len)
        }
    }

    /// Every component is within [`EPSILON`] of zero.
    pub fn is_almost_zero(self) -> bool {
        almost_zero(self.x) && almost_zero(self.y) && almost_zero(self.z)
    }

    /// Removes the component of `self` along the unit vector `axis`.
    pub fn reject(self, axis: Self) -> Self {
        self - axis * self.dot(axis)
    }

    pub fn lerp(self, to: Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        self + (to - self) * t
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Four floats, as carried on the wire for orientations.
///
/// The universe encodes an orientation as `(forward.x, forward.y, up.x, up.y)`;
/// see [`Basis::from_wire`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec4 {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec4 {
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }
}

/// Orthonormal local frame of a body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub forward: Vec3,
    pub up: Vec3,
    pub right: Vec3,
}

impl Default for Basis {
    fn default() -> Self {
        Self {
            forward: Vec3::new(1.0, 0.0, 0.0),
            up: Vec3::new(0.0, 0.0, 1.0),
            right: Vec3::new(0.0, -1.0, 0.0),
        }
    }
}

impl Basis {
    /// Rebuilds a frame from its compact wire form.
    ///
    /// The dropped z components are recovered as the non-negative root of
    /// `1 - x² - y²`; out-of-range inputs are clamped to the xy plane.
    pub fn from_wire(o: Vec4) -> Self {
        let forward = unit_from_xy(o.w, o.x);
        let up = unit_from_xy(o.y, o.z);
        let right = forward.cross(up).normalized();
        Self { forward, up, right }
    }

    pub fn to_wire(&self) -> Vec4 {
        Vec4::new(self.forward.x, self.forward.y, self.up.x, self.up.y)
    }
}

fn unit_from_xy(x: f64, y: f64) -> Vec3 {
    let zz = 1.0 - x * x - y * y;
    let z = if zz > 0.0 { zz.sqrt() } else { 0.0 };
    Vec3::new(x, y, z).normalized()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_lerp_midpoint() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 4.0, 6.0);
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn cross_follows_right_hand_rule() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn normalizing_zero_stays_zero() {
        assert_eq!(Vec3::ZERO.normalized(), Vec3::ZERO);
        assert!((Vec3::new(3.0, 4.0, 0.0).normalized().len() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn basis_wire_roundtrip_keeps_xy() {
        let b = Basis::from_wire(Vec4::new(0.6, 0.0, 0.0, 0.8));
        let w = b.to_wire();
        assert!((w.w - 0.6).abs() < 1e-12);
        assert!((w.z - 0.8).abs() < 1e-12);
        assert!((b.forward.len() - 1.0).abs() < 1e-12);
    }
}
