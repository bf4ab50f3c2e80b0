//! Gravity and integration.

use crate::{
    body::{PhysId, PhysicsBody},
    math::{almost_zero, Vec3},
};

/// A gravity source, captured before any body in the tick moves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attractor {
    pub id: PhysId,
    pub position: Vec3,
    pub mass: f64,
}

impl From<&PhysicsBody> for Attractor {
    fn from(b: &PhysicsBody) -> Self {
        Self {
            id: b.id,
            position: b.position,
            mass: b.mass,
        }
    }
}

/// Acceleration at `at` due to a point mass.
pub fn pull(gravitational_constant: f64, source: &Attractor, at: Vec3) -> Vec3 {
    let d = source.position - at;
    let r2 = d.len_sq();
    if almost_zero(r2) {
        return Vec3::ZERO;
    }
    d.normalized() * (gravitational_constant * source.mass / r2)
}

/// Gravity from every other attractor plus the body's own thrust.
pub fn net_acceleration(body: &PhysicsBody, attractors: &[Attractor], gravitational_constant: f64) -> Vec3 {
    let mut a = attractors
        .iter()
        .filter(|src| src.id != body.id)
        .fold(Vec3::ZERO, |acc, src| acc + pull(gravitational_constant, src, body.position));
    if body.mass > 0.0 {
        a += body.thrust * (1.0 / body.mass);
    }
    a
}

/// Advances a body to the end of the tick.
///
/// Collision resolution may already have moved the body through the first
/// `body.t` seconds; only the remainder is covered at the current velocity.
pub fn integrate(body: &mut PhysicsBody, accel: Vec3, dt: f64) {
    body.position += body.velocity * (dt - body.t).max(0.0);
    body.t = 0.0;
    body.position += accel * (0.5 * dt * dt);
    body.velocity += accel * dt;
}
