//! Simulated rigid bodies.
//!
//! A [`PhysicsBody`] is a sphere with mass. Two flags are derived from its
//! other fields and must be refreshed whenever those change:
//! - `emits_gravity`, from mass and radius;
//! - `radiates`, from spectrum and radius.

use std::sync::atomic::{AtomicI64, Ordering};

use bitflags::bitflags;
use rand::Rng;
use thiserror::Error;
use tracing::warn;

use crate::{
    config::UniverseConfig,
    math::{almost_zero, Basis, Vec3},
    message::BodyProperties,
    spectrum::Spectrum,
};

/// Process-unique id of a body or beam.
pub type PhysId = i64;

/// Never names a body. Marks the end of a visual data frame.
pub const NO_BODY: PhysId = -1;

bitflags! {
    /// Properties touched by a partial update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Changed: u8 {
        const LABEL = 1 << 0;
        const MASS = 1 << 1;
        const RADIUS = 1 << 2;
        const POSITION = 1 << 3;
        const VELOCITY = 1 << 4;
        const ORIENTATION = 1 << 5;
        const THRUST = 1 << 6;
        const SPECTRUM = 1 << 7;
    }
}

impl Changed {
    /// Changes that can flip `emits_gravity` or `radiates`.
    pub const DERIVED_INPUTS: Changed = Changed::MASS
        .union(Changed::RADIUS)
        .union(Changed::SPECTRUM);
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BodyError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("`{0}` must be positive")]
    NonPositive(&'static str),
    #[error("`{0}` must be finite")]
    NonFinite(&'static str),
}

/// Mass and radius divide in the collision and gravity maths.
fn physical(v: f64) -> bool {
    v.is_finite() && v > 0.0 && !almost_zero(v)
}

fn required_vec(v: Option<Vec3>, field: &'static str) -> Result<Vec3, BodyError> {
    let v = v.ok_or(BodyError::MissingField(field))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(BodyError::NonFinite(field))
    }
}

/// The part of a body the collision engine looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kinematics {
    pub position: Vec3,
    pub velocity: Vec3,
    pub radius: f64,
    pub mass: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsBody {
    pub id: PhysId,
    pub obj_type: String,
    pub position: Vec3,
    pub velocity: Vec3,
    pub thrust: Vec3,
    pub basis: Basis,
    pub mass: f64,
    pub radius: f64,
    /// `None` for bodies whose owner tracks damage itself.
    pub health: Option<f64>,
    pub spectrum: Option<Spectrum>,
    pub emits_gravity: bool,
    pub radiates: bool,
    /// Seconds of the current tick already simulated by collision resolution.
    pub t: f64,
}

/// True when a body is massive enough to be worth integrating as an attractor.
pub fn emits_gravity(gravitational_constant: f64, mass: f64, radius: f64, cutoff: f64) -> bool {
    if radius <= 0.0 {
        return false;
    }
    gravitational_constant * mass / radius > cutoff
}

impl PhysicsBody {
    /// Builds a dumb body with default kinematics.
    pub fn new(id: PhysId, obj_type: impl Into<String>, mass: f64, radius: f64, cfg: &UniverseConfig) -> Self {
        let mut body = Self {
            id,
            obj_type: obj_type.into(),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            thrust: Vec3::ZERO,
            basis: Basis::default(),
            mass,
            radius,
            health: Some(mass * cfg.health_mass_scale),
            spectrum: None,
            emits_gravity: false,
            radiates: false,
            t: 0.0,
        };
        body.refresh_derived(cfg);
        body
    }

    /// Builds a body from spawn fields. Everything but the spectrum is required.
    /// A received spectrum is jittered by `spectrum_slush_range`.
    pub fn from_props<R: Rng + ?Sized>(
        id: PhysId,
        props: &BodyProperties,
        cfg: &UniverseConfig,
        rng: &mut R,
    ) -> Result<Self, BodyError> {
        let obj_type = props.obj_type.clone().ok_or(BodyError::MissingField("obj_type"))?;
        let mass = props.mass.ok_or(BodyError::MissingField("mass"))?;
        let radius = props.radius.ok_or(BodyError::MissingField("radius"))?;
        if !physical(mass) {
            return Err(BodyError::NonPositive("mass"));
        }
        if !physical(radius) {
            return Err(BodyError::NonPositive("radius"));
        }

        let mut body = Self::new(id, obj_type, mass, radius, cfg);
        body.position = required_vec(props.position, "position")?;
        body.velocity = required_vec(props.velocity, "velocity")?;
        body.basis = Basis::from_wire(props.orientation.ok_or(BodyError::MissingField("orientation"))?);
        body.thrust = required_vec(props.thrust, "thrust")?;
        body.spectrum = props.spectrum.clone().map(|mut s| {
            s.perturb(rng, cfg.spectrum_slush_range);
            s
        });
        body.refresh_derived(cfg);
        Ok(body)
    }

    /// Stops tracking health; damage no longer applies.
    pub fn make_invulnerable(&mut self) {
        self.health = None;
    }

    pub fn kinematics(&self) -> Kinematics {
        Kinematics {
            position: self.position,
            velocity: self.velocity,
            radius: self.radius,
            mass: self.mass,
        }
    }

    /// Squared radius of the zone where this body's radiation is harmful, or 0.
    pub fn safe_distance_sq(&self, radiation_cutoff: f64) -> f64 {
        self.spectrum
            .as_ref()
            .map_or(0.0, |s| s.safe_distance_sq(radiation_cutoff))
    }

    pub fn refresh_derived(&mut self, cfg: &UniverseConfig) {
        self.emits_gravity = emits_gravity(
            cfg.gravitational_constant,
            self.mass,
            self.radius,
            cfg.gravity_magnitude_cutoff,
        );
        self.radiates = self.safe_distance_sq(cfg.radiation_energy_cutoff) > self.radius * self.radius;
    }

    /// Applies the fields present in `props`.
    ///
    /// Position and velocity are deltas; everything else replaces the current
    /// value. A spectrum is jittered, then merged line by line into the
    /// existing one. Non-positive mass or radius and non-finite vectors are
    /// dropped; the rest of the update still applies.
    pub fn apply_update<R: Rng + ?Sized>(
        &mut self,
        props: &BodyProperties,
        cfg: &UniverseConfig,
        rng: &mut R,
    ) -> Changed {
        let mut changed = Changed::empty();
        let id = self.id;

        if let Some(label) = &props.obj_type {
            self.obj_type = label.clone();
            changed |= Changed::LABEL;
        }
        if let Some(mass) = props.mass.filter(|m| {
            physical(*m) || {
                warn!(id, mass = *m, "ignoring non-physical mass");
                false
            }
        }) {
            if !almost_zero(mass - self.mass) {
                changed |= Changed::MASS;
            }
            self.mass = mass;
        }
        if let Some(radius) = props.radius.filter(|r| {
            physical(*r) || {
                warn!(id, radius = *r, "ignoring non-physical radius");
                false
            }
        }) {
            if !almost_zero(radius - self.radius) {
                changed |= Changed::RADIUS;
            }
            self.radius = radius;
        }
        let finite = |v: Option<Vec3>, field: &str| {
            v.filter(|v| {
                v.is_finite() || {
                    warn!(id, field, "ignoring non-finite update");
                    false
                }
            })
        };
        if let Some(dp) = finite(props.position, "position") {
            self.position += dp;
            changed |= Changed::POSITION;
        }
        if let Some(dv) = finite(props.velocity, "velocity") {
            self.velocity += dv;
            changed |= Changed::VELOCITY;
        }
        if let Some(o) = props.orientation {
            self.basis = Basis::from_wire(o);
            changed |= Changed::ORIENTATION;
        }
        if let Some(thrust) = finite(props.thrust, "thrust") {
            self.thrust = thrust;
            changed |= Changed::THRUST;
        }
        if let Some(incoming) = &props.spectrum {
            let mut incoming = incoming.clone();
            incoming.perturb(rng, cfg.spectrum_slush_range);
            match &mut self.spectrum {
                Some(current) => current.combine(&incoming),
                None => self.spectrum = Some(incoming),
            }
            changed |= Changed::SPECTRUM;
        }

        if changed.intersects(Changed::DERIVED_INPUTS) {
            self.refresh_derived(cfg);
        }
        changed
    }

    /// Applies an impact. Returns true once health has run out.
    ///
    /// Impacts up to `threshold` of current health are shrugged off; only the
    /// excess is subtracted.
    pub fn absorb_impact(&mut self, energy: f64, threshold: f64) -> bool {
        let Some(health) = self.health.as_mut() else {
            return false;
        };
        let tolerated = threshold * *health;
        if energy > tolerated {
            *health -= energy - tolerated;
        }
        *health <= 0.0
    }

    /// Moves the body along its current velocity up to `t_abs` seconds into
    /// the tick and applies a collision's velocity change.
    pub fn resolve_contact(&mut self, t_abs: f64, dv: Vec3) {
        let step = (t_abs - self.t).max(0.0);
        self.position += self.velocity * step;
        self.t = self.t.max(t_abs);
        self.velocity += dv;
    }

    /// Position after `t` seconds of the tick, ignoring acceleration.
    pub fn position_at(&self, t: f64) -> Vec3 {
        self.position + self.velocity * (t - self.t)
    }
}

/// Hands out physics ids.
///
/// Ids only grow. With `rand_max > 1` the step between consecutive ids is
/// uniform in `[1, rand_max]`, which makes ids hard to guess.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicI64,
    rand_max: i64,
}

impl IdAllocator {
    pub fn new(rand_max: i64) -> Self {
        Self {
            next: AtomicI64::new(1),
            rand_max: rand_max.max(1),
        }
    }

    pub fn next_id(&self) -> PhysId {
        let step = if self.rand_max > 1 {
            rand::thread_rng().gen_range(1..=self.rand_max)
        } else {
            1
        };
        self.next.fetch_add(step, Ordering::Relaxed)
    }
}
