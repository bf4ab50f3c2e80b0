//! Directed energy beams.
//!
//! A beam is an expanding rectangular wavefront: it leaves `origin` along
//! `direction` at `speed`, spreading by a horizontal and a vertical angle.
//! Its energy is shared over the wavefront, so it fades with distance and is
//! spent once the energy density drops below `beam_energy_cutoff`.

use std::f64::consts::FRAC_2_PI;

use rand::Rng;
use thiserror::Error;

use crate::{
    body::{PhysId, PhysicsBody},
    config::UniverseConfig,
    math::{almost_zero, Vec3},
    message::{BeamFire, BeamKind},
    spectrum::Spectrum,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BeamError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("beam velocity is zero")]
    ZeroVelocity,
    #[error("COMM beam without a message")]
    MissingCommText,
    #[error("`{0}` must be finite")]
    NonFinite(&'static str),
    #[error("`{0}` must be positive")]
    NonPositive(&'static str),
}

fn finite_vec(v: Vec3, field: &'static str) -> Result<Vec3, BeamError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(BeamError::NonFinite(field))
    }
}

/// A spread or energy must be a finite positive number, or the beam would
/// never fade below the cutoff.
fn positive(v: Option<f64>, field: &'static str) -> Result<f64, BeamError> {
    let v = v.ok_or(BeamError::MissingField(field))?;
    if !v.is_finite() {
        return Err(BeamError::NonFinite(field));
    }
    if v <= 0.0 || almost_zero(v) {
        return Err(BeamError::NonPositive(field));
    }
    Ok(v)
}

/// Everything needed to launch a beam, in world coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamSpec {
    pub origin: Vec3,
    pub velocity: Vec3,
    pub up: Vec3,
    /// Full horizontal spread, radians.
    pub spread_h: f64,
    /// Full vertical spread, radians.
    pub spread_v: f64,
    pub energy: f64,
    pub kind: BeamKind,
    pub comm_msg: Option<String>,
    pub data: Option<String>,
    pub spectrum: Option<Spectrum>,
}

impl BeamSpec {
    /// Validates a fire request. `origin` and `velocity` in the request are
    /// relative to `frame`, the sender's body, when there is one.
    pub fn from_request(req: &BeamFire, frame: Option<&PhysicsBody>) -> Result<Self, BeamError> {
        let origin = finite_vec(req.origin.ok_or(BeamError::MissingField("origin"))?, "origin")?;
        let velocity = finite_vec(req.velocity.ok_or(BeamError::MissingField("velocity"))?, "velocity")?;
        let up = finite_vec(req.up.ok_or(BeamError::MissingField("up"))?, "up")?;
        let kind = req.kind.ok_or(BeamError::MissingField("beam_type"))?;
        if up.is_almost_zero() {
            return Err(BeamError::NonPositive("up"));
        }
        if velocity.is_almost_zero() {
            return Err(BeamError::ZeroVelocity);
        }
        if kind == BeamKind::Comm && req.comm_msg.is_none() {
            return Err(BeamError::MissingCommText);
        }

        let (origin, velocity) = match frame {
            Some(body) => (origin + body.position, velocity + body.velocity),
            None => (origin, velocity),
        };
        Ok(Self {
            origin,
            velocity,
            up,
            spread_h: positive(req.spread_h, "spread_h")?,
            spread_v: positive(req.spread_v, "spread_v")?,
            energy: positive(req.energy, "energy")?,
            kind,
            comm_msg: req.comm_msg.clone(),
            data: None,
            spectrum: req.spectrum.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Beam {
    pub id: PhysId,
    pub kind: BeamKind,
    pub origin: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub right: Vec3,
    /// Cosines of the horizontal and vertical half-spreads.
    pub cosines: [f64; 2],
    /// Wavefront area at distance `d` is `area_factor · d²`.
    pub area_factor: f64,
    pub speed: f64,
    pub energy: f64,
    pub distance_travelled: f64,
    pub max_distance: f64,
    pub comm_msg: Option<String>,
    /// Scan reply text carried back by a scan-result beam.
    pub data: Option<String>,
    pub spectrum: Option<Spectrum>,
    /// Snapshot of the scanned body, carried by scan-result beams.
    pub scan_target: Option<Box<PhysicsBody>>,
}

fn half_spread_cos(spread: f64) -> f64 {
    let c = (spread / 2.0).cos();
    if almost_zero(c) {
        0.0
    } else {
        c
    }
}

fn max_distance(energy: f64, area_factor: f64, cutoff: f64) -> f64 {
    (energy / (area_factor * cutoff)).sqrt()
}

impl Beam {
    /// Launches a beam. The spectrum is jittered by `spectrum_slush_range`.
    pub fn new<R: Rng + ?Sized>(id: PhysId, spec: BeamSpec, cfg: &UniverseConfig, rng: &mut R) -> Self {
        let direction = spec.velocity.normalized();
        let up = spec.up.normalized();
        let right = direction.cross(up);
        let area_factor = FRAC_2_PI * spec.spread_h * spec.spread_v;
        let spectrum = spec.spectrum.map(|mut s| {
            s.perturb(rng, cfg.spectrum_slush_range);
            s
        });

        Self {
            id,
            kind: spec.kind,
            origin: spec.origin,
            direction,
            up,
            right,
            cosines: [half_spread_cos(spec.spread_h), half_spread_cos(spec.spread_v)],
            area_factor,
            speed: spec.velocity.len(),
            energy: spec.energy,
            distance_travelled: 0.0,
            max_distance: max_distance(spec.energy, area_factor, cfg.beam_energy_cutoff),
            comm_msg: spec.comm_msg,
            data: spec.data,
            spectrum,
            scan_target: None,
        }
    }

    /// Centre of the leading wavefront.
    pub fn front(&self) -> Vec3 {
        self.origin + self.direction * self.distance_travelled
    }

    pub fn advance(&mut self, dt: f64) {
        self.distance_travelled += self.speed * dt;
    }

    pub fn is_spent(&self) -> bool {
        self.distance_travelled > self.max_distance
    }

    /// Builds the scan-result beam sent back from a hit.
    ///
    /// `hit_offset` is the hit point relative to this beam's origin. The new
    /// beam starts there and heads back toward the origin with the same
    /// spread and speed.
    pub fn return_beam(&self, id: PhysId, energy: f64, hit_offset: Vec3, cfg: &UniverseConfig) -> Beam {
        let d = -hit_offset.normalized();
        let mut up = Vec3::new(-d.y, d.x, 0.0).normalized();
        if up.is_almost_zero() {
            up = Vec3::new(1.0, 0.0, 0.0);
        }

        Beam {
            id,
            kind: BeamKind::ScanResult,
            origin: self.origin + hit_offset,
            direction: d,
            up,
            right: d.cross(up),
            cosines: self.cosines,
            area_factor: self.area_factor,
            speed: self.speed,
            energy,
            distance_travelled: 0.0,
            max_distance: max_distance(energy, self.area_factor, cfg.beam_energy_cutoff),
            comm_msg: None,
            data: None,
            spectrum: self.spectrum.clone(),
            scan_target: None,
        }
    }
}
