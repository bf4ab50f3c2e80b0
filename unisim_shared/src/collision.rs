//! Continuous collision detection.
//!
//! Both tests sweep the target along its velocity over a whole interval and
//! report the fraction `t ∈ [0, 1]` of that interval at which the hit happens.
//! Nothing here mutates state; callers decide how to apply a hit.

use std::f64::consts::PI;

use crate::{
    beam::Beam,
    body::Kinematics,
    math::{almost_zero, Vec3},
};

/// What a sphere–sphere hit does to one of the two bodies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactEffect {
    /// Velocity change along the contact normal.
    pub dv: Vec3,
    /// Unit direction the other body was moving, relative to this one.
    pub direction: Vec3,
    /// Contact point relative to this body's centre.
    pub contact: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereHit {
    /// Fraction of the interval at first contact.
    pub t: f64,
    /// Kinetic energy both bodies carried along the contact normal.
    pub energy: f64,
    pub effects: [ContactEffect; 2],
}

/// Elastic collision test between two moving spheres over `dt` seconds.
///
/// A hit needs the swept paths to come within the sum of the radii, the
/// bodies to be closing along the contact normal, and a non-negligible
/// normal energy. Tangential velocity is conserved; the normal components
/// are exchanged by the one-dimensional elastic rule.
pub fn sphere_sphere(a: &Kinematics, b: &Kinematics, dt: f64) -> Option<SphereHit> {
    let da = a.velocity * dt;
    let db = b.velocity * dt;
    let vd = da - db;
    if vd.is_almost_zero() {
        return None;
    }

    let pd = a.position - b.position;
    let dd = vd.dot(vd);
    let od = vd.dot(pd);
    let r = a.radius + b.radius;
    let rr = r * r;

    // Closest approach over the interval.
    let closest = (-od / dd).clamp(0.0, 1.0);
    if (pd + vd * closest).len_sq() > rr {
        return None;
    }

    // First time the separation equals the sum of radii.
    let disc = (od * od - dd * (pd.len_sq() - rr)).max(0.0);
    let mut t = (-od - disc.sqrt()) / dd;
    if almost_zero(t) || t < 0.0 {
        t = 0.0;
    }
    if !(0.0..=1.0).contains(&t) {
        return None;
    }

    let pa = a.position + da * t;
    let pb = b.position + db * t;
    let n = (pb - pa).normalized();
    if n.is_almost_zero() {
        return None;
    }

    let vna = a.velocity.dot(n);
    let vnb = b.velocity.dot(n);
    let closing = vna - vnb;
    if almost_zero(closing) || closing < 0.0 {
        return None;
    }

    let mut energy = 0.0;
    if vna > 0.0 {
        energy += 0.5 * a.mass * vna * vna;
    }
    if vnb < 0.0 {
        energy += 0.5 * b.mass * vnb * vnb;
    }
    if almost_zero(energy) {
        return None;
    }

    let inv_m = 1.0 / (a.mass + b.mass);
    let vna_after = (vna * (a.mass - b.mass) + 2.0 * b.mass * vnb) * inv_m;
    let vnb_after = (vnb * (b.mass - a.mass) + 2.0 * a.mass * vna) * inv_m;
    let direction = (b.velocity - a.velocity).normalized();

    Some(SphereHit {
        t,
        energy,
        effects: [
            ContactEffect {
                dv: n * (vna_after - vna),
                direction,
                contact: n * a.radius,
            },
            ContactEffect {
                dv: n * (vnb_after - vnb),
                direction: -direction,
                contact: n * -b.radius,
            },
        ],
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamHit {
    /// Fraction of the interval at which the wavefront meets the body.
    pub t: f64,
    /// Energy delivered to the body.
    pub energy: f64,
    /// Hit point relative to the beam origin.
    pub offset: Vec3,
}

/// Tests a moving sphere against a beam's wavefront over `dt` seconds.
///
/// The beam volume is bounded by two pairs of planes, one per spread axis.
/// For each axis the body's bearing at the start and end of the interval
/// gives a window of `t` in which it is inside; the two windows are
/// intersected and the body must then sit within this tick's wavefront slab.
pub fn beam_sphere(beam: &Beam, target: &Kinematics, dt: f64) -> Option<BeamHit> {
    let p = target.position - beam.origin;
    // Never hit whatever sits at the muzzle on the first step.
    if p.is_almost_zero() && almost_zero(beam.distance_travelled) {
        return None;
    }

    let dp = target.velocity * dt;
    let p_end = p + dp;

    // [0] is the horizontal bearing (projected down `up`), [1] the vertical
    // bearing (projected down `right`).
    let axes = [beam.up, beam.right];
    let bearing = |v: Vec3, i: usize| v.reject(axes[i]).normalized().dot(beam.direction);
    let mut current = [bearing(p, 0), bearing(p, 1)];
    let mut future = [bearing(p_end, 0), bearing(p_end, 1)];
    let mut current_in = [current[0] >= beam.cosines[0], current[1] >= beam.cosines[1]];
    let mut future_in = [future[0] >= beam.cosines[0], future[1] >= beam.cosines[1]];

    side_plane_bearing(beam, p, &mut current, &mut current_in);
    side_plane_bearing(beam, p_end, &mut future, &mut future_in);

    let mut entering: f64 = -0.1;
    let mut leaving: f64 = 1.1;
    for i in 0..2 {
        // A negative cosine on the other axis means the beam also covers
        // bearings behind the muzzle.
        if beam.cosines[1 - i] < 0.0 {
            current_in[i] = current_in[i] || -current[i] >= beam.cosines[i];
            future_in[i] = future_in[i] || -future[i] >= beam.cosines[i];
        }

        let delta = future[i] - current[i];
        match (current_in[i], future_in[i]) {
            (false, false) => return None,
            (true, true) => {}
            (false, true) => {
                if almost_zero(delta) {
                    return None;
                }
                entering = entering.max((beam.cosines[i] - current[i]) / delta);
            }
            (true, false) => {
                if almost_zero(delta) {
                    return None;
                }
                leaving = leaving.min((beam.cosines[i] - current[i]) / delta);
            }
        }
    }

    if entering > leaving {
        return None;
    }

    let t: f64 = if entering >= 0.0 && leaving > 1.0 {
        1.0
    } else if leaving <= 1.0 && entering < 0.0 {
        leaving
    } else {
        (entering + leaving) / 2.0
    };
    let t = t.clamp(0.0, 1.0);

    let offset = p + dp * t;
    let distance = offset.dot(beam.direction).abs();
    if distance < beam.distance_travelled || distance > beam.distance_travelled + beam.speed * dt {
        return None;
    }

    let wavefront_area = beam.area_factor * distance * distance;
    let cross_section = PI * target.radius * target.radius;
    let factor = if almost_zero(wavefront_area) {
        1.0
    } else {
        (cross_section / wavefront_area).min(1.0)
    };

    Some(BeamHit {
        t,
        energy: beam.energy * factor,
        offset,
    })
}

/// Bearings of points in the up/right plane compare as zero against the
/// direction. For beams wider than half a turn on one axis, test such points
/// against the other axis instead.
fn side_plane_bearing(beam: &Beam, p: Vec3, bearing: &mut [f64; 2], inside: &mut [bool; 2]) {
    if !almost_zero(p.dot(beam.direction)) {
        return;
    }
    let len = p.len();
    if almost_zero(len) {
        return;
    }
    let wide = |c: f64| c < 0.0 || almost_zero(c);
    if !inside[0] && wide(beam.cosines[1]) {
        bearing[0] = p.dot(beam.up) / len;
        inside[0] = bearing[0] >= beam.cosines[0];
    } else if !inside[1] && wide(beam.cosines[0]) {
        bearing[1] = p.dot(beam.right) / len;
        inside[1] = bearing[1] >= beam.cosines[1];
    }
}
