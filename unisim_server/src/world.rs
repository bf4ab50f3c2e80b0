//! The simulated world and its tick.
//!
//! One [`World`] owns every live body and beam plus the bookkeeping derived
//! from them: attractors, radiators, smart-body links, open scan queries and
//! vis subscribers. The server keeps it behind one lock, held for a whole
//! tick and for short mutations from connection tasks between ticks.
//!
//! A tick runs, in order:
//! 1. beams against bodies, as they stood when the tick began;
//! 2. body against body, in rounds of earliest-first contacts;
//! 3. radiation, once per simulated second;
//! 4. gravity and thrust integration, then beam advance;
//! 5. reconciliation of everything queued in the [`LifecycleQueue`].
//!
//! Scan queries left unanswered past `scan_query_timeout` are dropped before
//! any of that.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, trace};
use unisim_shared::{
    beam::Beam,
    body::{Changed, IdAllocator, Kinematics, PhysId, PhysicsBody},
    collision::{self, BeamHit, SphereHit},
    config::UniverseConfig,
    gravity::{self, Attractor},
    math::{almost_zero, Vec3},
    message::{
        BeamKind, BodyProperties, Collision, CollisionKind, Message, MessageBody, ScanQuery,
        ScanResult,
    },
    net::ConnId,
    spectrum::Spectrum,
};

use crate::{
    lifecycle::{Drained, Expiry, LifecycleQueue, Pending, RemoteLink},
    vis::VisRegistry,
};

/// Observer of world events. Every method has an empty default.
pub trait WorldListener: Send {
    /// `other` is the body, beam or radiator responsible.
    fn on_collision(&mut self, _body: PhysId, _other: Option<PhysId>, _energy: f64, _contact: Vec3) {}

    fn on_expire(&mut self, _body: &PhysicsBody) {}

    fn on_attractors_changed(&mut self, _attractors: &BTreeSet<PhysId>) {}
}

/// Counters for the most recent tick plus running totals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorldMetrics {
    pub ticks: u64,
    /// Simulated seconds since start.
    pub total_time: f64,
    /// Simulated seconds covered by the last tick.
    pub last_dt: f64,
    /// Wall-clock seconds spent inside the last tick.
    pub last_physics_wall: f64,
    /// Wall-clock seconds spent inside all ticks.
    pub total_physics_wall: f64,
    /// Wall-clock seconds spent on the last vis broadcast.
    pub last_vis_frame: f64,
    pub candidate_pairs: usize,
    pub collisions: usize,
    pub rounds: u32,
    pub beam_hits: usize,
}

/// Everything needed to send a scan-result beam once the target answers.
#[derive(Debug, Clone)]
struct ScanContext {
    beam: Beam,
    target: Box<PhysicsBody>,
    energy: f64,
    hit_offset: Vec3,
    /// Simulated time the query was sent.
    opened_at: f64,
}

#[derive(Debug, Default)]
struct ScanTable {
    last_id: i64,
    open: HashMap<i64, ScanContext>,
    /// (beam, target) pairs already queried.
    seen: HashSet<(PhysId, PhysId)>,
}

impl ScanTable {
    /// Records a query, once per beam/target pair.
    fn open(&mut self, beam: &Beam, target: &PhysicsBody, hit: &BeamHit, now: f64) -> Option<i64> {
        if !self.seen.insert((beam.id, target.id)) {
            return None;
        }
        self.last_id += 1;
        let mut beam = beam.clone();
        beam.scan_target = None;
        self.open.insert(
            self.last_id,
            ScanContext {
                beam,
                target: Box::new(target.clone()),
                energy: hit.energy,
                hit_offset: hit.offset,
                opened_at: now,
            },
        );
        Some(self.last_id)
    }

    fn forget_beam(&mut self, beam: PhysId) {
        self.seen.retain(|(b, _)| *b != beam);
    }

    /// Closes every query addressed to `target`; nobody is left to answer.
    fn forget_target(&mut self, target: PhysId) {
        self.open.retain(|_, ctx| ctx.target.id != target);
        self.seen.retain(|(_, t)| *t != target);
    }

    /// Closes queries sent before `cutoff`. Returns how many were dropped.
    fn drop_stale(&mut self, cutoff: f64) -> usize {
        let before = self.open.len();
        self.open.retain(|_, ctx| ctx.opened_at >= cutoff);
        before - self.open.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    a: PhysId,
    b: PhysId,
    /// Seconds into the tick.
    t_abs: f64,
    hit: SphereHit,
}

enum BeamOutcome {
    None,
    Damage(f64),
    Return(Box<Beam>),
}

pub struct World {
    cfg: UniverseConfig,
    ids: Arc<IdAllocator>,
    queue: Arc<LifecycleQueue>,
    bodies: BTreeMap<PhysId, PhysicsBody>,
    remotes: BTreeMap<PhysId, RemoteLink>,
    beams: BTreeMap<PhysId, Beam>,
    attractors: BTreeSet<PhysId>,
    radiators: BTreeSet<PhysId>,
    scans: ScanTable,
    pub vis: VisRegistry,
    listeners: Vec<Box<dyn WorldListener>>,
    metrics: WorldMetrics,
    last_effect_time: f64,
    rng: StdRng,
}

impl World {
    pub fn new(cfg: UniverseConfig, ids: Arc<IdAllocator>, queue: Arc<LifecycleQueue>) -> Self {
        Self {
            cfg,
            ids,
            queue,
            bodies: BTreeMap::new(),
            remotes: BTreeMap::new(),
            beams: BTreeMap::new(),
            attractors: BTreeSet::new(),
            radiators: BTreeSet::new(),
            scans: ScanTable::default(),
            vis: VisRegistry::default(),
            listeners: Vec::new(),
            metrics: WorldMetrics::default(),
            last_effect_time: 0.0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn cfg(&self) -> &UniverseConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> &WorldMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut WorldMetrics {
        &mut self.metrics
    }

    pub fn add_listener(&mut self, listener: Box<dyn WorldListener>) {
        self.listeners.push(listener);
    }

    pub fn body(&self, id: PhysId) -> Option<&PhysicsBody> {
        self.bodies.get(&id)
    }

    pub fn bodies(&self) -> impl Iterator<Item = &PhysicsBody> {
        self.bodies.values()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn beams(&self) -> impl Iterator<Item = &Beam> {
        self.beams.values()
    }

    pub fn attractors(&self) -> &BTreeSet<PhysId> {
        &self.attractors
    }

    pub fn radiators(&self) -> &BTreeSet<PhysId> {
        &self.radiators
    }

    pub fn open_scan_count(&self) -> usize {
        self.scans.open.len()
    }

    pub fn is_smart(&self, id: PhysId) -> bool {
        self.remotes.contains_key(&id)
    }

    /// The smart body `id`, if `conn` owns it.
    pub fn owned_body(&self, id: Option<PhysId>, conn: ConnId) -> Option<&PhysicsBody> {
        let id = id?;
        let link = self.remotes.get(&id)?;
        if link.conn.id() != conn {
            return None;
        }
        self.bodies.get(&id)
    }

    /// Applies a partial update to a smart body owned by `conn`.
    /// Returns `None` when `conn` does not own a live body `id`.
    pub fn update_owned(&mut self, id: PhysId, conn: ConnId, props: &BodyProperties) -> Option<Changed> {
        self.owned_body(Some(id), conn)?;
        let body = self.bodies.get_mut(&id)?;
        let changed = body.apply_update(props, &self.cfg, &mut self.rng);
        if changed.intersects(Changed::DERIVED_INPUTS) {
            self.sync_derived(id);
        }
        Some(changed)
    }

    fn sync_derived(&mut self, id: PhysId) {
        let Some(body) = self.bodies.get(&id) else {
            return;
        };
        let (gravity, radiates) = (body.emits_gravity, body.radiates);

        if radiates {
            self.radiators.insert(id);
        } else {
            self.radiators.remove(&id);
        }
        let flipped = if gravity {
            self.attractors.insert(id)
        } else {
            self.attractors.remove(&id)
        };
        if flipped {
            debug!(id, emits_gravity = gravity, "attractor set changed");
            self.notify_attractors();
        }
    }

    fn notify_attractors(&mut self) {
        for l in self.listeners.iter_mut() {
            l.on_attractors_changed(&self.attractors);
        }
    }

    /// Sends `body` to the owner of smart body `id`. Dumb bodies are skipped.
    fn send_to_owner(&self, id: PhysId, body: MessageBody) {
        let Some(link) = self.remotes.get(&id) else {
            return;
        };
        let mut msg = Message::new(body).with_server_id(id);
        msg.client_id = link.client_id;
        if link.conn.send(&msg).is_err() {
            debug!(id, conn = %link.conn.id(), "owner connection closed");
        }
    }

    fn damage(&mut self, id: PhysId, energy: f64) {
        let threshold = self.cfg.health_damage_threshold;
        let Some(body) = self.bodies.get_mut(&id) else {
            return;
        };
        if body.absorb_impact(energy, threshold) {
            info!(id, obj_type = %body.obj_type, energy, "body destroyed");
            self.queue.expire(id);
        }
    }

    // ─── Tick ───────────────────────────────────────────────────────────────

    /// Advances the world by `dt` simulated seconds.
    pub fn tick(&mut self, dt: f64) {
        self.metrics.candidate_pairs = 0;
        self.metrics.collisions = 0;
        self.metrics.rounds = 0;
        self.metrics.beam_hits = 0;

        let stale = self
            .scans
            .drop_stale(self.metrics.total_time - self.cfg.scan_query_timeout);
        if stale > 0 {
            debug!(stale, "unanswered scan queries dropped");
        }

        self.beam_pass(dt);
        self.body_pass(dt);
        if self.metrics.total_time - self.last_effect_time >= 1.0 {
            self.radiate();
            self.last_effect_time = self.metrics.total_time;
        }
        self.integrate(dt);
        let drained = self.queue.drain();
        self.reconcile(drained);

        self.metrics.ticks += 1;
        self.metrics.total_time += dt;
        self.metrics.last_dt = dt;
        trace!(
            tick = self.metrics.ticks,
            bodies = self.bodies.len(),
            beams = self.beams.len(),
            collisions = self.metrics.collisions,
            "tick"
        );
    }

    // ─── Beams ──────────────────────────────────────────────────────────────

    fn beam_pass(&mut self, dt: f64) {
        let mut hits = Vec::new();
        for beam in self.beams.values() {
            for body in self.bodies.values() {
                if let Some(hit) = collision::beam_sphere(beam, &body.kinematics(), dt) {
                    hits.push((beam.id, body.id, hit));
                }
            }
        }
        self.metrics.beam_hits = hits.len();
        for (beam_id, body_id, hit) in hits {
            self.apply_beam_hit(beam_id, body_id, &hit);
        }
    }

    fn apply_beam_hit(&mut self, beam_id: PhysId, body_id: PhysId, hit: &BeamHit) {
        let (Some(beam), Some(body)) = (self.beams.get(&beam_id), self.bodies.get(&body_id)) else {
            return;
        };
        debug!(beam = beam_id, body = body_id, kind = ?beam.kind, energy = hit.energy, "beam hit");
        let contact = beam.origin + hit.offset - body.position;
        for l in self.listeners.iter_mut() {
            l.on_collision(body_id, Some(beam_id), hit.energy, contact);
        }

        let outcome = if self.remotes.contains_key(&body_id) {
            self.send_to_owner(
                body_id,
                MessageBody::Collision(Collision {
                    position: Some(contact),
                    direction: Some(beam.direction),
                    energy: Some(hit.energy),
                    kind: Some(CollisionKind::Beam(beam.kind)),
                    comm_msg: beam.comm_msg.clone(),
                    spectrum: beam.spectrum.clone(),
                }),
            );
            match beam.kind {
                BeamKind::Scan => {
                    if let Some(scan_id) = self.scans.open(beam, body, hit, self.metrics.total_time) {
                        self.send_to_owner(
                            body_id,
                            MessageBody::ScanQuery(ScanQuery {
                                scan_id: Some(scan_id),
                                energy: Some(hit.energy),
                                direction: Some(beam.direction),
                                spectrum: beam.spectrum.clone(),
                            }),
                        );
                    }
                }
                BeamKind::ScanResult => {
                    if let Some(target) = &beam.scan_target {
                        self.send_to_owner(
                            body_id,
                            MessageBody::ScanResult(scan_result(target, body, beam)),
                        );
                    }
                }
                BeamKind::Comm | BeamKind::Weapon => {}
            }
            BeamOutcome::None
        } else {
            match beam.kind {
                BeamKind::Weapon => BeamOutcome::Damage(hit.energy),
                BeamKind::Scan => {
                    let mut back = beam.return_beam(self.ids.next_id(), hit.energy, hit.offset, &self.cfg);
                    back.scan_target = Some(Box::new(body.clone()));
                    BeamOutcome::Return(Box::new(back))
                }
                BeamKind::Comm | BeamKind::ScanResult => BeamOutcome::None,
            }
        };

        match outcome {
            BeamOutcome::None => {}
            BeamOutcome::Damage(energy) => self.damage(body_id, energy),
            BeamOutcome::Return(back) => self.queue.add_beam(*back),
        }
    }

    /// Builds the scan-result beam answering query `scan_id`.
    ///
    /// Only the scanned body may answer. The query is closed either way once
    /// it matches.
    pub fn answer_scan(&mut self, scan_id: i64, responder: Option<PhysId>, data: String) -> Option<Beam> {
        let ctx = self.scans.open.get(&scan_id)?;
        if Some(ctx.target.id) != responder {
            return None;
        }
        let ctx = self.scans.open.remove(&scan_id)?;
        let mut back = ctx
            .beam
            .return_beam(self.ids.next_id(), ctx.energy, ctx.hit_offset, &self.cfg);
        back.scan_target = Some(ctx.target);
        back.data = Some(data);
        Some(back)
    }

    /// Passive sensor sweep for `observer`: one result per body with a
    /// spectrum strong enough to notice at this distance.
    pub fn passive_scan(&self, observer: PhysId) -> Vec<ScanResult> {
        let Some(me) = self.bodies.get(&observer) else {
            return Vec::new();
        };
        let r2 = me.radius * me.radius;
        let mut out = Vec::new();
        for other in self.bodies.values() {
            let Some(spectrum) = &other.spectrum else {
                continue;
            };
            let dp = other.position - me.position;
            let d2 = dp.len_sq();
            let scale = if almost_zero(d2) {
                1.0
            } else {
                (r2 / (4.0 * d2)).min(1.0)
            };
            if scale * spectrum.total_power() < self.cfg.collision_energy_cutoff {
                continue;
            }
            out.push(ScanResult {
                position: Some(dp.normalized()),
                obj_spectrum: Some(spectrum.scaled(scale)),
                ..Default::default()
            });
        }
        out
    }

    // ─── Bodies ─────────────────────────────────────────────────────────────

    fn candidate(&self, a: PhysId, b: PhysId, dt: f64) -> Option<Candidate> {
        let (ba, bb) = (self.bodies.get(&a)?, self.bodies.get(&b)?);
        let start = ba.t.max(bb.t);
        let remaining = dt - start;
        if remaining <= 0.0 || almost_zero(remaining) {
            return None;
        }
        let ka = Kinematics {
            position: ba.position_at(start),
            ..ba.kinematics()
        };
        let kb = Kinematics {
            position: bb.position_at(start),
            ..bb.kinematics()
        };
        let hit = collision::sphere_sphere(&ka, &kb, remaining)?;
        if hit.energy <= self.cfg.collision_energy_cutoff {
            return None;
        }
        Some(Candidate {
            a,
            b,
            t_abs: start + hit.t * remaining,
            hit,
        })
    }

    fn kinetic_sum(&self, ids: &BTreeSet<PhysId>) -> f64 {
        ids.iter()
            .filter_map(|id| self.bodies.get(id))
            .map(|b| b.mass * b.velocity.len_sq())
            .sum()
    }

    fn body_pass(&mut self, dt: f64) {
        let ids: Vec<PhysId> = self.bodies.keys().copied().collect();
        let mut candidates = Vec::new();
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                self.metrics.candidate_pairs += 1;
                if let Some(c) = self.candidate(a, b, dt) {
                    candidates.push(c);
                }
            }
        }

        while !candidates.is_empty() && self.metrics.rounds < self.cfg.max_simultaneous_collision_rounds {
            self.metrics.rounds += 1;
            candidates.sort_by(|x, y| x.t_abs.total_cmp(&y.t_abs));
            let t0 = candidates[0].t_abs;
            let split = candidates
                .iter()
                .position(|c| !almost_zero(c.t_abs - t0))
                .unwrap_or(candidates.len());
            let group: Vec<Candidate> = candidates.drain(..split).collect();

            let involved: BTreeSet<PhysId> = group.iter().flat_map(|c| [c.a, c.b]).collect();
            let before = self.kinetic_sum(&involved);
            for c in &group {
                self.apply_contact(c);
            }
            if group.len() > 1 {
                let after = self.kinetic_sum(&involved);
                if after > 0.0 {
                    let scale = (before / after).sqrt();
                    for id in &involved {
                        if let Some(b) = self.bodies.get_mut(id) {
                            b.velocity = b.velocity * scale;
                        }
                    }
                }
            }

            candidates.retain(|c| !involved.contains(&c.a) && !involved.contains(&c.b));
            for &id in &involved {
                for &other in &ids {
                    if other == id || (involved.contains(&other) && other < id) {
                        continue;
                    }
                    self.metrics.candidate_pairs += 1;
                    if let Some(c) = self.candidate(id.min(other), id.max(other), dt) {
                        candidates.push(c);
                    }
                }
            }
        }
    }

    fn apply_contact(&mut self, c: &Candidate) {
        self.metrics.collisions += 1;
        debug!(a = c.a, b = c.b, t = c.t_abs, energy = c.hit.energy, "collision");
        for (i, (id, other)) in [(c.a, c.b), (c.b, c.a)].into_iter().enumerate() {
            let effect = c.hit.effects[i];
            if let Some(body) = self.bodies.get_mut(&id) {
                body.resolve_contact(c.t_abs, effect.dv);
            }
            for l in self.listeners.iter_mut() {
                l.on_collision(id, Some(other), c.hit.energy, effect.contact);
            }
            self.send_to_owner(
                id,
                MessageBody::Collision(Collision {
                    position: Some(effect.contact),
                    direction: Some(effect.direction),
                    energy: Some(c.hit.energy),
                    kind: Some(CollisionKind::Physical),
                    comm_msg: None,
                    spectrum: None,
                }),
            );
            self.damage(id, c.hit.energy);
        }
    }

    // ─── Radiation ──────────────────────────────────────────────────────────

    fn radiate(&mut self) {
        let cutoff = self.cfg.radiation_energy_cutoff;
        let mut doses: Vec<(PhysId, PhysId, Vec3, f64, Spectrum)> = Vec::new();
        for &rid in &self.radiators {
            let Some(src) = self.bodies.get(&rid) else {
                continue;
            };
            let Some(spectrum) = &src.spectrum else {
                continue;
            };
            let safe = src.safe_distance_sq(cutoff);
            let power = spectrum.total_power();
            for body in self.bodies.values() {
                if body.id == rid {
                    continue;
                }
                let toward = src.position - body.position;
                let d2 = toward.len_sq();
                if d2 >= safe || almost_zero(d2) {
                    continue;
                }
                let energy = body.radius * body.radius * power / (4.0 * d2);
                doses.push((body.id, rid, toward.normalized(), energy, spectrum.clone()));
            }
        }

        for (id, rid, dir, energy, spectrum) in doses {
            let radius = self.bodies.get(&id).map_or(0.0, |b| b.radius);
            trace!(id, radiator = rid, energy, "radiation");
            for l in self.listeners.iter_mut() {
                l.on_collision(id, Some(rid), energy, dir * radius);
            }
            if self.remotes.contains_key(&id) {
                self.send_to_owner(
                    id,
                    MessageBody::Collision(Collision {
                        position: Some(dir * radius),
                        direction: Some(dir),
                        energy: Some(energy),
                        kind: Some(CollisionKind::Radiation),
                        comm_msg: None,
                        spectrum: Some(spectrum),
                    }),
                );
            } else {
                self.damage(id, energy);
            }
        }
    }

    // ─── Integration and reconciliation ─────────────────────────────────────

    fn integrate(&mut self, dt: f64) {
        let sources: Vec<Attractor> = self
            .attractors
            .iter()
            .filter_map(|id| self.bodies.get(id))
            .map(Attractor::from)
            .collect();
        let g = self.cfg.gravitational_constant;
        for body in self.bodies.values_mut() {
            let accel = gravity::net_acceleration(body, &sources, g);
            gravity::integrate(body, accel, dt);
        }
        for beam in self.beams.values_mut() {
            beam.advance(dt);
            if beam.is_spent() {
                trace!(beam = beam.id, "beam spent");
                self.queue.expire(beam.id);
            }
        }
    }

    /// Applies queued adds, then queued expiries.
    ///
    /// Adds go first so that a body spawned and expired between two ticks
    /// never becomes live.
    pub fn reconcile(&mut self, drained: Drained) {
        let mut attractors_changed = false;
        for pending in drained.adds {
            match pending {
                Pending::Body { body, remote } => {
                    let id = body.id;
                    if body.emits_gravity {
                        attractors_changed |= self.attractors.insert(id);
                    }
                    if body.radiates {
                        self.radiators.insert(id);
                    }
                    if let Some(link) = remote {
                        self.remotes.insert(id, link);
                    }
                    debug!(id, obj_type = %body.obj_type, "body added");
                    self.bodies.insert(id, *body);
                }
                Pending::Beam(beam) => {
                    debug!(id = beam.id, kind = ?beam.kind, "beam added");
                    self.beams.insert(beam.id, *beam);
                }
            }
        }

        for expiry in drained.expires {
            match expiry {
                Expiry::Id(id) => attractors_changed |= self.remove(id),
                Expiry::OwnedBy(conn) => {
                    let owned: Vec<PhysId> = self
                        .remotes
                        .iter()
                        .filter(|(_, link)| link.conn.id() == conn)
                        .map(|(id, _)| *id)
                        .collect();
                    for id in owned {
                        attractors_changed |= self.remove(id);
                    }
                }
            }
        }

        if attractors_changed {
            self.notify_attractors();
        }
    }

    /// Removes a body or beam. Unknown ids are ignored. Returns true when
    /// the attractor set shrank.
    fn remove(&mut self, id: PhysId) -> bool {
        if self.beams.remove(&id).is_some() {
            self.scans.forget_beam(id);
            return false;
        }
        let Some(body) = self.bodies.remove(&id) else {
            return false;
        };
        self.remotes.remove(&id);
        self.radiators.remove(&id);
        self.scans.forget_target(id);
        for l in self.listeners.iter_mut() {
            l.on_expire(&body);
        }
        debug!(id, obj_type = %body.obj_type, "body expired");
        self.attractors.remove(&id)
    }

    /// Sends one vis frame to every subscriber.
    pub fn broadcast_vis(&mut self) -> usize {
        self.vis.broadcast(&self.bodies, self.cfg.visual_acuity)
    }
}

fn scan_result(target: &PhysicsBody, receiver: &PhysicsBody, beam: &Beam) -> ScanResult {
    ScanResult {
        obj_type: Some(target.obj_type.clone()),
        mass: Some(target.mass),
        position: Some(target.position - receiver.position),
        velocity: Some(target.velocity - receiver.velocity),
        orientation: Some(target.basis.to_wire()),
        thrust: Some(target.thrust),
        radius: Some(target.radius),
        data: beam.data.clone(),
        beam_spectrum: beam.spectrum.clone(),
        obj_spectrum: target.spectrum.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use unisim_shared::{beam::BeamSpec, spectrum::SpectrumComponent};

    use super::*;
    use crate::connection::Connection;

    type Log = Arc<Mutex<Vec<(PhysId, Option<PhysId>)>>>;

    struct Recorder(Log);

    impl WorldListener for Recorder {
        fn on_collision(&mut self, body: PhysId, other: Option<PhysId>, _energy: f64, _contact: Vec3) {
            self.0.lock().unwrap().push((body, other));
        }
    }

    fn world(cfg: UniverseConfig) -> (World, Arc<LifecycleQueue>, Log) {
        let queue = Arc::new(LifecycleQueue::new());
        let mut w = World::new(cfg, Arc::new(IdAllocator::new(1)), queue.clone());
        let log = Log::default();
        w.add_listener(Box::new(Recorder(log.clone())));
        (w, queue, log)
    }

    fn rock(w: &World, x: f64, vx: f64) -> PhysicsBody {
        let mut b = PhysicsBody::new(w.ids.next_id(), "Rock", 1.0, 1.0, &w.cfg);
        b.position = Vec3::new(x, 0.0, 0.0);
        b.velocity = Vec3::new(vx, 0.0, 0.0);
        b
    }

    #[test]
    fn added_bodies_join_the_next_tick() {
        let (mut w, q, log) = world(UniverseConfig::default());
        let a = rock(&w, 0.0, 0.0);
        let a_id = a.id;
        q.add_body(a, None);
        w.tick(1.0);

        let b = rock(&w, 3.0, -2.0);
        let b_id = b.id;
        q.add_body(b, None);
        w.tick(1.0);
        assert!(log.lock().unwrap().is_empty(), "collided before it was live");
        assert!(w.body(b_id).is_some());

        // Expiry queued now still lets `a` take part in this tick.
        q.expire(a_id);
        w.tick(1.0);
        assert_eq!(*log.lock().unwrap(), vec![(a_id, Some(b_id)), (b_id, Some(a_id))]);
        assert!(w.body(a_id).is_none());
    }

    #[test]
    fn equal_masses_swap_velocities() {
        let (mut w, q, _) = world(UniverseConfig::default());
        let (a, b) = (rock(&w, 0.0, 0.0), rock(&w, 3.0, -2.0));
        let (a_id, b_id) = (a.id, b.id);
        w.reconcile(Drained {
            adds: vec![
                Pending::Body { body: Box::new(a), remote: None },
                Pending::Body { body: Box::new(b), remote: None },
            ],
            expires: vec![],
        });
        assert!(q.is_empty());

        w.tick(1.0);
        assert_eq!(w.metrics().collisions, 1);
        let (a, b) = (w.body(a_id).unwrap(), w.body(b_id).unwrap());
        assert!((a.velocity.x + 2.0).abs() < 1e-9);
        assert!(b.velocity.x.abs() < 1e-9);
        assert!((a.position.x + 1.0).abs() < 1e-9);
        assert!((b.position.x - 2.0).abs() < 1e-9);
        assert_eq!(a.t, 0.0);
    }

    #[test]
    fn unknown_expiry_is_a_no_op() {
        let (mut w, q, _) = world(UniverseConfig::default());
        q.expire(12345);
        q.expire_owned_by(ConnId(99));
        w.tick(0.1);
        assert_eq!(w.body_count(), 0);
    }

    fn beam_at(w: &World, kind: BeamKind, travelled: f64) -> Beam {
        let spec = BeamSpec {
            origin: Vec3::ZERO,
            velocity: Vec3::new(100.0, 0.0, 0.0),
            up: Vec3::new(0.0, 0.0, 1.0),
            spread_h: 0.2,
            spread_v: 0.2,
            energy: 1e9,
            kind,
            comm_msg: None,
            data: None,
            spectrum: None,
        };
        let mut beam = Beam::new(w.ids.next_id(), spec, &w.cfg, &mut StdRng::seed_from_u64(0));
        beam.distance_travelled = travelled;
        beam
    }

    #[test]
    fn weapon_beam_destroys_a_dumb_body() {
        let (mut w, q, log) = world(UniverseConfig::default());
        let target = rock(&w, 150.0, 0.0);
        let target_id = target.id;
        q.add_body(target, None);
        q.add_beam(beam_at(&w, BeamKind::Weapon, 100.0));
        w.tick(1.0);
        assert!(log.lock().unwrap().is_empty());

        w.tick(1.0);
        assert_eq!(w.metrics().beam_hits, 1);
        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(w.body(target_id).is_none());
    }

    #[test]
    fn scanning_a_dumb_body_sends_a_result_beam_home() {
        let (mut w, q, _) = world(UniverseConfig::default());
        let target = rock(&w, 150.0, 0.0);
        let target_id = target.id;
        q.add_body(target, None);
        q.add_beam(beam_at(&w, BeamKind::Scan, 100.0));
        w.tick(1.0);
        w.tick(1.0);

        let back: Vec<&Beam> = w.beams().filter(|b| b.kind == BeamKind::ScanResult).collect();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].scan_target.as_ref().map(|t| t.id), Some(target_id));
        assert!((back[0].direction.x + 1.0).abs() < 1e-9);
        assert!(w.body(target_id).is_some());
    }

    /// A live connection whose peer never reads; sends just queue up.
    async fn loopback() -> (Connection, tokio::net::TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = tokio::net::TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (socket, peer) = listener.accept().await.unwrap();
        let (_rd, wr) = socket.into_split();
        let (conn, _writer) = Connection::spawn(ConnId::new_unique(), peer, wr);
        (conn, client)
    }

    /// Adds a smart body at `x` and a scan beam that reaches it on the
    /// second tick. Returns the body id once the query is open.
    fn scanned_smart_body(w: &mut World, q: &LifecycleQueue, conn: Connection) -> PhysId {
        let target = rock(w, 150.0, 0.0);
        let target_id = target.id;
        q.add_body(target, Some(RemoteLink { conn, client_id: Some(7) }));
        q.add_beam(beam_at(w, BeamKind::Scan, 100.0));
        w.tick(1.0);
        w.tick(1.0);
        assert_eq!(w.open_scan_count(), 1);
        target_id
    }

    #[tokio::test]
    async fn expired_target_closes_its_scan_queries() {
        let (mut w, q, _) = world(UniverseConfig::default());
        let (conn, _client) = loopback().await;
        let target_id = scanned_smart_body(&mut w, &q, conn);

        q.expire(target_id);
        w.tick(1.0);
        assert!(w.body(target_id).is_none());
        assert_eq!(w.open_scan_count(), 0);
        assert!(w.answer_scan(1, Some(target_id), "late".into()).is_none());
    }

    #[tokio::test]
    async fn unanswered_scan_queries_age_out() {
        let cfg = UniverseConfig {
            scan_query_timeout: 0.5,
            ..Default::default()
        };
        let (mut w, q, _) = world(cfg);
        let (conn, _client) = loopback().await;
        let target_id = scanned_smart_body(&mut w, &q, conn);

        w.tick(1.0);
        assert!(w.body(target_id).is_some());
        assert_eq!(w.open_scan_count(), 0);
    }

    fn sun(w: &World, power: f64) -> PhysicsBody {
        let mut s = PhysicsBody::new(w.ids.next_id(), "Star", 1.0, 1.0, &w.cfg);
        s.spectrum = Some(Spectrum::new(vec![SpectrumComponent {
            wavelength: 500e-9,
            power,
        }]));
        s.refresh_derived(&w.cfg);
        s
    }

    #[test]
    fn radiation_burns_once_per_simulated_second() {
        let (mut w, q, _) = world(UniverseConfig::default());
        let star = sun(&w, 1e9);
        assert!(star.radiates);
        let mut scout = PhysicsBody::new(w.ids.next_id(), "Scout", 10.0, 1.0, &w.cfg);
        scout.position = Vec3::new(10.0, 0.0, 0.0);
        let scout_id = scout.id;
        q.add_body(star, None);
        q.add_body(scout, None);

        w.tick(0.5);
        w.tick(0.5);
        assert_eq!(w.body(scout_id).unwrap().health, Some(1e7));
        w.tick(0.5);
        // 1e9 / (4 · 100) = 2.5e6, of which 1e6 is shrugged off.
        let health = w.body(scout_id).unwrap().health.unwrap();
        assert!((health - 8.5e6).abs() < 1e-3, "health {health}");
        w.tick(0.5);
        assert!((w.body(scout_id).unwrap().health.unwrap() - 8.5e6).abs() < 1e-3);
    }

    #[test]
    fn passive_scan_scales_by_distance() {
        let (mut w, q, _) = world(UniverseConfig::default());
        let mut eye = PhysicsBody::new(w.ids.next_id(), "Ship", 1.0, 2.0, &w.cfg);
        eye.position = Vec3::new(-10.0, 0.0, 0.0);
        let eye_id = eye.id;
        q.add_body(eye, None);
        q.add_body(sun(&w, 1e6), None);
        w.tick(0.0);

        let results = w.passive_scan(eye_id);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].position, Some(Vec3::new(1.0, 0.0, 0.0)));
        let seen = results[0].obj_spectrum.as_ref().unwrap().total_power();
        assert!((seen - 1e6 * 4.0 / 400.0).abs() < 1e-6);
    }

    #[test]
    fn heavy_bodies_become_attractors() {
        let (mut w, q, _) = world(UniverseConfig::default());
        let planet = PhysicsBody::new(w.ids.next_id(), "Planet", 5.972e24, 6.371e6, &w.cfg);
        let id = planet.id;
        q.add_body(planet, None);
        w.tick(0.0);
        assert!(w.attractors().contains(&id));
        q.expire(id);
        w.tick(0.0);
        assert!(w.attractors().is_empty());
    }
}
