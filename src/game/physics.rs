//! Ball physics integrator
//!
//! Fixed-step simulation of the table on the authority. Each step corrects
//! overlaps, applies friction and spin coupling, then sweeps every moving ball
//! against the others and against the cushion noses, resolving contacts in
//! time order up to a bounded count. Pocket capture and the pocket-drop
//! animation run after the sweep.
//!
//! Decay uses `rate.powf(dt)` so the result does not depend on step size. The
//! spin model is deliberately simple: side spin bends the path and rebounds,
//! follow/draw nudges speed and is transferred on the first object-ball
//! contact.

use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::ball::{Ball, PocketDrop, BALL_COUNT, CUE, EIGHT};
use super::shot::PhysicsEvent;
use super::table::{rack_slots, Cushion, PocketId, TableLayout, BALL_RADIUS, REST_HEIGHT};
use crate::util::time::tick_delta;

/// Speed fraction left after one second of rolling
pub const ROLL_DECAY: f32 = 0.3;
/// Spin fraction left after one second
pub const SPIN_DECAY: f32 = 0.25;
/// Path curvature at full side spin (rad/s)
pub const SIDE_SPIN_CURVE: f32 = 0.35;
/// Speed change at full follow/draw (m/s²)
pub const FOLLOW_ACCEL: f32 = 0.12;
/// Share of the incoming speed added along the aim line at full follow
pub const FOLLOW_TRANSFER: f32 = 0.35;
/// Tangential kick from side spin on a cushion rebound
pub const CUSHION_ENGLISH: f32 = 0.08;
pub const BALL_RESTITUTION: f32 = 0.95;
pub const CUSHION_RESTITUTION: f32 = 0.78;
/// Below this speed a ball is frozen
pub const REST_SPEED: f32 = 0.005;
pub const MAX_CUE_SPEED: f32 = 5.5;
/// Separation left between bodies after a contact is resolved
pub const CONTACT_SKIN: f32 = 1.0e-5;
pub const MAX_RESOLUTIONS_PER_STEP: usize = 8;
/// Backlog cap for `advance`; older time is dropped
pub const MAX_CATCH_UP_STEPS: u32 = 8;

pub const DROP_DURATION: f32 = 0.35;
pub const DROP_DEPTH: f32 = 0.09;
const DROP_TURNS: f32 = 1.25;

/// Rack-explosion heuristic: neighbours counted within this many ball radii
pub const CLUSTER_RADIUS_FACTOR: f32 = 6.0;
pub const CLUSTER_MIN_NEIGHBOURS: usize = 5;
/// Outward speed given to cluster balls, as a share of the incoming speed
pub const CLUSTER_IMPULSE: f32 = 0.35;

/// How the struck object ball's motion is decided on the first contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionResponse {
    /// Contact is detected physically, post-impact velocities come from the
    /// shot preview so the table does what the player was shown
    #[default]
    Planned,
    /// Equal-mass restitution response everywhere
    Physical,
}

/// Constants shared by the integrator and the trajectory predictor
#[derive(Debug, Clone)]
pub struct PhysicsParams {
    pub fixed_dt: f32,
    pub roll_decay: f32,
    pub spin_decay: f32,
    pub side_spin_curve: f32,
    pub follow_accel: f32,
    pub follow_transfer: f32,
    pub cushion_english: f32,
    pub ball_restitution: f32,
    pub cushion_restitution: f32,
    pub rest_speed: f32,
    pub max_cue_speed: f32,
    pub skin: f32,
    pub max_resolutions: usize,
    pub response: CollisionResponse,
    pub break_cluster: bool,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            fixed_dt: tick_delta(),
            roll_decay: ROLL_DECAY,
            spin_decay: SPIN_DECAY,
            side_spin_curve: SIDE_SPIN_CURVE,
            follow_accel: FOLLOW_ACCEL,
            follow_transfer: FOLLOW_TRANSFER,
            cushion_english: CUSHION_ENGLISH,
            ball_restitution: BALL_RESTITUTION,
            cushion_restitution: CUSHION_RESTITUTION,
            rest_speed: REST_SPEED,
            max_cue_speed: MAX_CUE_SPEED,
            skin: CONTACT_SKIN,
            max_resolutions: MAX_RESOLUTIONS_PER_STEP,
            response: CollisionResponse::default(),
            break_cluster: true,
        }
    }
}

/// Post-impact velocities the integrator applies on the first real contact
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotPlan {
    pub target: u8,
    pub cue_velocity: Vec2,
    pub object_velocity: Vec2,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ShotError {
    #[error("cue ball is not on the table")]
    CueOffTable,
    #[error("balls are still moving")]
    TableInMotion,
    #[error("aim direction is degenerate")]
    NoDirection,
}

// ============================================================================
// Motion and contact formulas (shared with the predictor)
// ============================================================================

/// Cue speed for a normalised power
pub fn shot_speed(power: f32, params: &PhysicsParams) -> f32 {
    power.clamp(0.0, 1.0) * params.max_cue_speed
}

/// Advance velocity and spin by `dt`: spin coupling, then exponential decay
pub fn apply_motion(vel: Vec2, spin: Vec2, params: &PhysicsParams, dt: f32) -> (Vec2, Vec2) {
    let spin_after = spin * params.spin_decay.powf(dt);
    let speed = vel.length();
    if speed <= 0.0 {
        return (Vec2::ZERO, spin_after);
    }

    let dir = Vec2::from_angle(spin.x * params.side_spin_curve * dt).rotate(vel / speed);
    let speed = (speed + spin.y * params.follow_accel * dt).max(0.0);
    (dir * speed * params.roll_decay.powf(dt), spin_after)
}

/// Rebound off a cushion with inward `normal`
pub fn cushion_rebound(vel: Vec2, spin: Vec2, normal: Vec2, params: &PhysicsParams) -> (Vec2, Vec2) {
    let vn = vel.dot(normal);
    if vn >= 0.0 {
        return (vel, spin);
    }
    let mut out = vel - normal * vn * (1.0 + params.cushion_restitution);
    out += normal.perp() * spin.x * params.cushion_english * -vn;
    (out, spin * 0.5)
}

/// Equal-mass contact along `normal` (pointing from the first ball to the second)
pub fn collide_pair(vi: Vec2, vj: Vec2, normal: Vec2, restitution: f32) -> (Vec2, Vec2) {
    let closing = (vi - vj).dot(normal);
    if closing <= 0.0 {
        return (vi, vj);
    }
    let impulse = closing * (1.0 + restitution) / 2.0;
    (vi - normal * impulse, vj + normal * impulse)
}

/// Cue ball striking an object ball. Returns cue velocity, object velocity
/// and the cue's remaining spin (follow/draw is spent on the contact).
pub fn cue_impact(
    cue_vel: Vec2,
    cue_spin: Vec2,
    object_vel: Vec2,
    normal: Vec2,
    params: &PhysicsParams,
) -> (Vec2, Vec2, Vec2) {
    let (mut cue_after, object_after) =
        collide_pair(cue_vel, object_vel, normal, params.ball_restitution);
    if let Some(aim) = cue_vel.try_normalize() {
        cue_after += aim * cue_spin.y * params.follow_transfer * cue_vel.length();
    }
    (cue_after, object_after, Vec2::new(cue_spin.x, 0.0))
}

/// Earliest time within `max_t` at which a point moving by `rel_vel` from
/// `rel_pos` reaches distance `radius` from the origin while closing in.
pub fn circle_toi(rel_pos: Vec2, rel_vel: Vec2, radius: f32, max_t: f32) -> Option<f32> {
    let b = rel_pos.dot(rel_vel);
    if b >= 0.0 {
        return None;
    }
    let c = rel_pos.length_squared() - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }
    let a = rel_vel.length_squared();
    let disc = b * b - a * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-b - disc.sqrt()) / a;
    (t <= max_t).then_some(t.max(0.0))
}

/// Swept ball against one cushion nose, including its rounded jaw ends.
/// Returns time of impact and the contact normal.
pub fn cushion_toi(
    cushion: &Cushion,
    pos: Vec2,
    vel: Vec2,
    radius: f32,
    max_t: f32,
) -> Option<(f32, Vec2)> {
    let mut best: Option<(f32, Vec2)> = None;

    let vn = vel.dot(cushion.normal);
    if vn < 0.0 {
        let dist = (pos - cushion.a).dot(cushion.normal);
        // A centre already behind the nose is inside a pocket mouth
        if dist >= 0.0 {
            let t = ((radius - dist) / vn).max(0.0);
            if t <= max_t {
                let along = (pos + vel * t - cushion.a).dot(cushion.tangent());
                if (0.0..=cushion.length()).contains(&along) {
                    best = Some((t, cushion.normal));
                }
            }
        }
    }

    for end in [cushion.a, cushion.b] {
        if let Some(t) = circle_toi(pos - end, vel, radius, max_t) {
            if best.map_or(true, |(bt, _)| t < bt) {
                let normal = (pos + vel * t - end).try_normalize().unwrap_or(cushion.normal);
                best = Some((t, normal));
            }
        }
    }

    best
}

/// Earliest cushion contact for one ball against the whole table
pub fn earliest_cushion(
    layout: &TableLayout,
    pos: Vec2,
    vel: Vec2,
    radius: f32,
    max_t: f32,
) -> Option<(f32, Vec2)> {
    layout
        .cushions
        .iter()
        .filter_map(|c| cushion_toi(c, pos, vel, radius, max_t))
        .min_by(|a, b| a.0.total_cmp(&b.0))
}

// ============================================================================
// Integrator
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum ContactKind {
    Balls(usize, usize),
    Cushion { ball: usize, normal: Vec2 },
}

#[derive(Debug, Clone, Copy)]
struct Contact {
    t: f32,
    kind: ContactKind,
}

#[derive(Debug, Clone)]
struct ShotProgress {
    plan: Option<ShotPlan>,
    first_contact: bool,
}

/// The authoritative table. Balls are indexed by number.
#[derive(Debug, Clone)]
pub struct PhysicsWorld {
    params: PhysicsParams,
    layout: TableLayout,
    balls: Vec<Ball>,
    accumulator: f32,
    shot: Option<ShotProgress>,
    events: Vec<PhysicsEvent>,
}

impl PhysicsWorld {
    /// A freshly racked table with the default ball order
    pub fn new(params: PhysicsParams, layout: TableLayout) -> Self {
        let balls = (0..BALL_COUNT as u8).map(|n| Ball::new(n, Vec2::ZERO)).collect();
        let mut world = Self {
            params,
            layout,
            balls,
            accumulator: 0.0,
            shot: None,
            events: Vec::new(),
        };
        let mut order = [0u8; 15];
        for (slot, number) in order.iter_mut().enumerate() {
            *number = slot as u8 + 1;
        }
        order.swap(4, 7);
        world.rack(&order);
        world
    }

    /// A table holding only the listed balls; every other ball is pocketed
    #[cfg(test)]
    pub fn from_positions(params: PhysicsParams, layout: TableLayout, placed: &[(u8, Vec2)]) -> Self {
        let balls = (0..BALL_COUNT as u8)
            .map(|n| {
                let mut ball = Ball::new(n, Vec2::ZERO);
                match placed.iter().find(|(number, _)| *number == n) {
                    Some((_, pos)) => ball.pos = *pos,
                    None => {
                        ball.pocketed = true;
                        ball.visible = false;
                    }
                }
                ball
            })
            .collect();
        Self {
            params,
            layout,
            balls,
            accumulator: 0.0,
            shot: None,
            events: Vec::new(),
        }
    }

    /// Rack all fifteen object balls (`order[slot]` = ball number) and put
    /// the cue ball on the head spot
    pub fn rack(&mut self, order: &[u8; 15]) {
        let slots = rack_slots(self.layout.foot_spot(), BALL_RADIUS);
        for (slot, &number) in order.iter().enumerate() {
            if let Some(ball) = self.balls.get_mut(number as usize) {
                ball.restore(slots[slot]);
            }
        }
        let head = self.layout.head_spot();
        self.balls[CUE as usize].restore(head);
        self.shot = None;
        self.accumulator = 0.0;
        self.events.clear();
    }

    pub fn params(&self) -> &PhysicsParams {
        &self.params
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    pub fn balls(&self) -> &[Ball] {
        &self.balls
    }

    pub fn ball(&self, number: u8) -> Option<&Ball> {
        self.balls.get(number as usize)
    }

    pub fn cue(&self) -> &Ball {
        &self.balls[CUE as usize]
    }

    pub fn shot_in_progress(&self) -> bool {
        self.shot.is_some()
    }

    /// Nothing rolling and no drop animation running
    pub fn is_idle(&self) -> bool {
        self.balls
            .iter()
            .all(|b| b.drop.is_none() && (!b.is_active() || !b.moving))
    }

    /// Strike the cue ball. `direction` need not be normalised.
    pub fn shoot(
        &mut self,
        direction: Vec2,
        power: f32,
        spin: Vec2,
        plan: Option<ShotPlan>,
    ) -> Result<(), ShotError> {
        if !self.is_idle() {
            return Err(ShotError::TableInMotion);
        }
        if !self.cue().is_active() {
            return Err(ShotError::CueOffTable);
        }
        let aim = direction.try_normalize().ok_or(ShotError::NoDirection)?;
        let speed = shot_speed(power, &self.params);

        let cue = &mut self.balls[CUE as usize];
        cue.vel = aim * speed;
        cue.spin = spin.clamp(Vec2::splat(-1.0), Vec2::splat(1.0));
        cue.moving = true;

        self.shot = Some(ShotProgress {
            plan,
            first_contact: false,
        });
        self.accumulator = 0.0;
        Ok(())
    }

    /// Run as many fixed steps as `real_dt` covers and hand back the events
    pub fn advance(&mut self, real_dt: f32) -> Vec<PhysicsEvent> {
        let h = self.params.fixed_dt;
        self.accumulator += real_dt.max(0.0);

        let mut steps = 0;
        while self.accumulator >= h && steps < MAX_CATCH_UP_STEPS {
            self.step();
            self.accumulator -= h;
            steps += 1;
        }
        if steps == MAX_CATCH_UP_STEPS {
            self.accumulator = self.accumulator.min(h);
        }

        self.take_events()
    }

    /// Events produced by direct `step` calls
    pub fn take_events(&mut self) -> Vec<PhysicsEvent> {
        std::mem::take(&mut self.events)
    }

    /// One fixed step
    pub fn step(&mut self) {
        let h = self.params.fixed_dt;

        self.separate_overlaps();

        for ball in self.balls.iter_mut().filter(|b| b.is_active() && b.moving) {
            let (vel, spin) = apply_motion(ball.vel, ball.spin, &self.params, h);
            ball.vel = vel;
            ball.spin = spin;
        }

        let mut remaining = h;
        let mut resolutions = 0;
        while remaining > 0.0 {
            let contact = if resolutions < self.params.max_resolutions {
                self.earliest_contact(remaining)
            } else {
                None
            };
            match contact {
                Some(contact) => {
                    self.move_balls(contact.t);
                    remaining -= contact.t;
                    self.resolve_contact(contact.kind);
                    resolutions += 1;
                }
                None => {
                    self.move_balls(remaining);
                    break;
                }
            }
        }

        self.capture_pockets();
        self.animate_drops(h);
        self.settle();
    }

    fn earliest_contact(&self, max_t: f32) -> Option<Contact> {
        let mut best: Option<Contact> = None;
        let mut consider = |t: f32, kind: ContactKind| {
            if best.map_or(true, |b| t < b.t) {
                best = Some(Contact { t, kind });
            }
        };

        for i in 0..self.balls.len() {
            let a = &self.balls[i];
            if !a.is_active() {
                continue;
            }
            for j in (i + 1)..self.balls.len() {
                let b = &self.balls[j];
                if !b.is_active() || (!a.moving && !b.moving) {
                    continue;
                }
                if let Some(t) = circle_toi(b.pos - a.pos, b.vel - a.vel, a.radius + b.radius, max_t) {
                    consider(t, ContactKind::Balls(i, j));
                }
            }
            if a.moving {
                if let Some((t, normal)) = earliest_cushion(&self.layout, a.pos, a.vel, a.radius, max_t) {
                    consider(t, ContactKind::Cushion { ball: i, normal });
                }
            }
        }

        best
    }

    fn move_balls(&mut self, t: f32) {
        if t <= 0.0 {
            return;
        }
        for ball in self.balls.iter_mut().filter(|b| b.is_active() && b.moving) {
            ball.pos += ball.vel * t;
        }
    }

    fn resolve_contact(&mut self, kind: ContactKind) {
        match kind {
            ContactKind::Cushion { ball, normal } => {
                let skin = self.params.skin;
                let b = &mut self.balls[ball];
                let (vel, spin) = cushion_rebound(b.vel, b.spin, normal, &self.params);
                b.vel = vel;
                b.spin = spin;
                b.pos += normal * skin;
                let number = b.number;
                if self.shot.is_some() {
                    self.events.push(PhysicsEvent::CushionContact { ball: number });
                }
            }
            ContactKind::Balls(i, j) => self.resolve_balls(i, j),
        }
    }

    fn resolve_balls(&mut self, i: usize, j: usize) {
        let normal = (self.balls[j].pos - self.balls[i].pos)
            .try_normalize()
            .unwrap_or(Vec2::X);

        match self.take_first_contact(i, j) {
            Some(object) => {
                let incoming = self.balls[CUE as usize].vel;
                debug!(ball = self.balls[object].number, "first contact");
                self.events.push(PhysicsEvent::FirstContact {
                    ball: self.balls[object].number,
                });

                let plan = self
                    .shot
                    .as_ref()
                    .and_then(|s| s.plan)
                    .filter(|p| p.target as usize == object);
                match (self.params.response, plan) {
                    (CollisionResponse::Planned, Some(plan)) => {
                        let cue = &mut self.balls[CUE as usize];
                        cue.vel = plan.cue_velocity;
                        cue.spin.y = 0.0;
                        self.balls[object].vel = plan.object_velocity;
                    }
                    _ => {
                        let to_object = if object == j { normal } else { -normal };
                        let cue = &self.balls[CUE as usize];
                        let (cue_vel, object_vel, cue_spin) =
                            cue_impact(cue.vel, cue.spin, self.balls[object].vel, to_object, &self.params);
                        let cue = &mut self.balls[CUE as usize];
                        cue.vel = cue_vel;
                        cue.spin = cue_spin;
                        self.balls[object].vel = object_vel;
                    }
                }

                if self.params.break_cluster {
                    self.spread_cluster(object, incoming);
                }
            }
            None => {
                let (vi, vj) = collide_pair(
                    self.balls[i].vel,
                    self.balls[j].vel,
                    normal,
                    self.params.ball_restitution,
                );
                self.balls[i].vel = vi;
                self.balls[j].vel = vj;
            }
        }

        self.balls[i].moving = true;
        self.balls[j].moving = true;

        // Leave a skin so the same pair is not found again this step
        let gap = self.balls[i].pos.distance(self.balls[j].pos);
        let wanted = self.balls[i].radius + self.balls[j].radius + self.params.skin;
        if gap < wanted {
            let push = (wanted - gap) / 2.0;
            self.balls[i].pos -= normal * push;
            self.balls[j].pos += normal * push;
        }
    }

    /// If this is the cue ball's first contact of the shot, the object index
    fn take_first_contact(&mut self, i: usize, j: usize) -> Option<usize> {
        let shot = self.shot.as_mut()?;
        if shot.first_contact {
            return None;
        }
        let object = match (i == CUE as usize, j == CUE as usize) {
            (true, false) => j,
            (false, true) => i,
            _ => return None,
        };
        shot.first_contact = true;
        Some(object)
    }

    /// Rack-explosion heuristic: a struck ball sitting in a dense cluster
    /// pushes every neighbour outward instead of relying on a contact chain.
    fn spread_cluster(&mut self, target: usize, incoming: Vec2) {
        let centre = self.balls[target].pos;
        let reach = CLUSTER_RADIUS_FACTOR * BALL_RADIUS;
        let neighbours: Vec<usize> = (1..self.balls.len())
            .filter(|&n| {
                n != target
                    && self.balls[n].is_active()
                    && self.balls[n].pos.distance(centre) < reach
            })
            .collect();
        if neighbours.len() < CLUSTER_MIN_NEIGHBOURS {
            return;
        }

        let speed = incoming.length();
        let aim = incoming.try_normalize().unwrap_or(Vec2::X);
        debug!(
            ball = self.balls[target].number,
            neighbours = neighbours.len(),
            "spreading cluster"
        );

        for n in neighbours {
            let ball = &mut self.balls[n];
            let offset = ball.pos - centre;
            let outward = offset.try_normalize().unwrap_or(aim);
            let dir = (outward + aim * 0.5).try_normalize().unwrap_or(outward);
            let falloff = 1.0 - 0.5 * (offset.length() / reach);
            ball.vel += dir * speed * CLUSTER_IMPULSE * falloff;
            ball.moving = true;
        }
    }

    /// Push apart balls found overlapping at the start of a step
    fn separate_overlaps(&mut self) {
        for i in 0..self.balls.len() {
            if !self.balls[i].is_active() {
                continue;
            }
            for j in (i + 1)..self.balls.len() {
                if !self.balls[j].is_active() {
                    continue;
                }
                let delta = self.balls[j].pos - self.balls[i].pos;
                let dist = delta.length();
                let min_dist = self.balls[i].radius + self.balls[j].radius;
                if dist >= min_dist {
                    continue;
                }
                let normal = if dist < 1.0e-6 { Vec2::X } else { delta / dist };
                let push = (min_dist - dist) / 2.0 + self.params.skin;
                self.balls[i].pos -= normal * push;
                self.balls[j].pos += normal * push;
            }
        }
    }

    fn capture_pockets(&mut self) {
        for n in 0..self.balls.len() {
            if !self.balls[n].is_active() {
                continue;
            }
            let (pos, radius) = (self.balls[n].pos, self.balls[n].radius);
            let pocket = self
                .layout
                .capturing_pocket(pos, radius)
                .or_else(|| self.layout.pocket_below(pos));

            match pocket {
                Some(pocket) => self.pocket_ball(n, pocket),
                None if self.layout.beyond_rails(pos) => {
                    // Tunnelled through a rail: put it back and turn it around
                    let ball = &mut self.balls[n];
                    let confined = self.layout.confine(ball.pos, ball.radius);
                    let inward = (confined - ball.pos).try_normalize().unwrap_or(Vec2::ZERO);
                    ball.pos = confined;
                    let vn = ball.vel.dot(inward);
                    if vn < 0.0 {
                        ball.vel -= inward * vn * 2.0;
                    }
                }
                None => {}
            }
        }
    }

    fn pocket_ball(&mut self, index: usize, pocket: PocketId) {
        let centre = self
            .layout
            .pocket(pocket)
            .map(|p| p.centre)
            .unwrap_or(self.balls[index].pos);
        let ball = &mut self.balls[index];
        if ball.pocketed || ball.drop.is_some() {
            return;
        }
        ball.stop();

        if ball.is_cue() {
            // Never animated: a cue ball seen rolling through the pocket
            // confuses who fouled
            ball.pocketed = true;
            ball.visible = false;
            debug!(pocket = pocket.0, "scratch");
            self.events.push(PhysicsEvent::Scratch { pocket });
        } else {
            ball.drop = Some(PocketDrop {
                start: ball.pos,
                centre,
                elapsed: 0.0,
            });
            let number = ball.number;
            debug!(ball = number, pocket = pocket.0, "pocketed");
            self.events.push(PhysicsEvent::Pocketed { ball: number, pocket });
        }
    }

    fn animate_drops(&mut self, dt: f32) {
        for ball in self.balls.iter_mut() {
            let mut finished = false;
            if let Some(drop) = ball.drop.as_mut() {
                drop.elapsed += dt;
                let t = (drop.elapsed / DROP_DURATION).min(1.0);
                let swirl = Vec2::from_angle(t * DROP_TURNS * std::f32::consts::TAU);
                ball.pos = drop.centre + swirl.rotate(drop.start - drop.centre) * (1.0 - t);
                ball.height = REST_HEIGHT - DROP_DEPTH * t;
                finished = t >= 1.0;
            }
            if finished {
                ball.drop = None;
                ball.pocketed = true;
                ball.visible = false;
                ball.height = REST_HEIGHT;
            }
        }
    }

    fn settle(&mut self) {
        let rest_speed = self.params.rest_speed;
        for ball in self.balls.iter_mut() {
            if ball.drop.is_some() {
                continue;
            }
            ball.height = REST_HEIGHT;
            if !ball.is_active() {
                continue;
            }
            if ball.speed() < rest_speed {
                ball.stop();
            } else {
                ball.moving = true;
            }
        }

        if self.shot.is_some() && self.is_idle() {
            self.shot = None;
            self.events.push(PhysicsEvent::TableIdle);
        }
    }

    // ========================================================================
    // Placement
    // ========================================================================

    /// No active ball (other than `ignore`) within two radii of `pos`
    pub fn is_clear(&self, pos: Vec2, ignore: u8) -> bool {
        self.balls.iter().all(|b| {
            b.number == ignore || !b.is_active() || b.pos.distance(pos) >= b.radius + BALL_RADIUS
        })
    }

    /// Walk from `preferred` along `toward` until the spot is free, falling
    /// back to widening rings around it
    pub fn nearest_free_spot(&self, preferred: Vec2, toward: Vec2, ignore: u8) -> Vec2 {
        let step = BALL_RADIUS / 2.0;
        let free = |p: Vec2| self.layout.in_bounds(p, BALL_RADIUS) && self.is_clear(p, ignore);

        let mut pos = preferred;
        while self.layout.in_bounds(pos, BALL_RADIUS) {
            if free(pos) {
                return pos;
            }
            pos += toward * step;
        }

        for ring in 1..200 {
            let radius = ring as f32 * step;
            for k in 0..16 {
                let candidate = preferred
                    + Vec2::from_angle(k as f32 * std::f32::consts::TAU / 16.0) * radius;
                if free(candidate) {
                    return candidate;
                }
            }
        }
        preferred
    }

    /// Ball-in-hand placement; caller validates the spot
    pub fn place_cue(&mut self, pos: Vec2) {
        self.balls[CUE as usize].restore(pos);
    }

    /// Put the cue ball back after a scratch: head spot, or the nearest free
    /// spot toward the head rail
    pub fn respawn_cue(&mut self) -> Vec2 {
        let spot = self.nearest_free_spot(self.layout.head_spot(), Vec2::NEG_X, CUE);
        self.place_cue(spot);
        spot
    }

    /// Respot the 8 on the foot spot, or behind it toward the foot rail
    pub fn respot_eight(&mut self) -> Vec2 {
        let spot = self.nearest_free_spot(self.layout.foot_spot(), Vec2::X, EIGHT);
        self.balls[EIGHT as usize].restore(spot);
        spot
    }
}
