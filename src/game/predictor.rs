//! Shot preview
//!
//! Re-runs the integrator's formulas for the cue ball alone against the
//! resting table, then follows the cue ball and the struck ball after the
//! first contact (cushions only). Never touches the world it reads.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::ball::CUE;
use super::physics::{
    apply_motion, circle_toi, cue_impact, cushion_rebound, earliest_cushion, shot_speed,
    PhysicsWorld, ShotPlan,
};
use super::table::BALL_RADIUS;

pub const MAX_PREDICT_BOUNCES: usize = 3;
pub const MAX_PREDICT_STEPS: usize = 1200;
/// Longest gap between consecutive points of a resampled path
pub const PATH_SEGMENT_MAX: f32 = 0.02;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub cue_path: Vec<Vec2>,
    pub cue_after_path: Vec<Vec2>,
    pub object_path: Vec<Vec2>,
    pub target: Option<u8>,
    pub contact_point: Option<Vec2>,
    pub contact_normal: Option<Vec2>,
    pub cue_speed_after: f32,
    pub object_speed_after: f32,
    pub cue_velocity_after: Vec2,
    pub object_velocity_after: Vec2,
}

impl Prediction {
    /// Post-impact velocities for the integrator to apply on first contact
    pub fn plan(&self) -> Option<ShotPlan> {
        Some(ShotPlan {
            target: self.target?,
            cue_velocity: self.cue_velocity_after,
            object_velocity: self.object_velocity_after,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TraceEnd {
    Ball { number: u8, at: Vec2, vel: Vec2, spin: Vec2 },
    Pocket,
    Rest,
    Bounded,
}

/// Follow one ball through the same step sequence as the integrator
fn trace(
    world: &PhysicsWorld,
    mover: u8,
    mut pos: Vec2,
    mut vel: Vec2,
    mut spin: Vec2,
    hit_balls: bool,
) -> (Vec<Vec2>, TraceEnd) {
    let params = world.params();
    let layout = world.layout();
    let h = params.fixed_dt;
    let mut path = vec![pos];
    let mut bounces = 0;

    for _ in 0..MAX_PREDICT_STEPS {
        (vel, spin) = apply_motion(vel, spin, params, h);
        if vel.length() < params.rest_speed {
            return (path, TraceEnd::Rest);
        }

        let mut remaining = h;
        let mut resolutions = 0;
        while remaining > 0.0 && resolutions < params.max_resolutions {
            let ball_hit = if hit_balls {
                world
                    .balls()
                    .iter()
                    .filter(|b| b.number != mover && b.is_active())
                    .filter_map(|b| {
                        circle_toi(b.pos - pos, b.vel - vel, b.radius + BALL_RADIUS, remaining)
                            .map(|t| (t, b.number))
                    })
                    .min_by(|a, b| a.0.total_cmp(&b.0))
            } else {
                None
            };
            let cushion = earliest_cushion(layout, pos, vel, BALL_RADIUS, remaining);

            match (ball_hit, cushion) {
                (Some((t, number)), c) if c.map_or(true, |(ct, _)| t <= ct) => {
                    pos += vel * t;
                    path.push(pos);
                    return (path, TraceEnd::Ball { number, at: pos, vel, spin });
                }
                (_, Some((t, normal))) => {
                    pos += vel * t;
                    path.push(pos);
                    if bounces == MAX_PREDICT_BOUNCES {
                        return (path, TraceEnd::Bounded);
                    }
                    bounces += 1;
                    (vel, spin) = cushion_rebound(vel, spin, normal, params);
                    pos += normal * params.skin;
                    remaining -= t;
                    resolutions += 1;
                }
                _ => {
                    pos += vel * remaining;
                    remaining = 0.0;
                }
            }
        }
        if remaining > 0.0 {
            pos += vel * remaining;
        }
        path.push(pos);

        if layout.capturing_pocket(pos, BALL_RADIUS).is_some() || layout.pocket_below(pos).is_some() {
            return (path, TraceEnd::Pocket);
        }
    }

    (path, TraceEnd::Bounded)
}

/// Points along `points` no further apart than `max_segment`
pub fn resample_path(points: &[Vec2], max_segment: f32) -> Vec<Vec2> {
    let Some(&first) = points.first() else {
        return Vec::new();
    };
    let mut out = vec![first];
    let mut carried = 0.0;

    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let length = a.distance(b);
        if length <= f32::EPSILON {
            continue;
        }
        let mut along = max_segment - carried;
        while along < length {
            out.push(a.lerp(b, along / length));
            along += max_segment;
        }
        carried = length - (along - max_segment);
    }

    if let Some(&last) = points.last() {
        if out.last().map_or(true, |p| p.distance(last) > f32::EPSILON) {
            out.push(last);
        }
    }
    out
}

/// Preview a shot without moving anything
pub fn predict(world: &PhysicsWorld, direction: Vec2, power: f32, spin: Vec2) -> Prediction {
    let mut prediction = Prediction::default();
    let cue = world.cue();
    let Some(aim) = direction.try_normalize() else {
        return prediction;
    };
    if !cue.is_active() {
        return prediction;
    }

    let params = world.params();
    let spin = spin.clamp(Vec2::splat(-1.0), Vec2::splat(1.0));
    let (path, end) = trace(world, CUE, cue.pos, aim * shot_speed(power, params), spin, true);
    prediction.cue_path = resample_path(&path, PATH_SEGMENT_MAX);

    let TraceEnd::Ball { number, at, vel, spin } = end else {
        return prediction;
    };
    let Some(object) = world.ball(number) else {
        return prediction;
    };

    let normal = (object.pos - at).try_normalize().unwrap_or(aim);
    let (cue_after, object_after, cue_spin) = cue_impact(vel, spin, object.vel, normal, params);

    prediction.target = Some(number);
    prediction.contact_point = Some(at + normal * cue.radius);
    prediction.contact_normal = Some(normal);
    prediction.cue_velocity_after = cue_after;
    prediction.object_velocity_after = object_after;
    prediction.cue_speed_after = cue_after.length();
    prediction.object_speed_after = object_after.length();

    let (cue_after_path, _) = trace(world, CUE, at, cue_after, cue_spin, false);
    let (object_path, _) = trace(world, number, object.pos, object_after, Vec2::ZERO, false);
    prediction.cue_after_path = resample_path(&cue_after_path, PATH_SEGMENT_MAX);
    prediction.object_path = resample_path(&object_path, PATH_SEGMENT_MAX);
    prediction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::{CollisionResponse, PhysicsParams};
    use crate::game::shot::PhysicsEvent;
    use crate::game::table::TableLayout;

    fn two_balls(params: PhysicsParams) -> PhysicsWorld {
        PhysicsWorld::from_positions(
            params,
            TableLayout::standard(),
            &[(CUE, Vec2::new(-0.5, 0.0)), (6, Vec2::new(0.2, 0.05))],
        )
    }

    #[test]
    fn preview_leaves_world_untouched() {
        let world = two_balls(PhysicsParams::default());
        let before: Vec<Vec2> = world.balls().iter().map(|b| b.pos).collect();
        let prediction = predict(&world, Vec2::X, 0.6, Vec2::new(0.3, 0.5));
        let after: Vec<Vec2> = world.balls().iter().map(|b| b.pos).collect();
        assert_eq!(before, after);
        assert_eq!(prediction.target, Some(6));
        assert!(world.is_idle());
    }

    #[test]
    fn cut_shot_reports_contact_geometry() {
        let world = two_balls(PhysicsParams::default());
        let prediction = predict(&world, Vec2::X, 0.5, Vec2::ZERO);
        let normal = prediction.contact_normal.unwrap();
        assert!((normal.length() - 1.0).abs() < 1.0e-4);
        assert!(normal.x > 0.0 && normal.y > 0.0);
        assert!(prediction.object_speed_after > 0.0);
        assert!(prediction.object_velocity_after.normalize().dot(normal) > 0.999);
        assert!(!prediction.object_path.is_empty());
        assert!(!prediction.cue_after_path.is_empty());
    }

    #[test]
    fn paths_are_resampled() {
        let world = PhysicsWorld::from_positions(
            PhysicsParams::default(),
            TableLayout::standard(),
            &[(CUE, Vec2::ZERO)],
        );
        let prediction = predict(&world, Vec2::new(1.0, 0.7), 1.0, Vec2::ZERO);
        assert_eq!(prediction.target, None);
        assert!(prediction.cue_path.len() > 2);
        for pair in prediction.cue_path.windows(2) {
            assert!(pair[0].distance(pair[1]) <= PATH_SEGMENT_MAX + 1.0e-4);
        }
    }

    #[test]
    fn resample_keeps_endpoints() {
        let points = [Vec2::ZERO, Vec2::new(0.05, 0.0), Vec2::new(0.05, 0.031)];
        let out = resample_path(&points, 0.02);
        assert_eq!(out.first(), Some(&Vec2::ZERO));
        assert_eq!(out.last(), Some(&Vec2::new(0.05, 0.031)));
        assert!(out.len() >= 5);
    }

    #[test]
    fn integrator_agrees_with_preview() {
        let params = PhysicsParams {
            response: CollisionResponse::Physical,
            break_cluster: false,
            ..PhysicsParams::default()
        };
        let mut world = two_balls(params);
        let prediction = predict(&world, Vec2::X, 0.5, Vec2::ZERO);
        world.shoot(Vec2::X, 0.5, Vec2::ZERO, None).unwrap();

        for _ in 0..(120 * 2) {
            world.step();
            if world.take_events().contains(&PhysicsEvent::FirstContact { ball: 6 }) {
                let actual = world.ball(6).unwrap().vel;
                assert!(actual.distance(prediction.object_velocity_after) < 1.0e-3);
                return;
            }
        }
        panic!("no contact");
    }
}
