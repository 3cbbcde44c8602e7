//! Ball identity, grouping and per-ball motion state

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::table::{BALL_RADIUS, REST_HEIGHT};

pub const CUE: u8 = 0;
pub const EIGHT: u8 = 8;
pub const BALL_COUNT: usize = 16;
pub const BALLS_PER_GROUP: u8 = 7;

/// One of the two seven-ball groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    /// Balls 1-7
    Solids,
    /// Balls 9-15
    Stripes,
}

impl Group {
    pub fn opposite(self) -> Self {
        match self {
            Group::Solids => Group::Stripes,
            Group::Stripes => Group::Solids,
        }
    }

    pub fn contains(self, number: u8) -> bool {
        BallKind::of(number).group() == Some(self)
    }

    pub fn label(self) -> &'static str {
        match self {
            Group::Solids => "solids",
            Group::Stripes => "stripes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallKind {
    Cue,
    Solid,
    Eight,
    Stripe,
}

impl BallKind {
    pub fn of(number: u8) -> Self {
        match number {
            CUE => BallKind::Cue,
            EIGHT => BallKind::Eight,
            1..=7 => BallKind::Solid,
            _ => BallKind::Stripe,
        }
    }

    pub fn group(self) -> Option<Group> {
        match self {
            BallKind::Solid => Some(Group::Solids),
            BallKind::Stripe => Some(Group::Stripes),
            BallKind::Cue | BallKind::Eight => None,
        }
    }
}

/// A ball on its way down a pocket. Non-interactive while it lasts.
#[derive(Debug, Clone, Copy)]
pub struct PocketDrop {
    pub start: Vec2,
    pub centre: Vec2,
    pub elapsed: f32,
}

#[derive(Debug, Clone)]
pub struct Ball {
    pub number: u8,
    /// Centre on the table plane
    pub pos: Vec2,
    /// Centre height; pinned to `REST_HEIGHT` except while dropping
    pub height: f32,
    pub vel: Vec2,
    /// x = side spin (english), y = follow (+) / draw (-), both in -1..=1
    pub spin: Vec2,
    pub radius: f32,
    pub moving: bool,
    pub pocketed: bool,
    /// The scratched cue ball is hidden instead of animated
    pub visible: bool,
    pub drop: Option<PocketDrop>,
}

impl Ball {
    pub fn new(number: u8, pos: Vec2) -> Self {
        Self {
            number,
            pos,
            height: REST_HEIGHT,
            vel: Vec2::ZERO,
            spin: Vec2::ZERO,
            radius: BALL_RADIUS,
            moving: false,
            pocketed: false,
            visible: true,
            drop: None,
        }
    }

    pub fn is_cue(&self) -> bool {
        self.number == CUE
    }

    /// On the table and able to collide
    pub fn is_active(&self) -> bool {
        !self.pocketed && self.drop.is_none()
    }

    pub fn speed(&self) -> f32 {
        self.vel.length()
    }

    pub fn stop(&mut self) {
        self.vel = Vec2::ZERO;
        self.spin = Vec2::ZERO;
        self.moving = false;
    }

    /// Put the ball back on the cloth at `pos`
    pub fn restore(&mut self, pos: Vec2) {
        self.pos = pos;
        self.height = REST_HEIGHT;
        self.pocketed = false;
        self.visible = true;
        self.drop = None;
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_numbering() {
        assert_eq!(BallKind::of(0), BallKind::Cue);
        assert_eq!(BallKind::of(3), BallKind::Solid);
        assert_eq!(BallKind::of(8), BallKind::Eight);
        assert_eq!(BallKind::of(12), BallKind::Stripe);
        assert!(Group::Solids.contains(7));
        assert!(!Group::Solids.contains(8));
        assert!(Group::Stripes.contains(9));
        assert_eq!(Group::Stripes.opposite(), Group::Solids);
    }

    #[test]
    fn restore_clears_pocket_state() {
        let mut ball = Ball::new(CUE, Vec2::ZERO);
        ball.pocketed = true;
        ball.visible = false;
        ball.vel = Vec2::X;
        ball.restore(Vec2::new(0.5, 0.0));
        assert!(ball.is_active());
        assert!(ball.visible);
        assert_eq!(ball.height, REST_HEIGHT);
        assert_eq!(ball.vel, Vec2::ZERO);
    }
}
