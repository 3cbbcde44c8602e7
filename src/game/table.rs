//! Table geometry: cushions, pockets, spots, kitchen and the rack
//!
//! Units are metres. The origin is the centre of the playing surface, x runs
//! along the length (head rail at -x, foot rail at +x) and the cushion noses
//! sit on `x = ±HALF_LENGTH`, `y = ±HALF_WIDTH`.

use glam::Vec2;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ball::EIGHT;

pub const TABLE_LENGTH: f32 = 2.54;
pub const TABLE_WIDTH: f32 = 1.27;
pub const HALF_LENGTH: f32 = TABLE_LENGTH / 2.0;
pub const HALF_WIDTH: f32 = TABLE_WIDTH / 2.0;

pub const BALL_RADIUS: f32 = 0.028575;
/// Centre height of a ball resting on the cloth
pub const REST_HEIGHT: f32 = BALL_RADIUS;

/// Cushion length missing at each corner, measured along the rail
pub const CORNER_MOUTH: f32 = 0.075;
/// Half-width of the side pocket opening
pub const SIDE_MOUTH: f32 = 0.065;
pub const CORNER_POCKET_RADIUS: f32 = 0.05;
pub const SIDE_POCKET_RADIUS: f32 = 0.045;
/// How far past the rail line a corner mouth reaches
const CORNER_PROBE_REACH: f32 = 0.16;

/// Capture distance is the pocket radius plus this fraction of the ball radius
pub const POCKET_CAPTURE_SCALE: f32 = 0.3;

/// Head string: the kitchen is everything behind it
pub const HEAD_STRING_X: f32 = -HALF_LENGTH / 2.0;

/// Extra spacing between racked balls so the rack does not start overlapped
const RACK_GAP: f32 = 0.0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PocketId(pub u8);

#[derive(Debug, Clone, Copy)]
pub struct Pocket {
    pub id: PocketId,
    pub centre: Vec2,
    pub radius: f32,
    pub corner: bool,
}

impl Pocket {
    /// True when a ball of `radius` centred at `pos` falls in
    pub fn captures(&self, pos: Vec2, radius: f32) -> bool {
        pos.distance(self.centre) < self.radius + radius * POCKET_CAPTURE_SCALE
    }

    /// True when `pos` (already past a rail line) lies over this pocket's hole
    fn over_mouth(&self, pos: Vec2) -> bool {
        if self.corner {
            pos.distance(self.centre) < CORNER_PROBE_REACH
        } else {
            (pos.x - self.centre.x).abs() < SIDE_MOUTH && pos.y.signum() == self.centre.y.signum()
        }
    }
}

/// A straight cushion nose between two pocket jaws
#[derive(Debug, Clone, Copy)]
pub struct Cushion {
    pub a: Vec2,
    pub b: Vec2,
    /// Unit normal pointing into the playing surface
    pub normal: Vec2,
}

impl Cushion {
    fn new(a: Vec2, b: Vec2, normal: Vec2) -> Self {
        Self { a, b, normal }
    }

    pub fn tangent(&self) -> Vec2 {
        (self.b - self.a).normalize_or_zero()
    }

    pub fn length(&self) -> f32 {
        self.a.distance(self.b)
    }
}

#[derive(Debug, Clone)]
pub struct TableLayout {
    pub pockets: [Pocket; 6],
    pub cushions: [Cushion; 6],
}

impl TableLayout {
    /// A nine-foot table
    pub fn standard() -> Self {
        let (hl, hw) = (HALF_LENGTH, HALF_WIDTH);
        let corner = |id: u8, sx: f32, sy: f32| Pocket {
            id: PocketId(id),
            centre: Vec2::new(sx * (hl + 0.01), sy * (hw + 0.01)),
            radius: CORNER_POCKET_RADIUS,
            corner: true,
        };
        let side = |id: u8, sy: f32| Pocket {
            id: PocketId(id),
            centre: Vec2::new(0.0, sy * (hw + 0.03)),
            radius: SIDE_POCKET_RADIUS,
            corner: false,
        };

        let pockets = [
            corner(0, -1.0, 1.0),
            side(1, 1.0),
            corner(2, 1.0, 1.0),
            corner(3, 1.0, -1.0),
            side(4, -1.0),
            corner(5, -1.0, -1.0),
        ];

        let cushions = [
            Cushion::new(Vec2::new(-hl + CORNER_MOUTH, hw), Vec2::new(-SIDE_MOUTH, hw), Vec2::NEG_Y),
            Cushion::new(Vec2::new(SIDE_MOUTH, hw), Vec2::new(hl - CORNER_MOUTH, hw), Vec2::NEG_Y),
            Cushion::new(Vec2::new(-hl + CORNER_MOUTH, -hw), Vec2::new(-SIDE_MOUTH, -hw), Vec2::Y),
            Cushion::new(Vec2::new(SIDE_MOUTH, -hw), Vec2::new(hl - CORNER_MOUTH, -hw), Vec2::Y),
            Cushion::new(Vec2::new(-hl, -hw + CORNER_MOUTH), Vec2::new(-hl, hw - CORNER_MOUTH), Vec2::X),
            Cushion::new(Vec2::new(hl, -hw + CORNER_MOUTH), Vec2::new(hl, hw - CORNER_MOUTH), Vec2::NEG_X),
        ];

        Self { pockets, cushions }
    }

    pub fn pocket(&self, id: PocketId) -> Option<&Pocket> {
        self.pockets.iter().find(|p| p.id == id)
    }

    /// Pocket whose capture radius contains the ball
    pub fn capturing_pocket(&self, pos: Vec2, radius: f32) -> Option<PocketId> {
        self.pockets
            .iter()
            .find(|p| p.captures(pos, radius))
            .map(|p| p.id)
    }

    /// Fallback probe: a centre that has crossed a rail line through a mouth
    /// is over the hole even if it missed the capture circle.
    pub fn pocket_below(&self, pos: Vec2) -> Option<PocketId> {
        if !self.beyond_rails(pos) {
            return None;
        }
        self.pockets
            .iter()
            .filter(|p| p.over_mouth(pos))
            .min_by(|a, b| {
                pos.distance_squared(a.centre)
                    .total_cmp(&pos.distance_squared(b.centre))
            })
            .map(|p| p.id)
    }

    pub fn beyond_rails(&self, pos: Vec2) -> bool {
        pos.x.abs() > HALF_LENGTH || pos.y.abs() > HALF_WIDTH
    }

    /// Pull a stray centre back inside the cushions
    pub fn confine(&self, pos: Vec2, radius: f32) -> Vec2 {
        Vec2::new(
            pos.x.clamp(-HALF_LENGTH + radius, HALF_LENGTH - radius),
            pos.y.clamp(-HALF_WIDTH + radius, HALF_WIDTH - radius),
        )
    }

    /// Centre fully on the playing surface, not touching a cushion
    pub fn in_bounds(&self, pos: Vec2, radius: f32) -> bool {
        pos.x.abs() <= HALF_LENGTH - radius && pos.y.abs() <= HALF_WIDTH - radius
    }

    pub fn in_kitchen(&self, pos: Vec2) -> bool {
        pos.x <= HEAD_STRING_X
    }

    pub fn head_spot(&self) -> Vec2 {
        Vec2::new(HEAD_STRING_X, 0.0)
    }

    pub fn foot_spot(&self) -> Vec2 {
        Vec2::new(HALF_LENGTH / 2.0, 0.0)
    }
}

/// Rack slots, row-major from the apex; slot 4 is the centre of the third row
/// and slots 10 and 14 are the back corners.
pub fn rack_slots(apex: Vec2, radius: f32) -> [Vec2; 15] {
    let gap = radius * 2.0 + RACK_GAP;
    let row_offset = gap * 3f32.sqrt() / 2.0;
    let mut slots = [Vec2::ZERO; 15];
    let mut slot = 0;
    for row in 0..5 {
        for col in 0..=row {
            let x = apex.x + row as f32 * row_offset;
            let y = apex.y + (col as f32 - row as f32 / 2.0) * gap;
            slots[slot] = Vec2::new(x, y);
            slot += 1;
        }
    }
    slots
}

const CENTRE_SLOT: usize = 4;
const BACK_CORNERS: [usize; 2] = [10, 14];

/// Ball numbers per rack slot: 8 in the centre, one solid and one stripe on
/// the back corners, everything else shuffled.
pub fn rack_order<R: Rng + ?Sized>(rng: &mut R) -> [u8; 15] {
    let mut solids: Vec<u8> = (1..=7).collect();
    let mut stripes: Vec<u8> = (9..=15).collect();
    solids.shuffle(rng);
    stripes.shuffle(rng);

    let mut corners = [solids.pop().unwrap_or(1), stripes.pop().unwrap_or(9)];
    if rng.gen_bool(0.5) {
        corners.swap(0, 1);
    }

    let mut rest: Vec<u8> = solids.into_iter().chain(stripes).collect();
    rest.shuffle(rng);

    let mut order = [0u8; 15];
    order[CENTRE_SLOT] = EIGHT;
    order[BACK_CORNERS[0]] = corners[0];
    order[BACK_CORNERS[1]] = corners[1];
    let mut rest = rest.into_iter();
    for (slot, number) in order.iter_mut().enumerate() {
        if slot == CENTRE_SLOT || BACK_CORNERS.contains(&slot) {
            continue;
        }
        *number = rest.next().unwrap_or(EIGHT);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ball::{BallKind, Group};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn rack_is_a_permutation_with_eight_in_centre() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let order = rack_order(&mut rng);
        let mut sorted = order.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (1..=15).collect::<Vec<u8>>());
        assert_eq!(order[CENTRE_SLOT], EIGHT);

        let corner_groups: Vec<Option<Group>> = BACK_CORNERS
            .iter()
            .map(|&s| BallKind::of(order[s]).group())
            .collect();
        assert!(corner_groups.contains(&Some(Group::Solids)));
        assert!(corner_groups.contains(&Some(Group::Stripes)));
    }

    #[test]
    fn rack_slots_do_not_overlap() {
        let slots = rack_slots(TableLayout::standard().foot_spot(), BALL_RADIUS);
        for i in 0..slots.len() {
            for j in (i + 1)..slots.len() {
                assert!(slots[i].distance(slots[j]) >= BALL_RADIUS * 2.0);
            }
        }
    }

    #[test]
    fn corner_capture_and_probe() {
        let layout = TableLayout::standard();
        let corner = Vec2::new(-HALF_LENGTH + BALL_RADIUS, HALF_WIDTH - BALL_RADIUS);
        assert_eq!(layout.capturing_pocket(corner, BALL_RADIUS), Some(PocketId(0)));

        let mid_rail = Vec2::new(0.6, HALF_WIDTH - BALL_RADIUS);
        assert_eq!(layout.capturing_pocket(mid_rail, BALL_RADIUS), None);
        assert_eq!(layout.pocket_below(mid_rail), None);

        let through_side = Vec2::new(0.02, HALF_WIDTH + 0.005);
        assert_eq!(layout.pocket_below(through_side), Some(PocketId(1)));
    }

    #[test]
    fn kitchen_is_behind_head_string() {
        let layout = TableLayout::standard();
        assert!(layout.in_kitchen(layout.head_spot()));
        assert!(!layout.in_kitchen(layout.foot_spot()));
    }
}
