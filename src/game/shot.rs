//! Per-shot event aggregation

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::ball::{BallKind, Group, CUE, EIGHT};
use super::state::Seat;
use super::table::PocketId;

/// Events raised by the integrator while a shot is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsEvent {
    /// Cue ball's first contact with an object ball this shot
    FirstContact { ball: u8 },
    CushionContact { ball: u8 },
    /// Object ball captured by a pocket
    Pocketed { ball: u8, pocket: PocketId },
    /// Cue ball captured by a pocket
    Scratch { pocket: PocketId },
    /// Every ball is at rest; raised once per shot
    TableIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocketedBall {
    pub number: u8,
    pub kind: BallKind,
    pub pocket: PocketId,
}

/// Everything the rule engine needs to know about one finished shot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShotRecord {
    pub shooter: Seat,
    pub is_break: bool,
    pub first_contact: Option<u8>,
    /// Any rail touched (by any ball) after the first contact
    pub cushion_after_contact: bool,
    /// Distinct object balls that touched a rail during the shot
    pub cushion_balls: BTreeSet<u8>,
    pub pocketed: Vec<PocketedBall>,
    pub scratch: bool,
    pub called_pocket: Option<PocketId>,
}

impl ShotRecord {
    pub fn pocketed_eight(&self) -> Option<&PocketedBall> {
        self.pocketed.iter().find(|b| b.number == EIGHT)
    }

    pub fn pocketed_count(&self, group: Group) -> usize {
        self.pocketed
            .iter()
            .filter(|b| b.kind.group() == Some(group))
            .count()
    }

    /// Groups represented among the pocketed object balls, in a stable order
    pub fn pocketed_groups(&self) -> Vec<Group> {
        [Group::Solids, Group::Stripes]
            .into_iter()
            .filter(|g| self.pocketed_count(*g) > 0)
            .collect()
    }

    pub fn any_object_pocketed(&self) -> bool {
        !self.pocketed.is_empty()
    }
}

/// Collects integrator events for exactly one shot
#[derive(Debug, Clone)]
pub struct ShotAggregator {
    record: ShotRecord,
    settled: bool,
}

impl ShotAggregator {
    pub fn new(shooter: Seat, is_break: bool, called_pocket: Option<PocketId>) -> Self {
        Self {
            record: ShotRecord {
                shooter,
                is_break,
                called_pocket,
                ..ShotRecord::default()
            },
            settled: false,
        }
    }

    pub fn observe(&mut self, event: &PhysicsEvent) {
        if self.settled {
            return;
        }
        let record = &mut self.record;
        match *event {
            PhysicsEvent::FirstContact { ball } => {
                if record.first_contact.is_none() {
                    record.first_contact = Some(ball);
                }
            }
            PhysicsEvent::CushionContact { ball } => {
                if record.first_contact.is_some() {
                    record.cushion_after_contact = true;
                }
                if ball != CUE {
                    record.cushion_balls.insert(ball);
                }
            }
            PhysicsEvent::Pocketed { ball, pocket } => {
                if !record.pocketed.iter().any(|b| b.number == ball) {
                    record.pocketed.push(PocketedBall {
                        number: ball,
                        kind: BallKind::of(ball),
                        pocket,
                    });
                }
            }
            PhysicsEvent::Scratch { .. } => record.scratch = true,
            PhysicsEvent::TableIdle => self.settled = true,
        }
    }

    #[cfg(test)]
    pub fn record(&self) -> &ShotRecord {
        &self.record
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn finish(self) -> ShotRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_one_shot() {
        let mut agg = ShotAggregator::new(Seat::One, false, None);
        agg.observe(&PhysicsEvent::CushionContact { ball: CUE });
        agg.observe(&PhysicsEvent::FirstContact { ball: 3 });
        agg.observe(&PhysicsEvent::FirstContact { ball: 11 });
        agg.observe(&PhysicsEvent::CushionContact { ball: 3 });
        agg.observe(&PhysicsEvent::Pocketed { ball: 3, pocket: PocketId(1) });
        agg.observe(&PhysicsEvent::Pocketed { ball: 3, pocket: PocketId(1) });
        assert!(!agg.is_settled());
        agg.observe(&PhysicsEvent::TableIdle);
        agg.observe(&PhysicsEvent::Scratch { pocket: PocketId(0) });

        let record = agg.finish();
        assert_eq!(record.first_contact, Some(3));
        assert!(record.cushion_after_contact);
        assert_eq!(record.cushion_balls.len(), 1);
        assert_eq!(record.pocketed.len(), 1);
        assert_eq!(record.pocketed_groups(), vec![Group::Solids]);
        assert!(!record.scratch, "events after rest belong to no shot");
    }

    #[test]
    fn rail_before_contact_does_not_count() {
        let mut agg = ShotAggregator::new(Seat::Two, false, None);
        agg.observe(&PhysicsEvent::CushionContact { ball: CUE });
        assert!(!agg.record().cushion_after_contact);
    }
}
