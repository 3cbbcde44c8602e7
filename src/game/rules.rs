//! 8-ball rule engine
//!
//! `resolve` is a pure function of the shot record, the match state before
//! the shot and the rules configuration. It never reads clocks or physics,
//! so the same inputs always give the same ruling.

use serde::{Deserialize, Serialize};

use super::ball::{Group, EIGHT};
use super::shot::ShotRecord;
use super::state::{GroupCounts, MatchState, PlacementZone, Seat};

/// Distinct object balls that must reach a rail for an empty break to count
pub const MIN_BREAK_CUSHION_BALLS: usize = 4;

/// What happens when the 8 drops on the break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EightOnBreak {
    /// Respot the 8; breaker keeps shooting unless they scratched
    #[default]
    Respot,
    RerackSameBreaker,
    RerackOpponentBreaks,
}

/// What happens after an illegal break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IllegalBreak {
    /// Opponent plays the table as it lies
    #[default]
    AcceptTable,
    RerackOpponentBreaks,
    RerackSameBreaker,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulesConfig {
    pub eight_on_break: EightOnBreak,
    pub illegal_break: IllegalBreak,
    /// The 8 only wins when it drops in the pocket named with the shot
    pub call_pocket_required: bool,
    /// Treat a turn timeout like a foul for ball-in-hand purposes
    pub timeout_grants_ball_in_hand: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Foul {
    NoContact,
    EightFirstOnOpenTable,
    WrongBallFirst,
    NoRailAfterContact,
    Scratch,
}

impl Foul {
    pub fn description(self) -> &'static str {
        match self {
            Foul::NoContact => "cue ball hit nothing",
            Foul::EightFirstOnOpenTable => "8-ball struck first on an open table",
            Foul::WrongBallFirst => "wrong ball struck first",
            Foul::NoRailAfterContact => "no rail after contact",
            Foul::Scratch => "scratch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakResult {
    Legal,
    Illegal,
    EightPocketed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Group cleared, then the 8 pocketed cleanly
    LegalEight,
    /// 8 pocketed with group balls still on the table
    EarlyEight,
    /// 8 pocketed on a foul shot
    FoulOnEight,
    /// 8 pocketed in a pocket other than the one called
    WrongPocket,
    Forfeit,
    Disconnect,
}

impl FinishReason {
    pub fn description(self) -> &'static str {
        match self {
            FinishReason::LegalEight => "8-ball pocketed",
            FinishReason::EarlyEight => "8-ball pocketed early",
            FinishReason::FoulOnEight => "foul on the 8-ball",
            FinishReason::WrongPocket => "8-ball in the wrong pocket",
            FinishReason::Forfeit => "forfeit",
            FinishReason::Disconnect => "opponent disconnected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Outcome {
    ShooterContinues,
    TurnPasses,
    Rerack { breaker: Seat },
    MatchWon { winner: Seat, reason: FinishReason },
}

/// The decision on one shot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruling {
    pub shooter: Seat,
    pub foul: Option<Foul>,
    pub break_result: Option<BreakResult>,
    /// Group newly assigned to the shooter by this shot
    pub group_lock: Option<Group>,
    pub outcome: Outcome,
    pub ball_in_hand: Option<(Seat, PlacementZone)>,
    pub respot_eight: bool,
    /// Group counts once the shot's pocketed balls are removed
    pub remaining: GroupCounts,
    pub narration: String,
}

impl Ruling {
    fn new(shot: &ShotRecord, remaining: GroupCounts, outcome: Outcome) -> Self {
        Self {
            shooter: shot.shooter,
            foul: None,
            break_result: None,
            group_lock: None,
            outcome,
            ball_in_hand: None,
            respot_eight: false,
            remaining,
            narration: String::new(),
        }
    }

    fn fouled(mut self, foul: Foul, zone: PlacementZone) -> Self {
        self.foul = Some(foul);
        self.outcome = Outcome::TurnPasses;
        self.ball_in_hand = Some((self.shooter.opponent(), zone));
        self
    }

    fn narrate(mut self, text: String) -> Self {
        self.narration = text;
        self
    }
}

/// Rule on a finished shot
pub fn resolve(shot: &ShotRecord, state: &MatchState, config: &RulesConfig) -> Ruling {
    let remaining = state.remaining.after(shot);
    if shot.is_break {
        resolve_break(shot, remaining, config)
    } else {
        resolve_play(shot, state, remaining, config)
    }
}

/// The only group pocketed this shot, if exactly one
fn single_group(shot: &ShotRecord) -> Option<Group> {
    match shot.pocketed_groups().as_slice() {
        [group] => Some(*group),
        _ => None,
    }
}

fn resolve_break(shot: &ShotRecord, remaining: GroupCounts, config: &RulesConfig) -> Ruling {
    let shooter = shot.shooter;
    let opponent = shooter.opponent();
    let name = shooter.label();

    if shot.pocketed_eight().is_some() {
        let mut ruling = Ruling::new(shot, remaining, Outcome::TurnPasses);
        ruling.break_result = Some(BreakResult::EightPocketed);
        return match config.eight_on_break {
            EightOnBreak::Respot if shot.scratch => {
                ruling.respot_eight = true;
                ruling.fouled(Foul::Scratch, PlacementZone::Kitchen).narrate(format!(
                    "{name} pocketed the 8 and scratched on the break. The 8 is respotted; {} has ball in hand behind the head string.",
                    opponent.label()
                ))
            }
            EightOnBreak::Respot => {
                ruling.respot_eight = true;
                ruling.group_lock = single_group(shot);
                ruling.outcome = Outcome::ShooterContinues;
                ruling.narrate(format!(
                    "{name} pocketed the 8 on the break. The 8 is respotted and {name} shoots again."
                ))
            }
            EightOnBreak::RerackSameBreaker => {
                ruling.outcome = Outcome::Rerack { breaker: shooter };
                ruling.narrate(format!("8 on the break. Re-rack, {name} breaks again."))
            }
            EightOnBreak::RerackOpponentBreaks => {
                ruling.outcome = Outcome::Rerack { breaker: opponent };
                ruling.narrate(format!("8 on the break. Re-rack, {} breaks.", opponent.label()))
            }
        };
    }

    let legal =
        shot.any_object_pocketed() || shot.cushion_balls.len() >= MIN_BREAK_CUSHION_BALLS;
    if !legal {
        let mut ruling = Ruling::new(shot, remaining, Outcome::TurnPasses);
        ruling.break_result = Some(BreakResult::Illegal);
        return match config.illegal_break {
            IllegalBreak::AcceptTable if shot.scratch => ruling
                .fouled(Foul::Scratch, PlacementZone::Kitchen)
                .narrate(format!(
                    "Illegal break with a scratch. {} has ball in hand behind the head string.",
                    opponent.label()
                )),
            IllegalBreak::AcceptTable => ruling.narrate(format!(
                "Illegal break. {} takes the table as it lies.",
                opponent.label()
            )),
            IllegalBreak::RerackOpponentBreaks => {
                ruling.outcome = Outcome::Rerack { breaker: opponent };
                ruling.narrate(format!("Illegal break. Re-rack, {} breaks.", opponent.label()))
            }
            IllegalBreak::RerackSameBreaker => {
                ruling.outcome = Outcome::Rerack { breaker: shooter };
                ruling.narrate(format!("Illegal break. Re-rack, {name} breaks again."))
            }
        };
    }

    let mut ruling = Ruling::new(shot, remaining, Outcome::TurnPasses);
    ruling.break_result = Some(BreakResult::Legal);
    if shot.scratch {
        return ruling.fouled(Foul::Scratch, PlacementZone::Kitchen).narrate(format!(
            "{name} scratched on the break. {} has ball in hand behind the head string.",
            opponent.label()
        ));
    }

    ruling.group_lock = single_group(shot);
    if shot.any_object_pocketed() {
        ruling.outcome = Outcome::ShooterContinues;
    }
    let text = match (ruling.group_lock, ruling.outcome) {
        (Some(group), _) => format!("Good break. {name} takes {} and continues.", group.label()),
        (None, Outcome::ShooterContinues) => {
            format!("Good break. The table is open and {name} continues.")
        }
        _ => format!("Good break. The table is open, {} to shoot.", opponent.label()),
    };
    ruling.narrate(text)
}

/// Foul checks in order; the first match wins
fn detect_foul(shot: &ShotRecord, state: &MatchState) -> Option<Foul> {
    let Some(first) = shot.first_contact else {
        return Some(Foul::NoContact);
    };

    match state.group_of(shot.shooter).filter(|_| state.groups_locked) {
        None if first == EIGHT => return Some(Foul::EightFirstOnOpenTable),
        Some(group) => {
            let on_the_eight = state.remaining.remaining(group) == 0;
            let legal_target = if on_the_eight {
                first == EIGHT
            } else {
                group.contains(first)
            };
            if !legal_target {
                return Some(Foul::WrongBallFirst);
            }
        }
        None => {}
    }

    if !shot.cushion_after_contact && !shot.any_object_pocketed() {
        return Some(Foul::NoRailAfterContact);
    }
    if shot.scratch {
        return Some(Foul::Scratch);
    }
    None
}

fn resolve_play(
    shot: &ShotRecord,
    state: &MatchState,
    remaining: GroupCounts,
    config: &RulesConfig,
) -> Ruling {
    let shooter = shot.shooter;
    let opponent = shooter.opponent();
    let name = shooter.label();
    let foul = detect_foul(shot, state);
    let locked_group = state.group_of(shooter).filter(|_| state.groups_locked);

    if let Some(eight) = shot.pocketed_eight() {
        let cleared = locked_group.is_some_and(|g| remaining.remaining(g) == 0);
        let called = !config.call_pocket_required || shot.called_pocket == Some(eight.pocket);

        let mut ruling = Ruling::new(shot, remaining, Outcome::TurnPasses);
        ruling.foul = foul;
        let (winner, reason) = if !cleared {
            (opponent, FinishReason::EarlyEight)
        } else if foul.is_some() {
            (opponent, FinishReason::FoulOnEight)
        } else if !called {
            (opponent, FinishReason::WrongPocket)
        } else {
            (shooter, FinishReason::LegalEight)
        };
        ruling.outcome = Outcome::MatchWon { winner, reason };
        let text = if winner == shooter {
            format!("{name} pockets the 8 and wins the match.")
        } else {
            format!(
                "{name} loses: {}. {} wins the match.",
                reason.description(),
                opponent.label()
            )
        };
        return ruling.narrate(text);
    }

    if let Some(foul) = foul {
        return Ruling::new(shot, remaining, Outcome::TurnPasses)
            .fouled(foul, PlacementZone::Anywhere)
            .narrate(format!(
                "Foul by {name}: {}. {} has ball in hand.",
                foul.description(),
                opponent.label()
            ));
    }

    let mut ruling = Ruling::new(shot, remaining, Outcome::TurnPasses);
    if locked_group.is_none() {
        ruling.group_lock = single_group(shot);
    }

    let own_group = locked_group.or(ruling.group_lock);
    let keeps_table = match own_group {
        Some(group) => {
            shot.pocketed_count(group) > 0 && shot.pocketed_count(group.opposite()) == 0
        }
        None => shot.any_object_pocketed(),
    };
    if keeps_table {
        ruling.outcome = Outcome::ShooterContinues;
    }

    let text = match (ruling.group_lock, keeps_table) {
        (Some(group), _) => format!("{name} is on {} and shoots again.", group.label()),
        (None, true) if locked_group.is_none() => {
            format!("Both groups down, the table stays open. {name} shoots again.")
        }
        (None, true) => format!("{name} shoots again."),
        (None, false) if own_group.is_some() && shot.any_object_pocketed() => format!(
            "{name} pocketed an opponent ball. {} to shoot.",
            opponent.label()
        ),
        (None, false) => format!("{} to shoot.", opponent.label()),
    };
    ruling.narrate(text)
}
