//! Optimiser state machine.
//!
//! ```text
//! Uninitialised ──DataAttached──▶ Initialised ──Begin──▶ StartingTier
//!                                                          │ TierStarted
//!                                                          ▼
//!        Done ◀──TierEnded── EndingTier ◀──TierConverged── Optimising
//!                               │ TierEnded (finer tier or next phase left)
//!                               └──────────────▶ StartingTier
//! ```
//!
//! Every phase walks the tiers from the coarsest down to tier 0. All state
//! changes go through [`OptimisationState::transition`].

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which field a pass smooths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPhase {
    /// Orientation field.
    Rosy,
    /// Position field.
    Posy,
}

impl std::fmt::Display for FieldPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldPhase::Rosy => write!(f, "RoSy"),
            FieldPhase::Posy => write!(f, "PoSy"),
        }
    }
}

/// Position of the run: which phase, at which tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Index into the configured phase list.
    pub phase_index: usize,
    pub phase: FieldPhase,
    pub tier: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimisationState {
    #[default]
    Uninitialised,
    Initialised,
    StartingTier(Stage),
    Optimising(Stage),
    EndingTier(Stage),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// A graph was attached; resets any run in progress.
    DataAttached,
    /// The hierarchy was built and the run starts.
    Begin,
    TierStarted,
    TierConverged,
    /// The converged tier's values were propagated (if it had a finer tier).
    TierEnded,
}

/// What the transition function needs to know about the run.
#[derive(Debug, Clone, Copy)]
pub struct Schedule<'a> {
    pub phases: &'a [FieldPhase],
    /// Index of the coarsest tier.
    pub top_tier: usize,
}

impl OptimisationState {
    /// Apply `event`, or fail with `InvalidState` if it is illegal here.
    pub fn transition(self, event: StateEvent, schedule: &Schedule<'_>) -> Result<Self> {
        use OptimisationState::*;

        let next = match (self, event) {
            (_, StateEvent::DataAttached) => Initialised,
            (Initialised, StateEvent::Begin) => {
                let phase = *schedule
                    .phases
                    .first()
                    .ok_or_else(|| Error::InvalidState("No field phases scheduled".into()))?;
                StartingTier(Stage { phase_index: 0, phase, tier: schedule.top_tier })
            }
            (StartingTier(stage), StateEvent::TierStarted) => Optimising(stage),
            (Optimising(stage), StateEvent::TierConverged) => EndingTier(stage),
            (EndingTier(stage), StateEvent::TierEnded) => {
                if stage.tier > 0 {
                    StartingTier(Stage { tier: stage.tier - 1, ..stage })
                } else if let Some(phase) = schedule.phases.get(stage.phase_index + 1) {
                    StartingTier(Stage {
                        phase_index: stage.phase_index + 1,
                        phase: *phase,
                        tier: schedule.top_tier,
                    })
                } else {
                    Done
                }
            }
            (state, event) => {
                return Err(Error::InvalidState(format!("Cannot apply {event:?} in state {state:?}")));
            }
        };
        Ok(next)
    }

    /// Stage of the run, if one is in progress.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OptimisationState::StartingTier(s)
            | OptimisationState::Optimising(s)
            | OptimisationState::EndingTier(s) => Some(*s),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, OptimisationState::Done)
    }
}
