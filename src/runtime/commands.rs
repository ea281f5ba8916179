//! Operator commands delivered to a running simulation.

use serde::{Deserialize, Serialize};

use crate::core::emergency::EmergencyKind;
use crate::core::lane::LaneId;
use crate::core::TrafficError;
use crate::policy::PolicyId;
use crate::runtime::intersection::Intersection;

/// A control request for the driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Stop generating arrivals and scheduling.
    Pause,
    /// Continue after a pause.
    Resume,
    /// Swap the scheduling policy.
    SetPolicy {
        /// Policy to switch to.
        policy: PolicyId,
    },
    /// Raise an emergency on a lane.
    TriggerEmergency {
        /// Lane index, 0..4.
        lane: usize,
        /// Vehicle class.
        kind: EmergencyKind,
    },
    /// End the run.
    Shutdown,
}

impl Command {
    /// Apply the command to `intersection`.
    ///
    /// Returns `true` when the command changed anything; repeated pauses,
    /// resumes, shutdowns and coalesced emergencies return `false`.
    ///
    /// # Errors
    ///
    /// `TrafficError::InvalidLane` for an emergency on a lane outside 0..4, or
    /// a rejected transition while swapping policies.
    pub fn apply(self, intersection: &Intersection) -> Result<bool, TrafficError> {
        tracing::debug!(command = ?self, "applying command");
        match self {
            Self::Pause => Ok(intersection.pause()),
            Self::Resume => Ok(intersection.resume()),
            Self::SetPolicy { policy } => {
                let changed = intersection.scheduler().policy() != policy;
                intersection.set_policy(policy)?;
                Ok(changed)
            }
            Self::TriggerEmergency { lane, kind } => {
                let lane = LaneId::new(lane)?;
                Ok(intersection.trigger_emergency(lane, kind))
            }
            Self::Shutdown => Ok(intersection.request_shutdown()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::IntersectionBuilder;
    use crate::config::SimulationConfig;

    fn intersection() -> Intersection {
        IntersectionBuilder::new(SimulationConfig::default())
            .build()
            .unwrap()
    }

    #[test]
    fn test_pause_resume_idempotent() {
        let ix = intersection();
        assert!(Command::Pause.apply(&ix).unwrap());
        assert!(!Command::Pause.apply(&ix).unwrap());
        assert!(ix.is_paused());
        assert!(Command::Resume.apply(&ix).unwrap());
        assert!(!Command::Resume.apply(&ix).unwrap());
        assert!(!ix.is_paused());
    }

    #[test]
    fn test_set_policy_and_emergency() {
        let ix = intersection();
        let cmd = Command::SetPolicy {
            policy: PolicyId::MultilevelFeedback,
        };
        assert!(cmd.apply(&ix).unwrap());
        assert!(!cmd.apply(&ix).unwrap());
        assert_eq!(ix.scheduler().policy(), PolicyId::MultilevelFeedback);

        let emergency = Command::TriggerEmergency {
            lane: 1,
            kind: EmergencyKind::Police,
        };
        assert!(emergency.apply(&ix).unwrap());
        assert!(!emergency.apply(&ix).unwrap());
        assert!(ix.emergency().is_pending(LaneId::SOUTH));

        let bad = Command::TriggerEmergency {
            lane: 9,
            kind: EmergencyKind::Police,
        };
        assert_eq!(bad.apply(&ix), Err(TrafficError::InvalidLane(9)));
    }

    #[test]
    fn test_shutdown_once() {
        let ix = intersection();
        assert!(Command::Shutdown.apply(&ix).unwrap());
        assert!(!Command::Shutdown.apply(&ix).unwrap());
        assert!(!ix.is_running());
    }

    #[test]
    fn test_command_json() {
        let cmd: Command =
            serde_json::from_str(r#"{"command":"set_policy","policy":"srtf"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::SetPolicy {
                policy: PolicyId::Srtf
            }
        );
    }
}
