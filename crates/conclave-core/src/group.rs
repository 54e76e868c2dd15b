//! Multi-agent collaboration data model (spec.md §3, §4.6): the declarative
//! [`AgentGroup`] definition and the live, append-only [`GroupSession`].
//! Routing and consensus-detection *behavior* live in
//! `conclave-runtime::group::GroupCollaborationEngine`; this module only
//! carries the shapes and the structural validation spec.md §8 requires at
//! group-creation time (no teacher analog - `aof-core/src/fleet.rs`'s
//! `ConsensusConfig`/`CoordinationConfig` lent the general "config block"
//! shape, but the three-pattern/single-threshold contract here is simpler
//! than the teacher's five-algorithm fleet system and is authored fresh).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::agent::{is_valid_name, Message, Performative};
use crate::error::ConclaveError;

/// Routing pattern for a group collaboration round (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationPattern {
    PeerToPeer,
    Broadcast,
    Coordinator,
}

/// Declarative multi-agent collaboration definition (spec.md §3 `AgentGroup`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentGroup {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<String>,
    pub pattern: CommunicationPattern,
    pub max_rounds: u32,
    pub consensus_threshold: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentGroup {
    /// Structural validation (spec.md §8 boundary behaviors):
    /// - `pattern=coordinator` requires `coordinator` set and a member.
    /// - `max_rounds` must be positive.
    /// - `consensus_threshold` must lie in `(0, 1]`.
    pub fn validate(&self) -> Result<(), ConclaveError> {
        if !is_valid_name(&self.id) {
            return Err(ConclaveError::invalid_group(format!(
                "group id {:?} does not match [a-z0-9][a-z0-9_-]*",
                self.id
            )));
        }
        if self.members.is_empty() {
            return Err(ConclaveError::invalid_group("group has zero members"));
        }
        if self.max_rounds == 0 {
            return Err(ConclaveError::invalid_group("max_rounds must be positive"));
        }
        if !(self.consensus_threshold > 0.0 && self.consensus_threshold <= 1.0) {
            return Err(ConclaveError::invalid_group(format!(
                "consensus_threshold {} out of bounds (0, 1]",
                self.consensus_threshold
            )));
        }
        match self.pattern {
            CommunicationPattern::Coordinator => match &self.coordinator {
                None => {
                    return Err(ConclaveError::invalid_group(
                        "pattern=coordinator requires a coordinator",
                    ))
                }
                Some(c) if !self.members.contains(c) => {
                    return Err(ConclaveError::invalid_group(format!(
                        "coordinator {:?} is not a member",
                        c
                    )))
                }
                Some(_) => {}
            },
            _ => {}
        }
        Ok(())
    }
}

/// Live collaboration session status (spec.md §3 `GroupSession`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Active,
    AwaitingApproval,
    Completed,
    Cancelled,
    Timeout,
}

/// A member's latest performative stance toward a proposal, derived by
/// scanning `GroupSession.messages` for consensus detection (spec.md §4.6).
/// AGREE and CONFIRM on the same proposal are equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stance {
    pub member: String,
    pub performative: Performative,
    pub proposal: Option<String>,
}

impl Stance {
    /// Whether this stance counts as agreement with `proposal`.
    pub fn agrees_with(&self, proposal: &str) -> bool {
        match self.performative {
            Performative::Agree | Performative::Confirm => {
                self.proposal.as_deref() == Some(proposal)
            }
            Performative::Propose => self.proposal.as_deref() == Some(proposal),
            _ => false,
        }
    }
}

/// The agreed proposal, recorded once a session reaches consensus
/// (spec.md §3, §8: agreement ratio at the recorded round was >= threshold).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub proposal: String,
    pub agreement_ratio: f64,
    pub round: u32,
}

/// One live collaboration run (spec.md §3 `GroupSession`). Owned exclusively
/// by the `GroupCollaborationEngine` invocation that created it; messages are
/// append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSession {
    pub session_id: ulid::Ulid,
    pub group_id: String,
    pub goal: String,
    pub status: GroupStatus,
    pub messages: Vec<Message>,
    pub round: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusRecord>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl GroupSession {
    pub fn new(group_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            session_id: ulid::Ulid::new(),
            group_id: group_id.into(),
            goal: goal.into(),
            status: GroupStatus::Active,
            messages: Vec::new(),
            round: 0,
            consensus: None,
            started_at: chrono::Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            GroupStatus::Completed | GroupStatus::Cancelled | GroupStatus::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_group() -> AgentGroup {
        AgentGroup {
            id: "triage".into(),
            name: "Triage Group".into(),
            members: vec!["member1".into(), "member2".into(), "member3".into()],
            coordinator: None,
            pattern: CommunicationPattern::Broadcast,
            max_rounds: 5,
            consensus_threshold: 0.66,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn valid_broadcast_group_passes() {
        assert!(base_group().validate().is_ok());
    }

    #[test]
    fn coordinator_pattern_requires_coordinator_in_members() {
        let mut g = base_group();
        g.pattern = CommunicationPattern::Coordinator;
        assert!(g.validate().is_err());
        g.coordinator = Some("not-a-member".into());
        assert!(g.validate().is_err());
        g.coordinator = Some("member1".into());
        assert!(g.validate().is_ok());
    }

    #[test]
    fn zero_max_rounds_rejected() {
        let mut g = base_group();
        g.max_rounds = 0;
        assert!(g.validate().is_err());
    }

    #[test]
    fn consensus_threshold_bounds() {
        let mut g = base_group();
        g.consensus_threshold = 0.0;
        assert!(g.validate().is_err());
        g.consensus_threshold = 1.0;
        assert!(g.validate().is_ok());
        g.consensus_threshold = 1.1;
        assert!(g.validate().is_err());
    }

    #[test]
    fn stance_agreement_treats_agree_and_confirm_as_equivalent() {
        let agree = Stance {
            member: "m1".into(),
            performative: Performative::Agree,
            proposal: Some("X".into()),
        };
        let confirm = Stance {
            member: "m2".into(),
            performative: Performative::Confirm,
            proposal: Some("X".into()),
        };
        assert!(agree.agrees_with("X"));
        assert!(confirm.agrees_with("X"));
        assert!(!agree.agrees_with("Y"));
    }
}
