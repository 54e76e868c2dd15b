//! Human-approval gate data model (spec.md §3, §4.9). Grounded in
//! `aof-core/src/context.rs`'s `ApprovalConfig` (`required`,
//! `allowed_users`, `timeout_seconds` default 300, `require_for` patterns,
//! `allow_self_approval`, `min_approvers` default 1) for the policy-field
//! shape; blocking-wait *behavior* lives in
//! `conclave-runtime::review::ReviewGate`.

use serde::{Deserialize, Serialize};

/// Where a reviewed artifact's content lives (spec.md §3 "inline or by
/// reference").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ArtifactContent {
    Inline(serde_json::Value),
    Reference(String),
}

/// Policy governing a `ReviewGate::Request` call (spec.md §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPolicy {
    #[serde(default = "default_min_approvals")]
    pub min_approvals: u32,
    #[serde(default)]
    pub reviewers: Vec<String>,
    #[serde(default)]
    pub auto_approve_low_risk: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub allow_self_approval: bool,
}

fn default_min_approvals() -> u32 {
    1
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            min_approvals: default_min_approvals(),
            reviewers: Vec::new(),
            auto_approve_low_risk: false,
            timeout_secs: default_timeout_secs(),
            allow_self_approval: false,
        }
    }
}

/// Current lifecycle state of a [`ReviewRequest`] (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// One recorded approve/reject decision on a [`ReviewRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVote {
    pub reviewer: String,
    pub approve: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub decided_at: chrono::DateTime<chrono::Utc>,
}

/// A human-approval checkpoint (spec.md §3 `ReviewRequest`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub review_id: ulid::Ulid,
    pub artifact_id: String,
    pub artifact_kind: String,
    pub content: ArtifactContent,
    pub creator: String,
    pub reviewers: Vec<String>,
    pub required_approvals: u32,
    pub state: ReviewState,
    #[serde(default)]
    pub votes: Vec<ReviewVote>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl ReviewRequest {
    pub fn approvals(&self) -> u32 {
        self.votes.iter().filter(|v| v.approve).count() as u32
    }

    pub fn has_rejection(&self) -> bool {
        self.votes.iter().any(|v| !v.approve)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.state, ReviewState::Pending)
    }
}

/// Outcome returned by `ReviewGate::WaitFor` (spec.md §4.9). A deadline is
/// treated as a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approvals_counts_only_approve_votes() {
        let mut req = ReviewRequest {
            review_id: ulid::Ulid::new(),
            artifact_id: "a1".into(),
            artifact_kind: "tool_call".into(),
            content: ArtifactContent::Reference("s3://bucket/a1".into()),
            creator: "agent-1".into(),
            reviewers: vec!["alice".into(), "bob".into()],
            required_approvals: 2,
            state: ReviewState::Pending,
            votes: vec![],
            created_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(300),
        };
        req.votes.push(ReviewVote {
            reviewer: "alice".into(),
            approve: true,
            comment: None,
            decided_at: chrono::Utc::now(),
        });
        req.votes.push(ReviewVote {
            reviewer: "bob".into(),
            approve: false,
            comment: Some("nope".into()),
            decided_at: chrono::Utc::now(),
        });
        assert_eq!(req.approvals(), 1);
        assert!(req.has_rejection());
    }
}
