//! `ReviewGate`: blocking-wait behavior over the `ReviewRequest` data model
//! in `conclave_core::review` (spec.md §4.9). No teacher analog -
//! `aof-core::context::ApprovalConfig` only carries the policy fields;
//! the wait-with-deadline mechanics here are authored fresh on top of
//! `tokio::sync::Notify`, the same building block `conclave-core::cancel`
//! uses for its own "wait for a state transition" primitive.

use std::sync::Arc;
use std::time::Duration;

use conclave_core::{
    ArtifactContent, ConclaveError, ConclaveResult, ReviewDecision, ReviewPolicy, ReviewRequest,
    ReviewState, ReviewVote,
};
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{info, warn};
use ulid::Ulid;

use crate::events::{Event, EventBus, EventKind};

struct PendingReview {
    request: parking_lot::Mutex<ReviewRequest>,
    notify: Notify,
}

/// Human-approval checkpoint coordinator (spec.md §3 `ReviewGate`). One
/// instance is shared by every `WorkflowEngine` run that needs approval
/// gating; requests are keyed by `review_id` and looked up by
/// `WaitFor`/`Approve`/`Reject`.
pub struct ReviewGate {
    pending: DashMap<Ulid, Arc<PendingReview>>,
    events: Arc<EventBus>,
}

impl ReviewGate {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            pending: DashMap::new(),
            events,
        }
    }

    /// **Request(artifact, policy)** (spec.md §4.9). Creates a `Pending`
    /// review, visible to `Approve`/`Reject` immediately and to `WaitFor`
    /// until it resolves or its `timeout_secs` deadline passes.
    pub fn request(
        &self,
        artifact_id: impl Into<String>,
        artifact_kind: impl Into<String>,
        content: ArtifactContent,
        creator: impl Into<String>,
        policy: &ReviewPolicy,
        correlation_id: Ulid,
    ) -> ReviewRequest {
        let now = chrono::Utc::now();
        let req = ReviewRequest {
            review_id: Ulid::new(),
            artifact_id: artifact_id.into(),
            artifact_kind: artifact_kind.into(),
            content,
            creator: creator.into(),
            reviewers: policy.reviewers.clone(),
            required_approvals: policy.min_approvals,
            state: ReviewState::Pending,
            votes: Vec::new(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(policy.timeout_secs as i64),
        };

        info!(review_id = %req.review_id, artifact = %req.artifact_id, "review requested");
        self.events.publish(Event::new(
            EventKind::ReviewRequested,
            correlation_id,
            serde_json::json!({"review_id": req.review_id.to_string(), "artifact_id": req.artifact_id}),
        ));

        self.pending.insert(
            req.review_id,
            Arc::new(PendingReview {
                request: parking_lot::Mutex::new(req.clone()),
                notify: Notify::new(),
            }),
        );
        req
    }

    /// **Approve(review_id, reviewer)** / **Reject(review_id, reviewer)**
    /// (spec.md §4.9). A non-member reviewer is rejected unless the policy
    /// has an empty allowlist (any reviewer accepted). Self-approval by the
    /// artifact's creator is rejected unless `allow_self_approval`.
    fn vote(
        &self,
        review_id: Ulid,
        reviewer: &str,
        approve: bool,
        comment: Option<String>,
        policy: &ReviewPolicy,
    ) -> ConclaveResult<ReviewRequest> {
        let entry = self
            .pending
            .get(&review_id)
            .ok_or_else(|| ConclaveError::not_found(format!("review {review_id} not found")))?;

        let mut req = entry.request.lock();
        if req.is_terminal() {
            return Err(ConclaveError::invalid_spec(format!(
                "review {review_id} is already {:?}",
                req.state
            )));
        }
        if !policy.reviewers.is_empty() && !policy.reviewers.iter().any(|r| r == reviewer) {
            return Err(ConclaveError::policy_denied(format!(
                "{reviewer:?} is not an authorized reviewer for {review_id}"
            )));
        }
        if !policy.allow_self_approval && reviewer == req.creator && approve {
            return Err(ConclaveError::policy_denied(format!(
                "{reviewer:?} cannot approve its own artifact"
            )));
        }

        req.votes.push(ReviewVote {
            reviewer: reviewer.to_string(),
            approve,
            comment,
            decided_at: chrono::Utc::now(),
        });

        if req.has_rejection() {
            req.state = ReviewState::Rejected;
        } else if req.approvals() >= req.required_approvals {
            req.state = ReviewState::Approved;
        }

        let snapshot = req.clone();
        drop(req);
        if snapshot.is_terminal() {
            entry.notify.notify_waiters();
        }
        Ok(snapshot)
    }

    pub fn approve(
        &self,
        review_id: Ulid,
        reviewer: &str,
        comment: Option<String>,
        policy: &ReviewPolicy,
    ) -> ConclaveResult<ReviewRequest> {
        self.vote(review_id, reviewer, true, comment, policy)
    }

    pub fn reject(
        &self,
        review_id: Ulid,
        reviewer: &str,
        comment: Option<String>,
        policy: &ReviewPolicy,
    ) -> ConclaveResult<ReviewRequest> {
        self.vote(review_id, reviewer, false, comment, policy)
    }

    /// **WaitFor(review_id, deadline) -> Decision** (spec.md §4.9). Blocks
    /// until the request reaches a terminal state or `policy.timeout_secs`
    /// elapses, whichever comes first; a deadline is treated as a rejection.
    pub async fn wait_for(
        &self,
        review_id: Ulid,
        policy: &ReviewPolicy,
        correlation_id: Ulid,
    ) -> ConclaveResult<ReviewDecision> {
        let entry = self
            .pending
            .get(&review_id)
            .ok_or_else(|| ConclaveError::not_found(format!("review {review_id} not found")))?
            .clone();

        let deadline = Duration::from_secs(policy.timeout_secs);
        let decision = loop {
            {
                let req = entry.request.lock();
                match req.state {
                    ReviewState::Approved => break ReviewDecision::Approved,
                    ReviewState::Rejected | ReviewState::Expired => break ReviewDecision::Rejected,
                    ReviewState::Pending => {}
                }
            }
            match tokio::time::timeout(deadline, entry.notify.notified()).await {
                Ok(()) => continue,
                Err(_) => {
                    let mut req = entry.request.lock();
                    if matches!(req.state, ReviewState::Pending) {
                        req.state = ReviewState::Expired;
                        warn!(review_id = %review_id, "review expired waiting for approval");
                    }
                    break ReviewDecision::Rejected;
                }
            }
        };

        self.pending.remove(&review_id);
        self.events.publish(Event::new(
            EventKind::ReviewResolved,
            correlation_id,
            serde_json::json!({"review_id": review_id.to_string(), "decision": format!("{decision:?}")}),
        ));
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReviewPolicy {
        ReviewPolicy {
            min_approvals: 1,
            reviewers: vec!["alice".into()],
            auto_approve_low_risk: false,
            timeout_secs: 1,
            allow_self_approval: false,
        }
    }

    #[tokio::test]
    async fn approval_resolves_wait_for() {
        let gate = ReviewGate::new(Arc::new(EventBus::default()));
        let policy = policy();
        let req = gate.request(
            "artifact-1",
            "tool_call",
            ArtifactContent::Inline(serde_json::json!({})),
            "agent-1",
            &policy,
            Ulid::new(),
        );

        let gate = Arc::new(gate);
        let waiter = gate.clone();
        let review_id = req.review_id;
        let policy2 = policy.clone();
        let handle = tokio::spawn(async move { waiter.wait_for(review_id, &policy2, Ulid::new()).await });

        tokio::task::yield_now().await;
        gate.approve(review_id, "alice", None, &policy).unwrap();

        let decision = handle.await.unwrap().unwrap();
        assert_eq!(decision, ReviewDecision::Approved);
    }

    #[tokio::test]
    async fn unauthorized_reviewer_is_policy_denied() {
        let gate = ReviewGate::new(Arc::new(EventBus::default()));
        let policy = policy();
        let req = gate.request(
            "artifact-1",
            "tool_call",
            ArtifactContent::Inline(serde_json::json!({})),
            "agent-1",
            &policy,
            Ulid::new(),
        );
        let err = gate.approve(req.review_id, "mallory", None, &policy).unwrap_err();
        assert_eq!(err.kind(), "policy_denied");
    }

    #[tokio::test]
    async fn timeout_without_a_decision_is_treated_as_rejection() {
        let gate = ReviewGate::new(Arc::new(EventBus::default()));
        let mut policy = policy();
        policy.timeout_secs = 1;
        let req = gate.request(
            "artifact-1",
            "tool_call",
            ArtifactContent::Inline(serde_json::json!({})),
            "agent-1",
            &policy,
            Ulid::new(),
        );
        let decision = gate.wait_for(req.review_id, &policy, Ulid::new()).await.unwrap();
        assert_eq!(decision, ReviewDecision::Rejected);
    }
}
