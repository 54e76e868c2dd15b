//! `GroupCollaborationEngine`: bounded, stateful multi-agent conversations
//! under peer-to-peer, broadcast, or coordinator routing (spec.md §4.6).
//!
//! No direct teacher analog for the routing/consensus algorithm - the
//! teacher's `fleet/mod.rs::FleetCoordinator` lent the general
//! "coordinator owns an event channel and a round-robin/consensus loop"
//! shape (`ConsensusReached` event, round counters), but its five
//! coordination modes (hierarchical/peer/swarm/pipeline) don't match
//! spec.md's three-pattern contract, so routing and consensus detection
//! are authored fresh against spec.md §4.6/§8. Member turns are executed
//! through the same `AgentExecutor` every workflow `agent` step uses, so a
//! group member behaves identically whether it's invoked solo or as part
//! of a collaboration.

use std::collections::HashMap;
use std::sync::Arc;

use conclave_core::{
    AgentGroup, CancelToken, CommunicationPattern, ConclaveError, ConclaveResult, ConsensusRecord,
    GroupSession, GroupStatus, Message, MessageRole, Performative, RetryConfig, Stance,
};
use dashmap::DashMap;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::events::{Event, EventBus, EventKind};
use crate::AgentExecutor;

/// In-memory store of [`AgentGroup`] definitions, mirroring `SpecRegistry`'s
/// "register once, read many" posture but with no inheritance to resolve.
#[derive(Default)]
pub struct GroupRegistry {
    groups: DashMap<String, AgentGroup>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, group: AgentGroup, replace: bool) -> ConclaveResult<()> {
        group.validate()?;
        if !replace && self.groups.contains_key(&group.id) {
            return Err(ConclaveError::duplicate_name(format!(
                "group {:?} already registered",
                group.id
            )));
        }
        self.groups.insert(group.id.clone(), group);
        Ok(())
    }

    pub fn get(&self, id: &str) -> ConclaveResult<AgentGroup> {
        self.groups
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ConclaveError::not_found(format!("group {id:?} not found")))
    }
}

/// Performative tag a member is asked to prefix its response with, e.g.
/// `PROPOSE: ship the 1.2 release` or a bare `AGREE`. Unparseable text
/// defaults to `Inform` with the text unchanged, so a provider that ignores
/// the instruction still produces a valid (if never-consensus-forming)
/// message instead of an error.
fn parse_performative(text: &str) -> (Performative, String) {
    let trimmed = text.trim();
    let (tag, rest) = match trimmed.split_once(':') {
        Some((tag, rest)) => (tag.trim(), rest.trim()),
        None => (trimmed, ""),
    };
    let performative = match tag.to_ascii_uppercase().as_str() {
        "INFORM" => Performative::Inform,
        "REQUEST" => Performative::Request,
        "PROPOSE" => Performative::Propose,
        "AGREE" => Performative::Agree,
        "DISAGREE" => Performative::Disagree,
        "QUERY" => Performative::Query,
        "CONFIRM" => Performative::Confirm,
        "REFUSE" => Performative::Refuse,
        _ => return (Performative::Inform, trimmed.to_string()),
    };
    let content = if rest.is_empty() { tag.to_string() } else { rest.to_string() };
    (performative, content)
}

/// Renders prior messages as plain text for the next member's prompt.
/// Performative-tagged lines are re-rendered in the same `TAG: content`
/// shape a member was asked to produce, so the conversation reads
/// consistently regardless of which member is "speaking" next.
fn render_transcript(goal: &str, messages: &[Message]) -> String {
    let mut out = format!("Collaboration goal: {goal}\n\n");
    if messages.is_empty() {
        out.push_str("(no messages yet - you are first to respond)\n");
    }
    for msg in messages {
        let tag = msg
            .performative
            .map(|p| format!("{p:?}").to_ascii_uppercase())
            .unwrap_or_else(|| "INFORM".to_string());
        out.push_str(&format!("[{}] {}: {}\n", tag, msg.sender_id, msg.text_content()));
    }
    out.push_str(
        "\nRespond with a single line in the form `TAG: content`, where TAG is one of \
         INFORM, REQUEST, PROPOSE, AGREE, DISAGREE, QUERY, CONFIRM, REFUSE. If you AGREE or \
         CONFIRM with an existing proposal, restate the proposal's content after the tag.",
    );
    out
}

/// Orchestrates one [`AgentGroup`] collaboration to consensus or round
/// limit (spec.md §4.6 `Collaborate`).
pub struct GroupCollaborationEngine {
    executor: Arc<AgentExecutor>,
    events: Arc<EventBus>,
    retry: RetryConfig,
}

impl GroupCollaborationEngine {
    pub fn new(executor: Arc<AgentExecutor>, events: Arc<EventBus>) -> Self {
        Self {
            executor,
            events,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// **Collaborate(group, goal)** (spec.md §4.6). Runs rounds until
    /// consensus is reached or `max_rounds` is exhausted, under the group's
    /// declared routing pattern.
    pub async fn collaborate(
        &self,
        group: &AgentGroup,
        goal: &str,
        cancel: CancelToken,
    ) -> ConclaveResult<GroupSession> {
        group.validate()?;
        let mut session = GroupSession::new(group.id.clone(), goal.to_string());
        let correlation_id = session.session_id;

        self.events.publish(Event::new(
            EventKind::GroupSessionStarted,
            correlation_id,
            serde_json::json!({"group_id": group.id, "session_id": session.session_id.to_string()}),
        ));
        info!(group_id = %group.id, session_id = %session.session_id, pattern = ?group.pattern, "group session started");

        for round in 1..=group.max_rounds {
            if cancel.is_cancelled() {
                session.status = GroupStatus::Cancelled;
                break;
            }
            session.round = round;

            match group.pattern {
                CommunicationPattern::Broadcast | CommunicationPattern::PeerToPeer => {
                    self.run_flat_round(group, &mut session, &cancel, correlation_id).await;
                }
                CommunicationPattern::Coordinator => {
                    self.run_coordinator_round(group, &mut session, &cancel, correlation_id).await;
                }
            }

            if cancel.is_cancelled() {
                session.status = GroupStatus::Cancelled;
                break;
            }

            if let Some(consensus) = self.detect_consensus(group, &session) {
                info!(session_id = %session.session_id, proposal = %consensus.proposal, ratio = consensus.agreement_ratio, "consensus reached");
                self.events.publish(Event::new(
                    EventKind::GroupConsensusReached,
                    correlation_id,
                    serde_json::json!({
                        "session_id": session.session_id.to_string(),
                        "proposal": consensus.proposal,
                        "agreement_ratio": consensus.agreement_ratio,
                        "round": consensus.round,
                    }),
                ));
                session.consensus = Some(consensus);
                session.status = GroupStatus::Completed;
                break;
            }
        }

        if session.status == GroupStatus::Active {
            // spec.md §3 invariant: no-consensus at max_rounds still ends
            // `completed`, just with an empty `consensus` field.
            session.status = GroupStatus::Completed;
        }
        session.ended_at = Some(chrono::Utc::now());

        self.events.publish(Event::new(
            EventKind::GroupSessionEnded,
            correlation_id,
            serde_json::json!({
                "session_id": session.session_id.to_string(),
                "status": format!("{:?}", session.status),
                "rounds": session.round,
            }),
        ));
        Ok(session)
    }

    /// Broadcast and peer-to-peer share the same round shape: every member
    /// sees the full transcript and responds once. The patterns differ only
    /// in whether responses may address other members by name; peer
    /// addressing is recorded as a structured content part but never
    /// changes group membership (spec.md §4.6).
    async fn run_flat_round(
        &self,
        group: &AgentGroup,
        session: &mut GroupSession,
        cancel: &CancelToken,
        correlation_id: Ulid,
    ) {
        for member in &group.members {
            if cancel.is_cancelled() {
                return;
            }
            let task = render_transcript(&session.goal, &session.messages);
            match self
                .executor
                .execute(member, &task, &self.retry, cancel.child(), correlation_id)
                .await
            {
                Ok(turn) => {
                    let (performative, content) = parse_performative(&turn.final_text);
                    let mut msg = Message::text(MessageRole::Assistant, member.clone(), content)
                        .with_performative(performative);
                    if group.pattern == CommunicationPattern::PeerToPeer {
                        let addressees = extract_addressees(&turn.final_text, &group.members, member);
                        if !addressees.is_empty() {
                            msg.content.push(conclave_core::ContentPart::Json(
                                serde_json::json!({"addressed_to": addressees}),
                            ));
                        }
                    }
                    self.publish_message(session, msg, correlation_id);
                }
                Err(err) => {
                    warn!(member = %member, error = %err, "group member turn failed; skipping this round");
                }
            }
        }
    }

    /// Coordinator pattern: the coordinator speaks first and selects which
    /// members respond this round. Selected members are shown only the
    /// coordinator's directives and their own prior responses, not other
    /// members' raw messages (spec.md §4.6: "responses are visible only
    /// through the coordinator in the next round's directive assembly").
    async fn run_coordinator_round(
        &self,
        group: &AgentGroup,
        session: &mut GroupSession,
        cancel: &CancelToken,
        correlation_id: Ulid,
    ) {
        let Some(coordinator) = &group.coordinator else {
            warn!(group_id = %group.id, "coordinator pattern with no coordinator set; validate() should have rejected this");
            return;
        };
        if cancel.is_cancelled() {
            return;
        }

        let task = render_transcript(&session.goal, &session.messages)
            + "\n\nAs coordinator, first state your directive as `INFORM: <directive text>`, \
               then on a new line list who should respond as `SELECT: name1, name2`.";
        let directive_text = match self
            .executor
            .execute(coordinator, &task, &self.retry, cancel.child(), correlation_id)
            .await
        {
            Ok(turn) => turn.final_text,
            Err(err) => {
                warn!(coordinator = %coordinator, error = %err, "coordinator turn failed; round produces no directive");
                return;
            }
        };

        let (directive, selected) = parse_directive(&directive_text, &group.members, coordinator);
        let (performative, content) = parse_performative(&directive);
        self.publish_message(
            session,
            Message::text(MessageRole::Assistant, coordinator.clone(), content).with_performative(performative),
            correlation_id,
        );

        for member in &selected {
            if cancel.is_cancelled() {
                return;
            }
            let visible: Vec<Message> = session
                .messages
                .iter()
                .filter(|m| &m.sender_id == coordinator || &m.sender_id == member)
                .cloned()
                .collect();
            let task = render_transcript(&session.goal, &visible);
            match self
                .executor
                .execute(member, &task, &self.retry, cancel.child(), correlation_id)
                .await
            {
                Ok(turn) => {
                    let (performative, content) = parse_performative(&turn.final_text);
                    self.publish_message(
                        session,
                        Message::text(MessageRole::Assistant, member.clone(), content).with_performative(performative),
                        correlation_id,
                    );
                }
                Err(err) => {
                    warn!(member = %member, error = %err, "selected member turn failed; skipping");
                }
            }
        }
    }

    fn publish_message(&self, session: &mut GroupSession, message: Message, correlation_id: Ulid) {
        debug!(session_id = %session.session_id, sender = %message.sender_id, performative = ?message.performative, "group message posted");
        self.events.publish(Event::new(
            EventKind::GroupMessagePosted,
            correlation_id,
            serde_json::json!({
                "session_id": session.session_id.to_string(),
                "sender": message.sender_id,
                "performative": format!("{:?}", message.performative),
            }),
        ));
        session.messages.push(message);
    }

    /// Consensus detection (spec.md §4.6, end of each round):
    /// 1. Compute each member's latest stance.
    /// 2. For every distinct proposal raised so far, compute the fraction
    ///    of members whose latest stance agrees with it.
    /// 3. The leading proposal is the one with the highest ratio; ties are
    ///    broken in favor of the earlier proposal (spec.md §9 Open Question,
    ///    decided).
    fn detect_consensus(&self, group: &AgentGroup, session: &GroupSession) -> Option<ConsensusRecord> {
        let stances = self.latest_stances(group, session);
        let proposals = self.ordered_proposals(session);
        if proposals.is_empty() {
            return None;
        }

        let member_count = group.members.len() as f64;
        let mut best: Option<(String, f64)> = None;
        for proposal in &proposals {
            let agree_count = stances.values().filter(|s| s.agrees_with(proposal)).count() as f64;
            let ratio = agree_count / member_count;
            if best.as_ref().map(|(_, r)| ratio > *r).unwrap_or(true) {
                best = Some((proposal.clone(), ratio));
            }
        }

        let (proposal, ratio) = best?;
        if ratio >= group.consensus_threshold {
            Some(ConsensusRecord {
                proposal,
                agreement_ratio: ratio,
                round: session.round,
            })
        } else {
            None
        }
    }

    /// Every member's latest (performative, proposal) stance, resolving an
    /// AGREE/CONFIRM with no restated proposal to the most recent PROPOSE
    /// that preceded it in the transcript (spec.md §4.6: "a stance is a
    /// normalized view of the member's most recent AGREE/DISAGREE/PROPOSE/
    /// CONFIRM message").
    fn latest_stances(&self, group: &AgentGroup, session: &GroupSession) -> HashMap<String, Stance> {
        let mut stances = HashMap::new();
        for member in &group.members {
            let Some((idx, msg)) = session
                .messages
                .iter()
                .enumerate()
                .rev()
                .find(|(_, m)| &m.sender_id == member && is_stance_performative(m.performative))
            else {
                continue;
            };
            let performative = msg.performative.expect("filtered by is_stance_performative");
            let own_text = msg.text_content();
            let proposal = match performative {
                Performative::Propose => Some(own_text),
                Performative::Agree | Performative::Confirm => {
                    if own_text.trim().is_empty() {
                        self.latest_proposal_before(session, idx)
                    } else {
                        Some(own_text)
                    }
                }
                _ => None,
            };
            stances.insert(
                member.clone(),
                Stance {
                    member: member.clone(),
                    performative,
                    proposal,
                },
            );
        }
        stances
    }

    fn latest_proposal_before(&self, session: &GroupSession, idx: usize) -> Option<String> {
        session.messages[..idx]
            .iter()
            .rev()
            .find(|m| m.performative == Some(Performative::Propose))
            .map(|m| m.text_content())
    }

    /// Distinct proposal texts, in first-occurrence order (earliest first,
    /// so the tie-break in `detect_consensus` can simply prefer the first
    /// match found).
    fn ordered_proposals(&self, session: &GroupSession) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for msg in &session.messages {
            if msg.performative == Some(Performative::Propose) {
                let text = msg.text_content();
                if seen.insert(text.clone()) {
                    out.push(text);
                }
            }
        }
        out
    }
}

fn is_stance_performative(p: Option<Performative>) -> bool {
    matches!(
        p,
        Some(Performative::Agree | Performative::Disagree | Performative::Propose | Performative::Confirm)
    )
}

/// Parses a coordinator's directive text for an optional trailing
/// `SELECT: name1, name2` line; anything before it is the directive.
/// Unrecognized/self-referencing names are dropped.
fn parse_directive(text: &str, members: &[String], coordinator: &str) -> (String, Vec<String>) {
    let mut directive_lines = Vec::new();
    let mut selected = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed
            .strip_prefix("SELECT:")
            .or_else(|| trimmed.strip_prefix("select:"))
        {
            selected = rest
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty() && s != coordinator && members.contains(s))
                .collect();
        } else {
            directive_lines.push(line);
        }
    }
    (directive_lines.join("\n").trim().to_string(), selected)
}

/// Scans a peer-to-peer response for `@name` mentions of other members.
fn extract_addressees(text: &str, members: &[String], speaker: &str) -> Vec<String> {
    members
        .iter()
        .filter(|m| m.as_str() != speaker && text.contains(&format!("@{m}")))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::{AgentSpec, CancelToken, RegistryConfig, SpecRegistry};
    use conclave_llm::mock::{MockProvider, ScriptedReply};
    use conclave_tools::ToolRegistry;
    use std::collections::HashMap as Map;

    fn member_spec(name: &str) -> AgentSpec {
        AgentSpec {
            name: name.into(),
            parent: None,
            provider: None,
            model: "mock:echo".into(),
            temperature: Some(0.5),
            max_tokens: None,
            system_prompt: None,
            tools: vec![],
            skills: vec![],
            metadata: Map::new(),
            config: Map::new(),
        }
    }

    fn engine(replies: Vec<ScriptedReply>) -> (GroupCollaborationEngine, Arc<EventBus>) {
        let registry = Arc::new(SpecRegistry::new(RegistryConfig::default()));
        for name in ["member1", "member2", "member3", "coordinator"] {
            registry.register(member_spec(name), false).unwrap();
        }
        let tools = Arc::new(ToolRegistry::new().into_executor());
        let events = Arc::new(EventBus::default());
        let provider = Arc::new(MockProvider::with_replies(replies));
        let executor = Arc::new(AgentExecutor::new(registry, provider, tools, events.clone()));
        (GroupCollaborationEngine::new(executor, events.clone()), events)
    }

    fn group() -> AgentGroup {
        AgentGroup {
            id: "triage".into(),
            name: "Triage".into(),
            members: vec!["member1".into(), "member2".into(), "member3".into()],
            coordinator: None,
            pattern: CommunicationPattern::Broadcast,
            max_rounds: 5,
            consensus_threshold: 0.66,
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_consensus_on_round_one() {
        // Matches spec.md §8 scenario 5 exactly.
        let (engine, _events) = engine(vec![
            ScriptedReply::Text("PROPOSE: X".into()),
            ScriptedReply::Text("AGREE".into()),
            ScriptedReply::Text("DISAGREE: I don't like X".into()),
        ]);
        let session = engine.collaborate(&group(), "pick a release plan", CancelToken::new()).await.unwrap();
        assert_eq!(session.status, GroupStatus::Completed);
        assert_eq!(session.round, 1);
        let consensus = session.consensus.unwrap();
        assert_eq!(consensus.proposal, "X");
        assert!((consensus.agreement_ratio - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_consensus_ends_completed_with_empty_consensus() {
        let (engine, _events) = engine(vec![
            ScriptedReply::Text("PROPOSE: A".into()),
            ScriptedReply::Text("DISAGREE".into()),
            ScriptedReply::Text("DISAGREE".into()),
        ]);
        let mut g = group();
        g.max_rounds = 1;
        let session = engine.collaborate(&g, "pick a plan", CancelToken::new()).await.unwrap();
        assert_eq!(session.status, GroupStatus::Completed);
        assert!(session.consensus.is_none());
    }

    #[tokio::test]
    async fn cancellation_ends_session_cancelled() {
        let (engine, _events) = engine(vec![]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let session = engine.collaborate(&group(), "goal", cancel).await.unwrap();
        assert_eq!(session.status, GroupStatus::Cancelled);
    }

    #[tokio::test]
    async fn coordinator_pattern_selects_members() {
        let (engine, _events) = engine(vec![
            ScriptedReply::Text("INFORM: let's gather opinions\nSELECT: member1, member2".into()),
            ScriptedReply::Text("PROPOSE: go".into()),
            ScriptedReply::Text("AGREE".into()),
        ]);
        let mut g = group();
        g.pattern = CommunicationPattern::Coordinator;
        g.coordinator = Some("coordinator".into());
        g.members.push("coordinator".into());
        g.max_rounds = 1;
        let session = engine.collaborate(&g, "ship or wait", CancelToken::new()).await.unwrap();
        // coordinator + 2 selected members = 3 messages.
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.messages[0].sender_id, "coordinator");
    }

    #[test]
    fn parse_performative_defaults_to_inform_on_unknown_tag() {
        let (p, content) = parse_performative("just some text with no tag");
        assert_eq!(p, Performative::Inform);
        assert_eq!(content, "just some text with no tag");
    }

    #[test]
    fn parse_performative_extracts_tag_and_content() {
        let (p, content) = parse_performative("PROPOSE: ship v2");
        assert_eq!(p, Performative::Propose);
        assert_eq!(content, "ship v2");
    }
}
