// ── Decision lane ──────────────────────────────────────────────────────────
//
// Single-flight: at most one decision call is in flight. Dispatching a new
// snapshot aborts the previous call; a call that finishes after it was
// superseded discards its result. The per-call timeout, service failures
// and malformed payloads all yield the fallback decision.

use crate::atoms::error::EngineError;
use crate::atoms::traits::DecisionService;
use crate::atoms::types::{ConversationState, Decision};
use crate::engine::analysis::events::{PipelineEvent, PipelineStats};
use crate::engine::analysis::pipeline::PipelineShared;
use crate::engine::analysis::rounds::{Lane, RoundGuard};
use crate::engine::analysis::validation::validate_decision;
use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

/// Ask the service, bounded by `timeout`. Never fails.
pub async fn evaluate(service: &dyn DecisionService, state: &ConversationState, timeout: Duration) -> Decision {
    match tokio::time::timeout(timeout, service.decide(state)).await {
        Ok(Ok(payload)) => match validate_decision(&payload, Utc::now()) {
            Ok(decision) => decision,
            Err(e) => {
                warn!("[decision] {} returned a malformed decision: {}", service.name(), e);
                Decision::fallback(format!("malformed response: {}", e))
            }
        },
        Ok(Err(e)) => {
            if e.is_transient() {
                warn!("[decision] {} failed: {}", service.name(), e);
            } else {
                error!("[decision] {} failed: {}", service.name(), e);
            }
            Decision::fallback(format!("service error: {}", e))
        }
        Err(_) => {
            let e = EngineError::timeout(format!("{}.decide", service.name()), timeout.as_millis() as u64);
            warn!("[decision] {}", e);
            Decision::fallback(e.to_string())
        }
    }
}

struct InFlight {
    seq: u64,
    handle: AbortHandle,
    round: Arc<RoundGuard>,
}

#[derive(Default)]
pub struct DecisionLane {
    next_seq: AtomicU64,
    slot: Mutex<Option<InFlight>>,
}

impl DecisionLane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a decision call for `state`, superseding any call in flight.
    pub fn dispatch(shared: &Arc<PipelineShared>, state: Arc<ConversationState>, round: Arc<RoundGuard>) {
        let lane = &shared.decision_lane;
        let seq = lane.next_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut slot = lane.slot.lock();
        if let Some(prev) = slot.take() {
            prev.handle.abort();
            PipelineStats::bump(&shared.stats.decisions_superseded);
            shared.rounds.finish(&prev.round, Lane::Decision);
            debug!("[decision] Superseded call #{} (round {})", prev.seq, prev.round.id());
        }

        let task_shared = Arc::clone(shared);
        let task_round = round.clone();
        let handle = tokio::spawn(async move {
            run(task_shared, state, task_round, seq).await;
        });
        *slot = Some(InFlight { seq, handle: handle.abort_handle(), round });
    }

    /// Take the slot if call `seq` still owns it.
    fn claim(&self, seq: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.as_ref().map(|f| f.seq) == Some(seq) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Abort the in-flight call if it belongs to one of `rounds`.
    pub fn abandon_rounds(&self, rounds: &[u64]) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|f| rounds.contains(&f.round.id())) {
            if let Some(f) = slot.take() {
                f.handle.abort();
                debug!("[decision] Abandoned call #{} with round {}", f.seq, f.round.id());
            }
        }
    }

    /// Abort whatever is in flight.
    pub fn abort(&self) {
        if let Some(f) = self.slot.lock().take() {
            f.handle.abort();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.lock().is_some()
    }
}

async fn run(shared: Arc<PipelineShared>, state: Arc<ConversationState>, round: Arc<RoundGuard>, seq: u64) {
    PipelineStats::bump(&shared.stats.decision_calls);
    let timeout = Duration::from_millis(shared.config.decision_timeout_ms);
    let decision = evaluate(shared.decision_service.as_ref(), &state, timeout).await;

    // No await between here and scheduling: abort cannot split the update.
    if !shared.decision_lane.claim(seq) {
        debug!("[decision] Call #{} finished after being superseded; discarded", seq);
        return;
    }
    if round.is_cancelled() {
        debug!("[decision] Round {} was abandoned; ignoring late decision", round.id());
        return;
    }
    shared.rounds.finish(&round, Lane::Decision);

    if decision.is_fallback() {
        PipelineStats::bump(&shared.stats.decision_fallbacks);
    }
    info!(
        "[decision] round={} act={} type={} priority={} confidence={:.2}{}",
        round.id(),
        decision.should_act,
        decision.action_type,
        decision.priority,
        decision.confidence,
        if decision.is_fallback() { " (fallback)" } else { "" }
    );

    shared.decisions.lock().push(decision.clone());
    let _ = shared.events.send(PipelineEvent::DecisionMade { round: round.id(), decision: decision.clone() });

    if decision.should_act {
        shared.executor.schedule(decision, state);
    }
}
