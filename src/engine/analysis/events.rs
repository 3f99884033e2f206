// ── Pipeline events and counters ───────────────────────────────────────────

use crate::atoms::memory_types::MemoryKind;
use crate::atoms::types::{ActionType, Decision, ProactiveMessage, Reflection};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Broadcast to every `AnalysisPipeline::subscribe` receiver. Slow receivers
/// lag and lose the oldest events; the pipeline never blocks on them.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    DecisionMade { round: u64, decision: Decision },
    ReflectionReady { round: u64, reflection: Reflection },
    ProactiveMessage { message: ProactiveMessage },
    ActionSkipped { action_type: ActionType, reason: String },
    MemorySaved { id: String, kind: MemoryKind },
    MemorySaveFailed { error: String },
    RoundAbandoned { round: u64 },
}

/// Lock-free counters shared by every pipeline task.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub snapshots_received: AtomicU64,
    pub snapshots_settled: AtomicU64,
    pub dropped_unchanged: AtomicU64,
    pub dropped_short: AtomicU64,
    pub rounds_started: AtomicU64,
    pub rounds_abandoned: AtomicU64,
    pub decision_calls: AtomicU64,
    pub decision_fallbacks: AtomicU64,
    pub decisions_superseded: AtomicU64,
    pub reflection_calls: AtomicU64,
    pub reflections_skipped: AtomicU64,
    pub reflections_discarded: AtomicU64,
    pub actions_emitted: AtomicU64,
    pub actions_skipped: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub snapshots_received: u64,
    pub snapshots_settled: u64,
    pub dropped_unchanged: u64,
    pub dropped_short: u64,
    pub rounds_started: u64,
    pub rounds_abandoned: u64,
    pub decision_calls: u64,
    pub decision_fallbacks: u64,
    pub decisions_superseded: u64,
    pub reflection_calls: u64,
    pub reflections_skipped: u64,
    pub reflections_discarded: u64,
    pub actions_emitted: u64,
    pub actions_skipped: u64,
}

impl PipelineStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStatsSnapshot {
            snapshots_received: get(&self.snapshots_received),
            snapshots_settled: get(&self.snapshots_settled),
            dropped_unchanged: get(&self.dropped_unchanged),
            dropped_short: get(&self.dropped_short),
            rounds_started: get(&self.rounds_started),
            rounds_abandoned: get(&self.rounds_abandoned),
            decision_calls: get(&self.decision_calls),
            decision_fallbacks: get(&self.decision_fallbacks),
            decisions_superseded: get(&self.decisions_superseded),
            reflection_calls: get(&self.reflection_calls),
            reflections_skipped: get(&self.reflections_skipped),
            reflections_discarded: get(&self.reflections_discarded),
            actions_emitted: get(&self.actions_emitted),
            actions_skipped: get(&self.actions_skipped),
        }
    }
}
