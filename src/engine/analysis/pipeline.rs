// Pawz Presence: Analysis Pipeline
//
// snapshot ─► settle ─► change filter ─► min-content filter ─► fan-out
//                                                          ├─► decision lane   (single-flight, 20s)
//                                                          └─► reflection lane (1s window, 8s)
//
// Tasks:
//   dispatcher    settle, filters, opens a round per qualifying snapshot
//   reflection    window loop, spawns one analysis per window
//   safety timer  cancels every in-flight round after the shared cutoff
//   decision      one task per call, at most one alive
//   actions       one deferred task per pending proactive action
//
// Emotional history and the last autonomous action are owned here and
// handed to the state builder through `snapshot_context`.

use crate::atoms::constants::{PIPELINE_EVENT_CAPACITY, PIPELINE_INGEST_CAPACITY};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::{DecisionService, ProactiveSink, ReflectionService};
use crate::atoms::types::*;
use crate::engine::analysis::actions::ActionExecutor;
use crate::engine::analysis::decision_lane::DecisionLane;
use crate::engine::analysis::events::{PipelineEvent, PipelineStats, PipelineStatsSnapshot};
use crate::engine::analysis::reflection_lane::{run_reflection_lane, ReflectionJob};
use crate::engine::analysis::rounds::{run_safety_timer, Lane, RoundRegistry};
use crate::engine::emotional_history::{EmotionalHistory, EmotionalTrend};
use crate::engine::history::BoundedHistory;
use crate::engine::memory::VectorMemoryStore;
use crate::engine::state_builder::{build_state, RawSignals, SnapshotContext};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// State shared by every pipeline task.
pub struct PipelineShared {
    pub config: PipelineConfig,
    pub decision_service: Arc<dyn DecisionService>,
    pub reflection_service: Arc<dyn ReflectionService>,
    pub memory: Option<Arc<VectorMemoryStore>>,
    pub stats: Arc<PipelineStats>,
    pub events: broadcast::Sender<PipelineEvent>,
    pub rounds: Arc<RoundRegistry>,
    pub decision_lane: DecisionLane,
    pub executor: Arc<ActionExecutor>,
    pub decisions: Mutex<BoundedHistory<Decision>>,
    pub reflections: Mutex<BoundedHistory<Reflection>>,
    pub emotional: Mutex<EmotionalHistory>,
    pub last_reflection_seq: AtomicU64,
}

/// Collaborators the pipeline drives.
pub struct PipelineServices {
    pub decision: Arc<dyn DecisionService>,
    pub reflection: Arc<dyn ReflectionService>,
    pub sink: Arc<dyn ProactiveSink>,
    /// Reflection memory writes are dropped when no store is attached.
    pub memory: Option<Arc<VectorMemoryStore>>,
}

pub struct AnalysisPipeline {
    shared: Arc<PipelineShared>,
    ingest: Option<mpsc::Sender<Arc<ConversationState>>>,
    dispatcher: Option<JoinHandle<()>>,
    reflection: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

impl AnalysisPipeline {
    /// Spawn the pipeline tasks. Must be called inside a tokio runtime.
    pub fn start(config: PipelineConfig, services: PipelineServices) -> Self {
        let stats = Arc::new(PipelineStats::default());
        let (events, _) = broadcast::channel(PIPELINE_EVENT_CAPACITY);
        let (rounds, arm_rx) = RoundRegistry::create();
        let rounds = Arc::new(rounds);
        let executor = Arc::new(ActionExecutor::new(
            services.sink,
            services.decision.clone(),
            stats.clone(),
            events.clone(),
        ));

        let shared = Arc::new(PipelineShared {
            decisions: Mutex::new(BoundedHistory::new(config.decision_history_limit)),
            reflections: Mutex::new(BoundedHistory::new(config.reflection_history_limit)),
            emotional: Mutex::new(EmotionalHistory::new(config.emotional_history_limit)),
            config,
            decision_service: services.decision,
            reflection_service: services.reflection,
            memory: services.memory,
            stats: stats.clone(),
            events: events.clone(),
            rounds: rounds.clone(),
            decision_lane: DecisionLane::new(),
            executor,
            last_reflection_seq: AtomicU64::new(0),
        });

        let (ingest_tx, ingest_rx) = mpsc::channel(PIPELINE_INGEST_CAPACITY);
        let (reflect_tx, reflect_rx) = mpsc::channel(PIPELINE_INGEST_CAPACITY);

        let dispatcher = tokio::spawn(run_dispatcher(shared.clone(), ingest_rx, reflect_tx));
        let reflection = tokio::spawn(run_reflection_lane(shared.clone(), reflect_rx));

        let lane_shared = Arc::downgrade(&shared);
        let timer = tokio::spawn(run_safety_timer(
            arm_rx,
            Duration::from_millis(shared.config.round_timeout_ms),
            rounds,
            stats,
            events,
            move |ids| {
                if let Some(shared) = lane_shared.upgrade() {
                    shared.decision_lane.abandon_rounds(ids);
                }
            },
        ));

        info!(
            "[pipeline] Started (settle={}ms, decision={}ms via {}, reflection={}ms via {})",
            shared.config.settle_ms,
            shared.config.decision_timeout_ms,
            shared.decision_service.name(),
            shared.config.reflection_timeout_ms,
            shared.reflection_service.name()
        );

        Self {
            shared,
            ingest: Some(ingest_tx),
            dispatcher: Some(dispatcher),
            reflection: Some(reflection),
            timer: Some(timer),
        }
    }

    /// Pipeline-owned state the next snapshot must be built with.
    pub fn snapshot_context(&self) -> SnapshotContext {
        SnapshotContext {
            emotional_history: self.shared.emotional.lock().entries(),
            last_action: self.shared.executor.last_action(),
        }
    }

    pub fn build_snapshot(&self, raw: &RawSignals) -> ConversationState {
        build_state(raw, &self.snapshot_context())
    }

    /// Queue a snapshot. Waits only if the ingest queue is full.
    pub async fn submit(&self, state: ConversationState) -> EngineResult<()> {
        let tx = self
            .ingest
            .as_ref()
            .ok_or_else(|| EngineError::Closed("analysis pipeline is shut down".into()))?;
        PipelineStats::bump(&self.shared.stats.snapshots_received);
        tx.send(Arc::new(state))
            .await
            .map_err(|_| EngineError::Closed("analysis pipeline dispatcher stopped".into()))
    }

    /// Build a snapshot from raw signals and queue it.
    pub async fn submit_signals(&self, raw: &RawSignals) -> EngineResult<()> {
        self.submit(self.build_snapshot(raw)).await
    }

    pub fn decisions(&self) -> Vec<Decision> {
        self.shared.decisions.lock().to_vec()
    }

    pub fn reflections(&self) -> Vec<Reflection> {
        self.shared.reflections.lock().to_vec()
    }

    pub fn emotional_history(&self) -> Vec<EmotionalHistoryEntry> {
        self.shared.emotional.lock().entries()
    }

    pub fn emotional_trend(&self) -> EmotionalTrend {
        self.shared.emotional.lock().trend()
    }

    pub fn last_action(&self) -> Option<LastAction> {
        self.shared.executor.last_action()
    }

    /// Host reports the agent is (or stopped) generating a reply.
    /// No proactive message starts while this is set.
    pub fn set_responding(&self, responding: bool) {
        self.shared.executor.set_responding(responding);
    }

    pub fn record_action(&self, action: LastAction) {
        self.shared.executor.record_action(action);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn memory(&self) -> Option<&Arc<VectorMemoryStore>> {
        self.shared.memory.as_ref()
    }

    /// Stop accepting snapshots, let the dispatcher flush its settle window,
    /// then stop all timers and in-flight work.
    pub async fn shutdown(mut self) {
        self.ingest.take();
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.reflection.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
        if self.shared.decision_lane.is_busy() {
            debug!("[pipeline] Aborting the decision call still in flight");
        }
        self.shared.decision_lane.abort();
        self.shared.executor.cancel_pending();
        info!("[pipeline] Shut down");
    }
}

impl Drop for AnalysisPipeline {
    fn drop(&mut self) {
        for handle in [self.dispatcher.take(), self.reflection.take(), self.timer.take()].into_iter().flatten() {
            handle.abort();
        }
        self.shared.decision_lane.abort();
        self.shared.executor.cancel_pending();
    }
}

// ── Dispatcher ─────────────────────────────────────────────────────────────

/// Change-filter key: identical draft and history length means nothing new.
fn change_key(state: &ConversationState) -> (String, usize) {
    (state.input_text.clone(), state.history.len())
}

async fn run_dispatcher(
    shared: Arc<PipelineShared>,
    mut rx: mpsc::Receiver<Arc<ConversationState>>,
    reflect_tx: mpsc::Sender<ReflectionJob>,
) {
    let settle = Duration::from_millis(shared.config.settle_ms);
    let mut last_forwarded: Option<(String, usize)> = None;

    while let Some(first) = rx.recv().await {
        // Settle: restart the quiet period on every arrival, keep the newest.
        let mut latest = first;
        let mut deadline = Instant::now() + settle;
        let mut closed = false;
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(state) => {
                        latest = state;
                        deadline = Instant::now() + settle;
                    }
                    None => {
                        closed = true;
                        break;
                    }
                },
                _ = sleep_until(deadline) => break,
            }
        }

        PipelineStats::bump(&shared.stats.snapshots_settled);
        forward(&shared, latest, &mut last_forwarded, &reflect_tx).await;
        if closed {
            break;
        }
    }
    debug!("[pipeline] Dispatcher stopped");
}

async fn forward(
    shared: &Arc<PipelineShared>,
    state: Arc<ConversationState>,
    last_forwarded: &mut Option<(String, usize)>,
    reflect_tx: &mpsc::Sender<ReflectionJob>,
) {
    let key = change_key(&state);
    if last_forwarded.as_ref() == Some(&key) {
        debug!("[pipeline] Snapshot unchanged, dropped");
        PipelineStats::bump(&shared.stats.dropped_unchanged);
        return;
    }
    *last_forwarded = Some(key);

    let len = state.trimmed_len();
    if len < shared.config.min_input_chars {
        debug!("[pipeline] Draft too short ({} chars), dropped", len);
        PipelineStats::bump(&shared.stats.dropped_short);
        return;
    }

    let round = shared.rounds.begin();
    PipelineStats::bump(&shared.stats.rounds_started);
    debug!("[pipeline] Round {} started ({} chars)", round.id(), len);

    DecisionLane::dispatch(shared, state.clone(), round.clone());
    if reflect_tx.send((state, round.clone())).await.is_err() {
        shared.rounds.finish(&round, Lane::Reflection);
    }
}
