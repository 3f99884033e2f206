// ── Reflection lane ────────────────────────────────────────────────────────
//
// Snapshots are buffered over a short window and only the newest one in the
// window is analyzed; the rest are discarded. Each window's analysis runs in
// its own task, so overlapping calls are possible; results are applied in
// window order and a result older than one already applied is dropped.
//
// Any failure (short input, timeout, service error, null or malformed
// payload) is a silent skip: no reflection, no default.

use crate::atoms::error::EngineError;
use crate::atoms::memory_types::NewMemory;
use crate::atoms::types::{ConversationState, Reflection};
use crate::engine::analysis::events::{PipelineEvent, PipelineStats};
use crate::engine::analysis::pipeline::PipelineShared;
use crate::engine::analysis::rounds::{Lane, RoundGuard};
use crate::engine::analysis::validation::validate_reflection;
use crate::engine::emotional_history::entry_from_reflection;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

pub type ReflectionJob = (Arc<ConversationState>, Arc<RoundGuard>);

/// Window loop. Ends when the dispatcher drops its sender.
pub async fn run_reflection_lane(shared: Arc<PipelineShared>, mut rx: mpsc::Receiver<ReflectionJob>) {
    let window = Duration::from_millis(shared.config.reflection_window_ms);
    let mut window_seq: u64 = 0;

    while let Some(first) = rx.recv().await {
        let (mut state, mut round) = first;
        let deadline = Instant::now() + window;
        let mut closed = false;

        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some((newer_state, newer_round)) => {
                        PipelineStats::bump(&shared.stats.reflections_discarded);
                        shared.rounds.finish(&round, Lane::Reflection);
                        state = newer_state;
                        round = newer_round;
                    }
                    None => {
                        closed = true;
                        break;
                    }
                },
                _ = sleep_until(deadline) => break,
            }
        }

        window_seq += 1;
        tokio::spawn(analyze(Arc::clone(&shared), state, round, window_seq));
        if closed {
            break;
        }
    }
    debug!("[reflection] Lane stopped");
}

async fn reflect_once(shared: &PipelineShared, state: &ConversationState) -> Option<Reflection> {
    let len = state.trimmed_len();
    if len < shared.config.reflection_min_chars {
        debug!("[reflection] Draft too short ({} chars), not calling the service", len);
        PipelineStats::bump(&shared.stats.reflections_skipped);
        return None;
    }

    PipelineStats::bump(&shared.stats.reflection_calls);
    let service = shared.reflection_service.as_ref();
    let timeout = Duration::from_millis(shared.config.reflection_timeout_ms);
    let payload = match tokio::time::timeout(timeout, service.reflect(state)).await {
        Ok(Ok(Some(payload))) => payload,
        Ok(Ok(None)) => {
            debug!("[reflection] {} had nothing to reflect on", service.name());
            PipelineStats::bump(&shared.stats.reflections_skipped);
            return None;
        }
        Ok(Err(e)) => {
            warn!("[reflection] {} failed: {}", service.name(), e);
            PipelineStats::bump(&shared.stats.reflections_skipped);
            return None;
        }
        Err(_) => {
            let e = EngineError::timeout(format!("{}.reflect", service.name()), timeout.as_millis() as u64);
            warn!("[reflection] {}", e);
            PipelineStats::bump(&shared.stats.reflections_skipped);
            return None;
        }
    };

    match validate_reflection(&payload, Utc::now()) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!("[reflection] Discarding malformed reflection: {}", e);
            PipelineStats::bump(&shared.stats.reflections_skipped);
            None
        }
    }
}

async fn analyze(shared: Arc<PipelineShared>, state: Arc<ConversationState>, round: Arc<RoundGuard>, seq: u64) {
    let outcome = reflect_once(&shared, &state).await;

    if round.is_cancelled() {
        if outcome.is_some() {
            debug!("[reflection] Round {} was abandoned; ignoring late reflection", round.id());
        }
        return;
    }
    shared.rounds.finish(&round, Lane::Reflection);
    let Some(reflection) = outcome else { return };

    // Latest window wins.
    let applied = {
        let mut reflections = shared.reflections.lock();
        let last = shared.last_reflection_seq.load(Ordering::SeqCst);
        if seq <= last {
            false
        } else {
            shared.last_reflection_seq.store(seq, Ordering::SeqCst);
            reflections.push(reflection.clone());
            shared.emotional.lock().push(entry_from_reflection(&reflection));
            true
        }
    };
    if !applied {
        debug!("[reflection] Window {} finished after a newer one; dropped", seq);
        PipelineStats::bump(&shared.stats.reflections_discarded);
        return;
    }

    info!(
        "[reflection] round={} state={} emotions={}",
        round.id(),
        reflection.emotional_state,
        reflection.emotions.join(" ")
    );
    let _ = shared.events.send(PipelineEvent::ReflectionReady { round: round.id(), reflection: reflection.clone() });

    let Some(action) = reflection.memory_action.as_ref().filter(|a| a.should_save) else { return };
    let Some(store) = shared.memory.as_ref() else {
        debug!("[reflection] Memory save requested but no store is attached");
        return;
    };

    let memory = NewMemory::new(action.content.clone(), action.memory_type, action.importance)
        .with_tags(action.tags.clone())
        .with_context(reflection.summary.clone());
    match store.insert(memory).await {
        Ok(id) => {
            let _ = shared.events.send(PipelineEvent::MemorySaved { id, kind: action.memory_type });
        }
        Err(e) => {
            // Retryable; never surfaces to the conversation.
            warn!("[reflection] Memory save failed: {}", e);
            let _ = shared.events.send(PipelineEvent::MemorySaveFailed { error: e.to_string() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::EngineResult;
    use crate::atoms::traits::{DecisionService, ProactiveSink, ReflectionService, ServicePayload};
    use crate::atoms::types::{PipelineConfig, ProactiveMessage};
    use crate::engine::analysis::pipeline::{AnalysisPipeline, PipelineServices};
    use crate::engine::state_builder::{build_state, SignalTracker, SnapshotContext};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Listening;

    #[async_trait]
    impl DecisionService for Listening {
        fn name(&self) -> &str {
            "listening"
        }
        async fn decide(&self, _state: &ConversationState) -> EngineResult<ServicePayload> {
            Ok(json!({ "shouldAct": false, "actionType": "wait" }))
        }
    }

    struct Quiet;

    #[async_trait]
    impl ProactiveSink for Quiet {
        async fn emit(&self, _message: &ProactiveMessage) -> EngineResult<()> {
            Ok(())
        }
    }

    enum Reply {
        Summary,
        Nothing,
        Fail,
        Hang,
        Malformed,
    }

    /// Records every draft it is asked about. Drafts containing "slow"
    /// take five seconds to answer.
    struct Recorder {
        reply: Reply,
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self { reply, seen: Mutex::new(Vec::new()) })
        }
        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl ReflectionService for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        async fn reflect(&self, state: &ConversationState) -> EngineResult<Option<ServicePayload>> {
            self.seen.lock().push(state.input_text.clone());
            if state.input_text.contains("slow") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            match self.reply {
                Reply::Summary => Ok(Some(json!({
                    "summary": format!("about {}", state.input_text),
                    "emotions": ["🤔"],
                    "emotionalState": "thoughtful"
                }))),
                Reply::Nothing => Ok(None),
                Reply::Fail => Err(EngineError::service("recorder", "upstream 500")),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(20)).await;
                    Ok(Some(json!({ "summary": "too late", "emotions": ["😴"] })))
                }
                Reply::Malformed => Ok(Some(json!({ "summary": "no emotions at all" }))),
            }
        }
    }

    fn snapshot(text: &str) -> ConversationState {
        let mut tracker = SignalTracker::new();
        tracker.on_input(text, Utc::now());
        build_state(&tracker.raw_signals(Utc::now().fixed_offset()), &SnapshotContext::default())
    }

    fn start(reflector: Arc<Recorder>) -> AnalysisPipeline {
        let config = PipelineConfig { settle_ms: 50, reflection_window_ms: 1_000, ..Default::default() };
        AnalysisPipeline::start(
            config,
            PipelineServices {
                decision: Arc::new(Listening),
                reflection: reflector,
                sink: Arc::new(Quiet),
                memory: None,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn only_latest_snapshot_in_window_is_analyzed() {
        let reflector = Recorder::new(Reply::Summary);
        let pipeline = start(reflector.clone());

        for text in ["first long draft", "second long draft", "third long draft"] {
            pipeline.submit(snapshot(text)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(reflector.seen(), vec!["third long draft".to_string()]);
        let stats = pipeline.stats();
        assert_eq!(stats.reflection_calls, 1);
        assert_eq!(stats.reflections_discarded, 2);
        assert_eq!(stats.decision_calls, 3);
        let reflections = pipeline.reflections();
        assert_eq!(reflections.len(), 1);
        assert_eq!(reflections[0].summary, "about third long draft");
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn older_window_finishing_last_is_dropped() {
        let reflector = Recorder::new(Reply::Summary);
        let pipeline = start(reflector.clone());

        pipeline.submit(snapshot("a slow first draft")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        pipeline.submit(snapshot("a quick second draft")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(reflector.seen().len(), 2);
        let reflections = pipeline.reflections();
        assert_eq!(reflections.len(), 1);
        assert_eq!(reflections[0].summary, "about a quick second draft");
        assert_eq!(pipeline.emotional_history().len(), 1);
        assert_eq!(pipeline.stats().reflections_discarded, 1);
        pipeline.shutdown().await;
    }

    async fn assert_silent_skip(reply: Reply) {
        let reflector = Recorder::new(reply);
        let pipeline = start(reflector.clone());

        pipeline.submit(snapshot("something worth reflecting on")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert_eq!(reflector.seen().len(), 1);
        assert!(pipeline.reflections().is_empty());
        assert!(pipeline.emotional_history().is_empty());
        assert_eq!(pipeline.decisions().len(), 1);
        let stats = pipeline.stats();
        assert_eq!(stats.reflection_calls, 1);
        assert_eq!(stats.reflections_skipped, 1);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_silent_skip() {
        assert_silent_skip(Reply::Hang).await;
    }

    #[tokio::test(start_paused = true)]
    async fn service_error_is_a_silent_skip() {
        assert_silent_skip(Reply::Fail).await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_reply_is_a_silent_skip() {
        assert_silent_skip(Reply::Nothing).await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_reply_is_a_silent_skip() {
        assert_silent_skip(Reply::Malformed).await;
    }
}
