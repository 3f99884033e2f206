// ── Deferred proactive actions ─────────────────────────────────────────────
//
// A decision to act is not executed on the spot: it waits `delay_ms`, and
// at most one such action is pending at a time (a newer decision replaces
// the pending one unless it has already started emitting). When the delay
// runs out the action is skipped if
//   - a newer autonomous action was recorded after the decision was made
//   - the host marked the agent as mid-response
//   - another proactive message is being emitted right now
// Otherwise the message is emitted through the sink and only then recorded
// as the last autonomous action.

use crate::atoms::traits::{DecisionService, ProactiveSink};
use crate::atoms::types::*;
use crate::engine::analysis::events::{PipelineEvent, PipelineStats};
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

struct PendingAction {
    id: u64,
    handle: AbortHandle,
    started: Arc<AtomicBool>,
    action_type: ActionType,
}

/// Resets the emitting flag however `execute` exits.
struct EmitGuard<'a>(&'a AtomicBool);

impl Drop for EmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ActionExecutor {
    sink: Arc<dyn ProactiveSink>,
    composer: Arc<dyn DecisionService>,
    host_responding: AtomicBool,
    emitting: AtomicBool,
    last_action: Mutex<Option<LastAction>>,
    pending: Mutex<Option<PendingAction>>,
    next_id: AtomicU64,
    stats: Arc<PipelineStats>,
    events: broadcast::Sender<PipelineEvent>,
}

impl ActionExecutor {
    pub fn new(
        sink: Arc<dyn ProactiveSink>,
        composer: Arc<dyn DecisionService>,
        stats: Arc<PipelineStats>,
        events: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            sink,
            composer,
            host_responding: AtomicBool::new(false),
            emitting: AtomicBool::new(false),
            last_action: Mutex::new(None),
            pending: Mutex::new(None),
            next_id: AtomicU64::new(1),
            stats,
            events,
        }
    }

    pub fn last_action(&self) -> Option<LastAction> {
        self.last_action.lock().clone()
    }

    /// Record an action taken outside the executor (keeps the newest).
    pub fn record_action(&self, action: LastAction) {
        let mut last = self.last_action.lock();
        if last.as_ref().map_or(true, |l| l.timestamp <= action.timestamp) {
            *last = Some(action);
        }
    }

    pub fn set_responding(&self, responding: bool) {
        self.host_responding.store(responding, Ordering::SeqCst);
    }

    pub fn is_responding(&self) -> bool {
        self.host_responding.load(Ordering::SeqCst) || self.emitting.load(Ordering::SeqCst)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    fn skip(&self, action_type: ActionType, reason: &str) {
        debug!("[actions] Skipping {} action: {}", action_type, reason);
        PipelineStats::bump(&self.stats.actions_skipped);
        let _ = self
            .events
            .send(PipelineEvent::ActionSkipped { action_type, reason: reason.to_string() });
    }

    /// Schedule `decision` to run after its delay, replacing any pending
    /// action that has not started yet.
    pub fn schedule(self: &Arc<Self>, decision: Decision, state: Arc<ConversationState>) {
        if !decision.should_act {
            return;
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let started = Arc::new(AtomicBool::new(false));
        let delay = Duration::from_millis(decision.delay_ms);
        let action_type = decision.action_type;

        let mut pending = self.pending.lock();
        if let Some(prev) = pending.take() {
            if !prev.started.load(Ordering::SeqCst) {
                prev.handle.abort();
                self.skip(prev.action_type, "replaced by a newer decision");
            }
        }

        let exec = Arc::clone(self);
        let started_flag = started.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let pending = exec.pending.lock();
                match pending.as_ref() {
                    Some(p) if p.id == id => started_flag.store(true, Ordering::SeqCst),
                    _ => return,
                }
            }
            exec.execute(decision, state).await;
            let mut pending = exec.pending.lock();
            if pending.as_ref().map(|p| p.id) == Some(id) {
                *pending = None;
            }
        });

        *pending = Some(PendingAction { id, handle: handle.abort_handle(), started, action_type });
        debug!("[actions] Scheduled {} action #{} in {:?}", action_type, id, delay);
    }

    /// Drop the pending action if it has not started.
    pub fn cancel_pending(&self) {
        if let Some(prev) = self.pending.lock().take() {
            if !prev.started.load(Ordering::SeqCst) {
                prev.handle.abort();
                self.skip(prev.action_type, "cancelled");
            }
        }
    }

    async fn execute(&self, decision: Decision, state: Arc<ConversationState>) {
        let action_type = decision.action_type;

        if let Some(last) = self.last_action() {
            if last.timestamp > decision.decided_at {
                self.skip(action_type, "a newer autonomous action was recorded");
                return;
            }
        }
        if self.host_responding.load(Ordering::SeqCst) {
            self.skip(action_type, "agent is mid-response");
            return;
        }
        if self.emitting.swap(true, Ordering::SeqCst) {
            self.skip(action_type, "another proactive message is being emitted");
            return;
        }
        let _guard = EmitGuard(&self.emitting);

        let text = match decision.suggested_message.clone() {
            Some(text) => text,
            None => match self.composer.compose_message(&decision, &state).await {
                Ok(Some(text)) if !text.trim().is_empty() => text,
                Ok(_) => {
                    self.skip(action_type, "no message to send");
                    return;
                }
                Err(e) => {
                    warn!("[actions] compose_message failed: {}", e);
                    self.skip(action_type, "message composition failed");
                    return;
                }
            },
        };

        let message = ProactiveMessage {
            text,
            action_type,
            priority: decision.priority,
            reasoning: decision.reasoning.clone(),
            decided_at: decision.decided_at,
        };

        match self.sink.emit(&message).await {
            Ok(()) => {
                self.record_action(LastAction {
                    action_type,
                    timestamp: Utc::now(),
                    reason: decision.reasoning.clone(),
                });
                PipelineStats::bump(&self.stats.actions_emitted);
                info!("[actions] Emitted proactive {} message ({})", action_type, decision.priority);
                let _ = self.events.send(PipelineEvent::ProactiveMessage { message });
            }
            Err(e) => {
                warn!("[actions] Sink rejected proactive message: {}", e);
                self.skip(action_type, "sink failed to emit");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::EngineResult;
    use crate::atoms::traits::ServicePayload;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<ProactiveMessage>>,
    }

    #[async_trait]
    impl ProactiveSink for RecordingSink {
        async fn emit(&self, message: &ProactiveMessage) -> EngineResult<()> {
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }

    struct Composer(Option<&'static str>);

    #[async_trait]
    impl DecisionService for Composer {
        fn name(&self) -> &str {
            "composer"
        }
        async fn decide(&self, _state: &ConversationState) -> EngineResult<ServicePayload> {
            Ok(serde_json::json!({ "shouldAct": false }))
        }
        async fn compose_message(&self, _d: &Decision, _s: &ConversationState) -> EngineResult<Option<String>> {
            Ok(self.0.map(String::from))
        }
    }

    fn state() -> Arc<ConversationState> {
        use crate::engine::state_builder::{build_state, SignalTracker, SnapshotContext};
        let tracker = SignalTracker::new();
        Arc::new(build_state(&tracker.raw_signals(Utc::now().fixed_offset()), &SnapshotContext::default()))
    }

    fn acting(message: Option<&str>, delay_ms: u64) -> Decision {
        Decision {
            should_act: true,
            action_type: ActionType::Support,
            priority: Priority::Medium,
            delay_ms,
            reasoning: "test".into(),
            confidence: 0.9,
            suggested_message: message.map(String::from),
            source: DecisionSource::Service,
            decided_at: Utc::now(),
        }
    }

    fn executor(sink: Arc<RecordingSink>, composer: Option<&'static str>) -> Arc<ActionExecutor> {
        let (events, _) = broadcast::channel(16);
        Arc::new(ActionExecutor::new(sink, Arc::new(Composer(composer)), Arc::new(PipelineStats::default()), events))
    }

    #[tokio::test(start_paused = true)]
    async fn emits_after_delay_and_records_last_action() {
        let sink = Arc::new(RecordingSink::default());
        let exec = executor(sink.clone(), None);
        exec.schedule(acting(Some("Hei, går det bra?"), 2_000), state());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(sink.sent.lock().is_empty());
        assert!(exec.last_action().is_none());

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(sink.sent.lock().len(), 1);
        assert_eq!(exec.last_action().unwrap().action_type, ActionType::Support);
        assert!(!exec.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_decision_replaces_pending_one() {
        let sink = Arc::new(RecordingSink::default());
        let exec = executor(sink.clone(), None);
        exec.schedule(acting(Some("first"), 3_000), state());
        tokio::time::sleep(Duration::from_millis(500)).await;
        exec.schedule(acting(Some("second"), 1_000), state());
        tokio::time::sleep(Duration::from_secs(5)).await;
        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "second");
        assert_eq!(exec.stats.snapshot().actions_skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_while_host_is_responding() {
        let sink = Arc::new(RecordingSink::default());
        let exec = executor(sink.clone(), None);
        exec.set_responding(true);
        exec.schedule(acting(Some("hello"), 500), state());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sink.sent.lock().is_empty());
        assert!(exec.last_action().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_when_newer_action_recorded() {
        let sink = Arc::new(RecordingSink::default());
        let exec = executor(sink.clone(), None);
        let decision = acting(Some("late"), 1_000);
        exec.record_action(LastAction {
            action_type: ActionType::CheckIn,
            timestamp: decision.decided_at + chrono::Duration::seconds(1),
            reason: "host".into(),
        });
        exec.schedule(decision, state());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sink.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn composes_message_when_none_suggested() {
        let sink = Arc::new(RecordingSink::default());
        let exec = executor(sink.clone(), Some("Jeg er her hvis du trenger meg."));
        exec.schedule(acting(None, 500), state());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.sent.lock()[0].text, "Jeg er her hvis du trenger meg.");

        let silent = executor(sink.clone(), None);
        silent.schedule(acting(None, 500), state());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.sent.lock().len(), 1);
        assert!(silent.last_action().is_none());
    }
}
