// ── Rounds and the global safety timer ─────────────────────────────────────
//
// Every qualifying snapshot opens a round: one decision lane and one
// reflection lane working on it. A round stays registered until both lanes
// report back. Opening a round re-arms a shared cutoff timer; when the timer
// fires, every still-registered round is cancelled and whatever its lanes
// produce afterwards is ignored.

use crate::engine::analysis::events::{PipelineEvent, PipelineStats};
use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Decision,
    Reflection,
}

#[derive(Debug)]
pub struct RoundGuard {
    id: u64,
    cancelled: AtomicBool,
    decision_done: AtomicBool,
    reflection_done: AtomicBool,
    pending: AtomicUsize,
}

impl RoundGuard {
    fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: AtomicBool::new(false),
            decision_done: AtomicBool::new(false),
            reflection_done: AtomicBool::new(false),
            pending: AtomicUsize::new(2),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True the first time a lane reports; later reports are no-ops.
    fn mark(&self, lane: Lane) -> bool {
        let flag = match lane {
            Lane::Decision => &self.decision_done,
            Lane::Reflection => &self.reflection_done,
        };
        !flag.swap(true, Ordering::SeqCst)
    }
}

pub struct RoundRegistry {
    next_id: AtomicU64,
    inflight: Mutex<HashMap<u64, Arc<RoundGuard>>>,
    arm: mpsc::UnboundedSender<()>,
}

impl RoundRegistry {
    /// Returns the registry and the receiving end the safety timer listens on.
    pub fn create() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (arm, rx) = mpsc::unbounded_channel();
        let registry = Self { next_id: AtomicU64::new(1), inflight: Mutex::new(HashMap::new()), arm };
        (registry, rx)
    }

    /// Open a round and re-arm the safety timer.
    pub fn begin(&self) -> Arc<RoundGuard> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let guard = Arc::new(RoundGuard::new(id));
        self.inflight.lock().insert(id, guard.clone());
        // Receiver gone means the timer was shut down; nothing to re-arm.
        let _ = self.arm.send(());
        guard
    }

    /// A lane is done with the round, whatever its outcome.
    pub fn finish(&self, round: &RoundGuard, lane: Lane) {
        if round.mark(lane) && round.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inflight.lock().remove(&round.id);
        }
    }

    /// Cancel and forget every registered round. Returns their ids.
    pub fn cancel_all(&self) -> Vec<u64> {
        let drained: Vec<Arc<RoundGuard>> = self.inflight.lock().drain().map(|(_, g)| g).collect();
        let mut ids: Vec<u64> = drained
            .iter()
            .map(|g| {
                g.cancelled.store(true, Ordering::SeqCst);
                g.id
            })
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

/// Safety timer loop. Idle until the first round opens; each further round
/// pushes the cutoff out again. On expiry cancels all in-flight rounds and
/// calls `on_abandon` with their ids.
pub async fn run_safety_timer<F>(
    mut arm: mpsc::UnboundedReceiver<()>,
    cutoff: Duration,
    rounds: Arc<RoundRegistry>,
    stats: Arc<PipelineStats>,
    events: broadcast::Sender<PipelineEvent>,
    on_abandon: F,
) where
    F: Fn(&[u64]) + Send + 'static,
{
    while arm.recv().await.is_some() {
        let mut deadline = Instant::now() + cutoff;
        loop {
            tokio::select! {
                msg = arm.recv() => match msg {
                    Some(()) => deadline = Instant::now() + cutoff,
                    None => return,
                },
                _ = sleep_until(deadline) => {
                    let abandoned = rounds.cancel_all();
                    if !abandoned.is_empty() {
                        warn!("[pipeline] Safety timer fired, abandoning rounds {:?}", abandoned);
                        on_abandon(&abandoned);
                        for round in &abandoned {
                            PipelineStats::bump(&stats.rounds_abandoned);
                            let _ = events.send(PipelineEvent::RoundAbandoned { round: *round });
                        }
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_unregisters_after_both_lanes() {
        let (registry, _rx) = RoundRegistry::create();
        let round = registry.begin();
        assert_eq!(registry.in_flight(), 1);
        registry.finish(&round, Lane::Decision);
        registry.finish(&round, Lane::Decision);
        assert_eq!(registry.in_flight(), 1, "a lane counts once");
        registry.finish(&round, Lane::Reflection);
        assert_eq!(registry.in_flight(), 0);
        assert!(!round.is_cancelled());
    }

    #[test]
    fn cancel_all_flags_in_flight_rounds() {
        let (registry, _rx) = RoundRegistry::create();
        let a = registry.begin();
        let b = registry.begin();
        registry.finish(&b, Lane::Decision);
        registry.finish(&b, Lane::Reflection);
        assert_eq!(registry.cancel_all(), vec![a.id()]);
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_abandons_stalled_rounds() {
        let (registry, rx) = RoundRegistry::create();
        let registry = Arc::new(registry);
        let stats = Arc::new(PipelineStats::default());
        let (events, mut events_rx) = broadcast::channel(8);
        let timer = tokio::spawn(run_safety_timer(
            rx,
            Duration::from_secs(30),
            registry.clone(),
            stats.clone(),
            events,
            |_| {},
        ));

        let stalled = registry.begin();
        tokio::time::sleep(Duration::from_secs(20)).await;
        // A new round pushes the cutoff out.
        let fresh = registry.begin();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!stalled.is_cancelled());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(stalled.is_cancelled());
        assert!(fresh.is_cancelled());
        assert_eq!(stats.snapshot().rounds_abandoned, 2);
        assert_eq!(events_rx.recv().await.unwrap(), PipelineEvent::RoundAbandoned { round: stalled.id() });
        timer.abort();
    }
}
