// End-to-end behavior through the public API. Single test binary, one
// module per area.

use async_trait::async_trait;
use chrono::Utc;
use pawz_presence::atoms::constants::{KV_ENTRY_IDS_KEY, KV_PIVOTS_KEY};
use pawz_presence::atoms::traits::ServicePayload;
use pawz_presence::atoms::types::{ActionType, MemoryStoreConfig, PipelineConfig, Priority};
use pawz_presence::engine::memory::{HashingEmbedder, InMemoryKvStore};
use pawz_presence::engine::state_builder::SnapshotContext;
use pawz_presence::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn store_with(kv: Arc<InMemoryKvStore>, capacity: usize) -> VectorMemoryStore {
    let config = MemoryStoreConfig { capacity, ..Default::default() };
    VectorMemoryStore::open(Arc::new(HashingEmbedder::new(384)), kv, config)
}

fn store(capacity: usize) -> VectorMemoryStore {
    store_with(Arc::new(InMemoryKvStore::new()), capacity)
}

fn snapshot(text: &str) -> ConversationState {
    let mut tracker = SignalTracker::new();
    tracker.on_input(text, Utc::now());
    build_state(&tracker.raw_signals(Utc::now().fixed_offset()), &SnapshotContext::default())
}

mod memory_store {
    use super::*;

    #[tokio::test]
    async fn importance_is_clamped() {
        let store = store(100);
        for (i, importance) in [-3.0f32, 0.4, 1.7, f32::NAN, f32::INFINITY].into_iter().enumerate() {
            let id = store
                .insert(NewMemory::new(format!("memory number {}", i), MemoryKind::Fact, importance))
                .await
                .unwrap();
            let stored = store.get(&id).unwrap().metadata.importance;
            assert!((0.0..=1.0).contains(&stored), "{} stored as {}", importance, stored);
        }
    }

    #[tokio::test]
    async fn eviction_keeps_the_more_important_entries() {
        let store = store(5);
        let importances = [0.9, 0.1, 0.5, 0.3, 0.8, 0.2, 0.7, 0.05, 0.6, 0.4];
        let mut ids = Vec::new();
        for (i, importance) in importances.iter().enumerate() {
            let id = store
                .insert(NewMemory::new(format!("distinct note {} about topic {}", i, i * 7), MemoryKind::Insight, *importance))
                .await
                .unwrap();
            ids.push((id, *importance));
        }
        assert!(store.len() <= 5);

        let (kept, evicted): (Vec<_>, Vec<_>) = ids.iter().partition(|(id, _)| store.get(id).is_some());
        let mean = |v: &[&(String, f32)]| v.iter().map(|(_, i)| *i).sum::<f32>() / v.len() as f32;
        assert!(!evicted.is_empty());
        assert!(mean(&kept) >= mean(&evicted) - 1e-6);
    }

    #[tokio::test]
    async fn self_similarity_and_symmetry() {
        let store = store(100);
        let a = store.insert(NewMemory::new("Jeg drikker kaffe hver morgen", MemoryKind::Preference, 0.6)).await.unwrap();
        let b = store.insert(NewMemory::new("Deadline on the quarterly report", MemoryKind::Fact, 0.6)).await.unwrap();

        let hits = store.search(&SearchQuery::new("Jeg drikker kaffe hver morgen", 5, 0.01)).await.unwrap();
        let own = hits.iter().find(|h| h.entry.id == a).expect("self hit");
        assert!((own.similarity - 1.0).abs() < 1e-5);

        let ea = store.get(&a).unwrap().embedding;
        let eb = store.get(&b).unwrap().embedding;
        let ab = pawz_presence::engine::memory::vector_math::cosine_similarity(&ea, &eb);
        let ba = pawz_presence::engine::memory::vector_math::cosine_similarity(&eb, &ea);
        assert_eq!(ab, ba);
    }

    #[tokio::test]
    async fn identical_inserts_get_distinct_ids_and_equal_embeddings() {
        let store = store(100);
        let first = store.insert(NewMemory::new("same content", MemoryKind::Fact, 0.5)).await.unwrap();
        let second = store.insert(NewMemory::new("same content", MemoryKind::Fact, 0.5)).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.get(&first).unwrap().embedding, store.get(&second).unwrap().embedding);
    }

    #[tokio::test]
    async fn stats_report_average_importance() {
        let store = store(100);
        for (content, importance) in [("first entry", 0.1), ("second entry here", 0.8), ("a third one", 0.95)] {
            store.insert(NewMemory::new(content, MemoryKind::Fact, importance)).await.unwrap();
        }
        let stats = store.stats();
        assert_eq!(stats.total_entries, 3);
        assert!((stats.average_importance - 0.6167).abs() < 1e-3);
    }

    #[tokio::test]
    async fn kaffe_ranks_above_unrelated_entries() {
        let store = store(100);
        let coffee = store
            .insert(NewMemory::new("Brukeren elsker kaffe om morgenen", MemoryKind::Preference, 0.5).with_tags(["kaffe"]))
            .await
            .unwrap();
        store
            .insert(NewMemory::new("Stressende møte på jobb i dag", MemoryKind::Conversation, 0.5).with_tags(["jobb"]))
            .await
            .unwrap();
        store
            .insert(NewMemory::new("Sjefen vil ha rapporten før fredag", MemoryKind::Fact, 0.5).with_tags(["jobb"]))
            .await
            .unwrap();

        let hits = store.search(&SearchQuery::new("kaffe", 5, 0.1)).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].entry.id, coffee);
    }

    #[tokio::test]
    async fn corrupt_storage_loads_as_empty_and_accepts_writes() {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.set(KV_ENTRY_IDS_KEY, "{not a list").unwrap();
        kv.set(KV_PIVOTS_KEY, "garbage").unwrap();

        let store = store_with(kv.clone(), 100);
        assert!(store.is_empty());
        let id = store.insert(NewMemory::new("fresh start", MemoryKind::Fact, 0.5)).await.unwrap();

        let reopened = store_with(kv, 100);
        assert_eq!(reopened.len(), 1);
        assert!(reopened.get(&id).is_some());
    }
}

mod decisions {
    use super::*;
    use pawz_presence::engine::analysis::decision_lane::evaluate;
    use pawz_presence::engine::analysis::validation::validate_decision;
    use serde_json::json;

    struct Stalled;

    #[async_trait]
    impl DecisionService for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn decide(&self, _state: &ConversationState) -> EngineResult<ServicePayload> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(json!({ "shouldAct": true, "actionType": "support" }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_yields_safe_default() {
        let d = evaluate(&Stalled, &snapshot("are you there?"), Duration::from_secs(20)).await;
        assert!(!d.should_act);
        assert_eq!(d.action_type, ActionType::Wait);
        assert!(d.confidence < 0.5);
    }

    #[test]
    fn missing_priority_is_low() {
        let d = validate_decision(&json!({ "shouldAct": true, "actionType": "check_in" }), Utc::now()).unwrap();
        assert_eq!(d.priority, Priority::Low);
        assert!(d.should_act);
    }
}

mod pipeline {
    use super::*;
    use serde_json::json;

    struct Counting {
        decide_calls: AtomicUsize,
        reflect_calls: AtomicUsize,
    }

    impl Counting {
        fn new() -> Arc<Self> {
            Arc::new(Self { decide_calls: AtomicUsize::new(0), reflect_calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl DecisionService for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        async fn decide(&self, _state: &ConversationState) -> EngineResult<ServicePayload> {
            self.decide_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "shouldAct": false, "actionType": "wait" }))
        }
    }

    #[async_trait]
    impl ReflectionService for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        async fn reflect(&self, _state: &ConversationState) -> EngineResult<Option<ServicePayload>> {
            self.reflect_calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    struct Quiet;

    #[async_trait]
    impl ProactiveSink for Quiet {
        async fn emit(&self, _message: &ProactiveMessage) -> EngineResult<()> {
            Ok(())
        }
    }

    fn start(services: Arc<Counting>) -> AnalysisPipeline {
        AnalysisPipeline::start(
            PipelineConfig::default(),
            PipelineServices { decision: services.clone(), reflection: services, sink: Arc::new(Quiet), memory: None },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn five_snapshots_in_settle_window_make_one_call() {
        let services = Counting::new();
        let pipeline = start(services.clone());
        for text in ["Hel", "Hello", "Hello th", "Hello there", "Hello there friend"] {
            pipeline.submit(snapshot(text)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(services.decide_calls.load(Ordering::SeqCst), 1);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn short_draft_never_reaches_reflection_service() {
        let services = Counting::new();
        let pipeline = start(services.clone());
        pipeline.submit(snapshot("okay then")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(services.decide_calls.load(Ordering::SeqCst), 1);
        assert_eq!(services.reflect_calls.load(Ordering::SeqCst), 0);
        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn local_services_drive_a_full_round() {
        let store = Arc::new(store(100));
        let pipeline = AnalysisPipeline::start(
            PipelineConfig::default(),
            PipelineServices {
                decision: Arc::new(LocalDecisionService::new()),
                reflection: Arc::new(LocalReflectionService::new()),
                sink: Arc::new(Quiet),
                memory: Some(store.clone()),
            },
        );
        pipeline.submit(snapshot("My name is Kari and I work as a nurse")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        assert_eq!(pipeline.decisions().len(), 1);
        assert_eq!(pipeline.reflections().len(), 1);
        assert_eq!(store.len(), 1);
        let hits = store.search(&SearchQuery::new("nurse", 3, 0.05)).await.unwrap();
        assert_eq!(hits[0].entry.metadata.kind, MemoryKind::Fact);
        pipeline.shutdown().await;
    }
}
