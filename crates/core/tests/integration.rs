//! End-to-end tests for the engagement pipeline.
//!
//! Each test drives `runtime::process` through whole turns with a
//! scripted mock provider and in-memory stores: screen, cache, gate,
//! reply decision, generation, promotion. No network, no files.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use attune_core::config::EngineCfg;
use attune_core::io::output::{self, OutputReceiver};
use attune_core::runtime::{ChannelHandle, ChannelState, EngineCtx, process};
use attune_core::store::{
    ConversationStore, FallbackReason, MemoryConversationStore, MemoryFallbackStore, StoreError,
};
use attune_core::types::{
    DropReason, InboundMessage, SilentReason, SpeakerRole, StoredMessage, TurnOutcome,
};
use attune_llm::{CompletionRequest, CompletionResponse, LlmError, LlmProvider, MockProvider};

struct Rig {
    ctx: EngineCtx,
    output_rx: OutputReceiver,
    store: Arc<MemoryConversationStore>,
    fallback: Arc<MemoryFallbackStore>,
}

fn rig(cfg: EngineCfg, llm: Option<Arc<dyn LlmProvider>>) -> Rig {
    let store = Arc::new(MemoryConversationStore::new());
    let fallback = Arc::new(MemoryFallbackStore::new());
    let (output_tx, output_rx) = output::channel(16);
    Rig {
        ctx: EngineCtx {
            cfg: Arc::new(cfg),
            llm,
            store: store.clone(),
            fallback: fallback.clone(),
            output_tx,
        },
        output_rx,
        store,
        fallback,
    }
}

fn test_cfg() -> EngineCfg {
    let mut cfg = EngineCfg::default();
    cfg.enabled_channels = vec!["qq:42".into()];
    // Deterministic reply text and no pacing sleeps.
    cfg.typo_enabled = false;
    cfg.typing_enabled = false;
    cfg
}

/// Force the probability draw to zero so untriggered messages always
/// stay quiet.
fn never_engage(cfg: &mut EngineCfg) {
    cfg.attention_enabled = false;
    cfg.base_probability = 0.0;
    cfg.probability_min = 0.0;
}

fn handle_for(cfg: &EngineCfg) -> ChannelHandle {
    Arc::new(Mutex::new(ChannelState::new(cfg, Utc::now())))
}

fn plain(content: &str) -> InboundMessage {
    InboundMessage::text("qq", "42", "u1", "ada", content)
}

fn mention(content: &str) -> InboundMessage {
    let mut msg = plain(content);
    msg.mentions_self = true;
    msg
}

#[tokio::test]
async fn mention_round_trip_promotes_cache_and_reply() {
    let cfg = test_cfg();
    let provider = Arc::new(MockProvider::scripted(["yes", "hey ada, what's up?"]));
    let mut rig = rig(cfg.clone(), Some(provider.clone() as Arc<dyn LlmProvider>));
    let handle = handle_for(&cfg);

    let outcome = process(&rig.ctx, &handle, mention("you around?")).await;

    assert_eq!(outcome, TurnOutcome::Replied { content: "hey ada, what's up?".into() });
    assert_eq!(provider.call_count(), 2);

    let sent = rig.output_rx.recv().await.unwrap();
    assert_eq!(sent.channel_key(), "qq:42");
    assert_eq!(sent.content, "hey ada, what's up?");

    // Cache drained into the log; the answered speaker gained attention.
    let state = handle.lock().await;
    assert!(state.cache.is_empty());
    assert!(!state.in_flight);
    assert!(state.snapshot_dirty);
    let speaker = state.attention.get("u1").unwrap();
    assert!(speaker.attention > 0.2, "attention {}", speaker.attention);
    drop(state);

    let log = rig.store.recent("qq:42", 10).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].content, "you around?");
    assert_eq!(log[0].role, SpeakerRole::User);
    assert_eq!(log[1].content, "hey ada, what's up?");
    assert_eq!(log[1].role, SpeakerRole::Assistant);
}

#[tokio::test]
async fn disabled_channel_is_dropped_outright() {
    let cfg = test_cfg();
    let rig = rig(cfg.clone(), None);
    let handle = handle_for(&cfg);

    let msg = InboundMessage::text("discord", "9", "u1", "ada", "hello over here");
    let outcome = process(&rig.ctx, &handle, msg).await;

    assert_eq!(outcome, TurnOutcome::Dropped(DropReason::ChannelNotEnabled));
    assert!(handle.lock().await.cache.is_empty());
    assert!(rig.fallback.records("discord:9").await.is_empty());
}

#[tokio::test]
async fn blank_content_is_dropped() {
    let cfg = test_cfg();
    let rig = rig(cfg.clone(), None);
    let handle = handle_for(&cfg);

    let outcome = process(&rig.ctx, &handle, mention(" \t ")).await;

    assert_eq!(outcome, TurnOutcome::Dropped(DropReason::EmptyContent));
    assert!(handle.lock().await.cache.is_empty());
}

#[tokio::test]
async fn failed_draw_retains_the_message() {
    let mut cfg = test_cfg();
    never_engage(&mut cfg);
    let provider = Arc::new(MockProvider::new("unused"));
    let mut rig = rig(cfg.clone(), Some(provider.clone() as Arc<dyn LlmProvider>));
    let handle = handle_for(&cfg);

    let outcome = process(&rig.ctx, &handle, plain("did anyone see the patch?")).await;

    assert_eq!(outcome, TurnOutcome::Silent(SilentReason::FailedDraw));
    assert_eq!(provider.call_count(), 0);

    // Cached and written to the fallback log, not promoted. No tracked
    // profile was refreshed, so the snapshot stays clean.
    let state = handle.lock().await;
    assert_eq!(state.cache.len(), 1);
    assert!(state.cache.iter().all(|e| e.fallback_persisted));
    assert!(!state.snapshot_dirty);
    drop(state);

    assert!(rig.store.recent("qq:42", 10).await.unwrap().is_empty());
    let records = rig.fallback.records("qq:42").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, FallbackReason::Retained);
    assert_eq!(records[0].message.content, "did anyone see the patch?");
    assert!(rig.output_rx.try_recv().is_err());
}

#[tokio::test]
async fn model_decline_keeps_the_message_for_later() {
    let cfg = test_cfg();
    let provider = Arc::new(MockProvider::scripted(["no"]));
    let mut rig = rig(cfg.clone(), Some(provider.clone() as Arc<dyn LlmProvider>));
    let handle = handle_for(&cfg);

    let outcome = process(&rig.ctx, &handle, mention("thoughts?")).await;

    assert_eq!(outcome, TurnOutcome::Silent(SilentReason::DeclinedByModel));
    assert_eq!(provider.call_count(), 1);

    let state = handle.lock().await;
    assert_eq!(state.cache.len(), 1);
    assert!(!state.in_flight);
    drop(state);

    let records = rig.fallback.records("qq:42").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, FallbackReason::Retained);
    assert!(rig.output_rx.try_recv().is_err());
}

#[tokio::test]
async fn decision_timeout_falls_back_to_silence() {
    let mut cfg = test_cfg();
    cfg.decision_timeout_secs = 0;
    let provider = Arc::new(MockProvider::delayed("yes", Duration::from_millis(200)));
    let rig = rig(cfg.clone(), Some(provider as Arc<dyn LlmProvider>));
    let handle = handle_for(&cfg);

    let outcome = process(&rig.ctx, &handle, mention("ping")).await;

    assert_eq!(outcome, TurnOutcome::Silent(SilentReason::DecisionTimeout));
    let state = handle.lock().await;
    assert!(!state.in_flight);
    assert_eq!(state.cache.len(), 1);
    drop(state);
    assert_eq!(rig.fallback.records("qq:42").await.len(), 1);
}

#[tokio::test]
async fn generation_failure_retains_and_clears_in_flight() {
    let cfg = test_cfg();
    // One scripted answer: the decision succeeds, then generation
    // exhausts the script and fails.
    let provider = Arc::new(MockProvider::scripted(["yes"]));
    let mut rig = rig(cfg.clone(), Some(provider.clone() as Arc<dyn LlmProvider>));
    let handle = handle_for(&cfg);

    let outcome = process(&rig.ctx, &handle, mention("still there?")).await;

    assert_eq!(outcome, TurnOutcome::Silent(SilentReason::GenerationFailed));
    assert_eq!(provider.call_count(), 2);

    let state = handle.lock().await;
    assert!(!state.in_flight);
    assert_eq!(state.cache.len(), 1);
    drop(state);

    let records = rig.fallback.records("qq:42").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, FallbackReason::Retained);
    assert!(rig.output_rx.try_recv().is_err());
}

#[tokio::test]
async fn busy_channel_defers_to_the_cache() {
    let cfg = test_cfg();
    let provider = Arc::new(MockProvider::new("unused"));
    let rig = rig(cfg.clone(), Some(provider.clone() as Arc<dyn LlmProvider>));
    let handle = handle_for(&cfg);
    handle.lock().await.in_flight = true;

    let outcome = process(&rig.ctx, &handle, mention("me too")).await;

    assert_eq!(outcome, TurnOutcome::Silent(SilentReason::InFlight));
    assert_eq!(provider.call_count(), 0);
    let state = handle.lock().await;
    assert_eq!(state.cache.len(), 1);
    assert!(state.cache.iter().all(|e| e.fallback_persisted));
}

#[tokio::test]
async fn no_provider_still_caches_engaged_messages() {
    let cfg = test_cfg();
    let rig = rig(cfg.clone(), None);
    let handle = handle_for(&cfg);

    let outcome = process(&rig.ctx, &handle, mention("anyone home?")).await;

    assert_eq!(outcome, TurnOutcome::Silent(SilentReason::DecisionFailed));
    assert_eq!(handle.lock().await.cache.len(), 1);
    let records = rig.fallback.records("qq:42").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, FallbackReason::Retained);
}

#[tokio::test]
async fn quiet_burst_is_never_lost() {
    let mut cfg = test_cfg();
    never_engage(&mut cfg);
    cfg.cache_capacity = 2;
    let rig = rig(cfg.clone(), None);
    let handle = handle_for(&cfg);

    for i in 1..=4 {
        let outcome = process(&rig.ctx, &handle, plain(&format!("m{i}"))).await;
        assert_eq!(outcome, TurnOutcome::Silent(SilentReason::FailedDraw));
    }

    // The cache holds only the newest two, but every message reached the
    // fallback log exactly once.
    let state = handle.lock().await;
    let cached: Vec<&str> = state.cache.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(cached, vec!["m3", "m4"]);
    drop(state);

    let records = rig.fallback.records("qq:42").await;
    let contents: Vec<&str> = records.iter().map(|r| r.message.content.as_str()).collect();
    assert_eq!(contents, vec!["m1", "m2", "m3", "m4"]);
    assert!(records.iter().all(|r| r.reason == FallbackReason::Retained));
}

#[tokio::test]
async fn promotion_failure_keeps_the_reply_in_cache() {
    struct RefusingStore;

    #[async_trait]
    impl ConversationStore for RefusingStore {
        async fn append_batch(
            &self,
            _channel_key: &str,
            _messages: &[StoredMessage],
        ) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("append refused")))
        }

        async fn recent(
            &self,
            _channel_key: &str,
            _limit: usize,
        ) -> Result<Vec<StoredMessage>, StoreError> {
            Ok(Vec::new())
        }
    }

    let mut cfg = test_cfg();
    cfg.cache_capacity = 1;
    let provider = Arc::new(MockProvider::scripted(["yes", "fine by me"]));
    let fallback = Arc::new(MemoryFallbackStore::new());
    let (output_tx, mut output_rx) = output::channel(16);
    let ctx = EngineCtx {
        cfg: Arc::new(cfg.clone()),
        llm: Some(provider as Arc<dyn LlmProvider>),
        store: Arc::new(RefusingStore),
        fallback: fallback.clone(),
        output_tx,
    };
    let handle = handle_for(&cfg);

    let outcome = process(&ctx, &handle, mention("ship it?")).await;

    // The reply still went out. Promotion failed, so the reply stays
    // cached and the user message it evicted lands in the fallback log.
    assert_eq!(outcome, TurnOutcome::Replied { content: "fine by me".into() });
    assert_eq!(output_rx.recv().await.unwrap().content, "fine by me");

    let state = handle.lock().await;
    assert_eq!(state.cache.len(), 1);
    let kept = state.cache.iter().next().unwrap();
    assert_eq!(kept.role, SpeakerRole::Assistant);
    assert_eq!(kept.content, "fine by me");
    drop(state);

    let records = fallback.records("qq:42").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, FallbackReason::Evicted);
    assert_eq!(records[0].message.content, "ship it?");
}

#[tokio::test]
async fn second_round_sees_the_promoted_history() {
    struct CapturingProvider {
        script: MockProvider,
        prompts: std::sync::Mutex<Vec<String>>,
    }

    impl LlmProvider for CapturingProvider {
        fn name(&self) -> &str {
            "capturing"
        }

        fn complete(
            &self,
            request: CompletionRequest,
        ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, LlmError>> + Send + '_>>
        {
            let joined: String = request
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            self.prompts.lock().unwrap().push(joined);
            self.script.complete(request)
        }
    }

    let cfg = test_cfg();
    let provider = Arc::new(CapturingProvider {
        script: MockProvider::scripted(["yes", "build is green", "yes", "deploy is fine too"]),
        prompts: std::sync::Mutex::new(Vec::new()),
    });
    let mut rig = rig(cfg.clone(), Some(provider.clone() as Arc<dyn LlmProvider>));
    let handle = handle_for(&cfg);

    let first = process(&rig.ctx, &handle, mention("did the nightly pass?")).await;
    assert_eq!(first, TurnOutcome::Replied { content: "build is green".into() });
    let second = process(&rig.ctx, &handle, mention("and the deploy?")).await;
    assert_eq!(second, TurnOutcome::Replied { content: "deploy is fine too".into() });

    assert_eq!(rig.output_rx.recv().await.unwrap().content, "build is green");
    assert_eq!(rig.output_rx.recv().await.unwrap().content, "deploy is fine too");

    // The second round's decision prompt carries the promoted first
    // round plus the new pending message.
    let prompts = provider.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 4);
    assert!(prompts[2].contains("did the nightly pass?"));
    assert!(prompts[2].contains("build is green"));
    assert!(prompts[2].contains("and the deploy?"));

    let log = rig.store.recent("qq:42", 10).await.unwrap();
    let contents: Vec<&str> = log.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["did the nightly pass?", "build is green", "and the deploy?", "deploy is fine too"]
    );
}
