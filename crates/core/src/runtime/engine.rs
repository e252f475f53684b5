//! Engine wiring: the inbound message loop plus the background tasks
//! that sweep caches, review reply frequency, and flush attention
//! snapshots.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use super::channel::ChannelMap;
use super::pipeline::{self, EngineCtx};
use crate::attention::{ChannelAttention, snapshot};
use crate::cognition::{CallOutcome, context, invoker};
use crate::config::EngineCfg;
use crate::gate;
use crate::io::input::{self, InputReceiver, InputSender};
use crate::io::output::{self, OutputReceiver};
use crate::store::{ConversationStore, FallbackReason, FallbackStore};
use crate::types::InboundMessage;
use attune_llm::LlmProvider;

/// Consecutive failures a background task tolerates before escalating
/// to an error log and resetting its counter.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// How often the frequency reviewer polls channel windows.
const REVIEW_POLL_SECS: u64 = 15;

/// The engine: consumes inbound messages, runs each through the
/// pipeline on its own task, and keeps the per-channel state alive.
pub struct Engine {
    cfg: Arc<EngineCfg>,
    shutdown: CancellationToken,
    channels: ChannelMap,
    ctx: Arc<EngineCtx>,
    input_rx: InputReceiver,
    snapshot_path: PathBuf,
}

impl Engine {
    /// Create an engine. Returns (engine, input sender, output receiver):
    /// feed `InboundMessage`s into the sender, consume replies from the
    /// receiver.
    pub fn new(
        cfg: EngineCfg,
        llm: Option<Arc<dyn LlmProvider>>,
        store: Arc<dyn ConversationStore>,
        fallback: Arc<dyn FallbackStore>,
    ) -> (Self, InputSender, OutputReceiver) {
        let (input_tx, input_rx) = input::channel(256);
        let (output_tx, output_rx) = output::channel(64);
        let cfg = Arc::new(cfg);
        let snapshot_path = PathBuf::from(&cfg.data_dir).join("attention.json");
        let ctx = Arc::new(EngineCtx { cfg: cfg.clone(), llm, store, fallback, output_tx });
        let engine = Self {
            cfg,
            shutdown: CancellationToken::new(),
            channels: ChannelMap::new(),
            ctx,
            input_rx,
            snapshot_path,
        };
        (engine, input_tx, output_rx)
    }

    /// The cancellation token that stops the engine and its tasks.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start background tasks and consume inbound messages until the
    /// token is cancelled or the input channel closes.
    pub async fn run(&mut self) {
        spawn_signal_listener(self.shutdown.clone());
        let token = self.shutdown.clone();

        self.restore_snapshot().await;

        spawn_snapshot_flusher(
            self.channels.clone(),
            self.cfg.clone(),
            self.snapshot_path.clone(),
            token.clone(),
        );
        spawn_cache_sweeper(self.channels.clone(), self.ctx.clone(), token.clone());
        if self.cfg.frequency_enabled && self.ctx.llm.is_some() {
            spawn_frequency_reviewer(self.channels.clone(), self.ctx.clone(), token.clone());
        }

        tracing::info!(channels = self.cfg.enabled_channels.len(), "attune engine started");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("shutdown signal received, exiting message loop");
                    break;
                }
                msg = self.input_rx.recv() => {
                    match msg {
                        Some(msg) => self.dispatch(msg).await,
                        None => {
                            tracing::info!("input channel closed, exiting message loop");
                            break;
                        }
                    }
                }
            }
        }

        self.flush_snapshot().await;
        tracing::info!("attune engine stopped");
    }

    /// Hand one message to its channel's pipeline on its own task.
    async fn dispatch(&self, msg: InboundMessage) {
        // Screen before touching the channel map so unknown channels
        // cannot grow it.
        if let Some(reason) = gate::screen(&msg, &self.cfg) {
            tracing::debug!(channel = %msg.channel_key(), reason = ?reason, "message dropped");
            return;
        }
        let handle = self.channels.get_or_create(&msg.channel_key(), &self.cfg).await;
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let channel = msg.channel_key();
            let outcome = pipeline::process(&ctx, &handle, msg).await;
            tracing::debug!(channel = %channel, outcome = ?outcome, "turn finished");
        });
    }

    /// Restore attention state persisted by a previous run.
    async fn restore_snapshot(&self) {
        match snapshot::load(&self.snapshot_path) {
            Ok(channels) if !channels.is_empty() => {
                let count = channels.len();
                self.channels.restore(&self.cfg, channels).await;
                tracing::info!(channels = count, "attention snapshot restored");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.snapshot_path.display(),
                    error = %e,
                    "attention snapshot unreadable, starting fresh"
                );
            }
        }
    }

    /// Final snapshot write at shutdown.
    async fn flush_snapshot(&self) {
        let channels = collect_attention(&self.channels).await;
        if let Err(e) = snapshot::save(&self.snapshot_path, &channels) {
            tracing::warn!(error = %e, "final attention snapshot failed");
        }
    }
}

/// Cancel `token` when the process receives SIGTERM (Ctrl+C elsewhere).
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    let _ = sigterm.recv().await;
                    tracing::info!("received SIGTERM, shutting down");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    return;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = signal::ctrl_c().await;
            tracing::info!("received Ctrl+C, shutting down");
        }
        token.cancel();
    });
}

async fn collect_attention(channels: &ChannelMap) -> HashMap<String, ChannelAttention> {
    let mut map = HashMap::new();
    for (key, handle) in channels.handles().await {
        let state = handle.lock().await;
        if !state.attention.is_empty() {
            map.insert(key, state.attention.clone());
        }
    }
    map
}

/// Spawn the periodic attention snapshot task. Each cycle prunes stale
/// profiles first, then persists what remains, skipping the write when
/// no channel changed since the last one.
fn spawn_snapshot_flusher(
    channels: ChannelMap,
    cfg: Arc<EngineCfg>,
    path: PathBuf,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(cfg.snapshot_flush_interval_secs);
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("snapshot task shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let now = Utc::now();
            let handles = channels.handles().await;
            let mut removed = 0usize;
            let mut dirty = false;
            for (_, handle) in &handles {
                let mut state = handle.lock().await;
                let pruned = state.attention.cleanup(&cfg, now);
                if pruned > 0 {
                    removed += pruned;
                    state.snapshot_dirty = true;
                }
                dirty |= state.snapshot_dirty;
            }
            if removed > 0 {
                tracing::debug!(removed, "stale attention profiles pruned");
            }
            if !dirty {
                continue;
            }

            match snapshot::save(&path, &collect_attention(&channels).await) {
                Ok(()) => {
                    consecutive_failures = 0;
                    for (_, handle) in &handles {
                        handle.lock().await.snapshot_dirty = false;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::warn!(error = %e, consecutive_failures, "attention snapshot failed");
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        tracing::error!(
                            "snapshot: {} consecutive failures, counter reset",
                            MAX_CONSECUTIVE_FAILURES
                        );
                        consecutive_failures = 0;
                    }
                }
            }
        }
    });
}

/// Spawn the TTL sweeper. Expired cache entries that were never written
/// to the fallback log are preserved there before being dropped.
fn spawn_cache_sweeper(channels: ChannelMap, ctx: Arc<EngineCtx>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(ctx.cfg.cache_sweep_interval_secs);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("cache sweeper shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let now = Utc::now();
            for (key, handle) in channels.handles().await {
                let expired = handle.lock().await.cache.sweep_expired(ctx.cfg.cache_ttl_secs, now);
                if expired.is_empty() {
                    continue;
                }
                tracing::debug!(channel = %key, expired = expired.len(), "cache entries expired");
                for entry in expired.iter().filter(|e| !e.fallback_persisted) {
                    if let Err(e) =
                        ctx.fallback.record(&key, &entry.to_stored(), FallbackReason::Expired).await
                    {
                        tracing::warn!(channel = %key, error = %e, "fallback write failed");
                    }
                }
            }
        }
    });
}

/// Spawn the frequency governor. When a channel's review window is due,
/// the model judges the recent traffic and the base probability is
/// nudged. The window restarts after every review, verdict or not.
fn spawn_frequency_reviewer(channels: ChannelMap, ctx: Arc<EngineCtx>, cancel: CancellationToken) {
    let Some(llm) = ctx.llm.clone() else {
        return;
    };
    tokio::spawn(async move {
        let interval = std::time::Duration::from_secs(REVIEW_POLL_SECS);
        let timeout = std::time::Duration::from_secs(ctx.cfg.decision_timeout_secs);
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("frequency reviewer shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let now = Utc::now();
            for (key, handle) in channels.handles().await {
                let review = {
                    let state = handle.lock().await;
                    if !state.frequency.due(&ctx.cfg, now) {
                        continue;
                    }
                    state.frequency.review_text(&ctx.cfg.self_name)
                };

                let messages = context::frequency_messages(&ctx.cfg, &review);
                let verdict = match invoker::review(&*llm, messages, timeout).await {
                    CallOutcome::Ok(v) => {
                        consecutive_failures = 0;
                        v
                    }
                    CallOutcome::Timeout => {
                        consecutive_failures += 1;
                        tracing::warn!(channel = %key, consecutive_failures, "frequency review timed out");
                        None
                    }
                    CallOutcome::Failed(e) => {
                        consecutive_failures += 1;
                        tracing::warn!(channel = %key, error = %e, consecutive_failures, "frequency review failed");
                        None
                    }
                };
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!(
                        "frequency reviewer: {} consecutive failures, counter reset",
                        MAX_CONSECUTIVE_FAILURES
                    );
                    consecutive_failures = 0;
                }

                let mut state = handle.lock().await;
                let before = state.frequency.current_probability;
                state.frequency.apply(verdict, &ctx.cfg, Utc::now());
                if (state.frequency.current_probability - before).abs() > f64::EPSILON {
                    tracing::info!(
                        channel = %key,
                        from = before,
                        to = state.frequency.current_probability,
                        "reply probability adjusted"
                    );
                }
            }
        }
    });
}
