//! The per-message pipeline: screen, cache, gate, decide, generate,
//! promote.
//!
//! The channel lock is held only for state mutation. Model calls and the
//! typing delay run with the lock released; the `in_flight` flag keeps a
//! second round from starting in the same channel meanwhile.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::channel::{ChannelHandle, ChannelState};
use crate::cache::promote;
use crate::cognition::{CallOutcome, context, invoker, media};
use crate::config::EngineCfg;
use crate::gate;
use crate::io::output::{OutboundMessage, OutputSender};
use crate::realism::{typing, typo};
use crate::store::{ConversationStore, FallbackReason, FallbackStore};
use crate::types::{DropReason, InboundMessage, PendingMessage, SilentReason, TurnOutcome};
use attune_llm::LlmProvider;

/// Shared engine dependencies handed to every turn.
pub struct EngineCtx {
    pub cfg: Arc<EngineCfg>,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub store: Arc<dyn ConversationStore>,
    pub fallback: Arc<dyn FallbackStore>,
    pub output_tx: OutputSender,
}

/// Write one cache casualty to the fallback log. Errors are logged and
/// swallowed; a fallback failure must not end the turn.
async fn preserve(
    ctx: &EngineCtx,
    channel_key: &str,
    msg: &PendingMessage,
    reason: FallbackReason,
) {
    if msg.fallback_persisted {
        return;
    }
    if let Err(e) = ctx.fallback.record(channel_key, &msg.to_stored(), reason).await {
        tracing::warn!(
            channel = %channel_key,
            reason = reason.as_str(),
            error = %e,
            "fallback write failed"
        );
    }
}

/// Keep the turn's message cached without replying: persist it to the
/// fallback log and flag it so a later eviction will not write it twice.
async fn retain(ctx: &EngineCtx, state: &mut ChannelState, channel_key: &str, id: Uuid) {
    let entry = state.cache.iter().find(|e| e.id == id).cloned();
    if let Some(entry) = entry {
        preserve(ctx, channel_key, &entry, FallbackReason::Retained).await;
        state.cache.mark_fallback_persisted(id);
    }
}

/// Run one inbound message through the whole pipeline.
pub async fn process(ctx: &EngineCtx, handle: &ChannelHandle, msg: InboundMessage) -> TurnOutcome {
    let channel_key = msg.channel_key();

    if let Some(reason) = gate::screen(&msg, &ctx.cfg) {
        return TurnOutcome::Dropped(reason);
    }

    let content = media::linearize(&msg, &ctx.cfg, ctx.llm.as_deref()).await;
    if content.is_empty() {
        return TurnOutcome::Dropped(DropReason::EmptyContent);
    }

    let now = Utc::now();
    let pending = PendingMessage::from_user(&msg, content.clone());
    let pending_id = pending.id;

    // First lock window: cache the message, record traffic, run the gate.
    let mut state = handle.lock().await;
    let evicted = state.cache.append(pending, ctx.cfg.cache_capacity);
    for old in &evicted {
        preserve(ctx, &channel_key, old, FallbackReason::Evicted).await;
    }
    if state.attention.touch(&msg.sender_id, &msg.sender_name, now) {
        state.snapshot_dirty = true;
    }
    state.frequency.observe(&msg.sender_name, false, &content);

    let decision = {
        let mut rng = rand::thread_rng();
        gate::evaluate(
            &msg,
            &ctx.cfg,
            &state.attention,
            state.frequency.current_probability,
            &mut rng,
            now,
        )
    };

    if !decision.engage {
        retain(ctx, &mut state, &channel_key, pending_id).await;
        tracing::debug!(
            channel = %channel_key,
            probability = decision.probability,
            "draw failed, staying quiet"
        );
        return TurnOutcome::Silent(SilentReason::FailedDraw);
    }

    if state.in_flight {
        retain(ctx, &mut state, &channel_key, pending_id).await;
        tracing::debug!(channel = %channel_key, "round already in flight, message cached");
        return TurnOutcome::Silent(SilentReason::InFlight);
    }

    let Some(llm) = ctx.llm.clone() else {
        retain(ctx, &mut state, &channel_key, pending_id).await;
        tracing::debug!(channel = %channel_key, "no model configured, staying quiet");
        return TurnOutcome::Silent(SilentReason::DecisionFailed);
    };

    state.in_flight = true;
    let pending_snapshot: Vec<PendingMessage> = state.cache.iter().cloned().collect();
    let sender_scores = state.attention.scores(&msg.sender_id, &ctx.cfg, now);
    drop(state);

    // Model phase, lock released. The cache can only grow while the
    // in_flight flag is set; promotion later picks up any newcomers.
    let history_limit = match ctx.cfg.max_context_messages {
        n if n < 0 => usize::MAX,
        n => n as usize,
    };
    let recent = match ctx.store.recent(&channel_key, history_limit).await {
        Ok(recent) => recent,
        Err(e) => {
            tracing::warn!(
                channel = %channel_key,
                error = %e,
                "context fetch failed, continuing without history"
            );
            Vec::new()
        }
    };

    let transcript = context::render_transcript(&recent, pending_snapshot.iter());
    let verdict = invoker::decide(
        &*llm,
        context::decision_messages(&ctx.cfg, &transcript),
        Duration::from_secs(ctx.cfg.decision_timeout_secs),
    )
    .await;

    let declined = match verdict {
        CallOutcome::Ok(true) => None,
        CallOutcome::Ok(false) => Some(SilentReason::DeclinedByModel),
        CallOutcome::Timeout => Some(SilentReason::DecisionTimeout),
        CallOutcome::Failed(e) => {
            tracing::warn!(channel = %channel_key, error = %e, "reply decision failed");
            Some(SilentReason::DecisionFailed)
        }
    };
    if let Some(reason) = declined {
        let mut state = handle.lock().await;
        state.in_flight = false;
        retain(ctx, &mut state, &channel_key, pending_id).await;
        return TurnOutcome::Silent(reason);
    }

    let generated = invoker::generate(
        &*llm,
        context::reply_messages(
            &ctx.cfg,
            &recent,
            &pending_snapshot,
            &msg.sender_name,
            sender_scores,
        ),
        Duration::from_secs(ctx.cfg.generation_timeout_secs),
    )
    .await;

    let reply_text = match generated {
        CallOutcome::Ok(text) => text,
        CallOutcome::Timeout => {
            let mut state = handle.lock().await;
            state.in_flight = false;
            retain(ctx, &mut state, &channel_key, pending_id).await;
            return TurnOutcome::Silent(SilentReason::GenerationTimeout);
        }
        CallOutcome::Failed(e) => {
            tracing::warn!(channel = %channel_key, error = %e, "reply generation failed");
            let mut state = handle.lock().await;
            state.in_flight = false;
            retain(ctx, &mut state, &channel_key, pending_id).await;
            return TurnOutcome::Silent(SilentReason::GenerationFailed);
        }
    };

    // Humanize and pace the delivery.
    let (reply_text, delay) = {
        let mut rng = rand::thread_rng();
        let text = typo::humanize(&reply_text, &ctx.cfg, &mut rng);
        let delay = typing::delay(&text, &ctx.cfg, &mut rng);
        (text, delay)
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    if let Err(e) = ctx.output_tx.send(OutboundMessage::replying_to(&msg, reply_text.clone())).await
    {
        tracing::error!(channel = %channel_key, error = %e, "output channel closed");
    }

    let reply_pending =
        PendingMessage::from_assistant(&ctx.cfg.self_id, &ctx.cfg.self_name, reply_text.clone());

    let mut state = handle.lock().await;
    state.in_flight = false;
    state.frequency.observe(&ctx.cfg.self_name, true, &reply_text);
    match promote(&mut state.cache, &reply_pending, &recent, ctx.store.as_ref(), &channel_key).await
    {
        Ok(report) => {
            state.attention.reinforce(&msg.sender_id, &msg.sender_name, &ctx.cfg, Utc::now());
            state.snapshot_dirty = true;
            tracing::debug!(
                channel = %channel_key,
                promoted = report.promoted,
                deduped = report.deduped,
                "reply promoted"
            );
        }
        Err(e) => {
            tracing::error!(channel = %channel_key, error = %e, "promotion failed, reply kept in cache");
            let evicted = state.cache.append(reply_pending, ctx.cfg.cache_capacity);
            for old in &evicted {
                preserve(ctx, &channel_key, old, FallbackReason::Evicted).await;
            }
        }
    }

    TurnOutcome::Replied { content: reply_text }
}
