//! Orchestrator Loop (C9).
//!
//! Generalizes `crates/gateway/src/runtime/turn.rs`'s `run_turn_inner` tool
//! loop into `process_conversation`, matching the distilled pseudocode:
//! each turn rebuilds context (`force_refresh` from the second turn on,
//! since a tool output was just submitted), streams a completion, and
//! either finalizes (no tool calls), recurses (platform tools only), or
//! hands off to the consumer (any non-platform tool in the batch).

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use ic_context::{build_system_message, prepend_system_message, AssistantProfile, ContextOptions};
use ic_domain::error::{Error, Result};
use ic_domain::stream::{CanonicalEvent, RunPhase};
use ic_domain::tool::{is_platform_tool, Message, ToolCall};
use ic_providers::normalizer::Normalizer;
use ic_providers::traits::{ChatRequest, LlmProvider, RawDelta};

use ic_domain::config::AgentLimits;

use crate::cancel::{CancelMap, CancelToken};
use crate::delegate;
use crate::persistence::Persistence;
use crate::tools::consumer::{ConsumerDispatcher, ToolCallManifest};
use crate::tools::platform;
use crate::tools::router::generate_call_id;

const DEFAULT_MAX_TURNS: usize = 10;

/// Adapts [`Persistence`] to [`ic_cache::history::ColdLoader`] so the
/// message cache can cold-load through the same boundary the rest of the
/// orchestrator uses.
pub struct PersistenceLoader<'a>(pub &'a dyn Persistence);

#[async_trait]
impl ic_cache::history::ColdLoader for PersistenceLoader<'_> {
    async fn get_formatted_messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        self.0.get_formatted_messages(thread_id).await
    }
}

/// One turn's dependencies. Borrowed for the lifetime of a single
/// `process_conversation` call — nothing here is shared mutable state
/// across concurrent runs, per the distilled concurrency model.
pub struct TurnDeps<'a> {
    pub persistence: &'a dyn Persistence,
    pub provider: &'a dyn LlmProvider,
    pub cache: &'a ic_cache::history::MessageCache,
    pub fanout: &'a ic_cache::fanout::StreamFanOut,
    /// Registry used to cascade cancellation into delegated child runs
    /// (C11). A turn that never calls `delegate_research_task` never
    /// touches this beyond the no-op default.
    pub cancel_map: &'a CancelMap,
    /// Token-budget truncation (C4). `None` skips truncation even when
    /// `context_options.trunk` is set — a deployment that never configured
    /// a tokenizer degrades to untruncated context rather than failing.
    pub truncator: Option<&'a ic_context::Truncator>,
}

pub struct TurnInput {
    pub run_id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub model: Option<String>,
    pub context_options: ContextOptions,
    pub max_turns: usize,
    /// Nesting depth of this run within a delegation tree; 0 for a
    /// top-level, user-initiated run. Threaded into any
    /// `delegate_research_task` call this turn makes so the sub-orchestrator
    /// can refuse once `agent_limits.max_depth` is reached.
    pub depth: u32,
    pub agent_limits: AgentLimits,
}

impl TurnInput {
    pub fn new(run_id: impl Into<String>, thread_id: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id: thread_id.into(),
            assistant_id: assistant_id.into(),
            model: None,
            context_options: ContextOptions::default(),
            max_turns: DEFAULT_MAX_TURNS,
            depth: 0,
            agent_limits: AgentLimits::default(),
        }
    }
}

/// Outcome of one `process_conversation` invocation.
#[derive(Debug)]
pub enum TurnOutcome {
    /// No tool calls were produced — the run is complete.
    Completed { content: String },
    /// At least one non-platform tool was invoked; the caller must submit
    /// its results out-of-band before the conversation can continue.
    HandedToConsumer { manifests: Vec<ToolCallManifest> },
    /// The turn loop observed cancellation mid-stream.
    Cancelled,
    /// `max_turns` platform-only tool round-trips were exhausted without
    /// producing a final answer.
    LoopLimitReached,
}

/// Drive the conversation to completion, to a consumer handoff, or to the
/// turn-loop limit — whichever comes first.
pub async fn process_conversation(deps: &TurnDeps<'_>, cancel: &CancelToken, input: TurnInput) -> Result<TurnOutcome> {
    let loader = PersistenceLoader(deps.persistence);
    let consumer = ConsumerDispatcher::default();

    for turn_idx in 0..input.max_turns.max(1) {
        if cancel.is_cancelled() {
            deps.persistence
                .update_run_status(&input.run_id, ic_domain::run::RunStatus::Cancelled)
                .await?;
            return Ok(TurnOutcome::Cancelled);
        }

        let force_refresh = turn_idx > 0;
        let history = deps.cache.get(&input.thread_id, &loader, force_refresh).await?;
        let profile: AssistantProfile = deps.persistence.retrieve_assistant(&input.assistant_id).await?;
        let system = build_system_message(&profile, input.context_options);
        let mut messages = prepend_system_message(system.message, history);
        if input.context_options.trunk {
            if let Some(truncator) = deps.truncator {
                let (truncated, _report) = truncator.truncate(messages);
                messages = truncated;
            }
        }
        let tool_defs = system.tool_schemas.unwrap_or_default();

        let req = ChatRequest {
            messages,
            tools: tool_defs,
            temperature: None,
            max_tokens: None,
            json_mode: false,
            model: input.model.clone(),
        };

        let mut stream = deps.provider.chat_stream(&req).await?;
        let mut normalizer = Normalizer::new(input.run_id.clone());
        let mut content_buf = String::new();
        let mut batch: Vec<ToolCall> = Vec::new();
        let mut decision: Option<serde_json::Value> = None;

        while let Some(delta) = stream.next().await {
            if cancel.is_cancelled() {
                deps.persistence
                    .update_run_status(&input.run_id, ic_domain::run::RunStatus::Cancelled)
                    .await?;
                return Ok(TurnOutcome::Cancelled);
            }
            let delta = delta?;
            let events = normalizer.feed(delta);
            for event in events {
                handle_event(deps, &input, event, &mut content_buf, &mut batch, &mut decision).await?;
            }
        }
        for event in normalizer.flush() {
            handle_event(deps, &input, event, &mut content_buf, &mut batch, &mut decision).await?;
        }

        if batch.is_empty() {
            deps.persistence
                .create_message(&input.thread_id, Some(&input.run_id), Message::assistant(content_buf.clone()))
                .await?;
            deps.persistence
                .update_run_status(&input.run_id, ic_domain::run::RunStatus::Completed)
                .await?;
            return Ok(TurnOutcome::Completed { content: content_buf });
        }

        deps.persistence
            .create_message(
                &input.thread_id,
                Some(&input.run_id),
                Message::assistant_tool_calls(&batch),
            )
            .await?;
        deps.persistence
            .update_run_status(&input.run_id, ic_domain::run::RunStatus::PendingAction)
            .await?;

        let has_consumer = batch.iter().any(|c| !is_platform_tool(&c.tool_name));
        let mut consumer_calls = Vec::new();
        let mut decision_slot = decision;
        for call in batch {
            if call.tool_name == "record_tool_decision" {
                continue;
            }
            if call.tool_name == "delegate_research_task" {
                delegate::dispatch(deps, &input, &call).await;
            } else if is_platform_tool(&call.tool_name) {
                platform::dispatch(deps.persistence, &input.run_id, &input.thread_id, &call, decision_slot.take()).await;
            } else {
                consumer_calls.push(call);
            }
        }

        if has_consumer {
            let manifests = consumer.open(deps.persistence, &input.run_id, &consumer_calls).await?;
            match consumer.wait_for_completion(deps.persistence, &input.run_id).await {
                Ok(()) => {
                    deps.fanout
                        .publish(
                            &input.run_id,
                            &CanonicalEvent::Status {
                                status: RunPhase::ToolOutputReceived,
                                run_id: input.run_id.clone(),
                            },
                        )
                        .await;
                    return Ok(TurnOutcome::HandedToConsumer { manifests });
                }
                Err(Error::CancellationRequested) => return Ok(TurnOutcome::Cancelled),
                Err(err) => return Err(err),
            }
        }
    }

    deps.fanout
        .publish(
            &input.run_id,
            &CanonicalEvent::Error {
                message: "tool loop limit reached".into(),
            },
        )
        .await;
    Ok(TurnOutcome::LoopLimitReached)
}

async fn handle_event(
    deps: &TurnDeps<'_>,
    input: &TurnInput,
    event: CanonicalEvent,
    content_buf: &mut String,
    batch: &mut Vec<ToolCall>,
    decision: &mut Option<serde_json::Value>,
) -> Result<()> {
    match &event {
        CanonicalEvent::Content { text } => content_buf.push_str(text),
        CanonicalEvent::ToolCall { name, arguments } => {
            if name == "record_tool_decision" {
                *decision = arguments.get("decision").cloned().or_else(|| Some(arguments.clone()));
            }
            batch.push(ToolCall {
                call_id: generate_call_id(),
                tool_name: name.clone(),
                arguments: arguments.clone(),
            });
        }
        CanonicalEvent::Error { message } => {
            deps.fanout.publish(&input.run_id, &event).await;
            return Err(Error::Upstream {
                provider: deps.provider_id_for_error(),
                message: message.clone(),
            });
        }
        CanonicalEvent::Status { status: RunPhase::Started, .. } => {
            deps.persistence
                .update_run_status(&input.run_id, ic_domain::run::RunStatus::InProgress)
                .await?;
        }
        _ => {}
    }
    deps.fanout.publish(&input.run_id, &event).await;
    Ok(())
}

impl TurnDeps<'_> {
    fn provider_id_for_error(&self) -> String {
        self.provider.provider_id().to_string()
    }
}

/// Thread an explicit `Arc<dyn Persistence>` through a `CancellationMonitor`
/// for the duration of one call. Convenience wrapper so call sites don't
/// need to construct the monitor by hand.
pub async fn process_conversation_with_monitor(
    deps: &TurnDeps<'_>,
    persistence_arc: Arc<dyn Persistence>,
    cancel: CancelToken,
    input: TurnInput,
) -> Result<TurnOutcome> {
    let run_id = input.run_id.clone();
    let _monitor = crate::cancel::CancellationMonitor::spawn(persistence_arc, run_id, cancel.clone());
    process_conversation(deps, &cancel, input).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::InMemoryPersistence;
    use ic_cache::fanout::StreamFanOut;
    use ic_cache::history::MessageCache;
    use ic_domain::capability::LlmCapabilities;
    use ic_domain::run::Run;
    use ic_domain::stream::BoxStream;
    use ic_providers::traits::{ChatResponse, EmbeddingsRequest, EmbeddingsResponse};

    struct StubProvider {
        deltas: Vec<RawDelta>,
        caps: LlmCapabilities,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            unimplemented!("stub only streams")
        }

        async fn chat_stream(&self, _req: &ChatRequest) -> Result<BoxStream<'static, Result<RawDelta>>> {
            let deltas = self.deltas.clone();
            Ok(Box::pin(futures_util::stream::iter(deltas.into_iter().map(Ok))))
        }

        async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
            unimplemented!()
        }

        fn capabilities(&self) -> &LlmCapabilities {
            &self.caps
        }

        fn provider_id(&self) -> &str {
            "stub"
        }
    }

    /// A provider that yields a different delta batch on each successive
    /// `chat_stream` call — one stub per turn, for turns that recurse.
    struct SequencedProvider {
        turns: parking_lot::Mutex<std::collections::VecDeque<Vec<RawDelta>>>,
        caps: LlmCapabilities,
    }

    #[async_trait]
    impl LlmProvider for SequencedProvider {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
            unimplemented!("stub only streams")
        }

        async fn chat_stream(&self, _req: &ChatRequest) -> Result<BoxStream<'static, Result<RawDelta>>> {
            let deltas = self.turns.lock().pop_front().unwrap_or_default();
            Ok(Box::pin(futures_util::stream::iter(deltas.into_iter().map(Ok))))
        }

        async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
            unimplemented!()
        }

        fn capabilities(&self) -> &LlmCapabilities {
            &self.caps
        }

        fn provider_id(&self) -> &str {
            "stub"
        }
    }

    async fn setup() -> (InMemoryPersistence, MessageCache, StreamFanOut) {
        let store = InMemoryPersistence::new();
        store
            .create_run(Run::new("run_1", "asst_1", "thread_1", "user_1", "model"))
            .await
            .unwrap();
        store.seed_assistant(
            "asst_1",
            AssistantProfile {
                instructions: "be helpful".into(),
                tools: vec![],
            },
        );
        (store, MessageCache::disabled(), StreamFanOut::disabled())
    }

    #[tokio::test]
    async fn completes_turn_with_no_tool_calls() {
        let (store, cache, fanout) = setup().await;
        let provider = StubProvider {
            deltas: vec![
                RawDelta::Token { text: "hello".into() },
                RawDelta::Done {
                    usage: None,
                    finish_reason: Some("stop".into()),
                },
            ],
            caps: LlmCapabilities::default(),
        };
        let cancel_map = CancelMap::new();
        let deps = TurnDeps {
            persistence: &store,
            provider: &provider,
            cache: &cache,
            fanout: &fanout,
            cancel_map: &cancel_map,
            truncator: None,
        };
        let cancel = CancelToken::new();
        let outcome = process_conversation(&deps, &cancel, TurnInput::new("run_1", "thread_1", "asst_1"))
            .await
            .unwrap();
        match outcome {
            TurnOutcome::Completed { content } => assert_eq!(content, "hello"),
            other => panic!("expected Completed, got {other:?}"),
        }
        let run = store.retrieve_run("run_1").await.unwrap();
        assert_eq!(run.status, ic_domain::run::RunStatus::Completed);
    }

    #[tokio::test]
    async fn hands_off_to_consumer_for_non_platform_tool() {
        let (store, cache, fanout) = setup().await;
        let store = std::sync::Arc::new(store);
        let provider = StubProvider {
            deltas: vec![
                RawDelta::ToolCallFinished {
                    call_id: "c1".into(),
                    tool_name: "get_weather".into(),
                    arguments: "{\"city\": \"nyc\"}".into(),
                },
                RawDelta::Done {
                    usage: None,
                    finish_reason: Some("tool_calls".into()),
                },
            ],
            caps: LlmCapabilities::default(),
        };
        let cancel_map = CancelMap::new();
        let deps = TurnDeps {
            persistence: store.as_ref(),
            provider: &provider,
            cache: &cache,
            fanout: &fanout,
            cancel_map: &cancel_map,
            truncator: None,
        };
        let cancel = CancelToken::new();

        // The dispatcher's poll loop only unblocks once an external actor
        // resolves the pending Action, so drive that side out-of-band —
        // mirroring how a real consumer would call `submit_tool_output` /
        // `update_action` after `process_conversation` returns a manifest.
        let bg_store = store.clone();
        tokio::spawn(async move {
            loop {
                let pending = bg_store.get_pending_actions("run_1").await.unwrap();
                if let Some(action) = pending.first() {
                    bg_store
                        .update_action(&action.id, ic_domain::run::ActionStatus::Completed, Some("72f and sunny".into()))
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });

        let outcome = process_conversation(&deps, &cancel, TurnInput::new("run_1", "thread_1", "asst_1"))
            .await
            .unwrap();
        match outcome {
            TurnOutcome::HandedToConsumer { manifests } => {
                assert_eq!(manifests.len(), 1);
                assert_eq!(manifests[0].tool, "get_weather");
            }
            other => panic!("expected HandedToConsumer, got {other:?}"),
        }
        let run = store.retrieve_run("run_1").await.unwrap();
        assert_eq!(run.status, ic_domain::run::RunStatus::PendingAction);
    }

    #[tokio::test]
    async fn tool_call_batch_persists_structured_assistant_message_before_dispatch() {
        let (store, cache, fanout) = setup().await;
        let store = std::sync::Arc::new(store);
        let provider = StubProvider {
            deltas: vec![
                RawDelta::ToolCallFinished {
                    call_id: "c1".into(),
                    tool_name: "get_weather".into(),
                    arguments: "{\"city\": \"nyc\"}".into(),
                },
                RawDelta::Done {
                    usage: None,
                    finish_reason: Some("tool_calls".into()),
                },
            ],
            caps: LlmCapabilities::default(),
        };
        let cancel_map = CancelMap::new();
        let deps = TurnDeps {
            persistence: store.as_ref(),
            provider: &provider,
            cache: &cache,
            fanout: &fanout,
            cancel_map: &cancel_map,
            truncator: None,
        };
        let cancel = CancelToken::new();

        let bg_store = store.clone();
        tokio::spawn(async move {
            loop {
                let pending = bg_store.get_pending_actions("run_1").await.unwrap();
                if let Some(action) = pending.first() {
                    bg_store
                        .update_action(&action.id, ic_domain::run::ActionStatus::Completed, Some("sunny".into()))
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });

        process_conversation(&deps, &cancel, TurnInput::new("run_1", "thread_1", "asst_1"))
            .await
            .unwrap();

        let history = store.get_formatted_messages("thread_1").await.unwrap();
        let tool_call_msg = history
            .iter()
            .find(|m| m.role == ic_domain::tool::Role::Assistant)
            .expect("assistant tool-call message persisted");
        assert_eq!(tool_call_msg.content.extract_all_text(), "");
        match &tool_call_msg.content {
            ic_domain::tool::MessageContent::Parts(parts) => {
                assert!(parts
                    .iter()
                    .any(|p| matches!(p, ic_domain::tool::ContentPart::ToolUse { name, .. } if name == "get_weather")));
            }
            other => panic!("expected Parts, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn platform_only_batch_moves_run_to_pending_action_before_recursing() {
        let (store, cache, fanout) = setup().await;
        let provider = SequencedProvider {
            turns: parking_lot::Mutex::new(
                vec![
                    vec![
                        RawDelta::ToolCallFinished {
                            call_id: "c1".into(),
                            tool_name: "read_scratchpad".into(),
                            arguments: "{}".into(),
                        },
                        RawDelta::Done {
                            usage: None,
                            finish_reason: Some("tool_calls".into()),
                        },
                    ],
                    vec![
                        RawDelta::Token { text: "done".into() },
                        RawDelta::Done {
                            usage: None,
                            finish_reason: Some("stop".into()),
                        },
                    ],
                ]
                .into(),
            ),
            caps: LlmCapabilities::default(),
        };
        let cancel_map = CancelMap::new();
        let deps = TurnDeps {
            persistence: &store,
            provider: &provider,
            cache: &cache,
            fanout: &fanout,
            cancel_map: &cancel_map,
            truncator: None,
        };
        let cancel = CancelToken::new();
        let outcome = process_conversation(&deps, &cancel, TurnInput::new("run_1", "thread_1", "asst_1"))
            .await
            .unwrap();
        match outcome {
            TurnOutcome::Completed { content } => assert_eq!(content, "done"),
            other => panic!("expected Completed, got {other:?}"),
        }

        let history = store.get_formatted_messages("thread_1").await.unwrap();
        let tool_call_msg = history
            .iter()
            .find(|m| {
                m.role == ic_domain::tool::Role::Assistant
                    && matches!(&m.content, ic_domain::tool::MessageContent::Parts(_))
            })
            .expect("the platform-only turn's tool-call message was persisted");
        assert_eq!(tool_call_msg.content.extract_all_text(), "");

        // The run reached `pending_action` en route to its eventual
        // `completed` status, even though no consumer tool was involved.
        let run = store.retrieve_run("run_1").await.unwrap();
        assert_eq!(run.status, ic_domain::run::RunStatus::Completed);
    }

    #[tokio::test]
    async fn cancellation_checked_before_first_stream_is_consumed() {
        let (store, cache, fanout) = setup().await;
        let provider = StubProvider {
            deltas: vec![RawDelta::Done {
                usage: None,
                finish_reason: None,
            }],
            caps: LlmCapabilities::default(),
        };
        let cancel_map = CancelMap::new();
        let deps = TurnDeps {
            persistence: &store,
            provider: &provider,
            cache: &cache,
            fanout: &fanout,
            cancel_map: &cancel_map,
            truncator: None,
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = process_conversation(&deps, &cancel, TurnInput::new("run_1", "thread_1", "asst_1"))
            .await
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::Cancelled));
    }
}
