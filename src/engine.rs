//! Per-request pipeline.
//!
//! Everything that can reject the request (authentication, validation, the
//! default backend failing) happens in [`GatewayEngine::prepare`], before any
//! byte of the event stream is written. [`GatewayEngine::deliver`] then only
//! produces frames and always ends with the terminator.

use crate::auth;
use crate::backends::Deadline;
use crate::db;
use crate::dispatch::{self, BackendOutput, DispatchInput, Dispatched};
use crate::intent::{classify, Intent};
use crate::main_helper::AppState;
use crate::projections::{normalize_turns, system_instructions, InstructionContext};
use crate::protocol::{ContentWriter, SseSender};
use crate::sidechannel::{self, SideChannelJob};
use crate::streaming::StreamAssembler;
use crate::suggestion::extract_redirect;
use crate::types::*;
use axum::http::HeaderMap;
use std::time::Duration;

pub enum Plan {
    /// Gate answered on its own; no backend was called.
    ShortCircuit(&'static str),
    Deliver {
        dispatched: Dispatched,
        turns: Vec<ConversationTurn>,
    },
}

pub struct Prepared {
    pub request_id: RequestId,
    pub request: ChatRequest,
    pub deadline: Deadline,
    pub plan: Plan,
}

impl Prepared {
    pub fn outcome(&self) -> &'static str {
        match &self.plan {
            Plan::ShortCircuit(_) => "short_circuit",
            Plan::Deliver { dispatched, .. } => match dispatched.output {
                BackendOutput::Image(_) => "image",
                BackendOutput::NativeStream(_) => "stream",
                BackendOutput::Complete(_) => "complete",
            },
        }
    }
}

pub struct GatewayEngine;

impl GatewayEngine {
    pub async fn prepare(
        state: &AppState,
        headers: &HeaderMap,
        request: ChatRequest,
        request_id: RequestId,
    ) -> Result<Prepared> {
        request.validate()?;
        let subject = auth::authenticate(headers, &request.subject_id, &state.db).await?;
        let deadline = Deadline::from_headers(
            headers,
            Duration::from_secs(state.args.request_timeout_secs),
        );

        let creator =
            auth::creator_authenticated(&request.turns, state.creator_passphrase.as_deref());
        let latest = request.latest_user_text();
        let decision =
            auth::authorize(latest, &subject, creator, &state.keywords, &state.db).await?;

        if let Some(text) = decision.short_circuit_text() {
            return Ok(Prepared {
                request_id,
                request,
                deadline,
                plan: Plan::ShortCircuit(text),
            });
        }

        let intent = classify(latest, &state.keywords);
        let system = Self::instructions(state, &request, &intent).await;
        let turns = normalize_turns(&request.turns, &request.files);

        let dispatched = dispatch::dispatch(
            state,
            &intent,
            &DispatchInput {
                text: latest,
                turns: &turns,
                system: &system,
                deadline,
            },
        )
        .await?;

        tracing::info!(
            "[🔀] {} routed to {} backend (workflow={})",
            request_id.short(),
            dispatched.backend,
            intent.workflow.as_str()
        );

        Ok(Prepared {
            request_id,
            request,
            deadline,
            plan: Plan::Deliver { dispatched, turns },
        })
    }

    async fn instructions(state: &AppState, request: &ChatRequest, intent: &Intent) -> String {
        let memory = match db::memory_facts_for(&request.subject_id, &state.db).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Failed to load memory facts: {}", e.inner);
                Vec::new()
            }
        };
        system_instructions(&InstructionContext {
            intent,
            project_context: request.project_context.as_ref(),
            memory: &memory,
        })
    }

    /// Writes every frame for a prepared request and terminates the stream.
    pub async fn deliver(state: &AppState, prepared: Prepared, tx: SseSender) {
        let Prepared {
            request_id,
            request,
            deadline,
            plan,
        } = prepared;
        let mut writer = ContentWriter::open(tx, request_id.clone());

        let (dispatched, turns) = match plan {
            Plan::ShortCircuit(text) => {
                writer.reply_and_close(text).await;
                return;
            }
            Plan::Deliver { dispatched, turns } => (dispatched, turns),
        };

        let assembler = StreamAssembler::new(state.args.delta_chunk_chars, deadline);
        let assembled = match dispatched.output {
            BackendOutput::Image(image) => {
                if writer.image(&image).await {
                    writer.content(&image.caption).await;
                }
                let connected = !writer.is_closed();
                writer.finish(None).await.terminate().await;
                // Image answers carry no title; memory is stored off-stream.
                if connected {
                    sidechannel::persist_memory(
                        &request.subject_id,
                        request.latest_user_text(),
                        &state.db,
                    )
                    .await;
                }
                return;
            }
            BackendOutput::NativeStream(response) => {
                assembler.forward_native(response, &mut writer).await
            }
            BackendOutput::Complete(text) => assembler.forward_complete(&text, &mut writer).await,
        };

        if !assembled.client_connected {
            tracing::info!(
                "[⚙️  -> 🖥️ ] {} disconnected mid-answer, skipping side channel",
                request_id.short()
            );
            return;
        }

        let redirect = extract_redirect(&assembled.text);
        let side = writer.finish(redirect).await;
        sidechannel::run(
            state,
            SideChannelJob {
                subject: &request.subject_id,
                latest_text: request.latest_user_text(),
                turns: &turns,
                prior_turns: request.prior_turn_count(),
                deadline,
            },
            side,
        )
        .await;
    }
}
