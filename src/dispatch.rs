//! Backend selection: image, then deep reasoning, then the default chat
//! backend. Alternate backends fail soft and fall through; only the default
//! backend can fail the request.

use crate::backends::{self, Deadline};
use crate::intent::Intent;
use crate::main_helper::AppState;
use crate::projections::{build_chat_request, AttachmentPolicy};
use crate::types::*;

pub enum BackendOutput {
    Image(ImageResult),
    /// Open response whose body is an OpenAI-style SSE stream.
    NativeStream(reqwest::Response),
    Complete(String),
}

pub struct Dispatched {
    pub backend: BackendKind,
    pub output: BackendOutput,
}

pub struct DispatchInput<'a> {
    /// Latest user text, sent verbatim to the image backend.
    pub text: &'a str,
    /// Normalized conversation, latest user turn last.
    pub turns: &'a [ConversationTurn],
    pub system: &'a str,
    pub deadline: Deadline,
}

pub async fn dispatch(
    state: &AppState,
    intent: &Intent,
    input: &DispatchInput<'_>,
) -> Result<Dispatched> {
    let registry = &state.backends;

    if intent.flags.wants_image {
        if registry.image.is_available().await {
            match backends::generate_image(&state.client, &registry.image, input.text, input.deadline)
                .await
            {
                Ok(image) => {
                    registry.image.record_outcome(true).await;
                    return Ok(Dispatched {
                        backend: BackendKind::Image,
                        output: BackendOutput::Image(image),
                    });
                }
                Err(e) => {
                    registry.image.record_outcome(false).await;
                    tracing::warn!("[🔀] Image backend failed, falling through: {}", e.inner);
                }
            }
        } else {
            tracing::info!("[🔀] Image requested but backend unavailable, falling through");
        }
    }

    if intent.flags.needs_deep_reasoning {
        if registry.reasoning.is_available().await {
            let request = build_chat_request(
                &registry.reasoning.model,
                input.system.to_string(),
                input.turns,
                AttachmentPolicy::TextOnly,
                true,
            );
            match backends::open_stream(&state.client, &registry.reasoning, &request, input.deadline)
                .await
            {
                Ok(response) => {
                    registry.reasoning.record_outcome(true).await;
                    return Ok(Dispatched {
                        backend: BackendKind::Reasoning,
                        output: BackendOutput::NativeStream(response),
                    });
                }
                Err(e) => {
                    registry.reasoning.record_outcome(false).await;
                    tracing::warn!("[🔀] Reasoning backend failed, falling through: {}", e.inner);
                }
            }
        } else {
            tracing::info!("[🔀] Deep reasoning requested but backend unavailable, falling through");
        }
    }

    let request = build_chat_request(
        &registry.chat.model,
        input.system.to_string(),
        input.turns,
        AttachmentPolicy::Multimodal,
        false,
    );
    match backends::complete(
        &state.client,
        &registry.chat,
        &request,
        input.deadline,
        BackendKind::Chat,
    )
    .await
    {
        Ok(text) => {
            state.health.record_success();
            Ok(Dispatched {
                backend: BackendKind::Chat,
                output: BackendOutput::Complete(text),
            })
        }
        Err(e) => {
            state.health.record_failure();
            tracing::error!("[🔀] Default chat backend failed: {}", e.inner);
            Err(e)
        }
    }
}
