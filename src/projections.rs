//! Projects the gateway's conversation model onto upstream request bodies.

use crate::constants::*;
use crate::intent::Intent;
use crate::specs::openai::*;
use crate::types::*;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// How attachments are re-encoded for a given backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentPolicy {
    /// Images become `image_url` parts, text files are inlined.
    Multimodal,
    /// Everything becomes text; images are reduced to placeholders.
    TextOnly,
}

const TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
    "application/csv",
    "application/x-sh",
    "application/javascript",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "csv", "json", "xml", "yaml", "yml", "toml", "c", "h", "cpp", "hpp", "ino", "py",
    "rs", "js", "ts", "v", "sv", "vhd", "cir", "sp", "net", "kicad_sch", "kicad_pcb",
];

pub fn classify_attachment(att: &Attachment) -> FileKind {
    let mime = att.mime_type.to_lowercase();
    if mime.starts_with("image/") {
        return FileKind::Image;
    }

    let extension = att
        .name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();
    let textual_hint = mime.starts_with("text/")
        || TEXT_MIME_TYPES.contains(&mime.as_str())
        || TEXT_EXTENSIONS.contains(&extension.as_str());

    if textual_hint && std::str::from_utf8(&att.payload).is_ok() {
        FileKind::Text
    } else {
        FileKind::Opaque
    }
}

fn opaque_placeholder(att: &Attachment) -> String {
    format!(
        "[Attached file: {} ({}, {} bytes); binary content not shown]",
        att.name,
        att.mime_type,
        att.payload.len()
    )
}

fn inline_text(att: &Attachment) -> String {
    let body = String::from_utf8_lossy(&att.payload);
    format!("[File: {}]\n```\n{}\n```", att.name, body)
}

fn encode_attachment(att: &Attachment, policy: AttachmentPolicy) -> OpenAiContentPart {
    match (classify_attachment(att), policy) {
        (FileKind::Image, AttachmentPolicy::Multimodal) => OpenAiContentPart::ImageUrl {
            image_url: OpenAiImageUrl {
                url: format!("data:{};base64,{}", att.mime_type, STANDARD.encode(&att.payload)),
            },
        },
        (FileKind::Image, AttachmentPolicy::TextOnly) => OpenAiContentPart::Text {
            text: format!(
                "[Attached image: {} ({} bytes); not visible to this model]",
                att.name,
                att.payload.len()
            ),
        },
        (FileKind::Text, _) => OpenAiContentPart::Text {
            text: inline_text(att),
        },
        (FileKind::Opaque, _) => OpenAiContentPart::Text {
            text: opaque_placeholder(att),
        },
    }
}

/// Merges consecutive same-role turns so strictly alternating backends accept
/// the history. Request-level files are attached to the latest user turn.
pub fn normalize_turns(turns: &[ConversationTurn], files: &[Attachment]) -> Vec<ConversationTurn> {
    let mut merged: Vec<ConversationTurn> = Vec::with_capacity(turns.len());
    for turn in turns {
        match merged.last_mut() {
            Some(prev) if prev.role == turn.role => {
                if !turn.content.is_empty() {
                    if !prev.content.is_empty() {
                        prev.content.push_str("\n\n");
                    }
                    prev.content.push_str(&turn.content);
                }
                prev.attachments.extend(turn.attachments.iter().cloned());
            }
            _ => merged.push(turn.clone()),
        }
    }

    if !files.is_empty() {
        if let Some(last_user) = merged.iter_mut().rev().find(|t| t.role == Role::User) {
            last_user.attachments.extend(files.iter().cloned());
        }
    }
    merged
}

fn project_turn(turn: &ConversationTurn, policy: AttachmentPolicy) -> OpenAiMessage {
    match turn.role {
        Role::Assistant => OpenAiMessage::Assistant {
            content: turn.content.clone(),
        },
        Role::User if turn.attachments.is_empty() => OpenAiMessage::User {
            content: OpenAiContent::String(turn.content.clone()),
        },
        Role::User => {
            let mut parts = vec![OpenAiContentPart::Text {
                text: turn.content.clone(),
            }];
            parts.extend(turn.attachments.iter().map(|a| encode_attachment(a, policy)));
            OpenAiMessage::User {
                content: OpenAiContent::Parts(parts),
            }
        }
    }
}

/// Everything that shapes the system message for one request.
pub struct InstructionContext<'a> {
    pub intent: &'a Intent,
    pub project_context: Option<&'a serde_json::Value>,
    pub memory: &'a [MemoryFact],
}

pub fn system_instructions(ctx: &InstructionContext<'_>) -> String {
    let mut sections = vec![BASE_SYSTEM_PROMPT.to_string()];

    sections.push(if ctx.intent.flags.is_research_mode {
        RESEARCH_MODE_PROMPT.to_string()
    } else {
        CASUAL_MODE_PROMPT.to_string()
    });

    if let Some(hint) = ctx.intent.workflow.system_hint() {
        sections.push(hint.to_string());
    }

    if !ctx.memory.is_empty() {
        let facts = ctx
            .memory
            .iter()
            .map(|f| format!("- {}: {}", f.key, f.value))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("Known facts about the user:\n{}", facts));
    }

    if let Some(project) = ctx.project_context {
        if !project.is_null() {
            sections.push(format!("Current project context:\n{}", project));
        }
    }

    sections.push(REDIRECT_INSTRUCTIONS.to_string());
    sections.join("\n\n")
}

pub fn build_chat_request(
    model: &str,
    system: String,
    turns: &[ConversationTurn],
    policy: AttachmentPolicy,
    stream: bool,
) -> OpenAiRequest {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(OpenAiMessage::System { content: system });
    messages.extend(turns.iter().map(|t| project_turn(t, policy)));

    OpenAiRequest {
        model: model.to_string(),
        messages,
        stream: if stream { Some(true) } else { None },
        temperature: None,
        max_tokens: None,
    }
}

/// Condensed transcript for the title call: first few turns, each truncated.
pub fn build_title_request(model: &str, turns: &[ConversationTurn]) -> OpenAiRequest {
    let transcript = turns
        .iter()
        .take(TITLE_TRANSCRIPT_TURNS)
        .map(|t| {
            let speaker = match t.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!(
                "{}: {}",
                speaker,
                crate::text::prefix_chars(&t.content, TITLE_TRANSCRIPT_CHARS_PER_TURN)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    OpenAiRequest {
        model: model.to_string(),
        messages: vec![
            OpenAiMessage::System {
                content: TITLE_SYSTEM_PROMPT.to_string(),
            },
            OpenAiMessage::User {
                content: OpenAiContent::String(transcript),
            },
        ],
        stream: None,
        temperature: Some(0.3),
        max_tokens: Some(16),
    }
}
