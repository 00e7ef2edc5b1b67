//! Work that follows the primary answer: conversation title derivation and
//! memory-fact extraction. Neither can fail the request.

use crate::backends::{self, Deadline};
use crate::constants::MEMORY_VALUE_MAX_CHARS;
use crate::db::{self, DbPool};
use crate::main_helper::AppState;
use crate::projections::build_title_request;
use crate::protocol::SideChannelWriter;
use crate::types::*;
use lazy_static::lazy_static;
use regex::Regex;

/// A value-capturing memory pattern. `key` may reference a second capture
/// group via `{}`.
struct MemoryPattern {
    key: &'static str,
    regex: Regex,
}

fn pattern(key: &'static str, re: &str) -> MemoryPattern {
    match Regex::new(re) {
        Ok(regex) => MemoryPattern { key, regex },
        Err(e) => panic!("Invalid memory pattern for {}: {}", key, e),
    }
}

const CLAUSE: &str = r"([^.,;!?\n]+)";

lazy_static! {
    static ref MEMORY_PATTERNS: Vec<MemoryPattern> = vec![
        pattern(
            "name",
            r"\b(?i:my name is)\s+(\p{L}[\p{L}'\-]*(?:\s+\p{Lu}[\p{L}'\-]*)?)"
        ),
        // Only a capitalized word counts after "call me" ("call me back" is not a name).
        pattern(
            "name",
            r"\b(?i:call me)\s+(\p{Lu}[\p{L}'\-]*(?:\s+\p{Lu}[\p{L}'\-]*)?)"
        ),
        pattern(
            "location",
            &format!(r"\b(?i:i am from|i[’']m from|i live in|i am based in|i[’']m based in)\s+{}", CLAUSE)
        ),
        pattern("employer", &format!(r"\b(?i:i work at|i work for)\s+{}", CLAUSE)),
        pattern(
            "occupation",
            &format!(r"\b(?i:i work as an?|my job is|i[’']m employed as an?)\s+{}", CLAUSE)
        ),
        pattern(
            "field_of_study",
            &format!(r"\b(?i:i study|i am studying|i[’']m studying|i major in)\s+{}", CLAUSE)
        ),
        pattern(
            "favorite_{}",
            &format!(r"\b(?i:my favou?rite)\s+(\p{{L}}+)\s+(?i:is|are)\s+{}", CLAUSE)
        ),
        pattern("preference", &format!(r"\b(?i:i prefer|i like to use)\s+{}", CLAUSE)),
    ];
}

fn clean_value(raw: &str) -> Option<String> {
    let lowered = raw.to_ascii_lowercase();
    let cut = [" and ", " but ", " because ", " so "]
        .iter()
        .filter_map(|sep| lowered.find(sep))
        .min()
        .unwrap_or(raw.len());
    let value = raw[..cut].trim();
    if value.is_empty() {
        return None;
    }
    Some(crate::text::prefix_chars(value, MEMORY_VALUE_MAX_CHARS).to_string())
}

/// Facts stated in `text`, one per matching pattern occurrence.
pub fn extract_memory_facts(subject: &SubjectId, text: &str) -> Vec<MemoryFact> {
    let mut facts = Vec::new();
    for p in MEMORY_PATTERNS.iter() {
        for caps in p.regex.captures_iter(text) {
            let (key, value_group) = if p.key.contains("{}") {
                let thing = match caps.get(1) {
                    Some(m) => m.as_str().to_lowercase(),
                    None => continue,
                };
                (p.key.replace("{}", &thing), 2)
            } else {
                (p.key.to_string(), 1)
            };
            let value = match caps.get(value_group).and_then(|m| clean_value(m.as_str())) {
                Some(v) => v,
                None => continue,
            };
            facts.push(MemoryFact {
                subject_id: subject.clone(),
                key,
                value,
            });
        }
    }
    facts
}

/// Upserts every fact found in the latest user turn. Failures are logged.
pub async fn persist_memory(subject: &SubjectId, text: &str, pool: &DbPool) -> usize {
    let mut stored = 0;
    for fact in extract_memory_facts(subject, text) {
        match db::upsert_memory_fact(&fact, pool).await {
            Ok(()) => {
                tracing::debug!("[🧠] Remembered {} for {}", fact.key, subject);
                stored += 1;
            }
            Err(e) => tracing::warn!("[🧠] Failed to store memory fact {}: {}", fact.key, e),
        }
    }
    stored
}

/// Short title for the conversation, or `None` on any failure.
pub async fn derive_title(
    state: &AppState,
    turns: &[ConversationTurn],
    deadline: Deadline,
) -> Option<String> {
    let registry = &state.backends;
    let request = build_title_request(&registry.title_model, turns);
    let deadline = deadline.capped(registry.title_timeout);

    match backends::complete(
        &state.client,
        &registry.chat,
        &request,
        deadline,
        BackendKind::Title,
    )
    .await
    {
        Ok(raw) => {
            let title = crate::text::clean_title(&raw);
            if title.is_none() {
                tracing::debug!("[🏷️ ] Title backend returned nothing usable");
            }
            title
        }
        Err(e) => {
            tracing::debug!("[🏷️ ] Title derivation abandoned: {}", e.inner);
            None
        }
    }
}

pub struct SideChannelJob<'a> {
    pub subject: &'a SubjectId,
    pub latest_text: &'a str,
    pub turns: &'a [ConversationTurn],
    pub prior_turns: usize,
    pub deadline: Deadline,
}

/// Runs both tasks concurrently, emits the title if one was produced, then
/// terminates the stream. Pending work is dropped as soon as the client goes
/// away.
pub async fn run(state: &AppState, job: SideChannelJob<'_>, mut writer: SideChannelWriter) {
    if writer.is_closed() {
        tracing::info!("[⚙️  -> 🖥️ ] Client gone, skipping side channel");
        return;
    }
    let wants_title = job.prior_turns >= state.args.min_turns_for_title;

    let memory = persist_memory(job.subject, job.latest_text, &state.db);
    let title = async {
        if wants_title {
            derive_title(state, job.turns, job.deadline).await
        } else {
            None
        }
    };

    let outcome = tokio::select! {
        done = async { tokio::join!(memory, title) } => Some(done),
        _ = writer.closed() => None,
    };
    let (stored, title) = match outcome {
        Some(done) => done,
        None => {
            tracing::info!("[⚙️  -> 🖥️ ] Client disconnected, dropping side channel work");
            return;
        }
    };

    if let Some(title) = title {
        if writer.title(&title).await {
            tracing::info!("[🏷️ ] Conversation titled: {}", title);
        }
    }
    tracing::debug!("[🧠] Side channel done ({} facts stored)", stored);
    writer.terminate().await;
}
