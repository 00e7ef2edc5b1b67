//! Caller authentication and restricted-topic authorization.

use crate::constants::*;
use crate::db::{self, DbPool};
use crate::intent::KeywordTables;
use crate::types::*;
use axum::http::{header::AUTHORIZATION, HeaderMap};

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Resolves the bearer credential and checks it belongs to the subject named
/// in the request body.
pub async fn authenticate(
    headers: &HeaderMap,
    claimed: &SubjectId,
    pool: &DbPool,
) -> Result<SubjectId> {
    let token = match bearer_token(headers) {
        Some(t) => t,
        None => {
            return Err(
                GatewayError::Unauthenticated("missing bearer credential".to_string()).into(),
            )
        }
    };

    let subject = match db::resolve_credential(token, pool).await? {
        Some(s) => s,
        None => {
            tracing::warn!("[🔒] Unknown or revoked credential");
            return Err(GatewayError::Unauthenticated("credential not recognized".to_string()).into());
        }
    };

    if &subject != claimed {
        tracing::warn!(
            "[🔒] Credential for {} used with subjectId {}",
            subject,
            claimed
        );
        return Err(GatewayError::Unauthenticated(
            "credential does not belong to subjectId".to_string(),
        )
        .into());
    }
    Ok(subject)
}

/// A session counts as creator-authenticated once any user turn of the
/// conversation carried the pass-phrase. Disabled when no pass-phrase is set.
pub fn creator_authenticated(turns: &[ConversationTurn], passphrase: Option<&str>) -> bool {
    let phrase = match passphrase.map(str::trim) {
        Some(p) if !p.is_empty() => p.to_lowercase(),
        _ => return false,
    };
    turns
        .iter()
        .filter(|t| t.role == Role::User)
        .any(|t| t.content.to_lowercase().contains(&phrase))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// Restricted topic without clearance; canned refusal, no backend call.
    Refuse(&'static str),
    /// Restricted-mode activation request; static instructions, no backend call.
    Instruct(&'static str),
}

impl GateDecision {
    pub fn short_circuit_text(&self) -> Option<&'static str> {
        match self {
            GateDecision::Proceed => None,
            GateDecision::Refuse(t) | GateDecision::Instruct(t) => Some(t),
        }
    }
}

/// Plain substring match, so inflected forms ("weaponized", "missiles'")
/// still hit. `text` must already be lowercase.
fn mentions_any(text: &str, phrases: &[String]) -> bool {
    phrases
        .iter()
        .any(|p| !p.is_empty() && text.contains(p.as_str()))
}

/// Whether `text` asks for restricted mode and whether it touches a
/// restricted topic.
pub fn gate_matches(text: &str, tables: &KeywordTables) -> (bool, bool) {
    let lowered = text.to_lowercase();
    (
        mentions_any(&lowered, &tables.restricted_mode_phrases),
        mentions_any(&lowered, &tables.restricted_topics),
    )
}

/// Decides whether the latest user text may reach a backend. Attachments are
/// not scanned.
pub async fn authorize(
    text: &str,
    subject: &SubjectId,
    creator: bool,
    tables: &KeywordTables,
    pool: &DbPool,
) -> Result<GateDecision> {
    let (activation, restricted) = gate_matches(text, tables);

    if !activation && !restricted {
        return Ok(GateDecision::Proceed);
    }

    let cleared = creator
        || db::active_clearance(subject, chrono::Utc::now(), pool)
            .await?
            .is_some();

    let decision = if activation {
        if cleared {
            GateDecision::Instruct(RESTRICTED_MODE_ALREADY_ACTIVE)
        } else {
            GateDecision::Instruct(RESTRICTED_MODE_INSTRUCTIONS)
        }
    } else if cleared {
        GateDecision::Proceed
    } else {
        GateDecision::Refuse(RESTRICTED_REFUSAL)
    };

    tracing::info!(
        "[🔒] Gate: activation={} restricted={} creator={} cleared={} -> {:?}",
        activation,
        restricted,
        creator,
        cleared,
        match &decision {
            GateDecision::Proceed => "proceed",
            GateDecision::Refuse(_) => "refuse",
            GateDecision::Instruct(_) => "instruct",
        }
    );
    Ok(decision)
}
