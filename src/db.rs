use crate::constants::DB_PRAGMAS;
use crate::types::{Clearance, GatewayError, MemoryFact, Result, SubjectId};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

pub type DbPool = SqlitePool;

pub async fn init_db<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path_str = match path.as_ref().to_str() {
        Some(s) => s,
        None => {
            return Err(GatewayError::internal(
                "Invalid database path: Path contains non-UTF8 characters",
            )
            .into())
        }
    };
    let url = format!("sqlite:{}?mode=rwc", path_str);

    let pool = match SqlitePool::connect(&url).await {
        Ok(p) => p,
        Err(e) => return Err(GatewayError::Database(e).into()),
    };

    configure_db(&pool).await?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        return Err(GatewayError::internal(format!("Migration failed: {}", e)).into());
    }

    verify_schema_version(&pool).await;

    Ok(pool)
}

async fn configure_db(pool: &DbPool) -> Result<()> {
    for pragma in DB_PRAGMAS {
        if let Err(e) = sqlx::query(pragma).execute(pool).await {
            return Err(GatewayError::Database(e).into());
        }
    }
    Ok(())
}

async fn verify_schema_version(pool: &DbPool) {
    let version_row: std::result::Result<(String,), sqlx::Error> =
        sqlx::query_as("SELECT value FROM schema_metadata WHERE key = 'schema_version'")
            .fetch_one(pool)
            .await;

    match version_row {
        Ok((version,)) => {
            tracing::info!("Database initialized. Schema version: {}", version);
        }
        Err(e) => {
            tracing::warn!("Could not verify schema version: {}", e);
        }
    }
}

pub fn credential_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Maps a bearer credential to the subject it was issued for.
pub async fn resolve_credential(token: &str, pool: &DbPool) -> Result<Option<SubjectId>> {
    let row = sqlx::query(
        "SELECT subject_id FROM api_credentials WHERE token_sha256 = ? AND revoked = 0",
    )
    .bind(credential_digest(token))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| SubjectId(r.get::<String, _>(0))))
}

pub async fn register_credential(subject: &SubjectId, token: &str, pool: &DbPool) -> Result<()> {
    sqlx::query(
        "INSERT INTO api_credentials (token_sha256, subject_id, revoked) VALUES (?1, ?2, 0)
         ON CONFLICT(token_sha256) DO UPDATE SET subject_id = excluded.subject_id, revoked = 0",
    )
    .bind(credential_digest(token))
    .bind(&subject.0)
    .execute(pool)
    .await?;
    Ok(())
}

/// Seeds `subject=token` pairs, comma separated. Malformed pairs are skipped.
pub async fn seed_static_credentials(entries: &str, pool: &DbPool) -> Result<usize> {
    let mut seeded = 0;
    for pair in entries.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((subject, token)) if !subject.trim().is_empty() && !token.trim().is_empty() => {
                register_credential(&SubjectId::from(subject.trim()), token.trim(), pool).await?;
                seeded += 1;
            }
            _ => tracing::warn!("Ignoring malformed static credential entry"),
        }
    }
    Ok(seeded)
}

/// Most recent clearance that is verified and unexpired at `now`.
pub async fn active_clearance(
    subject: &SubjectId,
    now: chrono::DateTime<chrono::Utc>,
    pool: &DbPool,
) -> Result<Option<Clearance>> {
    let row = sqlx::query(
        "SELECT issued_at, expires_at, verified FROM clearances
         WHERE subject_id = ? AND verified = 1 AND expires_at > ?
         ORDER BY issued_at DESC
         LIMIT 1",
    )
    .bind(&subject.0)
    .bind(now.timestamp())
    .fetch_optional(pool)
    .await?;

    let row = match row {
        Some(r) => r,
        None => return Ok(None),
    };

    let issued_at: i64 = row.get(0);
    let expires_at: i64 = row.get(1);
    let verified: bool = row.get(2);

    let to_utc = |secs: i64| {
        chrono::DateTime::from_timestamp(secs, 0).ok_or_else(|| {
            GatewayError::internal(format!("Clearance timestamp out of range: {}", secs))
        })
    };

    Ok(Some(Clearance {
        subject_id: subject.clone(),
        issued_at: to_utc(issued_at)?,
        expires_at: to_utc(expires_at)?,
        verified,
    }))
}

/// Last write wins per `(subject_id, key)`.
pub async fn upsert_memory_fact(fact: &MemoryFact, pool: &DbPool) -> Result<()> {
    sqlx::query(
        "INSERT INTO memory_facts (subject_id, key, value, updated_at)
         VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
         ON CONFLICT(subject_id, key) DO UPDATE SET
           value = excluded.value,
           updated_at = excluded.updated_at",
    )
    .bind(&fact.subject_id.0)
    .bind(&fact.key)
    .bind(&fact.value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn memory_facts_for(subject: &SubjectId, pool: &DbPool) -> Result<Vec<MemoryFact>> {
    let rows = sqlx::query("SELECT key, value FROM memory_facts WHERE subject_id = ? ORDER BY key")
        .bind(&subject.0)
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| MemoryFact {
            subject_id: subject.clone(),
            key: r.get(0),
            value: r.get(1),
        })
        .collect())
}
