use chatgate::db::*;
use chatgate::{MemoryFact, SubjectId};
use tempfile::tempdir;

async fn fresh_db() -> (tempfile::TempDir, DbPool) {
    let dir = match tempdir() {
        Ok(d) => d,
        Err(e) => panic!("Failed to create temp dir: {:?}", e),
    };
    let pool = match init_db(dir.path().join("test_chatgate.db")).await {
        Ok(p) => p,
        Err(e) => panic!("Failed to init DB: {:?}", e),
    };
    (dir, pool)
}

async fn insert_clearance(pool: &DbPool, subject: &str, issued: i64, expires: i64, verified: bool) {
    let result = sqlx::query(
        "INSERT INTO clearances (subject_id, issued_at, expires_at, verified) VALUES (?, ?, ?, ?)",
    )
    .bind(subject)
    .bind(issued)
    .bind(expires)
    .bind(verified)
    .execute(pool)
    .await;
    if let Err(e) = result {
        panic!("Failed to insert clearance: {:?}", e);
    }
}

#[tokio::test]
async fn test_migrations_and_schema() {
    let (_dir, pool) = fresh_db().await;

    let journal_mode: (String,) = match sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
    {
        Ok(jm) => jm,
        Err(e) => panic!("Failed to query journal_mode: {:?}", e),
    };
    assert_eq!(journal_mode.0.to_uppercase(), "WAL");

    let tables: Vec<(String,)> =
        match sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(&pool)
            .await
        {
            Ok(t) => t,
            Err(e) => panic!("Failed to query tables: {:?}", e),
        };
    let table_names: Vec<String> = tables.into_iter().map(|t| t.0).collect();
    for expected in ["schema_metadata", "api_credentials", "clearances", "memory_facts"] {
        assert!(table_names.contains(&expected.to_string()), "missing table {}", expected);
    }

    let indexes: Vec<(String,)> =
        match sqlx::query_as("SELECT name FROM sqlite_master WHERE type='index'")
            .fetch_all(&pool)
            .await
        {
            Ok(i) => i,
            Err(e) => panic!("Failed to query indexes: {:?}", e),
        };
    let index_names: Vec<String> = indexes.into_iter().map(|i| i.0).collect();
    assert!(index_names.contains(&"idx_api_credentials_subject_id".to_string()));
    assert!(index_names.contains(&"idx_clearances_subject_issued".to_string()));

    let version: (String,) =
        match sqlx::query_as("SELECT value FROM schema_metadata WHERE key = 'schema_version'")
            .fetch_one(&pool)
            .await
        {
            Ok(v) => v,
            Err(e) => panic!("Failed to query schema version: {:?}", e),
        };
    assert_eq!(version.0, "1");
}

#[tokio::test]
async fn test_reopening_database_is_idempotent() {
    let dir = match tempdir() {
        Ok(d) => d,
        Err(e) => panic!("Failed to create temp dir: {:?}", e),
    };
    let path = dir.path().join("reopen.db");
    for _ in 0..2 {
        if let Err(e) = init_db(&path).await {
            panic!("Failed to init DB: {:?}", e);
        }
    }
}

#[tokio::test]
async fn test_credentials_resolve_and_revoke() {
    let (_dir, pool) = fresh_db().await;
    let alice = SubjectId::from("alice");

    if let Err(e) = register_credential(&alice, "tok-1", &pool).await {
        panic!("Failed to register: {:?}", e);
    }
    match resolve_credential("tok-1", &pool).await {
        Ok(found) => assert_eq!(found, Some(alice.clone())),
        Err(e) => panic!("Resolve failed: {:?}", e),
    }
    match resolve_credential("tok-2", &pool).await {
        Ok(found) => assert!(found.is_none()),
        Err(e) => panic!("Resolve failed: {:?}", e),
    }

    let stored: (String,) = match sqlx::query_as("SELECT token_sha256 FROM api_credentials")
        .fetch_one(&pool)
        .await
    {
        Ok(s) => s,
        Err(e) => panic!("Failed to read credential: {:?}", e),
    };
    assert_eq!(stored.0, credential_digest("tok-1"));
    assert_ne!(stored.0, "tok-1");

    if let Err(e) = sqlx::query("UPDATE api_credentials SET revoked = 1")
        .execute(&pool)
        .await
    {
        panic!("Failed to revoke: {:?}", e);
    }
    match resolve_credential("tok-1", &pool).await {
        Ok(found) => assert!(found.is_none()),
        Err(e) => panic!("Resolve failed: {:?}", e),
    }
}

#[tokio::test]
async fn test_static_credentials_seed_skips_malformed() {
    let (_dir, pool) = fresh_db().await;
    let seeded = match seed_static_credentials("alice=tok-a, broken, =x, bob=tok-b", &pool).await {
        Ok(n) => n,
        Err(e) => panic!("Seed failed: {:?}", e),
    };
    assert_eq!(seeded, 2);
    match resolve_credential("tok-b", &pool).await {
        Ok(found) => assert_eq!(found, Some(SubjectId::from("bob"))),
        Err(e) => panic!("Resolve failed: {:?}", e),
    }
}

#[tokio::test]
async fn test_active_clearance_filters() {
    let (_dir, pool) = fresh_db().await;
    let now = chrono::Utc::now();
    let t = now.timestamp();
    let alice = SubjectId::from("alice");

    insert_clearance(&pool, "alice", t - 100, t + 100, false).await;
    insert_clearance(&pool, "alice", t - 200, t - 10, true).await;
    match active_clearance(&alice, now, &pool).await {
        Ok(c) => assert!(c.is_none(), "unverified or expired clearance must not count"),
        Err(e) => panic!("Lookup failed: {:?}", e),
    }

    insert_clearance(&pool, "alice", t - 300, t + 300, true).await;
    insert_clearance(&pool, "alice", t - 50, t + 50, true).await;
    insert_clearance(&pool, "bob", t, t + 1000, true).await;
    match active_clearance(&alice, now, &pool).await {
        Ok(Some(c)) => {
            assert!(c.verified);
            assert_eq!(c.issued_at.timestamp(), t - 50);
            assert_eq!(c.subject_id, alice);
        }
        other => panic!("Expected newest active clearance, got {:?}", other),
    }
}

#[tokio::test]
async fn test_memory_upsert_last_write_wins() {
    let (_dir, pool) = fresh_db().await;
    let alice = SubjectId::from("alice");
    let fact = |key: &str, value: &str| MemoryFact {
        subject_id: alice.clone(),
        key: key.to_string(),
        value: value.to_string(),
    };

    for f in [fact("employer", "Acme"), fact("employer", "Acme"), fact("name", "Alice")] {
        if let Err(e) = upsert_memory_fact(&f, &pool).await {
            panic!("Upsert failed: {:?}", e);
        }
    }
    if let Err(e) = upsert_memory_fact(&fact("employer", "Globex"), &pool).await {
        panic!("Upsert failed: {:?}", e);
    }

    let facts = match memory_facts_for(&alice, &pool).await {
        Ok(f) => f,
        Err(e) => panic!("Read failed: {:?}", e),
    };
    assert_eq!(facts.len(), 2);
    assert_eq!(facts[0].key, "employer");
    assert_eq!(facts[0].value, "Globex");
    assert_eq!(facts[1].value, "Alice");
}
