//! StandbyKV demo workload
//!
//! Boots the connection supervisor from the environment, then seeds and
//! queries the store through the collaborator services: a leaderboard, a
//! few sessions and a cache-aside lookup in front of a slow "database".
//! Runs the same way whether the primary is up or the embedded store took
//! over.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use standbykv::services::{CacheAside, Leaderboard, SessionStore, DEFAULT_LEADERBOARD_KEY};
use standbykv::{Config, ConnectionSupervisor, SupervisorConfig};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Students seeded into the leaderboard
const TOTAL_STUDENTS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StudentRecord {
    id: String,
    data: String,
    fetched_at_ms: u128,
}

fn print_help() {
    println!(
        r#"
StandbyKV - key-value store client with an embedded fallback

USAGE:
    standbykv [--help | --version]

ENVIRONMENT:
    REDIS_URL                 Primary address (default: redis://127.0.0.1:6379)
    USE_EMBEDDED_STORE        Skip the primary (default: false)
    STORE_MAX_RETRIES         Connection attempts (default: 5)
    STORE_RETRY_DELAY_MS      Delay between attempts (default: 2000)
    STORE_RETRY_BACKOFF       fixed | exponential (default: fixed)
    STORE_CONNECT_TIMEOUT_MS  Per-attempt timeout (default: 1000)
    CACHE_TTL_SECS            Cache-aside TTL (default: 300)
    SESSION_TTL_SECS          Session TTL (default: 1800)
    STORE_SCAN_BATCH          Keys examined per scan call (default: 100)
    STORE_SWEEP_BATCH         Expired keys purged per shard per sweep (default: 64)
    STORE_SHARDS              Embedded engine shards (default: 64)
    RUST_LOG                  Log filter (default: info)
"#
    );
}

/// Runs `fut` and logs how long it took.
async fn measure<T>(label: &str, fut: impl Future<Output = T>) -> T {
    let start = Instant::now();
    let out = fut.await;
    info!(elapsed_ms = %format!("{:.3}", start.elapsed().as_secs_f64() * 1000.0), "{}", label);
    out
}

/// Stands in for a slow relational query.
async fn slow_database_query(id: String) -> Result<StudentRecord, Infallible> {
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(StudentRecord {
        id,
        data: "heavy relational payload".to_string(),
        fetched_at_ms: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match std::env::args().nth(1).as_deref() {
        Some("--help") | Some("-h") => {
            print_help();
            return Ok(());
        }
        Some("--version") | Some("-v") => {
            println!("StandbyKV version {}", standbykv::VERSION);
            return Ok(());
        }
        Some(other) => anyhow::bail!("unknown argument: {}", other),
        None => {}
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(version = standbykv::VERSION, url = %config.redis_url, "Starting StandbyKV");

    let supervisor = ConnectionSupervisor::new(SupervisorConfig::from(&config));
    let store = supervisor.handle();
    let state = supervisor
        .start()
        .await
        .context("no store backend is available")?;
    info!(state = %state, "Store ready");

    let board = Leaderboard::new(store.clone(), DEFAULT_LEADERBOARD_KEY);
    let sessions = SessionStore::new(store.clone(), config.session_ttl);
    let cache = CacheAside::new(store.clone(), config.cache_ttl);

    // Seed
    measure("Seed leaderboard and sessions", async {
        for i in 0..TOTAL_STUDENTS {
            let student = format!("student:{:04}", i);
            let score = (fastrand::f64() * 10_000.0).round() / 100.0;
            board.update_score(&student, score).await?;

            if fastrand::u8(..10) == 0 {
                let mut data = HashMap::new();
                data.insert("role".to_string(), "student".to_string());
                sessions.create(&student, data).await?;
            }
        }
        anyhow::Ok(())
    })
    .await?;
    let students = board.count().await?;
    let active = sessions.count_active().await?;
    info!(students = students, sessions = active, "Seed complete");

    let Some(leader) = board.top(1).await?.into_iter().next() else {
        anyhow::bail!("leaderboard is empty after seeding");
    };
    info!(member = %leader.member, score = leader.score, "Test student");

    // Sessions
    let mut data = HashMap::new();
    data.insert("role".to_string(), "admin".to_string());
    data.insert("browser".to_string(), "Firefox".to_string());
    let session_id = measure("Create session", sessions.create(&leader.member, data)).await?;
    let session = measure("Read session", sessions.get(&session_id)).await?;
    let role = session
        .as_ref()
        .and_then(|fields| fields.get("role"))
        .map(String::as_str)
        .unwrap_or("-");
    info!(role = role, "Session data");
    measure("Destroy session", sessions.destroy(&session_id)).await?;
    let still_there = sessions.get(&session_id).await?.is_some();
    info!(exists = still_there, "Session after logout");

    // Leaderboard
    let top5 = measure("Top 5", board.top(5)).await?;
    for (i, row) in top5.iter().enumerate() {
        info!(position = i + 1, member = %row.member, score = row.score, "Top student");
    }

    let runner_up = board
        .top(2)
        .await?
        .into_iter()
        .nth(1)
        .map(|row| row.member)
        .unwrap_or_else(|| leader.member.clone());
    let before = board.rank(&runner_up).await?;
    measure("Update score (+5)", async {
        let score = board.score(&runner_up).await?.unwrap_or(0.0);
        board.update_score(&runner_up, score + 5.0).await
    })
    .await?;
    let after = board.rank(&runner_up).await?;
    info!(member = %runner_up, before = ?before, after = ?after, "Rank change");

    if let Some(neighbours) = measure("Neighbours (+-1)", board.surrounding(&runner_up, 1)).await? {
        for row in neighbours {
            info!(member = %row.member, score = row.score, "Neighbour");
        }
    }

    // Cache-aside
    let key = format!("cache:{}", leader.member);
    cache.invalidate(&key).await;
    let fetch = || slow_database_query(leader.member.clone());
    measure("Cache miss (slow query)", cache.get_or_set(&key, None, fetch)).await?;
    measure("Cache hit", cache.get_or_set(&key, None, fetch)).await?;
    let removed = cache.invalidate_pattern("cache:*").await;
    info!(removed = removed, "Cache invalidated");

    info!(state = %supervisor.state(), "Demo complete");
    Ok(())
}
