//! Leaderboard over a single sorted set.
//!
//! Ranks are 0-based from the highest score.

use crate::backend::StoreHandle;
use crate::error::StoreResult;
use crate::storage::RankOrder;
use bytes::Bytes;
use serde::Serialize;

/// Sorted-set key used by the default leaderboard.
pub const DEFAULT_LEADERBOARD_KEY: &str = "leaderboard:academic";

/// One row of a leaderboard listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    pub member: String,
    pub score: f64,
}

fn standings(rows: Vec<(Bytes, f64)>) -> Vec<Standing> {
    rows.into_iter()
        .map(|(member, score)| Standing {
            member: String::from_utf8_lossy(&member).into_owned(),
            score,
        })
        .collect()
}

/// Inclusive end index for the first `limit` rows (`limit > 0`).
fn last_index(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX) - 1
}

#[derive(Debug, Clone)]
pub struct Leaderboard {
    store: StoreHandle,
    key: Bytes,
}

impl Leaderboard {
    pub fn new(store: StoreHandle, key: impl Into<Bytes>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Sets `member`'s score, adding the member if needed.
    pub async fn update_score(&self, member: &str, score: f64) -> StoreResult<()> {
        self.store
            .ranked_upsert(self.key.clone(), member.to_string(), score)
            .await
            .map(|_| ())
    }

    /// The `limit` best members, best first.
    pub async fn top(&self, limit: usize) -> StoreResult<Vec<Standing>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .store
            .ranked_range(&self.key, 0, last_index(limit), RankOrder::Descending)
            .await?;
        Ok(standings(rows))
    }

    pub async fn rank(&self, member: &str) -> StoreResult<Option<usize>> {
        self.store
            .rank_of(&self.key, member.as_bytes(), RankOrder::Descending)
            .await
    }

    pub async fn score(&self, member: &str) -> StoreResult<Option<f64>> {
        self.store.score_of(&self.key, member.as_bytes()).await
    }

    /// Members within `radius` ranks of `member` (inclusive), or `None` if
    /// `member` is not on the board.
    pub async fn surrounding(&self, member: &str, radius: usize) -> StoreResult<Option<Vec<Standing>>> {
        let Some(rank) = self.rank(member).await? else {
            return Ok(None);
        };
        let start = rank.saturating_sub(radius) as i64;
        let end = rank.saturating_add(radius).min(i64::MAX as usize) as i64;

        let rows = self
            .store
            .ranked_range(&self.key, start, end, RankOrder::Descending)
            .await?;
        Ok(Some(standings(rows)))
    }

    pub async fn count(&self) -> StoreResult<usize> {
        self.store.cardinality(&self.key).await
    }
}
