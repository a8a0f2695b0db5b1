//! Core engine: snapshot → leaderboard → board.
//!
//! `leaderboard` holds the pure derivation. `Board` wraps one derived
//! snapshot together with the ticker and counters, and is rebuilt from
//! scratch whenever the underlying records change.

pub mod leaderboard;
pub mod roster;
pub mod ticker;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::store::BetStore;
use crate::types::{BetRecord, LeaderboardEntry, Participant};
use leaderboard::{compute_leaderboard, latest_per_race};
use roster::order_roster;
use ticker::{recent_results, TickerItem};

/// How a board is laid out.
#[derive(Debug, Clone, Default)]
pub struct BoardOptions {
    /// Display names in fixed slot order.
    pub display_order: Vec<String>,
    /// Number of recent records shown in the ticker.
    pub ticker_len: usize,
}

/// One derived view of the betting state.
#[derive(Debug, Clone, Serialize)]
pub struct Board {
    pub entries: Vec<LeaderboardEntry>,
    pub ticker: Vec<TickerItem>,
    /// Raw records in the snapshot, corrections included.
    pub bets_seen: usize,
    /// Authoritative records after deduplication.
    pub valid_bets: usize,
    pub betting_closed: bool,
    pub updated_at: DateTime<Utc>,
}

impl Board {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            ticker: Vec::new(),
            bets_seen: 0,
            valid_bets: 0,
            betting_closed: false,
            updated_at: Utc::now(),
        }
    }

    /// Derive a board from a complete snapshot.
    pub fn build(
        participants: &[Participant],
        bets: &[BetRecord],
        betting_closed: bool,
        options: &BoardOptions,
    ) -> Self {
        let roster = order_roster(participants, &options.display_order);
        Self {
            entries: compute_leaderboard(&roster, bets),
            ticker: recent_results(bets, &roster, options.ticker_len),
            bets_seen: bets.len(),
            valid_bets: latest_per_race(bets).len(),
            betting_closed,
            updated_at: Utc::now(),
        }
    }

    /// Fetch a full snapshot from `store` and derive a board from it.
    pub async fn refresh(store: &dyn BetStore, options: &BoardOptions) -> Result<Self> {
        let (participants, bets, status) = futures::try_join!(
            store.fetch_participants(),
            store.fetch_bets(),
            store.fetch_status()
        )?;

        debug!(
            store = store.name(),
            participants = participants.len(),
            bets = bets.len(),
            "Snapshot fetched"
        );

        Ok(Self::build(&participants, &bets, status.betting_closed, options))
    }

    /// Entries currently holding rank 1 among those who have bet.
    pub fn leaders(&self) -> Vec<&LeaderboardEntry> {
        self.entries
            .iter()
            .filter(|e| e.rank == 1 && e.total_investment > 0)
            .collect()
    }

    /// Whether the derived standings differ from `other` (timestamps and
    /// ticker ignored).
    pub fn standings_differ(&self, other: &Board) -> bool {
        self.entries != other.entries || self.betting_closed != other.betting_closed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
