//! Recent-results ticker.
//!
//! The newest raw records (corrections included, nothing deduplicated),
//! resolved to participant names with their per-record profit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashMap;

use crate::types::{BetRecord, Participant};

/// Name shown for records whose participant is not on the roster.
pub const UNKNOWN_PARTICIPANT: &str = "Unknown";

/// One ticker line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickerItem {
    pub bet_id: String,
    pub participant_name: String,
    pub race_id: String,
    pub profit: i64,
    pub is_win: bool,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// The `limit` most recent records, newest first. Undated records sort
/// after every dated one.
pub fn recent_results(
    bets: &[BetRecord],
    participants: &[Participant],
    limit: usize,
) -> Vec<TickerItem> {
    let names: HashMap<&str, &str> = participants
        .iter()
        .map(|p| (p.id.as_str(), p.display_name.as_str()))
        .collect();

    let mut newest: Vec<&BetRecord> = bets.iter().collect();
    // `None < Some(_)`, so reversing puts undated records last.
    newest.sort_by_key(|b| Reverse(b.recorded_at));

    newest
        .into_iter()
        .take(limit)
        .map(|bet| {
            let profit = bet.profit();
            TickerItem {
                bet_id: bet.id.clone(),
                participant_name: names
                    .get(bet.participant_id.as_str())
                    .unwrap_or(&UNKNOWN_PARTICIPANT)
                    .to_string(),
                race_id: bet.race_id.clone(),
                profit,
                is_win: profit > 0,
                recorded_at: bet.recorded_at,
            }
        })
        .collect()
}
