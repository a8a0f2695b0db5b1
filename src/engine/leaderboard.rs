//! Leaderboard derivation.
//!
//! Turns the raw, append-only bet stream into one ranked entry per
//! participant:
//!
//! 1. Keep only the authoritative (latest) record per participant/race.
//! 2. Sum investment and return per participant.
//! 3. Flag every participant at the maximum positive investment.
//! 4. Rank by return rate, then investment, with "1224" competition ranks.
//!
//! Pure and deterministic; callers re-run it on every new snapshot.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::types::{BetKey, BetRecord, LeaderboardEntry, Participant, UNRANKED};

// ---------------------------------------------------------------------------
// Step 1: deduplication
// ---------------------------------------------------------------------------

/// Select the authoritative record for every `(participant, race)` pair.
///
/// A later record replaces the current one only when its timestamp is
/// strictly greater, so on an exact tie the first record in input order
/// stays. Records without a valid timestamp never replace anything.
///
/// The result preserves the input order of the first record seen for each
/// pair.
pub fn latest_per_race(bets: &[BetRecord]) -> Vec<&BetRecord> {
    let mut slots: HashMap<BetKey<'_>, usize> = HashMap::with_capacity(bets.len());
    let mut latest: Vec<&BetRecord> = Vec::with_capacity(bets.len());

    for bet in bets {
        match slots.get(&bet.key()) {
            Some(&slot) => {
                if bet.supersedes(latest[slot]) {
                    latest[slot] = bet;
                }
            }
            None => {
                slots.insert(bet.key(), latest.len());
                latest.push(bet);
            }
        }
    }

    latest
}

// ---------------------------------------------------------------------------
// Step 2: aggregation
// ---------------------------------------------------------------------------

/// Investment and return totals for one participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub investment: u64,
    pub returned: u64,
}

impl Totals {
    fn add(&mut self, bet: &BetRecord) {
        self.investment = self.investment.saturating_add(bet.investment.units());
        self.returned = self.returned.saturating_add(bet.return_amount.units());
    }

    pub fn net_profit(&self) -> i64 {
        let returned = i64::try_from(self.returned).unwrap_or(i64::MAX);
        let invested = i64::try_from(self.investment).unwrap_or(i64::MAX);
        returned.saturating_sub(invested)
    }

    /// Return as a percentage of investment. Exactly zero when nothing was
    /// invested.
    pub fn return_rate_percent(&self) -> Decimal {
        if self.investment == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.returned)
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|scaled| scaled.checked_div(Decimal::from(self.investment)))
            .unwrap_or(Decimal::ZERO)
    }
}

/// Sum the valid bets of every participant id that appears in them.
pub fn totals_by_participant<'a>(valid: &[&'a BetRecord]) -> HashMap<&'a str, Totals> {
    let mut totals: HashMap<&str, Totals> = HashMap::new();
    for bet in valid {
        totals
            .entry(bet.participant_id.as_str())
            .or_default()
            .add(bet);
    }
    totals
}

// ---------------------------------------------------------------------------
// Steps 3 & 4: designation and ranking
// ---------------------------------------------------------------------------

/// Flag every entry at the maximum investment, provided that maximum is
/// positive. Ties yield several top investors.
fn designate_top_investors(entries: &mut [LeaderboardEntry]) {
    let max_investment = entries
        .iter()
        .map(|e| e.total_investment)
        .max()
        .unwrap_or(0);

    if max_investment == 0 {
        return;
    }

    for entry in entries.iter_mut() {
        entry.is_top_investor = entry.total_investment == max_investment;
    }
}

/// Assign competition ranks in place without reordering `entries`.
fn assign_ranks(entries: &mut [LeaderboardEntry]) {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    // Stable: equal keys keep participant order.
    order.sort_by(|&a, &b| {
        let (a, b) = (&entries[a], &entries[b]);
        b.return_rate_percent
            .cmp(&a.return_rate_percent)
            .then_with(|| b.total_investment.cmp(&a.total_investment))
    });

    let mut current_rank = 1u32;
    for (position, &idx) in order.iter().enumerate() {
        if position > 0 {
            let prev = &entries[order[position - 1]];
            let entry = &entries[idx];
            let tied = prev.return_rate_percent == entry.return_rate_percent
                && prev.total_investment == entry.total_investment;
            if !tied {
                current_rank = u32::try_from(position + 1).unwrap_or(UNRANKED);
            }
        }
        entries[idx].rank = current_rank;
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Derive the leaderboard for `participants` from the raw `bets` stream.
///
/// Returns exactly one entry per participant, in the order given.
pub fn compute_leaderboard(
    participants: &[Participant],
    bets: &[BetRecord],
) -> Vec<LeaderboardEntry> {
    if participants.is_empty() {
        return Vec::new();
    }

    let valid = latest_per_race(bets);
    let totals = totals_by_participant(&valid);

    debug!(
        raw = bets.len(),
        valid = valid.len(),
        superseded = bets.len() - valid.len(),
        participants = participants.len(),
        "Bets deduplicated"
    );

    let mut entries: Vec<LeaderboardEntry> = participants
        .iter()
        .map(|participant| {
            let t = totals
                .get(participant.id.as_str())
                .copied()
                .unwrap_or_default();
            LeaderboardEntry {
                participant: participant.clone(),
                total_investment: t.investment,
                total_return: t.returned,
                net_profit: t.net_profit(),
                return_rate_percent: t.return_rate_percent(),
                rank: UNRANKED,
                is_top_investor: false,
            }
        })
        .collect();

    designate_top_investors(&mut entries);
    assign_ranks(&mut entries);

    for entry in entries.iter().filter(|e| e.rank == UNRANKED) {
        warn!(
            participant = %entry.participant.id,
            "Participant left unranked; falling back to sentinel rank"
        );
    }

    entries
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Amount;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap()
    }

    fn bet(id: &str, who: &str, race: &str, inv: u64, ret: u64, at: DateTime<Utc>) -> BetRecord {
        BetRecord {
            id: id.to_string(),
            participant_id: who.to_string(),
            race_id: race.to_string(),
            investment: Amount::new(inv),
            return_amount: Amount::new(ret),
            recorded_at: Some(at),
        }
    }

    fn roster(ids: &[&str]) -> Vec<Participant> {
        ids.iter()
            .map(|id| Participant::new(id, &format!("Horse {id}"), &format!("Rider {id}")))
            .collect()
    }

    fn entry<'a>(board: &'a [LeaderboardEntry], id: &str) -> &'a LeaderboardEntry {
        board.iter().find(|e| e.participant.id == id).unwrap()
    }

    // -- Deduplication --

    #[test]
    fn test_later_correction_wins() {
        let bets = vec![
            bet("b1", "A", "r1", 1000, 0, t0()),
            bet("b2", "A", "r1", 1000, 2000, t0() + Duration::minutes(5)),
        ];
        let board = compute_leaderboard(&roster(&["A"]), &bets);

        assert_eq!(board[0].total_investment, 1000);
        assert_eq!(board[0].total_return, 2000);
        assert_eq!(board[0].net_profit, 1000);
        assert_eq!(board[0].return_rate_percent, dec!(200));
    }

    #[test]
    fn test_correction_arriving_out_of_order() {
        let bets = vec![
            bet("b2", "A", "r1", 1000, 2000, t0() + Duration::minutes(5)),
            bet("b1", "A", "r1", 1000, 0, t0()),
        ];
        let valid = latest_per_race(&bets);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].id, "b2");
    }

    #[test]
    fn test_exact_timestamp_tie_keeps_first() {
        let bets = vec![
            bet("first", "A", "r1", 1000, 500, t0()),
            bet("second", "A", "r1", 1000, 9000, t0()),
        ];
        let valid = latest_per_race(&bets);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].id, "first");

        let board = compute_leaderboard(&roster(&["A"]), &bets);
        assert_eq!(board[0].total_return, 500);
    }

    #[test]
    fn test_undated_records_never_replace() {
        let mut undated = bet("b2", "A", "r1", 1000, 5000, t0());
        undated.recorded_at = None;
        let bets = vec![bet("b1", "A", "r1", 1000, 0, t0()), undated.clone()];
        assert_eq!(latest_per_race(&bets)[0].id, "b1");

        let bets = vec![undated, bet("b3", "A", "r1", 1000, 0, t0())];
        assert_eq!(latest_per_race(&bets)[0].id, "b2");
    }

    #[test]
    fn test_key_is_two_part_not_concatenated() {
        // "1-2" + "3" and "1" + "2-3" collide under naive "{a}-{b}" keys.
        let bets = vec![
            bet("x", "1-2", "3", 100, 0, t0()),
            bet("y", "1", "2-3", 200, 0, t0() + Duration::minutes(1)),
        ];
        assert_eq!(latest_per_race(&bets).len(), 2);
    }

    #[test]
    fn test_different_races_both_count() {
        let bets = vec![
            bet("b1", "A", "r1", 1000, 0, t0()),
            bet("b2", "A", "r2", 2000, 5000, t0()),
        ];
        let board = compute_leaderboard(&roster(&["A"]), &bets);
        assert_eq!(board[0].total_investment, 3000);
        assert_eq!(board[0].total_return, 5000);
    }

    // -- Aggregation --

    #[test]
    fn test_zero_investment_rate_is_zero() {
        let board = compute_leaderboard(&roster(&["A", "B"]), &[]);
        for e in &board {
            assert_eq!(e.return_rate_percent, Decimal::ZERO);
            assert_eq!(e.net_profit, 0);
            assert_eq!(e.rank, 1);
            assert!(!e.is_top_investor);
        }
    }

    #[test]
    fn test_return_without_investment_is_zero_rate() {
        let bets = vec![bet("b1", "A", "r1", 0, 5000, t0())];
        let board = compute_leaderboard(&roster(&["A"]), &bets);
        assert_eq!(board[0].return_rate_percent, Decimal::ZERO);
        assert_eq!(board[0].net_profit, 5000);
    }

    #[test]
    fn test_comma_string_investment_coerced() {
        let bets: Vec<BetRecord> = serde_json::from_value(serde_json::json!([
            {
                "id": "b1",
                "userId": "7",
                "raceId": "r1",
                "investment": "300,000",
                "returnAmount": "",
                "timestamp": "2026-02-22T10:00:00Z"
            },
            {
                "id": "b2",
                "userId": "12",
                "raceId": "r2",
                "investment": 15000,
                "returnAmount": null,
                "timestamp": "2026-02-22T10:00:00Z"
            }
        ]))
        .unwrap();

        let board = compute_leaderboard(&roster(&["7", "12", "1"]), &bets);
        assert_eq!(entry(&board, "7").total_investment, 300_000);
        assert_eq!(entry(&board, "7").total_return, 0);
        assert!(entry(&board, "7").is_top_investor);
        assert!(!entry(&board, "12").is_top_investor);
        assert!(!entry(&board, "1").is_top_investor);
    }

    #[test]
    fn test_bets_for_unknown_participants_ignored() {
        let bets = vec![bet("b1", "ghost", "r1", 50_000, 0, t0())];
        let board = compute_leaderboard(&roster(&["A"]), &bets);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].total_investment, 0);
        assert!(!board[0].is_top_investor);
    }

    // -- Top investor --

    #[test]
    fn test_top_investor_tie_flags_both() {
        let bets = vec![
            bet("b1", "A", "r1", 10_000, 0, t0()),
            bet("b2", "B", "r1", 10_000, 30_000, t0()),
            bet("b3", "C", "r1", 5_000, 0, t0()),
        ];
        let board = compute_leaderboard(&roster(&["A", "B", "C"]), &bets);
        assert!(entry(&board, "A").is_top_investor);
        assert!(entry(&board, "B").is_top_investor);
        assert!(!entry(&board, "C").is_top_investor);
    }

    #[test]
    fn test_no_top_investor_when_all_zero() {
        let bets = vec![bet("b1", "A", "r1", 0, 0, t0())];
        let board = compute_leaderboard(&roster(&["A", "B", "C"]), &bets);
        assert!(board.iter().all(|e| !e.is_top_investor));
    }

    // -- Ranking --

    #[test]
    fn test_dense_ranking_skips_after_tie() {
        let bets = vec![
            bet("b1", "A", "r1", 1000, 500, t0()),
            bet("b2", "B", "r1", 1000, 500, t0()),
            bet("b3", "C", "r1", 1000, 500, t0()),
            bet("b4", "D", "r1", 1000, 100, t0()),
        ];
        let board = compute_leaderboard(&roster(&["A", "B", "C", "D"]), &bets);
        let ranks: Vec<u32> = board.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 1, 1, 4]);
    }

    #[test]
    fn test_ranking_1224() {
        let bets = vec![
            bet("b1", "A", "r1", 1000, 3000, t0()),
            bet("b2", "B", "r1", 1000, 2000, t0()),
            bet("b3", "C", "r1", 1000, 2000, t0()),
            bet("b4", "D", "r1", 1000, 1000, t0()),
        ];
        let board = compute_leaderboard(&roster(&["D", "C", "B", "A"]), &bets);
        let ranks: Vec<u32> = board.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![4, 2, 2, 1]);
    }

    #[test]
    fn test_equal_rate_higher_stake_ranks_better() {
        let bets = vec![
            bet("b1", "A", "r1", 1000, 1500, t0()),
            bet("b2", "B", "r1", 4000, 6000, t0()),
        ];
        let board = compute_leaderboard(&roster(&["A", "B"]), &bets);
        assert_eq!(entry(&board, "B").rank, 1);
        assert_eq!(entry(&board, "A").rank, 2);
    }

    #[test]
    fn test_zero_investors_share_rank_at_bottom() {
        let bets = vec![bet("b1", "A", "r1", 1000, 0, t0())];
        let board = compute_leaderboard(&roster(&["A", "B", "C"]), &bets);
        // A invested more at 0%, so A outranks the idle participants.
        assert_eq!(entry(&board, "A").rank, 1);
        assert_eq!(entry(&board, "B").rank, 2);
        assert_eq!(entry(&board, "C").rank, 2);
    }

    #[test]
    fn test_end_to_end_three_participants() {
        let bets = vec![
            bet("b1", "1", "r1", 10_000, 20_530, t0()),
            bet("b2", "2", "r1", 10_000, 3_140, t0()),
            bet("b3", "3", "r1", 10_000, 11_900, t0()),
        ];
        let board = compute_leaderboard(&roster(&["1", "2", "3"]), &bets);

        assert_eq!(board[0].return_rate_percent, dec!(205.3));
        assert_eq!(board[1].return_rate_percent, dec!(31.4));
        assert_eq!(board[2].return_rate_percent, dec!(119));

        assert_eq!(board[0].rank, 1);
        assert_eq!(board[2].rank, 2);
        assert_eq!(board[1].rank, 3);

        assert!(board.iter().all(|e| e.is_top_investor));
    }

    // -- Contract --

    #[test]
    fn test_empty_participants_yield_empty_board() {
        let bets = vec![bet("b1", "A", "r1", 1000, 0, t0())];
        assert!(compute_leaderboard(&[], &bets).is_empty());
    }

    #[test]
    fn test_output_keeps_participant_order_and_coverage() {
        let participants = roster(&["9", "3", "5", "1"]);
        let bets = vec![
            bet("b1", "1", "r1", 1000, 9000, t0()),
            bet("b2", "5", "r1", 1000, 100, t0()),
        ];
        let board = compute_leaderboard(&participants, &bets);

        assert_eq!(board.len(), participants.len());
        let ids: Vec<&str> = board.iter().map(|e| e.participant.id.as_str()).collect();
        assert_eq!(ids, vec!["9", "3", "5", "1"]);
        assert!(board.iter().all(|e| e.rank != UNRANKED));
    }

    #[test]
    fn test_deterministic() {
        let participants = roster(&["A", "B", "C"]);
        let bets = vec![
            bet("b1", "A", "r1", 1000, 1500, t0()),
            bet("b2", "B", "r1", 1000, 1500, t0()),
            bet("b3", "A", "r1", 1000, 100, t0() + Duration::seconds(1)),
            bet("b4", "C", "r2", 300, 900, t0()),
        ];
        assert_eq!(
            compute_leaderboard(&participants, &bets),
            compute_leaderboard(&participants, &bets)
        );
    }

    #[test]
    fn test_superseded_append_changes_nothing() {
        let participants = roster(&["A", "B"]);
        let mut bets = vec![
            bet("b1", "A", "r1", 1000, 2000, t0() + Duration::minutes(10)),
            bet("b2", "B", "r1", 1000, 500, t0()),
        ];
        let before = compute_leaderboard(&participants, &bets);

        // Older than the authoritative record for A/r1.
        bets.push(bet("b3", "A", "r1", 9000, 0, t0()));
        let after = compute_leaderboard(&participants, &bets);

        assert_eq!(before, after);
    }

    #[test]
    fn test_display_name_edit_is_picked_up() {
        let mut participants = roster(&["A"]);
        let bets = vec![bet("b1", "A", "r1", 1000, 1000, t0())];
        participants[0].display_name = "Renamed".into();
        let board = compute_leaderboard(&participants, &bets);
        assert_eq!(board[0].participant.display_name, "Renamed");
    }
}
