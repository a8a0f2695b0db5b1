//! Shared types for PADDOCK.
//!
//! These types form the data model used across all modules. Inbound
//! records are deserialised leniently: currency fields and timestamps that
//! arrive malformed degrade to zero / `None` instead of failing the whole
//! feed.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// One tracked bettor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(deserialize_with = "lenient_id")]
    pub id: String,
    /// Display name shown on the board. Editable by the participant.
    #[serde(default, alias = "name", deserialize_with = "lenient_text")]
    pub display_name: String,
    /// Real-world attribution (the person behind the display name).
    #[serde(default, alias = "jockey", deserialize_with = "lenient_text")]
    pub attribution_label: String,
    #[serde(default, alias = "color", skip_serializing_if = "Option::is_none")]
    pub accent_color: Option<String>,
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} 【{}】", self.display_name, self.attribution_label)
    }
}

impl Participant {
    pub fn new(id: &str, display_name: &str, attribution_label: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            attribution_label: attribution_label.to_string(),
            accent_color: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Amount
// ---------------------------------------------------------------------------

/// Non-negative currency amount in whole units.
///
/// Deserialisation never fails. Integers pass through, non-negative floats
/// are truncated, strings keep only their ASCII digits (`"300,000"` becomes
/// `300000`), and everything else (null, negatives, bools, empty digit
/// strings, overflow) becomes zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn new(units: u64) -> Self {
        Amount(units)
    }

    pub fn units(self) -> u64 {
        self.0
    }

    /// Coerce a display-formatted string by stripping every non-digit.
    pub fn parse_lenient(raw: &str) -> Self {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        Amount(digits.parse().unwrap_or(0))
    }

    /// Coerce an arbitrary JSON value.
    pub fn from_json(raw: &Value) -> Self {
        match raw {
            Value::Number(n) => {
                if let Some(units) = n.as_u64() {
                    Amount(units)
                } else {
                    match n.as_f64() {
                        Some(f) if f.is_finite() && f >= 0.0 && f < u64::MAX as f64 => {
                            Amount(f.trunc() as u64)
                        }
                        _ => Amount::ZERO,
                    }
                }
            }
            Value::String(s) => Amount::parse_lenient(s),
            _ => Amount::ZERO,
        }
    }
}

impl From<u64> for Amount {
    fn from(units: u64) -> Self {
        Amount(units)
    }
}

impl From<&str> for Amount {
    fn from(raw: &str) -> Self {
        Amount::parse_lenient(raw)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(Amount::from_json(&raw))
    }
}

// ---------------------------------------------------------------------------
// Bet records
// ---------------------------------------------------------------------------

/// One raw, append-only bet record.
///
/// A correction is a later record for the same `(participant_id, race_id)`;
/// nothing is ever mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BetRow")]
pub struct BetRecord {
    pub id: String,
    pub participant_id: String,
    pub race_id: String,
    pub investment: Amount,
    pub return_amount: Amount,
    /// `None` when the source timestamp was missing or unparsable.
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Inbound bet row as the stores and legacy exports deliver it. Field
/// spellings from different sources may coexist in one row.
#[derive(Debug, Deserialize)]
struct BetRow {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    participant_id: Value,
    #[serde(default)]
    user_id: Value,
    #[serde(default, rename = "userId")]
    user_id_camel: Value,
    #[serde(default)]
    race_id: Value,
    #[serde(default, rename = "raceId")]
    race_id_camel: Value,
    #[serde(default)]
    investment: Value,
    #[serde(default)]
    return_amount: Value,
    #[serde(default, rename = "returnAmount")]
    return_amount_camel: Value,
    #[serde(default)]
    recorded_at: Value,
    #[serde(default)]
    created_at: Value,
    #[serde(default)]
    timestamp: Value,
}

impl From<BetRow> for BetRecord {
    fn from(row: BetRow) -> Self {
        let text = |candidates: &[&Value]| {
            candidates
                .iter()
                .find_map(|v| id_text(v))
                .unwrap_or_default()
        };
        let amount = |candidates: &[&Value]| {
            candidates
                .iter()
                .find(|v| !v.is_null())
                .map(|v| Amount::from_json(v))
                .unwrap_or_default()
        };

        Self {
            id: text(&[&row.id]),
            participant_id: text(&[&row.participant_id, &row.user_id, &row.user_id_camel]),
            race_id: text(&[&row.race_id, &row.race_id_camel]),
            investment: amount(&[&row.investment]),
            return_amount: amount(&[&row.return_amount, &row.return_amount_camel]),
            recorded_at: [&row.recorded_at, &row.created_at, &row.timestamp]
                .into_iter()
                .find_map(parse_timestamp),
        }
    }
}

impl BetRecord {
    pub fn key(&self) -> BetKey<'_> {
        BetKey {
            participant_id: &self.participant_id,
            race_id: &self.race_id,
        }
    }

    /// Signed profit of this single record.
    pub fn profit(&self) -> i64 {
        signed(self.return_amount.units()).saturating_sub(signed(self.investment.units()))
    }

    /// Whether this record should replace `current` as the authoritative
    /// record for its pair. Only a strictly later, valid timestamp wins.
    pub fn supersedes(&self, current: &BetRecord) -> bool {
        match (self.recorded_at, current.recorded_at) {
            (Some(candidate), Some(leader)) => candidate > leader,
            _ => false,
        }
    }
}

impl fmt::Display for BetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}/{} inv={} ret={}",
            self.id, self.participant_id, self.race_id, self.investment, self.return_amount,
        )
    }
}

/// Composite deduplication key: one authoritative record per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BetKey<'a> {
    pub participant_id: &'a str,
    pub race_id: &'a str,
}

/// A bet submitted by a caller, before the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBet {
    pub participant_id: String,
    pub race_id: String,
    #[serde(default)]
    pub investment: Amount,
    #[serde(default)]
    pub return_amount: Amount,
}

// ---------------------------------------------------------------------------
// Derived leaderboard
// ---------------------------------------------------------------------------

/// Rank carried by an entry the ranking pass never reached.
pub const UNRANKED: u32 = 999;

/// One row of the derived leaderboard. Recomputed from scratch on every
/// change and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    #[serde(flatten)]
    pub participant: Participant,
    pub total_investment: u64,
    pub total_return: u64,
    pub net_profit: i64,
    /// `total_return / total_investment * 100`, exactly zero when nothing
    /// was invested.
    pub return_rate_percent: Decimal,
    pub rank: u32,
    pub is_top_investor: bool,
}

impl fmt::Display for LeaderboardEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.net_profit > 0 { "+" } else { "" };
        write!(
            f,
            "#{} {} rate={:.1}% inv={} ret={} ({sign}{}){}",
            self.rank,
            self.participant.display_name,
            self.return_rate_percent,
            self.total_investment,
            self.total_return,
            self.net_profit,
            if self.is_top_investor { " [top investor]" } else { "" },
        )
    }
}

// ---------------------------------------------------------------------------
// System status & session
// ---------------------------------------------------------------------------

/// Global switch controlling whether new bets are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub betting_closed: bool,
}

/// Caller identity established by PIN verification. Write paths take this
/// explicitly instead of reading any ambient "current user".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub participant_id: String,
    /// The participant still holds the factory PIN and must pick a new one
    /// before their first write.
    pub must_change_pin: bool,
}

impl Session {
    pub fn new(participant_id: &str) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            must_change_pin: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for PADDOCK.
#[derive(Debug, thiserror::Error)]
pub enum PaddockError {
    #[error("Betting is closed")]
    BettingClosed,

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Invalid PIN for participant {0}")]
    InvalidPin(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Participant {0} must change the default PIN first")]
    PinChangeRequired(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error ({store}): {message}")]
    Store { store: String, message: String },
}

// ---------------------------------------------------------------------------
// Lenient deserialisers
// ---------------------------------------------------------------------------

fn signed(units: u64) -> i64 {
    i64::try_from(units).unwrap_or(i64::MAX)
}

/// Accept ids as strings or numbers (numeric primary keys from the store).
pub(crate) fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(id_text(&raw).unwrap_or_default())
}

/// Free text that may arrive as null; null becomes empty.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn id_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a timestamp as a date value: RFC 3339, a zone-less ISO date-time
/// (taken as UTC), or milliseconds since the epoch.
pub fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
