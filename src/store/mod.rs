//! Bet store integrations.
//!
//! Defines the `BetStore` trait and provides implementations for:
//! - JSON file: local single-file persistence (default)
//! - REST: a PostgREST-style remote database (`users`, `bets`,
//!   `system_settings` tables)
//!
//! The store is the only place records are written. The engine never sees
//! it; callers fetch a full snapshot and hand it over.

pub mod file;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::types::{Amount, BetRecord, NewBet, PaddockError, Participant, Session, SystemStatus};

/// PIN every participant starts with, and the value an admin reset restores.
/// It opens a session but never authorises a write.
pub const DEFAULT_PIN: &str = "0000";

/// Abstraction over bet record storage.
///
/// Writes are append-only for bets: a correction is a new record, never an
/// update. Domain failures are returned as `PaddockError` inside the
/// `anyhow::Error` so callers can map them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BetStore: Send + Sync {
    /// All known participants.
    async fn fetch_participants(&self) -> Result<Vec<Participant>>;

    /// Every bet record, oldest first.
    async fn fetch_bets(&self) -> Result<Vec<BetRecord>>;

    /// Append a record. The store assigns the id and timestamp.
    async fn append_bet(&self, bet: NewBet) -> Result<BetRecord>;

    /// Delete every bet record.
    async fn reset_bets(&self) -> Result<()>;

    async fn fetch_status(&self) -> Result<SystemStatus>;

    async fn set_betting_closed(&self, closed: bool) -> Result<()>;

    /// Change the display name of the session's participant.
    async fn rename_participant(&self, session: &Session, display_name: &str) -> Result<()>;

    /// Check a participant's PIN and open a session for them. The session
    /// is flagged when the PIN is still `DEFAULT_PIN`.
    async fn verify_pin(&self, participant_id: &str, pin: &SecretString) -> Result<Session>;

    /// Replace the session participant's PIN.
    async fn set_pin(&self, session: &Session, pin: &SecretString) -> Result<()>;

    /// Put every participant back on `DEFAULT_PIN`. Returns how many were
    /// reset.
    async fn reset_pins(&self) -> Result<usize>;

    /// Store name for logging and identification.
    fn name(&self) -> &str;
}

/// Place a bet on behalf of an authenticated session.
///
/// Rejects the write while betting is closed. Which races are open is not
/// checked here.
pub async fn place_bet(
    store: &dyn BetStore,
    session: &Session,
    race_id: &str,
    investment: Amount,
    return_amount: Amount,
) -> Result<BetRecord> {
    if session.must_change_pin {
        return Err(PaddockError::PinChangeRequired(session.participant_id.clone()).into());
    }

    let race_id = race_id.trim();
    if race_id.is_empty() {
        return Err(PaddockError::InvalidInput("race_id must not be empty".into()).into());
    }

    if store.fetch_status().await?.betting_closed {
        return Err(PaddockError::BettingClosed.into());
    }

    let record = store
        .append_bet(NewBet {
            participant_id: session.participant_id.clone(),
            race_id: race_id.to_string(),
            investment,
            return_amount,
        })
        .await?;

    info!(
        store = store.name(),
        bet = %record,
        "Bet recorded"
    );

    Ok(record)
}

/// Check a PIN a participant wants to switch to: exactly four ASCII digits,
/// and never the default.
pub fn validate_new_pin(pin: &SecretString) -> Result<(), PaddockError> {
    let raw = pin.expose_secret();
    if raw.len() != 4 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(PaddockError::InvalidInput("PIN must be exactly 4 digits".into()));
    }
    if raw.as_str() == DEFAULT_PIN {
        return Err(PaddockError::InvalidInput(format!("PIN {DEFAULT_PIN} is not allowed")));
    }
    Ok(())
}

/// Set a new PIN and, optionally, a new display name in one step. Returns
/// the session with the forced-change flag cleared.
pub async fn update_credentials(
    store: &dyn BetStore,
    session: &Session,
    new_pin: &SecretString,
    display_name: Option<&str>,
) -> Result<Session> {
    validate_new_pin(new_pin)?;

    let display_name = display_name.map(str::trim);
    if display_name == Some("") {
        return Err(PaddockError::InvalidInput("display_name must not be empty".into()).into());
    }

    if let Some(name) = display_name {
        store.rename_participant(session, name).await?;
    }
    store.set_pin(session, new_pin).await?;

    info!(
        store = store.name(),
        participant = %session.participant_id,
        renamed = display_name.is_some(),
        "Credentials updated"
    );

    Ok(Session::new(&session.participant_id))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::always;

    fn session() -> Session {
        Session::new("3")
    }

    fn pin(raw: &str) -> SecretString {
        SecretString::new(raw.to_string())
    }

    #[tokio::test]
    async fn test_place_bet_appends_for_session() {
        let mut store = MockBetStore::new();
        store
            .expect_fetch_status()
            .returning(|| Ok(SystemStatus { betting_closed: false }));
        store
            .expect_append_bet()
            .withf(|bet| bet.participant_id == "3" && bet.race_id == "t11")
            .times(1)
            .returning(|bet| {
                Ok(BetRecord {
                    id: "b1".into(),
                    participant_id: bet.participant_id,
                    race_id: bet.race_id,
                    investment: bet.investment,
                    return_amount: bet.return_amount,
                    recorded_at: Some(chrono::Utc::now()),
                })
            });
        store.expect_name().return_const("mock".to_string());

        let record = place_bet(&store, &session(), " t11 ", Amount::new(10_000), Amount::new(20_530))
            .await
            .unwrap();
        assert_eq!(record.investment.units(), 10_000);
        assert_eq!(record.return_amount.units(), 20_530);
    }

    #[tokio::test]
    async fn test_place_bet_rejected_when_closed() {
        let mut store = MockBetStore::new();
        store
            .expect_fetch_status()
            .returning(|| Ok(SystemStatus { betting_closed: true }));
        store.expect_append_bet().with(always()).never();

        let err = place_bet(&store, &session(), "t11", Amount::new(100), Amount::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PaddockError>(),
            Some(PaddockError::BettingClosed)
        ));
    }

    #[tokio::test]
    async fn test_place_bet_requires_race() {
        let store = MockBetStore::new();
        let err = place_bet(&store, &session(), "   ", Amount::new(100), Amount::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PaddockError>(),
            Some(PaddockError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_place_bet_blocked_until_pin_changed() {
        let mut store = MockBetStore::new();
        store.expect_fetch_status().never();
        store.expect_append_bet().with(always()).never();

        let fresh = Session { must_change_pin: true, ..session() };
        let err = place_bet(&store, &fresh, "t11", Amount::new(100), Amount::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PaddockError>(),
            Some(PaddockError::PinChangeRequired(_))
        ));
    }

    #[test]
    fn test_validate_new_pin() {
        assert!(validate_new_pin(&pin("4821")).is_ok());
        assert!(validate_new_pin(&pin("0000")).is_err());
        assert!(validate_new_pin(&pin("123")).is_err());
        assert!(validate_new_pin(&pin("12345")).is_err());
        assert!(validate_new_pin(&pin("12a4")).is_err());
        assert!(validate_new_pin(&pin("１２３４")).is_err());
    }

    #[tokio::test]
    async fn test_update_credentials_renames_then_sets_pin() {
        let mut store = MockBetStore::new();
        store
            .expect_rename_participant()
            .withf(|s, name| s.participant_id == "3" && name == "Change Driver")
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_set_pin()
            .withf(|s, p| s.participant_id == "3" && p.expose_secret() == "4821")
            .times(1)
            .returning(|_, _| Ok(()));
        store.expect_name().return_const("mock".to_string());

        let fresh = Session { must_change_pin: true, ..session() };
        let next = update_credentials(&store, &fresh, &pin("4821"), Some(" Change Driver "))
            .await
            .unwrap();
        assert!(!next.must_change_pin);
    }

    #[tokio::test]
    async fn test_update_credentials_rejects_default_pin() {
        let mut store = MockBetStore::new();
        store.expect_set_pin().never();
        store.expect_rename_participant().never();

        let err = update_credentials(&store, &session(), &pin("0000"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PaddockError>(),
            Some(PaddockError::InvalidInput(_))
        ));
    }
}
