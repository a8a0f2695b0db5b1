//! Remote REST store.
//!
//! Talks to a PostgREST-compatible endpoint (e.g. a hosted Postgres with
//! a REST gateway) holding three tables:
//!
//! - `users`: `id, name, jockey, pin, color`
//! - `bets`: `id, user_id, race_id, investment, return_amount, created_at`
//! - `system_settings`: single row `id = 1` with `is_betting_closed`
//!
//! Auth: the service key is sent as both `apikey` and `Authorization:
//! Bearer {key}`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{BetStore, DEFAULT_PIN};
use crate::types::{BetRecord, NewBet, PaddockError, Participant, Session, SystemStatus};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const STORE_NAME: &str = "remote";
const REST_PATH: &str = "rest/v1";
const SETTINGS_ROW: &str = "id=eq.1";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Insert payload for the `bets` table.
#[derive(Debug, Serialize)]
struct BetInsert<'a> {
    user_id: &'a str,
    race_id: &'a str,
    investment: u64,
    return_amount: u64,
}

#[derive(Debug, Deserialize)]
struct SettingsRow {
    #[serde(default)]
    is_betting_closed: bool,
}

#[derive(Debug, Serialize)]
struct SettingsUpdate {
    is_betting_closed: bool,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct NameUpdate<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct PinUpdate<'a> {
    pin: &'a str,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    #[serde(deserialize_with = "crate::types::lenient_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct PinRow {
    #[serde(default)]
    pin: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// REST store client.
pub struct RestStore {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("PADDOCK/0.1.0 (betting-leaderboard)")
            .build()
            .context("Failed to build HTTP client for remote store")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    // -- Internal helpers ------------------------------------------------

    fn table_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/{REST_PATH}/{table}", self.base_url)
        } else {
            format!("{}/{REST_PATH}/{table}?{query}", self.base_url)
        }
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let key = self.api_key.expose_secret();
        req.header("apikey", key.as_str()).bearer_auth(key)
    }

    async fn check(resp: Response, what: &str) -> Result<Response> {
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PaddockError::Store {
                store: STORE_NAME.to_string(),
                message: format!("{what} failed with {status}: {body}"),
            }
            .into());
        }
        Ok(resp)
    }

    async fn get_rows<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>> {
        let url = self.table_url(table, query);
        debug!(url = %url, "Fetching rows");

        let resp = self
            .authed(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("Remote store request failed: {table}"))?;

        Self::check(resp, table)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse {table} rows"))
    }

    async fn patch<B: Serialize + ?Sized>(&self, table: &str, query: &str, body: &B) -> Result<()> {
        let url = self.table_url(table, query);
        let resp = self
            .authed(self.http.patch(&url))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Remote store update failed: {table}"))?;
        Self::check(resp, table).await?;
        Ok(())
    }
}

#[async_trait]
impl BetStore for RestStore {
    async fn fetch_participants(&self) -> Result<Vec<Participant>> {
        self.get_rows("users", "select=*").await
    }

    async fn fetch_bets(&self) -> Result<Vec<BetRecord>> {
        let bets: Vec<BetRecord> = self.get_rows("bets", "select=*&order=created_at.asc").await?;
        debug!(count = bets.len(), "Fetched bets");
        Ok(bets)
    }

    async fn append_bet(&self, bet: NewBet) -> Result<BetRecord> {
        let url = self.table_url("bets", "");
        let payload = BetInsert {
            user_id: &bet.participant_id,
            race_id: &bet.race_id,
            investment: bet.investment.units(),
            return_amount: bet.return_amount.units(),
        };

        let resp = self
            .authed(self.http.post(&url))
            .header("Prefer", "return=representation")
            .json(&payload)
            .send()
            .await
            .context("Remote store insert failed: bets")?;

        let mut rows: Vec<BetRecord> = Self::check(resp, "insert bets")
            .await?
            .json()
            .await
            .context("Failed to parse inserted bet")?;

        rows.pop().ok_or_else(|| {
            PaddockError::Store {
                store: STORE_NAME.to_string(),
                message: "insert returned no rows".to_string(),
            }
            .into()
        })
    }

    async fn reset_bets(&self) -> Result<()> {
        // PostgREST refuses unfiltered deletes; every amount is >= 0.
        let url = self.table_url("bets", "investment=gt.-1");
        let resp = self
            .authed(self.http.delete(&url))
            .send()
            .await
            .context("Remote store delete failed: bets")?;
        Self::check(resp, "delete bets").await?;
        info!("All remote bets reset");
        Ok(())
    }

    async fn fetch_status(&self) -> Result<SystemStatus> {
        let query = format!("{SETTINGS_ROW}&select=*");
        match self.get_rows::<SettingsRow>("system_settings", &query).await {
            Ok(rows) => Ok(SystemStatus {
                betting_closed: rows.first().map(|r| r.is_betting_closed).unwrap_or(false),
            }),
            Err(e) => {
                error!(error = %e, "Failed to fetch system status, assuming open");
                Ok(SystemStatus::default())
            }
        }
    }

    async fn set_betting_closed(&self, closed: bool) -> Result<()> {
        let body = SettingsUpdate {
            is_betting_closed: closed,
            updated_at: Utc::now().to_rfc3339(),
        };
        self.patch("system_settings", SETTINGS_ROW, &body).await
    }

    async fn rename_participant(&self, session: &Session, display_name: &str) -> Result<()> {
        let query = format!("id=eq.{}", urlencoding::encode(&session.participant_id));
        self.patch("users", &query, &NameUpdate { name: display_name }).await
    }

    async fn verify_pin(&self, participant_id: &str, pin: &SecretString) -> Result<Session> {
        let query = format!("id=eq.{}&select=pin", urlencoding::encode(participant_id));
        let rows: Vec<PinRow> = self.get_rows("users", &query).await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| PaddockError::UnknownParticipant(participant_id.to_string()))?;
        let stored = row.pin.map(SecretString::new);

        match stored {
            Some(stored) if stored.expose_secret() == pin.expose_secret() => Ok(Session {
                participant_id: participant_id.to_string(),
                must_change_pin: stored.expose_secret().as_str() == DEFAULT_PIN,
            }),
            _ => Err(PaddockError::InvalidPin(participant_id.to_string()).into()),
        }
    }

    async fn set_pin(&self, session: &Session, pin: &SecretString) -> Result<()> {
        let query = format!("id=eq.{}", urlencoding::encode(&session.participant_id));
        let body = PinUpdate { pin: pin.expose_secret() };
        self.patch("users", &query, &body).await
    }

    async fn reset_pins(&self) -> Result<usize> {
        let users: Vec<IdRow> = self.get_rows("users", "select=id").await?;
        let body = &PinUpdate { pin: DEFAULT_PIN };
        futures::future::try_join_all(users.iter().map(|u| {
            let query = format!("id=eq.{}", urlencoding::encode(&u.id));
            async move { self.patch("users", &query, body).await }
        }))
        .await?;
        info!(reset = users.len(), "All remote PINs reset to default");
        Ok(users.len())
    }

    fn name(&self) -> &str {
        STORE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
