//! Single-file JSON store.
//!
//! Holds participants, their PINs, the bet log, and the betting switch in
//! one JSON document. Every mutation is applied to a copy of the document,
//! written out, and only then becomes visible; a failed write leaves the
//! store unchanged. A missing file is an empty store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{BetStore, DEFAULT_PIN};
use crate::types::{BetRecord, NewBet, PaddockError, Participant, Session, SystemStatus};

const STORE_NAME: &str = "file";

/// On-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    participants: Vec<Participant>,
    #[serde(default)]
    pins: HashMap<String, String>,
    #[serde(default)]
    bets: Vec<BetRecord>,
    #[serde(default)]
    betting_closed: bool,
}

/// In-memory state; PINs stay wrapped until written back out.
struct Inner {
    participants: Vec<Participant>,
    pins: HashMap<String, SecretString>,
    bets: Vec<BetRecord>,
    status: SystemStatus,
}

impl From<StoreFile> for Inner {
    fn from(file: StoreFile) -> Self {
        Self {
            participants: file.participants,
            pins: file
                .pins
                .into_iter()
                .map(|(id, pin)| (id, SecretString::new(pin)))
                .collect(),
            bets: file.bets,
            status: SystemStatus {
                betting_closed: file.betting_closed,
            },
        }
    }
}

impl Inner {
    fn to_file(&self) -> StoreFile {
        StoreFile {
            participants: self.participants.clone(),
            pins: self
                .pins
                .iter()
                .map(|(id, pin)| (id.clone(), pin.expose_secret().clone()))
                .collect(),
            bets: self.bets.clone(),
            betting_closed: self.status.betting_closed,
        }
    }
}

/// Bet store backed by a local JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file starts an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = if path.exists() {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store from {}", path.display()))?;
            let file: StoreFile = serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse store from {}", path.display()))?;
            info!(
                path = %path.display(),
                participants = file.participants.len(),
                bets = file.bets.len(),
                "Store loaded from disk"
            );
            file
        } else {
            info!(path = %path.display(), "No store file found, starting empty");
            StoreFile::default()
        };

        Ok(Self {
            path,
            inner: Mutex::new(file.into()),
        })
    }

    /// Add a participant, or replace the one with the same id, and set
    /// their PIN.
    pub async fn register(&self, participant: Participant, pin: SecretString) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.commit(&mut inner, |file| {
            file.pins
                .insert(participant.id.clone(), pin.expose_secret().clone());
            match file.participants.iter_mut().find(|p| p.id == participant.id) {
                Some(existing) => *existing = participant,
                None => file.participants.push(participant),
            }
            Ok(())
        })
    }

    /// Apply `change` to a copy of the document, write it, then publish it.
    fn commit<T>(
        &self,
        inner: &mut Inner,
        change: impl FnOnce(&mut StoreFile) -> Result<T>,
    ) -> Result<T> {
        let mut next = inner.to_file();
        let out = change(&mut next)?;
        self.persist(&next)?;
        *inner = next.into();
        Ok(out)
    }

    fn persist(&self, file: &StoreFile) -> Result<()> {
        let json = serde_json::to_string_pretty(file).context("Failed to serialise store")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write store to {}", self.path.display()))?;
        debug!(path = %self.path.display(), bets = file.bets.len(), "Store saved");
        Ok(())
    }
}

#[async_trait]
impl BetStore for JsonFileStore {
    async fn fetch_participants(&self) -> Result<Vec<Participant>> {
        Ok(self.inner.lock().await.participants.clone())
    }

    async fn fetch_bets(&self) -> Result<Vec<BetRecord>> {
        Ok(self.inner.lock().await.bets.clone())
    }

    async fn append_bet(&self, bet: NewBet) -> Result<BetRecord> {
        let mut inner = self.inner.lock().await;
        let record = BetRecord {
            id: uuid::Uuid::new_v4().to_string(),
            participant_id: bet.participant_id,
            race_id: bet.race_id,
            investment: bet.investment,
            return_amount: bet.return_amount,
            recorded_at: Some(Utc::now()),
        };
        self.commit(&mut inner, |file| {
            file.bets.push(record.clone());
            Ok(())
        })?;
        Ok(record)
    }

    async fn reset_bets(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let removed = self.commit(&mut inner, |file| Ok(file.bets.drain(..).count()))?;
        info!(removed, "All bets reset");
        Ok(())
    }

    async fn fetch_status(&self) -> Result<SystemStatus> {
        Ok(self.inner.lock().await.status)
    }

    async fn set_betting_closed(&self, closed: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.commit(&mut inner, |file| {
            file.betting_closed = closed;
            Ok(())
        })
    }

    async fn rename_participant(&self, session: &Session, display_name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.commit(&mut inner, |file| {
            let participant = file
                .participants
                .iter_mut()
                .find(|p| p.id == session.participant_id)
                .ok_or_else(|| PaddockError::UnknownParticipant(session.participant_id.clone()))?;
            participant.display_name = display_name.to_string();
            Ok(())
        })
    }

    async fn verify_pin(&self, participant_id: &str, pin: &SecretString) -> Result<Session> {
        let inner = self.inner.lock().await;
        if !inner.participants.iter().any(|p| p.id == participant_id) {
            return Err(PaddockError::UnknownParticipant(participant_id.to_string()).into());
        }
        match inner.pins.get(participant_id) {
            Some(stored) if stored.expose_secret() == pin.expose_secret() => Ok(Session {
                participant_id: participant_id.to_string(),
                must_change_pin: stored.expose_secret().as_str() == DEFAULT_PIN,
            }),
            _ => Err(PaddockError::InvalidPin(participant_id.to_string()).into()),
        }
    }

    async fn set_pin(&self, session: &Session, pin: &SecretString) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.commit(&mut inner, |file| {
            if !file.participants.iter().any(|p| p.id == session.participant_id) {
                return Err(PaddockError::UnknownParticipant(session.participant_id.clone()).into());
            }
            file.pins
                .insert(session.participant_id.clone(), pin.expose_secret().clone());
            Ok(())
        })
    }

    async fn reset_pins(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let reset = self.commit(&mut inner, |file| {
            file.pins = file
                .participants
                .iter()
                .map(|p| (p.id.clone(), DEFAULT_PIN.to_string()))
                .collect();
            Ok(file.pins.len())
        })?;
        info!(reset, "All PINs reset to default");
        Ok(reset)
    }

    fn name(&self) -> &str {
        STORE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
