//! Per-client monitoring record and its legal transitions.
//!
//! `AccountState` is mutated only through the account store; everything here
//! is pure so the store can apply mutators inside its own transaction.

use crate::domain::errors::EngineError;
use crate::domain::types::Venue;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Normal,
    Warning,
    DailyBlocked,
    PermanentBlocked,
    MonitoringError,
}

impl AccountStatus {
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            AccountStatus::DailyBlocked | AccountStatus::PermanentBlocked
        )
    }

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Normal => "NORMAL",
            AccountStatus::Warning => "WARNING",
            AccountStatus::DailyBlocked => "DAILY_BLOCKED",
            AccountStatus::PermanentBlocked => "PERMANENT_BLOCKED",
            AccountStatus::MonitoringError => "MONITORING_ERROR",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(AccountStatus::Normal),
            "WARNING" => Ok(AccountStatus::Warning),
            "DAILY_BLOCKED" => Ok(AccountStatus::DailyBlocked),
            "PERMANENT_BLOCKED" => Ok(AccountStatus::PermanentBlocked),
            "MONITORING_ERROR" => Ok(AccountStatus::MonitoringError),
            _ => anyhow::bail!("Unknown account status: {}", s),
        }
    }
}

/// Persistent monitoring state for one client account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountState {
    pub client_id: String,
    pub venue: Venue,

    pub initial_balance: Decimal,
    pub daily_start_balance: Decimal,
    pub current_balance: Decimal,
    pub previous_balance: Decimal,

    pub status: AccountStatus,
    pub daily_blocked_at: Option<DateTime<Utc>>,
    pub permanent_blocked_at: Option<DateTime<Utc>>,
    pub daily_block_reason: Option<String>,
    pub permanent_block_reason: Option<String>,

    pub last_balance_update: Option<DateTime<Utc>>,
    pub last_risk_check: Option<DateTime<Utc>>,
    pub daily_reset_at: DateTime<Utc>,

    pub active: bool,
    /// Bumped on every start/stop so stale in-flight work can be fenced.
    pub session_epoch: u64,
    /// Storage CAS token, incremented by the store on every commit.
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountState {
    /// Fresh record for a client starting its first monitoring session.
    pub fn new(
        client_id: impl Into<String>,
        venue: Venue,
        initial_balance: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            venue,
            initial_balance,
            daily_start_balance: initial_balance,
            current_balance: initial_balance,
            previous_balance: initial_balance,
            status: AccountStatus::Normal,
            daily_blocked_at: None,
            permanent_blocked_at: None,
            daily_block_reason: None,
            permanent_block_reason: None,
            last_balance_update: None,
            last_risk_check: None,
            daily_reset_at: now,
            active: true,
            session_epoch: 1,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total realized+unrealized move since registration.
    pub fn total_pnl(&self) -> Decimal {
        self.current_balance - self.initial_balance
    }

    /// Move since the most recent daily reset or session start.
    pub fn daily_pnl(&self) -> Decimal {
        self.current_balance - self.daily_start_balance
    }

    pub fn is_blocked(&self) -> bool {
        self.status.is_blocked()
    }

    /// Record a new observed balance. PnL fields are derived, so they stay
    /// consistent by construction.
    pub fn apply_balance(&mut self, new_balance: Decimal, at: DateTime<Utc>) {
        self.previous_balance = self.current_balance;
        self.current_balance = new_balance;
        self.last_balance_update = Some(at);
    }

    /// Begin a new monitoring session: re-arm the epoch fence and snapshot
    /// the daily baseline if the previous one is from an earlier UTC day.
    pub fn begin_session(&mut self, now: DateTime<Utc>) {
        self.session_epoch += 1;
        self.active = true;
        if self.daily_reset_at.date_naive() < now.date_naive() {
            self.daily_start_balance = self.current_balance;
            self.daily_reset_at = now;
        }
    }

    pub fn end_session(&mut self) {
        self.session_epoch += 1;
        self.active = false;
    }

    /// Apply the daily reset boundary. Daily blocks clear; permanent blocks
    /// are untouched by the scheduler and never reach this method.
    pub fn apply_daily_reset(&mut self, now: DateTime<Utc>) {
        if self.status == AccountStatus::DailyBlocked {
            self.status = AccountStatus::Normal;
            self.daily_blocked_at = None;
            self.daily_block_reason = None;
        }
        self.daily_start_balance = self.current_balance;
        self.daily_reset_at = now;
    }

    /// Record a daily block. No-op if a permanent block already holds.
    pub fn block_daily(&mut self, reason: String, at: DateTime<Utc>) {
        if self.status == AccountStatus::PermanentBlocked {
            return;
        }
        self.status = AccountStatus::DailyBlocked;
        self.daily_blocked_at = Some(at);
        self.daily_block_reason = Some(reason);
    }

    /// Record a permanent block. Terminal for the session.
    pub fn block_permanent(&mut self, reason: String, at: DateTime<Utc>) {
        self.status = AccountStatus::PermanentBlocked;
        self.permanent_blocked_at = Some(at);
        self.permanent_block_reason = Some(reason);
    }

    /// Flag a monitoring fault without disturbing an existing block.
    pub fn mark_monitoring_error(&mut self) {
        if !self.status.is_blocked() {
            self.status = AccountStatus::MonitoringError;
        }
    }

    /// Structural invariants that must hold after every committed mutation.
    pub fn check_invariants(&self) -> Result<(), EngineError> {
        if self.current_balance < Decimal::ZERO {
            return Err(EngineError::InvariantBroken {
                client_id: self.client_id.clone(),
                detail: format!("negative balance: {}", self.current_balance),
            });
        }
        if self.status == AccountStatus::DailyBlocked && self.daily_blocked_at.is_none() {
            return Err(EngineError::InvariantBroken {
                client_id: self.client_id.clone(),
                detail: "DAILY_BLOCKED without daily_blocked_at".to_string(),
            });
        }
        if self.status == AccountStatus::PermanentBlocked && self.permanent_blocked_at.is_none() {
            return Err(EngineError::InvariantBroken {
                client_id: self.client_id.clone(),
                detail: "PERMANENT_BLOCKED without permanent_blocked_at".to_string(),
            });
        }
        Ok(())
    }
}
