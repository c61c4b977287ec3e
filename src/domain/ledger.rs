use crate::domain::wallet::{Amount, Currency, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Caller-supplied idempotency/reference code, unique per wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionCode(String);

impl TransactionCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Code for the credit half of a transfer, derived from the debit code so
    /// the pair can be reassembled and retries stay idempotent on both legs.
    pub fn credit_leg(&self) -> Self {
        Self(format!("{}.credit", self.0))
    }

    pub fn derived(&self, suffix: &str) -> Self {
        Self(format!("{}.{}", self.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Payment,
    Refund,
    Payout,
    Transfer,
    Fee,
    Fine,
    Deposit,
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

/// Immutable record of one debit or credit against a wallet.
///
/// One half of a transfer; a transfer always produces exactly two entries
/// created in the same atomic unit. Never updated or deleted once COMPLETED;
/// a correction is a new, offsetting entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub wallet_id: WalletId,
    pub amount: Amount,
    pub currency: Currency,
    pub direction: Direction,
    pub kind: EntryKind,
    pub status: EntryStatus,
    pub code: TransactionCode,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn completed(
        wallet_id: WalletId,
        amount: Amount,
        currency: Currency,
        direction: Direction,
        kind: EntryKind,
        code: TransactionCode,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            amount,
            currency,
            direction,
            kind,
            status: EntryStatus::Completed,
            code,
            created_at: Utc::now(),
        }
    }

    /// True when `other` is a retry of the same logical append.
    pub fn matches(&self, amount: Amount, direction: Direction, kind: EntryKind) -> bool {
        self.amount == amount && self.direction == direction && self.kind == kind
    }
}

/// One balance movement inside an atomic unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Movement {
    Credit(Amount),
    Debit(Amount),
    /// Reserve without moving balance.
    Lock(Amount),
    Unlock(Amount),
    /// Convert a reservation into a debit; balance and locked drop together.
    DebitLocked(Amount),
}

impl Movement {
    pub fn amount(&self) -> Amount {
        match self {
            Movement::Credit(a)
            | Movement::Debit(a)
            | Movement::Lock(a)
            | Movement::Unlock(a)
            | Movement::DebitLocked(a) => *a,
        }
    }

    /// Ledger direction for movements that produce an entry.
    pub fn direction(&self) -> Direction {
        match self {
            Movement::Credit(_) => Direction::Credit,
            _ => Direction::Debit,
        }
    }
}

/// Ledger metadata attached to a posting. Postings without an entry spec
/// (lock/unlock reservations) mutate the wallet but leave no ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySpec {
    pub kind: EntryKind,
    pub code: TransactionCode,
}

/// A single wallet mutation scheduled into an atomic `apply` batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub wallet_id: WalletId,
    pub movement: Movement,
    pub entry: Option<EntrySpec>,
}

impl Posting {
    pub fn new(wallet_id: WalletId, movement: Movement) -> Self {
        Self {
            wallet_id,
            movement,
            entry: None,
        }
    }

    pub fn recorded(
        wallet_id: WalletId,
        movement: Movement,
        kind: EntryKind,
        code: TransactionCode,
    ) -> Self {
        Self {
            wallet_id,
            movement,
            entry: Some(EntrySpec { kind, code }),
        }
    }
}
