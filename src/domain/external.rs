use crate::domain::ledger::TransactionCode;
use crate::domain::wallet::{Amount, Currency, WalletId};
use crate::error::WalletError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long a hosted checkout stays valid before the transaction is
/// eligible for timeout cancellation.
pub const CHECKOUT_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalDirection {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalStatus {
    Pending,
    Approved,
    Completed,
    Failed,
    Rejected,
    Cancelled,
}

impl ExternalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Rejected | Self::Cancelled
        )
    }

    /// Allowed edges of the lifecycle state machine. Everything else is an
    /// `InvalidStateTransition`.
    pub fn can_transition(&self, to: ExternalStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, ExternalStatus::Approved)
                | (Self::Pending, ExternalStatus::Failed)
                | (Self::Pending, ExternalStatus::Rejected)
                | (Self::Pending, ExternalStatus::Cancelled)
                | (Self::Approved, ExternalStatus::Completed)
                | (Self::Approved, ExternalStatus::Rejected)
        )
    }
}

/// Append-only audit record of one status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: ExternalStatus,
    pub note: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A deposit or withdrawal mediated by the external payment gateway.
///
/// Tracked through the lifecycle state machine; terminal states are final and
/// every transition appends to `timeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTransaction {
    pub id: Uuid,
    pub wallet_id: WalletId,
    pub provider: String,
    /// Assigned by the gateway once the checkout exists.
    pub provider_transaction_id: Option<String>,
    pub direction: ExternalDirection,
    pub amount: Amount,
    pub currency: Currency,
    pub reference_code: TransactionCode,
    pub status: ExternalStatus,
    pub payment_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub timeline: Vec<TimelineEntry>,
}

impl ExternalTransaction {
    pub fn pending(
        wallet_id: WalletId,
        provider: impl Into<String>,
        direction: ExternalDirection,
        amount: Amount,
        currency: Currency,
        reference_code: TransactionCode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            provider: provider.into(),
            provider_transaction_id: None,
            direction,
            amount,
            currency,
            reference_code,
            status: ExternalStatus::Pending,
            payment_url: None,
            expires_at: Some(now + Duration::minutes(CHECKOUT_TTL_MINUTES)),
            timeline: vec![TimelineEntry {
                status: ExternalStatus::Pending,
                note: Some("initiated".to_string()),
                created_by: None,
                created_at: now,
            }],
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ExternalStatus::Pending
            && self.expires_at.is_some_and(|deadline| deadline < now)
    }

    /// Moves to `to` if the edge exists, appending a timeline entry.
    pub fn transition(
        &mut self,
        to: ExternalStatus,
        note: Option<String>,
        actor: Option<String>,
    ) -> Result<(), WalletError> {
        if !self.status.can_transition(to) {
            return Err(WalletError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.timeline.push(TimelineEntry {
            status: to,
            note,
            created_by: actor,
            created_at: Utc::now(),
        });
        Ok(())
    }
}
