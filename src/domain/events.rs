use crate::domain::ledger::TransactionCode;
use crate::domain::wallet::{Amount, WalletId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain events published on the outbound event bus for downstream
/// listeners (notifications, analytics). This subsystem does not depend on
/// any of them existing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WalletEvent {
    DepositConfirmed {
        wallet_id: WalletId,
        external_id: Uuid,
        amount: Amount,
    },
    WithdrawalCompleted {
        wallet_id: WalletId,
        external_id: Uuid,
        amount: Amount,
    },
    WithdrawalFailed {
        wallet_id: WalletId,
        external_id: Uuid,
        amount: Amount,
    },
    TransferCompleted {
        source: WalletId,
        destination: WalletId,
        amount: Amount,
        code: TransactionCode,
    },
    ExternalCancelled {
        wallet_id: WalletId,
        external_id: Uuid,
    },
}
