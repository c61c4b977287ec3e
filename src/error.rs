use crate::domain::external::ExternalStatus;
use crate::domain::ledger::TransactionCode;
use crate::domain::wallet::{Currency, WalletId};
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalletError>;

/// Error taxonomy for the wallet subsystem.
///
/// Business-rule failures (`InsufficientFunds`, `WalletFrozen`, ...) are
/// recoverable and surfaced to the caller; `AtomicityViolation` signals an
/// internal invariant breach and must abort the whole operation.
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("insufficient funds in wallet {wallet}: requested {requested}, available {available}")]
    InsufficientFunds {
        wallet: WalletId,
        requested: Decimal,
        available: Decimal,
    },
    #[error("wallet {0} is frozen")]
    WalletFrozen(WalletId),
    #[error("currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },
    #[error("transaction code {code} already used on wallet {wallet} with a different payload")]
    DuplicateTransactionCode {
        wallet: WalletId,
        code: TransactionCode,
    },
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: ExternalStatus,
        to: ExternalStatus,
    },
    #[error("unknown wallet {0}")]
    UnknownWallet(WalletId),
    #[error("unknown external transaction: {0}")]
    UnknownExternalTransaction(String),
    #[error("transfer atomicity violation: {0}")]
    AtomicityViolation(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for WalletError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Internal(Box::new(e))
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(Box::new(e))
    }
}
