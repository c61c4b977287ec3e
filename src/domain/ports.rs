use crate::domain::events::WalletEvent;
use crate::domain::external::ExternalTransaction;
use crate::domain::ledger::{Direction, EntryKind, LedgerEntry, Posting, TransactionCode};
use crate::domain::wallet::{Amount, Balance, Currency, Wallet, WalletId};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Available/locked split of a wallet's balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    pub available: Balance,
    pub locked: Balance,
}

/// Owns wallet balance state and its invariants.
///
/// `apply` is the single atomic unit of the engine: it takes exclusive locks
/// on every touched wallet row in ascending id order, validates all movements
/// against staged copies, then commits balances together with the ledger rows
/// of entry-bearing postings. Either everything lands or nothing does.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn create(&self, wallet: Wallet) -> Result<()>;
    async fn get(&self, id: &WalletId) -> Result<Option<Wallet>>;
    async fn get_all(&self) -> Result<Vec<Wallet>>;
    async fn balance_of(&self, id: &WalletId) -> Result<BalanceView>;
    /// Entries are returned in posting order; postings without an entry spec
    /// contribute nothing to the result.
    async fn apply(&self, postings: Vec<Posting>) -> Result<Vec<LedgerEntry>>;
}

pub type WalletStoreRef = Arc<dyn WalletStore>;

/// Appends immutable transaction records for every balance mutation.
#[async_trait]
pub trait LedgerRecorder: Send + Sync {
    /// Idempotent append keyed on `(wallet_id, code)`: a retry with the same
    /// code and payload returns the existing record; the same code with a
    /// different payload is a `DuplicateTransactionCode` conflict.
    async fn record(
        &self,
        wallet_id: &WalletId,
        amount: Amount,
        direction: Direction,
        kind: EntryKind,
        code: TransactionCode,
    ) -> Result<LedgerEntry>;
    async fn find_by_code(
        &self,
        wallet_id: &WalletId,
        code: &TransactionCode,
    ) -> Result<Option<LedgerEntry>>;
    async fn entries(&self, wallet_id: &WalletId) -> Result<Vec<LedgerEntry>>;
}

pub type LedgerRecorderRef = Arc<dyn LedgerRecorder>;

/// Persistence for gateway-facing deposit/withdraw transactions.
#[async_trait]
pub trait ExternalStore: Send + Sync {
    async fn insert(&self, tx: ExternalTransaction) -> Result<()>;
    async fn get(&self, id: &Uuid) -> Result<Option<ExternalTransaction>>;
    async fn find_by_reference(&self, code: &TransactionCode)
    -> Result<Option<ExternalTransaction>>;
    async fn find_by_provider_id(&self, provider_tx_id: &str)
    -> Result<Option<ExternalTransaction>>;
    async fn pending(&self) -> Result<Vec<ExternalTransaction>>;
    async fn update(&self, tx: ExternalTransaction) -> Result<()>;
}

pub type ExternalStoreRef = Arc<dyn ExternalStore>;

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub reference: TransactionCode,
    pub amount: Amount,
    pub currency: Currency,
    pub return_url: String,
    pub ip_address: String,
}

#[derive(Debug, Clone)]
pub struct HostedCheckout {
    pub payment_url: String,
    pub provider: String,
    pub provider_transaction_id: String,
    pub checkout_fields: HashMap<String, String>,
}

/// Provider confirmation after the gateway-specific payload has been parsed.
#[derive(Debug, Clone)]
pub struct GatewayConfirmation {
    pub success: bool,
    pub amount: Amount,
    pub provider_transaction_id: Option<String>,
    pub reference_code: Option<TransactionCode>,
    pub raw: serde_json::Value,
}

/// Narrow port over the external payment gateway. The concrete provider
/// protocol (bank codes, signatures, redirect pages) lives behind it.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_url(&self, request: &PaymentRequest) -> Result<HostedCheckout>;
    fn parse_confirmation(&self, payload: &serde_json::Value) -> Result<GatewayConfirmation>;
}

pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;

/// Outbound event bus for downstream modules.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: WalletEvent) -> Result<()>;
}

pub type EventBusRef = Arc<dyn EventBus>;
