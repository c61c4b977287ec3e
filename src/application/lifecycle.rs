use crate::application::locks::FundLockManager;
use crate::domain::events::WalletEvent;
use crate::domain::external::{ExternalDirection, ExternalStatus, ExternalTransaction};
use crate::domain::ledger::{EntryKind, Movement, Posting, TransactionCode};
use crate::domain::ports::{
    EventBusRef, ExternalStoreRef, GatewayConfirmation, PaymentGatewayRef, PaymentRequest,
    WalletStoreRef,
};
use crate::domain::wallet::{Amount, Currency, Wallet, WalletId};
use crate::error::{Result, WalletError};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Caller context forwarded to the hosted checkout.
#[derive(Debug, Clone)]
pub struct CheckoutDetails {
    pub return_url: String,
    pub ip_address: String,
}

/// Tracks deposit/withdraw requests against the external payment gateway and
/// reconciles its at-least-once webhook callbacks.
///
/// Webhook handling is idempotent twice over: terminal transactions are
/// returned untouched, and the ledger's transaction-code uniqueness stops a
/// replay that races past the status check from crediting twice.
#[derive(Clone)]
pub struct ExternalTransactionManager {
    store: WalletStoreRef,
    externals: ExternalStoreRef,
    gateway: PaymentGatewayRef,
    locks: FundLockManager,
    events: EventBusRef,
}

impl ExternalTransactionManager {
    pub fn new(
        store: WalletStoreRef,
        externals: ExternalStoreRef,
        gateway: PaymentGatewayRef,
        events: EventBusRef,
    ) -> Self {
        let locks = FundLockManager::new(store.clone());
        Self {
            store,
            externals,
            gateway,
            locks,
            events,
        }
    }

    async fn wallet(&self, id: &WalletId) -> Result<Wallet> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| WalletError::UnknownWallet(id.clone()))
    }

    /// A reference code may only be retried with the identical request; the
    /// same code carrying a different wallet, direction, amount or currency
    /// is a conflict, not a replay.
    fn ensure_matching_request(
        existing: &ExternalTransaction,
        wallet_id: &WalletId,
        direction: ExternalDirection,
        amount: Amount,
        currency: &Currency,
    ) -> Result<()> {
        if existing.wallet_id != *wallet_id
            || existing.direction != direction
            || existing.amount != amount
            || existing.currency != *currency
        {
            return Err(WalletError::DuplicateTransactionCode {
                wallet: wallet_id.clone(),
                code: existing.reference_code.clone(),
            });
        }
        Ok(())
    }

    fn check_currency(wallet: &Wallet, currency: &Currency) -> Result<()> {
        if &wallet.currency != currency {
            return Err(WalletError::CurrencyMismatch {
                expected: wallet.currency.clone(),
                got: currency.clone(),
            });
        }
        Ok(())
    }

    /// Obtains the redirect URL for a pending transaction. Runs after every
    /// wallet lock has been released; the gateway call never holds one.
    async fn attach_checkout(
        &self,
        tx: &mut ExternalTransaction,
        checkout: &CheckoutDetails,
    ) -> Result<()> {
        let hosted = self
            .gateway
            .create_payment_url(&PaymentRequest {
                reference: tx.reference_code.clone(),
                amount: tx.amount,
                currency: tx.currency.clone(),
                return_url: checkout.return_url.clone(),
                ip_address: checkout.ip_address.clone(),
            })
            .await?;
        tx.payment_url = Some(hosted.payment_url);
        tx.provider = hosted.provider;
        tx.provider_transaction_id = Some(hosted.provider_transaction_id);
        self.externals.update(tx.clone()).await
    }

    /// Creates a PENDING deposit and obtains its hosted checkout. Retrying
    /// with an already-used `reference` returns the existing transaction.
    pub async fn initiate_deposit(
        &self,
        wallet_id: &WalletId,
        amount: Amount,
        currency: Currency,
        reference: TransactionCode,
        checkout: &CheckoutDetails,
    ) -> Result<ExternalTransaction> {
        if let Some(mut existing) = self.externals.find_by_reference(&reference).await? {
            Self::ensure_matching_request(
                &existing,
                wallet_id,
                ExternalDirection::Deposit,
                amount,
                &currency,
            )?;
            // A crash between insert and checkout leaves no URL; repair on retry.
            if existing.status == ExternalStatus::Pending && existing.payment_url.is_none() {
                self.attach_checkout(&mut existing, checkout).await?;
            }
            return Ok(existing);
        }
        let wallet = self.wallet(wallet_id).await?;
        if wallet.frozen {
            return Err(WalletError::WalletFrozen(wallet_id.clone()));
        }
        Self::check_currency(&wallet, &currency)?;

        let mut tx = ExternalTransaction::pending(
            wallet_id.clone(),
            "",
            ExternalDirection::Deposit,
            amount,
            currency,
            reference,
        );
        self.externals.insert(tx.clone()).await?;
        self.attach_checkout(&mut tx, checkout).await?;
        info!(wallet = %wallet_id, amount = %amount.value(), reference = %tx.reference_code, "deposit initiated");
        Ok(tx)
    }

    /// Creates a PENDING withdrawal, locking the amount immediately so the
    /// same balance cannot be withdrawn twice concurrently.
    pub async fn initiate_withdrawal(
        &self,
        wallet_id: &WalletId,
        amount: Amount,
        currency: Currency,
        reference: TransactionCode,
        checkout: &CheckoutDetails,
    ) -> Result<ExternalTransaction> {
        if let Some(mut existing) = self.externals.find_by_reference(&reference).await? {
            Self::ensure_matching_request(
                &existing,
                wallet_id,
                ExternalDirection::Withdraw,
                amount,
                &currency,
            )?;
            if existing.status == ExternalStatus::Pending && existing.payment_url.is_none() {
                self.attach_checkout(&mut existing, checkout).await?;
            }
            return Ok(existing);
        }
        let wallet = self.wallet(wallet_id).await?;
        if wallet.frozen {
            return Err(WalletError::WalletFrozen(wallet_id.clone()));
        }
        Self::check_currency(&wallet, &currency)?;

        self.locks.lock_funds(wallet_id, amount).await?;
        let mut tx = ExternalTransaction::pending(
            wallet_id.clone(),
            "",
            ExternalDirection::Withdraw,
            amount,
            currency,
            reference,
        );
        if let Err(err) = self.externals.insert(tx.clone()).await {
            // Lost a same-reference race after locking; release the reservation.
            self.locks.unlock_funds(wallet_id, amount).await?;
            return Err(err);
        }
        self.attach_checkout(&mut tx, checkout).await?;
        info!(wallet = %wallet_id, amount = %amount.value(), reference = %tx.reference_code, "withdrawal initiated, funds locked");
        Ok(tx)
    }

    async fn resolve(&self, conf: &GatewayConfirmation) -> Result<ExternalTransaction> {
        if let Some(provider_id) = &conf.provider_transaction_id
            && let Some(tx) = self.externals.find_by_provider_id(provider_id).await?
        {
            return Ok(tx);
        }
        if let Some(reference) = &conf.reference_code
            && let Some(tx) = self.externals.find_by_reference(reference).await?
        {
            return Ok(tx);
        }
        Err(WalletError::UnknownExternalTransaction(format!(
            "provider_tx={:?} ref={:?}",
            conf.provider_transaction_id, conf.reference_code
        )))
    }

    async fn settle(&self, tx: &mut ExternalTransaction, note: &str) -> Result<()> {
        if tx.status == ExternalStatus::Pending {
            tx.transition(
                ExternalStatus::Approved,
                Some("gateway confirmed".to_string()),
                None,
            )?;
        }
        tx.transition(ExternalStatus::Completed, Some(note.to_string()), None)?;
        self.externals.update(tx.clone()).await
    }

    /// Reconciles one provider webhook. Safe to call arbitrarily many times
    /// for the same external transaction.
    pub async fn confirm_from_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> Result<ExternalTransaction> {
        let conf = self.gateway.parse_confirmation(payload)?;
        let mut tx = self.resolve(&conf).await?;

        if tx.status.is_terminal() {
            debug!(id = %tx.id, status = ?tx.status, "duplicate webhook delivery, nothing to do");
            return Ok(tx);
        }
        if conf.amount != tx.amount {
            warn!(id = %tx.id, expected = %tx.amount.value(), got = %conf.amount.value(), "confirmation amount mismatch");
            return Err(WalletError::Validation(format!(
                "confirmation amount {} does not match transaction amount {}",
                conf.amount.value(),
                tx.amount.value()
            )));
        }
        if tx.provider_transaction_id.is_none() {
            tx.provider_transaction_id = conf.provider_transaction_id.clone();
        }

        if conf.success {
            match tx.direction {
                ExternalDirection::Deposit => {
                    // Ledger code uniqueness makes the credit single-shot even
                    // if a replay races past the terminal-state check.
                    self.store
                        .apply(vec![Posting::recorded(
                            tx.wallet_id.clone(),
                            Movement::Credit(tx.amount),
                            EntryKind::Deposit,
                            tx.reference_code.clone(),
                        )])
                        .await?;
                    self.settle(&mut tx, "deposit settled").await?;
                    info!(id = %tx.id, wallet = %tx.wallet_id, amount = %tx.amount.value(), "deposit confirmed");
                    self.events
                        .publish(WalletEvent::DepositConfirmed {
                            wallet_id: tx.wallet_id.clone(),
                            external_id: tx.id,
                            amount: tx.amount,
                        })
                        .await?;
                }
                ExternalDirection::Withdraw => {
                    self.store
                        .apply(vec![Posting::recorded(
                            tx.wallet_id.clone(),
                            Movement::DebitLocked(tx.amount),
                            EntryKind::Withdrawal,
                            tx.reference_code.clone(),
                        )])
                        .await?;
                    self.settle(&mut tx, "withdrawal settled").await?;
                    info!(id = %tx.id, wallet = %tx.wallet_id, amount = %tx.amount.value(), "withdrawal completed");
                    self.events
                        .publish(WalletEvent::WithdrawalCompleted {
                            wallet_id: tx.wallet_id.clone(),
                            external_id: tx.id,
                            amount: tx.amount,
                        })
                        .await?;
                }
            }
        } else {
            tx.transition(
                ExternalStatus::Failed,
                Some("gateway reported failure".to_string()),
                None,
            )?;
            if tx.direction == ExternalDirection::Withdraw {
                // Recorded under a derived code: a redelivered failure webhook
                // that races past the terminal-state check replays this posting
                // instead of unlocking a second time.
                self.store
                    .apply(vec![Posting::recorded(
                        tx.wallet_id.clone(),
                        Movement::Unlock(tx.amount),
                        EntryKind::Withdrawal,
                        tx.reference_code.derived("unlock"),
                    )])
                    .await?;
            }
            self.externals.update(tx.clone()).await?;
            warn!(id = %tx.id, wallet = %tx.wallet_id, "external transaction failed");
            if tx.direction == ExternalDirection::Withdraw {
                self.events
                    .publish(WalletEvent::WithdrawalFailed {
                        wallet_id: tx.wallet_id.clone(),
                        external_id: tx.id,
                        amount: tx.amount,
                    })
                    .await?;
            }
        }
        Ok(tx)
    }

    /// Admin rejection; withdrawals only, valid from PENDING or APPROVED.
    pub async fn reject(
        &self,
        id: &Uuid,
        actor: impl Into<String>,
        note: Option<String>,
    ) -> Result<ExternalTransaction> {
        let mut tx = self
            .externals
            .get(id)
            .await?
            .ok_or_else(|| WalletError::UnknownExternalTransaction(id.to_string()))?;
        if tx.direction == ExternalDirection::Deposit {
            return Err(WalletError::Validation(
                "only withdrawals can be rejected".to_string(),
            ));
        }
        tx.transition(ExternalStatus::Rejected, note, Some(actor.into()))?;
        self.locks.unlock_funds(&tx.wallet_id, tx.amount).await?;
        self.externals.update(tx.clone()).await?;
        warn!(id = %tx.id, wallet = %tx.wallet_id, "withdrawal rejected");
        Ok(tx)
    }

    async fn cancel_tx(
        &self,
        mut tx: ExternalTransaction,
        note: String,
        actor: Option<String>,
    ) -> Result<ExternalTransaction> {
        tx.transition(ExternalStatus::Cancelled, Some(note), actor)?;
        if tx.direction == ExternalDirection::Withdraw {
            self.locks.unlock_funds(&tx.wallet_id, tx.amount).await?;
        }
        self.externals.update(tx.clone()).await?;
        self.events
            .publish(WalletEvent::ExternalCancelled {
                wallet_id: tx.wallet_id.clone(),
                external_id: tx.id,
            })
            .await?;
        Ok(tx)
    }

    /// Explicit cancellation; only valid from PENDING.
    pub async fn cancel(
        &self,
        id: &Uuid,
        actor: impl Into<String>,
    ) -> Result<ExternalTransaction> {
        let tx = self
            .externals
            .get(id)
            .await?
            .ok_or_else(|| WalletError::UnknownExternalTransaction(id.to_string()))?;
        self.cancel_tx(tx, "cancelled".to_string(), Some(actor.into()))
            .await
    }

    /// Cancels every PENDING transaction whose checkout deadline has passed.
    /// Returns how many were cancelled.
    pub async fn expire_pending(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for tx in self.externals.pending().await? {
            if tx.is_expired(now) {
                self.cancel_tx(tx, "expired".to_string(), None).await?;
                expired += 1;
            }
        }
        Ok(expired)
    }
}
