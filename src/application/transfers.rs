use crate::domain::events::WalletEvent;
use crate::domain::ledger::{EntryKind, LedgerEntry, Movement, Posting, TransactionCode};
use crate::domain::ports::{EventBusRef, WalletStoreRef};
use crate::domain::wallet::{Amount, Wallet, WalletId};
use crate::error::{Result, WalletError};
use rust_decimal::Decimal;
use tracing::info;

/// The two ledger halves of a completed transfer.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub debit: LedgerEntry,
    pub credit: LedgerEntry,
}

/// Moves funds between two wallets as one atomic unit and routes multi-step
/// business flows through the system ESCROW wallet.
///
/// Every transfer produces a debit/credit pair via the ledger; if either leg
/// fails the whole unit rolls back and no partial transfer is observable.
#[derive(Clone)]
pub struct TransferCoordinator {
    store: WalletStoreRef,
    events: EventBusRef,
}

impl TransferCoordinator {
    pub fn new(store: WalletStoreRef, events: EventBusRef) -> Self {
        Self { store, events }
    }

    async fn wallet(&self, id: &WalletId) -> Result<Wallet> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| WalletError::UnknownWallet(id.clone()))
    }

    /// Atomic two-wallet transfer. The debit leg carries `code`, the credit
    /// leg a derived paired code, so retries with the same code are
    /// idempotent on both halves.
    pub async fn transfer(
        &self,
        source: &WalletId,
        destination: &WalletId,
        amount: Amount,
        code: TransactionCode,
        kind: EntryKind,
    ) -> Result<TransferReceipt> {
        if source == destination {
            return Err(WalletError::Validation(
                "transfer requires two distinct wallets".to_string(),
            ));
        }
        let src = self.wallet(source).await?;
        let dst = self.wallet(destination).await?;
        if src.currency != dst.currency {
            return Err(WalletError::CurrencyMismatch {
                expected: src.currency,
                got: dst.currency,
            });
        }

        let entries = self
            .store
            .apply(vec![
                Posting::recorded(source.clone(), Movement::Debit(amount), kind, code.clone()),
                Posting::recorded(
                    destination.clone(),
                    Movement::Credit(amount),
                    kind,
                    code.credit_leg(),
                ),
            ])
            .await?;

        let mut entries = entries.into_iter();
        let (debit, credit) = match (entries.next(), entries.next()) {
            (Some(debit), Some(credit)) => (debit, credit),
            _ => {
                return Err(WalletError::AtomicityViolation(
                    "transfer did not produce a debit/credit pair".to_string(),
                ));
            }
        };

        info!(
            source = %source,
            destination = %destination,
            amount = %amount.value(),
            code = %code,
            "transfer completed"
        );
        self.events
            .publish(WalletEvent::TransferCompleted {
                source: source.clone(),
                destination: destination.clone(),
                amount,
                code,
            })
            .await?;

        Ok(TransferReceipt { debit, credit })
    }

    /// Debits the payer and parks the funds in ESCROW while the business
    /// outcome (approval, event completion, refund window) is pending.
    pub async fn transfer_to_escrow(
        &self,
        payer: &WalletId,
        amount: Amount,
        code: TransactionCode,
    ) -> Result<TransferReceipt> {
        self.transfer(payer, &WalletId::escrow(), amount, code, EntryKind::Payment)
            .await
    }

    /// Pays escrowed funds out to the payee on a successful business outcome.
    pub async fn transfer_from_escrow_to_account(
        &self,
        payee: &WalletId,
        amount: Amount,
        code: TransactionCode,
    ) -> Result<TransferReceipt> {
        self.transfer(&WalletId::escrow(), payee, amount, code, EntryKind::Payout)
            .await
    }

    /// Sweeps fees or cancellation retentions from ESCROW into REVENUE.
    pub async fn transfer_from_escrow_to_system(
        &self,
        amount: Amount,
        code: TransactionCode,
    ) -> Result<TransferReceipt> {
        self.transfer(
            &WalletId::escrow(),
            &WalletId::revenue(),
            amount,
            code,
            EntryKind::Fee,
        )
        .await
    }

    /// Returns `refund_percentage` (0..=1) of `total` from ESCROW to the
    /// original payer; the remainder sweeps to REVENUE. One atomic unit.
    pub async fn refund_from_escrow(
        &self,
        payer: &WalletId,
        total: Amount,
        refund_percentage: Decimal,
        code: TransactionCode,
    ) -> Result<Vec<LedgerEntry>> {
        if refund_percentage < Decimal::ZERO || refund_percentage > Decimal::ONE {
            return Err(WalletError::Validation(format!(
                "refund percentage {refund_percentage} outside 0..=1"
            )));
        }
        let escrow = self.wallet(&WalletId::escrow()).await?;
        let target = self.wallet(payer).await?;
        if escrow.currency != target.currency {
            return Err(WalletError::CurrencyMismatch {
                expected: escrow.currency,
                got: target.currency,
            });
        }

        let refund_value = (total.value() * refund_percentage).round_dp(4);
        let retained_value = total.value() - refund_value;

        let mut postings = vec![Posting::recorded(
            WalletId::escrow(),
            Movement::Debit(total),
            EntryKind::Refund,
            code.clone(),
        )];
        if refund_value > Decimal::ZERO {
            postings.push(Posting::recorded(
                payer.clone(),
                Movement::Credit(Amount::new(refund_value)?),
                EntryKind::Refund,
                code.derived("refund"),
            ));
        }
        if retained_value > Decimal::ZERO {
            postings.push(Posting::recorded(
                WalletId::revenue(),
                Movement::Credit(Amount::new(retained_value)?),
                EntryKind::Fee,
                code.derived("fee"),
            ));
        }

        let entries = self.store.apply(postings).await?;
        info!(
            payer = %payer,
            total = %total.value(),
            refunded = %refund_value,
            retained = %retained_value,
            code = %code,
            "escrow refund completed"
        );
        Ok(entries)
    }
}
