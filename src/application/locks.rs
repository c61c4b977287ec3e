use crate::domain::ledger::{Movement, Posting};
use crate::domain::ports::WalletStoreRef;
use crate::domain::wallet::{Amount, WalletId};
use crate::error::Result;
use tracing::debug;

/// Reserves and releases a portion of a wallet's balance without moving it.
///
/// Used by withdrawal requests: the amount is locked the moment the request
/// is submitted so the same balance cannot be withdrawn twice concurrently,
/// and released (or converted into a debit) once the gateway answers.
#[derive(Clone)]
pub struct FundLockManager {
    store: WalletStoreRef,
}

impl FundLockManager {
    pub fn new(store: WalletStoreRef) -> Self {
        Self { store }
    }

    /// Fails with `InsufficientFunds` if `available < amount`.
    pub async fn lock_funds(&self, wallet_id: &WalletId, amount: Amount) -> Result<()> {
        self.store
            .apply(vec![Posting::new(
                wallet_id.clone(),
                Movement::Lock(amount),
            )])
            .await?;
        debug!(wallet = %wallet_id, amount = %amount.value(), "funds locked");
        Ok(())
    }

    pub async fn unlock_funds(&self, wallet_id: &WalletId, amount: Amount) -> Result<()> {
        self.store
            .apply(vec![Posting::new(
                wallet_id.clone(),
                Movement::Unlock(amount),
            )])
            .await?;
        debug!(wallet = %wallet_id, amount = %amount.value(), "funds unlocked");
        Ok(())
    }
}
