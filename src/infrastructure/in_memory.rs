use crate::domain::external::{ExternalStatus, ExternalTransaction};
use crate::domain::ledger::{
    Direction, EntryKind, EntrySpec, LedgerEntry, Movement, Posting, TransactionCode,
};
use crate::domain::ports::{BalanceView, ExternalStore, LedgerRecorder, WalletStore};
use crate::domain::wallet::{Amount, Wallet, WalletId};
use crate::error::{Result, WalletError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    entries: HashMap<Uuid, LedgerEntry>,
    by_wallet: HashMap<WalletId, Vec<Uuid>>,
    by_code: HashMap<(WalletId, TransactionCode), Uuid>,
}

impl LedgerState {
    fn find(&self, wallet_id: &WalletId, code: &TransactionCode) -> Option<&LedgerEntry> {
        self.by_code
            .get(&(wallet_id.clone(), code.clone()))
            .and_then(|id| self.entries.get(id))
    }

    fn append(&mut self, entry: LedgerEntry) {
        self.by_code
            .insert((entry.wallet_id.clone(), entry.code.clone()), entry.id);
        self.by_wallet
            .entry(entry.wallet_id.clone())
            .or_default()
            .push(entry.id);
        self.entries.insert(entry.id, entry);
    }
}

#[derive(Default)]
struct ExternalState {
    by_id: HashMap<Uuid, ExternalTransaction>,
    by_reference: HashMap<TransactionCode, Uuid>,
    by_provider: HashMap<String, Uuid>,
}

#[derive(Default)]
struct Inner {
    /// One mutex per wallet row; `apply` takes them in ascending id order.
    wallets: RwLock<BTreeMap<WalletId, Arc<Mutex<Wallet>>>>,
    ledger: Mutex<LedgerState>,
    externals: Mutex<ExternalState>,
}

/// Thread-safe in-memory store backing all three aggregates.
///
/// `Clone` shares the underlying state, so the same instance can be handed
/// out as `WalletStore`, `LedgerRecorder` and `ExternalStore` at once.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn wallet_handle(&self, id: &WalletId) -> Result<Arc<Mutex<Wallet>>> {
        let wallets = self.inner.wallets.read().await;
        wallets
            .get(id)
            .cloned()
            .ok_or_else(|| WalletError::UnknownWallet(id.clone()))
    }

    /// Locks every distinct wallet touched by the batch, ascending by id.
    async fn lock_rows(
        &self,
        postings: &[Posting],
    ) -> Result<HashMap<WalletId, OwnedMutexGuard<Wallet>>> {
        let mut ids: Vec<WalletId> = postings.iter().map(|p| p.wallet_id.clone()).collect();
        ids.sort();
        ids.dedup();

        let handles = {
            let wallets = self.inner.wallets.read().await;
            let mut handles = Vec::with_capacity(ids.len());
            for id in ids {
                let handle = wallets
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| WalletError::UnknownWallet(id.clone()))?;
                handles.push((id, handle));
            }
            handles
        };

        let mut guards = HashMap::with_capacity(handles.len());
        for (id, handle) in handles {
            guards.insert(id, handle.lock_owned().await);
        }
        Ok(guards)
    }

    /// Idempotency barrier: if every entry-bearing posting already has a
    /// ledger row under its code, the batch is a retry and the prior rows are
    /// returned. A code reused with a different payload, or a batch where
    /// only some codes exist, is a conflict.
    fn detect_replay(
        ledger: &LedgerState,
        coded: &[(&Posting, &EntrySpec)],
    ) -> Result<Option<Vec<LedgerEntry>>> {
        if coded.is_empty() {
            return Ok(None);
        }
        let existing: Vec<Option<&LedgerEntry>> = coded
            .iter()
            .map(|(p, spec)| ledger.find(&p.wallet_id, &spec.code))
            .collect();

        if existing.iter().all(Option::is_none) {
            return Ok(None);
        }

        let mut replay = Vec::with_capacity(coded.len());
        for ((posting, spec), found) in coded.iter().zip(&existing) {
            match found {
                Some(entry)
                    if entry.matches(
                        posting.movement.amount(),
                        posting.movement.direction(),
                        spec.kind,
                    ) =>
                {
                    replay.push((*entry).clone());
                }
                _ => {
                    return Err(WalletError::DuplicateTransactionCode {
                        wallet: posting.wallet_id.clone(),
                        code: spec.code.clone(),
                    });
                }
            }
        }
        Ok(Some(replay))
    }

    fn stage(
        guards: &HashMap<WalletId, OwnedMutexGuard<Wallet>>,
        postings: &[Posting],
    ) -> Result<HashMap<WalletId, Wallet>> {
        let mut staged: HashMap<WalletId, Wallet> = guards
            .iter()
            .map(|(id, guard)| (id.clone(), (**guard).clone()))
            .collect();

        for posting in postings {
            let wallet = staged.get_mut(&posting.wallet_id).ok_or_else(|| {
                WalletError::AtomicityViolation(format!(
                    "no row lock held for wallet {}",
                    posting.wallet_id
                ))
            })?;
            match posting.movement {
                Movement::Credit(amount) => wallet.credit(amount)?,
                Movement::Debit(amount) => wallet.debit(amount)?,
                Movement::Lock(amount) => wallet.lock(amount)?,
                Movement::Unlock(amount) => wallet.unlock(amount)?,
                Movement::DebitLocked(amount) => wallet.debit_locked(amount)?,
            }
            if posting.entry.is_some() {
                wallet.total_transactions += 1;
            }
        }
        Ok(staged)
    }
}

#[async_trait]
impl WalletStore for InMemoryLedger {
    async fn create(&self, wallet: Wallet) -> Result<()> {
        let mut wallets = self.inner.wallets.write().await;
        if wallets.contains_key(&wallet.id) {
            return Err(WalletError::Validation(format!(
                "wallet {} already exists",
                wallet.id
            )));
        }
        wallets.insert(wallet.id.clone(), Arc::new(Mutex::new(wallet)));
        Ok(())
    }

    async fn get(&self, id: &WalletId) -> Result<Option<Wallet>> {
        let wallets = self.inner.wallets.read().await;
        match wallets.get(id) {
            Some(handle) => Ok(Some(handle.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        let handles: Vec<Arc<Mutex<Wallet>>> = {
            let wallets = self.inner.wallets.read().await;
            wallets.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.lock().await.clone());
        }
        Ok(out)
    }

    async fn balance_of(&self, id: &WalletId) -> Result<BalanceView> {
        let handle = self.wallet_handle(id).await?;
        let wallet = handle.lock().await;
        Ok(BalanceView {
            available: wallet.available(),
            locked: wallet.locked_balance,
        })
    }

    async fn apply(&self, postings: Vec<Posting>) -> Result<Vec<LedgerEntry>> {
        if postings.is_empty() {
            return Ok(Vec::new());
        }

        let mut guards = self.lock_rows(&postings).await?;
        let mut ledger = self.inner.ledger.lock().await;

        let coded: Vec<(&Posting, &EntrySpec)> = postings
            .iter()
            .filter_map(|p| p.entry.as_ref().map(|spec| (p, spec)))
            .collect();
        if let Some(prior) = Self::detect_replay(&ledger, &coded)? {
            return Ok(prior);
        }

        // Validate every movement on staged copies; nothing is written until
        // the whole batch has passed.
        let staged = Self::stage(&guards, &postings)?;

        let mut recorded = Vec::with_capacity(coded.len());
        for (posting, spec) in &coded {
            let currency = staged
                .get(&posting.wallet_id)
                .map(|w| w.currency.clone())
                .ok_or_else(|| {
                    WalletError::AtomicityViolation(format!(
                        "staged wallet {} missing at commit",
                        posting.wallet_id
                    ))
                })?;
            let entry = LedgerEntry::completed(
                posting.wallet_id.clone(),
                posting.movement.amount(),
                currency,
                posting.movement.direction(),
                spec.kind,
                spec.code.clone(),
            );
            ledger.append(entry.clone());
            recorded.push(entry);
        }

        for (id, wallet) in staged {
            if let Some(guard) = guards.get_mut(&id) {
                **guard = wallet;
            }
        }
        Ok(recorded)
    }
}

#[async_trait]
impl LedgerRecorder for InMemoryLedger {
    async fn record(
        &self,
        wallet_id: &WalletId,
        amount: Amount,
        direction: Direction,
        kind: EntryKind,
        code: TransactionCode,
    ) -> Result<LedgerEntry> {
        let handle = self.wallet_handle(wallet_id).await?;
        let mut wallet = handle.lock().await;
        let mut ledger = self.inner.ledger.lock().await;

        if let Some(existing) = ledger.find(wallet_id, &code) {
            if existing.matches(amount, direction, kind) {
                return Ok(existing.clone());
            }
            return Err(WalletError::DuplicateTransactionCode {
                wallet: wallet_id.clone(),
                code,
            });
        }

        let entry = LedgerEntry::completed(
            wallet_id.clone(),
            amount,
            wallet.currency.clone(),
            direction,
            kind,
            code,
        );
        ledger.append(entry.clone());
        wallet.total_transactions += 1;
        Ok(entry)
    }

    async fn find_by_code(
        &self,
        wallet_id: &WalletId,
        code: &TransactionCode,
    ) -> Result<Option<LedgerEntry>> {
        let ledger = self.inner.ledger.lock().await;
        Ok(ledger.find(wallet_id, code).cloned())
    }

    async fn entries(&self, wallet_id: &WalletId) -> Result<Vec<LedgerEntry>> {
        let ledger = self.inner.ledger.lock().await;
        let ids = ledger.by_wallet.get(wallet_id);
        Ok(ids
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| ledger.entries.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ExternalStore for InMemoryLedger {
    async fn insert(&self, tx: ExternalTransaction) -> Result<()> {
        let mut externals = self.inner.externals.lock().await;
        if externals.by_reference.contains_key(&tx.reference_code) {
            return Err(WalletError::Validation(format!(
                "reference code {} already in use",
                tx.reference_code
            )));
        }
        externals.by_reference.insert(tx.reference_code.clone(), tx.id);
        if let Some(provider_id) = &tx.provider_transaction_id {
            externals.by_provider.insert(provider_id.clone(), tx.id);
        }
        externals.by_id.insert(tx.id, tx);
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ExternalTransaction>> {
        let externals = self.inner.externals.lock().await;
        Ok(externals.by_id.get(id).cloned())
    }

    async fn find_by_reference(
        &self,
        code: &TransactionCode,
    ) -> Result<Option<ExternalTransaction>> {
        let externals = self.inner.externals.lock().await;
        Ok(externals
            .by_reference
            .get(code)
            .and_then(|id| externals.by_id.get(id))
            .cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider_tx_id: &str,
    ) -> Result<Option<ExternalTransaction>> {
        let externals = self.inner.externals.lock().await;
        Ok(externals
            .by_provider
            .get(provider_tx_id)
            .and_then(|id| externals.by_id.get(id))
            .cloned())
    }

    async fn pending(&self) -> Result<Vec<ExternalTransaction>> {
        let externals = self.inner.externals.lock().await;
        Ok(externals
            .by_id
            .values()
            .filter(|tx| tx.status == ExternalStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update(&self, tx: ExternalTransaction) -> Result<()> {
        let mut externals = self.inner.externals.lock().await;
        if !externals.by_id.contains_key(&tx.id) {
            return Err(WalletError::UnknownExternalTransaction(tx.id.to_string()));
        }
        if let Some(provider_id) = &tx.provider_transaction_id {
            externals.by_provider.insert(provider_id.clone(), tx.id);
        }
        externals.by_id.insert(tx.id, tx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::{Balance, Currency};
    use rust_decimal_macros::dec;

    fn amount(v: rust_decimal::Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    async fn store_with_wallet(id: &str, balance: rust_decimal::Decimal) -> InMemoryLedger {
        let store = InMemoryLedger::new();
        let mut wallet = Wallet::new(WalletId::new(id), id, Currency::new("VND"));
        wallet.balance = Balance::new(balance);
        store.create(wallet).await.unwrap();
        store
    }

    #[tokio::test]
    async fn apply_commits_balance_and_entry_together() {
        let store = store_with_wallet("a", dec!(100)).await;
        let entries = store
            .apply(vec![Posting::recorded(
                WalletId::new("a"),
                Movement::Debit(amount(dec!(30))),
                EntryKind::Payment,
                TransactionCode::new("c1"),
            )])
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].direction, Direction::Debit);

        let wallet = WalletStore::get(&store, &WalletId::new("a")).await.unwrap().unwrap();
        assert_eq!(wallet.balance, Balance::new(dec!(70)));
        assert_eq!(wallet.total_transactions, 1);
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_partial_state() {
        let store = store_with_wallet("a", dec!(100)).await;
        let mut b = Wallet::new(WalletId::new("b"), "b", Currency::new("VND"));
        b.balance = Balance::new(dec!(5));
        store.create(b).await.unwrap();

        // Second leg overdraws b; the credit to a must roll back with it.
        let err = store
            .apply(vec![
                Posting::recorded(
                    WalletId::new("a"),
                    Movement::Credit(amount(dec!(10))),
                    EntryKind::Transfer,
                    TransactionCode::new("t1.credit"),
                ),
                Posting::recorded(
                    WalletId::new("b"),
                    Movement::Debit(amount(dec!(10))),
                    EntryKind::Transfer,
                    TransactionCode::new("t1"),
                ),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));

        let a = WalletStore::get(&store, &WalletId::new("a")).await.unwrap().unwrap();
        let b = WalletStore::get(&store, &WalletId::new("b")).await.unwrap().unwrap();
        assert_eq!(a.balance, Balance::new(dec!(100)));
        assert_eq!(b.balance, Balance::new(dec!(5)));
        assert!(
            store
                .find_by_code(&WalletId::new("a"), &TransactionCode::new("t1.credit"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn replayed_batch_returns_prior_entries_without_reapplying() {
        let store = store_with_wallet("a", dec!(100)).await;
        let postings = vec![Posting::recorded(
            WalletId::new("a"),
            Movement::Credit(amount(dec!(50))),
            EntryKind::Deposit,
            TransactionCode::new("dep-1"),
        )];

        let first = store.apply(postings.clone()).await.unwrap();
        let second = store.apply(postings).await.unwrap();

        assert_eq!(first, second);
        let wallet = WalletStore::get(&store, &WalletId::new("a")).await.unwrap().unwrap();
        // Credited once, not twice.
        assert_eq!(wallet.balance, Balance::new(dec!(150)));
    }

    #[tokio::test]
    async fn reused_code_with_different_payload_is_a_conflict() {
        let store = store_with_wallet("a", dec!(100)).await;
        store
            .apply(vec![Posting::recorded(
                WalletId::new("a"),
                Movement::Credit(amount(dec!(50))),
                EntryKind::Deposit,
                TransactionCode::new("dep-1"),
            )])
            .await
            .unwrap();

        let err = store
            .apply(vec![Posting::recorded(
                WalletId::new("a"),
                Movement::Credit(amount(dec!(99))),
                EntryKind::Deposit,
                TransactionCode::new("dep-1"),
            )])
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::DuplicateTransactionCode { .. }));
    }

    #[tokio::test]
    async fn record_is_idempotent_per_wallet_code() {
        let store = store_with_wallet("a", dec!(0)).await;
        let first = store
            .record(
                &WalletId::new("a"),
                amount(dec!(10)),
                Direction::Credit,
                EntryKind::Deposit,
                TransactionCode::new("c1"),
            )
            .await
            .unwrap();
        let replay = store
            .record(
                &WalletId::new("a"),
                amount(dec!(10)),
                Direction::Credit,
                EntryKind::Deposit,
                TransactionCode::new("c1"),
            )
            .await
            .unwrap();
        assert_eq!(first, replay);

        let conflict = store
            .record(
                &WalletId::new("a"),
                amount(dec!(11)),
                Direction::Credit,
                EntryKind::Deposit,
                TransactionCode::new("c1"),
            )
            .await;
        assert!(matches!(
            conflict,
            Err(WalletError::DuplicateTransactionCode { .. })
        ));
        assert_eq!(store.entries(&WalletId::new("a")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_wallet_is_rejected_before_any_write() {
        let store = store_with_wallet("a", dec!(100)).await;
        let err = store
            .apply(vec![
                Posting::new(WalletId::new("a"), Movement::Debit(amount(dec!(10)))),
                Posting::new(WalletId::new("ghost"), Movement::Credit(amount(dec!(10)))),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::UnknownWallet(_)));

        let a = WalletStore::get(&store, &WalletId::new("a")).await.unwrap().unwrap();
        assert_eq!(a.balance, Balance::new(dec!(100)));
    }

    #[tokio::test]
    async fn duplicate_wallet_creation_is_rejected() {
        let store = store_with_wallet("a", dec!(0)).await;
        let dup = Wallet::new(WalletId::new("a"), "a", Currency::new("VND"));
        assert!(matches!(
            store.create(dup).await,
            Err(WalletError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn balance_view_splits_available_and_locked() {
        let store = store_with_wallet("a", dec!(100)).await;
        store
            .apply(vec![Posting::new(
                WalletId::new("a"),
                Movement::Lock(amount(dec!(40))),
            )])
            .await
            .unwrap();

        let view = store.balance_of(&WalletId::new("a")).await.unwrap();
        assert_eq!(view.available, Balance::new(dec!(60)));
        assert_eq!(view.locked, Balance::new(dec!(40)));
    }

    #[tokio::test]
    async fn external_round_trip_and_indexes() {
        let store = store_with_wallet("a", dec!(0)).await;
        let mut tx = ExternalTransaction::pending(
            WalletId::new("a"),
            "simbank",
            crate::domain::external::ExternalDirection::Deposit,
            amount(dec!(100)),
            Currency::new("VND"),
            TransactionCode::new("dep-1"),
        );
        store.insert(tx.clone()).await.unwrap();

        let by_ref = store
            .find_by_reference(&TransactionCode::new("dep-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ref.id, tx.id);

        tx.provider_transaction_id = Some("prov-9".to_string());
        store.update(tx.clone()).await.unwrap();
        let by_provider = store.find_by_provider_id("prov-9").await.unwrap().unwrap();
        assert_eq!(by_provider.id, tx.id);

        assert_eq!(store.pending().await.unwrap().len(), 1);
    }
}
