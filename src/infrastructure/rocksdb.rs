use crate::domain::external::{ExternalStatus, ExternalTransaction};
use crate::domain::ledger::{
    Direction, EntryKind, EntrySpec, LedgerEntry, Movement, Posting, TransactionCode,
};
use crate::domain::ports::{BalanceView, ExternalStore, LedgerRecorder, WalletStore};
use crate::domain::wallet::{Amount, Wallet, WalletId};
use crate::error::{Result, WalletError};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Column Family for wallet rows.
pub const CF_WALLETS: &str = "wallets";
/// Column Family for ledger entries keyed by entry id.
pub const CF_LEDGER: &str = "ledger";
/// Column Family mapping `(wallet, code)` to an entry id; the uniqueness
/// index behind idempotent appends.
pub const CF_LEDGER_CODES: &str = "ledger_codes";
/// Column Family for external transactions keyed by id.
pub const CF_EXTERNALS: &str = "externals";
/// Column Family mapping reference codes and provider ids to external ids.
pub const CF_EXTERNAL_INDEX: &str = "external_index";

const KEY_SEP: u8 = 0x1f;

fn code_key(wallet_id: &WalletId, code: &TransactionCode) -> Vec<u8> {
    let mut key = wallet_id.as_str().as_bytes().to_vec();
    key.push(KEY_SEP);
    key.extend_from_slice(code.as_str().as_bytes());
    key
}

fn index_key(prefix: &str, value: &str) -> Vec<u8> {
    let mut key = prefix.as_bytes().to_vec();
    key.push(KEY_SEP);
    key.extend_from_slice(value.as_bytes());
    key
}

/// Persistent store implementation using RocksDB, JSON-encoded values.
///
/// The atomic unit of `apply` is a single `WriteBatch` covering wallet rows,
/// ledger entries and the code index. Row-level exclusion is provided by an
/// in-process mutex registry (one mutex per wallet id, taken in ascending
/// order), so a database directory must not be shared between processes.
///
/// `Clone` shares the underlying `Arc<DB>` and lock registry.
#[derive(Clone)]
pub struct RocksDbLedger {
    db: Arc<DB>,
    row_locks: Arc<Mutex<HashMap<WalletId, Arc<Mutex<()>>>>>,
    ledger_lock: Arc<Mutex<()>>,
    external_lock: Arc<Mutex<()>>,
}

impl RocksDbLedger {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// all required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [
            CF_WALLETS,
            CF_LEDGER,
            CF_LEDGER_CODES,
            CF_EXTERNALS,
            CF_EXTERNAL_INDEX,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;
        Ok(Self {
            db: Arc::new(db),
            row_locks: Arc::new(Mutex::new(HashMap::new())),
            ledger_lock: Arc::new(Mutex::new(())),
            external_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            WalletError::Internal(Box::new(std::io::Error::other(format!(
                "column family {name} not found"
            ))))
        })
    }

    fn load_wallet(&self, id: &WalletId) -> Result<Option<Wallet>> {
        let cf = self.cf(CF_WALLETS)?;
        match self.db.get_cf(cf, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_entry(&self, id: &Uuid) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(CF_LEDGER)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn lookup_code(&self, wallet_id: &WalletId, code: &TransactionCode) -> Result<Option<LedgerEntry>> {
        let cf = self.cf(CF_LEDGER_CODES)?;
        match self.db.get_cf(cf, code_key(wallet_id, code))? {
            Some(bytes) => {
                let id = Uuid::from_slice(&bytes)
                    .map_err(|e| WalletError::Internal(Box::new(e)))?;
                self.load_entry(&id)
            }
            None => Ok(None),
        }
    }

    fn load_external(&self, id: &Uuid) -> Result<Option<ExternalTransaction>> {
        let cf = self.cf(CF_EXTERNALS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn lookup_external_index(&self, prefix: &str, value: &str) -> Result<Option<ExternalTransaction>> {
        let cf = self.cf(CF_EXTERNAL_INDEX)?;
        match self.db.get_cf(cf, index_key(prefix, value))? {
            Some(bytes) => {
                let id = Uuid::from_slice(&bytes)
                    .map_err(|e| WalletError::Internal(Box::new(e)))?;
                self.load_external(&id)
            }
            None => Ok(None),
        }
    }

    /// One mutex per wallet id, acquired ascending.
    async fn lock_rows(&self, mut ids: Vec<WalletId>) -> Vec<OwnedMutexGuard<()>> {
        ids.sort();
        ids.dedup();

        let handles: Vec<Arc<Mutex<()>>> = {
            let mut registry = self.row_locks.lock().await;
            ids.iter()
                .map(|id| registry.entry(id.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(handles.len());
        for handle in handles {
            guards.push(handle.lock_owned().await);
        }
        guards
    }

    fn put_wallet(&self, batch: &mut WriteBatch, wallet: &Wallet) -> Result<()> {
        let cf = self.cf(CF_WALLETS)?;
        batch.put_cf(cf, wallet.id.as_str().as_bytes(), serde_json::to_vec(wallet)?);
        Ok(())
    }

    fn put_entry(&self, batch: &mut WriteBatch, entry: &LedgerEntry) -> Result<()> {
        batch.put_cf(self.cf(CF_LEDGER)?, entry.id.as_bytes(), serde_json::to_vec(entry)?);
        batch.put_cf(
            self.cf(CF_LEDGER_CODES)?,
            code_key(&entry.wallet_id, &entry.code),
            entry.id.as_bytes(),
        );
        Ok(())
    }

    fn put_external(&self, batch: &mut WriteBatch, tx: &ExternalTransaction) -> Result<()> {
        batch.put_cf(self.cf(CF_EXTERNALS)?, tx.id.as_bytes(), serde_json::to_vec(tx)?);
        batch.put_cf(
            self.cf(CF_EXTERNAL_INDEX)?,
            index_key("ref", tx.reference_code.as_str()),
            tx.id.as_bytes(),
        );
        if let Some(provider_id) = &tx.provider_transaction_id {
            batch.put_cf(
                self.cf(CF_EXTERNAL_INDEX)?,
                index_key("prov", provider_id),
                tx.id.as_bytes(),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl WalletStore for RocksDbLedger {
    async fn create(&self, wallet: Wallet) -> Result<()> {
        let _rows = self.lock_rows(vec![wallet.id.clone()]).await;
        if self.load_wallet(&wallet.id)?.is_some() {
            return Err(WalletError::Validation(format!(
                "wallet {} already exists",
                wallet.id
            )));
        }
        let mut batch = WriteBatch::default();
        self.put_wallet(&mut batch, &wallet)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: &WalletId) -> Result<Option<Wallet>> {
        self.load_wallet(id)
    }

    async fn get_all(&self) -> Result<Vec<Wallet>> {
        let cf = self.cf(CF_WALLETS)?;
        let mut wallets = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            wallets.push(serde_json::from_slice(&value)?);
        }
        Ok(wallets)
    }

    async fn balance_of(&self, id: &WalletId) -> Result<BalanceView> {
        let wallet = self
            .load_wallet(id)?
            .ok_or_else(|| WalletError::UnknownWallet(id.clone()))?;
        Ok(BalanceView {
            available: wallet.available(),
            locked: wallet.locked_balance,
        })
    }

    async fn apply(&self, postings: Vec<Posting>) -> Result<Vec<LedgerEntry>> {
        if postings.is_empty() {
            return Ok(Vec::new());
        }
        let _rows = self
            .lock_rows(postings.iter().map(|p| p.wallet_id.clone()).collect())
            .await;
        let _ledger = self.ledger_lock.lock().await;

        let mut staged: HashMap<WalletId, Wallet> = HashMap::new();
        for posting in &postings {
            if !staged.contains_key(&posting.wallet_id) {
                let wallet = self
                    .load_wallet(&posting.wallet_id)?
                    .ok_or_else(|| WalletError::UnknownWallet(posting.wallet_id.clone()))?;
                staged.insert(posting.wallet_id.clone(), wallet);
            }
        }

        // Idempotency barrier, same contract as the in-memory store: a full
        // replay returns the prior rows, a partial or conflicting reuse is
        // a DuplicateTransactionCode.
        let coded: Vec<(&Posting, &EntrySpec)> = postings
            .iter()
            .filter_map(|p| p.entry.as_ref().map(|spec| (p, spec)))
            .collect();
        if !coded.is_empty() {
            let existing: Vec<Option<LedgerEntry>> = coded
                .iter()
                .map(|(p, spec)| self.lookup_code(&p.wallet_id, &spec.code))
                .collect::<Result<_>>()?;
            if existing.iter().any(Option::is_some) {
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
                            replay.push(entry.clone());
                        }
                        _ => {
                            return Err(WalletError::DuplicateTransactionCode {
                                wallet: posting.wallet_id.clone(),
                                code: spec.code.clone(),
                            });
                        }
                    }
                }
                return Ok(replay);
            }
        }

        for posting in &postings {
            let wallet = staged.get_mut(&posting.wallet_id).ok_or_else(|| {
                WalletError::AtomicityViolation(format!(
                    "wallet {} not staged",
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

        let mut batch = WriteBatch::default();
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
            self.put_entry(&mut batch, &entry)?;
            recorded.push(entry);
        }
        for wallet in staged.values() {
            self.put_wallet(&mut batch, wallet)?;
        }
        self.db.write(batch)?;
        Ok(recorded)
    }
}

#[async_trait]
impl LedgerRecorder for RocksDbLedger {
    async fn record(
        &self,
        wallet_id: &WalletId,
        amount: Amount,
        direction: Direction,
        kind: EntryKind,
        code: TransactionCode,
    ) -> Result<LedgerEntry> {
        let _rows = self.lock_rows(vec![wallet_id.clone()]).await;
        let _ledger = self.ledger_lock.lock().await;

        let mut wallet = self
            .load_wallet(wallet_id)?
            .ok_or_else(|| WalletError::UnknownWallet(wallet_id.clone()))?;

        if let Some(existing) = self.lookup_code(wallet_id, &code)? {
            if existing.matches(amount, direction, kind) {
                return Ok(existing);
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
        wallet.total_transactions += 1;

        let mut batch = WriteBatch::default();
        self.put_entry(&mut batch, &entry)?;
        self.put_wallet(&mut batch, &wallet)?;
        self.db.write(batch)?;
        Ok(entry)
    }

    async fn find_by_code(
        &self,
        wallet_id: &WalletId,
        code: &TransactionCode,
    ) -> Result<Option<LedgerEntry>> {
        self.lookup_code(wallet_id, code)
    }

    async fn entries(&self, wallet_id: &WalletId) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf(CF_LEDGER)?;
        let mut entries: Vec<LedgerEntry> = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let entry: LedgerEntry = serde_json::from_slice(&value)?;
            if &entry.wallet_id == wallet_id {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }
}

#[async_trait]
impl ExternalStore for RocksDbLedger {
    async fn insert(&self, tx: ExternalTransaction) -> Result<()> {
        let _guard = self.external_lock.lock().await;
        if self
            .lookup_external_index("ref", tx.reference_code.as_str())?
            .is_some()
        {
            return Err(WalletError::Validation(format!(
                "reference code {} already in use",
                tx.reference_code
            )));
        }
        let mut batch = WriteBatch::default();
        self.put_external(&mut batch, &tx)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<ExternalTransaction>> {
        self.load_external(id)
    }

    async fn find_by_reference(
        &self,
        code: &TransactionCode,
    ) -> Result<Option<ExternalTransaction>> {
        self.lookup_external_index("ref", code.as_str())
    }

    async fn find_by_provider_id(
        &self,
        provider_tx_id: &str,
    ) -> Result<Option<ExternalTransaction>> {
        self.lookup_external_index("prov", provider_tx_id)
    }

    async fn pending(&self) -> Result<Vec<ExternalTransaction>> {
        let cf = self.cf(CF_EXTERNALS)?;
        let mut pending = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let tx: ExternalTransaction = serde_json::from_slice(&value)?;
            if tx.status == ExternalStatus::Pending {
                pending.push(tx);
            }
        }
        Ok(pending)
    }

    async fn update(&self, tx: ExternalTransaction) -> Result<()> {
        let _guard = self.external_lock.lock().await;
        if self.load_external(&tx.id)?.is_none() {
            return Err(WalletError::UnknownExternalTransaction(tx.id.to_string()));
        }
        let mut batch = WriteBatch::default();
        self.put_external(&mut batch, &tx)?;
        self.db.write(batch)?;
        Ok(())
    }
}
