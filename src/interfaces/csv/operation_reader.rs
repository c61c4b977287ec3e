use crate::error::{Result, WalletError};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Create a wallet.
    Open,
    /// Initiate a gateway deposit and confirm it.
    Deposit,
    /// Initiate a gateway withdrawal and confirm it.
    Withdraw,
    /// Direct wallet-to-wallet transfer.
    Transfer,
    /// Pay into escrow against a business object.
    Pay,
    /// Pay out of escrow to an account.
    Payout,
    /// Sweep fees from escrow into revenue.
    Sweep,
}

/// One row of the operations file: `op, wallet, to, amount, code`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Operation {
    pub op: OpKind,
    pub wallet: Option<String>,
    pub to: Option<String>,
    pub amount: Option<Decimal>,
    pub code: Option<String>,
}

/// Reads wallet operations from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// yielding `Result<Operation>` lazily so large files stream.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn operations(self) -> impl Iterator<Item = Result<Operation>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(WalletError::from))
    }
}
