use crate::domain::wallet::{Wallet, WalletType};
use crate::error::Result;
use std::io::Write;

/// Writes final wallet state as CSV, one row per wallet sorted by id.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(destination: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(destination),
        }
    }

    pub fn write_wallets(&mut self, mut wallets: Vec<Wallet>) -> Result<()> {
        wallets.sort_by(|a, b| a.id.cmp(&b.id));
        self.writer.write_record([
            "wallet",
            "type",
            "currency",
            "balance",
            "locked",
            "available",
            "frozen",
        ])?;
        for wallet in wallets {
            let wallet_type = match wallet.wallet_type {
                WalletType::User => "user",
                WalletType::Escrow => "escrow",
                WalletType::Revenue => "revenue",
            };
            self.writer.write_record([
                wallet.id.as_str(),
                wallet_type,
                &wallet.currency.to_string(),
                &wallet.balance.value().normalize().to_string(),
                &wallet.locked_balance.value().normalize().to_string(),
                &wallet.available().value().normalize().to_string(),
                &wallet.frozen.to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
