//! Application layer: the services that orchestrate wallet state through the
//! domain ports. Each one is constructor-injected with the port references it
//! needs and is cheap to clone.

pub mod lifecycle;
pub mod locks;
pub mod transfers;

use crate::domain::ports::WalletStoreRef;
use crate::domain::wallet::{Currency, Wallet, WalletId, WalletType};
use crate::error::Result;

/// Provisions the two platform-wide system wallets if they do not exist yet.
/// Run by the composition root before any transfer flow.
pub async fn ensure_system_wallets(store: &WalletStoreRef, currency: Currency) -> Result<()> {
    for (id, wallet_type) in [
        (WalletId::escrow(), WalletType::Escrow),
        (WalletId::revenue(), WalletType::Revenue),
    ] {
        if store.get(&id).await?.is_none() {
            store
                .create(Wallet::system(id, wallet_type, currency.clone()))
                .await?;
        }
    }
    Ok(())
}
