use clap::Parser;
use fundflow::application::ensure_system_wallets;
use fundflow::application::lifecycle::{CheckoutDetails, ExternalTransactionManager};
use fundflow::application::transfers::TransferCoordinator;
use fundflow::domain::ledger::{EntryKind, TransactionCode};
use fundflow::domain::ports::{EventBusRef, ExternalStoreRef, PaymentGatewayRef, WalletStoreRef};
use fundflow::domain::wallet::{Amount, Currency, Wallet, WalletId};
use fundflow::error::WalletError;
use fundflow::infrastructure::bus::BroadcastBus;
use fundflow::infrastructure::gateway::StaticGateway;
use fundflow::infrastructure::in_memory::InMemoryLedger;
use fundflow::interfaces::csv::operation_reader::{OpKind, Operation, OperationReader};
use fundflow::interfaces::csv::wallet_writer::WalletWriter;
use miette::{IntoDiagnostic, Result};
use serde_json::json;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file
    input: PathBuf,

    /// Currency for wallets created during the replay
    #[arg(long, default_value = "VND")]
    currency: String,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[cfg(feature = "storage-rocksdb")]
    #[arg(long)]
    db_path: Option<PathBuf>,
}

struct Services {
    store: WalletStoreRef,
    coordinator: TransferCoordinator,
    manager: ExternalTransactionManager,
    currency: Currency,
    checkout: CheckoutDetails,
}

#[cfg_attr(not(feature = "storage-rocksdb"), allow(unused_variables))]
fn build_stores(cli: &Cli) -> Result<(WalletStoreRef, ExternalStoreRef)> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = &cli.db_path {
        let store =
            fundflow::infrastructure::rocksdb::RocksDbLedger::open(db_path).into_diagnostic()?;
        return Ok((Arc::new(store.clone()), Arc::new(store)));
    }
    let store = InMemoryLedger::new();
    Ok((Arc::new(store.clone()), Arc::new(store)))
}

fn required<T>(value: Option<T>, what: &str) -> fundflow::error::Result<T> {
    value.ok_or_else(|| WalletError::Validation(format!("operation is missing {what}")))
}

async fn run_operation(services: &Services, op: Operation) -> fundflow::error::Result<()> {
    match op.op {
        OpKind::Open => {
            let name = required(op.wallet, "a wallet name")?;
            services
                .store
                .create(Wallet::new(
                    WalletId::new(name.clone()),
                    name,
                    services.currency.clone(),
                ))
                .await
        }
        OpKind::Deposit | OpKind::Withdraw => {
            let wallet = WalletId::new(required(op.wallet, "a wallet")?);
            let amount = Amount::new(required(op.amount, "an amount")?)?;
            let code = TransactionCode::new(required(op.code, "a reference code")?);

            let tx = match op.op {
                OpKind::Deposit => {
                    services
                        .manager
                        .initiate_deposit(
                            &wallet,
                            amount,
                            services.currency.clone(),
                            code,
                            &services.checkout,
                        )
                        .await?
                }
                _ => {
                    services
                        .manager
                        .initiate_withdrawal(
                            &wallet,
                            amount,
                            services.currency.clone(),
                            code,
                            &services.checkout,
                        )
                        .await?
                }
            };
            // The replay stands in for the provider: confirm right away.
            let payload = json!({
                "status": "success",
                "amount": tx.amount.value().to_string(),
                "ref": tx.reference_code.as_str(),
            });
            services.manager.confirm_from_webhook(&payload).await?;
            Ok(())
        }
        OpKind::Transfer => {
            let source = WalletId::new(required(op.wallet, "a source wallet")?);
            let destination = WalletId::new(required(op.to, "a destination wallet")?);
            let amount = Amount::new(required(op.amount, "an amount")?)?;
            let code = TransactionCode::new(required(op.code, "a transaction code")?);
            services
                .coordinator
                .transfer(&source, &destination, amount, code, EntryKind::Transfer)
                .await?;
            Ok(())
        }
        OpKind::Pay => {
            let payer = WalletId::new(required(op.wallet, "a payer wallet")?);
            let amount = Amount::new(required(op.amount, "an amount")?)?;
            let code = TransactionCode::new(required(op.code, "a transaction code")?);
            services
                .coordinator
                .transfer_to_escrow(&payer, amount, code)
                .await?;
            Ok(())
        }
        OpKind::Payout => {
            let payee = WalletId::new(required(op.wallet, "a payee wallet")?);
            let amount = Amount::new(required(op.amount, "an amount")?)?;
            let code = TransactionCode::new(required(op.code, "a transaction code")?);
            services
                .coordinator
                .transfer_from_escrow_to_account(&payee, amount, code)
                .await?;
            Ok(())
        }
        OpKind::Sweep => {
            let amount = Amount::new(required(op.amount, "an amount")?)?;
            let code = TransactionCode::new(required(op.code, "a transaction code")?);
            services
                .coordinator
                .transfer_from_escrow_to_system(amount, code)
                .await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let (store, externals) = build_stores(&cli)?;

    let currency = Currency::new(&cli.currency);
    ensure_system_wallets(&store, currency.clone())
        .await
        .into_diagnostic()?;

    let gateway: PaymentGatewayRef = Arc::new(StaticGateway::new("simbank"));
    let events: EventBusRef = Arc::new(BroadcastBus::default());
    let services = Services {
        coordinator: TransferCoordinator::new(store.clone(), events.clone()),
        manager: ExternalTransactionManager::new(store.clone(), externals, gateway, events),
        store,
        currency,
        checkout: CheckoutDetails {
            return_url: "https://localhost/return".to_string(),
            ip_address: "127.0.0.1".to_string(),
        },
    };

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    for op_result in reader.operations() {
        match op_result {
            Ok(op) => {
                if let Err(e) = run_operation(&services, op).await {
                    warn!(error = %e, "operation failed");
                }
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable operation");
            }
        }
    }

    let wallets = services.store.get_all().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(wallets).into_diagnostic()?;

    Ok(())
}
