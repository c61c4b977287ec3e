use fundflow::application::lifecycle::{CheckoutDetails, ExternalTransactionManager};
use fundflow::application::transfers::TransferCoordinator;
use fundflow::domain::ledger::{EntryKind, TransactionCode};
use fundflow::domain::ports::{EventBusRef, ExternalStoreRef, PaymentGatewayRef, WalletStoreRef};
use fundflow::domain::wallet::{Amount, Balance, Currency, Wallet, WalletId};
use fundflow::infrastructure::bus::BroadcastBus;
use fundflow::infrastructure::gateway::StaticGateway;
use fundflow::infrastructure::in_memory::InMemoryLedger;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

async fn store_with_wallets(balances: &[(&str, Decimal)]) -> WalletStoreRef {
    let store: WalletStoreRef = Arc::new(InMemoryLedger::new());
    for (id, balance) in balances {
        let mut wallet = Wallet::new(WalletId::new(*id), *id, Currency::new("VND"));
        wallet.balance = Balance::new(*balance);
        store.create(wallet).await.unwrap();
    }
    store
}

fn coordinator(store: &WalletStoreRef) -> TransferCoordinator {
    let bus: EventBusRef = Arc::new(BroadcastBus::default());
    TransferCoordinator::new(store.clone(), bus)
}

async fn balance(store: &WalletStoreRef, id: &str) -> Decimal {
    store
        .get(&WalletId::new(id))
        .await
        .unwrap()
        .unwrap()
        .balance
        .value()
}

#[tokio::test]
async fn concurrent_drain_lets_exactly_one_transfer_through() {
    let store = store_with_wallets(&[("a", dec!(100)), ("b", dec!(0)), ("c", dec!(0))]).await;
    let coordinator = coordinator(&store);

    // Both want 80 out of the same 100. One must lose.
    let t1 = {
        let c = coordinator.clone();
        tokio::spawn(async move {
            c.transfer(
                &WalletId::new("a"),
                &WalletId::new("b"),
                Amount::new(dec!(80)).unwrap(),
                TransactionCode::new("drain-b"),
                EntryKind::Transfer,
            )
            .await
        })
    };
    let t2 = {
        let c = coordinator.clone();
        tokio::spawn(async move {
            c.transfer(
                &WalletId::new("a"),
                &WalletId::new("c"),
                Amount::new(dec!(80)).unwrap(),
                TransactionCode::new("drain-c"),
                EntryKind::Transfer,
            )
            .await
        })
    };

    let results = [t1.await.unwrap(), t2.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);

    let a = balance(&store, "a").await;
    let b = balance(&store, "b").await;
    let c = balance(&store, "c").await;
    assert_eq!(a, dec!(20));
    assert_eq!(a + b + c, dec!(100));
}

#[tokio::test]
async fn opposing_transfers_do_not_deadlock() {
    let store = store_with_wallets(&[("a", dec!(100)), ("b", dec!(100))]).await;
    let coordinator = coordinator(&store);

    // a->b and b->a interleaved; ascending lock order keeps them live.
    let mut handles = Vec::new();
    for i in 0..20 {
        let c = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let (src, dst) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
            c.transfer(
                &WalletId::new(src),
                &WalletId::new(dst),
                Amount::new(dec!(1)).unwrap(),
                TransactionCode::new(format!("ping-{i}")),
                EntryKind::Transfer,
            )
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let a = balance(&store, "a").await;
    let b = balance(&store, "b").await;
    assert_eq!(a + b, dec!(200));
    assert_eq!(a, dec!(100));
    assert_eq!(b, dec!(100));
}

#[tokio::test]
async fn concurrent_webhook_deliveries_credit_exactly_once() {
    let ledger = InMemoryLedger::new();
    let store: WalletStoreRef = Arc::new(ledger.clone());
    let externals: ExternalStoreRef = Arc::new(ledger);
    let gateway: PaymentGatewayRef = Arc::new(StaticGateway::new("simbank"));
    let bus: EventBusRef = Arc::new(BroadcastBus::default());
    let manager = ExternalTransactionManager::new(store.clone(), externals, gateway, bus);

    store
        .create(Wallet::new(WalletId::new("w"), "w", Currency::new("VND")))
        .await
        .unwrap();

    manager
        .initiate_deposit(
            &WalletId::new("w"),
            Amount::new(dec!(250)).unwrap(),
            Currency::new("VND"),
            TransactionCode::new("dep-1"),
            &CheckoutDetails {
                return_url: "https://app.example/return".to_string(),
                ip_address: "10.0.0.1".to_string(),
            },
        )
        .await
        .unwrap();

    let payload = serde_json::json!({"status": "success", "amount": "250", "ref": "dep-1"});
    let mut handles = Vec::new();
    for _ in 0..4 {
        let m = manager.clone();
        let p = payload.clone();
        handles.push(tokio::spawn(async move { m.confirm_from_webhook(&p).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(balance(&store, "w").await, dec!(250));
}
