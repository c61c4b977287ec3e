use fundflow::application::ensure_system_wallets;
use fundflow::application::transfers::TransferCoordinator;
use fundflow::domain::ledger::{EntryKind, TransactionCode};
use fundflow::domain::ports::{EventBusRef, WalletStoreRef};
use fundflow::domain::wallet::{Amount, Balance, Currency, Wallet, WalletId};
use fundflow::infrastructure::bus::BroadcastBus;
use fundflow::infrastructure::in_memory::InMemoryLedger;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::sync::Arc;

async fn total_balance(store: &WalletStoreRef) -> Decimal {
    store
        .get_all()
        .await
        .unwrap()
        .iter()
        .map(|w| w.balance.value())
        .sum()
}

#[tokio::test]
async fn random_transfers_conserve_the_total() {
    let store: WalletStoreRef = Arc::new(InMemoryLedger::new());
    let bus: EventBusRef = Arc::new(BroadcastBus::default());
    let coordinator = TransferCoordinator::new(store.clone(), bus);

    let mut rng = StdRng::seed_from_u64(42);
    let ids: Vec<String> = (0..5).map(|i| format!("w{i}")).collect();
    for id in &ids {
        let mut wallet = Wallet::new(WalletId::new(id), id.as_str(), Currency::new("VND"));
        wallet.balance = Balance::new(Decimal::from(rng.gen_range(0..1000u32)));
        store.create(wallet).await.unwrap();
    }
    let initial_total = total_balance(&store).await;

    for i in 0..200 {
        let src = &ids[rng.gen_range(0..ids.len())];
        let dst = &ids[rng.gen_range(0..ids.len())];
        if src == dst {
            continue;
        }
        let amount = Amount::new(Decimal::from(rng.gen_range(1..100u32))).unwrap();
        // Overdrafts are rejected whole; either way the total is untouched.
        let _ = coordinator
            .transfer(
                &WalletId::new(src),
                &WalletId::new(dst),
                amount,
                TransactionCode::new(format!("rnd-{i}")),
                EntryKind::Transfer,
            )
            .await;
    }

    assert_eq!(total_balance(&store).await, initial_total);
    for wallet in store.get_all().await.unwrap() {
        assert!(wallet.balance.value() >= Decimal::ZERO);
        assert!(wallet.locked_balance <= wallet.balance);
    }
}

#[tokio::test]
async fn random_escrow_flows_conserve_the_total() {
    let store: WalletStoreRef = Arc::new(InMemoryLedger::new());
    ensure_system_wallets(&store, Currency::new("VND"))
        .await
        .unwrap();
    let bus: EventBusRef = Arc::new(BroadcastBus::default());
    let coordinator = TransferCoordinator::new(store.clone(), bus);

    let mut rng = StdRng::seed_from_u64(7);
    for i in 0..3 {
        let id = format!("w{i}");
        let mut wallet = Wallet::new(WalletId::new(&id), id.as_str(), Currency::new("VND"));
        wallet.balance = Balance::new(Decimal::from(1000u32));
        store.create(wallet).await.unwrap();
    }
    let initial_total = total_balance(&store).await;

    for i in 0..50 {
        let payer = WalletId::new(format!("w{}", rng.gen_range(0..3)));
        let amount = Amount::new(Decimal::from(rng.gen_range(1..200u32))).unwrap();
        if coordinator
            .transfer_to_escrow(&payer, amount, TransactionCode::new(format!("esc-{i}")))
            .await
            .is_err()
        {
            continue;
        }
        // Either pay out 80/20 or refund 75/25; both drain the escrowed sum.
        if rng.gen_bool(0.5) {
            let payout = (amount.value() * Decimal::new(8, 1)).round_dp(4);
            let commission = amount.value() - payout;
            coordinator
                .transfer_from_escrow_to_account(
                    &payer,
                    Amount::new(payout).unwrap(),
                    TransactionCode::new(format!("esc-{i}.payout")),
                )
                .await
                .unwrap();
            coordinator
                .transfer_from_escrow_to_system(
                    Amount::new(commission).unwrap(),
                    TransactionCode::new(format!("esc-{i}.commission")),
                )
                .await
                .unwrap();
        } else {
            coordinator
                .refund_from_escrow(
                    &payer,
                    amount,
                    Decimal::new(75, 2),
                    TransactionCode::new(format!("esc-{i}.refund")),
                )
                .await
                .unwrap();
        }
    }

    assert_eq!(total_balance(&store).await, initial_total);

    // Everything escrowed was drained again.
    let escrow = store
        .get(&WalletId::escrow())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(escrow.balance, Balance::ZERO);
}
