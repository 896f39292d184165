//! Full construction runs against the in-memory ledger.

use std::sync::Arc;

use construction_tester::orchestrator::{PausedClock, SeededRng};
use construction_tester::scenario::{
    CHANGE_ADDRESS, CHANGE_VALUE, COIN_IDENTIFIER, RECIPIENT, RECIPIENT_VALUE, SENDER,
    SENDER_VALUE,
};
use construction_tester::types::{
    AccountIdentifier, Amount, CoinAction, CoinChange, CoinIdentifier, Currency,
    NetworkIdentifier, Operation, OperationIdentifier,
};
use construction_tester::{
    AccountingModel, ConstructionConfig, Constructor, ConstructorHelper, InMemoryHelper,
};
use num_bigint::BigUint;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const FAUCET: u32 = 1_000_000;

fn init_logger() {
    let _ = env_logger::Builder::from_default_env()
        .is_test(true)
        .try_init();
}

fn currency() -> Currency {
    Currency::new("TOS", 8)
}

fn op(index: u64, kind: &str, address: &str, value: &str) -> Operation {
    Operation {
        operation_identifier: OperationIdentifier::new(index),
        related_operations: Vec::new(),
        kind: kind.to_string(),
        status: None,
        account: Some(AccountIdentifier::new(address)),
        amount: Some(Amount {
            value: value.to_string(),
            currency: currency(),
        }),
        coin_change: None,
        metadata: None,
    }
}

fn account_config() -> ConstructionConfig {
    ConstructionConfig::new(
        NetworkIdentifier::new("tos", "devnet"),
        AccountingModel::Account,
        currency(),
        BigUint::from(1_000u32),
        BigUint::from(100u32),
        vec![
            op(0, "Transfer", SENDER, SENDER_VALUE),
            op(1, "Transfer", RECIPIENT, RECIPIENT_VALUE),
        ],
    )
}

fn utxo_config() -> ConstructionConfig {
    let mut input = op(0, "Input", SENDER, SENDER_VALUE);
    input.coin_change = Some(CoinChange {
        coin_identifier: CoinIdentifier::new(COIN_IDENTIFIER),
        coin_action: CoinAction::CoinSpent,
    });

    ConstructionConfig::new(
        NetworkIdentifier::new("tos", "devnet"),
        AccountingModel::Utxo,
        currency(),
        BigUint::from(1_000u32),
        BigUint::from(100u32),
        vec![input, op(1, "Output", RECIPIENT, RECIPIENT_VALUE)],
    )
    .with_change_scenario(op(2, "Output", CHANGE_ADDRESS, CHANGE_VALUE))
}

fn build(config: ConstructionConfig, helper: Arc<InMemoryHelper>, seed: u64) -> Constructor {
    Constructor::new(config, helper.clone(), helper)
        .unwrap()
        .with_clock(Arc::new(PausedClock::new()))
        .with_rng(SeededRng::with_seed(seed))
}

async fn total_account_balance(helper: &InMemoryHelper) -> BigUint {
    let mut total = BigUint::default();
    for address in helper.addresses() {
        total += helper
            .account_balance(&AccountIdentifier::new(address.as_str()), &currency())
            .await
            .unwrap();
    }
    total
}

#[tokio::test]
async fn test_account_run_conserves_supply() {
    init_logger();
    let helper = Arc::new(
        InMemoryHelper::new(AccountingModel::Account).with_faucet(BigUint::from(FAUCET)),
    );
    let constructor = build(account_config(), helper.clone(), 0xfeed);
    let cancel = CancellationToken::new();

    for _ in 0..5 {
        let constructed = constructor.next_transaction(&cancel).await.unwrap();

        let net: i128 = constructed
            .intent
            .iter()
            .map(|op| op.amount.as_ref().unwrap().value.parse::<i128>().unwrap())
            .sum();
        assert_eq!(net, 0);

        let submitted = helper.submit(&constructed.network_transaction).unwrap();
        assert_eq!(submitted, constructed.transaction_identifier);
        helper.confirm_all().unwrap();
    }

    // Transfers only move value between created addresses
    let funded = helper.addresses().len() as u64;
    assert_eq!(
        total_account_balance(&helper).await,
        BigUint::from(FAUCET) * funded
    );

    // Every sender kept at least the minimum balance
    for address in helper.addresses() {
        let balance = helper
            .account_balance(&AccountIdentifier::new(address.as_str()), &currency())
            .await
            .unwrap();
        assert!(balance >= BigUint::from(1_000u32));
    }
}

#[tokio::test]
async fn test_utxo_run_spends_selected_coin() {
    init_logger();
    let helper = Arc::new(
        InMemoryHelper::new(AccountingModel::Utxo).with_faucet(BigUint::from(FAUCET)),
    );
    let constructor = build(utxo_config(), helper.clone(), 0xbeef);
    let cancel = CancellationToken::new();

    for _ in 0..5 {
        let constructed = constructor.next_transaction(&cancel).await.unwrap();
        let scenario = &constructed.scenario;

        let coin = scenario.coin_identifier.clone().unwrap();
        let input = &constructed.intent[0];
        assert_eq!(input.coin_change.as_ref().unwrap().coin_identifier, coin);

        // Outputs plus the maximum fee cover the whole coin
        let outputs = &scenario.recipient_value
            + scenario.change_value().cloned().unwrap_or_default();
        assert!(outputs <= &scenario.sender_value - BigUint::from(100u32));
        if let Some(change) = scenario.change_value() {
            assert!(*change >= BigUint::from(1_000u32));
            assert_eq!(outputs, &scenario.sender_value - BigUint::from(100u32));
        }

        helper.submit(&constructed.network_transaction).unwrap();
        helper.confirm_all().unwrap();

        // The spent coin is gone from the sender
        let (_, largest) = helper
            .coin_balance(&AccountIdentifier::new(scenario.sender.as_str()), &currency())
            .await
            .unwrap();
        assert_ne!(largest, Some(coin));
    }
}

#[tokio::test]
async fn test_run_waits_for_pending_broadcast() {
    init_logger();
    let helper = Arc::new(
        InMemoryHelper::new(AccountingModel::Account).with_faucet(BigUint::from(FAUCET)),
    );
    let config = account_config().with_max_addresses(1);
    let constructor = build(config, helper.clone(), 3);
    let cancel = CancellationToken::new();

    let first = constructor.next_transaction(&cancel).await.unwrap();
    helper.submit(&first.network_transaction).unwrap();

    // Lock the recipient as well so no sender is available until confirmation
    helper.lock_address(&first.scenario.recipient);
    let start = tokio::time::Instant::now();
    let confirmer = {
        let helper = helper.clone();
        let recipient = first.scenario.recipient.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(35)).await;
            helper.confirm_all().unwrap();
            helper.unlock_address(&recipient);
        })
    };

    let second = constructor.next_transaction(&cancel).await.unwrap();
    confirmer.await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(35));
    assert_ne!(first.transaction_identifier, second.transaction_identifier);
}
