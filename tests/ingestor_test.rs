mod common;

use common::{MockRpc, MockSubscriber, TxFixture, encode_event, program_data, sig};
use solana_event_ingestor::{
    Address, DepositEvent, Ingestor, IngestorConfig, IngestorConfigBuilder, IngestorError,
    LogsSubscriber, MemoryStorage, ReconnectConfig, RetryConfig, StorageBackend,
    WithdrawEvent,
};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config(program: &Pubkey, realtime: bool, backfill: bool) -> IngestorConfig {
    builder(program, realtime, backfill).build().unwrap()
}

fn builder(program: &Pubkey, realtime: bool, backfill: bool) -> IngestorConfigBuilder {
    IngestorConfigBuilder::new()
        .with_rpc("http://127.0.0.1:8899")
        .with_ws("ws://127.0.0.1:8900")
        .program_id(program.to_string())
        .with_realtime(realtime)
        .with_backfill(backfill)
        .with_retry(RetryConfig {
            max_attempts: 1,
            delay_ms: 0,
        })
        .with_reconnect(ReconnectConfig {
            delay_secs: 1,
            max_failures: 2,
        })
        .with_page_size(2)
}

fn deposit_tx(n: u8) -> solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta {
    let event = DepositEvent {
        vault: Address([7; 32]),
        user: Address([n; 32]),
        amount: u64::from(n) * 100,
        shares_minted: u64::from(n) * 99,
        timestamp: 1_700_000_000 + i64::from(n),
    };
    TxFixture::new(sig(n), u64::from(n) * 10)
        .log(program_data(&encode_event(&event)))
        .build()
}

fn seeded(program: &Pubkey, count: u8) -> Arc<MockRpc> {
    let rpc = Arc::new(MockRpc::new());
    for n in 1..=count {
        rpc.push_signature(program, sig(n), u64::from(n) * 10);
        rpc.insert_transaction(sig(n), deposit_tx(n));
    }
    rpc
}

#[tokio::test]
async fn test_backfill_only_run_drains_and_stops() {
    let program = Pubkey::new_unique();
    let rpc = seeded(&program, 5);
    let storage = Arc::new(MemoryStorage::new());

    let ingestor = Ingestor::with_components(
        config(&program, false, true),
        rpc.clone(),
        storage.clone(),
        None,
        CancellationToken::new(),
    );
    let stats = ingestor.run().await.unwrap();

    assert_eq!(stats.ingested, 5);
    assert_eq!(stats.failed, 0);
    assert_eq!(storage.event_count().await, 5);
    assert!(storage.get_ordered_no_raw_signatures().await.unwrap().is_empty());
    assert_eq!(storage.programs().await, vec![program.to_string()]);
}

#[tokio::test]
async fn test_second_run_ingests_nothing_new() {
    let program = Pubkey::new_unique();
    let rpc = seeded(&program, 3);
    let storage = Arc::new(MemoryStorage::new());

    for _ in 0..2 {
        Ingestor::with_components(
            config(&program, false, true),
            rpc.clone(),
            storage.clone(),
            None,
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();
    }

    assert_eq!(rpc.transaction_calls(), 3);
    assert_eq!(storage.event_count().await, 3);
}

#[tokio::test]
async fn test_unfetched_signatures_are_recovered_on_start() {
    let program = Pubkey::new_unique();
    let rpc = Arc::new(MockRpc::new());
    rpc.insert_transaction(sig(9), deposit_tx(9));
    let storage = Arc::new(MemoryStorage::new());
    storage
        .save_transaction(&sig(9).to_string(), 90, 0)
        .await
        .unwrap();

    let stats = Ingestor::with_components(
        config(&program, false, false),
        rpc.clone(),
        storage.clone(),
        None,
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.ingested, 1);
    assert_eq!(rpc.signature_calls(), 0);
    assert!(storage.is_parsed(&sig(9).to_string()).await.unwrap());
}

#[tokio::test]
async fn test_realtime_run_ingests_notifications_until_cancelled() {
    let program = Pubkey::new_unique();
    let rpc = seeded(&program, 2);
    rpc.insert_transaction(sig(3), deposit_tx(3));
    let storage = Arc::new(MemoryStorage::new());
    let subscriber = Arc::new(MockSubscriber::healthy());
    let cancel = CancellationToken::new();

    let ingestor = Arc::new(Ingestor::with_components(
        config(&program, true, true),
        rpc.clone(),
        storage.clone(),
        Some(subscriber.clone() as Arc<dyn LogsSubscriber>),
        cancel.clone(),
    ));
    let running = tokio::spawn({
        let ingestor = ingestor.clone();
        async move { ingestor.run().await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while storage.event_count().await < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(subscriber.notify(&program, sig(3), 30));
    tokio::time::timeout(Duration::from_secs(5), async {
        while !storage.is_parsed(&sig(3).to_string()).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.ingested, 3);
    assert_eq!(storage.event_count().await, 3);
}

#[tokio::test]
async fn test_resumed_first_run_keeps_history_behind_live_notification() {
    let program = Pubkey::new_unique();
    let rpc = seeded(&program, 6);
    let storage = Arc::new(MemoryStorage::new());
    // The newest signature shows up live the moment the program subscribes.
    let subscriber = Arc::new(MockSubscriber::healthy().with_pending(&program, sig(6), 60));
    let cancel = CancellationToken::new();

    let ingestor = Arc::new(Ingestor::with_components(
        builder(&program, true, true).with_resume(true).build().unwrap(),
        rpc.clone(),
        storage.clone(),
        Some(subscriber.clone() as Arc<dyn LogsSubscriber>),
        cancel.clone(),
    ));
    let running = tokio::spawn({
        let ingestor = ingestor.clone();
        async move { ingestor.run().await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while storage.event_count().await < 6 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.ingested, 6);
    assert_eq!(stats.failed, 0);
    for n in 1..=6 {
        assert!(storage.is_parsed(&sig(n).to_string()).await.unwrap());
    }
}

#[tokio::test(start_paused = true)]
async fn test_permanent_listener_failure_stops_the_run() {
    let program = Pubkey::new_unique();
    let rpc = seeded(&program, 1);
    let subscriber: Arc<dyn LogsSubscriber> = Arc::new(MockSubscriber::failing(u32::MAX));

    let err = Ingestor::with_components(
        config(&program, true, true),
        rpc.clone(),
        Arc::new(MemoryStorage::new()),
        Some(subscriber),
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, IngestorError::ConnectionError(_)));
    // The backfill never starts before every listener is live.
    assert_eq!(rpc.signature_calls(), 0);
}

#[tokio::test]
async fn test_events_from_multiple_schemas_are_stored() {
    let program = Pubkey::new_unique();
    let rpc = Arc::new(MockRpc::new());
    let withdraw = WithdrawEvent {
        vault: Address([7; 32]),
        user: Address([1; 32]),
        amount: 50,
        shares_burned: 49,
        timestamp: 1_700_000_500,
    };
    let tx = TxFixture::new(sig(1), 10)
        .log(program_data(&encode_event(&withdraw)))
        .log("Program log: done")
        .log(program_data(&encode_event(&DepositEvent {
            vault: Address([7; 32]),
            user: Address([1; 32]),
            amount: 5,
            shares_minted: 5,
            timestamp: 1_700_000_501,
        })))
        .build();
    rpc.push_signature(&program, sig(1), 10);
    rpc.insert_transaction(sig(1), tx);
    let storage = Arc::new(MemoryStorage::new());

    Ingestor::with_components(
        config(&program, false, true),
        rpc,
        storage.clone(),
        None,
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    let events = storage.events_for(&sig(1).to_string()).await;
    assert_eq!(
        events
            .iter()
            .map(|e| (e.log_index, e.name.as_str()))
            .collect::<Vec<_>>(),
        vec![(2000, "WithdrawEvent"), (2002, "DepositEvent")]
    );
    assert_eq!(events[0].payload["shares_burned"], 49);
}
