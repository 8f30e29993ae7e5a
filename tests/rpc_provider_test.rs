mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::{TxFixture, lookup_table_data, program_data, sig};
use serde_json::json;
use solana_event_ingestor::{
    DefaultRpcProvider, IngestorError, RetryPolicy, RetryingRpcProvider, RpcProvider,
};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn server() -> MockServer {
    let mock_server = MockServer::start().await;

    // RpcClient may ask for the node version before mapping commitments.
    Mock::given(method("POST"))
        .and(body_string_contains("getVersion"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "result": { "solana-core": "1.18.26", "feature-set": 0 },
            "id": 1
        })))
        .mount(&mock_server)
        .await;

    mock_server
}

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": 1
    }))
}

#[tokio::test]
async fn test_get_signatures_for_address() {
    let mock_server = server().await;
    Mock::given(method("POST"))
        .and(body_string_contains("getSignaturesForAddress"))
        .respond_with(rpc_result(json!([
            {
                "signature": sig(2).to_string(),
                "slot": 200,
                "err": null,
                "memo": null,
                "blockTime": 1_700_000_200,
                "confirmationStatus": "confirmed"
            },
            {
                "signature": sig(1).to_string(),
                "slot": 100,
                "err": null,
                "memo": null,
                "blockTime": null,
                "confirmationStatus": "finalized"
            }
        ])))
        .mount(&mock_server)
        .await;

    let provider = DefaultRpcProvider::new(&mock_server.uri());
    let page = provider
        .get_signatures_for_address(
            &Pubkey::new_unique(),
            None,
            Some(sig(0)),
            1000,
            Some(CommitmentConfig::confirmed()),
        )
        .await
        .unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page[0].signature, sig(2).to_string());
    assert_eq!(page[0].block_time, Some(1_700_000_200));
    assert_eq!(page[1].slot, 100);
    assert_eq!(page[1].block_time, None);
}

#[tokio::test]
async fn test_get_transaction() {
    let mock_server = server().await;
    let tx = TxFixture::new(sig(5), 555)
        .log(program_data(&[0u8; 8]))
        .build();
    Mock::given(method("POST"))
        .and(body_string_contains("getTransaction"))
        .respond_with(rpc_result(serde_json::to_value(&tx).unwrap()))
        .mount(&mock_server)
        .await;

    let provider = DefaultRpcProvider::new(&mock_server.uri());
    let fetched = provider
        .get_transaction(&sig(5), Some(CommitmentConfig::confirmed()))
        .await
        .unwrap();

    assert_eq!(fetched.slot, 555);
    assert_eq!(fetched.block_time, Some(1_700_000_000));
}

#[tokio::test]
async fn test_get_account_data() {
    let mock_server = server().await;
    let addresses = [Pubkey::new_unique(), Pubkey::new_unique()];
    let data = lookup_table_data(&addresses);
    Mock::given(method("POST"))
        .and(body_string_contains("getAccountInfo"))
        .respond_with(rpc_result(json!({
            "context": { "slot": 1 },
            "value": {
                "data": [STANDARD.encode(&data), "base64"],
                "executable": false,
                "lamports": 1_000_000,
                "owner": "AddressLookupTab1e1111111111111111111111111",
                "rentEpoch": 0,
                "space": data.len()
            }
        })))
        .mount(&mock_server)
        .await;

    let provider = DefaultRpcProvider::new(&mock_server.uri());
    let fetched = provider
        .get_account_data(&Pubkey::new_unique(), Some(CommitmentConfig::finalized()))
        .await
        .unwrap();

    assert_eq!(fetched, data);
}

#[tokio::test]
async fn test_missing_account_is_an_error() {
    let mock_server = server().await;
    Mock::given(method("POST"))
        .and(body_string_contains("getAccountInfo"))
        .respond_with(rpc_result(json!({
            "context": { "slot": 1 },
            "value": null
        })))
        .mount(&mock_server)
        .await;

    let provider = DefaultRpcProvider::new(&mock_server.uri());
    let result = provider
        .get_account_data(&Pubkey::new_unique(), None)
        .await;

    assert!(matches!(result, Err(IngestorError::RpcError(_))));
}

#[tokio::test]
async fn test_retrying_provider_recovers_from_server_error() {
    let mock_server = server().await;
    Mock::given(method("POST"))
        .and(body_string_contains("getSignaturesForAddress"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("getSignaturesForAddress"))
        .respond_with(rpc_result(json!([])))
        .with_priority(2)
        .mount(&mock_server)
        .await;

    let provider = RetryingRpcProvider::new(
        DefaultRpcProvider::new(&mock_server.uri()),
        RetryPolicy::no_delay(3),
    );
    let page = provider
        .get_signatures_for_address(&Pubkey::new_unique(), None, None, 10, None)
        .await
        .unwrap();

    assert!(page.is_empty());
}
