use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(handlers::get_info))
        .route("/info", web::get().to(handlers::get_info))
        .route("/tx", web::post().to(handlers::submit_transaction))
        // Registered before /tx/{id} so "pending" is not taken for an id
        .route("/tx/pending", web::get().to(handlers::get_pending_transactions))
        .route("/tx/{id}", web::get().to(handlers::get_transaction))
        .route("/tx/{id}", web::delete().to(handlers::delete_transaction))
        .route("/tx/{id}/{projection}", web::get().to(handlers::get_transaction_projection))
        .route("/chunk", web::post().to(handlers::post_chunk))
        .route("/chunk/{offset}", web::get().to(handlers::get_chunk))
        .route("/block/hash/{id}", web::get().to(handlers::get_block_by_hash))
        .route("/block/height/{height}", web::get().to(handlers::get_block_by_height))
        .route("/mine/{qty}", web::get().to(handlers::mine))
        .route("/mine_with_fails/{qty}", web::get().to(handlers::mine_with_fails))
        .route("/wallet", web::post().to(handlers::create_wallet))
        .route("/wallets", web::get().to(handlers::get_all_wallets))
        .route("/wallet/{address}", web::get().to(handlers::get_wallet))
        .route("/wallet/{address}/balance", web::get().to(handlers::get_wallet_balance))
        .route("/wallet/{address}/balance", web::patch().to(handlers::set_wallet_balance))
        .route("/wallet/{address}/last_tx", web::get().to(handlers::get_wallet_last_tx))
        .route("/mint/{address}/{amount}", web::get().to(handlers::mint))
        .route("/reset", web::get().to(handlers::reset))
        .route("/validate", web::get().to(handlers::validate_chain));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::schema::{ChunkRequest, MineResponse, SubmitResponse, TransactionRequest};
    use crate::blockchain::crypto::encode_b64url;
    use crate::blockchain::{Blockchain, NetworkStatus};
    use crate::config::{Capabilities, LedgerConfig};
    use actix_web::{http::StatusCode, test, App};
    use serde_json::Value;

    fn ledger(config: LedgerConfig) -> web::Data<Blockchain> {
        let blockchain = Blockchain::new(config).unwrap();
        blockchain.mine_genesis_block().unwrap();
        web::Data::new(blockchain)
    }

    fn transfer(id: &str, owner: &str, target: &str, quantity: u64, reward: u64) -> TransactionRequest {
        TransactionRequest {
            id: id.to_string(),
            owner: owner.to_string(),
            target: target.to_string(),
            quantity,
            reward,
            ..Default::default()
        }
    }

    #[actix_web::test]
    async fn test_transfer_round_trip() {
        let data = ledger(LedgerConfig::default());
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/mint/A/100").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/tx")
            .set_json(transfer("t1", "A", "B", 10, 1))
            .to_request();
        let submitted: SubmitResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(submitted.id, "t1");

        let req = test::TestRequest::get().uri("/tx/pending").to_request();
        let pending: Vec<String> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(pending, vec!["t1".to_string()]);

        let req = test::TestRequest::get().uri("/mine/1").to_request();
        let mined: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(mined.height, 1);
        assert_eq!(mined.blocks[0].transaction_ids, vec!["t1".to_string()]);

        let req = test::TestRequest::get().uri("/wallet/A/balance").to_request();
        assert_eq!(test::call_and_read_body(&app, req).await, "89");

        let req = test::TestRequest::get().uri("/wallet/B/last_tx").to_request();
        assert_eq!(test::call_and_read_body(&app, req).await, "t1");

        let req = test::TestRequest::get().uri("/tx/t1/status").to_request();
        let status: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["status"], "confirmed");
        assert_eq!(status["number_of_confirmations"], 1);

        let req = test::TestRequest::get().uri("/info").to_request();
        let info: NetworkStatus = test::call_and_read_body_json(&app, req).await;
        assert_eq!(info.height, 1);
        assert_eq!(info.queue_length, 0);

        let req = test::TestRequest::get().uri("/validate").to_request();
        let valid: bool = test::call_and_read_body_json(&app, req).await;
        assert!(valid);

        let req = test::TestRequest::get().uri("/wallets").to_request();
        let wallets: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(wallets.len(), 3);
    }

    #[actix_web::test]
    async fn test_error_mapping() {
        let data = ledger(LedgerConfig::default());
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/tx/missing").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "not_found");

        let req = test::TestRequest::post()
            .uri("/tx")
            .set_json(transfer("t1", "A", "B", 10, 1))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "insufficient_funds");

        let req = test::TestRequest::post()
            .uri("/tx")
            .set_json(transfer("t2", "A", "", 0, 0))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        let req = test::TestRequest::post()
            .uri("/tx")
            .set_json(transfer("t2", "A", "", 0, 0))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let oversized = TransactionRequest {
            id: "big".to_string(),
            owner: "A".to_string(),
            data_size: u64::MAX,
            data_root: "root".to_string(),
            ..Default::default()
        };
        let req = test::TestRequest::post().uri("/tx").set_json(oversized).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "invalid_input");

        let req = test::TestRequest::get().uri("/block/height/9").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/tx/t2/nonsense").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/mine_with_fails/1?fail_rate=2").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_chunked_upload() {
        let data = ledger(LedgerConfig::default());
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let request = TransactionRequest {
            id: "doc".to_string(),
            owner: "A".to_string(),
            data_size: 10,
            data_root: "root".to_string(),
            ..Default::default()
        };
        let req = test::TestRequest::post().uri("/tx").set_json(request).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        for (offset, bytes) in [(0u64, "hello"), (5, "weave")] {
            let chunk = ChunkRequest {
                data_root: "root".to_string(),
                offset,
                chunk: encode_b64url(bytes),
                ..Default::default()
            };
            let req = test::TestRequest::post().uri("/chunk").set_json(chunk).to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }

        let overlapping = ChunkRequest {
            transaction_id: "doc".to_string(),
            offset: 3,
            chunk: encode_b64url("xx"),
            ..Default::default()
        };
        let req = test::TestRequest::post().uri("/chunk").set_json(overlapping).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get().uri("/tx/doc/data.txt").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap().to_str().unwrap(),
            "text/plain"
        );
        assert_eq!(test::read_body(resp).await, "helloweave");

        let req = test::TestRequest::get().uri("/tx/doc/offset").to_request();
        let offset: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(offset["offset"], "9");
        assert_eq!(offset["size"], "10");
    }

    #[actix_web::test]
    async fn test_constrained_mode_refuses_admin() {
        let config = LedgerConfig {
            capabilities: Capabilities { admin: false },
            ..LedgerConfig::default()
        };
        let data = ledger(config);
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        for uri in ["/mine/1", "/mint/A/5", "/reset", "/mine_with_fails/1?fail_rate=0.5"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{}", uri);
        }

        let req = test::TestRequest::get().uri("/wallet/A/balance").to_request();
        assert_eq!(test::call_and_read_body(&app, req).await, "0");
        assert_eq!(data.network_status().height, 0);
    }

    #[actix_web::test]
    async fn test_reset_restarts_from_genesis() {
        let data = ledger(LedgerConfig::default());
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/mine/3").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/reset").to_request();
        let status: NetworkStatus = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.height, 0);
        assert_eq!(status.blocks, 1);

        let req = test::TestRequest::get().uri("/block/height/0").to_request();
        let genesis: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(genesis["transaction_ids"], serde_json::json!([]));
    }
}
