use actix_web::{web, HttpResponse};
use log::warn;

use super::error::{ApiError, ApiResult};
use super::schema::{
    BalanceUpdate, ChunkRequest, ChunkView, FailQuery, MineResponse, SubmitResponse,
    TransactionRequest, TransactionView, WalletRequest,
};
use crate::blockchain::crypto::{decode_b64url, Address};
use crate::blockchain::transaction::ProjectionValue;
use crate::blockchain::{Block, Blockchain, NetworkStatus, TransactionProjection, Wallet};

/// Data structure for the blockchain state
pub type BlockchainData = web::Data<Blockchain>;

/// Refuses admin operations when the node runs in constrained mode
fn ensure_admin(blockchain: &Blockchain, operation: &str) -> ApiResult<()> {
    if blockchain.capabilities().admin {
        Ok(())
    } else {
        warn!("Refused admin operation {} in constrained mode", operation);
        Err(ApiError::Forbidden(operation.to_string()))
    }
}

fn mined(blockchain: &Blockchain, blocks: Vec<Block>) -> HttpResponse {
    let height = blockchain.network_status().height.max(0) as u64;
    HttpResponse::Ok().json(MineResponse { height, blocks })
}

/// Get the network status
///
/// Returns height, current block and queue length of the node
#[utoipa::path(
    get,
    path = "/info",
    responses(
        (status = 200, description = "Network status retrieved successfully", body = NetworkStatus)
    )
)]
pub async fn get_info(blockchain: BlockchainData) -> HttpResponse {
    HttpResponse::Ok().json(blockchain.network_status())
}

/// Submit a transaction
///
/// Validates the transaction and adds it to the pending pool
#[utoipa::path(
    post,
    path = "/tx",
    request_body = TransactionRequest,
    responses(
        (status = 200, description = "Transaction accepted", body = SubmitResponse),
        (status = 400, description = "Invalid transaction or insufficient funds"),
        (status = 409, description = "Duplicate transaction id")
    )
)]
pub async fn submit_transaction(
    blockchain: BlockchainData,
    request: web::Json<TransactionRequest>,
) -> ApiResult<HttpResponse> {
    let submission = request.into_inner().into_submission()?;
    let id = blockchain.submit_transaction(submission)?;
    Ok(HttpResponse::Ok().json(SubmitResponse { id }))
}

/// Get all pending transactions
///
/// Returns the ids of the transactions waiting to be mined, in submission order
#[utoipa::path(
    get,
    path = "/tx/pending",
    responses(
        (status = 200, description = "Pending transaction ids", body = Vec<String>)
    )
)]
pub async fn get_pending_transactions(blockchain: BlockchainData) -> ApiResult<HttpResponse> {
    let ids: Vec<String> = blockchain
        .list_pending()?
        .into_iter()
        .map(|tx| tx.id)
        .collect();
    Ok(HttpResponse::Ok().json(ids))
}

/// Get a transaction
#[utoipa::path(
    get,
    path = "/tx/{id}",
    params(("id" = String, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Transaction found", body = TransactionView),
        (status = 404, description = "Unknown transaction")
    )
)]
pub async fn get_transaction(
    blockchain: BlockchainData,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let transaction = blockchain.get_transaction(&id)?;
    Ok(HttpResponse::Ok().json(TransactionView::from(&transaction)))
}

/// Get one projection of a transaction
///
/// `projection` is a field name, `status`, `offset`, `data` or `data.{ext}`
#[utoipa::path(
    get,
    path = "/tx/{id}/{projection}",
    params(
        ("id" = String, Path, description = "Transaction id"),
        ("projection" = String, Path, description = "Field, status, offset, data or data.{ext}")
    ),
    responses(
        (status = 200, description = "Projection resolved"),
        (status = 400, description = "Unknown projection"),
        (status = 404, description = "Unknown transaction or incomplete data")
    )
)]
pub async fn get_transaction_projection(
    blockchain: BlockchainData,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (id, projection) = path.into_inner();
    let projection: TransactionProjection = projection.parse()?;

    let response = match blockchain.project_transaction(&id, &projection)? {
        ProjectionValue::Json(value) => HttpResponse::Ok().json(value),
        ProjectionValue::Bytes { content_type, data } => {
            HttpResponse::Ok().content_type(content_type).body(data)
        }
    };
    Ok(response)
}

/// Delete a transaction (admin)
///
/// Confirmed transactions can be deleted too; their balance changes are kept
#[utoipa::path(
    delete,
    path = "/tx/{id}",
    params(("id" = String, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Transaction deleted", body = TransactionView),
        (status = 403, description = "Admin operations are disabled"),
        (status = 404, description = "Unknown transaction")
    )
)]
pub async fn delete_transaction(
    blockchain: BlockchainData,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    ensure_admin(&blockchain, "delete transaction")?;
    let removed = blockchain.remove_transaction(&id)?;
    Ok(HttpResponse::Ok().json(TransactionView::from(&removed)))
}

/// Post a chunk of transaction data
#[utoipa::path(
    post,
    path = "/chunk",
    request_body = ChunkRequest,
    responses(
        (status = 200, description = "Chunk stored", body = ChunkView),
        (status = 400, description = "Malformed or out of bounds chunk"),
        (status = 409, description = "Chunk overlaps stored data")
    )
)]
pub async fn post_chunk(
    blockchain: BlockchainData,
    request: web::Json<ChunkRequest>,
) -> ApiResult<HttpResponse> {
    let request = request.into_inner();
    let data = decode_b64url(&request.chunk)?;
    let transaction_id = Some(request.transaction_id.as_str()).filter(|id| !id.is_empty());
    let data_root = Some(request.data_root.as_str()).filter(|root| !root.is_empty());

    let chunk = blockchain.post_chunk(transaction_id, data_root, request.offset, data)?;
    Ok(HttpResponse::Ok().json(ChunkView::from(&chunk)))
}

/// Get the chunk starting at an absolute weave offset
#[utoipa::path(
    get,
    path = "/chunk/{offset}",
    params(("offset" = u64, Path, description = "Absolute weave offset")),
    responses(
        (status = 200, description = "Chunk found", body = ChunkView),
        (status = 404, description = "No chunk starts at this offset")
    )
)]
pub async fn get_chunk(
    blockchain: BlockchainData,
    offset: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let chunk = blockchain.get_chunk(offset.into_inner())?;
    Ok(HttpResponse::Ok().json(ChunkView::from(&chunk)))
}

/// Get a block by its id
#[utoipa::path(
    get,
    path = "/block/hash/{id}",
    params(("id" = String, Path, description = "Block id")),
    responses(
        (status = 200, description = "Block found", body = Block),
        (status = 404, description = "Unknown block")
    )
)]
pub async fn get_block_by_hash(
    blockchain: BlockchainData,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(blockchain.get_block_by_hash(&id)?))
}

/// Get a block by its height
#[utoipa::path(
    get,
    path = "/block/height/{height}",
    params(("height" = u64, Path, description = "Block height")),
    responses(
        (status = 200, description = "Block found", body = Block),
        (status = 404, description = "Height beyond the chain tip")
    )
)]
pub async fn get_block_by_height(
    blockchain: BlockchainData,
    height: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(blockchain.get_block_by_height(height.into_inner())?))
}

/// Mine blocks (admin)
///
/// Every block confirms the pending transactions whose owners can pay
#[utoipa::path(
    get,
    path = "/mine/{qty}",
    params(("qty" = u64, Path, description = "Number of blocks to mine")),
    responses(
        (status = 200, description = "Blocks mined", body = MineResponse),
        (status = 403, description = "Admin operations are disabled")
    )
)]
pub async fn mine(blockchain: BlockchainData, qty: web::Path<u64>) -> ApiResult<HttpResponse> {
    ensure_admin(&blockchain, "mine")?;
    let blocks = blockchain.mine(qty.into_inner())?;
    Ok(mined(&blockchain, blocks))
}

/// Mine blocks with simulated failures (admin)
///
/// Each transaction that would be mined stays pending with probability `fail_rate`
#[utoipa::path(
    get,
    path = "/mine_with_fails/{qty}",
    params(("qty" = u64, Path, description = "Number of blocks to mine"), FailQuery),
    responses(
        (status = 200, description = "Blocks mined", body = MineResponse),
        (status = 400, description = "Failure rate outside [0, 1]"),
        (status = 403, description = "Admin operations are disabled")
    )
)]
pub async fn mine_with_fails(
    blockchain: BlockchainData,
    qty: web::Path<u64>,
    query: web::Query<FailQuery>,
) -> ApiResult<HttpResponse> {
    ensure_admin(&blockchain, "mine with failures")?;
    let blocks = blockchain.mine_with_failures(qty.into_inner(), query.fail_rate)?;
    Ok(mined(&blockchain, blocks))
}

/// Get wallet balance
///
/// Unknown addresses hold 0
#[utoipa::path(
    get,
    path = "/wallet/{address}/balance",
    params(("address" = String, Path, description = "Wallet address")),
    responses(
        (status = 200, description = "Balance as a decimal string", body = String),
        (status = 400, description = "Malformed address")
    )
)]
pub async fn get_wallet_balance(
    blockchain: BlockchainData,
    address: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let address: Address = address.parse()?;
    let balance = blockchain.get_balance(&address)?;
    Ok(HttpResponse::Ok().content_type("text/plain").body(balance.to_string()))
}

/// Get the last transaction of a wallet
///
/// Empty when no confirmed transaction touched the wallet
#[utoipa::path(
    get,
    path = "/wallet/{address}/last_tx",
    params(("address" = String, Path, description = "Wallet address")),
    responses(
        (status = 200, description = "Transaction id", body = String),
        (status = 400, description = "Malformed address")
    )
)]
pub async fn get_wallet_last_tx(
    blockchain: BlockchainData,
    address: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let address: Address = address.parse()?;
    let last_tx = blockchain.get_last_tx(&address)?.unwrap_or_default();
    Ok(HttpResponse::Ok().content_type("text/plain").body(last_tx))
}

/// Get a wallet
#[utoipa::path(
    get,
    path = "/wallet/{address}",
    params(("address" = String, Path, description = "Wallet address")),
    responses(
        (status = 200, description = "Wallet retrieved successfully", body = Wallet),
        (status = 400, description = "Malformed address")
    )
)]
pub async fn get_wallet(
    blockchain: BlockchainData,
    address: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let address: Address = address.parse()?;
    Ok(HttpResponse::Ok().json(blockchain.get_wallet(&address)?))
}

/// Get all wallets
///
/// Returns every wallet that has been written at least once
#[utoipa::path(
    get,
    path = "/wallets",
    responses(
        (status = 200, description = "Wallets retrieved successfully", body = Vec<Wallet>)
    )
)]
pub async fn get_all_wallets(blockchain: BlockchainData) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(blockchain.all_wallets()?))
}

/// Create a wallet (admin)
#[utoipa::path(
    post,
    path = "/wallet",
    request_body = WalletRequest,
    responses(
        (status = 200, description = "Wallet created", body = Wallet),
        (status = 403, description = "Admin operations are disabled")
    )
)]
pub async fn create_wallet(
    blockchain: BlockchainData,
    request: web::Json<WalletRequest>,
) -> ApiResult<HttpResponse> {
    ensure_admin(&blockchain, "create wallet")?;
    let address: Address = request.address.parse()?;
    let wallet = blockchain.set_balance(&address, request.balance)?;
    Ok(HttpResponse::Ok().json(wallet))
}

/// Overwrite a wallet balance (admin)
#[utoipa::path(
    patch,
    path = "/wallet/{address}/balance",
    params(("address" = String, Path, description = "Wallet address")),
    request_body = BalanceUpdate,
    responses(
        (status = 200, description = "Balance updated", body = Wallet),
        (status = 403, description = "Admin operations are disabled")
    )
)]
pub async fn set_wallet_balance(
    blockchain: BlockchainData,
    address: web::Path<String>,
    update: web::Json<BalanceUpdate>,
) -> ApiResult<HttpResponse> {
    ensure_admin(&blockchain, "set balance")?;
    let address: Address = address.parse()?;
    let wallet = blockchain.set_balance(&address, update.balance)?;
    Ok(HttpResponse::Ok().json(wallet))
}

/// Credit a wallet out of thin air (admin)
#[utoipa::path(
    get,
    path = "/mint/{address}/{amount}",
    params(
        ("address" = String, Path, description = "Wallet address"),
        ("amount" = u64, Path, description = "Amount to credit")
    ),
    responses(
        (status = 200, description = "Wallet credited", body = Wallet),
        (status = 403, description = "Admin operations are disabled")
    )
)]
pub async fn mint(
    blockchain: BlockchainData,
    path: web::Path<(String, u64)>,
) -> ApiResult<HttpResponse> {
    ensure_admin(&blockchain, "mint")?;
    let (address, amount) = path.into_inner();
    let address: Address = address.parse()?;
    let wallet = blockchain.mint(&address, amount)?;
    Ok(HttpResponse::Ok().json(wallet))
}

/// Reset the chain (admin)
///
/// Clears every table and mines a fresh genesis block
#[utoipa::path(
    get,
    path = "/reset",
    responses(
        (status = 200, description = "Chain reset", body = NetworkStatus),
        (status = 403, description = "Admin operations are disabled")
    )
)]
pub async fn reset(blockchain: BlockchainData) -> ApiResult<HttpResponse> {
    ensure_admin(&blockchain, "reset")?;
    blockchain.reset()?;
    blockchain.mine_genesis_block()?;
    Ok(HttpResponse::Ok().json(blockchain.network_status()))
}

/// Check if the chain is valid
///
/// Walks the chain from genesis and checks heights, links and block ids
#[utoipa::path(
    get,
    path = "/validate",
    responses(
        (status = 200, description = "Chain validation status", body = bool)
    )
)]
pub async fn validate_chain(blockchain: BlockchainData) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(blockchain.verify_chain()?))
}
