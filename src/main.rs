use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::sync::Arc;

mod api;
mod blockchain;
mod config;

use blockchain::{Blockchain, Storage};
use config::Args;

// Open the ledger database and make sure the chain has a genesis block
fn initialize_blockchain(args: &Args) -> anyhow::Result<Blockchain> {
    let config = args
        .ledger_config()
        .context("invalid ledger configuration")?;

    let storage = if args.persist {
        Storage::open(&args.data_dir)
            .with_context(|| format!("failed to open storage at {}", args.data_dir.display()))?
    } else {
        info!("Using a temporary database, pass --persist to keep the chain");
        Storage::temporary().context("failed to create temporary storage")?
    };

    if !config.capabilities.admin {
        warn!("Admin operations are disabled");
    }

    let blockchain = Blockchain::from_storage(Arc::new(storage), config)?;
    blockchain.mine_genesis_block()?;
    Ok(blockchain)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_info,
        api::handlers::submit_transaction,
        api::handlers::get_pending_transactions,
        api::handlers::get_transaction,
        api::handlers::get_transaction_projection,
        api::handlers::delete_transaction,
        api::handlers::post_chunk,
        api::handlers::get_chunk,
        api::handlers::get_block_by_hash,
        api::handlers::get_block_by_height,
        api::handlers::mine,
        api::handlers::mine_with_fails,
        api::handlers::get_wallet_balance,
        api::handlers::get_wallet_last_tx,
        api::handlers::get_wallet,
        api::handlers::get_all_wallets,
        api::handlers::validate_chain,
        api::handlers::create_wallet,
        api::handlers::set_wallet_balance,
        api::handlers::mint,
        api::handlers::reset
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Wallet,
            blockchain::NetworkStatus,
            blockchain::crypto::Address,
            blockchain::transaction::TransactionStatus,
            blockchain::transaction::TransactionStatusView,
            blockchain::transaction::TransactionOffset,
            api::schema::TagDto,
            api::schema::TransactionRequest,
            api::schema::SubmitResponse,
            api::schema::TransactionView,
            api::schema::ChunkRequest,
            api::schema::ChunkView,
            api::schema::WalletRequest,
            api::schema::BalanceUpdate,
            api::schema::MineResponse
        )
    ),
    tags(
        (name = "weave", description = "Ledger emulator endpoints")
    ),
    info(
        title = "Weave Emulator API",
        version = "0.1.0",
        description = "A single-node Arweave-like ledger emulator",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    let blockchain = web::Data::new(initialize_blockchain(&args)?);

    info!("Starting HTTP server at http://{}:{}", args.host, args.port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(blockchain.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi)
            )
    })
    .bind((args.host.as_str(), args.port))?
    .run()
    .await?;

    Ok(())
}
