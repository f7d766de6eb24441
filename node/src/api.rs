//! HTTP façade for a MERIDIAN node
//!
//! Every response wraps its payload as `{success, data?, error?,
//! requestId}`; amounts travel as decimal strings and hashes as
//! `0x`-prefixed lower-case hex. Internal error detail never crosses this
//! boundary: clients see the error kind's message only.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use meridian_consensus::{ValidateRequest, ValidationResponse};
use meridian_core::{Address, Amount, Hash, MeridianError, PublicKey, Signature, Timestamp};
use meridian_ledger::ChainSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::runtime::NodeRuntime;

/// API state containing the node runtime
pub type ApiState = Arc<NodeRuntime>;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Client-facing status code for each error kind
fn status_for(err: &MeridianError) -> StatusCode {
    match err {
        MeridianError::InvalidSignature => StatusCode::UNAUTHORIZED,
        MeridianError::MalformedRequest(_)
        | MeridianError::InvalidAddress(_)
        | MeridianError::InvalidPublicKey
        | MeridianError::AddressMismatch
        | MeridianError::BadHash
        | MeridianError::DuplicateTransaction(_)
        | MeridianError::SequenceMismatch { .. }
        | MeridianError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
        MeridianError::NotFound(_) => StatusCode::NOT_FOUND,
        MeridianError::CidMismatch => StatusCode::FORBIDDEN,
        MeridianError::RoundInProgress | MeridianError::AlreadyInitialised => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure<T: Serialize>(err: MeridianError) -> (StatusCode, Json<ApiResponse<T>>) {
    (status_for(&err), Json(ApiResponse::err(err)))
}

/// Transaction submission body
#[derive(Deserialize)]
pub struct SubmitTxRequest {
    pub from: String,
    pub to: String,
    pub amount: String,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub signature: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[derive(Serialize)]
pub struct SubmitTxResponse {
    #[serde(rename = "txHash")]
    pub tx_hash: Hash,
    #[serde(rename = "estimatedConfirmationMs")]
    pub estimated_confirmation_ms: u64,
}

#[derive(Deserialize)]
pub struct FaucetRequest {
    pub to: String,
    pub amount: String,
}

#[derive(Deserialize)]
pub struct InitGenesisRequest {
    #[serde(rename = "genesisTime")]
    pub genesis_time: Option<u64>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
pub struct RestoreRequest {
    pub state: ChainSnapshot,
    pub cid: String,
    #[serde(default)]
    pub force: bool,
}

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/tx/submit", post(submit_transaction))
        .route("/tx/:hash", get(get_transaction))
        .route("/account/:address", get(get_account))
        .route("/account/:address/txs", get(get_account_transactions))
        .route("/block/latest", get(get_latest_block))
        .route("/block/:height", get(get_block))
        .route("/faucet", post(faucet))
        .route("/admin/init-genesis", post(init_genesis))
        .route("/admin/restore", post(restore))
        .route("/validate", post(validate))
        .with_state(state)
        .layer(cors)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn status(State(runtime): State<ApiState>) -> impl IntoResponse {
    Json(ApiResponse::ok(runtime.coordinator().query_state().await))
}

async fn submit_transaction(
    State(runtime): State<ApiState>,
    Json(req): Json<SubmitTxRequest>,
) -> impl IntoResponse {
    let parsed = (|| -> Result<_, MeridianError> {
        let from = Address::from_hex(&req.from)?;
        let to = Address::from_hex(&req.to)?;
        let amount: Amount = req.amount.parse()?;
        let public_key = PublicKey::from_hex(&req.public_key)?;
        let signature = Signature::from_hex(&req.signature)?;
        Ok((from, to, amount, public_key, signature))
    })();

    let (from, to, amount, public_key, signature) = match parsed {
        Ok(parts) => parts,
        Err(e) => return failure::<SubmitTxResponse>(e),
    };

    match runtime
        .submit_transaction(from, to, amount, req.sequence, req.timestamp_ms, public_key, signature)
        .await
    {
        Ok(tx_hash) => (
            StatusCode::OK,
            Json(ApiResponse::ok(SubmitTxResponse {
                tx_hash,
                estimated_confirmation_ms: runtime.estimated_confirmation_ms(),
            })),
        ),
        Err(e) => failure(e),
    }
}

async fn get_transaction(
    State(runtime): State<ApiState>,
    Path(hash): Path<String>,
) -> impl IntoResponse {
    let hash = match Hash::from_hex(&hash) {
        Ok(h) => h,
        Err(e) => return failure(e),
    };

    match runtime.coordinator().query_transaction(hash).await {
        Some(record) => (StatusCode::OK, Json(ApiResponse::ok(record))),
        None => failure(MeridianError::NotFound(format!("transaction {}", hash))),
    }
}

async fn get_account(
    State(runtime): State<ApiState>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    match Address::from_hex(&address) {
        Ok(addr) => (
            StatusCode::OK,
            Json(ApiResponse::ok(runtime.coordinator().query_account(addr).await)),
        ),
        Err(e) => failure(e),
    }
}

async fn get_account_transactions(
    State(runtime): State<ApiState>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    match Address::from_hex(&address) {
        Ok(addr) => (
            StatusCode::OK,
            Json(ApiResponse::ok(
                runtime.coordinator().transactions_by_address(addr).await,
            )),
        ),
        Err(e) => failure(e),
    }
}

async fn get_latest_block(State(runtime): State<ApiState>) -> impl IntoResponse {
    match runtime.coordinator().query_latest_block().await {
        Some(summary) => (StatusCode::OK, Json(ApiResponse::ok(summary))),
        None => failure(MeridianError::NotFound("chain not initialised".to_string())),
    }
}

async fn get_block(
    State(runtime): State<ApiState>,
    Path(height): Path<String>,
) -> impl IntoResponse {
    let height: u64 = match height.parse() {
        Ok(h) => h,
        Err(_) => {
            return failure(MeridianError::MalformedRequest(format!(
                "invalid height: {}",
                height
            )))
        }
    };

    match runtime.coordinator().query_block(height).await {
        Some(block) => (StatusCode::OK, Json(ApiResponse::ok(block))),
        None => failure(MeridianError::NotFound(format!("block {}", height))),
    }
}

async fn faucet(
    State(runtime): State<ApiState>,
    Json(req): Json<FaucetRequest>,
) -> impl IntoResponse {
    if !runtime.faucet_enabled() {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiResponse::err("faucet is not available on this network")),
        );
    }

    let parsed = (|| -> Result<_, MeridianError> {
        let to = Address::from_hex(&req.to)?;
        let amount: Amount = req.amount.parse()?;
        Ok((to, amount))
    })();
    let (to, amount) = match parsed {
        Ok(parts) => parts,
        Err(e) => return failure::<SubmitTxResponse>(e),
    };

    match runtime.faucet_drip(to, amount).await {
        Ok(tx_hash) => (
            StatusCode::OK,
            Json(ApiResponse::ok(SubmitTxResponse {
                tx_hash,
                estimated_confirmation_ms: runtime.estimated_confirmation_ms(),
            })),
        ),
        Err(e) => failure(e),
    }
}

async fn init_genesis(
    State(runtime): State<ApiState>,
    Json(req): Json<InitGenesisRequest>,
) -> impl IntoResponse {
    match runtime.init_genesis(req.genesis_time, req.force).await {
        Ok(hash) => {
            info!(hash = %hash, "genesis initialised via admin endpoint");
            (
                StatusCode::OK,
                Json(ApiResponse::ok(serde_json::json!({ "genesisHash": hash }))),
            )
        }
        Err(e) => failure(e),
    }
}

async fn restore(
    State(runtime): State<ApiState>,
    Json(req): Json<RestoreRequest>,
) -> impl IntoResponse {
    match runtime.restore(req.state, &req.cid, req.force).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::ok(serde_json::json!({ "restored": true }))),
        ),
        Err(e) => failure(e),
    }
}

/// Validator-role endpoint consumed by a remote proposer. Internal wire
/// format: the bare validation response, HTTP 200 even for rejections
async fn validate(
    State(runtime): State<ApiState>,
    Json(req): Json<ValidateRequest>,
) -> impl IntoResponse {
    let response = match runtime.validate(&req.block, &req.proposer_id).await {
        Some(response) => response,
        None => ValidationResponse {
            valid: false,
            error: Some("this node does not host a validator".to_string()),
            validator_id: String::new(),
            public_key: None,
            signature: None,
            timestamp_ms: Timestamp::now().as_millis(),
        },
    };
    Json(response)
}

/// Start the API server
pub async fn start_api_server(runtime: Arc<NodeRuntime>, listen_addr: &str) -> anyhow::Result<()> {
    let router = create_router(runtime);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("API server listening on {}", listen_addr);

    axum::serve(listener, router).await?;

    Ok(())
}
