//! donation-rails
//!
//! Axum-based HTTP service driving an in-process donation network: a source
//! domain holding the sender, the local transport, and a destination domain
//! holding the receiver, treasury and badge registry. Relaying is explicit so
//! callers can reorder, redeliver or manually re-execute messages.
//!
//! Principals (donors, the receiver owner) are simulated: requests name them
//! in the body and the rail acts on their behalf. Set `DONATION_ADMIN_TOKEN`
//! to require `Authorization: Bearer <token>` on administrative routes.

use std::env;
use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use donation_gmp::{
    chains::{self, NATIVE_FEE_TOKEN},
    transport::TransportStats,
    Address, Amount, Badge, Delivery, DomainSelector, DonationError, DonationNetwork, GuardConfig,
    MessageId, MessageStatus, NetworkConfig, SettlementRecord, Side, StrandedCustody, TokenAmount,
    RAIL_ID_DONATION_GMP,
};

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT VARIABLES
// ═══════════════════════════════════════════════════════════════════════════════

const SOURCE_CHAIN_ENV: &str = "DONATION_SOURCE_CHAIN";
const DEST_CHAIN_ENV: &str = "DONATION_DEST_CHAIN";
const TREASURY_ENV: &str = "DONATION_TREASURY";
const FEE_MARGIN_ENV: &str = "DONATION_FEE_MARGIN_PCT";
const BADGE_BASE_URI_ENV: &str = "DONATION_BADGE_BASE_URI";
const ADMIN_TOKEN_ENV: &str = "DONATION_ADMIN_TOKEN";

/// Errors raised while assembling the rail's state
#[derive(Debug, Error)]
pub enum RailError {
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error(transparent)]
    Donation(#[from] DonationError),
}

/// Network configuration with environment overrides applied.
pub fn config_from_env() -> Result<NetworkConfig, RailError> {
    let mut config = NetworkConfig::default();

    if let Ok(chain) = env::var(SOURCE_CHAIN_ENV) {
        config.source_chain = chain;
    }
    if let Ok(chain) = env::var(DEST_CHAIN_ENV) {
        config.destination_chain = chain;
    }
    if let Ok(value) = env::var(TREASURY_ENV) {
        config.treasury = value.parse().map_err(|_| RailError::InvalidEnv {
            var: TREASURY_ENV,
            value,
        })?;
    }
    if let Ok(value) = env::var(FEE_MARGIN_ENV) {
        let fee_margin_pct = value.parse().map_err(|_| RailError::InvalidEnv {
            var: FEE_MARGIN_ENV,
            value,
        })?;
        config.guard = GuardConfig { fee_margin_pct };
    }
    if let Ok(uri) = env::var(BADGE_BASE_URI_ENV) {
        config.badge_base_uri = uri;
    }

    Ok(config)
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Both domains and the transport between them. One writer at a time.
    pub network: Arc<RwLock<DonationNetwork>>,
    /// Bearer token for administrative routes; open when unset
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(config: NetworkConfig) -> Result<Self, RailError> {
        Ok(Self {
            network: Arc::new(RwLock::new(DonationNetwork::new(config)?)),
            admin_token: None,
        })
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    pub fn from_env() -> Result<Self, RailError> {
        let state = Self::new(config_from_env()?)?;
        Ok(match env::var(ADMIN_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => state.with_admin_token(token),
            _ => state,
        })
    }

    fn require_admin(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.admin_token else {
            return Ok(());
        };
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if presented != Some(expected.as_str()) {
            tracing::warn!("administrative request without a valid bearer token");
            return Err(ApiError {
                status: StatusCode::UNAUTHORIZED,
                message: "missing or invalid admin token".into(),
                code: "ADMIN_TOKEN_REQUIRED".into(),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Build the router from environment configuration
pub fn app_router() -> Result<Router, RailError> {
    Ok(app_router_with_state(AppState::from_env()?))
}

pub fn app_router_with_state(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health))
        .route("/rails/donation/info", get(info))
        .route("/rails/donation/chains", get(list_chains))
        // Source domain
        .route("/rails/donation/faucet", post(faucet))
        .route("/rails/donation/approve", post(approve))
        .route("/rails/donation/quote", post(quote))
        .route("/rails/donation/send", post(send_donation))
        .route("/rails/donation/refund", post(refund))
        // Transport
        .route("/rails/donation/relay", post(relay))
        .route("/rails/donation/redeliver/:message_id", post(redeliver))
        .route("/rails/donation/message/:message_id", get(get_message))
        // Destination domain
        .route("/rails/donation/treasury", get(get_treasury).post(set_treasury))
        .route("/rails/donation/badge/:badge_id", get(get_badge))
        .route("/rails/donation/settlement/:message_id", get(get_settlement))
        // Queries
        .route("/rails/donation/balance/:domain/:token/:holder", get(get_balance))
        .route("/rails/donation/stats", get(get_stats))
        .layer(cors)
        .with_state(state)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - HEALTH & INFO
// ═══════════════════════════════════════════════════════════════════════════════

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "rail_id": RAIL_ID_DONATION_GMP
    }))
}

async fn info(State(state): State<AppState>) -> impl IntoResponse {
    let network = state.network.read().await;
    let config = network.config();

    Json(serde_json::json!({
        "rail_id": RAIL_ID_DONATION_GMP,
        "source_chain": network.source().chain,
        "destination_chain": network.destination().chain,
        "source_token": config.source_token,
        "destination_token": config.destination_token,
        "native_fee_token": NATIVE_FEE_TOKEN,
        "sender": network.source().sender.address(),
        "receiver": network.destination().receiver.address(),
        "receiver_owner": network.destination().receiver.owner(),
        "treasury": network.treasury(),
        "fee_margin_pct": network.guard().config().fee_margin_pct,
        "admin_gated": state.admin_token.is_some(),
        "badge": {
            "address": network.badges().address(),
            "name": network.badges().name(),
            "symbol": network.badges().symbol(),
        },
        "features": {
            "guarded_donations": true,
            "idempotent_delivery": true,
            "manual_execution": true,
            "stranded_refunds": true
        }
    }))
}

async fn list_chains() -> impl IntoResponse {
    Json(serde_json::json!({
        "chains": chains::known_chains()
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - SOURCE DOMAIN
// ═══════════════════════════════════════════════════════════════════════════════

fn default_side() -> Side {
    Side::Source
}

#[derive(Debug, Deserialize)]
pub struct FaucetRequest {
    #[serde(default = "default_side")]
    pub side: Side,
    pub holder: Address,
    /// Defaults to the side's donation token
    pub token: Option<Address>,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub side: Side,
    pub token: Address,
    pub holder: Address,
    pub balance: Amount,
}

async fn faucet(
    State(state): State<AppState>,
    Json(req): Json<FaucetRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let mut network = state.network.write().await;
    let token = req.token.unwrap_or(match req.side {
        Side::Source => network.config().source_token,
        Side::Destination => network.config().destination_token,
    });
    network.faucet(req.side, token, req.holder, req.amount)?;

    Ok(Json(BalanceResponse {
        side: req.side,
        token,
        holder: req.holder,
        balance: network.balance(req.side, token, req.holder),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub donor: Address,
    pub token: Option<Address>,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveResponse {
    pub owner: Address,
    pub spender: Address,
    pub token: Address,
    pub allowance: Amount,
}

async fn approve(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> Json<ApproveResponse> {
    let mut network = state.network.write().await;
    let token = req.token.unwrap_or(network.config().source_token);
    network.approve(req.donor, token, req.amount);

    Json(ApproveResponse {
        owner: req.donor,
        spender: network.source().sender.address(),
        token,
        allowance: req.amount,
    })
}

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub donor: Address,
    pub token: Option<Address>,
    pub amount: Amount,
    pub campaign_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuoteResponse {
    pub fee: Amount,
    pub required_with_margin: Amount,
    pub fee_margin_pct: u32,
}

async fn quote(
    State(state): State<AppState>,
    Json(req): Json<QuoteRequest>,
) -> Result<Json<QuoteResponse>, ApiError> {
    let network = state.network.read().await;
    let token = req.token.unwrap_or(network.config().source_token);
    let fee = network.quote(req.donor, token, req.amount, &req.campaign_id)?;

    Ok(Json(QuoteResponse {
        fee,
        required_with_margin: network.guard().required_with_margin(fee)?,
        fee_margin_pct: network.guard().config().fee_margin_pct,
    }))
}

fn default_guarded() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub donor: Address,
    pub token: Option<Address>,
    pub amount: Amount,
    pub campaign_id: String,
    /// Defaults to the current quote
    pub fee_payment: Option<Amount>,
    /// Run the fee & balance guard before any custody transfer
    #[serde(default = "default_guarded")]
    pub guarded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    pub message_id: MessageId,
    pub fee_payment: Amount,
}

async fn send_donation(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let mut network = state.network.write().await;
    let token = req.token.unwrap_or(network.config().source_token);
    let fee_payment = match req.fee_payment {
        Some(fee) => fee,
        None => network.quote(req.donor, token, req.amount, &req.campaign_id)?,
    };

    let message_id = if req.guarded {
        network.donate(req.donor, token, req.amount, &req.campaign_id, fee_payment)?
    } else {
        network.send(req.donor, token, req.amount, &req.campaign_id, fee_payment)?
    };

    Ok(Json(SendResponse {
        success: true,
        message_id,
        fee_payment,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub donor: Address,
    pub token: Option<Address>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefundResponse {
    pub donor: Address,
    pub token: Address,
    pub refunded: Amount,
}

async fn refund(
    State(state): State<AppState>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, ApiError> {
    let mut network = state.network.write().await;
    let token = req.token.unwrap_or(network.config().source_token);
    let refunded = network.refund(req.donor, token)?;

    Ok(Json(RefundResponse {
        donor: req.donor,
        token,
        refunded,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct RelayRequest {
    /// Relay one message; relays every pending message when absent
    pub message_id: Option<MessageId>,
    /// Re-execute a failed message instead of delivering a pending one
    #[serde(default)]
    pub manual: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub message_id: MessageId,
    pub success: bool,
    pub duplicate: bool,
    pub settlement: Option<SettlementRecord>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl DeliveryResult {
    fn from_result(message_id: MessageId, result: Result<Delivery, DonationError>) -> Self {
        match result {
            Ok(delivery) => Self {
                message_id,
                success: true,
                duplicate: delivery.is_duplicate(),
                settlement: Some(delivery.record().clone()),
                error: None,
                error_code: None,
            },
            Err(err) => Self {
                message_id,
                success: false,
                duplicate: false,
                settlement: None,
                error: Some(err.to_string()),
                error_code: Some(err.error_code().to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayResponse {
    pub count: usize,
    pub results: Vec<DeliveryResult>,
}

async fn relay(
    State(state): State<AppState>,
    Json(req): Json<RelayRequest>,
) -> Result<Json<RelayResponse>, ApiError> {
    let mut network = state.network.write().await;

    let results: Vec<DeliveryResult> = match req.message_id {
        Some(id) if req.manual => {
            vec![DeliveryResult::from_result(id, Ok(network.manually_execute(&id)?))]
        }
        Some(id) => vec![DeliveryResult::from_result(id, Ok(network.relay(&id)?))],
        None => network
            .relay_all()
            .into_iter()
            .map(|(id, result)| DeliveryResult::from_result(id, result))
            .collect(),
    };

    Ok(Json(RelayResponse {
        count: results.len(),
        results,
    }))
}

async fn redeliver(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
) -> Result<Json<DeliveryResult>, ApiError> {
    let mut network = state.network.write().await;
    let delivery = network.redeliver(&message_id)?;
    Ok(Json(DeliveryResult::from_result(message_id, Ok(delivery))))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message_id: MessageId,
    pub status: MessageStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub source_domain: DomainSelector,
    pub destination_domain: DomainSelector,
    pub receiver: Address,
    /// Hex-encoded envelope bytes
    pub payload: String,
    pub tokens: Vec<TokenAmount>,
}

async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
) -> Result<Json<MessageResponse>, ApiError> {
    let network = state.network.read().await;
    let relayed = network
        .transport()
        .message(&message_id)
        .ok_or(DonationError::MessageNotFound(message_id))?;
    let message = &relayed.message;

    Ok(Json(MessageResponse {
        message_id,
        status: relayed.status,
        attempts: relayed.attempts,
        last_error: relayed.last_error.clone(),
        source_domain: message.source_domain,
        destination_domain: message.destination_domain,
        receiver: message.receiver,
        payload: format!("0x{}", hex::encode(&message.payload)),
        tokens: message.tokens.clone(),
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - DESTINATION DOMAIN
// ═══════════════════════════════════════════════════════════════════════════════

async fn get_treasury(State(state): State<AppState>) -> impl IntoResponse {
    let network = state.network.read().await;
    Json(serde_json::json!({
        "treasury": network.treasury()
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetTreasuryRequest {
    pub caller: Address,
    pub treasury: Address,
}

async fn set_treasury(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SetTreasuryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.require_admin(&headers)?;
    let mut network = state.network.write().await;
    let previous = network.treasury();
    network.set_treasury(req.caller, req.treasury)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "previous": previous,
        "treasury": network.treasury()
    })))
}

async fn get_badge(
    State(state): State<AppState>,
    Path(badge_id): Path<u64>,
) -> Result<Json<Badge>, ApiError> {
    let network = state.network.read().await;
    let badge = network
        .badges()
        .badge(badge_id)
        .cloned()
        .ok_or(DonationError::BadgeNotFound(badge_id))?;
    Ok(Json(badge))
}

async fn get_settlement(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
) -> Result<Json<SettlementRecord>, ApiError> {
    let network = state.network.read().await;
    let record = network
        .destination()
        .receiver
        .settlement(&message_id)
        .cloned()
        .ok_or(DonationError::MessageNotFound(message_id))?;
    Ok(Json(record))
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS - QUERIES
// ═══════════════════════════════════════════════════════════════════════════════

async fn get_balance(
    State(state): State<AppState>,
    Path((side, token, holder)): Path<(Side, Address, Address)>,
) -> Json<BalanceResponse> {
    let network = state.network.read().await;
    Json(BalanceResponse {
        side,
        token,
        holder,
        balance: network.balance(side, token, holder),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub transport: TransportStats,
    pub pending: Vec<MessageId>,
    pub failed: Vec<MessageId>,
    pub badges_minted: u64,
    pub settlements: usize,
    pub stranded: Vec<StrandedCustody>,
}

async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let network = state.network.read().await;
    let transport = network.transport();

    Json(StatsResponse {
        transport: transport.stats().clone(),
        pending: transport.pending(),
        failed: transport.failed(),
        badges_minted: network.badges().total_supply(),
        settlements: network.destination().receiver.settlements().len(),
        stranded: network.source().sender.stranded(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR HANDLING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: String,
}

impl From<DonationError> for ApiError {
    fn from(err: DonationError) -> Self {
        Self {
            status: StatusCode::from_u16(err.suggested_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
            code: err.error_code().into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.message,
            "error_code": self.code,
        });
        (self.status, Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

pub mod main_entry {
    use super::*;
    use std::net::SocketAddr;
    use tracing_subscriber::EnvFilter;

    pub async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();

        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3003);

        let router = app_router()?;
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("Donation rail listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;

    fn server() -> TestServer {
        let state = AppState::new(NetworkConfig::default()).unwrap();
        TestServer::new(app_router_with_state(state)).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let server = server();
        let response = server.get("/health").await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_info() {
        let server = server();
        let response = server.get("/rails/donation/info").await;
        response.assert_status_ok();

        let body: serde_json::Value = response.json();
        assert_eq!(body["rail_id"], RAIL_ID_DONATION_GMP);
        assert_eq!(body["source_chain"]["chain_name"], chains::ETHEREUM_SEPOLIA);
        assert_eq!(body["badge"]["symbol"], "DONOR");
    }

    #[tokio::test]
    async fn test_unknown_badge_is_404() {
        let server = server();
        let response = server.get("/rails/donation/badge/0").await;
        response.assert_status(StatusCode::NOT_FOUND);

        let body: serde_json::Value = response.json();
        assert_eq!(body["error_code"], "BADGE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_zero_treasury_rejected() {
        let server = server();
        let owner = NetworkConfig::default().receiver_owner;
        let response = server
            .post("/rails/donation/treasury")
            .json(&serde_json::json!({
                "caller": owner,
                "treasury": Address::ZERO
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let body: serde_json::Value = response.json();
        assert_eq!(body["error_code"], "INVALID_TREASURY");
    }

    #[test]
    fn test_api_error_from_donation_error() {
        let err = ApiError::from(DonationError::UnauthorizedRouter(Address::ZERO));
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.code, "UNAUTHORIZED_ROUTER");
    }
}
