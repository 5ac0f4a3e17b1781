//! HTTP surface over the settlement core.
//!
//! Authentication lives in front of this router; the acting identity is passed
//! explicitly in request bodies as an [`Actor`].

use crate::application::engine::{Initiated, SettlementEngine};
use crate::application::side_effects::{ScoreCalculator, SideEffectDispatcher};
use crate::application::state_machine::{NewTransaction, TransactionService};
use crate::application::swap::{SwapCoordinator, SwapPair, SwapRequest};
use crate::application::webhook::{WebhookOutcome, WebhookReconciler};
use crate::config::SettlementConfig;
use crate::domain::event::GatewayProvider;
use crate::domain::fees::{BatchQuote, FeeTaxCalculator, LineItem};
use crate::domain::money::{Currency, Money};
use crate::domain::ports::{
    EcoImpactServiceHandle, ItemCatalogHandle, NgoFundsHandle, ScoringServiceHandle,
    TransactionRepositoryHandle, UserDirectoryHandle,
};
use crate::domain::transaction::{Actor, Transaction, TransactionStatus};
use crate::error::{Result, SettlementError};
use crate::gateway::GatewayRegistry;
use crate::gateway::emi::{EmiCalculator, EmiQuote};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub swaps: Arc<SwapCoordinator>,
    pub webhooks: Arc<WebhookReconciler>,
    pub fees: Arc<FeeTaxCalculator>,
    pub emi: Arc<EmiCalculator>,
}

/// Adapters for every port the core talks through.
pub struct Collaborators {
    pub repository: TransactionRepositoryHandle,
    pub items: ItemCatalogHandle,
    pub ngo_funds: NgoFundsHandle,
    pub scoring: ScoringServiceHandle,
    pub eco_impact: EcoImpactServiceHandle,
    pub users: UserDirectoryHandle,
}

impl AppState {
    /// Wires the application services from configuration and adapters.
    pub fn new(
        config: &SettlementConfig,
        gateways: GatewayRegistry,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let currency: Currency = config.server.default_currency.parse()?;
        let fees = FeeTaxCalculator::from_config(config);
        let emi = EmiCalculator::new(config.emi.clone());

        let dispatcher = Arc::new(SideEffectDispatcher::new(
            ScoreCalculator::new(config.scoring.clone()),
            collaborators.scoring,
            collaborators.eco_impact,
            collaborators.users,
            collaborators.items.clone(),
            collaborators.repository.clone(),
        ));
        let transactions = Arc::new(TransactionService::new(
            collaborators.repository,
            collaborators.items,
            collaborators.ngo_funds,
            fees.clone(),
            emi.clone(),
            dispatcher,
            currency,
            config.retry.max_stale_retries,
        ));

        Ok(Self {
            engine: Arc::new(SettlementEngine::new(
                transactions.clone(),
                gateways.clone(),
                currency,
            )),
            swaps: Arc::new(SwapCoordinator::new(transactions.clone())),
            webhooks: Arc::new(WebhookReconciler::new(gateways, transactions)),
            fees: Arc::new(fees),
            emi: Arc::new(emi),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

pub struct ApiError(SettlementError);

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: TransactionStatus,
    pub actor: Actor,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: String,
    pub actor: Actor,
}

#[derive(Deserialize)]
pub struct RefundRequest {
    pub amount: Money,
    #[serde(default)]
    pub reason: String,
    pub actor: Actor,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub outcome: TransactionStatus,
    pub resolver: Actor,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipRequest {
    pub tracking_number: String,
    #[serde(default)]
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub actor: Actor,
}

#[derive(Deserialize)]
pub struct ActorRequest {
    pub actor: Actor,
}

#[derive(Deserialize)]
pub struct EmiQuery {
    pub amount: Money,
    #[serde(default)]
    pub months: Option<u32>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum EmiResponse {
    Plan(EmiQuote),
    Options { eligible: bool, options: Vec<EmiQuote> },
}

#[derive(Deserialize)]
pub struct TaxQuoteRequest {
    pub items: Vec<LineItem>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn initiate(
    State(state): State<AppState>,
    Json(request): Json<NewTransaction>,
) -> ApiResult<(StatusCode, Json<Initiated>)> {
    let initiated = state.engine.initiate(request).await?;
    Ok((StatusCode::CREATED, Json(initiated)))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Transaction>> {
    Ok(Json(state.engine.transactions().get(id).await?))
}

async fn list_for_party(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<Transaction>>> {
    Ok(Json(state.engine.transactions().list_for_party(&user_id).await?))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> ApiResult<Json<Transaction>> {
    let tx = state
        .engine
        .transactions()
        .transition(id, request.status, request.actor, request.notes)
        .await?;
    Ok(Json(tx))
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Json<Transaction>> {
    let tx = state
        .engine
        .transactions()
        .cancel(id, &request.reason, request.actor)
        .await?;
    Ok(Json(tx))
}

async fn refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> ApiResult<Json<Transaction>> {
    let tx = state
        .engine
        .transactions()
        .refund(id, request.amount, &request.reason, request.actor)
        .await?;
    Ok(Json(tx))
}

async fn dispute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Json<Transaction>> {
    let tx = state
        .engine
        .transactions()
        .dispute(id, &request.reason, request.actor)
        .await?;
    Ok(Json(tx))
}

async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<Transaction>> {
    let tx = state
        .engine
        .transactions()
        .resolve_dispute(id, request.outcome, request.resolver, request.notes)
        .await?;
    Ok(Json(tx))
}

async fn ship(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ShipRequest>,
) -> ApiResult<Json<Transaction>> {
    let tx = state
        .engine
        .transactions()
        .ship(
            id,
            &request.tracking_number,
            request.estimated_delivery,
            request.actor,
        )
        .await?;
    Ok(Json(tx))
}

async fn deliver(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ActorRequest>,
) -> ApiResult<Json<Transaction>> {
    let tx = state
        .engine
        .transactions()
        .mark_delivered(id, request.actor)
        .await?;
    Ok(Json(tx))
}

async fn reconcile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookOutcome>> {
    Ok(Json(state.webhooks.reconcile(id).await?))
}

async fn initiate_swap(
    State(state): State<AppState>,
    Json(request): Json<SwapRequest>,
) -> ApiResult<(StatusCode, Json<SwapPair>)> {
    let pair = state.swaps.initiate_swap(request).await?;
    Ok((StatusCode::CREATED, Json(pair)))
}

async fn confirm_swap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ActorRequest>,
) -> ApiResult<Json<SwapPair>> {
    Ok(Json(state.swaps.confirm_swap(id, request.actor).await?))
}

async fn cancel_swap(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> ApiResult<Json<SwapPair>> {
    Ok(Json(
        state
            .swaps
            .cancel_swap(id, &request.reason, request.actor)
            .await?,
    ))
}

/// Gateways retry anything but a 2xx, so only a forged or unreadable payload
/// is refused. Logical no-ops are acknowledged.
async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<WebhookOutcome>)> {
    let provider: GatewayProvider = provider.parse()?;
    let gateway = state.engine.gateways().get(provider)?;
    let signature = headers
        .get(gateway.signature_header())
        .and_then(|value| value.to_str().ok());

    match state.webhooks.handle_event(provider, &body, signature).await {
        Ok(outcome) => Ok((StatusCode::OK, Json(outcome))),
        Err(
            e @ (SettlementError::NotFound(_)
            | SettlementError::InvalidTransition { .. }
            | SettlementError::Conflict(_)),
        ) => {
            tracing::warn!(provider = %provider, error = %e, "Webhook acknowledged without effect");
            Ok((StatusCode::OK, Json(WebhookOutcome::Ignored(e.to_string()))))
        }
        Err(e) => Err(e.into()),
    }
}

async fn emi_quote(
    State(state): State<AppState>,
    Query(query): Query<EmiQuery>,
) -> ApiResult<Json<EmiResponse>> {
    let response = match query.months {
        Some(months) => EmiResponse::Plan(state.emi.quote(query.amount, months)?),
        None => EmiResponse::Options {
            eligible: state.emi.is_eligible(query.amount),
            options: state.emi.options(query.amount),
        },
    };
    Ok(Json(response))
}

async fn tax_quote(
    State(state): State<AppState>,
    Json(request): Json<TaxQuoteRequest>,
) -> ApiResult<Json<BatchQuote>> {
    if request.items.is_empty() {
        return Err(SettlementError::Validation("items must not be empty".to_string()).into());
    }
    Ok(Json(state.fees.quote_batch(&request.items)?))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/transactions/initiate", post(initiate))
        .route("/transactions/{id}", get(get_transaction))
        .route("/transactions/{id}/status", post(update_status))
        .route("/transactions/{id}/cancel", post(cancel))
        .route("/transactions/{id}/refund", post(refund))
        .route("/transactions/{id}/dispute", post(dispute))
        .route("/transactions/{id}/resolve", post(resolve))
        .route("/transactions/{id}/ship", post(ship))
        .route("/transactions/{id}/deliver", post(deliver))
        .route("/transactions/{id}/reconcile", post(reconcile))
        .route("/parties/{user_id}/transactions", get(list_for_party))
        .route("/swaps", post(initiate_swap))
        .route("/swaps/{id}/confirm", post(confirm_swap))
        .route("/swaps/{id}/cancel", post(cancel_swap))
        .route("/webhooks/{provider}", post(webhook))
        .route("/emi/quote", get(emi_quote))
        .route("/tax/quote", post(tax_quote))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_carries_taxonomy_code() {
        let response = ApiError(SettlementError::SwapFailed("x".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = ApiError(SettlementError::InvalidSignature).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_actor_request_shape() {
        let request: ActorRequest =
            serde_json::from_str(r#"{"actor": {"role": "operator", "id": "ops-1"}}"#).unwrap();
        assert_eq!(request.actor, Actor::Operator("ops-1".into()));
    }

    #[test]
    fn test_system_actor_cannot_be_claimed() {
        assert!(serde_json::from_str::<ActorRequest>(r#"{"actor": {"role": "system"}}"#).is_err());
        assert!(
            serde_json::from_str::<StatusRequest>(
                r#"{"status": "cancelled", "actor": {"role": "system", "id": null}}"#
            )
            .is_err()
        );
        assert_eq!(
            serde_json::to_value(Actor::System).unwrap(),
            serde_json::json!({"role": "system"})
        );
    }
}
