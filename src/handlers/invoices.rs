use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    app_state::AppState,
    currency::{CurrencyError, SAT},
    mapped_invoice::{GetInfoError, MappedInvoiceError},
    rate_limit::RlTarget,
    wallet::WalletError,
};

/// Every caller of the public check endpoint shares one rate limiter scope
const PUBLIC_CALLER: &str = "public";

#[derive(Debug, Deserialize)]
pub struct InvoiceParams {
    currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub public_id: String,
    pub pay_req: String,
    pub amount_sat: i64,
    pub amount: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub expires: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub public_id: String,
    pub paid: bool,
}

#[derive(Debug, Serialize)]
pub struct CurrenciesResponse {
    pub currencies: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub status: String,
    pub reason: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

/// GET /invoice/{public_id}?currency=USD
/// Payable invoice behind a public id, with its amount shown in `currency`
pub async fn get_invoice(
    Path(public_id): Path<String>,
    Query(params): Query<InvoiceParams>,
    State(state): State<AppState>,
) -> ApiResult<InvoiceResponse> {
    let currency = match params.currency.as_deref() {
        Some(id) => state.currencies.get_by_id(id).await.map_err(currency_error)?,
        None => SAT,
    };

    let invoice = state
        .mapped_invoice(&public_id)
        .check_invoice()
        .await
        .map_err(mapped_error)?;

    Ok(Json(InvoiceResponse {
        amount_sat: invoice.amount.sat(),
        amount: state.bias().present(invoice.amount, &currency),
        currency: currency.id.to_string(),
        pay_req: invoice.pay_req.as_str().to_string(),
        description: invoice.description,
        expires: invoice.expires,
        public_id,
    }))
}

/// POST /invoice/{public_id}/check
/// Asks the receiving wallet once whether the invoice was paid
pub async fn check_invoice(
    Path(public_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<CheckResponse> {
    state
        .limiter
        .consume(PUBLIC_CALLER, RlTarget::Active(&public_id), 1)
        .await
        .map_err(wallet_error)?;

    let paid = state
        .mapped_invoice(&public_id)
        .check_if_paid()
        .await
        .map_err(mapped_error)?;
    debug!("Invoice {} checked, paid={}", public_id, paid);

    Ok(Json(CheckResponse { public_id, paid }))
}

/// GET /currencies
pub async fn list_currencies(State(state): State<AppState>) -> ApiResult<CurrenciesResponse> {
    let currencies = state.currencies.currencies().await.map_err(currency_error)?;
    Ok(Json(CurrenciesResponse { currencies }))
}

fn error_response(status: StatusCode, reason: &str) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            status: "ERROR".to_string(),
            reason: reason.to_string(),
        }),
    )
}

fn wallet_error(e: WalletError) -> (StatusCode, Json<ApiError>) {
    let status = match e {
        WalletError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        WalletError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        WalletError::Unknown { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    };
    error_response(status, &e.to_string())
}

fn currency_error(e: CurrencyError) -> (StatusCode, Json<ApiError>) {
    match e {
        CurrencyError::CurrencyNotFound(_) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        CurrencyError::Source(_) => {
            warn!("Exchange rates unavailable: {}", e);
            error_response(StatusCode::BAD_GATEWAY, "Exchange rates unavailable")
        }
    }
}

fn mapped_error(e: MappedInvoiceError) -> (StatusCode, Json<ApiError>) {
    match &e {
        MappedInvoiceError::GetInfoFailed { kind, .. } => {
            let status = match kind {
                GetInfoError::NotFound => StatusCode::NOT_FOUND,
                GetInfoError::Unpayable => StatusCode::GONE,
                GetInfoError::NoBoundDestWallet | GetInfoError::AlreadyChecked => {
                    StatusCode::CONFLICT
                }
            };
            error_response(status, &kind.to_string())
        }
        MappedInvoiceError::Storage { message } => {
            warn!("Database error: {}", message);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
        MappedInvoiceError::CreateFailed { source }
        | MappedInvoiceError::PaymentFailed { source, .. }
        | MappedInvoiceError::CheckFailed { source, .. } => {
            warn!("{}", e);
            wallet_error(source.clone())
        }
    }
}
