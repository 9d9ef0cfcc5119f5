//! Flash-sale endpoints.
//!
//! - `POST /seckill`: purchase attempt, `202` once the intent is queued
//! - `POST /seckill/init`: open a sale (admin)
//! - `GET /seckill/:product_id/stock`: ledger remaining (admin)

use super::auth::{AdminToken, BuyerId};
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use flashsale_core::{ProductId, RequestId};
use flashsale_web::AppError;
use serde::{Deserialize, Serialize};

/// Purchase attempt.
#[derive(Debug, Deserialize)]
pub struct SeckillRequest {
    /// Product to buy
    pub product_id: ProductId,
}

/// Accepted purchase attempt. The order itself is created asynchronously.
#[derive(Debug, Serialize, Deserialize)]
pub struct SeckillAccepted {
    /// Product bought
    pub product_id: ProductId,
    /// Product name
    pub product_name: String,
    /// Unit price in minor currency units
    pub price: i64,
    /// Always 1
    pub quantity: u32,
    /// When the intent was queued
    pub created_at: DateTime<Utc>,
    /// Idempotency key of the queued intent
    pub request_id: RequestId,
}

/// Open (or reset) a sale.
#[derive(Debug, Deserialize)]
pub struct InitSaleRequest {
    /// Product to sell
    pub product_id: ProductId,
    /// Units to sell; defaults to the product's stock
    #[serde(default)]
    pub stock: Option<u64>,
}

/// Ledger view of a sale.
#[derive(Debug, Serialize, Deserialize)]
pub struct SaleStock {
    /// Product
    pub product_id: ProductId,
    /// Units left (or seeded, for `init`)
    pub stock: u64,
}

/// Attempt to buy one unit.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/seckill \
///   -H "X-User-Id: 42" \
///   -H "Content-Type: application/json" \
///   -d '{"product_id": 1}'
/// ```
///
/// # Errors
///
/// Rejections map through [`AppError`]'s `SeckillError` conversion.
pub async fn submit(
    State(state): State<AppState>,
    BuyerId(user_id): BuyerId,
    Json(request): Json<SeckillRequest>,
) -> Result<(StatusCode, Json<SeckillAccepted>), AppError> {
    let admitted = state.pipeline.submit(user_id, request.product_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SeckillAccepted {
            product_id: admitted.product.id,
            product_name: admitted.product.name,
            price: admitted.product.price_cents,
            quantity: 1,
            created_at: admitted.intent.enqueued_at,
            request_id: admitted.intent.request_id,
        }),
    ))
}

/// Seed the stock ledger for a product.
///
/// # Errors
///
/// `401`/`403` without a valid admin token, `404` for an unknown product,
/// `503` if the shared store is down.
pub async fn init(
    State(state): State<AppState>,
    _admin: AdminToken,
    Json(request): Json<InitSaleRequest>,
) -> Result<Json<SaleStock>, AppError> {
    let opened = state
        .pipeline
        .open_sale(request.product_id, request.stock)
        .await?;

    Ok(Json(SaleStock {
        product_id: opened.product.id,
        stock: opened.stock,
    }))
}

/// Units left in the ledger.
///
/// # Errors
///
/// `404` if no sale was opened for the product.
pub async fn stock(
    State(state): State<AppState>,
    _admin: AdminToken,
    Path(product_id): Path<i64>,
) -> Result<Json<SaleStock>, AppError> {
    let product_id = ProductId::new(product_id);
    let stock = state.pipeline.remaining(product_id).await?;

    Ok(Json(SaleStock { product_id, stock }))
}
