use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use super::ApiResponse;
use crate::store::PriceStore;
use crate::types::NewObservation;

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 1_000;

/// Create the API router with all endpoints
pub fn create_router(store: PriceStore) -> Router {
    Router::new()
        .route("/db/add-prices/", post(add_prices))
        .route("/prices", get(get_latest_prices))
        .route("/pending", get(get_pending))
        .route("/log", get(get_log))
        .route("/health", get(get_health))
        .with_state(store)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[derive(Debug, Serialize)]
struct Inserted {
    ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    limit: Option<usize>,
}

/// POST /db/add-prices/ - Store a list of observations
async fn add_prices(
    State(store): State<PriceStore>,
    Json(observations): Json<Vec<NewObservation>>,
) -> impl IntoResponse {
    for (index, obs) in observations.iter().enumerate() {
        if let Err(e) = obs.validate() {
            warn!(index, symbol = %obs.symbol, error = %e, "Rejected observation");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ApiResponse::<Inserted>::error(format!("entry {}: {}", index, e))),
            );
        }
    }

    match store.insert_observations(&observations) {
        Ok(ids) => {
            info!(count = ids.len(), "Observations ingested");
            (StatusCode::CREATED, Json(ApiResponse::success(Inserted { ids })))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// GET /prices - Latest submitted price per (source, symbol)
async fn get_latest_prices(State(store): State<PriceStore>) -> impl IntoResponse {
    match store.latest_submitted() {
        Ok(rows) => (StatusCode::OK, Json(ApiResponse::success(rows))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// GET /pending - Observations awaiting submission
async fn get_pending(State(store): State<PriceStore>) -> impl IntoResponse {
    match store.pending_observations() {
        Ok(rows) => (StatusCode::OK, Json(ApiResponse::success(rows))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// GET /log?limit=N - Recent submission attempts
async fn get_log(
    State(store): State<PriceStore>,
    Query(query): Query<LogQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    match store.recent_log(limit) {
        Ok(rows) => (StatusCode::OK, Json(ApiResponse::success(rows))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// GET /health
async fn get_health() -> impl IntoResponse {
    Json(ApiResponse::success("ok"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_prices(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/db/add-prices/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn ingest_then_list_pending() {
        let store = PriceStore::open_in_memory().unwrap();
        let (status, body) = call(
            create_router(store.clone()),
            post_prices(
                r#"[{"source":0,"symbol":"XLMUSD","sell_asset":"XLM","buy_asset":"USD",
                     "price":"0.1200","asset_type":"other","updated_at":1000}]"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["ids"].as_array().unwrap().len(), 1);

        let (status, body) = call(
            create_router(store),
            Request::get("/pending").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["symbol"], "XLMUSD");
        assert_eq!(body["data"][0]["price"], "0.12");
    }

    #[tokio::test]
    async fn ingest_rejects_unsupported_settlement_asset() {
        let store = PriceStore::open_in_memory().unwrap();
        let (status, body) = call(
            create_router(store.clone()),
            post_prices(
                r#"[{"source":0,"symbol":"BTCUSD","sell_asset":"BTC","buy_asset":"USD",
                     "price":"65000","asset_type":"other"}]"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("BTC"));
        assert!(store.pending_observations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_and_empty_log() {
        let store = PriceStore::open_in_memory().unwrap();
        let (status, body) = call(
            create_router(store.clone()),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], "ok");

        let (_, body) = call(
            create_router(store),
            Request::get("/log?limit=5").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
    }
}
