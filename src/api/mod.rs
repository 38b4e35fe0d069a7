//! Ingest HTTP API
//!
//! Producer-facing endpoints: scraping jobs post observations here instead of
//! writing the database directly, and operators read back what was submitted.

mod routes;

pub use routes::create_router;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::store::PriceStore;

/// API response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Bind `addr` and serve until the task is cancelled
pub async fn serve(store: PriceStore, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Ingest API listening");
    axum::serve(listener, create_router(store)).await?;
    Ok(())
}
