//! API handlers for the pagesplit server

use axum::{body::Bytes, extract::State, Json};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pagesplit_core::{correct_page_images, split};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ServerError;
use crate::spool::stage_pages;
use crate::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "pagesplit-server",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Split response
#[derive(Serialize)]
pub struct SplitResponse {
    /// Base64-encoded single-page PDFs, in page order
    pub pages: Vec<String>,
    pub page_count: usize,
}

/// Handler: POST /api/split
///
/// The request body is the raw PDF. Parsing and rasterization are CPU bound,
/// so the work runs on the blocking pool.
pub async fn handle_split(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SplitResponse>, ServerError> {
    info!("Split request: {} bytes", body.len());

    let pages = tokio::task::spawn_blocking(move || process_document(&body, &state))
        .await
        .map_err(|e| ServerError::Internal(format!("Split task failed: {}", e)))??;

    let pages: Vec<String> = pages.iter().map(|page| BASE64.encode(page)).collect();
    info!("Split complete: {} pages", pages.len());

    Ok(Json(SplitResponse {
        page_count: pages.len(),
        pages,
    }))
}

/// Split, optionally correct page scans, optionally stage through the spool
pub fn process_document(body: &[u8], state: &AppState) -> Result<Vec<Vec<u8>>, ServerError> {
    let mut pages = split(body, &state.split_options)?;

    if state.correct_orientation {
        pages = pages
            .iter()
            .map(|page| correct_page_images(page, &state.split_options))
            .collect::<Result<_, _>>()?;
    }

    if let Some(root) = &state.spool_dir {
        debug!("Staging {} pages under {}", pages.len(), root.display());
        pages = stage_pages(root, &pages)?;
    }

    Ok(pages)
}
