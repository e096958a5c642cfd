//! HTTP バックエンド
//!
//! - `GET /`: 死活確認
//! - `POST /report`: 画像をアップロードして分類結果を記録
//! - `GET /reports`: 記録済みレポートを新しい順に返す

pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::ml::ImageClassifier;
use crate::model::AppConfig;
use crate::store::ReportStore;

pub use error::ApiError;
pub use state::{AppState, SharedState};

/// ルーターを組み立てる
pub fn build_router(state: SharedState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::health::home))
        .route("/report", post(routes::reports::create_report))
        .route("/reports", get(routes::reports::list_reports))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// DB とアップロード先を用意してサーバーを起動する
pub async fn serve(config: &AppConfig, classifier: Arc<dyn ImageClassifier>) -> Result<()> {
    let server = &config.server;

    let store = ReportStore::open(&server.database_path)
        .with_context(|| format!("Failed to open report database: {}", server.database_path))?;
    info!("レポート DB: {} ({}件)", server.database_path, store.count()?);

    tokio::fs::create_dir_all(&server.upload_dir)
        .await
        .with_context(|| format!("Failed to create upload directory: {}", server.upload_dir))?;

    let state = Arc::new(AppState::new(classifier, store, server.upload_dir.clone().into()));
    let app = build_router(state, server.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind((server.host.as_str(), server.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", server.host, server.port))?;
    let addr = listener.local_addr()?;

    info!("CivicLens サーバー起動: http://{}", addr);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
