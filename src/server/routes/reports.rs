//! レポートの登録と一覧

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::server::error::ApiError;
use crate::server::state::SharedState;
use crate::store::{NewReport, ReportRecord};
use crate::upload::save_upload;

/// 画像を受け取るマルチパートのフィールド名
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    /// 保存に失敗した場合は null
    pub id: Option<i64>,
    pub filename: String,
    pub stored_as: String,
    pub prediction: String,
    pub confidence: f64,
    pub timestamp: String,
}

/// POST /report - 画像を保存して分類し、結果を記録する
pub async fn create_report(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<ReportResponse>, ApiError> {
    let mut upload = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        // filename の無いパートはファイルとして扱わない
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field.bytes().await?;
        upload = Some((filename, data));
        break;
    }

    let (client_name, data) =
        upload.ok_or_else(|| ApiError::bad_request("No image file provided"))?;
    if client_name.is_empty() {
        return Err(ApiError::bad_request("Empty filename"));
    }
    if data.is_empty() {
        return Err(ApiError::bad_request("Empty image file"));
    }

    let stored = save_upload(&state.upload_dir, &client_name, &data)
        .await
        .map_err(|e| {
            error!("アップロードの保存に失敗: {:#}", e);
            ApiError::internal("Failed to save image")
        })?;

    let classifier = state.classifier.clone();
    let classification = tokio::task::spawn_blocking(move || classifier.classify_bytes(&data))
        .await
        .map_err(|e| {
            error!("推論タスクが異常終了: {}", e);
            ApiError::internal("Failed to classify image")
        })?
        .map_err(|e| {
            warn!("分類に失敗 ({}): {:#}", stored.storage_key, e);
            ApiError::internal("Failed to classify image")
        })?;

    let report = NewReport {
        filename: stored.display_name.clone(),
        stored_as: stored.storage_key.clone(),
        prediction: classification.label.clone(),
        confidence: Some(f64::from(classification.confidence)),
        timestamp: chrono::Local::now().to_rfc3339(),
    };

    // 記録に失敗しても分類結果は返す
    let store = state.store.clone();
    let pending = report.clone();
    let id = match tokio::task::spawn_blocking(move || store.insert(&pending)).await {
        Ok(Ok(id)) => Some(id),
        Ok(Err(e)) => {
            warn!("レポートの記録に失敗: {:#}", e);
            None
        }
        Err(e) => {
            warn!("レポート記録タスクが異常終了: {}", e);
            None
        }
    };

    info!(
        "予測: {} ({:.2}%) file={} id={:?}",
        report.prediction,
        classification.confidence * 100.0,
        report.stored_as,
        id
    );

    Ok(Json(ReportResponse {
        id,
        filename: report.filename,
        stored_as: report.stored_as,
        prediction: report.prediction,
        confidence: f64::from(classification.confidence),
        timestamp: report.timestamp,
    }))
}

/// GET /reports - 全レポートを新しい順に返す
pub async fn list_reports(
    State(state): State<SharedState>,
) -> Result<Json<Vec<ReportRecord>>, ApiError> {
    let store = state.store.clone();
    let records = tokio::task::spawn_blocking(move || store.list())
        .await
        .map_err(|e| {
            error!("一覧タスクが異常終了: {}", e);
            ApiError::internal("Failed to load reports")
        })?
        .map_err(|e| {
            error!("レポート一覧の取得に失敗: {:#}", e);
            ApiError::internal("Failed to load reports")
        })?;

    Ok(Json(records))
}
