//! CivicLens
//!
//! 市民から投稿された写真（ゴミ・道路の穴・漏水・街灯の故障）を分類する
//! CNN の学習ツールと、推論結果をレポートとして記録する HTTP バックエンド。
//!
//! - `model`: 設定、モデルメタデータ、tar.gz アーティファクトの入出力
//! - `ml`: CNN 定義、前処理、学習、推論エンジン
//! - `store`: SQLite のレポートテーブル
//! - `upload`: アップロードファイルの保存
//! - `server`: axum ルーター

// wgpu バックエンドの型で Send/Sync の判定が深くなる
#![recursion_limit = "256"]

pub mod logging;
pub mod model;
pub mod store;
pub mod upload;

#[cfg(feature = "ml")]
pub mod ml;
#[cfg(feature = "ml")]
pub mod server;

pub use model::{AppConfig, DeviceType, ModelMetadata};
pub use store::{NewReport, ReportRecord, ReportStore};

#[cfg(feature = "ml")]
pub use ml::{Classification, ImageClassifier, InferenceEngine};
#[cfg(feature = "ml")]
pub use server::{build_router, AppState, SharedState};

/// クラス名の定義（モデル出力のインデックス順）
pub const CLASS_NAMES: [&str; 4] = ["Garbage", "Pothole", "Water Leakage", "Streetlight Damage"];

/// 画像サイズ（正方形）
pub const IMAGE_SIZE: usize = 128;

/// ライブラリのバージョン
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
