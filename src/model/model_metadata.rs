//! モデルメタデータの定義
//!
//! 学習時のクラス順序と前処理の情報をモデルと一緒に保存し、
//! 推論時にラベルの対応関係がずれないようにします。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 前処理の正規化方式（0〜255 を 0〜1 に縮小）
pub const NORMALIZATION_RESCALE: &str = "rescale_0_1";

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// 全クラスラベル（出力ベクトルのインデックス順）
    /// 例: ["Garbage", "Pothole", "Water Leakage", "Streetlight Damage"]
    pub class_labels: Vec<String>,

    /// モデル入力サイズ（CNNへの入力解像度、通常128x128）
    pub image_size: u32,

    /// 正規化方式
    #[serde(default = "default_normalization")]
    pub normalization: String,

    /// 学習エポック数
    pub num_epochs: u32,

    /// 学習に使った枚数
    #[serde(default)]
    pub train_samples: u32,

    /// 検証に使った枚数
    #[serde(default)]
    pub valid_samples: u32,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

fn default_normalization() -> String {
    NORMALIZATION_RESCALE.to_string()
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_labels: Vec<String>,
        image_size: u32,
        num_epochs: u32,
        train_samples: u32,
        valid_samples: u32,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_labels,
            image_size,
            normalization: default_normalization(),
            num_epochs,
            train_samples,
            valid_samples,
            trained_at,
        }
    }

    /// クラス数
    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
