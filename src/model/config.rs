//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデル、学習、サーバーの設定をJSON形式で保存・読み込みします。
//! 既定値は学習スクリプトとサーバーがもともと持っていた固定値と同じです。

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::{CLASS_NAMES, IMAGE_SIZE};

/// CNN が受け付ける最小の入力サイズ
pub const MIN_IMAGE_SIZE: u32 = 10;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// モデルアーティファクト（tar.gz）のパス
    pub model_path: String,
    /// クラスラベル（出力ベクトルのインデックス順）
    pub class_labels: Vec<String>,
    /// 入力画像サイズ（正方形）
    pub image_size: u32,
    /// ドロップアウト率
    pub dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "ai_model/model.tar.gz".to_string(),
            class_labels: CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            image_size: IMAGE_SIZE as u32,
            dropout: 0.5,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// ラベルごとのサブフォルダを持つデータセットディレクトリ
    pub data_dir: String,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// トレーニングデータの割合
    pub train_ratio: f32,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            data_dir: "./dataset".to_string(),
            num_epochs: 10,
            batch_size: 16,
            num_workers: 1,
            learning_rate: 1e-3,
            seed: 42,
            train_ratio: 0.8,
        }
    }
}

/// HTTP サーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// アップロード画像の保存先
    pub upload_dir: String,
    /// SQLite ファイル
    pub database_path: String,
    /// リクエストボディの上限（バイト）
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            upload_dir: "images".to_string(),
            database_path: "reports.db".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// トレーニング設定
    #[serde(default)]
    pub training: TrainingSettings,
    /// サーバー設定
    #[serde(default)]
    pub server: ServerSettings,
}

impl AppConfig {
    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない場合や壊れている場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("設定ファイルが存在しません。デフォルト設定を使用します: {}", path.display());
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => {
                info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                warn!("設定ファイルの読み込みに失敗しました: {:#}", e);
                warn!("デフォルト設定を使用します");
                Self::default()
            }
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 値の整合性を検証する
    pub fn validate(&self) -> anyhow::Result<()> {
        let labels = &self.model.class_labels;
        if labels.is_empty() {
            anyhow::bail!("class_labels must not be empty");
        }
        let unique: HashSet<&String> = labels.iter().collect();
        if unique.len() != labels.len() {
            anyhow::bail!("class_labels must be unique: {}", labels.join(", "));
        }
        if labels.iter().any(|l| l.trim().is_empty()) {
            anyhow::bail!("class_labels must not contain blank names");
        }
        if self.model.image_size < MIN_IMAGE_SIZE {
            anyhow::bail!(
                "image_size {} is too small (minimum {})",
                self.model.image_size,
                MIN_IMAGE_SIZE
            );
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            anyhow::bail!("dropout must be in [0, 1): {}", self.model.dropout);
        }
        if !(self.training.train_ratio > 0.0 && self.training.train_ratio < 1.0) {
            anyhow::bail!("train_ratio must be in (0, 1): {}", self.training.train_ratio);
        }
        if self.training.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }
        if self.training.num_epochs == 0 {
            anyhow::bail!("num_epochs must be greater than 0");
        }
        Ok(())
    }

    /// 計算デバイスを設定
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
    }

    /// モデルパスを設定
    pub fn set_model_path(&mut self, path: String) {
        self.model.model_path = path;
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        info!("=== アプリケーション設定 ===");
        info!("計算デバイス: {}", self.device_type);
        info!("モデルパス: {}", self.model.model_path);
        info!("クラスラベル: {}", self.model.class_labels.join(", "));
        info!("入力サイズ: {}x{}", self.model.image_size, self.model.image_size);
        info!("--- トレーニング設定 ---");
        info!("データセット: {}", self.training.data_dir);
        info!(
            "エポック数: {}, バッチサイズ: {}, 学習率: {}",
            self.training.num_epochs, self.training.batch_size, self.training.learning_rate
        );
        info!("--- サーバー設定 ---");
        info!("待ち受け: {}:{}", self.server.host, self.server.port);
        info!("アップロード先: {}", self.server.upload_dir);
        info!("データベース: {}", self.server.database_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.model.class_labels.len(), 4);
        assert_eq!(config.model.class_labels[1], "Pothole");
        assert_eq!(config.model.image_size, 128);
        assert_eq!(config.training.num_epochs, 10);
        assert_eq!(config.training.batch_size, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.model.class_labels, deserialized.model.class_labels);
        assert_eq!(config.server.port, deserialized.server.port);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"device_type": "Wgpu", "server": {"host": "0.0.0.0", "port": 8080, "upload_dir": "u", "database_path": "d.db", "max_upload_bytes": 1024}}"#)
                .unwrap();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.training.batch_size, 16);
    }

    #[test]
    fn test_load_or_default_with_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = AppConfig::load_or_default(&path);
        assert_eq!(config.training.num_epochs, 10);
        assert!(AppConfig::load(&path).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.set_model_path("models/custom.tar.gz".to_string());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.model.model_path, "models/custom.tar.gz");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.model.class_labels.push("Garbage".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.image_size = 8;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.training.train_ratio = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
