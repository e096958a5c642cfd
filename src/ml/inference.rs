//! モデル推論機能

use anyhow::{Context, Result};
use burn::{
    backend::Wgpu,
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor, TensorData},
};
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::ml::{decode_and_normalize, CivicIssueClassifier, ModelConfig};
use crate::model::{load_model_with_metadata, AppConfig, DeviceType, InferenceConfig, ModelMetadata};

/// 1枚の画像の分類結果
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Classification {
    /// 予測ラベル
    pub label: String,
    /// 出力ベクトルのインデックス
    pub index: usize,
    /// 予測ラベルの確率
    pub confidence: f32,
    /// 全クラスの確率（ラベル順）
    pub probabilities: Vec<f32>,
}

/// HTTP 層から見た分類器
///
/// バックエンドの型を隠して `Arc<dyn ImageClassifier>` として共有する。
pub trait ImageClassifier: Send + Sync {
    /// 画像のバイト列を分類
    fn classify_bytes(&self, bytes: &[u8]) -> Result<Classification>;

    /// 出力順のラベル
    fn labels(&self) -> &[String];
}

/// 確率最大のインデックス（同値なら先頭）
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
}

/// 推論エンジン
///
/// Burn のパラメータは `Sync` ではないのでモデルは `Mutex` で保持する。
pub struct InferenceEngine<B: Backend> {
    model: Mutex<CivicIssueClassifier<B>>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (metadata, model_binary) = load_model_with_metadata(model_path)
            .with_context(|| format!("Failed to load model artifact: {}", model_path.display()))?;

        InferenceConfig::from_metadata(&metadata).ensure_normalization()?;

        let model = build_model::<B>(&metadata, &device)?;

        let record = BinBytesRecorder::<FullPrecisionSettings>::default()
            .load(model_binary, &device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        model
            .ensure_record_shapes(&record)
            .with_context(|| format!("Weights in {} do not fit the metadata", model_path.display()))?;
        let model = model.load_record(record);

        let engine = Self::from_parts(model, &metadata, device);
        engine.warm_up()?;
        info!("モデルを読み込みました: {}", model_path.display());
        engine.config.print_info();
        Ok(engine)
    }

    /// 構築済みのモデルから推論エンジンを作る
    pub fn from_parts(model: CivicIssueClassifier<B>, metadata: &ModelMetadata, device: B::Device) -> Self {
        Self {
            model: Mutex::new(model),
            config: InferenceConfig::from_metadata(metadata),
            device,
        }
    }

    /// 黒画像で一度推論し、出力の幅がラベル数と一致するか確認
    fn warm_up(&self) -> Result<()> {
        let size = self.config.image_size as usize;
        let probabilities = self.run(vec![0.0; 3 * size * size])?;
        if probabilities.len() != self.config.num_classes() {
            anyhow::bail!(
                "model produces {} outputs but metadata lists {} labels",
                probabilities.len(),
                self.config.num_classes()
            );
        }
        Ok(())
    }

    /// 正規化済みの画素 (C, H, W) から確率ベクトルを得る
    fn run(&self, pixels: Vec<f32>) -> Result<Vec<f32>> {
        let size = self.config.image_size as usize;
        let input = Tensor::<B, 4>::from_data(TensorData::new(pixels, [1, 3, size, size]), &self.device);

        // 別リクエストのパニックで毒された Mutex でもモデル自体は壊れていない
        let output = {
            let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
            model.probabilities(input)
        };

        output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
    }

    fn classify_pixels(&self, pixels: Vec<f32>) -> Result<Classification> {
        let probabilities = self.run(pixels)?;
        let (index, confidence) =
            argmax(&probabilities).ok_or_else(|| anyhow::anyhow!("model produced no outputs"))?;
        let label = self
            .config
            .label_for(index)
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", index))?
            .to_string();

        Ok(Classification {
            label,
            index,
            confidence,
            probabilities,
        })
    }

    /// 単一画像ファイルを分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Classification> {
        let path = image_path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read image: {}", path.display()))?;
        self.classify_bytes(&bytes)
    }

    /// 複数画像を順番に分類
    pub fn classify_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<Classification>> {
        image_paths.iter().map(|p| self.classify_image(p)).collect()
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }
}

impl<B: Backend> ImageClassifier for InferenceEngine<B> {
    fn classify_bytes(&self, bytes: &[u8]) -> Result<Classification> {
        let pixels = decode_and_normalize(bytes, self.config.image_size as usize)?;
        self.classify_pixels(pixels)
    }

    fn labels(&self) -> &[String] {
        &self.config.class_labels
    }
}

/// メタデータからネットワークを組み立てる（推論時はドロップアウトなし）
fn build_model<B: Backend>(metadata: &ModelMetadata, device: &B::Device) -> Result<CivicIssueClassifier<B>> {
    ModelConfig::new(metadata.num_classes())
        .with_dropout(0.0)
        .with_image_size(metadata.image_size as usize)
        .init::<B>(device)
}

/// 設定に従って分類器を読み込む（起動時に一度だけ）
///
/// アーティファクトのラベル順序が設定と異なる場合は失敗する。
pub fn load_classifier(config: &AppConfig) -> Result<Arc<dyn ImageClassifier>> {
    let classifier: Arc<dyn ImageClassifier> = match config.device_type {
        DeviceType::Wgpu => Arc::new(load_checked::<Wgpu>(config, WgpuDevice::default())?),
        DeviceType::Cpu => Arc::new(load_checked::<NdArray>(config, NdArrayDevice::Cpu)?),
    };
    Ok(classifier)
}

fn load_checked<B: Backend>(config: &AppConfig, device: B::Device) -> Result<InferenceEngine<B>> {
    let engine = InferenceEngine::<B>::load(&config.model.model_path, device)?;
    engine.config().ensure_labels(&config.model.class_labels)?;

    if engine.config().image_size != config.model.image_size {
        warn!(
            "設定の入力サイズ {} ではなくモデルの入力サイズ {} を使用します",
            config.model.image_size,
            engine.config().image_size
        );
    }
    Ok(engine)
}
