//! モデル学習
//!
//! ラベルごとのサブフォルダから画像を集め、シード付きで学習/検証に分割し、
//! Burn の Learner で CNN を学習してアーティファクトに保存します。

use anyhow::{Context, Result};
use burn::{
    backend::Wgpu,
    data::dataloader::{batcher::Batcher, DataLoaderBuilder},
    module::Module,
    optim::AdamConfig,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::{AutodiffBackend, Backend}, Int, Tensor, TensorData},
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};
use burn_autodiff::Autodiff;
use burn_dataset::Dataset;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::WgpuDevice;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ml::{load_and_normalize_image, ModelConfig, CivicIssueClassifier};
use crate::model::{save_model_with_metadata, AppConfig, DeviceType, ModelMetadata};

/// 学習対象とみなす画像の拡張子
const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "gif", "webp"];

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                IMAGE_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
}

/// 学習データセット（パスのリストのみ保持）
#[derive(Debug, Clone)]
pub struct IssueDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
    class_names: Vec<String>,
}

impl IssueDataset {
    /// 指定された順序でディレクトリから学習データを読み込む
    ///
    /// クラスIDは `class_order` のインデックスになる。サブフォルダが無いクラスは警告してスキップ。
    pub fn from_directory_with_order(data_dir: &Path, class_order: &[String]) -> Result<Self> {
        if !data_dir.is_dir() {
            anyhow::bail!("Dataset directory not found: {}", data_dir.display());
        }

        let mut samples = Vec::new();
        for (class_id, class_name) in class_order.iter().enumerate() {
            let class_dir = data_dir.join(class_name);
            if !class_dir.is_dir() {
                warn!("クラスディレクトリが存在しません: {}", class_dir.display());
                continue;
            }

            let mut paths = Vec::new();
            for entry in std::fs::read_dir(&class_dir)
                .with_context(|| format!("Failed to read {}", class_dir.display()))?
            {
                let path = entry?.path();
                if is_image_file(&path) {
                    paths.push(path);
                }
            }
            // read_dir の順序は OS 依存なので分割の再現性のために並べる
            paths.sort();
            samples.extend(paths.into_iter().map(|p| (p, class_id)));
        }

        Ok(Self {
            samples,
            class_names: class_order.to_vec(),
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// クラスごとの枚数
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for (_, class_id) in &self.samples {
            counts[*class_id] += 1;
        }
        counts
    }

    /// データセットを学習用と検証用に分割
    pub fn split(self, train_ratio: f32, seed: u64) -> (Self, Self) {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;

        let mut samples = self.samples;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        samples.shuffle(&mut rng);

        let train_len = (samples.len() as f32 * train_ratio) as usize;
        let valid_samples = samples.split_off(train_len);

        let train = Self {
            samples,
            class_names: self.class_names.clone(),
        };
        let valid = Self {
            samples: valid_samples,
            class_names: self.class_names,
        };
        (train, valid)
    }
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct IssueItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<IssueItem> for IssueDataset {
    fn get(&self, index: usize) -> Option<IssueItem> {
        let (path, label) = self.samples.get(index)?;
        Some(IssueItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチャー
#[derive(Clone, Debug)]
pub struct IssueBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> IssueBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct IssueBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, IssueItem, IssueBatch<B>> for IssueBatcher<B> {
    fn batch(&self, items: Vec<IssueItem>, _device: &B::Device) -> IssueBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets = Vec::with_capacity(batch_size);

        for item in items {
            match load_and_normalize_image(&item.path, size) {
                Ok(data) => pixels.extend_from_slice(&data),
                Err(e) => {
                    // 読めない画像はゼロで埋めて学習を続ける
                    warn!("画像読み込み失敗 {}: {:#}", item.path.display(), e);
                    pixels.extend(std::iter::repeat(0.0f32).take(3 * size * size));
                }
            }
            targets.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, 3, size, size]),
            &self.device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [batch_size]), &self.device);

        IssueBatch { images, targets }
    }
}

/// TrainStep実装 (学習時の順伝播 + 逆伝播)
impl<B: AutodiffBackend> TrainStep<IssueBatch<B>, ClassificationOutput<B>> for CivicIssueClassifier<B> {
    fn step(&self, batch: IssueBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

/// ValidStep実装 (検証時の順伝播のみ)
impl<B: Backend> ValidStep<IssueBatch<B>, ClassificationOutput<B>> for CivicIssueClassifier<B> {
    fn step(&self, batch: IssueBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// 学習結果の概要
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub model_path: PathBuf,
    pub class_labels: Vec<String>,
    pub train_samples: usize,
    pub valid_samples: usize,
    pub num_epochs: usize,
}

/// 学習前のデータセット検証
///
/// すべてのラベルに少なくとも1枚の画像が必要。
fn validate_dataset(dataset: &IssueDataset) -> Result<()> {
    let counts = dataset.class_counts();
    let mut empty_classes = Vec::new();

    for (name, count) in dataset.class_names().iter().zip(&counts) {
        info!("  クラス '{}': {} 枚", name, count);
        if *count == 0 {
            empty_classes.push(name.clone());
        }
    }

    if !empty_classes.is_empty() {
        anyhow::bail!(
            "No images found for classes: {}",
            empty_classes.join(", ")
        );
    }
    Ok(())
}

/// モデル学習を実行
///
/// 設定されたラベル順序でデータセットを読み、学習後にアーティファクトを保存します。
pub fn train_model(config: &AppConfig) -> Result<TrainingSummary> {
    config.validate()?;

    let data_dir = PathBuf::from(&config.training.data_dir);
    let class_labels = config.model.class_labels.clone();
    info!("データセット: {}", data_dir.display());
    info!("クラス順序 ({}個): {}", class_labels.len(), class_labels.join(", "));

    let dataset = IssueDataset::from_directory_with_order(&data_dir, &class_labels)?;
    validate_dataset(&dataset)?;

    let (dataset_train, dataset_val) =
        dataset.split(config.training.train_ratio, config.training.seed);
    if dataset_train.is_empty() || dataset_val.is_empty() {
        anyhow::bail!(
            "Not enough images to split (train {}, valid {})",
            dataset_train.len(),
            dataset_val.len()
        );
    }

    let train_samples = dataset_train.len();
    let valid_samples = dataset_val.len();
    info!("学習データ: {} 枚", train_samples);
    info!("検証データ: {} 枚", valid_samples);

    let model_config = ModelConfig::new(class_labels.len())
        .with_dropout(config.model.dropout)
        .with_image_size(config.model.image_size as usize);

    let model_binary = match config.device_type {
        DeviceType::Wgpu => {
            info!("GPU (WGPU) モードで学習を開始します");
            run_training::<Autodiff<Wgpu>>(
                config,
                &model_config,
                dataset_train,
                dataset_val,
                WgpuDevice::default(),
            )?
        }
        DeviceType::Cpu => {
            info!("CPU (NdArray) モードで学習を開始します");
            run_training::<Autodiff<NdArray>>(
                config,
                &model_config,
                dataset_train,
                dataset_val,
                NdArrayDevice::Cpu,
            )?
        }
    };

    let metadata = ModelMetadata::new(
        class_labels.clone(),
        config.model.image_size,
        config.training.num_epochs as u32,
        train_samples as u32,
        valid_samples as u32,
    );
    let model_path = save_model_with_metadata(
        Path::new(&config.model.model_path),
        &metadata,
        &model_binary,
    )?;

    Ok(TrainingSummary {
        model_path,
        class_labels,
        train_samples,
        valid_samples,
        num_epochs: config.training.num_epochs,
    })
}

/// バックエンドを固定して学習し、学習済みの重みをバイト列で返す
fn run_training<B: AutodiffBackend>(
    config: &AppConfig,
    model_config: &ModelConfig,
    dataset_train: IssueDataset,
    dataset_val: IssueDataset,
    device: B::Device,
) -> Result<Vec<u8>> {
    let training = &config.training;
    let image_size = model_config.image_size;

    let batcher_train = IssueBatcher::<B>::new(device.clone(), image_size);
    let batcher_val = IssueBatcher::<B::InnerBackend>::new(device.clone(), image_size);

    // 分割時にシャッフル済みだが、エポックごとの順序も変える
    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(training.batch_size)
        .shuffle(training.seed)
        .num_workers(training.num_workers)
        .build(dataset_train);

    let dataloader_val = DataLoaderBuilder::new(batcher_val)
        .batch_size(training.batch_size)
        .num_workers(training.num_workers)
        .build(dataset_val);

    let model = model_config.init::<B>(&device)?;

    // チェックポイントやメトリクスのログは一時ディレクトリに出す
    let artifact_dir = std::env::temp_dir().join("civic_lens_training");
    std::fs::create_dir_all(&artifact_dir)
        .with_context(|| format!("Failed to create {}", artifact_dir.display()))?;
    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();

    info!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}",
        training.num_epochs, training.batch_size, training.learning_rate
    );

    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(training.num_epochs)
        .summary()
        .build(model, AdamConfig::new().init(), training.learning_rate);

    // fit は学習用バックエンドを外したモデルを返す
    let model_trained = learner.fit(dataloader_train, dataloader_val);
    let trained_model = model_trained.model;

    std::fs::remove_dir_all(&artifact_dir).ok();

    export_weights(trained_model)
}

/// 学習済みモデルの重みをバイト列にする
///
/// 推論側は BinBytesRecorder で読むので同じレコーダーで書く。
fn export_weights<B: Backend>(model: CivicIssueClassifier<B>) -> Result<Vec<u8>> {
    info!("学習済みモデルの総パラメータ数: {}", model.num_params());
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズエラー: {:?}", e))
}
