//! 機械学習モデルの共通定義
//!
//! 市民課題写真の分類用CNNモデルと関連する設定を提供します。

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use tracing::debug;

/// 全結合の隠れ層ユニット数
const HIDDEN_UNITS: usize = 64;

/// 2段目の畳み込みのチャネル数（flatten 次元の計算に使う）
const CONV2_CHANNELS: usize = 64;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// ドロップアウト率
    #[config(default = 0.5)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 128)]
    pub image_size: usize,
}

/// 2回目のプーリング後の特徴マップの一辺
///
/// - Conv (3x3, no padding): size -> size - 2
/// - Pool (2x2, stride 2): n -> n / 2 (切り捨て)
///
/// 特徴マップが消えてしまうサイズでは `None`。
pub fn feature_map_size(image_size: usize) -> Option<usize> {
    let after_pool1 = image_size.checked_sub(2)? / 2;
    let after_pool2 = after_pool1.checked_sub(2)? / 2;
    (after_pool2 > 0).then_some(after_pool2)
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> anyhow::Result<CivicIssueClassifier<B>> {
        if self.num_classes == 0 {
            anyhow::bail!("num_classes must be greater than 0");
        }
        let feature_size = feature_map_size(self.image_size).ok_or_else(|| {
            anyhow::anyhow!("入力サイズが小さすぎます: {} (最小10x10が必要)", self.image_size)
        })?;

        let d = CONV2_CHANNELS * feature_size * feature_size;
        debug!(
            "[Model] 入力 {}x{} -> 特徴マップ {}x{}x{} -> d = {} -> {} -> {}",
            self.image_size,
            self.image_size,
            CONV2_CHANNELS,
            feature_size,
            feature_size,
            d,
            HIDDEN_UNITS,
            self.num_classes
        );

        Ok(CivicIssueClassifier {
            conv1: Conv2dConfig::new([3, 32], [3, 3]).init(device),
            pool1: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            conv2: Conv2dConfig::new([32, CONV2_CHANNELS], [3, 3]).init(device),
            pool2: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(d, HIDDEN_UNITS).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc2: LinearConfig::new(HIDDEN_UNITS, self.num_classes).init(device),
            activation: Relu::new(),
        })
    }
}

/// 市民課題写真の分類用CNNモデル
///
/// # アーキテクチャ
/// - Conv 3x3 (3 -> 32) + ReLU + MaxPool 2x2
/// - Conv 3x3 (32 -> 64) + ReLU + MaxPool 2x2
/// - Flatten
/// - FC: d -> 64 + ReLU + Dropout
/// - FC: 64 -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct CivicIssueClassifier<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,

    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> CivicIssueClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool1.forward(x);

        let x = self.conv2.forward(x);
        let x = self.activation.forward(x);
        let x = self.pool2.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);

        self.fc2.forward(x)
    }

    /// 読み込む重みの形状がこのモデルと一致するか確認
    ///
    /// `load_record` は形状を検査しないので、ずれた重みは推論時に初めてパニックする。
    pub fn ensure_record_shapes(&self, record: &CivicIssueClassifierRecord<B>) -> anyhow::Result<()> {
        check_shape("conv1", &self.conv1.weight.val().dims(), &record.conv1.weight.val().dims())?;
        check_shape("conv2", &self.conv2.weight.val().dims(), &record.conv2.weight.val().dims())?;
        check_shape("fc1", &self.fc1.weight.val().dims(), &record.fc1.weight.val().dims())?;
        check_shape("fc2", &self.fc2.weight.val().dims(), &record.fc2.weight.val().dims())?;
        Ok(())
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

fn check_shape(layer: &str, expected: &[usize], actual: &[usize]) -> anyhow::Result<()> {
    if expected != actual {
        anyhow::bail!(
            "weight shape mismatch in {}: artifact has {:?} but metadata expects {:?}",
            layer,
            actual,
            expected
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    #[test]
    fn test_feature_map_size() {
        assert_eq!(feature_map_size(128), Some(30));
        assert_eq!(feature_map_size(32), Some(6));
        assert_eq!(feature_map_size(10), Some(1));
        assert_eq!(feature_map_size(9), None);
        assert_eq!(feature_map_size(1), None);
    }

    #[test]
    fn test_forward_shape() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(4)
            .with_image_size(32)
            .init::<NdArray>(&device)
            .unwrap();

        let images = Tensor::<NdArray, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(images);
        assert_eq!(output.dims(), [2, 4]);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(4)
            .with_image_size(16)
            .init::<NdArray>(&device)
            .unwrap();

        let images = Tensor::<NdArray, 4>::ones([1, 3, 16, 16], &device);
        let probs: Vec<f32> = model.probabilities(images).into_data().to_vec().unwrap();
        assert_eq!(probs.len(), 4);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_record_shape_check() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(4).with_image_size(32).init::<NdArray>(&device).unwrap();

        let same = ModelConfig::new(4).with_image_size(32).init::<NdArray>(&device).unwrap();
        assert!(model.ensure_record_shapes(&same.into_record()).is_ok());

        let smaller = ModelConfig::new(4).with_image_size(16).init::<NdArray>(&device).unwrap();
        let err = model.ensure_record_shapes(&smaller.into_record()).unwrap_err();
        assert!(err.to_string().contains("fc1"));

        let wider = ModelConfig::new(5).with_image_size(32).init::<NdArray>(&device).unwrap();
        let err = model.ensure_record_shapes(&wider.into_record()).unwrap_err();
        assert!(err.to_string().contains("fc2"));
    }

    #[test]
    fn test_too_small_input_is_rejected() {
        let device = NdArrayDevice::Cpu;
        assert!(ModelConfig::new(4).with_image_size(8).init::<NdArray>(&device).is_err());
        assert!(ModelConfig::new(0).with_image_size(32).init::<NdArray>(&device).is_err());
    }
}
