//! モデルメタデータから推論用の情報を取り出す
//!
//! 出力インデックスとラベルの対応、入力サイズを保持し、
//! 起動時にサーバー設定のラベルと一致するかを確認します。

use anyhow::Result;
use tracing::info;

use crate::model::model_metadata::{ModelMetadata, NORMALIZATION_RESCALE};

/// 推論設定
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// 全クラスラベル（出力ベクトルのインデックス順）
    pub class_labels: Vec<String>,

    /// モデル入力解像度
    pub image_size: u32,

    /// 正規化方式
    pub normalization: String,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_labels: metadata.class_labels.clone(),
            image_size: metadata.image_size,
            normalization: metadata.normalization.clone(),
        }
    }

    /// クラス数
    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn label_for(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    /// 期待するラベル順序と一致しているか確認
    ///
    /// 順序が違うと推論結果が黙って別のラベルになるため、起動時に拒否する。
    pub fn ensure_labels(&self, expected: &[String]) -> Result<()> {
        if self.class_labels.as_slice() != expected {
            anyhow::bail!(
                "model labels [{}] do not match configured labels [{}]",
                self.class_labels.join(", "),
                expected.join(", ")
            );
        }
        Ok(())
    }

    /// 学習時の前処理が推論側の前処理と同じか確認
    ///
    /// 推論は常に 0〜1 縮小で画素を渡すので、他の方式で学習したモデルは受け付けない。
    pub fn ensure_normalization(&self) -> Result<()> {
        if self.normalization != NORMALIZATION_RESCALE {
            anyhow::bail!(
                "model was trained with normalization '{}' but inference uses '{}'",
                self.normalization,
                NORMALIZATION_RESCALE
            );
        }
        Ok(())
    }

    /// 設定情報をログに出力
    pub fn print_info(&self) {
        info!("=== 推論設定 ===");
        info!("クラスラベル: {}", self.class_labels.join(", "));
        info!("モデル入力サイズ: {}x{}", self.image_size, self.image_size);
        info!("正規化: {}", self.normalization);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InferenceConfig {
        let metadata = ModelMetadata::new(
            crate::CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            128,
            10,
            0,
            0,
        );
        InferenceConfig::from_metadata(&metadata)
    }

    #[test]
    fn test_label_lookup() {
        let config = config();
        assert_eq!(config.num_classes(), 4);
        assert_eq!(config.label_for(0), Some("Garbage"));
        assert_eq!(config.label_for(3), Some("Streetlight Damage"));
        assert_eq!(config.label_for(4), None);
    }

    #[test]
    fn test_ensure_labels() {
        let config = config();
        let same: Vec<String> = crate::CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        assert!(config.ensure_labels(&same).is_ok());

        // アルファベット順に並べ替えただけでも拒否される
        let mut sorted = same.clone();
        sorted.sort();
        assert!(config.ensure_labels(&sorted).is_err());
        assert!(config.ensure_labels(&same[..3]).is_err());
    }

    #[test]
    fn test_ensure_normalization() {
        let mut config = config();
        assert!(config.ensure_normalization().is_ok());

        config.normalization = "imagenet_channelwise".to_string();
        let err = config.ensure_normalization().unwrap_err();
        assert!(err.to_string().contains("imagenet_channelwise"));
    }
}
