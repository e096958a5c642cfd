//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、入力サイズなど）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::{info, warn};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const WEIGHTS_ENTRY: &str = "model.bin";

/// 保存先のパスを決める
///
/// `.gz` で終わっていればそのまま、そうでなければ末尾に `.tar.gz` を付ける。
/// 既存の拡張子は置き換えない（`model.v2` は `model.v2.tar.gz`）。
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        return output_path.to_path_buf();
    }
    let mut name = output_path.as_os_str().to_os_string();
    name.push(".tar.gz");
    PathBuf::from(name)
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 実際に書き込んだパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);
    if tar_gz_path.as_path() != output_path {
        warn!(
            "出力先を {} ではなく {} にします",
            output_path.display(),
            tar_gz_path.display()
        );
    }

    if let Some(parent) = tar_gz_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
        }
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;
    let mut tar_builder = Builder::new(GzEncoder::new(tar_gz_file, Compression::default()));

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, WEIGHTS_ENTRY, model_binary)?;

    // tar を閉じてから gzip のフッターを書き出す
    let encoder = tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?;
    encoder
        .finish()
        .context("Failed to finalize gzip stream")?
        .flush()?;

    info!(
        "モデルを保存しました: {} (重み {:.2} MB)",
        tar_gz_path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    Ok(tar_gz_path)
}

fn append_entry<W: Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// アーカイブから指定したエントリだけを読み出す
fn read_entries(tar_gz_path: &Path, wanted: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open model archive: {:?}", tar_gz_path))?;
    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    let mut found = HashMap::new();
    let entries = archive
        .entries()
        .with_context(|| format!("Failed to read model archive: {:?}", tar_gz_path))?;

    for entry in entries {
        let mut entry = entry.context("Corrupt entry in model archive")?;
        let name = match entry.path()?.to_str() {
            Some(name) if wanted.contains(&name) => name.to_string(),
            _ => continue,
        };

        let mut buffer = Vec::new();
        entry
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read {} from model archive", name))?;
        found.insert(name, buffer);

        if found.len() == wanted.len() {
            break;
        }
    }

    Ok(found)
}

fn take_entry(entries: &mut HashMap<String, Vec<u8>>, name: &str) -> Result<Vec<u8>> {
    entries
        .remove(name)
        .ok_or_else(|| anyhow::anyhow!("{} not found in tar.gz archive", name))
}

fn parse_metadata(bytes: Vec<u8>) -> Result<ModelMetadata> {
    let json = String::from_utf8(bytes).context("metadata.json is not valid UTF-8")?;
    ModelMetadata::from_json_string(&json)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY])?;
    parse_metadata(take_entry(&mut entries, METADATA_ENTRY)?)
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut entries = read_entries(tar_gz_path, &[METADATA_ENTRY, WEIGHTS_ENTRY])?;
    let metadata = parse_metadata(take_entry(&mut entries, METADATA_ENTRY)?)?;
    let binary = take_entry(&mut entries, WEIGHTS_ENTRY)?;
    Ok((metadata, binary))
}

/// メタデータをログに出力
pub fn print_metadata_info(metadata: &ModelMetadata) {
    info!("=== モデルメタデータ ===");
    info!("クラスラベル: {}", metadata.class_labels.join(", "));
    info!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    info!("正規化: {}", metadata.normalization);
    info!(
        "学習エポック数: {} (学習 {} 枚 / 検証 {} 枚)",
        metadata.num_epochs, metadata.train_samples, metadata.valid_samples
    );
    info!("学習日時: {}", metadata.trained_at);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> ModelMetadata {
        ModelMetadata::new(
            crate::CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            128,
            10,
            40,
            10,
        )
    }

    #[test]
    fn test_archive_path_extension() {
        assert_eq!(archive_path(Path::new("ai_model/model")), PathBuf::from("ai_model/model.tar.gz"));
        assert_eq!(archive_path(Path::new("ai_model/model.bin")), PathBuf::from("ai_model/model.bin.tar.gz"));
        assert_eq!(archive_path(Path::new("models/model.v2")), PathBuf::from("models/model.v2.tar.gz"));
        assert_eq!(archive_path(Path::new("m.tar.gz")), PathBuf::from("m.tar.gz"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = sample_metadata();
        let weights = vec![7u8; 1000];

        let path = save_model_with_metadata(&dir.path().join("nested/model"), &metadata, &weights).unwrap();
        assert!(path.ends_with("nested/model.tar.gz"));

        let (loaded_metadata, loaded_weights) = load_model_with_metadata(&path).unwrap();
        assert_eq!(loaded_metadata, metadata);
        assert_eq!(loaded_weights, weights);

        assert_eq!(load_metadata(&path).unwrap().class_labels, metadata.class_labels);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_model_with_metadata(&dir.path().join("missing.tar.gz")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open model archive"));
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tar.gz");
        std::fs::write(&path, b"definitely not a gzip stream").unwrap();
        assert!(load_model_with_metadata(&path).is_err());
    }

    #[test]
    fn test_archive_without_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.tar.gz");
        let file = File::create(&path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        let json = sample_metadata().to_json_string().unwrap();
        append_entry(&mut builder, METADATA_ENTRY, json.as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        assert!(load_metadata(&path).is_ok());
        let err = load_model_with_metadata(&path).unwrap_err();
        assert!(err.to_string().contains("model.bin not found"));
    }
}
