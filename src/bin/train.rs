//! CNN 学習ツール
//!
//! `<data-dir>/<クラス名>/*.jpg` のフォルダ構成からモデルを学習し、
//! メタデータ付きの tar.gz として保存する。

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use civic_lens_lib::logging::{init_logging, LogConfig};
use civic_lens_lib::ml::train_model;
use civic_lens_lib::model::{load_metadata, print_metadata_info};
use civic_lens_lib::{AppConfig, DeviceType};

/// Train the civic issue classifier
#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(version)]
#[command(about = "Train the civic issue image classifier")]
struct Cli {
    /// Config file (JSON)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Dataset root (one sub-directory per class)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Output artifact (.tar.gz)
    #[arg(short, long)]
    output: Option<String>,

    /// Number of epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Batch size
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Train on the GPU (WGPU)
    #[arg(long)]
    gpu: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_verbose_flag(cli.verbose));

    if let Err(e) = run(cli) {
        error!("学習に失敗しました: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::load_or_default(&cli.config);
    if let Some(data_dir) = cli.data_dir {
        config.training.data_dir = data_dir;
    }
    if let Some(output) = cli.output {
        config.set_model_path(output);
    }
    if let Some(epochs) = cli.epochs {
        config.training.num_epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        config.training.batch_size = batch_size;
    }
    if cli.gpu {
        config.set_device_type(DeviceType::Wgpu);
    }
    config.display();

    let summary = train_model(&config)?;

    info!("=== 学習完了 ===");
    info!(
        "学習 {} 枚 / 検証 {} 枚, {} エポック",
        summary.train_samples, summary.valid_samples, summary.num_epochs
    );
    info!("クラス順序: {}", summary.class_labels.join(", "));
    info!("保存先: {}", summary.model_path.display());

    let metadata = load_metadata(&summary.model_path)?;
    print_metadata_info(&metadata);
    Ok(())
}
