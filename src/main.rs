//! CivicLens HTTP バックエンド
//!
//! 起動時にモデルを一度だけ読み込み、レポートの受付と一覧を提供する。

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use civic_lens_lib::logging::{init_logging, LogConfig};
use civic_lens_lib::ml::load_classifier;
use civic_lens_lib::{server, AppConfig, VERSION};

/// CivicLens backend server
#[derive(Parser, Debug)]
#[command(name = "civic_lens")]
#[command(version)]
#[command(about = "Classify civic issue photos and record them as reports")]
struct Cli {
    /// Config file (JSON)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Model artifact (.tar.gz)
    #[arg(short, long)]
    model: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_verbose_flag(cli.verbose));

    info!("CivicLens v{}", VERSION);

    let mut config = AppConfig::load_or_default(&cli.config);
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(model) = cli.model {
        config.set_model_path(model);
    }
    config.validate()?;
    config.display();

    // モデルが読めなければリクエストを受け付けずに終了する
    let classifier = load_classifier(&config)?;
    info!("モデル読み込み完了: {}", classifier.labels().join(", "));

    server::serve(&config, classifier).await
}
