//! ログ初期化
//!
//! 両バイナリから一度だけ呼ばれる `tracing` サブスクライバーの設定。

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 表示する最小レベル
    pub level: Level,
    /// モジュールパスを表示するか
    pub include_target: bool,
    /// ANSI カラー
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// デバッグ用の詳細設定
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            ansi_colors: true,
        }
    }

    /// `--verbose` フラグから設定を選ぶ
    pub fn from_verbose_flag(verbose: bool) -> Self {
        if verbose {
            Self::verbose()
        } else {
            Self::default()
        }
    }
}

/// グローバルサブスクライバーを設定する
///
/// 既に設定済みの場合は何もしない（テストから複数回呼ばれても安全）。
pub fn init_logging(config: &LogConfig) {
    let result = FmtSubscriber::builder()
        .with_max_level(config.level)
        .with_target(config.include_target)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(config.ansi_colors)
        .compact()
        .try_init();

    if result.is_err() {
        tracing::debug!("ログサブスクライバーは既に初期化済みです");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_flag() {
        assert_eq!(LogConfig::from_verbose_flag(true).level, Level::DEBUG);
        assert_eq!(LogConfig::from_verbose_flag(false).level, Level::INFO);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_logging(&LogConfig::default());
        init_logging(&LogConfig::verbose());
    }
}
