//! サーバーの共有状態
//!
//! モデルとラベルはグローバルに置かず、起動時に組み立ててハンドラーに渡す。

use std::path::PathBuf;
use std::sync::Arc;

use crate::ml::ImageClassifier;
use crate::store::ReportStore;

pub struct AppState {
    /// 読み込み済みの分類器（起動後は読み取りのみ）
    pub classifier: Arc<dyn ImageClassifier>,
    /// レポート DB
    pub store: ReportStore,
    /// アップロード画像の保存先
    pub upload_dir: PathBuf,
}

impl AppState {
    pub fn new(classifier: Arc<dyn ImageClassifier>, store: ReportStore, upload_dir: PathBuf) -> Self {
        Self {
            classifier,
            store,
            upload_dir,
        }
    }
}

pub type SharedState = Arc<AppState>;
