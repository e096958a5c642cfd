//! アップロード画像の保存
//!
//! クライアントのファイル名はパスに使わない。保存名はサーバー側で UUID から作り、
//! サニタイズしたクライアント名は表示用のメタデータとしてだけ残す。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// 保存名に引き継ぐ拡張子
const KNOWN_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "bmp", "gif", "webp", "tif", "tiff"];

/// サニタイズ後に何も残らなかった場合の表示名
const FALLBACK_NAME: &str = "upload";

/// 保存済みのアップロード
#[derive(Debug, Clone)]
pub struct StoredUpload {
    /// サニタイズ済みのクライアント名
    pub display_name: String,
    /// サーバー側の保存名
    pub storage_key: String,
    pub path: PathBuf,
}

/// クライアントのファイル名を安全な表示名にする
///
/// ASCII 以外は捨て、パス区切りは空白扱い、空白の連続は `_`、
/// `[A-Za-z0-9._-]` 以外は除去、先頭の `.` と `_` は取り除く。
pub fn sanitize_filename(name: &str) -> String {
    let unified: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = unified.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    let trimmed = cleaned.trim_start_matches(&['.', '_'][..]);
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// 表示名から保存名を作る（`<uuid>.<ext>`）
pub fn storage_key_for(display_name: &str) -> String {
    let ext = Path::new(display_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| KNOWN_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or_else(|| "bin".to_string());
    format!("{}.{}", Uuid::new_v4().simple(), ext)
}

/// アップロードされたバイト列を保存する
pub async fn save_upload(upload_dir: &Path, client_name: &str, data: &[u8]) -> Result<StoredUpload> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .with_context(|| format!("Failed to create upload directory: {}", upload_dir.display()))?;

    let display_name = sanitize_filename(client_name);
    let storage_key = storage_key_for(&display_name);
    let path = upload_dir.join(&storage_key);

    tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("Failed to save upload: {}", path.display()))?;

    Ok(StoredUpload {
        display_name,
        storage_key,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_simple_names() {
        assert_eq!(sanitize_filename("pothole.jpg"), "pothole.jpg");
        assert_eq!(sanitize_filename("my photo (1).png"), "my_photo_1.png");
    }

    #[test]
    fn test_sanitize_blocks_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename("..\\..\\windows\\win.ini"), "windows_win.ini");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
    }

    #[test]
    fn test_sanitize_fallback() {
        assert_eq!(sanitize_filename("写真.jpg"), "jpg");
        assert_eq!(sanitize_filename("...."), "upload");
        assert_eq!(sanitize_filename("ごみ"), "upload");
    }

    #[test]
    fn test_storage_key_extension() {
        let key = storage_key_for("pothole.JPG");
        assert!(key.ends_with(".jpg"));
        assert_eq!(key.len(), 32 + 4);

        assert!(storage_key_for("report.exe").ends_with(".bin"));
        assert!(storage_key_for("upload").ends_with(".bin"));
        assert_ne!(storage_key_for("a.png"), storage_key_for("a.png"));
    }

    #[tokio::test]
    async fn test_save_upload() {
        let dir = tempfile::tempdir().unwrap();
        let upload_dir = dir.path().join("images");

        let stored = save_upload(&upload_dir, "../pothole.jpg", b"raw bytes").await.unwrap();
        assert_eq!(stored.display_name, "pothole.jpg");
        assert!(stored.path.starts_with(&upload_dir));
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"raw bytes");

        let again = save_upload(&upload_dir, "../pothole.jpg", b"other").await.unwrap();
        assert_ne!(again.storage_key, stored.storage_key);
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"raw bytes");
    }
}
