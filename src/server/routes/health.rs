//! 死活確認

/// GET / - 稼働中であることを返す
pub async fn home() -> &'static str {
    "CivicLens backend is running"
}
