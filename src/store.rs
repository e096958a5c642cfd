//! 分類結果のレポートを保存する SQLite テーブル
//!
//! 追記のみ。更新・削除はしない。

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// 保存済みのレポート
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportRecord {
    pub id: i64,
    /// クライアントのファイル名（表示用、サニタイズ済み）
    pub filename: String,
    /// サーバー側の保存名
    pub stored_as: String,
    pub prediction: String,
    pub confidence: Option<f64>,
    pub timestamp: String,
}

/// 挿入前のレポート
#[derive(Debug, Clone)]
pub struct NewReport {
    pub filename: String,
    pub stored_as: String,
    pub prediction: String,
    pub confidence: Option<f64>,
    pub timestamp: String,
}

#[derive(Clone)]
pub struct ReportStore {
    conn: Arc<Mutex<Connection>>,
}

impl ReportStore {
    /// ファイルを開き、テーブルが無ければ作る
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        Self::from_connection(conn)
    }

    /// テスト用のインメモリ DB
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // AUTOINCREMENT で id の再利用を防ぐ
        conn.execute(
            "CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                stored_as TEXT NOT NULL,
                prediction TEXT NOT NULL,
                confidence REAL,
                timestamp TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create reports table")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("report database lock poisoned"))
    }

    /// 1件追加して id を返す
    pub fn insert(&self, report: &NewReport) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reports (filename, stored_as, prediction, confidence, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                report.filename,
                report.stored_as,
                report.prediction,
                report.confidence,
                report.timestamp
            ],
        )
        .context("Failed to insert report")?;
        Ok(conn.last_insert_rowid())
    }

    /// 全件を新しい順に返す
    pub fn list(&self) -> Result<Vec<ReportRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, filename, stored_as, prediction, confidence, timestamp
             FROM reports ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ReportRecord {
                id: row.get(0)?,
                filename: row.get(1)?,
                stored_as: row.get(2)?,
                prediction: row.get(3)?,
                confidence: row.get(4)?,
                timestamp: row.get(5)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, prediction: &str) -> NewReport {
        NewReport {
            filename: name.to_string(),
            stored_as: format!("{}.png", name),
            prediction: prediction.to_string(),
            confidence: Some(0.9),
            timestamp: chrono::Local::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_insert_and_list_newest_first() {
        let store = ReportStore::open_in_memory().unwrap();
        let first = store.insert(&report("a", "Garbage")).unwrap();
        let second = store.insert(&report("b", "Pothole")).unwrap();
        let third = store.insert(&report("c", "Water Leakage")).unwrap();
        assert!(first < second && second < third);

        let records = store.list().unwrap();
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![third, second, first]);
        assert_eq!(records[0].filename, "c");
        assert_eq!(records[2].prediction, "Garbage");
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_empty_store() {
        let store = ReportStore::open_in_memory().unwrap();
        assert!(store.list().unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("reports.db");

        let id = {
            let store = ReportStore::open(&path).unwrap();
            store.insert(&report("pothole.jpg", "Pothole")).unwrap()
        };

        let store = ReportStore::open(&path).unwrap();
        let records = store.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].stored_as, "pothole.jpg.png");
    }

    #[test]
    fn test_clones_share_connection() {
        let store = ReportStore::open_in_memory().unwrap();
        let clone = store.clone();
        clone.insert(&report("x", "Garbage")).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }
}
