//! 备份与恢复
//!
//! 归档是 gzip 压缩的 JSON 文档，包含所有表的行（列名到值）以及上传目录下的所有文件
//! （相对路径加 base64 内容）。恢复时保留主键，因此备份再恢复得到完全相同的数据。

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::auth::policy::{authorize, Action, Actor};
use crate::db::schema::TABLES;
use crate::error::{CmsError, Result};
use crate::media::MediaStore;

/// 归档格式版本
pub const FORMAT_VERSION: u32 = 1;

pub type Row = Map<String, Value>;

/// 备份归档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub tables: BTreeMap<String, Vec<Row>>,
    pub files: Vec<ArchivedFile>,
}

/// 上传目录中的一个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedFile {
    /// 相对上传目录的路径，使用 `/` 分隔
    pub path: String,
    /// base64 编码的文件内容
    pub data: String,
}

/// 恢复结果
#[derive(Debug, Clone, Serialize)]
pub struct RestoreSummary {
    pub rows: usize,
    pub files: usize,
    /// 恢复前自动生成的安全备份
    pub safety_backup: String,
}

/// 下载时使用的文件名
pub fn backup_file_name() -> String {
    format!("cms-backup-{}.json.gz", Utc::now().format("%Y%m%d-%H%M%S"))
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn dump_table(conn: &Connection, table: &str) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {table} ORDER BY rowid"))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;
    let mut dumped = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (i, column) in columns.iter().enumerate() {
            record.insert(column.clone(), to_json(row.get_ref(i)?));
        }
        dumped.push(record);
    }
    Ok(dumped)
}

fn collect_files(root: &Path) -> Result<Vec<ArchivedFile>> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| CmsError::Internal(format!("walk upload dir: {e}")))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| CmsError::Internal(e.to_string()))?;
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(ArchivedFile {
            path,
            data: STANDARD.encode(fs::read(entry.path())?),
        });
    }
    Ok(files)
}

/// 生成当前数据的快照
pub fn snapshot(conn: &Connection, uploads: &MediaStore) -> Result<Archive> {
    let mut tables = BTreeMap::new();
    for table in TABLES {
        tables.insert(table.to_string(), dump_table(conn, table)?);
    }
    Ok(Archive {
        version: FORMAT_VERSION,
        created_at: Utc::now(),
        tables,
        files: collect_files(uploads.root())?,
    })
}

/// 压缩编码归档
pub fn encode(archive: &Archive) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, archive)?;
    encoder.flush()?;
    Ok(encoder.finish()?)
}

/// 解码并校验归档
pub fn decode(bytes: &[u8]) -> Result<Archive> {
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| CmsError::validation(format!("Invalid backup archive: {e}")))?;
    let archive: Archive = serde_json::from_slice(&json)
        .map_err(|e| CmsError::validation(format!("Invalid backup archive: {e}")))?;

    if archive.version != FORMAT_VERSION {
        return Err(CmsError::validation(format!(
            "Unsupported backup version {} (expected {FORMAT_VERSION})",
            archive.version
        )));
    }
    if let Some(unknown) = archive.tables.keys().find(|t| !TABLES.contains(&t.as_str())) {
        return Err(CmsError::validation(format!("Unknown table '{unknown}' in backup")));
    }
    for file in &archive.files {
        STANDARD
            .decode(&file.data)
            .map_err(|e| CmsError::validation(format!("Corrupt file '{}': {e}", file.path)))?;
    }
    Ok(archive)
}

/// 导出备份（管理员）
pub fn export_backup(conn: &Connection, actor: &Actor, uploads: &MediaStore) -> Result<Vec<u8>> {
    authorize(actor, Action::Backup, None)?;
    let archive = snapshot(conn, uploads)?;
    let bytes = encode(&archive)?;
    info!(files = archive.files.len(), size = bytes.len(), "导出备份");
    Ok(bytes)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

fn insert_rows(conn: &Connection, table: &str, rows: &[Row]) -> Result<usize> {
    let known = table_columns(conn, table)?;
    for row in rows {
        let columns: Vec<&String> = row.keys().collect();
        if let Some(bad) = columns.iter().find(|c| !known.contains(c)) {
            return Err(CmsError::validation(format!("Unknown column '{table}.{bad}' in backup")));
        }
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let names = columns
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("INSERT INTO {table} ({names}) VALUES ({placeholders})");
        conn.prepare_cached(&sql)?
            .execute(params_from_iter(row.values().map(to_sql)))?;
    }
    Ok(rows.len())
}

fn replace_rows(conn: &mut Connection, archive: &Archive) -> Result<usize> {
    let tx = conn.transaction()?;
    tx.pragma_update(None, "defer_foreign_keys", "ON")?;
    for table in TABLES.iter().rev() {
        tx.execute(&format!("DELETE FROM {table}"), [])?;
    }
    let mut rows = 0;
    for table in TABLES {
        if let Some(table_rows) = archive.tables.get(*table) {
            rows += insert_rows(&tx, table, table_rows)?;
        }
    }
    tx.commit()?;
    Ok(rows)
}

fn replace_files(uploads: &MediaStore, files: &[ArchivedFile]) -> Result<usize> {
    let root = uploads.root();
    // 先校验全部路径，再清空目录
    let mut targets = Vec::with_capacity(files.len());
    for file in files {
        let path = uploads.resolve(&file.path)?;
        let data = STANDARD
            .decode(&file.data)
            .map_err(|e| CmsError::validation(format!("Corrupt file '{}': {e}", file.path)))?;
        targets.push((path, data));
    }

    if root.exists() {
        fs::remove_dir_all(root)?;
    }
    fs::create_dir_all(root)?;
    for (path, data) in &targets {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        debug!(path = %path.display(), "恢复文件");
    }
    Ok(targets.len())
}

/// 从归档恢复（管理员）。恢复前先把当前数据写入备份目录作为安全副本
pub fn import_backup(
    conn: &mut Connection,
    actor: &Actor,
    uploads: &MediaStore,
    backup_dir: &Path,
    bytes: &[u8],
) -> Result<RestoreSummary> {
    authorize(actor, Action::Backup, None)?;
    let archive = decode(bytes)?;

    fs::create_dir_all(backup_dir)?;
    let safety_path = backup_dir.join(format!(
        "pre-restore-{}.json.gz",
        Utc::now().format("%Y%m%d-%H%M%S-%3f")
    ));
    let current = encode(&snapshot(conn, uploads)?)?;
    fs::write(&safety_path, current)?;
    info!(path = %safety_path.display(), "已写入恢复前的安全备份");

    let rows = replace_rows(conn, &archive)?;
    let files = match replace_files(uploads, &archive.files) {
        Ok(files) => files,
        Err(e) => {
            warn!(error = %e, "恢复上传文件失败，可从安全备份还原");
            return Err(e);
        }
    };

    info!(rows, files, "备份已恢复");
    Ok(RestoreSummary {
        rows,
        files,
        safety_backup: safety_path.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::posts::{create_post, delete_post};
    use crate::content::PostInput;
    use crate::db::Database;
    use crate::models::{Config, Role};
    use crate::users::bootstrap;

    const ADMIN: Actor = Actor { id: 1, role: Role::Admin };

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"not gzip"), Err(CmsError::Validation(_))));

        let mut archive = Archive {
            version: FORMAT_VERSION,
            created_at: Utc::now(),
            tables: BTreeMap::new(),
            files: Vec::new(),
        };
        archive.tables.insert("sqlite_master".into(), Vec::new());
        let bytes = encode(&archive).unwrap();
        assert!(matches!(decode(&bytes), Err(CmsError::Validation(_))));
    }

    #[test]
    fn test_backup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = MediaStore::new(dir.path().join("uploads"), 1024).unwrap();
        let backups = dir.path().join("backups");
        fs::create_dir_all(uploads.root().join("images")).unwrap();
        fs::write(uploads.root().join("images/a.png"), [0u8, 159, 146, 150]).unwrap();

        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            bootstrap(conn, &Config::default())?;
            let post = create_post(conn, &ADMIN, PostInput {
                title: Some("Keep me".into()),
                content: Some("body".into()),
                tags: Some(vec!["rust".into()]),
                ..PostInput::default()
            })?;
            let before = snapshot(conn, &uploads)?;
            let bytes = export_backup(conn, &ADMIN, &uploads)?;

            delete_post(conn, &ADMIN, post.post.id)?;
            fs::write(uploads.root().join("images/a.png"), b"changed")?;
            fs::write(uploads.root().join("stray.txt"), b"stray")?;

            let summary = import_backup(conn, &ADMIN, &uploads, &backups, &bytes)?;
            assert_eq!(summary.files, 1);
            assert!(Path::new(&summary.safety_backup).exists());

            let after = snapshot(conn, &uploads)?;
            assert_eq!(after.tables, before.tables);
            assert_eq!(after.files, before.files);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_backup_requires_admin() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = MediaStore::new(dir.path().to_path_buf(), 1024).unwrap();
        let db = Database::open_in_memory().unwrap();
        let editor = Actor { id: 2, role: Role::Editor };
        db.with_conn(|conn| {
            let err = export_backup(conn, &editor, &uploads).unwrap_err();
            assert!(matches!(err, CmsError::Forbidden(_)));
            Ok(())
        })
        .unwrap();
    }
}
