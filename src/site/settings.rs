use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::info;

use crate::auth::policy::{authorize, Action, Actor};
use crate::error::{CmsError, Result};
use crate::models::{Document, Setting};

fn map_setting(row: &Row<'_>) -> rusqlite::Result<Setting> {
    Ok(Setting {
        key: row.get(0)?,
        value: row.get(1)?,
        autoload: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

/// 字符串原样保存，其他值保存为 JSON 文本
fn setting_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn get_settings(conn: &Connection, actor: &Actor) -> Result<Vec<Setting>> {
    authorize(actor, Action::ManageSettings, None)?;
    let mut stmt = conn.prepare("SELECT key, value, autoload, updated_at FROM settings ORDER BY key")?;
    let settings = stmt
        .query_map([], map_setting)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(settings)
}

/// 批量写入设置，按键新增或覆盖
pub fn update_settings(conn: &mut Connection, actor: &Actor, values: &Document) -> Result<Vec<Setting>> {
    authorize(actor, Action::ManageSettings, None)?;
    if values.keys().any(|key| key.trim().is_empty()) {
        return Err(CmsError::validation("Setting key must not be empty"));
    }

    let tx = conn.transaction()?;
    let now = Utc::now();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO settings (key, value, autoload, created_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )?;
        for (key, value) in values {
            stmt.execute(params![key.trim(), setting_text(value), now])?;
        }
    }
    tx.commit()?;

    info!(count = values.len(), "更新站点设置");
    get_settings(conn, actor)
}

/// 自动加载的设置，公开给前端
pub fn site_settings(conn: &Connection) -> Result<BTreeMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings WHERE autoload = 1")?;
    let map = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(map)
}

/// 评论是否需要审核，取自 `comment_moderation` 设置
///
/// 设置缺失或无法识别时使用 `default`。
pub fn comment_moderation(conn: &Connection, default: bool) -> Result<bool> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = 'comment_moderation'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let moderated = match value.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => false,
        _ => default,
    };
    Ok(moderated)
}
