use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Deserializer};

use crate::error::Result;

pub mod markdown;

/// 无法生成别名时使用的占位值
pub const FALLBACK_SLUG: &str = "untitled";

/// 摘要长度（字符数）
pub const EXCERPT_LEN: usize = 150;

/// 从标题生成 URL 友好的别名，非 ASCII 字符会被音译
pub fn slugify(text: &str) -> String {
    let slug = slug::slugify(text);
    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// 在指定表中为 `base` 找到第一个未被占用的别名：`base`、`base-1`、`base-2` ...
///
/// `exclude_id` 用于更新时忽略记录自身。`table` 只接受内部常量。
pub fn unique_slug(
    conn: &Connection,
    table: &str,
    base: &str,
    exclude_id: Option<i64>,
) -> Result<String> {
    let sql = format!("SELECT id FROM {table} WHERE slug = ?1 AND id != ?2");
    let mut stmt = conn.prepare_cached(&sql)?;
    let exclude = exclude_id.unwrap_or(-1);

    let mut candidate = base.to_string();
    let mut counter = 1;
    while stmt
        .query_row(params![candidate, exclude], |row| row.get::<_, i64>(0))
        .optional()?
        .is_some()
    {
        candidate = format!("{base}-{counter}");
        counter += 1;
    }
    Ok(candidate)
}

/// 把搜索词包装成 `LIKE` 的包含模式并转义通配符，配合 `ESCAPE '\'` 使用
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// 从正文生成摘要：去掉标记后截取前 150 个字符
pub fn excerpt(content: &str) -> String {
    let text = markdown::plain_text(content);
    let text = text.trim();
    if text.chars().count() <= EXCERPT_LEN {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_LEN).collect();
    format!("{}...", cut.trim_end())
}

/// 去掉首尾空白，空字符串视为缺失
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// 区分“字段缺失”和“显式 null”：缺失为 `None`，null 为 `Some(None)`
///
/// 需要配合 `#[serde(default)]` 使用。
pub fn double_option<'de, T, D>(de: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}
