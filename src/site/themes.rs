use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

use super::{map_extension, validate_version, EXTENSION_COLUMNS};
use crate::auth::policy::{authorize, Action, Actor};
use crate::error::{CmsError, Result};
use crate::models::{Document, Extension};

/// 内置主题的别名
pub const BUILTIN_THEMES: &[&str] = &["default", "dark", "minimal", "blog"];

const DEFAULT_THEME: &str = "default";
const BUILTIN_VERSION: &str = "1.0.0";
const BUILTIN_AUTHOR: &str = "CMS Team";

/// 当前启用的主题（前端读取）
#[derive(Debug, Clone, Serialize)]
pub struct ActiveTheme {
    pub slug: String,
    pub name: String,
    pub settings: Document,
}

fn builtin_name(slug: &str) -> String {
    let mut chars = slug.chars();
    let title: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    format!("{title} Theme")
}

fn find_theme(conn: &Connection, slug: &str) -> Result<Option<Extension>> {
    let sql = format!("SELECT {EXTENSION_COLUMNS} FROM themes WHERE slug = ?1");
    Ok(conn.query_row(&sql, params![slug], map_extension).optional()?)
}

pub fn list_themes(conn: &Connection) -> Result<Vec<Extension>> {
    let sql = format!("SELECT {EXTENSION_COLUMNS} FROM themes ORDER BY name");
    let mut stmt = conn.prepare(&sql)?;
    let themes = stmt
        .query_map([], map_extension)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(themes)
}

/// 启用的主题，没有时返回内置默认主题
pub fn active_theme(conn: &Connection) -> Result<ActiveTheme> {
    let sql = format!("SELECT {EXTENSION_COLUMNS} FROM themes WHERE is_active = 1 ORDER BY id LIMIT 1");
    let theme = conn.query_row(&sql, [], map_extension).optional()?;
    Ok(match theme {
        Some(theme) => ActiveTheme {
            slug: theme.slug,
            name: theme.name,
            settings: theme.settings,
        },
        None => ActiveTheme {
            slug: DEFAULT_THEME.to_string(),
            name: builtin_name(DEFAULT_THEME),
            settings: Document::new(),
        },
    })
}

/// 启用主题：先停用全部，再启用目标，保证最多一个主题处于启用状态
pub fn activate_theme(conn: &mut Connection, actor: &Actor, slug: &str) -> Result<Extension> {
    authorize(actor, Action::ManageExtensions, None)?;
    let tx = conn.transaction()?;

    if find_theme(&tx, slug)?.is_none() {
        if !BUILTIN_THEMES.contains(&slug) {
            return Err(CmsError::not_found(format!("Theme '{slug}'")));
        }
        tx.execute(
            "INSERT INTO themes (name, slug, version, description, author, is_active, settings, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, '{}', ?6)",
            params![
                builtin_name(slug),
                slug,
                BUILTIN_VERSION,
                format!("Built-in {slug} theme"),
                BUILTIN_AUTHOR,
                Utc::now(),
            ],
        )?;
    }

    tx.execute("UPDATE themes SET is_active = 0", [])?;
    tx.execute("UPDATE themes SET is_active = 1 WHERE slug = ?1", params![slug])?;
    let theme = find_theme(&tx, slug)?.ok_or_else(|| CmsError::not_found("Theme"))?;
    tx.commit()?;

    info!(theme = slug, "启用主题");
    Ok(theme)
}

/// 替换主题设置；主题尚未登记时必须是内置主题
pub fn update_theme_settings(
    conn: &mut Connection,
    actor: &Actor,
    slug: &str,
    settings: Document,
    version: Option<&str>,
) -> Result<Extension> {
    authorize(actor, Action::ManageExtensions, None)?;
    validate_version(version)?;
    let tx = conn.transaction()?;

    let settings_text = serde_json::to_string(&settings)?;
    match find_theme(&tx, slug)? {
        Some(_) => {
            tx.execute(
                "UPDATE themes SET settings = ?1, version = COALESCE(?2, version) WHERE slug = ?3",
                params![settings_text, version, slug],
            )?;
        }
        None if BUILTIN_THEMES.contains(&slug) => {
            tx.execute(
                "INSERT INTO themes (name, slug, version, description, author, is_active, settings, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
                params![
                    builtin_name(slug),
                    slug,
                    version.unwrap_or(BUILTIN_VERSION),
                    format!("Built-in {slug} theme"),
                    BUILTIN_AUTHOR,
                    settings_text,
                    Utc::now(),
                ],
            )?;
        }
        None => return Err(CmsError::not_found(format!("Theme '{slug}'"))),
    }
    let theme = find_theme(&tx, slug)?.ok_or_else(|| CmsError::not_found("Theme"))?;
    tx.commit()?;
    Ok(theme)
}
