use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{map_extension, validate_version, ExtensionInput, EXTENSION_COLUMNS};
use crate::auth::policy::{authorize, Action, Actor};
use crate::error::{is_unique_violation, CmsError, Result};
use crate::models::{Document, Extension};
use crate::utils::{non_empty, slugify};

fn find_plugin(conn: &Connection, slug: &str) -> Result<Extension> {
    let sql = format!("SELECT {EXTENSION_COLUMNS} FROM plugins WHERE slug = ?1");
    conn.query_row(&sql, params![slug], map_extension)
        .optional()?
        .ok_or_else(|| CmsError::not_found(format!("Plugin '{slug}'")))
}

pub fn list_plugins(conn: &Connection, actor: &Actor) -> Result<Vec<Extension>> {
    authorize(actor, Action::ManageExtensions, None)?;
    let sql = format!("SELECT {EXTENSION_COLUMNS} FROM plugins ORDER BY name");
    let mut stmt = conn.prepare(&sql)?;
    let plugins = stmt
        .query_map([], map_extension)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(plugins)
}

/// 登记插件，新插件默认停用
pub fn register_plugin(conn: &mut Connection, actor: &Actor, input: ExtensionInput) -> Result<Extension> {
    authorize(actor, Action::ManageExtensions, None)?;
    let name = non_empty(input.name.as_deref())
        .ok_or_else(|| CmsError::validation("name is required"))?;
    validate_version(input.version.as_deref())?;
    let slug = slugify(input.slug.as_deref().unwrap_or(&name));
    let settings = serde_json::to_string(&input.settings.unwrap_or_default())?;

    let tx = conn.transaction()?;
    let inserted = tx.execute(
        "INSERT INTO plugins (name, slug, version, description, author, is_active, settings, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
        params![name, slug, input.version, input.description, input.author, settings, Utc::now()],
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(CmsError::conflict("slug", format!("Plugin '{slug}' already exists")));
        }
        Err(e) => return Err(e.into()),
    }
    let plugin = find_plugin(&tx, &slug)?;
    tx.commit()?;

    info!(plugin = %slug, "登记插件");
    Ok(plugin)
}

/// 启用或停用插件，插件之间互不影响
pub fn set_plugin_active(conn: &mut Connection, actor: &Actor, slug: &str, active: bool) -> Result<Extension> {
    authorize(actor, Action::ManageExtensions, None)?;
    let tx = conn.transaction()?;
    find_plugin(&tx, slug)?;
    tx.execute(
        "UPDATE plugins SET is_active = ?1 WHERE slug = ?2",
        params![active, slug],
    )?;
    let plugin = find_plugin(&tx, slug)?;
    tx.commit()?;

    info!(plugin = slug, active, "切换插件状态");
    Ok(plugin)
}

pub fn update_plugin_settings(conn: &mut Connection, actor: &Actor, slug: &str, settings: Document) -> Result<Extension> {
    authorize(actor, Action::ManageExtensions, None)?;
    let tx = conn.transaction()?;
    find_plugin(&tx, slug)?;
    tx.execute(
        "UPDATE plugins SET settings = ?1 WHERE slug = ?2",
        params![serde_json::to_string(&settings)?, slug],
    )?;
    let plugin = find_plugin(&tx, slug)?;
    tx.commit()?;
    Ok(plugin)
}
