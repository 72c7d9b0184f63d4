use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AppState, AuthUser};
use crate::backup::{self, RestoreSummary};
use crate::error::{CmsError, Result};
use crate::models::{Document, Extension};
use crate::site::dashboard::{self, Dashboard};
use crate::site::themes::{self, ActiveTheme};
use crate::site::{plugins, settings, ExtensionInput};

/// 前端启动时读取：自动加载的设置和当前主题
pub(super) async fn site_info(State(state): State<AppState>) -> Result<Json<Value>> {
    let (settings, theme) = state
        .db
        .call(|conn| Ok((settings::site_settings(conn)?, themes::active_theme(conn)?)))
        .await?;
    Ok(Json(json!({ "settings": settings, "theme": theme })))
}

pub(super) async fn get_settings(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<BTreeMap<String, String>>> {
    let actor = user.actor();
    let list = state
        .db
        .call(move |conn| settings::get_settings(conn, &actor))
        .await?;
    Ok(Json(list.into_iter().map(|s| (s.key, s.value)).collect()))
}

pub(super) async fn update_settings(
    State(state): State<AppState>,
    user: AuthUser,
    Json(values): Json<Document>,
) -> Result<Json<BTreeMap<String, String>>> {
    let actor = user.actor();
    let list = state
        .db
        .call(move |conn| settings::update_settings(conn, &actor, &values))
        .await?;
    Ok(Json(list.into_iter().map(|s| (s.key, s.value)).collect()))
}

pub(super) async fn dashboard(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Dashboard>> {
    let actor = user.actor();
    let board = state
        .db
        .call(move |conn| dashboard::dashboard(conn, &actor))
        .await?;
    Ok(Json(board))
}

pub(super) async fn list_themes(State(state): State<AppState>) -> Result<Json<Vec<Extension>>> {
    let list = state.db.call(|conn| themes::list_themes(conn)).await?;
    Ok(Json(list))
}

pub(super) async fn active_theme(State(state): State<AppState>) -> Result<Json<ActiveTheme>> {
    let theme = state.db.call(|conn| themes::active_theme(conn)).await?;
    Ok(Json(theme))
}

pub(super) async fn activate_theme(
    State(state): State<AppState>,
    user: AuthUser,
    Path(slug): Path<String>,
) -> Result<Json<Extension>> {
    let actor = user.actor();
    let theme = state
        .db
        .call(move |conn| themes::activate_theme(conn, &actor, &slug))
        .await?;
    Ok(Json(theme))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ThemeSettingsRequest {
    #[serde(default)]
    settings: Document,
    version: Option<String>,
}

pub(super) async fn update_theme_settings(
    State(state): State<AppState>,
    user: AuthUser,
    Path(slug): Path<String>,
    Json(req): Json<ThemeSettingsRequest>,
) -> Result<Json<Extension>> {
    let actor = user.actor();
    let theme = state
        .db
        .call(move |conn| {
            themes::update_theme_settings(conn, &actor, &slug, req.settings, req.version.as_deref())
        })
        .await?;
    Ok(Json(theme))
}

pub(super) async fn list_plugins(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Extension>>> {
    let actor = user.actor();
    let list = state
        .db
        .call(move |conn| plugins::list_plugins(conn, &actor))
        .await?;
    Ok(Json(list))
}

pub(super) async fn register_plugin(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<ExtensionInput>,
) -> Result<(StatusCode, Json<Extension>)> {
    let actor = user.actor();
    let plugin = state
        .db
        .call(move |conn| plugins::register_plugin(conn, &actor, input))
        .await?;
    Ok((StatusCode::CREATED, Json(plugin)))
}

async fn set_plugin_active(state: AppState, user: AuthUser, slug: String, active: bool) -> Result<Json<Extension>> {
    let actor = user.actor();
    let plugin = state
        .db
        .call(move |conn| plugins::set_plugin_active(conn, &actor, &slug, active))
        .await?;
    Ok(Json(plugin))
}

pub(super) async fn activate_plugin(
    State(state): State<AppState>,
    user: AuthUser,
    Path(slug): Path<String>,
) -> Result<Json<Extension>> {
    set_plugin_active(state, user, slug, true).await
}

pub(super) async fn deactivate_plugin(
    State(state): State<AppState>,
    user: AuthUser,
    Path(slug): Path<String>,
) -> Result<Json<Extension>> {
    set_plugin_active(state, user, slug, false).await
}

pub(super) async fn update_plugin_settings(
    State(state): State<AppState>,
    user: AuthUser,
    Path(slug): Path<String>,
    Json(settings): Json<Document>,
) -> Result<Json<Extension>> {
    let actor = user.actor();
    let plugin = state
        .db
        .call(move |conn| plugins::update_plugin_settings(conn, &actor, &slug, settings))
        .await?;
    Ok(Json(plugin))
}

/// 下载备份归档
pub(super) async fn download_backup(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let actor = user.actor();
    let media = state.media.clone();
    let bytes = state
        .db
        .call(move |conn| backup::export_backup(conn, &actor, &media))
        .await?;
    let disposition = format!("attachment; filename=\"{}\"", backup::backup_file_name());
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

/// 上传归档并恢复，`file` 字段为归档内容
pub(super) async fn restore_backup(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<RestoreSummary>> {
    let mut archive: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CmsError::validation(format!("Multipart error: {e}")))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| CmsError::validation(format!("Failed to read file: {e}")))?;
            archive = Some(data);
        }
    }
    let archive = archive.ok_or_else(|| CmsError::validation("No backup file provided"))?;

    let actor = user.actor();
    let media = state.media.clone();
    let backup_dir = state.config.backup_dir.clone();
    let summary = state
        .db
        .call(move |conn| backup::import_backup(conn, &actor, &media, &backup_dir, &archive))
        .await?;
    Ok(Json(summary))
}
