use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::{AppState, AuthUser};
use crate::error::{CmsError, Result};
use crate::media::{self, MediaMeta};
use crate::models::{FileType, Media};

#[derive(Debug, Default, Deserialize)]
pub(super) struct MediaQuery {
    file_type: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

pub(super) async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<MediaQuery>,
) -> Result<Json<Value>> {
    let file_type: Option<FileType> = match query.file_type.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(text) => Some(text.parse().map_err(CmsError::Validation)?),
    };
    let page = state.pagination(query.page, query.per_page);
    let actor = user.actor();
    let list = state
        .db
        .call(move |conn| media::list_media(conn, &actor, file_type, page))
        .await?;
    Ok(Json(list.into_json("media")))
}

/// 上传文件：`file` 字段为文件内容，`title`、`alt_text`、`caption`、`description` 为可选描述
pub(super) async fn upload(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Media>)> {
    let mut file = None;
    let mut meta = MediaMeta::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CmsError::validation(format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| CmsError::validation(format!("Failed to read file: {e}")))?;
                file = Some((filename, content_type, data));
            }
            "title" | "alt_text" | "caption" | "description" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| CmsError::validation(format!("Failed to read field: {e}")))?;
                let slot = match name.as_str() {
                    "title" => &mut meta.title,
                    "alt_text" => &mut meta.alt_text,
                    "caption" => &mut meta.caption,
                    _ => &mut meta.description,
                };
                *slot = Some(text);
            }
            _ => {}
        }
    }

    let (filename, content_type, data) =
        file.ok_or_else(|| CmsError::validation("No file provided"))?;
    let stored = state.media.save(&filename, &data).await?;

    let actor = user.actor();
    let record = stored.clone();
    let saved = state
        .db
        .call(move |conn| media::record_upload(conn, &actor, &record, content_type, meta))
        .await;
    match saved {
        Ok(media) => Ok((StatusCode::CREATED, Json(media))),
        Err(e) => {
            warn!(error = %e, "记录上传失败，删除已保存的文件");
            state.media.remove(&stored.relative_path).await;
            Err(e)
        }
    }
}

pub(super) async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(meta): Json<MediaMeta>,
) -> Result<Json<Media>> {
    let actor = user.actor();
    let updated = state
        .db
        .call(move |conn| media::update_media(conn, &actor, id, meta))
        .await?;
    Ok(Json(updated))
}

/// 删除记录后尽力删除文件，文件删除失败不影响结果
pub(super) async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let actor = user.actor();
    let removed = state
        .db
        .call(move |conn| media::delete_media(conn, &actor, id))
        .await?;
    state.media.remove(&removed.file_path).await;
    Ok(Json(json!({ "message": "Media deleted successfully" })))
}
