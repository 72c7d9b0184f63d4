use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AppState, AuthUser};
use crate::comments::{
    self, BulkAction, CommentFilter, CommentUpdate, NewComment, PostCommentCount,
};
use crate::error::{CmsError, Result};
use crate::site::settings;
use crate::models::{Comment, CommentStatus, CommentThread};

pub(super) async fn thread(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Value>> {
    let thread = state
        .db
        .call(move |conn| comments::comment_thread(conn, &slug))
        .await?;
    Ok(Json(json!({ "comments": thread, "total": thread.len() })))
}

pub(super) async fn submit(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(input): Json<NewComment>,
) -> Result<(StatusCode, Json<Value>)> {
    let moderated_by_default = !state.config.comments.auto_approve;
    let comment = state
        .db
        .call(move |conn| {
            let moderated = settings::comment_moderation(conn, moderated_by_default)?;
            comments::submit_comment(conn, &slug, input, !moderated)
        })
        .await?;
    let message = if comment.status == CommentStatus::Approved {
        "Comment posted successfully"
    } else {
        "Comment submitted and awaiting moderation"
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": message, "comment": comment })),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CommentQuery {
    status: Option<String>,
    post_id: Option<i64>,
    search: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

pub(super) async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CommentQuery>,
) -> Result<Json<Value>> {
    let status: Option<CommentStatus> = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(text) => Some(text.parse().map_err(CmsError::Validation)?),
    };
    let filter = CommentFilter {
        status,
        post_id: query.post_id,
        search: query.search,
    };
    let page = state.pagination(query.page, query.per_page);
    let actor = user.actor();
    let (comments, stats) = state
        .db
        .call(move |conn| comments::list_comments(conn, &actor, &filter, page))
        .await?;

    let mut body = comments.into_json("comments");
    if let Value::Object(map) = &mut body {
        map.insert("stats".to_string(), serde_json::to_value(stats)?);
    }
    Ok(Json(body))
}

pub(super) async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<CommentUpdate>,
) -> Result<Json<Comment>> {
    let actor = user.actor();
    let comment = state
        .db
        .call(move |conn| comments::update_comment(conn, &actor, id, input))
        .await?;
    Ok(Json(comment))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let actor = user.actor();
    let deleted = state
        .db
        .call(move |conn| comments::delete_comment(conn, &actor, id))
        .await?;
    Ok(Json(json!({ "message": "Comment deleted successfully", "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
pub(super) struct ReplyRequest {
    #[serde(default)]
    content: String,
}

pub(super) async fn reply(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ReplyRequest>,
) -> Result<(StatusCode, Json<CommentThread>)> {
    let reply = state
        .db
        .call(move |conn| comments::reply_to_comment(conn, &user, id, &req.content))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CommentThread {
            comment: reply,
            replies: Vec::new(),
            replies_count: 0,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub(super) struct BulkRequest {
    #[serde(default)]
    comment_ids: Vec<i64>,
    #[serde(default)]
    action: String,
}

pub(super) async fn bulk(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<BulkRequest>,
) -> Result<Json<Value>> {
    let action: BulkAction = req.action.parse()?;
    let actor = user.actor();
    let ids = req.comment_ids;
    let affected = state
        .db
        .call(move |conn| comments::bulk_action(conn, &actor, &ids, action))
        .await?;
    Ok(Json(json!({
        "message": format!("Bulk {action} completed"),
        "affected": affected,
    })))
}

pub(super) async fn posts_with_comments(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<PostCommentCount>>> {
    let actor = user.actor();
    let posts = state
        .db
        .call(move |conn| comments::posts_with_comments(conn, &actor))
        .await?;
    Ok(Json(posts))
}
