use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AppState, AuthUser};
use crate::auth::policy::{authorize, role_allows, Action};
use crate::content::categories::{self, CategoryInput, CategorySummary};
use crate::content::tags::{self, TagInput, TagSummary};
use crate::content::{posts, PostFilter, PostInput};
use crate::error::{CmsError, Result};
use crate::models::{Category, CategoryNode, PostRevision, PostStatus, PostType, PostView, Tag};

/// `all` 表示不过滤
const ALL: &str = "all";

#[derive(Debug, Default, Deserialize)]
pub(super) struct PostQuery {
    status: Option<String>,
    post_type: Option<String>,
    category_id: Option<i64>,
    author_id: Option<i64>,
    tag: Option<String>,
    search: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

fn parse_filter<T>(value: Option<&str>, default: T) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    match value.map(str::trim) {
        None | Some("") => Ok(Some(default)),
        Some(ALL) => Ok(None),
        Some(text) => text.parse().map(Some).map_err(CmsError::Validation),
    }
}

/// 文章列表。默认只列出已发布的文章；查看其他状态需要登录，非编辑只能看到自己的文章
pub(super) async fn list_posts(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Query(query): Query<PostQuery>,
) -> Result<Json<Value>> {
    let status = parse_filter(query.status.as_deref(), PostStatus::Published)?;
    let mut filter = PostFilter {
        status,
        post_type: parse_filter(query.post_type.as_deref(), PostType::Post)?,
        category_id: query.category_id,
        author_id: query.author_id,
        tag: query.tag,
        search: query.search,
    };
    if status != Some(PostStatus::Published) {
        let user = user.ok_or_else(|| CmsError::Unauthorized("Authentication required".to_string()))?;
        if !role_allows(user.0.role, Action::UpdatePost) {
            filter.author_id = Some(user.0.id);
        }
    }

    let page = state.pagination(query.page, query.per_page);
    let posts = state
        .db
        .call(move |conn| posts::list_posts(conn, &filter, page))
        .await?;
    Ok(Json(posts.into_json("posts")))
}

pub(super) async fn get_post(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<PostView>> {
    let post = state.db.call(move |conn| posts::get_post(conn, &key)).await?;
    Ok(Json(post))
}

pub(super) async fn create_post(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<PostInput>,
) -> Result<(StatusCode, Json<PostView>)> {
    let actor = user.actor();
    let post = state
        .db
        .call(move |conn| posts::create_post(conn, &actor, input))
        .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub(super) async fn update_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<PostInput>,
) -> Result<Json<PostView>> {
    let actor = user.actor();
    let post = state
        .db
        .call(move |conn| posts::update_post(conn, &actor, id, input))
        .await?;
    Ok(Json(post))
}

pub(super) async fn delete_post(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let actor = user.actor();
    state
        .db
        .call(move |conn| posts::delete_post(conn, &actor, id))
        .await?;
    Ok(Json(json!({ "message": "Post deleted successfully" })))
}

pub(super) async fn list_revisions(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<PostRevision>>> {
    let actor = user.actor();
    let revisions = state
        .db
        .call(move |conn| posts::list_revisions(conn, &actor, id))
        .await?;
    Ok(Json(revisions))
}

pub(super) async fn restore_revision(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, revision_id)): Path<(i64, i64)>,
) -> Result<Json<PostView>> {
    let actor = user.actor();
    let post = state
        .db
        .call(move |conn| posts::restore_revision(conn, &actor, id, revision_id))
        .await?;
    Ok(Json(post))
}

pub(super) async fn category_tree(State(state): State<AppState>) -> Result<Json<Vec<CategoryNode>>> {
    let tree = state.db.call(|conn| categories::category_tree(conn)).await?;
    Ok(Json(tree))
}

pub(super) async fn list_categories_admin(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<CategorySummary>>> {
    authorize(&user.actor(), Action::ManageTaxonomy, None)?;
    let list = state
        .db
        .call(|conn| categories::list_categories_admin(conn))
        .await?;
    Ok(Json(list))
}

pub(super) async fn create_category(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<CategoryInput>,
) -> Result<(StatusCode, Json<Category>)> {
    let actor = user.actor();
    let category = state
        .db
        .call(move |conn| categories::create_category(conn, &actor, input))
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub(super) async fn update_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<CategoryInput>,
) -> Result<Json<Category>> {
    let actor = user.actor();
    let category = state
        .db
        .call(move |conn| categories::update_category(conn, &actor, id, input))
        .await?;
    Ok(Json(category))
}

pub(super) async fn delete_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let actor = user.actor();
    state
        .db
        .call(move |conn| categories::delete_category(conn, &actor, id))
        .await?;
    Ok(Json(json!({ "message": "Category deleted successfully" })))
}

pub(super) async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<TagSummary>>> {
    let list = state.db.call(|conn| tags::list_tags(conn)).await?;
    Ok(Json(list))
}

pub(super) async fn create_tag(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<TagInput>,
) -> Result<(StatusCode, Json<Tag>)> {
    let actor = user.actor();
    let tag = state
        .db
        .call(move |conn| tags::create_tag(conn, &actor, input))
        .await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

pub(super) async fn update_tag(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<TagInput>,
) -> Result<Json<Tag>> {
    let actor = user.actor();
    let tag = state
        .db
        .call(move |conn| tags::update_tag(conn, &actor, id, input))
        .await?;
    Ok(Json(tag))
}

pub(super) async fn delete_tag(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let actor = user.actor();
    state
        .db
        .call(move |conn| tags::delete_tag(conn, &actor, id))
        .await?;
    Ok(Json(json!({ "message": "Tag deleted successfully" })))
}
