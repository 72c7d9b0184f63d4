use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Deserialize;
use tracing::{debug, info};

use super::categories::find_category;
use super::tags::{resolve_tags, tags_for_post};
use crate::auth::policy::{authorize, Action, Actor};
use crate::error::{is_unique_violation, CmsError, Result};
use crate::models::types::parse_document;
use crate::models::{
    AuthorProfile, DiscussionStatus, Document, Paginated, Pagination, Post, PostRevision,
    PostStatus, PostType, PostView,
};
use crate::utils::{double_option, escape_like, excerpt, non_empty, slugify, unique_slug};

/// 别名冲突时的最大重试次数
const SLUG_RETRIES: usize = 5;

/// 文章的创建/更新参数，缺省字段保持不变
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PostInput {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub featured_image: Option<String>,
    pub status: Option<String>,
    pub post_type: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub category_id: Option<Option<i64>>,
    pub comment_status: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub custom_fields: Option<Document>,
    pub tags: Option<Vec<String>>,
}

/// 列表过滤条件，`None` 表示不过滤
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub status: Option<PostStatus>,
    pub post_type: Option<PostType>,
    pub category_id: Option<i64>,
    pub author_id: Option<i64>,
    /// 标签别名
    pub tag: Option<String>,
    /// 标题或正文的子串
    pub search: Option<String>,
}

fn post_columns(with_content: bool) -> String {
    let content = if with_content { "p.content" } else { "NULL" };
    format!(
        "p.id, p.title, p.slug, {content}, p.excerpt, p.featured_image, p.status, p.post_type, \
         p.author_id, p.category_id, p.comment_status, p.view_count, p.meta_title, \
         p.meta_description, p.meta_keywords, p.custom_fields, p.published_at, p.created_at, \
         p.updated_at"
    )
}

fn map_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        content: row.get(3)?,
        excerpt: row.get(4)?,
        featured_image: row.get(5)?,
        status: row.get(6)?,
        post_type: row.get(7)?,
        author_id: row.get(8)?,
        category_id: row.get(9)?,
        comment_status: row.get(10)?,
        view_count: row.get(11)?,
        meta_title: row.get(12)?,
        meta_description: row.get(13)?,
        meta_keywords: row.get(14)?,
        custom_fields: parse_document(row.get(15)?),
        published_at: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

fn map_revision(row: &Row<'_>) -> rusqlite::Result<PostRevision> {
    Ok(PostRevision {
        id: row.get(0)?,
        post_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        excerpt: row.get(4)?,
        revision_type: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn author_profile(conn: &Connection, id: i64) -> Result<Option<AuthorProfile>> {
    let profile = conn
        .prepare_cached(
            "SELECT id, username, first_name, last_name, avatar_url, bio FROM users WHERE id = ?1",
        )?
        .query_row(params![id], |row| {
            Ok(AuthorProfile {
                id: row.get(0)?,
                username: row.get(1)?,
                first_name: row.get(2)?,
                last_name: row.get(3)?,
                avatar_url: row.get(4)?,
                bio: row.get(5)?,
            })
        })
        .optional()?;
    Ok(profile)
}

/// 补全作者、分类、标签和评论数
pub(crate) fn into_view(conn: &Connection, post: Post) -> Result<PostView> {
    let author = author_profile(conn, post.author_id)?;
    let category = match post.category_id {
        Some(id) => find_category(conn, id)?,
        None => None,
    };
    let tags = tags_for_post(conn, post.id)?;
    let comments_count = conn
        .prepare_cached("SELECT COUNT(*) FROM comments WHERE post_id = ?1 AND status = 'approved'")?
        .query_row(params![post.id], |row| row.get(0))?;
    Ok(PostView {
        post,
        author,
        category,
        tags,
        comments_count,
    })
}

pub fn find_post(conn: &Connection, id: i64) -> Result<Option<Post>> {
    let sql = format!("SELECT {} FROM posts p WHERE p.id = ?1", post_columns(true));
    Ok(conn.query_row(&sql, params![id], map_post).optional()?)
}

pub(crate) fn require_post(conn: &Connection, id: i64) -> Result<Post> {
    find_post(conn, id)?.ok_or_else(|| CmsError::not_found("Post"))
}

/// 按别名查找文章，不考虑分类可见性
pub(crate) fn find_post_by_slug(conn: &Connection, slug: &str) -> Result<Option<Post>> {
    let sql = format!("SELECT {} FROM posts p WHERE p.slug = ?1", post_columns(true));
    Ok(conn.query_row(&sql, params![slug], map_post).optional()?)
}

/// 文章列表。隐藏分类下的文章总是被排除，未分类的文章不受影响
pub fn list_posts(conn: &Connection, filter: &PostFilter, page: Pagination) -> Result<Paginated<PostView>> {
    let mut clauses = vec!["(p.category_id IS NULL OR c.is_visible = 1)".to_string()];
    let mut values: Vec<Value> = Vec::new();

    if let Some(status) = filter.status {
        values.push(Value::Text(status.as_str().to_string()));
        clauses.push(format!("p.status = ?{}", values.len()));
    }
    if let Some(post_type) = filter.post_type {
        values.push(Value::Text(post_type.as_str().to_string()));
        clauses.push(format!("p.post_type = ?{}", values.len()));
    }
    if let Some(category_id) = filter.category_id {
        values.push(Value::Integer(category_id));
        clauses.push(format!("p.category_id = ?{}", values.len()));
    }
    if let Some(author_id) = filter.author_id {
        values.push(Value::Integer(author_id));
        clauses.push(format!("p.author_id = ?{}", values.len()));
    }
    if let Some(tag) = non_empty(filter.tag.as_deref()) {
        values.push(Value::Text(tag));
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM post_tags pt JOIN tags t ON t.id = pt.tag_id
                     WHERE pt.post_id = p.id AND t.slug = ?{})",
            values.len()
        ));
    }
    if let Some(search) = non_empty(filter.search.as_deref()) {
        values.push(Value::Text(escape_like(&search)));
        let n = values.len();
        clauses.push(format!(
            "(p.title LIKE ?{n} ESCAPE '\\' OR p.content LIKE ?{n} ESCAPE '\\')"
        ));
    }

    let from = format!(
        "FROM posts p LEFT JOIN categories c ON c.id = p.category_id WHERE {}",
        clauses.join(" AND ")
    );
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {from}"),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let n = values.len();
    values.push(Value::Integer(page.per_page));
    values.push(Value::Integer(page.offset()));
    let sql = format!(
        "SELECT {} {from}
         ORDER BY p.published_at IS NULL, p.published_at DESC, p.id DESC
         LIMIT ?{} OFFSET ?{}",
        post_columns(false),
        n + 1,
        n + 2
    );
    let mut stmt = conn.prepare(&sql)?;
    let posts = stmt
        .query_map(params_from_iter(values.iter()), map_post)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let views = posts
        .into_iter()
        .map(|post| into_view(conn, post))
        .collect::<Result<Vec<_>>>()?;
    Ok(Paginated::new(views, total, page))
}

/// 最近创建的文章（不含正文）
pub fn recent_posts(conn: &Connection, limit: i64) -> Result<Vec<PostView>> {
    let sql = format!(
        "SELECT {} FROM posts p ORDER BY p.created_at DESC, p.id DESC LIMIT ?1",
        post_columns(false)
    );
    let mut stmt = conn.prepare(&sql)?;
    let posts = stmt
        .query_map(params![limit], map_post)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    posts.into_iter().map(|post| into_view(conn, post)).collect()
}

/// 按 ID 或别名获取文章并增加浏览次数。隐藏分类下的文章视为不存在
///
/// 纯数字的 `key` 先按 ID 查找，找不到再按别名查找（如标题为 "2024" 的文章）。
pub fn get_post(conn: &mut Connection, key: &str) -> Result<PostView> {
    let tx = conn.transaction()?;
    let by_id = match key.parse::<i64>() {
        Ok(id) if key.bytes().all(|b| b.is_ascii_digit()) => find_post(&tx, id)?,
        _ => None,
    };
    let post = match by_id {
        Some(post) => Some(post),
        None => find_post_by_slug(&tx, key)?,
    };
    let mut post = post.ok_or_else(|| CmsError::not_found("Post"))?;

    if let Some(category_id) = post.category_id {
        let visible = find_category(&tx, category_id)?
            .map(|c| c.is_visible)
            .unwrap_or(false);
        if !visible {
            return Err(CmsError::not_found("Post"));
        }
    }

    tx.execute(
        "UPDATE posts SET view_count = view_count + 1 WHERE id = ?1",
        params![post.id],
    )?;
    post.view_count += 1;
    let view = into_view(&tx, post)?;
    tx.commit()?;
    Ok(view)
}

fn parse_status(value: Option<&str>, default: PostStatus) -> Result<PostStatus> {
    match value {
        Some(s) => s.parse().map_err(CmsError::Validation),
        None => Ok(default),
    }
}

fn parse_post_type(value: Option<&str>, default: PostType) -> Result<PostType> {
    match value {
        Some(s) => s.parse().map_err(CmsError::Validation),
        None => Ok(default),
    }
}

fn parse_discussion(value: Option<&str>, default: DiscussionStatus) -> Result<DiscussionStatus> {
    match value {
        Some(s) => s.parse().map_err(CmsError::Validation),
        None => Ok(default),
    }
}

fn ensure_category(conn: &Connection, category_id: Option<i64>) -> Result<()> {
    if let Some(id) = category_id {
        if find_category(conn, id)?.is_none() {
            return Err(CmsError::validation(format!("Category {id} does not exist")));
        }
    }
    Ok(())
}

fn set_tags(conn: &Connection, post_id: i64, names: &[String]) -> Result<()> {
    conn.execute("DELETE FROM post_tags WHERE post_id = ?1", params![post_id])?;
    let mut stmt = conn.prepare_cached("INSERT INTO post_tags (post_id, tag_id) VALUES (?1, ?2)")?;
    for tag_id in resolve_tags(conn, names)? {
        stmt.execute(params![post_id, tag_id])?;
    }
    Ok(())
}

fn write_revision(conn: &Connection, post: &Post, created_by: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO post_revisions (post_id, title, content, excerpt, revision_type, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, 'revision', ?5, ?6)",
        params![
            post.id,
            post.title,
            post.content.as_deref().unwrap_or_default(),
            post.excerpt,
            created_by,
            Utc::now(),
        ],
    )?;
    Ok(())
}

fn is_slug_conflict(err: &CmsError) -> bool {
    matches!(err, CmsError::Sqlite(e) if is_unique_violation(e))
}

/// 创建文章：生成唯一别名、关联标签并写入首个修订，全部在一个事务内完成
pub fn create_post(conn: &mut Connection, actor: &Actor, input: PostInput) -> Result<PostView> {
    authorize(actor, Action::CreatePost, None)?;
    let title = non_empty(input.title.as_deref())
        .ok_or_else(|| CmsError::validation("title is required"))?;
    let status = parse_status(input.status.as_deref(), PostStatus::Draft)?;
    let post_type = parse_post_type(input.post_type.as_deref(), PostType::Post)?;
    let comment_status = parse_discussion(input.comment_status.as_deref(), DiscussionStatus::Open)?;
    let content = input.content.unwrap_or_default();
    let summary = non_empty(input.excerpt.as_deref()).unwrap_or_else(|| excerpt(&content));
    let category_id = input.category_id.flatten();
    let base_slug = slugify(non_empty(input.slug.as_deref()).as_deref().unwrap_or(&title));
    let custom_fields = serde_json::to_string(&input.custom_fields.unwrap_or_default())?;
    let now = Utc::now();
    let published_at = (status == PostStatus::Published).then_some(now);

    let tx = conn.transaction()?;
    ensure_category(&tx, category_id)?;

    let mut attempt = 0;
    let id = loop {
        let slug = unique_slug(&tx, "posts", &base_slug, None)?;
        let inserted = tx.execute(
            "INSERT INTO posts (title, slug, content, excerpt, featured_image, status, post_type,
                 author_id, category_id, comment_status, view_count, meta_title, meta_description,
                 meta_keywords, custom_fields, published_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?13, ?14, ?15, ?16, ?16)",
            params![
                title,
                slug,
                content,
                summary,
                input.featured_image,
                status,
                post_type,
                actor.id,
                category_id,
                comment_status,
                input.meta_title,
                input.meta_description,
                input.meta_keywords,
                custom_fields,
                published_at,
                now,
            ],
        );
        match inserted.map_err(CmsError::from) {
            Ok(_) => break tx.last_insert_rowid(),
            Err(e) if is_slug_conflict(&e) && attempt < SLUG_RETRIES => {
                attempt += 1;
                debug!(slug = %slug, attempt, "别名冲突，重试");
            }
            Err(e) => return Err(e),
        }
    };

    if let Some(tags) = &input.tags {
        set_tags(&tx, id, tags)?;
    }
    let post = require_post(&tx, id)?;
    write_revision(&tx, &post, actor.id)?;
    let view = into_view(&tx, post)?;
    tx.commit()?;

    info!(post_id = id, slug = %view.post.slug, "创建文章");
    Ok(view)
}

/// 在已打开的事务中应用更新：先写入更新前的修订快照，再修改字段
fn apply_update(conn: &Connection, actor: &Actor, mut post: Post, input: PostInput) -> Result<()> {
    write_revision(conn, &post, actor.id)?;

    let old_content = post.content.clone().unwrap_or_default();
    let mut new_slug: Option<String> = None;

    if let Some(title) = input.title.as_deref() {
        let title = non_empty(Some(title)).ok_or_else(|| CmsError::validation("title cannot be empty"))?;
        if title != post.title {
            let candidate = slugify(&title);
            if candidate != post.slug {
                new_slug = Some(candidate);
            }
        }
        post.title = title;
    }
    if let Some(slug) = non_empty(input.slug.as_deref()) {
        let candidate = slugify(&slug);
        new_slug = (candidate != post.slug).then_some(candidate);
    }
    if let Some(content) = input.content {
        post.content = Some(content);
    }
    let content = post.content.clone().unwrap_or_default();
    match input.excerpt {
        Some(text) => post.excerpt = non_empty(Some(text.as_str())).unwrap_or_else(|| excerpt(&content)),
        // 摘要是自动生成的，随正文更新
        None if content != old_content && post.excerpt == excerpt(&old_content) => {
            post.excerpt = excerpt(&content);
        }
        None => {}
    }
    if input.featured_image.is_some() {
        post.featured_image = input.featured_image;
    }
    post.status = parse_status(input.status.as_deref(), post.status)?;
    post.post_type = parse_post_type(input.post_type.as_deref(), post.post_type)?;
    post.comment_status = parse_discussion(input.comment_status.as_deref(), post.comment_status)?;
    if let Some(category_id) = input.category_id {
        ensure_category(conn, category_id)?;
        post.category_id = category_id;
    }
    if input.meta_title.is_some() {
        post.meta_title = input.meta_title;
    }
    if input.meta_description.is_some() {
        post.meta_description = input.meta_description;
    }
    if input.meta_keywords.is_some() {
        post.meta_keywords = input.meta_keywords;
    }
    if let Some(fields) = input.custom_fields {
        post.custom_fields = fields;
    }
    // 首次发布时记录时间，之后不再覆盖
    if post.status == PostStatus::Published && post.published_at.is_none() {
        post.published_at = Some(Utc::now());
    }

    let custom_fields = serde_json::to_string(&post.custom_fields)?;
    let mut attempt = 0;
    loop {
        if let Some(base) = &new_slug {
            post.slug = unique_slug(conn, "posts", base, Some(post.id))?;
        }
        let updated = conn.execute(
            "UPDATE posts SET title = ?1, slug = ?2, content = ?3, excerpt = ?4, featured_image = ?5,
                 status = ?6, post_type = ?7, category_id = ?8, comment_status = ?9, meta_title = ?10,
                 meta_description = ?11, meta_keywords = ?12, custom_fields = ?13, published_at = ?14,
                 updated_at = ?15
             WHERE id = ?16",
            params![
                post.title,
                post.slug,
                content,
                post.excerpt,
                post.featured_image,
                post.status,
                post.post_type,
                post.category_id,
                post.comment_status,
                post.meta_title,
                post.meta_description,
                post.meta_keywords,
                custom_fields,
                post.published_at,
                Utc::now(),
                post.id,
            ],
        );
        match updated.map_err(CmsError::from) {
            Ok(_) => break,
            Err(e) if is_slug_conflict(&e) && new_slug.is_some() && attempt < SLUG_RETRIES => {
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(tags) = &input.tags {
        set_tags(conn, post.id, tags)?;
    }
    Ok(())
}

/// 更新文章。编辑和管理员可以修改任何文章，作者只能修改自己的
pub fn update_post(conn: &mut Connection, actor: &Actor, id: i64, input: PostInput) -> Result<PostView> {
    let tx = conn.transaction()?;
    let post = require_post(&tx, id)?;
    authorize(actor, Action::UpdatePost, Some(post.author_id))?;
    apply_update(&tx, actor, post, input)?;
    let view = into_view(&tx, require_post(&tx, id)?)?;
    tx.commit()?;

    info!(post_id = id, "更新文章");
    Ok(view)
}

/// 删除文章：先删除修订记录，评论和标签关联随文章级联删除
pub fn delete_post(conn: &mut Connection, actor: &Actor, id: i64) -> Result<()> {
    authorize(actor, Action::DeletePost, None)?;
    let tx = conn.transaction()?;
    require_post(&tx, id)?;
    tx.execute("DELETE FROM post_revisions WHERE post_id = ?1", params![id])?;
    tx.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
    tx.commit()?;

    info!(post_id = id, "删除文章");
    Ok(())
}

/// 文章的修订历史，最新的在前
pub fn list_revisions(conn: &Connection, actor: &Actor, post_id: i64) -> Result<Vec<PostRevision>> {
    let post = require_post(conn, post_id)?;
    authorize(actor, Action::ViewRevisions, Some(post.author_id))?;
    let mut stmt = conn.prepare(
        "SELECT id, post_id, title, content, excerpt, revision_type, created_by, created_at
         FROM post_revisions WHERE post_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let revisions = stmt
        .query_map(params![post_id], map_revision)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(revisions)
}

/// 恢复到某个修订：作为一次普通更新执行，因此当前状态会先被记录
pub fn restore_revision(conn: &mut Connection, actor: &Actor, post_id: i64, revision_id: i64) -> Result<PostView> {
    let tx = conn.transaction()?;
    let post = require_post(&tx, post_id)?;
    authorize(actor, Action::UpdatePost, Some(post.author_id))?;
    let revision = tx
        .query_row(
            "SELECT id, post_id, title, content, excerpt, revision_type, created_by, created_at
             FROM post_revisions WHERE id = ?1 AND post_id = ?2",
            params![revision_id, post_id],
            map_revision,
        )
        .optional()?
        .ok_or_else(|| CmsError::not_found("Revision"))?;

    let input = PostInput {
        title: Some(revision.title),
        content: Some(revision.content),
        excerpt: Some(revision.excerpt),
        ..PostInput::default()
    };
    apply_update(&tx, actor, post, input)?;
    let view = into_view(&tx, require_post(&tx, post_id)?)?;
    tx.commit()?;

    info!(post_id, revision_id, "恢复文章修订");
    Ok(view)
}
