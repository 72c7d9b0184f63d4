//! 评论：公开提交、线程化展示和后台审核
//!
//! `parent_id` 不是外键。删除评论时只会连带删除它的直接回复，
//! 更深层的回复保留原来的 `parent_id`。

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::policy::{authorize, Action, Actor};
use crate::content::categories::find_category;
use crate::content::posts::find_post_by_slug;
use crate::error::{CmsError, Result};
use crate::models::{Comment, CommentStatus, CommentThread, DiscussionStatus, Paginated, Pagination, Post, User};
use crate::utils::{escape_like, non_empty};

const COMMENT_COLUMNS: &str = "id, post_id, author_id, author_name, author_email, author_website, \
     content, status, parent_id, created_at";

/// 访客提交的评论
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewComment {
    #[serde(alias = "author_name")]
    pub name: Option<String>,
    #[serde(alias = "author_email")]
    pub email: Option<String>,
    #[serde(alias = "author_website")]
    pub website: Option<String>,
    pub content: Option<String>,
    pub parent_id: Option<i64>,
}

/// 后台修改评论
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommentUpdate {
    pub status: Option<String>,
    pub content: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub author_website: Option<String>,
}

/// 后台列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct CommentFilter {
    pub status: Option<CommentStatus>,
    pub post_id: Option<i64>,
    /// 匹配作者名、邮箱或内容
    pub search: Option<String>,
}

/// 各状态的评论数
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CommentStats {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub spam: i64,
    pub trash: i64,
}

/// 有评论的文章
#[derive(Debug, Clone, Serialize)]
pub struct PostCommentCount {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub comment_count: i64,
}

/// 批量操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Approve,
    Spam,
    Trash,
    Delete,
}

impl FromStr for BulkAction {
    type Err = CmsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "approve" => Ok(BulkAction::Approve),
            "spam" => Ok(BulkAction::Spam),
            "trash" => Ok(BulkAction::Trash),
            "delete" => Ok(BulkAction::Delete),
            other => Err(CmsError::validation(format!("Invalid action '{other}'"))),
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BulkAction::Approve => "approve",
            BulkAction::Spam => "spam",
            BulkAction::Trash => "trash",
            BulkAction::Delete => "delete",
        };
        f.write_str(s)
    }
}

fn map_comment(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        author_email: row.get(4)?,
        author_website: row.get(5)?,
        content: row.get(6)?,
        status: row.get(7)?,
        parent_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

pub fn find_comment(conn: &Connection, id: i64) -> Result<Option<Comment>> {
    let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], map_comment).optional()?)
}

pub fn get_comment(conn: &Connection, id: i64) -> Result<Comment> {
    find_comment(conn, id)?.ok_or_else(|| CmsError::not_found("Comment"))
}

/// 公开页面可见的文章（按别名，隐藏分类下的视为不存在）
fn public_post(conn: &Connection, slug: &str) -> Result<Post> {
    let post = find_post_by_slug(conn, slug)?.ok_or_else(|| CmsError::not_found("Post"))?;
    if let Some(category_id) = post.category_id {
        let visible = find_category(conn, category_id)?
            .map(|c| c.is_visible)
            .unwrap_or(false);
        if !visible {
            return Err(CmsError::not_found("Post"));
        }
    }
    Ok(post)
}

fn insert_comment(conn: &Connection, comment: &Comment) -> Result<i64> {
    conn.execute(
        "INSERT INTO comments (post_id, author_id, author_name, author_email, author_website,
             content, status, parent_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            comment.post_id,
            comment.author_id,
            comment.author_name,
            comment.author_email,
            comment.author_website,
            comment.content,
            comment.status,
            comment.parent_id,
            comment.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 访客提交评论。`auto_approve` 为真时直接通过，否则进入待审核
pub fn submit_comment(conn: &mut Connection, post_slug: &str, input: NewComment, auto_approve: bool) -> Result<Comment> {
    let tx = conn.transaction()?;
    let post = public_post(&tx, post_slug)?;
    if post.comment_status == DiscussionStatus::Closed {
        return Err(CmsError::validation("Comments are closed for this post"));
    }

    let author_name = non_empty(input.name.as_deref())
        .ok_or_else(|| CmsError::validation("Author name is required"))?;
    let content = non_empty(input.content.as_deref())
        .ok_or_else(|| CmsError::validation("Comment content is required"))?;

    if let Some(parent_id) = input.parent_id {
        let parent = find_comment(&tx, parent_id)?;
        if parent.map(|p| p.post_id) != Some(post.id) {
            return Err(CmsError::validation("Parent comment does not belong to this post"));
        }
    }

    let mut comment = Comment {
        id: 0,
        post_id: post.id,
        author_id: None,
        author_name,
        author_email: non_empty(input.email.as_deref()),
        author_website: non_empty(input.website.as_deref()),
        content,
        status: if auto_approve {
            CommentStatus::Approved
        } else {
            CommentStatus::Pending
        },
        parent_id: input.parent_id,
        created_at: Utc::now(),
    };
    comment.id = insert_comment(&tx, &comment)?;
    tx.commit()?;

    info!(comment_id = comment.id, post_id = post.id, status = %comment.status, "新评论");
    Ok(comment)
}

/// 文章的公开评论线程：只含已通过的评论，顶级评论新的在前，回复旧的在前
pub fn comment_thread(conn: &Connection, post_slug: &str) -> Result<Vec<CommentThread>> {
    let post = public_post(conn, post_slug)?;
    let sql = format!(
        "SELECT {COMMENT_COLUMNS} FROM comments
         WHERE post_id = ?1 AND status = 'approved'
         ORDER BY created_at ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let comments = stmt
        .query_map(params![post.id], map_comment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut top_level = Vec::new();
    let mut replies: HashMap<i64, Vec<Comment>> = HashMap::new();
    for comment in comments {
        match comment.parent_id {
            None => top_level.push(comment),
            Some(parent) => replies.entry(parent).or_default().push(comment),
        }
    }

    fn attach(comment: Comment, replies: &mut HashMap<i64, Vec<Comment>>) -> CommentThread {
        let children: Vec<CommentThread> = replies
            .remove(&comment.id)
            .unwrap_or_default()
            .into_iter()
            .map(|reply| attach(reply, replies))
            .collect();
        CommentThread {
            comment,
            replies_count: children.len() as i64,
            replies: children,
        }
    }

    top_level.reverse();
    Ok(top_level
        .into_iter()
        .map(|comment| attach(comment, &mut replies))
        .collect())
}

fn count_by_status(conn: &Connection) -> Result<CommentStats> {
    let mut stats = CommentStats::default();
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM comments GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (status, count) = row?;
        stats.total += count;
        match status.parse::<CommentStatus>() {
            Ok(CommentStatus::Pending) => stats.pending = count,
            Ok(CommentStatus::Approved) => stats.approved = count,
            Ok(CommentStatus::Spam) => stats.spam = count,
            Ok(CommentStatus::Trash) => stats.trash = count,
            Err(_) => {}
        }
    }
    Ok(stats)
}

/// 后台评论列表（新的在前）及各状态统计
pub fn list_comments(
    conn: &Connection,
    actor: &Actor,
    filter: &CommentFilter,
    page: Pagination,
) -> Result<(Paginated<Comment>, CommentStats)> {
    authorize(actor, Action::ModerateComments, None)?;

    let mut clauses = vec!["1 = 1".to_string()];
    let mut values: Vec<Value> = Vec::new();
    if let Some(status) = filter.status {
        values.push(Value::Text(status.as_str().to_string()));
        clauses.push(format!("status = ?{}", values.len()));
    }
    if let Some(post_id) = filter.post_id {
        values.push(Value::Integer(post_id));
        clauses.push(format!("post_id = ?{}", values.len()));
    }
    if let Some(search) = non_empty(filter.search.as_deref()) {
        values.push(Value::Text(escape_like(&search)));
        let n = values.len();
        clauses.push(format!(
            "(author_name LIKE ?{n} ESCAPE '\\' OR author_email LIKE ?{n} ESCAPE '\\' \
             OR content LIKE ?{n} ESCAPE '\\')"
        ));
    }
    let condition = clauses.join(" AND ");

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM comments WHERE {condition}"),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;
    let n = values.len();
    values.push(Value::Integer(page.per_page));
    values.push(Value::Integer(page.offset()));
    let sql = format!(
        "SELECT {COMMENT_COLUMNS} FROM comments WHERE {condition}
         ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
        n + 1,
        n + 2
    );
    let mut stmt = conn.prepare(&sql)?;
    let comments = stmt
        .query_map(params_from_iter(values.iter()), map_comment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok((Paginated::new(comments, total, page), count_by_status(conn)?))
}

/// 最近的评论（任意状态）
pub fn recent_comments(conn: &Connection, limit: i64) -> Result<Vec<Comment>> {
    let sql = format!("SELECT {COMMENT_COLUMNS} FROM comments ORDER BY created_at DESC, id DESC LIMIT ?1");
    let mut stmt = conn.prepare(&sql)?;
    let comments = stmt
        .query_map(params![limit], map_comment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(comments)
}

pub fn update_comment(conn: &mut Connection, actor: &Actor, id: i64, input: CommentUpdate) -> Result<Comment> {
    authorize(actor, Action::ModerateComments, None)?;
    let tx = conn.transaction()?;
    let mut comment = get_comment(&tx, id)?;

    if let Some(status) = input.status.as_deref() {
        comment.status = status.parse().map_err(CmsError::Validation)?;
    }
    if let Some(content) = input.content.as_deref() {
        comment.content = non_empty(Some(content))
            .ok_or_else(|| CmsError::validation("Comment content is required"))?;
    }
    if let Some(name) = input.author_name.as_deref() {
        comment.author_name = non_empty(Some(name))
            .ok_or_else(|| CmsError::validation("Author name is required"))?;
    }
    if input.author_email.is_some() {
        comment.author_email = non_empty(input.author_email.as_deref());
    }
    if input.author_website.is_some() {
        comment.author_website = non_empty(input.author_website.as_deref());
    }

    tx.execute(
        "UPDATE comments SET status = ?1, content = ?2, author_name = ?3, author_email = ?4,
             author_website = ?5
         WHERE id = ?6",
        params![
            comment.status,
            comment.content,
            comment.author_name,
            comment.author_email,
            comment.author_website,
            id,
        ],
    )?;
    tx.commit()?;
    Ok(comment)
}

/// 工作人员回复评论，回复直接通过并署名为该用户
pub fn reply_to_comment(conn: &mut Connection, user: &User, parent_id: i64, content: &str) -> Result<Comment> {
    authorize(&Actor::from(user), Action::ReplyComment, None)?;
    let content = non_empty(Some(content)).ok_or_else(|| CmsError::validation("Content is required"))?;

    let tx = conn.transaction()?;
    let parent = get_comment(&tx, parent_id)?;
    let mut reply = Comment {
        id: 0,
        post_id: parent.post_id,
        author_id: Some(user.id),
        author_name: user.display_name(),
        author_email: Some(user.email.clone()),
        author_website: user.website.clone(),
        content,
        status: CommentStatus::Approved,
        parent_id: Some(parent.id),
        created_at: Utc::now(),
    };
    reply.id = insert_comment(&tx, &reply)?;
    tx.commit()?;

    info!(comment_id = reply.id, parent_id, user_id = user.id, "回复评论");
    Ok(reply)
}

/// 删除评论及其直接回复，返回删除的行数
pub fn delete_comment(conn: &mut Connection, actor: &Actor, id: i64) -> Result<usize> {
    authorize(actor, Action::ModerateComments, None)?;
    let tx = conn.transaction()?;
    get_comment(&tx, id)?;
    let replies = tx.execute("DELETE FROM comments WHERE parent_id = ?1", params![id])?;
    tx.execute("DELETE FROM comments WHERE id = ?1", params![id])?;
    tx.commit()?;

    info!(comment_id = id, replies, "删除评论");
    Ok(replies + 1)
}

/// 批量修改状态或删除。删除时连带删除目标的直接回复，返回受影响的行数
pub fn bulk_action(conn: &mut Connection, actor: &Actor, ids: &[i64], action: BulkAction) -> Result<usize> {
    authorize(actor, Action::ModerateComments, None)?;
    if ids.is_empty() {
        return Err(CmsError::validation("Comment IDs and action are required"));
    }

    let placeholders = (1..=ids.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
    let tx = conn.transaction()?;
    let affected = match action {
        BulkAction::Delete => {
            let replies = tx.execute(
                &format!("DELETE FROM comments WHERE parent_id IN ({placeholders})"),
                params_from_iter(ids.iter()),
            )?;
            let targets = tx.execute(
                &format!("DELETE FROM comments WHERE id IN ({placeholders})"),
                params_from_iter(ids.iter()),
            )?;
            replies + targets
        }
        BulkAction::Approve | BulkAction::Spam | BulkAction::Trash => {
            let status = match action {
                BulkAction::Approve => CommentStatus::Approved,
                BulkAction::Spam => CommentStatus::Spam,
                _ => CommentStatus::Trash,
            };
            let mut values: Vec<Value> = ids.iter().map(|id| Value::Integer(*id)).collect();
            values.push(Value::Text(status.as_str().to_string()));
            tx.execute(
                &format!(
                    "UPDATE comments SET status = ?{} WHERE id IN ({placeholders})",
                    ids.len() + 1
                ),
                params_from_iter(values.iter()),
            )?
        }
    };
    tx.commit()?;

    info!(action = %action, count = ids.len(), affected, "批量处理评论");
    Ok(affected)
}

/// 有评论的文章，按评论数降序
pub fn posts_with_comments(conn: &Connection, actor: &Actor) -> Result<Vec<PostCommentCount>> {
    authorize(actor, Action::ModerateComments, None)?;
    let mut stmt = conn.prepare(
        "SELECT p.id, p.title, p.slug, COUNT(c.id) AS comment_count
         FROM posts p JOIN comments c ON c.post_id = p.id
         GROUP BY p.id
         ORDER BY comment_count DESC, p.id DESC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PostCommentCount {
                id: row.get(0)?,
                title: row.get(1)?,
                slug: row.get(2)?,
                comment_count: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::posts::{create_post, update_post};
    use crate::content::PostInput;
    use crate::db::Database;
    use crate::models::{Config, Role};
    use crate::users::{authenticate, bootstrap};

    fn setup() -> (Database, User, String) {
        let db = Database::open_in_memory().unwrap();
        let (admin, slug) = db
            .with_conn(|conn| {
                bootstrap(conn, &Config::default())?;
                let admin = authenticate(conn, "admin", "admin123")?;
                let post = create_post(conn, &Actor::from(&admin), PostInput {
                    title: Some("Threaded".into()),
                    status: Some("published".into()),
                    ..PostInput::default()
                })?;
                Ok((admin, post.post.slug))
            })
            .unwrap();
        (db, admin, slug)
    }

    fn visitor(content: &str, parent_id: Option<i64>) -> NewComment {
        NewComment {
            name: Some("Visitor".into()),
            email: Some("v@example.com".into()),
            content: Some(content.into()),
            parent_id,
            ..NewComment::default()
        }
    }

    #[test]
    fn test_empty_content_rejected() {
        let (db, _, slug) = setup();
        db.with_conn(|conn| {
            let err = submit_comment(conn, &slug, visitor("   ", None), true).unwrap_err();
            assert!(matches!(err, CmsError::Validation(_)));
            let err = submit_comment(conn, &slug, NewComment {
                name: None,
                ..visitor("hi", None)
            }, true)
            .unwrap_err();
            assert!(matches!(err, CmsError::Validation(_)));
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_thread_ordering_and_filtering() {
        let (db, admin, slug) = setup();
        db.with_conn(|conn| {
            let first = submit_comment(conn, &slug, visitor("first", None), true)?;
            let second = submit_comment(conn, &slug, visitor("second", None), true)?;
            let r1 = submit_comment(conn, &slug, visitor("reply 1", Some(first.id)), true)?;
            submit_comment(conn, &slug, visitor("reply 2", Some(first.id)), true)?;
            submit_comment(conn, &slug, visitor("held", Some(first.id)), false)?;
            submit_comment(conn, &slug, visitor("held top", None), false)?;
            let nested = reply_to_comment(conn, &admin, r1.id, "staff answer")?;
            assert_eq!(nested.status, CommentStatus::Approved);
            assert_eq!(nested.author_id, Some(admin.id));
            assert_eq!(nested.author_name, "System Administrator");

            let thread = comment_thread(conn, &slug)?;
            assert_eq!(thread.len(), 2);
            assert_eq!(thread[0].comment.id, second.id);
            assert_eq!(thread[1].comment.id, first.id);
            let replies: Vec<&str> = thread[1].replies.iter().map(|r| r.comment.content.as_str()).collect();
            assert_eq!(replies, vec!["reply 1", "reply 2"]);
            assert_eq!(thread[1].replies_count, 2);
            assert_eq!(thread[1].replies[0].replies[0].comment.content, "staff answer");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_parent_must_match_post() {
        let (db, admin, slug) = setup();
        db.with_conn(|conn| {
            let other = create_post(conn, &Actor::from(&admin), PostInput {
                title: Some("Other".into()),
                status: Some("published".into()),
                ..PostInput::default()
            })?;
            let foreign = submit_comment(conn, &other.post.slug, visitor("elsewhere", None), true)?;
            let err = submit_comment(conn, &slug, visitor("x", Some(foreign.id)), true).unwrap_err();
            assert!(matches!(err, CmsError::Validation(_)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_closed_post_rejects_comments() {
        let (db, admin, slug) = setup();
        db.with_conn(|conn| {
            let id: i64 = conn.query_row("SELECT id FROM posts WHERE slug = ?1", [&slug], |r| r.get(0))?;
            update_post(conn, &Actor::from(&admin), id, PostInput {
                comment_status: Some("closed".into()),
                ..PostInput::default()
            })?;
            let err = submit_comment(conn, &slug, visitor("late", None), true).unwrap_err();
            assert!(matches!(err, CmsError::Validation(_)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_single_delete_is_one_level() {
        let (db, admin, slug) = setup();
        let actor = Actor::from(&admin);
        db.with_conn(|conn| {
            let root = submit_comment(conn, &slug, visitor("root", None), true)?;
            let child = submit_comment(conn, &slug, visitor("child", Some(root.id)), true)?;
            let grandchild = submit_comment(conn, &slug, visitor("grandchild", Some(child.id)), true)?;

            assert_eq!(delete_comment(conn, &actor, root.id)?, 2);
            assert!(find_comment(conn, root.id)?.is_none());
            assert!(find_comment(conn, child.id)?.is_none());
            let orphan = get_comment(conn, grandchild.id)?;
            assert_eq!(orphan.parent_id, Some(child.id));
            // 悬空的回复不会出现在公开线程中
            assert!(comment_thread(conn, &slug)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_search_treats_wildcards_literally() {
        let (db, admin, slug) = setup();
        let actor = Actor::from(&admin);
        db.with_conn(|conn| {
            submit_comment(conn, &slug, visitor("plain words", None), true)?;
            submit_comment(conn, &slug, visitor("snake_case name", None), true)?;
            submit_comment(conn, &slug, visitor("100% agree", None), true)?;

            let search = |term: &str| -> Result<Vec<String>> {
                let filter = CommentFilter {
                    search: Some(term.into()),
                    ..CommentFilter::default()
                };
                let (page, _) = list_comments(conn, &actor, &filter, Pagination::default())?;
                Ok(page.items.into_iter().map(|c| c.content).collect())
            };
            assert_eq!(search("_")?, vec!["snake_case name"]);
            assert_eq!(search("%")?, vec!["100% agree"]);
            assert_eq!(search("words")?, vec!["plain words"]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_bulk_status_and_stats() {
        let (db, admin, slug) = setup();
        let actor = Actor::from(&admin);
        db.with_conn(|conn| {
            let a = submit_comment(conn, &slug, visitor("a", None), false)?;
            let b = submit_comment(conn, &slug, visitor("buy now", None), false)?;
            submit_comment(conn, &slug, visitor("c", None), false)?;

            bulk_action(conn, &actor, &[a.id], BulkAction::Approve)?;
            bulk_action(conn, &actor, &[b.id], BulkAction::Spam)?;

            let (page, stats) = list_comments(conn, &actor, &CommentFilter::default(), Pagination::default())?;
            assert_eq!(page.total, 3);
            assert_eq!(stats, CommentStats { total: 3, pending: 1, approved: 1, spam: 1, trash: 0 });

            let filter = CommentFilter {
                search: Some("BUY".into()),
                ..CommentFilter::default()
            };
            let (found, _) = list_comments(conn, &actor, &filter, Pagination::default())?;
            assert_eq!(found.items.len(), 1);
            assert_eq!(found.items[0].id, b.id);

            assert!(matches!("purge".parse::<BulkAction>(), Err(CmsError::Validation(_))));
            assert!(bulk_action(conn, &actor, &[], BulkAction::Trash).is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_update_and_posts_with_comments() {
        let (db, admin, slug) = setup();
        let actor = Actor::from(&admin);
        db.with_conn(|conn| {
            let c = submit_comment(conn, &slug, visitor("typo", None), true)?;
            let updated = update_comment(conn, &actor, c.id, CommentUpdate {
                content: Some("fixed".into()),
                status: Some("trash".into()),
                ..CommentUpdate::default()
            })?;
            assert_eq!(updated.content, "fixed");
            assert_eq!(updated.status, CommentStatus::Trash);
            assert!(update_comment(conn, &actor, c.id, CommentUpdate {
                status: Some("deleted".into()),
                ..CommentUpdate::default()
            })
            .is_err());

            let posts = posts_with_comments(conn, &actor)?;
            assert_eq!(posts.len(), 1);
            assert_eq!(posts[0].comment_count, 1);

            let author = Actor { id: 99, role: Role::Author };
            assert!(matches!(posts_with_comments(conn, &author), Err(CmsError::Forbidden(_))));
            Ok(())
        })
        .unwrap();
    }
}
