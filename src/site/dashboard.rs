use rusqlite::Connection;
use serde::Serialize;

use crate::auth::policy::{authorize, Action, Actor};
use crate::comments::recent_comments;
use crate::content::posts::recent_posts;
use crate::error::Result;
use crate::models::{Comment, PostView};

const RECENT_LIMIT: i64 = 5;

/// 后台概览的统计数字
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DashboardStats {
    pub total_posts: i64,
    pub total_pages: i64,
    pub total_comments: i64,
    pub total_users: i64,
    pub total_media: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub stats: DashboardStats,
    pub recent_posts: Vec<PostView>,
    pub recent_comments: Vec<Comment>,
}

fn count(conn: &Connection, sql: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [], |row| row.get(0))?)
}

pub fn dashboard(conn: &Connection, actor: &Actor) -> Result<Dashboard> {
    authorize(actor, Action::ViewDashboard, None)?;
    let stats = DashboardStats {
        total_posts: count(
            conn,
            "SELECT COUNT(*) FROM posts WHERE post_type = 'post' AND status = 'published'",
        )?,
        total_pages: count(
            conn,
            "SELECT COUNT(*) FROM posts WHERE post_type = 'page' AND status = 'published'",
        )?,
        total_comments: count(conn, "SELECT COUNT(*) FROM comments WHERE status = 'approved'")?,
        total_users: count(conn, "SELECT COUNT(*) FROM users WHERE is_active = 1")?,
        total_media: count(conn, "SELECT COUNT(*) FROM media")?,
    };
    Ok(Dashboard {
        stats,
        recent_posts: recent_posts(conn, RECENT_LIMIT)?,
        recent_comments: recent_comments(conn, RECENT_LIMIT)?,
    })
}
