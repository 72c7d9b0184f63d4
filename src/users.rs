//! 用户账户：注册、登录、管理以及首次启动时的初始化数据

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use tracing::info;

use crate::auth::password::{hash_password, verify_password};
use crate::auth::policy::{authorize, role_allows, Action, Actor};
use crate::error::{CmsError, Result};
use crate::models::types::parse_document;
use crate::models::{Config, Document, Paginated, Pagination, Role, User};
use crate::utils::non_empty;

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, role, \
     avatar_url, bio, website, social_links, is_active, created_at, updated_at";

/// 公开注册
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// 管理员创建用户
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: Option<bool>,
    pub social_links: Option<Document>,
}

/// 用户资料更新，缺省字段保持不变
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub avatar_url: Option<String>,
    pub social_links: Option<Document>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// 用户名或邮箱
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        role: row.get(6)?,
        avatar_url: row.get(7)?,
        bio: row.get(8)?,
        website: row.get(9)?,
        social_links: parse_document(row.get(10)?),
        is_active: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

pub fn find_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], map_user).optional()?)
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    find_user(conn, id)?.ok_or_else(|| CmsError::not_found("User"))
}

/// 最早创建的启用中的管理员，命令行操作以其身份执行
pub fn first_admin(conn: &Connection) -> Result<User> {
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE role = 'admin' AND is_active = 1 ORDER BY id LIMIT 1"
    );
    conn.query_row(&sql, [], map_user)
        .optional()?
        .ok_or_else(|| CmsError::not_found("Administrator"))
}

pub fn list_users(conn: &Connection, role: Option<Role>, page: Pagination) -> Result<Paginated<User>> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE (?1 IS NULL OR role = ?1)",
        params![role],
        |row| row.get(0),
    )?;
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users WHERE (?1 IS NULL OR role = ?1)
         ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let users = stmt
        .query_map(params![role, page.per_page, page.offset()], map_user)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Paginated::new(users, total, page))
}

fn ensure_available(conn: &Connection, username: Option<&str>, email: Option<&str>, exclude: i64) -> Result<()> {
    if let Some(username) = username {
        let taken = conn
            .query_row(
                "SELECT 1 FROM users WHERE username = ?1 AND id != ?2",
                params![username, exclude],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if taken {
            return Err(CmsError::conflict("username", "Username already exists"));
        }
    }
    if let Some(email) = email {
        let taken = conn
            .query_row(
                "SELECT 1 FROM users WHERE email = ?1 AND id != ?2",
                params![email, exclude],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if taken {
            return Err(CmsError::conflict("email", "Email already exists"));
        }
    }
    Ok(())
}

fn parse_role(role: &str) -> Result<Role> {
    role.parse().map_err(CmsError::Validation)
}

fn insert_user(conn: &Connection, user: &NewUser, role: Role) -> Result<i64> {
    let password_hash = hash_password(&user.password)?;
    let social_links = serde_json::to_string(&user.social_links.clone().unwrap_or_default())?;
    let now = Utc::now();
    conn.execute(
        "INSERT INTO users (username, email, password_hash, first_name, last_name, role,
             avatar_url, bio, website, social_links, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            user.username.trim(),
            user.email.trim(),
            password_hash,
            user.first_name,
            user.last_name,
            role,
            non_empty(user.avatar_url.as_deref()),
            non_empty(user.bio.as_deref()),
            non_empty(user.website.as_deref()),
            social_links,
            user.is_active.unwrap_or(true),
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 公开注册，总是创建订阅者
pub fn register(conn: &mut Connection, req: RegisterRequest) -> Result<User> {
    for (field, value) in [
        ("username", &req.username),
        ("email", &req.email),
        ("password", &req.password),
    ] {
        if value.trim().is_empty() {
            return Err(CmsError::validation(format!("{field} is required")));
        }
    }

    let tx = conn.transaction()?;
    ensure_available(&tx, Some(req.username.trim()), Some(req.email.trim()), -1)?;
    let new_user = NewUser {
        username: req.username,
        email: req.email,
        password: req.password,
        first_name: req.first_name,
        last_name: req.last_name,
        ..NewUser::default()
    };
    let id = insert_user(&tx, &new_user, Role::Subscriber)?;
    let user = get_user(&tx, id)?;
    tx.commit()?;

    info!(user_id = id, username = %user.username, "用户注册");
    Ok(user)
}

/// 管理员创建用户
pub fn create_user(conn: &mut Connection, actor: &Actor, input: NewUser) -> Result<User> {
    authorize(actor, Action::CreateUser, None)?;
    for (field, value) in [
        ("username", &input.username),
        ("email", &input.email),
        ("password", &input.password),
        ("first_name", &input.first_name),
        ("last_name", &input.last_name),
        ("role", &input.role),
    ] {
        if value.trim().is_empty() {
            return Err(CmsError::validation(format!("{field} is required")));
        }
    }
    let role = parse_role(&input.role)?;

    let tx = conn.transaction()?;
    ensure_available(&tx, Some(input.username.trim()), Some(input.email.trim()), -1)?;
    let id = insert_user(&tx, &input, role)?;
    let user = get_user(&tx, id)?;
    tx.commit()?;

    info!(user_id = id, role = %role, "创建用户");
    Ok(user)
}

/// 校验用户名（或邮箱）和密码，停用的账户无法登录
pub fn authenticate(conn: &Connection, login: &str, password: &str) -> Result<User> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR email = ?1 LIMIT 1");
    let user = conn.query_row(&sql, params![login.trim()], map_user).optional()?;
    match user {
        Some(user) if user.is_active && verify_password(password, &user.password_hash) => Ok(user),
        _ => Err(CmsError::Unauthorized("Invalid credentials".to_string())),
    }
}

/// 更新资料。本人或管理员可以修改，角色和启用状态只有管理员能改
pub fn update_user(conn: &mut Connection, actor: &Actor, id: i64, input: UserUpdate) -> Result<User> {
    let tx = conn.transaction()?;
    let mut user = get_user(&tx, id)?;
    authorize(actor, Action::UpdateUser, Some(user.id))?;

    if let Some(email) = non_empty(input.email.as_deref()) {
        ensure_available(&tx, None, Some(&email), id)?;
        user.email = email;
    }
    if let Some(first_name) = input.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = input.last_name {
        user.last_name = last_name;
    }
    if input.bio.is_some() {
        user.bio = input.bio;
    }
    if input.website.is_some() {
        user.website = input.website;
    }
    if input.avatar_url.is_some() {
        user.avatar_url = input.avatar_url;
    }
    if let Some(links) = input.social_links {
        user.social_links = links;
    }
    if role_allows(actor.role, Action::AdministerUser) {
        if let Some(role) = input.role.as_deref() {
            user.role = parse_role(role)?;
        }
        if let Some(active) = input.is_active {
            user.is_active = active;
        }
    }
    if let Some(password) = non_empty(input.password.as_deref()) {
        user.password_hash = hash_password(&password)?;
    }

    tx.execute(
        "UPDATE users SET email = ?1, first_name = ?2, last_name = ?3, bio = ?4, website = ?5,
             avatar_url = ?6, social_links = ?7, role = ?8, is_active = ?9, password_hash = ?10,
             updated_at = ?11
         WHERE id = ?12",
        params![
            user.email,
            user.first_name,
            user.last_name,
            user.bio,
            user.website,
            user.avatar_url,
            serde_json::to_string(&user.social_links)?,
            user.role,
            user.is_active,
            user.password_hash,
            Utc::now(),
            id,
        ],
    )?;
    let user = get_user(&tx, id)?;
    tx.commit()?;
    Ok(user)
}

/// 删除用户。仍拥有文章或媒体时拒绝，评论和修订记录保留但解除关联
pub fn delete_user(conn: &mut Connection, actor: &Actor, id: i64) -> Result<()> {
    authorize(actor, Action::DeleteUser, None)?;
    if actor.id == id {
        return Err(CmsError::validation("You cannot delete your own account"));
    }

    let tx = conn.transaction()?;
    get_user(&tx, id)?;
    let owned: i64 = tx.query_row(
        "SELECT (SELECT COUNT(*) FROM posts WHERE author_id = ?1)
              + (SELECT COUNT(*) FROM media WHERE uploaded_by = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    if owned > 0 {
        return Err(CmsError::conflict(
            "user",
            "User still owns posts or media; reassign or delete them first",
        ));
    }
    tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
    tx.commit()?;

    info!(user_id = id, "删除用户");
    Ok(())
}

/// 首次启动：没有管理员时创建管理员、默认分类和默认设置
pub fn bootstrap(conn: &mut Connection, config: &Config) -> Result<bool> {
    let tx = conn.transaction()?;
    let has_admin = tx
        .query_row("SELECT 1 FROM users WHERE role = 'admin' LIMIT 1", [], |_| Ok(()))
        .optional()?
        .is_some();
    if has_admin {
        return Ok(false);
    }

    let admin = NewUser {
        username: config.admin.username.clone(),
        email: config.admin.email.clone(),
        password: config.admin.password.clone(),
        first_name: "System".to_string(),
        last_name: "Administrator".to_string(),
        ..NewUser::default()
    };
    ensure_available(&tx, Some(&admin.username), Some(&admin.email), -1)?;
    insert_user(&tx, &admin, Role::Admin)?;

    let now = Utc::now();
    tx.execute(
        "INSERT OR IGNORE INTO categories (name, slug, description, is_visible, created_at)
         VALUES ('Uncategorized', 'uncategorized', 'Default category for posts', 1, ?1)",
        params![now],
    )?;

    let per_page = config.per_page.to_string();
    let moderation = (!config.comments.auto_approve).to_string();
    let defaults = [
        ("site_title", "My Blog"),
        (
            "site_description",
            "Sharing insights, experiences, and knowledge about technology, life, and everything in between",
        ),
        ("site_url", config.site_url.as_str()),
        ("admin_email", config.admin.email.as_str()),
        ("posts_per_page", per_page.as_str()),
        ("comment_moderation", moderation.as_str()),
        ("timezone", "UTC"),
    ];
    for (key, value) in defaults {
        tx.execute(
            "INSERT OR IGNORE INTO settings (key, value, autoload, created_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?3)",
            params![key, value, now],
        )?;
    }
    tx.commit()?;

    info!(username = %config.admin.username, "已创建默认管理员");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn setup() -> (Database, User) {
        let db = Database::open_in_memory().unwrap();
        let admin = db
            .with_conn(|conn| {
                bootstrap(conn, &Config::default())?;
                authenticate(conn, "admin", "admin123")
            })
            .unwrap();
        (db, admin)
    }

    fn new_user(name: &str, role: &str) -> NewUser {
        NewUser {
            username: name.into(),
            email: format!("{name}@example.com"),
            password: "password".into(),
            first_name: "First".into(),
            last_name: "Last".into(),
            role: role.into(),
            ..NewUser::default()
        }
    }

    #[test]
    fn test_bootstrap_is_idempotent() {
        let (db, admin) = setup();
        assert_eq!(admin.role, Role::Admin);
        db.with_conn(|conn| {
            assert!(!bootstrap(conn, &Config::default())?);
            let settings: i64 = conn.query_row("SELECT COUNT(*) FROM settings", [], |r| r.get(0))?;
            assert_eq!(settings, 7);
            let categories: i64 =
                conn.query_row("SELECT COUNT(*) FROM categories", [], |r| r.get(0))?;
            assert_eq!(categories, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_register_always_subscriber_and_conflicts() {
        let (db, _) = setup();
        db.with_conn(|conn| {
            let user = register(
                conn,
                RegisterRequest {
                    username: "bob".into(),
                    email: "bob@example.com".into(),
                    password: "pw".into(),
                    first_name: String::new(),
                    last_name: String::new(),
                },
            )?;
            assert_eq!(user.role, Role::Subscriber);

            let err = register(
                conn,
                RegisterRequest {
                    username: "bob".into(),
                    email: "other@example.com".into(),
                    password: "pw".into(),
                    first_name: String::new(),
                    last_name: String::new(),
                },
            )
            .unwrap_err();
            assert!(matches!(err, CmsError::Conflict { ref field, .. } if field == "username"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_login_by_email_and_inactive() {
        let (db, admin) = setup();
        let actor = Actor::from(&admin);
        db.with_conn(|conn| {
            let user = create_user(conn, &actor, new_user("carol", "author"))?;
            assert!(authenticate(conn, "carol@example.com", "password").is_ok());
            assert!(authenticate(conn, "carol", "nope").is_err());

            update_user(
                conn,
                &actor,
                user.id,
                UserUpdate {
                    is_active: Some(false),
                    ..UserUpdate::default()
                },
            )?;
            assert!(matches!(
                authenticate(conn, "carol", "password"),
                Err(CmsError::Unauthorized(_))
            ));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_self_update_cannot_change_role() {
        let (db, admin) = setup();
        db.with_conn(|conn| {
            let user = create_user(conn, &Actor::from(&admin), new_user("dave", "author"))?;
            let me = Actor::from(&user);
            let updated = update_user(
                conn,
                &me,
                user.id,
                UserUpdate {
                    bio: Some("hello".into()),
                    role: Some("admin".into()),
                    ..UserUpdate::default()
                },
            )?;
            assert_eq!(updated.role, Role::Author);
            assert_eq!(updated.bio.as_deref(), Some("hello"));

            let err = update_user(conn, &me, admin.id, UserUpdate::default()).unwrap_err();
            assert!(matches!(err, CmsError::Forbidden(_)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_create_user_validation() {
        let (db, admin) = setup();
        db.with_conn(|conn| {
            let mut input = new_user("erin", "wizard");
            let err = create_user(conn, &Actor::from(&admin), input.clone()).unwrap_err();
            assert!(matches!(err, CmsError::Validation(_)));
            input.role = "editor".into();
            input.first_name = String::new();
            let err = create_user(conn, &Actor::from(&admin), input).unwrap_err();
            assert!(matches!(err, CmsError::Validation(ref m) if m == "first_name is required"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_user() {
        let (db, admin) = setup();
        let actor = Actor::from(&admin);
        db.with_conn(|conn| {
            let user = create_user(conn, &actor, new_user("frank", "subscriber"))?;
            assert!(delete_user(conn, &actor, admin.id).is_err());
            delete_user(conn, &actor, user.id)?;
            assert!(find_user(conn, user.id)?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
