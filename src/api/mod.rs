//! HTTP/JSON 接口
//!
//! 所有接口挂在 `/api` 下，`/uploads` 提供上传文件，其余路径交给前端单页应用。

mod auth;
mod comments;
mod content;
pub mod extract;
mod media;
mod site;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::auth::TokenIssuer;
use crate::db::Database;
use crate::error::Result;
use crate::media::MediaStore;
use crate::models::{Config, Pagination};

pub use extract::AuthUser;

/// 处理函数共享的状态
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub tokens: Arc<TokenIssuer>,
    pub media: Arc<MediaStore>,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Result<Self> {
        let tokens = TokenIssuer::new(config.jwt_secret.as_bytes(), config.token_ttl_hours);
        let media = MediaStore::new(config.upload_dir.clone(), config.max_upload_bytes)?;
        Ok(Self {
            db,
            config: Arc::new(config),
            tokens: Arc::new(tokens),
            media: Arc::new(media),
        })
    }

    fn pagination(&self, page: Option<i64>, per_page: Option<i64>) -> Pagination {
        Pagination::new(page, per_page, self.config.per_page)
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // 认证
        .route("/auth/login", post(auth::login))
        .route("/auth/register", post(auth::register))
        .route("/auth/me", get(auth::me))
        // 用户
        .route("/users", get(auth::list_users).post(auth::create_user))
        .route(
            "/users/:id",
            get(auth::get_user).put(auth::update_user).delete(auth::delete_user),
        )
        // 文章
        .route("/posts", get(content::list_posts).post(content::create_post))
        .route(
            "/posts/:id",
            get(content::get_post).put(content::update_post).delete(content::delete_post),
        )
        .route("/posts/:id/revisions", get(content::list_revisions))
        .route(
            "/posts/:id/revisions/:revision_id/restore",
            post(content::restore_revision),
        )
        .route(
            "/posts/:id/comments",
            get(comments::thread).post(comments::submit),
        )
        // 分类和标签
        .route(
            "/categories",
            get(content::category_tree).post(content::create_category),
        )
        .route(
            "/categories/:id",
            put(content::update_category).delete(content::delete_category),
        )
        .route("/tags", get(content::list_tags).post(content::create_tag))
        .route(
            "/tags/:id",
            put(content::update_tag).delete(content::delete_tag),
        )
        // 后台
        .route("/admin/categories", get(content::list_categories_admin))
        .route("/admin/comments", get(comments::list))
        .route("/admin/comments/bulk", post(comments::bulk))
        .route("/admin/comments/posts", get(comments::posts_with_comments))
        .route(
            "/admin/comments/:id",
            put(comments::update).delete(comments::remove),
        )
        .route("/admin/comments/:id/reply", post(comments::reply))
        .route("/admin/dashboard", get(site::dashboard))
        .route("/admin/backup", get(site::download_backup))
        .route("/admin/restore", post(site::restore_backup))
        // 媒体
        .route("/media", get(media::list).post(media::upload))
        .route("/media/:id", put(media::update).delete(media::remove))
        // 设置、主题和插件
        .route("/site", get(site::site_info))
        .route(
            "/settings",
            get(site::get_settings).put(site::update_settings),
        )
        .route("/themes", get(site::list_themes))
        .route("/themes/active", get(site::active_theme))
        .route("/themes/:slug/activate", post(site::activate_theme))
        .route("/themes/:slug/settings", put(site::update_theme_settings))
        .route("/plugins", get(site::list_plugins).post(site::register_plugin))
        .route("/plugins/:slug/activate", post(site::activate_plugin))
        .route("/plugins/:slug/deactivate", post(site::deactivate_plugin))
        .route("/plugins/:slug/settings", put(site::update_plugin_settings))
        .fallback(api_not_found)
}

async fn api_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Endpoint not found" })),
    )
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let spa = ServeDir::new(&state.config.static_dir)
        .fallback(ServeFile::new(state.config.static_dir.join("index.html")));
    // multipart 的边界和其他字段需要少量额外空间
    let body_limit = state.config.max_upload_bytes + 1024 * 1024;

    Router::new()
        .nest("/api", api_routes())
        .nest_service("/uploads", ServeDir::new(state.media.root()))
        .fallback_service(spa)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
