pub mod api;
pub mod auth;
pub mod backup;
pub mod cli;
pub mod comments;
pub mod content;
pub mod core;
pub mod db;
pub mod error;
pub mod media;
pub mod models;
pub mod site;
pub mod users;
pub mod utils;

// Re-export commonly used types
pub use crate::api::{build_router, AppState};
pub use crate::db::Database;
pub use crate::error::{CmsError, Result};
pub use crate::models::{Category, Comment, Config, Post, Tag, User};
