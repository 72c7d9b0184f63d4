//! 内容：文章（含页面）、分类和标签

pub mod categories;
pub mod posts;
pub mod tags;

pub use posts::{PostFilter, PostInput};
