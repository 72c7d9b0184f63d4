pub mod config;
pub mod types;

pub use config::Config;
pub use types::{
    AuthorProfile, Category, CategoryNode, Comment, CommentStatus, CommentThread,
    DiscussionStatus, Document, Extension, FileType, Media, Paginated, Pagination, Post,
    PostRevision, PostStatus, PostType, PostView, Role, Setting, Tag, User,
};
