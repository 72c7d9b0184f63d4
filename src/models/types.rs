use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// JSON 对象字段（custom_fields、social_links、主题/插件设置）
pub type Document = serde_json::Map<String, serde_json::Value>;

/// 以小写字符串存储的枚举
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "Invalid {} '{}'. Must be one of: {}",
                        stringify!($name),
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum!(Role {
    Admin => "admin",
    Editor => "editor",
    Author => "author",
    Contributor => "contributor",
    Subscriber => "subscriber",
});

text_enum!(PostStatus {
    Draft => "draft",
    Published => "published",
    Private => "private",
    Trash => "trash",
});

text_enum!(PostType {
    Post => "post",
    Page => "page",
    Custom => "custom",
});

text_enum!(CommentStatus {
    Pending => "pending",
    Approved => "approved",
    Spam => "spam",
    Trash => "trash",
});

text_enum!(DiscussionStatus {
    Open => "open",
    Closed => "closed",
});

text_enum!(FileType {
    Image => "image",
    Video => "video",
    Audio => "audio",
    Document => "document",
});

/// 用户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// 密码哈希，不对外序列化
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub website: Option<String>,
    pub social_links: Document,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// 显示名称，姓名为空时退回用户名
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

/// 对外公开的作者信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorProfile {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

/// 分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub image_url: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub is_visible: bool,
    pub created_at: DateTime<Utc>,
}

/// 分类树节点
#[derive(Debug, Clone, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

/// 标签
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 文章（或页面）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub slug: String,
    /// 列表接口不返回正文
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub excerpt: String,
    pub featured_image: Option<String>,
    pub status: PostStatus,
    pub post_type: PostType,
    pub author_id: i64,
    pub category_id: Option<i64>,
    pub comment_status: DiscussionStatus,
    pub view_count: i64,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Option<String>,
    pub custom_fields: Document,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 带关联数据的文章
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub author: Option<AuthorProfile>,
    pub category: Option<Category>,
    pub tags: Vec<Tag>,
    pub comments_count: i64,
}

/// 文章修订快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRevision {
    pub id: i64,
    pub post_id: i64,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub revision_type: String,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// 评论
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: Option<i64>,
    pub author_name: String,
    pub author_email: Option<String>,
    pub author_website: Option<String>,
    pub content: String,
    pub status: CommentStatus,
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// 评论及其直接回复
#[derive(Debug, Clone, Serialize)]
pub struct CommentThread {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentThread>,
    pub replies_count: i64,
}

/// 媒体文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: i64,
    pub title: String,
    pub filename: String,
    pub original_filename: String,
    #[serde(skip_serializing, default)]
    pub file_path: String,
    pub url: String,
    pub file_type: FileType,
    pub mime_type: Option<String>,
    pub file_size: i64,
    pub alt_text: String,
    pub caption: String,
    pub description: String,
    pub uploaded_by: i64,
    pub created_at: DateTime<Utc>,
}

/// 站点设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub autoload: bool,
    pub updated_at: DateTime<Utc>,
}

/// 主题或插件记录（两张表结构相同）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extension {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub is_active: bool,
    pub settings: Document,
    pub created_at: DateTime<Utc>,
}

/// 分页结果
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub pages: i64,
    pub current_page: i64,
    pub per_page: i64,
}

impl<T: Serialize> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, page: Pagination) -> Self {
        let pages = if total == 0 {
            0
        } else {
            (total + page.per_page - 1) / page.per_page
        };
        Self {
            items,
            total,
            pages,
            current_page: page.page,
            per_page: page.per_page,
        }
    }

    /// 以指定键名包装列表，例如 `{"posts": [...], "total": ..}`
    pub fn into_json(self, key: &str) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        body.insert(
            key.to_string(),
            serde_json::to_value(&self.items).unwrap_or_default(),
        );
        body.insert("total".into(), self.total.into());
        body.insert("pages".into(), self.pages.into());
        body.insert("current_page".into(), self.current_page.into());
        body.insert("per_page".into(), self.per_page.into());
        serde_json::Value::Object(body)
    }
}

/// 分页参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
}

impl Pagination {
    pub const MAX_PER_PAGE: i64 = 100;

    pub fn new(page: Option<i64>, per_page: Option<i64>, default_per_page: i64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(default_per_page)
                .clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None, 10)
    }
}

/// 解析存储为文本的 JSON 对象，非法内容视为空对象
pub fn parse_document(raw: Option<String>) -> Document {
    raw.and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        .and_then(|v| match v {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}
