//! 媒体库：上传文件的存储目录和元数据记录

use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::policy::{authorize, Action, Actor};
use crate::error::{CmsError, Result};
use crate::models::{FileType, Media, Paginated, Pagination};

/// 允许上传的扩展名
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "txt", "pdf", "png", "jpg", "jpeg", "gif", "webp", "mp4", "mp3", "zip", "doc", "docx",
];

const MEDIA_COLUMNS: &str = "id, title, filename, original_filename, file_path, url, file_type, \
     mime_type, file_size, alt_text, caption, description, uploaded_by, created_at";

/// 按扩展名分类，返回类型和存放目录
pub fn classify(ext: &str) -> (FileType, &'static str) {
    match ext {
        "jpg" | "jpeg" | "png" | "gif" | "webp" => (FileType::Image, "images"),
        "mp4" => (FileType::Video, "videos"),
        "mp3" => (FileType::Audio, "audio"),
        _ => (FileType::Document, "documents"),
    }
}

/// 清理用户提供的文件名：去掉路径部分，只保留 ASCII 字母数字和 `._-`
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// 取出允许的扩展名（小写），不允许时返回 `None`
pub fn allowed_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// 从上传的原始文件名取出扩展名，并生成要记录的文件名
///
/// 扩展名取自未清理的文件名，非 ASCII 的主名清理后为空时记作 `file.<ext>`。
pub fn upload_name(original_name: &str) -> Option<(String, String)> {
    let base = original_name.rsplit(['/', '\\']).next().unwrap_or("");
    let ext = allowed_extension(base)?;
    let stem = base.rsplit_once('.').map_or("", |(stem, _)| stem);
    Some((format!("{}.{ext}", sanitize_filename(stem)), ext))
}

/// 已写入磁盘的文件
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub original_filename: String,
    /// 相对上传目录的路径，如 `images/<uuid>.png`
    pub relative_path: String,
    pub url: String,
    pub file_type: FileType,
    pub size: i64,
}

/// 上传目录
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    max_bytes: usize,
}

impl MediaStore {
    pub fn new(root: PathBuf, max_bytes: usize) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, max_bytes })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 把相对路径解析到上传目录内，拒绝 `..` 和绝对路径
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(CmsError::validation("Path traversal detected")),
            }
        }
        if resolved == self.root {
            return Err(CmsError::validation("Empty file path"));
        }
        Ok(resolved)
    }

    /// 校验并保存上传的文件，存储文件名为随机 UUID
    pub async fn save(&self, original_name: &str, data: &[u8]) -> Result<StoredFile> {
        if original_name.trim().is_empty() {
            return Err(CmsError::validation("No file selected"));
        }
        if data.is_empty() {
            return Err(CmsError::validation("Empty file"));
        }
        if data.len() > self.max_bytes {
            return Err(CmsError::validation(format!(
                "File too large: {} bytes (max {})",
                data.len(),
                self.max_bytes
            )));
        }
        let (original_filename, ext) = upload_name(original_name)
            .ok_or_else(|| CmsError::validation("Invalid file type"))?;
        let (file_type, folder) = classify(&ext);

        let filename = format!("{}.{ext}", Uuid::new_v4().simple());
        let relative_path = format!("{folder}/{filename}");
        let path = self.resolve(&relative_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;

        debug!(path = %path.display(), size = data.len(), "文件已保存");
        Ok(StoredFile {
            url: format!("/uploads/{relative_path}"),
            filename,
            original_filename,
            relative_path,
            file_type,
            size: data.len() as i64,
        })
    }

    /// 删除文件，失败只记录日志
    pub async fn remove(&self, relative: &str) {
        let path = match self.resolve(relative) {
            Ok(path) => path,
            Err(e) => {
                warn!(path = relative, error = %e, "拒绝删除上传目录之外的文件");
                return;
            }
        };
        match fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "文件已删除"),
            Err(e) => warn!(path = %path.display(), error = %e, "删除文件失败"),
        }
    }
}

/// 上传时附带的描述字段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MediaMeta {
    pub title: Option<String>,
    pub alt_text: Option<String>,
    pub caption: Option<String>,
    pub description: Option<String>,
}

fn map_media(row: &Row<'_>) -> rusqlite::Result<Media> {
    Ok(Media {
        id: row.get(0)?,
        title: row.get(1)?,
        filename: row.get(2)?,
        original_filename: row.get(3)?,
        file_path: row.get(4)?,
        url: row.get(5)?,
        file_type: row.get(6)?,
        mime_type: row.get(7)?,
        file_size: row.get(8)?,
        alt_text: row.get(9)?,
        caption: row.get(10)?,
        description: row.get(11)?,
        uploaded_by: row.get(12)?,
        created_at: row.get(13)?,
    })
}

pub fn get_media(conn: &Connection, id: i64) -> Result<Media> {
    let sql = format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ?1");
    conn.query_row(&sql, params![id], map_media)
        .optional()?
        .ok_or_else(|| CmsError::not_found("Media"))
}

/// 记录一次上传
pub fn record_upload(
    conn: &Connection,
    actor: &Actor,
    file: &StoredFile,
    mime_type: Option<String>,
    meta: MediaMeta,
) -> Result<Media> {
    authorize(actor, Action::UploadMedia, None)?;
    conn.execute(
        "INSERT INTO media (title, filename, original_filename, file_path, url, file_type, mime_type,
             file_size, alt_text, caption, description, uploaded_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            meta.title.unwrap_or_else(|| file.original_filename.clone()),
            file.filename,
            file.original_filename,
            file.relative_path,
            file.url,
            file.file_type,
            mime_type,
            file.size,
            meta.alt_text.unwrap_or_default(),
            meta.caption.unwrap_or_default(),
            meta.description.unwrap_or_default(),
            actor.id,
            Utc::now(),
        ],
    )?;
    let media = get_media(conn, conn.last_insert_rowid())?;
    info!(media_id = media.id, url = %media.url, "上传媒体文件");
    Ok(media)
}

pub fn list_media(
    conn: &Connection,
    actor: &Actor,
    file_type: Option<FileType>,
    page: Pagination,
) -> Result<Paginated<Media>> {
    authorize(actor, Action::ViewMedia, None)?;
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM media WHERE (?1 IS NULL OR file_type = ?1)",
        params![file_type],
        |row| row.get(0),
    )?;
    let sql = format!(
        "SELECT {MEDIA_COLUMNS} FROM media WHERE (?1 IS NULL OR file_type = ?1)
         ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params![file_type, page.per_page, page.offset()], map_media)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Paginated::new(items, total, page))
}

/// 修改描述字段。编辑和管理员可以修改任何文件，作者只能修改自己上传的
pub fn update_media(conn: &mut Connection, actor: &Actor, id: i64, meta: MediaMeta) -> Result<Media> {
    let tx = conn.transaction()?;
    let mut media = get_media(&tx, id)?;
    authorize(actor, Action::EditMedia, Some(media.uploaded_by))?;

    if let Some(title) = meta.title {
        media.title = title;
    }
    if let Some(alt_text) = meta.alt_text {
        media.alt_text = alt_text;
    }
    if let Some(caption) = meta.caption {
        media.caption = caption;
    }
    if let Some(description) = meta.description {
        media.description = description;
    }
    tx.execute(
        "UPDATE media SET title = ?1, alt_text = ?2, caption = ?3, description = ?4 WHERE id = ?5",
        params![media.title, media.alt_text, media.caption, media.description, id],
    )?;
    tx.commit()?;
    Ok(media)
}

/// 删除数据库记录并返回它，磁盘文件由调用方尽力删除
pub fn delete_media(conn: &mut Connection, actor: &Actor, id: i64) -> Result<Media> {
    let tx = conn.transaction()?;
    let media = get_media(&tx, id)?;
    authorize(actor, Action::EditMedia, Some(media.uploaded_by))?;
    tx.execute("DELETE FROM media WHERE id = ?1", params![id])?;
    tx.commit()?;

    info!(media_id = id, "删除媒体记录");
    Ok(media)
}
