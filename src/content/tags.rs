use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::auth::policy::{authorize, Action, Actor};
use crate::error::{CmsError, Result};
use crate::models::Tag;
use crate::utils::{non_empty, slugify, unique_slug};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TagInput {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagSummary {
    #[serde(flatten)]
    pub tag: Tag,
    pub posts_count: i64,
}

pub(crate) fn map_tag(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn get_tag(conn: &Connection, id: i64) -> Result<Tag> {
    conn.query_row(
        "SELECT id, name, slug, description, created_at FROM tags WHERE id = ?1",
        params![id],
        map_tag,
    )
    .optional()?
    .ok_or_else(|| CmsError::not_found("Tag"))
}

pub fn list_tags(conn: &Connection) -> Result<Vec<TagSummary>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.slug, t.description, t.created_at,
                (SELECT COUNT(*) FROM post_tags pt WHERE pt.tag_id = t.id)
         FROM tags t ORDER BY t.name",
    )?;
    let tags = stmt
        .query_map([], |row| {
            Ok(TagSummary {
                tag: map_tag(row)?,
                posts_count: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tags)
}

/// 文章的标签，按名称排序
pub fn tags_for_post(conn: &Connection, post_id: i64) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare_cached(
        "SELECT t.id, t.name, t.slug, t.description, t.created_at
         FROM tags t JOIN post_tags pt ON pt.tag_id = t.id
         WHERE pt.post_id = ?1 ORDER BY t.name",
    )?;
    let tags = stmt
        .query_map(params![post_id], map_tag)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tags)
}

fn ensure_name_free(conn: &Connection, name: &str, exclude: Option<i64>) -> Result<()> {
    let taken = conn
        .query_row(
            "SELECT 1 FROM tags WHERE name = ?1 AND id != ?2",
            params![name, exclude.unwrap_or(-1)],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if taken {
        return Err(CmsError::conflict("name", format!("Tag '{name}' already exists")));
    }
    Ok(())
}

fn insert_tag(conn: &Connection, name: &str, slug: Option<&str>, description: Option<&str>) -> Result<i64> {
    let slug = unique_slug(conn, "tags", &slugify(slug.unwrap_or(name)), None)?;
    conn.execute(
        "INSERT INTO tags (name, slug, description, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![name, slug, description, Utc::now()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// 按名称（区分大小写的精确匹配）查找标签，不存在则创建，返回去重后的 ID 列表
pub fn resolve_tags(conn: &Connection, names: &[String]) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let existing = conn
            .query_row("SELECT id FROM tags WHERE name = ?1", params![name], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => insert_tag(conn, name, None, None)?,
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

pub fn create_tag(conn: &mut Connection, actor: &Actor, input: TagInput) -> Result<Tag> {
    authorize(actor, Action::ManageTaxonomy, None)?;
    let name = non_empty(input.name.as_deref())
        .ok_or_else(|| CmsError::validation("name is required"))?;

    let tx = conn.transaction()?;
    ensure_name_free(&tx, &name, None)?;
    let id = insert_tag(
        &tx,
        &name,
        non_empty(input.slug.as_deref()).as_deref(),
        input.description.as_deref(),
    )?;
    let tag = get_tag(&tx, id)?;
    tx.commit()?;
    Ok(tag)
}

pub fn update_tag(conn: &mut Connection, actor: &Actor, id: i64, input: TagInput) -> Result<Tag> {
    authorize(actor, Action::ManageTaxonomy, None)?;
    let tx = conn.transaction()?;
    let mut tag = get_tag(&tx, id)?;

    if let Some(name) = non_empty(input.name.as_deref()) {
        if name != tag.name {
            ensure_name_free(&tx, &name, Some(id))?;
            if input.slug.is_none() {
                tag.slug = unique_slug(&tx, "tags", &slugify(&name), Some(id))?;
            }
            tag.name = name;
        }
    }
    if let Some(slug) = non_empty(input.slug.as_deref()) {
        tag.slug = unique_slug(&tx, "tags", &slugify(&slug), Some(id))?;
    }
    if input.description.is_some() {
        tag.description = input.description;
    }

    tx.execute(
        "UPDATE tags SET name = ?1, slug = ?2, description = ?3 WHERE id = ?4",
        params![tag.name, tag.slug, tag.description, id],
    )?;
    tx.commit()?;
    Ok(tag)
}

pub fn delete_tag(conn: &mut Connection, actor: &Actor, id: i64) -> Result<()> {
    authorize(actor, Action::ManageTaxonomy, None)?;
    let tx = conn.transaction()?;
    get_tag(&tx, id)?;
    tx.execute("DELETE FROM post_tags WHERE tag_id = ?1", params![id])?;
    tx.execute("DELETE FROM tags WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Role;

    #[test]
    fn test_resolve_tags_case_sensitive() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let first = resolve_tags(conn, &["Rust".into(), "rust".into(), "Rust".into(), " ".into()])?;
            assert_eq!(first.len(), 2);
            let again = resolve_tags(conn, &["Rust".into()])?;
            assert_eq!(again[0], first[0]);

            let slugs: Vec<String> = list_tags(conn)?.into_iter().map(|t| t.tag.slug).collect();
            assert_eq!(slugs, vec!["rust".to_string(), "rust-1".to_string()]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_tag_crud() {
        let db = Database::open_in_memory().unwrap();
        let editor = Actor { id: 1, role: Role::Editor };
        db.with_conn(|conn| {
            let tag = create_tag(conn, &editor, TagInput {
                name: Some("Web Dev".into()),
                ..TagInput::default()
            })?;
            assert_eq!(tag.slug, "web-dev");

            let err = create_tag(conn, &editor, TagInput {
                name: Some("Web Dev".into()),
                ..TagInput::default()
            })
            .unwrap_err();
            assert!(matches!(err, CmsError::Conflict { .. }));

            let renamed = update_tag(conn, &editor, tag.id, TagInput {
                name: Some("Frontend".into()),
                ..TagInput::default()
            })?;
            assert_eq!(renamed.slug, "frontend");

            delete_tag(conn, &editor, tag.id)?;
            assert!(matches!(get_tag(conn, tag.id), Err(CmsError::NotFound(_))));
            Ok(())
        })
        .unwrap();
    }
}
