use std::collections::HashMap;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::policy::{authorize, Action, Actor};
use crate::error::{CmsError, Result};
use crate::models::{Category, CategoryNode};
use crate::utils::{double_option, non_empty, slugify};

const CATEGORY_COLUMNS: &str = "id, name, slug, description, parent_id, image_url, meta_title, \
     meta_description, is_visible, created_at";

/// 分类的创建/更新参数，缺省字段保持不变
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CategoryInput {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "double_option")]
    pub parent_id: Option<Option<i64>>,
    pub image_url: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub is_visible: Option<bool>,
}

/// 后台列表项
#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    #[serde(flatten)]
    pub category: Category,
    pub posts_count: i64,
}

pub(crate) fn map_category(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        parent_id: row.get(4)?,
        image_url: row.get(5)?,
        meta_title: row.get(6)?,
        meta_description: row.get(7)?,
        is_visible: row.get(8)?,
        created_at: row.get(9)?,
    })
}

pub fn find_category(conn: &Connection, id: i64) -> Result<Option<Category>> {
    let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], map_category).optional()?)
}

pub fn get_category(conn: &Connection, id: i64) -> Result<Category> {
    find_category(conn, id)?.ok_or_else(|| CmsError::not_found("Category"))
}

fn all_categories(conn: &Connection) -> Result<Vec<Category>> {
    let sql = format!("SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY name, id");
    let mut stmt = conn.prepare(&sql)?;
    let categories = stmt
        .query_map([], map_category)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(categories)
}

/// 公开的分类树：顶级分类及其递归子分类，隐藏分类连同其子树不出现
pub fn category_tree(conn: &Connection) -> Result<Vec<CategoryNode>> {
    let mut by_parent: HashMap<Option<i64>, Vec<Category>> = HashMap::new();
    for category in all_categories(conn)? {
        if category.is_visible {
            by_parent.entry(category.parent_id).or_default().push(category);
        }
    }

    fn build(parent: Option<i64>, by_parent: &mut HashMap<Option<i64>, Vec<Category>>) -> Vec<CategoryNode> {
        let children = by_parent.remove(&parent).unwrap_or_default();
        children
            .into_iter()
            .map(|category| {
                let children = build(Some(category.id), by_parent);
                CategoryNode { category, children }
            })
            .collect()
    }

    Ok(build(None, &mut by_parent))
}

/// 后台的平铺列表，带文章数
pub fn list_categories_admin(conn: &Connection) -> Result<Vec<CategorySummary>> {
    let sql = format!(
        "SELECT {CATEGORY_COLUMNS}, (SELECT COUNT(*) FROM posts p WHERE p.category_id = categories.id)
         FROM categories ORDER BY name, id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CategorySummary {
                category: map_category(row)?,
                posts_count: row.get(10)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// 检查把 `id` 挂到 `parent` 下是否会形成环
fn ensure_no_cycle(conn: &Connection, id: Option<i64>, parent: i64) -> Result<()> {
    let mut current = Some(parent);
    let mut steps = 0;
    while let Some(ancestor) = current {
        if Some(ancestor) == id {
            return Err(CmsError::validation(
                "A category cannot be its own ancestor",
            ));
        }
        current = conn
            .query_row(
                "SELECT parent_id FROM categories WHERE id = ?1",
                params![ancestor],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()?
            .ok_or_else(|| CmsError::validation(format!("Parent category {ancestor} does not exist")))?;
        steps += 1;
        if steps > 10_000 {
            return Err(CmsError::validation("Category hierarchy is too deep"));
        }
    }
    Ok(())
}

fn ensure_slug_free(conn: &Connection, slug: &str, exclude: Option<i64>) -> Result<()> {
    let taken = conn
        .query_row(
            "SELECT 1 FROM categories WHERE slug = ?1 AND id != ?2",
            params![slug, exclude.unwrap_or(-1)],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if taken {
        return Err(CmsError::conflict("slug", format!("Category slug '{slug}' already exists")));
    }
    Ok(())
}

pub fn create_category(conn: &mut Connection, actor: &Actor, input: CategoryInput) -> Result<Category> {
    authorize(actor, Action::ManageTaxonomy, None)?;
    let name = non_empty(input.name.as_deref())
        .ok_or_else(|| CmsError::validation("name is required"))?;
    let slug = slugify(non_empty(input.slug.as_deref()).as_deref().unwrap_or(&name));
    let parent_id = input.parent_id.flatten();

    let tx = conn.transaction()?;
    ensure_slug_free(&tx, &slug, None)?;
    if let Some(parent) = parent_id {
        ensure_no_cycle(&tx, None, parent)?;
    }
    tx.execute(
        "INSERT INTO categories (name, slug, description, parent_id, image_url, meta_title,
             meta_description, is_visible, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            name,
            slug,
            input.description,
            parent_id,
            input.image_url,
            input.meta_title,
            input.meta_description,
            input.is_visible.unwrap_or(true),
            Utc::now(),
        ],
    )?;
    let category = get_category(&tx, tx.last_insert_rowid())?;
    tx.commit()?;

    info!(category_id = category.id, slug = %category.slug, "创建分类");
    Ok(category)
}

pub fn update_category(conn: &mut Connection, actor: &Actor, id: i64, input: CategoryInput) -> Result<Category> {
    authorize(actor, Action::ManageTaxonomy, None)?;
    let tx = conn.transaction()?;
    let mut category = get_category(&tx, id)?;

    if let Some(name) = input.name.as_deref() {
        let name = non_empty(Some(name)).ok_or_else(|| CmsError::validation("name cannot be empty"))?;
        if name != category.name && input.slug.is_none() {
            category.slug = slugify(&name);
        }
        category.name = name;
    }
    if let Some(slug) = non_empty(input.slug.as_deref()) {
        category.slug = slugify(&slug);
    }
    ensure_slug_free(&tx, &category.slug, Some(id))?;

    if let Some(parent_id) = input.parent_id {
        if let Some(parent) = parent_id {
            ensure_no_cycle(&tx, Some(id), parent)?;
        }
        category.parent_id = parent_id;
    }
    if input.description.is_some() {
        category.description = input.description;
    }
    if input.image_url.is_some() {
        category.image_url = input.image_url;
    }
    if input.meta_title.is_some() {
        category.meta_title = input.meta_title;
    }
    if input.meta_description.is_some() {
        category.meta_description = input.meta_description;
    }
    if let Some(visible) = input.is_visible {
        category.is_visible = visible;
    }

    tx.execute(
        "UPDATE categories SET name = ?1, slug = ?2, description = ?3, parent_id = ?4,
             image_url = ?5, meta_title = ?6, meta_description = ?7, is_visible = ?8
         WHERE id = ?9",
        params![
            category.name,
            category.slug,
            category.description,
            category.parent_id,
            category.image_url,
            category.meta_title,
            category.meta_description,
            category.is_visible,
            id,
        ],
    )?;
    tx.commit()?;
    Ok(category)
}

/// 删除分类：文章失去分类，子分类提升为顶级
pub fn delete_category(conn: &mut Connection, actor: &Actor, id: i64) -> Result<()> {
    authorize(actor, Action::ManageTaxonomy, None)?;
    let tx = conn.transaction()?;
    get_category(&tx, id)?;
    let detached = tx.execute("UPDATE posts SET category_id = NULL WHERE category_id = ?1", params![id])?;
    tx.execute("UPDATE categories SET parent_id = NULL WHERE parent_id = ?1", params![id])?;
    tx.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
    tx.commit()?;

    info!(category_id = id, detached_posts = detached, "删除分类");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Role;

    const EDITOR: Actor = Actor { id: 1, role: Role::Editor };

    fn named(name: &str, parent: Option<i64>) -> CategoryInput {
        CategoryInput {
            name: Some(name.into()),
            parent_id: Some(parent),
            ..CategoryInput::default()
        }
    }

    #[test]
    fn test_tree_nesting_and_visibility() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let tech = create_category(conn, &EDITOR, named("Tech", None))?;
            let rust = create_category(conn, &EDITOR, named("Rust", Some(tech.id)))?;
            create_category(conn, &EDITOR, named("Async", Some(rust.id)))?;
            let mut hidden = named("Archive", None);
            hidden.is_visible = Some(false);
            create_category(conn, &EDITOR, hidden)?;

            let tree = category_tree(conn)?;
            assert_eq!(tree.len(), 1);
            assert_eq!(tree[0].category.slug, "tech");
            assert_eq!(tree[0].children[0].children[0].category.name, "Async");
            assert_eq!(list_categories_admin(conn)?.len(), 4);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_cycle_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let a = create_category(conn, &EDITOR, named("A", None))?;
            let b = create_category(conn, &EDITOR, named("B", Some(a.id)))?;
            let c = create_category(conn, &EDITOR, named("C", Some(b.id)))?;

            let err = update_category(conn, &EDITOR, a.id, CategoryInput {
                parent_id: Some(Some(c.id)),
                ..CategoryInput::default()
            })
            .unwrap_err();
            assert!(matches!(err, CmsError::Validation(_)));

            let err = update_category(conn, &EDITOR, a.id, CategoryInput {
                parent_id: Some(Some(a.id)),
                ..CategoryInput::default()
            })
            .unwrap_err();
            assert!(matches!(err, CmsError::Validation(_)));

            let err = create_category(conn, &EDITOR, named("D", Some(999))).unwrap_err();
            assert!(matches!(err, CmsError::Validation(_)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_duplicate_slug_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            create_category(conn, &EDITOR, named("News", None))?;
            let other = create_category(conn, &EDITOR, named("Events", None))?;
            let err = create_category(conn, &EDITOR, named("news", None)).unwrap_err();
            assert!(matches!(err, CmsError::Conflict { .. }));
            let err = update_category(conn, &EDITOR, other.id, named("News", None)).unwrap_err();
            assert!(matches!(err, CmsError::Conflict { .. }));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_promotes_children() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let parent = create_category(conn, &EDITOR, named("Parent", None))?;
            let child = create_category(conn, &EDITOR, named("Child", Some(parent.id)))?;
            delete_category(conn, &EDITOR, parent.id)?;
            assert_eq!(get_category(conn, child.id)?.parent_id, None);
            assert!(find_category(conn, parent.id)?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_author_cannot_manage() {
        let db = Database::open_in_memory().unwrap();
        let author = Actor { id: 2, role: Role::Author };
        db.with_conn(|conn| {
            let err = create_category(conn, &author, named("X", None)).unwrap_err();
            assert!(matches!(err, CmsError::Forbidden(_)));
            Ok(())
        })
        .unwrap();
    }
}
