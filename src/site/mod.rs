//! 站点级功能：设置、主题、插件和后台概览

pub mod dashboard;
pub mod plugins;
pub mod settings;
pub mod themes;

use rusqlite::Row;
use serde::Deserialize;

use crate::error::{CmsError, Result};
use crate::models::types::parse_document;
use crate::models::{Document, Extension};

/// 主题和插件表共用的列
const EXTENSION_COLUMNS: &str =
    "id, name, slug, version, description, author, is_active, settings, created_at";

fn map_extension(row: &Row<'_>) -> rusqlite::Result<Extension> {
    Ok(Extension {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        version: row.get(3)?,
        description: row.get(4)?,
        author: row.get(5)?,
        is_active: row.get(6)?,
        settings: parse_document(row.get(7)?),
        created_at: row.get(8)?,
    })
}

/// 注册主题或插件时提交的信息
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtensionInput {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub settings: Option<Document>,
}

/// 版本号必须是语义化版本
fn validate_version(version: Option<&str>) -> Result<()> {
    if let Some(version) = version {
        semver::Version::parse(version)
            .map_err(|e| CmsError::validation(format!("Invalid version '{version}': {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_version() {
        assert!(validate_version(None).is_ok());
        assert!(validate_version(Some("1.0.0")).is_ok());
        assert!(validate_version(Some("2.1.0-beta.1")).is_ok());
        assert!(matches!(validate_version(Some("1.0")), Err(CmsError::Validation(_))));
    }
}
