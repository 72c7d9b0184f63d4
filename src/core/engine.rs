use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::AppState;
use crate::auth::Actor;
use crate::backup::{self, RestoreSummary};
use crate::db::Database;
use crate::media::MediaStore;
use crate::models::Config;
use crate::users::{bootstrap, first_admin};

/// CMS 引擎：加载配置、打开数据库并完成首次初始化
#[derive(Clone)]
pub struct Engine {
    /// 站点目录
    pub base_dir: PathBuf,
    /// 站点配置（路径已解析为绝对路径）
    pub config: Config,
    /// 数据库
    pub db: Database,
}

impl Engine {
    /// 创建引擎实例
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        info!("工作目录: {}", base_dir.display());
        let config = Config::load(&base_dir)?;
        Self::with_config(base_dir, config)
    }

    /// 使用给定配置创建引擎
    pub fn with_config(base_dir: PathBuf, config: Config) -> Result<Self> {
        if config.uses_default_secret() {
            warn!("正在使用默认的 JWT 密钥，请在 cms.yml 或 JWT_SECRET_KEY 中设置");
        }

        for dir in [&config.upload_dir, &config.backup_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("创建目录失败: {}", dir.display()))?;
        }

        let db = Database::open(&config.database_path)
            .with_context(|| format!("打开数据库失败: {}", config.database_path.display()))?;
        let created = db.with_conn(|conn| bootstrap(conn, &config))?;
        if created {
            info!(
                "已创建管理员账户 {}，请尽快修改默认密码",
                config.admin.username
            );
        }

        Ok(Self { base_dir, config, db })
    }

    /// HTTP 处理函数使用的共享状态
    pub fn app_state(&self) -> Result<AppState> {
        Ok(AppState::new(self.db.clone(), self.config.clone())?)
    }

    fn uploads(&self) -> Result<MediaStore> {
        Ok(MediaStore::new(
            self.config.upload_dir.clone(),
            self.config.max_upload_bytes,
        )?)
    }

    fn operator(&self) -> Result<Actor> {
        let admin = self.db.with_conn(|conn| first_admin(conn))?;
        Ok(Actor::from(&admin))
    }

    /// 导出备份到文件
    pub fn backup_to(&self, path: &Path) -> Result<usize> {
        let actor = self.operator()?;
        let uploads = self.uploads()?;
        let bytes = self
            .db
            .with_conn(|conn| backup::export_backup(conn, &actor, &uploads))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &bytes).with_context(|| format!("写入备份失败: {}", path.display()))?;
        Ok(bytes.len())
    }

    /// 从文件恢复备份
    pub fn restore_from(&self, path: &Path) -> Result<RestoreSummary> {
        let bytes = fs::read(path).with_context(|| format!("读取备份失败: {}", path.display()))?;
        let actor = self.operator()?;
        let uploads = self.uploads()?;
        let summary = self.db.with_conn(|conn| {
            backup::import_backup(conn, &actor, &uploads, &self.config.backup_dir, &bytes)
        })?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.resolve_paths(dir);
        config
    }

    #[test]
    fn test_engine_bootstraps_site() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::with_config(dir.path().to_path_buf(), test_config(dir.path())).unwrap();
        assert!(engine.config.database_path.exists());
        assert!(engine.config.upload_dir.is_dir());
        assert!(engine.operator().is_ok());

        // 再次打开不会重复创建管理员
        let again = Engine::with_config(dir.path().to_path_buf(), test_config(dir.path())).unwrap();
        let admins: i64 = again
            .db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(admins, 1);
    }

    #[test]
    fn test_backup_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::with_config(dir.path().to_path_buf(), test_config(dir.path())).unwrap();
        fs::write(engine.config.upload_dir.join("note.txt"), b"hello").unwrap();

        let archive = dir.path().join("out/site.json.gz");
        assert!(engine.backup_to(&archive).unwrap() > 0);

        fs::remove_file(engine.config.upload_dir.join("note.txt")).unwrap();
        let summary = engine.restore_from(&archive).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(fs::read(engine.config.upload_dir.join("note.txt")).unwrap(), b"hello");
    }
}
