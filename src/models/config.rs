use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

/// 默认的 JWT 密钥，仅用于本地开发
pub const DEFAULT_JWT_SECRET: &str = "rust-cms-secret-key-change-this-in-production";

/// 配置文件名
pub const CONFIG_FILE: &str = "cms.yml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 监听地址
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// SQLite 数据库文件
    pub database_path: PathBuf,
    /// 上传目录
    pub upload_dir: PathBuf,
    /// 前端单页应用目录
    pub static_dir: PathBuf,
    /// 备份目录（恢复前的安全副本也写在这里）
    pub backup_dir: PathBuf,
    /// JWT 签名密钥
    pub jwt_secret: String,
    /// 令牌有效期（小时）
    pub token_ttl_hours: i64,
    /// 上传文件大小上限（字节）
    pub max_upload_bytes: usize,
    /// 站点 URL
    pub site_url: String,
    /// 默认每页条数
    pub per_page: i64,
    /// 评论配置
    pub comments: CommentsConfig,
    /// 首次启动时创建的管理员
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentsConfig {
    /// 公开提交的评论是否直接通过
    pub auto_approve: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            database_path: PathBuf::from("instance/cms.db"),
            upload_dir: PathBuf::from("uploads"),
            static_dir: PathBuf::from("static"),
            backup_dir: PathBuf::from("backups"),
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_ttl_hours: 24,
            max_upload_bytes: 50 * 1024 * 1024,
            site_url: "http://localhost:5000".to_string(),
            per_page: 10,
            comments: CommentsConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self { auto_approve: true }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            email: "admin@cms.com".to_string(),
            password: "admin123".to_string(),
        }
    }
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        Ok(config)
    }

    /// 加载站点目录下的配置，叠加环境变量，并把相对路径解析到站点目录
    pub fn load(base_dir: &Path) -> Result<Self> {
        let config_path = base_dir.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Config::default()
        };
        config.apply_env();
        config.resolve_paths(base_dir);
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml).with_context(|| format!("写入配置文件失败: {}", path.display()))?;
        Ok(())
    }

    /// 环境变量覆盖
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("CMS_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("CMS_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!(value = %port, "Invalid CMS_PORT, using {}", self.port),
            }
        }
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("STATIC_DIR") {
            self.static_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("BACKUP_DIR") {
            self.backup_dir = PathBuf::from(path);
        }
        if let Ok(secret) = std::env::var("JWT_SECRET_KEY") {
            if !secret.is_empty() {
                self.jwt_secret = secret;
            }
        }
        if let Ok(password) = std::env::var("CMS_ADMIN_PASSWORD") {
            if !password.is_empty() {
                self.admin.password = password;
            }
        }
    }

    /// 相对路径以站点目录为基准
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        for path in [
            &mut self.database_path,
            &mut self.upload_dir,
            &mut self.static_dir,
            &mut self.backup_dir,
        ] {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("无效的监听地址: {}:{}", self.host, self.port))?;
        Ok(addr)
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("port: 8080\ncomments:\n  auto_approve: false\n").unwrap();
        assert_eq!(config.port, 8080);
        assert!(!config.comments.auto_approve);
        assert_eq!(config.token_ttl_hours, 24);
        assert_eq!(config.admin.username, "admin");
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = Config {
            backup_dir: PathBuf::from("/var/backups/cms"),
            ..Config::default()
        };
        config.resolve_paths(Path::new("/srv/site"));
        assert_eq!(config.database_path, PathBuf::from("/srv/site/instance/cms.db"));
        assert_eq!(config.upload_dir, PathBuf::from("/srv/site/uploads"));
        assert_eq!(config.backup_dir, PathBuf::from("/var/backups/cms"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            per_page: 25,
            ..Config::default()
        };
        config.save(&dir.path().join(CONFIG_FILE)).unwrap();
        let loaded = Config::from_file(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(loaded.per_page, 25);
        assert_eq!(loaded.socket_addr().unwrap().port(), 5000);
    }
}
