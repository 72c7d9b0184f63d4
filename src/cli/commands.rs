use crate::core::{Engine, Server};
use crate::models::config::CONFIG_FILE;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// 指定站点目录
    #[arg(short, long, default_value = ".")]
    pub path: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 初始化站点：写入配置、创建目录和数据库
    Init(InitArgs),

    /// 启动 HTTP 服务器
    Server(ServerArgs),

    /// 导出备份
    Backup(BackupArgs),

    /// 从备份恢复
    Restore(RestoreArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// 站点地址
    #[arg(short, long)]
    pub url: Option<String>,

    /// 覆盖已有的配置文件
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ServerArgs {
    /// 服务器端口，默认使用配置文件中的端口
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Args)]
pub struct BackupArgs {
    /// 备份文件路径，默认写入备份目录
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct RestoreArgs {
    /// 备份文件路径
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

// 默认配置模板
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# 监听地址
host: 0.0.0.0
port: 5000

# 站点地址
site_url: {url}

# 存储位置（相对路径以站点目录为基准）
database_path: instance/cms.db
upload_dir: uploads
static_dir: static
backup_dir: backups

# 认证，生产环境务必修改密钥（也可用 JWT_SECRET_KEY 环境变量）
jwt_secret: rust-cms-secret-key-change-this-in-production
token_ttl_hours: 24

# 上传文件大小上限（字节）
max_upload_bytes: 52428800

# 默认每页条数
per_page: 10

# 评论
comments:
  # 访客评论是否直接通过
  auto_approve: true

# 首次启动时创建的管理员
admin:
  username: admin
  email: admin@cms.com
  password: admin123
"#;

// 初始化站点目录：写入配置文件并创建前端目录
fn initialize_site_structure(site_path: &PathBuf, args: &InitArgs) -> Result<()> {
    fs::create_dir_all(site_path)?;

    let config_path = site_path.join(CONFIG_FILE);
    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists, keeping it (use --force to overwrite)",
            "!".yellow(),
            config_path.display()
        );
    } else {
        let url = args.url.as_deref().unwrap_or("http://localhost:5000");
        fs::write(&config_path, DEFAULT_CONFIG_TEMPLATE.replace("{url}", url))?;
        info!("Wrote {}", config_path.display());
    }

    fs::create_dir_all(site_path.join("static"))?;
    Ok(())
}

/// 执行命令
pub async fn execute(cli: Cli) -> Result<()> {
    let site_path = cli.path.clone();

    match cli.command {
        Commands::Init(args) => {
            initialize_site_structure(&site_path, &args)?;
            let engine = Engine::new(site_path.clone())?;
            info!("Initialized new site at: {}", engine.base_dir.display());
            println!(
                "{} Admin login: {}",
                "✓".bright_green(),
                engine.config.admin.username.bright_white()
            );
        }
        Commands::Server(args) => {
            let mut engine = Engine::new(site_path)?;
            if let Some(port) = args.port {
                engine.config.port = port;
            }
            let addr = engine.config.socket_addr()?;
            Server::new(engine.app_state()?, addr).start().await?;
        }
        Commands::Backup(args) => {
            let engine = Engine::new(site_path)?;
            let file = args.file.unwrap_or_else(|| {
                engine
                    .config
                    .backup_dir
                    .join(crate::backup::backup_file_name())
            });
            let size = engine.backup_to(&file)?;
            println!(
                "{} Backup written to {} ({} bytes)",
                "✓".bright_green(),
                file.display(),
                size
            );
        }
        Commands::Restore(args) => {
            let engine = Engine::new(site_path)?;
            let summary = engine.restore_from(&args.file)?;
            println!(
                "{} Restored {} rows and {} files (previous data saved to {})",
                "✓".bright_green(),
                summary.rows,
                summary.files,
                summary.safety_backup
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;

    #[test]
    fn test_default_template_parses() {
        let yaml = DEFAULT_CONFIG_TEMPLATE.replace("{url}", "https://blog.example.com");
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        let defaults = Config::default();
        assert_eq!(config.site_url, "https://blog.example.com");
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.jwt_secret, defaults.jwt_secret);
        assert_eq!(config.max_upload_bytes, defaults.max_upload_bytes);
        assert!(config.comments.auto_approve);
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["rust-cms", "--path", "site", "server", "--port", "8080"]).unwrap();
        assert_eq!(cli.path, PathBuf::from("site"));
        assert!(matches!(cli.command, Commands::Server(ServerArgs { port: Some(8080) })));

        let cli = Cli::try_parse_from(["rust-cms", "restore", "b.json.gz"]).unwrap();
        assert!(matches!(cli.command, Commands::Restore(_)));
        assert!(Cli::try_parse_from(["rust-cms", "restore"]).is_err());
    }
}
