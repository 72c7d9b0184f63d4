use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use rust_cms::cli;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志系统，RUST_LOG 未设置时默认 info
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // 解析命令行参数
    let cli = cli::Cli::parse();

    // 打印欢迎信息
    println!("{}", r"
 ____           _      ____ __  __ ____
|  _ \ _   _ __| |_   / ___|  \/  / ___|
| |_) | | | / _` __| | |   | |\/| \___ \
|  _ <| |_| \__ \ |_  | |___| |  | |___) |
|_| \_\\__,_|___/\__|  \____|_|  |_|____/
    ".bright_cyan());

    println!("{} {}", "Rust-CMS".bright_cyan(), env!("CARGO_PKG_VERSION").bright_green());
    println!("{}", "A blog/CMS backend written in Rust".bright_white());
    println!();

    // 执行命令
    if let Err(e) = cli::execute(cli).await {
        error!("Error: {}", e);

        // 打印错误链
        let mut source = e.source();
        while let Some(e) = source {
            error!("Caused by: {}", e);
            source = e.source();
        }

        std::process::exit(1);
    }

    Ok(())
}
