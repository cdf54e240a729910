use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use scene_sync::config::ConfigLoader;
use scene_sync::{process_video, subtitle};

/// 场景同步工具 - 检测视频镜头切换，并按场景边界重新切分字幕
#[derive(Parser, Debug)]
#[command(name = "scene-sync")]
#[command(about = "场景同步工具：检测镜头切换、编辑场景、按场景重新切分字幕", long_about = None)]
struct Args {
    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// CLI 模式：处理本地视频文件
    Process {
        /// 输入视频文件路径
        #[arg(short, long)]
        input: String,

        /// 输出目录
        #[arg(short, long, default_value = "./output")]
        output: String,

        /// SRT 字幕文件（可选），提供时输出按场景切分后的字幕
        #[arg(short, long)]
        subtitles: Option<PathBuf>,

        /// 切点阈值（1-30），值越小越敏感
        /// 可通过环境变量 SCENE_SYNC_THRESHOLD 或配置文件设置
        #[arg(long)]
        threshold: Option<f64>,

        /// 帧采样率（每秒采样多少帧用于分析）
        /// 可通过环境变量 SCENE_SYNC_SAMPLE_RATE 或配置文件设置
        #[arg(long)]
        sample_rate: Option<f64>,
    },
    /// 用已导出的场景文件重新切分字幕
    Retime {
        /// 场景 JSON 文件
        #[arg(long)]
        scenes: PathBuf,

        /// SRT 字幕文件
        #[arg(long)]
        subtitles: PathBuf,

        /// 输出 SRT 文件（不指定则打印到标准输出）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Web 服务模式：启动 HTTP 场景编辑服务
    Serve {
        /// 监听地址（默认从环境变量 SCENE_SYNC_PORT 读取，如果不存在则使用 0.0.0.0:9000）
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// 生成默认配置文件
    InitConfig {
        #[arg(long, default_value = "scene-sync.ini")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let extended = ConfigLoader::load_extended_config(args.config.as_deref()).context("加载配置失败")?;

    // 初始化日志
    let level = tracing::Level::from_str(&extended.log_level).unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    match args.command {
        Commands::Process {
            input,
            output,
            subtitles,
            threshold,
            sample_rate,
        } => {
            // webhook_url 从配置文件或环境变量读取
            let config = ConfigLoader::load_config(args.config.as_deref(), threshold, sample_rate, None)
                .context("加载配置失败")?;

            println!(
                "使用配置: threshold={:.2}, sample_rate={:.2} fps, downscale_width={}",
                config.threshold, config.sample_rate, config.downscale_width
            );

            let output_dir = extended
                .output_path
                .filter(|_| output == "./output")
                .unwrap_or_else(|| PathBuf::from(&output));

            process_video(&input, subtitles.as_deref(), &output_dir, config)
                .await
                .context("处理视频失败")?;
        }
        Commands::Retime {
            scenes,
            subtitles,
            output,
        } => {
            let adapted = scene_sync::processor::retime_files(
                &scenes,
                &subtitles,
                extended.process.min_subtitle_overlap,
            )
            .context("重新切分字幕失败")?;
            let srt = subtitle::to_srt(&adapted);
            match output {
                Some(path) => std::fs::write(&path, srt)
                    .with_context(|| format!("写入字幕文件失败: {}", path.display()))?,
                None => print!("{}", srt),
            }
        }
        Commands::Serve { bind } => {
            // 优先使用命令行参数，其次使用环境变量 SCENE_SYNC_PORT，最后使用默认值 9000
            let bind_addr = bind.unwrap_or_else(|| {
                std::env::var("SCENE_SYNC_PORT")
                    .map(|port| format!("0.0.0.0:{}", port))
                    .unwrap_or_else(|_| "0.0.0.0:9000".to_string())
            });
            start_web_server(&bind_addr, extended).await?;
        }
        Commands::InitConfig { path } => {
            ConfigLoader::create_default_config(&path).context("生成配置文件失败")?;
            println!("已生成默认配置文件: {}", path.display());
        }
    }

    Ok(())
}

async fn start_web_server(bind: &str, config: scene_sync::config::ExtendedConfig) -> Result<()> {
    use scene_sync::handler::{self, AppState};
    use tower::ServiceBuilder;
    use tower_http::cors::CorsLayer;

    let app = handler::router(AppState::new(config)).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(format!("绑定地址失败: {}", bind))?;

    tracing::info!("Web 服务器启动在: http://{}", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("可用端点:");
    tracing::info!("  • 健康检查: GET  http://{}/health", bind);
    tracing::info!("  • 创建会话: POST http://{}/sessions", bind);
    tracing::info!("  • 关闭会话: DELETE http://{}/sessions/:id", bind);
    tracing::info!("  • 场景列表: GET|PUT http://{}/sessions/:id/scenes", bind);
    tracing::info!("  • 重新分割: POST http://{}/sessions/:id/detect", bind);
    tracing::info!("  • 场景编辑: POST http://{}/sessions/:id/scenes/:scene_id/{{boundary,adjust,lock,frames}}", bind);
    tracing::info!("  • 补充信息: POST http://{}/sessions/:id/scenes/:scene_id/{{analysis,clean/:edge}}", bind);
    tracing::info!("  • 切分字幕: GET  http://{}/sessions/:id/subtitles/adapted", bind);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    axum::serve(listener, app).await.context("启动服务器失败")?;

    Ok(())
}
