// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 雷达图像客户端 - 采集栅格并进行切片检测
//!
//! cargo run --bin rli-client -- fetch --detect
//! cargo run --bin rli-client -- detect client_image/*.tiff --preset large-ships

use std::path::PathBuf;
use std::thread::JoinHandle;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, Receiver};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rli_detect::acquisition::FetchOutcome;
use rli_detect::detection::presets::{preset, presets};
use rli_detect::{AppConfig, CancelToken, DetectionTask, Encoding, FetchTask, TaskEvent, TiledProcessor};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "雷达栅格采集与切片检测客户端", long_about = None)]
struct Cli {
    /// JSON 配置文件 (不存在时自动创建)
    #[arg(long, default_value = "rli-client.json", global = true)]
    config: PathBuf,

    /// 模型预设: ground / large-ships / small-ships
    #[arg(long, global = true)]
    preset: Option<String>,

    /// 置信度阈值
    #[arg(long, global = true)]
    conf: Option<f32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 从服务器采集一帧栅格并保存
    Fetch {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        width: Option<u16>,
        #[arg(long)]
        height: Option<u16>,
        /// int8 / uint8 / uint16 / float32
        #[arg(long, value_parser = parse_encoding)]
        encoding: Option<Encoding>,
        /// 同时保存原始数据
        #[arg(long)]
        dump_raw: bool,
        /// 采集后立即检测
        #[arg(long)]
        detect: bool,
    },
    /// 对已有图片进行切片检测
    Detect {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// 列出模型预设
    Presets,
}

fn parse_encoding(s: &str) -> Result<Encoding, String> {
    match s.to_ascii_lowercase().as_str() {
        "int8" | "0" => Ok(Encoding::Int8),
        "uint8" | "1" => Ok(Encoding::UInt8),
        "uint16" | "2" => Ok(Encoding::UInt16),
        "float32" | "4" => Ok(Encoding::Float32),
        _ => Err(format!("unknown encoding '{s}'")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(&cli.config);
    if let Some(p) = &cli.preset {
        config.preset = p.clone();
    }
    if let Some(conf) = cli.conf {
        config.conf_threshold = conf;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("rli-client v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Presets => {
            for p in presets() {
                println!(
                    "{:<12} weights={:<18} imgsz={:<4} tile={:<5} overlap={}",
                    p.name, p.weights, p.input_size, p.tile_size, p.overlap
                );
            }
            Ok(())
        }
        Command::Fetch {
            host,
            port,
            width,
            height,
            encoding,
            dump_raw,
            detect,
        } => {
            config.host = host.unwrap_or(config.host);
            config.port = port.unwrap_or(config.port);
            config.width = width.unwrap_or(config.width);
            config.height = height.unwrap_or(config.height);
            config.encoding = encoding.unwrap_or(config.encoding);
            config.dump_raw |= dump_raw;

            let outcome = fetch(&config)?;
            println!(
                "{} {}x{} ({} bytes{})",
                outcome.image_path.display(),
                outcome.width,
                outcome.height,
                outcome.bytes,
                if outcome.truncated { ", truncated" } else { "" }
            );
            if detect {
                run_detection(&config, vec![outcome.image_path])?;
            }
            Ok(())
        }
        Command::Detect { files } => run_detection(&config, files),
    }
}

fn fetch(config: &AppConfig) -> Result<FetchOutcome> {
    let (tx, rx) = unbounded();
    let handle = FetchTask::new(config.fetch_request()).spawn(tx, CancelToken::new());

    let mut outcome = None;
    for event in drain(&rx) {
        match event {
            TaskEvent::Fetched(o) => outcome = Some(o),
            TaskEvent::Failed(e) => {
                join(handle)?;
                return Err(e).context("fetch failed");
            }
            _ => {}
        }
    }
    join(handle)?;
    outcome.context("fetch task ended without a result")
}

fn run_detection(config: &AppConfig, files: Vec<PathBuf>) -> Result<()> {
    let preset = preset(&config.preset)?;
    let processor = TiledProcessor::from_preset(preset, &config.weights_dir, &config.overlay_dir)
        .with_context(|| format!("cannot build detector for preset '{}'", preset.name))?
        .with_batch_size(config.batch_size);

    let (tx, rx) = unbounded();
    let handle = DetectionTask::new(processor, files, config.conf_threshold)
        .spawn(tx, CancelToken::new());

    let mut failed = 0usize;
    for event in drain(&rx) {
        match event {
            TaskEvent::FileProcessed {
                file,
                detections,
                overlay,
            } => println!("{file} -> {detections} ({})", overlay.display()),
            TaskEvent::FileFailed { file, error } => {
                failed += 1;
                println!("{file} -> error: {error}");
            }
            TaskEvent::Failed(e) => {
                error!(error = %e, "detection aborted");
                failed += 1;
            }
            _ => {}
        }
    }
    join(handle)?;
    if failed > 0 {
        bail!("{failed} file(s) failed");
    }
    Ok(())
}

/// Log progress events and yield everything else until the worker hangs up.
fn drain(rx: &Receiver<TaskEvent>) -> impl Iterator<Item = TaskEvent> + '_ {
    rx.iter().filter(|event| match event {
        TaskEvent::Progress { percent, label } => {
            info!(percent, label = %label, "progress");
            false
        }
        TaskEvent::Finished => false,
        _ => true,
    })
}

fn join<T>(handle: JoinHandle<T>) -> Result<T> {
    handle.join().map_err(|_| {
        warn!("worker thread panicked");
        anyhow::anyhow!("worker thread panicked")
    })
}
