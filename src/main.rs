mod console;
mod core;
mod stream;

use clap::Parser;
use crate::console::Console;
use crate::core::{ConfigStore, FavoritesRegistry, LogSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use crate::stream::{ProcessSupervisor, SessionController, SourceResolver, SystemLauncher, YtDlpExtractor};

/// Stream a video file or an online video as a continuous live feed to an RTMP(S) endpoint.
#[derive(Debug, Parser)]
#[command(name = "telestream", version, about)]
struct Args {
    /// Config document holding favorites and the last used stream key
    #[arg(long, env = "TELESTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Append-only event log file
    #[arg(long, env = "TELESTREAM_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Encoder executable (overrides `ffmpeg_path` in the config)
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Media URL extractor executable (overrides `ytdlp_path` in the config)
    #[arg(long = "yt-dlp")]
    yt_dlp: Option<PathBuf>,

    /// Seconds to wait for the encoder to exit before killing it
    #[arg(long, default_value_t = 5)]
    grace_secs: u64,

    /// Seconds to wait for the media URL extractor
    #[arg(long, default_value_t = 30)]
    extract_timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let store = args
        .config
        .map(ConfigStore::new)
        .unwrap_or_else(ConfigStore::at_default_location);
    let log_path = args.log_file.unwrap_or_else(LogSink::default_log_path);
    let log = LogSink::with_file(&log_path);
    log::info!("Using config {} and log file {}", store.path().display(), log_path.display());

    let registry = FavoritesRegistry::open(store, log.clone());
    let config = registry.config();

    let extractor = YtDlpExtractor::new(
        args.yt_dlp.or(config.ytdlp_path),
        Duration::from_secs(args.extract_timeout_secs),
    );
    let supervisor = ProcessSupervisor::new(Arc::new(SystemLauncher), args.ffmpeg.or(config.ffmpeg_path))
        .with_grace_period(Duration::from_secs(args.grace_secs));
    let controller = Arc::new(SessionController::new(
        SourceResolver::new(Arc::new(extractor)),
        supervisor,
        log.clone(),
    ));

    console::spawn_log_printer(log.subscribe());
    spawn_signal_watcher(Arc::clone(&controller))?;

    let mut console = Console::new(registry, Arc::clone(&controller), log);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    console.run(stdin.lock(), &mut stdout)?;

    controller.shutdown();
    Ok(())
}

/// Stops the stream on Ctrl-C or SIGTERM so no encoder outlives the console.
fn spawn_signal_watcher(controller: Arc<SessionController>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create signal runtime: {}", e))?;

    std::thread::spawn(move || {
        let signal = runtime.block_on(shutdown_signal());
        log::warn!("Shutdown signal received: {:?}", signal);
        controller.shutdown();
        std::process::exit(signal.exit_code());
    });
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    /// Shell convention: 128 + signal number.
    fn exit_code(self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => 130,
            ShutdownSignal::Terminate => 143,
        }
    }
}

async fn shutdown_signal() -> ShutdownSignal {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => ShutdownSignal::Interrupt,
        _ = term => ShutdownSignal::Terminate,
    }
}
