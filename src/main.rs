use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_interviewer::audio::{InputSource, OutputTarget};
use voice_interviewer::live::StatusLevel;
use voice_interviewer::{
    create_router, AppState, Config, ConfiguredIo, Credential, SessionController, StartRequest,
    UiEvent,
};

#[derive(Parser)]
#[command(name = "voice-interviewer", version, about = "Realtime voice conversations over Gemini Live")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, short, default_value = "config/voice-interviewer")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one conversation in the terminal
    Run(RunArgs),
    /// Expose the session controller over HTTP
    Serve(ServeArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long)]
    voice: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// System prompt sent as the first turn
    #[arg(long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the system prompt from a file
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// "stdin" for raw f32le samples, or a WAV file
    #[arg(long)]
    input: Option<String>,

    /// "stdout" for raw s16le audio, "null", or a file path
    #[arg(long)]
    output: Option<String>,

    /// Write the transcript here when the session ends
    #[arg(long)]
    transcript_out: Option<PathBuf>,
}

#[derive(Args)]
struct ServeArgs {
    /// Default key for start requests that carry none
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout may carry rendered audio
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run(args) => run(cfg, args).await,
        Commands::Serve(args) => serve(cfg, args).await,
    }
}

async fn run(mut cfg: Config, args: RunArgs) -> Result<()> {
    if let Some(input) = args.input {
        cfg.audio.input = InputSource::from(input);
    }
    if let Some(output) = args.output {
        cfg.audio.output = OutputTarget::from(output);
    }

    let prompt = match (args.prompt, args.prompt_file) {
        (Some(prompt), _) => Some(prompt),
        (None, Some(path)) => Some(
            tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read prompt file {}", path.display()))?,
        ),
        (None, None) => None,
    };

    let interactive_quit = cfg.audio.input != InputSource::Stdin;
    let io = Arc::new(ConfiguredIo::from_config(&cfg));
    let controller = SessionController::new(cfg, io);

    let printer = tokio::spawn(print_events(controller.subscribe()));

    let request = StartRequest {
        api_key: args.api_key,
        voice: args.voice,
        model: args.model,
        prompt,
    };

    let handle = match controller.start(request).await {
        Ok(handle) => handle,
        Err(e) => {
            // Release capture and output before exiting
            controller.stop().await?;
            printer.abort();
            bail!("{}", e);
        }
    };

    if interactive_quit {
        eprintln!("Press q + Enter to end the session");
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        status = handle.wait_until_ended() => info!("Session ended ({})", status.phase),
        _ = quit_requested(), if interactive_quit => info!("Quit requested"),
    }

    if let Some(stats) = controller.stop().await? {
        info!(
            "Sent {} blocks, received {} audio chunks ({} played, {} dropped), {} transcript entries in {:.1}s",
            stats.blocks_sent,
            stats.audio_chunks_received,
            stats.chunks_played,
            stats.chunks_dropped,
            stats.transcript_entries,
            stats.duration_secs
        );
    }

    if let Some(path) = args.transcript_out {
        let transcript = controller.transcript().await.unwrap_or_default();
        if transcript.is_empty() {
            warn!("No transcript to save");
        } else {
            tokio::fs::write(&path, transcript.render())
                .await
                .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
            info!("Transcript saved to {}", path.display());
        }
    }

    printer.abort();
    Ok(())
}

async fn serve(cfg: Config, args: ServeArgs) -> Result<()> {
    let addr = format!(
        "{}:{}",
        cfg.service.http.bind,
        args.port.unwrap_or(cfg.service.http.port)
    );

    let io = Arc::new(ConfiguredIo::from_config(&cfg));
    let mut controller = SessionController::new(cfg, io);
    if let Some(key) = args.api_key {
        controller = controller.with_credential(Credential::new(key));
    }
    let controller = Arc::new(controller);

    let app = create_router(AppState::new(Arc::clone(&controller)));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
        .context("HTTP server failed")?;

    controller.stop().await?;
    Ok(())
}

/// Resolves when the user types `q` and Enter
async fn quit_requested() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().eq_ignore_ascii_case("q") {
            return;
        }
    }
    std::future::pending::<()>().await;
}

/// Conversation log on stderr
async fn print_events(mut events: tokio::sync::broadcast::Receiver<UiEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(UiEvent::Status { level, message }) => {
                let marker = match level {
                    StatusLevel::Info => "..",
                    StatusLevel::Success => "ok",
                    StatusLevel::Warning => "!!",
                    StatusLevel::Error => "xx",
                };
                eprintln!("[{}] {}", marker, message);
            }
            Ok(UiEvent::Message { source, text }) => eprintln!("{}: {}", source, text),
            Ok(UiEvent::Transcript(entry)) => eprintln!("{}", entry.to_line()),
            Ok(UiEvent::Phase(_)) => {}
            Err(RecvError::Lagged(skipped)) => warn!("Conversation log skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}
