use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voxloop::audio::{MicInput, SpeakerOutput};
use voxloop::config::VoiceConfig;
use voxloop::session::{SessionCommand, SessionNotice, SessionRunner, SessionState};
use voxloop::transport::WebSocketConnector;
use voxloop::voices::{fetch_voices, select_voice};

/// Hands-free voice conversations with a remote agent
#[derive(Parser)]
#[command(name = "voxloop", version, about)]
struct Cli {
    /// Config file (defaults to the per-user config if present)
    #[arg(short, long, env = "VOXLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP base URL of the voice agent
    #[arg(long, env = "VOXLOOP_API_BASE")]
    api_base: Option<String>,

    /// Credential token
    #[arg(long, env = "VOXLOOP_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Voice id (defaults to the first voice listed)
    #[arg(long, env = "VOXLOOP_VOICE")]
    voice: Option<u64>,

    /// VAD threshold in dBFS
    #[arg(long)]
    threshold_db: Option<f32>,

    /// Do not listen for interruptions while replies play
    #[arg(long)]
    no_barge_in: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the voices offered by the agent
    Voices,
    /// Start a conversation (default)
    Talk,
}

impl Cli {
    fn load_config(&self) -> Result<VoiceConfig> {
        let mut config = VoiceConfig::load_or_default(self.config.as_deref())?;
        if let Some(api_base) = &self.api_base {
            config = config.with_api_base(api_base);
        }
        if let Some(token) = &self.token {
            config = config.with_token(token);
        }
        if let Some(voice) = self.voice {
            config = config.with_voice(voice);
        }
        if let Some(threshold_db) = self.threshold_db {
            config = config.with_threshold_db(threshold_db);
        }
        if self.no_barge_in {
            config = config.without_barge_in();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxloop=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.load_config().context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Talk) {
        Commands::Voices => list_voices(&config).await,
        Commands::Talk => talk(config).await,
    }
}

async fn list_voices(config: &VoiceConfig) -> Result<()> {
    let voices = fetch_voices(&config.server.api_base).await?;
    if voices.is_empty() {
        println!("No voices available");
    }
    for voice in voices {
        match voice.description.as_deref() {
            Some(description) => println!("{:>4}  {}  {}", voice.id, voice.label(), description),
            None => println!("{:>4}  {}", voice.id, voice.label()),
        }
    }
    Ok(())
}

async fn talk(config: VoiceConfig) -> Result<()> {
    let voices = fetch_voices(&config.server.api_base)
        .await
        .context("Could not load the voice list")?;
    let voice = select_voice(&voices, config.server.voice_id)?;
    info!("Starting Voxloop with voice {}", voice.label());
    println!("Talking to {} - press Ctrl-C to end", voice.label());
    let voice_id = voice.id;

    let (runner, mut handle) = SessionRunner::new(
        config,
        Box::new(MicInput::new()),
        Box::new(SpeakerOutput::new()),
        Box::new(WebSocketConnector::new()),
    )?;

    handle.open(voice_id)?;

    let commands = handle.command_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, ending session");
            let _ = commands.send(SessionCommand::End);
        }
    });

    let ui = async move {
        while let Some(notice) = handle.next_notice().await {
            match notice {
                SessionNotice::StateChanged(SessionState::Listening) => println!("[listening]"),
                SessionNotice::StateChanged(SessionState::Processing) => println!("[thinking]"),
                SessionNotice::StateChanged(_) => {}
                SessionNotice::Ready { voice, .. } => println!("[connected: {}]", voice),
                SessionNotice::Transcript(text) => println!("you:   {}", text),
                SessionNotice::Reply(text) => println!("agent: {}", text),
                SessionNotice::ServerError(message) => println!("[{}]", message),
                SessionNotice::SegmentSent { .. } => {}
                SessionNotice::Fatal(error) => {
                    warn!("Session failed: {}", error);
                    eprintln!("{}", error.user_message());
                    break;
                }
                SessionNotice::Ended => {
                    println!("[session ended]");
                    break;
                }
            }
        }
        let _ = handle.shutdown();
    };

    let (result, ()) = tokio::join!(runner.run(), ui);
    result?;
    Ok(())
}
