// facesync command line interface
// Analyze speech audio into animation timelines, render through lip-sync providers,
// and validate configuration files

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use facesync_anim::{AudioBuffer, LipSyncPipeline, PhonemeTiming, TimelineMeta};
use facesync_avatar::{CancellationToken, FacesyncConfig, LipSyncRequest, ProviderAdapter, ProviderKind};
use facesync_core::{init_tracing, JitterSource, NoJitter, SeededJitter, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "facesync")]
#[command(about = "Avatar lip-sync: speech audio to viseme and expression timelines", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG wins when set
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a WAV file and print the animation timeline as JSON
    Analyze {
        /// WAV file to analyze
        wav: PathBuf,

        /// Conversational context (listening, crisis, reassuring, ...)
        #[arg(long, default_value = "listening")]
        context: String,

        /// Mood (calm, warm, concerned, ...)
        #[arg(long, default_value = "neutral")]
        mood: String,

        /// Counselor the avatar speaks for
        #[arg(long, default_value = "counselor")]
        counselor: String,

        /// Avatar id; defaults to the counselor's roster entry
        #[arg(long)]
        avatar: Option<String>,

        /// Analysis window in milliseconds
        #[arg(long)]
        window_ms: Option<u32>,

        /// JSON file with phoneme timing ([{"phoneme", "start", "duration"}, ...])
        #[arg(long)]
        phonemes: Option<PathBuf>,

        /// Disable expression jitter
        #[arg(long)]
        no_jitter: bool,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Render an utterance through a lip-sync provider and wait for the result
    Render {
        /// Publicly reachable URL of the utterance audio
        #[arg(long)]
        audio_url: String,

        /// Provider avatar id
        #[arg(long)]
        avatar: String,

        /// Provider (live-avatar, beyond-presence); defaults to the configured one
        #[arg(long)]
        provider: Option<String>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file to check
        file: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FacesyncConfig> {
    let config = match path {
        Some(path) => FacesyncConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            let mut config = FacesyncConfig::default();
            config.apply_env_overrides();
            config
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
            config
        }
    };
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn analyze(
    config: &FacesyncConfig,
    wav: &Path,
    context: String,
    mood: String,
    counselor: String,
    avatar: Option<String>,
    window_ms: Option<u32>,
    phonemes: Option<&Path>,
    no_jitter: bool,
    pretty: bool,
) -> anyhow::Result<()> {
    let mut analysis = config.analysis.clone();
    if let Some(window_ms) = window_ms {
        analysis.window_ms = window_ms;
    }

    let jitter: Arc<dyn JitterSource> = if no_jitter {
        Arc::new(NoJitter)
    } else {
        match config.expression.jitter_seed {
            Some(seed) => Arc::new(SeededJitter::new(seed)),
            None => Arc::new(SeededJitter::from_entropy()),
        }
    };
    let pipeline = LipSyncPipeline::new(analysis, config.expression.clone(), jitter)?;

    let bytes = std::fs::read(wav).with_context(|| format!("Failed to read {}", wav.display()))?;
    let audio = AudioBuffer::from_wav_bytes(&bytes)?;
    info!(
        "Loaded {}: {:.3}s, {} Hz, {} channel(s)",
        wav.display(),
        audio.duration(),
        audio.sample_rate(),
        audio.channels()
    );

    let phonemes: Option<Vec<PhonemeTiming>> = match phonemes {
        Some(path) => {
            let content =
                std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
            Some(serde_json::from_str(&content).context("Invalid phoneme timing JSON")?)
        }
        None => None,
    };

    let avatar_id = avatar.unwrap_or_else(|| config.avatar.profile_for(&counselor).avatar_id);
    let meta = TimelineMeta {
        avatar_id,
        counselor_id: counselor,
        context,
        mood,
    };

    let timeline = pipeline.build_timeline(&audio, phonemes.as_deref(), meta)?;
    print_json(&timeline, pretty)
}

async fn render(
    config: &FacesyncConfig,
    audio_url: String,
    avatar: String,
    provider: Option<String>,
    pretty: bool,
) -> anyhow::Result<()> {
    let kind = match provider {
        Some(name) => name.parse::<ProviderKind>()?,
        None => config.avatar.default_provider,
    };

    let adapter = ProviderAdapter::from_env(config, Arc::new(SystemClock))?;
    if !adapter.has_backend(kind) {
        bail!(
            "{} is not configured; set {}",
            kind,
            config.avatar.provider(kind).api_key_env
        );
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling render");
                cancel.cancel();
            }
        });
    }

    let request = LipSyncRequest::new(audio_url, avatar);
    let clip = adapter.render(kind, &request, None, &cancel).await?;
    print_json(&clip, pretty)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::CheckConfig { file } = &cli.command {
        let config = FacesyncConfig::load(file)
            .with_context(|| format!("{} is not a valid facesync configuration", file.display()))?;
        println!(
            "{} is valid ({} counselors, default provider {})",
            file.display(),
            config.avatar.counselors.len(),
            config.avatar.default_provider
        );
        return Ok(());
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    init_tracing(&config.logging)?;

    match cli.command {
        Commands::Analyze {
            wav,
            context,
            mood,
            counselor,
            avatar,
            window_ms,
            phonemes,
            no_jitter,
            pretty,
        } => analyze(
            &config,
            &wav,
            context,
            mood,
            counselor,
            avatar,
            window_ms,
            phonemes.as_deref(),
            no_jitter,
            pretty,
        ),
        Commands::Render {
            audio_url,
            avatar,
            provider,
            pretty,
        } => render(&config, audio_url, avatar, provider, pretty).await,
        Commands::CheckConfig { .. } => Ok(()),
    }
}
