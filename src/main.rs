use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

use lumina_spark::config::AudioOutput;
use lumina_spark::daemon::language_list;
use lumina_spark::voice::{AudioSink, FileSink, NullSink, SpeechCapability, SpeechSynthesis};
use lumina_spark::{
    Assistant, BackendStatus, Config, Daemon, GenAiClient, HealthClient, Language, Services,
};

/// Lumina Spark - wake phrase activated voice assistant
#[derive(Parser)]
#[command(name = "lumina", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "LUMINA_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the answer service
    #[arg(long)]
    api_url: Option<String>,

    /// Recognition language (en-US, hi-IN, ta-IN, te-IN)
    #[arg(short, long)]
    language: Option<String>,

    /// Capture the question as soon as listening starts
    #[arg(long)]
    no_wake_phrase: bool,

    /// Stream answers as they are generated
    #[arg(long)]
    stream: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive voice session (default)
    Run,
    /// Check the answer service
    Health,
    /// Ask one question
    Ask {
        /// The question
        question: String,
        /// Also synthesize the answer
        #[arg(long)]
        speak: bool,
    },
    /// Synthesize text in the selected language
    Speak {
        /// Text to speak
        text: String,
        /// Write the audio here instead of the audio output
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Combine a question and a follow-up into one refined question
    Refine {
        /// Original question
        question: String,
        /// Follow-up prompt
        follow_up: String,
    },
    /// Summarize a transcript file (or stdin with `-`)
    Summarize {
        /// Transcript file
        #[arg(default_value = "-")]
        file: String,
    },
    /// List supported languages
    Languages,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,lumina_spark=info",
        1 => "info,lumina_spark=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if matches!(cli.command, Some(Command::Languages)) {
        println!("{}", language_list());
        return Ok(());
    }

    let config = load_config(&cli)?;
    tracing::debug!(?config, "loaded configuration");

    let client = GenAiClient::new(&config.api)?;

    match cli.command {
        None | Some(Command::Run) => run_session(config, client).await,
        Some(Command::Health) => cmd_health(&client).await,
        Some(Command::Ask { question, speak }) => cmd_ask(&config, client, &question, speak).await,
        Some(Command::Speak { text, out }) => cmd_speak(&config, &client, &text, out).await,
        Some(Command::Refine {
            question,
            follow_up,
        }) => {
            let refined = client.improve_question(&question, &follow_up).await?;
            println!("{refined}");
            Ok(())
        }
        Some(Command::Summarize { file }) => {
            let transcript = read_input(&file).await?;
            let summary = client.summarize_transcript(&transcript).await?;
            println!("{summary}");
            Ok(())
        }
        Some(Command::Languages) => Ok(()),
    }
}

/// Load configuration and apply command line overrides
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(url) = &cli.api_url {
        config.set_api_url(url)?;
    }
    if let Some(language) = &cli.language {
        config.set_language(language)?;
    }
    if cli.no_wake_phrase {
        config.voice.wake_phrase_enabled = false;
    }
    if cli.stream {
        config.voice.streaming_enabled = true;
    }

    Ok(config)
}

fn audio_sink(output: &AudioOutput) -> Arc<dyn AudioSink> {
    match output {
        AudioOutput::File(dir) => Arc::new(FileSink::new(dir.clone())),
        #[cfg(feature = "speaker")]
        AudioOutput::Speaker => Arc::new(lumina_spark::voice::SpeakerSink),
        #[cfg(not(feature = "speaker"))]
        AudioOutput::Speaker => {
            tracing::warn!("built without speaker support, audio output disabled");
            Arc::new(NullSink)
        }
        AudioOutput::Disabled => Arc::new(NullSink),
    }
}

/// Interactive voice session
async fn run_session(config: Config, client: GenAiClient) -> anyhow::Result<()> {
    let capability = SpeechCapability::detect(&config.speech);
    let health = HealthClient::new(client.http().clone(), client.base_url())?;
    let client = Arc::new(client);
    let assistant = Assistant::new(
        client.clone(),
        client,
        config.voice.streaming_enabled,
    );

    let daemon = Daemon::new(
        &config,
        capability,
        Services {
            assistant,
            health,
            sink: audio_sink(&config.audio),
        },
    )?;

    if config.voice.wake_phrase_enabled {
        tracing::info!(
            wake_phrase = %config.voice.wake_phrase,
            language = %config.voice.language,
            "lumina ready"
        );
    } else {
        tracing::info!(language = %config.voice.language, "lumina ready (no wake phrase)");
    }

    daemon.run().await?;
    Ok(())
}

async fn cmd_health(client: &GenAiClient) -> anyhow::Result<()> {
    let health = HealthClient::new(client.http().clone(), client.base_url())?;
    match health.check().await {
        BackendStatus::Ready => {
            println!("{}: ok", client.base_url());
            Ok(())
        }
        BackendStatus::Misconfigured(reason) => {
            anyhow::bail!("{}: {reason}", client.base_url())
        }
    }
}

async fn cmd_ask(
    config: &Config,
    client: GenAiClient,
    question: &str,
    speak: bool,
) -> anyhow::Result<()> {
    let streaming = config.voice.streaming_enabled;

    if !speak {
        if streaming {
            let mut stream = client.stream_answer(question).await?;
            while let Some(fragment) = stream.next().await {
                print!("{}", fragment?);
                std::io::Write::flush(&mut std::io::stdout())?;
            }
            println!();
        } else {
            println!("{}", client.answer_question(question).await?);
        }
        return Ok(());
    }

    let client = Arc::new(client);
    let assistant = Assistant::new(client.clone(), client, streaming);
    let outcome = assistant
        .answer_turn(question, &config.voice.language, |fragment| {
            print!("{fragment}");
            let _ = std::io::Write::flush(&mut std::io::stdout());
        })
        .await?;

    if streaming {
        println!();
    } else {
        println!("{}", outcome.answer);
    }
    if let Some(e) = &outcome.stream_error {
        eprintln!("answer interrupted: {e}");
    }
    match (&outcome.audio, &outcome.synthesis_error) {
        (Some(audio), _) => audio_sink(&config.audio).play(audio).await?,
        (None, Some(e)) => eprintln!("speech synthesis failed: {e}"),
        (None, None) => {}
    }
    Ok(())
}

async fn cmd_speak(
    config: &Config,
    client: &GenAiClient,
    text: &str,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let tts_code = Language::tts_code_for(&config.voice.language);
    let audio = client.synthesize(text, tts_code).await?;

    match out {
        Some(path) => {
            tokio::fs::write(&path, audio.bytes()).await?;
            println!("audio: {}", path.display());
        }
        None => audio_sink(&config.audio).play(&audio).await?,
    }
    Ok(())
}

/// Read a file, or stdin for `-`
async fn read_input(file: &str) -> anyhow::Result<String> {
    if file == "-" {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await?;
        Ok(text)
    } else {
        Ok(tokio::fs::read_to_string(file).await?)
    }
}
