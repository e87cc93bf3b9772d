//! Colloquy terminal host.
//!
//! Runs the live audio engine against the in-process loopback stream: speak
//! into the microphone and hear yourself echoed back through the playback
//! scheduler. Useful for checking devices, latency, and barge-in behavior
//! without a remote model. Wire a real transport by swapping the connector.

mod recorder;
mod settings;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use colloquy_core::audio::device::list_input_devices;
use colloquy_core::playback::{sink::CpalSink, OutputSink, PLAYBACK_SAMPLE_RATE};
use colloquy_core::session::stub::EchoConnector;
use colloquy_core::{SessionConfig, SessionController, SupportedLanguage};
use recorder::{TeeSink, WavTap};
use settings::{default_settings_path, load_settings};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "colloquy", about = "Live conversational audio engine (loopback demo)")]
struct Cli {
    /// List audio input devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Microphone to use, by name (overrides settings).
    #[arg(long)]
    device: Option<String>,

    /// Tutoring language, e.g. "kannada" or "english" (overrides settings).
    #[arg(long)]
    language: Option<String>,

    /// Dump received speech to a WAV file (overrides settings).
    #[arg(long)]
    record: Option<PathBuf>,

    /// Settings file path.
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn parse_language(name: &str) -> anyhow::Result<SupportedLanguage> {
    serde_json::from_value(serde_json::Value::String(name.to_lowercase()))
        .with_context(|| format!("unknown language '{name}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "colloquy=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        let devices = list_input_devices();
        if devices.is_empty() {
            println!("no input devices found");
        }
        for device in devices {
            let mut notes = Vec::new();
            if device.is_default {
                notes.push("default");
            }
            if device.is_loopback_like {
                notes.push("loopback-like");
            }
            let suffix = if notes.is_empty() {
                String::new()
            } else {
                format!("  [{}]", notes.join(", "))
            };
            println!("{}{}", device.name, suffix);
        }
        return Ok(());
    }

    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    info!(path = ?settings_path, "settings loaded");

    if let Some(device) = cli.device {
        app_settings.preferred_input_device = Some(device);
    }
    if let Some(language) = cli.language.as_deref() {
        app_settings.language = parse_language(language)?;
    }
    if let Some(record) = cli.record {
        app_settings.record_path = Some(record);
    }

    let config = SessionConfig {
        language: app_settings.language,
        preferred_input_device: app_settings.preferred_input_device.clone(),
        auto_language_switch: app_settings.auto_language_switch,
        silence_threshold: app_settings.silence_threshold,
        ..SessionConfig::default()
    };

    let connector = Box::new(EchoConnector::new());

    let tap = match app_settings.record_path.as_deref() {
        Some(path) => Some(WavTap::create(path)?),
        None => None,
    };

    let controller = match tap.clone() {
        Some(tap) => SessionController::with_sink_factory(
            config,
            connector,
            Box::new(move || {
                let inner = CpalSink::open(PLAYBACK_SAMPLE_RATE)?;
                Ok(Box::new(TeeSink::new(Box::new(inner), tap.clone())) as Box<dyn OutputSink>)
            }),
        ),
        None => SessionController::new(config, connector),
    };

    let mut transcripts = controller.subscribe_transcripts();
    let mut status = controller.subscribe_status();

    controller.start().context("failed to start session")?;
    println!(
        "session streaming in {} (loopback echo) — press Ctrl+C to stop",
        controller.language().name()
    );

    tokio::spawn(async move {
        while let Ok(event) = transcripts.recv().await {
            println!(
                "[{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                event.text
            );
        }
    });
    tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            info!(state = ?event.state, detail = ?event.detail, "session status");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    println!("stopping…");

    controller.stop().context("failed to stop session")?;
    if let Some(tap) = tap {
        tap.finalize();
    }
    info!("session ended");
    Ok(())
}
