//! Grammar session drill - speak (or type) each phrase in turn.
//!
//! A minimal front end for the grammar session: one phrase is active at a
//! time, and as soon as it is recognized the next phrase is loaded from inside
//! the listener while recognition keeps running.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use grammar_session::config::{AppConfig, InputSource};
use grammar_session::engine::{EventSink, RecognitionBackend};
use grammar_session::stt::console_backend;
use grammar_session::{GrammarPhrase, GrammarSession, RecognitionListener, spawn_event_pump};

/// Walks through the configured phrases, one recognition at a time.
struct Drill {
    session: GrammarSession,
    phrases: Vec<GrammarPhrase>,
    current: Mutex<usize>,
}

impl Drill {
    fn new(session: GrammarSession, phrases: Vec<GrammarPhrase>) -> Self {
        Self { session, phrases, current: Mutex::new(0) }
    }

    fn first(&self) -> &GrammarPhrase {
        &self.phrases[0]
    }
}

impl RecognitionListener for Drill {
    fn on_recognized(&self, text: &str) {
        let mut current = self.current.lock();
        let expected = &self.phrases[*current];

        // A result from the previous grammar can still arrive right after a swap
        if !expected.matches(text) {
            debug!("Ignoring '{}' while waiting for '{}'", text, expected);
            return;
        }

        info!("✅ Correct: '{}'", text);

        *current = (*current + 1) % self.phrases.len();
        let next = &self.phrases[*current];
        match self.session.load(next.as_str()) {
            Ok(_) => info!("👉 Say '{}'", next),
            Err(e) => error!("❌ Failed to load '{}': {}", next, e),
        }
    }
}

/// Build the recognition backend for the configured input.
fn create_backend(config: &AppConfig, sink: EventSink) -> Result<Box<dyn RecognitionBackend>> {
    match config.input {
        InputSource::Console => Ok(Box::new(console_backend(sink))),
        InputSource::Microphone => microphone_backend(config, sink),
    }
}

#[cfg(feature = "native")]
fn microphone_backend(config: &AppConfig, sink: EventSink) -> Result<Box<dyn RecognitionBackend>> {
    Ok(Box::new(grammar_session::stt::MicrophoneBackend::new(config, sink)?))
}

#[cfg(not(feature = "native"))]
fn microphone_backend(_config: &AppConfig, _sink: EventSink) -> Result<Box<dyn RecognitionBackend>> {
    anyhow::bail!("microphone input requires building with the `native` feature")
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_args();

    if config.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    // Respect RUST_LOG env var, fallback to verbose flag, default to info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if config.verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🎤 Grammar session v{}", env!("CARGO_PKG_VERSION"));

    let phrases = match config.validate() {
        Ok(phrases) => phrases,
        Err(e) => {
            error!("❌ Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    config.log_config();

    let (session, events) = match GrammarSession::new(|sink| create_backend(&config, sink)) {
        Ok(created) => created,
        Err(e) => {
            error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let drill = Arc::new(Drill::new(session.clone(), phrases));
    session.register_listener(&drill);

    let mut pump = spawn_event_pump(session.clone(), events);

    session.load(drill.first().as_str())?;
    info!("👉 Say '{}'", drill.first());
    if config.input == InputSource::Console {
        info!("Type what you would say and press Enter (Ctrl+D to finish)");
    }

    // Stop on a signal, or when the engine stops producing (console EOF)
    let pump_finished = tokio::select! {
        _ = wait_for_shutdown() => false,
        _ = &mut pump => {
            info!("Recognition ended");
            true
        }
    };

    session.shutdown();

    if !pump_finished {
        let graceful_timeout = tokio::time::Duration::from_millis(500);
        tokio::select! {
            _ = &mut pump => {
                debug!("Event pump finished gracefully");
            }
            _ = tokio::time::sleep(graceful_timeout) => {
                debug!("Event pump didn't finish in time");
            }
        }
    }

    info!("✅ Grammar session stopped");
    Ok(())
}
