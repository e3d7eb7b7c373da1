//! Application configuration and CLI argument parsing.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::grammar::GrammarPhrase;

/// Phrases drilled when none are given on the command line.
const DEFAULT_PHRASES: &[&str] = &["zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten"];

/// Hardware acceleration provider for ONNX models.
/// Auto-detected based on platform if not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CPU inference (default fallback, always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA acceleration (Linux only, requires CUDA toolkit)
    Cuda,
    /// Apple CoreML acceleration (macOS only, uses Neural Engine)
    #[value(name = "coreml")]
    CoreMl,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sherpa_provider())
    }
}

impl Provider {
    /// Convert to sherpa-rs provider string.
    pub fn as_sherpa_provider(&self) -> &'static str {
        match self {
            Provider::Cpu => "cpu",
            Provider::Cuda => "cuda",
            Provider::CoreMl => "coreml",
        }
    }
}

/// Where utterances come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    /// Each line typed on stdin is one utterance (no audio hardware needed)
    #[default]
    Console,
    /// Default microphone with VAD + Whisper (requires the `native` feature)
    Microphone,
}

/// Grammar session configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "grammar-session")]
#[command(author, version, about = "Drill spoken phrases against a continuously running recognizer", long_about = None)]
pub struct AppConfig {
    /// Utterance source
    #[arg(long, short = 'i', value_enum, default_value = "console")]
    pub input: InputSource,

    /// Phrase to drill (repeat for several; defaults to the numbers zero..ten)
    #[arg(long = "phrase", short = 'p')]
    pub phrases: Vec<String>,

    /// Directory containing model files (Whisper, VAD)
    #[arg(long, short = 'd', env = "MODEL_DIR", default_value_os_t = default_model_dir())]
    pub model_dir: PathBuf,

    /// Audio sample rate for speech recognition
    #[arg(long, default_value = "16000")]
    pub sample_rate: u32,

    /// Voice activity detection threshold (0.0 - 1.0)
    #[arg(long, default_value = "0.5")]
    pub vad_threshold: f32,

    /// VAD silence duration in seconds (how long to wait before considering speech ended)
    #[arg(long, default_value = "0.5")]
    pub vad_silence_duration: f32,

    /// STT language code (e.g., en, es, fr). Use "auto" for automatic detection
    #[arg(long, default_value = "en")]
    pub stt_language: String,

    /// Hardware acceleration provider (auto-detected if not specified)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Number of threads for all models (0 = auto-detect based on CPU cores)
    #[arg(long, default_value = "0")]
    pub num_threads: usize,

    /// VAD threads (0 = 1)
    #[arg(long, default_value = "0")]
    pub vad_threads: usize,

    /// STT threads (0 = use num_threads)
    #[arg(long, default_value = "0")]
    pub stt_threads: usize,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        let mut config = Self::parse();
        config.normalize();
        config
    }

    /// Fill defaults that depend on the machine or on other options.
    pub fn normalize(&mut self) {
        if self.phrases.is_empty() {
            self.phrases = DEFAULT_PHRASES.iter().map(|p| p.to_string()).collect();
        }
        self.normalize_thread_counts();
    }

    /// Auto-detect thread counts.
    ///
    /// With CUDA one thread is enough (the GPU handles parallelism); on CPU
    /// Whisper gets cores/3 and the VAD a single thread.
    fn normalize_thread_counts(&mut self) {
        let using_cuda = self.effective_stt_provider() == Provider::Cuda;

        if self.num_threads == 0 {
            self.num_threads = if using_cuda { 1 } else { (num_cpus::get() / 3).max(1) };
        }

        if self.vad_threads == 0 {
            self.vad_threads = 1;
        }

        if self.stt_threads == 0 {
            self.stt_threads = if using_cuda { 1 } else { self.num_threads };
        }
    }

    /// Get the effective STT provider.
    pub fn effective_stt_provider(&self) -> Provider {
        self.provider.unwrap_or_else(detect_provider)
    }

    /// Get the effective STT language code for Whisper.
    /// Returns empty string for auto-detection, otherwise the language code.
    pub fn effective_stt_language(&self) -> &str {
        if self.stt_language.eq_ignore_ascii_case("auto") { "" } else { &self.stt_language }
    }

    /// Get the path to the Whisper encoder model.
    pub fn whisper_encoder_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-encoder.int8.onnx")
    }

    /// Get the path to the Whisper decoder model.
    pub fn whisper_decoder_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-decoder.int8.onnx")
    }

    /// Get the path to the Whisper tokens file.
    pub fn whisper_tokens_path(&self) -> PathBuf {
        self.model_dir.join("whisper").join("whisper-small-tokens.txt")
    }

    /// Get the path to the VAD model.
    pub fn vad_model_path(&self) -> PathBuf {
        self.model_dir.join("silero_vad.onnx")
    }

    /// Validate the configuration.
    ///
    /// # Returns
    /// The drill phrases, parsed.
    pub fn validate(&self) -> Result<Vec<GrammarPhrase>> {
        if self.phrases.is_empty() {
            anyhow::bail!("At least one phrase is required");
        }

        let phrases = self.phrases.iter().map(|p| GrammarPhrase::new(p.as_str())).collect::<crate::Result<Vec<_>>>()?;

        if self.input == InputSource::Microphone {
            if !self.model_dir.exists() {
                anyhow::bail!("Model directory does not exist: {}", self.model_dir.display());
            }

            let required_files = [self.whisper_encoder_path(), self.whisper_decoder_path(), self.whisper_tokens_path(), self.vad_model_path()];
            for path in &required_files {
                if !path.exists() {
                    anyhow::bail!("Required model file not found: {}", path.display());
                }
            }
        }

        if self.sample_rate == 0 {
            anyhow::bail!("Sample rate must be positive");
        }

        if !(0.0..=1.0).contains(&self.vad_threshold) {
            anyhow::bail!("VAD threshold must be between 0.0 and 1.0");
        }

        if self.vad_silence_duration <= 0.0 {
            anyhow::bail!("VAD silence duration must be positive");
        }

        Ok(phrases)
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Input: {:?}", self.input);
        info!("  Phrases: {}", self.phrases.join(", "));
        if self.input == InputSource::Microphone {
            info!("  Model directory: {}", self.model_dir.display());
            info!("  Sample rate: {} Hz", self.sample_rate);
            info!("  VAD threshold: {}", self.vad_threshold);
            info!("  VAD silence duration: {}s", self.vad_silence_duration);
            info!("  STT language: {}", self.stt_language);
            info!("  STT provider: {}", self.effective_stt_provider());
            info!("  Threads: VAD={}, STT={}", self.vad_threads, self.stt_threads);
        }
    }
}

/// Get the default model directory (~/.grammar-session/models).
fn default_model_dir() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".grammar-session").join("models")
    } else {
        PathBuf::from("models")
    }
}

/// Auto-detect the best hardware acceleration provider.
fn detect_provider() -> Provider {
    #[cfg(target_os = "macos")]
    {
        Provider::CoreMl
    }

    #[cfg(target_os = "linux")]
    {
        if has_nvidia_gpu() { Provider::Cuda } else { Provider::Cpu }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Provider::Cpu
    }
}

/// Check if an NVIDIA GPU is available (Linux only).
#[cfg(target_os = "linux")]
fn has_nvidia_gpu() -> bool {
    use std::path::Path;

    let nvidia_paths = [
        "/dev/nvidia0",
        "/dev/nvidiactl",
        "/dev/nvidia-uvm",
        // Jetson devices
        "/dev/nvhost-ctrl",
        "/dev/nvhost-ctrl-gpu",
        "/etc/nv_tegra_release",
    ];

    nvidia_paths.iter().any(|path| Path::new(path).exists())
}
