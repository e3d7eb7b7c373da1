//! Microphone speech front end: Silero VAD segments audio, Whisper turns each
//! segment into an utterance.
//!
//! VAD runs on the capture thread (fast, <10ms per chunk); Whisper runs on the
//! recognition worker (slow, 100-500ms per segment). Completed segments cross
//! between the two over a bounded channel, so segments keep queueing while the
//! worker is paused at an update boundary.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use sherpa_rs::silero_vad::{SileroVad, SileroVadConfig};
use sherpa_rs::whisper::{WhisperConfig, WhisperRecognizer};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::engine::{Utterance, UtteranceSource};

/// Minimum speech duration in seconds to be considered valid.
const MIN_SPEECH_DURATION: f32 = 0.1;

/// Maximum speech duration in seconds. Grammar phrases are short.
const MAX_SPEECH_DURATION: f32 = 10.0;

/// VAD window size in samples (512 samples = 32ms at 16kHz).
const VAD_WINDOW_SIZE: i32 = 512;

/// Buffer size in seconds for VAD (how much audio to accumulate).
const VAD_BUFFER_SIZE_SECONDS: f32 = 30.0;

/// Completed segments that may queue up while recognition is paused.
const SEGMENT_QUEUE: usize = 8;

struct VadState {
    vad: SileroVad,
    was_speaking: bool,
    speech_start: Option<Instant>,
}

/// Voice activity detection fed from the audio callback.
pub struct SpeechSegmenter {
    state: Mutex<VadState>,
    segment_tx: SyncSender<Vec<f32>>,
}

impl SpeechSegmenter {
    /// Feed captured samples; completed segments are queued for transcription.
    pub fn accept_waveform(&self, samples: &[f32]) {
        let mut state = self.state.lock();
        state.vad.accept_waveform(samples.to_vec());

        let is_speech = state.vad.is_speech();

        if is_speech && !state.was_speaking {
            state.speech_start = Some(Instant::now());
            debug!("Speech started");
        } else if !is_speech
            && state.was_speaking
            && let Some(start) = state.speech_start.take()
        {
            debug!("Speech ended ({:.1}s)", start.elapsed().as_secs_f32());
        }
        state.was_speaking = is_speech;

        if !state.vad.is_empty() {
            let segment = state.vad.front();
            state.vad.pop();
            drop(state);

            if !segment.samples.is_empty() {
                debug!("Segment completed: {} samples", segment.samples.len());
                // Never block the audio thread
                if let Err(e) = self.segment_tx.try_send(segment.samples) {
                    warn!("Dropped speech segment (queue full): {}", e);
                }
            }
        }
    }
}

/// Whisper transcription of VAD segments, run on the recognition worker.
pub struct WhisperSource {
    whisper: WhisperRecognizer,
    segments: Receiver<Vec<f32>>,
    sample_rate: u32,
}

impl UtteranceSource for WhisperSource {
    fn next_utterance(&mut self, timeout: Duration) -> Utterance {
        let samples = match self.segments.recv_timeout(timeout) {
            Ok(samples) => samples,
            Err(RecvTimeoutError::Timeout) => return Utterance::Silence,
            Err(RecvTimeoutError::Disconnected) => return Utterance::Closed,
        };

        debug!("Transcribing {} samples", samples.len());
        let started = Instant::now();
        let text = self.whisper.transcribe(self.sample_rate, &samples).text.trim().to_string();
        debug!("Transcribed in {:.0}ms", started.elapsed().as_secs_f64() * 1000.0);

        if text.is_empty() {
            debug!("Empty transcription result");
            return Utterance::Silence;
        }
        Utterance::Heard(text)
    }
}

/// Build the VAD front end and the Whisper source sharing one segment queue.
///
/// # Errors
/// Returns an error if Silero VAD or Whisper fail to initialize (missing or
/// invalid model files, unsupported provider).
pub fn speech_pipeline(config: &AppConfig) -> Result<(Arc<SpeechSegmenter>, WhisperSource)> {
    let sample_rate = config.sample_rate;
    let provider = config.effective_stt_provider();

    info!("Initializing speech recognizer with {} provider", provider);

    let vad_config = SileroVadConfig {
        model: config.vad_model_path().to_string_lossy().to_string(),
        threshold: config.vad_threshold,
        sample_rate,
        min_silence_duration: config.vad_silence_duration,
        min_speech_duration: MIN_SPEECH_DURATION,
        max_speech_duration: MAX_SPEECH_DURATION,
        window_size: VAD_WINDOW_SIZE,
        provider: Some(provider.as_sherpa_provider().to_string()),
        num_threads: Some(config.vad_threads.try_into().unwrap_or(1)),
        debug: config.verbose,
    };

    let vad = SileroVad::new(vad_config, VAD_BUFFER_SIZE_SECONDS).map_err(|e| anyhow::anyhow!("Failed to initialize Silero VAD: {}", e))?;
    info!("VAD initialized successfully");

    let stt_language = config.effective_stt_language().to_string();
    info!("STT language: {}", if stt_language.is_empty() { "auto" } else { &stt_language });

    let whisper_config = WhisperConfig {
        encoder: config.whisper_encoder_path().to_string_lossy().to_string(),
        decoder: config.whisper_decoder_path().to_string_lossy().to_string(),
        tokens: config.whisper_tokens_path().to_string_lossy().to_string(),
        language: stt_language,
        provider: Some(provider.as_sherpa_provider().to_string()),
        num_threads: Some(config.stt_threads.try_into().unwrap_or(2)),
        debug: config.verbose,
        ..Default::default()
    };

    let whisper = WhisperRecognizer::new(whisper_config).map_err(|e| anyhow::anyhow!("Failed to initialize Whisper: {}", e))?;
    info!("Whisper recognizer initialized successfully");

    let (segment_tx, segments) = mpsc::sync_channel(SEGMENT_QUEUE);

    let segmenter = SpeechSegmenter {
        state: Mutex::new(VadState { vad, was_speaking: false, speech_start: None }),
        segment_tx,
    };

    Ok((Arc::new(segmenter), WhisperSource { whisper, segments, sample_rate }))
}
