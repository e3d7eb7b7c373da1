//! Continuous recognition from the default microphone.

use anyhow::Result;
use tracing::info;

use super::recognizer::{WhisperSource, speech_pipeline};
use crate::audio::Capturer;
use crate::config::AppConfig;
use crate::engine::{ContinuousBackend, EventSink, RecognitionBackend};
use crate::grammar::GrammarPhrase;

/// Audio capture + VAD + Whisper, matched against the active grammar.
pub struct MicrophoneBackend {
    capturer: Capturer,
    recognizer: ContinuousBackend<WhisperSource>,
}

impl MicrophoneBackend {
    /// Open the default input device and load the speech models.
    ///
    /// # Errors
    /// Returns an error if no input device is available or the models fail
    /// to load.
    pub fn new(config: &AppConfig, sink: EventSink) -> Result<Self> {
        let (segmenter, source) = speech_pipeline(config)?;
        let capturer = Capturer::new(config.sample_rate, move |samples: &[f32]| segmenter.accept_waveform(samples))?;

        Ok(Self { capturer, recognizer: ContinuousBackend::new(source, sink) })
    }
}

impl RecognitionBackend for MicrophoneBackend {
    fn start(&mut self, grammar: &GrammarPhrase) -> Result<()> {
        self.recognizer.start(grammar)?;
        self.capturer.start()?;
        info!("🎤 Listening for '{}'", grammar);
        Ok(())
    }

    fn request_update(&mut self) -> Result<()> {
        self.recognizer.request_update()
    }

    fn replace_active_grammar(&mut self, grammar: &GrammarPhrase) -> Result<()> {
        self.recognizer.replace_active_grammar(grammar)?;
        info!("🎤 Listening for '{}'", grammar);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.recognizer.resume()
    }

    fn destroy(&mut self) {
        // Stop the producer before the consumer
        self.capturer.shutdown();
        self.recognizer.destroy();
    }
}
