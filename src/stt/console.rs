//! Typed utterances: each line read from a reader counts as one utterance.
//!
//! Stands in for the microphone on machines without audio input.

use std::io::{BufRead, BufReader, Stdin};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::engine::{ContinuousBackend, EventSink, Utterance, UtteranceSource};

/// Utterance source reading lines on a helper thread.
pub struct ConsoleSource<R> {
    reader: Option<R>,              // Moved to the reader thread on open
    lines: Option<Receiver<String>>,
}

impl<R: BufRead + Send + 'static> ConsoleSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader: Some(reader), lines: None }
    }
}

impl ConsoleSource<BufReader<Stdin>> {
    /// Read utterances from standard input.
    pub fn stdin() -> Self {
        Self::new(BufReader::new(std::io::stdin()))
    }
}

impl<R: BufRead + Send + 'static> UtteranceSource for ConsoleSource<R> {
    fn open(&mut self) -> Result<()> {
        let reader = self.reader.take().context("Console source already opened")?;
        let (tx, rx) = mpsc::channel();

        // Blocking reads cannot be interrupted; the thread ends at EOF or
        // when the receiver is gone and the next line arrives.
        std::thread::Builder::new()
            .name("console-reader".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    match line {
                        Ok(line) => {
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Failed to read utterance: {}", e);
                            break;
                        }
                    }
                }
                debug!("Console reader exiting");
            })
            .context("Failed to spawn console reader")?;

        self.lines = Some(rx);
        Ok(())
    }

    fn next_utterance(&mut self, timeout: Duration) -> Utterance {
        let Some(lines) = self.lines.as_ref() else {
            return Utterance::Closed;
        };

        match lines.recv_timeout(timeout) {
            Ok(line) if line.trim().is_empty() => Utterance::Silence,
            Ok(line) => Utterance::Heard(line.trim().to_string()),
            Err(RecvTimeoutError::Timeout) => Utterance::Silence,
            Err(RecvTimeoutError::Disconnected) => Utterance::Closed,
        }
    }
}

/// Backend recognizing utterances typed on standard input.
pub fn console_backend(sink: EventSink) -> ContinuousBackend<ConsoleSource<BufReader<Stdin>>> {
    ContinuousBackend::new(ConsoleSource::stdin(), sink)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::engine::{EngineEvent, RecognitionBackend};
    use crate::grammar::GrammarPhrase;

    fn next_utterance(source: &mut ConsoleSource<Cursor<&'static str>>) -> Utterance {
        loop {
            match source.next_utterance(Duration::from_millis(500)) {
                Utterance::Silence => continue,
                other => return other,
            }
        }
    }

    #[test]
    fn test_lines_become_utterances() {
        let mut source = ConsoleSource::new(Cursor::new("five\n\n  seven  \n"));
        source.open().unwrap();

        assert_eq!(next_utterance(&mut source), Utterance::Heard("five".to_string()));
        assert_eq!(next_utterance(&mut source), Utterance::Heard("seven".to_string()));
        assert_eq!(next_utterance(&mut source), Utterance::Closed);
    }

    #[test]
    fn test_unopened_source_is_closed() {
        let mut source = ConsoleSource::new(Cursor::new("five\n"));
        assert_eq!(source.next_utterance(Duration::from_millis(1)), Utterance::Closed);
        source.open().unwrap();
        assert!(source.open().is_err());
    }

    #[test]
    fn test_backend_recognizes_typed_phrase() {
        let (sink, mut events) = EventSink::channel();
        let mut backend = ContinuousBackend::new(ConsoleSource::new(Cursor::new("two\nnine\n")), sink);
        backend.start(&GrammarPhrase::new("nine").unwrap()).unwrap();

        // "two" is rejected, "nine" recognized, then EOF ends the worker
        assert_eq!(events.blocking_recv(), Some(EngineEvent::Recognized("nine".to_string())));
        backend.destroy();
        assert_eq!(events.blocking_recv(), None);
    }
}
