//! End-to-end grammar swap scenarios against a recording backend.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use grammar_session::engine::{
    ContinuousBackend, EngineEvent, EngineEvents, EngineState, EventSink, RecognitionBackend, Utterance, UtteranceSource,
};
use grammar_session::{GrammarPhrase, GrammarSession, LoadOutcome, SessionError, SessionPhase};

/// Only one session may own the engine at a time, so scenarios take turns.
static SERIAL: Mutex<()> = parking_lot::const_mutex(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Start(String),
    RequestUpdate,
    Replace(String),
    Resume,
    Destroy,
}

/// Backend that only records what the session asks of it.
struct RecordingBackend {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecognitionBackend for RecordingBackend {
    fn start(&mut self, grammar: &GrammarPhrase) -> anyhow::Result<()> {
        self.calls.lock().push(Call::Start(grammar.to_string()));
        Ok(())
    }

    fn request_update(&mut self) -> anyhow::Result<()> {
        self.calls.lock().push(Call::RequestUpdate);
        Ok(())
    }

    fn replace_active_grammar(&mut self, grammar: &GrammarPhrase) -> anyhow::Result<()> {
        self.calls.lock().push(Call::Replace(grammar.to_string()));
        Ok(())
    }

    fn resume(&mut self) -> anyhow::Result<()> {
        self.calls.lock().push(Call::Resume);
        Ok(())
    }

    fn destroy(&mut self) {
        self.calls.lock().push(Call::Destroy);
    }
}

struct Harness {
    session: GrammarSession,
    events: EngineEvents,
    engine: EventSink,
    calls: Arc<Mutex<Vec<Call>>>,
    heard: Arc<Mutex<Vec<String>>>,
    _listener: Arc<dyn Fn(&str) + Send + Sync>,
    _serial: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let serial = serial();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut engine = None;

        let (session, events) = GrammarSession::new(|sink| {
            engine = Some(sink.clone());
            Ok(RecordingBackend { calls: calls.clone() })
        })
        .unwrap();

        let heard = Arc::new(Mutex::new(Vec::new()));
        let listener = {
            let heard = heard.clone();
            Arc::new(move |text: &str| heard.lock().push(text.to_string()))
        };
        session.register_listener(&listener);

        Self { session, events, engine: engine.unwrap(), calls, heard, _listener: listener, _serial: serial }
    }

    /// Emit an event from the "engine" and let the session process it.
    fn emit(&mut self, event: EngineEvent) {
        assert!(self.engine.send(event));
        assert_eq!(self.session.dispatch_pending(&mut self.events), 1);
    }

    fn recognized(&mut self, text: &str) {
        self.emit(EngineEvent::Recognized(text.to_string()));
    }

    fn update_requests(&self) -> usize {
        self.calls.lock().iter().filter(|c| **c == Call::RequestUpdate).count()
    }

    fn active(&self) -> Option<String> {
        self.session.active_grammar().map(String::from)
    }

    fn heard(&self) -> Vec<String> {
        self.heard.lock().clone()
    }
}

#[test]
fn first_load_starts_engine_without_update_request() {
    let h = Harness::new();

    assert_eq!(h.session.load("five"), Ok(LoadOutcome::Started));
    assert_eq!(*h.calls.lock(), vec![Call::Start("five".to_string())]);
    assert_eq!(h.update_requests(), 0);
    assert_eq!(h.active().as_deref(), Some("five"));
    assert_eq!(h.session.engine_state(), EngineState::Running);
}

#[test]
fn burst_of_loads_applies_only_the_last_phrase() {
    let mut h = Harness::new();
    h.session.load("zero").unwrap();

    let burst = ["one", "two", "three", "four", "five", "six"];
    for phrase in burst {
        h.session.load(phrase).unwrap();
    }
    assert_eq!(h.update_requests(), 1);
    assert_eq!(h.session.phase(), SessionPhase::SwapPending(GrammarPhrase::new("six").unwrap()));

    h.emit(EngineEvent::UpdateReached);

    assert_eq!(h.active().as_deref(), Some("six"));
    assert_eq!(h.session.phase(), SessionPhase::Active);
    let replaced: Vec<Call> = h.calls.lock().iter().filter(|c| matches!(c, Call::Replace(_))).cloned().collect();
    assert_eq!(replaced, vec![Call::Replace("six".to_string())]);
}

#[test]
fn unmatched_recognition_is_forwarded_verbatim() {
    let mut h = Harness::new();
    h.session.load("five").unwrap();

    h.recognized("something else entirely");
    assert_eq!(h.heard(), vec!["something else entirely"]);
}

#[test]
fn shutdown_rejects_loads_and_silences_listener() {
    let mut h = Harness::new();
    h.session.load("five").unwrap();
    h.session.load("six").unwrap();

    h.session.shutdown();
    assert_eq!(h.session.load("seven"), Err(SessionError::EngineUnavailable));
    assert_eq!(h.session.phase(), SessionPhase::Destroyed);
    assert_eq!(h.calls.lock().last(), Some(&Call::Destroy));

    h.recognized("five");
    h.emit(EngineEvent::UpdateReached);
    assert!(h.heard().is_empty());
    assert!(!h.calls.lock().iter().any(|c| matches!(c, Call::Replace(_))));
}

#[test]
fn registering_a_new_listener_stops_the_old_one() {
    let mut h = Harness::new();
    h.session.load("five").unwrap();
    h.recognized("five");

    let second_heard = Arc::new(Mutex::new(Vec::new()));
    let second = {
        let heard = second_heard.clone();
        Arc::new(move |text: &str| heard.lock().push(text.to_string()))
    };
    h.session.register_listener(&second);

    h.recognized("five");
    h.recognized("five");
    assert_eq!(h.heard(), vec!["five"]);
    assert_eq!(*second_heard.lock(), vec!["five", "five"]);

    h.session.clear_listener();
    h.recognized("five");
    assert_eq!(second_heard.lock().len(), 2);
}

#[test]
fn five_then_seven() {
    let mut h = Harness::new();

    h.session.load("five").unwrap();
    h.recognized("five");
    assert_eq!(h.heard(), vec!["five"]);

    assert_eq!(h.session.load("seven"), Ok(LoadOutcome::SwapRequested));
    assert_eq!(h.session.pending_grammar(), Some(GrammarPhrase::new("seven").unwrap()));

    h.emit(EngineEvent::UpdateReached);
    assert_eq!(h.active().as_deref(), Some("seven"));

    h.recognized("seven");
    h.recognized("seven");
    assert_eq!(h.heard(), vec!["five", "seven", "seven"]);

    assert_eq!(
        *h.calls.lock(),
        vec![Call::Start("five".to_string()), Call::RequestUpdate, Call::Replace("seven".to_string()), Call::Resume]
    );
}

#[test]
fn two_then_nine_without_boundary_in_between() {
    let mut h = Harness::new();
    h.session.load("one").unwrap();

    assert_eq!(h.session.load("two"), Ok(LoadOutcome::SwapRequested));
    assert_eq!(h.session.load("nine"), Ok(LoadOutcome::SwapSuperseded));
    assert_eq!(h.update_requests(), 1);

    h.emit(EngineEvent::UpdateReached);
    assert_eq!(h.active().as_deref(), Some("nine"));
    assert!(!h.calls.lock().contains(&Call::Replace("two".to_string())));

    // The next swap goes through a fresh handshake
    assert_eq!(h.session.load("three"), Ok(LoadOutcome::SwapRequested));
    assert_eq!(h.update_requests(), 2);
}

#[test]
fn spurious_boundary_is_ignored() {
    let mut h = Harness::new();
    h.session.load("five").unwrap();

    h.emit(EngineEvent::UpdateReached);

    assert_eq!(h.session.phase(), SessionPhase::Active);
    assert_eq!(h.active().as_deref(), Some("five"));
    assert_eq!(*h.calls.lock(), vec![Call::Start("five".to_string())]);

    // The following swap still pairs one request with one resume
    h.session.load("seven").unwrap();
    h.emit(EngineEvent::UpdateReached);
    assert_eq!(
        *h.calls.lock(),
        vec![Call::Start("five".to_string()), Call::RequestUpdate, Call::Replace("seven".to_string()), Call::Resume]
    );
}

/// Utterances pushed one at a time by the scenario.
struct Spoken(Receiver<String>);

impl UtteranceSource for Spoken {
    fn next_utterance(&mut self, timeout: Duration) -> Utterance {
        match self.0.recv_timeout(timeout) {
            Ok(text) => Utterance::Heard(text),
            Err(RecvTimeoutError::Timeout) => Utterance::Silence,
            Err(RecvTimeoutError::Disconnected) => Utterance::Closed,
        }
    }
}

fn wait_for_event(events: &mut EngineEvents) -> EngineEvent {
    for _ in 0..200 {
        if let Ok(event) = events.try_recv() {
            return event;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("no engine event within 2s");
}

#[test]
fn engine_stays_paused_after_spurious_boundary_until_swap_applied() {
    let _serial = serial();
    let (speak, heard) = mpsc::channel();
    let (session, mut events) = GrammarSession::new(|sink| Ok(ContinuousBackend::new(Spoken(heard), sink))).unwrap();

    session.load("five").unwrap();
    session.handle_event(EngineEvent::UpdateReached);
    session.load("seven").unwrap();

    let boundary = wait_for_event(&mut events);
    assert_eq!(boundary, EngineEvent::UpdateReached);

    // Swap not applied yet: the engine must not decode anything
    speak.send("five".to_string()).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert!(events.try_recv().is_err());

    session.handle_event(boundary);
    assert_eq!(session.active_grammar().map(String::from).as_deref(), Some("seven"));

    speak.send("seven".to_string()).unwrap();
    assert_eq!(wait_for_event(&mut events), EngineEvent::Recognized("seven".to_string()));

    session.shutdown();
}

#[test]
fn load_after_recognition_ended_reports_backend_error() {
    let _serial = serial();
    let (speak, heard) = mpsc::channel::<String>();
    let (session, mut events) = GrammarSession::new(|sink| Ok(ContinuousBackend::new(Spoken(heard), sink))).unwrap();
    session.load("five").unwrap();

    drop(speak);
    assert!(events.blocking_recv().is_none());

    assert!(matches!(session.load("seven"), Err(SessionError::Backend(_))));
    assert_eq!(session.phase(), SessionPhase::Active);
}

#[test]
fn invalid_phrase_never_reaches_engine() {
    let h = Harness::new();

    assert!(matches!(h.session.load(""), Err(SessionError::InvalidGrammar(_))));
    assert!(matches!(h.session.load(" ... "), Err(SessionError::InvalidGrammar(_))));
    assert!(h.calls.lock().is_empty());

    // Still usable afterwards
    assert_eq!(h.session.load("five"), Ok(LoadOutcome::Started));
}

#[test]
fn construction_failure_surfaces_as_initialization_failed() {
    let _serial = serial();
    let result = GrammarSession::new(|_| -> anyhow::Result<RecordingBackend> { anyhow::bail!("no audio input device") });
    assert!(matches!(result, Err(SessionError::InitializationFailed(msg)) if msg.contains("no audio input device")));
}

#[test]
fn start_failure_terminates_the_session() {
    struct Broken;

    impl RecognitionBackend for Broken {
        fn start(&mut self, _: &GrammarPhrase) -> anyhow::Result<()> {
            anyhow::bail!("locale not supported")
        }
        fn request_update(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn replace_active_grammar(&mut self, _: &GrammarPhrase) -> anyhow::Result<()> {
            Ok(())
        }
        fn resume(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn destroy(&mut self) {}
    }

    let _serial = serial();
    let (session, _events) = GrammarSession::new(|_| Ok(Broken)).unwrap();
    assert!(matches!(session.load("five"), Err(SessionError::InitializationFailed(_))));
    assert_eq!(session.phase(), SessionPhase::Destroyed);
    assert_eq!(session.load("five"), Err(SessionError::EngineUnavailable));
}

#[test]
fn second_live_session_is_refused_until_shutdown() {
    let h = Harness::new();
    h.session.load("five").unwrap();

    let refused = GrammarSession::new(|_| Ok(ContinuousBackend::new(Spoken(mpsc::channel().1), EventSink::channel().0)));
    assert!(matches!(refused, Err(SessionError::InitializationFailed(_))));

    h.session.shutdown();
    let (next, _events) = GrammarSession::new(|sink| Ok(ContinuousBackend::new(Spoken(mpsc::channel().1), sink))).unwrap();
    assert_eq!(next.phase(), SessionPhase::Idle);
}

#[test]
fn concurrent_loads_collapse_into_one_swap() {
    let mut h = Harness::new();
    h.session.load("start").unwrap();

    let words = ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel"];
    std::thread::scope(|scope| {
        for word in words {
            let session = h.session.clone();
            scope.spawn(move || session.load(word).unwrap());
        }
    });

    assert_eq!(h.update_requests(), 1);
    let pending = h.session.pending_grammar().map(String::from).unwrap();
    assert!(words.contains(&pending.as_str()));

    h.emit(EngineEvent::UpdateReached);
    assert_eq!(h.active(), Some(pending));
}
