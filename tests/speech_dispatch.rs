//! Speech dispatch and conversation wiring: sequential avatar utterances
//! with the inter-utterance gap, quota degradation surfaced once, and echo
//! suppression on recognized input.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use aria::core::avatar::{
    AvatarBackend, AvatarError, AvatarStream, DispatcherConfig, SpeechDispatcher, SpeechNotice,
};
use aria::core::orchestrator::{ChatEvent, ConversationOrchestrator, EchoSuppressionConfig};
use aria::core::session::SessionEvent;

struct RecordingBackend {
    speak_log: Mutex<Vec<(String, Instant)>>,
    speak_calls: AtomicUsize,
    fail_with: Option<AvatarError>,
}

impl RecordingBackend {
    fn new() -> Self {
        Self {
            speak_log: Mutex::new(Vec::new()),
            speak_calls: AtomicUsize::new(0),
            fail_with: None,
        }
    }
}

#[async_trait]
impl AvatarBackend for RecordingBackend {
    async fn create_stream(&self) -> Result<AvatarStream, AvatarError> {
        Ok(AvatarStream {
            stream_id: "strm_test".to_string(),
            session_id: "sess_test".to_string(),
            offer: Value::Null,
            ice_servers: Value::Null,
        })
    }

    async fn submit_answer(
        &self,
        _stream: &AvatarStream,
        _answer: &Value,
    ) -> Result<(), AvatarError> {
        Ok(())
    }

    async fn submit_ice_candidate(
        &self,
        _stream: &AvatarStream,
        _candidate: &Value,
    ) -> Result<(), AvatarError> {
        Ok(())
    }

    async fn speak(&self, _stream: &AvatarStream, text: &str) -> Result<(), AvatarError> {
        self.speak_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.speak_log.lock().push((text.to_string(), Instant::now()));
        Ok(())
    }

    async fn close_stream(&self, _stream: &AvatarStream) -> Result<(), AvatarError> {
        Ok(())
    }
}

/// Every utterance is held for exactly two seconds regardless of length.
fn two_second_config() -> DispatcherConfig {
    DispatcherConfig {
        padding: Duration::ZERO,
        min_duration: Duration::from_secs(2),
        max_duration: Duration::from_secs(2),
        inter_utterance_delay: Duration::from_millis(500),
        ..DispatcherConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn overlapping_speak_calls_play_sequentially_with_a_gap() {
    let backend = Arc::new(RecordingBackend::new());
    let (dispatcher, mut notices) = SpeechDispatcher::new(
        Arc::clone(&backend) as Arc<dyn AvatarBackend>,
        two_second_config(),
    );
    dispatcher.connect().await.unwrap();

    // "World" is requested while "Hello" is still being spoken
    assert!(dispatcher.speak("Hello"));
    assert!(dispatcher.speak("World"));

    let mut ended = Vec::new();
    while ended.len() < 2 {
        if let SpeechNotice::Ended { text } = notices.recv().await.unwrap() {
            ended.push(text);
        }
    }
    assert_eq!(ended, ["Hello", "World"]);

    let log = backend.speak_log.lock().clone();
    assert_eq!(log.len(), 2, "exactly two backend invocations");
    assert_eq!(log[0].0, "Hello");
    assert_eq!(log[1].0, "World");
    // "World" starts only after "Hello"'s two-second hold plus at least the
    // 500ms inter-utterance gap
    let gap = log[1].1 - log[0].1;
    assert!(
        gap >= Duration::from_millis(2500),
        "utterances overlapped: gap was {gap:?}"
    );

    dispatcher.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn agent_transcript_completion_drives_avatar_speech() {
    let backend = Arc::new(RecordingBackend::new());
    let (dispatcher, notices) = SpeechDispatcher::new(
        Arc::clone(&backend) as Arc<dyn AvatarBackend>,
        two_second_config(),
    );
    dispatcher.connect().await.unwrap();
    let dispatcher = Arc::new(dispatcher);

    let (mut orchestrator, mut chat) =
        ConversationOrchestrator::new(Arc::clone(&dispatcher), EchoSuppressionConfig::default());
    drop(notices);

    orchestrator.handle_session_event(SessionEvent::AgentTranscriptDone(
        "I can help with that.".to_string(),
    ));

    assert_eq!(
        chat.recv().await.unwrap(),
        ChatEvent::Agent("I can help with that.".to_string())
    );
    // The utterance reaches the backend through the queue
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.speak_calls.load(Ordering::SeqCst), 1);

    dispatcher.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn short_input_shortly_after_avatar_speech_is_suppressed() {
    let backend = Arc::new(RecordingBackend::new());
    let (dispatcher, mut notices) = SpeechDispatcher::new(
        Arc::clone(&backend) as Arc<dyn AvatarBackend>,
        two_second_config(),
    );
    dispatcher.connect().await.unwrap();
    let dispatcher = Arc::new(dispatcher);

    let (mut orchestrator, mut chat) =
        ConversationOrchestrator::new(Arc::clone(&dispatcher), EchoSuppressionConfig::default());

    dispatcher.speak("Thank you for contacting support today");
    loop {
        if let SpeechNotice::Ended { .. } = notices.recv().await.unwrap() {
            break;
        }
    }

    // Two words, three seconds after the avatar stopped: feedback
    tokio::time::advance(Duration::from_secs(3)).await;
    orchestrator.handle_session_event(SessionEvent::UserTranscriptDone("thank you".to_string()));
    assert!(chat.try_recv().is_err(), "echo should be discarded");

    // The same words ten seconds after: genuine input
    tokio::time::advance(Duration::from_secs(7)).await;
    orchestrator.handle_session_event(SessionEvent::UserTranscriptDone("thank you".to_string()));
    assert_eq!(
        chat.recv().await.unwrap(),
        ChatEvent::User("thank you".to_string())
    );

    dispatcher.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn input_contained_in_the_last_utterance_is_suppressed() {
    let backend = Arc::new(RecordingBackend::new());
    let (dispatcher, mut notices) = SpeechDispatcher::new(
        Arc::clone(&backend) as Arc<dyn AvatarBackend>,
        two_second_config(),
    );
    dispatcher.connect().await.unwrap();
    let dispatcher = Arc::new(dispatcher);

    let (mut orchestrator, mut chat) =
        ConversationOrchestrator::new(Arc::clone(&dispatcher), EchoSuppressionConfig::default());

    dispatcher.speak("Please restart your router and wait thirty seconds");
    loop {
        if let SpeechNotice::Ended { .. } = notices.recv().await.unwrap() {
            break;
        }
    }

    // Twelve seconds out: past the short-echo window but inside containment
    tokio::time::advance(Duration::from_secs(12)).await;
    orchestrator.handle_session_event(SessionEvent::UserTranscriptDone(
        "restart your router and wait".to_string(),
    ));
    assert!(chat.try_recv().is_err(), "contained echo should be discarded");

    // A novel sentence at the same moment is accepted
    orchestrator.handle_session_event(SessionEvent::UserTranscriptDone(
        "my internet is still down after doing that".to_string(),
    ));
    assert_eq!(
        chat.recv().await.unwrap(),
        ChatEvent::User("my internet is still down after doing that".to_string())
    );

    dispatcher.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn accepted_inputs_are_debounced() {
    let backend = Arc::new(RecordingBackend::new());
    let (dispatcher, _notices) = SpeechDispatcher::new(
        Arc::clone(&backend) as Arc<dyn AvatarBackend>,
        two_second_config(),
    );
    let dispatcher = Arc::new(dispatcher);

    let (mut orchestrator, mut chat) =
        ConversationOrchestrator::new(Arc::clone(&dispatcher), EchoSuppressionConfig::default());

    orchestrator.handle_session_event(SessionEvent::UserTranscriptDone(
        "my screen keeps flickering".to_string(),
    ));
    assert!(matches!(chat.recv().await.unwrap(), ChatEvent::User(_)));

    // Overlapping recognition re-delivers inside the debounce window
    tokio::time::advance(Duration::from_millis(500)).await;
    orchestrator.handle_session_event(SessionEvent::UserTranscriptDone(
        "my screen keeps flickering constantly".to_string(),
    ));
    assert!(chat.try_recv().is_err(), "duplicate inside debounce window");

    tokio::time::advance(Duration::from_secs(3)).await;
    orchestrator.handle_session_event(SessionEvent::UserTranscriptDone(
        "it happens in every application".to_string(),
    ));
    assert!(matches!(chat.recv().await.unwrap(), ChatEvent::User(_)));

    dispatcher.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn quota_exhaustion_is_surfaced_once_and_speech_stays_off() {
    let backend = Arc::new(RecordingBackend {
        fail_with: Some(AvatarError::Rejected {
            status: 402,
            body: "insufficient credits".to_string(),
        }),
        ..RecordingBackend::new()
    });
    let (dispatcher, mut notices) = SpeechDispatcher::new(
        Arc::clone(&backend) as Arc<dyn AvatarBackend>,
        two_second_config(),
    );
    dispatcher.connect().await.unwrap();
    let dispatcher = Arc::new(dispatcher);

    let (mut orchestrator, mut chat) =
        ConversationOrchestrator::new(Arc::clone(&dispatcher), EchoSuppressionConfig::default());

    dispatcher.speak("this will fail");
    loop {
        if let SpeechNotice::Disabled { .. } = notices.recv().await.unwrap() {
            break;
        }
    }
    orchestrator.handle_speech_notice(SpeechNotice::Disabled {
        reason: "insufficient credits".to_string(),
    });
    assert!(matches!(chat.recv().await.unwrap(), ChatEvent::Notice(_)));

    // Later agent replies still reach the chat log, just without avatar audio
    orchestrator.handle_session_event(SessionEvent::AgentTranscriptDone(
        "Here is the answer in text.".to_string(),
    ));
    assert_eq!(
        chat.recv().await.unwrap(),
        ChatEvent::Agent("Here is the answer in text.".to_string())
    );
    assert!(!dispatcher.speak("still disabled"));
    assert_eq!(backend.speak_calls.load(Ordering::SeqCst), 1);

    dispatcher.disconnect().await;
}
