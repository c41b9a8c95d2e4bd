//! Turn-taking session integration tests
//!
//! Runs full turns over the memory backend with scripted collaborators

use std::sync::Arc;
use std::time::Duration;

use parley_voice::audio::memory::{MemoryBackend, ScriptedInput};
use parley_voice::dialogue::NO_THINK_INSTRUCTION;
use parley_voice::voice::PlaybackRoute;
use parley_voice::{
    AudioBackend, CaptureConfig, Delivery, Error, EventSink, ReplyGenerator, Role, Session,
    SessionConfig, SpeechSynthesizer, Transcriber, TurnEvent, TurnOutcome, TurnState,
};

mod common;

use common::{
    BLOCK, FailingGenerator, FailingSynthesizer, FailingTranscriber, FixedGenerator,
    FixedTranscriber, FlakyGenerator, RecordingSink, ToneSynthesizer, capture_config, classifier,
    silence_block, speech_block, utterance_blocks,
};

fn config() -> SessionConfig {
    SessionConfig {
        capture: CaptureConfig {
            allow_barge_in: false,
            ..capture_config()
        },
        ..SessionConfig::default()
    }
}

struct Harness {
    session: Session,
    backend: Arc<MemoryBackend>,
    sink: Arc<RecordingSink>,
    transcriber: Arc<FixedTranscriber>,
    generator: Arc<FixedGenerator>,
    synthesizer: Arc<ToneSynthesizer>,
}

fn harness_with(
    config: SessionConfig,
    backend: MemoryBackend,
    transcriber: FixedTranscriber,
    generator: FixedGenerator,
) -> Harness {
    let backend = Arc::new(backend);
    let sink = Arc::new(RecordingSink::new());
    let transcriber = Arc::new(transcriber);
    let generator = Arc::new(generator);
    let synthesizer = Arc::new(ToneSynthesizer::new(0.2));

    let session = Session::builder(config, Arc::clone(&backend) as Arc<dyn AudioBackend>)
        .transcriber(Arc::clone(&transcriber) as Arc<dyn Transcriber>)
        .generator(Arc::clone(&generator) as Arc<dyn ReplyGenerator>)
        .synthesizer(Arc::clone(&synthesizer) as Arc<dyn SpeechSynthesizer>)
        .classifier(classifier())
        .events(Arc::clone(&sink) as Arc<dyn EventSink>)
        .build()
        .unwrap();

    Harness {
        session,
        backend,
        sink,
        transcriber,
        generator,
        synthesizer,
    }
}

fn harness(backend: MemoryBackend, transcript: &str, reply: &str) -> Harness {
    harness_with(
        config(),
        backend,
        FixedTranscriber::new(transcript),
        FixedGenerator::new(reply),
    )
}

fn spoken_turn() -> MemoryBackend {
    MemoryBackend::new().with_input(utterance_blocks(10, 40))
}

#[tokio::test]
async fn test_turn_emits_events_in_order() {
    let mut h = harness(spoken_turn(), "  what time is it  ", "It is noon.");

    let outcome = h.session.run_turn().await.unwrap();

    let TurnOutcome::Replied {
        transcript,
        reply,
        delivery,
    } = outcome
    else {
        panic!("expected a reply");
    };
    assert_eq!(transcript, "what time is it");
    assert_eq!(reply, "It is noon.");
    let Delivery::Played(played) = delivery else {
        panic!("expected playback");
    };
    assert_eq!(played.route, PlaybackRoute::Routed);
    assert!(!played.interrupted);

    assert_eq!(
        h.sink.kinds(),
        vec![
            "listening",
            "speech_started",
            "speech_ended",
            "transcribing",
            "transcript",
            "thinking",
            "response",
            "speaking",
        ]
    );
    assert!(h.sink.events().contains(&TurnEvent::Transcript {
        text: "what time is it".to_string()
    }));

    assert_eq!(*h.transcriber.sample_counts.lock().unwrap(), vec![48 * BLOCK]);
    assert_eq!(h.synthesizer.texts(), vec!["It is noon."]);
    assert_eq!(h.backend.written_samples().len(), 3_200);
    assert_eq!(h.session.state(), TurnState::Listening);
}

#[tokio::test]
async fn test_history_records_the_exchange() {
    let mut h = harness(spoken_turn(), "hello there", "Hi!");
    h.session.run_turn().await.unwrap();

    let messages = h.session.history().messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[0].content, NO_THINK_INSTRUCTION);
    assert_eq!(messages[1].content, "hello there");
    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[2].content, "Hi!");

    // The generator saw the system prompt and the user message
    assert_eq!(h.generator.last_history().len(), 2);
}

#[tokio::test]
async fn test_custom_system_prompt_gets_no_think_suffix() {
    let config = SessionConfig {
        system_prompt: Some("You are terse.".to_string()),
        ..config()
    };
    let mut h = harness_with(
        config,
        spoken_turn(),
        FixedTranscriber::new("hello there"),
        FixedGenerator::new("Hi."),
    );
    h.session.run_turn().await.unwrap();

    let system = h.session.history().system().unwrap();
    assert_eq!(system.content, format!("You are terse.\n\n{NO_THINK_INSTRUCTION}"));
}

#[tokio::test]
async fn test_thinking_enabled_without_prompt_has_no_system_message() {
    let config = SessionConfig {
        enable_thinking: true,
        ..config()
    };
    let mut h = harness_with(
        config,
        spoken_turn(),
        FixedTranscriber::new("hello there"),
        FixedGenerator::new("Hi."),
    );
    h.session.run_turn().await.unwrap();

    assert!(h.session.history().system().is_none());
    assert_eq!(h.session.history().len(), 2);
}

#[tokio::test]
async fn test_short_transcript_is_rejected() {
    let mut h = harness(spoken_turn(), " a ", "unused");

    let outcome = h.session.run_turn().await.unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::TranscriptRejected {
            text: "a".to_string()
        }
    );
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.sink.kinds().last(), Some(&"transcript_rejected"));
    assert!(h.session.history().is_empty());
    assert_eq!(h.session.state(), TurnState::Listening);
}

#[tokio::test]
async fn test_empty_transcript() {
    let mut h = harness(spoken_turn(), "   ", "unused");

    let outcome = h.session.run_turn().await.unwrap();

    assert_eq!(outcome, TurnOutcome::TranscriptEmpty);
    assert_eq!(h.sink.kinds().last(), Some(&"transcript_empty"));
    assert_eq!(h.sink.count("transcript"), 0);
    assert_eq!(h.generator.calls(), 0);
}

#[tokio::test]
async fn test_silence_skips_transcription() {
    let mut h = harness(
        MemoryBackend::new().with_input(vec![silence_block(); 20]),
        "unused",
        "unused",
    );

    let outcome = h.session.run_turn().await.unwrap();

    assert_eq!(outcome, TurnOutcome::NoSpeech { peak_rms: 0.0 });
    assert_eq!(h.sink.kinds(), vec!["listening", "no_speech_detected"]);
    assert_eq!(h.transcriber.calls(), 0);
}

#[tokio::test]
async fn test_speak_disabled_replies_silently() {
    let config = SessionConfig {
        speak: false,
        ..config()
    };
    let backend = spoken_turn().without_output_device();
    let mut h = harness_with(
        config,
        backend,
        FixedTranscriber::new("hello there"),
        FixedGenerator::new("Hi."),
    );

    h.session.preflight().unwrap();
    let outcome = h.session.run_turn().await.unwrap();

    assert!(matches!(
        outcome,
        TurnOutcome::Replied {
            delivery: Delivery::Silent,
            ..
        }
    ));
    assert_eq!(h.sink.count("speaking"), 0);
    assert!(h.synthesizer.texts().is_empty());
}

#[tokio::test]
async fn test_reasoning_is_not_spoken() {
    let mut h = harness(
        spoken_turn(),
        "hello there",
        "<think>greet them</think>\nSure thing.",
    );

    let outcome = h.session.run_turn().await.unwrap();

    let TurnOutcome::Replied { reply, .. } = outcome else {
        panic!("expected a reply");
    };
    assert!(reply.contains("<think>"));
    assert!(h.sink.events().contains(&TurnEvent::Response {
        text: "<think>greet them</think>\nSure thing.".to_string()
    }));
    assert_eq!(h.synthesizer.texts(), vec!["Sure thing."]);

    let last = h.session.history().messages().last().unwrap();
    assert_eq!(last.content, "Sure thing.");
}

#[tokio::test]
async fn test_reasoning_only_reply_is_silent() {
    let mut h = harness(spoken_turn(), "hello there", "<think>nothing to add</think>");

    let outcome = h.session.run_turn().await.unwrap();

    assert!(matches!(
        outcome,
        TurnOutcome::Replied {
            delivery: Delivery::Silent,
            ..
        }
    ));
    assert_eq!(h.sink.count("speaking"), 0);
    assert!(h.synthesizer.texts().is_empty());
    let last = h.session.history().messages().last().unwrap();
    assert_eq!(last.content, "<think>nothing to add</think>");
}

#[tokio::test]
async fn test_history_is_trimmed_across_turns() {
    let config = SessionConfig {
        history_cap: 4,
        speak: false,
        ..config()
    };
    let backend = MemoryBackend::new();
    for _ in 0..5 {
        backend.push_input(ScriptedInput::Blocks(utterance_blocks(10, 40)));
    }
    let mut h = harness_with(
        config,
        backend,
        FixedTranscriber::new("tell me more"),
        FixedGenerator::new("More."),
    );

    for _ in 0..5 {
        h.session.run_turn().await.unwrap();
    }

    let history = h.session.history();
    assert_eq!(history.len(), 5);
    assert_eq!(history.messages()[0].role, Role::System);
    assert_eq!(history.messages()[1].role, Role::User);
    // Trimmed window plus the new user message
    assert_eq!(h.generator.last_history().len(), 6);
    assert_eq!(h.generator.calls(), 5);
}

#[tokio::test]
async fn test_generator_failure_propagates() {
    let backend = Arc::new(spoken_turn());
    let sink = Arc::new(RecordingSink::new());
    let mut session = Session::builder(config(), Arc::clone(&backend) as Arc<dyn AudioBackend>)
        .transcriber(Arc::new(FixedTranscriber::new("hello there")))
        .generator(Arc::new(FailingGenerator))
        .synthesizer(Arc::new(ToneSynthesizer::new(0.1)))
        .classifier(classifier())
        .events(Arc::clone(&sink) as Arc<dyn EventSink>)
        .build()
        .unwrap();

    let err = session.run_turn().await.unwrap_err();

    assert!(matches!(err, Error::Llm(_)));
    assert_eq!(sink.kinds().last(), Some(&"thinking"));
    assert_eq!(sink.count("response"), 0);
    assert_eq!(backend.open_streams(), 0);
}

#[tokio::test]
async fn test_failed_reply_leaves_history_untouched() {
    let backend = Arc::new(spoken_turn());
    let generator = Arc::new(FlakyGenerator::new("Hi!"));
    let mut session = Session::builder(config(), Arc::clone(&backend) as Arc<dyn AudioBackend>)
        .transcriber(Arc::new(FixedTranscriber::new("hello there")))
        .generator(Arc::clone(&generator) as Arc<dyn ReplyGenerator>)
        .synthesizer(Arc::new(ToneSynthesizer::new(0.1)))
        .classifier(classifier())
        .build()
        .unwrap();

    let err = session.run_turn().await.unwrap_err();
    assert!(matches!(err, Error::Llm(_)));
    assert!(session.history().is_empty());

    // The caller retries the turn
    backend.push_input(ScriptedInput::Blocks(utterance_blocks(10, 40)));
    session.run_turn().await.unwrap();

    let roles: Vec<Role> = session.history().messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    let sent: Vec<Role> = generator.inner.last_history().iter().map(|m| m.role).collect();
    assert_eq!(sent, vec![Role::System, Role::User]);
}

#[tokio::test]
async fn test_synthesis_failure_degrades_without_ending_session() {
    let backend = Arc::new(spoken_turn());
    backend.push_input(ScriptedInput::Blocks(utterance_blocks(10, 40)));
    let sink = Arc::new(RecordingSink::new());
    let mut session = Session::builder(config(), Arc::clone(&backend) as Arc<dyn AudioBackend>)
        .transcriber(Arc::new(FixedTranscriber::new("hello there")))
        .generator(Arc::new(FixedGenerator::new("Hi.")))
        .synthesizer(Arc::new(FailingSynthesizer))
        .classifier(classifier())
        .events(Arc::clone(&sink) as Arc<dyn EventSink>)
        .build()
        .unwrap();

    let outcome = session.run_turn().await.unwrap();

    let TurnOutcome::Replied { delivery, .. } = outcome else {
        panic!("expected a reply");
    };
    assert!(matches!(delivery, Delivery::Failed(ref e) if e.contains("empty audio response")));
    assert!(matches!(
        sink.events().last(),
        Some(TurnEvent::PlaybackDegraded { reason }) if reason.starts_with("synthesis: ")
    ));
    assert_eq!(session.state(), TurnState::Listening);
    assert_eq!(session.history().len(), 3);
    assert!(backend.written_chunks().is_empty());

    // The next turn still runs
    assert!(matches!(
        session.run_turn().await.unwrap(),
        TurnOutcome::Replied { .. }
    ));
}

#[tokio::test]
async fn test_transcriber_failure_propagates() {
    let sink = Arc::new(RecordingSink::new());
    let mut session = Session::builder(config(), Arc::new(spoken_turn()))
        .transcriber(Arc::new(FailingTranscriber))
        .generator(Arc::new(FixedGenerator::new("unused")))
        .synthesizer(Arc::new(ToneSynthesizer::new(0.1)))
        .classifier(classifier())
        .events(Arc::clone(&sink) as Arc<dyn EventSink>)
        .build()
        .unwrap();

    let err = session.run_turn().await.unwrap_err();

    assert!(matches!(err, Error::Stt(_)));
    assert_eq!(sink.kinds().last(), Some(&"transcribing"));
}

#[tokio::test]
async fn test_playback_failure_degrades_without_ending_turn() {
    let backend = spoken_turn()
        .with_failing_output("device busy")
        .with_failing_simple_playback("player missing");
    let mut h = harness(backend, "hello there", "Hi.");

    let outcome = h.session.run_turn().await.unwrap();

    let TurnOutcome::Replied { delivery, .. } = outcome else {
        panic!("expected a reply");
    };
    assert!(matches!(delivery, Delivery::Failed(ref e) if e.contains("player missing")));
    assert_eq!(h.sink.count("playback_degraded"), 1);
    assert_eq!(h.sink.count("tts_interrupted"), 0);
    assert_eq!(h.session.history().len(), 3);
}

#[tokio::test]
async fn test_fallback_playback_is_reported() {
    let backend = spoken_turn().with_failing_output("device busy");
    let mut h = harness(backend, "hello there", "Hi.");

    let outcome = h.session.run_turn().await.unwrap();

    let TurnOutcome::Replied {
        delivery: Delivery::Played(played),
        ..
    } = outcome
    else {
        panic!("expected playback");
    };
    assert!(matches!(played.route, PlaybackRoute::Fallback { strategy: "simple", .. }));
    assert!(h.sink.events().iter().any(|e| matches!(
        e,
        TurnEvent::PlaybackDegraded { reason } if reason.starts_with("routed: ")
    )));
    assert_eq!(h.backend.simple_clips().len(), 1);
}

fn barge_in_config() -> SessionConfig {
    SessionConfig {
        capture: capture_config(),
        ..SessionConfig::default()
    }
}

#[tokio::test]
async fn test_barge_in_unavailable_still_plays() {
    // Only one input script: the monitor cannot open a second stream
    let mut h = harness_with(
        barge_in_config(),
        spoken_turn(),
        FixedTranscriber::new("hello there"),
        FixedGenerator::new("Hi."),
    );

    let outcome = h.session.run_turn().await.unwrap();

    assert!(h.sink.events().iter().any(|e| matches!(
        e,
        TurnEvent::BargeInUnavailable { error } if error.contains("no scripted input left")
    )));
    assert_eq!(h.sink.count("tts_interrupted"), 0);
    let TurnOutcome::Replied {
        delivery: Delivery::Played(played),
        ..
    } = outcome
    else {
        panic!("expected playback");
    };
    assert!(!played.interrupted);
    assert_eq!(h.backend.written_samples().len(), 3_200);
}

#[tokio::test]
async fn test_barge_in_interrupts_reply() {
    let backend = spoken_turn().with_pace(Duration::from_millis(5));
    backend.push_input(ScriptedInput::Blocks(vec![speech_block(); 20]));

    let backend = Arc::new(backend);
    let sink = Arc::new(RecordingSink::new());
    let mut session =
        Session::builder(barge_in_config(), Arc::clone(&backend) as Arc<dyn AudioBackend>)
            .transcriber(Arc::new(FixedTranscriber::new("tell me a story")))
            .generator(Arc::new(FixedGenerator::new("Once upon a time...")))
            .synthesizer(Arc::new(ToneSynthesizer::new(3.0)))
            .classifier(classifier())
            .events(Arc::clone(&sink) as Arc<dyn EventSink>)
            .build()
            .unwrap();

    let outcome = session.run_turn().await.unwrap();

    let TurnOutcome::Replied {
        delivery: Delivery::Played(played),
        ..
    } = outcome
    else {
        panic!("expected playback");
    };
    assert!(played.interrupted);
    assert_eq!(sink.kinds().last(), Some(&"tts_interrupted"));
    assert!(backend.written_chunks().len() < 30);
    assert_eq!(backend.open_streams(), 0);
}

#[tokio::test]
async fn test_quiet_monitor_does_not_report_interruption() {
    let backend = spoken_turn();
    backend.push_input(ScriptedInput::Blocks(vec![silence_block(); 5]));
    let mut h = harness_with(
        barge_in_config(),
        backend,
        FixedTranscriber::new("hello there"),
        FixedGenerator::new("Hi."),
    );

    h.session.run_turn().await.unwrap();

    assert_eq!(h.sink.count("tts_interrupted"), 0);
    assert_eq!(h.sink.count("barge_in_unavailable"), 0);
    assert_eq!(h.backend.open_streams(), 0);
}

#[tokio::test]
async fn test_preflight_requires_input_device() {
    let mut h = harness(MemoryBackend::new().without_input_device(), "x", "y");

    let err = h.session.run().await.unwrap_err();

    assert!(matches!(err, Error::DependenciesUnavailable(_)));
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_preflight_requires_output_when_speaking() {
    let h = harness(MemoryBackend::new().without_output_device(), "x", "y");
    let err = h.session.preflight().unwrap_err();
    assert!(matches!(err, Error::DependenciesUnavailable(ref m) if m.contains("output")));
}

#[tokio::test]
async fn test_preflight_requires_synthesizer_when_speaking() {
    let session = Session::builder(config(), Arc::new(MemoryBackend::new()))
        .transcriber(Arc::new(FixedTranscriber::new("x")))
        .generator(Arc::new(FixedGenerator::new("y")))
        .classifier(classifier())
        .build()
        .unwrap();

    let err = session.preflight().unwrap_err();
    assert!(matches!(err, Error::DependenciesUnavailable(ref m) if m.contains("synthesizer")));
}

#[test]
fn test_build_requires_collaborators() {
    let err = Session::builder(config(), Arc::new(MemoryBackend::new()))
        .generator(Arc::new(FixedGenerator::new("y")))
        .classifier(classifier())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Config(ref m) if m.contains("transcriber")));

    let err = Session::builder(config(), Arc::new(MemoryBackend::new()))
        .transcriber(Arc::new(FixedTranscriber::new("x")))
        .classifier(classifier())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Config(ref m) if m.contains("generator")));
}

#[test]
fn test_build_rejects_invalid_capture_config() {
    let mut config = config();
    config.capture.vad_threshold = 1.5;
    let err = Session::builder(config, Arc::new(MemoryBackend::new()))
        .transcriber(Arc::new(FixedTranscriber::new("x")))
        .generator(Arc::new(FixedGenerator::new("y")))
        .classifier(classifier())
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_stop_before_turn() {
    let mut h = harness(spoken_turn(), "hello there", "Hi.");
    h.session.stop_handle().set();

    let outcome = h.session.run_turn().await.unwrap();

    assert_eq!(outcome, TurnOutcome::Stopped);
    assert!(h.sink.events().is_empty());
    assert_eq!(h.session.state(), TurnState::Terminal);
    assert_eq!(h.transcriber.calls(), 0);
}

#[tokio::test]
async fn test_stop_during_capture() {
    let mut h = harness(spoken_turn(), "hello there", "Hi.");
    h.sink.stop_on("speech_started", h.session.stop_handle());

    let outcome = h.session.run_turn().await.unwrap();

    assert_eq!(outcome, TurnOutcome::Stopped);
    assert_eq!(h.transcriber.calls(), 0);
    assert_eq!(h.sink.count("no_speech_detected"), 0);
    assert_eq!(h.backend.open_streams(), 0);
}

#[tokio::test]
async fn test_run_loops_until_stopped() {
    let mut h = harness(spoken_turn(), "hello there", "Hi.");
    h.sink.stop_on("response", h.session.stop_handle());

    h.session.run().await.unwrap();

    assert_eq!(h.sink.events().first(), Some(&TurnEvent::Ready));
    assert_eq!(h.sink.kinds().last(), Some(&"response"));
    // Stop arrived before playback, so nothing was spoken
    assert!(h.synthesizer.texts().is_empty());
    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.session.state(), TurnState::Terminal);
}

#[tokio::test]
async fn test_run_propagates_input_failure() {
    let mut h = harness(
        MemoryBackend::new().with_failing_input("device unplugged"),
        "hello there",
        "Hi.",
    );

    let err = h.session.run().await.unwrap_err();

    assert!(err.to_string().contains("device unplugged"));
    assert_eq!(h.sink.kinds(), vec!["ready", "listening"]);
    assert_eq!(h.session.state(), TurnState::Terminal);
}

#[tokio::test]
async fn test_tool_path_used_when_supported() {
    let config = SessionConfig {
        use_tools: true,
        speak: false,
        ..config()
    };
    let mut h = harness_with(
        config.clone(),
        spoken_turn(),
        FixedTranscriber::new("what time is it"),
        FixedGenerator::new("Noon.").with_tools(),
    );
    h.session.run_turn().await.unwrap();
    assert_eq!(h.generator.tool_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let mut h = harness_with(
        config,
        spoken_turn(),
        FixedTranscriber::new("what time is it"),
        FixedGenerator::new("Noon."),
    );
    h.session.run_turn().await.unwrap();
    assert_eq!(h.generator.tool_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn test_transcribe_once() {
    let mut h = harness(spoken_turn(), " hello there ", "unused");
    let text = h.session.transcribe_once().await.unwrap();
    assert_eq!(text.as_deref(), Some("hello there"));
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.session.state(), TurnState::Idle);

    let mut h = harness(
        MemoryBackend::new().with_input(vec![silence_block(); 10]),
        "unused",
        "unused",
    );
    assert_eq!(h.session.transcribe_once().await.unwrap(), None);
    assert_eq!(h.transcriber.calls(), 0);
}
