use std::sync::Arc;
use std::time::Duration;
use voxlive_audio::{ManualClock, NullSink, PlaybackScheduler, SyntheticFrameSource, SyntheticSignal};
use voxlive_core::{AppConfig, SessionState, Turn};
use voxlive_session::{ServerMessage, StreamSession, TransportRegistry};

fn offline_session() -> StreamSession {
    let mut config = AppConfig::default();
    config.session.transport = "null".into();
    config.audio.block_size = 160;

    let registry = TransportRegistry::new();
    let transport = registry.create(&config.session.transport).unwrap();
    let source = SyntheticFrameSource::new(
        config.audio.input_sample_rate,
        config.audio.block_size,
        SyntheticSignal::Tone {
            frequency: 220.0,
            amplitude: 0.3,
        },
    );
    let scheduler = Arc::new(PlaybackScheduler::new(
        Arc::new(ManualClock::new(0.0)),
        Arc::new(NullSink),
    ));
    StreamSession::new(&config, transport, Box::new(source), scheduler)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_offline_session_streams_synthetic_audio() {
    let session = offline_session();
    session.open().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);

    eventually(|| session.stats().chunks_sent >= 3).await;
    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    // 160 samples of PCM16 per chunk.
    let stats = session.stats();
    assert_eq!(stats.bytes_sent, stats.chunks_sent * 320);
}

#[tokio::test]
async fn test_offline_session_answers_text_prompt() {
    let session = offline_session();
    session.open().await.unwrap();

    session.send_text("ping").unwrap();
    eventually(|| session.turn_log().len() == 1).await;
    assert_eq!(
        session.turn_log()[0],
        Turn {
            user: "ping".into(),
            model: "[null] 4 chars".into()
        }
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_state_subscribers_see_lifecycle() {
    let session = offline_session();
    let mut rx = session.subscribe();
    assert_eq!(*rx.borrow_and_update(), SessionState::Idle);

    session.open().await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), SessionState::Active);

    session.close().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), SessionState::Closed);
}

#[test]
fn test_server_frame_to_events() {
    let frame = r#"{"serverContent":{"outputTranscription":{"text":"Hi there"},"turnComplete":true}}"#;
    let events = ServerMessage::parse(frame).unwrap().events();
    assert_eq!(events.len(), 2);
}
