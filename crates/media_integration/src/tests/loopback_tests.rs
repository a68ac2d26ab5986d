use super::*;

fn options(webcam_enabled: bool) -> MeetingOptions {
    MeetingOptions {
        meeting_id: "room-1".into(),
        token: "mock_token_for_testing".into(),
        participant_name: "Ada".into(),
        mic_enabled: true,
        webcam_enabled,
    }
}

#[tokio::test(start_paused = true)]
async fn confirms_join_then_reports_local_video() {
    let connector = LoopbackConnector::default();
    let meeting = connector.connect(options(true)).await.expect("connect");
    let mut events = meeting.subscribe_events();

    assert_eq!(events.recv().await.expect("joined"), MeetingEvent::MeetingJoined);
    match events.recv().await.expect("local stream") {
        MeetingEvent::LocalStreamEnabled(stream) => assert_eq!(stream.kind, MediaKind::Video),
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(connector.meeting_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn audio_only_meeting_has_no_local_video() {
    let connector = LoopbackConnector::default();
    let meeting = connector.connect(options(false)).await.expect("connect");
    let mut events = meeting.subscribe_events();

    assert_eq!(events.recv().await.expect("joined"), MeetingEvent::MeetingJoined);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test(start_paused = true)]
async fn leave_before_join_suppresses_confirmation() {
    let connector = LoopbackConnector::default();
    let meeting = connector.connect(options(true)).await.expect("connect");
    let mut events = meeting.subscribe_events();

    meeting.leave().await.expect("leave");
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(events.try_recv().is_err());
    let recorded = connector.last_meeting().expect("meeting").requests();
    assert_eq!(recorded, vec![MeetingRequest::Leave]);
}

#[tokio::test]
async fn records_media_requests_in_order() {
    let connector = LoopbackConnector::with_delays(Duration::from_secs(60), Duration::ZERO);
    let meeting = connector.connect(options(true)).await.expect("connect");

    meeting.mute_mic().await.expect("mute");
    meeting.disable_webcam().await.expect("disable");
    meeting.unmute_mic().await.expect("unmute");

    let loopback = connector.last_meeting().expect("meeting");
    assert_eq!(loopback.options().participant_name, "Ada");
    assert_eq!(
        loopback.requests(),
        vec![
            MeetingRequest::MuteMic,
            MeetingRequest::DisableWebcam,
            MeetingRequest::UnmuteMic
        ]
    );
    meeting.leave().await.expect("leave");
}
