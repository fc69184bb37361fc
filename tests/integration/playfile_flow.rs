use mockall::predicate::eq;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use playfile::commands::playback::utils::{
    embedded_messages::Notice,
    playback_manager::PlaybackManager,
    playfile_error::PlayfileError,
    sinks::{AudioSink, PlaybackHandle, PlaybackOutcome},
};
use playfile::utils::config::{DisconnectPolicy, StagingMode};

use crate::common::fixtures::{self, GENERAL, GUILD, LOUNGE, OTHER_GUILD, SAMPLE_AUDIO, files_in};
use crate::common::mocks::{self, GatedTransport, MockStore, MockTransport, RecordingNotifier};
use crate::common::{manager, manager_with_sink, wait_until};
use crate::test_utils;

fn store_returning_sample(times: usize) -> MockStore {
    let mut store = MockStore::new();
    store
        .expect_fetch()
        .times(times)
        .returning(|_| Ok(SAMPLE_AUDIO.to_vec()));
    store
}

#[tokio::test]
async fn no_attachment_is_rejected_without_side_effects() {
    test_utils::init();
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let manager = manager(
        fixtures::config(dir.path()),
        MockStore::new(),
        MockTransport::new(),
        mocks::sink(),
    );

    manager
        .playfile(fixtures::request(GUILD, None, Some(GENERAL)), &notifier)
        .await;

    assert_eq!(notifier.texts(), vec!["Please attach an audio file to play."]);
    assert!(!manager.is_playing(GUILD));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn disallowed_extension_lists_the_allowed_formats() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let manager = manager(
        fixtures::config(dir.path()),
        MockStore::new(),
        MockTransport::new(),
        mocks::sink(),
    );

    manager
        .playfile(fixtures::request(GUILD, Some("notes.mp3x"), Some(GENERAL)), &notifier)
        .await;

    assert_eq!(
        notifier.texts(),
        vec!["Please attach a valid audio file (mp3, wav, or ogg)."]
    );
    assert!(!manager.is_playing(GUILD));
}

#[tokio::test]
async fn requester_outside_voice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let manager = manager(
        fixtures::config(dir.path()),
        MockStore::new(),
        MockTransport::new(),
        mocks::sink(),
    );

    manager
        .playfile(fixtures::request(GUILD, Some("track.ogg"), None), &notifier)
        .await;

    assert_eq!(
        notifier.texts(),
        vec!["You need to be in a voice channel to use this command."]
    );
    assert!(!manager.is_playing(GUILD));
}

#[tokio::test]
async fn missing_sink_is_reported_before_touching_anything() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = RecordingNotifier::new();
    let manager = manager_with_sink(
        fixtures::config(dir.path()),
        Arc::new(MockStore::new()),
        MockTransport::new(),
        Err(PlayfileError::DependencyMissing("ffmpeg".to_string())),
    );

    manager
        .playfile(fixtures::request(GUILD, Some("track.ogg"), Some(GENERAL)), &notifier)
        .await;

    assert_eq!(
        notifier.texts(),
        vec!["Audio playback is unavailable right now: ffmpeg is missing."]
    );
    assert!(!manager.is_playing(GUILD));
}

#[tokio::test]
async fn plays_attachment_then_cleans_up_and_disconnects() {
    test_utils::init();
    let dir = tempfile::tempdir().unwrap();

    let mut transport = MockTransport::new();
    transport
        .expect_current_channel()
        .with(eq(GUILD))
        .times(1)
        .returning(|_| None);
    transport
        .expect_connect()
        .with(eq(GUILD), eq(GENERAL), eq(Duration::from_secs(60)))
        .times(1)
        .returning(|_, _, _| Ok(()));
    transport.expect_move_to().never();
    transport
        .expect_disconnect()
        .with(eq(GUILD))
        .times(1)
        .returning(|_| Ok(()));

    let (done, handle) = PlaybackHandle::channel();
    let mut sink = mocks::sink();
    sink.expect_play()
        .withf(|guild_id, staged| {
            *guild_id == GUILD
                && staged.filename() == "track.ogg"
                && staged.path().is_some_and(|p| p.exists())
        })
        .times(1)
        .return_once(move |_, _| Ok(handle));
    sink.expect_stop().never();

    let manager = manager(
        fixtures::config(dir.path()),
        store_returning_sample(1),
        transport,
        sink,
    );
    let (notifier, mut notices) = RecordingNotifier::with_channel();
    let notifier = Arc::new(notifier);

    let task = tokio::spawn({
        let manager = manager.clone();
        let notifier = notifier.clone();
        async move {
            manager
                .playfile(fixtures::request(GUILD, Some("track.ogg"), Some(GENERAL)), notifier.as_ref())
                .await
        }
    });

    assert_eq!(
        notices.recv().await,
        Some(Notice::NowPlaying("track.ogg".to_string()))
    );
    assert!(manager.is_playing(GUILD));
    assert_eq!(files_in(dir.path()), 1);

    assert!(done.complete(PlaybackOutcome::Finished));
    task.await.unwrap();

    assert_eq!(notifier.texts(), vec!["Now playing: track.ogg"]);
    assert!(!manager.is_playing(GUILD));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn second_request_for_same_guild_is_busy() {
    let dir = tempfile::tempdir().unwrap();

    let mut transport = MockTransport::new();
    transport
        .expect_current_channel()
        .times(1)
        .returning(|_| None);
    transport.expect_connect().times(1).returning(|_, _, _| Ok(()));
    transport.expect_disconnect().times(1).returning(|_| Ok(()));

    let (done, handle) = PlaybackHandle::channel();
    let mut sink = mocks::sink();
    sink.expect_play().times(1).return_once(move |_, _| Ok(handle));

    let manager = manager(
        fixtures::config(dir.path()),
        store_returning_sample(1),
        transport,
        sink,
    );
    let (first_notifier, mut notices) = RecordingNotifier::with_channel();

    let first = tokio::spawn({
        let manager = manager.clone();
        async move {
            manager
                .playfile(fixtures::request(GUILD, Some("track.ogg"), Some(GENERAL)), &first_notifier)
                .await;
            first_notifier.texts()
        }
    });
    assert!(matches!(notices.recv().await, Some(Notice::NowPlaying(_))));

    let second_notifier = RecordingNotifier::new();
    manager
        .playfile(fixtures::request(GUILD, Some("other.mp3"), Some(GENERAL)), &second_notifier)
        .await;

    assert_eq!(
        second_notifier.texts(),
        vec!["I'm already playing a file in this server. Please wait for it to finish."]
    );
    assert!(manager.is_playing(GUILD));

    done.complete(PlaybackOutcome::Finished);
    assert_eq!(first.await.unwrap(), vec!["Now playing: track.ogg"]);
    assert!(!manager.is_playing(GUILD));
}

#[tokio::test]
async fn different_guilds_play_independently() {
    let dir = tempfile::tempdir().unwrap();

    let mut transport = MockTransport::new();
    transport.expect_current_channel().times(2).returning(|_| None);
    transport.expect_connect().times(2).returning(|_, _, _| Ok(()));
    transport.expect_disconnect().times(2).returning(|_| Ok(()));

    let (done_a, handle_a) = PlaybackHandle::channel();
    let (done_b, handle_b) = PlaybackHandle::channel();
    let mut sink = mocks::sink();
    sink.expect_play()
        .withf(|guild_id, _| *guild_id == GUILD)
        .times(1)
        .return_once(move |_, _| Ok(handle_a));
    sink.expect_play()
        .withf(|guild_id, _| *guild_id == OTHER_GUILD)
        .times(1)
        .return_once(move |_, _| Ok(handle_b));

    let manager = manager(
        fixtures::config(dir.path()),
        store_returning_sample(2),
        transport,
        sink,
    );
    let (notifier, mut notices) = RecordingNotifier::with_channel();
    let notifier = Arc::new(notifier);

    let mut tasks = Vec::new();
    for guild_id in [GUILD, OTHER_GUILD] {
        let manager = manager.clone();
        let notifier = notifier.clone();
        tasks.push(tokio::spawn(async move {
            manager
                .playfile(fixtures::request(guild_id, Some("track.wav"), Some(GENERAL)), notifier.as_ref())
                .await
        }));
    }

    notices.recv().await;
    notices.recv().await;
    assert!(manager.is_playing(GUILD));
    assert!(manager.is_playing(OTHER_GUILD));

    done_a.complete(PlaybackOutcome::Finished);
    done_b.complete(PlaybackOutcome::Finished);
    futures::future::join_all(tasks).await;

    assert!(!manager.is_playing(GUILD));
    assert!(!manager.is_playing(OTHER_GUILD));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn download_failure_cleans_up_without_touching_voice() {
    let dir = tempfile::tempdir().unwrap();

    let mut store = MockStore::new();
    store
        .expect_fetch()
        .times(1)
        .returning(|_| Err(PlayfileError::Staging("HTTP 404".to_string())));

    let mut transport = MockTransport::new();
    transport.expect_current_channel().never();
    transport.expect_connect().never();
    transport.expect_disconnect().never();

    let notifier = RecordingNotifier::new();
    let manager = manager(fixtures::config(dir.path()), store, transport, mocks::sink());

    manager
        .playfile(fixtures::request(GUILD, Some("track.ogg"), Some(GENERAL)), &notifier)
        .await;

    assert_eq!(
        notifier.texts(),
        vec!["I couldn't download that file. Please try again."]
    );
    assert!(!manager.is_playing(GUILD));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn connect_failure_skips_playback_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();

    let mut transport = MockTransport::new();
    transport.expect_current_channel().times(1).returning(|_| None);
    transport
        .expect_connect()
        .times(1)
        .returning(|_, _, timeout| Err(PlayfileError::ConnectTimeout(timeout)));
    transport.expect_disconnect().times(1).returning(|_| Ok(()));

    let mut sink = mocks::sink();
    sink.expect_play().never();

    let notifier = RecordingNotifier::new();
    let manager = manager(
        fixtures::config(dir.path()),
        store_returning_sample(1),
        transport,
        sink,
    );

    manager
        .playfile(fixtures::request(GUILD, Some("track.ogg"), Some(GENERAL)), &notifier)
        .await;

    assert_eq!(
        notifier.texts(),
        vec!["I couldn't connect to your voice channel. Please try again."]
    );
    assert!(!manager.is_playing(GUILD));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn sink_failure_is_reported_and_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();

    let mut transport = MockTransport::new();
    transport.expect_current_channel().times(1).returning(|_| None);
    transport.expect_connect().times(1).returning(|_, _, _| Ok(()));
    transport.expect_disconnect().times(1).returning(|_| Ok(()));

    let mut sink = mocks::sink();
    sink.expect_play()
        .times(1)
        .returning(|_, _| Err(PlayfileError::Playback("decoder exploded".to_string())));

    let notifier = RecordingNotifier::new();
    let manager = manager(
        fixtures::config(dir.path()),
        store_returning_sample(1),
        transport,
        sink,
    );

    manager
        .playfile(fixtures::request(GUILD, Some("track.ogg"), Some(GENERAL)), &notifier)
        .await;

    assert_eq!(
        notifier.texts(),
        vec!["An error occurred while trying to play the file: decoder exploded"]
    );
    assert!(!manager.is_playing(GUILD));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn failure_during_playback_follows_now_playing() {
    let dir = tempfile::tempdir().unwrap();

    let mut transport = MockTransport::new();
    transport.expect_current_channel().times(1).returning(|_| None);
    transport.expect_connect().times(1).returning(|_, _, _| Ok(()));
    transport.expect_disconnect().times(1).returning(|_| Ok(()));

    let (done, handle) = PlaybackHandle::channel();
    done.complete(PlaybackOutcome::Failed("unexpected end of stream".to_string()));
    let mut sink = mocks::sink();
    sink.expect_play().times(1).return_once(move |_, _| Ok(handle));

    let notifier = RecordingNotifier::new();
    let manager = manager(
        fixtures::config(dir.path()),
        store_returning_sample(1),
        transport,
        sink,
    );

    manager
        .playfile(fixtures::request(GUILD, Some("track.ogg"), Some(GENERAL)), &notifier)
        .await;

    assert_eq!(
        notifier.texts(),
        vec![
            "Now playing: track.ogg",
            "An error occurred while trying to play the file: unexpected end of stream",
        ]
    );
    assert!(!manager.is_playing(GUILD));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn moves_existing_session_to_requester_channel() {
    let dir = tempfile::tempdir().unwrap();

    let mut transport = MockTransport::new();
    transport
        .expect_current_channel()
        .times(1)
        .returning(|_| Some(LOUNGE));
    transport.expect_connect().never();
    transport
        .expect_move_to()
        .with(eq(GUILD), eq(GENERAL), eq(Duration::from_secs(60)))
        .times(1)
        .returning(|_, _, _| Ok(()));
    transport.expect_disconnect().times(1).returning(|_| Ok(()));

    let (done, handle) = PlaybackHandle::channel();
    done.complete(PlaybackOutcome::Finished);
    let mut sink = mocks::sink();
    sink.expect_play().times(1).return_once(move |_, _| Ok(handle));

    let notifier = RecordingNotifier::new();
    let manager = manager(
        fixtures::config(dir.path()),
        store_returning_sample(1),
        transport,
        sink,
    );

    manager
        .playfile(fixtures::request(GUILD, Some("track.ogg"), Some(GENERAL)), &notifier)
        .await;

    assert_eq!(notifier.texts(), vec!["Now playing: track.ogg"]);
}

#[tokio::test]
async fn keep_policy_reuses_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixtures::config(dir.path());
    config.disconnect_policy = DisconnectPolicy::Keep;

    let mut transport = MockTransport::new();
    transport
        .expect_current_channel()
        .times(1)
        .returning(|_| Some(GENERAL));
    transport.expect_connect().never();
    transport.expect_move_to().never();
    transport.expect_disconnect().never();

    let (done, handle) = PlaybackHandle::channel();
    done.complete(PlaybackOutcome::Finished);
    let mut sink = mocks::sink();
    sink.expect_play().times(1).return_once(move |_, _| Ok(handle));

    let notifier = RecordingNotifier::new();
    let manager = manager(config, store_returning_sample(1), transport, sink);

    manager
        .playfile(fixtures::request(GUILD, Some("track.ogg"), Some(GENERAL)), &notifier)
        .await;

    assert_eq!(notifier.texts(), vec!["Now playing: track.ogg"]);
    assert!(!manager.is_playing(GUILD));
}

#[tokio::test]
async fn memory_staging_never_writes_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixtures::config(dir.path());
    config.staging = StagingMode::Memory;

    let mut transport = MockTransport::new();
    transport.expect_current_channel().times(1).returning(|_| None);
    transport.expect_connect().times(1).returning(|_, _, _| Ok(()));
    transport.expect_disconnect().times(1).returning(|_| Ok(()));

    let (done, handle) = PlaybackHandle::channel();
    done.complete(PlaybackOutcome::Finished);
    let mut sink = mocks::sink();
    sink.expect_play()
        .withf(|_, staged| {
            staged.path().is_none()
                && staged.bytes().is_some_and(|bytes| &bytes[..] == SAMPLE_AUDIO)
        })
        .times(1)
        .return_once(move |_, _| Ok(handle));

    let notifier = RecordingNotifier::new();
    let manager = manager(config, store_returning_sample(1), transport, sink);

    manager
        .playfile(fixtures::request(GUILD, Some("Song.MP3"), Some(GENERAL)), &notifier)
        .await;

    assert_eq!(notifier.texts(), vec!["Now playing: Song.MP3"]);
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn sink_trait_objects_are_shareable() {
    let sink: Arc<dyn AudioSink> = Arc::new(mocks::sink());
    assert_eq!(sink.name(), "mock");
}

fn finished_handle() -> PlaybackHandle {
    let (done, handle) = PlaybackHandle::channel();
    done.complete(PlaybackOutcome::Finished);
    handle
}

#[tokio::test]
async fn failing_to_leave_after_playback_is_only_logged() {
    let dir = tempfile::tempdir().unwrap();

    let mut transport = MockTransport::new();
    transport.expect_current_channel().times(1).returning(|_| None);
    transport.expect_connect().times(1).returning(|_, _, _| Ok(()));
    transport
        .expect_disconnect()
        .with(eq(GUILD))
        .times(1)
        .returning(|_| Err(PlayfileError::Transport("gateway closed".to_string())));

    let mut sink = mocks::sink();
    sink.expect_play()
        .times(1)
        .returning(|_, _| Ok(finished_handle()));

    let manager = manager(
        fixtures::config(dir.path()),
        store_returning_sample(1),
        transport,
        sink,
    );
    let notifier = RecordingNotifier::new();

    manager
        .playfile(fixtures::request(GUILD, Some("track.ogg"), Some(GENERAL)), &notifier)
        .await;

    assert_eq!(notifier.texts(), vec!["Now playing: track.ogg"]);
    assert!(!manager.is_playing(GUILD));
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn next_request_connects_after_previous_one_has_left() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(GatedTransport::new());

    let mut sink = mocks::sink();
    sink.expect_play()
        .times(2)
        .returning(|_, _| Ok(finished_handle()));

    let manager = Arc::new(PlaybackManager::new(
        fixtures::config(dir.path()),
        Arc::new(store_returning_sample(2)),
        transport.clone(),
        Ok(Arc::new(sink)),
    ));
    let first_notifier = Arc::new(RecordingNotifier::new());
    let second_notifier = Arc::new(RecordingNotifier::new());

    let first = tokio::spawn({
        let manager = manager.clone();
        let notifier = first_notifier.clone();
        async move {
            manager
                .playfile(fixtures::request(GUILD, Some("first.mp3"), Some(GENERAL)), notifier.as_ref())
                .await
        }
    });

    // The first request has released the guild and is stuck leaving the channel
    wait_until(|| transport.disconnects_started() == 1).await;
    assert!(!manager.is_playing(GUILD));
    assert_eq!(transport.session(), Some(GENERAL));

    let second = tokio::spawn({
        let manager = manager.clone();
        let notifier = second_notifier.clone();
        async move {
            manager
                .playfile(fixtures::request(GUILD, Some("second.wav"), Some(GENERAL)), notifier.as_ref())
                .await
        }
    });
    wait_until(|| manager.is_playing(GUILD)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.connects(), 1);

    transport.open();
    first.await.unwrap();
    second.await.unwrap();

    // The second request joined on its own instead of riding the departing session
    assert_eq!(transport.connects(), 2);
    assert_eq!(transport.disconnects_started(), 2);
    assert_eq!(transport.session(), None);
    assert_eq!(first_notifier.texts(), vec!["Now playing: first.mp3"]);
    assert_eq!(second_notifier.texts(), vec!["Now playing: second.wav"]);
}
