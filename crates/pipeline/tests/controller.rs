use std::{
    path::Path,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use reelsmith_pipeline::{
    CancelAck, CaptionStrategy, ControlError, Controller, Dimensions, ErrorKind, GenerationRequest,
    JobId, JobStatus, PipelineConfig, Stage, Voice,
    testing::{
        self, FakeFootage, FakeLanguageModel, FakeMedia, FakeSpeech, FakeTranscriber, FakeVideoHost,
    },
    types::TimedWord,
};
use tokio::{sync::Notify, time::timeout};

const DEADLINE: Duration = Duration::from_secs(10);

fn request(publish: bool) -> GenerationRequest {
    GenerationRequest::new("history of coffee", Voice::EnUsFemale1, publish).unwrap()
}

fn job_dir(root: &Path, id: JobId) -> std::path::PathBuf {
    root.join("work").join(id.to_string())
}

fn output_file(root: &Path, id: JobId) -> std::path::PathBuf {
    root.join("output").join(format!("{id}.mp4"))
}

async fn finish(handle: reelsmith_pipeline::JobHandle) -> JobStatus {
    timeout(DEADLINE, handle.wait()).await.expect("job did not finish")
}

#[tokio::test]
async fn renders_a_video_matching_the_narration() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeVideoHost::new();
    let uploads = host.calls();
    let mut services = testing::collaborators();
    services.video_host = Some(Arc::new(host));
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let handle = controller.start(request(false)).unwrap();
    let id = handle.id;
    let JobStatus::Succeeded(output) = finish(handle).await else {
        panic!("job failed: {:?}", controller.status(id));
    };

    assert_eq!(output.duration, 12.5);
    assert_eq!(output.dimensions, Dimensions::VERTICAL_HD);
    assert_eq!(output.remote_id, None);
    let video = output.video_path.expect("video is kept when not publishing");
    assert_eq!(video, output_file(root.path(), id));
    assert!(video.exists());
    assert!(output.file_size.is_some());

    assert!(!job_dir(root.path(), id).exists(), "temp files survived the job");
    assert_eq!(uploads.load(Ordering::SeqCst), 0);
    assert_eq!(controller.active(), None);
}

#[tokio::test]
async fn no_footage_fails_at_the_footage_stage() {
    let root = tempfile::tempdir().unwrap();
    let mut services = testing::collaborators();
    services.footage = Arc::new(FakeFootage::new());
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let handle = controller.start(request(false)).unwrap();
    let id = handle.id;
    match finish(handle).await {
        JobStatus::Failed { stage, kind, cause } => {
            assert_eq!(stage, Stage::Footage);
            assert_eq!(kind, ErrorKind::Content);
            assert!(cause.contains("Insufficient footage"), "{cause}");
        }
        other => panic!("unexpected status {other:?}"),
    }

    assert!(!output_file(root.path(), id).exists());
    assert!(!job_dir(root.path(), id).exists());
    assert_eq!(controller.active(), None);
}

#[tokio::test]
async fn render_failures_are_reported_at_the_render_stage() {
    let root = tempfile::tempdir().unwrap();
    let mut services = testing::collaborators();
    services.media = Arc::new(FakeMedia::new().failing_render());
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let handle = controller.start(request(false)).unwrap();
    let id = handle.id;
    let status = finish(handle).await;

    assert!(
        matches!(status, JobStatus::Failed { stage: Stage::Render, kind: ErrorKind::Render, .. }),
        "{status:?}"
    );
    assert!(!job_dir(root.path(), id).exists());
}

#[tokio::test]
async fn cancel_takes_effect_at_the_next_stage_boundary() {
    let root = tempfile::tempdir().unwrap();
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let mut services = testing::collaborators();
    services.speech = Arc::new(FakeSpeech::new(12.5).gated(Arc::clone(&entered), Arc::clone(&gate)));
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let handle = controller.start(request(false)).unwrap();
    let id = handle.id;
    timeout(DEADLINE, entered.notified()).await.unwrap();

    assert_eq!(controller.status(id).unwrap(), JobStatus::Running { stage: Stage::Narration });
    assert_eq!(controller.cancel(id).unwrap(), CancelAck::Requested);
    gate.notify_one();

    assert_eq!(finish(handle).await, JobStatus::Cancelled { stage: Stage::Subtitles });
    assert!(!job_dir(root.path(), id).exists(), "script and narration survived");
    assert!(!output_file(root.path(), id).exists());
    assert_eq!(controller.cancel(id).unwrap(), CancelAck::AlreadyFinished);
}

#[tokio::test]
async fn a_second_start_is_rejected_while_a_job_runs() {
    let root = tempfile::tempdir().unwrap();
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let mut services = testing::collaborators();
    services.speech = Arc::new(FakeSpeech::new(6.0).gated(Arc::clone(&entered), Arc::clone(&gate)));
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let first = controller.start(request(false)).unwrap();
    let first_id = first.id;
    timeout(DEADLINE, entered.notified()).await.unwrap();

    match controller.start(request(false)) {
        Err(ControlError::Busy { active }) => assert_eq!(active, first_id),
        other => panic!("expected Busy, got {:?}", other.map(|h| h.id)),
    }
    assert_eq!(
        controller.status(first_id).unwrap(),
        JobStatus::Running { stage: Stage::Narration }
    );

    gate.notify_one();
    assert!(matches!(finish(first).await, JobStatus::Succeeded(_)));

    // The slot is free again once the first job is terminal.
    let second = controller.start(request(false)).unwrap();
    timeout(DEADLINE, entered.notified()).await.unwrap();
    gate.notify_one();
    assert!(matches!(finish(second).await, JobStatus::Succeeded(_)));
}

#[tokio::test]
async fn publishing_uploads_and_removes_the_local_file() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeVideoHost::new();
    let uploads = host.calls();
    let mut services = testing::collaborators();
    services.video_host = Some(Arc::new(host));
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let handle = controller.start(request(true)).unwrap();
    let id = handle.id;
    let JobStatus::Succeeded(output) = finish(handle).await else {
        panic!("job failed: {:?}", controller.status(id));
    };

    assert_eq!(output.remote_id.as_deref(), Some("remote-0"));
    assert_eq!(output.video_path, None);
    assert!(!output_file(root.path(), id).exists());
    assert_eq!(uploads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_credentials_fail_the_publish_stage_without_retries() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeVideoHost::new().rejecting();
    let uploads = host.calls();
    let mut services = testing::collaborators();
    services.video_host = Some(Arc::new(host));
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let handle = controller.start(request(true)).unwrap();
    let id = handle.id;
    let status = finish(handle).await;

    assert!(
        matches!(status, JobStatus::Failed { stage: Stage::Publish, kind: ErrorKind::Input, .. }),
        "{status:?}"
    );
    assert_eq!(uploads.load(Ordering::SeqCst), 1);
    assert!(!output_file(root.path(), id).exists());
}

#[tokio::test]
async fn rejects_bad_requests_before_claiming_the_slot() {
    let root = tempfile::tempdir().unwrap();
    let controller =
        Controller::launch(testing::config(root.path()), testing::collaborators()).unwrap();

    let blank = GenerationRequest {
        topic: "   ".into(),
        voice: Voice::default(),
        publish: false,
    };
    assert!(matches!(controller.start(blank), Err(ControlError::InvalidRequest(_))));
    // No video host is configured.
    assert!(matches!(
        controller.start(request(true)),
        Err(ControlError::InvalidRequest(_))
    ));
    assert_eq!(controller.active(), None);
}

#[tokio::test]
async fn unknown_jobs_are_reported() {
    let root = tempfile::tempdir().unwrap();
    let controller =
        Controller::launch(testing::config(root.path()), testing::collaborators()).unwrap();
    let stranger = JobId::new();

    assert!(matches!(controller.status(stranger), Err(ControlError::UnknownJob(id)) if id == stranger));
    assert!(matches!(controller.cancel(stranger), Err(ControlError::UnknownJob(_))));
}

#[tokio::test]
async fn shutdown_refuses_new_jobs() {
    let root = tempfile::tempdir().unwrap();
    let controller =
        Controller::launch(testing::config(root.path()), testing::collaborators()).unwrap();

    controller.shutdown().await;
    assert!(matches!(controller.start(request(false)), Err(ControlError::ShutDown)));
}

#[tokio::test]
async fn shutdown_finalizes_the_running_job() {
    let root = tempfile::tempdir().unwrap();
    let entered = Arc::new(Notify::new());
    // Never opened: the narration call is still in flight at shutdown.
    let gate = Arc::new(Notify::new());
    let mut services = testing::collaborators();
    services.speech = Arc::new(FakeSpeech::new(12.5).gated(Arc::clone(&entered), gate));
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let handle = controller.start(request(false)).unwrap();
    let id = handle.id;
    timeout(DEADLINE, entered.notified()).await.unwrap();
    assert!(job_dir(root.path(), id).exists());

    timeout(DEADLINE, controller.shutdown())
        .await
        .expect("shutdown hung on the running stage");

    assert_eq!(finish(handle).await, JobStatus::Cancelled { stage: Stage::Narration });
    assert_eq!(controller.status(id).unwrap(), JobStatus::Cancelled { stage: Stage::Narration });
    assert!(!job_dir(root.path(), id).exists(), "temp files outlived shutdown");
    assert_eq!(controller.active(), None);
}

fn word(text: &str, start: f64, end: f64) -> TimedWord {
    TimedWord {
        text: text.into(),
        start,
        end,
    }
}

#[tokio::test]
async fn dead_candidate_links_do_not_fail_the_job() {
    let root = tempfile::tempdir().unwrap();
    let footage = FakeFootage::stocked(3)
        .missing("coffee-beans-0")
        .missing("ethiopia-0")
        .missing("cafe-0");
    let searches = footage.searches();
    let mut services = testing::collaborators();
    services.footage = Arc::new(footage);
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let handle = controller.start(request(false)).unwrap();
    let id = handle.id;
    let status = finish(handle).await;

    assert!(matches!(status, JobStatus::Succeeded(_)), "{status:?}");
    assert_eq!(searches.load(Ordering::SeqCst), 3);
    assert!(!job_dir(root.path(), id).exists());
}

#[tokio::test]
async fn an_upload_that_lands_after_cancel_is_kept() {
    let root = tempfile::tempdir().unwrap();
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let host = FakeVideoHost::new().gated(Arc::clone(&entered), Arc::clone(&gate));
    let mut services = testing::collaborators();
    services.video_host = Some(Arc::new(host));
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let handle = controller.start(request(true)).unwrap();
    let id = handle.id;
    timeout(DEADLINE, entered.notified()).await.unwrap();

    assert_eq!(controller.status(id).unwrap(), JobStatus::Running { stage: Stage::Publish });
    assert_eq!(controller.cancel(id).unwrap(), CancelAck::Requested);
    gate.notify_one();

    let JobStatus::Succeeded(output) = finish(handle).await else {
        panic!("upload was discarded: {:?}", controller.status(id));
    };
    assert_eq!(output.remote_id.as_deref(), Some("remote-0"));
    assert!(!job_dir(root.path(), id).exists());
}

#[tokio::test]
async fn unusable_scripts_are_retried_with_a_new_prompt() {
    let root = tempfile::tempdir().unwrap();
    let model = FakeLanguageModel::new().with_replies([
        "I'm sorry, but I can't help with that.",
        r#"{"script": "Too short.", "search_terms": ["coffee"]}"#,
    ]);
    let calls = model.calls();
    let prompts = model.prompts();
    let mut services = testing::collaborators();
    services.language_model = Arc::new(model);
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let handle = controller.start(request(false)).unwrap();
    let status = finish(handle).await;

    assert!(matches!(status, JobStatus::Succeeded(_)), "{status:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let prompts = prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 3);
    assert!(prompts.iter().all(|p| p.contains("history of coffee")));
    assert_ne!(prompts[0], prompts[1]);
    assert_ne!(prompts[1], prompts[2]);
}

#[tokio::test]
async fn transcription_captions_follow_word_timings() {
    let root = tempfile::tempdir().unwrap();
    let transcriber = FakeTranscriber::new(vec![
        word("Coffee", 0.3, 0.7),
        word("is", 0.8, 0.9),
        word("old.", 1.0, 1.4),
        word("Very", 2.1, 2.4),
        word("old.", 2.5, 2.9),
    ]);
    let media = FakeMedia::new();
    let subtitles = media.subtitles();
    let mut services = testing::collaborators();
    services.transcriber = Some(Arc::new(transcriber));
    services.media = Arc::new(media);
    let config = PipelineConfig {
        caption_strategy: CaptionStrategy::Transcription,
        ..testing::config(root.path())
    };
    let controller = Controller::launch(config, services).unwrap();

    let handle = controller.start(request(false)).unwrap();
    assert!(matches!(finish(handle).await, JobStatus::Succeeded(_)));

    let srt = subtitles.lock().unwrap()[0].clone();
    assert!(srt.contains("00:00:00,000 --> 00:00:02,100\nCoffee is old."), "{srt}");
    assert!(srt.contains("00:00:02,100 --> 00:00:12,500\nVery old."), "{srt}");
}

#[tokio::test]
async fn silent_transcription_falls_back_to_estimated_timing() {
    let root = tempfile::tempdir().unwrap();
    let transcriber = FakeTranscriber::new(Vec::new());
    let transcriptions = transcriber.calls();
    let media = FakeMedia::new();
    let subtitles = media.subtitles();
    let mut services = testing::collaborators();
    services.transcriber = Some(Arc::new(transcriber));
    services.media = Arc::new(media);
    let config = PipelineConfig {
        caption_strategy: CaptionStrategy::Transcription,
        ..testing::config(root.path())
    };
    let controller = Controller::launch(config, services).unwrap();

    let handle = controller.start(request(false)).unwrap();
    assert!(matches!(finish(handle).await, JobStatus::Succeeded(_)));

    assert_eq!(transcriptions.load(Ordering::SeqCst), 1);
    let srt = subtitles.lock().unwrap()[0].clone();
    assert!(srt.starts_with("1\n00:00:00,000 --> "), "{srt}");
    assert!(srt.contains("Coffee was first"), "{srt}");
    assert!(srt.contains(" --> 00:00:12,500\n"), "{srt}");
}

#[tokio::test]
async fn transient_upload_failures_end_in_a_publish_failure() {
    let root = tempfile::tempdir().unwrap();
    let host = FakeVideoHost::new().unavailable();
    let uploads = host.calls();
    let mut services = testing::collaborators();
    services.video_host = Some(Arc::new(host));
    let config = testing::config(root.path());
    let attempts = config.publish_retry.max_attempts as usize;
    let controller = Controller::launch(config, services).unwrap();

    let handle = controller.start(request(true)).unwrap();
    let id = handle.id;
    match finish(handle).await {
        JobStatus::Failed { stage, kind, cause } => {
            assert_eq!(stage, Stage::Publish);
            assert_eq!(kind, ErrorKind::Collaborator);
            assert!(cause.starts_with("Publish failed"), "{cause}");
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(uploads.load(Ordering::SeqCst), attempts);
    assert!(!output_file(root.path(), id).exists());
}

#[tokio::test]
async fn cancel_during_subtitles_stops_before_render() {
    let root = tempfile::tempdir().unwrap();
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let transcriber = FakeTranscriber::new(vec![word("Coffee.", 0.0, 1.0)])
        .gated(Arc::clone(&entered), Arc::clone(&gate));
    let media = FakeMedia::new();
    let plans = media.plans();
    let mut services = testing::collaborators();
    services.transcriber = Some(Arc::new(transcriber));
    services.media = Arc::new(media);
    let config = PipelineConfig {
        caption_strategy: CaptionStrategy::Transcription,
        ..testing::config(root.path())
    };
    let controller = Controller::launch(config, services).unwrap();

    let handle = controller.start(request(false)).unwrap();
    let id = handle.id;
    timeout(DEADLINE, entered.notified()).await.unwrap();
    assert_eq!(controller.status(id).unwrap(), JobStatus::Running { stage: Stage::Subtitles });
    assert_eq!(controller.cancel(id).unwrap(), CancelAck::Requested);
    gate.notify_one();

    assert_eq!(finish(handle).await, JobStatus::Cancelled { stage: Stage::Render });
    assert!(plans.lock().unwrap().is_empty(), "render started after cancel");
    assert!(!job_dir(root.path(), id).exists());
    assert!(!output_file(root.path(), id).exists());
}

#[tokio::test]
async fn abandoning_ends_the_job_without_waiting_for_the_stage() {
    let root = tempfile::tempdir().unwrap();
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let mut services = testing::collaborators();
    services.speech =
        Arc::new(FakeSpeech::new(12.5).gated(Arc::clone(&entered), Arc::clone(&gate)));
    let controller = Controller::launch(testing::config(root.path()), services).unwrap();

    let first = controller.start(request(false)).unwrap();
    let first_id = first.id;
    timeout(DEADLINE, entered.notified()).await.unwrap();

    assert_eq!(controller.cancel(first_id).unwrap(), CancelAck::Requested);
    let ack = timeout(DEADLINE, controller.abandon(first_id))
        .await
        .expect("abandon waited on the stage in flight")
        .unwrap();
    assert_eq!(ack, CancelAck::Requested);
    assert_eq!(finish(first).await, JobStatus::Cancelled { stage: Stage::Narration });
    assert!(!job_dir(root.path(), first_id).exists());
    assert_eq!(controller.active(), None);
    assert_eq!(controller.abandon(first_id).await.unwrap(), CancelAck::AlreadyFinished);

    // The abandoned call finishes late; its output must not resurrect the job.
    gate.notify_one();
    let second = controller.start(request(false)).unwrap();
    timeout(DEADLINE, entered.notified()).await.unwrap();
    gate.notify_one();
    assert!(matches!(finish(second).await, JobStatus::Succeeded(_)));

    assert_eq!(
        controller.status(first_id).unwrap(),
        JobStatus::Cancelled { stage: Stage::Narration }
    );
    assert!(!job_dir(root.path(), first_id).exists(), "late narration output leaked");
}
