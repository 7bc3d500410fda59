//! End-to-end job lifecycle tests against scripted backends.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{open_studio, source_file, test_config, wait_for_status, MockFrontEnd, MockTranscriber};
use subforge_core::heartbeat::HeartbeatMonitor;
use subforge_core::job_db::{unix_millis, ErrorCode, JobStatus};
use subforge_core::job_store::CancelOutcome;
use subforge_core::options::{Language, RecognitionOptions, ValidationError};
use subforge_core::studio::{SubmitError, SubmitRequest, Studio};
use tokio_util::sync::CancellationToken;

async fn studio_with(
    dir: &std::path::Path,
    backend: Arc<MockTranscriber>,
    segments: usize,
    tweak: impl FnOnce(&mut subforge_core::config::StudioConfig),
) -> Studio {
    let mut cfg = test_config(dir);
    tweak(&mut cfg);
    open_studio(dir, cfg, backend, Arc::new(MockFrontEnd::evenly_spaced(segments))).await
}

fn request(dir: &std::path::Path, language: &str) -> SubmitRequest {
    SubmitRequest {
        language: language.to_string(),
        ..SubmitRequest::new(source_file(dir, "talk.wav"))
    }
}

#[tokio::test]
async fn transient_failure_is_retried_and_job_completes() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber::with_texts(&["Good morning.", "How are you?", "Fine, thanks."]));
    backend.flaky.lock().unwrap().insert(1);
    let studio = studio_with(dir.path(), Arc::clone(&backend), 3, |_| {}).await;

    let id = studio.submit(request(dir.path(), "en")).await.unwrap();
    assert_eq!(studio.status(&id, 0).unwrap().status, JobStatus::Queued);
    assert_eq!(studio.run_until_idle(None).await.unwrap(), 1);

    let view = studio.status(&id, 0).unwrap();
    assert_eq!(view.status, JobStatus::Done, "{:?}", view.logs);
    assert_eq!(view.progress, 100.0);
    assert!(view.logs.iter().any(|l| l.message.contains("retrying")));
    assert_eq!(backend.calls(), 4);

    let download = view.download.unwrap();
    assert_eq!(download.download_name, "talk.srt");
    let srt = std::fs::read_to_string(&download.path).unwrap();
    assert_eq!(
        srt,
        "1\n00:00:00,000 --> 00:00:02,000\nGood morning.\n\n\
         2\n00:00:03,000 --> 00:00:05,000\nHow are you?\n\n\
         3\n00:00:06,000 --> 00:00:08,000\nFine, thanks.\n"
    );
}

#[tokio::test]
async fn dispatch_respects_concurrency_bound() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber {
        delay: Duration::from_millis(40),
        ..Default::default()
    });
    let studio = studio_with(dir.path(), Arc::clone(&backend), 5, |cfg| cfg.concurrency = 2).await;

    let id = studio.submit(request(dir.path(), "en")).await.unwrap();
    studio.run_until_idle(None).await.unwrap();

    assert_eq!(studio.status(&id, 0).unwrap().status, JobStatus::Done);
    assert_eq!(backend.calls(), 5);
    assert!(backend.max_in_flight() <= 2);
    assert!(backend.max_in_flight() >= 1);
}

#[tokio::test]
async fn permanent_backend_failure_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber {
        broken: [0].into_iter().collect(),
        ..Default::default()
    });
    let studio = studio_with(dir.path(), Arc::clone(&backend), 3, |cfg| cfg.concurrency = 1).await;

    let id = studio.submit(request(dir.path(), "en")).await.unwrap();
    studio.run_until_idle(None).await.unwrap();

    let view = studio.status(&id, 0).unwrap();
    assert_eq!(view.status, JobStatus::Error);
    assert_eq!(view.error.unwrap().code, ErrorCode::Backend);
    assert!(view.download.is_none());
    assert!(!studio.layout().output_path(&id).exists());
    // Rejections are not retried and stop further dispatch.
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn silent_transcripts_end_in_no_speech() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber::with_texts(&["", "  "]));
    let studio = studio_with(dir.path(), Arc::clone(&backend), 2, |_| {}).await;

    let id = studio.submit(request(dir.path(), "zh")).await.unwrap();
    studio.run_until_idle(None).await.unwrap();

    let view = studio.status(&id, 0).unwrap();
    assert_eq!(view.status, JobStatus::Error);
    assert_eq!(view.error.unwrap().code, ErrorCode::NoSpeech);
    // Each empty segment gets exactly one widened retry.
    assert_eq!(backend.calls(), 4);
}

#[tokio::test]
async fn empty_segment_is_retried_with_wider_window_and_auto_language() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber::with_texts(&["One.", "Two.", "Three."]));
    backend.empty_once.lock().unwrap().insert(1);
    let frontend = Arc::new(MockFrontEnd::evenly_spaced(3));
    let studio = open_studio(dir.path(), test_config(dir.path()), backend.clone(), frontend.clone()).await;

    let id = studio.submit(request(dir.path(), "en")).await.unwrap();
    studio.run_until_idle(None).await.unwrap();

    let view = studio.status(&id, 0).unwrap();
    assert_eq!(view.status, JobStatus::Done, "{:?}", view.logs);
    assert!(view.logs.iter().any(|l| l.message == "recovered 1 of 1 empty segment(s)"));
    assert_eq!(backend.calls(), 4);
    let requests = backend.requests.lock().unwrap().clone();
    assert_eq!(requests.last(), Some(&(1, Language::Auto)));
    assert!(requests[..3].iter().all(|(_, lang)| *lang == Language::En));

    let extracted = frontend.extracted.lock().unwrap().clone();
    assert_eq!(extracted.len(), 2);
    let window = extracted[1][0];
    assert!((window.start - 2.65).abs() < 1e-9 && (window.end - 5.35).abs() < 1e-9, "{window:?}");

    // Cue timing stays on the original segment.
    let srt = std::fs::read_to_string(view.download.unwrap().path).unwrap();
    assert!(srt.contains("00:00:03,000 --> 00:00:05,000\nTwo.\n"), "{srt}");
}

#[tokio::test]
async fn short_extraction_fails_the_job_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber::default());
    let frontend = MockFrontEnd {
        missing_clips: 1,
        ..MockFrontEnd::evenly_spaced(3)
    };
    let studio = open_studio(dir.path(), test_config(dir.path()), backend.clone(), Arc::new(frontend)).await;

    let id = studio.submit(request(dir.path(), "en")).await.unwrap();
    studio.run_until_idle(None).await.unwrap();

    let view = studio.status(&id, 0).unwrap();
    assert_eq!(view.status, JobStatus::Error);
    assert_eq!(view.error.unwrap().code, ErrorCode::FrontEnd);
    assert_eq!(backend.calls(), 0);
    assert!(view.download.is_none());
}

#[tokio::test]
async fn cancel_before_claim_never_runs() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber::default());
    let studio = studio_with(dir.path(), Arc::clone(&backend), 2, |_| {}).await;

    let id = studio.submit(request(dir.path(), "en")).await.unwrap();
    assert_eq!(studio.cancel(&id).await.unwrap(), CancelOutcome::Cancelled);
    assert_eq!(studio.run_until_idle(None).await.unwrap(), 0);

    assert_eq!(studio.status(&id, 0).unwrap().status, JobStatus::Cancelled);
    assert_eq!(backend.calls(), 0);
    assert_eq!(
        studio.cancel(&id).await.unwrap(),
        CancelOutcome::AlreadyTerminal(JobStatus::Cancelled)
    );
}

#[tokio::test]
async fn cancel_while_running_drains_and_discards_output() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber {
        delay: Duration::from_millis(100),
        ..Default::default()
    });
    let studio = Arc::new(studio_with(dir.path(), Arc::clone(&backend), 6, |cfg| cfg.concurrency = 1).await);
    let shutdown = CancellationToken::new();
    let serving = studio.start(shutdown.clone());

    let id = studio.submit(request(dir.path(), "en")).await.unwrap();
    assert!(wait_for_status(&studio, &id, JobStatus::Running, Duration::from_secs(5)).await);
    while backend.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(studio.cancel(&id).await.unwrap(), CancelOutcome::Requested);
    assert!(wait_for_status(&studio, &id, JobStatus::Cancelled, Duration::from_secs(5)).await);

    let view = studio.status(&id, 0).unwrap();
    assert!(view.cancel_requested);
    assert!(view.download.is_none());
    assert!(!studio.layout().output_path(&id).exists());
    assert!(backend.calls() < 6);

    shutdown.cancel();
    assert_eq!(serving.await.unwrap().unwrap(), 1);
}

#[tokio::test]
async fn restart_requeues_running_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber::default());
    let id = {
        let studio = studio_with(dir.path(), Arc::clone(&backend), 2, |_| {}).await;
        let id = studio.submit(request(dir.path(), "en")).await.unwrap();
        // Claimed by a worker that then died with the process.
        assert!(studio.store().claim(&id).await.unwrap());
        id
    };

    let studio = studio_with(dir.path(), Arc::clone(&backend), 2, |_| {}).await;
    assert_eq!(studio.status(&id, 0).unwrap().status, JobStatus::Running);
    let report = studio.recover().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.queued, 1);
    assert_eq!(studio.run_until_idle(None).await.unwrap(), 1);

    let view = studio.status(&id, 0).unwrap();
    assert_eq!(view.status, JobStatus::Done);
    assert!(view.logs.iter().any(|l| l.message == "requeued after restart"));
}

#[tokio::test]
async fn second_runner_leaves_live_jobs_alone() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber::default());
    let first = studio_with(dir.path(), Arc::clone(&backend), 2, |_| {}).await;
    let id = first.submit(request(dir.path(), "en")).await.unwrap();
    assert!(first.store().claim(&id).await.unwrap());

    let second = studio_with(dir.path(), Arc::clone(&backend), 2, |_| {}).await;
    let report = second.recover().await.unwrap();
    assert_eq!(report.requeued, 0);
    assert_eq!(report.leased, 1);
    assert_eq!(second.run_until_idle(None).await.unwrap(), 0);
    assert!(!second.store().claim(&id).await.unwrap());

    assert_eq!(first.status(&id, 0).unwrap().status, JobStatus::Running);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn silent_running_job_is_orphaned() {
    let dir = tempfile::tempdir().unwrap();
    let studio = studio_with(dir.path(), Arc::new(MockTranscriber::default()), 1, |_| {}).await;
    let id = studio.submit(request(dir.path(), "en")).await.unwrap();
    assert!(studio.store().claim(&id).await.unwrap());

    let monitor = HeartbeatMonitor::new(Arc::clone(studio.store()), Duration::from_secs(60));
    assert_eq!(monitor.sweep_at(unix_millis()).await, 0);
    assert_eq!(monitor.sweep_at(unix_millis() + 61_000).await, 1);

    let view = studio.status(&id, 0).unwrap();
    assert_eq!(view.status, JobStatus::Error);
    assert_eq!(view.error.unwrap().code, ErrorCode::Orphaned);
}

#[tokio::test]
async fn status_cursor_only_returns_new_lines() {
    let dir = tempfile::tempdir().unwrap();
    let studio = studio_with(dir.path(), Arc::new(MockTranscriber::default()), 2, |_| {}).await;
    let id = studio.submit(request(dir.path(), "en")).await.unwrap();

    let first = studio.status(&id, 0).unwrap();
    assert_eq!(first.logs.len(), 1);
    assert!(first.logs[0].message.starts_with("queued"));

    studio.run_until_idle(None).await.unwrap();
    let second = studio.status(&id, first.next_seq).unwrap();
    assert!(!second.logs.is_empty());
    assert!(second.logs.iter().all(|l| l.seq > first.next_seq));
    assert!(second.logs.windows(2).all(|w| w[0].seq < w[1].seq));

    let third = studio.status(&id, second.next_seq).unwrap();
    assert!(third.logs.is_empty());
    assert_eq!(third.next_seq, second.next_seq);
    assert!(studio.status("missing", 0).is_none());
}

#[tokio::test]
async fn submissions_are_validated_before_a_job_exists() {
    let dir = tempfile::tempdir().unwrap();
    let studio = studio_with(dir.path(), Arc::new(MockTranscriber::default()), 1, |cfg| {
        cfg.max_queued_jobs = 1;
    })
    .await;

    let err = studio.submit(request(dir.path(), "fr")).await.unwrap_err();
    assert!(matches!(err, SubmitError::Validation(ValidationError::UnsupportedLanguage(_))));

    let mut bad_opts = request(dir.path(), "en");
    bad_opts.options = RecognitionOptions::from_json(r#"{"vad":{"threshold":0.99}}"#).unwrap();
    let err = studio.submit(bad_opts).await.unwrap_err();
    assert!(matches!(err, SubmitError::Validation(ValidationError::OutOfRange { .. })));

    let err = studio
        .submit(SubmitRequest::new(dir.path().join("nope.wav")))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::Validation(ValidationError::SourceMissing(_))));
    assert!(studio.list().is_empty());

    studio.submit(request(dir.path(), "en")).await.unwrap();
    let err = studio.submit(request(dir.path(), "en")).await.unwrap_err();
    assert!(matches!(err, SubmitError::QueueFull { limit: 1 }));
    assert_eq!(studio.list().len(), 1);
}

#[tokio::test]
async fn unconfigured_backend_and_oversized_uploads_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockTranscriber {
        configured: false,
        ..Default::default()
    });
    let studio = studio_with(dir.path(), backend, 1, |_| {}).await;
    let err = studio.submit(request(dir.path(), "en")).await.unwrap_err();
    assert!(matches!(err, SubmitError::Validation(ValidationError::BackendNotConfigured)));

    let studio = studio_with(dir.path(), Arc::new(MockTranscriber::default()), 1, |cfg| {
        cfg.max_upload_mb = 0;
    })
    .await;
    let err = studio.submit(request(dir.path(), "en")).await.unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Validation(ValidationError::TooLarge { size_mb: 1, max_mb: 0 })
    ));
}

#[tokio::test]
async fn config_view_lists_schema() {
    let dir = tempfile::tempdir().unwrap();
    let studio = studio_with(dir.path(), Arc::new(MockTranscriber::default()), 1, |_| {}).await;
    let view = studio.config();
    assert_eq!(view.languages, vec!["auto", "zh", "en", "ja"]);
    assert!(view.models.contains(&"whisper-large"));
    assert_eq!(view.default_model, "nova-2-general");
    assert_eq!(view.vad_presets.len(), 3);
    assert!(view.backend_configured);
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["ranges"]["max_chars"], serde_json::json!([10, 100]));
}
