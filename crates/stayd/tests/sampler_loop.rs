//! Sampling loop tests with scripted collaborators

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stayd::detect::{Detector, Frame, FrameSource};
use stayd::notify::Notifier;
use stayd::{Collaborators, DailySchedule, JsonFileStore, SampleStore, Sampler, StayError};
use tempfile::TempDir;

/// Pops one scripted entry per call; `None` means no frame this tick.
struct ScriptedFrames {
    script: Arc<Mutex<VecDeque<Option<u32>>>>,
}

#[async_trait]
impl FrameSource for ScriptedFrames {
    async fn next_frame(&mut self) -> Result<Option<Frame>, StayError> {
        let next = self.script.lock().unwrap().pop_front().flatten();
        Ok(next.map(|count| Frame {
            data: count.to_le_bytes().to_vec(),
            captured_at: Local::now(),
        }))
    }
}

/// Decodes the count the frame source packed into the frame.
struct ScriptedDetector {
    fail: bool,
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&mut self, frame: &Frame) -> Result<u32, StayError> {
        if self.fail {
            return Err(StayError::DetectorUnavailable("model not loaded".into()));
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&frame.data);
        Ok(u32::from_le_bytes(bytes))
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    stall: bool,
    fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<(), StayError> {
        if self.stall {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.fail {
            return Err(StayError::Notification("503 from endpoint".into()));
        }
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    path: std::path::PathBuf,
    sampler: Sampler<JsonFileStore>,
    script: Arc<Mutex<VecDeque<Option<u32>>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

fn local(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2024, 6, day, hour, minute, 0)
        .earliest()
        .unwrap()
}

fn harness(start: DateTime<Local>, notifier: RecordingNotifier, detector_fails: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.json");
    let store = JsonFileStore::open(&path).unwrap();
    let script = Arc::new(Mutex::new(VecDeque::new()));
    let sent = Arc::clone(&notifier.sent);
    let collaborators = Collaborators {
        frames: Box::new(ScriptedFrames {
            script: Arc::clone(&script),
        }),
        detector: Box::new(ScriptedDetector {
            fail: detector_fails,
        }),
        notifier: Box::new(notifier),
    };
    let schedule = DailySchedule::new(&start, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
    let sampler = Sampler::new(store, schedule, collaborators, Duration::from_secs(60))
        .with_notify_timeout(Duration::from_millis(100));
    Harness {
        _dir: dir,
        path,
        sampler,
        script,
        sent,
    }
}

fn push(h: &Harness, counts: &[Option<u32>]) {
    h.script.lock().unwrap().extend(counts.iter().copied());
}

#[tokio::test]
async fn test_ticks_record_counts() {
    let mut h = harness(local(10, 12, 0), RecordingNotifier::default(), false);
    push(&h, &[Some(2), Some(0)]);

    let first = h.sampler.tick(local(10, 12, 1)).await.unwrap();
    let second = h.sampler.tick(local(10, 12, 2)).await.unwrap();
    assert_eq!(first.recorded, Some(2));
    assert_eq!(second.recorded, Some(0));
    assert!(first.report.is_none());

    let counts: Vec<u32> = h
        .sampler
        .store()
        .read_all()
        .unwrap()
        .iter()
        .map(|o| o.count)
        .collect();
    assert_eq!(counts, vec![0, 2]);
}

#[tokio::test]
async fn test_missing_frame_skips_append() {
    let mut h = harness(local(10, 12, 0), RecordingNotifier::default(), false);
    push(&h, &[None]);

    let outcome = h.sampler.tick(local(10, 12, 1)).await.unwrap();
    assert_eq!(outcome.recorded, None);
    assert!(h.sampler.store().read_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_detector_failure_is_not_fatal() {
    let mut h = harness(local(10, 12, 0), RecordingNotifier::default(), true);
    push(&h, &[Some(1)]);

    let outcome = h.sampler.tick(local(10, 12, 1)).await.unwrap();
    assert_eq!(outcome.recorded, None);
    assert!(h.sampler.store().read_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_deadline_fires_report_for_trailing_day() {
    let mut h = harness(local(10, 12, 0), RecordingNotifier::default(), false);

    // Three positive samples and one empty one during the day.
    for (minute, count) in [(0, 1), (1, 0), (2, 3), (3, 1)] {
        push(&h, &[Some(count)]);
        h.sampler.tick(local(10, 13, minute)).await.unwrap();
    }

    push(&h, &[Some(0)]);
    let outcome = h.sampler.tick(local(11, 7, 30)).await.unwrap();
    assert_eq!(outcome.report.map(|s| s.as_secs()), Some(180));
    assert!(outcome.notified);
    assert_eq!(outcome.recorded, Some(0));
    assert_eq!(
        *h.sent.lock().unwrap(),
        vec!["stay time is 0hour 3min".to_string()]
    );
    assert_eq!(*h.sampler.schedule().next_deadline(), local(12, 7, 30));
}

#[tokio::test]
async fn test_report_fires_once_per_deadline() {
    let mut h = harness(local(10, 12, 0), RecordingNotifier::default(), false);
    push(&h, &[None, None, None]);

    assert!(h.sampler.tick(local(11, 7, 30)).await.unwrap().report.is_some());
    assert!(h.sampler.tick(local(11, 7, 31)).await.unwrap().report.is_none());
    assert!(h.sampler.tick(local(11, 7, 32)).await.unwrap().report.is_none());
    assert_eq!(h.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stalled_notifier_times_out() {
    let notifier = RecordingNotifier {
        stall: true,
        ..Default::default()
    };
    let mut h = harness(local(10, 12, 0), notifier, false);
    push(&h, &[Some(1)]);

    let outcome = h.sampler.tick(local(11, 7, 30)).await.unwrap();
    assert!(outcome.report.is_some());
    assert!(!outcome.notified);
    assert_eq!(outcome.recorded, Some(1));
}

#[tokio::test]
async fn test_failed_notification_is_not_fatal() {
    let notifier = RecordingNotifier {
        fail: true,
        ..Default::default()
    };
    let mut h = harness(local(10, 12, 0), notifier, false);
    push(&h, &[Some(1)]);

    let outcome = h.sampler.tick(local(11, 7, 30)).await.unwrap();
    assert!(!outcome.notified);
    assert_eq!(*h.sampler.schedule().next_deadline(), local(12, 7, 30));
}

#[tokio::test]
async fn test_unreadable_log_skips_notification() {
    let mut h = harness(local(10, 12, 0), RecordingNotifier::default(), false);
    std::fs::remove_file(&h.path).unwrap();
    push(&h, &[Some(1)]);

    let outcome = h.sampler.tick(local(11, 7, 30)).await.unwrap();
    assert!(outcome.report.is_none());
    assert!(!outcome.notified);
    assert!(h.sent.lock().unwrap().is_empty());
    // The sample taken on the same tick starts a fresh log.
    assert_eq!(outcome.recorded, Some(1));
    assert_eq!(h.sampler.store().read_all().unwrap().len(), 1);
}

#[tokio::test]
async fn test_corrupt_log_is_fatal_and_not_reported() {
    let mut h = harness(local(10, 12, 0), RecordingNotifier::default(), false);
    std::fs::write(&h.path, b"[{\"count\":").unwrap();
    push(&h, &[Some(1)]);

    let err = h.sampler.tick(local(11, 7, 30)).await.unwrap_err();
    assert!(matches!(err, StayError::StorageCorrupt { .. }));
    assert!(h.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_log_stops_sampling() {
    let mut h = harness(local(10, 12, 0), RecordingNotifier::default(), false);
    std::fs::write(&h.path, b"not json").unwrap();
    push(&h, &[Some(1)]);

    let err = h.sampler.tick(local(10, 12, 1)).await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_report_prunes_beyond_retention() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.json");
    let store = JsonFileStore::open(&path).unwrap();
    let old = local(1, 12, 0);
    store
        .append(stayd::Observation::new(1, &old))
        .unwrap();
    store
        .append(stayd::Observation::new(1, &(local(10, 12, 0) + ChronoDuration::hours(1))))
        .unwrap();

    let notifier = RecordingNotifier::default();
    let collaborators = Collaborators {
        frames: Box::new(ScriptedFrames {
            script: Arc::new(Mutex::new(VecDeque::new())),
        }),
        detector: Box::new(ScriptedDetector { fail: false }),
        notifier: Box::new(notifier),
    };
    let schedule = DailySchedule::new(&local(10, 12, 0), NaiveTime::from_hms_opt(7, 30, 0).unwrap());
    let mut sampler = Sampler::new(store, schedule, collaborators, Duration::from_secs(60))
        .with_retention_days(3);

    let outcome = sampler.tick(local(11, 7, 30)).await.unwrap();
    assert_eq!(outcome.report.map(|s| s.as_secs()), Some(60));
    let remaining = sampler.store().read_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].created_at > old);
}

#[tokio::test]
async fn test_run_exits_on_shutdown() {
    let h = harness(local(10, 12, 0), RecordingNotifier::default(), false);
    let result = h.sampler.run(async {}).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_run_samples_until_shutdown() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.json");
    let store = JsonFileStore::open(&path).unwrap();
    let script = Arc::new(Mutex::new(VecDeque::from(vec![Some(1); 100])));
    let collaborators = Collaborators {
        frames: Box::new(ScriptedFrames {
            script: Arc::clone(&script),
        }),
        detector: Box::new(ScriptedDetector { fail: false }),
        notifier: Box::new(RecordingNotifier::default()),
    };
    let schedule = DailySchedule::new(&Local::now(), NaiveTime::from_hms_opt(7, 30, 0).unwrap());
    let sampler = Sampler::new(store, schedule, collaborators, Duration::from_millis(20));

    sampler
        .run(tokio::time::sleep(Duration::from_millis(150)))
        .await
        .unwrap();

    let store = JsonFileStore::open(&path).unwrap();
    let recorded = store.read_all().unwrap();
    assert!(!recorded.is_empty());
    assert!(recorded.iter().all(|o| o.count == 1));
}
