use super::*;
use crate::config::{ConfigBuilder, ErrorPolicy};
use crate::etl::progress::{ProgressDisplay, ProgressState};
use crate::etl::Passthrough;
use crate::record::Record;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

// Helper that lays out an input file of `n` valid lines in a fresh directory
fn workspace(n: usize) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("users.txt");
    let output = dir.path().join("processed_users.txt");

    let mut file = std::fs::File::create(&input).unwrap();
    for i in 0..n {
        writeln!(file, "{i},user{i},user{i}@x.com,{},User {i}", i % 2 == 0).unwrap();
    }
    (dir, input, output)
}

fn test_config(input: &Path, output: &Path, batch_size: usize, writers: usize) -> Config {
    ConfigBuilder::default()
        .input_path(input)
        .output_path(output)
        .batch_size(batch_size)
        .max_concurrent_writers(writers)
        .build()
        .unwrap()
}

fn output_records(path: &Path) -> Vec<Record> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

// Sink that appends in memory and tracks how many appends overlap
struct SlowSink {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl SlowSink {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BatchSink for SlowSink {
    async fn append(&self, lines: &[String]) -> Result<(), EtlError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.batch_sizes.lock().unwrap().push(lines.len());
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

// Sink that fails on the nth append (zero based)
struct FailOnNth {
    n: usize,
    calls: AtomicUsize,
    inner: FileSink,
}

#[async_trait]
impl BatchSink for FailOnNth {
    async fn append(&self, lines: &[String]) -> Result<(), EtlError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.n {
            return Err(EtlError::io(
                self.inner.path(),
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ));
        }
        self.inner.append(lines).await
    }
}

// Display that records the last update
#[derive(Default)]
struct LastUpdate {
    last: std::sync::Arc<Mutex<Option<(u64, Option<u64>)>>>,
}

impl ProgressDisplay for LastUpdate {
    fn update(&self, current: u64, total: Option<u64>, _unit: &str) {
        *self.last.lock().unwrap() = Some((current, total));
    }

    fn close(&self) {}
}

#[tokio::test]
async fn test_single_line_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("users.txt");
    let output = dir.path().join("out.txt");
    std::fs::write(&input, "1,alice,alice@x.com,true,Alice A\n").unwrap();

    let mut pipeline =
        Pipeline::new(test_config(&input, &output, 1, 5)).with_backend(Arc::new(Passthrough));
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.batches_read, 1);
    assert_eq!(summary.records_written, 1);
    assert_eq!(pipeline.state(), PipelineState::Done);
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "{\"id\":1,\"username\":\"alice\",\"email\":\"alice@x.com\",\"is_active\":true,\"full_name\":\"Alice A\"}\n"
    );
}

#[tokio::test]
async fn test_empty_input_succeeds() {
    let (_dir, input, output) = workspace(0);

    let mut pipeline =
        Pipeline::new(test_config(&input, &output, 10, 5)).with_backend(Arc::new(Passthrough));
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.batches_read, 0);
    assert_eq!(summary.records_written, 0);
    assert_eq!(pipeline.state(), PipelineState::Done);
    let written = std::fs::read_to_string(&output).unwrap_or_default();
    assert_eq!(written.lines().count(), 0);
}

#[tokio::test]
async fn test_order_preserved_across_batches() {
    let (_dir, input, output) = workspace(1_000);

    let mut pipeline =
        Pipeline::new(test_config(&input, &output, 64, 4)).with_backend(Arc::new(Passthrough));
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.lines_read, 1_000);
    assert_eq!(summary.batches_read, 16);
    assert_eq!(summary.batches_written, 16);

    let records = output_records(&output);
    assert_eq!(records.len(), 1_000);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.id, i as i64);
        assert_eq!(record.is_active, i % 2 == 0);
    }
}

#[tokio::test]
async fn test_250_lines_with_two_writers() {
    let (_dir, input, output) = workspace(250);
    let sink = Arc::new(SlowSink::new(Duration::from_millis(50)));

    let mut pipeline = Pipeline::new(test_config(&input, &output, 100, 2))
        .with_backend(Arc::new(Passthrough))
        .with_sink(sink.clone());
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.batches_read, 3);
    assert_eq!(*sink.batch_sizes.lock().unwrap(), vec![100, 100, 50]);
    assert!(summary.peak_concurrent_writes <= 2);
    assert!(sink.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_write_slots_bound_in_flight_writes() {
    let (_dir, input, output) = workspace(200);
    let sink = Arc::new(SlowSink::new(Duration::from_millis(20)));

    let mut pipeline = Pipeline::new(test_config(&input, &output, 10, 3))
        .with_backend(Arc::new(Passthrough))
        .with_sink(sink.clone());
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.batches_written, 20);
    assert!(summary.peak_concurrent_writes >= 2);
    assert!(summary.peak_concurrent_writes <= 3);
    assert_eq!(sink.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_line_aborts_without_writing_batch() {
    let (_dir, input, output) = workspace(0);
    let mut file = std::fs::File::create(&input).unwrap();
    writeln!(file, "1,a,a@x.com,true,A").unwrap();
    writeln!(file, "2,b,b@x.com,true,B").unwrap();
    writeln!(file, "3,c,c@x.com,true,C").unwrap();
    writeln!(file, "4,d,d@x.com").unwrap();
    writeln!(file, "5,e,e@x.com,true,E").unwrap();
    drop(file);

    let mut pipeline =
        Pipeline::new(test_config(&input, &output, 2, 2)).with_backend(Arc::new(Passthrough));
    let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, EtlError::Validation { line: 4, .. }));
    assert_eq!(pipeline.state(), PipelineState::Failed);

    // The first batch was written before the failing one was read
    let ids: Vec<i64> = output_records(&output).iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_skip_policy_keeps_valid_lines() {
    let (_dir, input, output) = workspace(0);
    std::fs::write(
        &input,
        "1,a,a@x.com,true,A\nnot-a-number,b,b@x.com,true,B\n3,c,c@x.com,false,\n",
    )
    .unwrap();

    let config = ConfigBuilder::default()
        .input_path(&input)
        .output_path(&output)
        .batch_size(2usize)
        .error_policy(ErrorPolicy::Skip)
        .build()
        .unwrap();
    let mut pipeline = Pipeline::new(config).with_backend(Arc::new(Passthrough));
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.lines_read, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.records_written, 2);

    let records = output_records(&output);
    assert_eq!(records[1].id, 3);
    assert_eq!(records[1].full_name.as_deref(), Some(""));
}

#[tokio::test]
async fn test_missing_input_fails() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.txt");
    let output = dir.path().join("out.txt");

    let mut pipeline = Pipeline::new(test_config(&input, &output, 10, 1));
    let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, EtlError::Io { .. }));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_write_failure_keeps_earlier_batches() {
    let (_dir, input, output) = workspace(30);
    let sink = Arc::new(FailOnNth {
        n: 1,
        calls: AtomicUsize::new(0),
        inner: FileSink::new(&output),
    });

    let mut pipeline = Pipeline::new(test_config(&input, &output, 10, 1))
        .with_backend(Arc::new(Passthrough))
        .with_sink(sink);
    let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, EtlError::Io { .. }));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    let ids: Vec<i64> = output_records(&output).iter().map(|r| r.id).collect();
    assert_eq!(ids, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_rerun_appends() {
    let (_dir, input, output) = workspace(5);

    for _ in 0..2 {
        let mut pipeline =
            Pipeline::new(test_config(&input, &output, 2, 2)).with_backend(Arc::new(Passthrough));
        pipeline.run(&CancellationToken::new()).await.unwrap();
    }

    assert_eq!(output_records(&output).len(), 10);
}

#[tokio::test]
async fn test_cancel_stops_run() {
    let (_dir, input, output) = workspace(20);
    let config = ConfigBuilder::default()
        .input_path(&input)
        .output_path(&output)
        .batch_size(5usize)
        .transform_latency(Duration::from_secs(30))
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let mut pipeline = Pipeline::new(config);
    let err = pipeline.run(&cancel).await.unwrap_err();

    assert!(matches!(err, EtlError::Cancelled));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_progress_counts_lines_with_total() {
    let (_dir, input, output) = workspace(25);
    let display = LastUpdate::default();
    let last = std::sync::Arc::clone(&display.last);

    let config = ConfigBuilder::default()
        .input_path(&input)
        .output_path(&output)
        .batch_size(10usize)
        .count_total(true)
        .build()
        .unwrap();
    let progress = ProgressReporter::new(Arc::new(ProgressState::new()), Box::new(display));
    let mut pipeline = Pipeline::new(config)
        .with_backend(Arc::new(Passthrough))
        .with_progress(progress);
    pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(pipeline.progress().lines(), 25);
    assert_eq!(pipeline.progress().total(), Some(25));
    assert_eq!(*last.lock().unwrap(), Some((25, Some(25))));
}

#[tokio::test]
async fn test_batch_lines_transform_concurrently() {
    let (_dir, input, output) = workspace(50);
    let config = ConfigBuilder::default()
        .input_path(&input)
        .output_path(&output)
        .batch_size(50usize)
        .transform_latency(Duration::from_millis(100))
        .build()
        .unwrap();

    let mut pipeline = Pipeline::new(config);
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.records_written, 50);
    // Fifty 100ms calls in one batch take about one call's time
    assert!(summary.elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_state_sequence_for_two_batches() {
    use PipelineState::*;

    let (_dir, input, output) = workspace(4);
    let mut pipeline =
        Pipeline::new(test_config(&input, &output, 2, 1)).with_backend(Arc::new(Passthrough));
    let rx = pipeline.subscribe();

    assert_eq!(pipeline.state(), Idle);
    pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        pipeline.history(),
        &[
            Idle,
            Reading,
            Transforming,
            WaitingForWriteSlot,
            Writing,
            Reading,
            Transforming,
            WaitingForWriteSlot,
            Writing,
            Reading,
            Done,
        ]
    );
    assert_eq!(*rx.borrow(), Done);
    assert!(pipeline.state().is_terminal());
}

#[tokio::test]
async fn test_state_sequence_for_validation_failure() {
    use PipelineState::*;

    let (_dir, input, output) = workspace(0);
    std::fs::write(&input, "1,a,a@x.com,true,A\n2,b,b@x.com,true,B\n3,c\n").unwrap();

    let mut pipeline =
        Pipeline::new(test_config(&input, &output, 2, 1)).with_backend(Arc::new(Passthrough));
    pipeline.run(&CancellationToken::new()).await.unwrap_err();

    assert_eq!(
        pipeline.history(),
        &[
            Idle,
            Reading,
            Transforming,
            WaitingForWriteSlot,
            Writing,
            Reading,
            Transforming,
            Failed,
        ]
    );
    assert_eq!(pipeline.state(), Failed);
}

#[tokio::test]
async fn test_second_run_starts_fresh_progress() {
    let (_dir, input, output) = workspace(5);
    let mut pipeline =
        Pipeline::new(test_config(&input, &output, 2, 2)).with_backend(Arc::new(Passthrough));

    // Idle time before the run must not count towards elapsed
    tokio::time::sleep(Duration::from_millis(300)).await;

    let first = pipeline.run(&CancellationToken::new()).await.unwrap();
    assert!(first.elapsed < Duration::from_millis(300));
    assert_eq!(pipeline.progress().lines(), 5);

    let second = pipeline.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(second.lines_read, 5);
    assert_eq!(pipeline.progress().lines(), 5);
    assert_eq!(pipeline.history().first(), Some(&PipelineState::Idle));
    assert_eq!(pipeline.history().last(), Some(&PipelineState::Done));
    assert_eq!(output_records(&output).len(), 10);
}

#[tokio::test]
async fn test_count_total_not_carried_into_next_run() {
    let (_dir, input, output) = workspace(4);
    let config = ConfigBuilder::default()
        .input_path(&input)
        .output_path(&output)
        .batch_size(2usize)
        .count_total(true)
        .build()
        .unwrap();
    let mut pipeline = Pipeline::new(config).with_backend(Arc::new(Passthrough));
    pipeline.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(pipeline.progress().total(), Some(4));

    std::fs::write(&input, "9,z,z@x.com,true,Z\n").unwrap();
    pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(pipeline.progress().total(), Some(1));
    assert_eq!(pipeline.progress().lines(), 1);
}

// Validator for a four-field layout without full_name
struct NoFullNameValidator;

impl RecordValidator for NoFullNameValidator {
    fn validate(&self, fields: &[&str]) -> Result<Record, crate::types::ValidationError> {
        let [id, username, email, is_active] = fields else {
            return Err(crate::types::ValidationError::FieldCount {
                expected: 4,
                found: fields.len(),
            });
        };
        let mut record = UserValidator.validate(&[*id, *username, *email, *is_active, ""])?;
        record.full_name = None;
        Ok(record)
    }
}

#[tokio::test]
async fn test_custom_validator() {
    let (_dir, input, output) = workspace(0);
    std::fs::write(&input, "1,a,a@x.com,TRUE\n2,b,b@x.com,no\n").unwrap();

    let mut pipeline = Pipeline::new(test_config(&input, &output, 10, 1))
        .with_backend(Arc::new(Passthrough))
        .with_validator(Arc::new(NoFullNameValidator));
    let summary = pipeline.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.records_written, 2);
    let content = std::fs::read_to_string(&output).unwrap();
    assert_eq!(
        content.lines().next().unwrap(),
        "{\"id\":1,\"username\":\"a\",\"email\":\"a@x.com\",\"is_active\":true,\"full_name\":null}"
    );
    let records = output_records(&output);
    assert!(!records[1].is_active);
}

#[tokio::test]
async fn test_earlier_write_failure_wins_over_later_validation_error() {
    let (_dir, input, output) = workspace(0);
    std::fs::write(
        &input,
        "1,a,a@x.com,true,A\n2,b,b@x.com,true,B\n3,c,c@x.com,true,C\n4,d\n",
    )
    .unwrap();
    let sink = Arc::new(FailOnNth {
        n: 0,
        calls: AtomicUsize::new(0),
        inner: FileSink::new(&output),
    });

    let mut pipeline = Pipeline::new(test_config(&input, &output, 2, 2))
        .with_backend(Arc::new(Passthrough))
        .with_sink(sink);
    let err = pipeline.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, EtlError::Io { .. }), "unexpected error: {err:?}");
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(!output.exists());
}
