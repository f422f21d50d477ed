//! End-to-end scenarios against a real storage root.

use apmstore_channel::ChannelManager;
use apmstore_codec::SerializationOptions;
use apmstore_core::{
    DataProcessor, MemoryRecordSource, RecordingProperties, RecordingState, StorageErrorCode,
    StorageState, WriteFailure, WriteOutcome, CHANNEL_EXTENSION, INDEX_EXTENSION,
};
use apmstore_core::processor::{DataSaverProcessor, TimeFrameProcessor};
use apmstore_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn saver() -> Vec<Box<dyn DataProcessor>> {
    vec![Box::new(DataSaverProcessor::all())]
}

#[test]
fn concurrent_writes_are_all_indexed_on_close() {
    let env = TestStorageManager::new();
    let id = env.open_new_storage("load");

    let report = stress_concurrent_writes(&env, &id, &StressConfig::default());
    assert_eq!(report.written, 1_000, "{}", report.to_json());
    assert_eq!(report.failed, 0);

    env.close_storage(&id).unwrap();
    assert_eq!(env.queued_task_count(), 0);

    let counts = env.indexed_record_counts(&id);
    assert_eq!(counts.len(), 1_000);
    assert!(counts.values().all(|&n| n == 1));
    assert!(counts.keys().copied().eq(1..=1_000));
    assert!(env.storage(&id).unwrap().disk_size > 0);
}

#[test]
fn rotation_persists_every_generation_once() {
    // a generation holding more than ~40 descriptors is rotated
    let env = TestStorageManager::with_config(|config| {
        config
            .max_indexing_tree_size(256 + 64 * 40)
            .tree_check_interval(Duration::from_millis(5))
    });
    let id = env.open_new_storage("rotating");

    let mut written = 0;
    for batch in 0..20u64 {
        let records = timer_records(batch * 50 + 1..=batch * 50 + 50, 1);
        let handles = env.write_to_storage(&id, &records, Vec::new(), true).unwrap();
        written += handles.iter().filter(|h| h.wait().is_written()).count();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(written, 1_000);

    env.close_storage(&id).unwrap();

    let indexes = env.persisted_indexes(&id);
    assert!(indexes.len() >= 2, "expected rotated generations, got {}", indexes.len());
    let counts = env.indexed_record_counts(&id);
    assert_eq!(counts.len(), 1_000);
    assert!(counts.values().all(|&n| n == 1));

    let storage_dir = env.root().join(&id);
    for index in &indexes {
        let channel = storage_dir.join(format!("{}.{CHANNEL_EXTENSION}", index.channel_id));
        let channel_len = std::fs::metadata(&channel).unwrap().len();
        for (_, descriptor) in index.descriptors() {
            assert!(descriptor.length > 0);
            assert!(descriptor.offset + descriptor.length <= channel_len);
        }
    }
    let index_files = std::fs::read_dir(&storage_dir)
        .unwrap()
        .filter(|entry| {
            let path = entry.as_ref().unwrap().path();
            path.extension().and_then(|e| e.to_str()) == Some(INDEX_EXTENSION)
        })
        .count();
    assert_eq!(index_files, indexes.len());
}

#[test]
fn serialization_failure_leaves_storage_writable() {
    let serializer = Arc::new(FailingSerializer::failing([13]));
    let env = TestStorageManager::with_collaborators(
        serializer.clone(),
        Arc::new(ChannelManager::file()),
    );
    let id = env.open_new_storage("faulty");

    let handles = env
        .write_to_storage(&id, &timer_records(13..=13, 1), Vec::new(), true)
        .unwrap();
    assert!(matches!(
        handles[0].wait(),
        WriteOutcome::Failed(WriteFailure::Serialization(_))
    ));
    assert_eq!(env.storage(&id).unwrap().state(), StorageState::Opened);

    let handles = env
        .write_to_storage(&id, &timer_records(14..=14, 1), Vec::new(), true)
        .unwrap();
    assert!(handles[0].wait().is_written());

    env.close_storage(&id).unwrap();
    let counts = env.indexed_record_counts(&id);
    assert!(!counts.contains_key(&13));
    assert_eq!(counts.get(&14), Some(&1));
    assert_eq!(serializer.failures(), 1);
}

#[test]
fn channel_failures_leave_no_descriptor() {
    let channels =
        Arc::new(FaultyChannelWriter::new(Arc::new(ChannelManager::file())).fail_every(4));
    let env = TestStorageManager::with_collaborators(
        Arc::new(apmstore_codec::CborSerializer::new()),
        channels.clone(),
    );
    let id = env.open_new_storage("flaky");

    let records = timer_records(1..=40, 1);
    let handles = env.write_to_storage(&id, &records, Vec::new(), true).unwrap();
    let failed: Vec<u64> = records
        .iter()
        .zip(&handles)
        .filter(|(_, handle)| {
            matches!(handle.wait(), WriteOutcome::Failed(WriteFailure::Channel(_)))
        })
        .map(|(record, _)| record.id)
        .collect();
    assert_eq!(failed.len(), 10);
    assert_eq!(channels.failures(), 10);

    env.close_storage(&id).unwrap();
    let counts = env.indexed_record_counts(&id);
    assert_eq!(counts.len(), 30);
    assert!(failed.iter().all(|id| !counts.contains_key(id)));
}

#[test]
fn close_is_refused_while_recording() {
    let env = TestStorageManager::new();
    let id = env.open_new_storage("recorded");

    env.start_or_schedule_recording(&id, RecordingProperties::new(saver()))
        .unwrap();
    let err = env.close_storage(&id).unwrap_err();
    assert_eq!(err.code(), Some(StorageErrorCode::InUseByRecording));

    env.stop_recording().unwrap();
    env.close_storage(&id).unwrap();
    assert!(env.storage(&id).unwrap().is_closed());
}

#[test]
fn scheduled_recording_starts_after_delay() {
    let env = TestStorageManager::new();
    let id = env.open_new_storage("scheduled");

    let state = env
        .start_or_schedule_recording(
            &id,
            RecordingProperties::new(saver()).start_delay(Duration::from_millis(50)),
        )
        .unwrap();
    assert_eq!(state, RecordingState::Scheduled);
    assert!(env.record(timer_records(1..=1, 1).remove(0)).is_empty());

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while env.recording_state() != RecordingState::On && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(env.recording_state(), RecordingState::On);

    let handles = env.record(timer_records(2..=2, 1).remove(0));
    assert!(handles[0].wait().is_written());
    env.stop_recording().unwrap();
}

#[test]
fn copy_buffer_honors_time_frame() {
    let env = TestStorageManager::new();
    let id = env.create_storage("copy", None).unwrap().id().to_string();

    let source = MemoryRecordSource::new();
    source.extend(timer_records(1..=100, 3).iter().map(|r| (**r).clone()));
    source.extend(timer_records(101..=110, 4).iter().map(|r| (**r).clone()));

    let base = 1_700_000_000_000;
    let processors: Vec<Box<dyn DataProcessor>> =
        vec![Box::new(TimeFrameProcessor::new(base + 11, base + 20, saver()))];
    let copied = env
        .copy_buffer_to_storage(&id, &source, &[3], processors, true)
        .unwrap();
    assert_eq!(copied, 10);

    assert!(env.storage(&id).unwrap().is_closed());
    let counts = env.indexed_record_counts(&id);
    assert!(counts.keys().copied().eq(11..=20));
}

#[test]
fn writer_refuses_after_close() {
    let env = TestStorageManager::new();
    let id = env.open_new_storage("closed");
    let writer = env.writer(&id).unwrap();
    env.close_storage(&id).unwrap();

    assert!(writer
        .write(timer_records(1..=1, 1).remove(0), SerializationOptions::new())
        .is_none());
    let err = env
        .write_to_storage(&id, &timer_records(1..=1, 1), Vec::new(), true)
        .unwrap_err();
    assert_eq!(err.code(), Some(StorageErrorCode::AlreadyClosed));
}

#[test]
fn delete_during_slow_channel_writes_leaves_no_directory() {
    let files = Arc::new(ChannelManager::file());
    let channels =
        Arc::new(FaultyChannelWriter::new(files.clone()).delay(Duration::from_millis(300)));
    let env = TestStorageManager::with_collaborators(
        Arc::new(apmstore_codec::CborSerializer::new()),
        channels,
    );
    let id = env.open_new_storage("doomed");
    let storage_dir = env.root().join(&id);

    let handles = env
        .write_to_storage(&id, &timer_records(1..=8, 1), Vec::new(), false)
        .unwrap();
    std::thread::sleep(Duration::from_millis(100));
    env.delete_storage(&id).unwrap();

    for handle in &handles {
        assert!(handle.wait_timeout(Duration::from_secs(5)).is_some());
    }
    std::thread::sleep(Duration::from_millis(400));
    assert!(!storage_dir.exists());
    assert!(env.writer(&id).is_none());
    assert_eq!(files.open_channel_count(), 0);
    assert_eq!(
        env.storage(&id).unwrap_err().code(),
        Some(StorageErrorCode::DoesNotExist)
    );
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Open,
    Close,
    Delete,
    StartRecording,
    StopRecording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Model {
    Created,
    Opened,
    Recording,
    Closed,
    Deleted,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Open),
        Just(Op::Close),
        Just(Op::Delete),
        Just(Op::StartRecording),
        Just(Op::StopRecording),
    ]
}

fn expected(model: Model, op: Op) -> (Result<(), StorageErrorCode>, Model) {
    use Model::*;
    match (op, model) {
        (_, Deleted) if !matches!(op, Op::StopRecording) => {
            (Err(StorageErrorCode::DoesNotExist), Deleted)
        }
        (Op::Open, Created | Opened) => (Ok(()), Opened),
        (Op::Open, Recording) => (Ok(()), Recording),
        (Op::Open, Closed) => (Err(StorageErrorCode::AlreadyClosed), Closed),
        (Op::Close, Created | Opened) => (Ok(()), Closed),
        (Op::Close, Recording) => (Err(StorageErrorCode::InUseByRecording), Recording),
        (Op::Close, Closed) => (Err(StorageErrorCode::AlreadyClosed), Closed),
        (Op::Delete, Recording) => (Err(StorageErrorCode::InUseByRecording), Recording),
        (Op::Delete, _) => (Ok(()), Deleted),
        (Op::StartRecording, Created | Opened) => (Ok(()), Recording),
        (Op::StartRecording, Recording) => {
            (Err(StorageErrorCode::RecordingAlreadyActive), Recording)
        }
        (Op::StartRecording, Closed) => (Err(StorageErrorCode::AlreadyClosed), Closed),
        (Op::StopRecording, Recording) => (Ok(()), Opened),
        (Op::StopRecording, other) => (Ok(()), other),
        (_, Deleted) => unreachable!(),
    }
}

fn to_model(state: StorageState) -> Model {
    match state {
        StorageState::CreatedNotOpened => Model::Created,
        StorageState::Opened => Model::Opened,
        StorageState::Recording => Model::Recording,
        StorageState::Closed => Model::Closed,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn lifecycle_follows_the_state_machine(ops in prop::collection::vec(op_strategy(), 1..12)) {
        let env = TestStorageManager::new();
        let id = env.create_storage("model", None).unwrap().id().to_string();
        let mut model = Model::Created;

        for op in ops {
            let result = match op {
                Op::Open => env.open_storage(&id),
                Op::Close => env.close_storage(&id),
                Op::Delete => env.delete_storage(&id),
                Op::StartRecording => env
                    .start_or_schedule_recording(&id, RecordingProperties::new(saver()))
                    .map(|_| ()),
                Op::StopRecording => env.stop_recording(),
            };
            let (outcome, next) = expected(model, op);
            prop_assert_eq!(
                result.map_err(|e| e.code().unwrap()),
                outcome,
                "{:?} in {:?}",
                op,
                model
            );
            model = next;

            match env.storage(&id) {
                Ok(data) => prop_assert_eq!(to_model(data.state()), model),
                Err(_) => prop_assert_eq!(model, Model::Deleted),
            }
        }
    }
}
