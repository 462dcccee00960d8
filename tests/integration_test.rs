use shardzip::container::Archive;
use shardzip::{
    ArchiveError, Error, FrameError, Json, Mode, RepoOptions, Repository, ShardHealth,
    VerifyQuality,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::thread;
use tempfile::{tempdir, NamedTempFile};

fn names(range: std::ops::RangeInclusive<u32>) -> Vec<String> {
    range.map(|i| format!("Name {i}")).collect()
}

fn write_three_shards(path: &Path) {
    let repo = Repository::create(path).unwrap();
    assert_eq!(repo.create_and_write(&names(1..=6)).unwrap(), 0);
    assert_eq!(repo.create_and_write(&names(7..=12)).unwrap(), 1);
    let ints: Vec<i32> = (0..1_000_000).collect();
    assert_eq!(repo.create_and_write(&ints).unwrap(), 2);
    repo.close().unwrap();
}

#[test]
fn test_end_to_end_three_shards() {
    let temp_file = NamedTempFile::new().unwrap();
    write_three_shards(temp_file.path());

    let repo = Repository::open(temp_file.path()).unwrap();
    assert_eq!(repo.mode(), Mode::Read);
    assert_eq!(repo.shard_count().unwrap(), 3);

    let first: Vec<String> = repo.read_shard(0).unwrap();
    assert_eq!(first, names(1..=6));
    let second: Vec<String> = repo.read_shard(1).unwrap();
    assert_eq!(second, names(7..=12));
    let ints: Vec<i32> = repo.read_shard(2).unwrap();
    assert_eq!(ints.len(), 1_000_000);
    assert_eq!(ints[999_999], 999_999);

    let shards = repo.shards().unwrap();
    let listed: Vec<&str> = shards.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(listed, ["file0", "file1", "file2"]);
    // Frame prefix + bincode length + 4 bytes per i32.
    assert_eq!(shards[2].size, 4 + 8 + 4 * 1_000_000);
    repo.close().unwrap();
}

#[test]
fn test_read_past_last_shard() {
    let temp_file = NamedTempFile::new().unwrap();
    write_three_shards(temp_file.path());

    let repo = Repository::open(temp_file.path()).unwrap();
    let count = repo.shard_count().unwrap();
    let err = repo.read_shard::<Vec<String>>(count).unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(ArchiveError::IndexOutOfRange { index: 3, count: 3 })
    ));
}

#[test]
fn test_write_calls_on_read_repository_leave_file_untouched() {
    let temp_file = NamedTempFile::new().unwrap();
    write_three_shards(temp_file.path());
    let before = fs::read(temp_file.path()).unwrap();

    let repo = Repository::open(temp_file.path()).unwrap();
    let err = repo.create_and_write(&42u32).unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(ArchiveError::UnsupportedMode { mode: Mode::Read, .. })
    ));
    assert!(matches!(
        repo.create_shard(),
        Err(Error::Archive(ArchiveError::UnsupportedMode { .. }))
    ));
    repo.close().unwrap();

    assert_eq!(fs::read(temp_file.path()).unwrap(), before);
}

#[test]
fn test_read_calls_on_write_repository() {
    let dir = tempdir().unwrap();
    let repo = Repository::create(dir.path().join("w.zip")).unwrap();
    repo.create_and_write(&1u8).unwrap();

    for err in [
        repo.shard_count().unwrap_err(),
        repo.read_shard::<u8>(0).unwrap_err(),
        repo.shards().unwrap_err(),
        repo.verify().unwrap_err(),
    ] {
        assert!(matches!(
            err,
            Error::Archive(ArchiveError::UnsupportedMode { mode: Mode::Write, .. })
        ));
    }
    repo.close().unwrap();
}

#[test]
fn test_concurrent_writers_get_gapless_indices() {
    const THREADS: u32 = 8;
    const PER_THREAD: u32 = 25;

    let temp_file = NamedTempFile::new().unwrap();
    let repo = Repository::create(temp_file.path()).unwrap();

    let mut written: Vec<(usize, (u32, u32))> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let repo = &repo;
                s.spawn(move || {
                    (0..PER_THREAD)
                        .map(|j| (repo.create_and_write(&(t, j)).unwrap(), (t, j)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });
    repo.close().unwrap();

    written.sort_by_key(|(index, _)| *index);
    let indices: Vec<usize> = written.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (0..(THREADS * PER_THREAD) as usize).collect::<Vec<_>>());

    let repo = Repository::open(temp_file.path()).unwrap();
    assert_eq!(repo.shard_count().unwrap(), (THREADS * PER_THREAD) as usize);
    for (index, value) in written {
        assert_eq!(repo.read_shard::<(u32, u32)>(index).unwrap(), value);
    }
}

#[test]
fn test_close_is_final() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("closed.zip");

    let repo = Repository::create(&path).unwrap();
    repo.create_and_write(&"only".to_string()).unwrap();
    repo.close().unwrap();
    assert!(matches!(repo.close(), Err(Error::Archive(ArchiveError::Closed))));
    assert!(matches!(
        repo.create_and_write(&"late".to_string()),
        Err(Error::Archive(ArchiveError::Closed))
    ));

    let repo = Repository::open(&path).unwrap();
    repo.close().unwrap();
    assert!(matches!(repo.read_shard::<String>(0), Err(Error::Archive(ArchiveError::Closed))));
    assert!(matches!(repo.shard_count(), Err(Error::Archive(ArchiveError::Closed))));
    assert!(matches!(repo.close(), Err(Error::Archive(ArchiveError::Closed))));
}

#[test]
fn test_open_missing_repository() {
    let dir = tempdir().unwrap();
    let err = Repository::open(dir.path().join("missing.zip")).unwrap_err();
    assert!(matches!(err, Error::Archive(ArchiveError::NotFound { .. })));
}

#[test]
fn test_create_without_overwrite() {
    let temp_file = NamedTempFile::new().unwrap();
    let opts = RepoOptions { overwrite: false, ..RepoOptions::default() };

    let err = Repository::create_with(temp_file.path(), opts, shardzip::Bincode).unwrap_err();
    match err {
        Error::Archive(ArchiveError::Create { source, .. }) => {
            assert_eq!(source.kind(), std::io::ErrorKind::AlreadyExists);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_drop_finalizes_archive() {
    let temp_file = NamedTempFile::new().unwrap();
    {
        let repo = Repository::create(temp_file.path()).unwrap();
        repo.create_and_write(&7u64).unwrap();
    }
    let repo = Repository::open(temp_file.path()).unwrap();
    assert_eq!(repo.read_shard::<u64>(0).unwrap(), 7);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    id:      u64,
    message: String,
}

#[test]
fn test_json_serializer_roundtrip() {
    let temp_file = NamedTempFile::new().unwrap();
    let event = Event { id: 1, message: "hello there".into() };

    let repo = Repository::create_with(temp_file.path(), RepoOptions::default(), Json).unwrap();
    repo.create_and_write(&event).unwrap();
    repo.close().unwrap();

    let bytes = fs::read(temp_file.path()).unwrap();
    let needle = br#"{"id":1,"message":"hello there"}"#;
    assert!(bytes.windows(needle.len()).any(|w| w == needle));
    assert!(bytes.ends_with(b"shardzip/1 serializer=json"));

    let repo = Repository::open_with(temp_file.path(), RepoOptions::default(), Json).unwrap();
    assert_eq!(repo.read_shard::<Event>(0).unwrap(), event);

    let err = repo.read_shard::<u64>(0).unwrap_err();
    assert!(matches!(err, Error::Frame(FrameError::Decoding(_))));
}

#[test]
fn test_multi_record_shards() {
    let temp_file = NamedTempFile::new().unwrap();
    let repo = Repository::create(temp_file.path()).unwrap();

    let mut shard = repo.create_shard().unwrap();
    assert_eq!(shard.index(), 0);
    for i in 0..100u32 {
        shard.write(&i).unwrap();
    }
    assert_eq!(shard.frames_written(), 100);
    let info = shard.finish().unwrap();
    assert_eq!(info.size, 100 * (4 + 4));

    assert_eq!(repo.create_and_write(&"tail".to_string()).unwrap(), 1);
    repo.close().unwrap();

    let repo = Repository::open(temp_file.path()).unwrap();
    let mut reader = repo.open_shard(0).unwrap();
    let values: Vec<u32> = reader.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(values, (0..100).collect::<Vec<_>>());
    assert_eq!(reader.frames_read(), 100);
    reader.finish().unwrap();

    // A single-value read only takes the first frame.
    assert_eq!(repo.read_shard::<u32>(0).unwrap(), 0);
    assert_eq!(repo.read_shard::<String>(1).unwrap(), "tail");
}

#[test]
fn test_open_shard_is_sealed_by_next_allocation() {
    let temp_file = NamedTempFile::new().unwrap();
    let repo = Repository::create(temp_file.path()).unwrap();

    let mut shard = repo.create_shard().unwrap();
    shard.write(&1u32).unwrap();
    repo.create_and_write(&2u32).unwrap();

    let err = shard.write(&3u32).unwrap_err();
    assert!(matches!(err, Error::Archive(ArchiveError::EntryClosed { index: 0 })));
    repo.close().unwrap();

    let repo = Repository::open(temp_file.path()).unwrap();
    assert_eq!(repo.read_shard::<u32>(0).unwrap(), 1);
    assert_eq!(repo.read_shard::<u32>(1).unwrap(), 2);
}

#[test]
fn test_empty_shard() {
    let temp_file = NamedTempFile::new().unwrap();
    let repo = Repository::create(temp_file.path()).unwrap();
    let info = repo.create_shard().unwrap().finish().unwrap();
    assert_eq!(info.size, 0);
    repo.close().unwrap();

    let repo = Repository::open(temp_file.path()).unwrap();
    assert_eq!(repo.shard_count().unwrap(), 1);
    assert!(matches!(repo.read_shard::<u32>(0), Err(Error::EmptyShard(0))));
    assert!(repo.open_shard(0).unwrap().read::<u32>().unwrap().is_none());
}

#[test]
fn test_read_all_shards() {
    let temp_file = NamedTempFile::new().unwrap();
    let repo = Repository::create(temp_file.path()).unwrap();
    for i in 0..20u64 {
        repo.create_and_write(&(i * i)).unwrap();
    }
    repo.close().unwrap();

    let repo = Repository::open(temp_file.path()).unwrap();
    let all: Vec<u64> = repo.read_all_shards().unwrap();
    assert_eq!(all, (0..20u64).map(|i| i * i).collect::<Vec<_>>());
}

#[test]
fn test_custom_entry_prefix() {
    let temp_file = NamedTempFile::new().unwrap();
    let opts = RepoOptions { entry_prefix: "batch-".into(), sync_on_close: false, ..RepoOptions::default() };
    let repo = Repository::create_with(temp_file.path(), opts, shardzip::Bincode).unwrap();
    repo.create_and_write(&1u8).unwrap();
    repo.create_and_write(&2u8).unwrap();
    repo.close().unwrap();

    let repo = Repository::open(temp_file.path()).unwrap();
    let names: Vec<String> = repo.shards().unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names, ["batch-0", "batch-1"]);
}

#[test]
fn test_verify_healthy_repository() {
    let temp_file = NamedTempFile::new().unwrap();
    write_three_shards(temp_file.path());

    let repo = Repository::open(temp_file.path()).unwrap();
    let report = repo.verify().unwrap();
    assert_eq!(report.quality, VerifyQuality::Full);
    assert_eq!(report.healthy, 3);
    assert_eq!(report.frames, 3);
    assert_eq!(report.health_pct(), 100.0);
    assert_eq!(report.damaged().count(), 0);
    assert_eq!(report.shards[2].largest_frame, 8 + 4 * 1_000_000);
}

#[test]
fn test_corrupted_shard_is_detected() {
    let temp_file = NamedTempFile::new().unwrap();
    write_three_shards(temp_file.path());

    let mut bytes = fs::read(temp_file.path()).unwrap();
    let pos = bytes.windows(6).position(|w| w == b"Name 1").unwrap();
    bytes[pos] = b'M';
    fs::write(temp_file.path(), &bytes).unwrap();

    let repo = Repository::open(temp_file.path()).unwrap();
    let err = repo.read_shard::<Vec<String>>(0).unwrap_err();
    assert!(matches!(err, Error::Archive(ArchiveError::ChecksumMismatch { .. })));
    assert_eq!(repo.read_shard::<Vec<String>>(1).unwrap(), names(7..=12));

    let report = repo.verify().unwrap();
    assert_eq!(report.quality, VerifyQuality::Partial);
    assert_eq!(report.healthy, 2);
    assert!(matches!(report.shards[0].health, ShardHealth::ChecksumMismatch { .. }));
}

#[test]
fn test_torn_shard_is_reported() {
    let temp_file = NamedTempFile::new().unwrap();
    {
        let ar = Archive::create(temp_file.path(), &RepoOptions::default()).unwrap();
        let mut entry = ar.new_entry().unwrap();
        // One whole frame, then a prefix declaring 5 bytes followed by 2.
        entry.write_all(&[1, 0, 0, 0, 9]).unwrap();
        entry.write_all(&[5, 0, 0, 0, 1, 2]).unwrap();
        ar.new_entry().unwrap().write_all(&[0, 0]).unwrap();
        ar.close().unwrap();
    }

    let repo = Repository::open(temp_file.path()).unwrap();
    let mut shard = repo.open_shard(0).unwrap();
    assert_eq!(shard.read_payload().unwrap(), Some(vec![9]));
    assert!(matches!(
        shard.read_payload(),
        Err(Error::Frame(FrameError::TruncatedRecord { expected: 5, actual: 2 }))
    ));

    let report = repo.verify().unwrap();
    assert_eq!(report.quality, VerifyQuality::Catastrophic);
    assert_eq!(
        report.shards[0].health,
        ShardHealth::TruncatedPayload { declared: 5, available: 2 }
    );
    assert_eq!(report.shards[0].frames, 1);
    assert_eq!(report.shards[1].health, ShardHealth::TornPrefix { available: 2 });
}
