use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use shardzip::records::{RecordReader, RecordWriter};
use shardzip::{Bincode, Json, RepoOptions, Repository, Timestamp};
use std::fs;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Message {
    id:      u32,
    date:    Timestamp,
    message: String,
}

#[test]
fn test_record_file_roundtrip() {
    let temp_file = NamedTempFile::new().unwrap();

    let mut w = RecordWriter::create(temp_file.path()).unwrap();
    for i in 0..1000u32 {
        w.write(&i).unwrap();
    }
    assert_eq!(w.records_written(), 1000);
    w.close().unwrap();

    let mut r = RecordReader::open(temp_file.path()).unwrap();
    assert_eq!(r.read::<u32>().unwrap(), Some(0));
    let rest: Vec<u32> = r.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(rest, (1..1000).collect::<Vec<_>>());
    assert_eq!(r.read::<u32>().unwrap(), None);
    assert_eq!(r.frames_read(), 1000);
    r.close().unwrap();

    // The same file is a one-shard repository.
    let repo = Repository::open(temp_file.path()).unwrap();
    assert_eq!(repo.shard_count().unwrap(), 1);
    assert_eq!(repo.open_shard(0).unwrap().records::<u32>().count(), 1000);
}

#[test]
fn test_in_memory_json_messages() {
    let when = Utc.with_ymd_and_hms(2019, 3, 14, 15, 9, 26).unwrap();
    let messages = vec![
        Message { id: 1, date: Timestamp::try_from(when).unwrap(), message: "hello there".into() },
        Message { id: 2, date: Timestamp::try_from(when).unwrap(), message: "bye now".into() },
    ];

    let mut w = RecordWriter::new(Vec::new(), Json).unwrap();
    for m in &messages {
        w.write(m).unwrap();
    }
    let bytes = w.into_inner().unwrap();

    let temp_file = NamedTempFile::new().unwrap();
    fs::write(temp_file.path(), &bytes).unwrap();

    let mut r = RecordReader::open_with(temp_file.path(), &RepoOptions::default(), Json).unwrap();
    let back: Vec<Message> = r.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(back, messages);
    assert_eq!(back[0].date.to_datetime().unwrap(), when);
}

#[test]
fn test_empty_record_file() {
    let temp_file = NamedTempFile::new().unwrap();
    RecordWriter::create(temp_file.path()).unwrap().close().unwrap();

    let mut r = RecordReader::open(temp_file.path()).unwrap();
    assert_eq!(r.read::<u64>().unwrap(), None);
}

#[test]
fn test_record_entry_name() {
    let temp_file = NamedTempFile::new().unwrap();
    let shard_names = || -> Vec<String> {
        let repo = Repository::open(temp_file.path()).unwrap();
        repo.shards().unwrap().into_iter().map(|e| e.name).collect()
    };

    let mut w = RecordWriter::create(temp_file.path()).unwrap();
    w.write(&1u32).unwrap();
    w.close().unwrap();
    assert_eq!(shard_names(), ["file"]);

    let options = RepoOptions { record_entry: "protobuf.db".into(), ..RepoOptions::default() };
    let mut w = RecordWriter::create_with(temp_file.path(), &options, Bincode).unwrap();
    w.write(&2u32).unwrap();
    w.close().unwrap();
    assert_eq!(shard_names(), ["protobuf.db"]);

    let mut r = RecordReader::open(temp_file.path()).unwrap();
    assert_eq!(r.read::<u32>().unwrap(), Some(2));
    assert_eq!(r.read::<u32>().unwrap(), None);
}
