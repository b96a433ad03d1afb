use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use jarcache::{
    load_empty, load_from, ArchiveHandle, ArchiveTargets, DigestNodeExtractor, LoadError,
    NodeExtractError, NodeExtractor, NodeReader, OutputFile, WriteError, WriteOptions,
    INDEX_ENTRY_NAME,
};
use jarcache_digest::{hash_bytes, hash_path};
use jarcache_node_index::NodeIndex;
use rstest::rstest;

struct Workspace {
    _dir: tempfile::TempDir,
    primary: PathBuf,
    abi: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            primary: dir.path().join("classes.jar"),
            abi: dir.path().join("classes-abi.jar"),
            _dir: dir,
        }
    }

    fn targets(&self) -> ArchiveTargets {
        ArchiveTargets {
            primary: self.primary.clone(),
            abi: Some(self.abi.clone()),
        }
    }

    fn load(&self) -> jarcache::OutputAccumulator {
        load_from(Some(&self.primary), Some(&self.abi), true).unwrap()
    }
}

fn entry_names(path: &Path) -> Vec<String> {
    let (_handle, entries) = ArchiveHandle::open(path).unwrap();
    entries.into_iter().map(|entry| entry.name).collect()
}

#[test]
fn test_change_detection_across_runs() {
    let ws = Workspace::new();

    // First run: nothing to reuse.
    let acc = ws.load();
    assert!(!acc.is_changed());
    acc.register_batch([OutputFile::new("a/B.class", b"b1")]).unwrap();
    acc.register_abi_for("a/B.class", b"b1").unwrap();
    assert!(acc.is_changed());
    acc.write_archives(&ws.targets(), &DigestNodeExtractor, &WriteOptions::default())
        .unwrap();

    // Second run: the compiler produces the same bytes.
    let acc = ws.load();
    assert!(acc.contains("a/B.class"));
    acc.register_batch([OutputFile::new("a/B.class", b"b1")]).unwrap();
    acc.register_abi_for("a/B.class", b"b1").unwrap();
    assert!(!acc.is_changed());
    drop(acc);

    // Third run: the class changed.
    let acc = ws.load();
    acc.register_batch([OutputFile::new("a/B.class", b"b2")]).unwrap();
    assert!(acc.is_changed());
    acc.write_archives(&ws.targets(), &DigestNodeExtractor, &WriteOptions::default())
        .unwrap();

    let acc = ws.load();
    assert_eq!(acc.read("a/B.class").unwrap().unwrap(), b"b2");
    assert_eq!(acc.read_abi("a/B.class").unwrap().unwrap(), b"b1");
}

#[test]
fn test_unregistered_entries_are_carried_over() {
    let ws = Workspace::new();
    let acc = ws.load();
    acc.register_batch([
        OutputFile::new("a/B.class", b"b"),
        OutputFile::new("a/C.class", b"c"),
        OutputFile::new("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
    ])
    .unwrap();
    acc.register_abi_for("a/B.class", b"b").unwrap();
    acc.register_abi_for("a/C.class", b"c").unwrap();
    acc.write_archives(&ws.targets(), &DigestNodeExtractor, &WriteOptions::default())
        .unwrap();

    // Only C is recompiled, B and the manifest come from the previous archive.
    let acc = ws.load();
    acc.register_batch([OutputFile::new("a/C.class", b"c2")]).unwrap();
    acc.register_abi_for("a/C.class", b"c2").unwrap();
    acc.write_archives(&ws.targets(), &DigestNodeExtractor, &WriteOptions::default())
        .unwrap();

    let acc = ws.load();
    assert_eq!(acc.read("a/B.class").unwrap().unwrap(), b"b");
    assert_eq!(acc.read("a/C.class").unwrap().unwrap(), b"c2");
    assert_eq!(
        acc.read("META-INF/MANIFEST.MF").unwrap().unwrap(),
        b"Manifest-Version: 1.0\n"
    );
    assert_eq!(acc.read_abi("a/B.class").unwrap().unwrap(), b"b");
}

#[test]
fn test_removed_outputs_are_dropped() {
    let ws = Workspace::new();
    let acc = ws.load();
    acc.register_batch([
        OutputFile::new("a/B.class", b"b"),
        OutputFile::new("a/Gone.class", b"g"),
    ])
    .unwrap();
    acc.register_abi_for("a/Gone.class", b"g").unwrap();
    acc.write_archives(&ws.targets(), &DigestNodeExtractor, &WriteOptions::default())
        .unwrap();

    let acc = ws.load();
    assert!(acc.remove("a/Gone.class"));
    assert!(acc.is_changed());
    assert!(acc.deleted_classes().contains("a/Gone"));
    acc.write_archives(&ws.targets(), &DigestNodeExtractor, &WriteOptions::default())
        .unwrap();

    assert_eq!(entry_names(&ws.primary), ["a/B.class"]);
    assert_eq!(entry_names(&ws.abi), [INDEX_ENTRY_NAME]);
}

#[test]
fn test_abi_archive_layout() {
    let ws = Workspace::new();
    let acc = ws.load();
    acc.register_batch([OutputFile::new("a/B.class", b"b")]).unwrap();
    acc.register_abi_for("a/B.class", b"b").unwrap();
    acc.register_abi_for("META-INF/versions/9/module-info.class", b"m")
        .unwrap();
    let summary = acc
        .write_archives(&ws.targets(), &DigestNodeExtractor, &WriteOptions::default())
        .unwrap();

    assert_eq!(
        entry_names(&ws.abi),
        [
            "META-INF/versions/9/module-info.class",
            "a/B.class",
            "a/B.class.n",
            INDEX_ENTRY_NAME,
        ]
    );

    // The index points at the data of the node record.
    let (handle, entries) = ArchiveHandle::open(&ws.abi).unwrap();
    let record = entries.iter().find(|e| e.name == "a/B.class.n").unwrap();
    let index = entries.iter().find(|e| e.name == INDEX_ENTRY_NAME).unwrap();
    let index = NodeIndex::deserialize(&handle.read(&index.location).unwrap()).unwrap();
    let node = index.get(hash_path("a/B.class")).unwrap();
    assert_eq!(u64::from(node.offset), record.location.offset);
    assert_eq!(u64::from(node.size), record.location.size);
    assert_eq!(node.digest, hash_bytes(handle.read(&record.location).unwrap()));
    assert_eq!(summary.abi.unwrap().node_index.unwrap(), index);

    // The next run picks the index up again.
    let acc = ws.load();
    assert_eq!(acc.previous_node_index(), Some(&index));
    assert!(acc.read_abi("a/B.class.n").unwrap().is_none());
}

#[test]
fn test_node_reader_lookup() {
    let ws = Workspace::new();
    let acc = ws.load();
    for i in 0..100 {
        let path = format!("p/C{i}.class");
        acc.register_batch([OutputFile::new(path.clone(), path.as_bytes())])
            .unwrap();
        acc.register_abi_for(&path, path.as_bytes()).unwrap();
    }
    acc.write_archives(&ws.targets(), &DigestNodeExtractor, &WriteOptions::default())
        .unwrap();

    let reader = NodeReader::open(&ws.abi).unwrap();
    assert_eq!(reader.len().unwrap(), 100);
    let node = reader.lookup("p/C42.class").unwrap().unwrap();
    assert_eq!(
        DigestNodeExtractor::decode(&node),
        Some((
            hash_path("p/C42.class"),
            hash_bytes("p/C42.class"),
            "p/C42.class".len() as u64
        ))
    );
    assert!(reader.lookup("p/Missing.class").unwrap().is_none());
}

#[rstest]
#[case::parallel(true)]
#[case::sequential(false)]
fn test_writes_are_deterministic(#[case] parallel: bool) {
    let options = WriteOptions {
        parallel,
        ..WriteOptions::default()
    };
    let outputs = [
        ("b/Z.class", b"z".as_slice()),
        ("a/B.class", b"b".as_slice()),
        ("META-INF/MANIFEST.MF", b"m".as_slice()),
    ];

    let write = |ws: &Workspace| {
        let acc = load_empty(true);
        for (path, bytes) in outputs {
            acc.register_batch([OutputFile::new(path, bytes)]).unwrap();
            acc.register_abi_for(path, bytes).unwrap();
        }
        acc.write_archives(&ws.targets(), &DigestNodeExtractor, &options)
            .unwrap();
    };

    let first = Workspace::new();
    let second = Workspace::new();
    write(&first);
    write(&second);
    assert_eq!(
        fs_err::read(&first.primary).unwrap(),
        fs_err::read(&second.primary).unwrap()
    );
    assert_eq!(
        fs_err::read(&first.abi).unwrap(),
        fs_err::read(&second.abi).unwrap()
    );

    // Rewriting entirely from reused entries produces the same bytes as well.
    let acc = first.load();
    acc.write_archives(&second.targets(), &DigestNodeExtractor, &options)
        .unwrap();
    assert_eq!(
        fs_err::read(&first.primary).unwrap(),
        fs_err::read(&second.primary).unwrap()
    );
    assert_eq!(
        fs_err::read(&first.abi).unwrap(),
        fs_err::read(&second.abi).unwrap()
    );
}

#[test]
fn test_missing_abi_archive_requires_rebuild() {
    let ws = Workspace::new();
    let acc = load_empty(false);
    acc.register_batch([OutputFile::new("a/B.class", b"b")]).unwrap();
    acc.write_primary(&ws.primary).unwrap();

    let err = load_from(Some(&ws.primary), Some(&ws.abi), true).unwrap_err();
    assert_matches!(&err, LoadError::AbiArchiveMissing(Some(path)) if path == &ws.abi);
    assert!(err.requires_full_rebuild());

    let err = load_from(Some(&ws.primary), None, true).unwrap_err();
    assert_matches!(err, LoadError::AbiArchiveMissing(None));

    // Without ABI outputs the primary archive alone is fine.
    let acc = load_from(Some(&ws.primary), Some(&ws.abi), false).unwrap();
    assert!(!acc.has_abi());
    assert_eq!(acc.len(), 1);
}

#[test]
fn test_previous_archive_can_be_replaced_while_reused() {
    let ws = Workspace::new();
    let acc = load_empty(false);
    acc.register_batch([OutputFile::new("a/B.class", vec![7u8; 64 * 1024])])
        .unwrap();
    acc.write_primary(&ws.primary).unwrap();

    // The new archive is written over the file the reused entries live in.
    let acc = load_from(Some(&ws.primary), None, false).unwrap();
    acc.register_batch([OutputFile::new("a/C.class", b"c")]).unwrap();
    let written = acc.write_primary(&ws.primary).unwrap();
    assert_eq!(written.entry_count, 2);

    let acc = load_from(Some(&ws.primary), None, false).unwrap();
    assert_eq!(acc.read("a/B.class").unwrap().unwrap(), vec![7u8; 64 * 1024]);
}

/// Rejects every class.
struct BrokenExtractor;

impl NodeExtractor for BrokenExtractor {
    fn extract(&self, _: &[u8], _: u64, _: &mut Vec<u8>) -> Result<(), NodeExtractError> {
        Err("unsupported class file version".into())
    }
}

#[test]
fn test_failed_write_keeps_registered_outputs() {
    let ws = Workspace::new();
    let acc = ws.load();
    acc.register_batch([OutputFile::new("a/B.class", b"b")]).unwrap();
    acc.register_abi_for("a/B.class", b"b").unwrap();
    acc.write_archives(&ws.targets(), &DigestNodeExtractor, &WriteOptions::default())
        .unwrap();
    let previous_primary = fs_err::read(&ws.primary).unwrap();
    let previous_abi = fs_err::read(&ws.abi).unwrap();

    let acc = ws.load();
    acc.register_batch([OutputFile::new("a/C.class", b"c")]).unwrap();
    acc.register_abi_for("a/C.class", b"c").unwrap();
    assert_eq!(acc.len(), 2);

    let err = acc
        .write_archives(&ws.targets(), &BrokenExtractor, &WriteOptions::default())
        .unwrap_err();
    assert_matches!(err, WriteError::NodeExtraction { .. });

    // Neither the accumulator nor the previous archives were touched.
    assert_eq!(acc.len(), 2);
    assert!(acc.is_changed());
    assert_eq!(acc.read("a/B.class").unwrap().unwrap(), b"b");
    assert_eq!(acc.read("a/C.class").unwrap().unwrap(), b"c");
    assert_eq!(acc.read_abi("a/B.class").unwrap().unwrap(), b"b");
    assert_eq!(fs_err::read(&ws.primary).unwrap(), previous_primary);
    assert_eq!(fs_err::read(&ws.abi).unwrap(), previous_abi);

    // Retrying with a working extractor writes everything.
    acc.write_archives(&ws.targets(), &DigestNodeExtractor, &WriteOptions::default())
        .unwrap();
    assert!(acc.is_empty());

    let acc = ws.load();
    assert_eq!(entry_names(&ws.primary), ["a/B.class", "a/C.class"]);
    assert_eq!(acc.read_abi("a/C.class").unwrap().unwrap(), b"c");
}
