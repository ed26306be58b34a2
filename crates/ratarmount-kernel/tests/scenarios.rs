//! End-to-end behaviour of the archive filesystem against on-disk indexes.

use ratarmount_index::fixture::ArchiveImage;
use ratarmount_index::{IndexResult, IndexStore, IndexWriter, MemberRecord};
use ratarmount_kernel::vfs::SidecarIndexLoader;
use ratarmount_kernel::{
    ArchiveFs, IndexLoader, MountConfig, MountTable, OpenFlags, VersionSelector, VfsError, VfsOps,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ratarmount_kernel=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_single_member_reads() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.tar");
    let mut bytes = vec![0u8; 512];
    bytes[100..105].copy_from_slice(b"hello");
    std::fs::write(&archive, &bytes).unwrap();

    let index = dir.path().join("a.tar.index.sqlite");
    IndexWriter::create(&index)
        .unwrap()
        .insert(&MemberRecord::file("", "file.txt", 100, 5))
        .unwrap();

    let fs = ArchiveFs::open(&archive).unwrap();
    let path = Path::new("/file.txt");

    assert_eq!(fs.getattr(path).await.unwrap().size, 5);

    let fh = fs.open(path, OpenFlags::read()).await.unwrap();
    assert_eq!(fs.read(fh, 0, 5).await.unwrap(), b"hello");
    assert_eq!(fs.read(fh, 3, 10).await.unwrap(), b"lo");
    fs.release(fh).await.unwrap();
}

#[tokio::test]
async fn test_version_numbers_follow_offset_order() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("log.tar");
    std::fs::write(&archive, vec![0u8; 2048]).unwrap();

    let index = dir.path().join("log.tar.index.sqlite");
    let mut writer = IndexWriter::create(&index).unwrap();
    writer
        .insert_all(&[
            MemberRecord::file("", "log", 1024, 4).with_offset_header(50),
            MemberRecord::file("", "log", 512, 2).with_offset_header(10),
        ])
        .unwrap();
    drop(writer);

    let fs = ArchiveFs::open(&archive).unwrap();
    let resolve = |raw: i64| {
        let root = Arc::clone(fs.root());
        async move { root.resolve("/log", VersionSelector::from_raw(raw)).await }
    };

    let header = |node: ratarmount_kernel::vfs::ResolvedNode| node.record.unwrap().offset_header;
    assert_eq!(header(resolve(0).await.unwrap()), 50);
    assert_eq!(header(resolve(1).await.unwrap()), 10);
    // Positive versions count from the oldest: with two records, 2 is the newest.
    assert_eq!(header(resolve(2).await.unwrap()), 50);
    assert!(matches!(resolve(3).await, Err(VfsError::NotFound(_))));
    // Negative versions count back from the newest.
    assert_eq!(header(resolve(-1).await.unwrap()), 10);
    assert!(matches!(resolve(-2).await, Err(VfsError::NotFound(_))));

    // getattr serves the newest version.
    assert_eq!(fs.getattr(Path::new("/log")).await.unwrap().size, 4);
}

/// Delegates to the sidecar loader, counting calls. Slow on purpose so that
/// concurrent first accesses overlap.
struct CountingLoader {
    inner: SidecarIndexLoader,
    calls: Arc<AtomicUsize>,
    fail_first: bool,
}

impl IndexLoader for CountingLoader {
    fn load(&self, parent: &IndexStore, member: &MemberRecord) -> IndexResult<IndexStore> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        if self.fail_first && call == 0 {
            return IndexStore::open(parent.path().with_extension("missing"), Default::default());
        }
        self.inner.load(parent, member)
    }
}

fn nested_archive(dir: &TempDir) -> std::path::PathBuf {
    let mut inner = ArchiveImage::new();
    inner.add_dir("", "docs");
    inner.add_file("/docs", "readme", b"nested readme");

    let mut outer = ArchiveImage::new();
    outer.add_file("", "top.txt", b"top");
    outer.add_archive("", "inner.tar", inner);
    outer.write_to(dir.path(), "outer.tar").unwrap().0
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nested_archive_built_once_under_race() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let fs = Arc::new(
        ArchiveFs::builder(nested_archive(&dir))
            .loader(CountingLoader {
                inner: SidecarIndexLoader::default(),
                calls: Arc::clone(&calls),
                fail_first: false,
            })
            .build()
            .unwrap(),
    );

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let fs = Arc::clone(&fs);
            tokio::spawn(async move {
                fs.read_all(Path::new("/inner.tar/docs/readme"), VersionSelector::MostRecent)
                    .await
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), b"nested readme");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fs.root().nested_count(), 1);

    let entries = fs.readdir(Path::new("/inner.tar")).await.unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "..", "docs"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_nested_build_is_retried() {
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let fs = ArchiveFs::builder(nested_archive(&dir))
        .loader(CountingLoader {
            inner: SidecarIndexLoader::default(),
            calls: Arc::clone(&calls),
            fail_first: true,
        })
        .build()
        .unwrap();

    let path = Path::new("/inner.tar/docs/readme");
    let err = fs.getattr(path).await.unwrap_err();
    assert_eq!(err.errno(), libc::EIO);
    assert_eq!(fs.root().nested_count(), 0);

    let attr = fs.getattr(path).await.unwrap();
    assert_eq!(attr.size, 13);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_sparse_archive_member_is_a_plain_file() {
    let dir = TempDir::new().unwrap();
    let mut image = ArchiveImage::new();
    image.add_sparse("", "image.tar", 64, &[(0, &b"not really a tar"[..])]);
    let index = dir.path().join("s.tar.index.sqlite");
    let (archive, _) = image.write_to(dir.path(), "s.tar").unwrap();

    // Flag the sparse member as an archive too.
    let conn = rusqlite::Connection::open(&index).unwrap();
    conn.execute(r#"UPDATE "files" SET "istar" = 1"#, []).unwrap();
    drop(conn);

    let fs = ArchiveFs::open(&archive).unwrap();
    let attr = fs.getattr(Path::new("/image.tar")).await.unwrap();
    assert!(attr.is_file());
    assert_eq!(attr.size, 64);
}

#[tokio::test]
async fn test_corrupt_index_is_fatal() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("bad.tar");
    std::fs::write(&archive, b"").unwrap();

    let index = dir.path().join("bad.tar.index.sqlite");
    let conn = rusqlite::Connection::open(&index).unwrap();
    conn.execute("CREATE TABLE unrelated (x INTEGER)", []).unwrap();
    drop(conn);

    let err = ArchiveFs::open(&archive).unwrap_err();
    assert!(matches!(err, VfsError::CorruptIndex(_)));
    assert!(err.is_fatal());

    let missing = dir.path().join("none.tar");
    std::fs::write(&missing, b"").unwrap();
    let err = ArchiveFs::open(&missing).unwrap_err();
    assert!(matches!(err, VfsError::IndexUnavailable(_)));
}

#[tokio::test]
async fn test_several_archives_from_config() {
    let dir = TempDir::new().unwrap();
    let mut sources = Vec::new();
    for (name, content) in [("a.tar", "alpha"), ("b.tar", "beta")] {
        let mut image = ArchiveImage::new();
        image.add_file("", "data", content.as_bytes());
        sources.push(image.write_to(dir.path(), name).unwrap().0);
    }
    sources.push(nested_archive(&dir));

    let config = MountConfig {
        sources,
        ..Default::default()
    };
    let table = MountTable::from_config(&config).await.unwrap();

    let root = table.readdir(Path::new("/")).await.unwrap();
    let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec![".", "..", "a.tar", "b.tar", "outer.tar"]);

    let read = |path: &'static str| {
        let table = &table;
        async move {
            table
                .read_all(Path::new(path), VersionSelector::MostRecent)
                .await
                .unwrap()
        }
    };
    assert_eq!(read("/a.tar/data").await, b"alpha");
    assert_eq!(read("/b.tar/data").await, b"beta");
    assert_eq!(read("/outer.tar/inner.tar/docs/readme").await, b"nested readme");

    let err = table
        .open(Path::new("/a.tar/data"), OpenFlags::write())
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EACCES);

    table.close().await;
    assert!(table.list_mounts().await.is_empty());
}
