//! End-to-end scenarios against `FakeBucket`, exercising `FileInode` and
//! `DirInode` the way a dispatcher would: one write/sync/read path at a
//! time, no mocked internals below the bucket seam.

use std::sync::Arc;

use bucketfs_core::cancel::CancellationToken;
use bucketfs_core::clock::FakeClock;
use bucketfs_core::config::Config;
use bucketfs_core::inode::{DirInode, FileInode, InodeId};
use bucketfs_core::lease::FileLeaser;
use bucketfs_core::syncer::ObjectSyncer;
use bucketfs_core::test_support::FakeBucket;

fn make_file(
    bucket: &Arc<FakeBucket>,
    config: Config,
    source: bucketfs_core::object::ObjectRecord,
) -> FileInode {
    let clock = Arc::new(FakeClock::new(0));
    let leaser = FileLeaser::new(config.limit_bytes, config.limit_rw_count);
    let syncer = Arc::new(ObjectSyncer::new(bucket.clone(), config.clone()));
    FileInode::new(
        InodeId(2),
        source.name.clone(),
        bucket.clone(),
        config,
        clock,
        leaser,
        syncer,
        source,
    )
}

#[tokio::test]
async fn overwrite_a_byte_uploads_full_replace() {
    let bucket = Arc::new(FakeBucket::new());
    let source = bucket.seed("taco", "taco");
    let original_generation = source.generation;
    let file = make_file(&bucket, Config::default(), source);

    let cancel = CancellationToken::new();
    file.write(b"p", 0, &cancel).await.unwrap();
    file.sync(&cancel).await.unwrap();

    assert_eq!(
        bucket.current_bytes("taco").unwrap().as_ref(),
        b"paco".as_slice()
    );
    assert!(file.source_generation() > original_generation);
}

#[tokio::test]
async fn append_takes_the_compose_path() {
    let bucket = Arc::new(FakeBucket::new());
    let source = bucket.seed("taco", "taco");
    let config = Config {
        append_threshold: 4,
        ..Config::default()
    };
    let file = make_file(&bucket, config, source);

    let cancel = CancellationToken::new();
    file.write(b"burrito", 4, &cancel).await.unwrap();
    file.sync(&cancel).await.unwrap();

    assert_eq!(
        bucket.current_bytes("taco").unwrap().as_ref(),
        b"tacoburrito".as_slice()
    );
}

#[tokio::test]
async fn clobber_during_sync_is_swallowed() {
    let bucket = Arc::new(FakeBucket::new());
    let source = bucket.seed("taco", "taco");
    let original_generation = source.generation;
    let config = Config {
        clobber_detection: true,
        ..Config::default()
    };
    let file = make_file(&bucket, config, source);

    let cancel = CancellationToken::new();
    file.truncate(2, &cancel).await.unwrap();

    // Out-of-band writer replaces "taco" with "burrito" before sync runs.
    bucket.seed("taco", "burrito");

    file.sync(&cancel).await.unwrap();

    // The clobber was swallowed: this inode's view of the source generation
    // was never advanced past the generation it started with, and the
    // bucket's object is untouched by this inode's own sync.
    assert_eq!(file.source_generation(), original_generation);
    assert_eq!(
        bucket.current_bytes("taco").unwrap().as_ref(),
        b"burrito".as_slice()
    );

    // Local staging bytes are still readable.
    let mut buf = [0u8; 2];
    file.read(&mut buf, 0, &cancel).await.unwrap();
    assert_eq!(&buf, b"ta");
}

#[tokio::test]
async fn read_before_write_then_clobber_never_returns_mixed_data() {
    let bucket = Arc::new(FakeBucket::new());
    let source = bucket.seed("taco", "taco");
    let file = make_file(&bucket, Config::default(), source);
    let cancel = CancellationToken::new();

    let mut buf = [0u8; 4];
    file.read(&mut buf, 0, &cancel).await.unwrap();
    assert_eq!(&buf, b"taco");

    bucket.seed("taco", "burrito");

    // Either the still-warm read lease serves the original bytes, or the
    // backing data was revoked and the refresh surfaces an error - never a
    // silent mix of old and new content.
    match file.read(&mut buf, 0, &cancel).await {
        Ok(_) => assert_eq!(&buf, b"taco"),
        Err(_) => {}
    }
}

#[tokio::test]
async fn type_cache_shadows_new_directory_until_ttl_then_resolves() {
    let bucket = Arc::new(FakeBucket::new());
    bucket.seed("foo/bar", "a file");
    let config = Config {
        type_cache_ttl: std::time::Duration::from_millis(20),
        ..Config::default()
    };
    let dir = DirInode::new(
        InodeId(1),
        "foo/".to_string(),
        bucket.clone(),
        config,
    );

    let first = dir.lookup_child("bar").await.unwrap().unwrap();
    assert_eq!(first.name, "foo/bar");

    bucket.seed("foo/bar/", "");

    // Still cached as a file within the TTL.
    let second = dir.lookup_child("bar").await.unwrap().unwrap();
    assert_eq!(second.name, "foo/bar");

    tokio::time::sleep(std::time::Duration::from_millis(40)).await;

    let third = dir.lookup_child("bar").await.unwrap().unwrap();
    assert_eq!(third.name, "foo/bar/");

    // The conflict-marker form always forces the file variant.
    let marker = format!("bar{}", String::from_utf8_lossy(b"\n"));
    let forced = dir.lookup_child(&marker).await.unwrap().unwrap();
    assert_eq!(forced.name, "foo/bar");
}

#[tokio::test]
async fn lease_eviction_keeps_other_files_readable() {
    let bucket = Arc::new(FakeBucket::new());
    let source_a = bucket.seed("a", vec![b'x'; 1020]);
    let source_b = bucket.seed("b", vec![0u8; 10]);
    let config = Config {
        limit_bytes: 1024,
        ..Config::default()
    };

    let file_a = make_file(&bucket, config.clone(), source_a);
    let file_b = make_file(&bucket, config, source_b);
    let cancel = CancellationToken::new();

    // Dirty A, forcing its staging file to materialize.
    file_a.write(b"y", 0, &cancel).await.unwrap();

    // Force B to upgrade too, competing for the same byte budget.
    file_b.truncate(1020, &cancel).await.unwrap();

    // A must still be openable; either it still serves staged bytes or a
    // revoked lease causes a clean refetch from the bucket, never a panic
    // or silently corrupted read.
    let mut buf = [0u8; 1020];
    let _ = file_a.read(&mut buf, 0, &cancel).await;
}
