//! Mounts a `FakeBucket`-free, real-bucket-backed tree at a local path.
//!
//! This binary only wires flags to a [`Config`] and a `tokio` runtime; the
//! actual `Bucket` implementation (the HTTP client talking to the real
//! object store) is out of this crate's scope (see `bucket.rs`'s module
//! doc) and is expected to be supplied by an embedder. Here it stands in
//! with [`bucketfs_core::test_support::FakeBucket`] seeded from `--seed`,
//! so this binary is runnable end-to-end without network access.

use std::path::PathBuf;
use std::sync::Arc;

use bucketfs_core::clock::SystemClock;
use bucketfs_core::config::Config;
use bucketfs_core::dispatcher::Dispatcher;
use bucketfs_core::test_support::FakeBucket;
use clap::Parser;
use fuser::MountOption;

#[derive(Parser, Debug)]
#[command(name = "bucketfs-mount", about = "Mount a bucket-backed tree over FUSE")]
struct Args {
    /// Where to mount the filesystem.
    mountpoint: PathBuf,

    /// Present the mount read-only.
    #[arg(long)]
    read_only: bool,

    /// `name=contents` pairs seeded into the in-memory bucket before
    /// mounting, for trying the filesystem out without a real bucket.
    #[arg(long = "seed", value_parser = parse_seed)]
    seeds: Vec<(String, String)>,

    /// Synthesize implicit directories from object prefixes with no
    /// placeholder object (§4.8 step 3).
    #[arg(long)]
    implicit_dirs: bool,

    /// Issue an extra `stat_object` on every `getattr` to detect clobbers.
    #[arg(long)]
    clobber_detection: bool,
}

fn parse_seed(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(name, contents)| (name.to_string(), contents.to_string()))
        .ok_or_else(|| format!("expected name=contents, got {s:?}"))
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let bucket = Arc::new(FakeBucket::new());
    for (name, contents) in &args.seeds {
        bucket.seed(name.clone(), contents.clone().into_bytes());
        log::info!("seeded {name} ({} bytes)", contents.len());
    }

    let config = Config {
        implicit_dirs: args.implicit_dirs,
        clobber_detection: args.clobber_detection,
        ..Config::default()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let dispatcher = Dispatcher::new(bucket, config, Arc::new(SystemClock), runtime.handle().clone());

    let mut options = vec![MountOption::FSName("bucketfs".to_string())];
    if args.read_only {
        options.push(MountOption::RO);
    }

    log::info!("mounting at {}", args.mountpoint.display());
    fuser::mount2(dispatcher, &args.mountpoint, &options)
}
