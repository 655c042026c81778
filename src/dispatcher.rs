//! Wires [`crate::inode::FileInode`]/[`crate::inode::DirInode`] up to
//! [`fuser::Filesystem`]. The kernel protocol transport (mounting, the
//! `/dev/fuse` channel, the wire ABI) lives entirely in the `fuser`
//! dependency; this module only translates its synchronous, reply-callback
//! calling convention into calls against this crate's async core.
//!
//! `fuser::Filesystem` methods are plain synchronous functions dispatched
//! from a pool of kernel-request-handling threads, so each one bridges into
//! async code with `self.rt.block_on(...)` rather than spawning and
//! awaiting a future itself.

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use fuser::{
    FileAttr, FileType, Filesystem, FopenFlags, INodeNo, OpenFlags, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite,
    Request, TimeOrNow,
};

use crate::bucket::Bucket;
use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::Error;
use crate::inode::{ChildKind, DirEntry, DirInode, FileAttributes, FileInode, InodeId};
use crate::lease::FileLeaser;
use crate::object::ObjectRecord;
use crate::syncer::ObjectSyncer;

/// `fuser`'s inode number for the mount root.
const ROOT_ID: u64 = 1;

const ATTR_TTL: Duration = Duration::from_secs(1);

enum Node {
    Dir(Arc<DirInode>),
    File(Arc<FileInode>),
    Symlink { record: ObjectRecord, target: String },
}

fn classify(record: &ObjectRecord) -> ChildKind {
    if ObjectRecord::is_directory_name(&record.name) {
        ChildKind::Dir
    } else if record.symlink_target().is_some() {
        ChildKind::Symlink
    } else {
        ChildKind::File
    }
}

fn to_errno(error: &Error) -> fuser::Errno {
    match error {
        Error::NotFound => fuser::Errno::ENOENT,
        Error::PreconditionFailed { .. } => fuser::Errno::EIO,
        Error::RevokedLease => fuser::Errno::EIO,
        Error::Cancelled => fuser::Errno::EINTR,
        Error::Transient(_) => fuser::Errno::EIO,
        Error::InvariantViolation(_) => fuser::Errno::EIO,
        Error::CountUnderflow => fuser::Errno::EIO,
    }
}

/// Translates `bucketfs_core` inode coordination into the calling
/// convention `fuser::Filesystem` expects.
pub struct Dispatcher {
    bucket: Arc<dyn Bucket>,
    config: Config,
    clock: Arc<dyn Clock>,
    #[allow(dead_code)]
    leaser: Arc<FileLeaser>,
    syncer: Arc<ObjectSyncer>,
    rt: tokio::runtime::Handle,

    nodes: DashMap<InodeId, Node>,
    /// Resolves a (parent, name) dentry to the inode id assigned the first
    /// time it was looked up. `fuser` re-sends the same `(parent, name)`
    /// pair on every syscall touching that path; this is the seam that
    /// keeps repeated lookups returning the same `InodeId`.
    dentries: DashMap<(InodeId, String), InodeId>,
    next_id: AtomicU64,
    /// A directory's full listing, snapshotted at `opendir` and served by
    /// integer offset out of `readdir` until `releasedir` — `DirInode`
    /// itself only ever hands back one bucket-cursor page at a time, which
    /// doesn't line up with the kernel's "resume from offset N" contract.
    dir_handles: DashMap<u64, Vec<DirEntry>>,

    uid: u32,
    gid: u32,
}

impl Dispatcher {
    pub fn new(
        bucket: Arc<dyn Bucket>,
        config: Config,
        clock: Arc<dyn Clock>,
        rt: tokio::runtime::Handle,
    ) -> Self {
        let leaser = FileLeaser::new(config.limit_bytes, config.limit_rw_count);
        let syncer = Arc::new(ObjectSyncer::new(bucket.clone(), config.clone()));
        let nodes = DashMap::new();
        nodes.insert(
            InodeId(ROOT_ID),
            Node::Dir(Arc::new(DirInode::new(
                InodeId(ROOT_ID),
                String::new(),
                bucket.clone(),
                config.clone(),
            ))),
        );
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Dispatcher {
            bucket,
            config,
            clock,
            leaser,
            syncer,
            rt,
            nodes,
            dentries: DashMap::new(),
            next_id: AtomicU64::new(ROOT_ID + 1),
            dir_handles: DashMap::new(),
            uid,
            gid,
        }
    }

    fn dir_node(&self, ino: InodeId) -> Option<Arc<DirInode>> {
        match self.nodes.get(&ino)?.value() {
            Node::Dir(d) => Some(d.clone()),
            _ => None,
        }
    }

    fn file_node(&self, ino: InodeId) -> Option<Arc<FileInode>> {
        match self.nodes.get(&ino)?.value() {
            Node::File(f) => Some(f.clone()),
            _ => None,
        }
    }

    fn get_or_assign(&self, parent: InodeId, name: &str, record: ObjectRecord) -> InodeId {
        let key = (parent, name.to_string());
        if let Some(existing) = self.dentries.get(&key) {
            return *existing.value();
        }
        let id = InodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let node = match classify(&record) {
            ChildKind::Dir | ChildKind::Implicit => Node::Dir(Arc::new(DirInode::new(
                id,
                record.name.clone(),
                self.bucket.clone(),
                self.config.clone(),
            ))),
            ChildKind::File => Node::File(Arc::new(FileInode::new(
                id,
                record.name.clone(),
                self.bucket.clone(),
                self.config.clone(),
                self.clock.clone(),
                self.leaser.clone(),
                self.syncer.clone(),
                record,
            ))),
            ChildKind::Symlink => {
                let target = record.symlink_target().unwrap_or_default().to_string();
                Node::Symlink { record, target }
            }
        };
        self.nodes.insert(id, node);
        match self.dentries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                // Lost the race to a concurrent lookup of the same dentry;
                // drop the node we just built and reuse theirs.
                self.nodes.remove(&id);
                *existing.get()
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id);
                id
            }
        }
    }

    fn dir_attr(&self, ino: u64) -> FileAttr {
        build_attr(ino, 0, FileType::Directory, None, 2, self.uid, self.gid)
    }

    fn file_attr(&self, ino: u64, attrs: &FileAttributes) -> FileAttr {
        let mtime = attrs.mtime.map(|t| t.to_system_time());
        build_attr(
            ino,
            attrs.size,
            FileType::RegularFile,
            mtime,
            attrs.nlink.max(1),
            self.uid,
            self.gid,
        )
    }

    fn symlink_attr(&self, ino: u64, target: &str) -> FileAttr {
        build_attr(
            ino,
            target.len() as u64,
            FileType::Symlink,
            None,
            1,
            self.uid,
            self.gid,
        )
    }

    /// Drains every page of `dir.read_entries` into one stable listing,
    /// snapshotted at `opendir` time (§4.8 "Listing" is one-page-per-call;
    /// the kernel's offset-resume contract needs the whole thing at once).
    async fn snapshot_dir(&self, dir: &DirInode) -> crate::error::Result<Vec<DirEntry>> {
        let mut all = Vec::new();
        let mut cursor = None;
        loop {
            let (mut page, next) = dir.read_entries(cursor).await?;
            all.append(&mut page);
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(all)
    }
}

fn build_attr(
    ino: u64,
    size: u64,
    kind: FileType,
    mtime: Option<SystemTime>,
    nlink: u32,
    uid: u32,
    gid: u32,
) -> FileAttr {
    let mtime = mtime.unwrap_or(SystemTime::UNIX_EPOCH);
    let perm = match kind {
        FileType::Directory => 0o755,
        _ => 0o644,
    };
    FileAttr {
        ino,
        size,
        blocks: size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind,
        perm,
        nlink,
        uid,
        gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

impl Filesystem for Dispatcher {
    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let Some(dir) = self.dir_node(InodeId(parent.0)) else {
            reply.error(fuser::Errno::ENOTDIR);
            return;
        };
        let name = name.to_string_lossy().into_owned();
        match self.rt.block_on(dir.lookup_child(&name)) {
            Ok(Some(record)) => {
                let generation = record.generation;
                let ino = self.get_or_assign(InodeId(parent.0), &name, record);
                if let Some(file) = self.file_node(ino) {
                    file.inc_lookup();
                    match self.rt.block_on(file.attributes()) {
                        Ok(attrs) if attrs.unlinked.is_none() => {
                            reply.entry(
                                &ATTR_TTL,
                                &self.file_attr(ino.0, &attrs),
                                generation,
                            );
                        }
                        Ok(_) => reply.error(fuser::Errno::ENOENT),
                        Err(e) => reply.error(to_errno(&e)),
                    }
                } else if let Some(target) = self.nodes.get(&ino).and_then(|n| match n.value() {
                    Node::Symlink { target, .. } => Some(target.clone()),
                    _ => None,
                }) {
                    reply.entry(&ATTR_TTL, &self.symlink_attr(ino.0, &target), generation);
                } else {
                    reply.entry(&ATTR_TTL, &self.dir_attr(ino.0), generation);
                }
            }
            Ok(None) => reply.error(fuser::Errno::ENOENT),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn forget(&self, _req: &Request, ino: INodeNo, nlookup: u64) {
        if let Some(file) = self.file_node(InodeId(ino.0)) {
            if file.dec_lookup(nlookup) {
                self.rt.block_on(file.destroy());
                self.nodes.remove(&InodeId(ino.0));
                self.dentries.retain(|_, v| *v != InodeId(ino.0));
            }
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<fuser::FileHandle>, reply: ReplyAttr) {
        if let Some(file) = self.file_node(InodeId(ino.0)) {
            match self.rt.block_on(file.attributes()) {
                Ok(attrs) if attrs.unlinked.is_none() => {
                    reply.attr(&ATTR_TTL, &self.file_attr(ino.0, &attrs))
                }
                Ok(_) => reply.error(fuser::Errno::ENOENT),
                Err(e) => reply.error(to_errno(&e)),
            }
            return;
        }
        if let Some(node) = self.nodes.get(&InodeId(ino.0)) {
            match node.value() {
                Node::Dir(_) => reply.attr(&ATTR_TTL, &self.dir_attr(ino.0)),
                Node::Symlink { target, .. } => {
                    reply.attr(&ATTR_TTL, &self.symlink_attr(ino.0, target))
                }
                Node::File(_) => unreachable!("handled above"),
            }
            return;
        }
        reply.error(fuser::Errno::ENOENT);
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<fuser::FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<fuser::BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        let Some(file) = self.file_node(InodeId(ino.0)) else {
            reply.error(fuser::Errno::ENOENT);
            return;
        };
        let cancel = CancellationToken::new();
        if let Some(n) = size {
            if let Err(e) = self.rt.block_on(file.truncate(n as i64, &cancel)) {
                reply.error(to_errno(&e));
                return;
            }
        }
        match self.rt.block_on(file.attributes()) {
            Ok(attrs) => reply.attr(&ATTR_TTL, &self.file_attr(ino.0, &attrs)),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn readlink(&self, _req: &Request, ino: INodeNo, reply: ReplyData) {
        match self.nodes.get(&InodeId(ino.0)).as_deref() {
            Some(Node::Symlink { target, .. }) => reply.data(target.as_bytes()),
            _ => reply.error(fuser::Errno::EINVAL),
        }
    }

    fn mkdir(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(dir) = self.dir_node(InodeId(parent.0)) else {
            reply.error(fuser::Errno::ENOTDIR);
            return;
        };
        let name = name.to_string_lossy().into_owned();
        match self.rt.block_on(dir.create_child_dir(&name)) {
            Ok(record) => {
                let generation = record.generation;
                let ino = self.get_or_assign(InodeId(parent.0), &name, record);
                reply.entry(&ATTR_TTL, &self.dir_attr(ino.0), generation);
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn symlink(
        &self,
        _req: &Request,
        parent: INodeNo,
        link_name: &OsStr,
        target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        let Some(dir) = self.dir_node(InodeId(parent.0)) else {
            reply.error(fuser::Errno::ENOTDIR);
            return;
        };
        let name = link_name.to_string_lossy().into_owned();
        let target = target.to_string_lossy().into_owned();
        match self.rt.block_on(dir.create_child_symlink(&name, &target)) {
            Ok(record) => {
                let generation = record.generation;
                let ino = self.get_or_assign(InodeId(parent.0), &name, record);
                reply.entry(&ATTR_TTL, &self.symlink_attr(ino.0, &target), generation);
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(dir) = self.dir_node(InodeId(parent.0)) else {
            reply.error(fuser::Errno::ENOTDIR);
            return;
        };
        let name = name.to_string_lossy().into_owned();
        match self.rt.block_on(dir.create_child_file(&name)) {
            Ok(record) => {
                let generation = record.generation;
                let ino = self.get_or_assign(InodeId(parent.0), &name, record);
                if let Some(file) = self.file_node(ino) {
                    file.inc_lookup();
                }
                let attrs = FileAttributes { size: 0, mtime: None, nlink: 1, unlinked: None };
                reply.created(
                    &ATTR_TTL,
                    &self.file_attr(ino.0, &attrs),
                    generation,
                    fuser::FileHandle(ino.0),
                    FopenFlags::empty(),
                );
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let Some(dir) = self.dir_node(InodeId(parent.0)) else {
            reply.error(fuser::Errno::ENOTDIR);
            return;
        };
        let name_s = name.to_string_lossy().into_owned();
        match self.rt.block_on(dir.delete_child_file(&name_s)) {
            Ok(()) => {
                if let Some((_, id)) = self.dentries.remove(&(InodeId(parent.0), name_s)) {
                    if let Some((_, Node::File(file))) = self.nodes.remove(&id) {
                        self.rt.block_on(file.destroy());
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        let Some(dir) = self.dir_node(InodeId(parent.0)) else {
            reply.error(fuser::Errno::ENOTDIR);
            return;
        };
        let name_s = name.to_string_lossy().into_owned();
        match self.rt.block_on(dir.delete_child_dir(&name_s)) {
            Ok(()) => {
                self.dentries.remove(&(InodeId(parent.0), name_s));
                reply.ok();
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn open(&self, _req: &Request, _ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        reply.opened(fuser::FileHandle(_ino.0), FopenFlags::empty());
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: fuser::FileHandle,
        offset: u64,
        size: u32,
        _read_flags: fuser::ReadFlags,
        _flags: u32,
        _lock_owner: Option<fuser::LockOwner>,
        reply: ReplyData,
    ) {
        let Some(file) = self.file_node(InodeId(ino.0)) else {
            reply.error(fuser::Errno::EBADF);
            return;
        };
        let mut buf = vec![0u8; size as usize];
        let cancel = CancellationToken::new();
        match self
            .rt
            .block_on(file.read(&mut buf, offset as i64, &cancel))
        {
            Ok(n) => {
                buf.truncate(n);
                reply.data(&buf);
            }
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: fuser::FileHandle,
        offset: i64,
        data: &[u8],
        _write_flags: fuser::WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        reply: ReplyWrite,
    ) {
        let Some(file) = self.file_node(InodeId(ino.0)) else {
            reply.error(fuser::Errno::EBADF);
            return;
        };
        let cancel = CancellationToken::new();
        match self.rt.block_on(file.write(data, offset, &cancel)) {
            Ok(()) => reply.written(data.len() as u32),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn flush(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: fuser::FileHandle,
        _lock_owner: fuser::LockOwner,
        reply: ReplyEmpty,
    ) {
        let Some(file) = self.file_node(InodeId(ino.0)) else {
            reply.ok();
            return;
        };
        let cancel = CancellationToken::new();
        match self.rt.block_on(file.sync(&cancel)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn fsync(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: fuser::FileHandle,
        _datasync: bool,
        reply: ReplyEmpty,
    ) {
        let Some(file) = self.file_node(InodeId(ino.0)) else {
            reply.ok();
            return;
        };
        let cancel = CancellationToken::new();
        match self.rt.block_on(file.sync(&cancel)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(to_errno(&e)),
        }
    }

    fn release(
        &self,
        _req: &Request,
        _ino: INodeNo,
        _fh: fuser::FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<fuser::LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn opendir(&self, _req: &Request, _ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        reply.opened(fuser::FileHandle(_ino.0), FopenFlags::empty());
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        fh: fuser::FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        let Some(dir) = self.dir_node(InodeId(ino.0)) else {
            reply.error(fuser::Errno::ENOTDIR);
            return;
        };
        if !self.dir_handles.contains_key(&fh.0) {
            match self.rt.block_on(self.snapshot_dir(&dir)) {
                Ok(entries) => {
                    self.dir_handles.insert(fh.0, entries);
                }
                Err(e) => {
                    reply.error(to_errno(&e));
                    return;
                }
            }
        }
        let entries = self.dir_handles.get(&fh.0).unwrap();

        let mut rows: Vec<(u64, FileType, String)> = vec![
            (ino.0, FileType::Directory, ".".to_string()),
            (ino.0, FileType::Directory, "..".to_string()),
        ];
        for e in entries.value().iter() {
            let child_ino = self.get_or_assign(InodeId(ino.0), &e.name, e.record.clone());
            let kind = match e.kind {
                ChildKind::Dir | ChildKind::Implicit => FileType::Directory,
                ChildKind::File => FileType::RegularFile,
                ChildKind::Symlink => FileType::Symlink,
            };
            rows.push((child_ino.0, kind, e.name.clone()));
        }

        for (i, (row_ino, kind, name)) in rows.into_iter().enumerate().skip(offset as usize) {
            let next_offset = (i + 1) as i64;
            if reply.add(row_ino, next_offset, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: fuser::FileHandle,
        _flags: OpenFlags,
        reply: ReplyEmpty,
    ) {
        self.dir_handles.remove(&fh.0);
        reply.ok();
    }

    fn statfs(&self, _req: &Request, _ino: INodeNo, reply: ReplyStatfs) {
        reply.statfs(u64::MAX, u64::MAX, u64::MAX, u64::MAX, u64::MAX, 4096, 255, 4096);
    }
}
