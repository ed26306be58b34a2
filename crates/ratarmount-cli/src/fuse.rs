//! FUSE bridge.
//!
//! fuser calls back on its session thread with inode numbers. The bridge
//! maps inodes to paths, drives the async engine with `Handle::block_on`
//! and replies with the engine's errno on failure.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fuser::{
    FUSE_ROOT_ID, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, Request,
};
use ratarmount_kernel::{FileAttr, FileHandle, FileType, MountConfig, MountTable, OpenFlags, VfsOps};
use tokio::runtime::Handle;

/// The archive never changes during a session.
const TTL: Duration = Duration::from_secs(3600);

/// Inode ↔ path map. Inodes are never reused within a session.
#[derive(Debug)]
struct InodeTable {
    paths: HashMap<u64, PathBuf>,
    inodes: HashMap<PathBuf, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let root = PathBuf::from("/");
        Self {
            paths: HashMap::from([(FUSE_ROOT_ID, root.clone())]),
            inodes: HashMap::from([(root, FUSE_ROOT_ID)]),
            next: FUSE_ROOT_ID + 1,
        }
    }

    fn path(&self, ino: u64) -> Option<&Path> {
        self.paths.get(&ino).map(PathBuf::as_path)
    }

    fn child(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path(parent).map(|p| p.join(name))
    }

    fn intern(&mut self, path: PathBuf) -> u64 {
        if let Some(&ino) = self.inodes.get(&path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.clone());
        self.inodes.insert(path, ino);
        ino
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

/// `fuser::Filesystem` over a [`MountTable`].
struct ArchiveFuse {
    table: Arc<MountTable>,
    runtime: Handle,
    inodes: InodeTable,
}

fn fuse_kind(kind: FileType) -> fuser::FileType {
    match kind {
        FileType::File => fuser::FileType::RegularFile,
        FileType::Directory => fuser::FileType::Directory,
        FileType::Symlink => fuser::FileType::Symlink,
    }
}

fn fuse_attr(ino: u64, attr: &FileAttr) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind: fuse_kind(attr.kind),
        perm: attr.perm() as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

impl ArchiveFuse {
    fn attr(&mut self, ino: u64, path: &Path) -> Result<fuser::FileAttr, i32> {
        let attr = self
            .runtime
            .block_on(self.table.getattr(path))
            .map_err(|e| e.errno())?;
        Ok(fuse_attr(ino, &attr))
    }
}

impl Filesystem for ArchiveFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.inodes.child(parent, name) else {
            reply.error(libc::ENOENT);
            return;
        };
        // Only paths that exist get an inode.
        let attr = match self.runtime.block_on(self.table.getattr(&path)) {
            Ok(attr) => attr,
            Err(e) => {
                tracing::trace!(path = %path.display(), error = %e, "lookup");
                reply.error(e.errno());
                return;
            }
        };
        let ino = self.inodes.intern(path);
        reply.entry(&TTL, &fuse_attr(ino, &attr), 0);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path(ino).map(Path::to_path_buf) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr(ino, &path) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.runtime.block_on(self.table.readlink(path)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.runtime.block_on(self.table.open(path, OpenFlags(flags))) {
            Ok(fh) => reply.opened(fh.0, 0),
            Err(e) => {
                tracing::debug!(path = %path.display(), flags, error = %e, "open refused");
                reply.error(e.errno());
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        match self
            .runtime
            .block_on(self.table.read(FileHandle(fh), offset, size))
        {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.runtime.block_on(self.table.release(FileHandle(fh))) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.path(ino).map(Path::to_path_buf) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.runtime.block_on(self.table.readdir(&path)) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone());
        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in entries.iter().enumerate().skip(skip) {
            let child_ino = match entry.name.as_str() {
                "." => ino,
                ".." => self.inodes.intern(parent.clone()),
                name => self.inodes.intern(path.join(name)),
            };
            // `add` returns true once the reply buffer is full.
            if reply.add(child_ino, (i + 1) as i64, fuse_kind(entry.kind), &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.runtime.block_on(self.table.statfs()) {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                st.frsize,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn destroy(&mut self) {
        tracing::info!(inodes = self.inodes.len(), "filesystem destroyed");
        self.runtime.block_on(self.table.close());
    }
}

fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let fsname = match config.sources.as_slice() {
        [source] => source.display().to_string(),
        _ => "ratarmount".to_string(),
    };
    vec![
        MountOption::RO,
        MountOption::FSName(fsname),
        MountOption::Subtype("ratarmount".into()),
        MountOption::DefaultPermissions,
    ]
}

/// Mount `table` at `mount_point` and serve until unmounted.
///
/// In the foreground this blocks until the mount point is unmounted
/// externally. Otherwise the session runs on its own thread and Ctrl-C
/// unmounts.
pub fn serve(
    rt: &tokio::runtime::Runtime,
    table: MountTable,
    mount_point: &Path,
    config: &MountConfig,
) -> Result<()> {
    let fs = ArchiveFuse {
        table: Arc::new(table),
        runtime: rt.handle().clone(),
        inodes: InodeTable::new(),
    };
    let options = mount_options(config);
    tracing::info!(
        mount_point = %mount_point.display(),
        sources = config.sources.len(),
        dispatch = ?config.dispatch,
        "mounting"
    );

    if config.foreground {
        fuser::mount2(fs, mount_point, &options)
            .with_context(|| format!("failed to mount at {}", mount_point.display()))?;
    } else {
        let session = fuser::spawn_mount2(fs, mount_point, &options)
            .with_context(|| format!("failed to mount at {}", mount_point.display()))?;
        rt.block_on(tokio::signal::ctrl_c())
            .context("failed to wait for Ctrl-C")?;
        tracing::info!(mount_point = %mount_point.display(), "interrupted, unmounting");
        drop(session);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inode_table() {
        let mut inodes = InodeTable::new();
        assert_eq!(inodes.path(FUSE_ROOT_ID), Some(Path::new("/")));

        let child = inodes.child(FUSE_ROOT_ID, OsStr::new("etc")).unwrap();
        assert_eq!(child, PathBuf::from("/etc"));

        let ino = inodes.intern(child.clone());
        assert_ne!(ino, FUSE_ROOT_ID);
        assert_eq!(inodes.intern(child), ino);
        assert_eq!(inodes.path(ino), Some(Path::new("/etc")));
        assert_eq!(inodes.len(), 2);

        assert!(inodes.child(999, OsStr::new("x")).is_none());
    }

    #[test]
    fn test_attr_conversion() {
        let attr = FileAttr::directory(0o755);
        let converted = fuse_attr(7, &attr);
        assert_eq!(converted.ino, 7);
        assert_eq!(converted.kind, fuser::FileType::Directory);
        assert_eq!(converted.perm, 0o755);
        assert_eq!(converted.nlink, 2);
    }
}
