//! Process- and thread-scoped advisory locks tied to caller lifetimes.
//!
//! Mirrors the take/release discipline of a classic PackageKit/libhif lock
//! manager: a lock is identified by `(Kind, Mode)`, reentrant per thread, and
//! process-mode locks are additionally backed by a PID file so that other
//! processes on the same host can detect contention.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;

use thiserror::Error;

/// What the lock is protecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    RpmDb,
    Repo,
    Metadata,
    Config,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::RpmDb => "rpmdb",
            Kind::Repo => "repo",
            Kind::Metadata => "metadata",
            Kind::Config => "config",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope a lock is taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Thread,
    Process,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Thread => "thread",
            Mode::Process => "process",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque handle returned by [`Manager::take`]. Does not implement `Clone`
/// so a caller cannot accidentally release the same lock twice.
#[derive(Debug)]
pub struct LockId {
    id: u64,
    kind: Kind,
    mode: Mode,
}

impl LockId {
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

struct Item {
    id: u64,
    owner: ThreadId,
    refcount: u32,
    mode: Mode,
}

/// Manages every live lock for one process. A single `Manager` is meant to be
/// shared (behind an `Arc`) by the whole `Context`.
pub struct Manager {
    lockdir: PathBuf,
    prog: String,
    items: Mutex<HashMap<Kind, Item>>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl Manager {
    pub fn new(lockdir: impl Into<PathBuf>, prog: impl Into<String>) -> Self {
        Self {
            lockdir: lockdir.into(),
            prog: prog.into(),
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Take a lock of the given kind/mode. Reentrant: a second `take` of the
    /// same `(kind, mode)` by the same thread just bumps the refcount.
    pub fn take(&self, kind: Kind, mode: Mode) -> Result<LockId, Error> {
        let this_thread = std::thread::current().id();
        let mut items = self.items.lock().expect("lock manager mutex poisoned");

        if let Some(item) = items.get_mut(&kind) {
            if item.mode == mode && item.owner == this_thread {
                item.refcount += 1;
                return Ok(LockId {
                    id: item.id,
                    kind,
                    mode,
                });
            }
            if mode == Mode::Thread || item.mode == Mode::Thread {
                return Err(Error::Busy {
                    competitor: format!("this process, thread {:?}", item.owner),
                });
            }
        }

        if mode == Mode::Process {
            if let Some(competitor) = self.check_pid_file(kind)? {
                return Err(Error::Busy { competitor });
            }
            self.write_pid_file(kind)?;
        }

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        items.insert(
            kind,
            Item {
                id,
                owner: this_thread,
                refcount: 1,
                mode,
            },
        );

        Ok(LockId { id, kind, mode })
    }

    /// Release a previously taken lock. Decrements the refcount; only on the
    /// refcount reaching zero is the PID file (for process-mode locks)
    /// actually removed.
    pub fn release(&self, lock: LockId) -> Result<(), Error> {
        let mut items = self.items.lock().expect("lock manager mutex poisoned");

        let remove = match items.get_mut(&lock.kind) {
            Some(item) if item.id == lock.id => {
                item.refcount -= 1;
                item.refcount == 0
            }
            _ => {
                log::warn!("release() for a lock {} ({}) that isn't held", lock.kind, lock.mode);
                return Ok(());
            }
        };

        if remove {
            items.remove(&lock.kind);
            if lock.mode == Mode::Process {
                let path = self.pid_file_path(lock.kind);
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(Error::Io(e));
                    }
                }
            }
        }

        Ok(())
    }

    /// Process-wide observable bitmask: bit `kind as u32` is set if held.
    pub fn held_mask(&self) -> u32 {
        let items = self.items.lock().expect("lock manager mutex poisoned");
        let mut mask = 0u32;
        for kind in items.keys() {
            mask |= 1 << kind_bit(*kind);
        }
        mask
    }

    fn pid_file_path(&self, kind: Kind) -> PathBuf {
        self.lockdir.join(format!("{}-{}.lock", self.prog, kind))
    }

    /// Returns `Some(competitor description)` if the PID file exists and
    /// names a still-live process; otherwise clears a stale file and returns
    /// `None`.
    fn check_pid_file(&self, kind: Kind) -> Result<Option<String>, Error> {
        let path = self.pid_file_path(kind);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let pid: i32 = match contents.trim().parse() {
            Ok(pid) => pid,
            Err(_) => {
                // Unparseable pidfile; treat as stale.
                let _ = fs::remove_file(&path);
                return Ok(None);
            }
        };

        match cmdline_for_pid(pid) {
            Some(cmdline) => Ok(Some(format!("{cmdline} ({pid})"))),
            None => {
                // Process is gone; the file is stale.
                let _ = fs::remove_file(&path);
                Ok(None)
            }
        }
    }

    fn write_pid_file(&self, kind: Kind) -> Result<(), Error> {
        fs::create_dir_all(&self.lockdir)?;
        let path = self.pid_file_path(kind);
        let pid = std::process::id();
        fs::write(&path, pid.to_string())?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
        Ok(())
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        let items = self.items.lock().expect("lock manager mutex poisoned");
        for (kind, item) in items.iter() {
            log::warn!(
                "lock manager dropped with {} ({}) still held, refcount {} -- leak",
                kind,
                item.mode,
                item.refcount
            );
        }
    }
}

fn kind_bit(kind: Kind) -> u32 {
    match kind {
        Kind::RpmDb => 0,
        Kind::Repo => 1,
        Kind::Metadata => 2,
        Kind::Config => 3,
    }
}

/// Reads `/proc/<pid>/cmdline` and joins the NUL-separated argv with spaces.
/// Returns `None` if the process does not exist.
fn cmdline_for_pid(pid: i32) -> Option<String> {
    let path = format!("/proc/{pid}/cmdline");
    let raw = fs::read(path).ok()?;
    if raw.is_empty() {
        return Some("unknown".to_string());
    }
    let cmdline = raw
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    Some(cmdline)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("lock busy: held by {competitor}")]
    Busy { competitor: String },
    #[error("lock io")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reentrant_thread_lock() {
        let manager = Manager::new(std::env::temp_dir(), "resin-test-reentrant");
        let a = manager.take(Kind::Config, Mode::Thread).unwrap();
        let b = manager.take(Kind::Config, Mode::Thread).unwrap();
        manager.release(a).unwrap();
        assert_ne!(manager.held_mask(), 0);
        manager.release(b).unwrap();
        assert_eq!(manager.held_mask(), 0);
    }

    #[test]
    fn process_lock_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::new(dir.path(), "resin-test-process");
        let lock = manager.take(Kind::Repo, Mode::Process).unwrap();
        let path = dir.path().join("resin-test-process-repo.lock");
        assert!(path.exists());
        manager.release(lock).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn busy_when_held_by_another_thread_kind() {
        let manager = Manager::new(std::env::temp_dir(), "resin-test-busy");
        let _a = manager.take(Kind::Metadata, Mode::Thread).unwrap();

        let result = std::thread::scope(|s| {
            s.spawn(|| manager.take(Kind::Metadata, Mode::Thread)).join().unwrap()
        });

        assert!(matches!(result, Err(Error::Busy { .. })));
    }
}
