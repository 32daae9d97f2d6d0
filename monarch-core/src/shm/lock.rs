//! CrossProcessLock - named mutual exclusion over a shared memory object.
//!
//! Every process opens `/dev/shm/<name>` through `shm_open` and takes an
//! exclusive `flock(2)` on its own descriptor. The address depends on the
//! lock name only, so every process of a user agrees on it whatever its
//! environment. The kernel drops the lock when the holder exits, so a
//! crashed holder never wedges the other instances.

use std::fs::File;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg, OFlag};
use nix::sys::mman::shm_open;
use nix::sys::stat::Mode;

use crate::error::LockError;

/// Named lock shared by all processes of one user.
///
/// The object is never unlinked: removing it while another process holds
/// it would let the next opener lock a different object.
#[derive(Debug)]
pub struct CrossProcessLock {
    /// Lock name (`<lock-prefix>_<identity>`).
    name: String,
    /// Open handle to the lock object.
    file: File,
}

/// Held lock. Dropping it releases the lock.
pub struct LockGuard<'a> {
    lock: &'a CrossProcessLock,
    _flock: Flock<File>,
}

impl CrossProcessLock {
    /// Open (creating if needed) the lock object named `name`.
    pub fn open(name: &str) -> Result<Self, LockError> {
        if name.is_empty() || name.contains('/') {
            return Err(LockError::InvalidName {
                name: name.to_string(),
            });
        }

        let fd = shm_open(
            format!("/{}", name).as_str(),
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|errno| LockError::OpenFailed {
            name: name.to_string(),
            source: errno,
        })?;

        tracing::debug!(name = %name, "Opened cross-process lock");

        Ok(Self {
            name: name.to_string(),
            file: File::from(fd),
        })
    }

    /// Get the lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the lock is held.
    pub fn acquire(&self) -> Result<LockGuard<'_>, LockError> {
        loop {
            match Flock::lock(self.handle()?, FlockArg::LockExclusive) {
                Ok(flock) => return Ok(self.guard(flock)),
                Err((_, Errno::EINTR)) => continue,
                Err((_, errno)) => return Err(self.acquire_failed(errno)),
            }
        }
    }

    /// Take the lock only if it is free right now.
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub fn try_acquire(&self) -> Result<Option<LockGuard<'_>>, LockError> {
        match Flock::lock(self.handle()?, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(self.guard(flock))),
            Err((_, Errno::EWOULDBLOCK)) => Ok(None),
            Err((_, errno)) => Err(self.acquire_failed(errno)),
        }
    }

    fn handle(&self) -> Result<File, LockError> {
        self.file.try_clone().map_err(|e| LockError::AcquireFailed {
            name: self.name.clone(),
            reason: format!("dup failed: {}", e),
        })
    }

    fn guard(&self, flock: Flock<File>) -> LockGuard<'_> {
        tracing::trace!(name = %self.name, "Lock acquired");
        LockGuard {
            lock: self,
            _flock: flock,
        }
    }

    fn acquire_failed(&self, errno: Errno) -> LockError {
        LockError::AcquireFailed {
            name: self.name.clone(),
            reason: format!("flock failed: {}", errno),
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        tracing::trace!(name = %self.lock.name, "Lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nix::sys::mman::shm_unlink;

    /// Unique lock name, removed again when dropped.
    struct TestName(String);

    impl TestName {
        fn new(tag: &str) -> Self {
            Self(format!("MonarchLockTest_{}_{}", tag, std::process::id()))
        }
    }

    impl Drop for TestName {
        fn drop(&mut self) {
            let _ = shm_unlink(format!("/{}", self.0).as_str());
        }
    }

    #[test]
    fn test_lock_object_created() {
        let name = TestName::new("created");
        let lock = CrossProcessLock::open(&name.0).unwrap();
        assert_eq!(lock.name(), name.0);
        assert!(std::path::Path::new("/dev/shm").join(&name.0).exists());
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(matches!(
            CrossProcessLock::open(""),
            Err(LockError::InvalidName { .. })
        ));
        assert!(matches!(
            CrossProcessLock::open("a/b"),
            Err(LockError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_try_acquire_contended() {
        let name = TestName::new("contended");
        let a = CrossProcessLock::open(&name.0).unwrap();
        let b = CrossProcessLock::open(&name.0).unwrap();

        let held = a.try_acquire().unwrap();
        assert!(held.is_some());
        assert!(b.try_acquire().unwrap().is_none());

        drop(held);
        assert!(b.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_same_name_excludes_other_handles() {
        let name = TestName::new("cwdfree");
        let a = CrossProcessLock::open(&name.0).unwrap();
        let _held = a.acquire().unwrap();

        // Another thread opens its own handle from the name alone.
        let other = name.0.clone();
        let free = std::thread::spawn(move || {
            let b = CrossProcessLock::open(&other).unwrap();
            let acquired = b.try_acquire().unwrap().is_some();
            acquired
        })
        .join()
        .unwrap();
        assert!(!free);
    }

    #[test]
    fn test_distinct_names_do_not_contend() {
        let first = TestName::new("first");
        let second = TestName::new("second");
        let a = CrossProcessLock::open(&first.0).unwrap();
        let b = CrossProcessLock::open(&second.0).unwrap();

        let _held = a.acquire().unwrap();
        assert!(b.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let name = TestName::new("wait");
        let a = CrossProcessLock::open(&name.0).unwrap();
        let held = a.acquire().unwrap();

        let other = name.0.clone();
        let waiter = std::thread::spawn(move || {
            let b = CrossProcessLock::open(&other).unwrap();
            let start = std::time::Instant::now();
            let _guard = b.acquire().unwrap();
            start.elapsed()
        });

        std::thread::sleep(std::time::Duration::from_millis(100));
        drop(held);

        let waited = waiter.join().unwrap();
        assert!(waited >= std::time::Duration::from_millis(50));
    }
}
