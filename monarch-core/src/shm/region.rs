//! SharedRegion - POSIX named shared memory used for leader election.
//!
//! The process whose `shm_open(O_CREAT | O_EXCL)` succeeds is the leader;
//! everyone else finds the region already there and maps it as a follower.
//! Byte 0 is the pending-request flag, the rest is reserved.
//!
//! Named shared memory outlives its creator, so the leader also holds a
//! shared `flock` on the region descriptor for its lifetime. A region whose
//! descriptor can be locked exclusively has no live leader and is reclaimed.
//! All unsafe operations are encapsulated here.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use crate::error::SharedMemoryError;
use crate::role::Role;
use crate::shm::LockGuard;

/// Outcome of opening an existing region during election.
enum Existing {
    /// A leader is alive and the region is mapped.
    Live(SharedRegion),
    /// No leader holds the region.
    Stale,
    /// The region disappeared between the create and open attempts.
    Vanished,
}

/// What a read-only probe found under a region name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeaderStatus {
    /// No region exists; the next starter becomes leader.
    Absent,
    /// A region exists but its leader is gone; the next starter reclaims it.
    Stale,
    /// A leader is running.
    Alive {
        /// Whether a new-session request is waiting for the next poll.
        pending: bool,
    },
}

/// A mapped shared region and the role its creation outcome assigned.
///
/// Owns its mapping and descriptor and releases both on drop. Giving up the
/// name is a separate, lock-guarded step ([`SharedRegion::resign`]).
pub struct SharedRegion {
    /// Region name (`<region-prefix>_<identity>`), without the leading `/`.
    name: String,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapping in bytes.
    size: usize,
    /// Descriptor of the shared memory object.
    fd: i32,
    /// Role decided by the create-vs-exists outcome.
    role: Role,
}

// SAFETY: SharedRegion owns its mapping; moving it between threads is sound.
unsafe impl Send for SharedRegion {}

// SAFETY: shared access only goes through the atomic flag view.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Minimum region size: the flag byte.
    pub const MIN_SIZE: usize = 1;

    /// Maximum region size (1 MB).
    pub const MAX_SIZE: usize = 1024 * 1024;

    /// Default region size.
    pub const DEFAULT_SIZE: usize = 4096;

    /// Create the region or open the existing one.
    ///
    /// Creation assigns [`Role::Leader`] and zero-fills the whole buffer;
    /// finding a live region assigns [`Role::Follower`] and writes nothing.
    /// The election lock must be held for the whole call.
    ///
    /// # Errors
    /// Returns SharedMemoryError if the region cannot be created, opened or
    /// mapped. Every descriptor opened along the way is closed first.
    pub fn acquire(
        name: &str,
        size: usize,
        _election: &LockGuard<'_>,
    ) -> Result<(Self, Role), SharedMemoryError> {
        if !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&size) {
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!(
                    "Size {} is outside {}..={}",
                    size,
                    Self::MIN_SIZE,
                    Self::MAX_SIZE
                ),
            });
        }

        let c_name = shm_name(name)?;

        // One reclaim of a stale region, then one more creation attempt.
        for _ in 0..2 {
            if let Some(region) = Self::create(name, &c_name, size)? {
                return Ok((region, Role::Leader));
            }

            match Self::open_existing(name, &c_name)? {
                Existing::Live(region) => return Ok((region, Role::Follower)),
                Existing::Stale => {
                    tracing::warn!(name = %name, "Reclaiming shared memory region left by a dead leader");
                    // SAFETY: c_name is a valid CString
                    if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
                        let errno = io::Error::last_os_error();
                        if errno.raw_os_error() != Some(libc::ENOENT) {
                            return Err(SharedMemoryError::UnlinkFailed {
                                name: name.to_string(),
                                reason: errno.to_string(),
                            });
                        }
                    }
                }
                Existing::Vanished => {}
            }
        }

        Err(SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: "Region could neither be created nor opened".to_string(),
        })
    }

    /// Inspect the region without electing or writing anything.
    /// The election lock must be held so the probe never races a creation.
    pub fn probe(name: &str, _election: &LockGuard<'_>) -> Result<LeaderStatus, SharedMemoryError> {
        let c_name = shm_name(name)?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd < 0 {
            let errno = io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::ENOENT) {
                return Ok(LeaderStatus::Absent);
            }
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", errno),
            });
        }

        let status = match leader_alive(fd) {
            Ok(false) => Ok(LeaderStatus::Stale),
            Ok(true) => region_len(fd)
                .and_then(|len| {
                    // SAFETY: fd is valid, len is the object's real size
                    let ptr = unsafe {
                        libc::mmap(
                            std::ptr::null_mut(),
                            len,
                            libc::PROT_READ,
                            libc::MAP_SHARED,
                            fd,
                            0,
                        )
                    };
                    if ptr == libc::MAP_FAILED {
                        return Err(io::Error::last_os_error());
                    }
                    // SAFETY: the mapping is at least one byte long
                    let flag = unsafe { (*(ptr as *const AtomicU8)).load(Ordering::Acquire) };
                    // SAFETY: ptr and len come from the mmap above
                    unsafe { libc::munmap(ptr, len) };
                    Ok(LeaderStatus::Alive { pending: flag != 0 })
                })
                .map_err(|e| SharedMemoryError::MapFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) => Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                reason: format!("flock failed: {}", e),
            }),
        };

        // SAFETY: fd was opened above; closing drops any probe lock
        unsafe { libc::close(fd) };

        status
    }

    /// Try to create the region exclusively. `Ok(None)` means it already exists.
    fn create(name: &str, c_name: &CString, size: usize) -> Result<Option<Self>, SharedMemoryError> {
        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            let errno = io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EEXIST) {
                return Ok(None);
            }
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", errno),
            });
        }

        // Undo a half-built region so the name is not left behind.
        let abandon = |reason: String| {
            // SAFETY: fd and c_name are valid
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            reason
        };

        // SAFETY: fd is a valid file descriptor
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } < 0 {
            let errno = io::Error::last_os_error();
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: abandon(format!("ftruncate failed: {}", errno)),
            });
        }

        let ptr = match map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                return Err(SharedMemoryError::MapFailed {
                    name: name.to_string(),
                    reason: abandon(format!("mmap failed: {}", e)),
                })
            }
        };

        // Liveness marker: held until this process closes the descriptor.
        // SAFETY: fd is a valid file descriptor
        if unsafe { libc::flock(fd, libc::LOCK_SH | libc::LOCK_NB) } < 0 {
            let errno = io::Error::last_os_error();
            // SAFETY: ptr and size come from map()
            unsafe { libc::munmap(ptr.as_ptr() as *mut libc::c_void, size) };
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: abandon(format!("flock failed: {}", errno)),
            });
        }

        // Zero-initialize the whole region
        // SAFETY: ptr is valid for size bytes and nobody else can have mapped it yet
        unsafe {
            std::ptr::write_bytes(ptr.as_ptr(), 0, size);
        }

        tracing::debug!(name = %name, size = size, "Created shared memory region");

        Ok(Some(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            role: Role::Leader,
        }))
    }

    /// Open a region some other process created.
    fn open_existing(name: &str, c_name: &CString) -> Result<Existing, SharedMemoryError> {
        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            let errno = io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::ENOENT) {
                return Ok(Existing::Vanished);
            }
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", errno),
            });
        }

        let close = || {
            // SAFETY: fd was opened above
            unsafe { libc::close(fd) };
        };

        match leader_alive(fd) {
            Ok(true) => {}
            Ok(false) => {
                close();
                return Ok(Existing::Stale);
            }
            Err(e) => {
                close();
                return Err(SharedMemoryError::OpenFailed {
                    name: name.to_string(),
                    reason: format!("flock failed: {}", e),
                });
            }
        }

        let size = match region_len(fd) {
            Ok(size) => size,
            Err(e) => {
                close();
                return Err(SharedMemoryError::OpenFailed {
                    name: name.to_string(),
                    reason: format!("fstat failed: {}", e),
                });
            }
        };
        if size < Self::MIN_SIZE {
            close();
            return Err(SharedMemoryError::SizeMismatch {
                name: name.to_string(),
                actual: size,
                min: Self::MIN_SIZE,
            });
        }

        let ptr = match map(fd, size) {
            Ok(ptr) => ptr,
            Err(e) => {
                close();
                return Err(SharedMemoryError::MapFailed {
                    name: name.to_string(),
                    reason: format!("mmap failed: {}", e),
                });
            }
        };

        tracing::debug!(name = %name, size = size, "Opened shared memory region");

        Ok(Existing::Live(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            role: Role::Follower,
        }))
    }

    /// Get the name of this region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the size of the mapping.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Role assigned when this region was acquired.
    pub fn role(&self) -> Role {
        self.role
    }

    fn flag(&self) -> &AtomicU8 {
        // SAFETY: the mapping is at least MIN_SIZE (1) bytes and lives as long as self;
        // AtomicU8 has the same layout as u8
        unsafe { &*(self.ptr.as_ptr() as *const AtomicU8) }
    }

    /// Read the pending-request flag without any lock.
    pub fn read_flag(&self) -> u8 {
        self.flag().load(Ordering::Acquire)
    }

    /// Write the pending-request flag. Only legal while holding the lock.
    pub fn write_flag(&self, value: u8, _held: &LockGuard<'_>) {
        self.flag().store(value, Ordering::Release);
    }

    /// Give up leadership: remove the region name and drop the liveness
    /// marker. The mapping stays valid until this value is dropped.
    /// Only the leader resigns, and only while holding the lock.
    pub fn resign(&self, _held: &LockGuard<'_>) -> Result<(), SharedMemoryError> {
        debug_assert_eq!(self.role, Role::Leader);

        let c_name = shm_name(&self.name)?;
        // SAFETY: c_name is a valid CString
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            let errno = io::Error::last_os_error();
            if errno.raw_os_error() != Some(libc::ENOENT) {
                return Err(SharedMemoryError::UnlinkFailed {
                    name: self.name.clone(),
                    reason: errno.to_string(),
                });
            }
        }

        // SAFETY: fd is open for the life of self
        unsafe { libc::flock(self.fd, libc::LOCK_UN) };

        tracing::debug!(name = %self.name, "Resigned shared memory region");
        Ok(())
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size were set during acquisition
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            tracing::error!(
                name = %self.name,
                error = %io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }

        // Closing also drops the leader's liveness lock.
        // SAFETY: fd was opened during acquisition
        unsafe { libc::close(self.fd) };
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("role", &self.role)
            .finish()
    }
}

fn shm_name(name: &str) -> Result<CString, SharedMemoryError> {
    if name.is_empty() || name.contains('/') {
        return Err(SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: "Name must be non-empty and contain no '/'".to_string(),
        });
    }

    CString::new(format!("/{}", name)).map_err(|e| SharedMemoryError::CreateFailed {
        name: name.to_string(),
        reason: format!("Invalid name: {}", e),
    })
}

fn map(fd: i32, size: usize) -> io::Result<NonNull<u8>> {
    // SAFETY: fd is valid, size is non-zero, offset 0 is valid
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    NonNull::new(ptr as *mut u8).ok_or_else(|| io::Error::other("mmap returned null"))
}

/// A live leader holds a shared lock, so an exclusive try-lock fails.
/// The probe lock, if taken, is released before returning.
fn leader_alive(fd: i32) -> io::Result<bool> {
    // SAFETY: fd is a valid file descriptor
    if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        // SAFETY: fd is a valid file descriptor
        unsafe { libc::flock(fd, libc::LOCK_UN) };
        return Ok(false);
    }

    let errno = io::Error::last_os_error();
    if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(true)
    } else {
        Err(errno)
    }
}

fn region_len(fd: i32) -> io::Result<usize> {
    // SAFETY: zeroed stat is a valid out-parameter
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: fd is valid and st is writable
    if unsafe { libc::fstat(fd, &mut st) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(st.st_size as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::CrossProcessLock;

    /// Election lock for one test; its object is removed on drop.
    struct TestLock(CrossProcessLock);

    impl TestLock {
        fn new(tag: &str) -> Self {
            let name = format!("MonarchRegionTestMutex_{}_{}", tag, std::process::id());
            Self(CrossProcessLock::open(&name).unwrap())
        }
    }

    impl Drop for TestLock {
        fn drop(&mut self) {
            if let Ok(name) = CString::new(format!("/{}", self.0.name())) {
                // SAFETY: name is a valid CString
                unsafe { libc::shm_unlink(name.as_ptr()) };
            }
        }
    }

    fn unique(tag: &str) -> String {
        use std::sync::atomic::AtomicUsize;
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        format!(
            "MonarchRegionTest_{}_{}_{}",
            tag,
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn test_size_validation() {
        let lock = TestLock::new("size");
        let guard = lock.0.acquire().unwrap();

        assert!(SharedRegion::acquire(&unique("zero"), 0, &guard).is_err());
        assert!(SharedRegion::acquire(&unique("big"), SharedRegion::MAX_SIZE + 1, &guard).is_err());
    }

    #[test]
    fn test_invalid_names() {
        let lock = TestLock::new("names");
        let guard = lock.0.acquire().unwrap();

        assert!(SharedRegion::acquire("", 4096, &guard).is_err());
        assert!(SharedRegion::acquire("a/b", 4096, &guard).is_err());
    }

    #[test]
    fn test_create_then_open() {
        let lock = TestLock::new("roles");
        let guard = lock.0.acquire().unwrap();
        let name = unique("roles");

        let (leader, role) = SharedRegion::acquire(&name, 4096, &guard).unwrap();
        assert_eq!(role, Role::Leader);
        assert_eq!(leader.read_flag(), 0);

        let (follower, role) = SharedRegion::acquire(&name, 4096, &guard).unwrap();
        assert_eq!(role, Role::Follower);
        assert_eq!(follower.size(), 4096);

        follower.write_flag(1, &guard);
        assert_eq!(leader.read_flag(), 1);

        leader.resign(&guard).unwrap();
    }

    #[test]
    fn test_follower_maps_real_size() {
        let lock = TestLock::new("realsize");
        let guard = lock.0.acquire().unwrap();
        let name = unique("size");

        let (leader, _) = SharedRegion::acquire(&name, 64, &guard).unwrap();
        let (follower, role) = SharedRegion::acquire(&name, 8192, &guard).unwrap();
        assert_eq!(role, Role::Follower);
        assert_eq!(follower.size(), 64);

        leader.resign(&guard).unwrap();
    }

    #[test]
    fn test_probe_states() {
        let lock = TestLock::new("probe");
        let guard = lock.0.acquire().unwrap();
        let name = unique("probe");

        assert_eq!(SharedRegion::probe(&name, &guard).unwrap(), LeaderStatus::Absent);

        let (leader, _) = SharedRegion::acquire(&name, 4096, &guard).unwrap();
        assert_eq!(
            SharedRegion::probe(&name, &guard).unwrap(),
            LeaderStatus::Alive { pending: false }
        );

        leader.write_flag(1, &guard);
        assert_eq!(
            SharedRegion::probe(&name, &guard).unwrap(),
            LeaderStatus::Alive { pending: true }
        );

        leader.resign(&guard).unwrap();
        drop(leader);
        assert_eq!(SharedRegion::probe(&name, &guard).unwrap(), LeaderStatus::Absent);
    }

    #[test]
    fn test_dropped_leader_without_resign_is_reclaimed() {
        let lock = TestLock::new("stale");
        let guard = lock.0.acquire().unwrap();
        let name = unique("stale");

        let (leader, _) = SharedRegion::acquire(&name, 4096, &guard).unwrap();
        leader.write_flag(1, &guard);
        drop(leader);

        assert_eq!(SharedRegion::probe(&name, &guard).unwrap(), LeaderStatus::Stale);

        let (next, role) = SharedRegion::acquire(&name, 4096, &guard).unwrap();
        assert_eq!(role, Role::Leader);
        assert_eq!(next.read_flag(), 0);

        next.resign(&guard).unwrap();
    }

    #[test]
    fn test_resign_hands_over_before_drop() {
        let lock = TestLock::new("resign");
        let guard = lock.0.acquire().unwrap();
        let name = unique("resign");

        let (old, _) = SharedRegion::acquire(&name, 4096, &guard).unwrap();
        old.write_flag(1, &guard);
        old.resign(&guard).unwrap();

        // The old mapping is still usable, but the name is free again.
        assert_eq!(old.read_flag(), 1);
        assert_eq!(SharedRegion::probe(&name, &guard).unwrap(), LeaderStatus::Absent);

        let (next, role) = SharedRegion::acquire(&name, 4096, &guard).unwrap();
        assert_eq!(role, Role::Leader);
        assert_eq!(next.read_flag(), 0);

        next.resign(&guard).unwrap();
    }
}
