//! System-wide named mutex
//!
//! The mutex is a zero-length shared-memory object of the mutex name, locked
//! with `flock`. Each `NamedMutex` owns its own open file description, so two
//! handles contend with each other even inside one process. The object is
//! never unlinked by users of the protocol since other processes may hold it.

use crate::error::{ExchangeError, Result};
use crate::shm::{object_mode, object_name};
use rustix::fd::OwnedFd;
use rustix::fs::{flock, FlockOperation};
use rustix::io::Errno;
use rustix::shm::{shm_open, shm_unlink, ShmOFlags};
use std::time::{Duration, Instant};

/// Interval between non-blocking lock attempts during a bounded wait
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a named mutex
pub struct NamedMutex {
    fd: OwnedFd,
    name: String,
}

impl NamedMutex {
    /// Open the named mutex, creating it if it does not exist yet.
    pub fn open(name: &str) -> Result<Self> {
        let object_name = object_name(name)?;
        let fd = shm_open(
            object_name.as_str(),
            ShmOFlags::CREATE | ShmOFlags::RDWR,
            object_mode(),
        )
        .map_err(|e| ExchangeError::allocation(name, e))?;

        Ok(Self {
            fd,
            name: name.to_string(),
        })
    }

    /// Remove the mutex object's name
    pub fn remove(name: &str) -> Result<()> {
        let object_name = object_name(name)?;
        match shm_unlink(object_name.as_str()) {
            Ok(()) | Err(Errno::NOENT) => Ok(()),
            Err(e) => Err(ExchangeError::allocation(name, e)),
        }
    }

    /// Protocol name of the mutex
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Try to acquire the mutex without waiting
    pub fn try_lock(&self) -> Result<Option<MutexGuard<'_>>> {
        match flock(&self.fd, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => Ok(Some(MutexGuard { mutex: self })),
            Err(Errno::WOULDBLOCK) | Err(Errno::INTR) => Ok(None),
            Err(e) => Err(ExchangeError::allocation(&self.name, e)),
        }
    }

    /// Acquire the mutex, waiting at most `timeout`.
    ///
    /// Fails with `LockTimeout` when the bound elapses.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<MutexGuard<'_>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(guard) = self.try_lock()? {
                return Ok(guard);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ExchangeError::LockTimeout {
                    name: self.name.clone(),
                    timeout,
                });
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Held lock on a `NamedMutex`; released on drop
pub struct MutexGuard<'a> {
    mutex: &'a NamedMutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        let _ = flock(&self.mutex.fd, FlockOperation::Unlock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(label: &str) -> String {
        format!("sx_test_mutex_{}_{}", label, std::process::id())
    }

    #[test]
    fn test_open_is_idempotent() {
        let name = unique("open");
        let a = NamedMutex::open(&name).unwrap();
        let b = NamedMutex::open(&name).unwrap();
        assert_eq!(a.name(), b.name());
        NamedMutex::remove(&name).unwrap();
    }

    #[test]
    fn test_handles_exclude_each_other() {
        let name = unique("exclude");
        let a = NamedMutex::open(&name).unwrap();
        let b = NamedMutex::open(&name).unwrap();

        let guard = a.try_lock().unwrap().expect("first lock");
        assert!(b.try_lock().unwrap().is_none());

        drop(guard);
        assert!(b.try_lock().unwrap().is_some());
        NamedMutex::remove(&name).unwrap();
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let name = unique("timeout");
        let a = NamedMutex::open(&name).unwrap();
        let b = NamedMutex::open(&name).unwrap();

        let _guard = a.lock_timeout(Duration::from_millis(100)).unwrap();
        let start = Instant::now();
        let err = b.lock_timeout(Duration::from_millis(30)).err().unwrap();
        assert!(matches!(err, ExchangeError::LockTimeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(30));
        NamedMutex::remove(&name).unwrap();
    }

    #[test]
    fn test_wait_succeeds_after_release() {
        let name = unique("release");
        let a = NamedMutex::open(&name).unwrap();
        let guard = a.lock_timeout(Duration::from_millis(100)).unwrap();

        let waiter_name = name.clone();
        let waiter = std::thread::spawn(move || {
            let b = NamedMutex::open(&waiter_name).unwrap();
            let ok = b.lock_timeout(Duration::from_secs(2)).is_ok();
            ok
        });

        std::thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
        NamedMutex::remove(&name).unwrap();
    }
}
