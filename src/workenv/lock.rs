//! The extraction lock.
//!
//! A lock is a file created with `O_CREAT|O_EXCL` holding the owner's pid.
//! Exactly one process may extract into a given workenv at a time; a lock
//! whose pid no longer runs is stale and reclaimed once. The guard releases
//! on drop so every exit path, including panics, gives the lock back.

use super::paths::WorkenvPaths;
use crate::error::{FlavorError, Result};
use crate::platform::process_running;
use log::{debug, info};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Scoped ownership of `instance/extract/` for the duration of an
/// extraction.
#[derive(Debug)]
pub struct ExtractionLock {
    lock_path: PathBuf,
}

/// Outcome of a lock attempt.
#[derive(Debug)]
pub enum LockAttempt {
    /// This process now owns extraction.
    Acquired(ExtractionLock),
    /// A live process holds the lock.
    Held(u32),
}

impl ExtractionLock {
    /// Try to acquire the lock once, reclaiming a stale one if present.
    pub fn try_acquire(paths: &WorkenvPaths) -> Result<LockAttempt> {
        fs::create_dir_all(paths.extract_dir())?;
        let lock_path = paths.lock_file();

        for attempt in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    file.flush()?;
                    debug!("acquired extraction lock (pid {})", std::process::id());
                    return Ok(LockAttempt::Acquired(ExtractionLock { lock_path }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match read_owner(&lock_path) {
                        Some(pid) if process_running(pid) => {
                            debug!("extraction lock held by live pid {pid}");
                            return Ok(LockAttempt::Held(pid));
                        }
                        Some(pid) => {
                            if attempt == 0 {
                                info!("reclaiming stale lock from dead pid {pid}");
                                let _ = fs::remove_file(&lock_path);
                            }
                        }
                        None => {
                            // Unreadable or garbage content: treat as stale
                            if attempt == 0 {
                                info!("removing unreadable lock file");
                                let _ = fs::remove_file(&lock_path);
                            }
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Lost the race to whoever recreated it after our reclaim
        let pid = read_owner(&lock_path).unwrap_or(0);
        Ok(LockAttempt::Held(pid))
    }

    /// Poll until the lock disappears or the timeout elapses.
    pub fn wait_for_release(paths: &WorkenvPaths, timeout: Duration) -> Result<()> {
        let lock_path = paths.lock_file();
        let deadline = Instant::now() + timeout;
        let mut logged = false;

        while lock_path.exists() {
            if Instant::now() >= deadline {
                let pid = read_owner(&lock_path).unwrap_or(0);
                return Err(FlavorError::LockContention(pid));
            }
            if !logged {
                info!("waiting for another process to finish extraction");
                logged = true;
            }
            thread::sleep(POLL_INTERVAL);
        }

        // Give the holder a beat to finish its completion writes
        thread::sleep(POLL_INTERVAL);
        Ok(())
    }
}

fn read_owner(lock_path: &std::path::Path) -> Option<u32> {
    fs::read_to_string(lock_path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
}

impl Drop for ExtractionLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.lock_path) {
            Ok(()) => debug!("released extraction lock"),
            Err(e) => debug!("failed to remove lock file: {e}"),
        }
    }
}
