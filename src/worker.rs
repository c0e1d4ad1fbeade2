//! Worker-process frame: pidfile, epitaph, restart guard.
//!
//! The manager process spawns workers and restarts them on crash,
//! rate-guarded so a deterministic startup crash cannot spin: by
//! default at most 3 restarts within 5 minutes, after which the
//! manager gives up. A worker that dies on purpose leaves a
//! `NoRestart` epitaph and is not restarted at all.
//!
//! The epitaph file carries a crashed worker's last words; the manager
//! reads it back at shutdown so the cause ends up in the log even when
//! the worker's own stderr is long gone.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{GraphError, GraphResult};

/// Sliding-window restart rate guard.
pub struct RestartGuard {
    window: Duration,
    limit: u32,
    restarts: Vec<Instant>,
}

impl RestartGuard {
    pub fn new(window: Duration, limit: u32) -> RestartGuard {
        RestartGuard {
            window,
            limit,
            restarts: Vec::new(),
        }
    }

    /// Record a crash; `true` means a restart is still allowed.
    pub fn allow_restart(&mut self) -> bool {
        self.allow_restart_at(Instant::now())
    }

    fn allow_restart_at(&mut self, now: Instant) -> bool {
        self.restarts
            .retain(|t| now.duration_since(*t) < self.window);
        if self.restarts.len() as u32 >= self.limit {
            return false;
        }
        self.restarts.push(now);
        true
    }

    pub fn restarts_in_window(&self) -> usize {
        self.restarts.len()
    }
}

impl Default for RestartGuard {
    fn default() -> Self {
        RestartGuard::new(Duration::from_secs(300), 3)
    }
}

/// Pidfile handling. Creating over a pidfile whose process is still
/// alive is a data error; a stale pidfile is adopted.
pub struct Pidfile {
    path: PathBuf,
}

impl Pidfile {
    /// Write our pid, failing if another live process owns the file.
    pub fn create(path: &Path) -> GraphResult<Pidfile> {
        if let Some(existing) = Self::read_pid(path)? {
            if process_alive(existing) {
                return Err(GraphError::Semantics(format!(
                    "pidfile {} already owned by running pid {existing}",
                    path.display()
                )));
            }
            tracing::warn!(pid = existing, "adopting stale pidfile");
        }
        fs::write(path, format!("{}\n", std::process::id()))?;
        Ok(Pidfile {
            path: path.to_path_buf(),
        })
    }

    /// The pid recorded in an existing pidfile, if any.
    pub fn read_pid(path: &Path) -> GraphResult<Option<u32>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(text.trim().parse().ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Is `pid` a live process? Uses `kill -0` through the shell so the
/// check needs no extra dependency.
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Last words of a crashed worker.
pub struct Epitaph;

impl Epitaph {
    pub fn write(path: &Path, text: &str) -> GraphResult<()> {
        fs::write(path, text)?;
        Ok(())
    }

    /// Read and consume the epitaph, if one was left.
    pub fn take(path: &Path) -> GraphResult<Option<String>> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let _ = fs::remove_file(path);
                Ok(Some(text))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
