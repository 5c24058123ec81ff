//! Persistent keyring store: the sole writer of keyring state.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::types::{Keyring, RotationEvent, KEYRING_VERSION};

/// Owns the two file paths backing keyring state and mediates every read and
/// write against them.
pub struct KeyringStore {
    state_path: PathBuf,
    human_log_path: PathBuf,
}

/// Advisory lock held for the duration of a read-modify-write cycle. This
/// narrows the race between concurrent invocations; it does not eliminate it.
struct AdvisoryLock {
    lock_path: PathBuf,
    held: bool,
}

impl AdvisoryLock {
    fn acquire(state_path: &Path) -> Self {
        let lock_path = sibling_path(state_path, "lock");
        let held = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .is_ok();
        if !held {
            tracing::debug!(path = %lock_path.display(), "advisory lock already held, proceeding anyway");
        }
        Self { lock_path, held }
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        if self.held {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

impl KeyringStore {
    #[must_use]
    pub fn new(state_path: PathBuf, human_log_path: PathBuf) -> Self {
        Self {
            state_path,
            human_log_path,
        }
    }

    /// Load the keyring, resetting to a fresh default on any read or parse
    /// failure, or on a version mismatch. Never returns an error: a corrupt
    /// state file means keys get rediscovered on the next sync, not a crash.
    #[must_use]
    pub fn load(&self) -> Keyring {
        let contents = match fs::read_to_string(&self.state_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(path = %self.state_path.display(), error = %e, "keyring state unreadable, using default");
                return Keyring::default();
            }
        };

        match serde_json::from_str::<Keyring>(&contents) {
            Ok(keyring) if keyring.version == KEYRING_VERSION => keyring,
            Ok(keyring) => {
                tracing::debug!(
                    found_version = keyring.version,
                    expected_version = KEYRING_VERSION,
                    "keyring version mismatch, resetting to default"
                );
                Keyring::default()
            }
            Err(e) => {
                tracing::debug!(path = %self.state_path.display(), error = %e, "keyring state malformed, using default");
                Keyring::default()
            }
        }
    }

    /// Persist `keyring` with an atomic write-temp-then-rename. A failure is
    /// logged but never propagated; callers treat `save` as best-effort.
    pub fn save(&self, keyring: &Keyring) {
        let _lock = AdvisoryLock::acquire(&self.state_path);

        if let Err(e) = self.write_atomic(&self.state_path, keyring) {
            tracing::error!(path = %self.state_path.display(), error = %e, "failed to persist keyring state");
        }
    }

    /// Prepend `event` to the log (trimmed to `MAX_LOG_ENTRIES` by
    /// [`Keyring::push_event`]) and best-effort append a human-readable line.
    /// A human-log write failure never fails the caller.
    pub fn append_event(&self, keyring: &mut Keyring, event: RotationEvent) {
        let line = human_log_line(&event);
        keyring.push_event(event);
        self.write_human_log_line(&line);
    }

    /// Like [`Self::append_event`], but the human-readable line is not
    /// written yet — only the in-memory event is pushed. The returned line
    /// must be passed to [`Self::write_human_log_line`] once the caller's
    /// persistence has succeeded, so a `key_switched` entry never shows up in
    /// the human log ahead of the state file that would back it up.
    #[must_use]
    pub fn append_event_deferred(&self, keyring: &mut Keyring, event: RotationEvent) -> String {
        let line = human_log_line(&event);
        keyring.push_event(event);
        line
    }

    /// Best-effort append of an already-rendered human log line. A failure is
    /// logged but never propagated.
    pub fn write_human_log_line(&self, line: &str) {
        if let Err(e) = self.append_human_log(line) {
            tracing::debug!(path = %self.human_log_path.display(), error = %e, "failed to append human log line");
        }
    }

    fn write_atomic(&self, path: &Path, keyring: &Keyring) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let payload = serde_json::to_vec_pretty(keyring)?;
        let tmp_path = sibling_path(path, "tmp");
        {
            let mut tmp_file = fs::File::create(&tmp_path)?;
            tmp_file.write_all(&payload)?;
            tmp_file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    }

    fn append_human_log(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.human_log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.human_log_path)?;
        writeln!(file, "{line}")
    }
}

fn sibling_path(path: &Path, extension_suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push('.');
    name.push_str(extension_suffix);
    path.with_file_name(name)
}

fn human_log_line(event: &RotationEvent) -> String {
    let timestamp = chrono::DateTime::<Utc>::from_timestamp_millis(event.timestamp)
        .unwrap_or_else(Utc::now)
        .to_rfc3339();
    let key_prefix = event
        .key_id
        .as_deref()
        .map(|id| &id[..id.len().min(8)])
        .unwrap_or("-");
    format!(
        "{timestamp} {:?} key={key_prefix} reason={}",
        event.event,
        event.reason.as_deref().unwrap_or("-")
    )
}
