//! Sample store - persisted presence log
//!
//! The log is a JSON array of observations, newest first. Every mutation is a
//! whole-file read/modify/write:
//! - an exclusive `flock` on `<log>.lock` serializes writers across processes
//! - the new snapshot goes to `<log>.tmp`, is fsynced, then renamed over the log
//!
//! A reader therefore sees either the previous complete snapshot or the new one.

use crate::error::StayError;
use crate::observation::Observation;
use chrono::{DateTime, FixedOffset};
use nix::fcntl::{Flock, FlockArg};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Storage seam between the sampling loop and the aggregator.
pub trait SampleStore {
    /// Prepend an observation so the newest is always first.
    fn append(&self, observation: Observation) -> Result<(), StayError>;

    /// All observations, newest first.
    fn read_all(&self) -> Result<Vec<Observation>, StayError>;

    /// Drop observations older than `cutoff`. Returns how many were removed.
    fn prune_older_than(&self, cutoff: DateTime<FixedOffset>) -> Result<usize, StayError>;
}

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    /// Open the log at `path`, creating an empty one if it does not exist.
    ///
    /// An existing log is decoded once so corruption surfaces here as
    /// `StorageCorrupt` rather than on the first tick.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StayError> {
        let path = path.into();
        let store = Self {
            lock_path: sidecar(&path, "lock"),
            path,
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init(&self) -> Result<(), StayError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| StayError::io(parent, e))?;
            }
        }

        let _guard = self.lock()?;
        match fs::metadata(&self.path) {
            Ok(_) => {
                let existing = self.load()?;
                debug!(target: "stayd", "sample log {} holds {} observations", self.path.display(), existing.len());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                write_atomic(&self.path, b"[]").map_err(|e| StayError::io(&self.path, e))?;
                info!(target: "stayd", "created empty sample log at {}", self.path.display());
                Ok(())
            }
            Err(e) => Err(StayError::io(&self.path, e)),
        }
    }

    fn lock(&self) -> Result<Flock<File>, StayError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .mode(0o600)
            .open(&self.lock_path)
            .map_err(|e| StayError::io(&self.lock_path, e))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| StayError::io(&self.lock_path, std::io::Error::from(errno)))
    }

    fn load(&self) -> Result<Vec<Observation>, StayError> {
        let bytes = fs::read(&self.path).map_err(|e| StayError::io(&self.path, e))?;
        decode(&self.path, &bytes)
    }

    /// Like `load`, but a log removed out from under the daemon starts over
    /// empty so new samples are not lost.
    fn load_or_recreate(&self) -> Result<Vec<Observation>, StayError> {
        match fs::read(&self.path) {
            Ok(bytes) => decode(&self.path, &bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(target: "stayd", "sample log {} disappeared, starting a new one", self.path.display());
                Ok(Vec::new())
            }
            Err(e) => Err(StayError::io(&self.path, e)),
        }
    }

    fn store(&self, observations: &[Observation]) -> Result<(), StayError> {
        let payload = serde_json::to_vec(observations)
            .map_err(|e| StayError::io(&self.path, std::io::Error::from(e)))?;
        write_atomic(&self.path, &payload).map_err(|e| StayError::io(&self.path, e))
    }
}

impl SampleStore for JsonFileStore {
    fn append(&self, observation: Observation) -> Result<(), StayError> {
        let _guard = self.lock()?;
        let mut observations = self.load_or_recreate()?;
        observations.insert(0, observation);
        self.store(&observations)
    }

    fn read_all(&self) -> Result<Vec<Observation>, StayError> {
        let _guard = self.lock()?;
        self.load()
    }

    fn prune_older_than(&self, cutoff: DateTime<FixedOffset>) -> Result<usize, StayError> {
        let _guard = self.lock()?;
        let mut observations = self.load()?;
        let before = observations.len();
        observations.retain(|obs| obs.created_at >= cutoff);
        let removed = before - observations.len();
        if removed > 0 {
            self.store(&observations)?;
        }
        Ok(removed)
    }
}

/// Decode a persisted snapshot. A zero-length (or all-whitespace) file is an
/// empty log; anything else that is not a JSON array of observations is corrupt.
pub fn decode(path: &Path, bytes: &[u8]) -> Result<Vec<Observation>, StayError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(bytes).map_err(|e| StayError::StorageCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = sidecar(path, "tmp");
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
