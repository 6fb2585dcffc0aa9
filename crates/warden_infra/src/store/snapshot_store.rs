//! File-backed snapshot persistence for the throttle and runtime guard.
//!
//! Contract: a reader never observes a partially written snapshot. Each write
//! goes to `<name>.tmp`, is synced, then renamed over the target.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};
use warden_core::risk::RuntimeGuardSnapshot;
use warden_core::throttle::ThrottleSnapshot;

use crate::snapshot::{
    Decoded, SnapshotError, decode_guard_snapshot, decode_throttle_snapshot,
    encode_guard_snapshot, encode_throttle_snapshot,
};

pub const THROTTLE_SNAPSHOT_FILE: &str = "throttle_snapshot.json";
pub const GUARD_SNAPSHOT_FILE: &str = "runtime_guard_snapshot.json";

pub struct SnapshotStore {
    dir: PathBuf,
    writes_total: AtomicU64,
    write_failures_total: AtomicU64,
    loads_total: AtomicU64,
    load_failures_total: AtomicU64,
}

impl SnapshotStore {
    /// Use `dir` for snapshot files, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| SnapshotError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            writes_total: AtomicU64::new(0),
            write_failures_total: AtomicU64::new(0),
            loads_total: AtomicU64::new(0),
            load_failures_total: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn save_throttle(&self, snapshot: &ThrottleSnapshot) -> Result<(), SnapshotError> {
        self.write_atomic(THROTTLE_SNAPSHOT_FILE, &encode_throttle_snapshot(snapshot))
    }

    pub fn save_guard(&self, snapshot: &RuntimeGuardSnapshot) -> Result<(), SnapshotError> {
        self.write_atomic(GUARD_SNAPSHOT_FILE, &encode_guard_snapshot(snapshot))
    }

    /// `Ok(None)` when no snapshot has been written yet.
    pub fn load_throttle(&self) -> Result<Option<Decoded<ThrottleSnapshot>>, SnapshotError> {
        self.load_with(THROTTLE_SNAPSHOT_FILE, decode_throttle_snapshot)
    }

    /// `Ok(None)` when no snapshot has been written yet.
    pub fn load_guard(&self) -> Result<Option<Decoded<RuntimeGuardSnapshot>>, SnapshotError> {
        self.load_with(GUARD_SNAPSHOT_FILE, decode_guard_snapshot)
    }

    pub fn writes_total(&self) -> u64 {
        self.writes_total.load(Ordering::Relaxed)
    }

    pub fn write_failures_total(&self) -> u64 {
        self.write_failures_total.load(Ordering::Relaxed)
    }

    pub fn loads_total(&self) -> u64 {
        self.loads_total.load(Ordering::Relaxed)
    }

    pub fn load_failures_total(&self) -> u64 {
        self.load_failures_total.load(Ordering::Relaxed)
    }

    pub fn write_atomic(&self, name: &str, contents: &str) -> Result<(), SnapshotError> {
        let target = self.path_for(name);
        let tmp = self.path_for(&format!("{name}.tmp"));
        let result = write_then_rename(&tmp, &target, contents.as_bytes());
        match &result {
            Ok(()) => {
                self.writes_total.fetch_add(1, Ordering::Relaxed);
                debug!(path = %target.display(), bytes = contents.len(), "snapshot written");
            }
            Err(_) => {
                self.write_failures_total.fetch_add(1, Ordering::Relaxed);
                let _ = fs::remove_file(&tmp);
            }
        }
        result.map_err(|(path, source)| SnapshotError::Io { path, source })
    }

    fn read(&self, name: &str) -> Result<Option<String>, SnapshotError> {
        let path = self.path_for(name);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SnapshotError::Io { path, source }),
        }
    }

    fn load_with<T>(
        &self,
        name: &str,
        decode: fn(&str) -> Result<Decoded<T>, SnapshotError>,
    ) -> Result<Option<Decoded<T>>, SnapshotError> {
        let loaded = match self.read(name) {
            Ok(Some(raw)) => decode(&raw).map(Some),
            Ok(None) => {
                info!(file = name, "no snapshot on disk");
                return Ok(None);
            }
            Err(err) => Err(err),
        };
        match &loaded {
            Ok(_) => self.loads_total.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.load_failures_total.fetch_add(1, Ordering::Relaxed),
        };
        loaded
    }
}

fn write_then_rename(tmp: &Path, target: &Path, bytes: &[u8]) -> Result<(), (PathBuf, io::Error)> {
    let at = |path: &Path| {
        let path = path.to_path_buf();
        move |err: io::Error| (path, err)
    };
    let mut file = File::create(tmp).map_err(at(tmp))?;
    file.write_all(bytes).map_err(at(tmp))?;
    file.sync_all().map_err(at(tmp))?;
    drop(file);
    fs::rename(tmp, target).map_err(at(target))
}

/// Decides when the next periodic snapshot is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotCadence {
    period_ms: u64,
    last_ms: Option<u64>,
}

impl SnapshotCadence {
    pub fn new(period_sec: u64) -> Self {
        Self {
            period_ms: period_sec.max(1).saturating_mul(1_000),
            last_ms: None,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Due on the first call and then once per period.
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.period_ms,
        }
    }

    pub fn mark(&mut self, now_ms: u64) {
        self.last_ms = Some(now_ms);
    }
}
