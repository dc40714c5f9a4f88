//! Single-runner instance lease.
//!
//! A JSON file holding the owner's pid, start time and last heartbeat. A live
//! lease blocks a second runner; one whose heartbeat is older than the TTL is
//! stale and may be taken over. Dropping the lease removes the file if it is
//! still ours.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RiskError, RiskResult};

/// On-disk lease contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub pid: u32,
    pub started_at_ms: u64,
    pub heartbeat_ms: u64,
    #[serde(default)]
    pub killed: bool,
}

impl LeaseRecord {
    fn is_stale(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.heartbeat_ms) > ttl_ms
    }
}

/// Held lease. Released on drop.
#[derive(Debug)]
pub struct InstanceLease {
    path: PathBuf,
    record: LeaseRecord,
    ttl_ms: u64,
}

impl InstanceLease {
    /// Acquire the lease at `path`.
    ///
    /// Fails with `LeaseHeld` while another holder's heartbeat is fresh.
    /// Unreadable lease files are overwritten.
    pub fn acquire(path: impl AsRef<Path>, ttl_ms: u64, now_ms: u64) -> RiskResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(existing) = read_record(&path) {
            if !existing.is_stale(now_ms, ttl_ms) {
                return Err(RiskError::LeaseHeld {
                    path,
                    pid: existing.pid,
                });
            }
            warn!(
                path = %path.display(),
                stale_pid = existing.pid,
                heartbeat_ms = existing.heartbeat_ms,
                "Taking over stale instance lease"
            );
        }

        let record = LeaseRecord {
            pid: std::process::id(),
            started_at_ms: now_ms,
            heartbeat_ms: now_ms,
            killed: false,
        };
        write_record(&path, &record)?;
        info!(path = %path.display(), pid = record.pid, "Instance lease acquired");

        Ok(Self {
            path,
            record,
            ttl_ms,
        })
    }

    /// Write a fresh heartbeat.
    pub fn renew(&mut self, now_ms: u64) -> RiskResult<()> {
        self.record.heartbeat_ms = now_ms;
        write_record(&self.path, &self.record)
    }

    /// Record the kill state alongside the heartbeat.
    pub fn set_killed(&mut self, killed: bool) {
        self.record.killed = killed;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self) -> &LeaseRecord {
        &self.record
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        // A stale takeover by someone else leaves their file alone.
        let ours = read_record(&self.path)
            .map(|r| r.pid == self.record.pid && r.started_at_ms == self.record.started_at_ms)
            .unwrap_or(false);
        if !ours {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Instance lease released"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove lease"),
        }
    }
}

fn read_record(path: &Path) -> Option<LeaseRecord> {
    let bytes = fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable lease file, ignoring");
            None
        }
    }
}

/// Write via a sibling temp file and rename so readers never see a torn lease.
fn write_record(path: &Path, record: &LeaseRecord) -> RiskResult<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, serde_json::to_vec(record)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static SEQ: AtomicU32 = AtomicU32::new(0);

    fn lease_path(name: &str) -> PathBuf {
        let n = SEQ.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "binmm-lease-{}-{}-{}.json",
            name,
            std::process::id(),
            n
        ))
    }

    #[test]
    fn test_live_lease_blocks_second_runner() {
        let path = lease_path("live");
        let _held = InstanceLease::acquire(&path, 5_000, 1_000).unwrap();

        let err = InstanceLease::acquire(&path, 5_000, 3_000).unwrap_err();
        assert!(matches!(err, RiskError::LeaseHeld { .. }));
    }

    #[test]
    fn test_stale_lease_taken_over() {
        let path = lease_path("stale");
        let first = InstanceLease::acquire(&path, 5_000, 1_000).unwrap();

        let second = InstanceLease::acquire(&path, 5_000, 7_000).unwrap();
        assert_eq!(second.record().started_at_ms, 7_000);

        // The displaced holder must not delete the new owner's file.
        drop(first);
        assert!(path.exists());
        drop(second);
        assert!(!path.exists());
    }

    #[test]
    fn test_renew_keeps_lease_fresh() {
        let path = lease_path("renew");
        let mut lease = InstanceLease::acquire(&path, 5_000, 0).unwrap();
        lease.renew(4_000).unwrap();
        lease.renew(8_000).unwrap();

        assert!(InstanceLease::acquire(&path, 5_000, 12_000).is_err());
        assert_eq!(read_record(&path).unwrap().heartbeat_ms, 8_000);
    }

    #[test]
    fn test_corrupt_lease_overwritten() {
        let path = lease_path("corrupt");
        fs::write(&path, b"not json").unwrap();
        let lease = InstanceLease::acquire(&path, 5_000, 0).unwrap();
        assert_eq!(read_record(lease.path()).unwrap().pid, std::process::id());
    }
}
