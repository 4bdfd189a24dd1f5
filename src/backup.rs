//! Backup rotation module
//!
//! Snapshots the persisted master before it is overwritten and prunes old
//! snapshots afterwards. Snapshot failure aborts the run (the master must
//! never be overwritten without a safety copy); pruning is best effort.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::config::{BackupSettings, RetentionMode};
use crate::error::EngineResult;

/// Snapshot + retention for the master parquet file.
pub struct BackupRotator {
    settings: BackupSettings,
}

impl BackupRotator {
    pub fn new(settings: BackupSettings) -> Self {
        Self { settings }
    }

    /// Copy the current master to a timestamped sibling:
    /// `<stem>_backup_<YYYYMMDD>_<HHMMSS>.parquet`. Returns `Ok(None)` when
    /// no master exists yet (cold start), the snapshot path otherwise.
    pub fn snapshot(&self, master_path: &Path) -> EngineResult<Option<PathBuf>> {
        if !master_path.exists() {
            return Ok(None);
        }
        let backup_path = self.backup_path_for(master_path);
        fs::copy(master_path, &backup_path)?;
        info!("Backed up master to {:?}", backup_path);
        Ok(Some(backup_path))
    }

    /// Delete snapshots the retention policy no longer keeps. Individual
    /// delete failures are logged and skipped. Returns the number of
    /// snapshots removed.
    pub fn prune(&self, master_path: &Path) -> EngineResult<usize> {
        let Some(dir) = master_path.parent() else {
            return Ok(0);
        };
        if !dir.exists() {
            return Ok(0);
        }

        let backups = self.list_backups(dir, master_path)?;
        let doomed = match self.settings.mode {
            RetentionMode::DailyLatestOnly => select_daily_losers(backups),
            RetentionMode::KeepLatestN => select_beyond_latest(backups, self.settings.keep_latest),
        };

        let mut deleted = 0usize;
        for path in doomed {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Removed old backup {:?}", path);
                    deleted += 1;
                }
                Err(err) => warn!("Failed to remove backup {:?}: {}", path, err),
            }
        }
        Ok(deleted)
    }

    fn backup_path_for(&self, master_path: &Path) -> PathBuf {
        let stem = file_stem(master_path);
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        master_path.with_file_name(format!("{}_backup_{}.parquet", stem, timestamp))
    }

    /// All snapshots of this master in the directory, with their day token
    /// and modification time. Files with an unreadable mtime are kept.
    fn list_backups(&self, dir: &Path, master_path: &Path) -> EngineResult<Vec<BackupEntry>> {
        let prefix = format!("{}_backup_", file_stem(master_path));
        let mut backups = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&prefix) || !name.ends_with(".parquet") {
                continue;
            }
            let Some(day) = day_token(name, &prefix) else {
                continue;
            };
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(err) => {
                    warn!("Skipping backup with unreadable mtime {:?}: {}", path, err);
                    continue;
                }
            };
            backups.push(BackupEntry {
                path,
                day,
                modified,
            });
        }
        Ok(backups)
    }
}

struct BackupEntry {
    path: PathBuf,
    day: String,
    modified: std::time::SystemTime,
}

/// Within each calendar day (taken from the filename), every snapshot except
/// the most recently modified one is a loser.
fn select_daily_losers(mut backups: Vec<BackupEntry>) -> Vec<PathBuf> {
    // Newest first; the filename is the tiebreak for equal mtimes
    backups.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| b.path.cmp(&a.path))
    });
    let mut seen_days = std::collections::HashSet::new();
    backups
        .into_iter()
        .filter(|entry| !seen_days.insert(entry.day.clone()))
        .map(|entry| entry.path)
        .collect()
}

/// Everything beyond the N most recently modified snapshots is a loser.
fn select_beyond_latest(mut backups: Vec<BackupEntry>, keep: usize) -> Vec<PathBuf> {
    backups.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| b.path.cmp(&a.path))
    });
    backups
        .into_iter()
        .skip(keep)
        .map(|entry| entry.path)
        .collect()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("master")
        .to_string()
}

/// Extract the 8-digit day token from a backup filename, e.g.
/// `master_x_backup_20251006_153000.parquet` -> `20251006`.
fn day_token(name: &str, prefix: &str) -> Option<String> {
    let rest = name.strip_prefix(prefix)?;
    let day = rest.get(..8)?;
    if day.len() == 8 && day.bytes().all(|b| b.is_ascii_digit()) {
        Some(day.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;
    use tempfile::tempdir;

    fn rotator(mode: RetentionMode, keep_latest: usize) -> BackupRotator {
        BackupRotator::new(BackupSettings { mode, keep_latest })
    }

    fn write_file(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
        // Distinct mtimes so retention ordering is deterministic
        sleep(Duration::from_millis(20));
    }

    #[test]
    fn test_snapshot_copies_master() {
        let dir = tempdir().unwrap();
        let master = dir.path().join("master_realized_pl_rakuten.parquet");
        write_file(&master, "payload");

        let rotator = rotator(RetentionMode::DailyLatestOnly, 10);
        let backup = rotator.snapshot(&master).unwrap().unwrap();

        let name = backup.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("master_realized_pl_rakuten_backup_"));
        assert!(name.ends_with(".parquet"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), "payload");
        // The original is untouched
        assert_eq!(fs::read_to_string(&master).unwrap(), "payload");
    }

    #[test]
    fn test_snapshot_of_missing_master_is_none() {
        let dir = tempdir().unwrap();
        let master = dir.path().join("master_realized_pl_sbi.parquet");
        let rotator = rotator(RetentionMode::DailyLatestOnly, 10);
        assert!(rotator.snapshot(&master).unwrap().is_none());
    }

    #[test]
    fn test_daily_latest_only_keeps_one_per_day() {
        let dir = tempdir().unwrap();
        let master = dir.path().join("master_t_b.parquet");
        write_file(&master, "m");

        let day1_a = dir.path().join("master_t_b_backup_20251004_090000.parquet");
        let day1_b = dir.path().join("master_t_b_backup_20251004_200000.parquet");
        let day2_a = dir.path().join("master_t_b_backup_20251005_090000.parquet");
        let day2_b = dir.path().join("master_t_b_backup_20251005_180000.parquet");
        let day3 = dir.path().join("master_t_b_backup_20251006_080000.parquet");
        for (path, content) in [
            (&day1_a, "a"),
            (&day1_b, "b"),
            (&day2_a, "c"),
            (&day2_b, "d"),
            (&day3, "e"),
        ] {
            write_file(path, content);
        }

        let rotator = rotator(RetentionMode::DailyLatestOnly, 10);
        let deleted = rotator.prune(&master).unwrap();

        // One survivor per calendar day, the most recently written one
        assert_eq!(deleted, 2);
        assert!(!day1_a.exists());
        assert!(day1_b.exists());
        assert!(!day2_a.exists());
        assert!(day2_b.exists());
        assert!(day3.exists());
        assert!(master.exists());
    }

    #[test]
    fn test_daily_latest_only_five_snapshots_one_day() {
        let dir = tempdir().unwrap();
        let master = dir.path().join("master_t_b.parquet");
        write_file(&master, "m");

        let mut backups = Vec::new();
        for hour in 9..14 {
            let path = dir
                .path()
                .join(format!("master_t_b_backup_20251005_{:02}0000.parquet", hour));
            write_file(&path, "x");
            backups.push(path);
        }

        let rotator = rotator(RetentionMode::DailyLatestOnly, 10);
        let deleted = rotator.prune(&master).unwrap();

        assert_eq!(deleted, 4);
        // Only the most recently written snapshot of the day survives
        for path in &backups[..4] {
            assert!(!path.exists());
        }
        assert!(backups[4].exists());
    }

    #[test]
    fn test_keep_latest_n_retains_newest() {
        let dir = tempdir().unwrap();
        let master = dir.path().join("master_t_b.parquet");
        write_file(&master, "m");

        let mut backups = Vec::new();
        for i in 0..4 {
            let path = dir
                .path()
                .join(format!("master_t_b_backup_2025100{}_120000.parquet", i + 1));
            write_file(&path, "x");
            backups.push(path);
        }

        let rotator = rotator(RetentionMode::KeepLatestN, 2);
        let deleted = rotator.prune(&master).unwrap();

        assert_eq!(deleted, 2);
        assert!(!backups[0].exists());
        assert!(!backups[1].exists());
        assert!(backups[2].exists());
        assert!(backups[3].exists());
    }

    #[test]
    fn test_prune_ignores_unrelated_files() {
        let dir = tempdir().unwrap();
        let master = dir.path().join("master_t_b.parquet");
        write_file(&master, "m");

        let other_master_backup = dir
            .path()
            .join("master_other_b_backup_20251005_090000.parquet");
        let csv_mirror = dir.path().join("master_t_b.csv");
        let malformed = dir.path().join("master_t_b_backup_notaday.parquet");
        write_file(&other_master_backup, "x");
        write_file(&csv_mirror, "x");
        write_file(&malformed, "x");

        let rotator = rotator(RetentionMode::KeepLatestN, 0);
        // keep_latest 0 would delete every recognized backup; nothing matches
        let deleted = rotator.prune(&master).unwrap();

        assert_eq!(deleted, 0);
        assert!(other_master_backup.exists());
        assert!(csv_mirror.exists());
        assert!(malformed.exists());
    }

    #[test]
    fn test_day_token_parsing() {
        let prefix = "master_t_b_backup_";
        assert_eq!(
            day_token("master_t_b_backup_20251006_153000.parquet", prefix),
            Some("20251006".to_string())
        );
        assert_eq!(
            day_token("master_t_b_backup_2025100_153000.parquet", prefix),
            None
        );
        assert_eq!(day_token("unrelated.parquet", prefix), None);
    }
}
