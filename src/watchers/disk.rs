use super::{sleep_or_cancel, WatcherHandle};
use crate::pause::PauseController;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Disks;
use tokio_util::sync::CancellationToken;

/// Pause cause used by the disk watcher
pub const DISK_CAUSE: &str = "disk";

/// One gibibyte
pub const GIB: u64 = 1024 * 1024 * 1024;
const MIN_REQUIRED: u64 = GIB;
const MAX_REQUIRED: u64 = 50 * GIB;

/// Free and total bytes of a filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub free: u64,
    pub total: u64,
}

/// Source of disk usage figures
pub trait DiskUsageProvider: Send + Sync {
    fn disk_space(&self) -> io::Result<DiskSpace>;
}

/// Reads disk usage of the filesystem holding `path` from the OS
pub struct SystemDiskUsage {
    path: PathBuf,
}

impl SystemDiskUsage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DiskUsageProvider for SystemDiskUsage {
    fn disk_space(&self) -> io::Result<DiskSpace> {
        let path = std::fs::canonicalize(&self.path)?;
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| DiskSpace {
                free: disk.available_space(),
                total: disk.total_space(),
            })
            .ok_or_else(|| no_disk_for(&path))
    }
}

fn no_disk_for(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("no mounted disk holds {}", path.display()),
    )
}

/// Free space the crawl needs on a disk of `total` bytes
///
/// An explicit override wins. Otherwise 20% of the disk, kept between 1 GiB
/// and 50 GiB.
pub fn required_free_space(total: u64, override_bytes: Option<u64>) -> u64 {
    match override_bytes {
        Some(bytes) => bytes,
        None => (total / 5).clamp(MIN_REQUIRED, MAX_REQUIRED),
    }
}

/// Disk watcher tuning
#[derive(Debug, Clone)]
pub struct DiskWatcherSettings {
    pub check_interval: Duration,
    /// Ceiling for the backed-off interval while the disk is full
    pub max_check_interval: Duration,
    /// Overrides the computed threshold when set
    pub min_free_space: Option<u64>,
}

/// Spawns the disk watcher loop
pub fn spawn_disk_watcher(
    controller: Arc<PauseController>,
    provider: Arc<dyn DiskUsageProvider>,
    settings: DiskWatcherSettings,
) -> WatcherHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(controller, provider, settings, cancel.clone()));
    WatcherHandle::new("disk", cancel, task)
}

async fn run(
    controller: Arc<PauseController>,
    provider: Arc<dyn DiskUsageProvider>,
    settings: DiskWatcherSettings,
    cancel: CancellationToken,
) {
    let mut interval = settings.check_interval;
    let mut holding_pause = false;

    loop {
        match read_disk_space(&provider).await {
            Ok(space) => {
                let required = required_free_space(space.total, settings.min_free_space);

                if space.free < required {
                    let reason = format!(
                        "Not enough disk space: {:.2} GiB free, {:.2} GiB required",
                        space.free as f64 / GIB as f64,
                        required as f64 / GIB as f64
                    );
                    controller.pause(DISK_CAUSE, reason);
                    holding_pause = true;
                    interval = (interval * 2).min(settings.max_check_interval);
                } else if holding_pause {
                    tracing::info!(
                        "Disk space recovered ({:.2} GiB free)",
                        space.free as f64 / GIB as f64
                    );
                    controller.resume(DISK_CAUSE).await;
                    holding_pause = false;
                    interval = settings.check_interval;
                }
            }
            Err(e) => tracing::warn!("Failed to read disk usage: {}", e),
        }

        if !sleep_or_cancel(&cancel, interval).await {
            break;
        }
    }

    if holding_pause {
        controller.resume(DISK_CAUSE).await;
    }
}

/// Reads disk usage on the blocking pool since the OS calls may stall
async fn read_disk_space(provider: &Arc<dyn DiskUsageProvider>) -> io::Result<DiskSpace> {
    let provider = Arc::clone(provider);
    tokio::task::spawn_blocking(move || provider.disk_space())
        .await
        .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeDisk {
        free: AtomicU64,
        total: u64,
        polls: AtomicUsize,
    }

    impl FakeDisk {
        fn new(free: u64, total: u64) -> Arc<Self> {
            Arc::new(Self {
                free: AtomicU64::new(free),
                total,
                polls: AtomicUsize::new(0),
            })
        }
    }

    impl DiskUsageProvider for FakeDisk {
        fn disk_space(&self) -> io::Result<DiskSpace> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(DiskSpace {
                free: self.free.load(Ordering::SeqCst),
                total: self.total,
            })
        }
    }

    fn settings(check_ms: u64, max_ms: u64) -> DiskWatcherSettings {
        DiskWatcherSettings {
            check_interval: Duration::from_millis(check_ms),
            max_check_interval: Duration::from_millis(max_ms),
            min_free_space: None,
        }
    }

    #[test]
    fn test_required_free_space_bounds() {
        // 20% of 2 GiB is below the floor
        assert_eq!(required_free_space(2 * GIB, None), GIB);
        // 20% of 100 GiB
        assert_eq!(required_free_space(100 * GIB, None), 20 * GIB);
        // 20% of 1 TiB is above the ceiling
        assert_eq!(required_free_space(1024 * GIB, None), 50 * GIB);
        assert_eq!(required_free_space(1024 * GIB, Some(3 * GIB)), 3 * GIB);
    }

    #[tokio::test]
    async fn test_pauses_when_disk_is_full_and_resumes_on_recovery() {
        let controller = Arc::new(PauseController::new());
        let disk = FakeDisk::new(GIB / 2, 100 * GIB);
        let handle = spawn_disk_watcher(
            Arc::clone(&controller),
            disk.clone(),
            settings(5, 20),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(controller.is_paused());
        assert!(controller.reason().starts_with("Not enough disk space"));
        assert!(controller.causes().contains_key(DISK_CAUSE));

        disk.free.store(60 * GIB, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!controller.is_paused());

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_backs_off_while_breached() {
        let controller = Arc::new(PauseController::new());
        let disk = FakeDisk::new(0, 100 * GIB);
        let handle = spawn_disk_watcher(
            Arc::clone(&controller),
            disk.clone(),
            settings(10, 40),
        );

        // Polls at 0, 20, 60, 100, ... instead of every 10ms.
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop().await;
        assert!(disk.polls.load(Ordering::SeqCst) <= 6);
    }

    #[tokio::test]
    async fn test_stop_releases_held_pause() {
        let controller = Arc::new(PauseController::new());
        let disk = FakeDisk::new(0, 100 * GIB);
        let handle = spawn_disk_watcher(Arc::clone(&controller), disk, settings(5, 5));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(controller.is_paused());

        handle.stop().await;
        assert!(!controller.is_paused());
    }

    #[tokio::test]
    async fn test_does_not_lift_other_causes() {
        let controller = Arc::new(PauseController::new());
        controller.pause("queue-depth", "Archive queue is full");

        let disk = FakeDisk::new(60 * GIB, 100 * GIB);
        let handle = spawn_disk_watcher(Arc::clone(&controller), disk, settings(5, 5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop().await;

        assert!(controller.is_paused());
        assert_eq!(controller.reason(), "Archive queue is full");
    }

    struct ThreadRecordingDisk {
        thread: Mutex<Option<std::thread::ThreadId>>,
    }

    impl DiskUsageProvider for ThreadRecordingDisk {
        fn disk_space(&self) -> io::Result<DiskSpace> {
            *self.thread.lock().unwrap() = Some(std::thread::current().id());
            Ok(DiskSpace {
                free: 60 * GIB,
                total: 100 * GIB,
            })
        }
    }

    #[tokio::test]
    async fn test_disk_is_read_off_the_runtime_thread() {
        let controller = Arc::new(PauseController::new());
        let disk = Arc::new(ThreadRecordingDisk {
            thread: Mutex::new(None),
        });
        let handle = spawn_disk_watcher(controller, disk.clone(), settings(5, 5));

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop().await;

        // The test runtime is single-threaded, so any async poll runs here.
        let reader = disk.thread.lock().unwrap().expect("disk was never read");
        assert_ne!(reader, std::thread::current().id());
    }

    #[test]
    fn test_system_disk_usage_reads_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SystemDiskUsage::new(dir.path());

        // Containers may hide mount information; only check consistency.
        if let Ok(space) = provider.disk_space() {
            assert!(space.free <= space.total);
        }
    }

    #[test]
    fn test_system_disk_usage_missing_path() {
        let provider = SystemDiskUsage::new("/definitely/not/a/real/path");
        assert!(provider.disk_space().is_err());
    }
}
