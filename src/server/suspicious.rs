//! In-memory record of suspicious requests, flushed to disk on a timer.
//!
//! Requests only touch a mutex-protected set; the flush task swaps the set out
//! and appends the snapshot to the log file without holding the lock.

use std::collections::HashSet;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on entries held between flushes.
pub const MAX_PENDING: usize = 10_000;

/// Whether a request target (path plus query) looks like vulnerability
/// probing.
pub fn is_suspicious(target: &str) -> bool {
    target == "/"
        || target.starts_with("/.env")
        || target.starts_with("/cgi-bin/")
        || target.starts_with("/wp")
        || target.to_ascii_lowercase().contains("admin")
}

/// Format one log line.
pub fn entry_line(ip: Option<IpAddr>, path: &str) -> String {
    let ip = ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
    format!("{} | tried accessing \"{}\"", ip, path)
}

#[derive(Default)]
struct Pending {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl Pending {
    fn insert(&mut self, line: String) -> bool {
        if self.seen.contains(&line) {
            return false;
        }
        self.seen.insert(line.clone());
        self.order.push(line);
        true
    }
}

/// Deduplicated set of suspicious-request lines awaiting a flush.
pub struct SuspiciousLog {
    path: PathBuf,
    pending: Mutex<Pending>,
}

impl SuspiciousLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pending: Mutex::new(Pending::default()),
        }
    }

    /// Record a suspicious request. Duplicate lines within one flush window
    /// are kept once.
    pub fn record(&self, ip: Option<IpAddr>, path: &str) {
        let line = entry_line(ip, path);
        let Ok(mut pending) = self.pending.lock() else {
            error!("suspicious log lock poisoned");
            return;
        };
        if pending.order.len() >= MAX_PENDING {
            debug!(entry = %line, "suspicious log full, dropping entry");
            return;
        }
        if pending.insert(line.clone()) {
            info!(entry = %line, "Suspicious request");
        }
    }

    /// Number of entries waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.order.len()).unwrap_or(0)
    }

    fn take_snapshot(&self) -> Vec<String> {
        match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending).order,
            Err(_) => Vec::new(),
        }
    }

    fn requeue(&self, lines: Vec<String>) {
        if let Ok(mut pending) = self.pending.lock() {
            for line in lines {
                if pending.order.len() >= MAX_PENDING {
                    break;
                }
                pending.insert(line);
            }
        }
    }

    /// Append everything pending to the log file. Returns the number of lines
    /// written. On failure the lines go back into the pending set.
    pub async fn flush(&self) -> io::Result<usize> {
        let lines = self.take_snapshot();
        if lines.is_empty() {
            return Ok(0);
        }

        match self.append(&lines).await {
            Ok(()) => {
                info!(count = lines.len(), path = %self.path.display(), "Flushed suspicious IP entries");
                Ok(lines.len())
            }
            Err(e) => {
                self.requeue(lines);
                Err(e)
            }
        }
    }

    async fn append(&self, lines: &[String]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut data = lines.join("\n");
        data.push('\n');
        file.write_all(data.as_bytes()).await?;
        file.flush().await
    }

    /// Flush every `interval` until `shutdown` fires, then flush once more.
    pub fn spawn_flusher(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.flush().await {
                            warn!(error = %e, path = %self.path.display(), "Error flushing suspicious IPs");
                        }
                    }
                    _ = shutdown.recv() => {
                        debug!("Suspicious log flusher shutting down");
                        break;
                    }
                }
            }

            if let Err(e) = self.flush().await {
                warn!(error = %e, path = %self.path.display(), "Error flushing suspicious IPs on shutdown");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
    }

    #[test]
    fn test_is_suspicious() {
        assert!(is_suspicious("/"));
        assert!(is_suspicious("/.env"));
        assert!(is_suspicious("/.env.production"));
        assert!(is_suspicious("/cgi-bin/luci"));
        assert!(is_suspicious("/wp-login.php"));
        assert!(is_suspicious("/phpMyAdmin/index.php"));
        assert!(!is_suspicious("/download/abc"));
        assert!(!is_suspicious("/api/files"));
        assert!(is_suspicious("/?x=wp-admin"));
        assert!(is_suspicious("/index?admin"));
        assert!(!is_suspicious("/api/files?subdir=music"));
    }

    #[test]
    fn test_entry_line_format() {
        assert_eq!(
            entry_line(ip(1, 2, 3, 4), "/.env"),
            "1.2.3.4 | tried accessing \"/.env\""
        );
        assert_eq!(entry_line(None, "/"), "unknown | tried accessing \"/\"");
    }

    #[test]
    fn test_record_deduplicates() {
        let log = SuspiciousLog::new("/unused");
        log.record(ip(1, 1, 1, 1), "/.env");
        log.record(ip(1, 1, 1, 1), "/.env");
        log.record(ip(2, 2, 2, 2), "/.env");
        assert_eq!(log.pending_len(), 2);
    }

    #[tokio::test]
    async fn test_flush_appends_and_clears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/suspicious-ips.list");
        let log = SuspiciousLog::new(&path);

        log.record(ip(1, 1, 1, 1), "/.env");
        log.record(ip(2, 2, 2, 2), "/wp-admin");
        assert_eq!(log.flush().await.unwrap(), 2);
        assert_eq!(log.pending_len(), 0);

        log.record(ip(3, 3, 3, 3), "/cgi-bin/x");
        assert_eq!(log.flush().await.unwrap(), 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "1.1.1.1 | tried accessing \"/.env\"",
                "2.2.2.2 | tried accessing \"/wp-admin\"",
                "3.3.3.3 | tried accessing \"/cgi-bin/x\"",
            ]
        );
    }

    #[tokio::test]
    async fn test_flush_empty_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("suspicious.list");
        let log = SuspiciousLog::new(&path);

        assert_eq!(log.flush().await.unwrap(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_flush_requeues() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the open fail.
        let path = dir.path().join("blocked");
        std::fs::create_dir(&path).unwrap();
        let log = SuspiciousLog::new(&path);

        log.record(ip(9, 9, 9, 9), "/.env");
        assert!(log.flush().await.is_err());
        assert_eq!(log.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_records_survive_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("suspicious.list");
        let log = Arc::new(SuspiciousLog::new(&path));

        let writers: Vec<_> = (0..50u8)
            .map(|i| {
                let log = Arc::clone(&log);
                tokio::spawn(async move { log.record(ip(10, 0, 0, i), "/.env") })
            })
            .collect();
        let mut flushed = log.flush().await.unwrap();
        for w in writers {
            w.await.unwrap();
        }
        flushed += log.flush().await.unwrap();

        assert_eq!(flushed, 50);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 50);
    }

    #[tokio::test]
    async fn test_flusher_flushes_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("suspicious.list");
        let log = Arc::new(SuspiciousLog::new(&path));
        let (tx, rx) = broadcast::channel(1);

        let handle = Arc::clone(&log).spawn_flusher(Duration::from_secs(3600), rx);
        log.record(ip(5, 5, 5, 5), "/admin");
        tx.send(()).unwrap();
        handle.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("5.5.5.5 | tried accessing \"/admin\""));
    }
}
