//! Buffered, daily-rotated log file.

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate, TimeFrequency,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::LogConfig;
use crate::sink::{LogKind, LogSink};

type RotWriter = BufWriter<FileRotate<AppendTimestamp>>;

/// Appends lines of the configured streams to `<dir>/<file_name>`, reopening daily.
///
/// Lines are buffered up to `write_buffer_bytes` and pushed to disk every
/// `write_interval_ms` by a background task, so the sink must be opened inside a tokio runtime.
pub struct FileSink {
    path: PathBuf,
    streams: HashSet<LogKind>,
    writer: Mutex<Option<RotWriter>>,
    cancel: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl FileSink {
    pub fn open(cfg: &LogConfig, app_root: &Path) -> std::io::Result<Arc<Self>> {
        let path = cfg.log_path(app_root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let limit = if cfg.keep_days > 0 {
            FileLimit::Age(chrono::Duration::days(i64::from(cfg.keep_days)))
        } else {
            FileLimit::Unlimited
        };
        let rot = FileRotate::new(
            &path,
            AppendTimestamp::default(limit),
            ContentLimit::Time(TimeFrequency::Daily),
            Compression::None,
            None,
        );

        let sink = Arc::new(Self {
            path,
            streams: cfg.streams.iter().copied().collect(),
            writer: Mutex::new(Some(BufWriter::with_capacity(
                cfg.write_buffer_bytes.max(1),
                rot,
            ))),
            cancel: CancellationToken::new(),
            flusher: Mutex::new(None),
        });

        let every = Duration::from_millis(cfg.write_interval_ms.max(1));
        let weak = Arc::downgrade(&sink);
        let cancel = sink.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => match weak.upgrade() {
                        Some(sink) => sink.flush(),
                        None => break,
                    },
                }
            }
        });
        *sink.flusher.lock() = Some(handle);

        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop the flusher, flush what is buffered and release the file.
    /// A log file that never received a line is removed.
    pub async fn close(&self) -> std::io::Result<()> {
        self.cancel.cancel();
        let flusher = self.flusher.lock().take();
        if let Some(handle) = flusher {
            let _ = handle.await;
        }

        let writer = self.writer.lock().take();
        if let Some(mut w) = writer {
            w.flush()?;
        }

        if fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(false) {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl LogSink for FileSink {
    fn write(&self, kind: LogKind, line: &str) {
        if !self.streams.contains(&kind) {
            return;
        }
        let mut guard = self.writer.lock();
        if let Some(w) = guard.as_mut() {
            if let Err(e) = writeln!(w, "{line}") {
                eprintln!("log file write failed ({}): {e}", self.path.display());
            }
        }
    }

    fn flush(&self) {
        let mut guard = self.writer.lock();
        if let Some(w) = guard.as_mut() {
            if let Err(e) = w.flush() {
                eprintln!("log file flush failed ({}): {e}", self.path.display());
            }
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg(streams: Vec<LogKind>) -> LogConfig {
        LogConfig {
            write_interval_ms: 20,
            streams,
            ..LogConfig::default()
        }
    }

    #[tokio::test]
    async fn lines_reach_disk_on_close() {
        let tmp = tempdir().unwrap();
        let sink = FileSink::open(&cfg(LogKind::ALL.to_vec()), tmp.path()).unwrap();

        sink.write(LogKind::Info, "first");
        sink.log(LogKind::Access, "GET / 200");
        sink.close().await.unwrap();

        let body = fs::read_to_string(tmp.path().join("logs/server.log")).unwrap();
        assert!(body.contains("first\n"));
        assert!(body.contains(" access  GET / 200"));
    }

    #[tokio::test]
    async fn periodic_flush_pushes_buffered_lines() {
        let tmp = tempdir().unwrap();
        let sink = FileSink::open(&cfg(LogKind::ALL.to_vec()), tmp.path()).unwrap();

        sink.write(LogKind::Warn, "buffered");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let body = fs::read_to_string(sink.path()).unwrap();
        assert!(body.contains("buffered"));
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn unlisted_streams_are_filtered_out() {
        let tmp = tempdir().unwrap();
        let sink = FileSink::open(&cfg(vec![LogKind::Error]), tmp.path()).unwrap();

        sink.write(LogKind::Debug, "noise");
        sink.write(LogKind::Error, "boom");
        sink.close().await.unwrap();

        let body = fs::read_to_string(tmp.path().join("logs/server.log")).unwrap();
        assert_eq!(body, "boom\n");
    }

    #[tokio::test]
    async fn empty_log_file_is_removed_on_close() {
        let tmp = tempdir().unwrap();
        let sink = FileSink::open(&cfg(LogKind::ALL.to_vec()), tmp.path()).unwrap();
        let path = sink.path().to_path_buf();

        sink.close().await.unwrap();

        assert!(!path.exists());
    }
}
