use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use tracing_subscriber::fmt::MakeWriter;

use crate::exec::Stream;

/// Completed run logs kept per action.
pub const RUN_LOGS_KEPT: usize = 20;

// ── DeferredFileWriter ───────────────────────────────────

type SharedFile = Arc<Mutex<Option<File>>>;

fn lock(inner: &SharedFile) -> MutexGuard<'_, Option<File>> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// A `MakeWriter` that discards writes until `handle.set_file(path)` is
/// called, then appends to that file.
///
/// The subscriber is installed before the config (and thus the state
/// directory) is known.
#[derive(Clone)]
pub struct DeferredFileWriter {
    inner: SharedFile,
}

#[derive(Clone)]
pub struct DeferredFileHandle {
    inner: SharedFile,
}

impl DeferredFileWriter {
    pub fn new() -> (Self, DeferredFileHandle) {
        let inner: SharedFile = Arc::new(Mutex::new(None));
        (
            Self {
                inner: inner.clone(),
            },
            DeferredFileHandle { inner },
        )
    }
}

impl DeferredFileHandle {
    pub fn set_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.inner) = Some(file);
        Ok(())
    }
}

pub struct DeferredWriter {
    inner: SharedFile,
}

impl Write for DeferredWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match lock(&self.inner).as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match lock(&self.inner).as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DeferredFileWriter {
    type Writer = DeferredWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DeferredWriter {
            inner: self.inner.clone(),
        }
    }
}

// ── RunLog ───────────────────────────────────────────────

/// Output of one action run, tee'd to `<timestamp>_<action>_running.log`.
///
/// `finish` renames it to `_ok.log` / `_failed.log` and rotates older logs
/// of the same action.
pub struct RunLog {
    file: File,
    path: PathBuf,
    action: String,
}

impl RunLog {
    pub fn create(logs_dir: &Path, action: &str) -> std::io::Result<Self> {
        fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(format!("{}_{action}_running.log", utc_timestamp(SystemTime::now())));
        let file = File::create(&path)?;
        Ok(Self {
            file,
            path,
            action: action.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_line(&mut self, stream: Stream, line: &str) {
        let _ = match stream {
            Stream::Stdout => writeln!(self.file, "{line}"),
            Stream::Stderr => writeln!(self.file, "[stderr] {line}"),
        };
    }

    /// Note a line that did not come from the process (step headers, status).
    pub fn note(&mut self, text: &str) {
        let _ = writeln!(self.file, "# {text}");
    }

    pub fn finish(self, success: bool) -> PathBuf {
        let suffix = if success { "ok" } else { "failed" };
        let renamed = self
            .path
            .file_name()
            .and_then(|f| f.to_str())
            .map(|f| f.replace("_running.log", &format!("_{suffix}.log")));

        let final_path = match renamed {
            Some(name) => {
                let new_path = self.path.with_file_name(name);
                match fs::rename(&self.path, &new_path) {
                    Ok(()) => new_path,
                    Err(e) => {
                        tracing::warn!(path = %self.path.display(), error = %e, "failed to finalize run log");
                        self.path.clone()
                    }
                }
            }
            None => self.path.clone(),
        };

        if let Some(dir) = final_path.parent() {
            rotate_logs(dir, &self.action, RUN_LOGS_KEPT);
        }
        final_path
    }
}

// ── Log rotation ─────────────────────────────────────────

/// Delete the oldest completed logs for `action`, keeping at most `keep`.
pub fn rotate_logs(logs_dir: &Path, action: &str, keep: usize) {
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return;
    };

    let marker = format!("_{action}_");
    let mut matching: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name().and_then(|f| f.to_str()).is_some_and(|f| {
                f.contains(&marker) && (f.ends_with("_ok.log") || f.ends_with("_failed.log"))
            })
        })
        .collect();

    // Timestamp prefix sorts chronologically.
    matching.sort();

    if matching.len() > keep {
        for old in &matching[..matching.len() - keep] {
            let _ = fs::remove_file(old);
        }
    }
}

// ── Timestamp helper ─────────────────────────────────────

/// Format `t` as UTC `YYYY-MM-DDTHH-MM-SS.mmm`.
pub fn utc_timestamp(t: SystemTime) -> String {
    let dur = t.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let secs = dur.as_secs();
    let millis = dur.subsec_millis();

    let days = (secs / 86400) as i64;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    // Howard Hinnant's civil_from_days
    let z = days + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    format!("{y:04}-{m:02}-{d:02}T{hours:02}-{minutes:02}-{seconds:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timestamp_of_known_instant() {
        // 2024-02-29T13:45:30.250Z
        let t = SystemTime::UNIX_EPOCH + Duration::from_millis(1_709_214_330_250);
        assert_eq!(utc_timestamp(t), "2024-02-29T13-45-30.250");
    }

    #[test]
    fn run_log_is_renamed_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::create(dir.path(), "switch").unwrap();
        assert!(log.path().to_string_lossy().ends_with("_switch_running.log"));
        log.write_line(Stream::Stdout, "building...");
        log.write_line(Stream::Stderr, "warning: dirty tree");

        let path = log.finish(false);
        assert!(path.to_string_lossy().ends_with("_switch_failed.log"));
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("building..."));
        assert!(contents.contains("[stderr] warning: dirty tree"));
    }

    #[test]
    fn rotation_keeps_newest_per_action() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("2024-01-0{}T00-00-00.000_gc_ok.log", i + 1)), "").unwrap();
        }
        fs::write(dir.path().join("2024-01-01T00-00-00.000_gc-extra_ok.log"), "").unwrap();
        fs::write(dir.path().join("2024-01-09T00-00-00.000_gc_running.log"), "").unwrap();

        rotate_logs(dir.path(), "gc", 2);

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "2024-01-01T00-00-00.000_gc-extra_ok.log",
                "2024-01-04T00-00-00.000_gc_ok.log",
                "2024-01-05T00-00-00.000_gc_ok.log",
                "2024-01-09T00-00-00.000_gc_running.log",
            ]
        );
    }
}
