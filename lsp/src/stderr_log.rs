//! Background drain for a language server's stderr.
//!
//! The drain thread owns the stderr handle exclusively and is the only writer
//! to the per-server log file. It appends raw bytes between timestamped
//! session markers and exits when the stream closes or the stop flag is set.
//! A drain still blocked in `read` when stopped is detached, since a
//! grandchild of the server may hold the pipe open indefinitely.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Log files larger than this are rotated when a session starts.
pub const MAX_LOG_BYTES: u64 = 1024 * 1024;

const IDLE_SLEEP: Duration = Duration::from_millis(20);

const READ_CHUNK: usize = 4096;

/// How long teardown waits for an I/O thread before detaching it.
pub(crate) const JOIN_TIMEOUT: Duration = Duration::from_millis(250);

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Join `handle` if it finishes within `timeout`, otherwise detach it.
///
/// Returns whether the thread was joined.
pub(crate) fn join_bounded(handle: JoinHandle<()>, timeout: Duration, what: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::debug!(thread = what, "I/O thread still blocked, detaching");
            return false;
        }
        std::thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        tracing::warn!(thread = what, "I/O thread panicked");
    }
    true
}

/// Default location of the stderr log for `server`.
///
/// `<data_local_dir>/quill/logs/<server>-stderr.log`, falling back to
/// `./.quill/logs/` when no data directory is known.
#[must_use]
pub fn default_log_path(server: &str) -> PathBuf {
    let file_name = format!("{}-stderr.log", sanitize(server));
    dirs::data_local_dir()
        .map(|dir| dir.join("quill").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".quill").join("logs"))
        .join(file_name)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Rename `path` to `path.1` when it has grown past `max_bytes`.
pub(crate) fn rotate_if_needed(path: &Path, max_bytes: u64) -> std::io::Result<bool> {
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if len <= max_bytes {
        return Ok(false);
    }
    let mut rotated = path.as_os_str().to_owned();
    rotated.push(".1");
    fs::rename(path, PathBuf::from(rotated))?;
    Ok(true)
}

fn open_session_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Err(e) = rotate_if_needed(path, MAX_LOG_BYTES) {
        tracing::debug!(path = %path.display(), error = %e, "stderr log rotation failed");
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn marker(kind: &str, server: &str) -> String {
    format!(
        "\n===== {kind} {server} {} =====\n",
        chrono::Local::now().to_rfc3339()
    )
}

/// Handle to a running stderr drain thread.
pub(crate) struct StderrDrain {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StderrDrain {
    /// Start draining `stream` on a new thread.
    ///
    /// When `log_path` is `None` or cannot be opened the bytes are still
    /// consumed so the child never blocks on a full pipe.
    pub fn start<R>(server: &str, stream: R, log_path: Option<PathBuf>) -> std::io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let server = server.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("lsp-stderr-{server}"))
            .spawn(move || drain(&server, stream, log_path.as_deref(), &thread_stop))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait up to [`JOIN_TIMEOUT`] for it to finish.
    ///
    /// Returns whether the thread finished; otherwise it is detached and
    /// exits after its next read returns.
    pub fn stop(&mut self) -> bool {
        self.stop.store(true, Ordering::Release);
        match self.handle.take() {
            Some(handle) => join_bounded(handle, JOIN_TIMEOUT, "stderr drain"),
            None => true,
        }
    }
}

impl Drop for StderrDrain {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn drain<R: Read>(server: &str, mut stream: R, log_path: Option<&Path>, stop: &AtomicBool) {
    let mut log = log_path.and_then(|path| match open_session_log(path) {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot open stderr log");
            None
        }
    });

    write_log(&mut log, marker("session start", server).as_bytes());

    let mut buf = [0u8; READ_CHUNK];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => write_log(&mut log, &buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(IDLE_SLEEP),
            Err(e) => {
                tracing::debug!(server, error = %e, "stderr read failed");
                break;
            }
        }
        if stop.load(Ordering::Acquire) {
            break;
        }
    }

    write_log(&mut log, marker("session end", server).as_bytes());
}

fn write_log(log: &mut Option<File>, bytes: &[u8]) {
    if let Some(file) = log
        && let Err(e) = file.write_all(bytes)
    {
        tracing::warn!(error = %e, "stderr log write failed, disabling log");
        *log = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_writes_markers_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("rust-stderr.log");

        let input: &'static [u8] = b"warning: loading workspace\n";
        let mut drain = StderrDrain::start("rust", input, Some(path.clone())).unwrap();
        drain.stop();

        let contents = fs::read_to_string(&path).unwrap();
        let start = contents.find("session start rust").unwrap();
        let body = contents.find("warning: loading workspace").unwrap();
        let end = contents.find("session end rust").unwrap();
        assert!(start < body && body < end);
    }

    #[test]
    fn test_sessions_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zig-stderr.log");

        for chunk in [&b"first\n"[..], &b"second\n"[..]] {
            let mut drain = StderrDrain::start("zig", chunk, Some(path.clone())).unwrap();
            drain.stop();
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("session start zig").count(), 2);
        assert!(contents.contains("first") && contents.contains("second"));
    }

    /// A stream whose `read` blocks until the other end is dropped.
    fn blocked_stream() -> (std::sync::mpsc::Sender<Vec<u8>>, impl Read + Send + 'static) {
        struct Blocked(std::sync::mpsc::Receiver<Vec<u8>>);
        impl Read for Blocked {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                match self.0.recv() {
                    Ok(bytes) => {
                        let n = bytes.len().min(buf.len());
                        buf[..n].copy_from_slice(&bytes[..n]);
                        Ok(n)
                    }
                    Err(_) => Ok(0),
                }
            }
        }
        let (tx, rx) = std::sync::mpsc::channel();
        (tx, Blocked(rx))
    }

    #[test]
    fn test_stop_detaches_blocked_drain() {
        let (writer, stream) = blocked_stream();
        let mut drain = StderrDrain::start("held", stream, None).unwrap();

        let started = Instant::now();
        assert!(!drain.stop());
        assert!(started.elapsed() < JOIN_TIMEOUT * 8);

        // The detached thread ends once its stream closes.
        drop(writer);
    }

    #[test]
    fn test_stop_joins_finished_drain() {
        let (writer, stream) = blocked_stream();
        let mut drain = StderrDrain::start("closed", stream, None).unwrap();
        writer.send(b"bye".to_vec()).unwrap();
        drop(writer);
        assert!(drain.stop());
    }

    #[test]
    fn test_rotation_moves_large_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.log");
        fs::write(&path, vec![b'x'; 64]).unwrap();

        assert!(!rotate_if_needed(&path, 128).unwrap());
        assert!(rotate_if_needed(&path, 32).unwrap());
        assert!(!path.exists());
        assert!(dir.path().join("big.log.1").exists());
    }

    #[test]
    fn test_rotation_of_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!rotate_if_needed(&dir.path().join("none.log"), 1).unwrap());
    }

    #[test]
    fn test_drain_without_log_still_consumes() {
        let input: &'static [u8] = b"noise";
        let mut drain = StderrDrain::start("plain", input, None).unwrap();
        drain.stop();
    }

    #[test]
    fn test_default_log_path_sanitizes_name() {
        let path = default_log_path("c/c++");
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "c_c__-stderr.log"
        );
    }
}
