use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::package;
use crate::config::DecoderConfig;
use crate::error::{ExtractError, Result};
use crate::sequence::DecoderSession;

/// Codec the decoder is asked to encode each frame with on its image pipe.
pub const PIXEL_CODEC: &str = "ppm";

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Decoder executable chosen for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    pub path: PathBuf,
    /// Directory holding the packaged shared libraries, if any.
    pub library_dir: Option<PathBuf>,
}

/// Pick the system or packaged decoder according to `config`, unpacking the
/// archive first if its contents are missing or stale.
pub fn resolve_binary(config: &DecoderConfig) -> Result<ResolvedBinary> {
    if !config.use_packaged_binary {
        let path = which::which(&config.binary).map_err(|e| ExtractError::Spawn {
            binary: config.binary.clone(),
            reason: e.to_string(),
        })?;
        return Ok(ResolvedBinary {
            path,
            library_dir: None,
        });
    }

    let archive = &config.archive_path;
    if !archive.is_file() {
        return Err(ExtractError::Spawn {
            binary: config.binary.clone(),
            reason: format!("packaged decoder archive {} not found", archive.display()),
        });
    }

    let file_name = config.binary.file_name().ok_or_else(|| ExtractError::Spawn {
        binary: config.binary.clone(),
        reason: "binary has no file name".to_string(),
    })?;

    fs::create_dir_all(&config.unpack_dir)?;
    let dir = fs::canonicalize(&config.unpack_dir)?;
    let path = dir.join(file_name);

    if package::needs_unpack(&path, archive)? {
        package::unpack(archive, &dir)?;
    } else {
        debug!(?path, "packaged decoder is up to date");
    }

    if !path.is_file() {
        return Err(ExtractError::Spawn {
            binary: path,
            reason: format!("not present in archive {}", archive.display()),
        });
    }

    Ok(ResolvedBinary {
        path,
        library_dir: Some(dir),
    })
}

/// A running decoder process and its output streams.
///
/// The process is killed and waited for exactly once, by [`shutdown`] or on
/// drop, whichever comes first.
///
/// [`shutdown`]: ProcessHandle::shutdown
pub struct ProcessHandle {
    child: Arc<Mutex<Child>>,
    pid: u32,
    pixels: Option<ChildStdout>,
    diagnostics: Option<ChildStderr>,
    watchdog: Option<Watchdog>,
    reaped: bool,
}

impl ProcessHandle {
    /// Spawn the decoder for `config.input_path`, writing PPM records to its
    /// stdout.
    pub fn start(config: &DecoderConfig) -> Result<Self> {
        let binary = resolve_binary(config)?;

        info!(
            binary = ?binary.path,
            input = ?config.input_path,
            packaged = config.use_packaged_binary,
            "spawning decoder process"
        );

        let mut command = Command::new(&binary.path);
        command
            .arg("-i")
            .arg(&config.input_path)
            .args(["-f", "image2pipe", "-vcodec", PIXEL_CODEC, "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &binary.library_dir {
            command.env(LIBRARY_PATH_VAR, dir);
        }

        let mut child = command.spawn().map_err(|e| ExtractError::Spawn {
            binary: binary.path.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        let pixels = child.stdout.take();
        let diagnostics = child.stderr.take();
        let mut handle = Self {
            child: Arc::new(Mutex::new(child)),
            pid,
            pixels,
            diagnostics,
            watchdog: None,
            reaped: false,
        };

        if let Some(timeout) = config.read_timeout {
            // On failure the handle drops here and reaps the child.
            handle.watchdog = Some(Watchdog::arm(Arc::clone(&handle.child), timeout)?);
        }

        info!(pid, "decoder process started");
        Ok(handle)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The binary pixel stream. Can be taken once.
    pub fn take_pixels(&mut self) -> Option<ChildStdout> {
        self.pixels.take()
    }

    /// The text diagnostic stream. Can be taken once.
    pub fn take_diagnostics(&mut self) -> Option<ChildStderr> {
        self.diagnostics.take()
    }

    /// Kill the decoder and wait for it to exit. Returns the exit status the
    /// first time and `None` on later calls.
    pub fn shutdown(&mut self) -> Result<Option<ExitStatus>> {
        if self.reaped {
            return Ok(None);
        }
        self.reaped = true;

        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.disarm();
        }
        self.pixels.take();
        self.diagnostics.take();

        let mut child = lock(&self.child);
        if let Err(e) = child.kill() {
            debug!(pid = self.pid, %e, "decoder already exited");
        }
        let status = child.wait()?;
        info!(pid = self.pid, %status, "decoder process reaped");
        Ok(Some(status))
    }
}

impl DecoderSession for ProcessHandle {
    fn begin_read(&mut self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.send(Tick::Begin);
        }
    }

    fn end_read(&mut self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.send(Tick::End);
        }
    }

    fn timed_out(&self) -> Option<Duration> {
        self.watchdog
            .as_ref()
            .filter(|watchdog| watchdog.expired())
            .map(|watchdog| watchdog.timeout)
    }

    fn shutdown(&mut self) -> Result<()> {
        ProcessHandle::shutdown(self).map(|_| ())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Err(e) = ProcessHandle::shutdown(self) {
            warn!(pid = self.pid, %e, "failed to reap decoder process");
        }
    }
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Watchdog messages. The timer only runs between a `Begin` and the next
/// `End`, so time the consumer spends holding a frame is never counted.
#[derive(Debug, Clone, Copy)]
enum Tick {
    /// A blocking read started, or a read made progress; restart the timer.
    Begin,
    /// The read returned; stop the timer.
    End,
}

/// Kills the decoder when a read blocks for longer than the timeout. It never
/// touches the decoder's streams; a kill makes the blocked read return.
struct Watchdog {
    ticks: Option<Sender<Tick>>,
    expired: Arc<AtomicBool>,
    timeout: Duration,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    fn arm(child: Arc<Mutex<Child>>, timeout: Duration) -> io::Result<Self> {
        let (ticks, rx) = mpsc::channel::<Tick>();
        let expired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&expired);

        let thread = thread::Builder::new()
            .name("decoder-watchdog".to_string())
            .spawn(move || {
                let mut running = false;
                loop {
                    let tick = if running {
                        rx.recv_timeout(timeout)
                    } else {
                        rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
                    };
                    match tick {
                        Ok(Tick::Begin) => running = true,
                        Ok(Tick::End) => running = false,
                        Err(RecvTimeoutError::Disconnected) => return,
                        Err(RecvTimeoutError::Timeout) => {
                            flag.store(true, Ordering::SeqCst);
                            let mut child = lock(&child);
                            warn!(pid = child.id(), ?timeout, "decoder stalled, killing it");
                            if let Err(e) = child.kill() {
                                warn!(%e, "failed to kill stalled decoder");
                            }
                            return;
                        }
                    }
                }
            })?;

        debug!(?timeout, "read watchdog armed");
        Ok(Self {
            ticks: Some(ticks),
            expired,
            timeout,
            thread: Some(thread),
        })
    }

    fn send(&self, tick: Tick) {
        if let Some(ticks) = &self.ticks {
            // The thread is gone once it has fired; nothing left to tell it.
            let _ = ticks.send(tick);
        }
    }

    fn expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    fn disarm(&mut self) {
        self.ticks.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("read watchdog panicked");
            }
        }
    }
}
