//! Compression adapter for dump and archive artifacts.
//!
//! Identity and gzip run in-process. bzip2, xz and zstd are driven as external
//! filter processes, so their exit status is only known once the stream is
//! finished: writers must be closed with [`ArtifactWriter::finish`] and readers
//! surface a failed filter as an I/O error at end of stream.

use flate2::Compression as GzLevel;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

const PROGRESS_STEP_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    None,
    Gzip,
    Bzip2,
    #[default]
    Xz,
    Zstd,
}

impl CompressionKind {
    /// Suffix appended after `.dump` / `.tar` / `.sql`.
    pub fn extension(self) -> &'static str {
        match self {
            CompressionKind::None => "",
            CompressionKind::Gzip => ".gz",
            CompressionKind::Bzip2 => ".bz2",
            CompressionKind::Xz => ".xz",
            CompressionKind::Zstd => ".zst",
        }
    }

    fn filter_program(self) -> Option<&'static str> {
        match self {
            CompressionKind::Bzip2 => Some("bzip2"),
            CompressionKind::Xz => Some("xz"),
            CompressionKind::Zstd => Some("zstd"),
            CompressionKind::None | CompressionKind::Gzip => None,
        }
    }

    /// Creates (truncating) `path` and returns a writer that compresses into it.
    pub fn create(self, path: &Path) -> io::Result<Box<dyn ArtifactWriter>> {
        let file = File::create(path)?;
        match self {
            CompressionKind::None => Ok(Box::new(PlainWriter {
                inner: BufWriter::new(file),
                written: 0,
            })),
            CompressionKind::Gzip => Ok(Box::new(GzipWriter {
                inner: GzEncoder::new(BufWriter::new(file), GzLevel::default()),
                written: 0,
            })),
            _ => {
                let program = self.filter_program().unwrap_or("cat");
                FilterWriter::spawn(program, file).map(|w| Box::new(w) as Box<dyn ArtifactWriter>)
            }
        }
    }

    /// Opens `path` and returns a reader yielding the decompressed stream.
    pub fn open(self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        match self {
            CompressionKind::None => Ok(Box::new(BufReader::new(File::open(path)?))),
            CompressionKind::Gzip => Ok(Box::new(MultiGzDecoder::new(BufReader::new(
                File::open(path)?,
            )))),
            _ => {
                let program = self.filter_program().unwrap_or("cat");
                FilterReader::spawn(program, path).map(|r| Box::new(r) as Box<dyn Read + Send>)
            }
        }
    }
}

/// A compressing sink that has to be finished explicitly.
pub trait ArtifactWriter: Write + Send {
    /// Flushes, closes the compressor and returns the number of
    /// uncompressed bytes written.
    fn finish(self: Box<Self>) -> io::Result<u64>;
}

struct PlainWriter {
    inner: BufWriter<File>,
    written: u64,
}

impl Write for PlainWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl ArtifactWriter for PlainWriter {
    fn finish(mut self: Box<Self>) -> io::Result<u64> {
        self.inner.flush()?;
        self.inner.get_ref().sync_all()?;
        Ok(self.written)
    }
}

struct GzipWriter {
    inner: GzEncoder<BufWriter<File>>,
    written: u64,
}

impl Write for GzipWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl ArtifactWriter for GzipWriter {
    fn finish(self: Box<Self>) -> io::Result<u64> {
        let this = *self;
        let written = this.written;
        let mut file = this.inner.finish()?;
        file.flush()?;
        file.get_ref().sync_all()?;
        Ok(written)
    }
}

struct FilterWriter {
    program: &'static str,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    written: u64,
}

impl FilterWriter {
    fn spawn(program: &'static str, out: File) -> io::Result<Self> {
        let mut child = Command::new(program)
            .arg("-c")
            .stdin(Stdio::piped())
            .stdout(Stdio::from(out))
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        let stderr = drain_stderr(&mut child);
        Ok(Self {
            program,
            child,
            stdin,
            stderr,
            written: 0,
        })
    }
}

impl Write for FilterWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::other("compression filter already closed"))?;
        let n = stdin.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

impl ArtifactWriter for FilterWriter {
    fn finish(mut self: Box<Self>) -> io::Result<u64> {
        drop(self.stdin.take());
        let status = self.child.wait()?;
        let stderr = self
            .stderr
            .take()
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();
        if !status.success() {
            return Err(io::Error::other(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }
        Ok(self.written)
    }
}

impl Drop for FilterWriter {
    fn drop(&mut self) {
        // Unfinished writers (error paths) must not leave the filter running.
        if self.stdin.take().is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

struct FilterReader {
    program: &'static str,
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    done: bool,
}

impl FilterReader {
    fn spawn(program: &'static str, path: &Path) -> io::Result<Self> {
        let mut child = Command::new(program)
            .arg("-dc")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("decompression filter stdout not captured"))?;
        let stderr = drain_stderr(&mut child);
        Ok(Self {
            program,
            child,
            stdout,
            stderr,
            done: false,
        })
    }
}

impl Read for FilterReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }
        let n = self.stdout.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.done = true;
            let status = self.child.wait()?;
            if !status.success() {
                let stderr = self
                    .stderr
                    .take()
                    .map(|h| h.join().unwrap_or_default())
                    .unwrap_or_default();
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{} exited with {}: {}", self.program, status, stderr.trim()),
                ));
            }
        }
        Ok(n)
    }
}

impl Drop for FilterReader {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf);
            buf
        })
    })
}

/// Counts bytes passing through and logs progress when enabled.
pub struct ProgressWriter<W> {
    inner: W,
    label: String,
    enabled: bool,
    bytes: u64,
    next_report: u64,
}

impl<W: Write> ProgressWriter<W> {
    pub fn new(inner: W, label: impl Into<String>, enabled: bool) -> Self {
        Self {
            inner,
            label: label.into(),
            enabled,
            bytes: 0,
            next_report: PROGRESS_STEP_BYTES,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        if self.enabled && self.bytes >= self.next_report {
            tracing::info!(
                artifact = %self.label,
                streamed = %crate::core::output::human_bytes(self.bytes),
                "transfer progress"
            );
            self.next_report = self.bytes + PROGRESS_STEP_BYTES;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
