//! In-process fakes for the remote channel, local commands and the
//! dump-only tooling.
#![allow(dead_code)]

use repokeep::core::command::{CommandOutput, CommandRunner, CommandSpec};
use repokeep::core::compress::CompressionKind;
use repokeep::core::error::RepokeepError;
use repokeep::core::layout::StorageLayout;
use repokeep::core::remote::{RemoteChannel, RemoteOutput};
use repokeep::core::repository::Repository;
use repokeep::strategies::StrategyContext;
use repokeep::strategies::dump_verify::DumpTool;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Remote channel answering by command prefix.
#[derive(Default)]
pub struct ScriptedChannel {
    pub host: String,
    pub unreachable: bool,
    answers: Mutex<Vec<(String, i32, Vec<u8>)>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedChannel {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Self::default()
        }
    }

    /// Every call fails as if the host could not be reached.
    pub fn offline(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Every command line starting with `prefix` exits `status` printing `stdout`.
    pub fn answer(self, prefix: &str, status: i32, stdout: &str) -> Self {
        self.answers
            .lock()
            .unwrap()
            .push((prefix.to_string(), status, stdout.as_bytes().to_vec()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(&self, argv: &[&str]) -> Result<RemoteOutput, RepokeepError> {
        let line = argv.join(" ");
        self.calls.lock().unwrap().push(line.clone());
        if self.unreachable {
            return Err(RepokeepError::RemoteUnreachable {
                host: self.host.clone(),
                detail: "Connection refused".to_string(),
            });
        }
        let answers = self.answers.lock().unwrap();
        let (status, stdout) = answers
            .iter()
            .find(|(prefix, _, _)| line.starts_with(prefix.as_str()))
            .map(|(_, status, stdout)| (*status, stdout.clone()))
            .unwrap_or((0, Vec::new()));
        Ok(RemoteOutput {
            status: Some(status),
            stdout,
            stderr: if status == 0 {
                String::new()
            } else {
                format!("{}: failed", argv[0])
            },
            streamed: 0,
        })
    }
}

impl RemoteChannel for ScriptedChannel {
    fn host(&self) -> &str {
        &self.host
    }

    fn execute(&self, argv: &[&str]) -> Result<RemoteOutput, RepokeepError> {
        self.respond(argv)
    }

    fn execute_to(
        &self,
        argv: &[&str],
        sink: &mut dyn Write,
    ) -> Result<RemoteOutput, RepokeepError> {
        let mut out = self.respond(argv)?;
        sink.write_all(&out.stdout)?;
        out.streamed = out.stdout.len() as u64;
        out.stdout.clear();
        Ok(out)
    }
}

/// Local runner that records every command and fails the listed programs.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: Mutex<Vec<String>>,
    failing: HashMap<String, i32>,
}

impl RecordingRunner {
    pub fn failing(mut self, program: &str) -> Self {
        self.failing.insert(program.to_string(), 1);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.to_string());
        let status = self.failing.get(&spec.program).copied().unwrap_or(0);
        Ok(CommandOutput {
            status: Some(status),
            stdout: Vec::new(),
            stderr: if status == 0 {
                Vec::new()
            } else {
                format!("{}: failed", spec.program).into_bytes()
            },
        })
    }

    fn run_with_stdin(
        &self,
        spec: &CommandSpec,
        input: &mut dyn Read,
    ) -> io::Result<CommandOutput> {
        io::copy(input, &mut io::sink())?;
        self.run(spec)
    }
}

#[derive(Default)]
struct FakeRemote {
    revisions: Mutex<Vec<String>>,
    remote_corrupt: AtomicBool,
    sync_fails: AtomicBool,
    dump_fails: AtomicBool,
    corrupt_dumps: AtomicBool,
    dump_panics: AtomicBool,
    unverifiable: Mutex<HashSet<PathBuf>>,
    dumps: AtomicUsize,
    verifications: AtomicUsize,
}

/// Dump-only tooling backed by plain files.
///
/// The remote repository is a list of revisions. A dump is one `REV:` line
/// per revision, a local repository keeps its loaded dump in `data`, and a
/// local repository verifies when every line of `data` is a `REV:` line.
/// The sync target counts revisions already synced in `synced`.
#[derive(Clone, Default)]
pub struct FakeDumpTool {
    remote: Arc<FakeRemote>,
}

impl FakeDumpTool {
    pub fn with_revisions(n: usize) -> Self {
        let tool = Self::default();
        for _ in 0..n {
            tool.commit();
        }
        tool
    }

    pub fn commit(&self) {
        let mut revs = self.remote.revisions.lock().unwrap();
        let next = revs.len() + 1;
        revs.push(format!("r{next}"));
    }

    pub fn set_remote_corrupt(&self, on: bool) {
        self.remote.remote_corrupt.store(on, Ordering::SeqCst);
    }

    pub fn set_sync_fails(&self, on: bool) {
        self.remote.sync_fails.store(on, Ordering::SeqCst);
    }

    pub fn set_dump_fails(&self, on: bool) {
        self.remote.dump_fails.store(on, Ordering::SeqCst);
    }

    pub fn set_corrupt_dumps(&self, on: bool) {
        self.remote.corrupt_dumps.store(on, Ordering::SeqCst);
    }

    /// The next dumps write a burst of garbage and then panic, as if the
    /// process died mid-transfer.
    pub fn set_dump_panics(&self, on: bool) {
        self.remote.dump_panics.store(on, Ordering::SeqCst);
    }

    /// Local repositories at `path` fail verification regardless of content.
    pub fn set_unverifiable(&self, path: &Path, on: bool) {
        let mut paths = self.remote.unverifiable.lock().unwrap();
        if on {
            paths.insert(path.to_path_buf());
        } else {
            paths.remove(path);
        }
    }

    pub fn dumps(&self) -> usize {
        self.remote.dumps.load(Ordering::SeqCst)
    }

    pub fn data(path: &Path) -> String {
        fs::read_to_string(path.join("data")).unwrap_or_default()
    }

    fn head(&self) -> usize {
        self.remote.revisions.lock().unwrap().len()
    }
}

fn other(detail: &str) -> RepokeepError {
    io::Error::other(detail.to_string()).into()
}

impl DumpTool for FakeDumpTool {
    fn verify_remote(&self, repo: &Repository) -> Result<(), RepokeepError> {
        if self.remote.remote_corrupt.load(Ordering::SeqCst) {
            return Err(RepokeepError::RemoteCorrupt {
                repo: repo.name.clone(),
                detail: "checksum mismatch in r2".to_string(),
            });
        }
        Ok(())
    }

    fn prepare_sync_target(
        &self,
        _repo: &Repository,
        target: &Path,
    ) -> Result<bool, RepokeepError> {
        if target.join("format").is_file() {
            return Ok(false);
        }
        fs::create_dir_all(target)?;
        fs::write(target.join("format"), "fake\n")?;
        fs::write(target.join("synced"), "0")?;
        Ok(true)
    }

    fn sync(
        &self,
        repo: &Repository,
        target: &Path,
        log: &mut dyn Write,
    ) -> Result<(), RepokeepError> {
        if self.remote.sync_fails.load(Ordering::SeqCst) {
            return Err(RepokeepError::SyncFailed {
                repo: repo.name.clone(),
                detail: "source URL mismatch".to_string(),
            });
        }
        let synced: usize = fs::read_to_string(target.join("synced"))?
            .trim()
            .parse()
            .map_err(|_| other("bad synced counter"))?;
        let head = self.head();
        for rev in synced + 1..=head {
            writeln!(log, "Committed revision {rev}.")?;
        }
        fs::write(target.join("synced"), head.to_string())?;
        Ok(())
    }

    fn dump(&self, repo: &Repository, sink: &mut dyn Write) -> Result<(), RepokeepError> {
        self.remote.dumps.fetch_add(1, Ordering::SeqCst);
        if self.remote.dump_fails.load(Ordering::SeqCst) {
            sink.write_all(b"REV:r1\nREV:")?;
            return Err(RepokeepError::DumpFailed {
                repo: repo.name.clone(),
                detail: "hotcopy failed".to_string(),
            });
        }
        if self.remote.corrupt_dumps.load(Ordering::SeqCst) {
            sink.write_all(b"\x00\x01garbage\n")?;
            return Ok(());
        }
        if self.remote.dump_panics.load(Ordering::SeqCst) {
            sink.write_all(&vec![b'X'; 200 * 1024])?;
            panic!("dump interrupted");
        }
        for rev in self.remote.revisions.lock().unwrap().iter() {
            writeln!(sink, "REV:{rev}")?;
        }
        Ok(())
    }

    fn create(&self, path: &Path) -> Result<(), RepokeepError> {
        fs::create_dir_all(path)?;
        fs::write(path.join("format"), "fake\n")?;
        Ok(())
    }

    fn load(&self, path: &Path, source: &mut dyn Read) -> Result<(), RepokeepError> {
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        fs::write(path.join("data"), data)?;
        Ok(())
    }

    fn verify_local(&self, path: &Path) -> Result<(), RepokeepError> {
        self.remote.verifications.fetch_add(1, Ordering::SeqCst);
        if self.remote.unverifiable.lock().unwrap().contains(path) {
            return Err(other("repository is unreadable"));
        }
        let data = fs::read(path.join("data"))?;
        let text = String::from_utf8(data).map_err(|_| other("dump is not text"))?;
        if text.lines().all(|l| l.starts_with("REV:")) {
            Ok(())
        } else {
            Err(other("malformed revision record"))
        }
    }
}

pub fn context(
    storage_root: &Path,
    channel: Arc<dyn RemoteChannel>,
    runner: Arc<dyn CommandRunner>,
) -> Arc<StrategyContext> {
    Arc::new(StrategyContext {
        channel,
        runner,
        layout: StorageLayout::new(storage_root),
        compression: CompressionKind::Gzip,
        quiet: false,
        progress: false,
    })
}

/// Relative path and content of every file below `root`, sorted.
pub fn snapshot(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_path_buf();
                out.push((rel, fs::read(&path).unwrap()));
            }
        }
    }
    out.sort();
    out
}
