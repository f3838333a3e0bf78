//! Audit Storage Backends
//!
//! The log is an append-only sequence of lines. Backends only need to read
//! everything, append one complete line, report the modification time and
//! rename the file away for rotation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Trait for audit log storage backends
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Location of the current log
    fn path(&self) -> &Path;

    /// Read the whole log. A missing log is `Ok(None)`.
    async fn read_all(&self) -> io::Result<Option<String>>;

    /// Modification time of the log, `Ok(None)` when it does not exist
    async fn modified(&self) -> io::Result<Option<SystemTime>>;

    /// Append `line` followed by a newline as a single write. A log whose last
    /// line is unterminated gets its newline first, in the same write.
    async fn append_line(&self, line: &str) -> io::Result<()>;

    /// Move the current log to `target`; the next append starts a new log
    async fn rename(&self, target: &Path) -> io::Result<()>;
}

fn not_found_as_none<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Whether `file` is empty or its last byte is a newline
async fn ends_with_newline(file: &mut fs::File) -> io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

/// File-based audit storage
#[derive(Debug, Clone)]
pub struct FileLogStore {
    path: PathBuf,
}

impl FileLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> io::Result<Option<String>> {
        not_found_as_none(fs::read_to_string(&self.path).await)
    }

    async fn modified(&self) -> io::Result<Option<SystemTime>> {
        match not_found_as_none(fs::metadata(&self.path).await)? {
            Some(meta) => meta.modified().map(Some),
            None => Ok(None),
        }
    }

    async fn append_line(&self, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut buf = String::with_capacity(line.len() + 2);
        if !ends_with_newline(&mut file).await? {
            buf.push('\n');
        }
        buf.push_str(line);
        buf.push('\n');

        file.write_all(buf.as_bytes()).await?;
        // tokio defers the write to a blocking thread; flush waits for it
        file.flush().await?;
        Ok(())
    }

    async fn rename(&self, target: &Path) -> io::Result<()> {
        fs::rename(&self.path, target).await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    content: Option<String>,
    modified: Option<SystemTime>,
    archives: Vec<(PathBuf, String)>,
}

/// In-memory audit storage (for testing and embedding)
#[derive(Debug, Clone)]
pub struct MemoryLogStore {
    path: PathBuf,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Current content of the log
    pub fn content(&self) -> Option<String> {
        self.state.lock().content.clone()
    }

    /// Replace the log content, as an external writer would
    pub fn set_content(&self, content: impl Into<String>) {
        let mut state = self.state.lock();
        state.content = Some(content.into());
        state.modified = Some(next_mtime(state.modified));
    }

    /// Force the modification time of the current log
    pub fn set_modified(&self, modified: SystemTime) {
        let mut state = self.state.lock();
        if state.content.is_some() {
            state.modified = Some(modified);
        }
    }

    /// Archived logs as `(path, content)`, oldest first
    pub fn archives(&self) -> Vec<(PathBuf, String)> {
        self.state.lock().archives.clone()
    }
}

/// Strictly advance the modification time so every write is observable
fn next_mtime(previous: Option<SystemTime>) -> SystemTime {
    let now = SystemTime::now();
    match previous {
        Some(prev) if prev >= now => prev + Duration::from_millis(1),
        _ => now,
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> io::Result<Option<String>> {
        Ok(self.state.lock().content.clone())
    }

    async fn modified(&self) -> io::Result<Option<SystemTime>> {
        Ok(self.state.lock().modified)
    }

    async fn append_line(&self, line: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        let content = state.content.get_or_insert_with(String::new);
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(line);
        content.push('\n');
        state.modified = Some(next_mtime(state.modified));
        Ok(())
    }

    async fn rename(&self, target: &Path) -> io::Result<()> {
        let mut state = self.state.lock();
        let content = state.content.take().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", self.path.display()),
            )
        })?;
        state.modified = None;
        state.archives.push((target.to_path_buf(), content));
        Ok(())
    }
}
