//! File operations -- read, write, append, exists and list inside the
//! workspace root.
//!
//! Every path is resolved against the workspace root and checked before any
//! I/O happens:
//!
//! - `..` components are normalised lexically, and the result must stay under
//!   the root (so `../../etc/passwd` is refused without touching the disk);
//! - well-known system locations and credential directories are refused even
//!   when the root would contain them;
//! - every symlink on the way to the target is followed, dangling ones
//!   included, and refused if it points outside the root;
//! - the deepest existing ancestor is canonicalised as a final check;
//! - `write` and `append` never go through a symlink.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Result, SandboxError, ToolError};

const TOOL: &str = "file_operation";

/// System locations no file operation may touch.
const SENSITIVE_ROOTS: &[&str] = &["/etc", "/proc", "/sys", "/dev", "/boot"];

/// Symlink chains longer than this are refused.
const MAX_LINK_HOPS: usize = 16;

/// Path components that mark credential stores wherever they appear.
const SENSITIVE_NAMES: &[&str] = &[".ssh", ".gnupg", ".aws", ".netrc"];

/// The supported operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Read,
    Write,
    Append,
    Exists,
    List,
}

impl FileOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Append => "append",
            Self::Exists => "exists",
            Self::List => "list",
        }
    }
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileOp {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "append" => Ok(Self::Append),
            "exists" => Ok(Self::Exists),
            "list" => Ok(Self::List),
            "" => Err(ToolError::invalid(TOOL, "operation is empty")),
            other => Err(ToolError::invalid(
                TOOL,
                format!("unknown operation `{other}` (expected read, write, append, exists, or list)"),
            )),
        }
    }
}

/// The directory tree file operations are confined to.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    sensitive: Vec<PathBuf>,
    max_read_chars: usize,
}

impl Workspace {
    /// Confine operations to `root`, which must be an existing directory.
    pub fn new(
        root: impl AsRef<Path>,
        extra_sensitive: &[PathBuf],
        max_read_chars: usize,
    ) -> std::result::Result<Self, SandboxError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|e| SandboxError::WorkspaceRoot {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;
        if !canonical.is_dir() {
            return Err(SandboxError::WorkspaceRoot {
                path: root.to_path_buf(),
                reason: "not a directory".into(),
            });
        }

        let sensitive = SENSITIVE_ROOTS
            .iter()
            .map(PathBuf::from)
            .chain(extra_sensitive.iter().map(|p| normalize_path(&canonical.join(p))))
            .collect();

        Ok(Self {
            root: canonical,
            sensitive,
            max_read_chars,
        })
    }

    /// The canonical workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-supplied path and check it against the confinement
    /// rules.  Performs no reads or writes.
    pub async fn resolve(&self, raw_path: &str) -> Result<PathBuf> {
        let raw_path = raw_path.trim();
        if raw_path.is_empty() {
            return Err(ToolError::invalid(TOOL, "path is empty"));
        }
        if raw_path.contains('\0') {
            return Err(ToolError::invalid(TOOL, "path contains a NUL byte"));
        }

        let candidate = if Path::new(raw_path).is_absolute() {
            PathBuf::from(raw_path)
        } else {
            self.root.join(raw_path)
        };
        let normalized = normalize_path(&candidate);

        if !normalized.starts_with(&self.root) {
            return Err(ToolError::unsafe_(format!(
                "path `{raw_path}` resolves outside the workspace"
            )));
        }
        self.check_sensitive(&normalized, raw_path)?;
        self.check_links(&normalized, raw_path).await?;

        // The target may not exist yet; check the deepest ancestor that does.
        for ancestor in normalized.ancestors() {
            if let Ok(real) = tokio::fs::canonicalize(ancestor).await {
                if !real.starts_with(&self.root) {
                    return Err(ToolError::unsafe_(format!(
                        "path `{raw_path}` leaves the workspace through a symlink"
                    )));
                }
                self.check_sensitive(&real, raw_path)?;
                break;
            }
        }

        Ok(normalized)
    }

    /// Walk from the root to `path` and follow each symlink met on the way.
    /// Link targets are resolved against the real parent directory, so a
    /// dangling link cannot hide where a later write would land.
    async fn check_links(&self, path: &Path, raw_path: &str) -> Result<()> {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return Ok(());
        };

        let mut current = self.root.clone();
        for component in relative.components() {
            current.push(component);
            let mut link = current.clone();
            let mut hops = 0;

            while is_symlink(&link).await {
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(ToolError::unsafe_(format!(
                        "path `{raw_path}` has too many levels of symlinks"
                    )));
                }

                let target = tokio::fs::read_link(&link)
                    .await
                    .map_err(|e| io_error(e, raw_path))?;
                let parent = link.parent().unwrap_or(&self.root);
                let base = tokio::fs::canonicalize(parent)
                    .await
                    .unwrap_or_else(|_| parent.to_path_buf());
                let next = normalize_path(&base.join(target));

                if !next.starts_with(&self.root) {
                    warn!(path = raw_path, link = %link.display(), "symlink points outside the workspace");
                    return Err(ToolError::unsafe_(format!(
                        "path `{raw_path}` leaves the workspace through a symlink"
                    )));
                }
                self.check_sensitive(&next, raw_path)?;
                link = next;
            }
        }
        Ok(())
    }

    fn check_sensitive(&self, path: &Path, raw_path: &str) -> Result<()> {
        let protected = self.sensitive.iter().any(|s| path.starts_with(s))
            || path.components().any(|c| match c {
                Component::Normal(name) => SENSITIVE_NAMES.iter().any(|s| name == OsStr::new(s)),
                _ => false,
            });
        if protected {
            return Err(ToolError::unsafe_(format!(
                "path `{raw_path}` targets a protected location"
            )));
        }
        Ok(())
    }

    fn display<'a>(&self, path: &'a Path) -> std::path::Display<'a> {
        path.strip_prefix(&self.root).unwrap_or(path).display()
    }

    /// Perform `op` on `raw_path`.  `content` is required for `write` and
    /// `append`.
    pub async fn apply(&self, op: FileOp, raw_path: &str, content: Option<&str>) -> Result<String> {
        let path = self.resolve(raw_path).await?;
        debug!(op = %op, path = %path.display(), "file operation");

        if matches!(op, FileOp::Write | FileOp::Append) && is_symlink(&path).await {
            return Err(ToolError::unsafe_(format!(
                "refusing to {op} through the symlink `{raw_path}`"
            )));
        }

        match op {
            FileOp::Read => self.read(&path, raw_path).await,
            FileOp::Write => {
                let content = require_content(op, content)?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| io_error(e, raw_path))?;
                }
                tokio::fs::write(&path, content)
                    .await
                    .map_err(|e| io_error(e, raw_path))?;
                Ok(format!(
                    "wrote {} bytes to {}",
                    content.len(),
                    self.display(&path)
                ))
            }
            FileOp::Append => {
                let content = require_content(op, content)?;
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .await
                    .map_err(|e| io_error(e, raw_path))?;
                file.write_all(content.as_bytes())
                    .await
                    .map_err(|e| io_error(e, raw_path))?;
                Ok(format!(
                    "appended {} bytes to {}",
                    content.len(),
                    self.display(&path)
                ))
            }
            FileOp::Exists => {
                let exists = tokio::fs::try_exists(&path)
                    .await
                    .map_err(|e| io_error(e, raw_path))?;
                Ok(exists.to_string())
            }
            FileOp::List => self.list(&path, raw_path).await,
        }
    }

    async fn read(&self, path: &Path, raw_path: &str) -> Result<String> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| io_error(e, raw_path))?;
        if meta.is_dir() {
            return Err(ToolError::failed(format!(
                "`{raw_path}` is a directory; use the list operation"
            )));
        }

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_error(e, raw_path))?;
        Ok(truncate_chars(raw, self.max_read_chars))
    }

    async fn list(&self, path: &Path, raw_path: &str) -> Result<String> {
        let mut read_dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| io_error(e, raw_path))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| io_error(e, raw_path))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            entries.push(name);
        }

        if entries.is_empty() {
            return Ok("(empty directory)".into());
        }
        entries.sort();
        Ok(entries.join("\n"))
    }
}

fn require_content(op: FileOp, content: Option<&str>) -> Result<&str> {
    content.ok_or_else(|| ToolError::invalid(TOOL, format!("`{op}` requires `content`")))
}

fn io_error(e: std::io::Error, raw_path: &str) -> ToolError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ToolError::NotFound {
            what: format!("`{raw_path}`"),
        }
    } else {
        warn!(path = raw_path, error = %e, "file operation failed");
        ToolError::failed(format!("`{raw_path}`: {e}"))
    }
}

async fn is_symlink(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path)
        .await
        .is_ok_and(|meta| meta.file_type().is_symlink())
}

/// Keep at most `max_chars` characters, appending a notice when cut.
fn truncate_chars(raw: String, max_chars: usize) -> String {
    match raw.char_indices().nth(max_chars) {
        None => raw,
        Some((end, _)) => {
            let total = raw.chars().count();
            format!(
                "{}\n\n[... file truncated at {max_chars} chars ({total} total)]",
                &raw[..end]
            )
        }
    }
}

/// Resolve `.` and `..` components without touching the filesystem, since
/// the target may not exist yet.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else if !matches!(components.last(), Some(Component::RootDir)) {
                    components.push(component);
                }
            }
            Component::CurDir => {}
            _ => components.push(component),
        }
    }
    components.iter().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
