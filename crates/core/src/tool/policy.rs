use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use super::Error;

const DEFAULT_MAX_EXECUTION_TIME: Duration = Duration::from_secs(60);
const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// A call ceiling over a fixed window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    /// Calls allowed within one window.
    pub max_calls: u32,
    /// Length of the window.
    pub window: Duration,
}

impl RateLimit {
    /// Allows `max_calls` per minute.
    #[inline]
    pub fn per_minute(max_calls: u32) -> Self {
        Self {
            max_calls,
            window: DEFAULT_RATE_LIMIT_WINDOW,
        }
    }
}

/// Guards enforced around a tool's execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafetyPolicy {
    /// If not empty, every declared path must fall under one of these.
    pub allowed_dirs: Vec<PathBuf>,
    /// Declared paths under any of these are always denied.
    pub blocked_dirs: Vec<PathBuf>,
    /// Ceiling in bytes for declared write payloads and for the output.
    pub max_payload_size: Option<u64>,
    /// Deadline for one call.
    pub max_execution_time: Duration,
    /// Optional call ceiling.
    pub rate_limit: Option<RateLimit>,
    /// Whether successful output is passed through the redactor.
    pub redact_output: bool,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            allowed_dirs: vec![],
            blocked_dirs: vec![],
            max_payload_size: None,
            max_execution_time: DEFAULT_MAX_EXECUTION_TIME,
            rate_limit: None,
            redact_output: false,
        }
    }
}

impl SafetyPolicy {
    /// Checks every declared path against the block list, then the allow
    /// list. Both sides are compared after [`resolve_path`], so a symbolic
    /// link cannot lead outside an allowed directory.
    pub fn check_paths(&self, paths: &[PathBuf]) -> Result<(), Error> {
        for path in paths {
            let resolved = resolve_path(path);
            if let Some(blocked) = self
                .blocked_dirs
                .iter()
                .map(|dir| resolve_path(dir))
                .find(|dir| resolved.starts_with(dir))
            {
                return Err(Error::access_denied().with_reason(format!(
                    "{} is inside the blocked directory {}",
                    resolved.display(),
                    blocked.display()
                )));
            }
            if !self.allowed_dirs.is_empty()
                && !self
                    .allowed_dirs
                    .iter()
                    .any(|dir| resolved.starts_with(resolve_path(dir)))
            {
                return Err(Error::access_denied().with_reason(format!(
                    "{} is outside the allowed directories",
                    resolved.display()
                )));
            }
        }
        Ok(())
    }

    /// Checks a payload size against the ceiling.
    pub fn check_payload(&self, len: u64) -> Result<(), Error> {
        match self.max_payload_size {
            Some(max) if len > max => Err(Error::payload_too_large()
                .with_reason(format!("{len} bytes exceeds the limit of {max} bytes"))),
            _ => Ok(()),
        }
    }
}

/// Resolves `path` the way the file system would.
///
/// The path is made absolute against the working directory. Its longest
/// existing prefix is canonicalized, following symbolic links, and the
/// components that do not exist yet are folded lexically on top.
pub fn resolve_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let components: Vec<_> = absolute.components().collect();
    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        if let Ok(canonical) = prefix.canonicalize() {
            return fold(canonical, &components[split..]);
        }
    }
    fold(PathBuf::new(), &components)
}

fn fold(mut base: PathBuf, components: &[Component<'_>]) -> PathBuf {
    for component in components {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                base.pop();
            }
            other => base.push(other.as_os_str()),
        }
    }
    base
}
