use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use steward_core::tool::{Access, Error as ToolError, Tool, ToolOutput};
use tokio::fs;

use crate::config::FileOpsConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    /// Return the text of a file.
    Read,
    /// Replace a file with `content`.
    Write,
    /// List the entries of a directory.
    List,
}

#[derive(Deserialize, JsonSchema)]
pub struct FileOpsParameters {
    #[schemars(description = "`read`, `write` or `list`.")]
    action: FileAction,
    #[schemars(description = "Path of the file or directory.")]
    path: String,
    #[schemars(description = "Text to write, required by `write`.")]
    #[serde(default)]
    content: Option<String>,
}

/// A tool for reading, writing and listing files.
///
/// Which paths it may touch is decided by the safety policy it is
/// registered with; the tool only declares them.
pub struct FileOpsTool {
    parameter_schema: Value,
    max_file_size: u64,
    backup_enabled: bool,
}

impl FileOpsTool {
    /// Creates a new file tool.
    pub fn new(config: &FileOpsConfig) -> Self {
        FileOpsTool {
            parameter_schema: schema_for!(FileOpsParameters).to_value(),
            max_file_size: config.max_file_size,
            backup_enabled: config.backup_enabled,
        }
    }
}

impl Default for FileOpsTool {
    #[inline]
    fn default() -> Self {
        Self::new(&FileOpsConfig::default())
    }
}

impl Tool for FileOpsTool {
    type Input = FileOpsParameters;

    fn name(&self) -> &str {
        "file_operations"
    }

    fn description(&self) -> &str {
        r#"
Reads, writes or lists files.
`read` returns the text of a file, `write` replaces a file with `content`, `list` returns the entries of a directory."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn validate(&self, input: &Self::Input) -> Result<(), ToolError> {
        if input.path.trim().is_empty() {
            return Err(ToolError::invalid_input().with_reason("`path` is empty"));
        }
        if input.action == FileAction::Write && input.content.is_none() {
            return Err(ToolError::invalid_input()
                .with_reason("`content` is required to write a file"));
        }
        Ok(())
    }

    fn access(&self, input: &Self::Input) -> Access {
        let access = Access::none().with_path(&input.path);
        match (&input.action, &input.content) {
            (FileAction::Write, Some(content)) => {
                access.with_payload_len(content.len() as u64)
            }
            _ => access,
        }
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolOutput> + Send + 'static {
        let max_file_size = self.max_file_size;
        let backup_enabled = self.backup_enabled;
        async move {
            let path = PathBuf::from(input.path);
            match input.action {
                FileAction::Read => read(&path, max_file_size).await,
                FileAction::Write => {
                    let content = input.content.unwrap_or_default();
                    write(&path, &content, backup_enabled).await
                }
                FileAction::List => list(&path).await,
            }
        }
    }
}

fn io_error(path: &Path, err: std::io::Error) -> ToolError {
    let reason = match err.kind() {
        IoErrorKind::NotFound => format!("{} does not exist", path.display()),
        _ => format!("{}: {err}", path.display()),
    };
    ToolError::execution_error().with_reason(reason)
}

async fn read(path: &Path, max_file_size: u64) -> ToolOutput {
    let metadata = fs::metadata(path).await.map_err(|err| io_error(path, err))?;
    if metadata.is_dir() {
        return Err(ToolError::execution_error().with_reason(format!(
            "{} is a directory, use `list` instead",
            path.display()
        )));
    }
    // Checked before loading, so oversized files never reach memory.
    if metadata.len() > max_file_size {
        return Err(ToolError::payload_too_large().with_reason(format!(
            "{} is {} bytes, the limit is {max_file_size} bytes",
            path.display(),
            metadata.len()
        )));
    }
    fs::read_to_string(path)
        .await
        .map_err(|err| io_error(path, err))
}

async fn write(path: &Path, content: &str, backup_enabled: bool) -> ToolOutput {
    if backup_enabled && fs::try_exists(path).await.unwrap_or(false) {
        let mut backup = path.as_os_str().to_owned();
        backup.push(".backup");
        fs::copy(path, &backup)
            .await
            .map_err(|err| io_error(path, err))?;
        debug!("backed up {} before overwriting it", path.display());
    }
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| io_error(parent, err))?;
    }
    fs::write(path, content)
        .await
        .map_err(|err| io_error(path, err))?;
    Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
}

async fn list(path: &Path) -> ToolOutput {
    let mut dir = fs::read_dir(path).await.map_err(|err| io_error(path, err))?;
    let mut entries = vec![];
    while let Some(entry) = dir.next_entry().await.map_err(|err| io_error(path, err))? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await.is_ok_and(|ty| ty.is_dir()) {
            name.push('/');
        }
        entries.push(name);
    }
    if entries.is_empty() {
        return Ok(format!("{} is empty", path.display()));
    }
    entries.sort();
    Ok(format!("Entries of {}:\n{}", path.display(), entries.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(action: FileAction, path: &Path, content: Option<&str>) -> FileOpsParameters {
        FileOpsParameters {
            action,
            path: path.display().to_string(),
            content: content.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn test_write_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileOpsTool::default();
        let file = dir.path().join("notes/todo.txt");

        let output = tool
            .execute(input(FileAction::Write, &file, Some("buy milk")))
            .await
            .unwrap();
        assert!(output.starts_with("Wrote 8 bytes"));

        let output = tool
            .execute(input(FileAction::Read, &file, None))
            .await
            .unwrap();
        assert_eq!(output, "buy milk");

        tool.execute(input(FileAction::Write, &file, Some("buy eggs")))
            .await
            .unwrap();
        let backup = std::fs::read_to_string(dir.path().join("notes/todo.txt.backup"))
            .unwrap();
        assert_eq!(backup, "buy milk");

        let output = tool
            .execute(input(FileAction::List, &dir.path().join("notes"), None))
            .await
            .unwrap();
        assert!(output.ends_with("todo.txt\ntodo.txt.backup"));

        let output = tool
            .execute(input(FileAction::List, dir.path(), None))
            .await
            .unwrap();
        assert!(output.ends_with("notes/"));
    }

    #[tokio::test]
    async fn test_read_errors() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FileOpsTool::new(&FileOpsConfig {
            max_file_size: 1024,
            backup_enabled: false,
        });

        let missing = dir.path().join("missing.txt");
        let err = tool
            .execute(input(FileAction::Read, &missing, None))
            .await
            .unwrap_err();
        assert!(err.reason().ends_with("does not exist"));

        let big = dir.path().join("big.txt");
        std::fs::write(&big, vec![b'a'; 2048]).unwrap();
        let err = tool
            .execute(input(FileAction::Read, &big, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), steward_core::tool::ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn test_validate_and_access() {
        let tool = FileOpsTool::default();
        let path = Path::new("data/out.txt");

        let write = input(FileAction::Write, path, Some("hello"));
        assert!(tool.validate(&write).is_ok());
        let access = tool.access(&write);
        assert_eq!(access.paths(), [PathBuf::from("data/out.txt")]);
        assert_eq!(
            access,
            Access::none().with_path("data/out.txt").with_payload_len(5)
        );

        assert!(tool.validate(&input(FileAction::Write, path, None)).is_err());
        assert!(tool.validate(&input(FileAction::Read, Path::new(" "), None)).is_err());
    }
}
