use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only record of send attempts next to the config file.
#[derive(Debug, Clone)]
pub struct SendLog {
    path: PathBuf,
}

impl SendLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_success(&self, timestamp: DateTime<Utc>, content: &str) -> Result<()> {
        let mut file = self.open()?;
        writeln!(file, "## Sent at {}", timestamp.to_rfc3339())?;
        writeln!(file, "- Message: {}", content.replace('\n', " "))?;
        writeln!(file)?;
        Ok(())
    }

    pub fn append_failure(
        &self,
        timestamp: DateTime<Utc>,
        content: &str,
        error: &str,
    ) -> Result<()> {
        let mut file = self.open()?;
        writeln!(file, "## Failed at {}", timestamp.to_rfc3339())?;
        writeln!(file, "- Message: {}", content.replace('\n', " "))?;
        writeln!(file, "- Error: {}", error.replace('\n', " "))?;
        writeln!(file)?;
        Ok(())
    }

    fn open(&self) -> Result<std::fs::File> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create send log parent directory {}",
                    parent.display()
                )
            })?;
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open send log {}", self.path.display()))
    }
}
