//! File sink: appends newline-delimited payloads.
//!
//! `path` may be static (`/var/log/app.log`) or dynamic
//! (`/var/log/{{$.tenant}}.log`). The client is a cache of open append
//! handles keyed by resolved path, bounded by `max_open_files`; every batch
//! is flushed before `send_batch` returns.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use logferry_core::config::Params;
use logferry_core::error::ConfigError;
use logferry_core::message::Message;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::destination::DestinationPath;
use crate::error::OutputError;
use crate::guard::{Connector, Handle};
use crate::handler::SinkVariant;

const DEFAULT_MAX_OPEN_FILES: usize = 64;

/// Open append handles by path.
#[derive(Default)]
pub struct FileCache {
    files: Mutex<HashMap<PathBuf, BufWriter<File>>>,
}

impl FileCache {
    pub async fn open_count(&self) -> usize {
        self.files.lock().await.len()
    }
}

pub struct FileSink {
    path: DestinationPath,
    max_open_files: usize,
}

impl FileSink {
    /// Params: `path` (required), `max_open_files` (1..=4096, default 64).
    pub fn from_params(params: &Params) -> Result<Self, OutputError> {
        let path = DestinationPath::from_param(params, "path")?;
        if let Some(fixed) = path.static_value() {
            checked_path(fixed).map_err(|reason| ConfigError::invalid("path", reason))?;
        }
        Ok(Self {
            path,
            max_open_files: params.get_usize_in_range(
                "max_open_files",
                DEFAULT_MAX_OPEN_FILES,
                1..=4096,
            )?,
        })
    }
}

/// Rejects empty paths and any `..` component.
fn checked_path(raw: &str) -> Result<PathBuf, String> {
    let path = Path::new(raw.trim());
    if path.as_os_str().is_empty() {
        return Err("path is empty".to_owned());
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(format!("'{raw}' contains a parent directory component"));
    }
    Ok(path.to_path_buf())
}

async fn open_append(path: &Path) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

impl Connector for FileSink {
    type Client = FileCache;

    async fn connect(&self) -> Result<Handle<FileCache>, OutputError> {
        Ok(Handle::owned(FileCache::default()))
    }

    async fn close_client(&self, client: &FileCache) -> Result<(), OutputError> {
        let mut files = client.files.lock().await;
        for (path, writer) in files.iter_mut() {
            if let Err(e) = writer.flush().await {
                tracing::warn!(path = %path.display(), error = %e, "failed to flush file on close");
            }
        }
        files.clear();
        Ok(())
    }
}

impl SinkVariant for FileSink {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn name(&self) -> String {
        format!("file:{}", self.path)
    }

    fn destination(&self) -> Option<&DestinationPath> {
        Some(&self.path)
    }

    async fn send_batch(
        &self,
        client: &FileCache,
        messages: &[Message],
        destination: &str,
    ) -> Result<(), OutputError> {
        let path = checked_path(destination)
            .map_err(|reason| OutputError::Evaluate(format!("{destination}: {reason}")))?;
        let mut files = client.files.lock().await;

        if !files.contains_key(&path) {
            if files.len() >= self.max_open_files {
                // evict an arbitrary handle
                if let Some(victim) = files.keys().next().cloned() {
                    if let Some(mut writer) = files.remove(&victim) {
                        writer.flush().await.map_err(|e| OutputError::send(destination, e))?;
                    }
                }
            }
            let writer = open_append(&path)
                .await
                .map_err(|e| OutputError::send(destination, e))?;
            tracing::debug!(path = %path.display(), "opened output file");
            files.insert(path.clone(), writer);
        }

        let Some(writer) = files.get_mut(&path) else {
            return Err(OutputError::send(destination, "file handle missing"));
        };
        let written = async {
            for message in messages {
                writer.write_all(message.payload()).await?;
                writer.write_all(b"\n").await?;
            }
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            files.remove(&path);
            return Err(OutputError::send(destination, e));
        }
        Ok(())
    }
}
