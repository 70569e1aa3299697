//! Content filter store.
//!
//! Named Adblock-Plus rule lists kept as `<name>.txt` files in the profile's
//! `content filters` directory. The UI fetches a list when it is switched on
//! and renderers compile it from disk. Every async operation races the
//! store's cancellation token, which wins over pending I/O and is triggered
//! when the browser quits.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::types::errors::FilterError;

/// A list that was fetched and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterFetched {
    pub name: String,
    pub path: PathBuf,
    pub rules: usize,
}

pub struct ContentFilterStore {
    dir: PathBuf,
    client: reqwest::Client,
    cancel: CancellationToken,
}

impl ContentFilterStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            client: reqwest::Client::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Names of every stored list, sorted.
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }

    /// Token shared by every in-flight operation of this store.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort all in-flight and future operations.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Download the list at `source`. `file://` sources are read from disk.
    pub async fn fetch(&self, source: &str) -> Result<String, FilterError> {
        let url = Url::parse(source).map_err(|e| FilterError::FetchFailed(format!("{}: {}", source, e)))?;
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| FilterError::FetchFailed(source.to_string()))?;
            return tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(FilterError::Cancelled),
                read = tokio::fs::read_to_string(&path) => {
                    read.map_err(|e| FilterError::FetchFailed(format!("{}: {}", source, e)))
                }
            };
        }

        let request = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| FilterError::FetchFailed(format!("{}: {}", source, e)))?;
            if !response.status().is_success() {
                return Err(FilterError::FetchFailed(format!(
                    "{}: {}",
                    source,
                    response.status()
                )));
            }
            response
                .text()
                .await
                .map_err(|e| FilterError::FetchFailed(format!("{}: {}", source, e)))
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FilterError::Cancelled),
            text = request => text,
        }
    }

    /// Store `rules` as the list `name`.
    pub async fn save(&self, name: &str, rules: &str) -> Result<PathBuf, FilterError> {
        let path = self.path_for(name);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FilterError::Cancelled),
            written = tokio::fs::write(&path, rules) => {
                written.map_err(|e| FilterError::IoError(format!("{}: {}", path.display(), e)))?;
            }
        }
        debug!("Stored filter list {}", path.display());
        Ok(path)
    }

    pub async fn load(&self, name: &str) -> Result<String, FilterError> {
        let path = self.path_for(name);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FilterError::Cancelled),
            read = tokio::fs::read_to_string(&path) => read.map_err(|e| match e.kind() {
                ErrorKind::NotFound => FilterError::NotFound(name.to_string()),
                _ => FilterError::IoError(format!("{}: {}", path.display(), e)),
            }),
        }
    }

    /// Fetch `source` and store it under `name`.
    pub async fn fetch_and_save(&self, name: &str, source: &str) -> Result<FilterFetched, FilterError> {
        let text = self.fetch(source).await?;
        let rules = count_rules(&text);
        let path = self.save(name, &text).await?;
        info!("Fetched filter list {} ({} rules)", name, rules);
        Ok(FilterFetched {
            name: name.to_string(),
            path,
            rules,
        })
    }

    /// Delete the stored list. Returns false when there was none.
    pub fn remove(&self, name: &str) -> Result<bool, FilterError> {
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FilterError::IoError(format!("{}: {}", path.display(), e))),
        }
    }
}

/// Number of rule lines, skipping blanks, `!` comments and the `[Adblock]` header.
pub fn count_rules(text: &str) -> usize {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('!') && !line.starts_with('['))
        .count()
}
