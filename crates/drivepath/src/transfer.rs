use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::remote::{DEFAULT_CHUNK_SIZE, DEFAULT_MIME_TYPE, DriveApi, FileMetadata, MediaSource};
use crate::resolver::{RemotePath, resolve_path};

fn default_mime_type() -> String {
    DEFAULT_MIME_TYPE.into()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferConfig {
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            mime_type: default_mime_type(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl TransferConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        let cfg: Self = doc.section("transfer")?;
        if cfg.chunk_size == 0 {
            return Err(Error::msg("transfer.chunk_size must be greater than zero"));
        }
        Ok(cfg)
    }
}

fn local_file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::msg(format!("{} has no usable file name", path.display())))
}

/// Full remote path an upload of `local_path` to `remote_target` writes to.
///
/// A target that is empty, `.`, or ends with `/` names a folder and the local
/// file name is appended. Anything else names the remote file itself.
pub fn upload_target(remote_target: &str, local_path: &Path) -> Result<RemotePath> {
    if remote_target.is_empty() || remote_target == "." || remote_target.ends_with('/') {
        let name = local_file_name(local_path)?;
        return RemotePath::from_segments(remote_target.split('/').chain([name]));
    }
    RemotePath::parse(remote_target)
}

/// Upload `local_path`, updating the remote file in place when it already
/// exists and creating it in its folder otherwise. Returns the remote id.
///
/// Folders are never created: every folder segment of the target must exist.
pub fn upload_file(
    api: &dyn DriveApi,
    local_path: &Path,
    remote_target: &str,
    mime_type: &str,
) -> Result<String> {
    let target = upload_target(remote_target, local_path)?;
    let media = MediaSource::from_file(local_path, mime_type)?;
    let resolution = resolve_path(api, &target)?;

    let metadata = FileMetadata {
        name: target.name().to_string(),
        mime_type: mime_type.to_string(),
        parents: None,
    };

    let written = if let Some(id) = resolution.target_id.as_deref() {
        debug!(%target, id, "updating existing file");
        api.update(id, &metadata, &media)?
    } else if let Some(parent) = resolution.container_id(&target) {
        debug!(%target, parent, "creating new file");
        let metadata = FileMetadata {
            parents: Some(vec![parent.to_string()]),
            ..metadata
        };
        api.create(&metadata, &media)?
    } else {
        let missing = &target.segments()[..=resolution.resolved];
        return Err(Error::path_resolution(
            &target,
            format!("folder '{}' does not exist", missing.join("/")),
        ));
    };

    info!(local = %local_path.display(), %target, id = %written.id, bytes = media.len, "uploaded");
    Ok(written.id)
}

/// What a download points at: a file id taken from a shareable link, or a
/// remote path to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRef {
    Id(String),
    Path(RemotePath),
}

impl RemoteRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let link = raw.trim();
        match Url::parse(link) {
            Ok(url) if url.has_host() => Ok(Self::Id(id_from_url(&url, link)?)),
            _ => Ok(Self::Path(RemotePath::parse(raw)?)),
        }
    }
}

fn id_from_url(url: &Url, raw: &str) -> Result<String> {
    url.query_pairs()
        .find(|(k, _)| k == "id")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidReference(raw.to_string()))
}

/// File id from a shareable link such as `https://drive.google.com/open?id=<id>`.
pub fn file_id_from_link(link: &str) -> Result<String> {
    let url = Url::parse(link.trim()).map_err(|_| Error::InvalidReference(link.to_string()))?;
    id_from_url(&url, link)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    pub chunk_size: usize,
    /// Local file name; defaults to the last path segment, or the id for links.
    pub file_name: Option<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            file_name: None,
        }
    }
}

/// Receives whole-percent increments as a download advances.
pub trait Progress {
    fn advance(&mut self, delta: u64);
}

impl<F: FnMut(u64)> Progress for F {
    fn advance(&mut self, delta: u64) {
        self(delta)
    }
}

pub struct NoProgress;

impl Progress for NoProgress {
    fn advance(&mut self, _delta: u64) {}
}

/// Turns fractional progress into increments on a 0..=100 scale that never
/// go backwards.
#[derive(Debug, Default)]
pub struct PercentTracker {
    last: u64,
}

impl PercentTracker {
    /// Returns the increment since the last update, zero if none.
    pub fn update(&mut self, fraction: f64) -> u64 {
        let pct = (fraction.clamp(0.0, 1.0) * 100.0).round() as u64;
        let pct = pct.min(100);
        if pct <= self.last {
            return 0;
        }
        let delta = pct - self.last;
        self.last = pct;
        delta
    }

    pub fn percent(&self) -> u64 {
        self.last
    }
}

/// Download `reference` into `local_dir`, creating the directory if needed.
/// Returns the path of the written file.
pub fn download_file(
    api: &dyn DriveApi,
    reference: &RemoteRef,
    local_dir: &Path,
    opts: &DownloadOptions,
    progress: &mut dyn Progress,
) -> Result<PathBuf> {
    let (id, default_name) = match reference {
        RemoteRef::Id(id) => (id.clone(), id.clone()),
        RemoteRef::Path(path) => {
            let resolution = resolve_path(api, path)?;
            let Some(id) = resolution.target_id else {
                return Err(Error::path_resolution(path, "no such file"));
            };
            (id, path.name().to_string())
        }
    };
    let name = opts.file_name.clone().unwrap_or(default_name);
    let name = local_file_name(Path::new(&name))?.to_string();

    fs::create_dir_all(local_dir)?;
    let dest = local_dir.join(&name);

    let mut media = api.get_media(&id, opts.chunk_size.max(1))?;
    let mut sink = fs::File::create(&dest)?;
    let mut tracker = PercentTracker::default();
    loop {
        let status = media.next_chunk(&mut sink)?;
        if let Some(fraction) = status.progress {
            let delta = tracker.update(fraction);
            if delta > 0 {
                progress.advance(delta);
            }
        }
        debug!(id = %id, percent = tracker.percent(), done = status.done, "chunk");
        if status.done {
            break;
        }
    }
    sink.flush()?;

    info!(id = %id, dest = %dest.display(), "downloaded");
    Ok(dest)
}
