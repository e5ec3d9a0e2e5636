//! Boundary to the remote file store.
//!
//! The store addresses flat objects by opaque id; folders are objects that
//! other objects list in their `parents`. Everything path-shaped is built on
//! top of [`DriveApi::list`] by the resolver.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod http;

pub use http::{DriveConfig, HttpDrive};

/// Well-known id of the top-level scope ("My Drive").
pub const ROOT_ID: &str = "root";

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parents: Vec<String>,
}

/// One page of a listing call.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<RemoteFile>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
}

/// Local content to send with a create or update call. Sent through a
/// resumable upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub path: PathBuf,
    pub mime_type: String,
    pub len: u64,
}

impl MediaSource {
    pub fn from_file(path: &Path, mime_type: &str) -> Result<Self> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(Error::msg(format!("{} is not a regular file", path.display())));
        }
        Ok(Self {
            path: path.to_path_buf(),
            mime_type: mime_type.to_string(),
            len: meta.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkStatus {
    pub done: bool,
    /// Fraction of the object received so far, when the server reports a total.
    pub progress: Option<f64>,
}

/// Incremental media download. Each call writes at most one chunk to `out`.
pub trait MediaDownload {
    fn next_chunk(&mut self, out: &mut dyn Write) -> Result<ChunkStatus>;
}

pub trait DriveApi {
    /// Run one listing query; only the first page is returned.
    fn list(&self, query: &str) -> Result<FileList>;

    fn get_media<'a>(&'a self, id: &str, chunk_size: usize) -> Result<Box<dyn MediaDownload + 'a>>;

    fn create(&self, metadata: &FileMetadata, media: &MediaSource) -> Result<RemoteFile>;

    /// Replace content and metadata of an existing object. Parents are left as-is.
    fn update(&self, id: &str, metadata: &FileMetadata, media: &MediaSource) -> Result<RemoteFile>;
}

impl<T: DriveApi + ?Sized> DriveApi for &T {
    fn list(&self, query: &str) -> Result<FileList> {
        (**self).list(query)
    }

    fn get_media<'a>(&'a self, id: &str, chunk_size: usize) -> Result<Box<dyn MediaDownload + 'a>> {
        (**self).get_media(id, chunk_size)
    }

    fn create(&self, metadata: &FileMetadata, media: &MediaSource) -> Result<RemoteFile> {
        (**self).create(metadata, media)
    }

    fn update(&self, id: &str, metadata: &FileMetadata, media: &MediaSource) -> Result<RemoteFile> {
        (**self).update(id, metadata, media)
    }
}
