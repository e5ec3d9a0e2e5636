use std::fs;
use std::io::Write;
use std::time::Duration;

use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigDoc, resolve_required_string_field, resolve_string_field};
use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_remote_text;

use super::{ChunkStatus, DriveApi, FileList, FileMetadata, MediaDownload, MediaSource, RemoteFile};

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
pub const DEFAULT_TOKEN_ENV: &str = "DRIVE_ACCESS_TOKEN";

const LIST_FIELDS: &str = "nextPageToken, files(id, name, parents)";
const FILE_FIELDS: &str = "id, name, parents";

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriveConfig {
    pub api_base_url: Option<String>,
    pub api_base_url_env: Option<String>,
    pub upload_base_url: Option<String>,
    pub upload_base_url_env: Option<String>,
    pub token: Option<String>,
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_base_url_env: None,
            upload_base_url: None,
            upload_base_url_env: None,
            token: None,
            token_env: Some(DEFAULT_TOKEN_ENV.to_string()),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl DriveConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        doc.section("drive")
    }
}

/// Drive v3 REST client over blocking reqwest.
pub struct HttpDrive {
    client: Client,
    api_base: String,
    upload_base: String,
    token: String,
}

impl HttpDrive {
    pub fn new(
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn from_config(cfg: &DriveConfig) -> Result<Self> {
        let api_base =
            resolve_string_field(cfg.api_base_url.as_deref(), cfg.api_base_url_env.as_deref())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let upload_base = resolve_string_field(
            cfg.upload_base_url.as_deref(),
            cfg.upload_base_url_env.as_deref(),
        )
        .unwrap_or_else(|| api_base.clone());
        let token = resolve_required_string_field(
            "drive.token",
            cfg.token.as_deref(),
            cfg.token_env.as_deref(),
        )?;
        Self::new(
            api_base,
            upload_base,
            token,
            Duration::from_secs(cfg.timeout_secs.max(1)),
        )
    }

    fn endpoint(&self, base: &str, segments: &[&str], params: &[(&str, &str)]) -> Result<Url> {
        let mut url =
            Url::parse(base).map_err(|e| Error::msg(format!("invalid base url '{base}': {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::msg(format!("base url '{base}' cannot carry a path")))?
            .pop_if_empty()
            .extend(segments);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    fn start_session(
        &self,
        req: RequestBuilder,
        metadata: &FileMetadata,
        media: &MediaSource,
    ) -> Result<String> {
        let res = req
            .bearer_auth(&self.token)
            .header("X-Upload-Content-Type", media.mime_type.as_str())
            .header("X-Upload-Content-Length", media.len.to_string())
            .json(metadata)
            .send()?;
        let res = check_status(res)?;
        res.headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
            .ok_or_else(|| Error::msg("resumable upload session has no Location header"))
    }

    fn send_media(&self, session: &str, media: &MediaSource) -> Result<RemoteFile> {
        let file = fs::File::open(&media.path)?;
        let res = self
            .client
            .put(session)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, media.mime_type.as_str())
            .body(Body::sized(file, media.len))
            .send()?;
        Ok(check_status(res)?.json()?)
    }
}

fn check_status(res: Response) -> Result<Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().unwrap_or_default();
    Err(Error::Remote {
        status,
        body: sanitize_remote_text(body.trim()),
    })
}

impl DriveApi for HttpDrive {
    fn list(&self, query: &str) -> Result<FileList> {
        let url = self.endpoint(
            &self.api_base,
            &["drive", "v3", "files"],
            &[("q", query), ("spaces", "drive"), ("fields", LIST_FIELDS)],
        )?;
        let res = self.client.get(url).bearer_auth(&self.token).send()?;
        Ok(check_status(res)?.json()?)
    }

    fn get_media<'a>(&'a self, id: &str, chunk_size: usize) -> Result<Box<dyn MediaDownload + 'a>> {
        let url = self.endpoint(
            &self.api_base,
            &["drive", "v3", "files", id],
            &[("alt", "media")],
        )?;
        Ok(Box::new(HttpDownload {
            drive: self,
            url,
            chunk_size: chunk_size.max(1) as u64,
            received: 0,
            total: None,
            done: false,
        }))
    }

    fn create(&self, metadata: &FileMetadata, media: &MediaSource) -> Result<RemoteFile> {
        let url = self.endpoint(
            &self.upload_base,
            &["upload", "drive", "v3", "files"],
            &[("uploadType", "resumable"), ("fields", FILE_FIELDS)],
        )?;
        let session = self.start_session(self.client.post(url), metadata, media)?;
        self.send_media(&session, media)
    }

    fn update(&self, id: &str, metadata: &FileMetadata, media: &MediaSource) -> Result<RemoteFile> {
        let url = self.endpoint(
            &self.upload_base,
            &["upload", "drive", "v3", "files", id],
            &[("uploadType", "resumable"), ("fields", FILE_FIELDS)],
        )?;
        let session = self.start_session(self.client.patch(url), metadata, media)?;
        self.send_media(&session, media)
    }
}

/// Ranged `alt=media` download, one request per chunk.
struct HttpDownload<'a> {
    drive: &'a HttpDrive,
    url: Url,
    chunk_size: u64,
    received: u64,
    total: Option<u64>,
    done: bool,
}

impl HttpDownload<'_> {
    fn progress(&self) -> Option<f64> {
        self.total.map(|t| {
            if t == 0 {
                1.0
            } else {
                (self.received as f64 / t as f64).min(1.0)
            }
        })
    }
}

impl MediaDownload for HttpDownload<'_> {
    fn next_chunk(&mut self, out: &mut dyn Write) -> Result<ChunkStatus> {
        if self.done {
            return Ok(ChunkStatus {
                done: true,
                progress: self.progress(),
            });
        }

        let end = self.received.saturating_add(self.chunk_size - 1);
        let res = self
            .drive
            .client
            .get(self.url.clone())
            .bearer_auth(&self.drive.token)
            .header(RANGE, format!("bytes={}-{}", self.received, end))
            .send()?;

        match res.status() {
            StatusCode::PARTIAL_CONTENT => {
                if let Some(total) = res
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(content_range_total)
                {
                    self.total = Some(total);
                }
                let body = res.bytes()?;
                out.write_all(&body)?;
                self.received += body.len() as u64;
                self.done = body.is_empty()
                    || match self.total {
                        Some(total) => self.received >= total,
                        None => (body.len() as u64) < self.chunk_size,
                    };
            }
            // Server ignored the range and sent the whole object.
            StatusCode::OK => {
                let body = res.bytes()?;
                out.write_all(&body)?;
                self.received += body.len() as u64;
                self.total = Some(self.received);
                self.done = true;
            }
            // Zero-length objects cannot satisfy any range.
            StatusCode::RANGE_NOT_SATISFIABLE if self.received == 0 => {
                self.total = Some(0);
                self.done = true;
            }
            _ => {
                let res = check_status(res)?;
                return Err(Error::msg(format!(
                    "unexpected download status {}",
                    res.status()
                )));
            }
        }

        Ok(ChunkStatus {
            done: self.done,
            progress: self.progress(),
        })
    }
}

// "bytes 0-1023/4096" -> 4096; "bytes 0-1023/*" -> None
fn content_range_total(raw: &str) -> Option<u64> {
    raw.trim()
        .strip_prefix("bytes")?
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
}
