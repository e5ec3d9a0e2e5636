//! Training-loop adapters that push each written file to the drive.
//!
//! A base writer ([`ModelCheckpoint`], [`CsvLogger`]) produces a local file at
//! the end of every epoch; [`UploadAfterWrite`] wraps any writer and forwards
//! the produced file to an [`UploadCallback`].

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::remote::{DEFAULT_MIME_TYPE, DriveApi};
use crate::transfer::upload_file;

/// Metric values reported for one epoch, keyed by metric name.
pub type EpochLogs = BTreeMap<String, f64>;

pub trait EpochWriter {
    /// Perform the end-of-epoch write and return the file it produced.
    fn on_epoch_end(&mut self, epoch: u64, logs: &EpochLogs) -> Result<PathBuf>;
}

pub trait UploadCallback {
    fn upload(&self, local: &Path, remote_target: &str) -> Result<String>;
}

impl<F> UploadCallback for F
where
    F: Fn(&Path, &str) -> Result<String>,
{
    fn upload(&self, local: &Path, remote_target: &str) -> Result<String> {
        self(local, remote_target)
    }
}

/// Uploads through [`upload_file`] with a fixed MIME type.
pub struct DriveUploader<A> {
    api: A,
    mime_type: String,
}

impl<A: DriveApi> DriveUploader<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

impl<A: DriveApi> UploadCallback for DriveUploader<A> {
    fn upload(&self, local: &Path, remote_target: &str) -> Result<String> {
        upload_file(&self.api, local, remote_target, &self.mime_type)
    }
}

// "" stays the drive root; anything else becomes folder form ("a/b/").
fn folder_target(folder: &str) -> String {
    let folder = folder.trim().trim_end_matches('/');
    if folder.is_empty() {
        String::new()
    } else {
        format!("{folder}/")
    }
}

/// Runs the wrapped writer, then uploads what it wrote into `remote_folder`.
pub struct UploadAfterWrite<W, U> {
    inner: W,
    uploader: U,
    remote_folder: String,
}

impl<W: EpochWriter, U: UploadCallback> UploadAfterWrite<W, U> {
    pub fn new(inner: W, uploader: U, remote_folder: &str) -> Self {
        Self {
            inner,
            uploader,
            remote_folder: folder_target(remote_folder),
        }
    }

    pub fn remote_folder(&self) -> &str {
        &self.remote_folder
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: EpochWriter, U: UploadCallback> EpochWriter for UploadAfterWrite<W, U> {
    fn on_epoch_end(&mut self, epoch: u64, logs: &EpochLogs) -> Result<PathBuf> {
        let written = self.inner.on_epoch_end(epoch, logs)?;
        let id = self.uploader.upload(&written, &self.remote_folder)?;
        debug!(epoch, local = %written.display(), id = %id, "epoch output uploaded");
        Ok(written)
    }
}

// `{{` and `}}` are literal braces, as in Python format strings.
const TEMPLATE_PATTERN: &str = r"\{\{|\}\}|\{(\w+)(?::([^{}]*))?\}";
const FORMAT_SPEC_PATTERN: &str = r"^(0)?(\d+)?(?:\.(\d+))?([df])?$";

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::msg(format!("invalid pattern {pattern}: {e}")))
}

enum TemplateValue {
    Int(u64),
    Float(f64),
}

fn format_value(key: &str, value: TemplateValue, spec: &str) -> Result<String> {
    let caps = compile(FORMAT_SPEC_PATTERN)?
        .captures(spec)
        .ok_or_else(|| Error::msg(format!("unsupported format spec '{spec}' for '{key}'")))?;
    let zero = caps.get(1).is_some();
    let width: usize = caps.get(2).map_or(0, |m| m.as_str().parse().unwrap_or(0));
    let precision: Option<usize> = caps.get(3).and_then(|m| m.as_str().parse().ok());
    let kind = caps.get(4).map(|m| m.as_str());

    let out = match (value, kind) {
        (TemplateValue::Int(v), None | Some("d")) => {
            if zero {
                format!("{v:0width$}")
            } else {
                format!("{v:width$}")
            }
        }
        (TemplateValue::Int(v), Some(_)) => format_float(v as f64, zero, width, precision),
        (TemplateValue::Float(v), None | Some("f")) => format_float(v, zero, width, precision),
        (TemplateValue::Float(_), Some(k)) => {
            return Err(Error::msg(format!(
                "format type '{k}' cannot be applied to metric '{key}'"
            )));
        }
    };
    Ok(out)
}

fn format_float(v: f64, zero: bool, width: usize, precision: Option<usize>) -> String {
    match (zero, precision) {
        (true, Some(p)) => format!("{v:0width$.p$}"),
        (true, None) => format!("{v:0width$}"),
        (false, Some(p)) => format!("{v:width$.p$}"),
        (false, None) => format!("{v:width$}"),
    }
}

/// Expand `{epoch}` and `{<metric>}` placeholders in a checkpoint path.
///
/// `{epoch}` is 1-based. Placeholders accept a format spec such as
/// `{epoch:02d}` or `{val_loss:.4f}`; `{{` and `}}` produce literal braces.
pub fn format_filepath(template: &str, epoch: u64, logs: &EpochLogs) -> Result<PathBuf> {
    let re = compile(TEMPLATE_PATTERN)?;
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&template[last..whole.start()]);
        last = whole.end();
        let Some(key) = caps.get(1).map(|m| m.as_str()) else {
            out.push_str(&whole.as_str()[..1]);
            continue;
        };
        let spec = caps.get(2).map_or("", |m| m.as_str());
        let value = if key == "epoch" {
            TemplateValue::Int(epoch + 1)
        } else {
            let v = logs.get(key).copied().ok_or_else(|| {
                Error::msg(format!("unknown key '{key}' in checkpoint path '{template}'"))
            })?;
            TemplateValue::Float(v)
        };
        out.push_str(&format_value(key, value, spec)?);
    }
    out.push_str(&template[last..]);
    Ok(PathBuf::from(out))
}

/// Saves model state through an injected closure at the end of every epoch.
pub struct ModelCheckpoint<S> {
    filepath: String,
    save: S,
}

impl<S> ModelCheckpoint<S>
where
    S: FnMut(&Path, u64, &EpochLogs) -> Result<()>,
{
    pub fn new(filepath: impl Into<String>, save: S) -> Self {
        Self {
            filepath: filepath.into(),
            save,
        }
    }
}

impl<S> EpochWriter for ModelCheckpoint<S>
where
    S: FnMut(&Path, u64, &EpochLogs) -> Result<()>,
{
    fn on_epoch_end(&mut self, epoch: u64, logs: &EpochLogs) -> Result<PathBuf> {
        let path = format_filepath(&self.filepath, epoch, logs)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        (self.save)(&path, epoch, logs)?;
        Ok(path)
    }
}

/// Appends one row of epoch metrics per epoch to a CSV file.
///
/// Columns are `epoch` followed by the metric names seen on the first epoch,
/// in sorted order. Metrics missing from a later epoch are written as `NA`.
pub struct CsvLogger {
    path: PathBuf,
    separator: u8,
    append: bool,
    keys: Option<Vec<String>>,
}

impl CsvLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            separator: b',',
            append: false,
            keys: None,
        }
    }

    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    /// Keep existing rows instead of truncating the file on the first epoch.
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn csv_err(&self, e: csv::Error) -> Error {
        Error::msg(format!("failed to write {}: {e}", self.path.display()))
    }
}

impl EpochWriter for CsvLogger {
    fn on_epoch_end(&mut self, epoch: u64, logs: &EpochLogs) -> Result<PathBuf> {
        let first = self.keys.is_none();
        let keep_existing = !first || self.append;
        let has_rows = keep_existing
            && fs::metadata(&self.path)
                .map(|m| m.len() > 0)
                .unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(keep_existing)
            .truncate(!keep_existing)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.separator)
            .has_headers(false)
            .from_writer(file);

        let keys = self
            .keys
            .get_or_insert_with(|| logs.keys().cloned().collect())
            .clone();
        if first && !has_rows {
            let mut header = vec!["epoch".to_string()];
            header.extend(keys.iter().cloned());
            writer.write_record(&header).map_err(|e| self.csv_err(e))?;
        }

        let mut row = vec![epoch.to_string()];
        row.extend(keys.iter().map(|k| {
            logs.get(k)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "NA".to_string())
        }));
        writer.write_record(&row).map_err(|e| self.csv_err(e))?;
        writer.flush()?;
        Ok(self.path.clone())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Remote folder that receives checkpoint files.
    pub checkpoint_folder: String,
    /// Remote folder that receives the CSV log; the drive root when empty.
    pub log_folder: String,
}

impl HooksConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        doc.section("hooks")
    }
}

pub fn checkpoint_with_upload<S, U>(
    filepath: impl Into<String>,
    save: S,
    uploader: U,
    drive_folder: &str,
) -> UploadAfterWrite<ModelCheckpoint<S>, U>
where
    S: FnMut(&Path, u64, &EpochLogs) -> Result<()>,
    U: UploadCallback,
{
    UploadAfterWrite::new(ModelCheckpoint::new(filepath, save), uploader, drive_folder)
}

pub fn csv_log_with_upload<U: UploadCallback>(
    path: impl Into<PathBuf>,
    uploader: U,
    drive_folder: &str,
) -> UploadAfterWrite<CsvLogger, U> {
    UploadAfterWrite::new(CsvLogger::new(path), uploader, drive_folder)
}
