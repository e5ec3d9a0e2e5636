use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use drivepath::config::{self, ConfigDoc};
use drivepath::remote::{DriveConfig, HttpDrive};
use drivepath::resolver::{RemotePath, find_id, resolve_path};
use drivepath::transfer::{DownloadOptions, RemoteRef, TransferConfig, download_file, upload_file};
use drivepath::{Error, Result};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to a drivepath TOML config (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Look up a single name and print its id
    Find {
        name: String,
        /// Only match children of this folder id
        #[arg(long)]
        parent: Option<String>,
    },
    /// Walk a slash-separated path and print the target and parent ids
    Resolve { path: String },
    /// Upload a local file, updating the remote copy if it already exists
    Upload {
        local: PathBuf,
        /// Remote path; a trailing '/' uploads into that folder under the local name
        remote: String,
        #[arg(long)]
        mime_type: Option<String>,
    },
    /// Download a remote path or shareable link into a local directory
    Download {
        /// Remote path or link carrying an `id` query parameter
        reference: String,
        dest_dir: PathBuf,
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Local file name to use for link downloads
        #[arg(long)]
        name: Option<String>,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(args.log_json)?;

    let doc = match args.config.as_deref() {
        Some(path) => config::load(path)?,
        None => ConfigDoc::default(),
    };

    match args.cmd {
        Command::Find { name, parent } => cmd_find(&doc, &name, parent.as_deref()),
        Command::Resolve { path } => cmd_resolve(&doc, &path),
        Command::Upload {
            local,
            remote,
            mime_type,
        } => cmd_upload(&doc, &local, &remote, mime_type),
        Command::Download {
            reference,
            dest_dir,
            chunk_size,
            name,
        } => cmd_download(&doc, &reference, &dest_dir, chunk_size, name),
    }
}

fn init_logging(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    let installed = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.map_err(|e| Error::msg(format!("failed to install log subscriber: {e}")))
}

fn drive(doc: &ConfigDoc) -> Result<HttpDrive> {
    HttpDrive::from_config(&DriveConfig::from_doc(doc)?)
}

fn cmd_find(doc: &ConfigDoc, name: &str, parent: Option<&str>) -> Result<()> {
    let drive = drive(doc)?;
    match find_id(&drive, name, parent)? {
        Some(id) => {
            println!("{id}");
            Ok(())
        }
        None => Err(Error::msg(format!("no file named '{name}'"))),
    }
}

fn cmd_resolve(doc: &ConfigDoc, raw: &str) -> Result<()> {
    let path = RemotePath::parse(raw)?;
    let drive = drive(doc)?;
    let res = resolve_path(&drive, &path)?;
    println!("target: {}", res.target_id.as_deref().unwrap_or("-"));
    println!("parent: {}", res.parent_id.as_deref().unwrap_or("-"));
    if !res.found() {
        println!("resolved {} of {} segments", res.resolved, path.len());
    }
    Ok(())
}

fn cmd_upload(doc: &ConfigDoc, local: &Path, remote: &str, mime: Option<String>) -> Result<()> {
    let transfer = TransferConfig::from_doc(doc)?;
    let mime_type = mime.unwrap_or(transfer.mime_type);
    let drive = drive(doc)?;
    let id = upload_file(&drive, local, remote, &mime_type)?;
    println!("{id}");
    Ok(())
}

fn cmd_download(
    doc: &ConfigDoc,
    reference: &str,
    dest_dir: &Path,
    chunk_size: Option<usize>,
    name: Option<String>,
) -> Result<()> {
    let transfer = TransferConfig::from_doc(doc)?;
    let reference = RemoteRef::parse(reference)?;
    let opts = DownloadOptions {
        chunk_size: chunk_size.unwrap_or(transfer.chunk_size).max(1),
        file_name: name,
    };
    let drive = drive(doc)?;

    let mut shown = 0u64;
    let mut report = |delta: u64| {
        shown += delta;
        eprint!("\rdownloading {shown:>3}%");
    };
    let written = download_file(&drive, &reference, dest_dir, &opts, &mut report)?;
    if shown > 0 {
        eprintln!();
    }
    println!("{}", written.display());
    Ok(())
}
