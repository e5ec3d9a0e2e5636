#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use drivepath::remote::{
    ChunkStatus, DriveApi, FileList, FileMetadata, MediaDownload, MediaSource, ROOT_ID, RemoteFile,
};
use drivepath::{Error, Result};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub name: String,
    pub parents: Vec<String>,
    pub mime_type: String,
    pub content: Vec<u8>,
    pub trashed: bool,
}

/// In-memory remote that honours the listing query grammar, including
/// duplicate names and trashed objects.
#[derive(Default)]
pub struct MemoryDrive {
    objects: RefCell<BTreeMap<String, StoredObject>>,
    next_id: Cell<u64>,
    pub writes: RefCell<Vec<String>>,
    pub lists: Cell<usize>,
}

impl MemoryDrive {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, obj: StoredObject) -> String {
        let n = self.next_id.get() + 1;
        self.next_id.set(n);
        let id = format!("mem-{n}");
        self.objects.borrow_mut().insert(id.clone(), obj);
        id
    }

    pub fn add_folder(&self, name: &str, parent: &str) -> String {
        self.add_file(name, parent, b"")
    }

    pub fn add_file(&self, name: &str, parent: &str, content: &[u8]) -> String {
        self.insert(StoredObject {
            name: name.to_string(),
            parents: vec![parent.to_string()],
            mime_type: "application/octet-stream".into(),
            content: content.to_vec(),
            trashed: false,
        })
    }

    /// Creates each folder of `path` under the root and returns the innermost id.
    pub fn add_folders(&self, path: &str) -> String {
        path.split('/')
            .filter(|s| !s.is_empty())
            .fold(ROOT_ID.to_string(), |parent, name| self.add_folder(name, &parent))
    }

    pub fn trash(&self, id: &str) {
        if let Some(obj) = self.objects.borrow_mut().get_mut(id) {
            obj.trashed = true;
        }
    }

    pub fn object(&self, id: &str) -> Option<StoredObject> {
        self.objects.borrow().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.borrow().len()
    }

    pub fn children(&self, parent: &str, name: &str) -> Vec<String> {
        self.objects
            .borrow()
            .iter()
            .filter(|(_, o)| !o.trashed && o.name == name && o.parents.iter().any(|p| p == parent))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

// Reads one single-quoted literal, undoing backslash escapes.
fn take_literal(input: &str) -> Option<(String, &str)> {
    let body = input.strip_prefix('\'')?;
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => out.push(chars.next()?.1),
            '\'' => return Some((out, &body[i + 1..])),
            _ => out.push(c),
        }
    }
    None
}

fn parse_query(query: &str) -> Result<(String, Option<String>)> {
    let bad = || Error::msg(format!("unsupported query: {query}"));
    let rest = query.strip_prefix("name=").ok_or_else(bad)?;
    let (name, rest) = take_literal(rest).ok_or_else(bad)?;
    let rest = rest.strip_prefix(" and not trashed").ok_or_else(bad)?;
    if rest.is_empty() {
        return Ok((name, None));
    }
    let rest = rest.strip_prefix(" and ").ok_or_else(bad)?;
    let (parent, rest) = take_literal(rest).ok_or_else(bad)?;
    if rest != " in parents" {
        return Err(bad());
    }
    Ok((name, Some(parent)))
}

pub struct MemoryMedia {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl MediaDownload for MemoryMedia {
    fn next_chunk(&mut self, out: &mut dyn Write) -> Result<ChunkStatus> {
        let end = (self.pos + self.chunk).min(self.data.len());
        out.write_all(&self.data[self.pos..end])?;
        self.pos = end;
        let progress = if self.data.is_empty() {
            1.0
        } else {
            self.pos as f64 / self.data.len() as f64
        };
        Ok(ChunkStatus {
            done: self.pos >= self.data.len(),
            progress: Some(progress),
        })
    }
}

impl DriveApi for MemoryDrive {
    fn list(&self, query: &str) -> Result<FileList> {
        self.lists.set(self.lists.get() + 1);
        let (name, parent) = parse_query(query)?;
        let files = self
            .objects
            .borrow()
            .iter()
            .filter(|(_, o)| !o.trashed && o.name == name)
            .filter(|(_, o)| parent.as_ref().is_none_or(|p| o.parents.contains(p)))
            .map(|(id, o)| RemoteFile {
                id: id.clone(),
                name: o.name.clone(),
                parents: o.parents.clone(),
            })
            .collect();
        Ok(FileList {
            files,
            next_page_token: None,
        })
    }

    fn get_media<'a>(&'a self, id: &str, chunk_size: usize) -> Result<Box<dyn MediaDownload + 'a>> {
        let obj = self.object(id).ok_or_else(|| Error::Remote {
            status: 404,
            body: format!("File not found: {id}."),
        })?;
        Ok(Box::new(MemoryMedia {
            data: obj.content,
            pos: 0,
            chunk: chunk_size.max(1),
        }))
    }

    fn create(&self, metadata: &FileMetadata, media: &MediaSource) -> Result<RemoteFile> {
        let content = fs::read(&media.path)?;
        let parents = metadata
            .parents
            .clone()
            .unwrap_or_else(|| vec![ROOT_ID.to_string()]);
        let id = self.insert(StoredObject {
            name: metadata.name.clone(),
            parents: parents.clone(),
            mime_type: metadata.mime_type.clone(),
            content,
            trashed: false,
        });
        self.writes.borrow_mut().push(format!("create {id}"));
        Ok(RemoteFile {
            id,
            name: metadata.name.clone(),
            parents,
        })
    }

    fn update(&self, id: &str, metadata: &FileMetadata, media: &MediaSource) -> Result<RemoteFile> {
        let content = fs::read(&media.path)?;
        let mut objects = self.objects.borrow_mut();
        let obj = objects.get_mut(id).ok_or_else(|| Error::Remote {
            status: 404,
            body: format!("File not found: {id}."),
        })?;
        obj.name = metadata.name.clone();
        obj.mime_type = metadata.mime_type.clone();
        obj.content = content;
        self.writes.borrow_mut().push(format!("update {id}"));
        Ok(RemoteFile {
            id: id.to_string(),
            name: obj.name.clone(),
            parents: obj.parents.clone(),
        })
    }
}
