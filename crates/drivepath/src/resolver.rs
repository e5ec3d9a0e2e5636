//! Path to identifier resolution.
//!
//! The remote store has no path addressing: a path is walked one segment at a
//! time, each segment resolved by an exact-name query scoped to the id found
//! for the previous one. Nothing is cached between calls.

use std::fmt;

use tracing::debug;

use crate::error::{Error, Result};
use crate::remote::{DriveApi, ROOT_ID};

/// Non-empty, slash-separated remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    segments: Vec<String>,
}

impl RemotePath {
    /// Empty and `.` segments are dropped; at least one segment must remain.
    /// Segments are kept byte for byte, surrounding spaces included.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::from_segments(raw.split('/'))
            .map_err(|_| Error::InvalidPath(raw.to_string()))
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .filter(|s| !s.is_empty() && s != ".")
            .collect();
        if segments.is_empty() {
            return Err(Error::InvalidPath(String::new()));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Final segment: the object's own name.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    pub fn join(&self, name: &str) -> Result<Self> {
        Self::from_segments(self.segments.iter().map(String::as_str).chain([name]))
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Outcome of walking a [`RemotePath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Id of the final segment, when every segment resolved.
    pub target_id: Option<String>,
    /// Scope the last looked-up segment was searched in: the target's
    /// container on success, otherwise the scope in which the first missing
    /// segment was sought.
    pub parent_id: Option<String>,
    /// Number of leading segments that resolved.
    pub resolved: usize,
}

impl Resolution {
    pub fn found(&self) -> bool {
        self.target_id.is_some()
    }

    /// Id of the direct container of the path's final segment, if known.
    pub fn container_id(&self, path: &RemotePath) -> Option<&str> {
        if self.found() || self.resolved + 1 == path.len() {
            self.parent_id.as_deref()
        } else {
            None
        }
    }
}

fn escape_query_literal(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// `name='<name>' and not trashed[ and '<parent>' in parents]`
pub fn name_query(name: &str, parent: Option<&str>) -> String {
    let mut query = format!("name='{}' and not trashed", escape_query_literal(name));
    if let Some(parent) = parent {
        query.push_str(&format!(" and '{}' in parents", escape_query_literal(parent)));
    }
    query
}

/// Look up the id of `name`, optionally restricted to children of `parent`.
///
/// Returns `Ok(None)` when nothing matches and [`Error::AmbiguousName`] when
/// more than one object does.
pub fn find_id(api: &dyn DriveApi, name: &str, parent: Option<&str>) -> Result<Option<String>> {
    let query = name_query(name, parent);
    let page = api.list(&query)?;
    debug!(name, parent, matches = page.files.len(), "name lookup");

    let mut files = page.files;
    match files.len() {
        0 => Ok(None),
        1 => Ok(files.pop().map(|f| f.id)),
        n => Err(Error::AmbiguousName {
            name: name.to_string(),
            parent: parent.map(ToOwned::to_owned),
            matches: n,
        }),
    }
}

/// Walk `path` from the root, calling `lookup(segment, scope)` once per
/// segment until one is missing.
pub fn walk<F>(path: &RemotePath, mut lookup: F) -> Result<Resolution>
where
    F: FnMut(&str, &str) -> Result<Option<String>>,
{
    let mut scope = ROOT_ID.to_string();
    let mut parent = None;
    for (depth, segment) in path.segments().iter().enumerate() {
        let Some(id) = lookup(segment, &scope)? else {
            debug!(%path, segment = segment.as_str(), scope = %scope, "segment not found");
            return Ok(Resolution {
                target_id: None,
                parent_id: Some(scope),
                resolved: depth,
            });
        };
        parent = Some(std::mem::replace(&mut scope, id));
    }
    Ok(Resolution {
        target_id: Some(scope),
        parent_id: parent,
        resolved: path.len(),
    })
}

pub fn resolve_path(api: &dyn DriveApi, path: &RemotePath) -> Result<Resolution> {
    walk(path, |segment, scope| find_id(api, segment, Some(scope)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{FileList, FileMetadata, MediaDownload, MediaSource, RemoteFile};
    use std::cell::RefCell;

    struct ListOnly {
        files: Vec<RemoteFile>,
        queries: RefCell<Vec<String>>,
    }

    impl ListOnly {
        fn with(ids: &[&str]) -> Self {
            Self {
                files: ids
                    .iter()
                    .map(|id| RemoteFile {
                        id: id.to_string(),
                        name: "dup.txt".into(),
                        parents: vec![ROOT_ID.into()],
                    })
                    .collect(),
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl DriveApi for ListOnly {
        fn list(&self, query: &str) -> Result<FileList> {
            self.queries.borrow_mut().push(query.to_string());
            Ok(FileList {
                files: self.files.clone(),
                next_page_token: None,
            })
        }

        fn get_media<'a>(&'a self, _: &str, _: usize) -> Result<Box<dyn MediaDownload + 'a>> {
            unreachable!("resolver never downloads")
        }

        fn create(&self, _: &FileMetadata, _: &MediaSource) -> Result<RemoteFile> {
            unreachable!("resolver never writes")
        }

        fn update(&self, _: &str, _: &FileMetadata, _: &MediaSource) -> Result<RemoteFile> {
            unreachable!("resolver never writes")
        }
    }

    fn fixture_lookup(name: &str, scope: &str) -> Option<String> {
        match (name, scope) {
            ("test", "root") => Some("123".into()),
            ("path", "123") => Some("345".into()),
            ("file.txt", "345") => Some("567".into()),
            _ => None,
        }
    }

    #[test]
    fn query_grammar() {
        assert_eq!(name_query("a.txt", None), "name='a.txt' and not trashed");
        assert_eq!(
            name_query("a.txt", Some("root")),
            "name='a.txt' and not trashed and 'root' in parents"
        );
        assert_eq!(
            name_query("it's\\here", None),
            "name='it\\'s\\\\here' and not trashed"
        );
    }

    #[test]
    fn find_id_counts_matches() {
        let none = ListOnly::with(&[]);
        assert_eq!(find_id(&none, "dup.txt", None).expect("none"), None);

        let one = ListOnly::with(&["abc"]);
        assert_eq!(
            find_id(&one, "dup.txt", Some("root")).expect("one"),
            Some("abc".to_string())
        );
        assert_eq!(
            one.queries.borrow().as_slice(),
            ["name='dup.txt' and not trashed and 'root' in parents"]
        );

        let two = ListOnly::with(&["abc", "def"]);
        let err = find_id(&two, "dup.txt", None).unwrap_err();
        assert!(err.is_ambiguous());
        assert!(err.to_string().contains("multiple 'dup.txt'"), "{err}");
        assert_eq!(two.queries.borrow().len(), 1);
    }

    #[test]
    fn walk_resolves_every_segment_in_order() {
        let path = RemotePath::parse("test/path/file.txt").expect("path");
        let mut calls = Vec::new();
        let res = walk(&path, |name, scope| {
            calls.push((name.to_string(), scope.to_string()));
            Ok(fixture_lookup(name, scope))
        })
        .expect("walk");

        assert_eq!(
            calls,
            vec![
                ("test".to_string(), "root".to_string()),
                ("path".to_string(), "123".to_string()),
                ("file.txt".to_string(), "345".to_string()),
            ]
        );
        assert_eq!(res.target_id.as_deref(), Some("567"));
        assert_eq!(res.parent_id.as_deref(), Some("345"));
        assert_eq!(res.resolved, 3);
    }

    #[test]
    fn walk_single_segment_parent_is_root() {
        let path = RemotePath::parse("test").expect("path");
        let res = walk(&path, |name, scope| Ok(fixture_lookup(name, scope))).expect("walk");
        assert_eq!(res.target_id.as_deref(), Some("123"));
        assert_eq!(res.parent_id.as_deref(), Some(ROOT_ID));
    }

    #[test]
    fn walk_stops_at_first_missing_segment() {
        let path = RemotePath::parse("test/missing/deeper/file.txt").expect("path");
        let mut calls = 0;
        let res = walk(&path, |name, scope| {
            calls += 1;
            Ok(fixture_lookup(name, scope))
        })
        .expect("walk");

        assert_eq!(calls, 2);
        assert_eq!(res.target_id, None);
        assert_eq!(res.parent_id.as_deref(), Some("123"));
        assert_eq!(res.resolved, 1);
        assert_eq!(res.container_id(&path), None);
    }

    #[test]
    fn missing_final_segment_keeps_container() {
        let path = RemotePath::parse("test/path/other.txt").expect("path");
        let res = walk(&path, |name, scope| Ok(fixture_lookup(name, scope))).expect("walk");
        assert_eq!(res.target_id, None);
        assert_eq!(res.container_id(&path), Some("345"));

        let first = RemotePath::parse("absent").expect("path");
        let res = walk(&first, |name, scope| Ok(fixture_lookup(name, scope))).expect("walk");
        assert_eq!(res.parent_id.as_deref(), Some(ROOT_ID));
        assert_eq!(res.container_id(&first), Some(ROOT_ID));
    }

    #[test]
    fn walk_propagates_ambiguity() {
        let path = RemotePath::parse("test/path").expect("path");
        let mut calls = 0;
        let err = walk(&path, |name, scope| {
            calls += 1;
            Err(Error::AmbiguousName {
                name: name.into(),
                parent: Some(scope.into()),
                matches: 2,
            })
        })
        .unwrap_err();
        assert!(err.is_ambiguous());
        assert_eq!(calls, 1);
    }

    #[test]
    fn resolve_path_scopes_each_query() {
        let api = ListOnly::with(&["only"]);
        let path = RemotePath::parse("a/b").expect("path");
        let res = resolve_path(&api, &path).expect("resolve");
        assert_eq!(res.target_id.as_deref(), Some("only"));
        assert_eq!(
            api.queries.borrow().as_slice(),
            [
                "name='a' and not trashed and 'root' in parents",
                "name='b' and not trashed and 'only' in parents",
            ]
        );
    }

    #[test]
    fn path_parsing() {
        let p = RemotePath::parse("/test//path/./file.txt").expect("path");
        assert_eq!(p.segments(), ["test", "path", "file.txt"]);
        assert_eq!(p.name(), "file.txt");
        assert_eq!(p.to_string(), "test/path/file.txt");
        assert_eq!(p.join("x").expect("join").to_string(), "test/path/file.txt/x");

        assert!(matches!(RemotePath::parse(""), Err(Error::InvalidPath(_))));
        assert!(matches!(RemotePath::parse("/./"), Err(Error::InvalidPath(_))));
    }
}
