//! Markdown source loader
//!
//! Walks the configured roots, applies include/exclude globs and turns each
//! file into a [`Document`] with canonical text. The chunker only ever sees
//! `Document` values, so callers may also construct them directly.

use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::config::SourcesConfig;
use crate::error::{Result, RetrievalError};

/// Metadata carried alongside document text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source_path: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A loaded document, immutable for the duration of one build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Build a document from already-canonical text. The title is the first
    /// level-one heading, falling back to the file stem of `doc_id`.
    pub fn new(
        doc_id: impl Into<String>,
        text: impl Into<String>,
        source_path: impl Into<String>,
    ) -> Self {
        let doc_id = doc_id.into();
        let text = text.into();
        let title = first_h1(&text).unwrap_or_else(|| file_stem(&doc_id));
        Self {
            metadata: DocumentMetadata {
                source_path: source_path.into(),
                title,
                tags: Vec::new(),
            },
            doc_id,
            text,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    title: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Discovers and loads Markdown files under the configured roots
pub struct SourceLoader {
    roots: Vec<PathBuf>,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl SourceLoader {
    pub fn new(config: &SourcesConfig) -> Self {
        Self {
            roots: config.roots.clone(),
            include: config.include.clone(),
            exclude: config.exclude.clone(),
        }
    }

    /// List matching files as `(root, path)` pairs in root order, then path
    /// order. A file reachable from several roots is listed once, under the
    /// first root that reaches it. A root that is not a directory is a
    /// configuration error.
    pub fn discover(&self) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut found: Vec<(PathBuf, usize, PathBuf)> = Vec::new();

        for (position, root) in self.roots.iter().enumerate() {
            if !root.is_dir() {
                return Err(RetrievalError::config(format!(
                    "source root {} is not a readable directory",
                    root.display()
                )));
            }

            let mut overrides = OverrideBuilder::new(root);
            for glob in &self.include {
                overrides.add(glob).map_err(|e| {
                    RetrievalError::config(format!("invalid include pattern {glob:?}: {e}"))
                })?;
            }
            for glob in &self.exclude {
                overrides.add(&format!("!{glob}")).map_err(|e| {
                    RetrievalError::config(format!("invalid exclude pattern {glob:?}: {e}"))
                })?;
            }
            let overrides = overrides
                .build()
                .map_err(|e| RetrievalError::config(format!("invalid source patterns: {e}")))?;

            let walker = WalkBuilder::new(root)
                .overrides(overrides)
                .follow_links(false)
                .build();

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(error = %e, "walk error, skipped");
                        continue;
                    }
                };
                if entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                    let path = entry.into_path();
                    let canonical = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                    found.push((canonical, position, path));
                }
            }
        }

        found.sort();
        found.dedup_by(|later, first| later.0 == first.0);
        found.sort_by(|a, b| (a.1, &a.2).cmp(&(b.1, &b.2)));

        let files: Vec<(PathBuf, PathBuf)> = found
            .into_iter()
            .map(|(_, position, path)| (self.roots[position].clone(), path))
            .collect();
        tracing::debug!(files = files.len(), "source discovery finished");
        Ok(files)
    }

    /// Load every discovered file. Unreadable files are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for (root, path) in self.discover()? {
            match load_document(&root, &path) {
                Ok(doc) => documents.push(doc),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to load document")
                }
            }
        }
        Ok(documents)
    }
}

/// Read one file into a [`Document`]; `doc_id` is the root-relative path.
pub fn load_document(root: &Path, path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path)?;
    let raw = String::from_utf8_lossy(&bytes);
    let canonical = canonicalize_text(&raw);
    let (front_matter, body) = split_front_matter(&canonical);

    let doc_id = relative_id(root, path);
    let mut doc = Document::new(doc_id, body.to_string(), path.to_string_lossy().into_owned());
    if let Some(fm) = front_matter {
        if let Some(title) = fm.title.filter(|t| !t.trim().is_empty()) {
            doc.metadata.title = title.trim().to_string();
        }
        doc.metadata.tags = fm.tags;
    }
    Ok(doc)
}

/// Strip a BOM, normalize line endings and drop trailing whitespace per line.
pub fn canonicalize_text(raw: &str) -> String {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    for line in unified.lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim_end_matches('\n').to_string()
}

fn split_front_matter(text: &str) -> (Option<FrontMatter>, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (None, text);
    };
    let Some(end) = rest.find("\n---") else {
        return (None, text);
    };
    let block = &rest[..end];
    let after = &rest[end + 4..];
    // closing fence must end its line
    let body = match after.strip_prefix('\n') {
        Some(body) => body,
        None if after.is_empty() => after,
        None => return (None, text),
    };

    match serde_yaml::from_str::<FrontMatter>(block) {
        Ok(fm) => (Some(fm), body),
        Err(e) => {
            tracing::warn!(error = %e, "unparseable front matter ignored");
            (None, body)
        }
    }
}

fn relative_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn first_h1(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn file_stem(doc_id: &str) -> String {
    Path::new(doc_id)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| doc_id.to_string())
}
