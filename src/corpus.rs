//! Knowledge corpus scanning.
//!
//! A corpus is either a directory walked with include/exclude globs or an
//! explicit list of files. Scanning reads every eligible file into a
//! [`Document`]; binary formats go through [`crate::extract`]. Files whose
//! text is blank are dropped, so an empty result means "nothing to index".

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use walkdir::WalkDir;

use knowledge_chat_core::models::Document;

use crate::config::KnowledgeConfig;
use crate::error::{SessionError, SessionResult};
use crate::extract::{content_type_for, extract_text, is_binary};

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Clone)]
pub enum CorpusSource {
    Directory {
        root: PathBuf,
        include_globs: Vec<String>,
        exclude_globs: Vec<String>,
        recursive: bool,
        follow_symlinks: bool,
    },
    Files(Vec<PathBuf>),
}

impl CorpusSource {
    pub fn from_config(config: &KnowledgeConfig) -> Self {
        match &config.files {
            Some(files) => CorpusSource::Files(files.clone()),
            None => CorpusSource::Directory {
                root: config.root.clone(),
                include_globs: config.include_globs.clone(),
                exclude_globs: config.exclude_globs.clone(),
                recursive: config.recursive,
                follow_symlinks: config.follow_symlinks,
            },
        }
    }

    /// A directory corpus with the default `**/*.md` include pattern.
    pub fn markdown_dir(root: impl Into<PathBuf>) -> Self {
        CorpusSource::Directory {
            root: root.into(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: Vec::new(),
            recursive: true,
            follow_symlinks: false,
        }
    }

    /// Where the corpus lives, for error messages.
    pub fn location(&self) -> PathBuf {
        match self {
            CorpusSource::Directory { root, .. } => root.clone(),
            CorpusSource::Files(files) => files
                .first()
                .and_then(|f| f.parent())
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }

    /// Read all eligible documents, sorted by `source_id`.
    pub fn scan(&self) -> SessionResult<Vec<Document>> {
        let mut docs = match self {
            CorpusSource::Directory {
                root,
                include_globs,
                exclude_globs,
                recursive,
                follow_symlinks,
            } => scan_directory(root, include_globs, exclude_globs, *recursive, *follow_symlinks)?,
            CorpusSource::Files(files) => scan_files(files)?,
        };
        docs.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        let listed = docs.len();
        docs.dedup_by(|a, b| a.id == b.id);
        if docs.len() < listed {
            tracing::warn!(duplicates = listed - docs.len(), "corpus lists some files more than once");
        }
        tracing::debug!(documents = docs.len(), "corpus scanned");
        Ok(docs)
    }
}

fn scan_directory(
    root: &Path,
    include_globs: &[String],
    exclude_globs: &[String],
    recursive: bool,
    follow_symlinks: bool,
) -> SessionResult<Vec<Document>> {
    if !root.is_dir() {
        return Err(SessionError::CorpusMissing {
            path: root.to_path_buf(),
        });
    }

    let include_set = build_globset(include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut walker = WalkDir::new(root).follow_links(follow_symlinks);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut docs = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            SessionError::fs("walk", &path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if is_hidden(relative) {
            continue;
        }
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        if let Some(doc) = read_document(path, &rel_str)? {
            docs.push(doc);
        }
    }
    Ok(docs)
}

fn scan_files(files: &[PathBuf]) -> SessionResult<Vec<Document>> {
    let mut docs = Vec::new();
    for path in files {
        if !path.is_file() {
            return Err(SessionError::CorpusMissing { path: path.clone() });
        }
        let source_id = path.to_string_lossy().replace('\\', "/");
        if let Some(doc) = read_document(path, &source_id)? {
            docs.push(doc);
        }
    }
    Ok(docs)
}

fn is_hidden(relative: &Path) -> bool {
    relative
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

/// Read one file. `Ok(None)` means the file was skipped (unreadable as
/// text, failed extraction, or blank).
fn read_document(path: &Path, source_id: &str) -> SessionResult<Option<Document>> {
    let content_type = content_type_for(path);
    let bytes = std::fs::read(path).map_err(|e| SessionError::fs("read", path, e))?;

    let body = if is_binary(content_type) {
        match extract_text(&bytes, content_type) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "skipping file");
                return Ok(None);
            }
        }
    } else {
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!(file = %path.display(), "skipping file that is not valid UTF-8");
                return Ok(None);
            }
        }
    };

    if body.trim().is_empty() {
        tracing::debug!(file = %path.display(), "skipping blank file");
        return Ok(None);
    }

    let updated_at = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source_id.to_string());

    Ok(Some(Document {
        id: Uuid::new_v5(&Uuid::NAMESPACE_URL, source_id.as_bytes()).to_string(),
        source_id: source_id.to_string(),
        title,
        content_type: content_type.to_string(),
        hash: format!("{:x}", Sha256::digest(body.as_bytes())),
        body,
        updated_at,
    }))
}

fn build_globset(patterns: &[String]) -> SessionResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SessionError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SessionError::Config(e.to_string()))
}
