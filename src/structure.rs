use crate::cancel::CancellationToken;
use crate::error::{Result, ShotgunError};
use crate::fs_utils::{
    BinaryClassifier, ContentSniffer, SensitivePatterns, escape_markup, format_size,
    path_segments, read_file_contents,
};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;

/// Default per-file size limit (10MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of content-loading workers
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Glyph and annotation options for the tree block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeFormat {
    /// Box-drawing glyphs when true, plain ASCII otherwise
    pub use_unicode: bool,
    /// Append the on-disk size to each file line
    pub show_sizes: bool,
    /// Emit placeholder blocks for binary files
    pub show_binary: bool,
}

impl Default for TreeFormat {
    fn default() -> Self {
        Self {
            use_unicode: true,
            show_sizes: false,
            show_binary: true,
        }
    }
}

struct Glyphs {
    branch: &'static str,
    last: &'static str,
    open: &'static str,
    closed: &'static str,
}

impl TreeFormat {
    fn glyphs(self) -> Glyphs {
        if self.use_unicode {
            Glyphs {
                branch: "├── ",
                last: "└── ",
                open: "│   ",
                closed: "    ",
            }
        } else {
            Glyphs {
                branch: "|-- ",
                last: "`-- ",
                open: "|   ",
                closed: "    ",
            }
        }
    }
}

/// Runtime-adjustable builder configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderSettings {
    pub max_file_size: u64,
    pub max_concurrency: usize,
    pub tree_format: TreeFormat,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            tree_format: TreeFormat::default(),
        }
    }
}

/// A directory or a selected file; never both
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryNode {
    pub name: String,
    /// Original selected path, set on leaves only
    pub path: Option<String>,
    pub is_dir: bool,
    pub children: BTreeMap<String, DirectoryNode>,
}

impl DirectoryNode {
    fn directory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            is_dir: true,
            children: BTreeMap::new(),
        }
    }

    fn leaf(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: Some(path.to_string()),
            is_dir: false,
            children: BTreeMap::new(),
        }
    }

    /// Unnamed root that owns the top-level entries
    pub fn root() -> Self {
        Self::directory("")
    }

    /// Inserts one selected path, creating intermediate directories.
    ///
    /// A leaf that later needs children becomes a directory. A path naming an
    /// existing directory is ignored.
    pub fn insert_path(&mut self, path: &str) {
        let segments = path_segments(path);
        let Some((file, dirs)) = segments.split_last() else {
            return;
        };

        let mut node = self;
        for dir in dirs {
            let child = node
                .children
                .entry((*dir).to_string())
                .or_insert_with(|| Self::directory(dir));
            if !child.is_dir {
                log::debug!("promoting selected file '{dir}' to a directory for {path}");
                *child = Self::directory(dir);
            }
            node = child;
        }

        if node.children.get(*file).is_some_and(|existing| existing.is_dir) {
            log::debug!("ignoring {path}: already present as a directory");
        } else {
            node.children
                .insert((*file).to_string(), Self::leaf(file, path));
        }
    }

    /// Children ordered directories first, then by name
    pub fn sorted_children(&self) -> Vec<&DirectoryNode> {
        let mut children: Vec<&DirectoryNode> = self.children.values().collect();
        children.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });
        children
    }

    /// Leaf paths in serialization order
    pub fn leaf_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        self.collect_leaves(&mut paths);
        paths
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        for child in self.sorted_children() {
            if child.is_dir {
                child.collect_leaves(out);
            } else if let Some(path) = child.path.as_deref() {
                out.push(path);
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.children
            .values()
            .map(|c| if c.is_dir { c.leaf_count() } else { 1 })
            .sum()
    }

    /// Number of directory nodes below this one
    pub fn directory_count(&self) -> usize {
        self.children
            .values()
            .filter(|c| c.is_dir)
            .map(|c| 1 + c.directory_count())
            .sum()
    }
}

/// Builds a fresh tree from the selected paths
pub fn build_tree<S: AsRef<str>>(paths: &[S]) -> DirectoryNode {
    let mut root = DirectoryNode::root();
    for path in paths {
        root.insert_path(path.as_ref());
    }
    root
}

/// How a leaf's content was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Oversized,
    Sensitive,
    Binary,
    Error,
}

/// Load result for one leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    /// Escaped text, or the placeholder sentence
    pub content: String,
    /// On-disk size, when the stat succeeded
    pub size: Option<u64>,
    pub kind: ContentKind,
    pub error: Option<String>,
}

impl FileContent {
    fn placeholder(path: &str, size: u64, kind: ContentKind, content: String) -> Self {
        Self {
            path: path.to_string(),
            content,
            size: Some(size),
            kind,
            error: None,
        }
    }

    fn failed(path: &str, size: Option<u64>, err: &dyn std::fmt::Display) -> Self {
        log::warn!("failed to load {path}: {err}");
        Self {
            path: path.to_string(),
            content: format!("[Error reading file: {err}]"),
            size,
            kind: ContentKind::Error,
            error: Some(err.to_string()),
        }
    }
}

pub fn oversize_placeholder(size: u64, limit: u64) -> String {
    format!("[File too large: {size} bytes exceeds the limit of {limit} bytes]")
}

pub fn sensitive_placeholder(size: u64) -> String {
    format!("[Sensitive file redacted: {size} bytes]")
}

pub fn binary_placeholder(size: u64) -> String {
    format!("[Binary file: {size} bytes]")
}

/// Produces the structure document for a set of selected paths
pub struct StructureBuilder {
    settings: RwLock<BuilderSettings>,
    sensitive: SensitivePatterns,
    classifier: Arc<dyn BinaryClassifier>,
}

impl std::fmt::Debug for StructureBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructureBuilder")
            .field("settings", &self.settings())
            .finish_non_exhaustive()
    }
}

impl StructureBuilder {
    /// Builder with default settings and the [`ContentSniffer`] classifier
    ///
    /// # Errors
    ///
    /// Returns `ShotgunError::Regex` if the sensitive pattern set fails to compile.
    pub fn new() -> Result<Self> {
        Self::with_classifier(Arc::new(ContentSniffer))
    }

    /// # Errors
    ///
    /// Returns `ShotgunError::Regex` if the sensitive pattern set fails to compile.
    pub fn with_classifier(classifier: Arc<dyn BinaryClassifier>) -> Result<Self> {
        Ok(Self {
            settings: RwLock::new(BuilderSettings::default()),
            sensitive: SensitivePatterns::new()?,
            classifier,
        })
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> BuilderSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn max_file_size(&self) -> u64 {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .max_file_size
    }

    /// # Errors
    ///
    /// `ShotgunError::InvalidConfig` when `size` is zero.
    pub fn set_max_file_size(&self, size: u64) -> Result<()> {
        if size == 0 {
            return Err(ShotgunError::InvalidConfig {
                field: "max_file_size",
                value: size,
            });
        }
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .max_file_size = size;
        Ok(())
    }

    /// # Errors
    ///
    /// `ShotgunError::InvalidConfig` when `workers` is zero.
    pub fn set_max_concurrency(&self, workers: usize) -> Result<()> {
        if workers == 0 {
            return Err(ShotgunError::InvalidConfig {
                field: "max_concurrency",
                value: 0,
            });
        }
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .max_concurrency = workers;
        Ok(())
    }

    pub fn set_tree_format(&self, format: TreeFormat) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .tree_format = format;
    }

    pub fn is_sensitive(&self, path: &str) -> bool {
        self.sensitive.is_match(path)
    }

    /// Builds the full structure document.
    ///
    /// Empty input yields an empty document. Per-file failures are embedded
    /// inline; only cancellation fails the call.
    ///
    /// # Errors
    ///
    /// `ShotgunError::Cancelled` if the token is cancelled before or during loading.
    pub fn generate_structure<S: AsRef<str>>(
        &self,
        token: &CancellationToken,
        paths: &[S],
    ) -> Result<String> {
        if paths.is_empty() {
            return Ok(String::new());
        }
        token.check()?;

        let settings = self.settings();
        let root = build_tree(paths);
        let leaves = root.leaf_paths();
        log::debug!(
            "building structure for {} files in {} directories",
            leaves.len(),
            root.directory_count()
        );

        let contents = self.load_contents(token, &leaves, &settings)?;
        // Parallel workers may all pass their check before one of them cancels.
        token.check()?;
        Ok(render_document(&root, &contents, settings.tree_format))
    }

    fn load_contents(
        &self,
        token: &CancellationToken,
        leaves: &[&str],
        settings: &BuilderSettings,
    ) -> Result<HashMap<String, FileContent>> {
        let limit = settings.max_file_size;
        let load = |path: &&str| -> Result<FileContent> {
            token.check()?;
            Ok(self.load_file(path, limit))
        };

        let workers = worker_count(settings.max_concurrency, leaves.len());
        let pool = if workers > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => Some(pool),
                Err(e) => {
                    log::warn!("cannot start {workers} loading workers, loading sequentially: {e}");
                    None
                }
            }
        } else {
            None
        };

        let loaded: Vec<FileContent> = match pool {
            Some(pool) => pool.install(|| leaves.par_iter().map(load).collect::<Result<_>>())?,
            None => leaves.iter().map(load).collect::<Result<_>>()?,
        };

        Ok(loaded
            .into_iter()
            .map(|content| (content.path.clone(), content))
            .collect())
    }

    /// Resolves a single leaf: stat, then size, sensitivity and binary guards,
    /// then a full read.
    pub fn load_file(&self, path: &str, max_file_size: u64) -> FileContent {
        let file_path = Path::new(path);
        let size = match fs::metadata(file_path) {
            Ok(metadata) => metadata.len(),
            Err(e) => return FileContent::failed(path, None, &e),
        };

        if size > max_file_size {
            log::debug!("{path}: {size} bytes exceeds limit of {max_file_size}");
            return FileContent::placeholder(
                path,
                size,
                ContentKind::Oversized,
                oversize_placeholder(size, max_file_size),
            );
        }
        if self.sensitive.is_match(path) {
            log::debug!("{path}: redacted as sensitive");
            return FileContent::placeholder(
                path,
                size,
                ContentKind::Sensitive,
                sensitive_placeholder(size),
            );
        }
        if self.classifier.is_binary(file_path) {
            return FileContent::placeholder(
                path,
                size,
                ContentKind::Binary,
                binary_placeholder(size),
            );
        }

        match read_file_contents(file_path) {
            Ok(text) => FileContent {
                path: path.to_string(),
                content: escape_markup(&text),
                size: Some(size),
                kind: ContentKind::Text,
                error: None,
            },
            Err(e) => FileContent::failed(path, Some(size), &e),
        }
    }
}

/// Serializes the tree block followed by the file blocks
/// Pool size for a batch: the configured limit, capped by the number of files
/// and the available hardware parallelism
fn worker_count(max_concurrency: usize, files: usize) -> usize {
    let hardware = thread::available_parallelism().map_or(1, NonZeroUsize::get);
    max_concurrency.min(files).min(hardware).max(1)
}

pub fn render_document(
    root: &DirectoryNode,
    contents: &HashMap<String, FileContent>,
    format: TreeFormat,
) -> String {
    let mut tree = String::new();
    let mut files = String::new();
    render_level(root, "", &format.glyphs(), format, contents, &mut tree, &mut files);

    if files.is_empty() {
        return tree;
    }
    tree.push('\n');
    tree.push_str(&files);
    tree
}

fn render_level(
    node: &DirectoryNode,
    prefix: &str,
    glyphs: &Glyphs,
    format: TreeFormat,
    contents: &HashMap<String, FileContent>,
    tree: &mut String,
    files: &mut String,
) {
    let children = node.sorted_children();
    let count = children.len();
    for (i, child) in children.into_iter().enumerate() {
        let last = i + 1 == count;
        tree.push_str(prefix);
        tree.push_str(if last { glyphs.last } else { glyphs.branch });
        tree.push_str(&child.name);

        if child.is_dir {
            tree.push_str("/\n");
            let nested = format!("{prefix}{}", if last { glyphs.closed } else { glyphs.open });
            render_level(child, &nested, glyphs, format, contents, tree, files);
            continue;
        }

        let content = child.path.as_deref().and_then(|p| contents.get(p));
        if format.show_sizes
            && let Some(size) = content.and_then(|c| c.size)
        {
            tree.push_str(&format!(" ({})", format_size(size)));
        }
        tree.push('\n');

        if let Some(content) = content {
            if content.kind == ContentKind::Binary && !format.show_binary {
                continue;
            }
            files.push_str(&format!(
                "<file path=\"{}\">\n{}\n</file>\n",
                escape_markup(&content.path),
                content.content
            ));
        }
    }
}
