use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::fs_utils::{format_size, is_separator};
use crate::template::{TemplateRenderer, Variables};
use serde::Serialize;
use std::fs;
use std::sync::Arc;

pub const LARGE_THRESHOLD: u64 = 100 * 1024;
pub const VERY_LARGE_THRESHOLD: u64 = 500 * 1024;
pub const EXCESSIVE_THRESHOLD: u64 = 2 * 1024 * 1024;

/// Approximate cost of branch glyphs and indentation per path separator
const TREE_COST_PER_LEVEL: u64 = 6;
/// Allowance for markdown framing per file
const MARKDOWN_COST_PER_FILE: u64 = 50;
/// One byte of escaping growth per this many content bytes
const ESCAPE_RATIO: u64 = 20;

const OPEN_TAG: &str = "<file path=\"\">\n";
const CLOSE_TAG: &str = "\n</file>\n";

/// Size tier of a prospective document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum WarningLevel {
    Normal,
    Large,
    VeryLarge,
    Excessive,
}

impl WarningLevel {
    pub fn from_size(size: u64) -> Self {
        if size >= EXCESSIVE_THRESHOLD {
            Self::Excessive
        } else if size >= VERY_LARGE_THRESHOLD {
            Self::VeryLarge
        } else if size >= LARGE_THRESHOLD {
            Self::Large
        } else {
            Self::Normal
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Normal => "size is fine",
            Self::Large => "large prompt; some models may truncate it",
            Self::VeryLarge => "very large prompt; consider selecting fewer files",
            Self::Excessive => "excessive prompt size; most models will reject it",
        }
    }
}

/// Inputs to [`SizeEstimator::estimate_prompt_size`]
#[derive(Debug, Clone, Default)]
pub struct EstimationConfig {
    pub template: String,
    pub variables: Variables,
    pub selected_files: Vec<String>,
}

/// Byte breakdown of a prospective document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeEstimate {
    pub template_size: u64,
    pub file_content_size: u64,
    pub tree_overhead: u64,
    pub formatting_overhead: u64,
    pub total_size: u64,
    pub warning_level: WarningLevel,
}

impl std::fmt::Display for SizeEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "~{} (template {}, files {}, tree {}, formatting {}): {}",
            format_size(self.total_size),
            format_size(self.template_size),
            format_size(self.file_content_size),
            format_size(self.tree_overhead),
            format_size(self.formatting_overhead),
            self.warning_level.message()
        )
    }
}

/// Estimates document size without reading file contents
#[derive(Clone, Default)]
pub struct SizeEstimator {
    renderer: Option<Arc<dyn TemplateRenderer>>,
}

impl SizeEstimator {
    /// Estimator that always uses the `{{.NAME}}` arithmetic fallback
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimator that measures the template by rendering it
    pub fn with_renderer(renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self {
            renderer: Some(renderer),
        }
    }

    /// # Errors
    ///
    /// `ShotgunError::Cancelled` if the token is cancelled before or between stats.
    pub fn estimate_prompt_size(
        &self,
        token: &CancellationToken,
        config: &EstimationConfig,
    ) -> Result<SizeEstimate> {
        token.check()?;
        let template_size = self.template_size(config);

        let mut file_content_size = 0u64;
        let mut file_count = 0u64;
        let mut tags_size = 0u64;
        let mut tree_overhead = 0u64;
        for path in &config.selected_files {
            token.check()?;
            tree_overhead += tree_cost(path);
            match fs::metadata(path) {
                Ok(metadata) if metadata.is_dir() => continue,
                Ok(metadata) => file_content_size += metadata.len(),
                Err(e) => log::debug!("estimate: cannot stat {path}: {e}"),
            }
            file_count += 1;
            tags_size += (OPEN_TAG.len() + path.len() + CLOSE_TAG.len()) as u64;
        }

        let formatting_overhead =
            tags_size + file_content_size / ESCAPE_RATIO + MARKDOWN_COST_PER_FILE * file_count;
        let total_size = template_size + file_content_size + tree_overhead + formatting_overhead;

        let estimate = SizeEstimate {
            template_size,
            file_content_size,
            tree_overhead,
            formatting_overhead,
            total_size,
            warning_level: WarningLevel::from_size(total_size),
        };
        log::debug!("size estimate: {estimate}");
        Ok(estimate)
    }

    fn template_size(&self, config: &EstimationConfig) -> u64 {
        if let Some(renderer) = &self.renderer {
            match renderer.render(&config.template, &config.variables) {
                Ok(rendered) => return rendered.len() as u64,
                Err(e) => log::warn!("template render failed, using fallback estimate: {e}"),
            }
        }
        fallback_template_size(&config.template, &config.variables)
    }

    /// Sums on-disk sizes one path at a time, reporting progress before each stat
    /// and once more at the end with an empty path.
    ///
    /// # Errors
    ///
    /// `ShotgunError::Cancelled` as soon as cancellation is observed.
    pub fn calculate_progressively<S, F>(
        &self,
        token: &CancellationToken,
        paths: &[S],
        mut on_progress: F,
    ) -> Result<u64>
    where
        S: AsRef<str>,
        F: FnMut(usize, usize, &str),
    {
        let total = paths.len();
        let mut size = 0u64;
        for (processed, path) in paths.iter().enumerate() {
            token.check()?;
            let path = path.as_ref();
            on_progress(processed, total, path);
            if let Ok(metadata) = fs::metadata(path)
                && !metadata.is_dir()
            {
                size += metadata.len();
            }
        }
        on_progress(total, total, "");
        Ok(size)
    }
}

/// `raw + Σ occurrences × (len(value) − len("{{.NAME}}"))`, floored at zero
pub fn fallback_template_size(template: &str, variables: &Variables) -> u64 {
    let mut size = template.len() as i64;
    for (name, value) in variables {
        let placeholder = format!("{{{{.{name}}}}}");
        let occurrences = template.matches(&placeholder).count() as i64;
        size += occurrences * (value.len() as i64 - placeholder.len() as i64);
    }
    size.max(0) as u64
}

fn tree_cost(path: &str) -> u64 {
    let separators = path.chars().filter(|&c| is_separator(c)).count() as u64;
    TREE_COST_PER_LEVEL * separators + path.len() as u64
}
