use crate::error::Result;
use regex::{Captures, Regex};
use std::collections::BTreeMap;

/// Named values substituted into a template
pub type Variables = BTreeMap<String, String>;

/// Lexical shape of a placeholder: `{{NAME}}`
pub const PLACEHOLDER_PATTERN: &str = r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}";

/// Template used by the CLI when none is supplied
pub const DEFAULT_TEMPLATE: &str = "\
# Task
{{TASK}}

# Rules
{{RULES}}

# Project files ({{FILE_COUNT}} selected, {{CURRENT_DATE}})
{{FILE_STRUCTURE}}
";

/// Renders a template against a set of bindings
pub trait TemplateRenderer: Send + Sync {
    /// # Errors
    ///
    /// Implementations return `ShotgunError::Render` when the template cannot be rendered.
    fn render(&self, template: &str, variables: &Variables) -> Result<String>;
}

/// Represents a placeholder found in a template
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    /// The full match including {{ and }}
    pub full_match: String,
    /// The variable name between the braces
    pub name: String,
    /// Starting position in the template
    pub start: usize,
    /// Ending position in the template
    pub end: usize,
}

/// Literal whole-token substitution of `{{NAME}}` placeholders.
///
/// Substitution is a single pass: values are never re-scanned, so file content
/// that happens to contain `{{TASK}}` is embedded as-is. Unknown placeholders are
/// left verbatim.
#[derive(Debug, Clone)]
pub struct PlaceholderRenderer {
    pattern: Regex,
}

impl PlaceholderRenderer {
    /// # Errors
    ///
    /// Returns `ShotgunError::Regex` if the placeholder pattern fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(PLACEHOLDER_PATTERN)?,
        })
    }

    /// Finds all placeholders in the given text, in order of appearance
    pub fn find_placeholders(&self, template: &str) -> Vec<Placeholder> {
        self.pattern
            .captures_iter(template)
            .filter_map(|capture| {
                let full_match = capture.get(0)?;
                let name = capture.get(1)?;
                Some(Placeholder {
                    full_match: full_match.as_str().to_string(),
                    name: name.as_str().to_string(),
                    start: full_match.start(),
                    end: full_match.end(),
                })
            })
            .collect()
    }

    pub fn render_str(&self, template: &str, variables: &Variables) -> String {
        self.pattern
            .replace_all(template, |caps: &Captures| {
                variables
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, variables: &Variables) -> Result<String> {
        Ok(self.render_str(template, variables))
    }
}

/// Renders a template with a freshly compiled [`PlaceholderRenderer`]
///
/// # Errors
///
/// Returns `ShotgunError::Regex` if the placeholder pattern fails to compile.
pub fn render_template(template: &str, variables: &Variables) -> Result<String> {
    Ok(PlaceholderRenderer::new()?.render_str(template, variables))
}
