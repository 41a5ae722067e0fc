//! # shotgun
//!
//! Assembles a set of selected files and a text template into a single prompt
//! document for Large Language Models, then writes it safely to disk.
//!
//! ## Pipeline
//!
//! - [`SizeEstimator`] gives a cheap byte estimate and warning tier up front
//! - [`StructureBuilder`] renders a directory tree of the selection and embeds
//!   each file, guarding against oversized, binary and secret-bearing files
//! - [`PromptGenerator`] substitutes `{{TASK}}`, `{{RULES}}`, `{{FILE_STRUCTURE}}`
//!   and friends into the template
//! - [`write_prompt_file`] persists the result as `shotgun_prompt_<date>_<time>.md`
//!   with a temp-file-and-rename write
//!
//! Every long-running call takes a [`CancellationToken`] that is polled at stage
//! and file boundaries.
//!
//! ## Usage
//!
//! ```no_run
//! use shotgun::{CancellationToken, GenerationConfig, PromptGenerator, StructureBuilder};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> shotgun::Result<()> {
//! let builder = Arc::new(StructureBuilder::new()?);
//! let generator = PromptGenerator::new(builder)?;
//! let config = GenerationConfig {
//!     template: shotgun::DEFAULT_TEMPLATE.to_string(),
//!     selected_files: vec!["src/main.rs".to_string(), "Cargo.toml".to_string()],
//!     task: "Explain the entry point".to_string(),
//!     ..GenerationConfig::default()
//! };
//!
//! let prompt = generator.generate_prompt(&CancellationToken::new(), &config)?;
//! let path = shotgun::write_prompt_file(&prompt.content, Path::new(""))?;
//! println!("{}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod error;
pub mod estimate;
pub mod fs_utils;
pub mod prompt;
pub mod structure;
pub mod template;
pub mod writer;

// Re-export main types and functions for convenience
pub use cancel::CancellationToken;
pub use error::{Result, ShotgunError};
pub use estimate::{EstimationConfig, SizeEstimate, SizeEstimator, WarningLevel};
pub use fs_utils::{BinaryClassifier, ContentSniffer, is_sensitive_file};
pub use prompt::{
    GeneratedPrompt, GenerationConfig, GenerationEvent, GenerationHandle, PromptGenerator,
};
pub use structure::{BuilderSettings, DirectoryNode, StructureBuilder, TreeFormat};
pub use template::{DEFAULT_TEMPLATE, PlaceholderRenderer, TemplateRenderer, Variables};
pub use writer::{generate_filename, write_prompt_file};
