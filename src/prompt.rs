use crate::cancel::CancellationToken;
use crate::error::{Result, ShotgunError};
use crate::structure::StructureBuilder;
use crate::template::{PlaceholderRenderer, Variables};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

pub const TASK_VAR: &str = "TASK";
pub const RULES_VAR: &str = "RULES";
pub const CURRENT_DATE_VAR: &str = "CURRENT_DATE";
pub const FILE_COUNT_VAR: &str = "FILE_COUNT";
pub const FILE_STRUCTURE_VAR: &str = "FILE_STRUCTURE";

/// Inputs to [`PromptGenerator::generate_prompt`]
#[derive(Debug, Clone, Default)]
pub struct GenerationConfig {
    pub template: String,
    /// Caller bindings; the task, rules and automatic bindings take precedence
    pub variables: Variables,
    pub selected_files: Vec<String>,
    pub task: String,
    pub rules: String,
}

/// Rendered prompt plus metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedPrompt {
    #[serde(skip)]
    pub content: String,
    pub template_size: usize,
    pub file_count: usize,
    pub total_size: usize,
    pub generated_at: DateTime<Local>,
}

/// Message from a background generation
#[derive(Debug)]
pub enum GenerationEvent {
    Progress(f64),
    Complete(Result<GeneratedPrompt>),
}

/// Handle to a generation running on its own thread
#[derive(Debug)]
pub struct GenerationHandle {
    token: CancellationToken,
    events: Receiver<GenerationEvent>,
    worker: Option<JoinHandle<()>>,
}

impl GenerationHandle {
    /// Requests cooperative cancellation; the worker stops at its next checkpoint.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Blocks for the next event. `None` once the worker has gone away.
    pub fn recv(&self) -> Option<GenerationEvent> {
        self.events.recv().ok()
    }

    /// Blocks until the completion event arrives.
    ///
    /// # Errors
    ///
    /// - The generation error, including `ShotgunError::Cancelled`.
    /// - `ShotgunError::GenerationAborted` if the worker exits without completing.
    pub fn wait(mut self) -> Result<GeneratedPrompt> {
        while let Ok(event) = self.events.recv() {
            if let GenerationEvent::Complete(result) = event {
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
                return result;
            }
        }
        Err(ShotgunError::GenerationAborted {
            reason: "worker exited without a result".to_string(),
        })
    }
}

/// Builds final prompts from a template and selected files
#[derive(Debug)]
pub struct PromptGenerator {
    builder: Arc<StructureBuilder>,
    renderer: PlaceholderRenderer,
}

impl PromptGenerator {
    /// # Errors
    ///
    /// Returns `ShotgunError::Regex` if the placeholder pattern fails to compile.
    pub fn new(builder: Arc<StructureBuilder>) -> Result<Self> {
        Ok(Self {
            builder,
            renderer: PlaceholderRenderer::new()?,
        })
    }

    pub fn builder(&self) -> &StructureBuilder {
        &self.builder
    }

    /// # Errors
    ///
    /// - `ShotgunError::MissingTemplate` if the template is empty.
    /// - `ShotgunError::Cancelled` if the token is cancelled at any stage boundary.
    /// - Errors from the structure builder.
    pub fn generate_prompt(
        &self,
        token: &CancellationToken,
        config: &GenerationConfig,
    ) -> Result<GeneratedPrompt> {
        self.run(token, config, &mut |_| {})
    }

    /// Runs generation on a background thread.
    ///
    /// `on_progress` is called on the worker thread with 0.0, 0.25, 0.5, 0.75 and
    /// 1.0 as stages complete; the same values are mirrored as
    /// [`GenerationEvent::Progress`] before the final [`GenerationEvent::Complete`].
    ///
    /// # Errors
    ///
    /// `ShotgunError::Io` if the worker thread cannot be spawned.
    pub fn generate_prompt_async<F>(
        self: &Arc<Self>,
        config: GenerationConfig,
        mut on_progress: F,
    ) -> Result<GenerationHandle>
    where
        F: FnMut(f64) + Send + 'static,
    {
        let token = CancellationToken::new();
        let (tx, events) = mpsc::channel();
        let generator = Arc::clone(self);
        let worker_token = token.clone();

        let worker = thread::Builder::new()
            .name("prompt-generator".to_string())
            .spawn(move || {
                let mut progress = |fraction: f64| {
                    on_progress(fraction);
                    let _ = tx.send(GenerationEvent::Progress(fraction));
                };
                let result = generator.run(&worker_token, &config, &mut progress);
                if let Err(e) = &result {
                    log::debug!("background generation ended: {e}");
                }
                let _ = tx.send(GenerationEvent::Complete(result));
            })?;

        Ok(GenerationHandle {
            token,
            events,
            worker: Some(worker),
        })
    }

    fn run(
        &self,
        token: &CancellationToken,
        config: &GenerationConfig,
        progress: &mut dyn FnMut(f64),
    ) -> Result<GeneratedPrompt> {
        if config.template.is_empty() {
            return Err(ShotgunError::MissingTemplate);
        }
        let started = Local::now();
        progress(0.0);

        token.check()?;
        let mut variables = config.variables.clone();
        variables.insert(TASK_VAR.to_string(), config.task.clone());
        variables.insert(RULES_VAR.to_string(), config.rules.clone());
        variables.insert(
            CURRENT_DATE_VAR.to_string(),
            started.format("%Y-%m-%d").to_string(),
        );
        variables.insert(
            FILE_COUNT_VAR.to_string(),
            config.selected_files.len().to_string(),
        );
        progress(0.25);

        token.check()?;
        if !config.selected_files.is_empty() {
            let structure = self
                .builder
                .generate_structure(token, &config.selected_files)?;
            variables.insert(FILE_STRUCTURE_VAR.to_string(), structure);
        }
        progress(0.5);

        token.check()?;
        let content = self.renderer.render_str(&config.template, &variables);
        progress(0.75);

        token.check()?;
        let prompt = GeneratedPrompt {
            template_size: config.template.len(),
            file_count: config.selected_files.len(),
            total_size: content.len(),
            content,
            generated_at: started,
        };
        log::debug!(
            "generated prompt: {} bytes from {} files",
            prompt.total_size,
            prompt.file_count
        );
        progress(1.0);
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn generator() -> Arc<PromptGenerator> {
        Arc::new(PromptGenerator::new(Arc::new(StructureBuilder::new().unwrap())).unwrap())
    }

    fn config(template: &str) -> GenerationConfig {
        GenerationConfig {
            template: template.to_string(),
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn test_missing_template() {
        let result = generator().generate_prompt(&CancellationToken::new(), &config(""));
        assert!(matches!(result, Err(ShotgunError::MissingTemplate)));
    }

    #[test]
    fn test_task_substitution_and_unknown_placeholders() {
        let mut cfg = config("Task: {{TASK}}\nKeep: {{NOT_DEFINED}}");
        cfg.task = "Rename <Foo> & fix \"bar\"".to_string();

        let prompt = generator()
            .generate_prompt(&CancellationToken::new(), &cfg)
            .unwrap();
        assert!(prompt.content.contains("Rename <Foo> & fix \"bar\""));
        assert!(prompt.content.contains("{{NOT_DEFINED}}"));
        assert_eq!(prompt.template_size, cfg.template.len());
        assert_eq!(prompt.total_size, prompt.content.len());
        assert_eq!(prompt.file_count, 0);
    }

    #[test]
    fn test_automatic_bindings() {
        let cfg = config("{{CURRENT_DATE}}|{{FILE_COUNT}}|{{FILE_STRUCTURE}}");
        let prompt = generator()
            .generate_prompt(&CancellationToken::new(), &cfg)
            .unwrap();

        let today = prompt.generated_at.format("%Y-%m-%d").to_string();
        // No files selected, so the structure placeholder is left alone
        assert_eq!(prompt.content, format!("{today}|0|{{{{FILE_STRUCTURE}}}}"));
    }

    #[test]
    fn test_binding_precedence() {
        let mut cfg = config("{{TASK}} {{RULES}} {{EXTRA}} {{FILE_COUNT}}");
        for (name, value) in [("TASK", "caller"), ("EXTRA", "kept"), ("FILE_COUNT", "99")] {
            cfg.variables.insert(name.to_string(), value.to_string());
        }
        cfg.task = "fixed".to_string();

        let prompt = generator()
            .generate_prompt(&CancellationToken::new(), &cfg)
            .unwrap();
        assert_eq!(prompt.content, "fixed  kept 0");
    }

    #[test]
    fn test_structure_is_embedded() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.rs");
        let b = temp_dir.path().join("b.rs");
        fs::write(&a, "fn a() {}").unwrap();
        fs::write(&b, "fn b() {}").unwrap();

        let mut cfg = config("Files: {{FILE_COUNT}}\n{{FILE_STRUCTURE}}");
        cfg.selected_files = vec![
            a.to_string_lossy().into_owned(),
            b.to_string_lossy().into_owned(),
        ];

        let prompt = generator()
            .generate_prompt(&CancellationToken::new(), &cfg)
            .unwrap();
        assert!(prompt.content.starts_with("Files: 2\n"));
        assert!(prompt.content.contains("├── a.rs"));
        assert!(prompt.content.contains("└── b.rs"));
        assert!(prompt.content.contains("fn a() {}"));
        assert!(prompt.content.contains("fn b() {}"));
        assert_eq!(prompt.file_count, 2);
    }

    #[test]
    fn test_file_content_is_not_rescanned() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("tmpl.txt");
        fs::write(&file, "literal {{TASK}} inside").unwrap();

        let mut cfg = config("{{FILE_STRUCTURE}}");
        cfg.task = "SHOULD NOT APPEAR".to_string();
        cfg.selected_files = vec![file.to_string_lossy().into_owned()];

        let prompt = generator()
            .generate_prompt(&CancellationToken::new(), &cfg)
            .unwrap();
        assert!(prompt.content.contains("literal {{TASK}} inside"));
        assert!(!prompt.content.contains("SHOULD NOT APPEAR"));
    }

    #[test]
    fn test_generate_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let result = generator().generate_prompt(&token, &config("{{TASK}}"));
        assert!(matches!(result, Err(ShotgunError::Cancelled)));
    }

    #[test]
    fn test_async_progress_and_completion() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut cfg = config("{{TASK}}");
        cfg.task = "async".to_string();

        let handle = generator()
            .generate_prompt_async(cfg, move |p| sink.lock().unwrap().push(p))
            .unwrap();
        let prompt = handle.wait().unwrap();

        assert_eq!(prompt.content, "async");
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_async_events() {
        let handle = generator()
            .generate_prompt_async(config("x"), |_| {})
            .unwrap();

        let mut progress = Vec::new();
        let result = loop {
            match handle.recv() {
                Some(GenerationEvent::Progress(p)) => progress.push(p),
                Some(GenerationEvent::Complete(result)) => break result,
                None => panic!("worker exited without completing"),
            }
        };
        assert!(result.is_ok());
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&1.0));
    }

    #[test]
    fn test_async_cancellation() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let handle = generator()
            .generate_prompt_async(config("{{TASK}}"), move |p| {
                if p == 0.0 {
                    let _ = gate_rx.recv();
                }
            })
            .unwrap();

        handle.cancel();
        gate_tx.send(()).unwrap();
        assert!(matches!(handle.wait(), Err(ShotgunError::Cancelled)));
    }

    #[test]
    fn test_async_missing_template() {
        let handle = generator()
            .generate_prompt_async(GenerationConfig::default(), |_| {})
            .unwrap();
        assert!(matches!(handle.wait(), Err(ShotgunError::MissingTemplate)));
    }
}
