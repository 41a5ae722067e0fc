use clap::Parser;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use log::LevelFilter;
use serde::Serialize;
use shotgun::fs_utils::format_size;
use shotgun::{
    CancellationToken, EstimationConfig, GeneratedPrompt, GenerationConfig, PlaceholderRenderer,
    PromptGenerator, Result, SizeEstimate, SizeEstimator, StructureBuilder, TreeFormat, Variables,
    WarningLevel, write_prompt_file,
};
use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LONG_HELP: &str = r#"
Placeholders:
  {{TASK}}            - Text given with --task
  {{RULES}}           - Text given with --rules
  {{FILE_STRUCTURE}}  - Directory tree plus the content of every selected file
  {{FILE_COUNT}}      - Number of selected paths
  {{CURRENT_DATE}}    - Today's date (YYYY-MM-DD)
  {{NAME}}            - Any value given with --var NAME=VALUE
Unknown placeholders are left as they are.

Examples:
  # Prompt from a few files with the built-in template
  shotgun src/main.rs src/lib.rs --task "Find the bug in the parser"
  # Whole directory, honoring .gitignore, excluding tests
  shotgun src/ -x '**/tests/**' --task "Review error handling"
  # Custom template from stdin, printed instead of written
  cat prompt.tmpl | shotgun --template - src/ --stdout
  # Only report the estimated size
  shotgun src/ --estimate --json
  # Write into a specific directory
  shotgun src/ --task "Document the API" -o prompts/

Files larger than --max-file-size, binary files and likely secrets
(.env, *.pem, id_rsa, ...) are listed in the tree but their content is
replaced by a short placeholder.
"#;

/// Assemble selected files and a template into one LLM prompt.
#[derive(Parser, Debug)]
#[command(
    name = "shotgun",
    version,
    about = "Assemble selected files and a template into one LLM prompt.",
    after_long_help = LONG_HELP
)]
struct Cli {
    /// Files and directories to include
    #[arg(value_name = "PATHS", required = true)]
    inputs: Vec<PathBuf>,

    /// Template file. Use '-' for stdin; the built-in template is used when omitted
    #[arg(long, short, value_name = "TEMPLATE")]
    template: Option<PathBuf>,

    /// Task description substituted for {{TASK}}
    #[arg(long, default_value = "")]
    task: String,

    /// Rules substituted for {{RULES}}
    #[arg(long, default_value = "")]
    rules: String,

    /// Extra template binding (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var, action = clap::ArgAction::Append)]
    vars: Vec<(String, String)>,

    /// Directory the prompt file is written to (defaults to CWD)
    #[arg(short, long = "output-dir", value_name = "DIR", env = "SHOTGUN_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Print the prompt to stdout instead of writing a file
    #[arg(long)]
    stdout: bool,

    /// Files above this many bytes are replaced by a placeholder
    #[arg(long, value_name = "BYTES", env = "SHOTGUN_MAX_FILE_SIZE")]
    max_file_size: Option<u64>,

    /// Number of files read in parallel
    #[arg(long, value_name = "N", env = "SHOTGUN_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Draw the tree with ASCII instead of box-drawing characters
    #[arg(long)]
    ascii: bool,

    /// Show file sizes in the tree
    #[arg(long)]
    show_sizes: bool,

    /// Leave binary files out of the file blocks
    #[arg(long)]
    hide_binary: bool,

    /// Exclude glob patterns for directory inputs (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "GLOB", action = clap::ArgAction::Append)]
    exclude: Vec<String>,

    /// Disable compliance with .gitignore files
    #[arg(long)]
    no_gitignore: bool,

    /// Only report the size estimate
    #[arg(long)]
    estimate: bool,

    /// Machine-readable output
    #[arg(long)]
    json: bool,

    /// Generate even when the estimate is excessive
    #[arg(long)]
    force: bool,

    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    estimate: &'a SizeEstimate,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a GeneratedPrompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run(&cli) {
        log::error!("{e}");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, 2) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn parse_var(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

fn run(cli: &Cli) -> Result<()> {
    let token = CancellationToken::new();
    let template = read_template(cli)?;
    let selected = collect_selection(cli, build_exclude_set(&cli.exclude).as_ref());
    log::info!("{} files selected", selected.len());

    let mut variables: Variables = cli.vars.iter().cloned().collect();
    let estimator = SizeEstimator::with_renderer(Arc::new(PlaceholderRenderer::new()?));
    let on_disk = estimator.calculate_progressively(&token, &selected, |done, total, path| {
        if !path.is_empty() {
            log::trace!("[{}/{}] {}", done + 1, total, path);
        }
    })?;
    log::debug!("selected files occupy {}", format_size(on_disk));

    variables.insert("TASK".to_string(), cli.task.clone());
    variables.insert("RULES".to_string(), cli.rules.clone());
    let estimate = estimator.estimate_prompt_size(
        &token,
        &EstimationConfig {
            template: template.clone(),
            variables: variables.clone(),
            selected_files: selected.clone(),
        },
    )?;

    if cli.estimate {
        return print_estimate(cli, &estimate);
    }

    match estimate.warning_level {
        WarningLevel::Normal => log::info!("estimated size {estimate}"),
        WarningLevel::Excessive if !cli.force => {
            eprintln!("[ERROR] Estimated prompt size {estimate}");
            eprintln!("[ERROR] Select fewer files or pass --force to generate anyway.");
            std::process::exit(2);
        }
        _ => log::warn!("estimated size {estimate}"),
    }

    let builder = Arc::new(StructureBuilder::new()?);
    configure_builder(cli, &builder)?;
    let generator = Arc::new(PromptGenerator::new(builder)?);
    let handle = generator.generate_prompt_async(
        GenerationConfig {
            template,
            variables,
            selected_files: selected,
            task: cli.task.clone(),
            rules: cli.rules.clone(),
        },
        |fraction| log::debug!("generation {:.0}%", fraction * 100.0),
    )?;
    let prompt = handle.wait()?;

    let path = if cli.stdout {
        print!("{}", prompt.content);
        io::stdout().flush()?;
        None
    } else {
        let directory = cli.output_dir.clone().unwrap_or_default();
        Some(write_prompt_file(&prompt.content, &directory)?)
    };

    if cli.json {
        let report = Report {
            estimate: &estimate,
            prompt: Some(&prompt),
            path: path.as_ref().map(|p| p.display().to_string()),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(path) = path {
        if !cli.quiet {
            println!(
                "{} ({}, {} files)",
                path.display(),
                format_size(prompt.total_size as u64),
                prompt.file_count
            );
        }
    }
    Ok(())
}

fn read_template(cli: &Cli) -> Result<String> {
    match &cli.template {
        Some(path) if path.as_path() == Path::new("-") => {
            log::info!("Reading template from stdin...");
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
        Some(path) => {
            log::info!("Reading template from {}", path.display());
            std::fs::read_to_string(path).map_err(Into::into)
        }
        None => Ok(shotgun::DEFAULT_TEMPLATE.to_string()),
    }
}

fn build_exclude_set(patterns: &[String]) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        match Glob::new(pat) {
            Ok(g) => {
                builder.add(g);
            }
            Err(e) => {
                eprintln!("[ERROR] Invalid exclude pattern '{pat}': {e}");
                std::process::exit(2);
            }
        }
    }
    match builder.build() {
        Ok(set) => Some(set),
        Err(e) => {
            eprintln!("[ERROR] Failed to build exclude set: {e}");
            std::process::exit(2);
        }
    }
}

/// Expands directory inputs into their files; explicit file inputs are kept as given.
fn collect_selection(cli: &Cli, exclude: Option<&GlobSet>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for input in &cli.inputs {
        let paths = if input.is_dir() {
            walk_directory(input, cli.no_gitignore, exclude)
        } else {
            vec![input.to_string_lossy().into_owned()]
        };
        for path in paths {
            if seen.insert(path.clone()) {
                selected.push(path);
            }
        }
    }
    selected
}

fn walk_directory(dir: &Path, no_gitignore: bool, exclude: Option<&GlobSet>) -> Vec<String> {
    let walker = WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(!no_gitignore)
        .git_exclude(!no_gitignore)
        .git_global(!no_gitignore)
        .require_git(false)
        .filter_entry(|e| e.file_name() != ".git")
        .build();

    let mut files = Vec::new();
    for result in walker {
        match result {
            Ok(entry) => {
                if !entry.file_type().is_some_and(|t| t.is_file()) {
                    continue;
                }
                let path = entry.path();
                let relative = path.strip_prefix(dir).unwrap_or(path);
                if exclude.is_some_and(|set| set.is_match(relative) || set.is_match(path)) {
                    log::debug!("excluded {}", path.display());
                    continue;
                }
                files.push(path.to_string_lossy().into_owned());
            }
            Err(err) => log::warn!("Error walking entry: {err}"),
        }
    }
    files
}

fn configure_builder(cli: &Cli, builder: &StructureBuilder) -> Result<()> {
    if let Some(size) = cli.max_file_size {
        builder.set_max_file_size(size)?;
    }
    if let Some(workers) = cli.max_concurrency {
        builder.set_max_concurrency(workers)?;
    }
    builder.set_tree_format(TreeFormat {
        use_unicode: !cli.ascii,
        show_sizes: cli.show_sizes,
        show_binary: !cli.hide_binary,
    });
    Ok(())
}

fn print_estimate(cli: &Cli, estimate: &SizeEstimate) -> Result<()> {
    if cli.json {
        let report = Report {
            estimate,
            prompt: None,
            path: None,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Estimated prompt size: {}", format_size(estimate.total_size));
    println!("  template:    {}", format_size(estimate.template_size));
    println!("  files:       {}", format_size(estimate.file_content_size));
    println!("  tree:        {}", format_size(estimate.tree_overhead));
    println!("  formatting:  {}", format_size(estimate.formatting_overhead));
    println!("  {:?}: {}", estimate.warning_level, estimate.warning_level.message());
    Ok(())
}
