//! `docweave generate` — run the documentation engine for one repository.

use crate::cmd::exit_codes;
use anyhow::{Context, Result};
use docweave::component::ComponentsFile;
use docweave::engine::{Engine, RunSummary};
use docweave::errors::EngineError;
use docweave::ui::GenerationUI;
use docweave::Config;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Flag bundle for `generate`, mapped straight onto [`Config`].
#[derive(Debug, Clone, clap::Args)]
pub struct GenerateArgs {
    /// Repository being documented (readable by agent tools)
    #[arg(long)]
    pub repo_dir: PathBuf,

    /// Output directory for generated documentation
    #[arg(long, default_value = "docs")]
    pub docs_dir: PathBuf,

    /// Parsed components JSON ({"components": {...}, "leaf_ids": [...]})
    #[arg(long)]
    pub components: PathBuf,

    /// Primary model for documentation generation
    #[arg(long, default_value = "")]
    pub main_model: String,

    /// Model used for clustering (defaults to the main model)
    #[arg(long)]
    pub cluster_model: Option<String>,

    /// Fallback models, comma-separated, tried in order
    #[arg(long, value_delimiter = ',')]
    pub fallback_models: Vec<String>,

    /// Chat-completions endpoint base URL
    #[arg(long, default_value = "")]
    pub base_url: String,

    /// Bearer token for the endpoint
    #[arg(long, default_value = "")]
    pub api_key: String,

    /// External agent command; enables subprocess mode
    #[arg(long)]
    pub agent_cmd: Option<String>,

    /// Completion cap for documentation requests
    #[arg(long, default_value_t = docweave::config::DEFAULT_MAX_TOKENS)]
    pub max_tokens: u64,

    /// Completion cap for clustering requests
    #[arg(long, default_value_t = docweave::config::DEFAULT_MAX_TOKEN_PER_MODULE)]
    pub max_token_per_module: u64,

    /// Token budget above which a component set is split further
    #[arg(long, default_value_t = docweave::config::DEFAULT_MAX_TOKEN_PER_LEAF_MODULE)]
    pub max_token_per_leaf_module: u64,

    /// Maximum module tree depth
    #[arg(long, default_value_t = docweave::config::DEFAULT_MAX_DEPTH)]
    pub max_depth: u32,

    /// Bound on in-flight leaf generations
    #[arg(long, default_value_t = docweave::config::DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Extra instructions appended to every system prompt
    #[arg(long)]
    pub custom_instructions: Option<String>,

    /// Stop at the first module failure
    #[arg(long)]
    pub fail_fast: bool,
}

impl GenerateArgs {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.docs_dir, self.repo_dir, self.main_model);
        config.cluster_model = self.cluster_model;
        config.fallback_models = self.fallback_models;
        config.base_url = self.base_url;
        config.api_key = self.api_key;
        config.agent_cmd = self.agent_cmd;
        config.max_tokens = self.max_tokens;
        config.max_token_per_module = self.max_token_per_module;
        config.max_token_per_leaf_module = self.max_token_per_leaf_module;
        config.max_depth = self.max_depth;
        config.concurrency = self.concurrency;
        config.custom_instructions = self.custom_instructions;
        config.fail_fast = self.fail_fast;
        config.apply_env_overrides();
        config
    }
}

/// Run the engine; returns the process exit code.
pub async fn cmd_generate(args: GenerateArgs, verbose: bool) -> Result<i32> {
    let components_path = args.components.clone();
    let input_text = std::fs::read_to_string(&components_path)
        .with_context(|| format!("Failed to read {}", components_path.display()))?;
    let input: ComponentsFile = serde_json::from_str(&input_text)
        .with_context(|| format!("Failed to parse {}", components_path.display()))?;

    let config = args.into_config();

    let engine = match Engine::new(config, input.components, input.leaf_ids) {
        Ok(engine) => engine,
        Err(EngineError::ConfigInvalid(msg)) => {
            eprintln!("Invalid configuration: {msg}");
            return Ok(exit_codes::CONFIG_INVALID);
        }
        Err(other) => return Err(other.into()),
    };

    // Progress rendering: the UI is created on the first event, which
    // carries the total.
    let (tx, mut rx) = mpsc::channel(64);
    let engine = engine.with_events(tx);
    let ui_task = tokio::spawn(async move {
        let mut ui: Option<GenerationUI> = None;
        while let Some(event) = rx.recv().await {
            let ui = ui.get_or_insert_with(|| GenerationUI::new(event.total as u64, verbose));
            ui.handle(&event);
        }
        if let Some(ui) = ui {
            ui.finish("complete");
        }
    });

    // Ctrl-C flows into the cancellation token; workers wind down and the
    // partial state on disk stays consistent.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted; finishing in-flight modules...");
            signal_cancel.cancel();
        }
    });

    let summary = engine.run(&cancel).await?;
    ui_task.await.ok();

    print_summary(&summary);
    Ok(exit_code_for(&summary))
}

fn print_summary(summary: &RunSummary) {
    use console::style;
    println!();
    println!(
        "{} {} modules, {} done, {} failed",
        if summary.ok {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        },
        summary.modules_total,
        summary.modules_done,
        summary.modules_failed,
    );
    for error in &summary.errors {
        println!("  {} {error}", console::style("-").dim());
    }
}

fn exit_code_for(summary: &RunSummary) -> i32 {
    if summary.cancelled {
        return exit_codes::CANCELLED;
    }
    if summary.ok {
        return exit_codes::SUCCESS;
    }
    // Nothing succeeded and every failure was an exhausted cascade.
    let all_exhausted = summary.modules_done == 0
        && !summary.errors.is_empty()
        && summary.errors.iter().all(|e| e.contains("backends failed"));
    if all_exhausted {
        exit_codes::LLM_EXHAUSTED
    } else {
        exit_codes::PARTIAL
    }
}
