use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

use cairn_core::config::{ConfigMap, ConfigValue, StackConfiguration};
use cairn_core::diag::{Diagnostic, DiagnosticSink, Severity};
use cairn_core::manifest::{ManifestEngine, ResourceManifest};
use cairn_core::operation::UpdateMetadata;
use cairn_core::resource::ResourceId;
use cairn_core::{CancellationToken, Engine, StackName, UntypedDeployment, UpdateOptions};
use cairn_core::{StackReference, UpdateOperation};
use cairn_state::{
    Backend, BackendConfig, CreateStackOptions, ListStacksFilter, StackTags, UpdateOutcome,
    UpdateResult, UpdateStatus, create_backend,
};

#[derive(Parser)]
#[command(name = "cairn")]
#[command(about = "Manage the lifecycle of infrastructure stacks", long_about = None)]
struct Cli {
    /// Backend type (local or memory)
    #[arg(long, global = true, default_value = "local")]
    backend: String,

    /// State directory for the local backend
    #[arg(long, global = true, default_value = ".cairn")]
    path: PathBuf,

    /// Organization used when a stack reference omits it
    #[arg(long, global = true)]
    organization: Option<String>,

    /// Project used when a stack reference omits it
    #[arg(long, global = true)]
    project: Option<String>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stack management commands
    Stack {
        #[command(subcommand)]
        command: StackCommands,
    },
    /// Show the changes an update would make
    Preview {
        /// Stack reference (stack, project/stack or org/project/stack)
        stack: String,

        #[command(flatten)]
        update: UpdateArgs,
    },
    /// Apply the manifest to the stack
    Up {
        stack: String,

        #[command(flatten)]
        update: UpdateArgs,

        /// Message recorded in the stack's history
        #[arg(long, short)]
        message: Option<String>,

        /// Configuration value (key=value)
        #[arg(long = "config", value_parser = parse_key_value)]
        config: Vec<(String, String)>,

        /// Secret configuration value, encrypted with the stack's crypter (key=value)
        #[arg(long = "secret", value_parser = parse_key_value)]
        secrets: Vec<(String, String)>,
    },
    /// Reconcile the snapshot with the recorded resources
    Refresh { stack: String },
    /// Delete every resource in the stack
    Destroy {
        stack: String,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Repeatedly show pending changes until interrupted
    Watch {
        stack: String,

        #[command(flatten)]
        update: UpdateArgs,

        /// Seconds between rounds
        #[arg(long, default_value_t = 2)]
        interval: u64,

        /// Stop after this many rounds
        #[arg(long)]
        rounds: Option<u32>,
    },
    /// Show the resources recorded in the stack
    Query { stack: String },
}

#[derive(clap::Args)]
struct UpdateArgs {
    /// Path to the desired-state manifest
    #[arg(long, default_value = "cairn.json")]
    manifest: PathBuf,

    /// Only operate on these resources (type.name)
    #[arg(long = "target", value_parser = parse_resource_id)]
    targets: Vec<ResourceId>,

    /// Fail if the plan contains any change
    #[arg(long)]
    expect_no_changes: bool,
}

#[derive(Subcommand)]
enum StackCommands {
    /// Create a new stack
    Init {
        stack: String,

        /// Tag to attach (name=value)
        #[arg(long = "tag", value_parser = parse_key_value)]
        tags: Vec<(String, String)>,
    },
    /// List stacks
    Ls {
        /// Only stacks in this project
        #[arg(long)]
        project: Option<String>,

        /// Only stacks with this tag (name or name=value)
        #[arg(long)]
        tag: Option<String>,
    },
    /// Remove a stack
    Rm {
        stack: String,

        /// Remove the stack even if it still has resources
        #[arg(long, short)]
        force: bool,
    },
    /// Rename a stack within its project
    Rename { stack: String, new_name: String },
    /// Stack tag commands
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Show the update history of a stack
    History { stack: String },
    /// Export the stack's deployment
    Export {
        stack: String,

        /// Write to this file instead of stdout
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Replace the stack's deployment with an exported one
    Import { stack: String, file: PathBuf },
    /// Release a lock left behind by an interrupted operation
    Unlock { stack: String, lock_id: String },
}

#[derive(Subcommand)]
enum TagCommands {
    /// List a stack's tags
    Ls { stack: String },
    /// Set a tag
    Set {
        stack: String,
        name: String,
        value: String,
    },
    /// Remove a tag
    Rm { stack: String, name: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Commands::Stack { ref command } => run_stack_command(&cli, command).await,
        Commands::Preview { ref stack, ref update } => {
            let backend = open_backend(&cli, Some(&update.manifest))?;
            let reference = parse_reference(backend.as_ref(), stack)?;
            let op = operation(update_options(update));
            println!("{}", "Previewing update...".cyan().bold());
            let outcome = backend.preview(&reference, op).await;
            report("Preview", outcome)
        }
        Commands::Up {
            ref stack,
            ref update,
            ref message,
            ref config,
            ref secrets,
        } => {
            let backend = open_backend(&cli, Some(&update.manifest))?;
            let reference = parse_reference(backend.as_ref(), stack)?;
            let config = build_config(backend.as_ref(), &reference, config, secrets)?;
            let op = operation(update_options(update))
                .with_config(StackConfiguration::new(config))
                .with_metadata(UpdateMetadata {
                    message: message.clone(),
                    ..Default::default()
                });
            println!("{}", "Updating...".cyan().bold());
            let outcome = backend.update(&reference, op).await;
            report("Update", outcome)
        }
        Commands::Refresh { ref stack } => {
            let backend = open_backend(&cli, None)?;
            let reference = parse_reference(backend.as_ref(), stack)?;
            println!("{}", "Refreshing...".cyan().bold());
            let outcome = backend.refresh(&reference, operation(UpdateOptions::default())).await;
            report("Refresh", outcome)
        }
        Commands::Destroy {
            ref stack,
            auto_approve,
        } => run_destroy(&cli, stack, auto_approve).await,
        Commands::Watch {
            ref stack,
            ref update,
            interval,
            rounds,
        } => {
            let backend = open_backend(&cli, Some(&update.manifest))?;
            let reference = parse_reference(backend.as_ref(), stack)?;
            let options = UpdateOptions {
                watch_interval: Duration::from_secs(interval),
                watch_rounds: rounds,
                ..update_options(update)
            };
            println!("{}", "Watching for changes (Ctrl-C to stop)...".cyan().bold());
            finish("Watch", backend.watch(&reference, operation(options)).await)
        }
        Commands::Query { ref stack } => {
            let backend = open_backend(&cli, None)?;
            let reference = parse_reference(backend.as_ref(), stack)?;
            let result = backend
                .query(&reference, operation(UpdateOptions::default()))
                .await;
            finish("Query", result)
        }
    }
}

async fn run_stack_command(cli: &Cli, command: &StackCommands) -> Result<(), String> {
    let backend = open_backend(cli, None)?;

    match command {
        StackCommands::Init { stack, tags } => {
            let reference = parse_reference(backend.as_ref(), stack)?;
            let tags: StackTags = tags.iter().cloned().collect();
            backend
                .create_stack(&reference, CreateStackOptions { tags })
                .await
                .map_err(|e| e.to_string())?;
            println!("{} {}", "Created stack".green(), reference.to_string().bold());
        }
        StackCommands::Ls { project, tag } => {
            let (tag_name, tag_value) = match tag.as_deref().map(|t| t.split_once('=')) {
                Some(Some((name, value))) => (Some(name.to_string()), Some(value.to_string())),
                Some(None) => (tag.clone(), None),
                None => (None, None),
            };
            let filter = ListStacksFilter {
                project: project.clone(),
                tag_name,
                tag_value,
            };
            let stacks = backend.list_stacks(&filter).await.map_err(|e| e.to_string())?;
            if stacks.is_empty() {
                println!("{}", "No stacks.".yellow());
            }
            for summary in stacks {
                let last_update = summary
                    .last_update
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".to_string());
                let resources = summary
                    .resource_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<50} {:<24} {}",
                    summary.reference.to_string().bold(),
                    last_update,
                    resources
                );
            }
        }
        StackCommands::Rm { stack, force } => {
            let reference = parse_reference(backend.as_ref(), stack)?;
            let dropped = backend
                .remove_stack(&reference, *force)
                .await
                .map_err(|e| e.to_string())?;
            if dropped {
                println!(
                    "{}",
                    "Resources recorded in the stack were abandoned.".yellow()
                );
            }
            println!("{} {}", "Removed stack".green(), reference.to_string().bold());
        }
        StackCommands::Rename { stack, new_name } => {
            let reference = parse_reference(backend.as_ref(), stack)?;
            let new_name = StackName::new(new_name.as_str()).map_err(|e| e.to_string())?;
            let renamed = backend
                .rename_stack(&reference, &new_name)
                .await
                .map_err(|e| e.to_string())?;
            println!(
                "{} {} to {}",
                "Renamed".green(),
                reference.to_string().bold(),
                renamed.to_string().bold()
            );
        }
        StackCommands::Tag { command } => run_tag_command(backend.as_ref(), command).await?,
        StackCommands::History { stack } => {
            let reference = parse_reference(backend.as_ref(), stack)?;
            let history = backend
                .get_history(&reference)
                .await
                .map_err(|e| e.to_string())?;
            if history.is_empty() {
                println!("{}", "No updates recorded.".yellow());
            }
            for entry in history.iter().rev() {
                let status = match entry.status {
                    UpdateStatus::Succeeded => entry.status.to_string().green(),
                    UpdateStatus::Failed => entry.status.to_string().red(),
                    UpdateStatus::Cancelled => entry.status.to_string().yellow(),
                };
                println!(
                    "{} {} {} ({})",
                    entry.end_time.format("%Y-%m-%d %H:%M:%S UTC"),
                    entry.kind.to_string().bold(),
                    status,
                    entry.resource_changes
                );
                if let Some(message) = &entry.message {
                    println!("    {}", message);
                }
                if let Some(error) = &entry.error {
                    println!("    {}", error.red());
                }
            }
        }
        StackCommands::Export { stack, file } => {
            let reference = parse_reference(backend.as_ref(), stack)?;
            let deployment = backend
                .export_deployment(&reference)
                .await
                .map_err(|e| e.to_string())?;
            let content = serde_json::to_string_pretty(&deployment)
                .map_err(|e| format!("Failed to serialize deployment: {}", e))?;
            match file {
                Some(path) => {
                    fs::write(path, content)
                        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
                    println!("{} {}", "Exported to".green(), path.display());
                }
                None => println!("{}", content),
            }
        }
        StackCommands::Import { stack, file } => {
            let reference = parse_reference(backend.as_ref(), stack)?;
            let content = fs::read_to_string(file)
                .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
            let deployment: UntypedDeployment = serde_json::from_str(&content)
                .map_err(|e| format!("Failed to parse {}: {}", file.display(), e))?;
            backend
                .import_deployment(&reference, &deployment)
                .await
                .map_err(|e| e.to_string())?;
            println!("{} {}", "Imported into".green(), reference.to_string().bold());
        }
        StackCommands::Unlock { stack, lock_id } => {
            let reference = parse_reference(backend.as_ref(), stack)?;
            backend
                .force_unlock(&reference, lock_id)
                .await
                .map_err(|e| e.to_string())?;
            println!("{} {}", "Released lock".green(), lock_id);
        }
    }

    Ok(())
}

async fn run_tag_command(backend: &dyn Backend, command: &TagCommands) -> Result<(), String> {
    match command {
        TagCommands::Ls { stack } => {
            let reference = parse_reference(backend, stack)?;
            let tags = backend
                .get_stack_tags(&reference)
                .await
                .map_err(|e| e.to_string())?;
            for (name, value) in tags {
                println!("{} = {}", name.bold(), value);
            }
        }
        TagCommands::Set { stack, name, value } => {
            let reference = parse_reference(backend, stack)?;
            let mut tags = backend
                .get_stack_tags(&reference)
                .await
                .map_err(|e| e.to_string())?;
            tags.insert(name.clone(), value.clone());
            backend
                .update_stack_tags(&reference, tags)
                .await
                .map_err(|e| e.to_string())?;
        }
        TagCommands::Rm { stack, name } => {
            let reference = parse_reference(backend, stack)?;
            let mut tags = backend
                .get_stack_tags(&reference)
                .await
                .map_err(|e| e.to_string())?;
            if tags.remove(name).is_none() {
                return Err(format!("Stack {} has no tag '{}'", reference, name));
            }
            backend
                .update_stack_tags(&reference, tags)
                .await
                .map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

async fn run_destroy(cli: &Cli, stack: &str, auto_approve: bool) -> Result<(), String> {
    let backend = open_backend(cli, None)?;
    let reference = parse_reference(backend.as_ref(), stack)?;

    let snapshot = backend
        .get_snapshot(&reference)
        .await
        .map_err(|e| e.to_string())?;
    let Some(snapshot) = snapshot.filter(|s| !s.is_empty()) else {
        println!("{}", "No resources to destroy.".green());
        return Ok(());
    };

    // Display destroy plan
    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for resource in snapshot.resources.iter().rev() {
        println!("  {} {}", "-".red().bold(), resource.id());
    }
    println!();
    println!(
        "Plan: {} to destroy.",
        snapshot.resources.len().to_string().red()
    );
    println!();

    // Confirmation prompt
    if !auto_approve {
        println!(
            "{}",
            "Do you really want to destroy all resources?"
                .yellow()
                .bold()
        );
        println!(
            "  {}",
            "This action cannot be undone. Type 'yes' to confirm.".yellow()
        );
        print!("\n  Enter a value: ");
        std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .map_err(|e| e.to_string())?;

        if input.trim() != "yes" {
            println!();
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(());
        }
        println!();
    }

    println!("{}", "Destroying resources...".red().bold());
    let outcome = backend
        .destroy(&reference, operation(UpdateOptions::default()))
        .await;
    report("Destroy", outcome)
}

fn open_backend(cli: &Cli, manifest: Option<&Path>) -> Result<Arc<dyn Backend>, String> {
    let engine: Arc<dyn Engine> = match manifest {
        Some(path) => {
            let content = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read manifest {}: {}", path.display(), e))?;
            Arc::new(ManifestEngine::from_json(&content).map_err(|e| e.to_string())?)
        }
        None => Arc::new(ManifestEngine::new(ResourceManifest::default())),
    };

    let backend = create_backend(&backend_config(cli), engine).map_err(|e| e.to_string())?;
    log::debug!("using {} backend at {}", backend.name(), backend.url());
    Ok(backend)
}

fn backend_config(cli: &Cli) -> BackendConfig {
    let mut config = BackendConfig::new(cli.backend.as_str()).with_attribute(
        "path",
        serde_json::Value::String(cli.path.display().to_string()),
    );
    if let Some(organization) = &cli.organization {
        config = config.with_attribute("organization", organization.as_str().into());
    }
    if let Some(project) = &cli.project {
        config = config.with_attribute("project", project.as_str().into());
    }
    config
}

fn parse_reference(backend: &dyn Backend, stack: &str) -> Result<StackReference, String> {
    let reference = backend
        .parse_stack_reference(stack)
        .map_err(|e| e.to_string())?;
    log::debug!("resolved stack '{}' to {}", stack, reference);
    Ok(reference)
}

fn update_options(args: &UpdateArgs) -> UpdateOptions {
    UpdateOptions {
        targets: args.targets.clone(),
        expect_no_changes: args.expect_no_changes,
        ..Default::default()
    }
}

fn build_config(
    backend: &dyn Backend,
    reference: &StackReference,
    plain: &[(String, String)],
    secrets: &[(String, String)],
) -> Result<ConfigMap, String> {
    let mut config = ConfigMap::new();
    for (key, value) in plain {
        config.set(key.clone(), ConfigValue::plain(value.clone()));
    }
    if !secrets.is_empty() {
        let crypter = backend
            .get_stack_crypter(reference)
            .map_err(|e| e.to_string())?;
        for (key, value) in secrets {
            let secret = ConfigValue::secret(value, crypter.as_ref()).map_err(|e| e.to_string())?;
            config.set(key.clone(), secret);
        }
    }
    Ok(config)
}

/// An operation that reports to the console and is cancelled by Ctrl-C
fn operation(options: UpdateOptions) -> UpdateOperation {
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "{}",
                "Cancelling after the current step finishes...".yellow().bold()
            );
            canceller.cancel();
        }
    });

    UpdateOperation::new()
        .with_options(options)
        .with_diagnostics(Arc::new(ConsoleSink))
        .with_cancellation(token)
}

/// Prints diagnostics as they arrive
struct ConsoleSink;

impl DiagnosticSink for ConsoleSink {
    fn emit(&self, diagnostic: Diagnostic) {
        let marker = match diagnostic.severity {
            Severity::Debug => "·".dimmed(),
            Severity::Info => "•".cyan(),
            Severity::Warning => "!".yellow().bold(),
            Severity::Error => "✗".red().bold(),
        };
        match &diagnostic.resource {
            Some(id) => println!("  {} {}: {}", marker, id, diagnostic.message),
            None => println!("  {} {}", marker, diagnostic.message),
        }
    }
}

fn report(name: &str, outcome: UpdateOutcome) -> Result<(), String> {
    println!();
    println!("Resources: {}", outcome.changes);
    finish(name, outcome.result)
}

fn finish(name: &str, result: UpdateResult) -> Result<(), String> {
    match result {
        UpdateResult::Succeeded => {
            println!("{}", format!("{} complete!", name).green().bold());
            Ok(())
        }
        UpdateResult::Bailed => Err(format!("{} cancelled", name)),
        UpdateResult::Failed(e) => Err(e.to_string()),
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn parse_resource_id(s: &str) -> Result<ResourceId, String> {
    match s.rsplit_once('.') {
        Some((resource_type, name)) if !resource_type.is_empty() && !name.is_empty() => {
            Ok(ResourceId::new(resource_type, name))
        }
        _ => Err(format!("expected type.name, got '{}'", s)),
    }
}
