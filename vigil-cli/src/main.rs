use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{debug, info, warn};

use vigil_core::differ::create_plan;
use vigil_core::effect::Effect;
use vigil_core::plan::Plan;
use vigil_core::provider::{Provider, ProviderResult};
use vigil_core::resource::{Resource, ResourceId, State, Value};
use vigil_core::schema::ResourceSchema;
use vigil_provider_aws::AwsProvider;
use vigil_provider_aws::schemas;
use vigil_state::{StateBackend, StateFile, create_backend};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Declarative management of AWS Backup selections", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true, default_value = "vigil.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file
    Validate,
    /// Show execution plan without applying changes
    Plan,
    /// Apply changes to reach the desired state
    Apply {
        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Destroy every resource recorded in state
    Destroy {
        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Remove a state lock left behind by an interrupted run
    ForceUnlock {
        /// ID of the lock to remove
        lock_id: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("VIGIL_LOG", "warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate => run_validate(&cli.config),
        Commands::Plan => run_plan(&cli.config).await,
        Commands::Apply { auto_approve } => run_apply(&cli.config, auto_approve).await,
        Commands::Destroy { auto_approve } => run_destroy(&cli.config, auto_approve).await,
        Commands::ForceUnlock { lock_id } => run_force_unlock(&cli.config, &lock_id).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn load_config(path: &Path) -> Result<Config, String> {
    let config = Config::load(path).map_err(|e| e.to_string())?;
    debug!(
        "Loaded {} resources from {} (region {})",
        config.resources.len(),
        path.display(),
        config.region
    );
    Ok(config)
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    schemas::all_schemas()
        .into_iter()
        .map(|schema| (schema.resource_type.clone(), schema))
        .collect()
}

fn provider_schemas(provider: &dyn Provider) -> HashMap<String, ResourceSchema> {
    provider
        .resource_types()
        .iter()
        .map(|t| (t.name().to_string(), t.schema()))
        .collect()
}

fn validate_resources(
    resources: &[Resource],
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<(), String> {
    let mut all_errors = Vec::new();

    for resource in resources {
        match schemas.get(&resource.id.resource_type) {
            Some(schema) => {
                if let Err(errors) = schema.validate(&resource.attributes) {
                    for error in errors {
                        all_errors.push(format!("{}: {}", resource.id, error));
                    }
                }
            }
            None => all_errors.push(format!(
                "{}: unknown resource type '{}'",
                resource.id, resource.id.resource_type
            )),
        }
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors.join("\n"))
    }
}

fn run_validate(path: &Path) -> Result<(), String> {
    let config = load_config(path)?;
    validate_resources(&config.resources, &get_schemas())?;

    println!(
        "{}",
        format!(
            "✓ {} is valid ({} resources).",
            path.display(),
            config.resources.len()
        )
        .green()
    );
    Ok(())
}

async fn run_plan(path: &Path) -> Result<(), String> {
    let config = load_config(path)?;
    validate_resources(&config.resources, &get_schemas())?;

    let backend = create_backend(&config.backend).map_err(|e| e.to_string())?;
    let provider = AwsProvider::new(&config.region).await;

    let state = backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default();
    let current_states = refresh(&provider, &state).await?;

    let plan = create_plan(
        &config.resources,
        &current_states,
        &provider_schemas(&provider),
    );
    print_plan(&plan);
    Ok(())
}

async fn run_apply(path: &Path, auto_approve: bool) -> Result<(), String> {
    let config = load_config(path)?;
    validate_resources(&config.resources, &get_schemas())?;

    let backend = create_backend(&config.backend).map_err(|e| e.to_string())?;
    let provider = AwsProvider::new(&config.region).await;

    with_lock(backend.as_ref(), "apply", || {
        apply(&provider, backend.as_ref(), &config.resources, auto_approve)
    })
    .await
}

async fn run_destroy(path: &Path, auto_approve: bool) -> Result<(), String> {
    let config = load_config(path)?;

    let backend = create_backend(&config.backend).map_err(|e| e.to_string())?;
    let provider = AwsProvider::new(&config.region).await;

    with_lock(backend.as_ref(), "destroy", || {
        destroy(&provider, backend.as_ref(), auto_approve)
    })
    .await
}

async fn run_force_unlock(path: &Path, lock_id: &str) -> Result<(), String> {
    let config = load_config(path)?;
    let backend = create_backend(&config.backend).map_err(|e| e.to_string())?;

    backend
        .force_unlock(lock_id)
        .await
        .map_err(|e| e.to_string())?;

    println!("{}", format!("Lock {} has been released.", lock_id).green());
    Ok(())
}

/// Run `f` while holding the state lock; the lock is released even when `f` fails
async fn with_lock<F, Fut>(backend: &dyn StateBackend, operation: &str, f: F) -> Result<(), String>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let lock = backend
        .acquire_lock(operation)
        .await
        .map_err(|e| e.to_string())?;

    let result = f().await;

    if let Err(e) = backend.release_lock(&lock).await {
        eprintln!(
            "{} failed to release lock {}: {}",
            "Warning:".yellow().bold(),
            lock.id,
            e
        );
    }

    result
}

/// Read every resource in state back from the provider
async fn refresh(
    provider: &dyn Provider,
    state: &StateFile,
) -> Result<HashMap<ResourceId, State>, String> {
    let mut current_states = HashMap::new();

    for stored in &state.resources {
        let current = provider
            .read(&stored.to_state())
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?;
        current_states.insert(current.id.clone(), current);
    }

    Ok(current_states)
}

async fn persist(backend: &dyn StateBackend, state: &mut StateFile) -> Result<(), String> {
    state.increment_serial();
    backend
        .write_state(state)
        .await
        .map_err(|e| format!("Failed to write state to {}: {}", backend.location(), e))
}

async fn apply(
    provider: &dyn Provider,
    backend: &dyn StateBackend,
    resources: &[Resource],
    auto_approve: bool,
) -> Result<(), String> {
    let mut state = backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default();

    let current_states = refresh(provider, &state).await?;
    let before = state.resources.len();
    for current in current_states.values() {
        state.record(current, provider.name());
    }
    if state.resources.len() != before {
        info!(
            "Dropped {} vanished resources from state",
            before - state.resources.len()
        );
        persist(backend, &mut state).await?;
    }

    let plan = create_plan(resources, &current_states, &provider_schemas(provider));
    if plan.is_empty() {
        println!("{}", "No changes needed.".green());
        return Ok(());
    }

    print_plan(&plan);
    println!();

    if !auto_approve && !confirm("Do you want to perform these actions?")? {
        println!("{}", "Apply cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let report = execute_plan(provider, backend, &mut state, &plan).await?;

    println!();
    if report.failed == 0 {
        println!(
            "{}",
            format!("Apply complete! {} changes applied.", report.succeeded)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Apply failed. {} succeeded, {} failed.",
            report.succeeded, report.failed
        ))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ApplyReport {
    succeeded: usize,
    failed: usize,
}

/// Create `resource` and record it in state
///
/// A failed create that still left the resource behind records the partial
/// state, so the next run refreshes it instead of creating a duplicate.
async fn create_recorded(
    provider: &dyn Provider,
    backend: &dyn StateBackend,
    state: &mut StateFile,
    resource: &Resource,
) -> Result<ProviderResult<()>, String> {
    match provider.create(resource).await {
        Ok(created) => {
            state.record(&created, provider.name());
            persist(backend, state).await?;
            Ok(Ok(()))
        }
        Err(e) => {
            if let Some(partial) = &e.partial_state {
                warn!("{} was created but could not be read back", partial.id);
                state.record(partial, provider.name());
                persist(backend, state).await?;
            }
            Ok(Err(e))
        }
    }
}

/// Execute effects in order, writing state after every provider call
///
/// A failed effect is reported and skipped. Failing to write state aborts.
async fn execute_plan(
    provider: &dyn Provider,
    backend: &dyn StateBackend,
    state: &mut StateFile,
    plan: &Plan,
) -> Result<ApplyReport, String> {
    let mut report = ApplyReport::default();

    for effect in plan.effects() {
        let outcome = match effect {
            Effect::Create(resource) => {
                create_recorded(provider, backend, state, resource).await?
            }
            Effect::Replace { id, from, to, .. } => match provider.delete(from).await {
                Ok(()) => {
                    state.remove_resource(&id.resource_type, &id.name);
                    persist(backend, state).await?;
                    create_recorded(provider, backend, state, to).await?
                }
                Err(e) => Err(e),
            },
            Effect::Delete(current) => match provider.delete(current).await {
                Ok(()) => {
                    state.remove_resource(&current.id.resource_type, &current.id.name);
                    persist(backend, state).await?;
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(()) => {
                println!("  {} {}", "✓".green(), format_effect(effect));
                report.succeeded += 1;
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_effect(effect), e);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

async fn destroy(
    provider: &dyn Provider,
    backend: &dyn StateBackend,
    auto_approve: bool,
) -> Result<(), String> {
    let mut state = match backend.read_state().await.map_err(|e| e.to_string())? {
        Some(state) => state,
        None => {
            println!("{}", "No state found. Nothing to destroy.".yellow());
            return Ok(());
        }
    };

    let current_states = refresh(provider, &state).await?;
    for current in current_states.values() {
        state.record(current, provider.name());
    }

    let mut doomed: Vec<&State> = current_states.values().filter(|s| s.exists).collect();
    doomed.sort_by(|a, b| a.id.cmp(&b.id));

    if doomed.is_empty() {
        persist(backend, &mut state).await?;
        println!("{}", "No resources to destroy.".yellow());
        return Ok(());
    }

    let mut plan = Plan::new();
    for current in doomed {
        plan.add(Effect::Delete(current.clone()));
    }
    print_plan(&plan);
    println!();

    if !auto_approve && !confirm("Do you really want to destroy all resources?")? {
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let report = execute_plan(provider, backend, &mut state, &plan).await?;

    println!();
    if report.failed == 0 {
        println!(
            "{}",
            format!("Destroy complete! {} resources destroyed.", report.succeeded)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Destroy failed. {} succeeded, {} failed.",
            report.succeeded, report.failed
        ))
    }
}

fn confirm(question: &str) -> Result<bool, String> {
    println!("{}", question.yellow().bold());
    println!(
        "  {}",
        "This action cannot be undone. Type 'yes' to confirm.".yellow()
    );
    print!("\n  Enter a value: ");
    std::io::stdout().flush().map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    println!();

    Ok(input.trim() == "yes")
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        match effect {
            Effect::Create(r) => {
                println!("  {} {}", "+".green().bold(), r.id.to_string().cyan().bold());
                let mut keys: Vec<&String> = r.attributes.keys().collect();
                keys.sort();
                for key in keys {
                    println!(
                        "      {}: {}",
                        key,
                        format_value(&r.attributes[key]).green()
                    );
                }
            }
            Effect::Replace {
                id,
                from,
                to,
                changed_attributes,
            } => {
                println!(
                    "  {} {} {}",
                    "-/+".yellow().bold(),
                    id.to_string().cyan().bold(),
                    "(forces replacement)".yellow()
                );
                for key in changed_attributes {
                    println!(
                        "      {}: {} => {}",
                        key,
                        format_optional(from.attributes.get(key)).red(),
                        format_optional(to.attributes.get(key)).green()
                    );
                }
            }
            Effect::Delete(s) => {
                let identifier = s.identifier.as_deref().unwrap_or("unknown id");
                println!(
                    "  {} {} ({})",
                    "-".red().bold(),
                    s.id.to_string().cyan().bold(),
                    identifier
                );
            }
        }
    }

    println!();
    println!("{}", plan.summary().to_string().bold());
}

fn format_effect(effect: &Effect) -> String {
    match effect {
        Effect::Create(r) => format!("Create {}", r.id),
        Effect::Replace { id, .. } => format!("Replace {}", id),
        Effect::Delete(s) => format!("Delete {}", s.id),
    }
}

fn format_optional(value: Option<&Value>) -> String {
    value.map(format_value).unwrap_or_else(|| "(none)".to_string())
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let strs: Vec<_> = entries
                .into_iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            format!("{{{}}}", strs.join(", "))
        }
    }
}
