//! hadr-plan: show what a scenario would do against a topology document.
//!
//! Prints the validators and the task plan of one scenario. With `--script`
//! the validators run against the document's in-memory nodes and every
//! scriptable task is rendered as T-SQL instead of being executed.

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use hadr_kernel::logging::{init_tracing, LogFormat, DEFAULT_FILTER};
use hadr_kernel::script;
use hadr_scenarios::prelude::*;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn cli() -> Command {
    Command::new("hadr-plan")
        .version(hadr_kernel::VERSION)
        .about("Plans availability-group changes against a topology document")
        .subcommand_required(true)
        .arg(
            Arg::new("topology")
                .long("topology")
                .short('t')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Topology document (TOML)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine configuration (TOML)"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Output format"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .help("Log format: text or json"),
        )
        .arg(
            Arg::new("script")
                .long("script")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Run validators and render each task as T-SQL"),
        )
        .subcommand(
            Command::new("create-group")
                .about("Create a new availability group")
                .arg(no_listener_check()),
        )
        .subcommand(
            Command::new("add-replicas")
                .about("Add the document's new secondaries to an existing group")
                .arg(no_listener_check()),
        )
        .subcommand(
            Command::new("add-database").about("Add the document's new databases to the group"),
        )
        .subcommand(
            Command::new("failover")
                .about("Make a secondary the primary replica")
                .arg(
                    Arg::new("target")
                        .long("target")
                        .required(true)
                        .help("Replica that becomes the primary"),
                )
                .arg(
                    Arg::new("allow-data-loss")
                        .long("allow-data-loss")
                        .action(ArgAction::SetTrue)
                        .help("Fail over even if the target is not synchronized"),
                ),
        )
}

fn no_listener_check() -> Arg {
    Arg::new("no-listener-check")
        .long("no-listener-check")
        .action(ArgAction::SetTrue)
        .help("Skip the listener configuration check")
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let log_format: LogFormat = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or("text")
        .parse()?;
    init_tracing(log_format, DEFAULT_FILTER)?;

    let Some((scenario, sub)) = matches.subcommand() else {
        bail!("no scenario given");
    };
    let Some(path) = sub.get_one::<PathBuf>("topology") else {
        bail!("--topology is required");
    };
    let document = TopologyDocument::load(path)
        .with_context(|| format!("loading topology document {}", path.display()))?;
    let (topology, admin) = document.into_parts();
    let topology = Arc::new(topology);
    let admin: Arc<dyn AdminSurface> = Arc::new(ScriptingAdmin::new(admin));

    let config = match sub.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine configuration {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let format = match sub.get_one::<String>("format").map(String::as_str) {
        Some("json") => OutputFormat::Json,
        _ => OutputFormat::Text,
    };
    let script = sub.get_flag("script");
    let listener_check = !flag(sub, "no-listener-check");

    match scenario {
        "create-group" => {
            let provider = CreateAvailabilityGroupProvider::new(topology, admin)?
                .with_listener_check(listener_check);
            show(&provider, &config, format, script)
        }
        "add-replicas" => {
            let provider =
                AddReplicasProvider::new(topology, admin)?.with_listener_check(listener_check);
            show(&provider, &config, format, script)
        }
        "add-database" => {
            let provider = AddDatabaseProvider::new(topology, admin)?;
            show(&provider, &config, format, script)
        }
        "failover" => {
            let Some(target) = sub.get_one::<String>("target") else {
                bail!("--target is required");
            };
            let mut request = FailoverRequest::new(target);
            if sub.get_flag("allow-data-loss") {
                request = request.allowing_data_loss();
            }
            let provider = FailoverProvider::new(topology, admin, request)?;
            show(&provider, &config, format, script)
        }
        other => bail!("unknown scenario '{other}'"),
    }
}

fn flag(matches: &ArgMatches, id: &str) -> bool {
    matches!(matches.try_get_one::<bool>(id), Ok(Some(true)))
}

fn show<P>(provider: &P, config: &EngineConfig, format: OutputFormat, script: bool) -> anyhow::Result<()>
where
    P: ScenarioProvider<Error = HadrError>,
{
    let validators: Vec<String> = provider
        .validators()
        .iter()
        .map(|v| v.name().to_string())
        .collect();
    let plan = provider.plan();
    plan.verify()?;

    let report = if script {
        Some(ScenarioRunner::new(config.clone()).validate(provider)?)
    } else {
        None
    };
    let scripts = if script { render_scripts(&plan) } else { Vec::new() };

    match format {
        OutputFormat::Json => {
            let steps: Vec<_> = plan
                .steps()
                .iter()
                .map(|step| {
                    json!({
                        "id": step.id.as_str(),
                        "name": step.item.name(),
                        "after": step.prerequisites.iter().map(StepId::as_str).collect::<Vec<_>>(),
                        "scriptable": script::is_scriptable(step.item.as_ref()),
                    })
                })
                .collect();
            let document = json!({
                "scenario": provider.name(),
                "validators": validators,
                "tasks": steps,
                "validation": report,
                "scripts": scripts
                    .iter()
                    .map(|(id, text)| json!({ "step": id, "script": text }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        OutputFormat::Text => {
            println!("Scenario: {}", provider.name());
            println!("Validators:");
            for name in &validators {
                println!("  - {name}");
            }
            println!("Tasks:");
            for (index, step) in plan.steps().iter().enumerate() {
                let after: Vec<&str> = step.prerequisites.iter().map(StepId::as_str).collect();
                if after.is_empty() {
                    println!("  {:>2}. [{}] {}", index + 1, step.id, step.item.name());
                } else {
                    println!(
                        "  {:>2}. [{}] {} (after {})",
                        index + 1,
                        step.id,
                        step.item.name(),
                        after.join(", ")
                    );
                }
            }
            if let Some(report) = &report {
                println!(
                    "Validation: {} passed, {} skipped",
                    report.validators_passed.len(),
                    report.validators_skipped.len()
                );
                for warning in &report.warnings {
                    println!("  warning [{}]: {}", warning.validator, warning.message);
                }
            }
            for (id, text) in &scripts {
                println!("\n-- step {id}\n{text}");
            }
        }
    }
    Ok(())
}

/// Captures every scriptable step. A step that cannot be scripted against
/// the current node state is reported inline.
fn render_scripts(plan: &TaskPlan<BoxedTask<HadrError>>) -> Vec<(String, String)> {
    let executor = TaskExecutor::new(CancellationToken::none(), ProgressSink::disabled());
    let mut rendered = Vec::new();
    for step in plan.steps() {
        let task = step.item.as_ref();
        if !script::is_scriptable(task) {
            continue;
        }
        let mut policy = RunOncePolicy::new();
        let text = match script::capture(&executor, task, &mut policy) {
            Ok(run) => run
                .scripts
                .iter()
                .filter(|s| !s.is_empty())
                .map(CapturedScript::render)
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                let e = anyhow::Error::from(e);
                tracing::warn!(step = %step.id, error = %format!("{e:#}"), "step could not be scripted");
                format!("-- not scriptable: {e:#}")
            }
        };
        rendered.push((step.id.as_str().to_string(), text));
    }
    rendered
}
