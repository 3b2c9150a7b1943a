//! taskwire CLI: operator interface to the event and task engine.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use taskwire::catalog::TemplateCatalog;
use taskwire::config::{Config, ExposeSecret};
use taskwire::db::{Db, Page};
use taskwire::detector::{ManualEvent, TriggerContext};
use taskwire::engine::{CollectionChange, Engine, InProcessFeed};
use taskwire::generator::{RoleResolver, StaticDirectory, UnresolvedRoles};
use taskwire::model::event::{BusinessEvent, EventId, EventStatus};
use taskwire::model::task::{GeneratedTask, TaskId};
use taskwire::registry::PatternRegistry;
use taskwire::telemetry::{TelemetryConfig, init_telemetry};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "taskwire", about = "Business-event detection and task generation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for change records (JSON lines on stdin) until EOF or Ctrl-C
    Serve {
        /// Comma-separated modules to register (default: all known modules)
        #[arg(long, value_delimiter = ',')]
        modules: Vec<String>,
    },
    /// Manually trigger an event
    Trigger {
        module: String,
        event_type: String,
        entity_type: String,
        entity_id: String,
        entity_name: String,
        /// Trigger context as JSON (projectId, severity, currentState, ...)
        #[arg(long)]
        context: Option<String>,
        /// User who triggered the event
        #[arg(long)]
        actor: Option<String>,
    },
    /// Business event operations
    Events {
        #[command(subcommand)]
        action: EventAction,
    },
    /// Generated task operations
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Print registered event patterns
    Patterns {
        #[arg(long)]
        module: Option<String>,
    },
    /// Print task templates
    Templates {
        #[arg(long)]
        event_type: Option<String>,
    },
}

#[derive(Subcommand)]
enum EventAction {
    /// List events, newest first
    List {
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show an event
    Show {
        /// Event ID (full UUID or prefix)
        id: String,
    },
    /// Re-run generation for a failed event
    Reprocess { id: String },
    /// Mark an event ignored
    Ignore { id: String },
}

#[derive(Subcommand)]
enum TaskAction {
    /// List tasks for an entity, a project, or a user
    List {
        /// Entity as TYPE:ID
        #[arg(long, conflicts_with_all = ["project", "user"])]
        entity: Option<String>,
        #[arg(long, conflicts_with = "user")]
        project: Option<String>,
        #[arg(long)]
        user: Option<String>,
    },
    /// Complete (or with --undo, reopen) a checklist item
    Check {
        task_id: String,
        item_id: String,
        #[arg(long)]
        undo: bool,
        #[arg(long)]
        actor: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Patterns { module } => cmd_patterns(&config, module.as_deref()),
        Command::Templates { event_type } => cmd_templates(&config, event_type.as_deref()),
        Command::Serve { modules } => cmd_serve(&config, modules).await,
        Command::Trigger {
            module,
            event_type,
            entity_type,
            entity_id,
            entity_name,
            context,
            actor,
        } => {
            let mut context: TriggerContext = match context {
                Some(json) => serde_json::from_str(&json)?,
                None => TriggerContext::default(),
            };
            if actor.is_some() {
                context.actor = actor;
            }
            let engine = open_engine(&config).await?;
            let outcome = engine
                .trigger_event(ManualEvent {
                    module,
                    event_type,
                    entity_type,
                    entity_id,
                    entity_name,
                    context,
                })
                .await?;
            println!("Event: {} (status: {})", outcome.event_id, outcome.event.status);
            print_tasks(&outcome.tasks);
            Ok(())
        }
        Command::Events { action } => cmd_events(&open_engine(&config).await?, &config, action).await,
        Command::Tasks { action } => cmd_tasks(&open_engine(&config).await?, action).await,
    }
}

/// Engine for one-shot commands; nothing is subscribed.
async fn open_engine(config: &Config) -> anyhow::Result<Engine> {
    build_engine(config, Arc::new(InProcessFeed::new(config.feed_buffer))).await
}

fn load_registry(config: &Config) -> anyhow::Result<PatternRegistry> {
    Ok(match &config.catalog_dir {
        Some(dir) => PatternRegistry::load_from_dir(dir)?,
        None => PatternRegistry::builtin(),
    })
}

fn load_catalog(config: &Config) -> anyhow::Result<TemplateCatalog> {
    Ok(match &config.catalog_dir {
        Some(dir) => TemplateCatalog::load_from_dir(dir)?,
        None => TemplateCatalog::builtin(),
    })
}

async fn build_engine(config: &Config, feed: Arc<InProcessFeed>) -> anyhow::Result<Engine> {
    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let resolver: Arc<dyn RoleResolver> = match &config.directory_file {
        Some(path) => Arc::new(StaticDirectory::load(path)?),
        None => Arc::new(UnresolvedRoles),
    };

    Ok(Engine::builder(Arc::new(db))
        .registry(load_registry(config)?)
        .catalog(load_catalog(config)?)
        .resolver(resolver)
        .feed(feed)
        .build())
}

async fn cmd_serve(config: &Config, modules: Vec<String>) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::new(
        config.otel_endpoint.clone(),
        config.log_level.clone(),
    ))?;

    let feed = Arc::new(InProcessFeed::new(config.feed_buffer));
    let engine = build_engine(config, Arc::clone(&feed)).await?;

    let modules: Vec<String> = if modules.is_empty() {
        engine.registry().modules().map(|m| m.id.clone()).collect()
    } else {
        modules
    };
    for module in &modules {
        let added = engine.register_module(module, None).await?;
        info!(module = %module, subscriptions = added, "module registered");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CollectionChange>(&line) {
            Ok(change) => {
                let delivered = feed.publish(&change.collection, change.record).await;
                if delivered == 0 {
                    warn!(collection = %change.collection, "no subscriber for collection");
                }
            }
            Err(e) => warn!("skipping malformed change record: {e}"),
        }
    }

    engine.unsubscribe_all().await;
    Ok(())
}

async fn resolve_event_id(engine: &Engine, id: &str) -> anyhow::Result<EventId> {
    if id.len() >= 36 {
        return Ok(id.parse()?);
    }
    let recent = engine.db().recent_events(Page::first(500)).await?;
    let matches: Vec<&BusinessEvent> = recent
        .iter()
        .filter(|e| e.id.to_string().starts_with(id))
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("no event matching prefix '{id}'"),
        [event] => Ok(event.id),
        many => anyhow::bail!("{} events match prefix '{id}', be more specific", many.len()),
    }
}

async fn cmd_events(engine: &Engine, config: &Config, action: EventAction) -> anyhow::Result<()> {
    match action {
        EventAction::List {
            module,
            status,
            limit,
        } => {
            let page = Page::first(limit.unwrap_or(config.page_size));
            let events = match (module, status) {
                (Some(module), Some(status)) => {
                    engine
                        .events_for_module_in_status(&module, status.parse()?, page)
                        .await?
                }
                (Some(module), None) => engine.events_for_module(&module, page).await?,
                (None, Some(status)) => engine.events_by_status(status.parse()?, page).await?,
                (None, None) => engine.db().recent_events(page).await?,
            };
            print_events(&events);
            Ok(())
        }
        EventAction::Show { id } => {
            let id = resolve_event_id(engine, &id).await?;
            let event = engine.get_event(id).await?;
            println!("{}", serde_json::to_string_pretty(&event)?);
            print_tasks(&engine.tasks_for_event(id).await?);
            Ok(())
        }
        EventAction::Reprocess { id } => {
            let id = resolve_event_id(engine, &id).await?;
            let processed = engine.reprocess_event(id).await?;
            println!("Event: {} (status: {})", processed.event.id, processed.event.status);
            if let Some(error) = &processed.event.error {
                println!("Error: {error}");
            }
            print_tasks(&processed.tasks);
            Ok(())
        }
        EventAction::Ignore { id } => {
            let id = resolve_event_id(engine, &id).await?;
            let event = engine.ignore_event(id).await?;
            println!("Event: {} (status: {})", event.id, event.status);
            Ok(())
        }
    }
}

async fn cmd_tasks(engine: &Engine, action: TaskAction) -> anyhow::Result<()> {
    match action {
        TaskAction::List {
            entity,
            project,
            user,
        } => {
            let tasks = if let Some(entity) = entity {
                let Some((entity_type, entity_id)) = entity.split_once(':') else {
                    anyhow::bail!("--entity must be TYPE:ID");
                };
                engine.tasks_for_entity(entity_type, entity_id).await?
            } else if let Some(project) = project {
                engine.tasks_for_project(&project).await?
            } else if let Some(user) = user {
                engine.tasks_for_user(&user).await?
            } else {
                anyhow::bail!("one of --entity, --project or --user is required");
            };
            print_tasks(&tasks);
            Ok(())
        }
        TaskAction::Check {
            task_id,
            item_id,
            undo,
            actor,
        } => {
            let task_id: TaskId = task_id.parse()?;
            let task = engine
                .toggle_checklist_item(task_id, &item_id, !undo, actor.as_deref())
                .await?;
            let progress = task.progress();
            println!(
                "{}: {}/{} done ({}%), {} required open",
                task.id, progress.completed, progress.total, progress.percent, progress.required_remaining
            );
            Ok(())
        }
    }
}

fn cmd_patterns(config: &Config, module: Option<&str>) -> anyhow::Result<()> {
    let registry = load_registry(config)?;
    for definition in registry.modules().filter(|m| module.is_none_or(|id| m.id == id)) {
        println!("{} ({})", definition.id, definition.subsidiary.as_deref().unwrap_or("-"));
        for pattern in &definition.patterns {
            println!(
                "  {:<28} {:<14} {}",
                pattern.event_type,
                pattern.category.to_string(),
                pattern.detection.field_path().unwrap_or("(created)")
            );
        }
    }
    Ok(())
}

fn cmd_templates(config: &Config, event_type: Option<&str>) -> anyhow::Result<()> {
    let catalog = load_catalog(config)?;
    let templates: Vec<_> = match event_type {
        Some(event_type) => catalog.templates_for_event_type(event_type),
        None => catalog.templates().collect(),
    };
    for template in templates {
        let triggers: Vec<&str> = template.trigger_events.iter().map(String::as_str).collect();
        println!(
            "{:<26} v{}  due +{}d  {:<28} {}",
            template.id,
            template.version,
            template.default_due_days,
            template.assignment.to_string(),
            triggers.join(",")
        );
    }
    Ok(())
}

fn print_events(events: &[BusinessEvent]) {
    if events.is_empty() {
        println!("No events found.");
        return;
    }
    println!(
        "{:<8}  {:<28}  {:<10}  {:<8}  {:<24}  TRIGGERED",
        "ID", "TYPE", "STATUS", "SEVERITY", "ENTITY"
    );
    println!("{}", "-".repeat(100));
    for event in events {
        println!(
            "{:<8}  {:<28}  {:<10}  {:<8}  {:<24}  {}",
            &event.id.to_string()[..8],
            event.event_type,
            event.status.to_string(),
            event.severity.to_string(),
            event.entity_name,
            event.triggered_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} event(s)", events.len());
}

fn print_tasks(tasks: &[GeneratedTask]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    for task in tasks {
        let progress = task.progress();
        println!(
            "{}  {:<10}  {:>3}%  due {}  {}  [{}]",
            task.id,
            task.status.to_string(),
            progress.percent,
            task.due_date.format("%Y-%m-%d"),
            task.title,
            task.assignment
                .assignee_id
                .as_deref()
                .unwrap_or("unassigned")
        );
    }
}
