//! Action log inspection commands
//!
//! Entries print as JSON. Undo tokens are never printed; each entry carries
//! an `undoable` flag instead.

use super::require_db_path;
use clap::{Args, Subcommand};
use cmdbus_core::action_log::{ActionLogEntry, ActionLogQuery, ExecutionState};
use cmdbus_engine::{Engine, EngineConfig};
use serde_json::Value;

#[derive(Debug, Args)]
pub struct LogArgs {
    #[command(subcommand)]
    pub command: LogCommand,
}

#[derive(Debug, Subcommand)]
pub enum LogCommand {
    /// List entries, newest first
    List(ListArgs),
    /// Show one entry by id
    Show(ShowArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub tenant: Option<String>,

    #[arg(long)]
    pub organization: Option<String>,

    #[arg(long)]
    pub actor: Option<String>,

    #[arg(long, requires = "resource_id")]
    pub resource_kind: Option<String>,

    #[arg(long, requires = "resource_kind")]
    pub resource_id: Option<String>,

    /// Comma-separated states: done, undone, redone, failed
    #[arg(long, value_delimiter = ',')]
    pub state: Vec<String>,

    /// Only entries that can still be undone
    #[arg(long)]
    pub undoable: bool,

    #[arg(long)]
    pub exclude_undone: bool,

    /// Defaults to the configured list limit
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    pub id: String,
}

pub fn execute(args: LogArgs, mut config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.store.path = Some(require_db_path(&config)?);
    let engine = Engine::from_config(config)?;

    match args.command {
        LogCommand::List(list_args) => execute_list(&engine, list_args),
        LogCommand::Show(show_args) => execute_show(&engine, show_args),
    }
}

fn execute_list(engine: &Engine, args: ListArgs) -> Result<(), Box<dyn std::error::Error>> {
    let states = args
        .state
        .iter()
        .map(|s| {
            ExecutionState::parse(s.trim()).ok_or_else(|| format!("Unknown state: {}", s))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let query = ActionLogQuery {
        tenant_id: args.tenant,
        organization_id: args.organization,
        actor_user_id: args.actor,
        resource_kind: args.resource_kind,
        resource_id: args.resource_id,
        states,
        undoable_only: args.undoable,
        exclude_undone: args.exclude_undone,
        limit: args.limit,
        ..ActionLogQuery::default()
    };

    let entries = engine
        .store()
        .list(&query)?
        .into_iter()
        .map(printable)
        .collect::<Result<Vec<_>, _>>()?;

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn execute_show(engine: &Engine, args: ShowArgs) -> Result<(), Box<dyn std::error::Error>> {
    let entry = engine
        .store()
        .find_by_id(&args.id)?
        .ok_or_else(|| format!("Action log entry not found: {}", args.id))?;

    println!("{}", serde_json::to_string_pretty(&printable(entry)?)?);
    Ok(())
}

fn printable(mut entry: ActionLogEntry) -> Result<Value, serde_json::Error> {
    let undoable = entry.is_undoable();
    entry.undo_token = None;

    let mut value = serde_json::to_value(entry)?;
    if let Value::Object(map) = &mut value {
        map.remove("undoToken");
        map.insert("undoable".to_string(), Value::Bool(undoable));
    }
    Ok(value)
}
