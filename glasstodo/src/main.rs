//! `glasstodo`: task list manager.
//!
//! Stores tasks as JSON files in a data directory, shared by every process
//! pointed at the same directory. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/glasstodo/config.toml`).
//!
//! ```bash
//! glasstodo add Buy milk --priority high
//! glasstodo list --filter active
//! glasstodo toggle 0192          # any unique id prefix
//!
//! # In another terminal: follow changes as they happen
//! glasstodo watch
//! ```

use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use glasstodo::config::{AppConfig, CliArgs, Command};
use glasstodo::persistence::ImportError;
use glasstodo::storage::file::FileStorage;
use glasstodo::store::{StoreError, TodoPatch};
use glasstodo::view::Filter;
use glasstodo::{SessionOptions, StorageError, TodoSession};
use glasstodo_proto::codec::CodecError;
use glasstodo_proto::{Todo, TodoExtras, TodoId};

type Session = TodoSession<FileStorage>;

/// Failures reported to the user by a command.
#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error("no task matches {0:?}")]
    UnknownTask(String),

    #[error("{0:?} matches more than one task, use a longer prefix")]
    AmbiguousTask(String),

    #[error("task text must not be empty")]
    EmptyText,

    #[error("position must be at least 1")]
    ZeroPosition,

    #[error("nothing to update")]
    EmptyPatch,

    #[error("storage is unavailable, changes were not saved")]
    NotSaved,

    #[error("storage is unavailable, cannot watch for changes")]
    NotWatching,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let config = match AppConfig::load_or_skip_file(&cli) {
        Ok((config, None)) => config,
        Ok((config, Some(e))) => {
            eprintln!("Warning: ignoring config file: {e}");
            config
        }
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command.unwrap_or(Command::List { filter: None }), &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging.
///
/// Logs go to stderr unless `file_path` is given, in which case they are
/// written through a non-blocking appender. The returned [`WorkerGuard`]
/// must be held until shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(command: Command, config: &AppConfig) -> Result<(), CommandError> {
    let storage = Arc::new(FileStorage::with_detection(
        &config.storage_dir,
        config.change_detection,
        config.poll_interval,
    )?);
    let options = SessionOptions {
        key: config.key.clone(),
        filter: config.default_filter,
        ..SessionOptions::default()
    };
    let mut session = TodoSession::open(storage, options).await;
    if session.persistence_degraded() {
        eprintln!(
            "Warning: storage at {} is unavailable, working in memory only",
            config.storage_dir.display()
        );
    }

    let result = execute(&mut session, command).await;
    session.close();
    result
}

#[allow(clippy::too_many_lines)]
async fn execute(session: &mut Session, command: Command) -> Result<(), CommandError> {
    let mut out = io::stdout().lock();
    match command {
        Command::Add {
            text,
            description,
            priority,
            category,
            due,
        } => {
            let extras = (description.is_some()
                || priority.is_some()
                || category.is_some()
                || due.is_some())
            .then(|| TodoExtras {
                description: description.unwrap_or_default(),
                priority: priority.unwrap_or_default(),
                category: category.unwrap_or_default(),
                due_date: due,
            });
            let id = session
                .create(&text.join(" "), extras)
                .await
                .ok_or(CommandError::EmptyText)?;
            ensure_saved(session)?;
            writeln!(out, "added {id}")?;
        }
        Command::List { filter } => {
            if let Some(filter) = filter {
                session.set_filter(filter);
            }
            print_list(&mut out, session)?;
        }
        Command::Toggle { id } => {
            let id = resolve_id(session, &id)?;
            session.toggle(&id).await;
            ensure_saved(session)?;
            if let Some(todo) = session.store().get(&id) {
                print_todo(&mut out, None, todo)?;
            }
        }
        Command::Edit { id, text } => {
            let id = resolve_id(session, &id)?;
            let text = text.join(" ");
            if text.trim().is_empty() {
                return Err(CommandError::EmptyText);
            }
            session.edit(&id, &text).await;
            ensure_saved(session)?;
        }
        Command::Update {
            id,
            text,
            description,
            priority,
            category,
            due,
            clear_due,
        } => {
            let id = resolve_id(session, &id)?;
            if text.as_deref().is_some_and(|t| t.trim().is_empty()) {
                return Err(CommandError::EmptyText);
            }
            let patch = TodoPatch {
                text,
                description,
                priority,
                category,
                due_date: if clear_due { Some(None) } else { due.map(Some) },
            };
            if patch.is_empty() {
                return Err(CommandError::EmptyPatch);
            }
            session.update(&id, patch).await;
            ensure_saved(session)?;
        }
        Command::Rm { id } => {
            let id = resolve_id(session, &id)?;
            session.delete(&id).await;
            ensure_saved(session)?;
            writeln!(out, "deleted {id}")?;
        }
        Command::ClearCompleted => {
            let removed = session.clear_completed().await;
            ensure_saved(session)?;
            writeln!(out, "removed {removed} completed task(s)")?;
        }
        Command::ToggleAll => {
            session.toggle_all().await;
            ensure_saved(session)?;
            print_list(&mut out, session)?;
        }
        Command::Move { from, to } => {
            let from = from.checked_sub(1).ok_or(CommandError::ZeroPosition)?;
            let to = to.checked_sub(1).ok_or(CommandError::ZeroPosition)?;
            session.reorder(from, to).await?;
            ensure_saved(session)?;
            print_list(&mut out, session)?;
        }
        Command::Stats => {
            let stats = session.storage_stats().await;
            writeln!(
                out,
                "{} total, {} active, {} completed ({} bytes stored)",
                stats.total, stats.active, stats.completed, stats.storage_size
            )?;
        }
        Command::Export { output } => {
            let json = session.export_all()?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    writeln!(out, "exported {} task(s) to {}", session.stats().total, path.display())?;
                }
                None => writeln!(out, "{json}")?,
            }
        }
        Command::Import { path } => {
            let text = tokio::fs::read_to_string(&path).await?;
            let count = session.import_all(&text).await?;
            writeln!(out, "imported {count} task(s)")?;
        }
        Command::Clear => {
            if !session.clear_all().await {
                return Err(CommandError::NotSaved);
            }
            writeln!(out, "all tasks deleted")?;
        }
        Command::Watch => {
            drop(out);
            watch(session).await?;
        }
    }
    Ok(())
}

/// Prints the list, then again after every change from another process,
/// until Ctrl-C.
async fn watch(session: &mut Session) -> Result<(), CommandError> {
    print_list(&mut io::stdout().lock(), session)?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            changed = session.next_external_change() => {
                if !changed {
                    return Err(CommandError::NotWatching);
                }
                let mut out = io::stdout().lock();
                writeln!(out, "--- updated {} ---", Local::now().format("%H:%M:%S"))?;
                print_list(&mut out, session)?;
            }
        }
    }
}

fn ensure_saved(session: &Session) -> Result<(), CommandError> {
    if session.persistence_degraded() {
        return Err(CommandError::NotSaved);
    }
    Ok(())
}

/// Finds the task whose id equals `needle` or uniquely starts with it.
fn resolve_id(session: &Session, needle: &str) -> Result<TodoId, CommandError> {
    let exact = TodoId::new(needle);
    if session.store().get(&exact).is_some() {
        return Ok(exact);
    }
    let mut matches = session
        .store()
        .todos()
        .iter()
        .filter(|t| t.id.as_str().starts_with(needle));
    match (matches.next(), matches.next()) {
        (Some(todo), None) if !needle.is_empty() => Ok(todo.id.clone()),
        (Some(_), _) => Err(CommandError::AmbiguousTask(needle.to_string())),
        (None, _) => Err(CommandError::UnknownTask(needle.to_string())),
    }
}

fn print_list(out: &mut impl Write, session: &Session) -> io::Result<()> {
    let visible = session.visible();
    if visible.is_empty() {
        writeln!(out, "{}", empty_message(session.filter()))?;
    }
    for todo in visible {
        let position = session
            .store()
            .todos()
            .iter()
            .position(|t| t.id == todo.id)
            .map(|i| i + 1);
        print_todo(out, position, todo)?;
    }
    let stats = session.stats();
    writeln!(
        out,
        "{} item(s) left, {} completed",
        stats.active, stats.completed
    )
}

fn print_todo(out: &mut impl Write, position: Option<usize>, todo: &Todo) -> io::Result<()> {
    let mark = if todo.completed { "x" } else { " " };
    let position = position.map_or_else(String::new, |p| format!("{p:>3}. "));
    write!(out, "{position}[{mark}] {}  ({})", todo.text, todo.id)?;
    if let Some(priority) = todo.priority {
        write!(out, " !{priority}")?;
    }
    if let Some(category) = todo.category {
        write!(out, " #{category}")?;
    }
    if let Some(due) = todo.due_date {
        let overdue = if todo.is_overdue(Local::now().date_naive()) {
            " overdue"
        } else {
            ""
        };
        write!(out, " due {due}{overdue}")?;
    }
    writeln!(out)
}

const fn empty_message(filter: Filter) -> &'static str {
    match filter {
        Filter::All => "no tasks",
        Filter::Active => "no active tasks",
        Filter::Completed => "no completed tasks",
    }
}
