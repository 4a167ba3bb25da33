use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::datetime::parse_date_expr;
use crate::notify::TermNotifier;
use crate::persist::LocalStore;
use crate::render::{Renderer, short_id};
use crate::session::{Session, SessionHandle};
use crate::task::{Priority, Task, TaskDraft, TaskId, UserId};
use crate::view::{DEFAULT_DUE_SOON_MINUTES, Tab};

type CliSession = Session<LocalStore, SystemClock, TermNotifier>;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "list", "done", "delete", "stats", "watch", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: LocalStore,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let threshold = Duration::minutes(
        cfg.get_i64("reminder.threshold.minutes")
            .unwrap_or(DEFAULT_DUE_SOON_MINUTES),
    );
    let mut session = Session::new(store, SystemClock, TermNotifier, threshold);

    let user = UserId::new(cfg.get("user.name").unwrap_or_else(|| "local".to_string()));
    let handle = session.sign_in(user)?;
    let now = Utc::now();

    debug!(
        command = %inv.command,
        args = ?inv.command_args,
        "dispatching command"
    );

    match inv.command.as_str() {
        "add" => cmd_add(&mut session, &inv.command_args, now),
        "list" => cmd_list(&mut session, cfg, renderer, &inv.command_args, now),
        "done" => cmd_done(&mut session, &inv.command_args),
        "delete" => cmd_delete(&mut session, &inv.command_args),
        "stats" => cmd_stats(&mut session, renderer),
        "watch" => cmd_watch(&mut session, handle, cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(session, args, now))]
fn cmd_add(session: &mut CliSession, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command add");

    let (title, mods) = parse_title_and_mods(args, now)?;
    let mut draft = TaskDraft::new(&title)?;
    for one_mod in mods {
        match one_mod {
            Mod::Due(dt) => draft.due = Some(dt),
            Mod::Priority(priority) => draft.priority = priority,
            Mod::Description(text) => draft.description = text,
        }
    }

    let id = session
        .add(draft)?
        .ok_or_else(|| anyhow!("no active user"))?;

    debug!(count = session.tasks().len(), "task added");
    println!("Created task {}.", short_id(&id));
    Ok(())
}

#[instrument(skip(session, cfg, renderer, args, now))]
fn cmd_list(
    session: &mut CliSession,
    cfg: &Config,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command list");

    let tab = match args.first() {
        Some(token) => {
            Tab::parse(token).ok_or_else(|| anyhow!("unknown tab: {token} (expected all, today, upcoming or overdue)"))?
        }
        None => {
            let default = cfg.get("default.tab").unwrap_or_else(|| "all".to_string());
            Tab::parse(&default).unwrap_or_default()
        }
    };

    let rows = session.view(tab);
    renderer.print_task_table(&rows, now, session.threshold())?;
    renderer.print_stats(session.stats())?;

    for notice in session.take_notices() {
        println!("{notice}");
    }
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_done(session: &mut CliSession, args: &[String]) -> anyhow::Result<()> {
    info!("command done");

    let selector = args
        .first()
        .ok_or_else(|| anyhow!("done requires a task selector"))?;
    let id = resolve_selector(session.tasks(), selector)?;
    session.toggle(&id)?;

    let completed = session
        .tasks()
        .iter()
        .find(|task| task.id == id)
        .map(|task| task.completed)
        .unwrap_or(false);
    if completed {
        println!("Completed task {}.", short_id(&id));
    } else {
        println!("Reopened task {}.", short_id(&id));
    }
    Ok(())
}

#[instrument(skip(session, args))]
fn cmd_delete(session: &mut CliSession, args: &[String]) -> anyhow::Result<()> {
    info!("command delete");

    let selector = args
        .first()
        .ok_or_else(|| anyhow!("delete requires a task selector"))?;
    let id = resolve_selector(session.tasks(), selector)?;
    session.delete(&id)?;

    println!("Deleted task {}.", short_id(&id));
    Ok(())
}

#[instrument(skip(session, renderer))]
fn cmd_stats(session: &mut CliSession, renderer: &mut Renderer) -> anyhow::Result<()> {
    info!("command stats");
    renderer.print_stats(session.stats())
}

#[instrument(skip(session, handle, cfg))]
fn cmd_watch(
    session: &mut CliSession,
    handle: SessionHandle,
    cfg: &Config,
) -> anyhow::Result<()> {
    info!("command watch");

    session.enable_notifications();
    let tick_seconds = cfg
        .get_i64("reminder.tick.seconds")
        .unwrap_or(60)
        .max(1) as u64;
    println!("Watching tasks every {tick_seconds}s (Ctrl-C to stop).");

    loop {
        for notice in session.take_notices() {
            println!("{notice}");
        }
        std::thread::sleep(std::time::Duration::from_secs(tick_seconds));
        if let Err(err) = session.on_tick(handle) {
            warn!(error = %err, "sync failed; keeping last known snapshot");
            println!("Sync failed: {err}. Keeping last known tasks.");
        }
    }
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Implemented commands: add, list [all|today|upcoming|overdue], done, delete, stats, watch"
    );
    Ok(())
}

fn resolve_selector(tasks: &[Task], token: &str) -> anyhow::Result<TaskId> {
    if let Some(task) = tasks.iter().find(|task| task.id.as_str() == token) {
        return Ok(task.id.clone());
    }

    let mut prefix_matches = tasks
        .iter()
        .filter(|task| task.id.as_str().starts_with(token));
    if let Some(task) = prefix_matches.next() {
        if prefix_matches.next().is_some() {
            return Err(anyhow!("ambiguous task selector: {token}"));
        }
        return Ok(task.id.clone());
    }

    let mut title_matches = tasks
        .iter()
        .filter(|task| task.title.eq_ignore_ascii_case(token));
    if let Some(task) = title_matches.next() {
        if title_matches.next().is_some() {
            return Err(anyhow!("ambiguous task selector: {token}"));
        }
        return Ok(task.id.clone());
    }

    Err(anyhow!("no matching task: {token}"))
}

#[derive(Debug, Clone)]
enum Mod {
    Due(DateTime<Utc>),
    Priority(Priority),
    Description(String),
}

#[instrument(skip(args, now))]
fn parse_title_and_mods(
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<(String, Vec<Mod>)> {
    let mut title_parts = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal && let Some(one_mod) = parse_one_mod(arg, now)? {
            mods.push(one_mod);
            continue;
        }

        title_parts.push(arg.clone());
    }

    Ok((title_parts.join(" "), mods))
}

fn parse_one_mod(tok: &str, now: DateTime<Utc>) -> anyhow::Result<Option<Mod>> {
    let Some((key, value)) = tok.split_once(':') else {
        return Ok(None);
    };

    match key.to_ascii_lowercase().as_str() {
        "due" => Ok(Some(Mod::Due(parse_date_expr(value, now)?))),
        "pri" | "priority" => {
            let priority = Priority::parse(value)
                .ok_or_else(|| anyhow!("unknown priority: {value} (expected low, medium or high)"))?;
            Ok(Some(Mod::Priority(priority)))
        }
        "desc" | "description" => Ok(Some(Mod::Description(value.to_string()))),
        _ => {
            warn!(token = %tok, "unrecognized modifier token treated as title text");
            Ok(None)
        }
    }
}
