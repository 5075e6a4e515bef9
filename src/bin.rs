use anyhow::{bail, Context};
use chrono::Local;
use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use pathframe::{
    logger, upcoming, utils, AutomationPath, CommandGenerator, ContentGenerator, ExecutionTracker,
    FileStore, GenerationError, KeyValueStore, PathFrame, PathRepository, RunStatus, ScheduleSpec,
    Settings,
};
use std::{
    process::{Command as Process, Stdio},
    sync::Arc,
};

fn cli() -> Command {
    let id = || Arg::new("id").required(true).help("automation path id");

    command!()
        .about("Schedules recurring content generation paths")
        .subcommand_required(true)
        .subcommand(Command::new("run").about("Runs the scheduler and the dashboard in the foreground"))
        .subcommand(Command::new("start").about("Starts a detached pathframe instance"))
        .subcommand(Command::new("shutdown").about("Stops the running instance"))
        .subcommand(Command::new("list").about("Lists the automation paths"))
        .subcommand(
            Command::new("add")
                .about("Adds an automation path")
                .arg(Arg::new("name").required(true))
                .arg(
                    Arg::new("type")
                        .long("type")
                        .default_value("daily")
                        .value_parser(["daily", "weekly", "monthly"]),
                )
                .arg(Arg::new("time").long("time").required(true).help("HH:MM, 9:00 or 9:00 PM"))
                .arg(
                    Arg::new("day")
                        .long("day")
                        .value_parser(value_parser!(u32))
                        .help("0-6 from Sunday for weekly, 1-31 for monthly"),
                )
                .arg(Arg::new("category").long("category"))
                .arg(
                    Arg::new("inactive")
                        .long("inactive")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("remove").about("Removes an automation path").arg(id()))
        .subcommand(Command::new("enable").about("Activates an automation path").arg(id()))
        .subcommand(Command::new("disable").about("Pauses an automation path").arg(id()))
        .subcommand(
            Command::new("next")
                .about("Shows the upcoming runs of a path")
                .arg(id())
                .arg(
                    Arg::new("count")
                        .long("count")
                        .short('n')
                        .default_value("5")
                        .value_parser(value_parser!(usize)),
                ),
        )
        .subcommand(Command::new("status").about("Shows what the running instance is doing"))
        .subcommand(
            Command::new("history")
                .about("Shows the most recent runs")
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .short('n')
                        .default_value("20")
                        .value_parser(value_parser!(usize)),
                ),
        )
}

fn main() -> anyhow::Result<()> {
    let settings = Settings::load();

    match cli().get_matches().subcommand() {
        Some(("run", _)) => run(settings),
        Some(("start", _)) => start(&settings),
        Some(("shutdown", _)) => shutdown(&settings),
        Some(("list", _)) => list(&settings),
        Some(("add", args)) => add(&settings, args),
        Some(("remove", args)) => {
            let removed = repository(&settings)?.remove(id_arg(args))?;
            println!("{} {}", "Removed".red(), removed.label());
            offline_edit_notice(&settings);
            Ok(())
        }
        Some(("enable", args)) => set_active(&settings, id_arg(args), true),
        Some(("disable", args)) => set_active(&settings, id_arg(args), false),
        Some(("next", args)) => next(&settings, args),
        Some(("status", _)) => status(&settings),
        Some(("history", args)) => history(&settings, args),
        _ => unreachable!("subcommand_required"),
    }
}

fn id_arg(args: &ArgMatches) -> &str {
    args.get_one::<String>("id").map(String::as_str).unwrap_or_default()
}

fn store(settings: &Settings) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let store = FileStore::open(&settings.store_dir)
        .with_context(|| format!("cannot open data directory {}", settings.store_dir))?;
    Ok(Arc::new(store))
}

fn repository(settings: &Settings) -> anyhow::Result<PathRepository> {
    Ok(PathRepository::load(store(settings)?)?)
}

fn generator(settings: &Settings) -> Arc<dyn ContentGenerator> {
    match &settings.generator_command {
        Some(command) => Arc::new(CommandGenerator::new(command, settings.generator_args.clone())),
        None => Arc::new(|path: &AutomationPath| {
            Err::<(), _>(GenerationError::Failed(format!(
                "no generator command configured for {}",
                path.label()
            )))
        }),
    }
}

fn run(settings: Settings) -> anyhow::Result<()> {
    let _logger = logger::rolling_logger()?;
    let generator = generator(&settings);
    let store = store(&settings)?;

    let frame = PathFrame::init(settings, store, generator)?;
    println!(
        "PathFrame running at {}",
        frame.settings.base_url().bright_green()
    );
    frame.run();
    Ok(())
}

fn start(settings: &Settings) -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("cannot locate the pathframe executable")?;

    Process::new(exe)
        .arg("run")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("pathframe run failed")?;

    println!(
        "PathFrame will soon be available at: {}",
        settings.base_url().bright_green()
    );
    Ok(())
}

fn shutdown(settings: &Settings) -> anyhow::Result<()> {
    let url = format!("{}/shutdown", settings.base_url());
    reqwest::blocking::get(url)
        .and_then(|response| response.error_for_status())
        .context("no running instance answered")?;
    println!("PathFrame will soon shutdown.");
    Ok(())
}

// the running instance keeps its own copy of the paths
fn offline_edit_notice(settings: &Settings) {
    let url = format!("{}/api/running", settings.base_url());
    if reqwest::blocking::get(url).is_ok() {
        println!(
            "{}",
            "A running instance was found, it picks up the change on its next tick.".yellow()
        );
    }
}

fn list(settings: &Settings) -> anyhow::Result<()> {
    let store = store(settings)?;
    let repository = PathRepository::load(store.clone())?;
    let tracker = ExecutionTracker::new(store, settings.history_limit);
    let running = tracker.persisted_in_progress(repository.list());
    let now = Local::now();

    if repository.list().is_empty() {
        println!("No automation paths.");
        return Ok(());
    }

    for path in repository.list() {
        let state = if running.contains(&path.id) {
            "running".bright_green()
        } else if path.active {
            "active".yellow()
        } else {
            "paused".dimmed()
        };
        let next = match pathframe::compute_next_run(path, &now) {
            Ok(Some(next)) => utils::next_run_label(&next, &now),
            Ok(None) => "-".to_string(),
            Err(error) => error.to_string().red().to_string(),
        };

        println!("{} {}", path.name.bold(), format!("ID#{}", path.id).dimmed());
        println!("\tstate: {state}");
        if let Some(recurrence) = path.recurrence().ok().flatten() {
            println!("\tschedule: {recurrence}");
        }
        println!("\tnext run: {next}");
    }
    Ok(())
}

fn add(settings: &Settings, args: &ArgMatches) -> anyhow::Result<()> {
    let name = args.get_one::<String>("name").context("name is required")?;
    let time = args.get_one::<String>("time").context("time is required")?;
    let kind = args
        .get_one::<String>("type")
        .map(String::as_str)
        .unwrap_or("daily");
    let day = args.get_one::<u32>("day").copied();

    let spec = match (kind, day) {
        ("daily", _) => ScheduleSpec::daily(time),
        ("weekly", Some(day)) => ScheduleSpec::weekly(time, day),
        ("monthly", Some(day)) => ScheduleSpec::monthly(time, day),
        (kind, None) => bail!("--day is required for {kind} schedules"),
        (kind, _) => bail!("unsupported schedule type {kind}"),
    };

    let mut path = AutomationPath::new(name, spec);
    if let Some(category) = args.get_one::<String>("category") {
        path = path.with_category(category);
    }
    path.active = !args.get_flag("inactive");

    let id = repository(settings)?.add(path)?;
    println!("{} {name} ID#{id}", "Added".bright_green());
    offline_edit_notice(settings);
    Ok(())
}

fn set_active(settings: &Settings, id: &str, active: bool) -> anyhow::Result<()> {
    repository(settings)?.set_active(id, active)?;
    if active {
        println!("{} ID#{id}", "Enabled".bright_green());
    } else {
        println!("{} ID#{id}", "Disabled".yellow());
    }
    offline_edit_notice(settings);
    Ok(())
}

fn next(settings: &Settings, args: &ArgMatches) -> anyhow::Result<()> {
    let id = id_arg(args);
    let count = args.get_one::<usize>("count").copied().unwrap_or(5);
    let repository = repository(settings)?;

    let path = repository
        .get(id)
        .with_context(|| format!("automation path '{id}' not found"))?;
    let Some(recurrence) = path.recurrence()? else {
        println!("{} has no schedule.", path.name);
        return Ok(());
    };

    let now = Local::now();
    println!("{} - {recurrence}", path.name.bold());
    if !path.active {
        println!("{}", "paused, these runs will not happen until it is enabled".dimmed());
    }
    for next in upcoming(recurrence, now).take(count) {
        println!(
            "\t{}  {}",
            next.format("%Y-%m-%d %H:%M %Z"),
            utils::next_run_label(&next, &now).dimmed()
        );
    }
    Ok(())
}

fn status(settings: &Settings) -> anyhow::Result<()> {
    let base = settings.base_url();
    let running: Vec<String> = reqwest::blocking::get(format!("{base}/api/running"))
        .and_then(|response| response.json())
        .with_context(|| format!("no running instance at {base}"))?;
    let paths: Vec<serde_json::Value> = reqwest::blocking::get(format!("{base}/api/paths"))
        .and_then(|response| response.json())
        .context("paths request failed")?;

    println!("PathFrame at {}", base.bright_green());
    for path in &paths {
        let id = path["id"].as_str().unwrap_or_default();
        let name = path["name"].as_str().unwrap_or_default();
        let next = path["nextRunLabel"].as_str().unwrap_or("-");
        let marker = if running.iter().any(|r| r == id) {
            "running".bright_green()
        } else {
            "idle".dimmed()
        };
        println!("\t{name} [{marker}] next: {next}");
    }
    Ok(())
}

fn history(settings: &Settings, args: &ArgMatches) -> anyhow::Result<()> {
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(20);
    let tracker = ExecutionTracker::new(store(settings)?, settings.history_limit);
    let entries = tracker.history(limit);

    if entries.is_empty() {
        println!("No runs recorded.");
    }
    for entry in entries {
        let status = match entry.status {
            RunStatus::Success => "success".bright_green(),
            RunStatus::Failed => "failed".red(),
        };
        println!(
            "{} {} ID#{} RUN_ID#{}",
            utils::local_time(entry.finished_at).format("%Y-%m-%d %H:%M:%S"),
            status,
            entry.path_id,
            entry.run_id
        );
        if let Some(error) = entry.error {
            println!("\t{}", error.dimmed());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn add_parses_schedule_options() {
        let matches = cli().get_matches_from([
            "pathframe", "add", "Wine pairing", "--type", "weekly", "--time", "12:00", "--day", "1",
        ]);
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "add");
        assert_eq!(args.get_one::<u32>("day"), Some(&1));
        assert_eq!(args.get_one::<String>("type").map(String::as_str), Some("weekly"));
        assert!(!args.get_flag("inactive"));
    }
}
