use std::{
    io::{self, Write},
    str::SplitWhitespace,
    thread,
};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal,
};
use log::error;
use serde::Serialize;

use crate::error::Result;
use crate::manager::job_manager::JobManager;
use crate::models::job::JobId;
use crate::package::{batch::upgrade_all, commands::PackageCommands};
use crate::queue::{
    icon::icon_task,
    subprocess_queue::{SubprocessQueue, TaskOutcome},
};

const PROMPT: &str = ">>> ";

const HELP: &str = "\
Commands:
  search <query>          search the package source
  installed               list installed packages
  updates                 list available upgrades
  details <id>            show a package's manifest details
  install <id>            install a package as a job
  uninstall <id>          uninstall a package as a job
  upgrade <id>            upgrade a package as a job
  upgrade-all             upgrade every listed package, one at a time
  download <id> [name]    download an installer
  run <command> [args]    run any command as a job
  status <job>            show a job's state and full output
  watch <job>             follow a job's output until it finishes
  cancel <job>            cancel a running job
  jobs                    list known jobs
  icon <id> [name]        extract an app icon through the helper queue
  help                    show this text
  exit                    quit";

enum Input {
    Line(String),
    Quit,
}

/// Keeps raw mode scoped to reading a single line.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            error!("Failed to disable raw mode: {}", e);
        }
    }
}

pub fn run_cli(manager: JobManager, commands: PackageCommands, icons: SubprocessQueue) -> Result<()> {
    println!("Package console started. Enter a command, 'help' for a list or 'exit' to quit.");
    let mut history: Vec<String> = Vec::new();

    loop {
        let input = match read_line(&history)? {
            Input::Line(input) => input,
            Input::Quit => break,
        };
        if input.trim().is_empty() {
            continue;
        }
        history.push(input.clone());

        let mut args = input.split_whitespace();
        match args.next() {
            Some("search") => {
                let query: Vec<&str> = args.collect();
                if query.is_empty() {
                    println!("Search query must be specified.");
                } else {
                    report(commands.search(&query.join(" ")));
                }
            }
            Some("installed") => report(commands.list_installed()),
            Some("updates") => report(commands.list_updates()),
            Some("details") => match args.next() {
                Some(id) => match commands.details(id) {
                    Ok(Some(details)) => print_json(&details),
                    Ok(None) => println!("Package {} not found", id),
                    Err(e) => println!("Command failed: {}", e),
                },
                None => println!("Package ID must be specified."),
            },
            Some("install") => with_id(args, |id| commands.start_install(&manager, id)),
            Some("uninstall") => with_id(args, |id| commands.start_uninstall(&manager, id)),
            Some("upgrade") => with_id(args, |id| commands.start_upgrade(&manager, id)),
            Some("download") => {
                let id = args.next();
                let name: Vec<&str> = args.collect();
                let name = (!name.is_empty()).then(|| name.join(" "));
                match id {
                    Some(id) => announce(commands.start_download(&manager, id, name.as_deref())),
                    None => println!("Package ID must be specified."),
                }
            }
            Some("upgrade-all") => match commands.list_updates() {
                Ok(updates) if updates.is_empty() => println!("Everything is up to date."),
                Ok(updates) => {
                    println!("Upgrading {} package(s) one at a time...", updates.len());
                    let ids = updates.iter().map(|update| update.id.as_str());
                    let interval = manager.config().jobs.poll_interval();
                    print_json(&upgrade_all(&commands, &manager, ids, interval));
                }
                Err(e) => println!("Failed to list updates: {}", e),
            },
            Some("run") => match args.next() {
                Some(program) => {
                    let id = manager.start_job(program, args.map(str::to_string).collect());
                    print_started(&id);
                }
                None => println!("Command to execute must be specified."),
            },
            Some("status") => with_job(args, |id| match manager.status(id) {
                Some(report) => {
                    let job = manager.get_job(id);
                    let state = job.map(|job| format!("{:?}", job.status)).unwrap_or_default();
                    println!("Job {} status: {} (done: {}, success: {})", id, state, report.done, report.success);
                    print!("{}", report.output);
                    if !report.output.is_empty() && !report.output.ends_with('\n') {
                        println!();
                    }
                }
                None => println!("Job {} not found", id),
            }),
            Some("watch") => with_job(args, |id| watch(&manager, id)),
            Some("cancel") => with_job(args, |id| {
                if manager.cancel_job(id) {
                    println!("Sent cancel signal for job {}", id);
                } else {
                    println!("Job {} is not running", id);
                }
            }),
            Some("jobs") => {
                let jobs = manager.list_jobs();
                if jobs.is_empty() {
                    println!("No jobs");
                } else {
                    println!("{:<42} {:<10} {:<6} {}", "ID", "Status", "Code", "Command");
                    println!("{}", "-".repeat(80));
                    for job in jobs {
                        let code = job.exit_code.map(|code| code.to_string()).unwrap_or_else(|| "-".to_string());
                        println!("{:<42} {:<10} {:<6} {}", job.id, format!("{:?}", job.status), code, job.command_line());
                    }
                }
            }
            Some("icon") => {
                let id = args.next();
                let name: Vec<&str> = args.collect();
                match id {
                    Some(id) => {
                        let name = if name.is_empty() { id.to_string() } else { name.join(" ") };
                        request_icon(&manager, &icons, id, &name);
                    }
                    None => println!("Package ID must be specified."),
                }
            }
            Some("help") => println!("{}", HELP),
            Some("exit") => break,
            Some(cmd) => println!("Unknown command: {}. Type 'help' for a list.", cmd),
            None => continue,
        }
    }

    println!("Exiting the program...");
    Ok(())
}

fn read_line(history: &[String]) -> io::Result<Input> {
    let _raw = RawMode::enable()?;
    let mut history_index = history.len();
    let mut input = String::new();
    redraw(&input)?;

    loop {
        let Event::Key(key_event) = event::read()? else {
            continue;
        };
        if key_event.kind == KeyEventKind::Release {
            continue;
        }
        match key_event.code {
            KeyCode::Enter => {
                print!("\r\n");
                io::stdout().flush()?;
                return Ok(Input::Line(input));
            }
            KeyCode::Char('c' | 'd') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                print!("\r\n");
                io::stdout().flush()?;
                return Ok(Input::Quit);
            }
            KeyCode::Up => {
                if history_index > 0 {
                    history_index -= 1;
                    if let Some(command) = history.get(history_index) {
                        input = command.clone();
                        redraw(&input)?;
                    }
                }
            }
            KeyCode::Down => {
                if history_index < history.len() {
                    history_index += 1;
                }
                input = history.get(history_index).cloned().unwrap_or_default();
                redraw(&input)?;
            }
            KeyCode::Char(c) => {
                input.push(c);
                print!("{}", c);
                io::stdout().flush()?;
            }
            KeyCode::Backspace => {
                input.pop();
                redraw(&input)?;
            }
            _ => {}
        }
    }
}

fn redraw(input: &str) -> io::Result<()> {
    execute!(
        io::stdout(),
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine)
    )?;
    print!("{}{}", PROMPT, input);
    io::stdout().flush()
}

fn watch(manager: &JobManager, id: &JobId) {
    let interval = manager.config().jobs.poll_interval();
    let mut consumed = 0;
    println!("Watching job {}.", id);
    loop {
        let Some(response) = manager.poll(id, consumed) else {
            println!("Job {} not found", id);
            return;
        };
        for line in &response.new_lines {
            println!("{}", line);
        }
        consumed = response.total_line_count;
        if response.done {
            let verdict = if response.success == Some(true) { "succeeded" } else { "did not succeed" };
            println!("Job {} {}.", id, verdict);
            return;
        }
        thread::sleep(interval);
    }
}

fn request_icon(manager: &JobManager, icons: &SubprocessQueue, id: &str, name: &str) {
    let Some(task) = icon_task(&manager.config().icons, name, Some(id)) else {
        println!("No icon helper configured.");
        return;
    };
    match icons.enqueue(task).recv() {
        Ok(TaskOutcome::Succeeded(data)) => println!("Icon for {}: {} bytes of encoded data", id, data.len()),
        Ok(TaskOutcome::NegativeCached) => println!("No icon for {} (cached miss)", id),
        Ok(outcome) => println!("No icon for {}: {:?}", id, outcome),
        Err(e) => println!("Icon request for {} was dropped: {}", id, e),
    }
}

fn with_id(mut args: SplitWhitespace<'_>, start: impl FnOnce(&str) -> Result<JobId>) {
    match args.next() {
        Some(id) => announce(start(id)),
        None => println!("Package ID must be specified."),
    }
}

fn with_job(mut args: SplitWhitespace<'_>, action: impl FnOnce(&JobId)) {
    match args.next() {
        Some(id) => action(&JobId::from(id)),
        None => println!("Job ID must be specified."),
    }
}

fn announce(started: Result<JobId>) {
    match started {
        Ok(id) => print_started(&id),
        Err(e) => println!("Failed to start job: {}", e),
    }
}

fn print_started(id: &JobId) {
    println!("Started job with ID: {}", id);
    println!("Use `watch {}` to follow its output", id);
}

fn report<T: Serialize>(listing: Result<T>) {
    match listing {
        Ok(records) => print_json(&records),
        Err(e) => println!("Command failed: {}", e),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize result: {}", e),
    }
}
