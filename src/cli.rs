//! Line-oriented front end on stdin, standing in for the dashboard UI.

use anyhow::{bail, Result};
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    task::JoinHandle,
};

use crate::settings::{SettingsError, SettingsPatch};
use crate::timer::TimerSnapshot;
use crate::FocusApp;

const HELP: &str = "commands: toggle | reset | status | set <field>=<value> | history | quit";
const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Toggle,
    Reset,
    Status,
    Set(SettingsPatch),
    History,
    Help,
    Quit,
}

fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let command = match word {
        "toggle" | "t" => Command::Toggle,
        "reset" | "r" => Command::Reset,
        "status" | "s" => Command::Status,
        "history" | "h" => Command::History,
        "help" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        "set" => Command::Set(SettingsPatch::parse_assignment(rest.trim())?),
        other => bail!("unknown command '{other}'"),
    };
    Ok(Some(command))
}

fn describe(snapshot: &TimerSnapshot) -> String {
    format!(
        "{} {} [{}] sessions completed: {}",
        snapshot.mode.as_str(),
        snapshot.formatted_time_left(),
        if snapshot.is_running { "running" } else { "paused" },
        snapshot.sessions_completed
    )
}

/// Print a line whenever the engine lands in a different phase.
fn spawn_phase_printer(app: &FocusApp) -> JoinHandle<()> {
    let mut updates = app.controller.subscribe();
    tokio::spawn(async move {
        let mut last_mode = updates.borrow_and_update().mode;
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.mode != last_mode {
                last_mode = snapshot.mode;
                println!("now {}", describe(&snapshot));
            }
        }
    })
}

pub(crate) async fn run(app: &FocusApp) -> Result<()> {
    println!("{}", describe(&app.controller.snapshot()));
    println!("{HELP}");
    let printer = spawn_phase_printer(app);

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        match command {
            Command::Toggle => println!("{}", describe(&app.controller.toggle().await?)),
            Command::Reset => println!("{}", describe(&app.controller.reset().await?)),
            Command::Status => println!("{}", describe(&app.controller.snapshot())),
            Command::Set(patch) => match app.controller.update_settings(patch).await {
                Ok(settings) => println!("{}", serde_json::to_string(&settings)?),
                Err(err) if err.is::<SettingsError>() => println!("rejected: {err}"),
                Err(err) => return Err(err),
            },
            Command::History => {
                let records = app.recorder.records();
                if records.is_empty() {
                    println!("no completed sessions yet");
                }
                for record in records.iter().take(HISTORY_LIMIT) {
                    println!(
                        "{} {} {}s",
                        record.completed_at.format("%Y-%m-%d %H:%M"),
                        record.kind.as_str(),
                        record.duration
                    );
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    printer.abort();
    Ok(())
}
