//! `tally script`: drive one aggregate from a line-oriented script.
//!
//! ```text
//! # comments and blank lines are skipped
//! register selection set
//! add selection red
//! remove selection red
//! text Frodo picked a colour
//! advance 100        # move the manual clock, then poll
//! flush
//! show selection [participant]
//! snapshot {"participant_data": {...}}
//! reset
//! ```
//!
//! Values are read as JSON when they parse (`5`, `true`, `null`,
//! `"quoted"`), otherwise as bare text.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;
use tally_core::clock::{Clock, ManualClock};
use tally_core::config::load_effective_config;
use tally_core::transport::RecordingTransport;
use tally_core::{OutboundUpdate, ResponseAggregate, StateReading, StateType, StateValue};
use tracing::debug;

use crate::output::{OutputMode, print_json};

#[derive(Args, Debug)]
pub struct ScriptArgs {
    /// Script file to run.
    pub file: PathBuf,

    /// Local participant id.
    #[arg(long = "as", default_value = "me")]
    pub participant: String,

    /// Coalescing window override, in milliseconds.
    #[arg(long)]
    pub window_ms: Option<u64>,

    /// Project root holding `.tally/config.toml`.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ScriptEvent {
    Update {
        line: usize,
        at_ms: i64,
        update: OutboundUpdate,
    },
    Read {
        line: usize,
        state: String,
        participant: String,
        value: Option<StateReading>,
    },
    Note {
        line: usize,
        message: String,
    },
}

struct ScriptRunner {
    aggregate: ResponseAggregate,
    clock: ManualClock,
    events: Vec<ScriptEvent>,
}

impl ScriptRunner {
    fn new(local: &str, root: &Path, window_ms: Option<u64>) -> Result<Self> {
        let config = load_effective_config(root)?;
        let clock = ManualClock::new(0);
        let mut aggregate = ResponseAggregate::new(local, Box::new(RecordingTransport::new()))
            .with_clock(Box::new(clock.clone()))
            .with_config(&config)?;
        if let Some(ms) = window_ms {
            aggregate = aggregate.with_window(Duration::from_millis(ms));
        }
        Ok(Self {
            aggregate,
            clock,
            events: Vec::new(),
        })
    }

    fn run(&mut self, source: &str) -> Result<()> {
        for (i, raw) in source.lines().enumerate() {
            let line = i + 1;
            let text = strip_comment(raw).trim();
            if text.is_empty() {
                continue;
            }
            self.exec(line, text)
                .with_context(|| format!("line {line}: {text}"))?;
        }
        Ok(())
    }

    fn exec(&mut self, line: usize, text: &str) -> Result<()> {
        let (command, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        let rest = rest.trim();
        let mut args = rest.split_whitespace();
        debug!(line, command, "script command");

        match command {
            "register" => {
                let (Some(name), Some(kind)) = (args.next(), args.next()) else {
                    bail!("usage: register <name> scalar|set");
                };
                let state_type: StateType = kind.parse().map_err(anyhow::Error::msg)?;
                self.aggregate.register_state(name, state_type)?;
            }
            "add" | "remove" => {
                let Some(name) = args.next() else {
                    bail!("usage: {command} <name> <value>");
                };
                let value = rest[name.len()..].trim();
                let value = if value.is_empty() {
                    StateValue::Null
                } else {
                    parse_value(value)
                };
                if command == "add" {
                    self.aggregate.add_state(name, value)?;
                } else {
                    self.aggregate.remove_state(name, value)?;
                }
            }
            "text" => self.aggregate.set_response_text(rest)?,
            "advance" => {
                let ms: u64 = rest
                    .parse()
                    .with_context(|| format!("advance needs milliseconds, got {rest:?}"))?;
                self.clock.advance(Duration::from_millis(ms));
                let update = self.aggregate.poll()?;
                self.record_update(line, update);
            }
            "flush" => {
                let update = self.aggregate.flush()?;
                if update.is_none() {
                    self.events.push(ScriptEvent::Note {
                        line,
                        message: "nothing to flush".into(),
                    });
                }
                self.record_update(line, update);
            }
            "show" => {
                let Some(name) = args.next() else {
                    bail!("usage: show <name> [participant]");
                };
                let participant = args
                    .next()
                    .map_or_else(|| self.aggregate.local().to_string(), str::to_string);
                let value = self.aggregate.get_state(name, &participant)?;
                self.events.push(ScriptEvent::Read {
                    line,
                    state: name.to_string(),
                    participant,
                    value,
                });
            }
            "snapshot" => self.aggregate.apply_snapshot(rest)?,
            "reset" => self.aggregate.reset()?,
            other => bail!("unknown command {other:?}"),
        }
        Ok(())
    }

    fn record_update(&mut self, line: usize, update: Option<OutboundUpdate>) {
        if let Some(update) = update {
            self.events.push(ScriptEvent::Update {
                line,
                at_ms: self.clock.now_us() / 1_000,
                update,
            });
        }
    }
}

fn strip_comment(line: &str) -> &str {
    // `#` inside a snapshot body is left alone.
    if line.trim_start().starts_with("snapshot") {
        return line;
    }
    line.split_once('#').map_or(line, |(code, _)| code)
}

fn parse_value(raw: &str) -> StateValue {
    serde_json::from_str(raw).unwrap_or_else(|_| StateValue::from(raw))
}

pub fn run_script(args: &ScriptArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let root = args.config.as_deref().unwrap_or(project_root);
    let mut runner = ScriptRunner::new(&args.participant, root, args.window_ms)?;
    let result = runner.run(&source);

    if output.is_json() {
        print_json(&runner.events)?;
    } else {
        for event in &runner.events {
            match event {
                ScriptEvent::Update {
                    line,
                    at_ms,
                    update,
                } => println!(
                    "[line {line} @ {at_ms}ms] sent {} operation(s): {}",
                    update.operations.len(),
                    update.to_json()?
                ),
                ScriptEvent::Read {
                    line,
                    state,
                    participant,
                    value,
                } => match value {
                    Some(v) => println!("[line {line}] {state}@{participant} = {v}"),
                    None => println!("[line {line}] {state}@{participant} is unset"),
                },
                ScriptEvent::Note { line, message } => println!("[line {line}] {message}"),
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn runner() -> (TempDir, ScriptRunner) {
        let dir = TempDir::new().expect("tempdir");
        let runner = ScriptRunner::new("frodo", dir.path(), None).expect("runner");
        (dir, runner)
    }

    #[test]
    fn values_parse_as_json_or_text() {
        assert_eq!(parse_value("5"), StateValue::from(5));
        assert_eq!(parse_value("true"), StateValue::from(true));
        assert_eq!(parse_value("null"), StateValue::Null);
        assert_eq!(parse_value("\"5\""), StateValue::from("5"));
        assert_eq!(parse_value("red"), StateValue::from("red"));
    }

    #[test]
    fn comments_are_stripped_except_in_snapshots() {
        assert_eq!(strip_comment("add a b # note"), "add a b ");
        assert_eq!(strip_comment("snapshot {\"x\":\"#\"}"), "snapshot {\"x\":\"#\"}");
    }

    #[test]
    fn script_coalesces_and_reports_updates() {
        let (_dir, mut r) = runner();
        r.run(
            "register selection set\n\
             add selection red\n\
             advance 40\n\
             add selection blue\n\
             advance 60\n\
             show selection\n",
        )
        .expect("run");

        let updates: Vec<&OutboundUpdate> = r
            .events
            .iter()
            .filter_map(|e| match e {
                ScriptEvent::Update { update, .. } => Some(update),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].operations.len(), 2);
        assert!(matches!(
            r.events.last(),
            Some(ScriptEvent::Read { value: Some(StateReading::Members(m)), .. }) if m == &["blue", "red"]
        ));
    }

    #[test]
    fn errors_name_the_line() {
        let (_dir, mut r) = runner();
        let err = r.run("register n scalar\nadd mystery 1\n").expect_err("unregistered");
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn flush_with_nothing_pending_is_noted() {
        let (_dir, mut r) = runner();
        r.run("flush\n").expect("run");
        assert!(matches!(r.events[0], ScriptEvent::Note { .. }));
    }
}
