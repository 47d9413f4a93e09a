//! `tally inspect`: decode a snapshot payload and show every participant's
//! readings.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tally_core::config::load_effective_config;
use tally_core::merge::reading;
use tally_core::{ParticipantId, SnapshotPayload, StateReading, StateType, TypeRegistry};

use crate::output::{OutputMode, pretty_kv, pretty_section, print_json};

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Snapshot payload file (`{"participant_data": {...}}`).
    pub payload: PathBuf,

    /// Project root holding `.tally/config.toml` with state registrations.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct Entry {
    /// `None` when the state name is not registered.
    #[serde(rename = "type")]
    state_type: Option<StateType>,
    value: StateReading,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    participants: BTreeMap<ParticipantId, BTreeMap<String, Entry>>,
    unregistered: BTreeSet<String>,
}

pub fn run_inspect(args: &InspectArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let root = args.config.as_deref().unwrap_or(project_root);
    let config = load_effective_config(root)?;
    let mut registry = TypeRegistry::new();
    config.register_states(&mut registry)?;

    let body = std::fs::read_to_string(&args.payload)
        .with_context(|| format!("Failed to read {}", args.payload.display()))?;
    let payload = SnapshotPayload::parse(&body)
        .with_context(|| format!("Failed to parse {}", args.payload.display()))?;

    let out = describe(&payload, &registry);

    if output.is_json() {
        return print_json(&out);
    }

    let stdout = std::io::stdout();
    let mut w = stdout.lock();
    if out.participants.is_empty() {
        pretty_kv(&mut w, "Participants", "none")?;
    }
    for (participant, entries) in &out.participants {
        pretty_section(&mut w, participant.as_str())?;
        for (name, entry) in entries {
            let kind = entry.state_type.map_or("?", StateType::as_str);
            pretty_kv(&mut w, name, format!("{} ({kind})", entry.value))?;
        }
    }
    if !out.unregistered.is_empty() {
        let names: Vec<&str> = out.unregistered.iter().map(String::as_str).collect();
        pretty_kv(&mut w, "Unregistered", names.join(", "))?;
    }
    Ok(())
}

fn describe(payload: &SnapshotPayload, registry: &TypeRegistry) -> InspectOutput {
    let mut out = InspectOutput {
        participants: BTreeMap::new(),
        unregistered: BTreeSet::new(),
    };
    for (participant, slot) in &payload.participant_data {
        let entries = out.participants.entry(participant.clone()).or_default();
        for (name, value) in slot {
            let state_type = registry.type_of(name).ok();
            let value = match state_type {
                Some(t) => reading(t, value),
                None => {
                    out.unregistered.insert(name.clone());
                    StateReading::Scalar(value.clone())
                }
            };
            entries.insert(name.clone(), Entry { state_type, value });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::StateValue;

    #[test]
    fn registered_sets_are_split_and_unknowns_flagged() {
        let payload = SnapshotPayload::parse(
            r#"{"participant_data":{"frodo":{"selection":"red,blue","mood":"ok"}}}"#,
        )
        .expect("parse");
        let mut registry = TypeRegistry::new();
        registry
            .register_state("selection", StateType::Set)
            .expect("register");

        let out = describe(&payload, &registry);
        let frodo = &out.participants[&ParticipantId::from("frodo")];
        assert_eq!(
            frodo["selection"].value,
            StateReading::Members(vec!["blue".into(), "red".into()])
        );
        assert_eq!(frodo["mood"].state_type, None);
        assert_eq!(
            frodo["mood"].value,
            StateReading::Scalar(StateValue::from("ok"))
        );
        assert!(out.unregistered.contains("mood"));
    }
}
