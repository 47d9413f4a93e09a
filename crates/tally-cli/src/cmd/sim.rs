//! `tally sim`: deterministic simulation campaigns.
//!
//! Without `--replay` a campaign runs across `--seeds` seeds. With
//! `--replay <seed>` a single seed is rerun and its trace summarised.

use std::path::Path;
use std::process;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tally_sim::TraceEventKind;
use tally_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use tally_sim::network::FaultConfig;

use crate::output::{OutputMode, pretty_kv, pretty_section, print_json};

#[derive(Args, Debug)]
pub struct SimArgs {
    /// Number of seeds to run.
    #[arg(long, default_value = "100")]
    pub seeds: u64,

    /// First seed.
    #[arg(long, default_value = "0")]
    pub seed_start: u64,

    /// Participants per simulation.
    #[arg(long, default_value = "4")]
    pub participants: usize,

    /// Rounds per simulation.
    #[arg(long, default_value = "24")]
    pub rounds: u64,

    /// Overall fault probability between 0.0 and 1.0; scales drop,
    /// duplicate, reorder and freeze rates.
    #[arg(long, default_value = "0.1")]
    pub faults: f64,

    /// Maximum delivery delay in rounds.
    #[arg(long, default_value = "3")]
    pub max_delay: u8,

    /// Replay one seed in detail instead of running a campaign.
    #[arg(long)]
    pub replay: Option<u64>,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    seeds_run: usize,
    seeds_passed: usize,
    seeds_failed: usize,
    first_failure: Option<u64>,
    interesting_states_reached: usize,
    all_passed: bool,
    failures: Vec<FailureOutput>,
}

#[derive(Debug, Serialize)]
struct FailureOutput {
    seed: u64,
    violations: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReplayOutput {
    seed: u64,
    trace_events: usize,
    actions: usize,
    dropped: usize,
    replays_over_snapshot: usize,
    participants: usize,
    oracle_passed: bool,
    violations: Vec<String>,
    interesting_state_reached: bool,
}

fn campaign_config(args: &SimArgs, seed_start: u64, seeds: u64) -> CampaignConfig {
    CampaignConfig {
        seed_range: seed_start..seed_start.saturating_add(seeds),
        participants: args.participants,
        rounds: args.rounds,
        fault: FaultConfig {
            max_delay_rounds: args.max_delay,
            drop_rate_percent: scale_fault(args.faults, 50),
            duplicate_rate_percent: scale_fault(args.faults, 25),
            reorder_rate_percent: scale_fault(args.faults, 50),
            freeze_rate_percent: scale_fault(args.faults, 25),
            freeze_duration_rounds: 2,
        },
        ..CampaignConfig::default()
    }
}

/// Scale a base probability (0.0 to 1.0) by a weight into a percent.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_fault(base: f64, weight_pct: u8) -> u8 {
    (base * f64::from(weight_pct)).clamp(0.0, 100.0) as u8
}

pub fn run_sim(args: &SimArgs, output: OutputMode, _project_root: &Path) -> Result<()> {
    if let Some(seed) = args.replay {
        return run_replay(args, seed, output);
    }

    let report = run_campaign(&campaign_config(args, args.seed_start, args.seeds))?;
    let out = RunOutput {
        seeds_run: report.seeds_run,
        seeds_passed: report.seeds_passed,
        seeds_failed: report.failures.len(),
        first_failure: report.first_failure,
        interesting_states_reached: report.interesting_states_reached,
        all_passed: report.all_passed(),
        failures: report
            .failures
            .iter()
            .map(|f| FailureOutput {
                seed: f.seed,
                violations: f.violations.clone(),
            })
            .collect(),
    };

    if output.is_json() {
        print_json(&out)?;
    } else {
        let stdout = std::io::stdout();
        let mut w = stdout.lock();
        pretty_section(&mut w, "Simulation Campaign")?;
        pretty_kv(&mut w, "Seeds", out.seeds_run.to_string())?;
        pretty_kv(&mut w, "Participants", args.participants.to_string())?;
        pretty_kv(&mut w, "Rounds", args.rounds.to_string())?;
        pretty_kv(&mut w, "Fault rate", format!("{:.0}%", args.faults * 100.0))?;
        pretty_kv(
            &mut w,
            "Results",
            format!(
                "{} passed / {} failed ({} interesting)",
                out.seeds_passed, out.seeds_failed, out.interesting_states_reached
            ),
        )?;
        if out.all_passed {
            pretty_kv(&mut w, "Status", "all seeds passed")?;
        } else {
            for failure in out.failures.iter().take(5) {
                pretty_kv(&mut w, "Failed seed", failure.seed.to_string())?;
                for violation in &failure.violations {
                    pretty_kv(&mut w, "", format!("- {violation}"))?;
                }
            }
            pretty_kv(
                &mut w,
                "Replay",
                format!(
                    "tally sim --replay {} --participants {} --rounds {}",
                    out.first_failure.unwrap_or(0),
                    args.participants,
                    args.rounds
                ),
            )?;
        }
    }

    if !report.all_passed() {
        process::exit(1);
    }
    Ok(())
}

fn run_replay(args: &SimArgs, seed: u64, output: OutputMode) -> Result<()> {
    let trace = replay_seed(seed, &campaign_config(args, seed, 1))?;
    let events = &trace.result.trace;
    let count = |pred: fn(&TraceEventKind) -> bool| events.iter().filter(|e| pred(&e.kind)).count();

    let out = ReplayOutput {
        seed,
        trace_events: events.len(),
        actions: count(|k| matches!(k, TraceEventKind::Act { .. })),
        dropped: count(|k| matches!(k, TraceEventKind::Send { dropped: true, .. })),
        replays_over_snapshot: count(|k| matches!(k, TraceEventKind::ReplayOverSnapshot { .. })),
        participants: trace.result.final_state.views.len(),
        oracle_passed: trace.oracle.passed,
        violations: trace.oracle.violations.iter().map(ToString::to_string).collect(),
        interesting_state_reached: trace.result.interesting_state_reached,
    };

    if output.is_json() {
        print_json(&out)?;
    } else {
        let stdout = std::io::stdout();
        let mut w = stdout.lock();
        pretty_section(&mut w, &format!("Replay seed {seed}"))?;
        pretty_kv(&mut w, "Trace events", out.trace_events.to_string())?;
        pretty_kv(&mut w, "Actions", out.actions.to_string())?;
        pretty_kv(&mut w, "Dropped", out.dropped.to_string())?;
        pretty_kv(&mut w, "Replays", out.replays_over_snapshot.to_string())?;
        pretty_kv(
            &mut w,
            "Oracle",
            if out.oracle_passed { "passed" } else { "FAILED" },
        )?;
        for violation in &out.violations {
            pretty_kv(&mut w, "", format!("- {violation}"))?;
        }
    }

    if !out.oracle_passed {
        process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_scaling_clamps() {
        assert_eq!(scale_fault(0.0, 50), 0);
        assert_eq!(scale_fault(0.1, 50), 5);
        assert_eq!(scale_fault(10.0, 50), 100);
        assert_eq!(scale_fault(-1.0, 50), 0);
    }
}
