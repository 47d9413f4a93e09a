//! Seed campaigns: run many seeds, collect failures, replay one in detail.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::network::FaultConfig;
use crate::oracle::{ConvergenceOracle, OracleResult};
use crate::rng::DeterministicRng;
use crate::{SimulationConfig, SimulationResult, Simulator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub participants: usize,
    pub rounds: u64,
    pub action_rate_percent: u8,
    pub window_ms: u64,
    pub tick_ms: u64,
    pub fault: FaultConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..100,
            participants: 4,
            rounds: 24,
            action_rate_percent: 60,
            window_ms: 100,
            tick_ms: 40,
            fault: FaultConfig {
                max_delay_rounds: 3,
                drop_rate_percent: 10,
                duplicate_rate_percent: 5,
                reorder_rate_percent: 10,
                freeze_rate_percent: 5,
                freeze_duration_rounds: 2,
            },
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            participants: self.participants,
            rounds: self.rounds,
            action_rate_percent: self.action_rate_percent,
            tick_ms: self.tick_ms,
            window_ms: self.window_ms,
            fault: self.fault,
        }
    }

    /// # Errors
    ///
    /// Empty seed range, or a per-seed config that would not validate.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First failing seed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One seed replayed with everything kept.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run every seed in `config.seed_range`.
///
/// # Errors
///
/// Invalid config or an internal simulator error. Invariant violations are
/// reported in the returned [`CampaignReport`], not as errors.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;
    let mut report = CampaignReport::default();

    for seed in config.seed_range.clone() {
        let trace = run_seed(seed, config)?;
        report.seeds_run += 1;
        if trace.result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }

        if trace.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: trace
                    .oracle
                    .violations
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            });
        }
    }

    Ok(report)
}

/// Replay a single seed with full trace and oracle details.
///
/// # Errors
///
/// Invalid config or an internal simulator error.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    run_seed(seed, config)
}

fn run_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    let result = Simulator::new(config.sim_config_for_seed(seed))?.run()?;
    let mut oracle_rng = DeterministicRng::new(seed.wrapping_add(0xDEAD));
    let oracle = ConvergenceOracle::check_all(&result.final_state, &mut oracle_rng);
    Ok(DetailedTrace { result, oracle })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_seed_range_rejected() {
        let config = CampaignConfig {
            seed_range: 5..5,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_participants_rejected() {
        let config = CampaignConfig {
            participants: 0,
            ..CampaignConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn sim_config_carries_seed_and_shape() {
        let config = CampaignConfig::default();
        let sim = config.sim_config_for_seed(42);
        assert_eq!(sim.seed, 42);
        assert_eq!(sim.participants, config.participants);
        assert_eq!(sim.fault, config.fault);
    }

    #[test]
    fn campaign_with_faults_passes() {
        let config = CampaignConfig {
            seed_range: 0..40,
            participants: 3,
            rounds: 16,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).expect("campaign");
        assert_eq!(report.seeds_run, 40);
        assert!(
            report.all_passed(),
            "failures: {:?}",
            report.failures.first()
        );
        assert!(report.first_failure.is_none());
        assert!(report.interesting_states_reached > 0);
    }

    #[test]
    fn replay_is_deterministic() {
        let config = CampaignConfig::default();
        let a = replay_seed(7, &config).expect("replay");
        let b = replay_seed(7, &config).expect("replay");
        assert_eq!(a.result.trace, b.result.trace);
        assert_eq!(a.oracle, b.oracle);
        assert!(!a.result.trace.is_empty());
    }

    #[test]
    fn report_serializes() {
        let report = CampaignReport {
            seeds_run: 10,
            seeds_passed: 9,
            first_failure: Some(7),
            failures: vec![SeedFailure {
                seed: 7,
                violations: vec!["convergence: participant 0 disagrees".into()],
            }],
            interesting_states_reached: 5,
        };
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(json.contains("\"seeds_run\":10"));
        assert!(json.contains("\"first_failure\":7"));
    }
}
