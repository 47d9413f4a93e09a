use proptest::prelude::*;
use tally_sim::network::FaultConfig;
use tally_sim::oracle::ConvergenceOracle;
use tally_sim::rng::DeterministicRng;
use tally_sim::{SimulationConfig, Simulator};

fn arb_fault() -> impl Strategy<Value = FaultConfig> {
    (0_u8..4, 0_u8..40, 0_u8..30, 0_u8..50, 0_u8..20, 0_u8..4).prop_map(
        |(delay, drop, dup, reorder, freeze, freeze_rounds)| FaultConfig {
            max_delay_rounds: delay,
            drop_rate_percent: drop,
            duplicate_rate_percent: dup,
            reorder_rate_percent: reorder,
            freeze_rate_percent: freeze,
            freeze_duration_rounds: freeze_rounds,
        },
    )
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(48))]

    #[test]
    fn every_seed_and_fault_mix_converges(
        seed in any::<u64>(),
        participants in 1_usize..6,
        rounds in 1_u64..24,
        window_ms in 0_u64..200,
        fault in arb_fault(),
    ) {
        let config = SimulationConfig {
            seed,
            participants,
            rounds,
            window_ms,
            fault,
            ..SimulationConfig::default()
        };
        let result = Simulator::new(config).expect("sim").run().expect("run");
        let mut rng = DeterministicRng::new(seed);
        let oracle = ConvergenceOracle::check_all(&result.final_state, &mut rng);
        prop_assert!(oracle.passed, "{:?}", oracle.violations);
    }
}
