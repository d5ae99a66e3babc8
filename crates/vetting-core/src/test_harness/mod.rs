//! Randomized harness for the vetting service

pub mod simulator;

pub use simulator::*;

/// Multi-seed runs over the simulator
pub struct TestHarness;

impl TestHarness {
    /// Run `seeds` independent simulations of `operations` steps each.
    ///
    /// Seeds are `0..seeds`, so a failing seed can be replayed with
    /// `vetting-sim simulate --seed N`.
    pub async fn run_certification(seeds: u64, operations: u64) -> CertificationReport {
        let mut failing_seeds = Vec::new();
        let mut total_violations = 0;
        for seed in 0..seeds {
            let report = run_simulator(SimulatorConfig {
                seed,
                total_operations: operations,
                stop_on_first_violation: false,
                ..Default::default()
            })
            .await;
            if !report.passed() {
                failing_seeds.push(seed);
            }
            total_violations += report.violations.len();
        }
        CertificationReport {
            passed: failing_seeds.is_empty(),
            total_violations,
            seeds_tested: seeds,
            failing_seeds,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CertificationReport {
    pub passed: bool,
    pub total_violations: usize,
    pub seeds_tested: u64,
    pub failing_seeds: Vec<u64>,
}
