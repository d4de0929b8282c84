//! Reference scenario binary entry point
//!
//! Runs every reference scenario on an in-process cluster and prints a
//! report. Exits non-zero if any scenario fails.

use partition::PartitionConfig;
use reference_tests::{
    BalanceCheck, ConservationCheck, DensityCheck, ExpectedResult, GhostCheck, NeighborCheck,
    ParticleLayout, ReferenceTest, TestResult,
};

/// 1000 uniform particles on 4 ranks with h = 0.05.
///
/// Every rank must hold its exact share and see ghosts from its
/// neighbours; sampled neighbour sets must match brute force.
fn uniform_cube_test() -> ReferenceTest {
    ReferenceTest {
        name: "Uniform Cube".to_string(),
        ranks: 4,
        layout: ParticleLayout::UniformCube { count: 1000, seed: 42 },
        smoothing_length: 0.05,
        max_speed: 0.0,
        steps: 1,
        dt: 0.0,
        config: PartitionConfig::default(),
        expected: ExpectedResult {
            balance: Some(BalanceCheck { max_imbalance: 0.1 }),
            ghosts: Some(GhostCheck { every_rank_has_ghosts: true }),
            neighbors: Some(NeighborCheck { samples_per_rank: 250 }),
            conservation: Some(ConservationCheck { max_mass_error: 1e-12 }),
            density: None,
        },
    }
}

/// Same particles on one rank: sort and exchange are local no-ops.
fn single_rank_test() -> ReferenceTest {
    ReferenceTest {
        name: "Single Rank".to_string(),
        ranks: 1,
        expected: ExpectedResult {
            balance: Some(BalanceCheck { max_imbalance: 0.0 }),
            ghosts: Some(GhostCheck { every_rank_has_ghosts: false }),
            neighbors: Some(NeighborCheck { samples_per_rank: 1000 }),
            conservation: Some(ConservationCheck { max_mass_error: 1e-12 }),
            density: None,
        },
        ..uniform_cube_test()
    }
}

/// Unit-density lattice on 8 ranks; interior densities from the
/// cubic-spline summation must come out at 1.
fn lattice_density_test() -> ReferenceTest {
    let per_side = 20;
    ReferenceTest {
        name: "Lattice Density".to_string(),
        ranks: 8,
        layout: ParticleLayout::Lattice { per_side },
        smoothing_length: 2.6 / per_side as f64,
        max_speed: 0.0,
        steps: 1,
        dt: 0.0,
        config: PartitionConfig::default(),
        expected: ExpectedResult {
            balance: Some(BalanceCheck { max_imbalance: 0.1 }),
            ghosts: Some(GhostCheck { every_rank_has_ghosts: true }),
            neighbors: None,
            conservation: Some(ConservationCheck { max_mass_error: 1e-12 }),
            density: Some(DensityCheck { expected: 1.0, tolerance: 0.02 }),
        },
    }
}

/// Particles drifting between walls for several iterations, so they
/// migrate between ranks.
fn drifting_cloud_test() -> ReferenceTest {
    ReferenceTest {
        name: "Drifting Cloud".to_string(),
        ranks: 3,
        layout: ParticleLayout::UniformCube { count: 3000, seed: 7 },
        smoothing_length: 0.04,
        max_speed: 1.0,
        steps: 10,
        dt: 0.02,
        config: PartitionConfig::default(),
        expected: ExpectedResult {
            balance: Some(BalanceCheck { max_imbalance: 0.1 }),
            ghosts: Some(GhostCheck { every_rank_has_ghosts: true }),
            neighbors: Some(NeighborCheck { samples_per_rank: 200 }),
            conservation: Some(ConservationCheck { max_mass_error: 1e-12 }),
            density: None,
        },
    }
}

/// A dense blob in an otherwise empty cube: the key space is badly skewed
/// but particle counts must still be balanced.
fn clustered_test() -> ReferenceTest {
    ReferenceTest {
        name: "Clustered Blob".to_string(),
        ranks: 6,
        layout: ParticleLayout::Clustered { count: 6000, sigma: 0.05, seed: 5 },
        smoothing_length: 0.01,
        max_speed: 0.0,
        steps: 1,
        dt: 0.0,
        config: PartitionConfig::default(),
        expected: ExpectedResult {
            balance: Some(BalanceCheck { max_imbalance: 0.1 }),
            ghosts: None,
            neighbors: Some(NeighborCheck { samples_per_rank: 100 }),
            conservation: Some(ConservationCheck { max_mass_error: 1e-12 }),
            density: None,
        },
    }
}

/// Get all reference scenarios
fn all_tests() -> Vec<ReferenceTest> {
    vec![
        uniform_cube_test(),
        single_rank_test(),
        lattice_density_test(),
        drifting_cloud_test(),
        clustered_test(),
    ]
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    tracing::info!("Distributed Partitioning Reference Suite");
    tracing::info!("========================================");

    let tests = all_tests();
    tracing::info!("Found {} reference scenarios", tests.len());

    let mut results: Vec<TestResult> = Vec::new();
    let mut passed_count = 0;
    let mut failed_count = 0;

    for test in tests {
        match test.run() {
            Ok(result) => {
                if result.passed {
                    passed_count += 1;
                } else {
                    failed_count += 1;
                }
                result.print_summary();
                results.push(result);
            }
            Err(e) => {
                eprintln!("\nERROR running scenario {}: {}", test.name, e);
                failed_count += 1;
            }
        }
    }

    println!("\n{}", "=".repeat(80));
    println!("OVERALL SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total scenarios: {}", results.len());
    println!("Passed: {}", passed_count);
    println!("Failed: {}", failed_count);
    println!("{}", "=".repeat(80));

    if failed_count > 0 {
        std::process::exit(1);
    }
}
