//! Reference scenario framework for distributed partitioning
//!
//! A scenario deals a deterministic particle set out to the ranks of an
//! in-process cluster, runs a short driver loop (drift, iteration update,
//! density callback) and validates the partitioned result against
//! single-process answers.


use std::time::{Duration, Instant};

use partition::{BodySystem, Communicator, LocalCluster, PartitionConfig, PartitionError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spatial::{compute_density_pressure_soundspeed, distance_sq, Particle};

/// How the initial particles are laid out in the unit cube
#[derive(Debug, Clone)]
pub enum ParticleLayout {
    /// Uniform random positions
    UniformCube {
        /// Number of particles
        count: usize,
        /// RNG seed
        seed: u64,
    },
    /// Regular lattice at cell centres, mass chosen for unit density
    Lattice {
        /// Particles per axis
        per_side: usize,
    },
    /// Gaussian blob around the cube centre, heavily skewed towards it
    Clustered {
        /// Number of particles
        count: usize,
        /// Standard deviation of the blob
        sigma: f64,
        /// RNG seed
        seed: u64,
    },
}

impl ParticleLayout {
    /// Generate the particles with smoothing length `h` and random velocities
    /// of magnitude up to `max_speed` per axis.
    pub fn generate(&self, h: f64, max_speed: f64) -> Vec<Particle<3>> {
        match *self {
            ParticleLayout::UniformCube { count, seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                (0..count)
                    .map(|i| {
                        let position = [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()];
                        let velocity = random_velocity(&mut rng, max_speed);
                        Particle::new(i as u64, position, 1.0 / count as f64, h)
                            .with_velocity(velocity)
                            .with_internal_energy(1.0)
                    })
                    .collect()
            }
            ParticleLayout::Lattice { per_side } => {
                let spacing = 1.0 / per_side as f64;
                let mass = spacing * spacing * spacing;
                let mut particles = Vec::with_capacity(per_side.pow(3));
                for i in 0..per_side {
                    for j in 0..per_side {
                        for k in 0..per_side {
                            let position = [
                                (i as f64 + 0.5) * spacing,
                                (j as f64 + 0.5) * spacing,
                                (k as f64 + 0.5) * spacing,
                            ];
                            let id = particles.len() as u64;
                            particles.push(Particle::new(id, position, mass, h).with_internal_energy(1.0));
                        }
                    }
                }
                particles
            }
            ParticleLayout::Clustered { count, sigma, seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                (0..count)
                    .map(|i| {
                        let mut position = [0.0; 3];
                        for x in position.iter_mut() {
                            // Sum of uniforms, close enough to a normal for a skewed blob
                            let g: f64 = (0..12).map(|_| rng.gen::<f64>()).sum::<f64>() - 6.0;
                            *x = (0.5 + sigma * g).clamp(0.0, 1.0);
                        }
                        let velocity = random_velocity(&mut rng, max_speed);
                        Particle::new(i as u64, position, 1.0 / count as f64, h)
                            .with_velocity(velocity)
                            .with_internal_energy(1.0)
                    })
                    .collect()
            }
        }
    }
}

fn random_velocity(rng: &mut ChaCha8Rng, max_speed: f64) -> [f64; 3] {
    if max_speed <= 0.0 {
        return [0.0; 3];
    }
    [
        rng.gen_range(-max_speed..max_speed),
        rng.gen_range(-max_speed..max_speed),
        rng.gen_range(-max_speed..max_speed),
    ]
}

/// Expected result criteria for a reference scenario
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Load balance after the last sort
    pub balance: Option<BalanceCheck>,
    /// Ghost presence across rank boundaries
    pub ghosts: Option<GhostCheck>,
    /// Neighbour sets against a brute-force oracle
    pub neighbors: Option<NeighborCheck>,
    /// Particle count and mass conservation
    pub conservation: Option<ConservationCheck>,
    /// Density of interior lattice particles
    pub density: Option<DensityCheck>,
}

/// Check per-rank particle counts against `total / ranks`
#[derive(Debug, Clone)]
pub struct BalanceCheck {
    /// Largest tolerated relative deviation
    pub max_imbalance: f64,
}

/// Check that every rank received ghosts, or that none did
#[derive(Debug, Clone)]
pub struct GhostCheck {
    /// `true`: every rank has ghosts; `false`: no rank has any
    pub every_rank_has_ghosts: bool,
}

/// Compare neighbour sets with a brute-force search over all particles
#[derive(Debug, Clone)]
pub struct NeighborCheck {
    /// Owned particles checked per rank
    pub samples_per_rank: usize,
}

/// Check that no particle or mass is lost
#[derive(Debug, Clone)]
pub struct ConservationCheck {
    /// Maximum allowed relative mass error
    pub max_mass_error: f64,
}

/// Check density of particles far from the lattice boundary
#[derive(Debug, Clone)]
pub struct DensityCheck {
    /// Expected density
    pub expected: f64,
    /// Relative tolerance
    pub tolerance: f64,
}

/// A reference scenario
#[derive(Debug, Clone)]
pub struct ReferenceTest {
    /// Scenario name
    pub name: String,
    /// Number of ranks
    pub ranks: usize,
    /// Initial particles
    pub layout: ParticleLayout,
    /// Smoothing length of every particle
    pub smoothing_length: f64,
    /// Initial speed bound, per axis
    pub max_speed: f64,
    /// Driver loop iterations
    pub steps: usize,
    /// Drift timestep
    pub dt: f64,
    /// Partitioning parameters
    pub config: PartitionConfig,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

/// State one rank reports back after the driver loop
#[derive(Debug, Clone)]
struct RankSummary {
    particles: Vec<Particle<3>>,
    ghosts: usize,
    imbalance: f64,
    global_count: u64,
    sampled_neighbors: Vec<(u64, Vec<u64>)>,
}

/// Result of running a reference scenario
#[derive(Debug)]
pub struct TestResult {
    /// Scenario name
    pub name: String,
    /// Whether every check passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Number of ranks
    pub ranks: usize,
    /// Particles on all ranks at the end
    pub particles: usize,
    /// Ghost copies on all ranks after the last exchange
    pub ghosts: usize,
    /// Worst per-rank imbalance after the last sort
    pub max_imbalance: f64,
    /// Driver loop iterations
    pub steps: usize,
    /// Wall-clock time of the cluster run
    pub elapsed: Duration,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Details, always set on failure
    pub message: Option<String>,
}

impl CheckResult {
    fn pass(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            message: Some(message),
        }
    }

    fn fail(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            message: Some(message),
        }
    }
}

impl ReferenceTest {
    /// Run the scenario and validate the results
    pub fn run(&self) -> Result<TestResult, PartitionError> {
        tracing::info!("Running reference scenario: {} ({} ranks)", self.name, self.ranks);

        let initial = self.layout.generate(self.smoothing_length, self.max_speed);
        let initial_mass: f64 = initial.iter().map(|p| p.mass).sum();
        tracing::info!(
            "Initialized: {} particles, h={}",
            initial.len(),
            self.smoothing_length
        );

        let started = Instant::now();
        let summaries = LocalCluster::new(self.ranks)
            .run(|comm| self.run_rank(comm, &initial))?;
        let elapsed = started.elapsed();

        let particles: Vec<Particle<3>> = summaries.iter().flat_map(|s| s.particles.iter().copied()).collect();
        let ghosts: usize = summaries.iter().map(|s| s.ghosts).sum();
        let max_imbalance = summaries.iter().map(|s| s.imbalance).fold(0.0, f64::max);
        tracing::info!(
            "Scenario complete in {:.1} ms: {} particles, {} ghosts",
            elapsed.as_secs_f64() * 1000.0,
            particles.len(),
            ghosts
        );

        let mut checks = Vec::new();
        if let Some(ref check) = self.expected.balance {
            checks.push(validate_balance(max_imbalance, check));
        }
        if let Some(ref check) = self.expected.ghosts {
            checks.push(validate_ghosts(&summaries, check));
        }
        if let Some(ref check) = self.expected.neighbors {
            checks.push(validate_neighbors(&summaries, &particles, check));
        }
        if let Some(ref check) = self.expected.conservation {
            checks.push(validate_conservation(&summaries, &particles, initial.len(), initial_mass, check));
        }
        if let Some(ref check) = self.expected.density {
            checks.push(validate_density(&particles, self.smoothing_length, check));
        }

        Ok(TestResult {
            name: self.name.clone(),
            passed: checks.iter().all(|c| c.passed),
            checks,
            ranks: self.ranks,
            particles: particles.len(),
            ghosts,
            max_imbalance,
            steps: self.steps,
            elapsed,
        })
    }

    /// Driver loop of one rank: drift, redistribute, compute density.
    fn run_rank<C: Communicator>(&self, comm: C, initial: &[Particle<3>]) -> Result<RankSummary, PartitionError> {
        let share: Vec<Particle<3>> = initial
            .iter()
            .skip(comm.rank())
            .step_by(self.ranks)
            .copied()
            .collect();
        let mut system = BodySystem::new(comm, self.config.clone(), share)?;

        let dt = self.dt;
        let mut imbalance = 0.0;
        for step in 0..self.steps.max(1) {
            if step > 0 {
                system.apply_all(|p| drift_reflecting(p, dt));
            }
            let report = system.update_iteration()?;
            imbalance = report.sort.imbalance;
            system.apply_in_smoothing_length(compute_density_pressure_soundspeed);
            tracing::debug!(
                "Rank {} step {}: {} owned, {} ghosts",
                system.rank(),
                step,
                system.owned().len(),
                report.exchange.received
            );
        }

        let samples = self.expected.neighbors.as_ref().map_or(0, |c| c.samples_per_rank);
        let sampled_neighbors = system
            .owned()
            .iter()
            .take(samples)
            .map(|p| {
                let mut ids: Vec<u64> = system
                    .neighbors_within(&p.position, p.smoothing_length)
                    .iter()
                    .map(|n| n.id)
                    .collect();
                ids.sort_unstable();
                (p.id, ids)
            })
            .collect();

        let global_count = system.global_count()?;
        let ghosts = system.ghosts().len();
        Ok(RankSummary {
            particles: system.into_particles(),
            ghosts,
            imbalance,
            global_count,
            sampled_neighbors,
        })
    }
}

/// Kinematic drift inside the unit cube with specular walls.
fn drift_reflecting(p: &mut Particle<3>, dt: f64) {
    for axis in 0..3 {
        let mut x = p.position[axis] + p.velocity[axis] * dt;
        if x < 0.0 {
            x = -x;
            p.velocity[axis] = -p.velocity[axis];
        } else if x > 1.0 {
            x = 2.0 - x;
            p.velocity[axis] = -p.velocity[axis];
        }
        p.position[axis] = x.clamp(0.0, 1.0);
    }
}

fn validate_balance(max_imbalance: f64, check: &BalanceCheck) -> CheckResult {
    let message = format!(
        "Worst rank: {:.1}% (limit: {:.1}%)",
        max_imbalance * 100.0,
        check.max_imbalance * 100.0
    );
    if max_imbalance <= check.max_imbalance {
        CheckResult::pass("Load Balance", message)
    } else {
        CheckResult::fail("Load Balance", message)
    }
}

fn validate_ghosts(summaries: &[RankSummary], check: &GhostCheck) -> CheckResult {
    let counts: Vec<usize> = summaries.iter().map(|s| s.ghosts).collect();
    let ok = if check.every_rank_has_ghosts {
        counts.iter().all(|&g| g > 0)
    } else {
        counts.iter().all(|&g| g == 0)
    };
    let message = format!("Ghosts per rank: {:?}", counts);
    if ok {
        CheckResult::pass("Ghost Presence", message)
    } else {
        CheckResult::fail("Ghost Presence", message)
    }
}

fn validate_neighbors(summaries: &[RankSummary], all: &[Particle<3>], check: &NeighborCheck) -> CheckResult {
    let by_id: std::collections::HashMap<u64, &Particle<3>> = all.iter().map(|p| (p.id, p)).collect();
    let mut checked = 0;
    let mut mismatches = Vec::new();
    for (id, found) in summaries.iter().flat_map(|s| s.sampled_neighbors.iter()) {
        let Some(p) = by_id.get(id) else {
            mismatches.push(*id);
            continue;
        };
        let h2 = p.smoothing_length * p.smoothing_length;
        let mut expected: Vec<u64> = all
            .iter()
            .filter(|q| distance_sq(&p.position, &q.position) <= h2)
            .map(|q| q.id)
            .collect();
        expected.sort_unstable();
        if &expected != found {
            mismatches.push(*id);
        }
        checked += 1;
    }
    if mismatches.is_empty() {
        CheckResult::pass(
            "Neighbor Oracle",
            format!("{} particles checked (up to {} per rank)", checked, check.samples_per_rank),
        )
    } else {
        CheckResult::fail(
            "Neighbor Oracle",
            format!("{} of {} neighbour sets differ, e.g. particle {}", mismatches.len(), checked, mismatches[0]),
        )
    }
}

fn validate_conservation(
    summaries: &[RankSummary],
    particles: &[Particle<3>],
    initial_count: usize,
    initial_mass: f64,
    check: &ConservationCheck,
) -> CheckResult {
    let mass: f64 = particles.iter().map(|p| p.mass).sum();
    let mass_error = if initial_mass > 0.0 {
        (mass - initial_mass).abs() / initial_mass
    } else {
        0.0
    };
    let mut ids: Vec<u64> = particles.iter().map(|p| p.id).collect();
    ids.sort_unstable();
    ids.dedup();
    let counts_agree = summaries.iter().all(|s| s.global_count == initial_count as u64);

    let message = format!(
        "Count: {} -> {} ({} unique), mass error: {:.2e}",
        initial_count,
        particles.len(),
        ids.len(),
        mass_error
    );
    if particles.len() == initial_count && ids.len() == initial_count && counts_agree && mass_error <= check.max_mass_error {
        CheckResult::pass("Conservation", message)
    } else {
        CheckResult::fail("Conservation", message)
    }
}

fn validate_density(particles: &[Particle<3>], h: f64, check: &DensityCheck) -> CheckResult {
    let interior: Vec<f64> = particles
        .iter()
        .filter(|p| p.position.iter().all(|&x| x > h && x < 1.0 - h))
        .map(|p| p.density)
        .collect();
    if interior.is_empty() {
        return CheckResult::fail("Interior Density", "No particles farther than h from the walls".to_string());
    }
    let worst = interior
        .iter()
        .map(|rho| (rho - check.expected).abs() / check.expected)
        .fold(0.0, f64::max);
    let message = format!(
        "{} interior particles, worst error {:.2}% (tolerance: {:.1}%)",
        interior.len(),
        worst * 100.0,
        check.tolerance * 100.0
    );
    if worst <= check.tolerance {
        CheckResult::pass("Interior Density", message)
    } else {
        CheckResult::fail("Interior Density", message)
    }
}

impl TestResult {
    /// Print a summary of the scenario result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Scenario: {}", self.name);
        println!("{}", "=".repeat(80));
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!("Ranks: {}", self.ranks);
        println!("Steps: {}", self.steps);
        println!("Particles: {}", self.particles);
        println!("Ghosts: {}", self.ghosts);
        println!("Worst imbalance: {:.1}%", self.max_imbalance * 100.0);
        println!("Wall time: {:.1} ms", self.elapsed.as_secs_f64() * 1000.0);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}
