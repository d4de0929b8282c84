//! Distributed partitioning validated against single-rank and brute-force
//! answers.
//!
//! Every test builds the same global particle set, deals it out to the ranks
//! of an in-process cluster in round-robin order (so the sort has real work
//! to do) and checks the partitioned result.

use std::collections::HashMap;

use partition::{BodySystem, CommError, Communicator, LocalCluster, PartitionConfig, PartitionError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spatial::{compute_density_pressure_soundspeed, distance_sq, Particle, SpatialKey};

/// `n` particles uniformly distributed in the unit cube.
fn uniform_cube(n: usize, h: f64, seed: u64) -> Vec<Particle<3>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let position = [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()];
            Particle::new(i as u64, position, 1.0 / n as f64, h).with_internal_energy(1.0)
        })
        .collect()
}

/// Regular lattice with `per_side` particles per axis at cell centres.
fn lattice(per_side: usize, h: f64) -> Vec<Particle<3>> {
    let spacing = 1.0 / per_side as f64;
    let mut particles = Vec::new();
    for i in 0..per_side {
        for j in 0..per_side {
            for k in 0..per_side {
                let position = [
                    (i as f64 + 0.5) * spacing,
                    (j as f64 + 0.5) * spacing,
                    (k as f64 + 0.5) * spacing,
                ];
                particles.push(Particle::new(particles.len() as u64, position, 1.0, h));
            }
        }
    }
    particles
}

fn share(all: &[Particle<3>], rank: usize, ranks: usize) -> Vec<Particle<3>> {
    all.iter().skip(rank).step_by(ranks).copied().collect()
}

/// Per-rank snapshot taken after an iteration update.
struct RankState {
    owned: Vec<Particle<3>>,
    keys: Vec<SpatialKey>,
    ghosts: Vec<Particle<3>>,
    neighbor_ids: Vec<Vec<u64>>,
}

fn run_iteration(all: &[Particle<3>], ranks: usize, config: &PartitionConfig) -> Vec<RankState> {
    LocalCluster::new(ranks)
        .run(|comm| {
            let particles = share(all, comm.rank(), ranks);
            let mut system = BodySystem::new(comm, config.clone(), particles)?;
            system.update_iteration()?;
            let neighbor_ids = system
                .owned()
                .iter()
                .map(|p| {
                    let mut ids: Vec<u64> = system
                        .neighbors_within(&p.position, p.smoothing_length)
                        .iter()
                        .map(|n| n.id)
                        .collect();
                    ids.sort_unstable();
                    ids
                })
                .collect();
            Ok(RankState {
                owned: system.owned().to_vec(),
                keys: system.keys().to_vec(),
                ghosts: system.ghosts().iter().map(|g| g.particle).collect(),
                neighbor_ids,
            })
        })
        .expect("cluster run failed")
}

fn brute_force_neighbors(all: &[Particle<3>], p: &Particle<3>) -> Vec<u64> {
    let h2 = p.smoothing_length * p.smoothing_length;
    let mut ids: Vec<u64> = all
        .iter()
        .filter(|q| distance_sq(&p.position, &q.position) <= h2)
        .map(|q| q.id)
        .collect();
    ids.sort_unstable();
    ids
}

#[test]
fn test_four_ranks_uniform_cube() {
    let all = uniform_cube(1000, 0.05, 7);
    let states = run_iteration(&all, 4, &PartitionConfig::default());

    let total: usize = states.iter().map(|s| s.owned.len()).sum();
    assert_eq!(total, 1000, "owned particles must be conserved");

    for (rank, state) in states.iter().enumerate() {
        assert_eq!(state.owned.len(), 250, "rank {rank} should hold an exact quarter");
        assert!(state.keys.windows(2).all(|w| w[0] <= w[1]), "rank {rank} keys not sorted");
        assert!(!state.ghosts.is_empty(), "rank {rank} touches other ranks and needs ghosts");
    }
    for pair in states.windows(2) {
        let last = pair[0].keys.last().copied();
        let first = pair[1].keys.first().copied();
        assert!(last <= first, "key ranges of consecutive ranks overlap");
    }

    let mut ids: Vec<u64> = states.iter().flat_map(|s| s.owned.iter().map(|p| p.id)).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 1000, "every particle owned exactly once");
}

#[test]
fn test_neighbors_match_brute_force() {
    let all = uniform_cube(800, 0.08, 11);
    let states = run_iteration(&all, 3, &PartitionConfig::default());
    let by_id: HashMap<u64, &Particle<3>> = all.iter().map(|p| (p.id, p)).collect();

    for state in &states {
        for (p, found) in state.owned.iter().zip(&state.neighbor_ids) {
            let expected = brute_force_neighbors(&all, by_id[&p.id]);
            assert_eq!(found, &expected, "neighbours of particle {}", p.id);
        }
    }
}

#[test]
fn test_split_plane_exchange_is_complete_and_tight() {
    // 10^3 lattice, spacing 0.1: the two halves meet between x = 0.45 and x = 0.55
    let all = lattice(10, 0.12);
    let config = PartitionConfig {
        sample_oversampling: 1024,
        ..PartitionConfig::default()
    };
    let states = run_iteration(&all, 2, &config);

    assert!(states[0].owned.iter().all(|p| p.position[0] < 0.5));
    assert!(states[1].owned.iter().all(|p| p.position[0] > 0.5));

    // Only the first layer across the plane lies within h of the other half
    assert_eq!(states[0].ghosts.len(), 100);
    assert_eq!(states[1].ghosts.len(), 100);
    assert!(states[0].ghosts.iter().all(|g| (g.position[0] - 0.55).abs() < 1e-9));
    assert!(states[1].ghosts.iter().all(|g| (g.position[0] - 0.45).abs() < 1e-9));
}

#[test]
fn test_single_rank_is_a_local_pass() {
    let all = uniform_cube(300, 0.1, 3);
    let states = run_iteration(&all, 1, &PartitionConfig::default());
    assert_eq!(states[0].owned.len(), 300);
    assert!(states[0].ghosts.is_empty());
    assert!(states[0].keys.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_density_is_independent_of_rank_count() {
    let all = uniform_cube(600, 0.15, 5);
    let config = PartitionConfig::default();

    let densities = |ranks: usize| -> HashMap<u64, f64> {
        LocalCluster::new(ranks)
            .run(|comm| {
                let particles = share(&all, comm.rank(), ranks);
                let mut system = BodySystem::new(comm, config.clone(), particles)?;
                system.update_iteration()?;
                system.apply_in_smoothing_length(compute_density_pressure_soundspeed);
                Ok(system.into_particles())
            })
            .expect("cluster run failed")
            .into_iter()
            .flatten()
            .map(|p| (p.id, p.density))
            .collect()
    };

    let serial = densities(1);
    let distributed = densities(4);
    assert_eq!(serial.len(), 600);
    assert_eq!(distributed.len(), 600);
    for (id, rho) in &serial {
        assert!(*rho > 0.0);
        let other = distributed[id];
        assert!(
            (rho - other).abs() <= 1e-12 * rho.abs(),
            "particle {id}: {rho} on one rank vs {other} on four"
        );
    }
}

#[test]
fn test_update_neighbors_refreshes_ghost_fields() {
    let all = uniform_cube(400, 0.1, 9);
    let config = PartitionConfig::default();
    let results = LocalCluster::new(2)
        .run(|comm| {
            let particles = share(&all, comm.rank(), 2);
            let mut system = BodySystem::new(comm, config.clone(), particles)?;
            system.update_iteration()?;
            let rank = system.rank() as f64;
            system.apply_all(|p| p.pressure = rank + 1.0);
            system.update_neighbors()?;
            let global = system.global_count()?;
            let ghost_pressures: Vec<f64> = system.ghosts().iter().map(|g| g.particle.pressure).collect();
            Ok((global, ghost_pressures))
        })
        .expect("cluster run failed");

    assert_eq!(results[0].0, 400);
    assert!(!results[0].1.is_empty());
    assert!(results[0].1.iter().all(|&p| p == 2.0), "rank 0 sees rank 1's fresh values");
    assert!(results[1].1.iter().all(|&p| p == 1.0), "rank 1 sees rank 0's fresh values");
}

#[test]
fn test_particles_migrate_on_next_iteration() {
    let all = uniform_cube(500, 0.05, 21);
    let config = PartitionConfig::default();
    let results = LocalCluster::new(3)
        .run(|comm| {
            let particles = share(&all, comm.rank(), 3);
            let mut system = BodySystem::new(comm, config.clone(), particles)?;
            system.update_iteration()?;
            // Mirror every particle through the cube centre
            system.apply_all(|p| {
                for x in p.position.iter_mut() {
                    *x = 1.0 - *x;
                }
            });
            let report = system.update_iteration()?;
            Ok((report.iteration, report.sort.sent, system.keys().to_vec()))
        })
        .expect("cluster run failed");

    assert!(results.iter().all(|(iteration, _, _)| *iteration == 2));
    assert!(results.iter().map(|(_, sent, _)| sent).sum::<usize>() > 0);
    for pair in results.windows(2) {
        assert!(pair[0].2.last() <= pair[1].2.first());
    }
}

#[test]
fn test_fault_on_one_rank_aborts_cluster() {
    let all = uniform_cube(200, 0.1, 1);
    let config = PartitionConfig::default();
    let err = LocalCluster::new(3)
        .run(|comm| {
            let particles = share(&all, comm.rank(), 3);
            let mut system = BodySystem::new(comm, config.clone(), particles)?;
            system.update_iteration()?;
            if system.rank() == 1 {
                return Err(CommError::Disconnected { rank: 1, peer: 0 }.into());
            }
            system.update_neighbors()?;
            Ok(())
        })
        .unwrap_err();

    assert!(
        matches!(err, PartitionError::Communication(CommError::Disconnected { rank: 1, peer: 0 })),
        "unexpected error: {err}"
    );
}
