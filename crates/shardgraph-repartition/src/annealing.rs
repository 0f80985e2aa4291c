//! Temperature-gated pairwise swap search.
//!
//! Every sweep visits the users in random order and tries to exchange each
//! one's partition with a sampled partner. The temperature starts at
//! `initial_t`, drops by `delta_t` per sweep and the search stops once it
//! falls below one. Swaps keep partition loads unchanged.
//!
//! Independent restarts run in parallel, each on a private copy of the
//! projection with a seed drawn from the caller's generator. The restart
//! with the lowest final cost wins.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use shardgraph_types::UserId;
use tracing::debug;

use crate::cost::{CostModel, SwapScores};
use crate::plan::{LogicalPlan, SearchOutcome, Termination};
use crate::projection::LogicalProjection;

/// Parameters of the swap search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnealingConfig {
    pub initial_t: f64,
    pub delta_t: f64,
    /// Exponent applied to swap scores.
    pub alpha: f64,
    /// Partners sampled per user and sweep.
    pub k: usize,
    pub restarts: usize,
    /// Sample partners among the user's friends first.
    pub incremental: bool,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            initial_t: 2.0,
            delta_t: 0.01,
            alpha: 2.0,
            k: 3,
            restarts: 4,
            incremental: false,
        }
    }
}

impl AnnealingConfig {
    /// Upper bound on the number of sweeps per restart.
    pub fn max_sweeps(&self) -> usize {
        if self.initial_t < 1.0 {
            return 0;
        }
        if self.delta_t <= 0.0 {
            return 1;
        }
        ((self.initial_t - 1.0) / self.delta_t).floor() as usize + 1
    }
}

#[derive(Debug)]
struct Restart {
    index: usize,
    cost: usize,
    sweeps: usize,
    termination: Termination,
    projection: LogicalProjection,
}

/// Swap search over a cost model.
#[derive(Debug, Clone)]
pub struct Annealing<C> {
    config: AnnealingConfig,
    cost: C,
}

impl<C: CostModel> Annealing<C> {
    pub fn new(config: AnnealingConfig, cost: C) -> Self {
        Self { config, cost }
    }

    pub fn config(&self) -> &AnnealingConfig {
        &self.config
    }

    /// Runs every restart and keeps the cheapest result.
    ///
    /// If no restart beats the starting cost the plan is empty.
    pub fn run<R: Rng + ?Sized>(
        &self,
        projection: &LogicalProjection,
        rng: &mut R,
    ) -> SearchOutcome {
        let initial_cost = self.cost.cost(projection);
        let seeds: Vec<u64> = (0..self.config.restarts.max(1))
            .map(|_| rng.next_u64())
            .collect();

        let best = seeds
            .into_par_iter()
            .enumerate()
            .map(|(index, seed)| {
                let mut local = projection.clone();
                let mut rng = StdRng::seed_from_u64(seed);
                let (sweeps, termination) = self.restart(&mut local, &mut rng);
                Restart {
                    index,
                    cost: self.cost.cost(&local),
                    sweeps,
                    termination,
                    projection: local,
                }
            })
            .min_by_key(|r| (r.cost, r.index));

        match best {
            Some(best) if best.cost < initial_cost => {
                debug!(
                    restart = best.index,
                    sweeps = best.sweeps,
                    cost = best.cost,
                    "annealing improved"
                );
                SearchOutcome {
                    plan: LogicalPlan::diff(projection, &best.projection),
                    rounds: best.sweeps,
                    termination: best.termination,
                    initial_cost,
                    final_cost: best.cost,
                }
            }
            best => SearchOutcome {
                plan: LogicalPlan::unchanged(projection),
                rounds: best.as_ref().map_or(0, |r| r.sweeps),
                termination: best.map_or(Termination::Converged, |r| r.termination),
                initial_cost,
                final_cost: initial_cost,
            },
        }
    }

    /// One full temperature schedule.
    fn restart(
        &self,
        projection: &mut LogicalProjection,
        rng: &mut StdRng,
    ) -> (usize, Termination) {
        let mut order: Vec<UserId> = projection.users().collect();
        if order.len() < 2 {
            return (0, Termination::Converged);
        }
        let everyone = order.clone();

        let mut temperature = self.config.initial_t;
        for sweep in 0..self.config.max_sweeps() {
            order.shuffle(rng);
            let swaps = self.sweep(projection, &order, &everyone, temperature, rng);
            debug!(sweep, temperature, swaps, "annealing sweep");
            if swaps == 0 {
                return (sweep + 1, Termination::Converged);
            }
            temperature -= self.config.delta_t;
        }
        (self.config.max_sweeps(), Termination::Exhausted)
    }

    fn sweep(
        &self,
        projection: &mut LogicalProjection,
        order: &[UserId],
        everyone: &[UserId],
        temperature: f64,
        rng: &mut StdRng,
    ) -> usize {
        let mut swaps = 0;
        for &user in order {
            let mut partner = None;
            if self.config.incremental {
                let friends: Vec<UserId> = projection.friends(user).iter().copied().collect();
                let sample: Vec<UserId> = friends
                    .choose_multiple(rng, self.config.k)
                    .copied()
                    .collect();
                partner = self.best_partner(projection, user, &sample, temperature);
            }
            if partner.is_none() {
                let sample: Vec<UserId> = (0..self.config.k)
                    .map(|_| everyone[rng.gen_range(0..everyone.len())])
                    .collect();
                partner = self.best_partner(projection, user, &sample, temperature);
            }
            if let Some(partner) = partner {
                self.cost.apply_swap(projection, user, partner);
                swaps += 1;
            }
        }
        swaps
    }

    /// The accepted candidate with the best post-swap score.
    fn best_partner(
        &self,
        projection: &LogicalProjection,
        user: UserId,
        candidates: &[UserId],
        temperature: f64,
    ) -> Option<UserId> {
        let home = projection.partition_of(user)?;
        let mut best: Option<(UserId, SwapScores)> = None;
        for &candidate in candidates {
            if candidate == user || projection.partition_of(candidate) == Some(home) {
                continue;
            }
            let scores = self
                .cost
                .swap_scores(projection, user, candidate, self.config.alpha);
            if scores.accepts(temperature) && best.is_none_or(|(_, b)| scores.beats(&b)) {
                best = Some((candidate, scores));
            }
        }
        best.map(|(candidate, _)| candidate)
    }
}
