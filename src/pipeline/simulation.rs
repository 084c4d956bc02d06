//! Synthetic cohorts for exercising the allocator.
//!
//! Categories are drawn independently per variable using the configured
//! prevalence weights (uniform when none are given).

use crate::allocator::Allocator;
use crate::models::{
    Characteristics, Config, ConfigError, ParticipantRecord, Result, RunStats, VariableSpec,
};
use crate::pipeline::allocate_all;
use crate::schema::Schema;
use rand::distributions::{Distribution, WeightedIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

/// Draws participant characteristics from per-variable prevalences.
pub struct CohortGenerator {
    variables: Vec<(String, Vec<String>, WeightedIndex<u32>)>,
    rng: ChaCha8Rng,
}

impl CohortGenerator {
    /// # Errors
    ///
    /// Returns `ConfigError` when prevalence weights do not line up with
    /// categories or are all zero.
    pub fn new(specs: &[VariableSpec], seed: u64) -> std::result::Result<Self, ConfigError> {
        let mut variables = Vec::with_capacity(specs.len());
        for spec in specs {
            let weights = if spec.prevalence.is_empty() {
                vec![1; spec.categories.len()]
            } else if spec.prevalence.len() != spec.categories.len() {
                return Err(ConfigError::PrevalenceMismatch {
                    variable: spec.name.clone(),
                    expected: spec.categories.len(),
                    found: spec.prevalence.len(),
                });
            } else {
                spec.prevalence.clone()
            };
            let dist = WeightedIndex::new(&weights)
                .map_err(|_| ConfigError::ZeroPrevalence(spec.name.clone()))?;
            variables.push((spec.name.clone(), spec.categories.clone(), dist));
        }

        Ok(Self {
            variables,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Characteristics for one synthetic participant.
    pub fn next_characteristics(&mut self) -> Characteristics {
        let rng = &mut self.rng;
        self.variables
            .iter()
            .map(|(name, categories, dist)| {
                let idx = dist.sample(rng);
                (name.clone(), categories[idx].clone())
            })
            .collect()
    }

    /// `count` participants with ids `0..count`.
    pub fn cohort(&mut self, count: usize) -> Vec<ParticipantRecord> {
        (0..count as u64)
            .map(|i| ParticipantRecord {
                id: i.into(),
                characteristics: self.next_characteristics(),
            })
            .collect()
    }
}

/// Allocate a synthetic cohort described by `config`.
///
/// `count` and `seed` override the `[simulation]` section.
pub fn run_simulation(
    config: &Config,
    count: Option<usize>,
    seed: Option<u64>,
) -> Result<(Allocator, RunStats)> {
    config.validate()?;
    let count = count.unwrap_or(config.simulation.participants);
    let seed = seed.unwrap_or(config.simulation.seed);

    let schema = Schema::from_specs(&config.variables)?;
    let mut generator = CohortGenerator::new(&config.variables, seed)?;
    let mut allocator = Allocator::new(schema, config.trial.clone())?;

    info!(participants = count, seed, "Starting simulation");
    let stats = allocate_all(&mut allocator, generator.cohort(count), false)?;
    Ok((allocator, stats))
}
