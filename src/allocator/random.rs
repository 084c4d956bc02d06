//! Random sources for the biased coin and tie-breaks.
//!
//! Epistemic foundation:
//! - K_i: Every draw the allocator makes goes through [`RandomSource`]
//! - I^R: Seed comes from config, the first participant id, or entropy
//! - I^B: Tests substitute a scripted sequence of draws
//! - K_i: A saved [`SourceState`] resumes the exact sequence it came from

use crate::models::{Arm, ParticipantId};
use rand::rngs::OsRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

const ID_SEED_DOMAIN: &[u8] = b"minimiser:first_participant_seed:v1";

/// Source of uniform draws used by the allocator.
pub trait RandomSource: Send {
    /// Uniform draw in `[0, 1)`.
    fn next_unit(&mut self) -> f64;

    /// Restart the sequence from `seed`.
    fn reseed(&mut self, seed: u64);

    /// Position in the sequence, for sources that can be resumed.
    fn state(&self) -> Option<SourceState> {
        None
    }

    /// Continue from a saved position.
    fn resume(&mut self, state: &SourceState) {
        let _ = state;
    }

    /// Unweighted fair coin over the two arms.
    fn coin_flip(&mut self) -> Arm {
        if self.next_unit() < 0.5 {
            Arm::A
        } else {
            Arm::B
        }
    }
}

/// Derive a stable 64-bit seed from a participant id.
///
/// Stable across platforms and releases, unlike `std::hash`.
pub fn seed_from_id(id: &ParticipantId) -> u64 {
    let mut h = Sha256::new();
    h.update(ID_SEED_DOMAIN);
    h.update(id.as_str().as_bytes());
    let digest = h.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed)
}

/// Saved position of a seeded stream: the seed last applied and the
/// number of 32-bit words consumed since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub seed: u64,
    pub word_pos: u128,
}

/// ChaCha8-backed source; the default.
#[derive(Debug, Clone)]
pub struct ChaChaSource {
    seed: u64,
    rng: ChaCha8Rng,
}

impl ChaChaSource {
    /// Seeded source, or one seeded from OS entropy when `seed` is `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| OsRng.next_u64());
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Source positioned where `state` was taken.
    pub fn from_state(state: &SourceState) -> Self {
        let mut source = Self::new(Some(state.seed));
        source.rng.set_word_pos(state.word_pos);
        source
    }
}

impl RandomSource for ChaChaSource {
    fn next_unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    fn state(&self) -> Option<SourceState> {
        Some(SourceState {
            seed: self.seed,
            word_pos: self.rng.get_word_pos(),
        })
    }

    fn resume(&mut self, state: &SourceState) {
        *self = Self::from_state(state);
    }
}

/// Replays a fixed list of draws, cycling when exhausted.
///
/// Reseeding is recorded but does not change the script. The state is the
/// number of draws consumed; resuming skips that far into the script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    draws: VecDeque<f64>,
    consumed: usize,
    reseeds: Vec<u64>,
}

impl ScriptedSource {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Number of draws taken so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Seeds passed to [`RandomSource::reseed`], in order.
    pub fn reseeds(&self) -> &[u64] {
        &self.reseeds
    }
}

impl RandomSource for ScriptedSource {
    fn next_unit(&mut self) -> f64 {
        self.consumed += 1;
        match self.draws.pop_front() {
            Some(u) => {
                self.draws.push_back(u);
                u
            }
            None => 0.0,
        }
    }

    fn reseed(&mut self, seed: u64) {
        self.reseeds.push(seed);
    }

    fn state(&self) -> Option<SourceState> {
        Some(SourceState {
            seed: self.reseeds.last().copied().unwrap_or(0),
            word_pos: self.consumed as u128,
        })
    }

    fn resume(&mut self, state: &SourceState) {
        let skip = usize::try_from(state.word_pos).unwrap_or(usize::MAX);
        while self.consumed < skip && !self.draws.is_empty() {
            self.next_unit();
        }
        self.consumed = self.consumed.max(skip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_from_id_is_stable_and_distinct() {
        let a = seed_from_id(&"P-001".into());
        assert_eq!(a, seed_from_id(&"P-001".into()));
        assert_ne!(a, seed_from_id(&"P-002".into()));
    }

    #[test]
    fn test_chacha_reseed_restarts_sequence() {
        let mut source = ChaChaSource::new(Some(7));
        let first: Vec<f64> = (0..4).map(|_| source.next_unit()).collect();
        source.reseed(7);
        let again: Vec<f64> = (0..4).map(|_| source.next_unit()).collect();
        assert_eq!(first, again);
        assert!(first.iter().all(|u| (0.0..1.0).contains(u)));
    }

    #[test]
    fn test_chacha_resumes_mid_sequence() {
        let mut source = ChaChaSource::new(Some(11));
        source.reseed(99);
        for _ in 0..37 {
            source.next_unit();
        }
        let state = source.state().unwrap();
        assert_eq!(state.seed, 99);

        let mut resumed = ChaChaSource::from_state(&state);
        let expected: Vec<f64> = (0..50).map(|_| source.next_unit()).collect();
        let actual: Vec<f64> = (0..50).map(|_| resumed.next_unit()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_source_state_survives_json() {
        let mut source = ChaChaSource::new(None);
        source.next_unit();
        let state = source.state().unwrap();
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(serde_json::from_str::<SourceState>(&json).unwrap(), state);
    }

    #[test]
    fn test_scripted_source_cycles() {
        let mut source = ScriptedSource::new([0.1, 0.9]);
        assert_eq!(source.coin_flip(), Arm::A);
        assert_eq!(source.coin_flip(), Arm::B);
        assert_eq!(source.coin_flip(), Arm::A);
        assert_eq!(source.consumed(), 3);
    }

    #[test]
    fn test_fair_coin_is_roughly_even() {
        let mut source = ChaChaSource::new(Some(2024));
        let a = (0..10_000).filter(|_| source.coin_flip() == Arm::A).count();
        let p_a = a as f64 / 10_000.0;
        assert!((0.47..=0.53).contains(&p_a), "p_a={p_a}");
    }
}
