//! Configuration models for minimiser.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for minimiser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Allocation options
    #[serde(default)]
    pub trial: TrialConfig,

    /// Stratification variables, in declaration order
    pub variables: Vec<VariableSpec>,

    /// Synthetic participant generation
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Allocation options.
///
/// I^R resolved: randomisation strength and reproducibility are explicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Display labels for arm A and arm B
    #[serde(default = "default_arms")]
    pub arms: [String; 2],

    /// Probability that a participant skips minimisation and is assigned
    /// by a fair coin (0 = pure minimisation, 1 = pure random)
    #[serde(default = "default_true_randomization_probability")]
    pub true_randomization_probability: f64,

    /// Seed the random source from the first participant's id
    #[serde(default = "default_true")]
    pub seed_first_with_id: bool,

    /// Seed for the random source (entropy when absent)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_arms() -> [String; 2] {
    ["A".to_string(), "B".to_string()]
}

fn default_true_randomization_probability() -> f64 {
    0.20
}

fn default_true() -> bool {
    true
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            arms: default_arms(),
            true_randomization_probability: default_true_randomization_probability(),
            seed_first_with_id: default_true(),
            seed: None,
        }
    }
}

impl TrialConfig {
    /// Default options with the given true-randomization probability.
    pub fn with_probability(p: f64) -> Self {
        Self {
            true_randomization_probability: p,
            ..Default::default()
        }
    }

    /// Check option ranges and arm labels.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = self.true_randomization_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::InvalidProbability(p));
        }

        let [a, b] = &self.arms;
        if a.trim().is_empty() || b.trim().is_empty() {
            return Err(ConfigError::EmptyArmLabel);
        }
        if a == b {
            return Err(ConfigError::DuplicateArmLabel(a.clone()));
        }
        Ok(())
    }
}

/// One stratification variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Variable name (e.g. "sex")
    pub name: String,

    /// Allowed category labels, in display order
    pub categories: Vec<String>,

    /// Relative frequency of each category, used only by simulation.
    /// Empty means uniform.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prevalence: Vec<u32>,
}

/// Simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of synthetic participants
    #[serde(default = "default_participants")]
    pub participants: usize,

    /// Seed for drawing synthetic characteristics
    #[serde(default = "default_simulation_seed")]
    pub seed: u64,
}

fn default_participants() -> usize {
    160
}

fn default_simulation_seed() -> u64 {
    42
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            participants: default_participants(),
            seed: default_simulation_seed(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source: e,
        })
    }

    /// Validate options and simulation prevalences.
    ///
    /// Schema shape (category counts, duplicates) is checked when the
    /// schema is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.trial.validate()?;

        for var in &self.variables {
            if var.prevalence.is_empty() {
                continue;
            }
            if var.prevalence.len() != var.categories.len() {
                return Err(ConfigError::PrevalenceMismatch {
                    variable: var.name.clone(),
                    expected: var.categories.len(),
                    found: var.prevalence.len(),
                });
            }
            if var.prevalence.iter().all(|&w| w == 0) {
                return Err(ConfigError::ZeroPrevalence(var.name.clone()));
            }
        }
        Ok(())
    }

    /// Names of all configured variables.
    pub fn variable_names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
/// - K_i violated: Option out of range
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("true_randomization_probability must be in [0, 1], got {0}")]
    InvalidProbability(f64),

    #[error("Arm labels must not be empty")]
    EmptyArmLabel,

    #[error("Both arms are labelled '{0}'")]
    DuplicateArmLabel(String),

    #[error("Variable '{variable}' has {expected} categories but {found} prevalence weights")]
    PrevalenceMismatch {
        variable: String,
        expected: usize,
        found: usize,
    },

    #[error("Variable '{0}' has all-zero prevalence weights")]
    ZeroPrevalence(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
[trial]
arms = ["Treatment", "Control"]
true_randomization_probability = 0.1

[[variables]]
name = "sex"
categories = ["male", "female"]
prevalence = [3, 2]

[[variables]]
name = "smoker"
categories = ["no", "yes"]
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = Config::from_toml(EXAMPLE).unwrap();
        assert_eq!(config.trial.arms, ["Treatment".to_string(), "Control".to_string()]);
        assert!((config.trial.true_randomization_probability - 0.1).abs() < 1e-12);
        assert!(config.trial.seed_first_with_id);
        assert_eq!(config.trial.seed, None);
        assert_eq!(config.variable_names(), vec!["sex", "smoker"]);
        assert!(config.variables[1].prevalence.is_empty());
        assert_eq!(config.simulation.participants, 160);
        config.validate().unwrap();
    }

    #[test]
    fn test_default_trial_options() {
        let trial = TrialConfig::default();
        assert!((trial.true_randomization_probability - 0.20).abs() < 1e-12);
        assert!(trial.seed_first_with_id);
        assert_eq!(trial.arms, ["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_rejects_out_of_range_probability() {
        for p in [-0.1, 1.5, f64::NAN] {
            let trial = TrialConfig::with_probability(p);
            assert!(matches!(trial.validate(), Err(ConfigError::InvalidProbability(_))));
        }
        TrialConfig::with_probability(0.0).validate().unwrap();
        TrialConfig::with_probability(1.0).validate().unwrap();
    }

    #[test]
    fn test_rejects_duplicate_arm_labels() {
        let trial = TrialConfig {
            arms: ["X".into(), "X".into()],
            ..Default::default()
        };
        assert!(matches!(trial.validate(), Err(ConfigError::DuplicateArmLabel(_))));
    }

    #[test]
    fn test_rejects_prevalence_mismatch() {
        let mut config = Config::from_toml(EXAMPLE).unwrap();
        config.variables[0].prevalence = vec![1, 2, 3];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PrevalenceMismatch { expected: 2, found: 3, .. })
        ));

        config.variables[0].prevalence = vec![0, 0];
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPrevalence(_))));
    }
}
