//! Serializable strategy choice
//!
//! [`SelectionConfig`] is the run-configuration form of a policy; `build`
//! validates the parameters and returns a trait object.

use crate::error::SelectionError;
use crate::exploration::{ExplorationBalanced, DEFAULT_P_EXPLORE};
use crate::policy::SelectionPolicy;
use crate::random::RandomSelection;
use crate::score_proportional::{ScoreProportional, DEFAULT_FLOOR};
use serde::{Deserialize, Serialize};

fn default_floor() -> f64 {
    DEFAULT_FLOOR
}

fn default_p_explore() -> f64 {
    DEFAULT_P_EXPLORE
}

/// Selection strategy and its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SelectionConfig {
    /// Uniform with replacement
    Random,
    /// Proportional to final score
    ScoreProportional {
        /// Minimum sampling weight
        #[serde(default = "default_floor")]
        floor: f64,
    },
    /// Least-explored with probability `p_explore`, else score-proportional
    ExplorationBalanced {
        /// Exploration probability
        #[serde(default = "default_p_explore")]
        p_explore: f64,
        /// Minimum sampling weight
        #[serde(default = "default_floor")]
        floor: f64,
    },
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self::ExplorationBalanced {
            p_explore: DEFAULT_P_EXPLORE,
            floor: DEFAULT_FLOOR,
        }
    }
}

impl SelectionConfig {
    /// Strategy name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::ScoreProportional { .. } => "score_proportional",
            Self::ExplorationBalanced { .. } => "exploration_balanced",
        }
    }

    /// Check parameters without building
    ///
    /// # Errors
    /// Same as [`SelectionConfig::build`].
    pub fn validate(&self) -> Result<(), SelectionError> {
        self.build().map(|_| ())
    }

    /// Instantiate the policy
    ///
    /// # Errors
    /// `InvalidParameter` for an out-of-range floor or probability.
    pub fn build(&self) -> Result<Box<dyn SelectionPolicy>, SelectionError> {
        Ok(match *self {
            Self::Random => Box::new(RandomSelection::new()),
            Self::ScoreProportional { floor } => Box::new(ScoreProportional::new(floor)?),
            Self::ExplorationBalanced { p_explore, floor } => {
                Box::new(ExplorationBalanced::new(p_explore, floor)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_matches_name() {
        for config in [
            SelectionConfig::Random,
            SelectionConfig::ScoreProportional { floor: 0.05 },
            SelectionConfig::default(),
        ] {
            assert_eq!(config.build().unwrap().name(), config.name());
        }
    }

    #[test]
    fn invalid_floor_rejected() {
        let config = SelectionConfig::ScoreProportional { floor: 0.0 };
        assert!(matches!(
            config.validate(),
            Err(SelectionError::InvalidParameter { name: "floor", .. })
        ));
    }

    #[test]
    fn deserializes_tagged_with_defaults() {
        let config: SelectionConfig =
            serde_json::from_str(r#"{"strategy":"exploration_balanced","p_explore":0.5}"#).unwrap();
        assert_eq!(
            config,
            SelectionConfig::ExplorationBalanced {
                p_explore: 0.5,
                floor: DEFAULT_FLOOR
            }
        );

        let config: SelectionConfig = toml::from_str("strategy = \"random\"").unwrap();
        assert_eq!(config, SelectionConfig::Random);
    }
}
