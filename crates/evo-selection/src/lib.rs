//! Evo Selection - parent selection policies
//!
//! This crate provides the strategies that choose which archived variants
//! seed the next generation of attempts.
//!
//! # Strategies
//!
//! - [`RandomSelection`]: uniform with replacement
//! - [`ScoreProportional`]: weight = final score, floored so zero scorers stay reachable
//! - [`ExplorationBalanced`]: mixes least-explored sampling with score-proportional
//!
//! # Example
//!
//! ```rust,ignore
//! use evo_selection::{SelectionConfig, SelectionPolicy};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let policy = SelectionConfig::default().build()?;
//! let mut rng = StdRng::seed_from_u64(42);
//! let parents = policy.select(&store.candidates(), 4, &mut rng)?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod exploration;
pub mod policy;
pub mod random;
pub mod registry;
pub mod score_proportional;

pub use config::SelectionConfig;
pub use error::SelectionError;
pub use exploration::{ExplorationBalanced, DEFAULT_P_EXPLORE};
pub use policy::SelectionPolicy;
pub use random::RandomSelection;
pub use registry::PolicyRegistry;
pub use score_proportional::{ScoreProportional, DEFAULT_FLOOR};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
