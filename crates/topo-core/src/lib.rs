//! topo-core: shared types for the topology synthesizer.
//!
//! - **`params`**: `TopologyParameters` and their invariants
//! - **`config`**: `topology.toml` parsing, layered under CLI flags
//! - **`graph`**: the declarative resource graph and intrinsic references
//! - **`error`**: synthesis error types

pub mod config;
pub mod error;
pub mod graph;
pub mod params;

pub use config::TopologyConfig;
pub use error::{ParameterError, SynthError, SynthResult};
pub use graph::{LogicalId, Output, Resource, ResourceGraph};
pub use params::TopologyParameters;
