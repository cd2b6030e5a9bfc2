//! topogrid-synth: derives a deployable service topology from a handful
//! of parameters.
//!
//! Every builder takes the typed outputs of the components it depends on
//! plus the graph it declares into; nothing is looked up implicitly.
//!
//! ```text
//! compose_topology(params)
//!   ├── validate params            (fail fast, nothing declared yet)
//!   ├── build_network              → NetworkGraph
//!   ├── build_service(network)     → ServiceGraph
//!   ├── attach_observability(svc)  → ObservabilityGraph
//!   ├── enable_progressive(svc)    → ProgressiveDeployment   (flag-gated)
//!   └── build_trust_boundary       → TrustBoundary
//! ```

pub mod composer;
pub mod iam;
pub mod network;
pub mod observability;
pub mod progressive;
pub mod service;
pub mod trust;

pub use composer::{ComposeOptions, Delivery, Topology, TopologyOutputs, compose_topology, compose_with};
pub use network::{NetworkGraph, NetworkProps, build_network};
pub use observability::{ObservabilityFlags, ObservabilityGraph, attach_observability};
pub use progressive::{ProgressiveDeployment, enable_progressive};
pub use service::{DeploymentController, ServiceGraph, build_service, verify_canary_isolation};
pub use trust::{SubGraph, TrustBoundary, TrustCondition, build_trust_boundary};
