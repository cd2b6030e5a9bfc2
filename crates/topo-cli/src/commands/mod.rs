pub mod init;
pub mod params;
pub mod scale;
pub mod simulate;
pub mod synth;

use clap::ValueEnum;
use topogrid_rollout::ShiftPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Summary,
}

/// Named traffic-shift policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// 10% every 5 minutes
    Linear,
    /// 10%, then the rest after 5 minutes
    Canary,
    AllAtOnce,
}

impl PolicyArg {
    pub fn shift(self) -> ShiftPolicy {
        match self {
            PolicyArg::Linear => ShiftPolicy::default(),
            PolicyArg::Canary => ShiftPolicy::canary_10_percent_5_minutes(),
            PolicyArg::AllAtOnce => ShiftPolicy::AllAtOnce,
        }
    }
}
