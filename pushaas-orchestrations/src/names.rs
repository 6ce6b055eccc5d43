//! Name constants for pushaas resources and jobs
//!
//! Per-tenant cloud resources are named `{tier-prefix}-{instance-name}`.
//! Job kinds follow `{crate}::job::{name}`.

/// Tier prefixes, shared with the form validation in `pushaas-models`
pub mod tiers {
    pub const PUSH_REDIS: &str = "push-redis";
    pub const PUSH_STREAM: &str = "push-stream";
    pub const PUSH_API: &str = "push-api";

    /// Sidecar in the stream task, not a tier of its own
    pub const PUSH_AGENT: &str = "push-agent";
}

/// Job kind names
pub mod jobs {
    /// Run a full provision for one instance
    ///
    /// **Payload:** [`crate::types::ProvisionJob`]
    pub const PROVISION: &str = "pushaas::job::provision";

    /// Tear down every tier of one instance
    ///
    /// **Payload:** [`crate::types::DeprovisionJob`]
    pub const DEPROVISION: &str = "pushaas::job::deprovision";

    /// Apply a provision outcome to the stored instance
    ///
    /// **Payload:** [`crate::types::ProvisionOutcome`]
    pub const UPDATE_INSTANCE: &str = "pushaas::job::update-instance";
}

/// Execution role used when none is configured
pub const DEFAULT_EXECUTION_ROLE: &str = "ecsTaskExecutionRole";

/// Deterministic resource name for one tier of one instance
pub fn stage_name(tier_prefix: &str, instance_name: &str) -> String {
    format!("{}-{}", tier_prefix, instance_name)
}
