mod client;
mod provider;
mod rate_limit;
mod types;


pub use client::{CallCounter, Fetch};
pub use provider::GitHubProvider;
pub use types::{GitHubWorkflowRun, MonitoredWorkflow};

#[cfg(test)]
pub use types::GitHubActor;
