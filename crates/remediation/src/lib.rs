//! Automated code remediation: syntax-tree patching of Java sources plus the
//! branch, commit, test, review and pull-request workflow around it.

pub mod collaborators;
pub mod engine;
pub mod java;
pub mod lock;
pub mod review;
pub mod strategies;

pub use collaborators::{
    CommandTestRunner, DisabledPullRequestHost, GitCliGateway, GitHubPullRequestHost,
    PullRequestHost, TestReport, TestRunner, VersionControlGateway,
};
pub use engine::{RemediationEngine, RemediationOutcome};
pub use review::{FixReview, ReviewBoard, ReviewStatistics, ReviewStatus};
pub use strategies::{PatchStrategy, StrategyRegistry};
