pub mod compile;
pub mod config;
pub mod domain;
pub mod enforce;
pub mod feed;
pub mod handlers;
pub mod observability;

pub use compile::{CompileMode, ConstraintCompiler, ConstraintHandlerBundle};
pub use config::PdpConfig;
pub use domain::{Decision, Subscription, Verdict};
pub use enforce::{EnforcementError, EnforcementOptions, PolicyEnforcementPoint};
pub use feed::{PdpClient, PolicyDecisionPoint};
pub use handlers::HandlerRegistry;
