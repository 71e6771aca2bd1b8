//! Security
//!
//! Command and URL policies plus the import approval / immutable cache flow.

pub mod approval;
pub mod command_policy;
pub mod url_policy;

pub use approval::{content_hash, ApprovalOps, AutoApprove, ImmutableCache, ImportApproval};
pub use command_policy::CommandPolicy;
pub use url_policy::{rewrite_gist_url, UrlPolicy};
