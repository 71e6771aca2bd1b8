//! Capability Services
//!
//! Trait seams and default implementations for the evaluator's external
//! collaborators.

pub mod fs;
pub mod path;
pub mod resolver;
pub mod streaming;
pub mod types;

pub use fs::{dirname, join, normalize, MemoryFs, RealFs};
pub use path::{is_url, PathService};
pub use resolver::ResolverManager;
pub use streaming::{NdjsonAdapter, StreamAdapter, StreamingManager};
pub use types::{
    ContentType, Decision, DeniedFetch, FetchOps, FetchedContent, FilesystemOps, HookOps,
    NoopHooks, ResolvedModule, ResolvedPath, ResolverOps,
};
