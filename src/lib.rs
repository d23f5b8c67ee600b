//! sidewinder - an embeddable JavaScript runtime with Node-style CommonJS
//!
//! sidewinder wraps the Boa engine in a [`Runtime`] that can:
//! - evaluate scripts and call guest functions with host [`Value`]s
//! - `require()` CommonJS modules, JSON files and packages from `node_modules`
//! - expose read-only `fs`, `path`, `vm` and `process` shims to guest code

pub mod cli;
pub mod fs;
pub mod resolver;
pub mod runtime;
pub mod value;

// Re-export commonly used types
pub use resolver::{ModuleResolver, ResolutionMode, ResolverConfig};
pub use runtime::{
    ErrorKind, EvaluationError, LoadLimits, ModuleInfo, ModuleState, Runtime, RuntimeConfig,
    RuntimeError, RuntimeResult,
};
pub use value::Value;
