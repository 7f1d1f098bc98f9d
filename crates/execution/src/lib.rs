//! Execution layer - option compilation, template caching, query instances,
//! the tick scheduler and the request façade.

#![warn(missing_docs)]

pub mod ordering;
pub mod compiler;
pub mod cache;
pub mod instance;
pub mod registry;
pub mod engine;
pub mod scheduler;
pub mod cancel;
pub mod config;

#[cfg(test)]
mod testing;

pub use ordering::TestOrdering;
pub use compiler::{compile_template, CompiledOption, InstanceTemplate};
pub use cache::{CacheStats, CachedTemplate, TemplateCache};
pub use instance::QueryInstance;
pub use registry::ExternalQueryRegistry;
pub use engine::{PreparedQuery, QueryEngine, QueryRequestExt};
pub use scheduler::TickReport;
pub use config::{ConfigError, EngineConfig};
