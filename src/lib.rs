pub mod agent;
pub mod cluster;
pub mod component;
pub mod config;
pub mod engine;
pub mod errors;
pub mod llm;
pub mod schedule;
pub mod tree;
pub mod ui;
pub mod util;

pub use component::{Component, ComponentKind, ComponentMap, ComponentsFile, LeafSet};
pub use config::Config;
pub use engine::{Engine, RunSummary};
pub use errors::{EngineError, LlmError};
