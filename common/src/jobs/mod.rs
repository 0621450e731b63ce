// Asynchronous job tracking

pub mod registry;
pub mod runner;

pub use registry::JobRegistry;
pub use runner::JobRunner;
