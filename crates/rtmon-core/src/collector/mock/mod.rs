//! Mock filesystem and fixtures for exercising metric sources.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
