pub mod app;
pub mod archive;
pub mod config;
pub mod domain;
pub mod enumerate;
pub mod error;
pub mod exists;
pub mod orchestrator;
pub mod output;
pub mod report;
pub mod size;
pub mod stats;
pub mod xnat;
