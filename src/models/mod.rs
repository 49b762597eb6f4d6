// src/models/mod.rs
pub mod api;
pub mod highlight;
pub mod run;

pub use api::*;
pub use highlight::{HighlightRecord, HighlightUpdate};
pub use run::{ExecutionRecord, NewExecution, Stage};
