// src/analysis/mod.rs — Counseling transcript analysis

pub mod engine;
pub mod parser;
pub mod prompts;
pub mod types;

pub use engine::{AnalysisOutput, AnalysisRequest, Analyzer, Draft};
pub use prompts::PromptLibrary;
pub use types::{AnalysisResult, AnalysisType, Category};
