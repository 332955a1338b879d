pub mod chunk_runner;
pub mod client_runner;
pub mod config;
pub mod lead_processor;
pub mod rubric_builder;
pub mod rubric_loader;
pub mod run_identity;
pub mod selector;

pub use chunk_runner::{run_chunks, ChunkRunnerOptions};
pub use client_runner::{run_client, status_label, ClientRunContext};
pub use config::{RunConfig, MAX_OUTPUT_TOKENS};
pub use lead_processor::{LeadOutcome, LeadProcessor};
pub use rubric_builder::build_system_prompt;
pub use rubric_loader::load_rubric_inputs;
pub use run_identity::{MalformedIdentifier, RunIdentityService};
pub use selector::{select_candidates, SelectorOptions, LEADS_VIEW};
