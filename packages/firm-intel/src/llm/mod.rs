//! LLM execution: the batch executor and response parsing.

pub mod executor;
pub mod parse;

pub use executor::{cached_system, BatchConfig, BatchExecutor, BatchItem, BatchOutcome, ParsedAnswer};
pub use parse::{
    outermost_object, parse_envelope, parse_json_lenient, repair_truncated_json,
    strip_markdown_fences, AnswerEnvelope,
};
