//! Domain data types.

pub mod answer;
pub mod checkpoint;
pub mod config;
pub mod dlq;
pub mod firm;
pub mod page;
pub mod question;
pub mod run;

pub use answer::{merge_answer, merge_answers, Answer, AnswerSet};
pub use checkpoint::Checkpoint;
pub use config::{ExtractorConfig, MonitorConfig};
pub use dlq::{DeadLetterEntry, DlqFilter, ErrorType};
pub use firm::{Firm, FirmSource};
pub use page::{
    sanitize_bytes, sanitize_text, ClassifiedPage, CrawledPage, FirmDocs, PageType,
};
pub use question::{
    default_catalog, OutputFormat, Question, QuestionCatalog, Tier, CATEGORY_BLOG_INTELLIGENCE,
};
pub use run::{
    Company, FirmRun, FirmRunStats, ResultAnswer, Run, RunError, RunFilter, RunPhase, RunResult,
    RunStatus,
};
