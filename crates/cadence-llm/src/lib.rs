//! `cadence-llm` — the narrow language-model interface.
//!
//! Everything the core asks of an LLM goes through [`LanguageModel`]:
//! message/transcript analysis, content mutation, sequence drafting. The
//! Anthropic provider is the primary path; the deterministic keyword
//! classifier is the required fallback and produces the same shapes at
//! confidence 0.5 with conservative defaults. [`ResilientModel`] composes
//! the two so callers cannot tell which path answered.

pub mod anthropic;
pub mod error;
pub mod fallback;
pub mod interface;
pub mod resilient;
pub mod types;

pub use anthropic::AnthropicModel;
pub use error::{LlmError, Result};
pub use fallback::KeywordModel;
pub use interface::LanguageModel;
pub use resilient::ResilientModel;
pub use types::{
    MessageAnalysisRequest, MutationDraft, MutationRequest, SequenceDraft, SequenceDraftRequest,
    TranscriptAnalysisRequest,
};
