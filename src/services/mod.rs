pub mod browser_evaluator;
pub mod evaluator;
pub mod llm_service;
pub mod narrator;
pub mod rating;

pub use browser_evaluator::BrowserEvaluator;
pub use evaluator::{EvaluationRequest, Evaluator};
pub use llm_service::{LlmError, LlmService};
pub use narrator::{ComparisonNarrator, LlmNarrator, NarrationInput, NarrationRequest};
pub use rating::{JsonBlockExtractor, RatingExtractor};
