//! Extraction of typed results from generative-backend output
//!
//! Backends answer in whatever shape they like: plain text, chat completions,
//! typed content blocks, inline base64. This crate turns one such response
//! envelope into either parsed JSON or a displayable media reference, without
//! network access or side effects.
//!
//! # Usage
//!
//! ```rust,ignore
//! use extraction::{ExtractionEngine, ExtractionResult, ResultShape};
//!
//! let engine = ExtractionEngine::new();
//! match engine.extract(ResultShape::Structured, &envelope) {
//!     ExtractionResult::Json(value) => store(value),
//!     ExtractionResult::Unresolved(text) => fall_back(text),
//!     ExtractionResult::Media(_) => unreachable!(),
//! }
//! ```
//!
//! # Modules
//!
//! - [`structured`] - JSON recovery from prose, fences and damaged encodings
//! - [`media`] - image URL / data URI / bare base64 detection
//! - [`text`] - free-text views over arbitrary response JSON
//! - [`engine`] - shape-driven dispatch

pub mod engine;
pub mod media;
pub mod result;
pub mod structured;
pub mod text;

pub use engine::ExtractionEngine;
pub use media::extract_media;
pub use result::{ExtractionResult, ResultShape};
pub use structured::{balanced_span, extract_structured, normalize, strip_trailing_commas};
pub use text::{free_text, snippet};
