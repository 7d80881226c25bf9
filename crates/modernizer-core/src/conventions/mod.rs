//! Naming-convention inference.
//!
//! [`tokenizer`] splits and classifies filename words; [`recognizer`] turns
//! recurring token-type signatures into scored [`ConventionPattern`]s.

pub mod recognizer;
pub mod tokenizer;

pub use recognizer::{
    ConventionPattern, PatternId, PatternMatch, Recognition, Recognizer, RecognizerConfig, Slot,
    SlotRole,
};
pub use tokenizer::{Revision, Token, TokenType};
