//! Content filtering: threat keyword and co-occurrence matching.

pub mod keywords;
pub mod matcher;

pub use keywords::{CoocRule, KeywordTable};
pub use matcher::KeywordMatcher;
