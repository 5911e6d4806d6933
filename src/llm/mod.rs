//! LLM access: OpenAI-compatible chat client and the ordered provider
//! fallback chain used by the enricher and the batch location resolver.

pub mod chain;
pub mod client;

pub use chain::{ChainProvider, Completion, ProviderChain};
pub use client::{ChatClient, ChatRequest, ChatResponse, Choice, LlmProvider, Message, Usage};
