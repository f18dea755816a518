//! Blockchain Analysis Engine
//!
//! Answers natural-language questions about Ergo chain activity:
//! - Fetch wallet, transaction and network data from an explorer or node
//! - Normalize UTXO payloads into decimal-exact records
//! - Trace fund flows across several hops
//! - Assemble a size-bounded context and query Claude or a local Ollama
//!   model, with retry and fallback
//!
//! # Failure Model
//!
//! - Chain failures during a trace only mark the affected branch partial
//! - LLM failures surface once, after retries and fallback
//! - Nothing is persisted; the only shared state is the response cache

pub mod analyzer;
pub mod assets;
pub mod chain;
pub mod config;
pub mod context;
pub mod forensic;
pub mod llm;
pub mod normalize;
pub mod retry;

mod error;

// Re-export commonly used types
pub use analyzer::{AnalysisOutcome, AnalysisRequest, Analyzer, Subject};
pub use assets::AssetRegistry;
pub use chain::{build_client, BlockchainApi, Page};
pub use config::{BackendKind, Config, Credentials};
pub use context::{ContextBuilder, ConversationContext, Role, Turn};
pub use error::{Error, Result};
pub use forensic::{ForensicTracer, TraceOptions, TraceReport, MAX_HOPS};
pub use llm::{LlmDispatcher, LlmRequest, LlmResponse, ProviderKind};
pub use normalize::AssetAmount;
pub use retry::RetryPolicy;
