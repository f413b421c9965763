//! Conversational blockchain agent with delegated transaction signing.
//!
//! ## Bootstrap
//!
//! Provider selection comes from the environment:
//!
//! - `MEME_AGENT_PROVIDER=mock` (default) for deterministic offline runs
//! - `MEME_AGENT_PROVIDER=openai` for an OpenAI-compatible chat-completions endpoint
//!
//! `MEME_AGENT_CONFIG_PATH` may name a UTF-8 JSON file with this shape; every
//! section is optional and unknown fields are rejected:
//!
//! ```json
//! {
//!   "openai": { "api_key": "sk-...", "models": ["gpt-4o-mini"], "timeout_sec": 120 },
//!   "chain": {
//!     "rpc_url": "https://sepolia.base.org",
//!     "chain_id": 84532,
//!     "liquidity_factory_address": "0x..."
//!   },
//!   "delegation": { "grant_ttl_hours": 1, "broadcast_attempts": 3 },
//!   "agent": { "max_tool_rounds": 10 }
//! }
//! ```
//!
//! `MEME_AGENT_WALLET_KEY` holds the base wallet key. Without it the agent
//! still chats, and chain tools answer that chain access is not configured.
//! `MEME_AGENT_SPONSOR_KEY` optionally funds delegated identities from a
//! separate key. Threads persist under `MEME_AGENT_THREAD_DIR`
//! (default `.meme_agent/threads`).
//!
//! ## Execution model
//!
//! [`agent::Agent`] drives one turn at a time per thread over an append-only
//! [`thread_store::ThreadStore`]. Tool calls dispatch through the
//! [`registry::ToolRegistry`]; chain writes go through the delegated pipeline
//! in `delegated_signer`, so the base wallet only signs session challenges.

pub mod agent;
pub mod bootstrap;
pub mod chain;
pub mod commands;
pub mod config;
pub mod contracts;
pub mod logging;
pub mod prompt;
pub mod providers;
pub mod registry;
pub mod runtime;
pub mod schema;
pub mod tools;

pub use agent::{Agent, AgentConfig, LoopState, TurnError, TurnOutcome, TurnUpdate};
pub use registry::{ToolContext, ToolEffect, ToolError, ToolExecutor, ToolRegistry, ToolSpec};
pub use runtime::{RuntimeController, TurnHandle};
