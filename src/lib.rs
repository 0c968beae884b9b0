//! modelchat: a streaming chat client for configurable LLM providers.
//!
//! Models are declared in a YAML/TOML document ([`config`]), credentials
//! are looked up by name ([`credentials`]), and [`factory::create_client`]
//! picks the provider dialect from the endpoint URL. A
//! [`session::ChatSession`] sends the conversation and folds the streamed
//! reply ([`llm::stream`]) into its history as it arrives.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod factory;
pub mod llm;
pub mod logging;
pub mod session;
pub mod types;
