//! These models represent the objects passed around by the agent
//!
//! There are several different related formats we need to interact with:
//! - openai chat completion messages/tools, sent from the agent to the LLM
//! - thread state, persisted by the store between suspensions
//! - tool requests, sent from the agent to the registered tools
//! - the data stream protocol, sent from the server to an interface
//!
//! We always immediately convert those data models into the internal structs using
//! to/from helpers. Because of the need for compatibility, the internal models are
//! not an exact match to any of these formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
pub mod thread;
