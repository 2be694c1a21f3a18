//! Model ensemble for mutation proposals.
//!
//! One model is sampled per generation step from a static weighted list;
//! there is no fan-out and no hidden state between calls.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`backend`] | [`ModelBackend`] capability trait, wire types, deterministic fakes |
//! | [`client`] | OpenAI-compatible chat-completions HTTP backend |
//! | [`ensemble`] | [`ModelEnsemble`]: weighted sampling over configured models |
//! | [`prompt`] | Mutation prompt assembly from parent and inspiration programs |

pub mod backend;
pub mod client;
pub mod ensemble;
pub mod prompt;

pub use backend::{BackendError, FailingBackend, Message, ModelBackend, Role, ScriptedBackend};
pub use client::{ConnectionConfig, HttpBackend};
pub use ensemble::{EnsembleEntry, EnsembleError, ModelEnsemble};
pub use prompt::{MutationMode, PromptBuilder};
