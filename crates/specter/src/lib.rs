//! Specter — streaming local-inference client and response cache.
//!
//! This crate re-exports the Specter sub-crates for single-import usage and
//! provides the [`Specter`] context object: one instance per process, built
//! from [`core::SpecterConfig`], owning the transport backend, model
//! catalog, inference service, and request router.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use specter::{Specter, core::{CancelToken, SpecterConfig}};
//!
//! let specter = Specter::from_env();
//! let cancel = CancelToken::new();
//! let answer = specter.ask_question("what is a borrow?", None, None, &cancel).await?;
//! println!("{}", answer.text);
//! ```

/// Core types: requests, responses, callbacks, configuration, SpecterError.
pub use specter_core as core;

/// Ollama transport client, provider backend abstraction, stream assembler.
pub use specter_ollama as ollama;

/// Bounded TTL response cache and cache-key derivation.
pub use specter_cache as cache;

/// Single-model inference service and model catalog.
pub use specter_service as service;

/// Universal request router, sessions, provider dispatch.
pub use specter_router as router;

mod context;
pub use context::{Specter, SpecterBuilder};
