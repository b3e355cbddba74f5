//! # IFC Knowledge
//!
//! A semantic knowledge retrieval engine for IFC authoring tools.
//!
//! IFC Knowledge turns a structured corpus of API documentation (modules,
//! functions, workflows) into an embedded vector index and answers
//! natural-language queries about it: "which function creates a wall",
//! "what does the material module contain", "show me the signature of
//! create_entity". It is designed to sit behind an AI tool surface, so
//! every operation returns a serializable envelope and the whole engine is
//! safe to share across concurrent tasks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Corpus  │──▶│  Embedding   │──▶│ KnowledgeStore │
//! │  (JSON)  │   │ local/remote │   │ index + JSON   │
//! └──────────┘   └──────────────┘   └───────┬───────┘
//!                                           │
//!                  ┌────────────────────────┤
//!                  ▼                        ▼
//!            ┌───────────┐           ┌───────────┐
//!            │ Retriever │           │  Lookups  │
//!            └─────┬─────┘           └─────┬─────┘
//!                  └──────────┬────────────┘
//!                             ▼
//!                   ┌──────────────────┐
//!                   │ KnowledgeService │
//!                   │ cache + init     │
//!                   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use ifc_knowledge::config::Config;
//! use ifc_knowledge::corpus::Corpus;
//! use ifc_knowledge::service::KnowledgeService;
//! use std::time::Duration;
//!
//! # async fn run() -> ifc_knowledge::error::Result<()> {
//! let corpus = Corpus::from_json_file("knowledge.json".as_ref())?;
//! let service = KnowledgeService::new(Config::default(), corpus)?;
//! service.ensure_ready(false, Duration::from_secs(60)).await?;
//!
//! let hits = service.search("create a wall", Some("function"), None, Some(5)).await?;
//! println!("{}", serde_json::to_string_pretty(&hits)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types and result envelopes |
//! | [`corpus`] | Corpus descriptors and document rendering |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector index build, persist, load |
//! | [`retriever`] | Similarity search |
//! | [`cache`] | Generation-counted result caches |
//! | [`controller`] | Single-flight initialization |
//! | [`service`] | Tool-facing facade |

pub mod cache;
pub mod config;
pub mod controller;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod models;
pub mod retriever;
pub mod service;
pub mod store;

pub use error::{KnowledgeError, Result};
pub use service::KnowledgeService;
