//! # diary-rag
//!
//! Sync diary entries from Google Drive (or a local directory) into a
//! vector index and answer questions about them with a hosted chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   ┌──────────────┐   ┌───────────────────┐
//! │ DocumentSource │──▶│ SyncOrchestr.│──▶│ VectorIndexClient │
//! │  Drive / local │   │ window+fetch │   │  embed + upsert   │
//! └───────┬────────┘   └──────────────┘   └─────────┬─────────┘
//!         │                                         │
//!         ▼                                         ▼
//!  ┌──────────────┐                        ┌──────────────────┐
//!  │TextNormalizer│                        │ Azure AI Search  │
//!  │ docx → text  │                        │ (IndexBackend)   │
//!  └──────────────┘                        └────────┬─────────┘
//!                                                   ▼
//!                                            ┌────────────┐
//!                                            │ ChatSession│
//!                                            │  (Gemini)  │
//!                                            └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! diary sync --days 1          # upload entries changed in the last day
//! diary upload ./diaries       # bulk upload a local directory
//! diary search "trip to Kyoto"
//! diary chat "When did the server last break?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment credentials |
//! | [`error`] | Pipeline error taxonomy |
//! | [`models`] | Core data types |
//! | [`source`] | Drive and local document sources |
//! | [`normalize`] | `.docx` to plain text |
//! | [`convert`] | Batch `.docx` → `.txt` conversion |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index backends |
//! | [`vector_client`] | Index schema, upload, similarity search |
//! | [`sync`] | Windowed incremental sync |
//! | [`chat`] | Retrieval-augmented chat |
//! | [`retry`] | Exponential backoff |

pub mod chat;
pub mod config;
pub mod convert;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod normalize;
pub mod retry;
pub mod source;
pub mod sync;
pub mod vector_client;

pub use error::PipelineError;
