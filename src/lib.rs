//! # Dossier
//!
//! A staged research agent over a local retrieval index.
//!
//! Dossier answers open questions by running a fixed pipeline — plan, search,
//! read, verify, reflect, brief — against an in-memory embedding index that
//! is fed both by a watched ingest directory and by a web-scrape fallback.
//! Every external capability (generation, embedding, search, page fetching)
//! degrades gracefully, so a run always produces a brief even fully offline.
//!
//! ```text
//! ┌────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ watch dir  │──▶│                  │◀──│ scrape        │
//! └────────────┘   │  RetrievalIndex  │   │ fallback      │
//!                  │  (embeddings)    │   └───────────────┘
//!                  └────────┬─────────┘
//!                           │
//!      plan → search → read → verify → reflect → brief
//!                           │
//!                  ┌────────┴─────────┐
//!                  │   CLI  /  HTTP   │
//!                  └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`embedding`] | Embedding providers with pseudo-embedding fallback |
//! | [`index`] | Concurrent in-memory retrieval index |
//! | [`ingest`] | Directory-watching ingestion |
//! | [`extract`] | HTML text/media extraction |
//! | [`scrape`] | Search-engine scraping and page fetching |
//! | [`search`] | Source-discovery stage |
//! | [`read`] | Document-reading stage |
//! | [`generation`] | Text generation with heuristic fallback |
//! | [`verify`] | Credibility assessment stage |
//! | [`reflect`] | Adaptive-round decision stage |
//! | [`brief`] | Final brief compilation |
//! | [`pipeline`] | Stage orchestration |
//! | [`server`] | HTTP API |

pub mod brief;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod read;
pub mod reflect;
pub mod scrape;
pub mod search;
pub mod server;
pub mod verify;
