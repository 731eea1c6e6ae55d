//! # starshelf
//!
//! A local-first search engine for your starred GitHub repositories.
//!
//! Starred repositories are synced into SQLite, enriched with a readme
//! excerpt, an AI summary, tags and an embedding, and searched with a
//! two-stage hybrid ranker (lexical + vector candidates, feature scoring,
//! optional AI rewrite and re-rank). The ranking core lives in the
//! `starshelf-core` crate; this crate supplies storage, the external
//! clients, the index worker and the CLI/HTTP surfaces.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐ sync ┌──────────┐ enrich ┌──────────────┐
//! │  GitHub  │─────▶│  SQLite  │◀──────▶│  AI provider │
//! └──────────┘      └────┬─────┘        └──────────────┘
//!                        │ load / upsert
//!                        ▼
//!                 ┌──────────────┐  correlation ids  ┌───────────┐
//!                 │ index worker │◀─────────────────▶│ retrieval │
//!                 └──────────────┘                   └─────┬─────┘
//!                                               ┌──────────┴───┐
//!                                               ▼              ▼
//!                                          ┌─────────┐   ┌──────────┐
//!                                          │   CLI   │   │   HTTP   │
//!                                          │ (shelf) │   │  (axum)  │
//!                                          └─────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | `ItemStore` over SQLite |
//! | [`http`] | Shared reqwest client and retry policy |
//! | [`github`] | Bookmark source client |
//! | [`ai`] | OpenAI-compatible AI client |
//! | [`worker`] | Index worker thread |
//! | [`sync`] | Bookmark sync |
//! | [`enrich`] | Resumable enrichment pipeline |
//! | [`backup`] | Export/import bundles |
//! | [`progress`] | Enrichment progress reporting |
//! | [`context`] | Application wiring |
//! | [`server`] | HTTP API |

pub mod ai;
pub mod backup;
pub mod config;
pub mod context;
pub mod db;
pub mod enrich;
pub mod github;
pub mod http;
pub mod migrate;
pub mod progress;
pub mod server;
pub mod sqlite_store;
pub mod sync;
pub mod worker;
