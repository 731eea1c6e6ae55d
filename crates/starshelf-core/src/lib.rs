//! # starshelf core
//!
//! Shared, runtime-agnostic logic for starshelf: the item model, text
//! normalization, the lexical and vector index engines, the store and
//! external-client traits, and the hybrid retrieval engine.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Everything that talks to the outside world is reached through a trait
//! so the application crate (and tests) can inject their own
//! implementations.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `Item`, `IndexJob`, `Setting` |
//! | [`text`] | Normalization, tokenization, overlap |
//! | [`lexical`] | Field-boosted inverted index with three match modes |
//! | [`vector`] | Exact nearest-neighbour index with versioned snapshots |
//! | [`index`] | Request/response index backend and in-process implementation |
//! | [`store`] | `ItemStore` trait and in-memory store |
//! | [`clients`] | Source-metadata and AI client contracts |
//! | [`retrieval`] | Multi-stage hybrid ranking |
//! | [`error`] | Classified error kinds |

pub mod clients;
pub mod error;
pub mod index;
pub mod lexical;
pub mod models;
pub mod retrieval;
pub mod store;
pub mod text;
pub mod vector;
