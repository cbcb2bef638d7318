//! # Plugin Gallery
//!
//! Collects monitoring plugin documentation from source repositories and
//! exports it as content for a Hugo static site.
//!
//! Sources (git repositories, release archives, local directories) are
//! fetched into a cached workspace, walked for plugin files, and every
//! plugin's embedded POD header and magic markers are normalized into a
//! [`models::PluginRecord`]. Records from all sources are aggregated into
//! taxonomy indexes and written as one content tree.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐   ┌────────────┐
//! │   Fetchers   │──▶│ Discoverer │──▶│ Header Parser│──▶│ Normalizer │
//! │ git/archive/ │   │  walkdir   │   │  POD + #%#   │   │  records   │
//! │  directory   │   └────────────┘   └──────────────┘   └─────┬──────┘
//! └──────────────┘                                             │
//!                                     ┌──────────────┐         │
//!                                     │  Aggregator  │◀────────┘
//!                                     │  + Exporter  │──▶ Hugo content
//!                                     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! gallery sources                  # show configured sources and cache state
//! gallery build                    # fetch, collect and export
//! gallery build --skip-fetch       # re-export from cached workspaces
//! gallery inspect plugins/cpu      # check a single plugin's header
//! gallery stats                    # summarize the last export
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | Fetcher trait and registry |
//! | [`fetch`] | Source → locked workspace |
//! | [`workspace`] | On-disk workspace cache |
//! | [`connector_git`] | Git fetcher and commit timestamps |
//! | [`connector_archive`] | Tarball / zip fetcher |
//! | [`connector_fs`] | Local directory fetcher |
//! | [`discover`] | Plugin file discovery |
//! | [`header`] | POD block and magic marker parser |
//! | [`pod`] | POD to markdown rendering |
//! | [`normalize`] | Plugin record normalization |
//! | [`license`] | License detection |
//! | [`aggregate`] | Collection and taxonomy indexes |
//! | [`export`] | Hugo content export |
//! | [`pipeline`] | Build orchestration |

pub mod aggregate;
pub mod config;
pub mod connector_archive;
pub mod connector_fs;
pub mod connector_git;
pub mod discover;
pub mod error;
pub mod export;
pub mod fetch;
pub mod graphs;
pub mod header;
pub mod indexing;
pub mod inspect;
pub mod license;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod pod;
pub mod progress;
pub mod retry;
pub mod sources;
pub mod stats;
pub mod traits;
pub mod workspace;
