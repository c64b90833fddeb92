//! # nerf-prep
//!
//! Config-driven data preparation for radiance-field training.
//!
//! `nerf-prep` reads a small config describing how a capture should be
//! processed, then runs two third-party tools in sequence: a
//! Structure-from-Motion pose estimator (COLMAP, or GLOMAP for mapping) and
//! the nerfstudio dataset converter (`ns-process-data`), which picks up the
//! sparse model the first tool produced.
//!
//! ## Pipeline
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌─────────────────┐
//! │ prep config │──▶│ SfM: extract/match/map   │──▶│ ns-process-data │
//! │ TOML / YAML │   │ colmap (+ glomap mapper) │   │  (dataset out)  │
//! └─────────────┘   └──────────────────────────┘   └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Config parsing and validation |
//! | [`commands`] | Argument vectors for each external tool |
//! | [`pipeline`] | Step planning and sequential execution |
//! | [`runner`] | Blocking subprocess execution |
//! | [`progress`] | Step progress on stderr |
//! | [`prompt`] | Per-step confirmation |
//! | [`vocab_tree`] | Vocabulary tree resolution and download |

pub mod commands;
pub mod config;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod runner;
pub mod vocab_tree;
