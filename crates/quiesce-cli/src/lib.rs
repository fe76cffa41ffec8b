//! quiesce-cli
//!
//! HTTP surface of the detector: the axum router (`api`), a reqwest client
//! for it (`client`) and the clap argument types of the `quiesce` binary (`cli`).

pub mod api;
pub mod cli;
pub mod client;
