pub mod commands;
pub mod config;
pub mod output;

pub use commands::{build_resolver, cache_key, relay_urls, resolve_all, run_resolve};
pub use config::CliConfig;
pub use output::{render_reports, to_json, ResolveReport, Source};
