//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! - LOG_LEVEL controls the filter, e.g. "debug" or directives like
//!   "info,pipeline=debug,session=debug,store=info".
//! - LOG_FORMAT selects "pretty" (default) or "json".
//!
//! Targets used across the crate: `edurealm` (server and transport), `pipeline`
//! (workshop generation), `session` (gameplay and tutoring), `gemini` (provider
//! calls and retries), `store` (database).

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info,pipeline=debug,session=debug,gemini=debug,edurealm=debug,tower_http=info,axum=info";

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    // The two builders have different types, so init inside each arm.
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => {
            builder.json().init();
        }
        _ => {
            builder.init();
        }
    }
}
