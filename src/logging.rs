//! Tracing subscriber setup for the CLI.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! binary's decision. `RUST_LOG` takes precedence over the verbosity flag.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// Map `-v` repetitions onto a default filter directive.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "archidiff=warn",
        1 => "archidiff=info",
        2 => "archidiff=debug",
        _ => "archidiff=trace",
    }
}

pub fn init(verbosity: u8) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(default_directive(0), "archidiff=warn");
        assert_eq!(default_directive(2), "archidiff=debug");
        assert_eq!(default_directive(9), "archidiff=trace");
    }
}
