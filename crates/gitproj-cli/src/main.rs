//! gitproj: inspect a virtualized enlistment.
//!
//! ```bash
//! gitproj -C ~/src/big-repo ls src
//! gitproj -C ~/src/big-repo queue --json
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the default `gitproj=info`.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("gitproj=info".parse()?))
        .init();

    let cli = commands::Cli::parse();
    commands::run(&cli)
}
