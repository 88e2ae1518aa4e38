//! # Tundra - Multi-Stage Ecosystem Run Controller
//!
//! The main binary for the tundra stage controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 apps/tundra (THE BINARY)                 │
//! │                                                          │
//! │  ┌────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │    CLI     │   │ RunConfig    │   │ JSON sinks,   │  │
//! │  │  (clap)    │   │ (toml/json)  │   │ status files  │  │
//! │  └─────┬──────┘   └──────┬───────┘   └───────┬───────┘  │
//! │        └─────────────────┼───────────────────┘          │
//! │                          ▼                              │
//! │                  ┌───────────────┐                      │
//! │                  │  tundra-core  │                      │
//! │                  │ (THE LOGIC)   │                      │
//! │                  └───────────────┘                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! tundra plan -f run.toml
//! tundra run -f run.toml --eq-yrs 1000 --sp-yrs 250 --workers 8
//! tundra run -f run.toml --resume
//! tundra inspect --restart output/restart-eq.redb --cell 0,0
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // TUNDRA_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("TUNDRA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "tundra=debug,tundra_core=debug"
    } else {
        "tundra=info,tundra_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    // Exit explicitly: a console reader may still hold a blocking stdin
    // thread that would otherwise keep the runtime alive.
    let code = match cli::execute(cli).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            tracing::error!("Error: {}", e);
            1
        }
    };
    std::process::exit(code);
}

fn print_banner() {
    println!(
        r#"
  tundra v{}
  pre-run > equilibrium > spin-up > transient > scenario
"#,
        env!("CARGO_PKG_VERSION")
    );
}
