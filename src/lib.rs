//! # cnclink
//!
//! Terminal front end for GRBL, grblHAL and FluidNC motion controllers.
//!
//! ## Architecture
//!
//! cnclink is organized as a workspace:
//!
//! 1. **cnclink-core** - Machine data model, errors, controller events and listeners
//! 2. **cnclink-communication** - Serial and simulator backends, firmware protocol,
//!    the controller and its streaming engine
//! 3. **cnclink-gcode** - Modal state scanning and the carve line generator
//! 4. **cnclink-settings** - Configuration, unified firmware settings and macros
//! 5. **cnclink** - This binary: command line, console listener and session loop

pub mod cli;
pub mod console;
pub mod session;

pub use cli::Cli;
pub use console::ConsoleListener;
pub use session::{Session, StreamPolicy, Target};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging to stderr
///
/// `RUST_LOG` takes precedence over `verbose`. Stdout stays free for
/// command output.
pub fn init_logging(verbose: bool, json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(default_level.into()));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(verbose);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    tracing::debug!("cnclink {} built {}", VERSION, BUILD_DATE);
    Ok(())
}
