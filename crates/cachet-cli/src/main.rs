use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::app::App;

mod app;
mod get;
mod key;

fn main() -> anyhow::Result<()> {
    let app = App::parse();
    init_tracing(app.verbose);
    app.run()
}

/// `RUST_LOG` wins; otherwise each `-v` raises the level.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "cachet=info,warn",
        2 => "cachet=debug,info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
