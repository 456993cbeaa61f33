mod app;
mod features;
mod geom;
mod io;
mod project;
mod raster;
mod workspace;
mod zonal;

use clap::Parser;

use app::Cli;

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    // One error line with the underlying cause text; scratch state has
    // already been cleared by the failing run.
    if let Err(err) = app::run(&cli) {
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
}
