//! Entry point for the `geoport` importer.
#![forbid(unsafe_code)]

use env_logger::Env;
use eyre::WrapErr;

fn main() -> eyre::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    geoport_cli::run().wrap_err("geoport import failed")
}
