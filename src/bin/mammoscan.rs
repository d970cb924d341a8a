//! Mammoscan CLI tool
//!
//! Command-line interface for the mammoscan classification pipeline:
//! classify stored mammogram images and generate local weights files.

#[cfg(feature = "cli")]
use mammoscan::cli;

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    cli::main()
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
