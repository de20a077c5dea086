//! hypercube demo entry point.

use hypercube::cli::{self, Cli};

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse_args();

    cli::execute(cli)
}
