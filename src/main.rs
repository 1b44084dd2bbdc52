//! Conviva monitor CLI entry point.

use conviva_monitor::cli::{self, Cli};
use conviva_monitor::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse_args();

    // Execute the command
    cli::execute(cli).await
}
