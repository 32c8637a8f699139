//! IMG.LY Studio CLI Tool
//!
//! Command-line interface for compositing product photos onto a studio
//! backdrop using the imgly-studio workflow.

#[cfg(feature = "cli")]
use imgly_studio::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
