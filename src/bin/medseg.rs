//! medseg CLI
//!
//! Detects findings in medical images and writes annotated detection and
//! segmentation overlays for each input.

#[cfg(feature = "cli")]
use medseg::cli;

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    cli::main()
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
