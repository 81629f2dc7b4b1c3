//! Donation Rail Service
//!
//! Entry point for the cross-chain donation HTTP rail.

use donation_rails::main_entry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    main_entry::run_server().await
}
