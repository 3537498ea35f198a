//! picmeta - diagnostic shell over the reactive core
//!
//! Wires the application core together, opens the image given on the command
//! line (or the last opened one), and prints its metadata fields.

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use picmeta::config::SettingsStore;
use picmeta::App;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting picmeta");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let app = App::new(SettingsStore::default_path())?;

    if let Some(path) = std::env::args().nth(1) {
        app.image.load(path)?;
    } else if app.image.current_path().is_none() {
        eprintln!("usage: picmeta <image.jpg>");
        return Ok(());
    }

    app.metadata.load().await?;
    for item in app.metadata.items() {
        println!("{}: {}", item.display_name(), item.value());
    }
    Ok(())
}
