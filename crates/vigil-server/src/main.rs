use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path = std::env::var("VIGIL_DB").unwrap_or_else(|_| "vigil.db".to_string());
    let port: u16 = std::env::var("VIGIL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3141);

    vigil_server::serve(PathBuf::from(db_path), port).await
}
