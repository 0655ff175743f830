//! HTTP server command: `shipyard serve`.

use anyhow::Result;
use shipyard::config::ShipyardConfig;

pub async fn cmd_serve(config: ShipyardConfig) -> Result<()> {
    println!(
        "Serving {} at http://{}",
        config.paths.serving_dir.display(),
        config.server.listen
    );
    shipyard::serve::start_server(config).await
}
