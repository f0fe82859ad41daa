//! Serve command implementation.

use super::CommandResult;
use gcl_server::{GclServer, MapParams, ParamSource, ServerConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the serve command until interrupted.
pub fn run(dir: &Path, config_file: Option<&Path>, bind: Option<&str>) -> CommandResult {
    let params = load_params(dir, config_file, bind)?;
    let config = ServerConfig::from_params(&params)?;
    info!(
        bind = %config.bind_addr,
        dir = %config.store.log_dir.display(),
        replicas = config.replication.default_replicas.len(),
        "starting log server"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        std::fs::create_dir_all(&config.store.log_dir)?;
        let server = Arc::new(GclServer::new(config)?);
        let stopper = Arc::clone(&server);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => stopper.shutdown(),
                Err(e) => warn!(error = %e, "cannot listen for interrupt"),
            }
        });
        server.run().await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

/// Parameters from the file, with `--dir` and `--bind` applied on top.
fn load_params(dir: &Path, config_file: Option<&Path>, bind: Option<&str>) -> CommandResult<MapParams> {
    let mut params = match config_file {
        Some(path) => MapParams::load(path)?,
        None => MapParams::new(),
    };
    if params.get("gcl.log.dir").is_none() {
        params = params.set("gcl.log.dir", dir.display().to_string());
    }
    if let Some(bind) = bind {
        params = params.set("gcl.server.bind", bind);
    }
    Ok(params)
}
