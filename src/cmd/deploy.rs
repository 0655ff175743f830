//! One-shot deployment command: `shipyard deploy`.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use shipyard::config::ShipyardConfig;
use shipyard::deploy::ingest::{CloneRequest, GitCliCloner};
use shipyard::deploy::proxy::LoggingRegistrar;
use shipyard::errors::DeployError;
use shipyard::serve::AppState;

#[derive(Debug, Deserialize)]
struct RemoteDeployResponse {
    deployment_id: String,
    project_type: String,
    deploy_url: String,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    error: String,
}

pub async fn cmd_deploy(
    config: ShipyardConfig,
    repo: &str,
    owner: Option<&str>,
    token: &str,
    server: Option<&str>,
) -> Result<()> {
    let owner = owner
        .map(str::to_string)
        .or_else(|| config.source.default_owner.clone())
        .context("No owner given: pass --owner or set source.default_owner")?;

    match server {
        Some(server) => deploy_remote(server, repo, &owner, token).await,
        None => deploy_local(config, repo, owner, token).await,
    }
}

/// Hand the deployment to a running server, which owns the serving directory.
async fn deploy_remote(server: &str, repo: &str, owner: &str, token: &str) -> Result<()> {
    let url = format!("{}/api/deploy", server.trim_end_matches('/'));
    let client = reqwest::Client::new();
    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", token))
        .json(&serde_json::json!({ "repo_name": repo, "owner": owner }))
        .send()
        .await
        .with_context(|| format!("Failed to reach shipyard server at {}", url))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let message = resp
            .json::<RemoteError>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| status.to_string());
        bail!("Server rejected deployment ({}): {}", status, message);
    }

    let outcome: RemoteDeployResponse = resp
        .json()
        .await
        .context("Failed to parse deploy response from server")?;
    println!("Deployment: {}", outcome.deployment_id);
    println!("Type:       {}", outcome.project_type);
    println!("URL:        {}", outcome.deploy_url);
    Ok(())
}

async fn deploy_local(config: ShipyardConfig, repo: &str, owner: String, token: &str) -> Result<()> {
    let cloner = Arc::new(GitCliCloner::new(&config));
    let state = match AppState::new(config, cloner, Arc::new(LoggingRegistrar)) {
        Ok(state) => state,
        Err(e @ DeployError::StoreLocked { .. }) => {
            return Err(e).context("A shipyard server is running: pass --server to deploy through it");
        }
        Err(e) => return Err(e.into()),
    };

    let result = state
        .pipeline
        .deploy(CloneRequest {
            owner,
            repo_name: repo.to_string(),
            credential: token.to_string(),
        })
        .await;
    // The process exits right after, so remove the working directory now.
    state.cleanup.drain().await;

    let outcome = result?;
    println!("Deployment: {}", outcome.deployment_id);
    println!("Type:       {}", outcome.project_type);
    println!("URL:        {}", outcome.deploy_url);

    let processes = state.processes.list().await;
    for process in processes {
        println!(
            "Process:    pid {} on port {} (left running)",
            process.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
            process.port
        );
    }
    Ok(())
}
