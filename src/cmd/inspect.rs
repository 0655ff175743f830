//! Read-only inspection commands: `shipyard classify` and `shipyard projects`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use shipyard::config::ShipyardConfig;
use shipyard::deploy::classify::classify;
use shipyard::deploy::store::ProjectStore;
use shipyard::serve::AssetResolver;

pub fn cmd_classify(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }
    let (project_dir, project_type) = classify(dir);
    println!("Type:        {}", project_type);
    println!("Project dir: {}", project_dir.display());
    println!(
        "Published:   {}",
        if project_type.is_published() { "yes" } else { "no (launched as a process)" }
    );
    Ok(())
}

pub fn cmd_projects(config: &ShipyardConfig, json: bool) -> Result<()> {
    let store = ProjectStore::inspect(&config.paths.serving_dir)?;
    let projects = AssetResolver::new(Arc::new(store)).list_projects();

    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }

    if projects.is_empty() {
        println!(
            "No published projects in {}",
            config.paths.serving_dir.display()
        );
        return Ok(());
    }

    println!("{:<24} {:<28} {:<12} {}", "ID", "NAME", "BUILD DIR", "URL");
    for project in &projects {
        let build_dir = if project.build_dir.is_empty() { "." } else { &project.build_dir };
        println!(
            "{:<24} {:<28} {:<12} {}",
            project.id,
            project.name,
            build_dir,
            config.project_url(&project.id)
        );
    }
    Ok(())
}
