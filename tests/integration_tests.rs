//! Integration tests for the shipyard binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a shipyard Command isolated from ambient configuration
fn shipyard(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("shipyard");
    cmd.current_dir(dir)
        .env_remove("SHIPYARD_TOKEN")
        .env_remove("SHIPYARD_DEFAULT_OWNER")
        .env_remove("SHIPYARD_SERVING_DIR")
        .env_remove("SHIPYARD_DEPLOYMENTS_DIR")
        .env_remove("SHIPYARD_GIT_CMD")
        .env_remove("SHIPYARD_SERVER")
        .env_remove("RUST_LOG");
    cmd
}

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_shipyard_help() {
        let dir = TempDir::new().unwrap();
        shipyard(dir.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("deploy"));
    }

    #[test]
    fn test_shipyard_version() {
        let dir = TempDir::new().unwrap();
        shipyard(dir.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_invalid_config_file_is_reported() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("shipyard.toml"), "[server]\nlisten = 12\n");
        shipyard(dir.path())
            .arg("projects")
            .assert()
            .failure()
            .stderr(predicate::str::contains("shipyard.toml"));
    }
}

// =============================================================================
// Classification
// =============================================================================

mod classify {
    use super::*;

    #[test]
    fn test_classify_node() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("package.json"), "{}");
        shipyard(dir.path())
            .args(["classify", "."])
            .assert()
            .success()
            .stdout(predicate::str::contains("Type:        node"))
            .stdout(predicate::str::contains("Published:   yes"));
    }

    #[test]
    fn test_classify_nested_go() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("server/go.mod"), "module x");
        shipyard(dir.path())
            .args(["classify", "."])
            .assert()
            .success()
            .stdout(predicate::str::contains("Type:        go"))
            .stdout(predicate::str::contains("server"))
            .stdout(predicate::str::contains("launched as a process"));
    }

    #[test]
    fn test_classify_missing_dir() {
        let dir = TempDir::new().unwrap();
        shipyard(dir.path())
            .args(["classify", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Not a directory"));
    }
}

// =============================================================================
// Project listing
// =============================================================================

mod projects {
    use super::*;

    #[test]
    fn test_projects_empty() {
        let dir = TempDir::new().unwrap();
        shipyard(dir.path())
            .args(["projects", "--serving-dir", "Deployed"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No published projects"));
        assert!(!dir.path().join("Deployed").exists());
    }

    #[test]
    fn test_projects_table_and_json() {
        let dir = TempDir::new().unwrap();
        let gens = dir.path().join("Deployed/.generations");
        write(&gens.join("my_app-5/dist/index.html"), "<h1>app</h1>");
        write(&gens.join("docs-7/index.html"), "<h1>docs</h1>");

        shipyard(dir.path())
            .args(["projects", "--serving-dir", "Deployed"])
            .assert()
            .success()
            .stdout(predicate::str::contains("my app"))
            .stdout(predicate::str::contains("http://localhost:8000/projects/my_app"))
            .stdout(predicate::str::contains("docs"));

        let output = shipyard(dir.path())
            .args(["projects", "--json", "--serving-dir", "Deployed"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let projects: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let projects = projects.as_array().unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0]["id"], "docs");
        assert_eq!(projects[0]["build_dir"], "");
        assert_eq!(projects[1]["id"], "my_app");
        assert_eq!(projects[1]["build_dir"], "dist");
    }

    #[test]
    fn test_projects_reads_config_file() {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join("shipyard.toml"),
            "[server]\npublic_url = \"https://ship.example.com/\"\n\n[paths]\nserving_dir = \"public\"\n",
        );
        write(&dir.path().join("public/.generations/site-1/index.html"), "x");

        shipyard(dir.path())
            .arg("projects")
            .assert()
            .success()
            .stdout(predicate::str::contains("https://ship.example.com/projects/site"));
    }
}

// =============================================================================
// Deploy command
// =============================================================================

mod deploy {
    use super::*;

    #[test]
    fn test_deploy_requires_token() {
        let dir = TempDir::new().unwrap();
        shipyard(dir.path())
            .args(["deploy", "--repo", "demo", "--owner", "octo"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--token"));
    }

    #[test]
    fn test_deploy_requires_owner() {
        let dir = TempDir::new().unwrap();
        shipyard(dir.path())
            .args(["deploy", "--repo", "demo", "--token", "tok"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No owner given"));
    }

    #[cfg(unix)]
    #[test]
    fn test_deploy_static_site_with_fake_git() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let git = dir.path().join("fake-git");
        // Invoked as: git clone <url> <dest>
        fs::write(
            &git,
            "#!/bin/sh\nmkdir -p \"$3\"\necho '<h1>hello</h1>' > \"$3/index.html\"\n",
        )
        .unwrap();
        fs::set_permissions(&git, fs::Permissions::from_mode(0o755)).unwrap();

        shipyard(dir.path())
            .env("SHIPYARD_GIT_CMD", &git)
            .env("SHIPYARD_TOKEN", "tok")
            .env("SHIPYARD_DEFAULT_OWNER", "octo")
            .args(["deploy", "--repo", "site"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Type:       static"))
            .stdout(predicate::str::contains("http://localhost:8000/projects/site"));

        let gens: Vec<_> = fs::read_dir(dir.path().join("Deployed/.generations"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(gens.len(), 1);
        assert_eq!(
            fs::read_to_string(gens[0].join("index.html")).unwrap().trim(),
            "<h1>hello</h1>"
        );

        // The working directory is removed before the command exits.
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("deployments"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_deploy_clone_failure_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let git = dir.path().join("fake-git");
        fs::write(&git, "#!/bin/sh\necho 'fatal: repository not found' >&2\nexit 128\n").unwrap();
        fs::set_permissions(&git, fs::Permissions::from_mode(0o755)).unwrap();

        shipyard(dir.path())
            .env("SHIPYARD_GIT_CMD", &git)
            .args(["deploy", "--repo", "ghost", "--owner", "octo", "--token", "secret-tok"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to clone repository ghost"))
            .stderr(predicate::str::contains("secret-tok").not());
    }

    #[test]
    fn test_deploy_refuses_root_owned_by_server() {
        let dir = TempDir::new().unwrap();
        let serving = dir.path().join("Deployed");
        let server = shipyard::deploy::store::ProjectStore::open(&serving).unwrap();
        let staged = server.stage("demo").unwrap();
        fs::write(staged.root().join("index.html"), "A").unwrap();
        server.commit(staged);

        shipyard(dir.path())
            .args(["deploy", "--repo", "demo", "--owner", "octo", "--token", "tok"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("pass --server"));

        let current = server.current("demo").unwrap();
        assert_eq!(fs::read_to_string(current.root().join("index.html")).unwrap(), "A");
    }

    #[test]
    fn test_deploy_through_unreachable_server_fails() {
        let dir = TempDir::new().unwrap();
        shipyard(dir.path())
            .args([
                "deploy", "--repo", "demo", "--owner", "octo", "--token", "tok",
                "--server", "http://127.0.0.1:9",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to reach shipyard server"));
    }
}
