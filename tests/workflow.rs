//! End-to-end setup/deploy against a throwaway git repository, executed with
//! `LocalSession` so no SSH server is needed.

use std::path::{Path, PathBuf};
use std::process::Command;

use ecodeploy::{
    DeploymentIdentity, Deployer, EnvironmentMap, HookName, HookSet, LocalSession, WorkflowStatus,
};
use tempfile::TempDir;

fn tools_available() -> bool {
    ["git", "bash"].iter().all(|tool| {
        Command::new(tool)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=ecodeploy", "-c", "user.email=ecodeploy@example.com"])
        .args(["-c", "commit.gpgsign=false", "-c", "tag.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should run");
    assert!(output.status.success(), "git {:?} failed: {}", args, String::from_utf8_lossy(&output.stderr));
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Repository with two tagged commits: v1.2.0 and v1.3.0
fn make_repo(root: &Path) -> PathBuf {
    let repo = root.join("origin");
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-q"]);

    std::fs::write(repo.join("VERSION"), "1.2.0\n").unwrap();
    git(&repo, &["add", "VERSION"]);
    git(&repo, &["commit", "-q", "-m", "release 1.2.0"]);
    git(&repo, &["tag", "v1.2.0"]);

    std::fs::write(repo.join("VERSION"), "1.3.0\n").unwrap();
    git(&repo, &["commit", "-q", "-am", "release 1.3.0"]);
    git(&repo, &["tag", "v1.3.0"]);

    repo
}

struct Fixture {
    _root: TempDir,
    repo: PathBuf,
    app: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let repo = make_repo(root.path());
        let app = root.path().join("srv").join("app");
        Self { _root: root, repo, app }
    }

    fn identity(&self) -> DeploymentIdentity {
        DeploymentIdentity::new(
            self.repo.display().to_string(),
            "v1.2.0",
            self.app.display().to_string(),
        )
    }

    async fn deployer(&self, hooks: HookSet, env: EnvironmentMap) -> Deployer<LocalSession> {
        let deployer = Deployer::new(LocalSession::new(false), self.identity(), hooks, env);
        deployer.start().await.unwrap();
        deployer
    }
}

#[tokio::test]
async fn test_setup_then_deploy() {
    if !tools_available() {
        eprintln!("git/bash not available, skipping");
        return;
    }
    let fixture = Fixture::new();
    let deployer = fixture.deployer(HookSet::default(), EnvironmentMap::new()).await;

    assert_eq!(deployer.setup(false).await, WorkflowStatus::Success);
    assert!(fixture.app.join("shared/logs").is_dir());
    assert!(fixture.app.join("shared/pids").is_dir());
    assert!(fixture.app.join("source/.git").exists());
    assert_eq!(
        std::fs::read_link(fixture.app.join("current")).unwrap(),
        fixture.app.join("source")
    );

    assert_eq!(deployer.deploy(None, None).await, WorkflowStatus::Success);
    let source = fixture.app.join("source");
    let head = git(&source, &["rev-parse", "HEAD"]);
    let tagged = git(&fixture.repo, &["rev-parse", "v1.2.0^{commit}"]);
    assert_eq!(head, tagged);

    let short = git(&source, &["rev-parse", "--short", "HEAD"]);
    let history = std::fs::read_to_string(fixture.app.join(".deploys")).unwrap();
    assert_eq!(history.lines().collect::<Vec<_>>(), vec![short.as_str()]);

    assert!(deployer.deploy(Some("v1.3.0"), None).await.is_success());
    assert_eq!(
        std::fs::read_to_string(fixture.app.join("current/VERSION")).unwrap(),
        "1.3.0\n"
    );
    assert_eq!(
        std::fs::read_to_string(fixture.app.join(".deploys")).unwrap().lines().count(),
        2
    );

    deployer.stop().await;
}

#[tokio::test]
async fn test_setup_refuses_existing_folder_unless_forced() {
    if !tools_available() {
        return;
    }
    let fixture = Fixture::new();
    let deployer = fixture.deployer(HookSet::default(), EnvironmentMap::new()).await;

    assert!(deployer.setup(false).await.is_success());
    std::fs::write(fixture.app.join("stale.txt"), "leftover").unwrap();

    assert_eq!(deployer.setup(false).await, WorkflowStatus::Failed);
    assert!(fixture.app.join("stale.txt").exists());

    assert_eq!(deployer.setup(true).await, WorkflowStatus::Success);
    assert!(!fixture.app.join("stale.txt").exists());
    assert!(fixture.app.join("source/VERSION").exists());

    deployer.stop().await;
}

#[tokio::test]
async fn test_failing_deploy_hook_stops_workflow() {
    if !tools_available() {
        return;
    }
    let fixture = Fixture::new();
    let hooks = HookSet::default()
        .with(HookName::PreDeploy, "touch pre_deploy_ran")
        .with(HookName::Deploy, "exit 1")
        .with(HookName::PostDeploy, "touch post_deploy_ran");
    let deployer = fixture.deployer(hooks, EnvironmentMap::new()).await;

    assert!(deployer.setup(false).await.is_success());
    assert_eq!(deployer.deploy(None, None).await.code(), 1);
    assert!(fixture.app.join("current/pre_deploy_ran").exists());
    assert!(!fixture.app.join("current/post_deploy_ran").exists());

    deployer.stop().await;
}

#[tokio::test]
async fn test_hooks_see_injected_environment() {
    if !tools_available() {
        return;
    }
    let fixture = Fixture::new();
    let mut env = EnvironmentMap::new();
    env.insert("GREETING".to_string(), "hello from ecodeploy".to_string());
    // `\$` survives the outer shell so the wrapped `bash -c` expands it
    let hooks = HookSet::default().with(HookName::Deploy, "echo \\$GREETING > greeting.txt");
    let deployer = fixture.deployer(hooks, env).await;

    assert!(deployer.setup(false).await.is_success());
    assert!(deployer.deploy(None, None).await.is_success());
    assert_eq!(
        std::fs::read_to_string(fixture.app.join("current/greeting.txt")).unwrap(),
        "hello from ecodeploy\n"
    );

    deployer.stop().await;
}

#[tokio::test]
async fn test_deploy_writes_propagated_config() {
    if !tools_available() {
        return;
    }
    let fixture = Fixture::new();
    let deployer = fixture.deployer(HookSet::default(), EnvironmentMap::new()).await;
    let config = serde_json::json!({
        "apps": [{"name": "api", "env": {"TOKEN": "it's a \"secret\" $HOME"}}],
        "deploy": {}
    });

    assert!(deployer.setup(false).await.is_success());
    assert!(deployer.deploy(None, Some(&config)).await.is_success());

    let written = std::fs::read_to_string(fixture.app.join("current/ecosystem.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(parsed, config);

    deployer.stop().await;
}

#[tokio::test]
async fn test_run_passthrough() {
    if !tools_available() {
        return;
    }
    let fixture = Fixture::new();
    let deployer = fixture.deployer(HookSet::default(), EnvironmentMap::new()).await;

    let outcome = deployer.run("echo one && echo two").await.unwrap();
    assert_eq!(outcome.stdout, "one\ntwo\n");

    let err = deployer.run("echo one && exit 4 && echo never").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Command \"echo one && exit 4 && echo never\" failed with code 4"
    );
    assert_eq!(err.outcome().map(|o| o.stdout.as_str()), Some("one\n"));

    deployer.stop().await;
}
