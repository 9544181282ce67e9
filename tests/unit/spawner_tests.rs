//! Unit tests for agent command construction.

use std::ffi::OsString;
use std::path::PathBuf;

use agent_relay::config::GlobalConfig;
use agent_relay::orchestrator::spawner::{
    child_env, launch_args, spawn_agent, LaunchMode, INTERNAL_ENV_VARS,
};
use agent_relay::AppError;
use tempfile::TempDir;

fn config(dir: &TempDir) -> GlobalConfig {
    GlobalConfig::from_toml_str(&format!(
        "workspace_root = '{}'\nagent_cli_args = ['--verbose']\n",
        dir.path().display()
    ))
    .expect("config")
}

fn var(key: &str, value: &str) -> (OsString, OsString) {
    (OsString::from(key), OsString::from(value))
}

fn lookup<'a>(env: &'a [(OsString, OsString)], key: &str) -> Option<&'a OsString> {
    env.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

#[test]
fn fresh_launch_names_the_session() {
    let dir = TempDir::new().expect("tempdir");

    assert_eq!(
        launch_args(&config(&dir), "abc", LaunchMode::Fresh),
        vec![
            "--verbose",
            "--print",
            "--dangerously-skip-permissions",
            "--session-id",
            "abc"
        ]
    );
}

#[test]
fn resume_launch_resumes_the_session() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = config(&dir);
    config.model = Some("large".into());

    assert_eq!(
        launch_args(&config, "abc", LaunchMode::Resume),
        vec![
            "--verbose",
            "--resume",
            "abc",
            "--print",
            "--dangerously-skip-permissions",
            "--model",
            "large"
        ]
    );
}

#[test]
fn internal_variables_are_removed() {
    let mut vars: Vec<(OsString, OsString)> = INTERNAL_ENV_VARS
        .iter()
        .map(|key| var(key, "1"))
        .collect();
    vars.push(var("KEEP_ME", "yes"));

    let env = child_env(vars);

    for key in INTERNAL_ENV_VARS {
        assert!(lookup(&env, key).is_none(), "{key} leaked");
    }
    assert_eq!(lookup(&env, "KEEP_ME"), Some(&OsString::from("yes")));
}

#[test]
fn path_gains_install_dirs_once() {
    let env = child_env(vec![
        var("HOME", "/home/agent"),
        var("PATH", "/usr/bin:/usr/local/bin"),
    ]);

    let path = lookup(&env, "PATH").expect("PATH");
    let dirs: Vec<PathBuf> = std::env::split_paths(path).collect();
    assert_eq!(dirs[0], PathBuf::from("/usr/bin"));
    assert!(dirs.contains(&PathBuf::from("/home/agent/.local/bin")));
    assert!(dirs.contains(&PathBuf::from("/home/agent/.bun/bin")));
    assert_eq!(
        dirs.iter()
            .filter(|dir| *dir == &PathBuf::from("/usr/local/bin"))
            .count(),
        1
    );
    assert_eq!(env.iter().filter(|(k, _)| k == "PATH").count(), 1);
}

#[test]
fn home_relative_dirs_need_home() {
    let env = child_env(vec![var("PATH", "/usr/bin")]);

    let path = lookup(&env, "PATH").expect("PATH");
    assert!(std::env::split_paths(path).all(|dir| !dir.starts_with("~")));
}

#[tokio::test]
async fn unknown_binary_is_a_spawn_error() {
    let dir = TempDir::new().expect("tempdir");
    let mut config = config(&dir);
    config.agent_cli = "/definitely/not/an/agent".into();
    config.paths.diagnostic_log = dir.path().join("logs").join("relay.log");

    let err = spawn_agent(&config, "abc", LaunchMode::Fresh).unwrap_err();

    assert!(matches!(err, AppError::Spawn(_)), "{err}");
    assert!(config.paths.diagnostic_log.exists(), "log opened first");
}
