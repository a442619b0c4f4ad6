//! SSH transport driven against a local shell
//!
//! The connector is pointed at a stand-in `ssh` program that ignores its
//! arguments and starts an interactive `sh`, so prompt installation, output
//! collection and teardown run for real without a remote host.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shell_criteria::ValueStore;
use shell_executor::{
    CommandExecutor, Connector, Error, Execution, ExecutionOptions, Extract, ManagedCommand,
    SessionManager, SessionRequest, SshConfig, SshConnector, Target,
};

fn fake_ssh(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-ssh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn connector(program: &Path) -> SshConnector {
    SshConnector::new(
        SshConfig::new()
            .with_program(program.to_string_lossy())
            .with_connect_timeout(Duration::from_secs(10)),
    )
}

fn target() -> Target {
    Target::parse("ssh://tester@localhost").unwrap()
}

#[smol_potat::test]
async fn test_run_and_close() {
    let dir = tempfile::tempdir().unwrap();
    let program = fake_ssh(dir.path(), "exec sh -i 2>&1");
    let mut shell = connector(&program).connect(&target()).await.unwrap();

    let output = shell
        .run("echo hello; echo world", Some(Duration::from_secs(10)), &[])
        .await
        .unwrap();
    assert_eq!(output, "hello\nworld");

    let output = shell
        .run("printf 'Continue? '", Some(Duration::from_secs(10)), &["Continue?".to_string()])
        .await
        .unwrap();
    assert_eq!(output, "Continue?");

    shell.close().await.unwrap();
}

#[smol_potat::test]
async fn test_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let program = fake_ssh(dir.path(), "exec sh -i 2>&1");
    let mut shell = connector(&program).connect(&target()).await.unwrap();

    let err = shell
        .run("sleep 5", Some(Duration::from_millis(200)), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err}");
}

#[smol_potat::test]
async fn test_late_output_after_timeout_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let program = fake_ssh(dir.path(), "exec sh -i 2>&1");
    let mut shell = connector(&program).connect(&target()).await.unwrap();

    let err = shell
        .run("sleep 1; echo late", Some(Duration::from_millis(200)), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err}");

    let output = shell
        .run("echo next", Some(Duration::from_secs(10)), &[])
        .await
        .unwrap();
    assert_eq!(output, "next");

    let output = shell
        .run("echo third", Some(Duration::from_secs(10)), &[])
        .await
        .unwrap();
    assert_eq!(output, "third");

    shell.close().await.unwrap();
}

#[smol_potat::test]
async fn test_authentication_failure() {
    let dir = tempfile::tempdir().unwrap();
    let program = fake_ssh(
        dir.path(),
        "echo 'tester@localhost: Permission denied (publickey).' >&2; exit 255",
    );
    let result = connector(&program).connect(&target()).await;
    assert!(matches!(result, Err(Error::AuthenticationFailed { .. })));
}

#[test]
fn test_managed_command_over_local_session() {
    futures::executor::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ssh(dir.path(), "exec sh -i 2>&1");
        let mut sessions = SessionManager::new(Arc::new(connector(&program)))
            .with_command_timeout(Duration::from_secs(10));

        let session = sessions
            .open(&SessionRequest::new(target()).with_env("GREETING", "hi there"))
            .await
            .unwrap();
        if cfg!(target_os = "linux") {
            assert_eq!(session.os().system, "linux");
        }

        let command = ManagedCommand::new(ExecutionOptions::new().with_directory("/tmp"))
            .with_execution(
                Execution::new("echo \"$GREETING from $(pwd)\"")
                    .with_extract(Extract::new(r"from (\S+)", "cwd")),
            )
            .with_execution(Execution::new("ls /definitely/not/here").with_error("No such file"));

        let mut state = ValueStore::new();
        let err = CommandExecutor::new()
            .run(session, &command, &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ErrorFragment { .. }), "{err}");
        assert_eq!(state.get_string("cwd").as_deref(), Some("/tmp"));

        sessions.close_all().await.unwrap();
        assert!(sessions.is_empty());
    });
}
