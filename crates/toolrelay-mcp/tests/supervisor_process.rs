//! Process-level supervisor tests against a scripted stdio tool server.
//!
//! The fixture is a POSIX shell script speaking line-delimited JSON-RPC, so
//! these run on any Unix host without extra binaries.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use tempfile::TempDir;
use tokio::time::Instant;
use toolrelay_core::{
    ErrorKind, NoopEmitter, ServerDefinition, ServerStatus, SupervisorSettings,
};
use toolrelay_mcp::ProcessSupervisor;

const FIXTURE: &str = r#"#!/bin/sh
[ "$IGNORE_TERM" = 1 ] && trap '' TERM
[ -n "$PID_FILE" ] && echo $$ > "$PID_FILE"
# Reads requests but never answers.
[ "$SILENT" = 1 ] && exec cat > /dev/null
lists=0
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fixture","version":"1.0"}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      lists=$((lists + 1))
      if [ "$lists" -gt 1 ] && [ "$BROKEN_REFRESH" = 1 ]; then
        printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":"not-a-list"}}\n' "$id"
      else
        printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"add","description":"Add two numbers","inputSchema":{"type":"object"}},{"description":"nameless"}]}}\n' "$id"
      fi
      if [ "$EXIT_AFTER_LIST" = 1 ]; then
        sleep 1
        exit 3
      fi
      ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      ;;
  esac
done
"#;

fn write_fixture(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("calc-server.sh");
    std::fs::write(&path, FIXTURE).unwrap();
    path
}

fn definition(name: &str, script: &Path) -> ServerDefinition {
    ServerDefinition::stdio(name, "/bin/sh").with_args([script.display().to_string()])
}

fn supervisor() -> ProcessSupervisor {
    let settings = SupervisorSettings::default()
        .with_readiness_timeout(Duration::from_secs(5))
        .with_discovery_timeout(Duration::from_secs(5))
        .with_termination_grace(Duration::from_millis(500))
        .with_settle_delay(Duration::from_millis(50));
    ProcessSupervisor::new(settings, Arc::new(NoopEmitter::new()))
}

#[tokio::test]
async fn start_discovers_capabilities_and_stop_clears_them() {
    let dir = TempDir::new().unwrap();
    let script = write_fixture(&dir);
    let sup = supervisor();

    let started = sup.start(&definition("calc-tool", &script)).await;
    assert_eq!(started.status, ServerStatus::Running, "{started:?}");
    assert!(started.pid.is_some());
    let caps = started.discovered_capabilities.unwrap();
    // The entry without a name is skipped, not fatal.
    assert_eq!(caps.len(), 1);
    assert_eq!(caps[0].name, "add");

    let stopped = sup.stop("calc-tool").await;
    assert_eq!(stopped.status, ServerStatus::Stopped);
    assert_eq!(stopped.pid, None);
    assert!(sup.live_capabilities("calc-tool").is_none());

    // Second stop is a no-op.
    let again = sup.stop("calc-tool").await;
    assert_eq!(again.status, ServerStatus::Stopped);
    assert!(!again.is_failure());
}

#[tokio::test]
async fn concurrent_starts_share_one_process() {
    let dir = TempDir::new().unwrap();
    let script = write_fixture(&dir);
    let sup = supervisor();
    let def = definition("calc-tool", &script);

    let (a, b) = tokio::join!(sup.start(&def), sup.start(&def));
    assert_eq!(a.status, ServerStatus::Running);
    assert_eq!(b.status, ServerStatus::Running);
    assert_eq!(a.pid, b.pid);

    let third = sup.start(&def).await;
    assert_eq!(third.pid, a.pid);
    assert_eq!(third.error_kind, Some(ErrorKind::AlreadyRunning));
    assert!(!third.is_failure());

    sup.stop_all().await;
}

#[tokio::test]
async fn malformed_refresh_keeps_previous_capabilities() {
    let dir = TempDir::new().unwrap();
    let script = write_fixture(&dir);
    let sup = supervisor();
    let def = definition("calc-tool", &script).with_env("BROKEN_REFRESH", "1");

    let started = sup.start(&def).await;
    assert_eq!(started.status, ServerStatus::Running);

    let err = sup.refresh_capabilities("calc-tool").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DiscoveryParseError);

    let caps = sup.live_capabilities("calc-tool").unwrap();
    assert_eq!(caps.len(), 1);
    assert_eq!(caps[0].name, "add");

    sup.stop("calc-tool").await;
}

#[tokio::test]
async fn unexpected_exit_is_reconciled() {
    let dir = TempDir::new().unwrap();
    let script = write_fixture(&dir);
    let sup = supervisor();
    let def = definition("flaky-tool", &script).with_env("EXIT_AFTER_LIST", "1");

    let started = sup.start(&def).await;
    assert_eq!(started.status, ServerStatus::Running);

    let mut rx = sup.watch("flaky-tool").unwrap();
    let record = tokio::time::timeout(
        Duration::from_secs(10),
        rx.wait_for(|record| record.status == ServerStatus::Error),
    )
    .await
    .expect("exit not observed")
    .unwrap()
    .clone();

    assert_eq!(record.pid, None);
    // Last good capabilities are kept in the error state.
    assert_eq!(record.capabilities.len(), 1);
    assert!(sup.live_capabilities("flaky-tool").is_none());

    // A fresh start spawns a new process.
    let restarted = sup.start(&def).await;
    assert_eq!(restarted.status, ServerStatus::Running);
    assert_ne!(restarted.pid, started.pid);
    sup.stop("flaky-tool").await;
}

#[tokio::test]
async fn silent_server_fails_start_within_readiness_timeout() {
    let dir = TempDir::new().unwrap();
    let script = write_fixture(&dir);
    let pid_file = dir.path().join("server.pid");
    let settings = SupervisorSettings::default()
        .with_readiness_timeout(Duration::from_millis(500))
        .with_discovery_timeout(Duration::from_secs(5))
        .with_termination_grace(Duration::from_millis(500))
        .with_settle_delay(Duration::from_millis(50));
    let sup = ProcessSupervisor::new(settings, Arc::new(NoopEmitter::new()));
    let def = definition("mute-tool", &script)
        .with_env("SILENT", "1")
        .with_env("PID_FILE", pid_file.display().to_string());

    let began = Instant::now();
    let started = sup.start(&def).await;
    let elapsed = began.elapsed();

    assert_eq!(started.status, ServerStatus::Error, "{started:?}");
    assert_eq!(started.error_kind, Some(ErrorKind::SpawnFailure));
    assert!(
        started.message.as_deref().is_some_and(|m| m.contains("did not become ready")),
        "{started:?}"
    );
    assert_eq!(started.pid, None);
    // Readiness budget plus settle delay and termination grace.
    assert!(elapsed < Duration::from_secs(3), "start took {elapsed:?}");

    let pid: i32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(
        kill(Pid::from_raw(pid), None).is_err(),
        "server process {pid} is still alive"
    );
}

#[tokio::test]
async fn stop_escalates_when_term_is_ignored() {
    let dir = TempDir::new().unwrap();
    let script = write_fixture(&dir);
    let sup = supervisor();
    let def = definition("stubborn-tool", &script).with_env("IGNORE_TERM", "1");

    assert_eq!(sup.start(&def).await.status, ServerStatus::Running);

    let stopped = sup.stop("stubborn-tool").await;
    assert_eq!(stopped.status, ServerStatus::Stopped);
    assert_eq!(stopped.pid, None);
}

#[tokio::test]
async fn call_tool_reaches_running_server() {
    let dir = TempDir::new().unwrap();
    let script = write_fixture(&dir);
    let sup = supervisor();

    sup.start(&definition("calc-tool", &script)).await;
    let result = sup
        .call_tool("calc-tool", "add", serde_json::json!({ "a": 1, "b": 2 }))
        .await
        .unwrap();
    assert!(result.is_object());

    sup.stop("calc-tool").await;
    assert!(sup.call_tool("calc-tool", "add", serde_json::json!({})).await.is_err());
}
