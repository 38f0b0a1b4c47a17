//! Building and spawning tool-server child processes.
//!
//! - Validate the executable (when given as a path) and working directory
//! - Layer the definition's environment over the supervisor's own
//! - Extend PATH with the executable's directory so scripts find their interpreters

use std::collections::HashSet;
use std::env;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use toolrelay_core::{ServerDefinition, SupervisorError, TransportKind};
use tracing::debug;

#[cfg(unix)]
const PATH_SEPARATOR: &str = ":";
#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";

/// Validate a command given as a path (absolute or containing a separator).
/// Bare names are resolved through PATH at spawn time.
pub fn validate_executable(command: &str) -> Result<(), String> {
    let path = Path::new(command);
    if path.components().count() <= 1 {
        return Ok(());
    }

    if !path.exists() {
        return Err(format!("Executable not found: {command}"));
    }
    if !path.is_file() {
        return Err(format!("Executable path is not a file: {command}"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)
            .map_err(|e| format!("Failed to check permissions: {e}"))?
            .permissions()
            .mode();
        if mode & 0o111 == 0 {
            return Err(format!("File is not executable: {command}"));
        }
    }

    Ok(())
}

/// Validate a working directory.
pub fn validate_working_dir(cwd: &str) -> Result<(), String> {
    let path = Path::new(cwd);
    if !path.exists() {
        return Err(format!("Working directory does not exist: {cwd}"));
    }
    if !path.is_dir() {
        return Err(format!("Working directory path is not a directory: {cwd}"));
    }
    Ok(())
}

/// PATH for the child: executable dir, then `extra` (from the definition's
/// env), then the supervisor's PATH. Entries are deduplicated in order.
pub fn build_effective_path(command: &str, extra: Option<&str>) -> OsString {
    let mut entries: Vec<String> = Vec::new();

    if let Some(dir) = Path::new(command).parent().and_then(Path::to_str) {
        if !dir.is_empty() {
            entries.push(dir.to_string());
        }
    }

    if let Some(extra) = extra {
        entries.extend(extra.split(PATH_SEPARATOR).map(str::to_string));
    }

    if let Some(current) = env::var_os("PATH").and_then(|p| p.into_string().ok()) {
        entries.extend(current.split(PATH_SEPARATOR).map(str::to_string));
    }

    let mut seen = HashSet::new();
    let deduped: Vec<String> = entries
        .into_iter()
        .filter(|e| !e.is_empty() && seen.insert(e.clone()))
        .collect();
    OsString::from(deduped.join(PATH_SEPARATOR))
}

/// Build the command for a definition. Stdio servers get piped stdin/stdout;
/// network servers get stdout piped for logging only.
pub fn build_command(definition: &ServerDefinition) -> Result<Command, SupervisorError> {
    let command = definition
        .command
        .as_deref()
        .ok_or_else(|| SupervisorError::InvalidConfig("no command to launch".to_string()))?;

    validate_executable(command).map_err(SupervisorError::SpawnFailure)?;
    if let Some(cwd) = &definition.cwd {
        validate_working_dir(cwd).map_err(SupervisorError::SpawnFailure)?;
    }

    let mut cmd = Command::new(command);
    cmd.args(&definition.args)
        .envs(&definition.env)
        .env(
            "PATH",
            build_effective_path(command, definition.env.get("PATH").map(String::as_str)),
        )
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match definition.transport {
        TransportKind::Stdio => cmd.stdin(Stdio::piped()),
        TransportKind::Network => cmd.stdin(Stdio::null()),
    };

    if let Some(cwd) = &definition.cwd {
        cmd.current_dir(cwd);
    }

    Ok(cmd)
}

/// Spawn the process for a definition.
pub fn spawn(definition: &ServerDefinition) -> Result<Child, SupervisorError> {
    let mut cmd = build_command(definition)?;
    cmd.spawn().map_err(|e| {
        SupervisorError::SpawnFailure(format!(
            "failed to spawn '{}': {e} (args: {:?}, cwd: {:?})",
            definition.command.as_deref().unwrap_or_default(),
            definition.args,
            definition.cwd
        ))
    })
}

/// Forward a child's output stream to the log, one line per event.
pub fn spawn_log_reader<R>(server_name: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(server_name = %server_name, stream, "{line}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_command_names_are_left_to_path_lookup() {
        assert!(validate_executable("node").is_ok());
    }

    #[test]
    fn missing_executable_path_rejected() {
        let err = validate_executable("/nonexistent/path/to/exe").unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn missing_working_dir_rejected() {
        let err = validate_working_dir("/nonexistent/directory").unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[cfg(unix)]
    #[test]
    fn effective_path_puts_exe_dir_first_and_dedups() {
        let path = build_effective_path("/opt/tools/bin/calc-server", Some("/usr/bin:/custom"));
        let path = path.into_string().unwrap();
        let entries: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        assert_eq!(entries[0], "/opt/tools/bin");
        assert_eq!(entries[1], "/usr/bin");
        assert_eq!(entries.iter().filter(|e| **e == "/usr/bin").count(), 1);
    }

    #[test]
    fn build_command_rejects_bad_cwd() {
        let def = ServerDefinition::stdio("calc-tool", "calc-server").with_cwd("/nonexistent/dir");
        assert!(matches!(
            build_command(&def),
            Err(SupervisorError::SpawnFailure(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_failure_for_unknown_binary() {
        let def = ServerDefinition::stdio("ghost", "definitely-not-a-real-binary-xyz");
        assert!(matches!(spawn(&def), Err(SupervisorError::SpawnFailure(_))));
    }
}
