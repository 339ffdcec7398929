//! Installer handoff.
//!
//! The installer is started as a detached process with nulled stdio and is
//! never awaited: it is expected to outlive (and usually replace) the host.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::api::types::ApiError;

#[cfg(target_os = "windows")]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(target_os = "windows")]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Start the installer at `path` with `args`, detached from the host.
///
/// # Returns
/// * `Ok(pid)` - process started
/// * `Err(ApiError::InvalidInstallerPath)` - path missing or not a file
/// * `Err(ApiError::IoFailure)` - spawn failed
pub fn launch_detached(path: &Path, args: &[String]) -> Result<u32, ApiError> {
    if !path.is_file() {
        return Err(ApiError::InvalidInstallerPath {
            path: path.display().to_string(),
        });
    }

    let mut cmd = installer_command(path, args);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    if let Some(dir) = path.parent() {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let mut child = cmd.spawn().map_err(|e| ApiError::IoFailure {
        message: format!("Failed to start installer {}: {e}", path.display()),
    })?;
    let pid = child.id();

    log::info!(
        "Installer started: pid={pid}, path={}, args={args:?}",
        path.display()
    );

    // Reap the child if it exits while the host is still running
    std::thread::spawn(move || {
        let _ = child.wait();
    });

    Ok(pid)
}

#[cfg(target_os = "macos")]
fn installer_command(path: &Path, args: &[String]) -> Command {
    // Disk images and packages are opened, not executed
    let mut cmd = Command::new("open");
    cmd.arg(path);
    if !args.is_empty() {
        cmd.arg("--args").args(args);
    }
    cmd
}

#[cfg(not(target_os = "macos"))]
fn installer_command(path: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new(path);
    cmd.args(args);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_missing_path_is_invalid() {
        let missing = env::temp_dir().join(format!("setup_{}.exe", Uuid::new_v4()));
        match launch_detached(&missing, &[]) {
            Err(ApiError::InvalidInstallerPath { path }) => {
                assert_eq!(path, missing.display().to_string())
            }
            other => panic!("Expected InvalidInstallerPath, got {other:?}"),
        }
    }

    #[test]
    fn test_directory_is_invalid() {
        assert!(matches!(
            launch_detached(&env::temp_dir(), &[]),
            Err(ApiError::InvalidInstallerPath { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_launches_with_args() {
        use std::os::unix::fs::PermissionsExt;

        let dir = env::temp_dir().join(format!("launcher_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("failed to create dir");
        let marker = dir.join("marker.txt");
        let script = dir.join("setup.sh");
        std::fs::write(&script, "#!/bin/sh\necho \"$1\" > \"$2\"\n").expect("failed to write");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod");

        let pid = launch_detached(
            &script,
            &["/S".to_string(), marker.display().to_string()],
        )
        .unwrap();
        assert!(pid > 0);

        let mut content = String::new();
        for _ in 0..50 {
            if let Ok(text) = std::fs::read_to_string(&marker) {
                if !text.is_empty() {
                    content = text;
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(content.trim(), "/S");

        std::fs::remove_dir_all(&dir).expect("failed to remove dir");
    }
}
