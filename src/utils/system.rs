//! Host tool detection

use std::ffi::OsStr;

/// Whether `tool` can be launched and exits successfully with `args`.
///
/// A missing binary or any launch error counts as unavailable.
pub async fn is_tool_available(tool: impl AsRef<OsStr>, args: &[&str]) -> bool {
    let tool = tool.as_ref();
    let output = tokio::process::Command::new(tool)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await;

    match output {
        Ok(status) => status.success(),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("Failed to check {:?}: {}", tool, e);
            }
            false
        }
    }
}
