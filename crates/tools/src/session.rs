use std::{str::FromStr, time::Duration};

use tracing::debug;

use crate::msf::ExploitAdapter;

/// Session types that support command interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Raw command shell: write, wait, read what accumulated.
    Shell,
    /// Meterpreter: the adapter runs the command and captures its output.
    Meterpreter,
}

impl FromStr for SessionKind {
    type Err = SessionError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "shell" => Ok(SessionKind::Shell),
            "meterpreter" => Ok(SessionKind::Meterpreter),
            other => Err(SessionError::Unsupported(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session ID ({0}) not found")]
    NotFound(String),
    #[error("Unsupported session type: {0}")]
    Unsupported(String),
    #[error("Session error: {0:#}")]
    Adapter(#[from] anyhow::Error),
}

/// Run `command` in an open session and return its output.
///
/// The session must be present in the current listing; nothing is written
/// otherwise.
pub async fn interact(
    adapter: &dyn ExploitAdapter,
    session_id: &str,
    command: &str,
    settle: Duration,
) -> Result<String, SessionError> {
    let sessions = adapter.list_sessions().await?;
    let info = sessions
        .get(session_id)
        .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
    let kind: SessionKind = info.session_type.parse()?;
    debug!(session_id, ?kind, "session command");

    match kind {
        SessionKind::Shell => {
            adapter
                .shell_write(session_id, &format!("{command}\n"))
                .await?;
            tokio::time::sleep(settle).await;
            Ok(adapter.shell_read(session_id).await?)
        },
        SessionKind::Meterpreter => Ok(adapter.meterpreter_run(session_id, command).await?),
    }
}
