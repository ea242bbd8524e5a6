//! Rotation and open hooks
//!
//! A notifier is an injected capability: `notify(path)` either succeeds or
//! fails the operation that invoked it. Four are configured per carrier:
//! file-before, file-after, link-before, link-after. `before` notifiers fire
//! prior to creating a new live file or symlink; `after` notifiers fire once
//! rotation has produced the archival path.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::{CarrierError, Result};

/// Configured notifier transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifierType {
    /// No hook configured
    #[default]
    None,
    /// Run an executable with the affected path as its argument
    Command,
}

/// Raw notifier spec as it appears in the config file
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
pub struct NotifierSpec {
    #[serde(rename = "Type")]
    pub kind: NotifierType,
    pub command: Option<String>,
}

impl NotifierSpec {
    /// Builds the runtime notifier, rejecting incomplete specs
    pub fn build(&self) -> Result<Notifier> {
        match self.kind {
            NotifierType::None => Ok(Notifier::None),
            NotifierType::Command => match &self.command {
                Some(command) if !command.is_empty() => Ok(Notifier::Command {
                    command: command.clone(),
                }),
                _ => Err(CarrierError::ConfigValidation {
                    field: "Notifier.Command",
                    reason: "command notifier needs a non-empty Command".into(),
                }),
            },
        }
    }
}

/// Hook invoked with a file path around open and rotation
#[derive(Debug)]
pub enum Notifier {
    None,
    Command { command: String },
}

impl Notifier {
    /// Invoke the hook for `path`
    ///
    /// A command notifier blocks until the process exits; a non-zero status
    /// fails the containing open or rotation.
    pub fn notify(&self, path: &Path) -> Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Command { command } => {
                debug!(%command, path = %path.display(), "running notifier");
                let status = Command::new(command)
                    .arg(path)
                    .status()
                    .map_err(|e| CarrierError::NotifierSpawn {
                        command: command.clone(),
                        source: e,
                    })?;
                if status.success() {
                    Ok(())
                } else {
                    Err(CarrierError::NotifierFailure {
                        command: command.clone(),
                        path: path.to_path_buf(),
                        code: status.code(),
                    })
                }
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// The four notifiers a carrier instance runs with
///
/// `file_*` hooks receive live/rotated file paths, `link_*` hooks the
/// symlink paths.
pub struct NotifySet {
    pub file_before: Arc<Notifier>,
    pub file_after: Arc<Notifier>,
    pub link_before: Arc<Notifier>,
    pub link_after: Arc<Notifier>,
}

impl NotifySet {
    pub fn disabled() -> Self {
        Self {
            file_before: Arc::new(Notifier::None),
            file_after: Arc::new(Notifier::None),
            link_before: Arc::new(Notifier::None),
            link_after: Arc::new(Notifier::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_notifier_always_succeeds() {
        assert!(Notifier::None.notify(Path::new("/nowhere")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_notifier_success() {
        let n = Notifier::Command {
            command: "/bin/true".into(),
        };
        assert!(n.notify(Path::new("/tmp/some.log")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_notifier_failure_status() {
        let n = Notifier::Command {
            command: "/bin/false".into(),
        };
        match n.notify(Path::new("/tmp/some.log")) {
            Err(CarrierError::NotifierFailure { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("expected NotifierFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_command_notifier_missing_binary() {
        let n = Notifier::Command {
            command: "/definitely/not/a/binary".into(),
        };
        assert!(matches!(
            n.notify(Path::new("/tmp/x")),
            Err(CarrierError::NotifierSpawn { .. })
        ));
    }

    #[test]
    fn test_spec_none_builds() {
        let spec = NotifierSpec::default();
        assert!(spec.build().unwrap().is_none());
    }

    #[test]
    fn test_spec_command_requires_command() {
        let spec = NotifierSpec {
            kind: NotifierType::Command,
            command: None,
        };
        assert!(spec.build().is_err());
    }

    #[test]
    fn test_spec_parses_from_yaml() {
        let spec: NotifierSpec =
            serde_yaml::from_str("Type: command\nCommand: /usr/bin/touch\n").unwrap();
        assert_eq!(spec.kind, NotifierType::Command);
        assert_eq!(spec.command.as_deref(), Some("/usr/bin/touch"));
    }
}
