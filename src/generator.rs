//! The content generation job, opaque to the scheduler apart from its outcome.

use std::process::Command;

use log::info;

use crate::{error::GenerationError, path::AutomationPath};

pub trait ContentGenerator: Send + Sync {
    fn generate(&self, path: &AutomationPath) -> Result<(), GenerationError>;
}

impl<F> ContentGenerator for F
where
    F: Fn(&AutomationPath) -> Result<(), GenerationError> + Send + Sync,
{
    fn generate(&self, path: &AutomationPath) -> Result<(), GenerationError> {
        (self)(path)
    }
}

/// Runs an external program once per run; a non-zero exit status is a failure.
///
/// The path is described to the program through the `PATHFRAME_PATH_ID`,
/// `PATHFRAME_PATH_NAME` and `PATHFRAME_PATH_CATEGORY` variables.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(command: &str, args: Vec<String>) -> Self {
        CommandGenerator {
            command: command.to_string(),
            args,
        }
    }
}

impl ContentGenerator for CommandGenerator {
    fn generate(&self, path: &AutomationPath) -> Result<(), GenerationError> {
        info!("path @{} - Launching {}", path.label(), self.command);

        let status = Command::new(&self.command)
            .args(&self.args)
            .env("PATHFRAME_PATH_ID", &path.id)
            .env("PATHFRAME_PATH_NAME", &path.name)
            .env(
                "PATHFRAME_PATH_CATEGORY",
                path.category.as_deref().unwrap_or_default(),
            )
            .status()
            .map_err(|source| GenerationError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(GenerationError::Failed(format!(
                "{} exited with {status}",
                self.command
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleSpec;

    fn path() -> AutomationPath {
        let mut path = AutomationPath::new("Specials", ScheduleSpec::daily("09:00"));
        path.id = "p1".into();
        path
    }

    #[test]
    fn closures_are_generators() {
        let generator = |p: &AutomationPath| {
            if p.id == "p1" {
                Ok(())
            } else {
                Err(GenerationError::Failed("unknown".into()))
            }
        };
        assert!(generator.generate(&path()).is_ok());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let generator = CommandGenerator::new("pathframe-no-such-generator", vec![]);
        assert!(matches!(
            generator.generate(&path()),
            Err(GenerationError::Spawn { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_decides_the_outcome() {
        let ok = CommandGenerator::new("sh", vec!["-c".into(), "test \"$PATHFRAME_PATH_ID\" = p1".into()]);
        assert!(ok.generate(&path()).is_ok());

        let failing = CommandGenerator::new("sh", vec!["-c".into(), "exit 3".into()]);
        assert!(matches!(
            failing.generate(&path()),
            Err(GenerationError::Failed(_))
        ));
    }
}
