//! External match engine invocation.
//!
//! The engine is an opaque program driven entirely by the generated configuration file. It is
//! launched as `<program> [args...] <dedupe|join> <config.xml>` and prints the number of
//! duplicates (or linked pairs) it found as the last non-empty line of its standard output.

use crate::config::EngineSettings;
use crate::request::MatchMode;
use crate::{MatchError, PtmatchResult};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Runs a match over a rendered configuration.
#[async_trait]
pub trait MatchEngine: Send + Sync {
    /// Run the engine in `mode` against `config_path`.
    ///
    /// # Returns
    ///
    /// Number of duplicates (deduplication) or linked pairs (linkage) found. Zero is a valid
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::EngineInvocation`] if the engine cannot be started, fails, times
    /// out, or reports a count that cannot be read.
    async fn run(&self, mode: MatchMode, config_path: &Path) -> PtmatchResult<u64>;
}

fn entry_point(mode: MatchMode) -> &'static str {
    match mode {
        MatchMode::Deduplication => "dedupe",
        MatchMode::Linkage => "join",
    }
}

/// [`MatchEngine`] that runs the engine as a child process.
#[derive(Clone, Debug)]
pub struct ProcessMatchEngine {
    settings: EngineSettings,
}

impl ProcessMatchEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl MatchEngine for ProcessMatchEngine {
    async fn run(&self, mode: MatchMode, config_path: &Path) -> PtmatchResult<u64> {
        let program = &self.settings.program;
        tracing::debug!(
            program = %program.display(),
            config = %config_path.display(),
            mode = entry_point(mode),
            "starting match engine"
        );

        let child = Command::new(program)
            .args(&self.settings.args)
            .arg(entry_point(mode))
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MatchError::EngineInvocation(format!("failed to start {}: {e}", program.display()))
            })?;

        let output = tokio::time::timeout(self.settings.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                MatchError::EngineInvocation(format!(
                    "timed out after {}s",
                    self.settings.timeout.as_secs()
                ))
            })?
            .map_err(|e| MatchError::EngineInvocation(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MatchError::EngineInvocation(format!(
                "exit code: {:?}, stderr: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let count = parse_count(&String::from_utf8_lossy(&output.stdout))?;
        tracing::info!("match engine result: {}", count);
        Ok(count)
    }
}

fn parse_count(stdout: &str) -> PtmatchResult<u64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .ok_or_else(|| MatchError::EngineInvocation("engine printed no result count".into()))?;

    line.parse::<u64>().map_err(|e| {
        MatchError::EngineInvocation(format!("unreadable result count '{line}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_parse_count_uses_last_line() {
        assert_eq!(parse_count("loading\nmatching\n13\n\n").unwrap(), 13);
        assert_eq!(parse_count("0").unwrap(), 0);
        assert!(matches!(parse_count(""), Err(MatchError::EngineInvocation(_))));
        assert!(matches!(
            parse_count("done\n"),
            Err(MatchError::EngineInvocation(_))
        ));
    }

    #[cfg(unix)]
    fn shell(script: &str, timeout: Duration) -> ProcessMatchEngine {
        ProcessMatchEngine::new(EngineSettings {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into(), "engine".into()],
            timeout,
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_passes_entry_point_and_config_path() {
        let engine = shell(
            r#"[ "$1" = join ] && [ "$2" = /w/config.xml ] && echo 4"#,
            Duration::from_secs(10),
        );
        let count = engine
            .run(MatchMode::Linkage, Path::new("/w/config.xml"))
            .await
            .unwrap();
        assert_eq!(count, 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_invocation_error() {
        let engine = shell("echo broken >&2; exit 3", Duration::from_secs(10));
        match engine.run(MatchMode::Deduplication, Path::new("c.xml")).await {
            Err(MatchError::EngineInvocation(msg)) => assert!(msg.contains("broken"), "{msg}"),
            other => panic!("expected invocation error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_invocation_error() {
        let engine = shell("sleep 5; echo 1", Duration::from_millis(100));
        assert!(matches!(
            engine.run(MatchMode::Deduplication, Path::new("c.xml")).await,
            Err(MatchError::EngineInvocation(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_invocation_error() {
        let engine = ProcessMatchEngine::new(EngineSettings {
            program: PathBuf::from("/definitely/not/a/match/engine"),
            args: Vec::new(),
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(
            engine.run(MatchMode::Deduplication, Path::new("c.xml")).await,
            Err(MatchError::EngineInvocation(_))
        ));
    }
}
