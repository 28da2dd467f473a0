//! Build-tool collaborator: turns a checkout into a static site.

use async_trait::async_trait;
use std::path::Path;
use tracing::{error, info};

use crate::error::{RelayError, Result};
use crate::utils::{command_in, display_command, run_streaming};

/// Placeholder in the build command line that receives the output directory.
pub const OUTPUT_TOKEN: &str = "{output}";

#[async_trait]
pub trait BuildTool: Send + Sync {
    /// Builds the sources in `source_dir` into `output_dir`.
    async fn build(&self, source_dir: &Path, output_dir: &Path) -> Result<()>;
}

/// Runs a configured command line such as `lektor build --output-path {output}`.
#[derive(Debug, Clone)]
pub struct CommandBuildTool {
    command_line: String,
}

impl CommandBuildTool {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
        }
    }

    /// Splits the command line on whitespace and substitutes the output path.
    /// The path is appended when the line has no `{output}` token.
    pub fn argv(&self, output_dir: &Path) -> Result<(String, Vec<String>)> {
        let output = output_dir.to_string_lossy();
        let mut parts = self.command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| RelayError::BuildFailed("build command is empty".to_string()))?
            .to_string();

        let mut substituted = false;
        let mut args: Vec<String> = parts
            .map(|part| {
                if part.contains(OUTPUT_TOKEN) {
                    substituted = true;
                    part.replace(OUTPUT_TOKEN, &output)
                } else {
                    part.to_string()
                }
            })
            .collect();
        if !substituted {
            args.push(output.into_owned());
        }

        Ok((program, args))
    }
}

#[async_trait]
impl BuildTool for CommandBuildTool {
    async fn build(&self, source_dir: &Path, output_dir: &Path) -> Result<()> {
        let (program, args) = self.argv(output_dir)?;
        let line = display_command(&program, &args);
        info!("Running (cwd = '{}'): {}", source_dir.display(), line);

        let mut cmd = command_in(&program, source_dir);
        cmd.args(&args);

        let status = run_streaming(cmd, &program).await.map_err(|e| {
            error!("{} failed to start: {}", program, e);
            RelayError::BuildFailed(format!("{} failed to start: {}", program, e))
        })?;

        if status.success() {
            info!("{} finished successfully", line);
            Ok(())
        } else {
            let msg = format!("{} exited with {}", line, status);
            error!("{}", msg);
            Err(RelayError::BuildFailed(msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_output_token() {
        let tool = CommandBuildTool::new("lektor build --output-path {output}");
        let (program, args) = tool.argv(Path::new("/data/www/abc123")).unwrap();
        assert_eq!(program, "lektor");
        assert_eq!(args, ["build", "--output-path", "/data/www/abc123"]);
    }

    #[test]
    fn substitutes_token_embedded_in_an_argument() {
        let tool = CommandBuildTool::new("zola build --output-dir={output} --force");
        let (_, args) = tool.argv(Path::new("/srv/out")).unwrap();
        assert_eq!(args, ["build", "--output-dir=/srv/out", "--force"]);
    }

    #[test]
    fn appends_output_when_token_is_absent() {
        let tool = CommandBuildTool::new("hugo -d");
        let (program, args) = tool.argv(Path::new("/srv/out")).unwrap();
        assert_eq!(program, "hugo");
        assert_eq!(args, ["-d", "/srv/out"]);
    }

    #[test]
    fn empty_command_is_rejected() {
        let tool = CommandBuildTool::new("   ");
        assert!(matches!(
            tool.argv(Path::new("/srv/out")),
            Err(RelayError::BuildFailed(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_the_command_in_the_source_directory() {
        let source = tempfile::tempdir().unwrap();
        let output = source.path().join("site");
        let tool = CommandBuildTool::new("mkdir -p {output}");

        tool.build(source.path(), &output).await.unwrap();
        assert!(output.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_build_failure() {
        let source = tempfile::tempdir().unwrap();
        let tool = CommandBuildTool::new("false");

        let err = tool
            .build(source.path(), &source.path().join("site"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::BuildFailed(_)));
    }

    #[tokio::test]
    async fn missing_executable_is_a_build_failure() {
        let source = tempfile::tempdir().unwrap();
        let tool = CommandBuildTool::new("definitely-not-a-real-build-tool {output}");

        let err = tool
            .build(source.path(), &source.path().join("site"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }
}
