use crate::configuration::DeployerSettings;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum DeployerError {
    #[error("deploy CLI timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn deploy CLI: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("deploy step '{step}' exited with status {code}")]
    Failed { step: String, code: i32 },
    #[error("could not parse deployment result: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct DeployResult {
    pub deployment_id: String,
    pub url: String,
}

/// Thin driver around the hosting provider's CLI. Install and compile run
/// in the build output directory; deploy returns the provider's deployment
/// identifier and public URL parsed from its output stream.
#[derive(Clone)]
pub struct DeployClient {
    command: String,
    timeout: Duration,
}

impl DeployClient {
    pub fn new(settings: &DeployerSettings) -> Self {
        Self {
            command: settings.command.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    pub async fn install(&self, workdir: &Path) -> Result<(), DeployerError> {
        self.run_step("install", &["install"], workdir).await?;
        Ok(())
    }

    pub async fn compile(&self, workdir: &Path) -> Result<(), DeployerError> {
        self.run_step("build", &["build"], workdir).await?;
        Ok(())
    }

    pub async fn deploy(
        &self,
        workdir: &Path,
        project_name: &str,
    ) -> Result<DeployResult, DeployerError> {
        let output = self
            .run_step("deploy", &["deploy", "--name", project_name], workdir)
            .await?;
        parse_deploy_output(&output)
    }

    async fn run_step(
        &self,
        step: &str,
        args: &[&str],
        workdir: &Path,
    ) -> Result<String, DeployerError> {
        tracing::info!(command = %self.command, step, "running deploy CLI step");

        let mut child = Command::new(&self.command)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let wait = async {
            let output = child.wait_with_output().await?;
            Ok::<_, std::io::Error>(output)
        };

        let output = match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result.map_err(DeployerError::Spawn)?,
            Err(_) => return Err(DeployerError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(DeployerError::Failed {
                step: step.to_string(),
                code: output.status.code().unwrap_or(-1),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// The CLI reports `Deployment: <id>` and the public URL on its own lines.
pub fn parse_deploy_output(output: &str) -> Result<DeployResult, DeployerError> {
    let id_re = Regex::new(r"(?m)^Deployment:\s*(\S+)\s*$").expect("static regex");
    let url_re = Regex::new(r"(?m)(https://\S+)").expect("static regex");

    let deployment_id = id_re
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| DeployerError::Parse("no deployment id in output".to_string()))?;

    let url = url_re
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| DeployerError::Parse("no public url in output".to_string()))?;

    Ok(DeployResult { deployment_id, url })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_id_and_url() {
        let output = "\
Uploading 42 files...
Deployment: dep_8c41a
Live at https://myapp.example.app
";
        let result = parse_deploy_output(output).unwrap();
        assert_eq!(result.deployment_id, "dep_8c41a");
        assert_eq!(result.url, "https://myapp.example.app");
    }

    #[test]
    fn missing_id_is_an_error() {
        let output = "Live at https://myapp.example.app\n";
        assert!(matches!(
            parse_deploy_output(output),
            Err(DeployerError::Parse(_))
        ));
    }

    #[test]
    fn missing_url_is_an_error() {
        let output = "Deployment: dep_1\n";
        assert!(matches!(
            parse_deploy_output(output),
            Err(DeployerError::Parse(_))
        ));
    }
}
