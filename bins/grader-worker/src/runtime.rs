/// Isolated Runtime Boundary
///
/// **Core Responsibility:**
/// Turn (language, staged file) into a subprocess that runs the file inside an
/// isolation boundary the engine does not implement itself.
///
/// **External Security Dependency:**
/// Network isolation, filesystem confinement and resource caps are provided by
/// the container runtime (`--network none`, `--memory`, `--cpus`, read-only
/// bind mount). This module only asks for them.

use async_trait::async_trait;
use bollard::container::RemoveContainerOptions;
use bollard::Docker;
use grader_common::{Config, GradeError, Language, Result};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// One planned sandbox run
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: Uuid,
    pub language: Language,
    pub staged_path: PathBuf,
}

impl Invocation {
    pub fn container_name(&self) -> String {
        format!("grader-{}", self.id)
    }

    pub fn file_name(&self) -> String {
        self.staged_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}", self.id, self.language.extension()))
    }
}

/// Runtime that can execute a staged source file in isolation
#[async_trait]
pub trait IsolatedRuntime: Send + Sync {
    /// Check the runtime for `language` is usable before anything is staged
    async fn prepare(&self, _language: Language) -> Result<()> {
        Ok(())
    }

    /// Build the subprocess for one run; stdio is wired by the caller
    fn command(&self, invocation: &Invocation) -> Command;

    /// Release anything the killed subprocess may have left behind
    async fn terminate(&self, _invocation: &Invocation) {}
}

/// Docker CLI runtime
///
/// The runtime image for a language is `<image_prefix>-<slug>` and is expected
/// to run every file found under `/code`.
pub struct DockerRuntime {
    docker_bin: String,
    image_prefix: String,
    memory_mb: u32,
    cpus: f32,
    api: Option<Docker>,
}

impl DockerRuntime {
    pub fn from_config(config: &Config) -> Self {
        let api = match Docker::connect_with_local_defaults() {
            Ok(docker) => Some(docker),
            Err(e) => {
                warn!(error = %e, "Docker API unavailable; image preflight and container cleanup disabled");
                None
            }
        };

        Self {
            docker_bin: config.docker_bin.clone(),
            image_prefix: config.runtime_image_prefix.clone(),
            memory_mb: config.sandbox_memory_mb,
            cpus: config.sandbox_cpus,
            api,
        }
    }

    pub fn image_name(&self, language: Language) -> String {
        format!("{}-{}", self.image_prefix, language.image_slug())
    }
}

#[async_trait]
impl IsolatedRuntime for DockerRuntime {
    async fn prepare(&self, language: Language) -> Result<()> {
        let Some(api) = &self.api else {
            return Ok(());
        };
        let image = self.image_name(language);
        api.inspect_image(&image)
            .await
            .map(|_| ())
            .map_err(|e| GradeError::SandboxFault(format!("runtime image {} unavailable: {}", image, e)))
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mount = format!(
            "{}:/code/{}:ro",
            invocation.staged_path.display(),
            invocation.file_name()
        );

        let mut cmd = Command::new(&self.docker_bin);
        cmd.arg("run")
            .arg("--rm")
            .arg("-i")
            .arg("--name")
            .arg(invocation.container_name())
            .arg("--network")
            .arg("none")
            .arg("--memory")
            .arg(format!("{}m", self.memory_mb))
            .arg("--cpus")
            .arg(self.cpus.to_string())
            .arg("-v")
            .arg(mount)
            .arg(self.image_name(invocation.language));
        cmd
    }

    async fn terminate(&self, invocation: &Invocation) {
        let name = invocation.container_name();
        // killing the CLI client does not stop the container itself
        match &self.api {
            Some(api) => {
                let options = RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                };
                if let Err(e) = api.remove_container(&name, Some(options)).await {
                    debug!(container = %name, error = %e, "Container removal after timeout failed");
                }
            }
            None => {
                let status = Command::new(&self.docker_bin)
                    .args(["rm", "-f", name.as_str()])
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null())
                    .status()
                    .await;
                if let Err(e) = status {
                    debug!(container = %name, error = %e, "docker rm -f failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> DockerRuntime {
        DockerRuntime {
            docker_bin: "docker".to_string(),
            image_prefix: "code-execution".to_string(),
            memory_mb: 128,
            cpus: 0.5,
            api: None,
        }
    }

    fn invocation(language: Language) -> Invocation {
        let id = Uuid::new_v4();
        Invocation {
            id,
            language,
            staged_path: PathBuf::from(format!("/tmp/stage/{}.{}", id, language.extension())),
        }
    }

    #[test]
    fn test_image_name_uses_slug() {
        assert_eq!(runtime().image_name(Language::Python), "code-execution-python");
        assert_eq!(runtime().image_name(Language::CSharp), "code-execution-csharp");
    }

    #[test]
    fn test_command_mounts_file_read_only_without_network() {
        let invocation = invocation(Language::JavaScript);
        let cmd = runtime().command(&invocation);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let mount = format!(
            "/tmp/stage/{}.js:/code/{}.js:ro",
            invocation.id, invocation.id
        );
        assert_eq!(cmd.as_std().get_program(), "docker");
        assert_eq!(args[0], "run");
        assert!(args.contains(&"--rm".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--network" && w[1] == "none"));
        assert!(args.windows(2).any(|w| w[0] == "--memory" && w[1] == "128m"));
        assert!(args.windows(2).any(|w| w[0] == "-v" && w[1] == mount));
        assert!(args.windows(2).any(|w| w[0] == "--name" && w[1] == invocation.container_name()));
        assert_eq!(args.last().unwrap(), "code-execution-javascript");
    }

    #[tokio::test]
    async fn test_prepare_without_api_is_permissive() {
        assert!(runtime().prepare(Language::Java).await.is_ok());
    }
}
