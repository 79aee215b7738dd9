//! Container Manager: a typed wrapper over an external OCI-compatible
//! runtime invoked as a subprocess. Production code shells out to
//! `docker`; tests substitute a fake that never touches the host.

use tokio::process::Command;

/// Port the worker binary listens on inside every container.
pub const WORKER_PORT: u16 = 6000;

#[derive(Debug)]
pub enum ContainerError {
    RuntimeFailed { id: String, stderr: String },
    Io(std::io::Error),
}

impl std::fmt::Display for ContainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerError::RuntimeFailed { id, stderr } => {
                write!(f, "container runtime failed for {id}: {stderr}")
            }
            ContainerError::Io(e) => write!(f, "container runtime io error: {e}"),
        }
    }
}

impl std::error::Error for ContainerError {}

impl From<std::io::Error> for ContainerError {
    fn from(e: std::io::Error) -> Self {
        ContainerError::Io(e)
    }
}

#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self, image: &str, id: &str, host_port: u16) -> Result<(), ContainerError>;
    async fn stop(&self, id: &str) -> Result<(), ContainerError>;
    /// Stops and removes every container whose name contains `image`.
    /// Returns the count reclaimed. Called at broker shutdown as a final
    /// resort against leaked containers from a prior crash.
    async fn sweep(&self, image: &str) -> Result<usize, ContainerError>;
}

/// Shells out to `docker`. Every call captures stdout/stderr and turns a
/// non-zero exit into `ContainerError::RuntimeFailed`.
pub struct DockerRuntime;

async fn run(mut command: Command) -> Result<std::process::Output, std::io::Error> {
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .await
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, image: &str, id: &str, host_port: u16) -> Result<(), ContainerError> {
        let mut cmd = Command::new("docker");
        cmd.args([
            "run",
            "-d",
            "--rm",
            "--name",
            id,
            "-p",
            &format!("127.0.0.1:{host_port}:{WORKER_PORT}"),
            image,
        ]);
        let output = run(cmd).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ContainerError::RuntimeFailed {
                id: id.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        let mut cmd = Command::new("docker");
        cmd.args(["stop", id]);
        let output = run(cmd).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ContainerError::RuntimeFailed {
                id: id.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    async fn sweep(&self, image: &str) -> Result<usize, ContainerError> {
        let mut list = Command::new("docker");
        list.args(["ps", "-a", "--filter", &format!("name={image}"), "--format", "{{.Names}}"]);
        let output = run(list).await?;
        if !output.status.success() {
            return Err(ContainerError::RuntimeFailed {
                id: image.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let names: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let mut reclaimed = 0;
        for name in &names {
            let mut stop = Command::new("docker");
            stop.args(["stop", name]);
            let _ = run(stop).await;
            let mut rm = Command::new("docker");
            rm.args(["rm", name]);
            if run(rm).await.map(|o| o.status.success()).unwrap_or(false) {
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

/// Shells `docker build --tag <tag> .` in the current directory, used by
/// the `build-docker-image` CLI subcommand.
pub async fn build_image(tag: &str) -> Result<(), ContainerError> {
    let mut cmd = Command::new("docker");
    cmd.args(["build", "--tag", tag, "."]);
    let output = run(cmd).await?;
    if output.status.success() {
        Ok(())
    } else {
        Err(ContainerError::RuntimeFailed {
            id: tag.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_failed_message_names_the_container() {
        let err = ContainerError::RuntimeFailed {
            id: "abc123".to_string(),
            stderr: "no such image".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("no such image"));
    }
}
