//! Execution of the downloaded installer.
use crate::artifact::Artifact;
use crate::context::Context;
use crate::crowdstrike::ccid::TenantIdentifier;
use crate::crowdstrike::defaults::{DEFAULT_INSTALL_ARGS, DEFAULT_TENANT_PARAM};
use duration_str::deserialize_option_duration;
use serde::Deserialize;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const OUTPUT_GRACE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("installer `{0}` not found")]
    MissingArtifact(String),
    #[error("could not launch `{0}`: {1}")]
    Launch(String, io::Error),
    #[error("waiting for the installer: {0}")]
    Wait(io::Error),
    #[error("installer exited with code {code}: {output}")]
    Failed { code: i32, output: String },
    #[error("installer terminated by a signal: {output}")]
    Terminated { output: String },
    #[error("installer did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("installation cancelled")]
    Cancelled,
}

/// How the installer is invoked.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InstallConfig {
    /// Arguments placed before the tenant parameter.
    pub args: Vec<String>,
    /// Name of the parameter carrying the CCID, passed as `<tenant_param>=<ccid>`.
    pub tenant_param: String,
    /// Maximum time the installer may run. Unbounded when unset.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub timeout: Option<Duration>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            args: DEFAULT_INSTALL_ARGS.iter().map(ToString::to_string).collect(),
            tenant_param: DEFAULT_TENANT_PARAM.to_string(),
            timeout: None,
        }
    }
}

/// Exit code and combined stdout/stderr of a successful installation.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    pub exit_code: i32,
    pub output: String,
}

/// Runs the installer silently as a child process.
pub struct InstallInvoker {
    config: InstallConfig,
    context: Context,
}

impl InstallInvoker {
    pub fn new(config: InstallConfig, context: Context) -> Self {
        Self { config, context }
    }

    /// The full argument list for the given CCID.
    pub fn args(&self, tenant: &TenantIdentifier) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.push(format!("{}={}", self.config.tenant_param, tenant));
        args
    }

    #[instrument(skip_all, fields(installer = %artifact.path().display()))]
    pub fn install(
        &self,
        artifact: &Artifact,
        tenant: &TenantIdentifier,
    ) -> Result<InstallOutcome, InstallError> {
        if !artifact.path().is_file() {
            return Err(InstallError::MissingArtifact(
                artifact.path().display().to_string(),
            ));
        }

        let program = program_path(artifact.path());
        info!("Running the sensor installer");
        let mut child = Command::new(&program)
            .args(self.args(tenant))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| InstallError::Launch(program.display().to_string(), err))?;

        let (sender, lines) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_output_reader(stdout, "stdout", sender.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_reader(stderr, "stderr", sender);
        }

        let status = self.wait(&mut child)?;
        let output = self.collect_output(&lines);

        match status.code() {
            Some(0) => {
                info!("Sensor installer finished successfully");
                Ok(InstallOutcome {
                    exit_code: 0,
                    output,
                })
            }
            Some(code) => Err(InstallError::Failed { code, output }),
            None => Err(InstallError::Terminated { output }),
        }
    }

    /// Gathers the output once the installer exited. Processes it left behind may keep the
    /// streams open, their readers are detached after `OUTPUT_GRACE_PERIOD`.
    fn collect_output(&self, lines: &Receiver<String>) -> String {
        let deadline = Instant::now() + OUTPUT_GRACE_PERIOD;
        let mut output = Vec::new();
        loop {
            let now = Instant::now();
            if now >= deadline || self.context.is_cancelled() {
                output.extend(lines.try_iter());
                warn!("Installer output still open after it exited, detaching the readers");
                break;
            }
            match lines.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(line) => output.push(line),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        output.join("\n")
    }

    /// Polls the child until it exits, the timeout is reached or the context is cancelled.
    fn wait(&self, child: &mut Child) -> Result<ExitStatus, InstallError> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(InstallError::Wait)? {
                debug!(?status, "Installer exited");
                return Ok(status);
            }
            if let Some(timeout) = self.config.timeout {
                if started.elapsed() >= timeout {
                    kill(child);
                    return Err(InstallError::TimedOut(timeout));
                }
            }
            if self.context.wait_timeout(POLL_INTERVAL) {
                kill(child);
                return Err(InstallError::Cancelled);
            }
        }
    }
}

/// Relative paths without a parent are resolved against the current directory, not `PATH`.
fn program_path(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => path.to_path_buf(),
        _ => Path::new(".").join(path),
    }
}

fn kill(child: &mut Child) {
    warn!(pid = child.id(), "Killing the installer process");
    if let Err(err) = child.kill() {
        warn!(%err, "Could not kill the installer process");
    }
    if let Err(err) = child.wait() {
        warn!(%err, "Could not reap the installer process");
    }
}

/// Reads a child output stream line by line into the combined output channel.
fn spawn_output_reader<R>(stream: R, name: &'static str, lines: Sender<String>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    debug!(stream = name, "{line}");
                    if lines.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(stream = name, %err, "Could not read the installer output");
                    break;
                }
            }
        }
    });
}

#[cfg(all(test, target_family = "unix"))]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    /// `/bin/sh -c <script> installer CID=<ccid>` runs the script with the CCID argument as `$1`.
    fn shell(script: &str, timeout: Option<Duration>, context: Context) -> InstallInvoker {
        InstallInvoker::new(
            InstallConfig {
                args: vec!["-c".to_string(), script.to_string(), "installer".to_string()],
                tenant_param: "CID".to_string(),
                timeout,
            },
            context,
        )
    }

    fn sh_artifact() -> Artifact {
        Artifact::new(PathBuf::from("/bin/sh"), String::new(), 0)
    }

    #[test]
    fn test_default_args() {
        let invoker = InstallInvoker::new(InstallConfig::default(), Context::new());
        assert_eq!(
            invoker.args(&TenantIdentifier::new("CID123")),
            vec!["/install", "/quiet", "/norestart", "CID=CID123"]
        );
    }

    #[test]
    fn test_successful_install_captures_output() {
        let invoker = shell(r#"echo "installing with $1"; echo warning >&2"#, None, Context::new());

        let outcome = invoker
            .install(&sh_artifact(), &TenantIdentifier::new("CID123"))
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.output.contains("installing with CID=CID123"));
        assert!(outcome.output.contains("warning"));
    }

    #[test]
    fn test_non_zero_exit_is_an_error() {
        let invoker = shell("echo 'reboot pending' >&2; exit 3", None, Context::new());

        let result = invoker.install(&sh_artifact(), &TenantIdentifier::new("CID123"));

        assert_matches!(result, Err(InstallError::Failed { code: 3, output }) => {
            assert_eq!(output, "reboot pending");
        });
    }

    #[test]
    fn test_timeout_kills_the_installer() {
        let invoker = shell("exec sleep 30", Some(Duration::from_millis(200)), Context::new());

        let started = Instant::now();
        let result = invoker.install(&sh_artifact(), &TenantIdentifier::new("CID123"));

        assert_matches!(result, Err(InstallError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_cancellation_kills_the_installer() {
        let context = Context::new();
        let invoker = shell("exec sleep 30", None, context.clone());
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            context.cancel();
        });

        let result = invoker.install(&sh_artifact(), &TenantIdentifier::new("CID123"));

        assert_matches!(result, Err(InstallError::Cancelled));
        canceller.join().unwrap();
    }

    #[test]
    fn test_left_behind_process_does_not_block() {
        let invoker = shell("sleep 5 & echo started", None, Context::new());

        let started = Instant::now();
        let outcome = invoker
            .install(&sh_artifact(), &TenantIdentifier::new("CID123"))
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.output, "started");
    }

    #[test]
    fn test_missing_artifact() {
        let invoker = InstallInvoker::new(InstallConfig::default(), Context::new());
        let artifact = Artifact::new(PathBuf::from("/non/existent/falcon.exe"), String::new(), 0);

        let result = invoker.install(&artifact, &TenantIdentifier::new("CID123"));

        assert_matches!(result, Err(InstallError::MissingArtifact(_)));
    }

    #[test]
    fn test_not_executable_artifact_fails_to_launch() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("falcon.exe");
        std::fs::write(&path, "not a program").unwrap();
        let invoker = InstallInvoker::new(InstallConfig::default(), Context::new());

        let result = invoker.install(
            &Artifact::new(path, String::new(), 0),
            &TenantIdentifier::new("CID123"),
        );

        assert_matches!(result, Err(InstallError::Launch(_, _)));
    }

    #[test]
    fn test_program_path() {
        assert_eq!(program_path(Path::new("falcon.exe")), PathBuf::from("./falcon.exe"));
        assert_eq!(program_path(Path::new("/opt/falcon.exe")), PathBuf::from("/opt/falcon.exe"));
        assert_eq!(program_path(Path::new("dl/falcon.exe")), PathBuf::from("dl/falcon.exe"));
    }
}
