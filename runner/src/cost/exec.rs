use super::{CostConfig, CostError, CostFunction};
use crate::{config::ConfigErrors, parameters::ParameterSpace};
use serde::Deserialize;
use std::{
    io::{ErrorKind, Read, Write},
    path::PathBuf,
    process::{Command, Stdio},
    time::Duration,
};
use tracing::{debug, error, trace};
use wait_timeout::ChildExt;

/// Cost function backed by an external executable.
///
/// The point is written to stdin as a YAML mapping of parameter name to value, the executable
/// has to print either a bare number or a mapping with a `value` key.
#[derive(Debug, Clone)]
pub struct ExecCost {
    pub exec: PathBuf,
    pub params: Vec<String>,
    pub timeout: Duration,
    pub sign: f64,
    names: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CostOutput {
    Value(f64),
    Mapping { value: f64 },
}

impl ExecCost {
    pub fn load(config: &CostConfig, space: &ParameterSpace) -> Result<Self, ConfigErrors> {
        match config {
            CostConfig::Exec {
                exec,
                params,
                timeout,
                sign,
            } => Ok(Self {
                exec: exec.clone(),
                params: params.clone(),
                timeout: Duration::from_millis(*timeout),
                sign: *sign,
                names: space.names().into_iter().map(str::to_owned).collect(),
            }),
            _ => Err(ConfigErrors::InvalidCost(
                "exec cost function requires an exec configuration".to_owned(),
            )),
        }
    }

    fn render(&self, point: &[f64]) -> Result<String, CostError> {
        let mut mapping = serde_yaml::Mapping::new();

        for (name, value) in self.names.iter().zip(point) {
            mapping.insert(name.as_str().into(), (*value).into());
        }

        Ok(serde_yaml::to_string(&mapping)?)
    }
}

impl CostFunction for ExecCost {
    #[tracing::instrument(level = "debug", skip(self))]
    fn evaluate(&mut self, point: &[f64]) -> Result<f64, CostError> {
        let input = self.render(point)?;

        let mut handle = Command::new(&self.exec)
            .args(self.params.iter())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::piped())
            .spawn()
            .map_err(CostError::Spawn)?;

        if let Some(mut stdin) = handle.stdin.take() {
            match stdin.write_all(input.as_bytes()) {
                Ok(()) => {}
                // the executable does not read its input, the exit status decides
                Err(error) if error.kind() == ErrorKind::BrokenPipe => {
                    debug!("Cost function closed stdin before reading the point");
                }
                Err(error) => return Err(error.into()),
            }
            // closing stdin gives the executable a clear end of input
            drop(stdin);
        }

        debug!("Cost function waiting on {}", handle.id());
        let status = match handle.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                debug!("Cost function ran into timeout, killing it");
                handle.kill()?;
                handle.wait()?;

                return Err(CostError::ChildTimeout(self.timeout));
            }
        };

        if !status.success() {
            let mut stderr = String::new();

            if let Some(mut pipe) = handle.stderr.take() {
                pipe.read_to_string(&mut stderr)?;
            }

            error!(status = %status, stderr = stderr, "Cost function failed");

            return Err(CostError::Exit {
                status: status.to_string(),
                stderr,
            });
        }

        let mut buffer = String::new();
        if let Some(mut stdout) = handle.stdout.take() {
            stdout.read_to_string(&mut buffer)?;
        }

        trace!("Output from cost function: {buffer}");

        let value = match serde_yaml::from_str::<CostOutput>(&buffer) {
            Ok(CostOutput::Value(value)) | Ok(CostOutput::Mapping { value }) => value,
            Err(error) => {
                error!(error = ?error, "Failed to read cost function output");

                return Err(error.into());
            }
        };

        Ok(self.sign * value)
    }
}

#[cfg(test)]
mod exec_test {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt};
    use tempfile::TempDir;

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("cost.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn load(exec: PathBuf, timeout: u64) -> ExecCost {
        let space = ParameterSpace::new([("x", [-1.0, 1.0]), ("y", [-1.0, 1.0])]).unwrap();
        let config = CostConfig::Exec {
            exec,
            params: Vec::new(),
            timeout,
            sign: 1.0,
        };

        ExecCost::load(&config, &space).unwrap()
    }

    #[test]
    fn reads_bare_value() {
        let dir = TempDir::new().unwrap();
        let mut cost = load(script(&dir, "cat > /dev/null\necho 2.5"), 5000);

        assert_eq!(cost.evaluate(&[0.1, 0.2]).unwrap(), 2.5);
    }

    #[test]
    fn reads_value_mapping() {
        let dir = TempDir::new().unwrap();
        let mut cost = load(script(&dir, "cat > /dev/null\necho 'value: -4'"), 5000);

        assert_eq!(cost.evaluate(&[0.1, 0.2]).unwrap(), -4.0);
    }

    #[test]
    fn passes_named_point() {
        let dir = TempDir::new().unwrap();
        // echo back the y coordinate
        let mut cost = load(script(&dir, "sed -n 's/^y: //p'"), 5000);

        assert_eq!(cost.evaluate(&[0.1, 0.75]).unwrap(), 0.75);
    }

    #[test]
    fn executable_ignoring_stdin_succeeds() {
        let dir = TempDir::new().unwrap();
        let mut cost = load(script(&dir, "echo 2.5"), 5000);

        // the executable may exit before the point is written
        for _ in 0..100 {
            assert_eq!(cost.evaluate(&[0.1, 0.2]).unwrap(), 2.5);
        }
    }

    #[test]
    fn ignored_stdin_still_reports_failures() {
        let dir = TempDir::new().unwrap();
        let mut cost = load(script(&dir, "echo broken >&2\nexit 2"), 5000);

        for _ in 0..20 {
            assert!(matches!(
                cost.evaluate(&[0.0, 0.0]),
                Err(CostError::Exit { .. })
            ));
        }
    }

    #[test]
    fn failing_exit_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut cost = load(script(&dir, "cat > /dev/null\necho broken >&2\nexit 3"), 5000);

        assert!(matches!(
            cost.evaluate(&[0.0, 0.0]),
            Err(CostError::Exit { .. })
        ));
    }

    #[test]
    fn slow_executable_times_out() {
        let dir = TempDir::new().unwrap();
        let mut cost = load(script(&dir, "cat > /dev/null\nsleep 5\necho 1"), 100);

        assert!(matches!(
            cost.evaluate(&[0.0, 0.0]),
            Err(CostError::ChildTimeout(_))
        ));
    }
}
