//! Command line and file layout for one federate process.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Stdio,
};

use simlink_proto::StartFederate;
use tokio::{
    fs::{self, File},
    process::{Child, Command},
};

use crate::error::StarterError;

/// Placeholder in the post-model arguments replaced by the allocated port.
pub const PORT_PLACEHOLDER: &str = "%PORT%";

/// Resolved launch of one federate.
///
/// Built from a start request before anything is spawned, so an unknown
/// alias fails the request without side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
}

impl LaunchPlan {
    /// Resolve `request` against the alias table for `port`.
    ///
    /// Arguments are `argsBefore`, the model path, then `argsAfter` with
    /// [`PORT_PLACEHOLDER`] substituted, each split on whitespace.
    ///
    /// # Errors
    ///
    /// - `StarterError::UnknownSoftware` if the alias is not registered
    pub fn new(
        request: &StartFederate,
        software: &HashMap<String, PathBuf>,
        port: u16,
    ) -> Result<Self, StarterError> {
        let program = software
            .get(&request.software_code)
            .cloned()
            .ok_or_else(|| StarterError::UnknownSoftware(request.software_code.clone()))?;

        let after = request.args_after.replace(PORT_PLACEHOLDER, &port.to_string());
        let args = request
            .args_before
            .split_whitespace()
            .chain(request.model_path.split_whitespace())
            .chain(after.split_whitespace())
            .map(str::to_string)
            .collect();

        let working_dir = non_empty(&request.working_directory).map(PathBuf::from);
        let resolve = |path: &str| {
            non_empty(path).map(|p| match &working_dir {
                Some(dir) => dir.join(p),
                None => PathBuf::from(p),
            })
        };

        Ok(Self {
            stdin: resolve(&request.redirect_stdin),
            stdout: resolve(&request.redirect_stdout),
            stderr: resolve(&request.redirect_stderr),
            program,
            args,
            working_dir,
        })
    }

    /// Executable path.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Argument vector, excluding the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Working directory, if one was requested.
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Resolved stdout redirection.
    pub fn stdout(&self) -> Option<&Path> {
        self.stdout.as_deref()
    }

    /// Resolved stderr redirection.
    pub fn stderr(&self) -> Option<&Path> {
        self.stderr.as_deref()
    }

    /// Create the working directory and open redirections, then spawn.
    ///
    /// Stdin and stdout default to null; stderr is inherited so federate
    /// diagnostics reach the starter's log.
    ///
    /// # Errors
    ///
    /// - `StarterError::Prepare` if the directory or a redirection cannot
    ///   be opened
    /// - `StarterError::LaunchFailure` if the process cannot be spawned
    pub async fn spawn(&self) -> Result<Child, StarterError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            fs::create_dir_all(dir).await.map_err(|source| prepare(dir, source))?;
            command.current_dir(dir);
        }

        command.stdin(match &self.stdin {
            Some(path) => redirect(File::open(path).await, path).await?,
            None => Stdio::null(),
        });
        command.stdout(match &self.stdout {
            Some(path) => redirect(File::create(path).await, path).await?,
            None => Stdio::null(),
        });
        command.stderr(match &self.stderr {
            Some(path) => redirect(File::create(path).await, path).await?,
            None => Stdio::inherit(),
        });

        command.spawn().map_err(|e| {
            StarterError::LaunchFailure(format!("{}: {e}", self.program.display()))
        })
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

async fn redirect(file: std::io::Result<File>, path: &Path) -> Result<Stdio, StarterError> {
    let file = file.map_err(|source| prepare(path, source))?;
    Ok(Stdio::from(file.into_std().await))
}

fn prepare(path: &Path, source: std::io::Error) -> StarterError {
    StarterError::Prepare { path: path.to_path_buf(), source }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HashMap<String, PathBuf> {
        HashMap::from([("mm1".to_string(), PathBuf::from("/opt/sim/mm1"))])
    }

    #[test]
    fn arguments_in_order_with_port() {
        let request = StartFederate {
            args_before: "-Xmx1g -server".to_string(),
            model_path: "models/mm1.model".to_string(),
            args_after: "--port %PORT% --quiet".to_string(),
            ..StartFederate::new("MM1.0", "mm1")
        };

        let plan = LaunchPlan::new(&request, &table(), 5003).unwrap();

        assert_eq!(plan.program(), Path::new("/opt/sim/mm1"));
        assert_eq!(plan.args(), [
            "-Xmx1g", "-server", "models/mm1.model", "--port", "5003", "--quiet"
        ]);
        assert_eq!(plan.working_dir(), None);
    }

    #[test]
    fn redirections_resolve_against_working_dir() {
        let request = StartFederate {
            working_directory: "/tmp/run-7".to_string(),
            redirect_stdout: "out.txt".to_string(),
            redirect_stderr: "/var/log/err.txt".to_string(),
            ..StartFederate::new("MM1.0", "mm1")
        };

        let plan = LaunchPlan::new(&request, &table(), 5000).unwrap();

        assert_eq!(plan.stdout(), Some(Path::new("/tmp/run-7/out.txt")));
        assert_eq!(plan.stderr(), Some(Path::new("/var/log/err.txt")));
    }

    #[test]
    fn unknown_alias_rejected() {
        let request = StartFederate::new("MM1.0", "nope");

        let result = LaunchPlan::new(&request, &table(), 5000);

        assert!(matches!(result, Err(StarterError::UnknownSoftware(code)) if code == "nope"));
    }

    #[tokio::test]
    async fn missing_program_fails_spawn() {
        let software =
            HashMap::from([("ghost".to_string(), PathBuf::from("/nonexistent/simlink-ghost"))]);
        let plan = LaunchPlan::new(&StartFederate::new("G.0", "ghost"), &software, 5000).unwrap();

        assert!(matches!(plan.spawn().await, Err(StarterError::LaunchFailure(_))));
    }

    #[tokio::test]
    async fn spawn_prepares_working_dir_and_redirections() {
        let root = tempfile::tempdir().unwrap();
        let workdir = root.path().join("run-1/MM1.0");
        let software = HashMap::from([("true".to_string(), PathBuf::from("true"))]);
        let request = StartFederate {
            working_directory: workdir.display().to_string(),
            redirect_stdout: "out.txt".to_string(),
            redirect_stderr: "err.txt".to_string(),
            ..StartFederate::new("T.0", "true")
        };
        let plan = LaunchPlan::new(&request, &software, 5000).unwrap();

        let mut child = plan.spawn().await.unwrap();
        child.wait().await.unwrap();

        assert!(workdir.is_dir());
        assert!(workdir.join("out.txt").is_file());
        assert!(workdir.join("err.txt").is_file());
    }

    #[tokio::test]
    async fn missing_stdin_fails_prepare() {
        let root = tempfile::tempdir().unwrap();
        let software = HashMap::from([("true".to_string(), PathBuf::from("true"))]);
        let request = StartFederate {
            working_directory: root.path().display().to_string(),
            redirect_stdin: "absent.txt".to_string(),
            ..StartFederate::new("T.0", "true")
        };
        let plan = LaunchPlan::new(&request, &software, 5000).unwrap();

        let result = plan.spawn().await;

        assert!(matches!(result, Err(StarterError::Prepare { path, .. }) if path.ends_with("absent.txt")));
    }
}
