//! Execution of external commands.
//!
//! Every CLI that YADS drives (`apt-get`, `docker`, `certbot`, ...) is invoked
//! through a [`CommandRunner`], so the sequencing logic can run for real,
//! print what it would do, or be recorded in tests.

use crate::{Error, Result};
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::debug;

/// Description of one external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Run through `sudo` when not already root
    pub privileged: bool,
    /// File whose contents are fed to stdin
    pub stdin_file: Option<PathBuf>,
    /// File that receives stdout
    pub stdout_file: Option<PathBuf>,
    /// Indices into `args` masked when the command is displayed
    pub secret_args: Vec<usize>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            privileged: false,
            stdin_file: None,
            stdout_file: None,
            secret_args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append an argument that is never shown in logs or errors.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_file = Some(path.into());
        self
    }

    pub fn stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_file = Some(path.into());
        self
    }

    /// Program and arguments as a single vector.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.privileged {
            write!(f, "sudo ")?;
        }
        write!(f, "{}", self.program)?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&i) {
                write!(f, " {}", MASK)?;
                continue;
            }
            let arg = redact_assignment(arg);
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg.replace('\'', "'\\''"))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        if let Some(path) = &self.stdin_file {
            write!(f, " < {}", path.display())?;
        }
        if let Some(path) = &self.stdout_file {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}

const MASK: &str = "********";

/// Mask the value of `KEY=value` arguments whose key names a password.
fn redact_assignment(arg: &str) -> Cow<'_, str> {
    match arg.split_once('=') {
        Some((key, _))
            if !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
                && (key.ends_with("PWD") || key.contains("PASSWORD")) =>
        {
            Cow::Owned(format!("{}={}", key, MASK))
        }
        _ => Cow::Borrowed(arg),
    }
}

/// Captured result of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Something that can execute external commands.
pub trait CommandRunner: Send + Sync {
    /// Run the command, capturing stdout and stderr.
    ///
    /// A non-zero exit status is returned as output, not as an error.
    fn output(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run the command with stdio attached to the terminal.
    fn interactive(&self, spec: &CommandSpec) -> Result<Option<i32>>;

    /// True when commands are printed instead of executed.
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Run the command, failing on a non-zero exit status.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let output = self.output(spec)?;
        if output.success() {
            Ok(output)
        } else {
            Err(Error::CommandFailed {
                command: spec.to_string(),
                code: output.code,
                stderr: output.stderr,
            })
        }
    }

    /// Run attached to the terminal, failing on a non-zero exit status.
    fn run_interactive(&self, spec: &CommandSpec) -> Result<()> {
        match self.interactive(spec)? {
            Some(0) => Ok(()),
            code => Err(Error::CommandFailed {
                command: spec.to_string(),
                code,
                stderr: String::new(),
            }),
        }
    }
}

/// Runs commands on the host.
pub struct SystemRunner {
    is_root: bool,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self { is_root: is_root() }
    }

    fn build(&self, spec: &CommandSpec) -> Command {
        let mut cmd = if spec.privileged && !self.is_root {
            let mut cmd = Command::new("sudo");
            // -E keeps variables such as DEBIAN_FRONTEND set below
            cmd.arg("-E").arg(&spec.program);
            cmd
        } else {
            Command::new(&spec.program)
        };
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd
    }

    fn attach_files(cmd: &mut Command, spec: &CommandSpec) -> Result<()> {
        if let Some(path) = &spec.stdin_file {
            cmd.stdin(Stdio::from(File::open(path)?));
        }
        if let Some(path) = &spec.stdout_file {
            cmd.stdout(Stdio::from(File::create(path)?));
        }
        Ok(())
    }
}

impl CommandRunner for SystemRunner {
    fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Running: {}", spec);
        let mut cmd = self.build(spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Self::attach_files(&mut cmd, spec)?;

        let output = cmd.output().map_err(|e| spawn_error(&spec.program, e))?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn interactive(&self, spec: &CommandSpec) -> Result<Option<i32>> {
        debug!("Running (interactive): {}", spec);
        let mut cmd = self.build(spec);
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        Self::attach_files(&mut cmd, spec)?;

        let status = cmd.status().map_err(|e| spawn_error(&spec.program, e))?;
        Ok(status.code())
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::MissingTool(program.to_string())
    } else {
        Error::IoError(err)
    }
}

/// Prints commands instead of running them.
///
/// Read-only queries still report success with empty output.
#[derive(Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        println!("[dry-run] {}", spec);
        Ok(CommandOutput::ok(""))
    }

    fn interactive(&self, spec: &CommandSpec) -> Result<Option<i32>> {
        println!("[dry-run] {}", spec);
        Ok(Some(0))
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

/// Records every command and answers with scripted outputs.
///
/// Responses are matched by the longest registered argv prefix.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    responses: Mutex<Vec<(Vec<String>, CommandOutput)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands whose argv starts with `prefix` with `output`.
    pub fn respond(&self, prefix: &[&str], output: CommandOutput) {
        let prefix = prefix.iter().map(|s| s.to_string()).collect();
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((prefix, output));
    }

    /// Answer matching commands with a failure.
    pub fn fail(&self, prefix: &[&str], code: i32, stderr: &str) {
        self.respond(
            prefix,
            CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Recorded invocations rendered as command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.argv().join(" ")).collect()
    }

    fn record(&self, spec: &CommandSpec) -> CommandOutput {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(spec.clone());

        let argv = spec.argv();
        let responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        responses
            .iter()
            .filter(|(prefix, _)| argv.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok(""))
    }
}

impl CommandRunner for RecordingRunner {
    fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        Ok(self.record(spec))
    }

    fn interactive(&self, spec: &CommandSpec) -> Result<Option<i32>> {
        Ok(self.record(spec).code)
    }
}

/// Check whether the current process runs as root.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check whether a program is available in PATH.
pub fn tool_available(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Fail with [`Error::MissingTool`] when a program is not in PATH.
pub fn require_tool(program: &str) -> Result<()> {
    if tool_available(program) {
        Ok(())
    } else {
        Err(Error::MissingTool(program.to_string()))
    }
}

/// Write `content` to `dest` with root privileges, going through a temp file
/// next to the YADS home so `sudo install` can copy it into place.
pub fn write_privileged(
    runner: &dyn CommandRunner,
    staging_dir: &Path,
    dest: &Path,
    content: &str,
) -> Result<()> {
    std::fs::create_dir_all(staging_dir)?;
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "staged".to_string());
    let staged = staging_dir.join(file_name);
    std::fs::write(&staged, content)?;

    runner.run(
        &CommandSpec::new("install")
            .args(["-m", "644"])
            .arg(staged.display().to_string())
            .arg(dest.display().to_string())
            .privileged(),
    )?;
    Ok(())
}
