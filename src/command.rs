use core::fmt;
use std::{
    borrow::Cow,
    ffi::{OsStr, OsString},
    fmt::{Debug, Display},
    process::{ExitStatus, Stdio},
    str::Utf8Error,
};

use stacked_errors::{bail_locationless, Result, StackableErr};

/// An OS command for the external tools we drive (`git`, `docker-machine`),
/// a thin wrapper around `tokio::process::Command`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Command {
    /// The program to run.
    pub program: OsString,
    /// All the arguments that will be passed to the program
    pub args: Vec<OsString>,
    /// Forward stdout and stderr to the current process instead of recording
    /// them. This is for tools whose progress output is meant for the
    /// operator.
    pub debug: bool,
}

impl Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "Command {{ program: {:?},",
            self.get_unified_command()
        ))?;
        if self.debug {
            f.write_fmt(format_args!(" debug: true,"))?;
        }
        f.write_fmt(format_args!(" }}"))
    }
}

impl Command {
    /// Creates a `Command` that only sets the `program` and `args`.
    /// `program_with_args` is separated by whitespace, the first part becomes
    /// the program, and the others are inserted as args.
    ///
    /// In case an argument has spaces, it should be put in with
    /// [Command::arg].
    pub fn new(program_with_args: impl AsRef<str>) -> Self {
        let mut program = String::new();
        let mut args: Vec<OsString> = vec![];
        for (i, part) in program_with_args.as_ref().split_whitespace().enumerate() {
            if i == 0 {
                part.clone_into(&mut program)
            } else {
                args.push(part.into());
            }
        }
        Self {
            program: program.into(),
            args,
            ..Default::default()
        }
    }

    /// Adds an argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().into());
        self
    }

    /// Adds arguments to be passed to the program
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().into()));
        self
    }

    /// Sets `debug`
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Gets the program and args interspersed with spaces
    pub fn get_unified_command(&self) -> String {
        let mut command = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            command += " ";
            command += arg.to_string_lossy().as_ref();
        }
        command
    }

    /// Runs the command and waits for it to complete, returning the command
    /// result. Only failure to launch is an error, check the status with
    /// [CommandResult::assert_success].
    #[tracing::instrument(skip_all, fields(command = %self.get_unified_command()))]
    pub async fn run_to_completion(self) -> Result<CommandResult> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if self.debug {
            let status = cmd
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await
                .stack_err_with(|| format!("{self:?}.run_to_completion() -> failed to spawn"))?;
            Ok(CommandResult {
                command: self,
                status: Some(status),
                stdout: vec![],
                stderr: vec![],
            })
        } else {
            let output = cmd
                .output()
                .await
                .stack_err_with(|| format!("{self:?}.run_to_completion() -> failed to spawn"))?;
            Ok(CommandResult {
                command: self,
                status: Some(output.status),
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

/// The result of a [Command](crate::Command)
#[must_use]
#[derive(Clone, Default)]
pub struct CommandResult {
    // the command information is kept around for failures
    pub command: Command,
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Debug for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "CommandResult {{\ncommand: {:?},\nstatus: {:?},\n",
            self.command, self.status
        ))?;
        // move the commas out of the way of the stdout and stderr
        let stdout = self.stdout_as_utf8_lossy();
        if !stdout.is_empty() {
            f.write_fmt(format_args!("stdout: {}\n,", stdout))?;
        }
        let stderr = self.stderr_as_utf8_lossy();
        if !stderr.is_empty() {
            f.write_fmt(format_args!("stderr: {}\n,", stderr))?;
        }
        f.write_fmt(format_args!("}}"))
    }
}

impl Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:#?}", self))
    }
}

impl CommandResult {
    /// Returns if the command completed with a successful return status
    pub fn successful(&self) -> bool {
        self.status.as_ref().is_some_and(ExitStatus::success)
    }

    /// Returns a formatted error with relevant information if the command was
    /// not successful
    pub fn assert_success(&self) -> Result<()> {
        if self.successful() {
            Ok(())
        } else {
            bail_locationless!("{self:#?}.assert_success() -> unsuccessful")
        }
    }

    /// Returns `str::from_utf8(&self.stdout)`
    pub fn stdout_as_utf8(&self) -> std::result::Result<&str, Utf8Error> {
        std::str::from_utf8(&self.stdout)
    }

    /// Returns `String::from_utf8_lossy(&self.stdout)`
    pub fn stdout_as_utf8_lossy(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Returns `String::from_utf8_lossy(&self.stderr)`
    pub fn stderr_as_utf8_lossy(&self) -> Cow<str> {
        String::from_utf8_lossy(&self.stderr)
    }
}
