//! Command representation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::CmdStreamError;
use crate::pty::PtySize;
use crate::Result;

/// What to execute: an argument vector or a single shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// Executed directly, no shell involved. `argv[0]` is the executable.
    Argv(Vec<String>),
    /// Executed through `sh -c` (or `cmd /C` on Windows).
    Shell(String),
}

/// A command to be executed locally or on a remote host.
///
/// Environment overrides are additive: the child inherits the caller's
/// environment and these entries replace or extend it.
#[derive(Debug, Clone)]
pub struct Command {
    /// Program and arguments.
    pub program: Program,
    /// Working directory override (if any).
    pub working_dir: Option<PathBuf>,
    /// Environment variables to set.
    pub env: BTreeMap<String, String>,
    /// Bytes written to the command's stdin, which is then closed.
    pub input: Option<Vec<u8>>,
    /// Run under a pseudo-terminal of this size.
    pub pty: Option<PtySize>,
    /// Text shown in prompts and results instead of the real command line.
    pub alias: Option<String>,
    /// Run as this user through `sudo`, unless it is already the user the
    /// command would run as.
    pub user: Option<String>,
}

impl Command {
    /// Create a command from argument tokens.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_program(Program::Argv(args.into_iter().map(Into::into).collect()))
    }

    /// Create a command from a shell string.
    pub fn shell(line: impl Into<String>) -> Self {
        Self::from_program(Program::Shell(line.into()))
    }

    fn from_program(program: Program) -> Self {
        Self {
            program,
            working_dir: None,
            env: BTreeMap::new(),
            input: None,
            pty: None,
            alias: None,
            user: None,
        }
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Provide a stdin payload.
    pub fn input(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.input = Some(data.into());
        self
    }

    /// Run under a pseudo-terminal.
    pub fn pty(mut self, size: PtySize) -> Self {
        self.pty = Some(size);
        self
    }

    /// Set the display alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Run as another user (`sudo -E` for root, `sudo -Eu <user>` otherwise).
    ///
    /// Assumes password-less sudo on the host that runs the command.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Reject commands that cannot be executed.
    pub fn validate(&self) -> Result<()> {
        if let Some(key) = self.env.keys().find(|key| !is_env_name(key)) {
            return Err(CmdStreamError::InvalidCommand(format!(
                "invalid environment variable name '{}'",
                key
            )));
        }
        if let Some(user) = &self.user {
            if user.is_empty() || user.starts_with('-') || user.contains(char::is_whitespace) {
                return Err(CmdStreamError::InvalidCommand(format!("invalid user '{}'", user)));
            }
        }
        match &self.program {
            Program::Argv(argv) => match argv.first() {
                None => Err(CmdStreamError::InvalidCommand("empty argument list".into())),
                Some(program) if program.trim().is_empty() => {
                    Err(CmdStreamError::InvalidCommand("empty program name".into()))
                }
                Some(_) => Ok(()),
            },
            Program::Shell(line) if line.trim().is_empty() => {
                Err(CmdStreamError::InvalidCommand("empty shell command".into()))
            }
            Program::Shell(_) => Ok(()),
        }
    }

    /// Name of the executable that will be spawned locally.
    pub fn program_name(&self) -> &str {
        match &self.program {
            Program::Argv(argv) => argv.first().map(String::as_str).unwrap_or(""),
            Program::Shell(_) => default_shell_program(),
        }
    }

    /// The command as a single line a POSIX shell would execute.
    pub fn shell_line(&self) -> String {
        match &self.program {
            Program::Argv(argv) => shell_words::join(argv),
            Program::Shell(line) => line.clone(),
        }
    }

    /// Line shown in prompts and results: the alias if set, behind the
    /// `sudo` prefix when a user is requested.
    pub fn display(&self) -> String {
        let shown = self.alias.clone().unwrap_or_else(|| self.shell_line());
        match &self.user {
            Some(user) => format!("{} {}", shell_words::join(sudo_prefix(user)), shown),
            None => shown,
        }
    }

    /// The command to spawn when the invoking user is `current`.
    ///
    /// Without a user switch this is a copy of `self`. With one, the program
    /// becomes `sudo -E[u user] K=V... argv` (a shell string runs as
    /// `sh -c line`), so the environment travels through sudo and `env` is
    /// left empty.
    pub fn resolve_user(&self, current: Option<&str>) -> Command {
        let mut resolved = self.clone();
        let user = match resolved.user.take() {
            Some(user) if Some(user.as_str()) != current => user,
            _ => return resolved,
        };

        let mut argv = sudo_prefix(&user);
        argv.extend(
            std::mem::take(&mut resolved.env)
                .into_iter()
                .map(|(key, value)| format!("{}={}", key, value)),
        );
        match &self.program {
            Program::Argv(inner) => argv.extend(inner.iter().cloned()),
            Program::Shell(line) => argv.extend(["sh".to_string(), "-c".to_string(), line.clone()]),
        }
        resolved.program = Program::Argv(argv);
        resolved
    }
}

/// `sudo` invocation that switches to `user`.
pub(crate) fn sudo_prefix(user: &str) -> Vec<String> {
    if user == "root" {
        vec!["sudo".to_string(), "-E".to_string()]
    } else {
        vec!["sudo".to_string(), "-Eu".to_string(), user.to_string()]
    }
}

/// Name of the user running this program, from `USER` or `USERNAME`.
pub fn current_user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|user| !user.is_empty())
}

/// POSIX shell variable name: `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn default_shell_program() -> &'static str {
    if cfg!(windows) {
        "cmd.exe"
    } else {
        "/bin/sh"
    }
}

/// Builder used where argv and shell form are chosen at runtime.
///
/// `build` fails unless exactly one of the two forms was given.
#[derive(Debug, Default)]
pub struct CommandBuilder {
    argv: Option<Vec<String>>,
    shell: Option<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    input: Option<Vec<u8>>,
    pty: Option<PtySize>,
    user: Option<String>,
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn argv<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn shell(mut self, line: impl Into<String>) -> Self {
        self.shell = Some(line.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn input(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.input = Some(data.into());
        self
    }

    pub fn pty(mut self, size: Option<PtySize>) -> Self {
        self.pty = size;
        self
    }

    pub fn user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    /// Build and validate the command.
    pub fn build(self) -> Result<Command> {
        let program = match (self.argv, self.shell) {
            (Some(argv), None) => Program::Argv(argv),
            (None, Some(line)) => Program::Shell(line),
            (Some(_), Some(_)) => {
                return Err(CmdStreamError::InvalidCommand(
                    "argument list and shell string are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(CmdStreamError::InvalidCommand("no command given".into()))
            }
        };

        let command = Command {
            program,
            working_dir: self.working_dir,
            env: self.env,
            input: self.input,
            pty: self.pty,
            alias: None,
            user: self.user,
        };
        command.validate()?;
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_new() {
        let cmd = Command::new(["ls", "-la"]);
        assert_eq!(cmd.program, Program::Argv(vec!["ls".into(), "-la".into()]));
        assert!(cmd.working_dir.is_none());
        assert!(cmd.env.is_empty());
        assert!(cmd.input.is_none());
        assert!(cmd.pty.is_none());
        assert_eq!(cmd.program_name(), "ls");
    }

    #[test]
    fn test_command_builder_chain() {
        let cmd = Command::shell("cargo build")
            .working_dir("/project")
            .env("RUST_LOG", "debug")
            .input("yes\n");

        assert_eq!(cmd.program, Program::Shell("cargo build".into()));
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/project")));
        assert_eq!(cmd.env.get("RUST_LOG"), Some(&"debug".to_string()));
        assert_eq!(cmd.input.as_deref(), Some(&b"yes\n"[..]));
    }

    #[test]
    fn test_command_envs() {
        let cmd = Command::new(["env"]).envs([("KEY1", "val1"), ("KEY2", "val2")]);
        assert_eq!(cmd.env.len(), 2);
        assert_eq!(cmd.env.get("KEY2"), Some(&"val2".to_string()));
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(Command::new(Vec::<String>::new()).validate().is_err());
        assert!(Command::new([""]).validate().is_err());
        assert!(Command::shell("   ").validate().is_err());
        assert!(Command::new(["true"]).validate().is_ok());
        assert!(Command::shell("exit 0").validate().is_ok());
    }

    #[test]
    fn test_shell_line_quotes_arguments() {
        let cmd = Command::new(["echo", "hello world", "it's"]);
        assert_eq!(cmd.shell_line(), "echo 'hello world' 'it'\\''s'");
    }

    #[test]
    fn test_display_prefers_alias() {
        let cmd = Command::new(["mysql", "--password=hunter2"]).alias("mysql --password=***");
        assert_eq!(cmd.display(), "mysql --password=***");
        assert_eq!(cmd.shell_line(), "mysql '--password=hunter2'");
    }

    #[test]
    fn test_validate_rejects_bad_env_names() {
        assert!(Command::new(["true"]).env("X;touch /tmp/x;Y", "v").validate().is_err());
        assert!(Command::new(["true"]).env("1ST", "v").validate().is_err());
        assert!(Command::new(["true"]).env("", "v").validate().is_err());
        assert!(Command::new(["true"]).env("_PATH2", "v").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_user() {
        assert!(Command::new(["true"]).user("").validate().is_err());
        assert!(Command::new(["true"]).user("-s").validate().is_err());
        assert!(Command::new(["true"]).user("app").validate().is_ok());
    }

    #[test]
    fn test_resolve_user_prefixes_sudo() {
        let cmd = Command::new(["id", "-un"]).env("MODE", "fast").user("app");
        let resolved = cmd.resolve_user(Some("ops"));
        assert_eq!(
            resolved.program,
            Program::Argv(vec![
                "sudo".into(),
                "-Eu".into(),
                "app".into(),
                "MODE=fast".into(),
                "id".into(),
                "-un".into()
            ])
        );
        assert!(resolved.env.is_empty());
        assert!(resolved.user.is_none());
        assert_eq!(cmd.display(), "sudo -Eu app id -un");
    }

    #[test]
    fn test_resolve_user_root_and_shell_form() {
        let resolved = Command::shell("whoami > /tmp/who").user("root").resolve_user(None);
        assert_eq!(resolved.shell_line(), "sudo -E sh -c 'whoami > /tmp/who'");
    }

    #[test]
    fn test_resolve_same_user_is_unchanged() {
        let cmd = Command::new(["make"]).env("J", "4").user("ops");
        let resolved = cmd.resolve_user(Some("ops"));
        assert_eq!(resolved.program, cmd.program);
        assert_eq!(resolved.env, cmd.env);
        assert!(resolved.user.is_none());
    }

    #[test]
    fn test_alias_keeps_sudo_prefix() {
        let cmd = Command::new(["psql", "-W", "secret"]).alias("psql").user("postgres");
        assert_eq!(cmd.display(), "sudo -Eu postgres psql");
    }

    #[test]
    fn test_builder_requires_exactly_one_form() {
        assert!(CommandBuilder::new().build().is_err());
        assert!(CommandBuilder::new()
            .argv(["ls"])
            .shell("ls")
            .build()
            .is_err());

        let cmd = CommandBuilder::new()
            .shell("pwd")
            .working_dir("/tmp")
            .build()
            .unwrap();
        assert_eq!(cmd.program, Program::Shell("pwd".into()));
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_builder_validates() {
        assert!(CommandBuilder::new().argv(Vec::<String>::new()).build().is_err());
    }
}
