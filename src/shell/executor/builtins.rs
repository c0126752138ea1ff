use std::env;
use std::os::fd::{BorrowedFd, RawFd};

use log::debug;

use super::variable::{is_identifier, Environment};
use crate::shell::error::BuiltinError;
use crate::shell::parser::ast::CommandNode;

/// Commands that run inside the interpreter instead of a child process.
pub trait Builtins {
    fn is_builtin(&self, name: &str) -> bool;
    /// Runs the builtin and returns its exit status.
    fn run(&mut self, command: &CommandNode, env: &mut dyn Environment) -> i32;
}

pub const BUILTINS: [&str; 5] = ["cd", "exit", "export", "unset", "pwd"];

/// Held by tests that change or read the process working directory.
#[cfg(test)]
pub(crate) static CWD_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[derive(Debug, Default, Clone, Copy)]
pub struct ShellBuiltins;

impl ShellBuiltins {
    pub fn new() -> Self {
        Self
    }

    fn dispatch(&self, command: &CommandNode, env: &mut dyn Environment) -> Result<(), BuiltinError> {
        match command.program() {
            "cd" => builtin_cd(command, env),
            "exit" => builtin_exit(command),
            "export" => builtin_export(command, env),
            "unset" => builtin_unset(command, env),
            "pwd" => builtin_pwd(command),
            other => Err(BuiltinError::Unknown(other.to_string())),
        }
    }
}

impl Builtins for ShellBuiltins {
    fn is_builtin(&self, name: &str) -> bool {
        BUILTINS.contains(&name)
    }

    fn run(&mut self, command: &CommandNode, env: &mut dyn Environment) -> i32 {
        match self.dispatch(command, env) {
            Ok(()) => 0,
            Err(e) => {
                debug!("builtin {} failed: {}", command.display(), e);
                let _ = write_fd(command.stderr_fd, &format!("{}\n", e));
                1
            }
        }
    }
}

fn write_fd(fd: RawFd, text: &str) -> Result<(), BuiltinError> {
    // SAFETY: the slot holds a descriptor that stays open for the whole call.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut bytes = text.as_bytes();
    while !bytes.is_empty() {
        match nix::unistd::write(fd, bytes) {
            Ok(0) => break,
            Ok(n) => bytes = &bytes[n..],
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(BuiltinError::Io("write".to_string(), e.into())),
        }
    }
    Ok(())
}

fn builtin_cd(command: &CommandNode, env: &mut dyn Environment) -> Result<(), BuiltinError> {
    let target = match command.argv.get(1) {
        Some(dir) => dir.clone(),
        None => env
            .get("HOME")
            .ok_or_else(|| BuiltinError::Usage("cd: HOME not set".to_string()))?,
    };
    let path = shellexpand::tilde(&target);
    let previous = env::current_dir().ok();

    env::set_current_dir(path.as_ref())
        .map_err(|e| BuiltinError::Io(format!("cd: {}", path), e))?;

    if let Some(previous) = previous {
        env.set("OLDPWD", &previous.to_string_lossy());
    }
    if let Ok(current) = env::current_dir() {
        env.set("PWD", &current.to_string_lossy());
    }
    Ok(())
}

fn exit_status(command: &CommandNode) -> Result<i32, BuiltinError> {
    match command.argv.get(1) {
        None => Ok(0),
        Some(arg) => arg
            .parse::<i64>()
            .map(|code| (code & 0xFF) as i32)
            .map_err(|_| BuiltinError::Usage(format!("exit: {}: numeric argument required", arg))),
    }
}

fn builtin_exit(command: &CommandNode) -> Result<(), BuiltinError> {
    let code = exit_status(command)?;
    debug!("exit {}", code);
    std::process::exit(code);
}

fn builtin_export(command: &CommandNode, env: &mut dyn Environment) -> Result<(), BuiltinError> {
    if command.argv.len() < 2 {
        let listing: String = env
            .vars()
            .into_iter()
            .map(|(name, value)| format!("{}={}\n", name, value))
            .collect();
        return write_fd(command.stdout_fd, &listing);
    }

    for arg in &command.argv[1..] {
        let (name, value) = arg
            .split_once('=')
            .ok_or_else(|| BuiltinError::Usage(format!("export: {}: expected NAME=value", arg)))?;
        if !is_identifier(name) {
            return Err(BuiltinError::Usage(format!(
                "export: {}: not a valid identifier",
                name
            )));
        }
        env.set(name, value);
    }
    Ok(())
}

fn builtin_unset(command: &CommandNode, env: &mut dyn Environment) -> Result<(), BuiltinError> {
    let mut result = Ok(());
    for name in &command.argv[1..] {
        if is_identifier(name) {
            env.unset(name);
        } else {
            result = Err(BuiltinError::Usage(format!(
                "unset: {}: not a valid identifier",
                name
            )));
        }
    }
    result
}

fn builtin_pwd(command: &CommandNode) -> Result<(), BuiltinError> {
    let cwd = env::current_dir().map_err(|e| BuiltinError::Io("pwd".to_string(), e))?;
    write_fd(command.stdout_fd, &format!("{}\n", cwd.display()))
}
