use std::ffi::{CStr, CString};
use std::os::fd::RawFd;

use chrono::Local;
use log::{debug, error};
use nix::errno::Errno;
use nix::sys::wait::waitpid;
use nix::unistd::{close, dup, dup2, execvp, fork, ForkResult, Pid};

use super::builtins::Builtins;
use super::variable::Environment;
use crate::shell::error::LaunchError;
use crate::shell::job_manager::exit_code;
use crate::shell::parser::ast::{CommandNode, STDERR_FD};
use crate::shell::parser::resources::ResourceTracker;
use crate::shell::signals;

/// Status of a child whose program could not be executed.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Status recorded when no process could be created at all.
pub const LAUNCH_FAILED: i32 = -1;

/// Runs one command: builtins in-process, anything else through fork/exec.
///
/// Foreground children are waited for. Background children and pipeline
/// producers are left running; the caller waits for producers later with
/// [`wait`].
pub fn launch(
    command: &mut CommandNode,
    resources: &mut ResourceTracker,
    builtins: &mut dyn Builtins,
    env: &mut dyn Environment,
) -> Result<(), LaunchError> {
    if builtins.is_builtin(command.program()) {
        debug!("builtin: {}", command.display());
        command.start_time = Some(Local::now());
        command.status = builtins.run(command, env);
        command.end_time = Some(Local::now());
        release_io(command, resources);
        return Ok(());
    }

    spawn(command, resources)?;
    if command.background {
        command.status = 0;
        return Ok(());
    }
    if command.piped {
        return Ok(());
    }
    wait(command)
}

/// Forks a child running `command`. The parent keeps the pid and gives up its
/// copies of the redirection descriptors.
pub fn spawn(command: &mut CommandNode, resources: &mut ResourceTracker) -> Result<(), LaunchError> {
    let program = CString::new(command.program())
        .map_err(|_| LaunchError::NulByte(command.program().to_string()))?;
    let args = command
        .argv
        .iter()
        .map(|arg| CString::new(arg.as_str()).map_err(|_| LaunchError::NulByte(arg.clone())))
        .collect::<Result<Vec<_>, _>>()?;

    command.start_time = Some(Local::now());
    debug!("launching: {} {:?}", command.display(), command.io());

    // SAFETY: the child only calls async-signal-safe functions (dup2, close,
    // sigaction, execvp, _exit) apart from the diagnostic written on failure.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => exec_child(&program, &args, command.io(), resources.fds()),
        Ok(ForkResult::Parent { child }) => {
            debug!("{} started as pid {}", command.display(), child);
            command.pid = Some(child);
            release_io(command, resources);
            Ok(())
        }
        Err(e) => {
            error!("fork failed for {}: {}", command.display(), e);
            command.status = LAUNCH_FAILED;
            release_io(command, resources);
            Err(LaunchError::Fork(e))
        }
    }
}

/// Blocks until the child of `command` exits and records its status.
/// A command without a child (builtin, never launched) is left untouched.
pub fn wait(command: &mut CommandNode) -> Result<(), LaunchError> {
    let Some(pid) = command.pid else {
        return Ok(());
    };
    command.status = wait_for(pid)?;
    command.end_time = Some(Local::now());
    debug!(
        "pid {} ({}) exited with {} after {:?}",
        pid,
        command.display(),
        command.status,
        command.elapsed()
    );
    Ok(())
}

fn wait_for(pid: Pid) -> Result<i32, LaunchError> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(code) = exit_code(status) {
                    return Ok(code);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(LaunchError::Wait(e)),
        }
    }
}

/// Closes the parent's copies of the non-standard slots and resets them.
pub fn release_io(command: &mut CommandNode, resources: &mut ResourceTracker) {
    for fd in command.io() {
        if fd > STDERR_FD {
            resources.release(fd);
        }
    }
    command.reset_io();
}

/// Installs the three slots on 0/1/2. A slot naming another standard
/// descriptor is copied aside first so `2>&1 > file` still reaches the old stdout.
fn redirect_io(io: [RawFd; 3]) -> nix::Result<()> {
    let mut sources = io;
    let mut copies: [Option<RawFd>; 3] = [None; 3];
    for (target, source) in sources.iter_mut().enumerate() {
        if *source <= STDERR_FD && *source != target as RawFd {
            let copy = dup(*source)?;
            copies[target] = Some(copy);
            *source = copy;
        }
    }
    for (target, &source) in sources.iter().enumerate() {
        if source != target as RawFd {
            dup2(source, target as RawFd)?;
        }
    }
    for fd in copies.into_iter().flatten() {
        let _ = close(fd);
    }
    Ok(())
}

fn exec_child(program: &CStr, args: &[CString], io: [RawFd; 3], tracked: &[RawFd]) -> ! {
    signals::restore_default_signals();
    if let Err(e) = redirect_io(io) {
        eprintln!("{}: redirection failed: {}", program.to_string_lossy(), e);
        // SAFETY: terminate the forked child without running parent cleanup.
        unsafe { libc::_exit(1) }
    }
    for &fd in tracked {
        if fd > STDERR_FD {
            let _ = close(fd);
        }
    }

    let e = match execvp(program, args) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    match e {
        Errno::ENOENT => eprintln!("{}: command not found", program.to_string_lossy()),
        e => eprintln!("{}: {}", program.to_string_lossy(), e.desc()),
    }
    // SAFETY: as above; the image was not replaced.
    unsafe { libc::_exit(EXIT_NOT_FOUND) }
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File, OpenOptions};
    use std::os::fd::{AsRawFd, IntoRawFd};

    use super::*;
    use crate::shell::executor::builtins::{ShellBuiltins, CWD_LOCK};
    use crate::shell::executor::variable::MapEnv;
    use crate::shell::parser::ast::{STDIN_FD, STDOUT_FD};

    fn command(argv: &[&str]) -> CommandNode {
        let mut node = CommandNode::new(0);
        for arg in argv {
            let _ = node.push_arg(arg.to_string());
        }
        node
    }

    fn run(node: &mut CommandNode, resources: &mut ResourceTracker) -> Result<(), LaunchError> {
        launch(node, resources, &mut ShellBuiltins::new(), &mut MapEnv::new())
    }

    #[allow(clippy::unwrap_used)]
    fn devnull() -> RawFd {
        OpenOptions::new()
            .write(true)
            .open("/dev/null")
            .unwrap()
            .into_raw_fd()
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_simple_command_records_status_and_time() {
        let mut resources = ResourceTracker::new();
        let mut node = command(&["true"]);
        run(&mut node, &mut resources).unwrap();
        assert_eq!(node.status, 0);
        assert!(node.pid.is_some());
        assert!(node.start_time.is_some());
        assert!(node.end_time.is_some());
        assert!(node.elapsed().unwrap() >= chrono::Duration::zero());

        let mut node = command(&["false"]);
        run(&mut node, &mut resources).unwrap();
        assert_eq!(node.status, 1);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_missing_program_exits_127() {
        let mut resources = ResourceTracker::new();
        let mut node = command(&["definitely_not_a_command_12345"]);
        let fd = devnull();
        resources.add(fd).unwrap();
        node.stderr_fd = fd;
        run(&mut node, &mut resources).unwrap();
        assert_eq!(node.status, EXIT_NOT_FOUND);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_redirected_stdout_is_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let file = File::create(&path).unwrap().into_raw_fd();

        let mut resources = ResourceTracker::new();
        resources.add(file).unwrap();
        let mut node = command(&["echo", "HelloPipe"]);
        node.stdout_fd = file;
        run(&mut node, &mut resources).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "HelloPipe\n");
        assert!(resources.is_empty());
        assert_eq!(node.stdout_fd, STDOUT_FD);
        assert_eq!(node.stdin_fd, STDIN_FD);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_stderr_follows_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("both.txt");
        let file = File::create(&path).unwrap().into_raw_fd();

        let mut resources = ResourceTracker::new();
        resources.add(file).unwrap();
        let mut node = command(&["sh", "-c", "echo out; echo err >&2"]);
        node.stdout_fd = file;
        node.stderr_fd = file;
        run(&mut node, &mut resources).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "out\nerr\n");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_signal_status() {
        let mut resources = ResourceTracker::new();
        let mut node = command(&["sh", "-c", "kill -TERM $$"]);
        run(&mut node, &mut resources).unwrap();
        assert_eq!(node.status, 128 + 15);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_sleep_timing() {
        let mut resources = ResourceTracker::new();
        let mut node = command(&["sleep", "1"]);
        run(&mut node, &mut resources).unwrap();
        let elapsed = node.elapsed().unwrap();
        assert!(elapsed >= chrono::Duration::milliseconds(950));
        assert!(elapsed < chrono::Duration::seconds(5));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_background_does_not_wait() {
        let mut resources = ResourceTracker::new();
        let mut node = command(&["sleep", "5"]);
        node.background = true;
        let started = std::time::Instant::now();
        run(&mut node, &mut resources).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(node.status, 0);
        assert!(node.end_time.is_none());

        let pid = node.pid.unwrap();
        nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL).unwrap();
        assert_eq!(wait_for(pid).unwrap(), 128 + 9);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_builtin_runs_in_process() {
        let _cwd = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pwd.txt");
        let file = File::create(&path).unwrap();

        let mut resources = ResourceTracker::new();
        let mut node = command(&["pwd"]);
        node.stdout_fd = file.as_raw_fd();
        run(&mut node, &mut resources).unwrap();
        assert_eq!(node.status, 0);
        assert!(node.pid.is_none());
        drop(file);

        let cwd = std::env::current_dir().unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written.trim_end(), cwd.display().to_string());
    }

    #[test]
    fn test_nul_byte_is_rejected() {
        let mut resources = ResourceTracker::new();
        let mut node = command(&["echo", "a\0b"]);
        assert!(matches!(
            run(&mut node, &mut resources),
            Err(LaunchError::NulByte(_))
        ));
    }
}
