use log::{debug, warn};

use super::builtins::{Builtins, ShellBuiltins};
use super::process;
use super::variable::{Environment, ProcessEnv};
use crate::shell::error::LaunchError;
use crate::shell::job_manager::{Job, JobManager};
use crate::shell::parser::ast::CommandLine;

/// Runs parsed command lines and owns the state that outlives a single line.
pub struct Executor {
    env: Box<dyn Environment>,
    builtins: Box<dyn Builtins>,
    jobs: JobManager,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::with(Box::new(ProcessEnv), Box::new(ShellBuiltins::new()))
    }

    pub fn with(env: Box<dyn Environment>, builtins: Box<dyn Builtins>) -> Self {
        Self {
            env,
            builtins,
            jobs: JobManager::new(),
        }
    }

    pub fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    pub fn env_mut(&mut self) -> &mut dyn Environment {
        self.env.as_mut()
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Finished background jobs, removed from the table.
    pub fn reap_jobs(&mut self) -> Vec<Job> {
        self.jobs.reap()
    }

    /// Walks the graph from its root and returns the recorded status of the
    /// last command that ran. Every tracked descriptor is closed afterwards,
    /// whether or not the walk completed.
    pub fn execute(&mut self, line: &mut CommandLine) -> Result<i32, LaunchError> {
        let mut pending = Vec::new();
        let result = self.walk(line, &mut pending);
        line.resources_mut().close_all();

        if result.is_err() {
            // Producers lose their readers with the sweep above and exit on SIGPIPE.
            for index in pending {
                if let Some(command) = line.command_mut(index) {
                    if let Err(e) = process::wait(command) {
                        warn!("cannot collect {}: {}", command.display(), e);
                    }
                }
            }
        }
        result
    }

    fn walk(&mut self, line: &mut CommandLine, pending: &mut Vec<usize>) -> Result<i32, LaunchError> {
        let mut current = if line.is_empty() { None } else { Some(0) };
        let mut status = 0;

        while let Some(index) = current {
            let Some((command, resources)) = line.command_and_resources(index) else {
                break;
            };

            if command.is_empty() {
                debug!("skipping empty command {}", index);
                process::release_io(command, resources);
                command.status = 0;
            } else {
                process::launch(command, resources, self.builtins.as_mut(), self.env.as_mut())?;
                if command.background {
                    if let Some(pid) = command.pid {
                        self.jobs.add_job(pid, command.display());
                    }
                }
            }

            let (piped, background, flow_status) =
                (command.piped, command.background, command.flow_status());
            status = command.status;

            if piped {
                pending.push(index);
            } else if !pending.is_empty() {
                self.finish_pipeline(line, pending, background)?;
            }

            current = line.control(index).and_then(|control| control.next(flow_status));
            debug!("command {} -> status {} -> next {:?}", index, status, current);
        }

        if !pending.is_empty() {
            self.finish_pipeline(line, pending, false)?;
        }
        Ok(status)
    }

    /// Collects the producers feeding the stage that just ran. A backgrounded
    /// pipeline leaves them running as jobs instead.
    fn finish_pipeline(
        &mut self,
        line: &mut CommandLine,
        pending: &mut Vec<usize>,
        background: bool,
    ) -> Result<(), LaunchError> {
        for index in pending.drain(..) {
            let Some(command) = line.command_mut(index) else {
                continue;
            };
            if background {
                command.background = true;
                if let Some(pid) = command.pid {
                    self.jobs.add_job(pid, command.display());
                }
            } else {
                process::wait(command)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::shell::executor::variable::MapEnv;

    fn executor() -> Executor {
        Executor::with(Box::new(MapEnv::new()), Box::new(ShellBuiltins::new()))
    }

    #[allow(clippy::unwrap_used)]
    fn run(executor: &mut Executor, input: &str) -> (CommandLine, i32) {
        let mut line = CommandLine::new();
        line.parse(input, executor.env()).unwrap();
        let status = executor.execute(&mut line).unwrap();
        (line, status)
    }

    fn ran(line: &CommandLine, index: usize) -> bool {
        line.command(index)
            .map(|c| c.start_time.is_some())
            .unwrap_or(false)
    }

    #[test]
    fn test_and_skips_after_failure() {
        let (line, status) = run(&mut executor(), "false && true");
        assert!(ran(&line, 0));
        assert!(!ran(&line, 1));
        assert_eq!(status, 1);
    }

    #[test]
    fn test_or_runs_after_failure() {
        let (line, status) = run(&mut executor(), "false || true");
        assert!(ran(&line, 1));
        assert_eq!(status, 0);

        let (line, _) = run(&mut executor(), "true || false");
        assert!(!ran(&line, 1));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_negation_flips_edge_not_status() {
        let (line, status) = run(&mut executor(), "! false && true");
        assert!(ran(&line, 1));
        assert_eq!(line.command(0).unwrap().status, 1);
        assert_eq!(status, 0);

        let (line, _) = run(&mut executor(), "! true && false");
        assert!(!ran(&line, 1));
    }

    #[test]
    fn test_sequence_is_unconditional() {
        let (line, status) = run(&mut executor(), "true ; true");
        assert!(ran(&line, 0) && ran(&line, 1));
        assert_eq!(status, 0);

        let (line, status) = run(&mut executor(), "false ; false ; true");
        assert!(ran(&line, 2));
        assert_eq!(status, 0);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_pipeline_closes_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count.txt");
        let input = format!("printf 'a\\nb\\nc\\n' | wc -l > {}", path.display());

        let (line, status) = run(&mut executor(), &input);
        assert_eq!(status, 0);
        assert!(line.resources().is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "3");
        assert_eq!(line.command(0).unwrap().status, 0);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_pipeline_larger_than_pipe_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bytes.txt");
        let input = format!(
            "head -c 1000000 /dev/zero | cat | wc -c > {}",
            path.display()
        );
        let (_, status) = run(&mut executor(), &input);
        assert_eq!(status, 0);
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "1000000");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_producer_dies_of_sigpipe() {
        let dir = tempfile::tempdir().unwrap();
        let err = dir.path().join("yes.err");
        let input = format!("yes 2> {} | head -1 > /dev/null", err.display());

        let (line, status) = run(&mut executor(), &input);
        assert_eq!(status, 0);
        assert_eq!(line.command(0).unwrap().status, 128 + 13);
        assert_eq!(fs::read_to_string(&err).unwrap(), "");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_background_does_not_block() {
        let mut executor = executor();
        let started = Instant::now();
        let (line, status) = run(&mut executor, "sleep 5 &");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(status, 0);
        assert!(line.command(0).unwrap().background);
        assert_eq!(executor.jobs().jobs().len(), 1);

        let pid = executor.jobs().jobs()[0].pid;
        let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !executor.jobs().jobs().is_empty() && Instant::now() < deadline {
            executor.reap_jobs();
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(executor.jobs().jobs().is_empty());
    }

    #[test]
    fn test_missing_program_continues_walk() {
        let (line, status) = run(
            &mut executor(),
            "definitely_not_a_command_12345 2> /dev/null || true",
        );
        assert_eq!(line.command(0).map(|c| c.status), Some(127));
        assert!(ran(&line, 1));
        assert_eq!(status, 0);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_builtins_share_environment() {
        let mut executor = executor();
        run(&mut executor, "export GREETING=hello");
        assert_eq!(executor.env().get("GREETING").as_deref(), Some("hello"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.txt");
        let input = format!("echo $GREETING > {}", path.display());
        run(&mut executor, &input);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_launch_error_still_closes_descriptors() {
        let mut executor = executor();
        let mut line = CommandLine::new();
        line.parse("echo a | cat", executor.env()).unwrap();
        line.command_mut(1).unwrap().argv[0] = "ca\0t".to_string();
        line.command_mut(1).unwrap().path = Some("ca\0t".to_string());

        let result = executor.execute(&mut line);
        assert!(matches!(result, Err(LaunchError::NulByte(_))));
        assert!(line.resources().is_empty());
    }

    #[test]
    fn test_empty_line_succeeds() {
        let (line, status) = run(&mut executor(), "");
        assert!(line.is_empty());
        assert_eq!(status, 0);
    }
}
