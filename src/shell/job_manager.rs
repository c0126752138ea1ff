use std::fmt;

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Exit code of a finished child: its own code, or `128 + signal` when killed.
/// `None` while the child is still running or merely stopped/continued.
pub fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _core_dumped) => Some(128 + signal as i32),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done(i32),
    Killed(i32),
}

#[derive(Debug, Clone)]
pub struct Job {
    pub pid: Pid,
    pub index: usize,
    pub command: String,
    pub status: JobStatus,
    pub is_current: bool,
    pub is_previous: bool,
}

impl Job {
    fn new(pid: Pid, index: usize, command: String) -> Self {
        Self {
            pid,
            index,
            command,
            status: JobStatus::Running,
            is_current: false,
            is_previous: false,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            JobStatus::Running => "running".to_string(),
            JobStatus::Done(0) => "done".to_string(),
            JobStatus::Done(code) => format!("exit {}", code),
            JobStatus::Killed(code) => format!("killed ({})", code - 128),
        };
        let mark = if self.is_current {
            "+"
        } else if self.is_previous {
            "-"
        } else {
            " "
        };
        write!(
            f,
            "[{}]{} {} {} {}",
            self.index, mark, status, self.pid, self.command
        )
    }
}

/// Background children started with `&`, reaped without blocking.
#[derive(Debug, Default)]
pub struct JobManager {
    jobs: Vec<Job>,
}

impl JobManager {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    fn find_available_index(&self) -> usize {
        let mut index = 1;
        while self.jobs.iter().any(|job| job.index == index) {
            index += 1;
        }
        index
    }

    pub fn add_job(&mut self, pid: Pid, command: String) -> usize {
        let index = self.find_available_index();
        for job in self.jobs.iter_mut() {
            job.is_previous = job.is_current;
            job.is_current = false;
        }

        let mut job = Job::new(pid, index, command);
        job.is_current = true;
        debug!("background job [{}] pid {}", index, pid);
        self.jobs.push(job);
        index
    }

    fn remove_job(&mut self, pid: Pid) -> Option<Job> {
        let pos = self.jobs.iter().position(|job| job.pid == pid)?;
        let job = self.jobs.remove(pos);

        if job.is_current && !self.jobs.is_empty() {
            if let Some(prev_job) = self.jobs.iter_mut().find(|job| job.is_previous) {
                prev_job.is_current = true;
                prev_job.is_previous = false;
            } else {
                let last_idx = self.jobs.len() - 1;
                self.jobs[last_idx].is_current = true;
            }
        }
        Some(job)
    }

    /// Collects every finished job, leaving running ones in the table.
    pub fn reap(&mut self) -> Vec<Job> {
        let pids: Vec<Pid> = self.jobs.iter().map(|job| job.pid).collect();
        let mut finished = Vec::new();

        for pid in pids {
            let status = match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => continue,
                Ok(status) => match (status, exit_code(status)) {
                    (WaitStatus::Signaled(..), Some(code)) => JobStatus::Killed(code),
                    (_, Some(code)) => JobStatus::Done(code),
                    (_, None) => continue,
                },
                Err(Errno::ECHILD) => {
                    warn!("job pid {} was reaped elsewhere", pid);
                    JobStatus::Done(0)
                }
                Err(e) => {
                    warn!("waitpid({}) failed: {}", pid, e);
                    continue;
                }
            };
            if let Some(mut job) = self.remove_job(pid) {
                job.status = status;
                finished.push(job);
            }
        }
        finished
    }
}
