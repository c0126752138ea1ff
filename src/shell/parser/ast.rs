use std::os::fd::RawFd;

use chrono::{DateTime, Duration, Local};
use log::debug;
use nix::unistd::Pid;

use super::lexer::{lex, MAX_CMD_LINE};
use super::parser::Parser;
use super::resources::ResourceTracker;
use crate::shell::error::ParseError;
use crate::shell::executor::variable::Environment;

/// Arguments per command, sentinel slot included.
pub const MAX_ARGS: usize = 128;
/// Commands per line.
pub const MAX_CMDS: usize = 128;

pub const STDIN_FD: RawFd = 0;
pub const STDOUT_FD: RawFd = 1;
pub const STDERR_FD: RawFd = 2;

/// Which edge links a command to the one created before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    Unconditional,
    OnSuccess,
    OnFailure,
}

/// One pipeline stage.
#[derive(Debug, Clone)]
pub struct CommandNode {
    /// Position in the owning command line; also the index of its control node.
    pub index: usize,
    pub pid: Option<Pid>,
    pub argv: Vec<String>,
    pub path: Option<String>,
    pub stdin_fd: RawFd,
    pub stdout_fd: RawFd,
    pub stderr_fd: RawFd,
    pub status: i32,
    pub background: bool,
    /// `!`: flips the edge decision, never the recorded status.
    pub invert: bool,
    /// stdout feeds the next stage through a pipe.
    pub piped: bool,
    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,
}

impl CommandNode {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            pid: None,
            argv: Vec::new(),
            path: None,
            stdin_fd: STDIN_FD,
            stdout_fd: STDOUT_FD,
            stderr_fd: STDERR_FD,
            status: 0,
            background: false,
            invert: false,
            piped: false,
            start_time: None,
            end_time: None,
        }
    }

    /// The executable to run: the explicit path, else the first argument.
    pub fn program(&self) -> &str {
        self.path
            .as_deref()
            .or_else(|| self.argv.first().map(String::as_str))
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.program().is_empty()
    }

    pub fn push_arg(&mut self, arg: String) -> Result<(), ParseError> {
        if self.argv.len() >= MAX_ARGS - 1 {
            return Err(ParseError::TooManyArguments(MAX_ARGS - 1));
        }
        if self.argv.is_empty() {
            self.path = Some(arg.clone());
        }
        self.argv.push(arg);
        Ok(())
    }

    pub fn reset_io(&mut self) {
        self.stdin_fd = STDIN_FD;
        self.stdout_fd = STDOUT_FD;
        self.stderr_fd = STDERR_FD;
    }

    pub fn io(&self) -> [RawFd; 3] {
        [self.stdin_fd, self.stdout_fd, self.stderr_fd]
    }

    /// Status used to pick the outgoing edge.
    pub fn flow_status(&self) -> i32 {
        match (self.invert, self.status) {
            (false, status) => status,
            (true, 0) => 1,
            (true, _) => 0,
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        Some(self.end_time? - self.start_time?)
    }

    /// The argument vector quoted back into one line, for messages and logs.
    pub fn display(&self) -> String {
        shell_words::join(&self.argv)
    }
}

/// Successor edges of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlNode {
    pub command: usize,
    pub unconditional: Option<usize>,
    pub on_success: Option<usize>,
    pub on_failure: Option<usize>,
}

impl ControlNode {
    pub fn new(command: usize) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    pub fn link(&mut self, mode: FlowMode, next: usize) {
        match mode {
            FlowMode::Unconditional => self.unconditional = Some(next),
            FlowMode::OnSuccess => self.on_success = Some(next),
            FlowMode::OnFailure => self.on_failure = Some(next),
        }
    }

    /// Next command given the (possibly inverted) status of this one.
    pub fn next(&self, status: i32) -> Option<usize> {
        if self.unconditional.is_some() {
            return self.unconditional;
        }
        if status == 0 {
            self.on_success
        } else {
            self.on_failure
        }
    }
}

/// One input line turned into a graph of commands.
///
/// Commands and control nodes are index-parallel arenas; every edge is an index.
#[derive(Debug, Default)]
pub struct CommandLine {
    buffer: String,
    commands: Vec<CommandNode>,
    flow: Vec<ControlNode>,
    resources: ResourceTracker,
}

impl CommandLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes every tracked descriptor and forgets the previous graph.
    pub fn reset(&mut self) {
        self.resources.close_all();
        self.buffer.clear();
        self.commands.clear();
        self.flow.clear();
    }

    /// Builds the graph for `line`. On failure nothing is left runnable and
    /// every descriptor opened so far is closed.
    pub fn parse(&mut self, line: &str, env: &dyn Environment) -> Result<(), ParseError> {
        self.reset();
        let mut buffer = String::from(line);
        let result = self.build(&mut buffer, env);
        self.buffer = buffer;

        if let Err(e) = result {
            debug!("parse failed: {}", e);
            self.resources.close_all();
            self.commands.clear();
            self.flow.clear();
            return Err(e);
        }
        debug!(
            "parsed {:?} into {} command(s), {} descriptor(s)",
            self.buffer,
            self.commands.len(),
            self.resources.len()
        );
        Ok(())
    }

    fn build(&mut self, buffer: &mut String, env: &dyn Environment) -> Result<(), ParseError> {
        let tokens = lex(buffer, env, MAX_CMD_LINE)?;
        Parser::new(self, tokens).parse()
    }

    /// Appends a command linked from the previous one by `mode`; the first
    /// command is the root and ignores `mode`.
    pub fn add_command(&mut self, mode: FlowMode) -> Result<usize, ParseError> {
        let index = self.commands.len();
        if index >= MAX_CMDS {
            return Err(ParseError::TooManyCommands(MAX_CMDS));
        }
        if let Some(previous) = self.flow.last_mut() {
            previous.link(mode, index);
        }
        self.commands.push(CommandNode::new(index));
        self.flow.push(ControlNode::new(index));
        Ok(index)
    }

    /// The normalised line the graph was built from.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[CommandNode] {
        &self.commands
    }

    pub fn command(&self, index: usize) -> Option<&CommandNode> {
        self.commands.get(index)
    }

    pub fn command_mut(&mut self, index: usize) -> Option<&mut CommandNode> {
        self.commands.get_mut(index)
    }

    pub fn control(&self, index: usize) -> Option<&ControlNode> {
        self.flow.get(index)
    }

    pub fn resources(&self) -> &ResourceTracker {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceTracker {
        &mut self.resources
    }

    /// Splits the line into the command at `index` and the tracker, which the
    /// launcher needs at the same time.
    pub fn command_and_resources(
        &mut self,
        index: usize,
    ) -> Option<(&mut CommandNode, &mut ResourceTracker)> {
        let command = self.commands.get_mut(index)?;
        Some((command, &mut self.resources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_command_links_previous() {
        let mut line = CommandLine::new();
        assert_eq!(line.add_command(FlowMode::OnFailure).ok(), Some(0));
        assert_eq!(line.add_command(FlowMode::OnSuccess).ok(), Some(1));
        assert_eq!(line.add_command(FlowMode::Unconditional).ok(), Some(2));

        let root = line.control(0).cloned().unwrap_or_default();
        assert_eq!(root.on_success, Some(1));
        assert_eq!(root.unconditional, None);
        assert_eq!(root.on_failure, None);
        assert_eq!(line.control(1).and_then(|c| c.unconditional), Some(2));
        assert_eq!(line.control(2).map(|c| c.next(0)), Some(None));
    }

    #[test]
    fn test_add_command_capacity() {
        let mut line = CommandLine::new();
        for _ in 0..MAX_CMDS {
            assert!(line.add_command(FlowMode::Unconditional).is_ok());
        }
        assert!(matches!(
            line.add_command(FlowMode::Unconditional),
            Err(ParseError::TooManyCommands(MAX_CMDS))
        ));
    }

    #[test]
    fn test_control_next_precedence() {
        let mut node = ControlNode::new(0);
        node.link(FlowMode::OnSuccess, 1);
        node.link(FlowMode::OnFailure, 2);
        assert_eq!(node.next(0), Some(1));
        assert_eq!(node.next(3), Some(2));
        node.link(FlowMode::Unconditional, 3);
        assert_eq!(node.next(0), Some(3));
        assert_eq!(node.next(1), Some(3));
    }

    #[test]
    fn test_flow_status_inverts_decision_only() {
        let mut node = CommandNode::new(0);
        node.status = 1;
        node.invert = true;
        assert_eq!(node.flow_status(), 0);
        assert_eq!(node.status, 1);
        node.status = 0;
        assert_eq!(node.flow_status(), 1);
    }

    #[test]
    fn test_push_arg_sets_path_and_caps() {
        let mut node = CommandNode::new(0);
        assert!(node.is_empty());
        for i in 0..MAX_ARGS - 1 {
            assert!(node.push_arg(format!("a{}", i)).is_ok());
        }
        assert_eq!(node.program(), "a0");
        assert!(matches!(
            node.push_arg("x".to_string()),
            Err(ParseError::TooManyArguments(_))
        ));
    }

    #[test]
    fn test_display_quotes_arguments() {
        let mut node = CommandNode::new(0);
        node.argv = vec!["echo".to_string(), "a b".to_string()];
        assert_eq!(node.display(), "echo 'a b'");
    }
}
