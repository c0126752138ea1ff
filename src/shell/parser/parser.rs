use std::iter::Peekable;
use std::os::fd::{IntoRawFd, RawFd};
use std::vec::IntoIter;

use log::debug;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::pipe2;

use super::ast::{CommandLine, CommandNode, FlowMode};
use super::lexer::{Operator, Token};
use crate::shell::error::ParseError;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Stdin,
    Stdout,
    Stderr,
}

/// Walks the token stream once, left to right, growing the command graph.
pub struct Parser<'l, 'a> {
    line: &'l mut CommandLine,
    tokens: Peekable<IntoIter<Token<'a>>>,
    current: usize,
}

impl<'l, 'a> Parser<'l, 'a> {
    pub fn new(line: &'l mut CommandLine, tokens: Vec<Token<'a>>) -> Self {
        Parser {
            line,
            tokens: tokens.into_iter().peekable(),
            current: 0,
        }
    }

    pub fn parse(mut self) -> Result<(), ParseError> {
        if self.tokens.peek().is_none() {
            return Ok(());
        }
        self.current = self.line.add_command(FlowMode::Unconditional)?;

        while let Some(token) = self.tokens.next() {
            match token.operator() {
                Some(op) => self.apply(op)?,
                None => self.current_mut()?.push_arg(token.text.into_owned())?,
            }
        }
        Ok(())
    }

    fn at_end(&mut self) -> bool {
        self.tokens.peek().is_none()
    }

    fn current_mut(&mut self) -> Result<&mut CommandNode, ParseError> {
        let index = self.current;
        self.line
            .command_mut(index)
            .ok_or(ParseError::TooManyCommands(index))
    }

    fn start_command(&mut self, mode: FlowMode) -> Result<(), ParseError> {
        self.current = self.line.add_command(mode)?;
        Ok(())
    }

    /// The word following `op`; another operator or the end of line is an error.
    fn expect_word(&mut self, op: Operator) -> Result<String, ParseError> {
        match self.tokens.next() {
            Some(token) if token.operator().is_none() => Ok(token.text.into_owned()),
            _ => Err(ParseError::MissingOperand(op.as_str().to_string())),
        }
    }

    fn apply(&mut self, op: Operator) -> Result<(), ParseError> {
        match op {
            Operator::Semi => {
                if !self.at_end() {
                    self.start_command(FlowMode::Unconditional)?;
                }
            }
            Operator::Background => {
                self.current_mut()?.background = true;
                if !self.at_end() {
                    self.start_command(FlowMode::Unconditional)?;
                }
            }
            Operator::Input => self.redirect(op, Slot::Stdin, OFlag::O_RDONLY)?,
            Operator::Output => self.redirect(op, Slot::Stdout, truncate())?,
            Operator::Append => self.redirect(op, Slot::Stdout, append())?,
            Operator::ErrOutput => self.redirect(op, Slot::Stderr, truncate())?,
            Operator::ErrAppend => self.redirect(op, Slot::Stderr, append())?,
            Operator::OutToErr => {
                let node = self.current_mut()?;
                node.stdout_fd = node.stderr_fd;
            }
            Operator::ErrToOut => {
                let node = self.current_mut()?;
                node.stderr_fd = node.stdout_fd;
            }
            Operator::Pipe => self.pipe()?,
            Operator::And | Operator::Or => {
                if self.at_end() {
                    return Err(ParseError::MissingOperand(op.as_str().to_string()));
                }
                let mode = if op == Operator::And {
                    FlowMode::OnSuccess
                } else {
                    FlowMode::OnFailure
                };
                self.start_command(mode)?;
            }
            Operator::Not => self.current_mut()?.invert = true,
        }
        Ok(())
    }

    fn redirect(&mut self, op: Operator, slot: Slot, flags: OFlag) -> Result<(), ParseError> {
        let path = self.expect_word(op)?;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH;
        let fd = open(path.as_str(), flags | OFlag::O_CLOEXEC, mode)
            .map_err(|source| ParseError::Open { path: path.clone(), source })?;
        self.line.resources_mut().add(fd)?;
        debug!("{} {} -> fd {}", op.as_str(), path, fd);

        let node = self.current_mut()?;
        match slot {
            Slot::Stdin => node.stdin_fd = fd,
            Slot::Stdout => node.stdout_fd = fd,
            Slot::Stderr => node.stderr_fd = fd,
        }
        Ok(())
    }

    fn pipe(&mut self) -> Result<(), ParseError> {
        if self.at_end() {
            return Err(ParseError::MissingOperand(Operator::Pipe.as_str().to_string()));
        }
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(ParseError::Pipe)?;
        let read: RawFd = read.into_raw_fd();
        self.line.resources_mut().add(read)?;
        let write: RawFd = write.into_raw_fd();
        self.line.resources_mut().add(write)?;
        debug!("pipe: write fd {} -> read fd {}", write, read);

        let producer = self.current_mut()?;
        producer.stdout_fd = write;
        producer.piped = true;

        self.start_command(FlowMode::Unconditional)?;
        self.current_mut()?.stdin_fd = read;
        Ok(())
    }
}

fn truncate() -> OFlag {
    OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC
}

fn append() -> OFlag {
    OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND
}
