use log::{debug, error, warn};
use std::error::Error;
use std::io::Write;

use crate::shell::executor::Executor;
use crate::shell::job_manager::JobStatus;
use crate::shell::parser::CommandLine;
use crate::shell::readline::{ReadlineError, ReadlineManager};
use crate::shell::signals;
use crate::utils::config::Config;
use crate::utils::theme::Theme;

pub struct Shell<'a> {
    theme: Theme,
    readline: ReadlineManager<'a>,
    executor: Executor,
    line: CommandLine,
    last_status: i32,
}

impl<'a> Shell<'a> {
    pub fn new(config: &'a Config, theme: Theme) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            theme,
            readline: ReadlineManager::new(config)?,
            executor: Executor::new(),
            line: CommandLine::new(),
            last_status: 0,
        })
    }

    pub fn run(&mut self) -> Result<(), Box<dyn Error>> {
        debug!("starting flowsh");
        signals::ignore_interactive_signals();
        self.readline.load_history();

        println!("{}", (self.theme.success_style)(self.theme.get_message("welcome")));
        println!("{}", (self.theme.warning_style)(self.theme.get_message("help")));

        self.run_loop()?;
        self.readline.save_history();
        debug!("leaving flowsh");
        Ok(())
    }

    fn run_loop(&mut self) -> Result<(), Box<dyn Error>> {
        loop {
            self.report_jobs();
            std::io::stdout().flush()?;
            let prompt = self.theme.prompt(self.last_status);

            match self.readline.readline(&prompt) {
                Ok(line) => self.handle_input(&line)?,
                Err(ReadlineError::Eof) => {
                    debug!("EOF on input");
                    println!(
                        "\n{}",
                        (self.theme.warning_style)(self.theme.get_message("eof_signal"))
                    );
                    break;
                }
                Err(ReadlineError::Interrupted) => {
                    println!(
                        "{}",
                        (self.theme.warning_style)(self.theme.get_message("interrupt_signal"))
                    );
                }
                Err(err) => {
                    error!("readline failed: {}", err);
                    eprintln!(
                        "{}: {}",
                        (self.theme.error_style)(self.theme.get_message("error")),
                        err
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_input(&mut self, input: &str) -> Result<(), Box<dyn Error>> {
        if input.trim().is_empty() {
            return Ok(());
        }
        self.readline.add_history(input)?;
        // The history file is written before `exit` can end the process.
        if input.trim_start().starts_with("exit") {
            self.readline.save_history();
        }

        if let Err(e) = self.line.parse(input, self.executor.env()) {
            warn!("syntax error in {:?}: {}", input, e);
            self.report_error(&e.to_string());
            self.last_status = 2;
            return Ok(());
        }

        match self.executor.execute(&mut self.line) {
            Ok(status) => self.last_status = status,
            Err(e) => {
                error!("execution of {:?} failed: {}", input, e);
                self.report_error(&e.to_string());
                self.last_status = 1;
            }
        }
        Ok(())
    }

    fn report_error(&self, message: &str) {
        eprintln!(
            "{} {}: {}",
            (self.theme.error_style)(self.theme.get_message("error_symbol")),
            (self.theme.error_style)(self.theme.get_message("error")),
            message
        );
    }

    fn report_jobs(&mut self) {
        for job in self.executor.reap_jobs() {
            let succeeded = job.status == JobStatus::Done(0);
            println!("{}", self.theme.job_report(succeeded, &job.to_string()));
        }
    }
}
