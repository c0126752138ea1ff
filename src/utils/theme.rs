use colored::Colorize;
use std::collections::HashMap;

type Style = Box<dyn Fn(&str) -> String>;

pub struct Theme {
    pub prompt_style: Style,
    pub success_style: Style,
    pub warning_style: Style,
    pub error_style: Style,
    messages: HashMap<&'static str, &'static str>,
}

const MESSAGES: [(&str, &str); 8] = [
    ("prompt", "flowsh> "),
    ("welcome", "flowsh ready."),
    ("help", "Type `exit` or press Ctrl-D to leave."),
    ("eof_signal", "EOF, leaving."),
    ("interrupt_signal", "interrupted"),
    ("error", "error"),
    ("error_symbol", "✗"),
    ("done_symbol", "✓"),
];

impl Default for Theme {
    fn default() -> Self {
        Theme {
            prompt_style: Box::new(|s: &str| s.bright_cyan().to_string()),
            success_style: Box::new(|s: &str| s.bright_green().to_string()),
            warning_style: Box::new(|s: &str| s.yellow().to_string()),
            error_style: Box::new(|s: &str| s.bright_red().to_string()),
            messages: MESSAGES.into_iter().collect(),
        }
    }
}

impl Theme {
    pub fn get_message<'a>(&'a self, key: &'a str) -> &'a str {
        self.messages.get(key).copied().unwrap_or(key)
    }

    /// The prompt, with the last status shown when it was not zero.
    pub fn prompt(&self, last_status: i32) -> String {
        let prompt = (self.prompt_style)(self.get_message("prompt"));
        if last_status == 0 {
            prompt
        } else {
            format!("{} {}", (self.error_style)(&last_status.to_string()), prompt)
        }
    }

    /// A finished background job: done symbol when it succeeded, error symbol otherwise.
    pub fn job_report(&self, succeeded: bool, job: &str) -> String {
        if succeeded {
            (self.success_style)(&format!("{} {}", self.get_message("done_symbol"), job))
        } else {
            (self.warning_style)(&format!("{} {}", self.get_message("error_symbol"), job))
        }
    }
}

pub fn load_theme(theme_name: &str) -> Theme {
    match theme_name {
        "dark" => Theme {
            prompt_style: Box::new(|s: &str| s.bright_purple().to_string()),
            success_style: Box::new(|s: &str| s.green().to_string()),
            warning_style: Box::new(|s: &str| s.bright_yellow().to_string()),
            error_style: Box::new(|s: &str| s.red().to_string()),
            ..Theme::default()
        },
        _ => Theme::default(),
    }
}
