use std::collections::HashMap;
use std::env;

/// Key-value store used for `$NAME` expansion and by `export`/`unset`.
pub trait Environment {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: &str);
    fn unset(&mut self, name: &str);
    /// Every variable, sorted by name.
    fn vars(&self) -> Vec<(String, String)>;
}

/// The real process environment, inherited by every spawned child.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        if name.is_empty() || name.contains('=') || name.contains('\0') {
            return None;
        }
        env::var(name).ok()
    }

    fn set(&mut self, name: &str, value: &str) {
        env::set_var(name, value);
    }

    fn unset(&mut self, name: &str) {
        env::remove_var(name);
    }

    fn vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<_> = env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        vars.sort();
        vars
    }
}

/// In-memory store. Changes are not seen by child processes.
#[derive(Debug, Default, Clone)]
pub struct MapEnv {
    local_vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.set(name, value);
        self
    }
}

impl Environment for MapEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.local_vars.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: &str) {
        self.local_vars.insert(name.to_string(), value.to_string());
    }

    fn unset(&mut self, name: &str) {
        self.local_vars.remove(name);
    }

    fn vars(&self) -> Vec<(String, String)> {
        let mut vars: Vec<_> = self
            .local_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.sort();
        vars
    }
}

/// `true` for a valid shell identifier: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
