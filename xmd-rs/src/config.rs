//! Engine configuration: limits, sandbox and file-access settings.
//!
//! Loaded from a `key = value` file, then overridden from `XMD_<KEY>`
//! environment variables:
//!
//! | Key | Default |
//! |-----|---------|
//! | `max_loop_iterations` | 10000 |
//! | `max_recursion_depth` | 100 |
//! | `exec_timeout_ms` | 5000 |
//! | `max_output_size` | 10M |
//! | `enable_sandbox` | true |
//! | `exec_whitelist` | echo,date,ls,cat,pwd,whoami,uname |
//! | `allow_file_access` | true |
//! | `file_root` | (unset) |
//! | `module_paths` | (empty, `:`-separated) |
//! | `error_markers` | false |
//! | `trim_directive_lines` | true |
//!
//! Lines starting with `#` or `;` are comments.  Bad lines are reported and
//! skipped; they never abort loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal problem found while loading configuration.  `line` is 0 for
/// environment overrides.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub max_loop_iterations: usize,
    pub max_recursion_depth: usize,
    pub exec_timeout_ms: u64,
    pub max_output_size: usize,
    pub enable_sandbox: bool,
    pub exec_whitelist: Vec<String>,
    pub allow_file_access: bool,
    pub file_root: Option<PathBuf>,
    pub module_paths: Vec<PathBuf>,
    pub error_markers: bool,
    pub trim_directive_lines: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_loop_iterations: 10_000,
            max_recursion_depth: 100,
            exec_timeout_ms: 5_000,
            max_output_size: 10 * 1024 * 1024,
            enable_sandbox: true,
            exec_whitelist: ["echo", "date", "ls", "cat", "pwd", "whoami", "uname"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            allow_file_access: true,
            file_root: None,
            module_paths: Vec::new(),
            error_markers: false,
            trim_directive_lines: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string on top of the defaults.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let errors = config.merge_str(s);
        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Apply the settings in `s` to this config.
    pub fn merge_str(&mut self, s: &str) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        for (i, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                errors.push(ConfigError { line: i + 1, message: format!("expected 'key = value': {line}") });
                continue;
            };
            if let Err(message) = self.set(key.trim(), unquote(value.trim())) {
                errors.push(ConfigError { line: i + 1, message });
            }
        }
        errors
    }

    /// Set one option by name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key.to_ascii_lowercase().as_str() {
            "max_loop_iterations" => self.max_loop_iterations = parse_count(key, value)?,
            "max_recursion_depth" => self.max_recursion_depth = parse_count(key, value)?,
            "exec_timeout_ms" | "execution_time_limit_ms" => {
                self.exec_timeout_ms = parse_count(key, value)? as u64
            }
            "max_output_size" => self.max_output_size = parse_size(key, value)?,
            "enable_sandbox" => self.enable_sandbox = parse_bool(key, value)?,
            "exec_whitelist" => {
                self.exec_whitelist = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            }
            "allow_file_access" => self.allow_file_access = parse_bool(key, value)?,
            "file_root" => self.file_root = (!value.is_empty()).then(|| PathBuf::from(value)),
            "module_paths" => self.module_paths = std::env::split_paths(value).collect(),
            "error_markers" => self.error_markers = parse_bool(key, value)?,
            "trim_directive_lines" => self.trim_directive_lines = parse_bool(key, value)?,
            _ => return Err(format!("unknown setting '{key}'")),
        }
        Ok(())
    }

    /// Apply `XMD_<KEY>` overrides.  Variables without the prefix, and
    /// prefixed names that are not settings, are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Vec<ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut errors = Vec::new();
        for (name, value) in vars {
            let Some(key) = name.strip_prefix("XMD_") else { continue };
            let key = key.to_ascii_lowercase();
            match self.set(&key, &value) {
                Ok(()) => {}
                Err(message) if message.starts_with("unknown setting") => {}
                Err(message) => errors.push(ConfigError { line: 0, message: format!("{name}: {message}") }),
            }
        }
        errors
    }

    /// Apply overrides from the process environment.
    pub fn load_env(&mut self) -> Vec<ConfigError> {
        self.apply_env(std::env::vars())
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }
}

// ── Value parsers ─────────────────────────────────────────────────────────────

fn unquote(s: &str) -> &str {
    let b = s.as_bytes();
    if b.len() >= 2 && matches!(b[0], b'"' | b'\'') && b[b.len() - 1] == b[0] {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("{key}: expected a boolean, got '{value}'")),
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize, String> {
    value
        .replace('_', "")
        .parse()
        .map_err(|_| format!("{key}: expected a non-negative integer, got '{value}'"))
}

/// A byte count with an optional `K`/`M`/`G` suffix.
fn parse_size(key: &str, value: &str) -> Result<usize, String> {
    let v = value.trim();
    let (digits, scale) = match v.char_indices().last() {
        Some((i, 'k' | 'K')) => (&v[..i], 1024),
        Some((i, 'm' | 'M')) => (&v[..i], 1024 * 1024),
        Some((i, 'g' | 'G')) => (&v[..i], 1024 * 1024 * 1024),
        _ => (v, 1),
    };
    let n = parse_count(key, digits.trim())?;
    n.checked_mul(scale).ok_or_else(|| format!("{key}: '{value}' is too large"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.max_loop_iterations, 10_000);
        assert_eq!(c.max_output_size, 10 * 1024 * 1024);
        assert!(c.enable_sandbox);
        assert!(c.exec_whitelist.iter().any(|w| w == "echo"));
        assert!(!c.error_markers);
        assert_eq!(c.exec_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn empty_string() {
        let (c, errors) = Config::load_str("");
        assert!(errors.is_empty());
        assert_eq!(c, Config::default());
    }

    #[test]
    fn file_settings() {
        let src = "# limits\nmax_loop_iterations = 50\n; sandbox\nenable_sandbox = off\nexec_whitelist = echo, git\nmax_output_size = 2K\nfile_root = \"/srv/docs\"\n";
        let (c, errors) = Config::load_str(src);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(c.max_loop_iterations, 50);
        assert!(!c.enable_sandbox);
        assert_eq!(c.exec_whitelist, vec!["echo", "git"]);
        assert_eq!(c.max_output_size, 2048);
        assert_eq!(c.file_root, Some(PathBuf::from("/srv/docs")));
    }

    #[test]
    fn bad_lines_reported_not_fatal() {
        let (c, errors) = Config::load_str("max_loop_iterations = lots\nbogus = 1\nno equals here\nerror_markers = yes");
        assert_eq!(errors.iter().map(|e| e.line).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(c.error_markers);
        assert_eq!(c.max_loop_iterations, 10_000);
    }

    #[test]
    fn env_overrides() {
        let mut c = Config::default();
        let errors = c.apply_env(env(&[
            ("XMD_MAX_RECURSION_DEPTH", "7"),
            ("XMD_EXECUTION_TIME_LIMIT_MS", "250"),
            ("XMD_UNRELATED", "x"),
            ("HOME", "/root"),
            ("XMD_ENABLE_SANDBOX", "maybe"),
        ]));
        assert_eq!(c.max_recursion_depth, 7);
        assert_eq!(c.exec_timeout_ms, 250);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 0);
    }

    #[test]
    fn load_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xmdrc");
        std::fs::write(&path, "trim_directive_lines = false\n").unwrap();
        let (c, errors) = Config::load_file(&path).unwrap();
        assert!(errors.is_empty());
        assert!(!c.trim_directive_lines);
    }
}
