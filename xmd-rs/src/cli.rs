//! Command-line argument parsing.
//!
//! Usage:
//!   xmd [-f[<file>]] [-o<file>] [-D<name>=<value>]... [-mtd] [<input>|-]

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

pub const USAGE: &str = "Usage: xmd [-f[<file>]] [-o<file>] [-D<name>=<value>]... [-mtd] [<input>|-]";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Which config file to load.
    pub config: ConfigFile,
    /// Output file (`-o<file>`); stdout when unset.
    pub output: Option<PathBuf>,
    /// Predefined variables (`-D<name>=<value>`), in command-line order.
    pub defines: Vec<(String, String)>,
    /// Emit error markers for failed directives (`-m`).
    pub error_markers: bool,
    /// Dump structural tokens instead of rendering (`-t`).
    pub tokens: bool,
    /// Debug logging (`-d`).
    pub debug: bool,
    /// Document to render.
    pub input: Input,
}

/// How to choose the user config file.
#[derive(Debug, Default)]
pub enum ConfigFile {
    /// Search `./.xmdrc`, then the platform config directory (default).
    #[default]
    Search,
    /// `-f` with no file argument: skip user config.
    Skip,
    /// `-f<file>`: load this specific file.
    Explicit(PathBuf),
}

/// Where the document comes from.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum Input {
    /// No argument or `-`.
    #[default]
    Stdin,
    File(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            positional.extend(argv[i + 1..].iter().cloned());
            break;
        }

        if !arg.starts_with('-') || arg == "-" {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'd' => args.debug = true,
                'm' => args.error_markers = true,
                't' => args.tokens = true,

                // -f[<file>]
                'f' => {
                    if j + 1 < chars.len() {
                        args.config = ConfigFile::Explicit(chars[j + 1..].iter().collect::<String>().into());
                        j = chars.len();
                    } else if i + 1 < argv.len() && !argv[i + 1].starts_with('-') && argv.len() - i > 2 {
                        // `-f file input`: the last positional stays the input.
                        i += 1;
                        args.config = ConfigFile::Explicit(PathBuf::from(&argv[i]));
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }

                // -o<file>
                'o' => {
                    let file = option_value('o', &chars, &mut j, argv, &mut i)?;
                    args.output = Some(PathBuf::from(file));
                }

                // -D<name>=<value>
                'D' => {
                    let def = option_value('D', &chars, &mut j, argv, &mut i)?;
                    let (name, value) = def
                        .split_once('=')
                        .ok_or_else(|| format!("-D expects name=value, got '{def}'"))?;
                    if name.is_empty() {
                        return Err(format!("-D expects name=value, got '{def}'"));
                    }
                    args.defines.push((name.to_owned(), value.to_owned()));
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    match positional.len() {
        0 => {}
        1 if positional[0] == "-" => {}
        1 => args.input = Input::File(PathBuf::from(positional.remove(0))),
        n => return Err(format!("too many arguments ({n})")),
    }

    Ok(args)
}

/// Value of an option that takes an argument: the rest of this word, or the
/// next word.
fn option_value(flag: char, chars: &[char], j: &mut usize, argv: &[String], i: &mut usize) -> Result<String, String> {
    if *j + 1 < chars.len() {
        let s = chars[*j + 1..].iter().collect();
        *j = chars.len();
        Ok(s)
    } else if *i + 1 < argv.len() {
        *i += 1;
        Ok(argv[*i].clone())
    } else {
        Err(format!("-{flag} requires an argument"))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Platform config file: `$XDG_CONFIG_HOME/xmd/config` and equivalents.
pub fn platform_config() -> Option<PathBuf> {
    ProjectDirs::from("", "", "xmd").map(|dirs| dirs.config_dir().join("config"))
}

/// Search for the user config file in the standard locations.
/// Returns the first path that exists, or `None`.
pub fn find_user_config() -> Option<PathBuf> {
    std::iter::once(Path::new(".xmdrc").to_path_buf())
        .chain(platform_config())
        .find(|p| p.exists())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|&s| s.to_owned()).collect()
    }

    #[test]
    fn empty_args() {
        let a = parse_argv(&argv(&[])).unwrap();
        assert_eq!(a.input, Input::Stdin);
        assert!(matches!(a.config, ConfigFile::Search));
        assert!(a.output.is_none());
    }

    #[test]
    fn input_positional() {
        let a = parse_argv(&argv(&["doc.md"])).unwrap();
        assert_eq!(a.input, Input::File(PathBuf::from("doc.md")));
        let a = parse_argv(&argv(&["-"])).unwrap();
        assert_eq!(a.input, Input::Stdin);
    }

    #[test]
    fn bool_flags() {
        let a = parse_argv(&argv(&["-m", "-t", "-d"])).unwrap();
        assert!(a.error_markers && a.tokens && a.debug);
        let a = parse_argv(&argv(&["-mtd"])).unwrap();
        assert!(a.error_markers && a.tokens && a.debug);
    }

    #[test]
    fn output_embedded_and_separate() {
        let a = parse_argv(&argv(&["-oout.md", "in.md"])).unwrap();
        assert_eq!(a.output, Some(PathBuf::from("out.md")));
        let a = parse_argv(&argv(&["-o", "out.md", "in.md"])).unwrap();
        assert_eq!(a.output, Some(PathBuf::from("out.md")));
        assert_eq!(a.input, Input::File(PathBuf::from("in.md")));
    }

    #[test]
    fn defines() {
        let a = parse_argv(&argv(&["-Dname=Ann", "-D", "n=3", "-Dempty="])).unwrap();
        assert_eq!(
            a.defines,
            vec![
                ("name".to_owned(), "Ann".to_owned()),
                ("n".to_owned(), "3".to_owned()),
                ("empty".to_owned(), String::new()),
            ]
        );
        assert!(parse_argv(&argv(&["-Dnovalue"])).is_err());
        assert!(parse_argv(&argv(&["-D=1"])).is_err());
    }

    #[test]
    fn config_skip() {
        let a = parse_argv(&argv(&["-f"])).unwrap();
        assert!(matches!(a.config, ConfigFile::Skip));
        let a = parse_argv(&argv(&["-f", "doc.md"])).unwrap();
        assert!(matches!(a.config, ConfigFile::Skip));
        assert_eq!(a.input, Input::File(PathBuf::from("doc.md")));
    }

    #[test]
    fn config_explicit() {
        let a = parse_argv(&argv(&["-fmy.xmdrc"])).unwrap();
        assert!(matches!(&a.config, ConfigFile::Explicit(p) if p == &PathBuf::from("my.xmdrc")));
        let a = parse_argv(&argv(&["-f", "my.xmdrc", "doc.md"])).unwrap();
        assert!(matches!(&a.config, ConfigFile::Explicit(p) if p == &PathBuf::from("my.xmdrc")));
        assert_eq!(a.input, Input::File(PathBuf::from("doc.md")));
    }

    #[test]
    fn missing_option_argument() {
        assert!(parse_argv(&argv(&["-o"])).is_err());
    }

    #[test]
    fn too_many_positional() {
        assert!(parse_argv(&argv(&["a", "b"])).is_err());
    }

    #[test]
    fn unknown_flag() {
        assert!(parse_argv(&argv(&["-z"])).is_err());
    }
}
