use std::io::{Read, Write};
use std::path::Path;
use std::process::ExitCode;

use tracing::debug;

use xmd::cli::{self, CliArgs, ConfigFile, Input};
use xmd::config::{Config, ConfigError};
use xmd::error::XmdError;
use xmd::logging;
use xmd::script::lexer::Lexer;
use xmd::script::{Interpreter, Value};

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("xmd: {e}");
            eprintln!("{}", cli::USAGE);
            return ExitCode::from(1);
        }
    };
    logging::init(args.debug);

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("xmd: {e}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &CliArgs) -> Result<ExitCode, XmdError> {
    let config = load_config(args)?;

    if args.tokens {
        let src = read_input(&args.input)?;
        let mut dump = String::new();
        for tok in Lexer::tokenize(&src) {
            dump.push_str(&format!("{}:{} {:?} {:?}\n", tok.line, tok.column, tok.kind, tok.text));
        }
        write_output(args.output.as_deref(), &dump)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut interp = Interpreter::with_config(config);
    for (name, value) in &args.defines {
        interp.set_global_var(name.as_str(), define_value(value));
    }

    let rendered = match &args.input {
        Input::File(path) => interp.render_file(path)?,
        Input::Stdin => interp.render(&read_input(&args.input)?)?,
    };
    write_output(args.output.as_deref(), &rendered.output)?;

    let source = match &args.input {
        Input::File(path) => path.display().to_string(),
        Input::Stdin => "<stdin>".to_owned(),
    };
    for d in &rendered.diagnostics {
        eprintln!("xmd: {source}: {d}");
    }
    Ok(if rendered.diagnostics.is_empty() { ExitCode::SUCCESS } else { ExitCode::from(2) })
}

/// `-D` values: numbers when they parse, strings otherwise.
fn define_value(raw: &str) -> Value {
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => Value::Number(n),
        _ => Value::str(raw),
    }
}

fn load_config(args: &CliArgs) -> Result<Config, XmdError> {
    let mut config = match &args.config {
        ConfigFile::Skip => Config::default(),
        ConfigFile::Explicit(path) => read_config(path)?,
        ConfigFile::Search => match cli::find_user_config() {
            Some(path) => read_config(&path)?,
            None => Config::default(),
        },
    };
    report_config_errors("environment", &config.load_env());
    if args.error_markers {
        config.error_markers = true;
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config, XmdError> {
    debug!(path = %path.display(), "loading config");
    let (config, errors) = Config::load_file(path).map_err(|source| XmdError::Io {
        path: path.display().to_string(),
        source,
    })?;
    report_config_errors(&path.display().to_string(), &errors);
    Ok(config)
}

fn report_config_errors(source: &str, errors: &[ConfigError]) {
    for e in errors {
        eprintln!("xmd: warning: {source}: {e}");
    }
}

fn read_input(input: &Input) -> Result<String, XmdError> {
    match input {
        Input::Stdin => {
            let mut src = String::new();
            std::io::stdin()
                .read_to_string(&mut src)
                .map_err(|source| XmdError::Io { path: "<stdin>".to_owned(), source })?;
            Ok(src)
        }
        Input::File(path) => std::fs::read_to_string(path).map_err(|source| XmdError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn write_output(path: Option<&Path>, text: &str) -> Result<(), XmdError> {
    match path {
        Some(path) => std::fs::write(path, text).map_err(|source| XmdError::Io {
            path: path.display().to_string(),
            source,
        }),
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes())
                .and_then(|()| out.flush())
                .map_err(|source| XmdError::Io { path: "<stdout>".to_owned(), source })
        }
    }
}
