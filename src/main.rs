//! Purpose: `nbscript` CLI entry point.
//! Role: Binary crate root; parses args, installs logging, dispatches, maps errors to exit codes.
//! Invariants: Receipts go to stdout (human on a TTY, JSON otherwise); `cat` prints raw text.
//! Invariants: Errors go to stderr: labeled text on a TTY, one JSON line otherwise.
//! Invariants: Process exit code is derived from `to_exit_code`.
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{
    CommandFactory, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;

use nbscript::core::error::{Error, ErrorKind, to_exit_code};
use nbscript::sync::Synchronizer;
use nbscript::uv::Uv;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                let message = clap_error_summary(&err);
                let hint = clap_error_hint(&err);
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(message)
                        .with_hint(hint),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();

    let color_mode = cli.color;
    let uv = cli.uv.map(Uv::new).unwrap_or_else(Uv::from_env);
    let sync = Synchronizer::new(uv);

    command_dispatch::dispatch_command(cli.command, &sync, color_mode)
        .map_err(add_io_hint)
        .map_err(add_internal_hint)
        .map_err(|err| (err, color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "nbscript",
    version,
    about = "Keep a notebook's inline script dependencies in sync with uv",
    help_template = r#"{about-with-newline}
{before-help}USAGE
  {usage}

COMMANDS
{subcommands}

OPTIONS
{options}

{after-help}
"#,
    long_about = None,
    before_help = r#"Dependencies live in a hidden first cell as a PEP 723 `# /// script` block.
uv edits that block; nbscript moves it between the notebook and uv.
"#,
    after_help = r#"EXAMPLES
  $ nbscript init                          # creates Untitled.ipynb
  $ nbscript init analysis.ipynb --python 3.12 --with polars
  $ nbscript add analysis.ipynb httpx 'rich>=13'
  $ nbscript add analysis.ipynb requests --pin
  $ nbscript cat analysis.ipynb

LEARN MORE
  $ nbscript <command> --help
  Set RUST_LOG=debug to see every uv invocation."#,
    arg_required_else_help = true,
    disable_help_subcommand = false
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "uv binary to run (default: $NBSCRIPT_UV, else `uv` on PATH)",
        value_hint = ValueHint::ExecutablePath
    )]
    uv: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Create a notebook with inline script metadata",
        long_about = r#"Create a new notebook whose hidden first cell holds a fresh
`# /// script` block generated by `uv init --script`, followed by an empty cell."#,
        after_help = r#"EXAMPLES
  $ nbscript init
  $ nbscript init demo.ipynb --python 3.12
  $ nbscript init demo.ipynb --with numpy --with pandas

NOTES
  - Without FILE, the first free Untitled.ipynb … Untitled99.ipynb is used
  - An existing FILE is replaced by the new notebook
  - If adding --with packages fails, the new notebook is kept (empty manifest)"#
    )]
    Init {
        #[arg(help = "Notebook to create (must end in .ipynb)", value_hint = ValueHint::FilePath)]
        file: Option<PathBuf>,
        #[arg(long, value_name = "VERSION", help = "Python version passed to uv")]
        python: Option<String>,
        #[arg(
            long = "with",
            value_name = "PKG",
            help = "Dependency to add right away (repeatable)"
        )]
        with: Vec<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Add dependencies to a notebook or script",
        long_about = r#"Add dependencies to the inline script metadata of a notebook.

The manifest cell is copied to a temporary script next to the notebook,
`uv add --script` updates it, and the result is written back into the cell.
Paths that do not end in .ipynb are handed to uv as plain scripts."#,
        after_help = r#"EXAMPLES
  $ nbscript add demo.ipynb requests
  $ nbscript add demo.ipynb -r requirements.txt
  $ nbscript add demo.ipynb 'httpx[http2]' --pin
  $ nbscript add demo.ipynb git+https://github.com/psf/requests --tag v2.31.0
  $ nbscript add tool.py rich

NOTES
  - `--pin` resolves exact versions with `uv pip compile --no-deps` first
  - A notebook without a manifest cell gets a hidden one inserted at the top
  - Nothing is written if uv fails"#
    )]
    Add {
        #[arg(help = "Notebook or script to update", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(
            help = "Dependency specifiers",
            required_unless_present = "requirements"
        )]
        packages: Vec<String>,
        #[arg(
            short = 'r',
            long,
            value_name = "FILE",
            help = "Add everything listed in a requirements file",
            value_hint = ValueHint::FilePath
        )]
        requirements: Option<PathBuf>,
        #[arg(long = "extra", value_name = "EXTRA", help = "Extra to enable (repeatable)")]
        extras: Vec<String>,
        #[arg(long, help = "Git tag to use", conflicts_with_all = ["branch", "rev"])]
        tag: Option<String>,
        #[arg(long, help = "Git branch to use", conflicts_with = "rev")]
        branch: Option<String>,
        #[arg(long, help = "Git commit to use")]
        rev: Option<String>,
        #[arg(long, help = "Resolve and add exact versions (name==version)")]
        pin: bool,
        #[arg(long, help = "Add the requirements as editable")]
        editable: bool,
        #[arg(
            long,
            value_name = "DATE",
            help = "Ignore distributions uploaded after this date"
        )]
        exclude_newer: Option<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Remove dependencies from a notebook or script",
        after_help = r#"EXAMPLES
  $ nbscript remove demo.ipynb requests"#
    )]
    Remove {
        #[arg(help = "Notebook or script to update", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(help = "Package names", required = true)]
        packages: Vec<String>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Print a notebook's inline script metadata cell",
        after_help = r#"EXAMPLES
  $ nbscript cat demo.ipynb
  $ nbscript cat demo.ipynb > demo.py"#
    )]
    Cat {
        #[arg(help = "Notebook to read", value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    #[command(about = "Print version info", after_help = r#"EXAMPLES
  $ nbscript version"#)]
    Version,
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completions",
        after_help = r#"EXAMPLES
  $ nbscript completion bash > ~/.local/share/bash-completion/completions/nbscript
  $ nbscript completion zsh > ~/.zfunc/_nbscript
  $ nbscript completion fish > ~/.config/fish/completions/nbscript.fish"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => {
            err.with_hint("Permission denied. Check file and directory permissions.")
        }
        ErrorKind::NotFound => err.with_hint("Check the path; relative paths resolve from the current directory."),
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

fn add_internal_hint(err: Error) -> Error {
    if err.kind() != ErrorKind::Internal || err.hint().is_some() {
        return err;
    }
    err.with_hint(
        "Unexpected internal failure. Retry with RUST_LOG=debug and share command/context if it persists.",
    )
}

fn emit_receipt(action: &str, path: &Path, color_mode: ColorMode) {
    if io::stdout().is_terminal() {
        let verb = match action {
            "init" => "Initialized notebook at",
            _ => "Updated",
        };
        println!("{verb} `{}`", path.display());
        return;
    }
    emit_json(
        json!({ "action": action, "path": path.display().to_string() }),
        color_mode,
    );
}

fn emit_version_output(color_mode: ColorMode) {
    if io::stdout().is_terminal() {
        println!("nbscript {}", env!("CARGO_PKG_VERSION"));
    } else {
        emit_json(
            json!({
                "name": "nbscript",
                "version": env!("CARGO_PKG_VERSION"),
            }),
            color_mode,
        );
    }
}

fn emit_json(value: Value, color_mode: ColorMode) {
    let is_tty = io::stdout().is_terminal();
    println!("{}", render_json(&value, is_tty || color_mode.use_color(is_tty)));
}

// Receipts are one line for pipes; `--color always` asks for the terminal layout.
fn render_json(value: &Value, pretty: bool) -> String {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    rendered.unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string())
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, enabled: bool, color: AnsiColor) -> String {
    if !enabled {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\u{1b}[{code}m{label}\u{1b}[0m")
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Tool => "package manager failed".to_string(),
        ErrorKind::Permission => "permission denied".to_string(),
        ErrorKind::Corrupt => "invalid notebook".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err).trim_end()
    ));

    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }

    let causes = error_causes(err);
    if let Some(cause) = causes.first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }

    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

fn clap_error_hint(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let usage = rendered
        .lines()
        .find_map(|line| line.trim().strip_prefix("Usage: "))
        .map(str::trim);

    let Some(usage) = usage else {
        return "Try `nbscript --help`.".to_string();
    };

    let tokens: Vec<&str> = usage.split_whitespace().collect();
    let Some(pos) = tokens.iter().position(|t| *t == "nbscript") else {
        return "Try `nbscript --help`.".to_string();
    };

    let parts: Vec<&str> = tokens
        .iter()
        .skip(pos + 1)
        .take_while(|token| {
            !(token.starts_with('-') || token.starts_with('<') || token.starts_with('['))
        })
        .copied()
        .collect();

    if parts.is_empty() {
        return "Try `nbscript --help`.".to_string();
    }
    format!("Try `nbscript {} --help`.", parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::{
        Cli, Command, Error, ErrorKind, clap_error_hint, error_json, error_text, render_json,
    };
    use clap::{CommandFactory, Parser};
    use std::path::PathBuf;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn add_parses_every_option() {
        let cli = Cli::try_parse_from([
            "nbscript",
            "add",
            "nb.ipynb",
            "httpx",
            "rich",
            "-r",
            "req.txt",
            "--extra",
            "http2",
            "--extra",
            "cli",
            "--branch",
            "main",
            "--pin",
            "--editable",
            "--exclude-newer",
            "2024-01-01",
        ])
        .expect("parse");
        match cli.command {
            Command::Add {
                file,
                packages,
                requirements,
                extras,
                tag,
                branch,
                rev,
                pin,
                editable,
                exclude_newer,
            } => {
                assert_eq!(file, PathBuf::from("nb.ipynb"));
                assert_eq!(packages, ["httpx", "rich"]);
                assert_eq!(requirements, Some(PathBuf::from("req.txt")));
                assert_eq!(extras, ["http2", "cli"]);
                assert_eq!(tag, None);
                assert_eq!(branch.as_deref(), Some("main"));
                assert_eq!(rev, None);
                assert!(pin && editable);
                assert_eq!(exclude_newer.as_deref(), Some("2024-01-01"));
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn add_requires_packages_or_requirements() {
        assert!(Cli::try_parse_from(["nbscript", "add", "nb.ipynb"]).is_err());
        assert!(Cli::try_parse_from(["nbscript", "add", "nb.ipynb", "-r", "req.txt"]).is_ok());
        assert!(
            Cli::try_parse_from(["nbscript", "add", "nb.ipynb", "x", "--tag", "a", "--rev", "b"])
                .is_err()
        );
    }

    #[test]
    fn init_collects_with_packages() {
        let cli = Cli::try_parse_from([
            "nbscript", "init", "--with", "numpy", "--with", "pandas", "--python", "3.12",
        ])
        .expect("parse");
        match cli.command {
            Command::Init { file, python, with } => {
                assert_eq!(file, None);
                assert_eq!(python.as_deref(), Some("3.12"));
                assert_eq!(with, ["numpy", "pandas"]);
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn clap_hint_points_at_subcommand_help() {
        let err = Cli::try_parse_from(["nbscript", "remove", "nb.ipynb"])
            .err()
            .expect("missing packages");
        assert_eq!(clap_error_hint(&err), "Try `nbscript remove --help`.");
    }

    #[test]
    fn error_text_respects_color_flag() {
        let err = Error::new(ErrorKind::Usage).with_message("bad input");
        let colored = error_text(&err, true);
        let plain = error_text(&err, false);
        assert!(colored.contains("\u{1b}[31merror:\u{1b}[0m"));
        assert!(plain.contains("error:"));
        assert!(!plain.contains("\u{1b}["));
    }

    #[test]
    fn error_json_keeps_tool_diagnostics() {
        let err = Error::new(ErrorKind::Tool)
            .with_message("error: No solution found\n")
            .with_hint("`uv add` exited with exit status: 1");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Tool");
        assert_eq!(value["error"]["message"], "error: No solution found\n");
        assert_eq!(
            error_text(&err, false).lines().next(),
            Some("error: error: No solution found")
        );
        assert_eq!(value["error"]["hint"], "`uv add` exited with exit status: 1");
    }

    #[test]
    fn receipts_are_single_line_unless_pretty() {
        let value = serde_json::json!({ "action": "add", "path": "nb.ipynb" });
        assert_eq!(
            render_json(&value, false),
            r#"{"action":"add","path":"nb.ipynb"}"#
        );
        assert!(render_json(&value, true).contains("\n  \"action\": \"add\""));
    }
}
