//! Purpose: Drive the external package manager (`uv`) against standalone scripts.
//! Exports: `PackageManager`, `Uv`, `AddRequest`, argument builders, `exact_pins`.
//! Role: The only code that builds argument vectors or spawns the tool.
//! Invariants: Optional inputs that are absent produce no flag at all.
//! Invariants: A non-zero exit is fatal; the tool's stderr becomes the error message verbatim.
//! Invariants: Invocations block until the tool exits; no timeout is applied.
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};

use crate::core::error::{Error, ErrorKind, io_error};

pub const UV_ENV: &str = "NBSCRIPT_UV";
const DEFAULT_UV: &str = "uv";
const PIN_DELIMITER: &str = "==";

/// Everything `add --script` accepts besides the script path.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AddRequest {
    pub packages: Vec<String>,
    pub requirements: Option<PathBuf>,
    pub extras: Vec<String>,
    pub editable: bool,
    pub branch: Option<String>,
    pub rev: Option<String>,
    pub tag: Option<String>,
    pub exclude_newer: Option<String>,
}

pub trait PackageManager {
    fn init_script(&self, script: &Path, python: Option<&str>) -> Result<(), Error>;

    fn add_to_script(&self, script: &Path, request: &AddRequest) -> Result<(), Error>;

    fn remove_from_script(&self, script: &Path, packages: &[String]) -> Result<(), Error>;

    /// Resolves `packages` (plus the requirements file) to `name==version` lines.
    fn compile_exact_versions(
        &self,
        packages: &[String],
        requirements: Option<&Path>,
        exclude_newer: Option<&str>,
    ) -> Result<Vec<String>, Error>;
}

#[derive(Clone, Debug)]
pub struct Uv {
    program: PathBuf,
}

impl Uv {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `$NBSCRIPT_UV` when set, else `uv` from `PATH`.
    pub fn from_env() -> Self {
        match std::env::var_os(UV_ENV) {
            Some(program) if !program.is_empty() => Self::new(program),
            _ => Self::new(DEFAULT_UV),
        }
    }

    fn run(&self, args: &[OsString], stdin: Option<&str>) -> Result<Output, Error> {
        tracing::debug!(
            program = %self.program.display(),
            args = %render_args(args),
            "invoking package manager"
        );
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let child = command.spawn().map_err(|err| self.spawn_error(err))?;
        let output = match stdin {
            Some(input) => wait_with_input(child, input),
            None => child.wait_with_output(),
        }
        .map_err(|err| self.spawn_error(err))?;

        if !output.status.success() {
            return Err(self.exit_error(args, &output));
        }
        Ok(output)
    }

    fn spawn_error(&self, err: std::io::Error) -> Error {
        Error::new(ErrorKind::Tool)
            .with_message("failed to run package manager")
            .with_path(&self.program)
            .with_hint(format!(
                "Install uv (https://docs.astral.sh/uv/) or point {UV_ENV} / --uv at the binary."
            ))
            .with_source(err)
    }

    fn exit_error(&self, args: &[OsString], output: &Output) -> Error {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let message = if stderr.trim().is_empty() {
            format!("package manager exited with {}", output.status)
        } else {
            stderr
        };
        Error::new(ErrorKind::Tool).with_message(message).with_hint(format!(
            "`{} {}` exited with {}",
            self.program.display(),
            subcommand(args),
            output.status
        ))
    }
}

impl Default for Uv {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PackageManager for Uv {
    fn init_script(&self, script: &Path, python: Option<&str>) -> Result<(), Error> {
        self.run(&init_args(script, python), None).map(drop)
    }

    fn add_to_script(&self, script: &Path, request: &AddRequest) -> Result<(), Error> {
        self.run(&add_args(script, request), None).map(drop)
    }

    fn remove_from_script(&self, script: &Path, packages: &[String]) -> Result<(), Error> {
        self.run(&remove_args(script, packages), None).map(drop)
    }

    fn compile_exact_versions(
        &self,
        packages: &[String],
        requirements: Option<&Path>,
        exclude_newer: Option<&str>,
    ) -> Result<Vec<String>, Error> {
        let existing = match requirements {
            Some(path) => fs::read_to_string(path)
                .map_err(|err| io_error(err, "failed to read requirements file", path))?,
            None => String::new(),
        };
        let input = requirements_text(&existing, packages);
        let output = self.run(&compile_args(true, exclude_newer), Some(&input))?;
        let pins = exact_pins(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!(count = pins.len(), "compiled exact versions");
        Ok(pins)
    }
}

pub fn init_args(script: &Path, python: Option<&str>) -> Vec<OsString> {
    let mut args = vec![OsString::from("init")];
    if let Some(python) = non_empty(python) {
        args.push("--python".into());
        args.push(python.into());
    }
    args.push("--script".into());
    args.push(script.into());
    args
}

pub fn add_args(script: &Path, request: &AddRequest) -> Vec<OsString> {
    let mut args = vec![OsString::from("add")];
    if let Some(requirements) = request
        .requirements
        .as_ref()
        .filter(|path| !path.as_os_str().is_empty())
    {
        args.push("--requirements".into());
        args.push(requirements.into());
    }
    args.extend(
        request
            .extras
            .iter()
            .filter(|extra| !extra.is_empty())
            .map(|extra| OsString::from(format!("--extra={extra}"))),
    );
    if request.editable {
        args.push("--editable".into());
    }
    push_valued_flag(&mut args, "--tag", request.tag.as_deref());
    push_valued_flag(&mut args, "--branch", request.branch.as_deref());
    push_valued_flag(&mut args, "--rev", request.rev.as_deref());
    push_valued_flag(&mut args, "--exclude-newer", request.exclude_newer.as_deref());
    args.push("--script".into());
    args.push(script.into());
    args.extend(request.packages.iter().map(OsString::from));
    args
}

pub fn remove_args(script: &Path, packages: &[String]) -> Vec<OsString> {
    let mut args = vec![OsString::from("remove"), "--script".into(), script.into()];
    args.extend(packages.iter().map(OsString::from));
    args
}

pub fn compile_args(no_deps: bool, exclude_newer: Option<&str>) -> Vec<OsString> {
    let mut args = vec![OsString::from("pip"), "compile".into()];
    if no_deps {
        args.push("--no-deps".into());
    }
    push_valued_flag(&mut args, "--exclude-newer", exclude_newer);
    args.push("-".into());
    args
}

/// Appends each package whose literal text does not already occur in
/// `existing`. This is a substring test, not a dependency comparison.
pub fn requirements_text(existing: &str, packages: &[String]) -> String {
    let mut text = existing.to_string();
    for package in packages {
        if !text.contains(package.as_str()) {
            text.push_str(package);
            text.push('\n');
        }
    }
    text
}

/// Keeps only the `name==version` lines of `pip compile` output, in order.
pub fn exact_pins(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| line.contains(PIN_DELIMITER))
        .map(str::to_string)
        .collect()
}

// stdin is written from a second thread while stdout/stderr drain.
fn wait_with_input(mut child: Child, input: &str) -> io::Result<Output> {
    let Some(mut pipe) = child.stdin.take() else {
        return child.wait_with_output();
    };
    std::thread::scope(|scope| {
        let writer = scope.spawn(move || pipe.write_all(input.as_bytes()));
        let output = child.wait_with_output()?;
        match writer.join() {
            Ok(Ok(())) => Ok(output),
            // The tool may exit without draining stdin; its exit status decides.
            Ok(Err(err)) if err.kind() == io::ErrorKind::BrokenPipe => Ok(output),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(io::Error::other("stdin writer panicked")),
        }
    })
}

// Empty values count as absent so no `--flag=` artifacts reach the tool.
fn push_valued_flag(args: &mut Vec<OsString>, flag: &str, value: Option<&str>) {
    if let Some(value) = non_empty(value) {
        args.push(format!("{flag}={value}").into());
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

// Leading words before the first flag: `add`, `pip compile`. Script paths
// are temporary and gone by the time the user reads the hint.
fn subcommand(args: &[OsString]) -> String {
    let words: Vec<OsString> = args
        .iter()
        .take_while(|arg| !arg.to_string_lossy().starts_with('-'))
        .cloned()
        .collect();
    render_args(&words)
}

fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.as_os_str())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::{
        AddRequest, PackageManager, Uv, add_args, compile_args, exact_pins, init_args,
        remove_args, requirements_text, subcommand,
    };
    use crate::core::error::ErrorKind;
    use std::ffi::OsString;
    use std::path::{Path, PathBuf};

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn empty_values_do_not_become_flags() {
        let script = Path::new("s.py");
        let request = AddRequest {
            packages: vec!["x".to_string()],
            requirements: Some(PathBuf::new()),
            extras: vec![String::new()],
            tag: Some(String::new()),
            branch: Some(String::new()),
            rev: Some(String::new()),
            exclude_newer: Some(String::new()),
            ..AddRequest::default()
        };
        assert_eq!(strings(add_args(script, &request)), ["add", "--script", "s.py", "x"]);
        assert_eq!(
            strings(init_args(script, Some(""))),
            ["init", "--script", "s.py"]
        );
        assert_eq!(
            strings(compile_args(true, Some(""))),
            ["pip", "compile", "--no-deps", "-"]
        );
    }

    #[test]
    fn subcommand_stops_at_first_flag() {
        let request = AddRequest {
            packages: vec!["rich".to_string()],
            ..AddRequest::default()
        };
        assert_eq!(subcommand(&add_args(Path::new(".nb-1.py"), &request)), "add");
        assert_eq!(subcommand(&compile_args(true, None)), "pip compile");
    }

    #[test]
    fn init_args_include_python_only_when_given() {
        let script = Path::new("dir/tmp.py");
        assert_eq!(
            strings(init_args(script, None)),
            ["init", "--script", "dir/tmp.py"]
        );
        assert_eq!(
            strings(init_args(script, Some("3.12"))),
            ["init", "--python", "3.12", "--script", "dir/tmp.py"]
        );
    }

    #[test]
    fn add_args_omit_absent_options() {
        let request = AddRequest {
            packages: vec!["requests".to_string()],
            ..AddRequest::default()
        };
        assert_eq!(
            strings(add_args(Path::new("s.py"), &request)),
            ["add", "--script", "s.py", "requests"]
        );
    }

    #[test]
    fn add_args_translate_every_option_in_order() {
        let request = AddRequest {
            packages: vec!["httpx".to_string(), "rich>=13".to_string()],
            requirements: Some(PathBuf::from("requirements.txt")),
            extras: vec!["http2".to_string(), "cli".to_string()],
            editable: true,
            branch: Some("main".to_string()),
            rev: Some("abc123".to_string()),
            tag: Some("v1.0".to_string()),
            exclude_newer: Some("2024-01-01".to_string()),
        };
        assert_eq!(
            strings(add_args(Path::new("s.py"), &request)),
            [
                "add",
                "--requirements",
                "requirements.txt",
                "--extra=http2",
                "--extra=cli",
                "--editable",
                "--tag=v1.0",
                "--branch=main",
                "--rev=abc123",
                "--exclude-newer=2024-01-01",
                "--script",
                "s.py",
                "httpx",
                "rich>=13",
            ]
        );
    }

    #[test]
    fn remove_and_compile_args() {
        assert_eq!(
            strings(remove_args(Path::new("s.py"), &["rich".to_string()])),
            ["remove", "--script", "s.py", "rich"]
        );
        assert_eq!(strings(compile_args(false, None)), ["pip", "compile", "-"]);
        assert_eq!(
            strings(compile_args(true, Some("2024-01-01"))),
            ["pip", "compile", "--no-deps", "--exclude-newer=2024-01-01", "-"]
        );
    }

    #[test]
    fn requirements_text_appends_only_missing_packages() {
        let packages = vec!["requests".to_string(), "numpy".to_string()];
        assert_eq!(requirements_text("", &packages[..1]), "requests\n");
        assert_eq!(
            requirements_text("numpy==1.26\n", &packages),
            "numpy==1.26\nrequests\n"
        );
        // Substring semantics: "requests" is considered present via "requests-oauthlib".
        assert_eq!(
            requirements_text("requests-oauthlib\n", &packages[..1]),
            "requests-oauthlib\n"
        );
    }

    #[test]
    fn exact_pins_keep_only_pinned_lines_in_order() {
        let stdout = "# This file was autogenerated by uv via the following command:\n\
                      #    uv pip compile --no-deps -\n\
                      requests==2.31.0\n\
                      \n\
                      anyio==4.2.0\n    # via httpx\n";
        assert_eq!(exact_pins(stdout), ["requests==2.31.0", "anyio==4.2.0"]);
        assert!(exact_pins("").is_empty());
    }

    #[test]
    fn missing_binary_is_a_tool_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let uv = Uv::new(temp.path().join("no-such-uv"));
        let err = uv
            .init_script(&temp.path().join("s.py"), None)
            .expect_err("spawn should fail");
        assert_eq!(err.kind(), ErrorKind::Tool);
        assert!(err.hint().is_some());
    }

    #[cfg(unix)]
    mod process {
        use super::super::{AddRequest, PackageManager, Uv};
        use crate::core::error::ErrorKind;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        fn fake_tool(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-uv");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write");
            let mut perms = std::fs::metadata(&path).expect("meta").permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).expect("chmod");
            path
        }

        #[test]
        fn compile_pipes_requirements_and_filters_output() {
            let temp = tempfile::tempdir().expect("tempdir");
            let seen = temp.path().join("stdin.txt");
            let tool = fake_tool(
                temp.path(),
                &format!(
                    "cat > '{}'\necho '# header'\necho 'requests==2.31.0'\necho '    # via -r -'",
                    seen.display()
                ),
            );
            let pins = Uv::new(tool)
                .compile_exact_versions(&["requests".to_string()], None, None)
                .expect("compile");
            assert_eq!(pins, ["requests==2.31.0"]);
            assert_eq!(std::fs::read_to_string(seen).expect("stdin"), "requests\n");
        }

        #[test]
        fn non_zero_exit_surfaces_stderr_verbatim() {
            let temp = tempfile::tempdir().expect("tempdir");
            let tool = fake_tool(temp.path(), "printf 'error: No solution found\\n' >&2\nexit 2");
            let err = Uv::new(tool)
                .add_to_script(&temp.path().join("s.py"), &AddRequest::default())
                .expect_err("tool failure");
            assert_eq!(err.kind(), ErrorKind::Tool);
            assert_eq!(err.message(), Some("error: No solution found\n"));
            let hint = err.hint().expect("hint");
            assert!(hint.contains(" add` exited with"), "{hint}");
            assert!(!hint.contains("s.py"), "{hint}");
        }
    }
}
