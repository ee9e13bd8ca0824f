//! Purpose: Hold top-level CLI command dispatch for `nbscript`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Business logic lives in `nbscript::sync`; this layer only maps args and output.

use super::*;

use nbscript::sync::InitOptions;
use nbscript::uv::AddRequest;

pub(super) fn dispatch_command(
    command: Command,
    sync: &Synchronizer<Uv>,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "nbscript", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output(color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Init { file, python, with } => {
            let path = sync.init(InitOptions {
                path: file,
                python,
                packages: with,
            })?;
            emit_receipt("init", &path, color_mode);
            Ok(RunOutcome::ok())
        }
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
            let request = AddRequest {
                packages,
                requirements,
                extras,
                editable,
                branch,
                rev,
                tag,
                exclude_newer,
            };
            let path = sync.add(&file, request, pin)?;
            emit_receipt("add", &path, color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Remove { file, packages } => {
            let path = sync.remove(&file, &packages)?;
            emit_receipt("remove", &path, color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Cat { file } => {
            if let Some(text) = sync.manifest_text(&file)? {
                println!("{text}");
            }
            Ok(RunOutcome::ok())
        }
    }
}
