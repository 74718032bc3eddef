// Turning a request into a process invocation
//
// Program name and arguments come from indexed `arg<N>` parameters (`/cmd`),
// a shell-style command line (`/cmd2`) or the plink endpoint. Inline script
// content (`file`) is written to a temporary file appended as the last
// argument; the file lives as long as the invocation.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use webterm_handlers::{HandlerError, SessionParams};
use zeroize::Zeroizing;

use crate::allow_list::CommandTable;
use crate::openssh;

/// How the request spells its command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// `exec` names the program, `arg0..` carry the arguments.
    Indexed,
    /// `exec` is one command line, tokenised shell-style.
    CommandLine,
    /// Interactive plink session to `user@hostname`.
    Plink,
}

/// Everything needed to spawn the process for one session.
#[derive(Debug)]
pub struct Invocation {
    /// Name as requested, used for capture files.
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Frontend input becomes process input.
    pub stdin: bool,
    /// Watch output for the abandoned-connection marker.
    pub watch_abandoned: bool,
    script: Option<TempPath>,
}

impl Invocation {
    pub fn script_path(&self) -> Option<&Path> {
        self.script.as_deref()
    }
}

/// Options shared by every invocation.
#[derive(Debug, Clone, Default)]
pub struct InvocationOptions {
    /// Injected as `-M <dir>` for `snmp*` tools.
    pub mibs_dir: Option<PathBuf>,
    /// Translate `ssh` requests to OpenSSH.
    pub translate_ssh: bool,
}

impl InvocationOptions {
    pub fn for_host() -> Self {
        Self {
            mibs_dir: None,
            translate_ssh: !cfg!(windows),
        }
    }
}

/// Program name and arguments as requested.
pub fn requested_command(mode: ExecMode, params: &SessionParams) -> Result<(String, Vec<String>), HandlerError> {
    match mode {
        ExecMode::Indexed => {
            let name = params
                .get_non_empty("exec")
                .ok_or_else(|| HandlerError::MissingParameter("exec".to_string()))?;
            Ok((name.to_string(), params.indexed_args()))
        }
        ExecMode::CommandLine => {
            let line = params
                .get_non_empty("exec")
                .ok_or_else(|| HandlerError::MissingParameter("exec".to_string()))?;
            let mut words = shlex::split(line)
                .ok_or_else(|| HandlerError::InvalidParameter(format!("malformed command line: {}", line)))?
                .into_iter();
            let name = words
                .next()
                .ok_or_else(|| HandlerError::MissingParameter("exec".to_string()))?;
            Ok((name, words.collect()))
        }
        ExecMode::Plink => {
            let hostname = params.require("hostname")?;
            let user = params.get("user").unwrap_or_default();
            let password = Zeroizing::new(params.get("password").unwrap_or_default().to_string());
            let mut args = vec!["-pw".to_string(), password.to_string()];
            if let Some(port) = params.get_non_empty("port") {
                args.push("-P".to_string());
                args.push(port.to_string());
            }
            args.push(format!("{}@{}", user, hostname));
            Ok(("plink".to_string(), args))
        }
    }
}

/// Resolve a request into an [`Invocation`]. Names outside the allow-list are
/// rejected here, before anything is spawned or written.
pub fn build(
    mode: ExecMode,
    params: &SessionParams,
    table: &CommandTable,
    options: &InvocationOptions,
) -> Result<Invocation, HandlerError> {
    let (name, mut args) = requested_command(mode, params)?;
    let program = table.resolve(&name)?;
    let working_dir = params.get_non_empty("wd").map(PathBuf::from);

    let script = match params.get("file") {
        Some(content) => {
            let path = write_script(content)?;
            args.push(path.to_string_lossy().into_owned());
            Some(path)
        }
        None => None,
    };

    if name == "ssh" && options.translate_ssh {
        let translated = openssh::translate(&args)?;
        let program = table
            .get(translated.program)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(translated.program));
        return Ok(Invocation {
            name,
            program,
            args: translated.args,
            working_dir,
            stdin: true,
            watch_abandoned: false,
            script,
        });
    }

    if name.starts_with("snmp") {
        if let Some(dir) = &options.mibs_dir {
            add_mibs_dir(&mut args, dir);
        }
    } else if name == "tpt" || name == "tpt.exe" {
        args.insert(0, "-gbk=true".to_string());
    }

    let watch_abandoned = is_plink(&program);
    let stdin = mode == ExecMode::Plink || params.switch("stdin");
    Ok(Invocation {
        name,
        program,
        args,
        working_dir,
        stdin,
        watch_abandoned,
        script,
    })
}

fn write_script(content: &str) -> Result<TempPath, HandlerError> {
    let mut file = tempfile::Builder::new()
        .prefix("run")
        .tempfile()
        .map_err(|e| HandlerError::TempFile(format!("failed to create temporary file: {}", e)))?;
    file.write_all(content.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| HandlerError::TempFile(format!("failed to write temporary file: {}", e)))?;
    Ok(file.into_temp_path())
}

fn add_mibs_dir(args: &mut Vec<String>, dir: &Path) {
    if args.iter().any(|a| a == "-M") {
        return;
    }
    args.splice(0..0, ["-M".to_string(), dir.to_string_lossy().into_owned()]);
}

/// plink and plink.exe, in any case.
pub fn is_plink(program: &Path) -> bool {
    let lower = program.to_string_lossy().to_lowercase();
    lower.ends_with("plink") || lower.ends_with("plink.exe")
}
