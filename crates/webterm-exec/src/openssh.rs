// plink-style arguments to OpenSSH
//
// Requests written for plink (`-batch -pw secret root@host -m script`) are
// rewritten for the OpenSSH client on hosts without plink. A password turns
// the invocation into `sshpass -p <pw> ssh ...`.

use std::path::Path;
use webterm_handlers::HandlerError;
use zeroize::Zeroizing;

/// Translated program and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSshCommand {
    /// `ssh` or `sshpass`.
    pub program: &'static str,
    pub args: Vec<String>,
}

#[derive(Default)]
struct PlinkFlags {
    password: Zeroizing<String>,
    identity: Option<String>,
}

fn parse_error(message: impl std::fmt::Display) -> HandlerError {
    HandlerError::InvalidParameter(format!("parse arguments error: {}", message))
}

/// Split leading flags from the rest, the way Go-style flag parsing does:
/// flags stop at the first non-flag, at `-` or after `--`.
fn parse_flags(args: &[String]) -> Result<(PlinkFlags, Vec<String>), HandlerError> {
    let mut flags = PlinkFlags::default();
    let mut i = 0;

    while i < args.len() {
        let arg = &args[i];
        if arg == "--" {
            i += 1;
            break;
        }
        if !arg.starts_with('-') || arg == "-" {
            break;
        }

        let body = arg.trim_start_matches('-');
        let (name, inline_value) = match body.split_once('=') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (body, None),
        };
        i += 1;

        match name {
            "batch" => {}
            "pw" | "i" => {
                let value = match inline_value {
                    Some(v) => v,
                    None => {
                        let v = args
                            .get(i)
                            .ok_or_else(|| parse_error(format!("flag needs an argument: -{}", name)))?;
                        i += 1;
                        v.clone()
                    }
                };
                if name == "pw" {
                    flags.password = Zeroizing::new(value);
                } else {
                    flags.identity = Some(value);
                }
            }
            other => return Err(parse_error(format!("flag provided but not defined: -{}", other))),
        }
    }

    Ok((flags, args[i..].to_vec()))
}

/// Rewrite plink-style arguments for OpenSSH.
///
/// `target -m file` is replaced by `target <file content>`; the content is
/// trimmed and must not be empty.
pub fn translate(args: &[String]) -> Result<OpenSshCommand, HandlerError> {
    let (flags, mut rest) = parse_flags(args)?;
    if rest.is_empty() {
        return Err(parse_error("command is missing"));
    }

    if rest.len() == 3 && rest[1] == "-m" {
        let script = Path::new(&rest[2]);
        let content = std::fs::read_to_string(script)
            .map_err(|e| parse_error(format!("cannot read {}: {}", script.display(), e)))?;
        let content = content.trim();
        if content.is_empty() {
            return Err(HandlerError::InvalidParameter(format!("{} is empty", rest[2])));
        }
        rest = vec![rest[0].clone(), content.to_string()];
    }

    let mut ssh_args = Vec::with_capacity(rest.len() + 6);
    if let Some(identity) = flags.identity {
        ssh_args.push("-i".to_string());
        ssh_args.push(identity);
    }
    ssh_args.push("-o".to_string());
    ssh_args.push("StrictHostKeyChecking=no".to_string());
    ssh_args.extend(rest);

    if flags.password.is_empty() {
        return Ok(OpenSshCommand {
            program: "ssh",
            args: ssh_args,
        });
    }

    let mut args = Vec::with_capacity(ssh_args.len() + 3);
    args.push("-p".to_string());
    args.push(flags.password.to_string());
    args.push("ssh".to_string());
    args.extend(ssh_args);
    Ok(OpenSshCommand {
        program: "sshpass",
        args,
    })
}
