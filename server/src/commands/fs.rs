/// Filesystem commands, thin wrappers over the frame's VFS.

use colored::Colorize;
use termsh_core::{GameError, Result};

use crate::dispatch::CommandOutcome;
use crate::session::ShellSession;
use crate::style;

type Out = Result<CommandOutcome>;

fn text(s: String) -> Out {
    Ok(CommandOutcome::Output(s))
}

pub async fn pwd(sess: &mut ShellSession, _args: &[String]) -> Out {
    text(format!("{}{}", sess.vfs().pwd(), style::NEWLINE))
}

pub async fn ls(sess: &mut ShellSession, args: &[String]) -> Out {
    let mut all = false;
    let mut long = false;
    let mut path = None;
    for arg in args {
        match arg.as_str() {
            "-a" => all = true,
            "-l" => long = true,
            "-al" | "-la" => {
                all = true;
                long = true;
            }
            other if other.starts_with('-') => {
                return Err(GameError::invalid(format!("ls: unknown flag {}", other)));
            }
            other => path = Some(other),
        }
    }
    let entries = sess.vfs().ls(path, all)?;
    let mut out = String::new();
    if long {
        for entry in entries {
            let kind = if entry.is_dir { "d" } else { "-" };
            let name = if entry.is_dir {
                entry.name.bright_blue().bold().to_string()
            } else {
                entry.name.clone()
            };
            out.push_str(&format!("{} {:>6}  {}{}", kind, entry.size, name, style::NEWLINE));
        }
    } else {
        let names: Vec<String> = entries
            .into_iter()
            .map(|e| {
                if e.is_dir {
                    e.name.bright_blue().bold().to_string()
                } else {
                    e.name
                }
            })
            .collect();
        if !names.is_empty() {
            out.push_str(&names.join("  "));
            out.push_str(style::NEWLINE);
        }
    }
    text(out)
}

pub async fn cd(sess: &mut ShellSession, args: &[String]) -> Out {
    let target = args.first().map(String::as_str).unwrap_or("~");
    sess.vfs_mut().cd(target)?;
    text(String::new())
}

pub async fn cat(sess: &mut ShellSession, args: &[String]) -> Out {
    let path = args.first().ok_or_else(|| GameError::invalid("usage: cat <file>"))?;
    let content = sess.vfs().read_file(path)?;
    let mut out = String::new();
    for line in content.lines() {
        out.push_str(line);
        out.push_str(style::NEWLINE);
    }
    text(out)
}

pub async fn touch(sess: &mut ShellSession, args: &[String]) -> Out {
    let path = args.first().ok_or_else(|| GameError::invalid("usage: touch <file>"))?;
    sess.vfs_mut().touch(path)?;
    text(String::new())
}

pub async fn mkdir(sess: &mut ShellSession, args: &[String]) -> Out {
    let path = args.first().ok_or_else(|| GameError::invalid("usage: mkdir <dir>"))?;
    sess.vfs_mut().mkdir(path)?;
    text(String::new())
}

pub async fn rm(sess: &mut ShellSession, args: &[String]) -> Out {
    let mut recursive = false;
    let mut path = None;
    for arg in args {
        match arg.as_str() {
            "-r" | "-rf" => recursive = true,
            other if other.starts_with('-') => {
                return Err(GameError::invalid(format!("rm: unknown flag {}", other)));
            }
            other => path = Some(other),
        }
    }
    let path = path.ok_or_else(|| GameError::invalid("usage: rm [-r] <path>"))?;
    sess.vfs_mut().rm(path, recursive)?;
    text(String::new())
}

pub async fn cp(sess: &mut ShellSession, args: &[String]) -> Out {
    let (src, dst) = two_paths(args, "cp")?;
    sess.vfs_mut().cp(&src, &dst)?;
    text(String::new())
}

pub async fn mv(sess: &mut ShellSession, args: &[String]) -> Out {
    let (src, dst) = two_paths(args, "mv")?;
    sess.vfs_mut().mv(&src, &dst)?;
    text(String::new())
}

fn two_paths(args: &[String], name: &str) -> Result<(String, String)> {
    match args {
        [src, dst] => Ok((src.clone(), dst.clone())),
        _ => Err(GameError::invalid(format!("usage: {} <src> <dst>", name))),
    }
}

pub async fn edit(sess: &mut ShellSession, args: &[String]) -> Out {
    let path = args
        .first()
        .ok_or_else(|| GameError::invalid("usage: edit <file>"))?;
    // Touch it into existence so :save always has a target.
    sess.vfs_mut().touch(path)?;
    Ok(CommandOutcome::EnterEdit(path.clone()))
}

pub async fn clear(_sess: &mut ShellSession, _args: &[String]) -> Out {
    text(style::CLEAR_SCREEN.to_string())
}
