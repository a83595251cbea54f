use std::{env, io::Read};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use crate::config::PtyConfig;
use crate::error::{Error, Result};

/// A process running on the slave side of a fresh pseudo-terminal.
pub struct PtyProcess {
    pub child: Box<dyn Child + Send + Sync>,
    pub killer: Box<dyn ChildKiller + Send + Sync>,
    pub reader: Box<dyn Read + Send>,
    pub master: Box<dyn MasterPty + Send>,
    pub pid: Option<u32>,
}

pub fn spawn_in_pty(command: &str, args: &[String], config: &PtyConfig) -> Result<PtyProcess> {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: config.rows,
            cols: config.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| Error::Pty(e.to_string()))?;

    let mut builder = CommandBuilder::new(command);
    builder.args(args);
    builder.env("TERM", &config.term);
    if let Ok(cwd) = env::current_dir() {
        builder.cwd(cwd);
    }

    let mut child = pair
        .slave
        .spawn_command(builder)
        .map_err(|e| Error::Spawn {
            command: command.to_string(),
            reason: e.to_string(),
        })?;
    // The reader only sees EOF once every slave handle is closed.
    drop(pair.slave);

    let reader = match pair.master.try_clone_reader() {
        Ok(reader) => reader,
        Err(e) => {
            let _ = child.kill();
            return Err(Error::Pty(e.to_string()));
        }
    };
    let killer = child.clone_killer();
    let pid = child.process_id();

    Ok(PtyProcess {
        child,
        killer,
        reader,
        master: pair.master,
        pid,
    })
}
