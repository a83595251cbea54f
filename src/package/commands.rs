//! Invocations of the package-manager executable.
//!
//! Job-producing operations (install, upgrade, ...) only build argument
//! vectors for [`JobManager::start_job`]. Listings run the tool directly with
//! captured stdout and parse the table it prints.

use std::{
    fs,
    path::PathBuf,
    process::{Command, Stdio},
};

use log::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::manager::job_manager::JobManager;
use crate::models::{
    job::JobId,
    listing::{App, Details, Update},
};
use crate::output::{
    details::parse_details,
    table::{parse_apps, parse_updates},
};

const ACCEPT_SOURCE: &str = "--accept-source-agreements";
const ACCEPT_PACKAGE: &str = "--accept-package-agreements";
const VERBOSE: &str = "--verbose";

/// Characters Windows forbids in folder names.
const FORBIDDEN_FOLDER_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone)]
pub struct PackageCommands {
    program: String,
    source: String,
    download_dir: PathBuf,
}

impl PackageCommands {
    pub fn new(program: impl Into<String>, source: impl Into<String>, download_dir: PathBuf) -> Self {
        Self {
            program: program.into(),
            source: source.into(),
            download_dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.package_manager.clone(),
            config.source.clone(),
            config.download_dir.clone(),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn install_args(&self, id: &str) -> Result<Vec<String>> {
        package_args("install", id)
    }

    pub fn uninstall_args(&self, id: &str) -> Result<Vec<String>> {
        package_args("uninstall", id)
    }

    pub fn upgrade_args(&self, id: &str) -> Result<Vec<String>> {
        package_args("upgrade", id)
    }

    pub fn download_args(&self, id: &str, name: Option<&str>) -> Result<Vec<String>> {
        let id = checked_id(id)?;
        let target = self.download_target(name);
        Ok(vec![
            "download".to_string(),
            "--id".to_string(),
            id.to_string(),
            "--download-directory".to_string(),
            target.display().to_string(),
            ACCEPT_SOURCE.to_string(),
            VERBOSE.to_string(),
        ])
    }

    /// `download_dir`, or a subfolder named after the app when the name
    /// survives sanitising.
    pub fn download_target(&self, name: Option<&str>) -> PathBuf {
        match name.map(folder_name) {
            Some(folder) if !folder.is_empty() => self.download_dir.join(folder),
            _ => self.download_dir.clone(),
        }
    }

    pub fn start_install(&self, manager: &JobManager, id: &str) -> Result<JobId> {
        Ok(manager.start_job(self.program.clone(), self.install_args(id)?))
    }

    pub fn start_uninstall(&self, manager: &JobManager, id: &str) -> Result<JobId> {
        Ok(manager.start_job(self.program.clone(), self.uninstall_args(id)?))
    }

    pub fn start_upgrade(&self, manager: &JobManager, id: &str) -> Result<JobId> {
        Ok(manager.start_job(self.program.clone(), self.upgrade_args(id)?))
    }

    /// Creates the target folder before the job starts.
    pub fn start_download(
        &self,
        manager: &JobManager,
        id: &str,
        name: Option<&str>,
    ) -> Result<JobId> {
        let args = self.download_args(id, name)?;
        fs::create_dir_all(self.download_target(name))?;
        Ok(manager.start_job(self.program.clone(), args))
    }

    pub fn search_args(&self, query: &str) -> Vec<String> {
        vec![
            "search".to_string(),
            query.to_string(),
            "-s".to_string(),
            self.source.clone(),
            ACCEPT_SOURCE.to_string(),
        ]
    }

    pub fn search(&self, query: &str) -> Result<Vec<App>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let output = self.capture(&self.search_args(query))?;
        Ok(parse_apps(&output))
    }

    pub fn list_installed(&self) -> Result<Vec<App>> {
        let output = self.capture(&["list".to_string(), ACCEPT_SOURCE.to_string()])?;
        Ok(parse_apps(&output))
    }

    pub fn list_updates(&self) -> Result<Vec<Update>> {
        let output = self.capture(&[
            "upgrade".to_string(),
            "--include-unknown".to_string(),
            ACCEPT_SOURCE.to_string(),
        ])?;
        Ok(parse_updates(&output))
    }

    pub fn details_args(&self, id: &str) -> Result<Vec<String>> {
        let id = checked_id(id)?;
        if id.chars().count() < 3 || id.starts_with('.') {
            return Err(Error::InvalidArgument(format!("package id {:?}", id)));
        }
        Ok(vec![
            "show".to_string(),
            "--id".to_string(),
            id.to_string(),
            ACCEPT_SOURCE.to_string(),
            "--disable-interactivity".to_string(),
        ])
    }

    /// `None` when the tool printed no manifest for `id`.
    pub fn details(&self, id: &str) -> Result<Option<Details>> {
        let output = self.capture(&self.details_args(id)?)?;
        let details = parse_details(&output, id.trim());
        let found = !details.name.is_empty() || !details.version.is_empty();
        Ok(found.then_some(details))
    }

    // The tool exits non-zero for outcomes like "no package found" while
    // still printing useful text, so only a silent failure is an error.
    fn capture(&self, args: &[String]) -> Result<String> {
        let command_line = format!("{} {}", self.program, args.join(" "));
        debug!("Running '{}'.", command_line);
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Spawn {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            if stdout.trim().is_empty() {
                return Err(Error::CommandFailed {
                    command: command_line,
                    code: output.status.code(),
                });
            }
            warn!(
                "'{}' exited with {:?}, parsing its output anyway.",
                command_line,
                output.status.code()
            );
        }
        Ok(stdout)
    }
}

fn package_args(verb: &str, id: &str) -> Result<Vec<String>> {
    let id = checked_id(id)?;
    Ok(vec![
        verb.to_string(),
        "--id".to_string(),
        id.to_string(),
        ACCEPT_SOURCE.to_string(),
        ACCEPT_PACKAGE.to_string(),
        VERBOSE.to_string(),
    ])
}

fn checked_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() || id.contains(char::is_whitespace) {
        return Err(Error::InvalidArgument(format!("package id {:?}", id)));
    }
    Ok(id)
}

fn folder_name(name: &str) -> String {
    name.chars()
        .filter(|c| !FORBIDDEN_FOLDER_CHARS.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}
