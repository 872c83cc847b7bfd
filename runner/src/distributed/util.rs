use crate::config::ConfigErrors;
use once_cell::sync::Lazy;
use std::{
    ffi::{OsStr, OsString},
    path::PathBuf,
};
use tracing::error;

/// hostname of this node, resolved once
pub static HOSTNAME: Lazy<Result<OsString, nix::Error>> = Lazy::new(nix::unistd::gethostname);

pub fn hostname() -> Result<OsString, ConfigErrors> {
    match &*HOSTNAME {
        Ok(hostname) => Ok(hostname.clone()),
        Err(error) => {
            error!(error = ?error, "Failed to retrieve hostname: {error}");

            Err(ConfigErrors::Hostname(*error))
        }
    }
}

/// prefix the file name with the hostname for node-local archives, `host_waypoint.db`
pub fn prepend_hostname(input: &mut PathBuf) -> Result<(), ConfigErrors> {
    let mut file_name = hostname()?;
    file_name.push("_");
    file_name.push(input.file_name().unwrap_or(OsStr::new("waypoint.db")));
    input.set_file_name(file_name);

    Ok(())
}
