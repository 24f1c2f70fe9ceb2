// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `~/.ssh` file management shared by both sides.
//!
//! The coordinator mints one key pair and every worker installs a copy, so
//! any node can SSH to any other for cooperative MPI. Everything here is
//! plain filesystem work: directory modes, key file modes, and exact-line
//! de-duplicated `authorized_keys` appends.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Private key file name.
pub const PRIVATE_KEY_FILE: &str = "id_rsa";

/// Public key file name.
pub const PUBLIC_KEY_FILE: &str = "id_rsa.pub";

/// Authorized keys file name.
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";

/// The current user's `~/.ssh`, if a home directory can be resolved.
pub fn default_ssh_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh"))
}

/// Create the SSH directory if needed and force owner-only permissions.
pub fn ensure_ssh_dir(ssh_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(ssh_dir)?;
    fs::set_permissions(ssh_dir, fs::Permissions::from_mode(0o700))
}

/// Overwrite the public key file.
pub fn write_public_key(ssh_dir: &Path, key_data: &str) -> io::Result<PathBuf> {
    ensure_ssh_dir(ssh_dir)?;
    let path = ssh_dir.join(PUBLIC_KEY_FILE);
    fs::write(&path, format!("{}\n", key_data.trim_end()))?;
    Ok(path)
}

/// Overwrite the private key file and restrict it to owner read/write.
pub fn write_private_key(ssh_dir: &Path, key_data: &str) -> io::Result<PathBuf> {
    ensure_ssh_dir(ssh_dir)?;
    let path = ssh_dir.join(PRIVATE_KEY_FILE);
    fs::write(&path, format!("{}\n", key_data.trim_end()))?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
    Ok(path)
}

/// Append a key line to `authorized_keys`, dropping any existing copies of
/// the same line first.
pub fn authorize_key(ssh_dir: &Path, key_data: &str) -> io::Result<()> {
    ensure_ssh_dir(ssh_dir)?;
    let path = ssh_dir.join(AUTHORIZED_KEYS_FILE);
    let key_line = key_data.trim_end();

    let mut lines: Vec<String> = match fs::read_to_string(&path) {
        Ok(existing) => existing
            .lines()
            .filter(|line| *line != key_line)
            .map(str::to_string)
            .collect(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err),
    };
    lines.push(key_line.to_string());

    fs::write(&path, format!("{}\n", lines.join("\n")))
}

/// Read a key file, trimmed. `Ok(None)` when the file does not exist.
pub fn read_key(ssh_dir: &Path, file_name: &str) -> io::Result<Option<String>> {
    match fs::read_to_string(ssh_dir.join(file_name)) {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_private_key_mode() {
        let dir = TempDir::new().unwrap();
        let ssh_dir = dir.path().join(".ssh");

        let path = write_private_key(&ssh_dir, "PRIVATE KEY MATERIAL").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "PRIVATE KEY MATERIAL\n"
        );
    }

    #[test]
    fn test_authorize_key_deduplicates() {
        let dir = TempDir::new().unwrap();
        let ssh_dir = dir.path().join(".ssh");

        authorize_key(&ssh_dir, "ssh-rsa AAAA node-key").unwrap();
        authorize_key(&ssh_dir, "ssh-rsa BBBB other-key").unwrap();
        authorize_key(&ssh_dir, "ssh-rsa AAAA node-key").unwrap();

        let content = fs::read_to_string(ssh_dir.join(AUTHORIZED_KEYS_FILE)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["ssh-rsa BBBB other-key", "ssh-rsa AAAA node-key"]);
    }

    #[test]
    fn test_read_key_missing() {
        let dir = TempDir::new().unwrap();
        assert!(read_key(dir.path(), PUBLIC_KEY_FILE).unwrap().is_none());
    }

    #[test]
    fn test_write_then_read_round() {
        let dir = TempDir::new().unwrap();
        let ssh_dir = dir.path().join(".ssh");

        write_public_key(&ssh_dir, "ssh-rsa CCCC coordinator\n").unwrap();
        let key = read_key(&ssh_dir, PUBLIC_KEY_FILE).unwrap().unwrap();
        assert_eq!(key, "ssh-rsa CCCC coordinator");
    }
}
