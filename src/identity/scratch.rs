//! Short-lived on-disk copies of embedded certificate material.
//!
//! The files live in a private temporary directory that is removed when the
//! [`ScratchMaterial`] is closed or dropped, whichever happens first.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const CERTIFICATE_FILE: &str = "pubkey.pem";
const PRIVATE_KEY_FILE: &str = "privkey.pem";

pub(crate) struct ScratchMaterial {
    dir: TempDir,
    certificate: PathBuf,
    private_key: Option<PathBuf>,
}

impl ScratchMaterial {
    /// Write the certificate (and key) into a fresh private directory under
    /// `parent`, or under the system temp directory.
    pub fn write(
        parent: Option<&Path>,
        certificate: &str,
        private_key: Option<&str>,
    ) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ccp-identity-");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };

        let certificate_path = dir.path().join(CERTIFICATE_FILE);
        write_private(&certificate_path, certificate)?;

        let private_key_path = match private_key {
            Some(key) => {
                let path = dir.path().join(PRIVATE_KEY_FILE);
                write_private(&path, key)?;
                Some(path)
            }
            None => None,
        };

        Ok(Self {
            dir,
            certificate: certificate_path,
            private_key: private_key_path,
        })
    }

    pub fn certificate_path(&self) -> &Path {
        &self.certificate
    }

    pub fn private_key_path(&self) -> Option<&Path> {
        self.private_key.as_deref()
    }

    /// Remove the directory now, reporting any failure.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

fn write_private(path: &Path, contents: &str) -> io::Result<()> {
    let mut file = create_private(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

#[cfg(unix)]
fn create_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_files_written_and_removed_on_close() {
        let parent = tempfile::tempdir().unwrap();
        let scratch = ScratchMaterial::write(Some(parent.path()), "cert", Some("key")).unwrap();

        assert_eq!(std::fs::read_to_string(scratch.certificate_path()).unwrap(), "cert");
        assert_eq!(
            std::fs::read_to_string(scratch.private_key_path().unwrap()).unwrap(),
            "key"
        );
        assert_eq!(entries(parent.path()), 1);

        scratch.close().unwrap();
        assert_eq!(entries(parent.path()), 0);
    }

    #[test]
    fn test_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        {
            let scratch = ScratchMaterial::write(Some(parent.path()), "cert", None).unwrap();
            assert!(scratch.private_key_path().is_none());
        }
        assert_eq!(entries(parent.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = ScratchMaterial::write(None, "cert", Some("key")).unwrap();
        let mode = std::fs::metadata(scratch.certificate_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
