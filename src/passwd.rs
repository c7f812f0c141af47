//! Parsing and writing of passwd databases.
//!
//! The SSH hook reads two passwd files: the host file named by `PASSWD_FILE`
//! (uid to username mapping) and the container's `/etc/passwd` (home
//! directory lookup and command-interpreter patching). Both use the
//! traditional 7-field colon format. The shell field may legitimately be
//! empty, so it is modeled as optional and omitted on writeback only when
//! absent.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One passwd line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub password: String,
    pub uid: u32,
    pub gid: u32,
    pub info: String,
    pub home: PathBuf,
    /// Login shell. `None` when the field is empty.
    pub shell: Option<PathBuf>,
}

/// An in-memory passwd database.
#[derive(Debug, Clone, Default)]
pub struct PasswdDb {
    entries: Vec<PasswdEntry>,
}

impl PasswdDb {
    /// Loads and parses a passwd file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::Fs {
            op: "read",
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parses passwd content. `path` is only used for error context.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            entries.push(parse_line(line, path, index + 1)?);
        }
        debug!(path = %path.display(), count = entries.len(), "parsed passwd database");
        Ok(Self { entries })
    }

    /// Username of the entry matching `uid`, if any.
    pub fn username_of(&self, uid: u32) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.uid == uid)
            .map(|e| e.name.as_str())
    }

    /// Home directory of the entry matching `uid`, if any.
    pub fn home_of(&self, uid: u32) -> Option<&Path> {
        self.entries
            .iter()
            .find(|e| e.uid == uid)
            .map(|e| e.home.as_path())
    }

    /// All entries, read-only.
    pub fn entries(&self) -> &[PasswdEntry] {
        &self.entries
    }

    /// All entries, mutable (used by the interpreter patch step).
    pub fn entries_mut(&mut self) -> &mut [PasswdEntry] {
        &mut self.entries
    }

    /// Writes the database back in the 7-field colon format.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!(
                "{}:{}:{}:{}:{}:{}:{}\n",
                entry.name,
                entry.password,
                entry.uid,
                entry.gid,
                entry.info,
                entry.home.display(),
                entry
                    .shell
                    .as_ref()
                    .map(|s| s.display().to_string())
                    .unwrap_or_default(),
            ));
        }
        fs::write(path, out).map_err(|source| Error::Fs {
            op: "write",
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_line(line: &str, path: &Path, line_no: usize) -> Result<PasswdEntry> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 7 {
        return Err(Error::PasswdParse {
            path: path.to_path_buf(),
            line: line_no,
            reason: format!("expected 7 fields, found {}", fields.len()),
        });
    }

    let parse_id = |field: &str, what: &str| -> Result<u32> {
        field.parse().map_err(|_| Error::PasswdParse {
            path: path.to_path_buf(),
            line: line_no,
            reason: format!("invalid {what} '{field}'"),
        })
    };

    Ok(PasswdEntry {
        name: fields[0].to_string(),
        password: fields[1].to_string(),
        uid: parse_id(fields[2], "uid")?,
        gid: parse_id(fields[3], "gid")?,
        info: fields[4].to_string(),
        home: PathBuf::from(fields[5]),
        shell: if fields[6].is_empty() {
            None
        } else {
            Some(PathBuf::from(fields[6]))
        },
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "root:x:0:0:root:/root:/bin/bash\n\
                          daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
                          alice:x:1000:1000:Alice:/home/alice:/bin/zsh\n\
                          ghost:x:1001:1001::/home/ghost:\n";

    #[test]
    fn test_parse_and_lookup() {
        let db = PasswdDb::parse(SAMPLE, Path::new("/etc/passwd")).unwrap();
        assert_eq!(db.entries().len(), 4);
        assert_eq!(db.username_of(1000), Some("alice"));
        assert_eq!(db.home_of(1000), Some(Path::new("/home/alice")));
        assert_eq!(db.username_of(9999), None);
    }

    #[test]
    fn test_empty_shell_is_none() {
        let db = PasswdDb::parse(SAMPLE, Path::new("/etc/passwd")).unwrap();
        assert_eq!(db.entries()[3].shell, None);
        assert_eq!(
            db.entries()[2].shell.as_deref(),
            Some(Path::new("/bin/zsh"))
        );
    }

    #[test]
    fn test_roundtrip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        let db = PasswdDb::parse(SAMPLE, &path).unwrap();
        db.write(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE);
    }

    #[test]
    fn test_malformed_line_is_rejected() {
        let err = PasswdDb::parse("not-a-passwd-line\n", Path::new("/x")).unwrap_err();
        assert!(matches!(err, Error::PasswdParse { line: 1, .. }));
    }

    #[test]
    fn test_non_numeric_uid_is_rejected() {
        let err =
            PasswdDb::parse("a:x:nope:0::/home/a:/bin/sh\n", Path::new("/x")).unwrap_err();
        assert!(matches!(err, Error::PasswdParse { .. }));
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let db = PasswdDb::parse("\nroot:x:0:0:root:/root:/bin/sh\n\n", Path::new("/x")).unwrap();
        assert_eq!(db.entries().len(), 1);
    }
}
