//! # In-Container SSH Activation
//!
//! The SSH hook gives batch jobs a way to `ssh` between the containers of
//! a multi-node allocation without an sshd in the image. It runs in three
//! modes, matching the subcommands of `magikhook-ssh`:
//!
//! | Mode                  | Identity | What happens                        |
//! |-----------------------|----------|-------------------------------------|
//! | `keygen`              | the user | generate the per-user key triple    |
//! | `check-user-has-keys` | the user | presence probe, exit-code protocol  |
//! | `activate`            | root     | stage dropbear inside the container |
//!
//! Activation is invoked by the container runtime with the OCI state on
//! standard input. It joins the container's namespaces, stages the dropbear
//! binaries and the user's keys (behind an overlay so a bind-mounted host
//! home is never touched), patches `/etc/passwd`, captures the container
//! environment for login shells, and forks a fully deprivileged dropbear.

use crate::bundle::{BundleConfig, ContainerState};
use crate::constants::{
    DROPBEAR_DIR_ENV, DROPBEAR_DIR_IN_CONTAINER, ENVIRONMENT_FILE, ENVIRONMENT_FILE_MODE,
    HOOK_BASE_DIR_ENV, HOST_KEY_FILE, INVALID_HOME, KEY_FILES, PASSWD_FILE_ENV, PROFILE_MODULE,
    PROFILE_MODULE_MODE, SERVER_PORT_ENV, SSH_SHIM, SSH_SHIM_MODE,
};
use crate::error::{Error, Result};
use crate::keys::{self, KeygenOutcome};
use crate::passwd::PasswdDb;
use crate::privilege::{self, UserIdentity};
use crate::{fsutil, mount, namespaces, subprocess};
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// =============================================================================
// Host-Side Modes
// =============================================================================

/// Generates the invoking user's key triple on the host.
///
/// Runs with the user's own identity; the key directory is derived from the
/// uid via the host passwd file.
pub fn generate_ssh_keys(overwrite: bool) -> Result<KeygenOutcome> {
    // SAFETY: getuid cannot fail.
    let uid = unsafe { libc::getuid() };
    let username = username_from_host_passwd(uid)?;
    let base = env_path(HOOK_BASE_DIR_ENV)?;
    let dropbear_dir = env_path(DROPBEAR_DIR_ENV)?;

    keys::generate(&keys::keys_dir_in_host(&base, &username), &dropbear_dir, overwrite)
}

/// Whether the invoking user's key triple is complete.
///
/// The caller converts the answer into an exit code; this is a branching
/// primitive for shell drivers, not an error path.
pub fn user_has_ssh_keys() -> Result<bool> {
    // SAFETY: getuid cannot fail.
    let uid = unsafe { libc::getuid() };
    let username = username_from_host_passwd(uid)?;
    let base = env_path(HOOK_BASE_DIR_ENV)?;

    Ok(keys::user_has_keys(&keys::keys_dir_in_host(&base, &username)))
}

// =============================================================================
// Activation
// =============================================================================

/// Activates SSH inside the container described by `state`.
pub fn activate(state: &ContainerState) -> Result<()> {
    info!("activating SSH in container");

    // read host-side configuration before the mount namespace changes
    let dropbear_dir_in_host = env_path(DROPBEAR_DIR_ENV)?;
    let server_port = env_port(SERVER_PORT_ENV)?;
    let hook_base_dir = env_path(HOOK_BASE_DIR_ENV)?;

    namespaces::enter_namespaces_of_process(state.pid)?;

    let config = BundleConfig::load(&state.bundle)?;
    let username = username_from_host_passwd(config.uid())?;

    let activation = Activation {
        bundle_dir: state.bundle.clone(),
        rootfs: config.rootfs(),
        uid: config.uid(),
        gid: config.gid(),
        server_port,
        dropbear_dir_in_host,
        keys_dir_in_host: keys::keys_dir_in_host(&hook_base_dir, &username),
        env: config.env_pairs(),
    };
    activation.run()?;

    info!("successfully activated SSH in container");
    Ok(())
}

/// Context of one activation, assembled once and read-only afterwards.
struct Activation {
    bundle_dir: PathBuf,
    rootfs: PathBuf,
    uid: u32,
    gid: u32,
    server_port: u16,
    dropbear_dir_in_host: PathBuf,
    keys_dir_in_host: PathBuf,
    env: Vec<(String, String)>,
}

impl Activation {
    fn run(&self) -> Result<()> {
        let home = self.resolve_container_home()?;
        // the container-view path and its host-view twin under the rootfs
        let ssh_dir_in_container = home.join(".ssh");
        let ssh_dir = self.rootfs.join(strip_root(&ssh_dir_in_container));
        debug!(dir = %ssh_dir.display(), "SSH key directory in container");

        self.copy_dropbear_into_container()?;
        self.setup_ssh_dir(&ssh_dir)?;
        self.copy_keys_into_container(&ssh_dir)?;
        patch_passwd_interpreters(&self.rootfs)?;
        self.write_environment_file()?;
        self.write_profile_module()?;
        self.start_daemon_in_container(&ssh_dir_in_container)?;
        self.write_ssh_client_shim()
    }

    /// Home directory of the container user according to the container's
    /// own `/etc/passwd`. An empty home or the `/nonexistent` placeholder
    /// leaves nowhere sensible to place `.ssh`.
    fn resolve_container_home(&self) -> Result<PathBuf> {
        let passwd_path = self.rootfs.join("etc/passwd");
        let passwd = PasswdDb::load(&passwd_path)?;
        let home = passwd.home_of(self.uid).ok_or_else(|| Error::UnknownUid {
            uid: self.uid,
            path: passwd_path.clone(),
        })?;
        if home.as_os_str().is_empty() || home == Path::new(INVALID_HOME) {
            return Err(Error::InvalidHomeDirectory {
                home: home.display().to_string(),
                uid: self.uid,
            });
        }
        Ok(home.to_path_buf())
    }

    fn dropbear_dir_in_container(&self) -> PathBuf {
        self.rootfs.join(DROPBEAR_DIR_IN_CONTAINER)
    }

    fn copy_dropbear_into_container(&self) -> Result<()> {
        let target = self.dropbear_dir_in_container();
        info!(dir = %target.display(), "copying dropbear binaries into container");

        for binary in ["dbclient", "dropbear"] {
            fsutil::copy_file(
                &self.dropbear_dir_in_host.join("bin").join(binary),
                &target.join("bin").join(binary),
            )?;
        }
        Ok(())
    }

    /// Creates `~/.ssh` owned by the container user and shields it with an
    /// overlay, so staged keys never reach a bind-mounted host home.
    fn setup_ssh_dir(&self, ssh_dir: &Path) -> Result<()> {
        info!(dir = %ssh_dir.display(), "setting up SSH key directory in container");

        // create as the user: the parent home may be unwritable by root in
        // a user-namespaced container
        let user = UserIdentity::user(self.uid, self.gid);
        privilege::with_identity(&user, || fsutil::create_dirs(ssh_dir))?;

        let lower = self.bundle_dir.join("overlay/ssh-lower");
        let upper = self.bundle_dir.join("overlay/ssh-upper");
        let work = self.bundle_dir.join("overlay/ssh-work");
        fsutil::create_dirs(&lower)?;
        fsutil::create_dirs_as(&upper, self.uid, self.gid)?;
        fsutil::create_dirs(&work)?;
        mount::mount_overlayfs(&lower, &upper, &work, ssh_dir)
    }

    fn copy_keys_into_container(&self, ssh_dir: &Path) -> Result<()> {
        info!("copying SSH keys into container");
        for file in KEY_FILES {
            fsutil::copy_file_as(
                &self.keys_dir_in_host.join(file),
                &ssh_dir.join(file),
                self.uid,
                self.gid,
            )?;
        }
        Ok(())
    }

    fn write_environment_file(&self) -> Result<()> {
        let path = self.dropbear_dir_in_container().join(ENVIRONMENT_FILE);
        info!(path = %path.display(), "creating login environment script");

        fsutil::create_dirs(self.dropbear_dir_in_container().as_path())?;
        fsutil::write_file_with_mode(
            &path,
            &render_environment_script(&self.env),
            ENVIRONMENT_FILE_MODE,
        )
    }

    fn write_profile_module(&self) -> Result<()> {
        let path = self.rootfs.join(PROFILE_MODULE);
        info!(path = %path.display(), "creating profile module");

        if let Some(parent) = path.parent() {
            fsutil::create_dirs(parent)?;
        }
        fsutil::write_file_with_mode(&path, &render_profile_module(), PROFILE_MODULE_MODE)
    }

    fn write_ssh_client_shim(&self) -> Result<()> {
        let path = self.rootfs.join(SSH_SHIM);
        info!(path = %path.display(), "creating ssh client shim");

        // the image may ship /usr/bin/ssh as a binary or symlink
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(Error::Fs {
                    op: "remove",
                    path,
                    source,
                });
            }
        }
        if let Some(parent) = path.parent() {
            fsutil::create_dirs(parent)?;
        }
        fsutil::write_file_with_mode(&path, &render_ssh_shim(self.server_port), SSH_SHIM_MODE)
    }

    /// Forks dropbear, reducing the child to the container user inside the
    /// rootfs before exec. Dropbear daemonizes itself, so a zero exit means
    /// the daemon is up.
    fn start_daemon_in_container(&self, ssh_dir_in_container: &Path) -> Result<()> {
        info!("starting SSH daemon in container");

        let rootfs_c =
            CString::new(self.rootfs.as_os_str().as_bytes()).map_err(|_| Error::Fs {
                op: "chroot into",
                path: self.rootfs.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"),
            })?;
        let (uid, gid) = (self.uid, self.gid);

        let argv = vec![
            format!("/{DROPBEAR_DIR_IN_CONTAINER}/bin/dropbear"),
            "-E".to_string(),
            "-r".to_string(),
            format!("{}/{HOST_KEY_FILE}", ssh_dir_in_container.display()),
            "-p".to_string(),
            self.server_port.to_string(),
        ];

        // the order is mandatory: chroot while still privileged, close the
        // capability ceiling, clear groups, gid before uid, then forbid
        // regaining anything across exec
        let status = subprocess::fork_exec_wait(&argv, move || {
            privilege::chroot_into(&rootfs_c)?;
            privilege::clear_bounding_set()?;
            privilege::clear_supplementary_groups()?;
            privilege::become_user(uid, gid)?;
            privilege::set_no_new_privs()
        })?;

        if status != 0 {
            return Err(Error::CommandFailed {
                command: argv.join(" "),
                status: format!("exited with status {status}"),
            });
        }

        info!("successfully started SSH daemon in container");
        Ok(())
    }
}

// =============================================================================
// Passwd Patching
// =============================================================================

/// Rewrites the command interpreter of every passwd entry whose listed
/// interpreter does not exist under the rootfs to `/bin/sh`, and writes the
/// database back. Returns how many entries were patched.
pub fn patch_passwd_interpreters(rootfs: &Path) -> Result<usize> {
    info!("patching container's /etc/passwd where the command interpreter is missing");

    let path = rootfs.join("etc/passwd");
    let mut db = PasswdDb::load(&path)?;
    let mut patched = 0;
    for entry in db.entries_mut() {
        if let Some(shell) = &entry.shell
            && !rootfs.join(strip_root(shell)).exists()
        {
            debug!(user = %entry.name, shell = %shell.display(), "rewriting missing interpreter");
            entry.shell = Some(PathBuf::from("/bin/sh"));
            patched += 1;
        }
    }
    db.write(&path)?;
    Ok(patched)
}

// =============================================================================
// Rendered Artifacts
// =============================================================================

/// Login environment capture: one `export` per container environment entry.
pub fn render_environment_script(env: &[(String, String)]) -> String {
    let mut script = String::from("#!/bin/sh\n");
    for (key, value) in env {
        script.push_str(&format!("export {key}=\"{value}\"\n"));
    }
    script
}

/// Profile module that restores the container environment for SSH logins.
pub fn render_profile_module() -> String {
    format!(
        "#!/bin/sh\n\
         if [ \"$SSH_CONNECTION\" ]; then\n    \
         . /{DROPBEAR_DIR_IN_CONTAINER}/{ENVIRONMENT_FILE}\n\
         fi\n"
    )
}

/// The `/usr/bin/ssh` replacement that delegates to dbclient.
pub fn render_ssh_shim(server_port: u16) -> String {
    format!("#!/bin/sh\n/{DROPBEAR_DIR_IN_CONTAINER}/bin/dbclient -y -p {server_port} $*\n")
}

// =============================================================================
// Helpers
// =============================================================================

fn username_from_host_passwd(uid: u32) -> Result<String> {
    let path = env_path(PASSWD_FILE_ENV)?;
    let db = PasswdDb::load(&path)?;
    db.username_of(uid)
        .map(str::to_string)
        .ok_or(Error::UnknownUid { uid, path })
}

fn strip_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

fn env_var(key: &'static str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::MissingEnvVar { key })
}

fn env_path(key: &'static str) -> Result<PathBuf> {
    env_var(key).map(PathBuf::from)
}

fn env_port(key: &'static str) -> Result<u16> {
    let value = env_var(key)?;
    value.parse().map_err(|_| Error::InvalidEnvVar {
        key,
        value,
        reason: "expected a TCP port number".to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_script_quotes_values() {
        let env = vec![
            ("FOO".to_string(), "bar".to_string()),
            ("BAZ".to_string(), "x y".to_string()),
        ];
        let script = render_environment_script(&env);
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("export FOO=\"bar\"\n"));
        assert!(script.contains("export BAZ=\"x y\"\n"));
    }

    #[test]
    fn test_profile_module_guards_on_ssh_connection() {
        let module = render_profile_module();
        assert!(module.contains("if [ \"$SSH_CONNECTION\" ]"));
        assert!(module.contains(". /opt/oci-hooks/dropbear/environment"));
    }

    #[test]
    fn test_ssh_shim_delegates_to_dbclient() {
        let shim = render_ssh_shim(11022);
        assert!(shim.starts_with("#!/bin/sh\n"));
        assert!(shim.contains("dbclient -y -p 11022 $*"));
    }

    #[test]
    fn test_patch_passwd_rewrites_only_missing_interpreters() {
        let rootfs = tempfile::tempdir().unwrap();
        fs::create_dir_all(rootfs.path().join("etc")).unwrap();
        fs::create_dir_all(rootfs.path().join("bin")).unwrap();
        fs::write(rootfs.path().join("bin/bash"), "").unwrap();
        fs::write(
            rootfs.path().join("etc/passwd"),
            "root:x:0:0:root:/root:/bin/bash\n\
             alice:x:1000:1000::/home/alice:/bin/zsh\n\
             noshell:x:1001:1001::/home/noshell:\n",
        )
        .unwrap();

        let patched = patch_passwd_interpreters(rootfs.path()).unwrap();
        assert_eq!(patched, 1);

        let content = fs::read_to_string(rootfs.path().join("etc/passwd")).unwrap();
        assert!(content.contains("root:x:0:0:root:/root:/bin/bash"));
        assert!(content.contains("alice:x:1000:1000::/home/alice:/bin/sh"));
        // entries without an interpreter stay untouched
        assert!(content.contains("noshell:x:1001:1001::/home/noshell:"));
    }
}
