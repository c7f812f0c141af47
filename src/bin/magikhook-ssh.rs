//! magikhook-ssh - SSH activation hook
//!
//! OCI hook giving containers of an HPC allocation an SSH path between
//! nodes, backed by dropbear.
//!
//! ## Usage
//!
//! ```sh
//! magikhook-ssh keygen [--overwrite]     # host side, user identity
//! magikhook-ssh check-user-has-keys      # host side, exit-code protocol
//! magikhook-ssh activate < state.json    # runtime side, root
//! ```
//!
//! ## Environment
//!
//! | Variable        | Meaning                                             |
//! |-----------------|-----------------------------------------------------|
//! | `DROPBEAR_DIR`  | Host tree with `bin/{dropbear,dbclient,dropbearkey}`|
//! | `SERVER_PORT`   | TCP port for the in-container daemon                |
//! | `PASSWD_FILE`   | Host passwd file, uid to username                   |
//! | `HOOK_BASE_DIR` | Root of the per-user key directories                |
//! | `MAGIKHOOKS_LOG`| Log filter (tracing `EnvFilter` syntax)             |

use magikhooks::bundle::ContainerState;
use magikhooks::constants::LOG_FILTER_ENV;
use magikhooks::keys::KeygenOutcome;
use magikhooks::ssh;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Keygen { overwrite: bool },
    CheckUserHasKeys,
    Activate,
    Version,
    Help,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "keygen" => {
            let overwrite = args.iter().any(|a| a == "--overwrite");
            Ok(Command::Keygen { overwrite })
        }
        "check-user-has-keys" => Ok(Command::CheckUserHasKeys),
        "activate" => Ok(Command::Activate),
        "version" | "--version" | "-v" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        unknown => Err(format!("unknown command: {}", unknown)),
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Initializes the tracing subscriber on stderr.
///
/// Diagnostics default to warnings only; the bundle annotation (for
/// `activate`) or the environment filter can raise verbosity. Operator
/// messages do not go through tracing, they are printed directly.
fn init_logging(annotation_level: Option<&str>) {
    let filter = std::env::var(LOG_FILTER_ENV)
        .ok()
        .or_else(|| annotation_level.map(str::to_string))
        .unwrap_or_else(|| "warn".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

// =============================================================================
// Command Implementations
// =============================================================================

fn cmd_keygen(overwrite: bool) -> ExitCode {
    init_logging(None);
    match ssh::generate_ssh_keys(overwrite) {
        Ok(KeygenOutcome::Generated) => {
            eprintln!("Successfully generated SSH keys");
            ExitCode::SUCCESS
        }
        Ok(KeygenOutcome::AlreadyPresent { dir }) => {
            eprintln!(
                "SSH keys not generated because they already exist in {}. \
                 Use the '--overwrite' option to overwrite the existing keys.",
                dir.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_check_user_has_keys() -> ExitCode {
    init_logging(None);
    // the exit code is the whole protocol here: the calling shell driver
    // branches on it, so nothing operator-facing is printed
    match ssh::user_has_ssh_keys() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            info!("could not find SSH keys for the invoking user");
            ExitCode::FAILURE
        }
        Err(e) => {
            info!(error = %e, "failed to check for SSH keys");
            ExitCode::FAILURE
        }
    }
}

fn cmd_activate() -> ExitCode {
    // the state is read before logging init so the annotation level applies
    let state = match ContainerState::from_reader(std::io::stdin().lock()) {
        Ok(state) => state,
        Err(e) => {
            init_logging(None);
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(state.log_level_annotation());

    match ssh::activate(&state) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_version() {
    println!("magikhook-ssh version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"magikhook-ssh - SSH activation hook for OCI containers

USAGE:
    magikhook-ssh <command>

COMMANDS:
    keygen [--overwrite]   Generate the invoking user's SSH keys
    check-user-has-keys    Exit 0 when the key triple exists, 1 otherwise
    activate               Activate SSH in the container whose OCI state
                           arrives on standard input (runtime hook mode)
    version                Show version info
    help                   Show this help

ENVIRONMENT:
    DROPBEAR_DIR     Host dropbear tree (bin/dropbear, bin/dbclient, ...)
    SERVER_PORT      TCP port for the in-container SSH daemon
    PASSWD_FILE      Host passwd file used to map uid to username
    HOOK_BASE_DIR    Root under which per-user key directories live
    MAGIKHOOKS_LOG   Log filter, e.g. 'debug' or 'magikhooks=info'
"#
    );
}

// =============================================================================
// Main
// =============================================================================

fn main() -> ExitCode {
    match parse_args() {
        Ok(Command::Keygen { overwrite }) => cmd_keygen(overwrite),
        Ok(Command::CheckUserHasKeys) => cmd_check_user_has_keys(),
        Ok(Command::Activate) => cmd_activate(),
        Ok(Command::Version) => {
            cmd_version();
            ExitCode::SUCCESS
        }
        Ok(Command::Help) => {
            cmd_help();
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            ExitCode::FAILURE
        }
    }
}
