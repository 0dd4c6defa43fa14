//! `credctl daemon`: start the broker.

use std::fs::OpenOptions;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitCode, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _, Result};
use credctl_core::paths::{READONLY_SOCKET_ENV, SOCKET_ENV};
use credctl_core::Paths;
use credctld::logging;

use super::Context;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

pub fn run(ctx: &Context, foreground: bool, verbose: u8, quiet: bool) -> Result<ExitCode> {
    if foreground {
        return run_foreground(ctx, verbose, quiet);
    }

    if is_listening(&ctx.paths.admin_socket()) {
        eprintln!(
            "credctl daemon already running at {}",
            ctx.paths.admin_socket().display()
        );
        print!("{}", shell_exports(&ctx.paths, None));
        return Ok(ExitCode::SUCCESS);
    }

    let mut child = spawn_background(ctx, verbose, quiet)?;
    wait_for_socket(&ctx.paths.admin_socket(), &mut child, STARTUP_TIMEOUT)?;
    print!("{}", shell_exports(&ctx.paths, Some(child.id())));
    Ok(ExitCode::SUCCESS)
}

fn run_foreground(ctx: &Context, verbose: u8, quiet: bool) -> Result<ExitCode> {
    logging::init(logging::level(verbose, quiet));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting credctl daemon");

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(credctld::serve(&ctx.config, &ctx.paths))?;

    tracing::info!("credctl daemon stopped");
    Ok(ExitCode::SUCCESS)
}

/// Re-run this binary as `daemon --foreground` in a new session, logging
/// to `daemon.log`.
fn spawn_background(ctx: &Context, verbose: u8, quiet: bool) -> Result<Child> {
    let root = ctx.paths.root();
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(root)
        .with_context(|| format!("Failed to create data directory {}", root.display()))?;

    let log_path = ctx.paths.log_file();
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
    let log_err = log.try_clone().context("Failed to open log file")?;

    let exe = std::env::current_exe().context("Failed to locate credctl binary")?;
    let mut command = Command::new(exe);
    if let Some(path) = &ctx.config_path {
        command.arg("--config").arg(path);
    }
    command.arg("daemon").arg("--foreground");
    if quiet {
        command.arg("--quiet");
    } else if verbose > 0 {
        command.arg(format!("-{}", "v".repeat(verbose as usize)));
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    // Detach from the controlling terminal so closing the shell does not
    // take the daemon down.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    command.spawn().context("Failed to start daemon")
}

fn wait_for_socket(socket: &Path, child: &mut Child, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if is_listening(socket) {
            return Ok(());
        }

        if let Some(status) = child
            .try_wait()
            .context("Failed to check daemon process state")?
        {
            bail!("daemon exited during startup ({}), see the daemon log", status);
        }

        if Instant::now() >= deadline {
            bail!("timed out waiting for daemon socket {}", socket.display());
        }

        std::thread::sleep(Duration::from_millis(100));
    }
}

fn is_listening(socket: &Path) -> bool {
    UnixStream::connect(socket).is_ok()
}

/// `eval`-able lines exporting the socket locations.
fn shell_exports(paths: &Paths, pid: Option<u32>) -> String {
    let mut out = format!(
        "{env}={path}; export {env};\n",
        env = SOCKET_ENV,
        path = paths.admin_socket().display()
    );
    if paths.readonly_socket().exists() {
        out.push_str(&format!(
            "{env}={path}; export {env};\n",
            env = READONLY_SOCKET_ENV,
            path = paths.readonly_socket().display()
        ));
    }
    out.push_str(&format!(
        "CREDCTL_LOGS={}; export CREDCTL_LOGS;\n",
        paths.log_file().display()
    ));
    if let Some(pid) = pid {
        out.push_str(&format!("CREDCTL_PID={pid}; export CREDCTL_PID;\n"));
        out.push_str(&format!("echo Agent pid {pid};\n"));
    }
    out
}
