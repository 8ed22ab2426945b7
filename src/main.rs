//! CLI entry point (spec.md §6): `signsky -c <config> [-d]`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use signsky::config::Config;

#[derive(Parser)]
#[command(name = "signsky", about = "Privilege-separated site-to-site VPN daemon")]
struct Args {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Stay in the foreground instead of daemonizing.
    #[arg(short = 'd', long = "foreground")]
    foreground: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("signsky: failed to load {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };

    if !args.foreground {
        if let Err(e) = daemonize() {
            eprintln!("signsky: failed to daemonize: {e}");
            return ExitCode::FAILURE;
        }
    }

    match signsky::supervisor::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("signsky: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Detach from the controlling terminal the classic double-fork way.
/// Returns in the final child with stdio redirected to `/dev/null`.
fn daemonize() -> std::io::Result<()> {
    use nix::unistd::{close, fork, setsid, ForkResult};

    match unsafe { fork() }.map_err(|e| signsky::error::other(format!("fork: {e}")))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(|e| signsky::error::other(format!("setsid: {e}")))?;

    match unsafe { fork() }.map_err(|e| signsky::error::other(format!("fork: {e}")))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {}
    }

    unsafe {
        let path = std::ffi::CString::new("/dev/null").unwrap();
        let devnull = libc::open(path.as_ptr(), libc::O_RDWR);
        if devnull >= 0 {
            libc::dup2(devnull, 0);
            libc::dup2(devnull, 1);
            libc::dup2(devnull, 2);
            if devnull > 2 {
                let _ = close(devnull);
            }
        }
    }

    Ok(())
}
