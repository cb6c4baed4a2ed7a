//! Detach the process from its controlling terminal.
//!
//! Classic double fork: the invoking process and the session leader both
//! exit with status 0, leaving a grandchild that can never reacquire a tty.
//! Must run before any threads exist, so before the tokio runtime is built.

use std::ffi::CStr;
use std::io;

use tracing::debug;

/// Turn the current process into a daemon.
///
/// Returns only in the final grandchild process. File descriptors that are
/// already open (the bound listener in particular) are inherited.
pub fn daemonize() -> io::Result<()> {
    // SAFETY: called while the process is still single-threaded.
    match unsafe { libc::fork() } {
        -1 => return Err(io::Error::last_os_error()),
        0 => {}
        _ => std::process::exit(0),
    }

    // SAFETY: plain syscall; we are now a child that is not a group leader.
    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: as above, still single-threaded.
    match unsafe { libc::fork() } {
        -1 => return Err(io::Error::last_os_error()),
        0 => {}
        _ => std::process::exit(0),
    }

    std::env::set_current_dir("/")?;
    redirect_stdio()?;
    debug!(pid = std::process::id(), "Daemonized");
    Ok(())
}

/// Point stdin, stdout and stderr at `/dev/null`.
fn redirect_stdio() -> io::Result<()> {
    const DEV_NULL: &CStr = c"/dev/null";

    // SAFETY: DEV_NULL is a valid NUL-terminated path.
    let fd = unsafe { libc::open(DEV_NULL.as_ptr(), libc::O_RDWR) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call.
        if unsafe { libc::dup2(fd, target) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    if fd > libc::STDERR_FILENO {
        // SAFETY: fd was opened above and is not one of the std descriptors.
        unsafe { libc::close(fd) };
    }
    Ok(())
}
