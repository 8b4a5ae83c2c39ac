//! Listing output with BrokenPipe handling.
//!
//! Listings are often piped into `head`, which closes the pipe early. The
//! macros below turn that into an early `Ok(())` from the calling function
//! instead of an error.

/// Print with newline, handling BrokenPipe gracefully.
///
/// Returns `Ok(())` early if BrokenPipe is encountered.
/// Propagates other IO errors.
macro_rules! print_line {
    ($($arg:tt)*) => {{
        use std::io::Write;
        match writeln!(std::io::stdout(), $($arg)*) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }};
}

pub(crate) use print_line;
