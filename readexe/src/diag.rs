//! Diagnostics on stderr, prefixed with the program name.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::OnceLock;


static PROGRAM_NAME: OnceLock<String> = OnceLock::new();


/// Remembers the name the program was invoked as. Only the first call has any effect.
pub fn set_program_name(argv0: Option<&OsStr>) {
    let _ = PROGRAM_NAME.set(base_name(argv0));
}

fn base_name(argv0: Option<&OsStr>) -> String {
    argv0
        .and_then(|arg| Path::new(arg).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_owned())
}

pub fn program_name() -> &'static str {
    PROGRAM_NAME.get()
        .map(|name| name.as_str())
        .unwrap_or(env!("CARGO_PKG_NAME"))
}

pub fn warn(message: &str) {
    eprintln!("{}: {}", program_name(), message);
}

pub fn fail(status: i32, message: &str) -> ! {
    warn(message);
    std::process::exit(status)
}
