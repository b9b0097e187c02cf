pub mod backend;
pub mod core;
pub mod model;
pub mod parsing;
pub mod receive;
pub mod sendstream;
pub mod sys;

/// Where the worker daemon's control socket (`daemon.sock`) and other
/// runtime-only state lives. Honors `XDG_RUNTIME_DIR` when set, otherwise
/// falls back to a fixed system path under `/run`.
pub fn runtime_dir() -> std::path::PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) => std::path::PathBuf::from(dir).join("btrsync"),
        None => std::path::PathBuf::from("/run/btrsync"),
    }
}

#[cfg(test)]
mod tests {
    pub mod prelude {
        pub use indoc::indoc;
        pub use serial_test::serial;
    }
}
