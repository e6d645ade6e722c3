use std::path::PathBuf;

pub const DAEMON_BINARY: &str = "dwelltime-daemon";

/// The daemon binary is installed next to the cli.
pub fn to_daemon_path(mut path: PathBuf) -> PathBuf {
    path.set_file_name(DAEMON_BINARY);
    #[cfg(windows)]
    {
        path.set_extension("exe");
    }
    path
}
