//! Where the export socket lives.

use std::path::PathBuf;

/// Returns the default export socket path.
///
/// Uses `$XDG_RUNTIME_DIR/streambridge.sock` if available,
/// otherwise falls back to `/tmp/streambridge-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("streambridge.sock")
    } else {
        #[cfg(unix)]
        // SAFETY: getuid has no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        #[cfg(not(unix))]
        let uid = 0;
        PathBuf::from(format!("/tmp/streambridge-{uid}.sock"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket_path_format() {
        let path = default_socket_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("streambridge"));
        assert!(path_str.ends_with(".sock"));
    }
}
