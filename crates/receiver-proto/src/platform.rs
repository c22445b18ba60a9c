use std::path::PathBuf;

#[cfg(unix)]
pub fn mpv_socket_name(pipeline: &str) -> String {
    format!(
        "{}/receiver-mpv-{}.sock",
        std::env::temp_dir().display(),
        pipeline
    )
}

#[cfg(windows)]
pub fn mpv_socket_name(pipeline: &str) -> String {
    format!("receiver-mpv-{}", pipeline)
}

#[cfg(unix)]
pub fn mpv_socket_arg(pipeline: &str) -> String {
    format!("--input-ipc-server={}", mpv_socket_name(pipeline))
}

#[cfg(windows)]
pub fn mpv_socket_arg(pipeline: &str) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name(pipeline))
}

pub fn data_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("receiver")
    }
    #[cfg(windows)]
    {
        if let Some(dir) = beside_exe_dir("data") {
            return dir;
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("receiver")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                if exe_dir.join("config.toml").exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("receiver")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("receiver")
    }
}

#[cfg(windows)]
fn beside_exe_dir(name: &str) -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let dir = exe_path.parent()?.join(name);
    dir.exists().then_some(dir)
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Find the mpv binary used by both pipelines.
///
/// Searches in order:
/// 1. MPV_PATH environment variable
/// 2. Beside the current executable (and its `external/` folder)
/// 3. PATH
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    let exe_name = mpv_binary_name();
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            for candidate in [dir.join(exe_name), dir.join("external").join(exe_name)] {
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
    }

    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let separator = ":";
    #[cfg(windows)]
    let separator = ";";
    path.split(separator)
        .map(|dir| PathBuf::from(dir).join(exe_name))
        .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_names_differ_per_pipeline() {
        assert_ne!(mpv_socket_name("video"), mpv_socket_name("bgm"));
        assert!(mpv_socket_arg("bgm").contains("receiver-mpv-bgm"));
    }
}
