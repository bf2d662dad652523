use std::path::{Path, PathBuf};
use std::process::Command;

use super::ChromeError;

/// Resolve the absolute path to the headless browser executable.
///
/// If `override_path` is supplied and names an existing executable file, it
/// is returned immediately. If it is supplied but does not exist, resolution
/// fails without falling back to any other strategy — the caller asked for
/// a specific binary and it isn't there.
///
/// With no override, a platform-specific ordered list of well-known
/// candidate paths is consulted; the first existing one wins. If none
/// exist, the OS "find executable by name" command (`which` on Unix,
/// `where` on Windows) is invoked and its first line of output is accepted
/// if it names an existing path.
///
/// # Errors
///
/// Returns `ChromeError::NotFound` if an override was given and doesn't
/// exist, or if every other strategy is exhausted.
pub fn resolve(override_path: Option<&Path>) -> Result<PathBuf, ChromeError> {
    if let Some(p) = override_path {
        return if p.is_file() {
            Ok(p.to_path_buf())
        } else {
            Err(ChromeError::NotFound(format!(
                "override path does not name an existing executable: {}",
                p.display()
            )))
        };
    }

    for candidate in candidate_paths() {
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    if let Some(found) = find_on_path() {
        return Ok(found);
    }

    Err(ChromeError::NotFound(
        "no candidate path matched and the OS executable lookup found nothing; \
         supply an explicit browser path"
            .into(),
    ))
}

/// Invoke the OS "find executable by name" command and return the first
/// line of output if it names an existing file.
fn find_on_path() -> Option<PathBuf> {
    for name in executable_names() {
        if let Some(path) = find_one(name) {
            return Some(path);
        }
    }
    None
}

fn find_one(name: &str) -> Option<PathBuf> {
    #[cfg(not(target_os = "windows"))]
    let lookup = Command::new("which").arg(name).output();
    #[cfg(target_os = "windows")]
    let lookup = Command::new("where").arg(name).output();

    let output = lookup.ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout.lines().next()?.trim();
    if first_line.is_empty() {
        return None;
    }
    let path = PathBuf::from(first_line);
    path.is_file().then_some(path)
}

fn executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &["chrome", "chromium", "google-chrome"]
    }
    #[cfg(target_os = "linux")]
    {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium-browser",
            "chromium",
        ]
    }
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe"]
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        &[]
    }
}

/// Returns all well-known candidate executable paths for the current
/// platform, in preference order.
fn candidate_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "linux")]
    {
        let path_dirs: Vec<PathBuf> = std::env::var("PATH")
            .unwrap_or_default()
            .split(':')
            .map(PathBuf::from)
            .collect();
        let names = [
            "google-chrome",
            "google-chrome-stable",
            "chromium-browser",
            "chromium",
        ];
        let mut candidates = Vec::new();
        for name in names {
            for dir in &path_dirs {
                candidates.push(dir.join(name));
            }
        }
        candidates.push(PathBuf::from("/usr/bin/google-chrome"));
        candidates.push(PathBuf::from("/usr/bin/chromium-browser"));
        candidates.push(PathBuf::from("/usr/bin/chromium"));
        candidates
    }

    #[cfg(target_os = "windows")]
    {
        let program_files = std::env::var("ProgramFiles").unwrap_or_default();
        let program_files_x86 = std::env::var("ProgramFiles(x86)").unwrap_or_default();
        let local_app_data = std::env::var("LOCALAPPDATA").unwrap_or_default();
        vec![
            PathBuf::from(&program_files).join("Google/Chrome/Application/chrome.exe"),
            PathBuf::from(&program_files_x86).join("Google/Chrome/Application/chrome.exe"),
            PathBuf::from(&local_app_data).join("Google/Chrome/Application/chrome.exe"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        vec![]
    }
}
