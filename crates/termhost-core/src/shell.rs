//! Shell resolution per host platform.
//!
//! Pure mapping from platform identity to a preferred shell and an ordered
//! list of fallback candidates. The first fallback is always the default.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host operating system family, as far as shell selection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Windows,
    MacOs,
    /// Linux, the BSDs, and anything unrecognised.
    Other,
}

impl Platform {
    /// Returns the platform this binary was compiled for.
    pub fn current() -> Self {
        Self::from_os_name(std::env::consts::OS)
    }

    /// Maps an OS name (`std::env::consts::OS` style, or Node style such as
    /// `win32` / `darwin`) to a platform. Unknown names map to `Other`.
    pub fn from_os_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "windows" | "win32" => Self::Windows,
            "macos" | "darwin" => Self::MacOs,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::MacOs => write!(f, "macos"),
            Self::Other => write!(f, "other"),
        }
    }
}

const WINDOWS_SHELLS: &[&str] = &["powershell.exe", "cmd.exe"];
const MACOS_SHELLS: &[&str] = &["/bin/zsh", "/bin/bash", "/bin/sh"];
const OTHER_SHELLS: &[&str] = &["/bin/bash", "/bin/sh", "/bin/dash"];

/// Returns the preferred shell for a platform.
pub fn detect_default_shell(platform: Platform) -> &'static str {
    match platform {
        Platform::Windows => "powershell.exe",
        Platform::MacOs => "/bin/zsh",
        Platform::Other => "/bin/bash",
    }
}

/// Returns the ordered fallback candidates for a platform.
pub fn fallback_shells(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Windows => WINDOWS_SHELLS,
        Platform::MacOs => MACOS_SHELLS,
        Platform::Other => OTHER_SHELLS,
    }
}

/// Builds the spawn order for a create request: the requested shell first
/// (when given and non-blank), then the platform fallbacks, without
/// duplicates.
pub fn candidate_shells(requested: Option<&str>, platform: Platform) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(4);

    let requested = requested.map(str::trim).filter(|s| !s.is_empty());
    for shell in requested.into_iter().chain(fallback_shells(platform).iter().copied()) {
        if !candidates.iter().any(|c| c == shell) {
            candidates.push(shell.to_string());
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shell_heads_fallbacks() {
        for platform in [Platform::Windows, Platform::MacOs, Platform::Other] {
            assert_eq!(
                fallback_shells(platform).first().copied(),
                Some(detect_default_shell(platform)),
                "platform {platform}"
            );
        }
    }

    #[test]
    fn test_default_shells() {
        assert_eq!(detect_default_shell(Platform::Windows), "powershell.exe");
        assert_eq!(detect_default_shell(Platform::MacOs), "/bin/zsh");
        assert_eq!(detect_default_shell(Platform::Other), "/bin/bash");
    }

    #[test]
    fn test_fallback_order() {
        assert_eq!(fallback_shells(Platform::Windows), &["powershell.exe", "cmd.exe"]);
        assert_eq!(
            fallback_shells(Platform::MacOs),
            &["/bin/zsh", "/bin/bash", "/bin/sh"]
        );
        assert_eq!(
            fallback_shells(Platform::Other),
            &["/bin/bash", "/bin/sh", "/bin/dash"]
        );
    }

    #[test]
    fn test_from_os_name() {
        assert_eq!(Platform::from_os_name("win32"), Platform::Windows);
        assert_eq!(Platform::from_os_name("Windows"), Platform::Windows);
        assert_eq!(Platform::from_os_name("darwin"), Platform::MacOs);
        assert_eq!(Platform::from_os_name("macos"), Platform::MacOs);
        assert_eq!(Platform::from_os_name("linux"), Platform::Other);
        assert_eq!(Platform::from_os_name("freebsd"), Platform::Other);
        assert_eq!(Platform::from_os_name(""), Platform::Other);
    }

    #[test]
    fn test_candidates_without_request() {
        assert_eq!(
            candidate_shells(None, Platform::Other),
            vec!["/bin/bash", "/bin/sh", "/bin/dash"]
        );
    }

    #[test]
    fn test_candidates_requested_first() {
        assert_eq!(
            candidate_shells(Some("/usr/bin/fish"), Platform::Other),
            vec!["/usr/bin/fish", "/bin/bash", "/bin/sh", "/bin/dash"]
        );
    }

    #[test]
    fn test_candidates_deduplicated() {
        assert_eq!(
            candidate_shells(Some("/bin/sh"), Platform::MacOs),
            vec!["/bin/sh", "/bin/zsh", "/bin/bash"]
        );
    }

    #[test]
    fn test_blank_request_ignored() {
        assert_eq!(
            candidate_shells(Some("  "), Platform::Windows),
            vec!["powershell.exe", "cmd.exe"]
        );
    }
}
