//! Build metadata injected by `build.rs`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const BUILD_NUMBER: &str = env!("BUILD_NUMBER");
pub const GIT_COMMIT: &str = env!("GIT_COMMIT");
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");

/// Version and build metadata for display in `flightdeck version`
#[derive(Debug, Clone, Copy)]
pub struct VersionInfo {
    pub version: &'static str,
    pub build_number: &'static str,
    pub git_commit: &'static str,
    pub build_timestamp: &'static str,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            build_number: BUILD_NUMBER,
            git_commit: GIT_COMMIT,
            build_timestamp: BUILD_TIMESTAMP,
        }
    }

    /// Short form, e.g. `v0.1.0`
    pub fn short(&self) -> String {
        format!("v{}", self.version)
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flightdeck v{} (build {}, commit {}, built {})",
            self.version, self.build_number, self.git_commit, self.build_timestamp
        )
    }
}
