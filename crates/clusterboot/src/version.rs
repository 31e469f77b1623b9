//! Build metadata emitted by `build.rs`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Short git commit SHA, or `unknown` outside a checkout
pub const GIT_SHA: &str = env!("VERGEN_GIT_SHA");

pub const GIT_BRANCH: &str = env!("VERGEN_GIT_BRANCH");

pub const GIT_DIRTY: &str = env!("VERGEN_GIT_DIRTY");

pub const RUSTC_VERSION: &str = env!("VERGEN_RUSTC_SEMVER");

pub const BUILD_TIMESTAMP: &str = env!("VERGEN_BUILD_TIMESTAMP");

pub const TARGET: &str = env!("VERGEN_CARGO_TARGET_TRIPLE");

/// `<version> (<sha>[ dirty])`
pub fn full_version() -> String {
    let dirty = if GIT_DIRTY == "true" { " dirty" } else { "" };
    format!("{VERSION} ({GIT_SHA}{dirty})")
}

/// Multi-line build details for `clusterboot version`.
pub fn build_info() -> String {
    format!(
        "clusterboot {}\n\
         commit: {}\n\
         branch: {}\n\
         built:  {}\n\
         rustc:  {}\n\
         target: {}",
        full_version(),
        GIT_SHA,
        GIT_BRANCH,
        BUILD_TIMESTAMP,
        RUSTC_VERSION,
        TARGET
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info_names_the_binary() {
        let info = build_info();
        assert!(info.starts_with("clusterboot "));
        assert!(info.contains(VERSION));
        assert!(full_version().starts_with(VERSION));
    }
}
