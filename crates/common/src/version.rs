use std::fmt;

use serde::Serialize;

/// Version and build details of a binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub build_profile: &'static str,
}

impl BuildInfo {
    pub const fn new(name: &'static str, version: &'static str) -> Self {
        Self {
            name,
            version,
            build_profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.build_profile)
    }
}

/// Build info of this library
pub fn build_info() -> BuildInfo {
    BuildInfo::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Build info of the crate invoking the macro
#[macro_export]
macro_rules! build_info {
    () => {
        $crate::version::BuildInfo::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_build_info_names_the_package() {
        let info = build_info();
        assert_eq!(info.name, "webrtc-live-common");
        assert!(info.to_string().starts_with("webrtc-live-common "));
    }
}
