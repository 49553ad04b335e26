//! Configuration for the directory cache.

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use tor_config::ConfigBuildError;

/// Configuration for where and how the directory cache stores and
/// fetches its documents.
#[derive(Builder, Debug, Clone, Eq, PartialEq)]
#[builder(build_fn(error = "ConfigBuildError"))]
#[builder(derive(Debug, Serialize, Deserialize))]
#[non_exhaustive]
pub struct DirMgrConfig {
    /// Directory holding `cached-microdescs`, `cached-microdescs.new`,
    /// `cached-consensus`, and friends.
    #[builder(setter(into))]
    pub cache_dir: PathBuf,

    /// Whether to prefer microdescriptors over full router descriptors.
    /// Non-goal to support the alternative; kept as a config knob
    /// purely so a consensus of the wrong flavor is reported as
    /// misconfiguration rather than silently accepted.
    #[builder(default = "true")]
    pub use_microdescriptors: bool,

    /// Whether this instance is a bridge client, which shifts its
    /// fetch-time window later to avoid being first to ask.
    #[builder(default)]
    pub use_bridges: bool,

    /// Whether this instance is itself a directory cache, which fetches
    /// on a tighter schedule than an ordinary client so it has fresh
    /// documents ready when clients ask.
    #[builder(default)]
    pub dir_cache: bool,

    /// Whether to fetch descriptors even for relays we'd otherwise
    /// consider useless (e.g. because of policy or our own restrictions).
    #[builder(default)]
    pub fetch_useless_descriptors: bool,

    /// Whether to bother fetching the legacy v2 networkstatus format,
    /// which every modern consensus flavor has superseded.
    #[builder(default = "false")]
    pub fetch_v2_networkstatus: bool,

    /// If true, start fetching a consensus well before its predecessor
    /// expires rather than waiting for the normal window.
    #[builder(default)]
    pub fetch_dir_info_extra_early: bool,

    /// A consensus to load at startup if the cache is empty and
    /// nothing better is available yet.
    #[builder(default, setter(into, strip_option))]
    pub fallback_networkstatus_file: Option<PathBuf>,
}

impl DirMgrConfig {
    /// Start building a config.
    pub fn builder() -> DirMgrConfigBuilder {
        DirMgrConfigBuilder::default()
    }

    /// Shorthand for a config that only sets the cache directory.
    pub fn with_cache_dir(path: impl AsRef<Path>) -> Result<Self, ConfigBuildError> {
        DirMgrConfigBuilder::default().cache_dir(path.as_ref()).build()
    }
}

/// Tunable timing constants. These aren't user-configurable; they're
/// grouped here, rather than scattered through the modules that use
/// them, so that a reader auditing timing behavior has one place to
/// look.
pub mod timing {
    use super::Duration;

    /// Oldest a microdescriptor's `last_listed` may be before
    /// [`crate::mds::MicrodescStore::clean`] drops it.
    pub const TOLERATE_MICRODESC_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

    /// How long past `valid_until` a consensus still counts as
    /// "reasonably live".
    pub const REASONABLY_LIVE_TIME: Duration = Duration::from_secs(24 * 3600);

    /// How far in the future a `valid_after` can be before it's
    /// reported as clock skew.
    pub const EARLY_CONSENSUS_NOTICE_SKEW: Duration = Duration::from_secs(60);

    /// Minimum age an unverified document must reach before it's
    /// written to the cache.
    pub const CONSENSUS_MIN_SECONDS_BEFORE_CACHING: Duration = Duration::from_secs(120);

    /// How long a consensus may wait in the waiting-for-certs slot.
    pub const DELAY_WHILE_FETCHING_CERTS: Duration = Duration::from_secs(20 * 60);

    /// Retry cap for a single missing document.
    pub const CONSENSUS_NETWORKSTATUS_MAX_DL_TRIES: u32 = 8;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = DirMgrConfig::with_cache_dir("/tmp/example").unwrap();
        assert!(cfg.use_microdescriptors);
        assert!(!cfg.use_bridges);
        assert!(cfg.fallback_networkstatus_file.is_none());
    }

    #[test]
    fn missing_cache_dir_is_an_error() {
        let err = DirMgrConfigBuilder::default().build();
        assert!(err.is_err());
    }
}
