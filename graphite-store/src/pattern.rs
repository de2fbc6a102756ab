use globset::{GlobBuilder, GlobMatcher};

/// An invalid metric name pattern.
#[derive(Debug, thiserror::Error)]
#[error("invalid target pattern {pattern:?}")]
pub struct InvalidPattern {
    /// The rejected pattern.
    pub pattern: String,
    #[source]
    source: globset::Error,
}

/// A Graphite target pattern such as `servers.*.cpu` or `servers.{web,db}[0-9].load`.
///
/// Wildcards never match across the `.` separating the segments of a name.
#[derive(Clone, Debug)]
pub struct TargetPattern {
    matcher: GlobMatcher,
}

impl TargetPattern {
    /// Compiles a target into a pattern.
    pub fn new(target: &str) -> Result<Self, InvalidPattern> {
        let glob = GlobBuilder::new(&to_path(target))
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|source| InvalidPattern {
                pattern: target.to_owned(),
                source,
            })?;

        Ok(Self {
            matcher: glob.compile_matcher(),
        })
    }

    /// Returns `true` if the full metric name matches.
    pub fn is_match(&self, name: &str) -> bool {
        self.matcher.is_match(to_path(name))
    }
}

/// Maps name segments onto path components, so that globset treats dots as separators.
fn to_path(name: &str) -> String {
    name.replace('.', "/")
}
