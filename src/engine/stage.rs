use std::fmt;

/// Pipeline stage, in execution order.
///
/// The cache heads every execution because it wraps everything after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Cache,
    Inspector,
    Converter,
    Minification,
    Aggregator,
    BinaryCompression,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Self::Cache,
        Self::Inspector,
        Self::Converter,
        Self::Minification,
        Self::Aggregator,
        Self::BinaryCompression,
    ];

    /// Stages skipped by a best-effort execution.
    pub const BEST_EFFORT_SKIPPED: [Stage; 3] =
        [Self::Aggregator, Self::Minification, Self::BinaryCompression];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Inspector => "inspector",
            Self::Converter => "converter",
            Self::Minification => "minification",
            Self::Aggregator => "aggregator",
            Self::BinaryCompression => "binary-compression",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
