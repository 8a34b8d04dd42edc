use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Trailing version suffix: `.1`, `_2`, `-v3`, `v4`. A bare digit run is part
/// of the identifier itself (`AT1G01010` keeps its digits).
static VERSION_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[._-]v?|v)[0-9]+$").expect("version suffix pattern is valid")
});

/// Canonical key used for fuzzy identifier comparison.
///
/// Two identifiers are fuzzy-equal iff their normalized forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedId(String);

impl NormalizedId {
    /// Borrow the canonical string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the canonical string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercase `id` and strip one trailing version suffix.
///
/// The suffix is removed exactly once: `foo.1.2` becomes `foo.1`.
pub fn normalize(id: &str) -> NormalizedId {
    let lowered = id.to_lowercase();
    match VERSION_SUFFIX.find(&lowered) {
        Some(m) => NormalizedId(lowered[..m.start()].to_string()),
        None => NormalizedId(lowered),
    }
}

/// Key used by gold-standard reference lists.
///
/// Takes the first whitespace-delimited field, drops everything after the
/// final `.` and uppercases. Deliberately simpler than [`normalize`]; reference
/// lists produced by other tools depend on this exact rule.
pub fn gold_key(raw: &str) -> String {
    let token = raw.split_whitespace().next().unwrap_or("");
    let stem = match token.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => token,
    };
    stem.to_uppercase()
}
