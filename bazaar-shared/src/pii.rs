use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wraps customer contact data (phone numbers, emails) so it never leaks through
/// `Debug`/`Display` in log macros. Serialization still yields the real value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Masked<T>(pub T);

impl<T: AsRef<str>> Masked<T> {
    /// Keeps the last `visible` characters, e.g. `********678`.
    pub fn tail(&self, visible: usize) -> String {
        let raw = self.0.as_ref();
        let count = raw.chars().count();
        if count <= visible {
            return "*".repeat(count);
        }
        let shown: String = raw.chars().skip(count - visible).collect();
        format!("{}{}", "*".repeat(count - visible), shown)
    }
}

impl<T: AsRef<str>> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tail(3))
    }
}

impl<T: AsRef<str>> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tail(3))
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}
