use std::hash::Hash;

/// Identity contract for navigation keys.
///
/// A key is hashable identity plus a stable, human-readable name. The
/// name is used purely for scope labels and diagnostics; equality and
/// hashing define which stack entry or switcher slot a key addresses.
/// Application key spaces are typically enums with associated data,
/// matched exhaustively at the call sites that render content.
pub trait NavKey: Clone + Eq + Hash + Send + 'static {
    fn name(&self) -> &str;
}

impl NavKey for &'static str {
    fn name(&self) -> &str {
        *self
    }
}

impl NavKey for String {
    fn name(&self) -> &str {
        self
    }
}
