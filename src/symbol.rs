//! Interned identifiers for call names and template parameter names.
//!
//! Both are long-lived (they live for the whole process, registered once at
//! configuration time) and compared far more often than they are created, so
//! they are interned the same way the teacher crate interns rewrite-rule
//! names: via `symbol_table`'s `GlobalSymbol`.

use std::fmt;

/// The name a call is registered under in a [`crate::call::CallFactory`]
/// (e.g. `and`, `streq`, or a template's name once defined).
pub type CallName = symbol_table::GlobalSymbol;

/// A template parameter name, as it appears in `ref(x)` inside a template
/// body.
pub type ParamName = symbol_table::GlobalSymbol;

pub(crate) fn intern(s: &str) -> symbol_table::GlobalSymbol {
    symbol_table::GlobalSymbol::from(s)
}

/// Formats a symbol the way it would appear in source text.
pub(crate) struct SymDisplay(pub symbol_table::GlobalSymbol);

impl fmt::Display for SymDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let a = intern("streq");
        let b = intern("streq");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "streq");
    }
}
