use std::fmt;
use std::sync::OnceLock;

use lasso::{Key, Spur, ThreadedRodeo};

static INTERNER: OnceLock<ThreadedRodeo> = OnceLock::new();

fn interner() -> &'static ThreadedRodeo {
    INTERNER.get_or_init(ThreadedRodeo::default)
}

/// An interned name. Symbols are process-wide, so two `Symbol`s compare equal
/// iff their text is equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(Spur);

impl Symbol {
    pub fn new(s: &str) -> Self {
        Symbol(interner().get_or_intern(s))
    }

    pub fn as_str(self) -> &'static str {
        interner().resolve(&self.0)
    }

    /// The raw key stored in a symbol's 4 payload bytes.
    pub fn to_bits(self) -> u32 {
        self.0.into_usize() as u32
    }

    /// Rebuilds a symbol from stored bits; `None` if no such symbol was ever interned.
    pub fn from_bits(bits: u32) -> Option<Self> {
        let spur = Spur::try_from_usize(bits as usize)?;
        interner().try_resolve(&spur)?;
        Some(Symbol(spur))
    }
}

/// Intern a string.
pub fn intern(s: &str) -> Symbol {
    Symbol::new(s)
}

/// Resolve a symbol back to an owned String.
pub fn resolve(sym: Symbol) -> String {
    sym.as_str().to_string()
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Ordered by text, not by interning order.
impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.0 == other.0 {
            return std::cmp::Ordering::Equal;
        }
        self.as_str().cmp(other.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}
