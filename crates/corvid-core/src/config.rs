use std::env;

/// Sizing for a [`Heap`](crate::heap::Heap) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub initial_bytes: usize,
    pub max_bytes: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            initial_bytes: 64 * 1024, // 64 KiB
            max_bytes: 256 * 1024 * 1024, // 256 MiB
        }
    }
}

impl HeapConfig {
    /// Reads `CORVID_HEAP_INITIAL_BYTES` and `CORVID_HEAP_MAX_BYTES`, keeping
    /// the defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let initial_bytes = lookup("CORVID_HEAP_INITIAL_BYTES")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.initial_bytes);
        let max_bytes = lookup("CORVID_HEAP_MAX_BYTES")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.max_bytes);
        Self {
            initial_bytes: initial_bytes.min(max_bytes),
            max_bytes,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self.initial_bytes = self.initial_bytes.min(max_bytes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_keeps_defaults() {
        let cfg = HeapConfig::from_lookup(|_| None);
        assert_eq!(cfg, HeapConfig::default());
    }

    #[test]
    fn parses_both_sizes() {
        let cfg = HeapConfig::from_lookup(|k| match k {
            "CORVID_HEAP_INITIAL_BYTES" => Some("4096".into()),
            "CORVID_HEAP_MAX_BYTES" => Some(" 1048576 ".into()),
            _ => None,
        });
        assert_eq!(cfg.initial_bytes, 4096);
        assert_eq!(cfg.max_bytes, 1048576);
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = HeapConfig::from_lookup(|k| match k {
            "CORVID_HEAP_MAX_BYTES" => Some("lots".into()),
            _ => None,
        });
        assert_eq!(cfg.max_bytes, HeapConfig::default().max_bytes);
    }

    #[test]
    fn initial_never_exceeds_max() {
        let cfg = HeapConfig::default().with_max_bytes(1024);
        assert_eq!(cfg.initial_bytes, 1024);
        assert_eq!(cfg.max_bytes, 1024);
    }
}
