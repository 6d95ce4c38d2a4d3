use std::fmt;

/// What kind of index an [`CoreError::IndexOutOfRange`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Field,
    Parameter,
    Element,
    Argument,
    Dimension,
    Heap,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Field => write!(f, "field"),
            IndexKind::Parameter => write!(f, "parameter"),
            IndexKind::Element => write!(f, "element"),
            IndexKind::Argument => write!(f, "argument"),
            IndexKind::Dimension => write!(f, "dimension"),
            IndexKind::Heap => write!(f, "heap offset"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid tag at {addr:#x}: {reason}")]
    InvalidTag { addr: u64, reason: String },

    #[error("Index out of range: {kind} index {index}, length {len}")]
    IndexOutOfRange {
        kind: IndexKind,
        index: usize,
        len: usize,
    },

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Undefined reference: {0}")]
    UndefRef(String),

    #[error("Immutable: {0} cannot be changed")]
    Immutable(String),

    #[error("Invalid type definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid UTF-8 in string at byte {valid_up_to}")]
    InvalidUtf8 { valid_up_to: usize },

    #[error("Out of memory: requested {requested} bytes, limit {limit}")]
    OutOfMemory { requested: usize, limit: usize },
}

impl CoreError {
    pub fn invalid_tag(addr: u64, reason: impl Into<String>) -> Self {
        CoreError::InvalidTag {
            addr,
            reason: reason.into(),
        }
    }

    pub fn out_of_range(kind: IndexKind, index: usize, len: usize) -> Self {
        CoreError::IndexOutOfRange { kind, index, len }
    }

    pub fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        CoreError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn undef(what: impl Into<String>) -> Self {
        CoreError::UndefRef(what.into())
    }

    pub fn invalid_definition(msg: impl Into<String>) -> Self {
        CoreError::InvalidDefinition(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    /// True for the misuse errors a caller can trigger through bad indices or types,
    /// as opposed to heap corruption or exhaustion.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidTag { .. }
                | CoreError::IndexOutOfRange { .. }
                | CoreError::TypeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_tag_display() {
        let e = CoreError::invalid_tag(0x40, "not an object start");
        assert_eq!(e.to_string(), "Invalid tag at 0x40: not an object start");
    }

    #[test]
    fn out_of_range_display() {
        let e = CoreError::out_of_range(IndexKind::Parameter, 3, 3);
        assert_eq!(
            e.to_string(),
            "Index out of range: parameter index 3, length 3"
        );
    }

    #[test]
    fn type_mismatch_display() {
        let e = CoreError::type_mismatch("Int64", "Float64");
        assert_eq!(e.to_string(), "Type mismatch: expected Int64, got Float64");
    }

    #[test]
    fn out_of_memory_display() {
        let e = CoreError::OutOfMemory {
            requested: 128,
            limit: 64,
        };
        assert_eq!(
            e.to_string(),
            "Out of memory: requested 128 bytes, limit 64"
        );
    }

    #[test]
    fn contract_violations() {
        assert!(CoreError::invalid_tag(0, "x").is_contract_violation());
        assert!(CoreError::type_mismatch("a", "b").is_contract_violation());
        assert!(CoreError::out_of_range(IndexKind::Field, 1, 0).is_contract_violation());
        assert!(!CoreError::undef("field").is_contract_violation());
        assert!(!CoreError::OutOfMemory {
            requested: 1,
            limit: 0
        }
        .is_contract_violation());
    }
}
