use std::fmt;

/// Possible errors returned by methods on a table. All of these are
/// recoverable: a mutator that fails restores the authoritative trie
/// before returning. Structural corruption discovered at runtime is not
/// reported through this type but treated as a bug and panics, with the
/// exception of [`LpmError::Internal`] on the delete fast path.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LpmError {
    /// A node or block allocation was refused. The operation has been
    /// rolled back and can be retried once memory is available.
    AllocFailed,
    /// The prefix length exceeds 128 bits.
    PrefixLengthInvalid,
    /// The derived lookup trie contradicts the authoritative trie. The
    /// table should be considered corrupt.
    Internal,
    /// The requested prefix is not stored in the table.
    PrefixNotFound,
    /// The prefix is already stored, with an equal payload. Nothing was
    /// changed.
    AlreadyExists,
    /// The prefix is already stored, with a different payload. Nothing
    /// was changed.
    Conflict,
    /// The walk callback stopped the traversal.
    WalkAborted,
}

impl std::error::Error for LpmError {}

impl fmt::Display for LpmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LpmError::AllocFailed => {
                write!(f, "Error: Memory resource request failed.")
            }
            LpmError::PrefixLengthInvalid => {
                write!(f, "Error: The specified prefix length is invalid.")
            }
            LpmError::Internal => {
                write!(
                    f,
                    "Error: The lookup trie is inconsistent with the \
                    stored prefixes. The table is corrupt."
                )
            }
            LpmError::PrefixNotFound => {
                write!(f, "Error: The prefix cannot be found.")
            }
            LpmError::AlreadyExists => {
                write!(
                    f,
                    "Error: The prefix is already stored with this payload."
                )
            }
            LpmError::Conflict => {
                write!(
                    f,
                    "Error: The prefix is already stored with a different \
                    payload."
                )
            }
            LpmError::WalkAborted => {
                write!(f, "Error: The walk callback aborted the traversal.")
            }
        }
    }
}
