//! How the archive reaches the case.
//!
//! ```text
//! big_size_mb > 0 && size / MiB >= big_size_mb  → bulk drop + case comment
//! otherwise                                     → direct case attachment
//! ```
//!
//! Small archives are also sent to the hint service before a case is
//! created.

pub const MIB: u64 = 1024 * 1024;

/// Archives up to this size are checked against known problems first.
pub const QUERY_HINTS_IF_SMALLER_THAN: u64 = 8 * MIB;

/// Where the archive goes once the case exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Attach the archive to the case.
    Attach,
    /// Upload to the bulk drop and reference it in a case comment.
    BulkDrop,
}

impl Delivery {
    /// Picks the delivery for an archive of `size` bytes.
    ///
    /// A `big_size_mb` of 0 turns the bulk drop off.
    pub fn for_size(size: u64, big_size_mb: u64) -> Self {
        if big_size_mb != 0 && size / MIB >= big_size_mb {
            Self::BulkDrop
        } else {
            Self::Attach
        }
    }
}

pub fn should_query_hints(size: u64) -> bool {
    size <= QUERY_HINTS_IF_SMALLER_THAN
}

/// Text of the case comment pointing at a bulk drop upload.
///
/// Not localized: it is read by support engineers, not by the user.
pub fn bulk_drop_comment(remote_filename: &str) -> String {
    format!("Problem data was uploaded to {remote_filename}")
}
