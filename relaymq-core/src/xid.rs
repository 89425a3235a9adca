//! XA transaction identifiers and flag constants.
//!
//! An [`Xid`] identifies a global transaction and one branch of it, following
//! the X/Open XA specification. The same value may be presented to several
//! physical connections when a transaction manager joins branches with
//! `XA_TMJOIN`, so equality and hashing are by value, never by reference.

use uuid::Uuid;

use crate::error::{RelayError, Result};

// ============================================================================
// XA Flags (from X/Open XA specification)
// ============================================================================

/// No flags set.
pub const XA_TMNOFLAGS: i32 = 0x00000000;

/// Caller is joining an existing transaction branch.
pub const XA_TMJOIN: i32 = 0x00200000;

/// Caller is resuming association with a suspended transaction branch.
pub const XA_TMRESUME: i32 = 0x08000000;

/// Dissociate caller from transaction branch - successful.
pub const XA_TMSUCCESS: i32 = 0x04000000;

/// Dissociate caller from transaction branch - failed.
pub const XA_TMFAIL: i32 = 0x20000000;

/// Caller is suspending (not ending) its association with a transaction branch.
pub const XA_TMSUSPEND: i32 = 0x02000000;

/// Start a recovery scan.
pub const XA_TMSTARTRSCAN: i32 = 0x01000000;

/// End a recovery scan.
pub const XA_TMENDRSCAN: i32 = 0x00800000;

/// Use one-phase commit optimization.
pub const XA_TMONEPHASE: i32 = 0x40000000;

/// Returns true if `flags` requests joining an existing branch.
pub fn is_join(flags: i32) -> bool {
    flags & XA_TMJOIN == XA_TMJOIN
}

/// Returns true if `flags` requests resuming a suspended branch.
pub fn is_resume(flags: i32) -> bool {
    flags & XA_TMRESUME == XA_TMRESUME
}

/// Returns true if `flags` marks the branch's work as failed.
pub fn is_fail(flags: i32) -> bool {
    flags & XA_TMFAIL == XA_TMFAIL
}

/// Returns true if `flags` suspends the branch association.
pub fn is_suspend(flags: i32) -> bool {
    flags & XA_TMSUSPEND == XA_TMSUSPEND
}

/// Returns true if `flags` requests the one-phase commit optimization.
pub fn is_one_phase(flags: i32) -> bool {
    flags & XA_TMONEPHASE == XA_TMONEPHASE
}

/// Renders `flags` as a human-readable list for trace logging.
pub fn format_flags(flags: i32) -> String {
    let mut names = Vec::new();
    if flags == XA_TMNOFLAGS {
        names.push("TMNOFLAGS");
    }
    if is_join(flags) {
        names.push("TMJOIN");
    }
    if is_resume(flags) {
        names.push("TMRESUME");
    }
    if flags & XA_TMSUCCESS == XA_TMSUCCESS {
        names.push("TMSUCCESS");
    }
    if is_fail(flags) {
        names.push("TMFAIL");
    }
    if is_suspend(flags) {
        names.push("TMSUSPEND");
    }
    if is_one_phase(flags) {
        names.push("TMONEPHASE");
    }
    if flags & XA_TMSTARTRSCAN == XA_TMSTARTRSCAN {
        names.push("TMSTARTRSCAN");
    }
    if flags & XA_TMENDRSCAN == XA_TMENDRSCAN {
        names.push("TMENDRSCAN");
    }
    names.join("|")
}

// ============================================================================
// XA Transaction Identifier (Xid)
// ============================================================================

/// XA transaction identifier following the X/Open XA specification.
///
/// An Xid uniquely identifies a global transaction and its branches. It is
/// used as the key of the branch registry, so two Xids built from the same
/// bytes compare equal regardless of where they were constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    global_transaction_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    /// Maximum length for the global transaction ID.
    pub const MAXGTRIDSIZE: usize = 64;
    /// Maximum length for the branch qualifier.
    pub const MAXBQUALSIZE: usize = 64;

    /// Creates a new XA transaction identifier.
    ///
    /// # Panics
    ///
    /// Panics if `global_transaction_id` or `branch_qualifier` exceeds the
    /// maximum size.
    pub fn new(format_id: i32, global_transaction_id: &[u8], branch_qualifier: &[u8]) -> Self {
        assert!(
            global_transaction_id.len() <= Self::MAXGTRIDSIZE,
            "Global transaction ID exceeds maximum size of {} bytes",
            Self::MAXGTRIDSIZE
        );
        assert!(
            branch_qualifier.len() <= Self::MAXBQUALSIZE,
            "Branch qualifier exceeds maximum size of {} bytes",
            Self::MAXBQUALSIZE
        );

        Self {
            format_id,
            global_transaction_id: global_transaction_id.to_vec(),
            branch_qualifier: branch_qualifier.to_vec(),
        }
    }

    /// Generates a new random Xid with the default format id.
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4();
        Self::new(0, uuid.as_bytes(), &[0u8; 8])
    }

    /// Returns the format identifier.
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// Returns the global transaction identifier.
    pub fn global_transaction_id(&self) -> &[u8] {
        &self.global_transaction_id
    }

    /// Returns the branch qualifier.
    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }

    /// Serializes the Xid to bytes for protocol transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            4 + 4 + self.global_transaction_id.len() + 4 + self.branch_qualifier.len(),
        );
        bytes.extend_from_slice(&self.format_id.to_le_bytes());
        bytes.extend_from_slice(&(self.global_transaction_id.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&self.global_transaction_id);
        bytes.extend_from_slice(&(self.branch_qualifier.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&self.branch_qualifier);
        bytes
    }

    /// Deserializes an Xid from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 12 {
            return Err(RelayError::Protocol("Xid data too short".to_string()));
        }

        let format_id = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let gtrid_len = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

        if bytes.len() < 8 + gtrid_len + 4 {
            return Err(RelayError::Protocol(
                "Xid data too short for global transaction ID".to_string(),
            ));
        }

        let global_transaction_id = bytes[8..8 + gtrid_len].to_vec();
        let bqual_offset = 8 + gtrid_len;
        let bqual_len = i32::from_le_bytes([
            bytes[bqual_offset],
            bytes[bqual_offset + 1],
            bytes[bqual_offset + 2],
            bytes[bqual_offset + 3],
        ]) as usize;

        if bytes.len() < bqual_offset + 4 + bqual_len {
            return Err(RelayError::Protocol(
                "Xid data too short for branch qualifier".to_string(),
            ));
        }

        let branch_qualifier = bytes[bqual_offset + 4..bqual_offset + 4 + bqual_len].to_vec();

        Ok(Self {
            format_id,
            global_transaction_id,
            branch_qualifier,
        })
    }
}

impl std::fmt::Display for Xid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}:", self.format_id)?;
        for byte in &self.global_transaction_id {
            write!(f, "{byte:02x}")?;
        }
        f.write_str(":")?;
        for byte in &self.branch_qualifier {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
