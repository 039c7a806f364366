//! Hard input limits enforced at intake.

pub const MIN_PARTY_SIZE: u8 = 1;
pub const MAX_PARTY_SIZE: u8 = 4;

pub const MAX_NAME_LEN: usize = 128;
/// RFC 5321 path limit.
pub const MAX_CONTACT_LEN: usize = 254;
pub const MAX_ACTIVITY_LEN: usize = 64;
pub const MAX_SUBTYPE_LEN: usize = 64;
pub const MAX_MEMBER_ID_LEN: usize = 128;

/// Waitlisted + active reservations the ledger will hold at once.
pub const MAX_OPEN_RESERVATIONS: usize = 10_000;

/// Audit notes kept per reservation; older notes are dropped first.
pub const MAX_NOTES_PER_RESERVATION: usize = 32;
