/// Longest room name accepted, counted in characters after trimming.
pub const MAX_ROOM_LEN: usize = 20;

/// Default bound on how long a mutation waits for its resource locks.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// How many times `update` re-reads a session that moved under it before giving up with `Busy`.
pub const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Idle lock-table entries are pruned once the table grows past this size.
pub const LOCK_TABLE_PRUNE_THRESHOLD: usize = 4_096;

/// Largest WAL record payload replay will allocate for. Anything bigger is treated as corruption.
pub const MAX_WAL_RECORD_BYTES: usize = 1 << 20;

/// Default number of WAL appends after which the audit binary compacts the log.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1_000;
