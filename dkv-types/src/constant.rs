//! Protocol limits shared by client and service.

/// Longest accepted key, in bytes, after whitespace trimming.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Longest accepted value, in bytes.
pub const MAX_VALUE_LENGTH: usize = 4 * 1024 * 1024;

/// Most items accepted in a single `put_batch` / `delete_batch`.
pub const MAX_BATCH_SIZE: usize = 128;

/// Payloads whose raw size reaches this threshold switch from per-item
/// structured fields to one contiguous raw section.
pub const SWITCH_RAW_DATA_SIZE: usize = 200 * 1024;

/// Ceiling on a structured message. Payloads bigger than this must travel
/// as raw sections; replies are paged to stay under it.
pub const MAX_IPC_CAPACITY: usize = 800 * 1024;

/// Hard sanity bound on any declared size, raw sections included. A legal
/// batch of maximal entries stays below it; anything above is a corrupt or
/// hostile length field.
pub const MAX_RAW_DATA_SIZE: usize = MAX_BATCH_SIZE * (MAX_KEY_LENGTH + MAX_VALUE_LENGTH + 8);

/// Per-page accumulation limit for snapshot pagination. Kept below
/// [`MAX_IPC_CAPACITY`] so framing overhead never pushes a page over.
pub const SOFT_LIMIT: usize = 700 * 1024;

/// How many partially-consumed snapshot scans the service keeps buffered.
pub const SCAN_BUFFER_SIZE: usize = 16;
