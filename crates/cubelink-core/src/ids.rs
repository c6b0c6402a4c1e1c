//! UUID text normalization helpers.
//!
//! The wire protocol and the static profile use three textual forms of
//! the same identifier: undashed 32-hex (cache keys), canonical dashed
//! (remote requests), and short 16-bit aliases (caller-supplied scan
//! filters). These helpers convert between them, passing through
//! anything they cannot parse. The remote rejects malformed ids
//! deterministically, so normalization stays best-effort.

use uuid::Uuid;

/// Suffix of the Bluetooth base UUID used to expand 16-bit aliases.
const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Insert canonical dashes into an undashed 32-hex UUID.
///
/// Anything that is not exactly 32 hex digits is returned untouched.
pub fn add_dashes(uuid: &str) -> String {
    if uuid.len() == 32 {
        if let Ok(parsed) = Uuid::parse_str(uuid) {
            return parsed.hyphenated().to_string();
        }
    }
    uuid.to_owned()
}

/// Remove dashes from a UUID, yielding the cache-key form.
pub fn strip_dashes(uuid: &str) -> String {
    uuid.replace('-', "")
}

/// Expand a caller-supplied service id to the canonical dashed form.
///
/// Accepts 16-bit aliases (`"180f"`, `"0x180f"`), undashed 128-bit hex,
/// and already-canonical UUIDs. Unresolvable input passes through
/// untouched.
pub fn expand_uuid(service: &str) -> String {
    let alias = service.strip_prefix("0x").unwrap_or(service);
    if alias.len() == 4 {
        if let Ok(short) = u16::from_str_radix(alias, 16) {
            return format!("{:08x}{BASE_UUID_SUFFIX}", u32::from(short));
        }
    }
    add_dashes(service)
}
