//! 8.3 short-name formatting
//!
//! On-disk names are 11 bytes: 8 base characters and 3 extension
//! characters, upper-cased and space-padded, no dot.

/// Sentinel returned for an empty input name
pub const EMPTY_NAME: [u8; 11] = [0u8; 11];

/// Fixed names for the literal `.` and `..` directory entries
pub const DOT_NAME: [u8; 11] = *b".          ";
pub const DOTDOT_NAME: [u8; 11] = *b"..         ";

/// Format an arbitrary filename into its canonical 11-byte short name.
///
/// Names that fit in 8.3 are copied and padded; longer names keep their
/// first 8 characters with positions 6-7 forced to `~1` and the extension
/// right-truncated to its last 3 characters. No collision search happens
/// here; the directory engine rejects exact duplicates instead.
pub fn format_short_name(input: &str) -> [u8; 11] {
    let bytes = input.as_bytes();
    if bytes.is_empty() {
        return EMPTY_NAME;
    }

    let mut out = [b' '; 11];
    let dot = input.rfind('.');

    if bytes.len() > 11 {
        out[..8].copy_from_slice(&bytes[..8]);
        if let Some(d) = dot {
            if d + 1 < bytes.len() {
                let ext = &bytes[d + 1..];
                let ext = if ext.len() > 3 { &ext[ext.len() - 3..] } else { ext };
                out[8..8 + ext.len()].copy_from_slice(ext);
            }
        }
        out[6] = b'~';
        out[7] = b'1';
    } else {
        let base_end = dot.unwrap_or(bytes.len());
        for (i, b) in bytes[..base_end].iter().take(8).enumerate() {
            out[i] = *b;
        }
        if let Some(d) = dot {
            if d + 1 < bytes.len() {
                for (i, b) in bytes[d + 1..].iter().take(3).enumerate() {
                    out[8 + i] = *b;
                }
            }
        }
    }

    for b in &mut out {
        *b = b.to_ascii_uppercase();
    }
    out
}

/// Render an on-disk short name as `NAME.EXT` for listings.
pub fn short_name_to_string(name: &[u8; 11]) -> String {
    let base = String::from_utf8_lossy(&name[..8]).trim_end().to_string();
    let ext = String::from_utf8_lossy(&name[8..]).trim_end().to_string();
    if ext.is_empty() {
        base
    } else {
        format!("{}.{}", base, ext)
    }
}
