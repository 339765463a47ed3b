// q_shared.rs -- infostring codec and number parsing shared by the protocol
// handlers
//
// An infostring is a flat key/value map serialised as "\key1\value1\key2...".
// Values may be empty; the first occurrence of a key wins.

/// Maximum length of a game name buffer, terminator included. Stored names
/// are truncated to GAMENAME_LENGTH - 1 bytes.
pub const GAMENAME_LENGTH: usize = 64;

/// Keys and values longer than this are truncated during parsing.
pub const MAX_INFO_TOKEN: usize = 255;

// =============================================================================
// Infostring lookup
// =============================================================================

/// Search an infostring for the value of a key.
///
/// Returns `None` if the string does not start with `\`, if it ends in the
/// middle of a key, or if the key is not present. An empty value for a
/// present key returns `Some("")`.
pub fn info_value_for_key(infostring: &str, key: &str) -> Option<String> {
    let mut chars = infostring.strip_prefix('\\')?;

    loop {
        // parse key; a string ending mid-key has no value to give
        let sep = chars.find('\\')?;
        let crt_key = truncate_to(&chars[..sep], MAX_INFO_TOKEN);
        chars = &chars[sep + 1..];

        // parse value; it may run to the end of the string
        let value = match chars.find('\\') {
            Some(pos) => {
                let v = &chars[..pos];
                chars = &chars[pos + 1..];
                v
            }
            None => {
                let v = chars;
                chars = "";
                v
            }
        };

        if crt_key == key {
            return Some(truncate_to(value, MAX_INFO_TOKEN).to_string());
        }

        if chars.is_empty() {
            return None;
        }
    }
}

/// Truncate a string to at most `max_bytes` bytes, respecting character
/// boundaries.
pub fn truncate_to(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// =============================================================================
// Number parsing
// =============================================================================

/// atoi-style parse: optional sign and leading digits, 0 when there are none.
pub fn parse_leading_int(s: &str) -> i32 {
    let s = s.trim_start();
    let (sign, digits) = match s.bytes().next() {
        Some(b'-') => (-1i64, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };

    let mut value: i64 = 0;
    for c in digits.bytes() {
        if !c.is_ascii_digit() {
            break;
        }
        value = value * 10 + i64::from(c - b'0');
        if value > i64::from(i32::MAX) {
            value = i64::from(i32::MAX);
            break;
        }
    }

    (sign * value) as i32
}

/// strtol-style strict parse: the whole string must be a signed integer.
pub fn parse_int_strict(s: &str) -> Option<i32> {
    s.parse::<i32>().ok()
}

// =============================================================================
// Tests
// =============================================================================
