use std::fmt;

/// Write a hexdump of `buffer`, labelling each row with its address
/// counted from `base`.
pub fn hexdump(f: &mut fmt::Formatter, base: usize, buffer: &[u8]) -> fmt::Result {
    const COLUMNS: usize = 16;
    if buffer.is_empty() {
        return write!(f, "{:04x}: ", base);
    }
    for (index, row) in buffer.chunks(COLUMNS).enumerate() {
        if index > 0 {
            writeln!(f)?;
        }
        write!(f, "{:04x}: ", base + index * COLUMNS)?;
        for b in row {
            write!(f, "{:02x} ", b)?;
        }
        for _ in row.len()..COLUMNS {
            f.write_str("   ")?;
        }
        for &b in row {
            let c = match b {
                0x20..=0x7E => b as char,
                _ => '.',
            };
            write!(f, "{}", c)?;
        }
    }
    Ok(())
}

/// Display adapter that renders bytes with `hexdump`.
pub struct Hex<'a> {
    base: usize,
    bytes: &'a [u8],
}

impl<'a> Hex<'a> {
    /// Label rows starting at `base`, such as a drive memory address.
    pub fn at(base: usize, bytes: &'a [u8]) -> Hex<'a> {
        Hex { base, bytes }
    }
}

impl<'a> fmt::Display for Hex<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        hexdump(f, self.base, self.bytes)
    }
}

pub fn hex(bytes: &[u8]) -> Hex {
    Hex::at(0, bytes)
}

/// Parse the leading decimal integer of a byte string the way C's `atoi`
/// does: skip leading whitespace, accept a sign, stop at the first
/// non-digit.  Anything unparsable yields zero.
pub fn atoi(text: &[u8]) -> i32 {
    let mut rest = text;
    while let Some((&b, tail)) = rest.split_first() {
        if !b.is_ascii_whitespace() {
            break;
        }
        rest = tail;
    }
    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };
    let magnitude = rest
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0i32, |acc, &b| {
            acc.saturating_mul(10).saturating_add(i32::from(b - b'0'))
        });
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Interpret a port specification as a number in `0..=max`.  Missing,
/// non-numeric, or out-of-range ports mean "no preference" (zero).
pub fn port_number(port: Option<&str>, max: u32) -> u32 {
    match port.map(|p| atoi(p.as_bytes())) {
        Some(n) if n >= 0 && n as u32 <= max => n as u32,
        _ => 0,
    }
}
