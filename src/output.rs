/// One-line summary printed above a dump.
pub fn format_header(
    name: &str,
    size: u64,
    start: u64,
    end: u64,
    is_virtual: bool,
) -> String {
    let mode = if is_virtual { "virtual" } else { "in-memory" };
    format!("# {name}: {size} bytes, showing {start}..{end} ({mode})\n")
}

/// Formats `data` as rows of `width` hex bytes followed by their ASCII
/// rendering. `base_offset` is the file offset of `data[0]`.
pub fn format_hex_dump(
    data: &[u8],
    base_offset: u64,
    width: usize,
) -> String {
    let width = width.max(1);
    let mut out = String::new();
    for (row, chunk) in data.chunks(width).enumerate() {
        let offset = base_offset + (row * width) as u64;
        out.push_str(&format!("{offset:08x} "));
        for i in 0..width {
            if i % 8 == 0 {
                out.push(' ');
            }
            match chunk.get(i) {
                Some(b) => out.push_str(&format!("{b:02x} ")),
                None => out.push_str("   "),
            }
        }
        out.push('|');
        out.extend(chunk.iter().map(|&b| printable(b)));
        out.push_str("|\n");
    }
    out
}

fn printable(b: u8) -> char {
    if b.is_ascii_graphic() || b == b' ' {
        b as char
    } else {
        '.'
    }
}
