/// Formats `buffer` as 16-byte hex lines, labelling each line with its
/// offset plus `base`.
pub fn hexdump(buffer: &[u8], base: u32) -> String {
    let mut str = String::new();
    for (n, row) in buffer.chunks(16).enumerate() {
        let addr = base.wrapping_add((n * 16) as u32);
        let mut line = format!("{:06x}: ", addr);
        let mut chars = String::new();
        for &byte in row {
            line.push_str(&format!("{:02x} ", byte));
            let c = byte as char;
            chars.push(if c.is_ascii_graphic() || c == ' ' {
                c
            } else {
                '.'
            });
        }

        str.push_str(&format!("{:<56} {}\n", line, chars));
    }

    str
}
