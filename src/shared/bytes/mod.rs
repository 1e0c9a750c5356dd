// Package bytes provides human-readable byte formatting for diagnostics.

/// Formats memory size in bytes to a human-readable string.
pub fn fmt_mem(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{}GB {}MB", b / GB, (b % GB) / MB),
        b if b >= MB => format!("{}MB {}KB", b / MB, (b % MB) / KB),
        b if b >= KB => format!("{}KB {}B", b / KB, b % KB),
        b => format!("{}B", b),
    }
}

#[cfg(test)]
mod tests {
    use super::fmt_mem;

    #[test]
    fn test_fmt_mem() {
        assert_eq!(fmt_mem(0), "0B");
        assert_eq!(fmt_mem(1023), "1023B");
        assert_eq!(fmt_mem(1024 + 5), "1KB 5B");
        assert_eq!(fmt_mem(3 * 1024 * 1024 + 2048), "3MB 2KB");
        assert_eq!(fmt_mem(2 * 1024 * 1024 * 1024), "2GB 0MB");
    }
}
