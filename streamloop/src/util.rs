//! Small formatting and filename helpers.

const KIB: u64 = 1024;
const MIB: u64 = 1_048_576;
const GIB: u64 = 1_073_741_824;

/// Format a byte count with a B/KB/MB/GB unit.
pub fn format_bytes(size: u64) -> String {
    if size < KIB {
        format!("{size} B")
    } else if size < MIB {
        format!("{:.2} KB", size as f64 / KIB as f64)
    } else if size < GIB {
        format!("{:.2} MB", size as f64 / MIB as f64)
    } else {
        format!("{:.2} GB", size as f64 / GIB as f64)
    }
}

/// Format an elapsed second count as `HH:MM:SS`.
pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Reduce a channel name to something safe in a filename.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * MIB), "5.00 MB");
        assert_eq!(format_bytes(3 * GIB), "3.00 GB");
    }

    #[test]
    fn elapsed_wraps_minutes_and_hours() {
        assert_eq!(format_elapsed(0), "00:00:00");
        assert_eq!(format_elapsed(61), "00:01:01");
        assert_eq!(format_elapsed(3661), "01:01:01");
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("alice"), "alice");
        assert_eq!(sanitize_filename("a/b c?"), "a_b_c_");
    }
}
