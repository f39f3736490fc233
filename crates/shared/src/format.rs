//! Formatting helpers for log output.

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

/// Render a byte count the way backup log lines report artifact sizes.
pub fn format_bytes(bytes: u64) -> String {
    let value = bytes as f64;
    if value >= GIB {
        format!("{:.2} GB", value / GIB)
    } else if value >= MIB {
        format!("{:.2} MB", value / MIB)
    } else if value >= KIB {
        format!("{:.2} KB", value / KIB)
    } else {
        format!("{} B", bytes)
    }
}
