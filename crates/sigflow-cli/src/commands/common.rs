//! Shared CLI helpers used across multiple commands.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

/// Opens `path` for writing, naming it in the error.
pub fn create(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create '{}'", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Writes `value` as pretty JSON to `path`.
pub fn write_json<T: Serialize>(value: &T, path: &Path) -> anyhow::Result<()> {
    let mut writer = create(path)?;
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Formats a microsecond count the way the summaries print it.
pub fn format_us(us: f64) -> String {
    if us < 1_000.0 {
        format!("{us:.1} us")
    } else if us < 1_000_000.0 {
        format!("{:.2} ms", us / 1_000.0)
    } else {
        format!("{:.3} s", us / 1_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_pick_a_readable_unit() {
        assert_eq!(format_us(12.0), "12.0 us");
        assert_eq!(format_us(2_500.0), "2.50 ms");
        assert_eq!(format_us(3_000_000.0), "3.000 s");
    }
}
