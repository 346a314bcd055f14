//! Utility functions shared by the workloads and the engine.
//!

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::Display;

/// Read an entire [`Bytes`] slice into a [`String`].
///
/// Returns an error if the slice contains invalid UTF-8.
pub fn string_from_bytes(buf: Bytes) -> Result<String> {
    Ok(String::from_utf8(buf.as_ref().into())?)
}

/// Borrow a [`Bytes`]-like slice as `&str`.
pub fn str_from_slice(buf: &[u8]) -> Result<&str> {
    Ok(std::str::from_utf8(buf)?)
}

/// Split an intermediate `key value` line on whitespace.
///
/// Returns [`None`] for blank lines and lines with fewer than two fields.
/// Extra fields after the value are ignored.
pub fn split_record(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split_whitespace();
    let key = parts.next()?;
    let value = parts.next()?;
    Some((key, value))
}

/// Render one `key<TAB>value` output line.
pub fn emit_line(key: impl Display, value: impl Display) -> Bytes {
    let mut writer = BytesMut::with_capacity(64);
    writer.put(format!("{}\t{}\n", key, value).as_bytes());
    writer.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_record_takes_first_two_fields() {
        assert_eq!(
            split_record("03__-73.97700,40.74500  1425"),
            Some(("03__-73.97700,40.74500", "1425"))
        );
        assert_eq!(split_record("a\tb\tc"), Some(("a", "b")));
        assert_eq!(split_record("   "), None);
        assert_eq!(split_record("lonely"), None);
    }

    #[test]
    fn emit_line_is_tab_separated() {
        assert_eq!(emit_line("k", 3).as_ref(), b"k\t3\n");
    }
}
