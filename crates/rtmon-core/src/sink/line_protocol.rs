//! Line-protocol rendering.
//!
//! `measurement[,tag=value...] field=value[,field=value...] timestamp_ns\n`
//!
//! Measurement names escape commas and spaces; tag keys, tag values and
//! field keys also escape `=`. Line breaks cannot be escaped in line
//! protocol, so they are written as escaped spaces. Integer fields carry
//! the `i` suffix.

use std::fmt::Write;

use crate::sample::{FieldValue, Point};

fn escape_into(out: &mut String, s: &str, escape_eq: bool) {
    for c in s.chars() {
        match c {
            '\n' | '\r' => out.push_str("\\ "),
            ',' | ' ' => {
                out.push('\\');
                out.push(c);
            }
            '=' if escape_eq => out.push_str("\\="),
            _ => out.push(c),
        }
    }
}

/// Appends `point` to `out` as one newline-terminated line.
///
/// `extra_tags` are appended after the point's own tags.
pub fn write_line(out: &mut String, point: &Point, extra_tags: &[(&str, &str)]) {
    escape_into(out, point.measurement, false);

    let tags = point
        .tags
        .iter()
        .map(|(k, v)| (*k, v.as_str()))
        .chain(extra_tags.iter().copied());
    for (key, value) in tags {
        if value.is_empty() {
            continue;
        }
        out.push(',');
        escape_into(out, key, true);
        out.push('=');
        escape_into(out, value, true);
    }

    out.push(' ');
    for (i, (key, value)) in point.fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        escape_into(out, key, true);
        out.push('=');
        // Writing to a String cannot fail.
        let _ = match value {
            FieldValue::UInt(v) => write!(out, "{}i", v),
            FieldValue::Int(v) => write!(out, "{}i", v),
        };
    }

    let _ = writeln!(out, " {}", point.timestamp_ns);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_line() {
        let point = Point::new("cpu_core", 1700000000000000000)
            .tag("cpu", "cpu3")
            .field("user", 10u64)
            .field("idle", 90u64);
        let mut out = String::new();
        write_line(&mut out, &point, &[("hostname", "node01")]);
        assert_eq!(
            out,
            "cpu_core,cpu=cpu3,hostname=node01 user=10i,idle=90i 1700000000000000000\n"
        );
    }

    #[test]
    fn test_no_tags_and_signed_field() {
        let point = Point::new("network_stats", 42).field("rx_kib_s", -1i64);
        let mut out = String::new();
        write_line(&mut out, &point, &[]);
        assert_eq!(out, "network_stats rx_kib_s=-1i 42\n");
    }

    #[test]
    fn test_escaping() {
        let point = Point::new("my metric,x", 1)
            .tag("dev", "a b=c,d")
            .field("v", 1u64);
        let mut out = String::new();
        write_line(&mut out, &point, &[]);
        assert_eq!(out, "my\\ metric\\,x,dev=a\\ b\\=c\\,d v=1i 1\n");
    }

    #[test]
    fn test_line_breaks_stay_on_one_line() {
        let point = Point::new("network_stats", 7)
            .tag("interface", "eth0\nbogus v=1i 1")
            .field("rx_bytes", 5u64);
        let mut out = String::new();
        write_line(&mut out, &point, &[("hostname", "node\r\n01")]);
        assert_eq!(
            out,
            "network_stats,interface=eth0\\ bogus\\ v\\=1i\\ 1,hostname=node\\ \\ 01 rx_bytes=5i 7\n"
        );
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn test_empty_tag_value_is_skipped() {
        let point = Point::new("mem", 1).field("free_kib", 1u64);
        let mut out = String::new();
        write_line(&mut out, &point, &[("hostname", "")]);
        assert_eq!(out, "mem free_kib=1i 1\n");
    }
}
