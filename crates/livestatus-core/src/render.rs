//! Output rendering: turns rows of [`Value`]s into wire bytes in one of
//! three formats, with optional `fixed16` response framing.
//!
//! One enum variant per format rather than `dyn Renderer`, matching the
//! catalog's preference for closed enums over trait objects wherever the
//! variant set is fixed and dispatch stays in-process.

use crate::column::Value;
use crate::request::Separators;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Csv,
    Json,
    Python,
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "csv" => OutputFormat::Csv,
            "json" => OutputFormat::Json,
            "python" => OutputFormat::Python,
            _ => return None,
        })
    }
}

/// The renderer's own state machine: a query starts the response, streams
/// zero or more dataset rows, then finishes it. `set_error` discards
/// anything staged so far — an error found mid-stream must not leave a
/// partial, misleading body behind.
pub struct Renderer {
    format: OutputFormat,
    separators: Separators,
    body: Vec<u8>,
    rows_emitted: u64,
    need_separator: bool,
}

impl Renderer {
    pub fn new(format: OutputFormat, separators: Separators) -> Self {
        Renderer {
            format,
            separators,
            body: Vec::new(),
            rows_emitted: 0,
            need_separator: false,
        }
    }

    pub fn start_of_query(&mut self) {
        if self.format == OutputFormat::Json || self.format == OutputFormat::Python {
            self.body.push(b'[');
        }
    }

    /// Emits one dataset row (a header row or a data row — the renderer
    /// does not distinguish them beyond separator placement).
    pub fn emit_row(&mut self, values: &[Value]) {
        if self.need_separator {
            match self.format {
                OutputFormat::Csv => self.body.push(self.separators.dataset),
                OutputFormat::Json | OutputFormat::Python => self.body.push(b','),
            }
        }
        match self.format {
            OutputFormat::Csv => self.emit_csv_row(values),
            OutputFormat::Json => self.emit_json_row(values),
            OutputFormat::Python => self.emit_python_row(values),
        }
        self.need_separator = true;
        self.rows_emitted += 1;
    }

    fn emit_csv_row(&mut self, values: &[Value]) {
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                self.body.push(self.separators.field);
            }
            self.emit_csv_value(v);
        }
    }

    fn emit_csv_value(&mut self, value: &Value) {
        match value {
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.body.push(self.separators.list);
                    }
                    self.body.extend_from_slice(item.as_bytes());
                }
            }
            Value::NestedList(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    if i > 0 {
                        self.body.push(self.separators.list);
                    }
                    for (j, item) in entry.iter().enumerate() {
                        if j > 0 {
                            self.body.push(self.separators.list_within);
                        }
                        self.body.extend_from_slice(item.as_bytes());
                    }
                }
            }
            // No escaping — separator bytes inside a field, or inside a
            // blob, are written raw. See spec Open Question 1.
            Value::Blob(bytes) => self.body.extend_from_slice(bytes),
            other => self.body.extend_from_slice(other.as_str().as_bytes()),
        }
    }

    fn emit_json_row(&mut self, values: &[Value]) {
        self.body.push(b'[');
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                self.body.push(b',');
            }
            json_encode_value(v, &mut self.body);
        }
        self.body.push(b']');
    }

    fn emit_python_row(&mut self, values: &[Value]) {
        self.body.push(b'[');
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                self.body.push(b',');
            }
            python_encode_value(v, &mut self.body);
        }
        self.body.push(b']');
    }

    /// Finalizes the body, closing any open array bracket.
    pub fn finish(mut self) -> Vec<u8> {
        if self.format == OutputFormat::Json || self.format == OutputFormat::Python {
            self.body.push(b']');
        }
        self.body
    }

    /// Discards everything staged so far, replacing it with nothing — the
    /// caller is responsible for writing the error status through
    /// `ResponseHeader: fixed16` framing instead.
    pub fn set_error(&mut self) {
        self.body.clear();
        self.need_separator = false;
        self.rows_emitted = 0;
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// Renders a float through `serde_json`/`ryu` rather than `std`'s `Display`,
/// which drops the decimal point for whole numbers (`1.0` -> `"1"`) and would
/// make an `avg`/`std` result indistinguishable from an int column on the
/// wire. Shared by the json and python encoders since both want the same
/// numeric literal syntax.
fn format_float(f: f64) -> String {
    serde_json::to_string(&serde_json::Number::from_f64(f).unwrap_or(0.into())).unwrap()
}

/// Appends `value` in JSON form to `out`. Numbers go through `serde_json`
/// (it already renders floats/ints the way a JSON consumer expects);
/// strings and blobs go through [`json_escape_str`] by hand, because
/// `serde_json`'s default string escaping does not `\u`-escape bytes above
/// `0x7E` the way this protocol requires.
fn json_encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Value::Float(f) => out.extend_from_slice(format_float(*f).as_bytes()),
        Value::Time(t) => out.extend_from_slice(t.to_string().as_bytes()),
        Value::Str(s) => json_escape_str(s, out),
        Value::Blob(bytes) => json_escape_str(&base64_encode(bytes), out),
        Value::List(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                json_escape_str(item, out);
            }
            out.push(b']');
        }
        Value::NestedList(entries) => {
            out.push(b'[');
            for (i, entry) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.push(b'[');
                for (j, item) in entry.iter().enumerate() {
                    if j > 0 {
                        out.push(b',');
                    }
                    json_escape_str(item, out);
                }
                out.push(b']');
            }
            out.push(b']');
        }
        Value::Null => out.extend_from_slice(b"null"),
    }
}

/// JSON-quotes `s`, `\u`-escaping every control byte and every byte above
/// `0x7E` (not just the ones JSON requires escaping) — matching the wire
/// format's stricter-than-default ASCII-safety guarantee.
fn json_escape_str(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7E => push_u_escape(c, out),
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

/// Appends one or two `\uXXXX` escapes for `ch`, using a UTF-16 surrogate
/// pair for codepoints above the BMP.
fn push_u_escape(ch: char, out: &mut Vec<u8>) {
    let cp = ch as u32;
    if cp > 0xFFFF {
        let v = cp - 0x10000;
        let hi = 0xD800 + (v >> 10);
        let lo = 0xDC00 + (v & 0x3FF);
        out.extend_from_slice(format!("\\u{hi:04x}\\u{lo:04x}").as_bytes());
    } else {
        out.extend_from_slice(format!("\\u{cp:04x}").as_bytes());
    }
}

/// Appends `value` in Python literal form: `None` for null, single-quoted
/// strings with `\x`/`\u`/`\U` escapes in place of JSON's double-quoted
/// `\u`-only scheme, everything else identical in shape to the JSON
/// encoding.
fn python_encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Value::Float(f) => out.extend_from_slice(format_float(*f).as_bytes()),
        Value::Time(t) => out.extend_from_slice(t.to_string().as_bytes()),
        Value::Str(s) => python_escape_str(s, out),
        Value::Blob(bytes) => python_escape_str(&base64_encode(bytes), out),
        Value::List(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                python_escape_str(item, out);
            }
            out.push(b']');
        }
        Value::NestedList(entries) => {
            out.push(b'[');
            for (i, entry) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.push(b'[');
                for (j, item) in entry.iter().enumerate() {
                    if j > 0 {
                        out.push(b',');
                    }
                    python_escape_str(item, out);
                }
                out.push(b']');
            }
            out.push(b']');
        }
        Value::Null => out.extend_from_slice(b"None"),
    }
}

fn python_escape_str(s: &str, out: &mut Vec<u8>) {
    out.push(b'\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.extend_from_slice(b"\\'"),
            '\\' => out.extend_from_slice(b"\\\\"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7E => {
                let cp = c as u32;
                if cp <= 0xFF {
                    out.extend_from_slice(format!("\\x{cp:02x}").as_bytes());
                } else if cp <= 0xFFFF {
                    out.extend_from_slice(format!("\\u{cp:04x}").as_bytes());
                } else {
                    out.extend_from_slice(format!("\\U{cp:08x}").as_bytes());
                }
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'\'');
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Wraps a rendered body in the `fixed16` header: a 16-byte ASCII header
/// `"<status> <len>\n"` padded to 16 bytes, followed by the body.
pub fn frame_fixed16(status: u16, body: &[u8]) -> Vec<u8> {
    let header = format!("{:>3} {:>11}\n", status, body.len());
    debug_assert_eq!(header.len(), 16);
    let mut out = Vec::with_capacity(16 + body.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_row_uses_field_separator() {
        let mut r = Renderer::new(OutputFormat::Csv, Separators::default());
        r.emit_row(&[Value::Str("a".into()), Value::Int(1)]);
        assert_eq!(r.finish(), b"a;1");
    }

    #[test]
    fn csv_list_uses_list_separator() {
        let mut r = Renderer::new(OutputFormat::Csv, Separators::default());
        r.emit_row(&[Value::List(vec!["a".into(), "b".into()])]);
        assert_eq!(r.finish(), b"a,b");
    }

    #[test]
    fn json_rows_form_an_array_of_arrays() {
        let mut r = Renderer::new(OutputFormat::Json, Separators::default());
        r.start_of_query();
        r.emit_row(&[Value::Str("a".into())]);
        r.emit_row(&[Value::Int(2)]);
        assert_eq!(r.finish(), br#"[["a"],[2]]"#);
    }

    #[test]
    fn fixed16_header_is_sixteen_bytes() {
        let framed = frame_fixed16(200, b"hello");
        assert_eq!(&framed[..16].len(), &16);
        assert_eq!(&framed[16..], b"hello");
    }

    #[test]
    fn set_error_discards_staged_rows() {
        let mut r = Renderer::new(OutputFormat::Csv, Separators::default());
        r.emit_row(&[Value::Str("a".into())]);
        r.set_error();
        assert_eq!(r.body_len(), 0);
    }

    #[test]
    fn json_escapes_non_ascii_and_control_bytes() {
        let mut out = Vec::new();
        json_escape_str("caf\u{e9}\n", &mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "\"caf\\u00e9\\u000a\"");
    }

    #[test]
    fn python_row_uses_single_quotes_and_none() {
        let mut r = Renderer::new(OutputFormat::Python, Separators::default());
        r.start_of_query();
        r.emit_row(&[Value::Str("a'b".into()), Value::Null]);
        assert_eq!(r.finish(), br"[['a\'b',None]]");
    }

    #[test]
    fn json_renders_blob_as_base64_string() {
        let mut r = Renderer::new(OutputFormat::Json, Separators::default());
        r.start_of_query();
        r.emit_row(&[Value::Blob(b"hi".to_vec())]);
        assert_eq!(r.finish(), br#"[["aGk="]]"#);
    }

    #[test]
    fn whole_number_floats_keep_a_decimal_point_in_both_formats() {
        assert_eq!(format_float(3.0), "3.0");
        let mut json = Renderer::new(OutputFormat::Json, Separators::default());
        json.start_of_query();
        json.emit_row(&[Value::Float(3.0)]);
        assert_eq!(json.finish(), br#"[[3.0]]"#);

        let mut py = Renderer::new(OutputFormat::Python, Separators::default());
        py.start_of_query();
        py.emit_row(&[Value::Float(3.0)]);
        assert_eq!(py.finish(), br#"[[3.0]]"#);
    }

    #[test]
    fn csv_nested_list_uses_list_and_host_service_separators() {
        let mut r = Renderer::new(OutputFormat::Csv, Separators::default());
        r.emit_row(&[Value::NestedList(vec![
            vec!["host1".into(), "svc1".into()],
            vec!["host2".into(), "svc2".into()],
        ])]);
        assert_eq!(r.finish(), b"host1|svc1,host2|svc2");
    }
}
