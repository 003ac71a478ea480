//! Percent-encoding and query string handling
//!
//! Resources travel on the wire exactly as the client wrote them, except that
//! the hex digits of percent-escapes are lowercased. Servers keep the raw
//! resource for routing and decode the query component on demand.

use std::fmt;

/// Lowercase the hex digits of every well-formed percent-escape.
///
/// Nothing is decoded. Malformed escapes (a `%` not followed by two hex
/// digits) and all other characters are copied through unchanged.
pub fn normalize(resource: &str) -> String {
    let mut out = String::with_capacity(resource.len());
    let mut rest = resource;

    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        out.push('%');
        let tail = &rest[pos + 1..];
        match tail.as_bytes() {
            [hi, lo, ..] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                out.push(char::from(hi.to_ascii_lowercase()));
                out.push(char::from(lo.to_ascii_lowercase()));
                rest = &tail[2..];
            }
            _ => rest = tail,
        }
    }

    out.push_str(rest);
    out
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Decode one query component.
///
/// `+` becomes a space and `%XX` becomes the byte it names. A `%` that does
/// not start a valid triplet is kept literally. Byte sequences that are not
/// valid UTF-8 are replaced with U+FFFD.
pub fn percent_decode(component: &str) -> String {
    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encode a query component.
///
/// Only the unreserved characters `A-Z a-z 0-9 - _ . ~` are left as is;
/// every other byte is written as `%xx` with lowercase hex.
pub fn encode(component: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";

    let mut out = String::with_capacity(component.len() * 3);
    for &b in component.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(b));
        } else {
            out.push('%');
            out.push(char::from(HEX[usize::from(b >> 4)]));
            out.push(char::from(HEX[usize::from(b & 0x0f)]));
        }
    }
    out
}

/// Split a resource into its path and optional query component.
pub fn split_resource(resource: &str) -> (&str, Option<&str>) {
    match resource.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (resource, None),
    }
}

/// Decode a query string into its arguments.
///
/// Segments are separated by `&`; a segment without `=` yields an empty
/// value and empty segments are skipped. When a name repeats, the last value
/// wins.
pub fn decode_query(query: &str) -> QueryArgs {
    let mut args = QueryArgs::new();
    for segment in query.split('&').filter(|s| !s.is_empty()) {
        let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
        args.insert(percent_decode(name), percent_decode(value));
    }
    args
}

/// Decoded query arguments in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryArgs {
    args: Vec<(String, String)>,
}

impl QueryArgs {
    /// Create an empty argument set
    pub fn new() -> Self {
        QueryArgs { args: Vec::new() }
    }

    /// Insert an argument, replacing the value of an existing one.
    ///
    /// Returns the previous value if the name was already present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();

        match self.args.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.args.push((name, value));
                None
            }
        }
    }

    /// Get the value of an argument
    pub fn get(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Check if an argument is present
    pub fn contains(&self, name: &str) -> bool {
        self.args.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Iterate over all arguments
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.args.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Encode the arguments as a query string, without the leading `?`
    pub fn to_query_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QueryArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}={}", encode(name), encode(value))?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for QueryArgs {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut args = QueryArgs::new();
        for (name, value) in iter {
            args.insert(name, value);
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_escapes() {
        assert_eq!(
            normalize("/endpoint?arg1=value%201&arg2=value%2A2"),
            "/endpoint?arg1=value%201&arg2=value%2a2"
        );
        assert_eq!(normalize("/a%2Fb%3D%3d"), "/a%2fb%3d%3d");
    }

    #[test]
    fn test_normalize_leaves_everything_else() {
        assert_eq!(normalize("/Path/With/CAPS?Q=V"), "/Path/With/CAPS?Q=V");
        assert_eq!(normalize("/already%2flower"), "/already%2flower");
        assert_eq!(normalize("/caf\u{e9}%C3%A9"), "/caf\u{e9}%c3%a9");
    }

    #[test]
    fn test_normalize_malformed_escapes() {
        assert_eq!(normalize("/100%"), "/100%");
        assert_eq!(normalize("/%G1"), "/%G1");
        assert_eq!(normalize("/%A"), "/%A");
        assert_eq!(normalize("%%AB"), "%%ab");
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("abc"), "abc");
        assert_eq!(percent_decode("ab%20cd"), "ab cd");
        assert_eq!(percent_decode("ab%20"), "ab ");
        assert_eq!(percent_decode("%20ab"), " ab");
        assert_eq!(percent_decode("%20ab%20"), " ab ");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("%4f%4F"), "OO");
    }

    #[test]
    fn test_percent_decode_malformed() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%2"), "%2");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%%41"), "%A");
    }

    #[test]
    fn test_decode_query() {
        let args = decode_query("arg1=%26value1&arg2=%26value2");
        assert_eq!(args.len(), 2);
        assert_eq!(args.get("arg1"), Some("&value1"));
        assert_eq!(args.get("arg2"), Some("&value2"));
    }

    #[test]
    fn test_decode_query_edge_cases() {
        assert!(decode_query("").is_empty());

        let args = decode_query("flag&x=1&&x=2&sp=a+b%20c");
        assert_eq!(args.get("flag"), Some(""));
        assert_eq!(args.get("x"), Some("2"));
        assert_eq!(args.get("sp"), Some("a b c"));
        assert_eq!(args.len(), 3);

        let order: Vec<_> = args.iter().map(|(n, _)| n).collect();
        assert_eq!(order, vec!["flag", "x", "sp"]);
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode("abc-_.~XYZ09"), "abc-_.~XYZ09");
        assert_eq!(encode("&value 1"), "%26value%201");
        assert_eq!(encode("\u{e9}"), "%c3%a9");
    }

    #[test]
    fn test_query_string_reverses_to_same_args() {
        let mut args = QueryArgs::new();
        args.insert("key one", "a&b=c");
        args.insert("k2", "100%");

        let query = args.to_query_string();
        assert_eq!(query, "key%20one=a%26b%3dc&k2=100%25");
        assert_eq!(decode_query(&query), args);
    }

    #[test]
    fn test_split_resource() {
        assert_eq!(split_resource("/a/b"), ("/a/b", None));
        assert_eq!(split_resource("/a?x=1?y"), ("/a", Some("x=1?y")));
        assert_eq!(split_resource("/?"), ("/", Some("")));
    }
}
