use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt::Write;

/// Short content type names accepted by `Response::set_type`.
static CONTENT_TYPE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("html", "text/html;charset=UTF-8"),
        ("text", "text/plain;charset=UTF-8"),
        ("xml", "text/xml;charset=UTF-8"),
        ("md", "text/markdown;charset=UTF-8"),
        ("json", "application/json"),
        ("form", "application/x-www-form-urlencoded;charset=UTF-8"),
        ("pdf", "application/pdf"),
        ("zip", "application/zip"),
        ("wasm", "application/wasm"),
        ("webmanifest", "application/manifest+json"),
        ("js", "application/javascript;charset=UTF-8"),
        ("ts", "application/typescript;charset=UTF-8"),
        ("png", "image/png"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("gif", "image/gif"),
        ("svg", "image/svg+xml"),
        ("webp", "image/webp"),
        ("avif", "image/avif"),
        ("ico", "image/x-icon"),
        ("mp3", "audio/mpeg"),
        ("wav", "audio/wav"),
        ("ogg", "audio/ogg"),
        ("mp4", "video/mp4"),
        ("webm", "video/webm"),
        ("avi", "video/x-msvideo"),
        ("mov", "video/quicktime"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
        ("ttf", "font/ttf"),
        ("otf", "font/otf"),
        ("bin", "application/octet-stream"),
    ])
});

pub(crate) const TEXT_TYPE: &str = "text/plain;charset=UTF-8";
pub(crate) const HTML_TYPE: &str = "text/html;charset=UTF-8";
pub(crate) const JSON_TYPE: &str = "application/json";
pub(crate) const FORM_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";
pub(crate) const BINARY_TYPE: &str = "application/octet-stream";

/// Resolves a short alias such as `json` or `png` into a full content type.
///
/// Anything that is not a known alias is returned unchanged.
pub fn resolve_content_type(value: &str) -> &str {
    CONTENT_TYPE_ALIASES.get(value).copied().unwrap_or(value)
}

/// Returns the media type part of a content type, without its parameters.
pub fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default()
}

/// Whether `content_type` mentions `json` as a standalone word, as in `application/json`,
/// `application/manifest+json` or `application/json-seq`.
pub fn is_json_type(content_type: &str) -> bool {
    content_type
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|word| word.eq_ignore_ascii_case("json"))
}

/// Percent-encodes a url for use in a `Location` header.
///
/// Characters already legal in a url are kept, valid `%XX` escapes are kept as they are,
/// and a stray `%` is escaped to `%25` together with what follows it.
pub fn encode_url(url: &str) -> String {
    let bytes = url.as_bytes();
    let mut out = String::with_capacity(url.len());
    let mut chars = url.char_indices();

    while let Some((i, c)) = chars.next() {
        if c != '%' {
            if is_url_char(c) {
                out.push(c);
            } else {
                push_escaped(&mut out, c);
            }
            continue;
        }

        let first = bytes.get(i + 1).copied();
        let second = bytes.get(i + 2).copied();
        match (first, second) {
            (Some(a), Some(b)) if a.is_ascii_hexdigit() && b.is_ascii_hexdigit() => {
                out.push('%');
                out.push(a as char);
                out.push(b as char);
                chars.next();
                chars.next();
            }
            // a lone hex digit at the very end is left alone
            (Some(a), None) if a.is_ascii_hexdigit() => out.push('%'),
            _ => {
                out.push_str("%25");
                // a broken escape swallows the next char, or the next two when the first is hex
                let swallow = match first {
                    Some(a) if a.is_ascii_hexdigit() => 2,
                    Some(_) => 1,
                    None => 0,
                };
                for _ in 0..swallow {
                    if let Some((_, c)) = chars.next() {
                        push_uri_char(&mut out, c);
                    }
                }
            }
        }
    }

    out
}

fn is_url_char(c: char) -> bool {
    matches!(c as u32, 0x21 | 0x23..=0x3B | 0x3D | 0x3F..=0x5F | 0x61..=0x7A | 0x7C | 0x7E)
}

fn push_uri_char(out: &mut String, c: char) {
    if c.is_ascii_alphanumeric() || ";,/?:@&=+$-_.!~*'()#".contains(c) {
        out.push(c);
    } else {
        push_escaped(out, c);
    }
}

fn push_escaped(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    for b in c.encode_utf8(&mut buf).bytes() {
        // writing into a String never fails
        let _ = write!(out, "%{b:02X}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_content_type() {
        assert_eq!(resolve_content_type("json"), "application/json");
        assert_eq!(resolve_content_type("html"), "text/html;charset=UTF-8");
        assert_eq!(resolve_content_type("jpg"), resolve_content_type("jpeg"));
        assert_eq!(resolve_content_type("webmanifest"), "application/manifest+json");
        assert_eq!(resolve_content_type("image/x-custom"), "image/x-custom");
    }

    #[test]
    fn test_json_type() {
        assert!(is_json_type("application/json"));
        assert!(is_json_type("application/json; charset=utf-8"));
        assert!(is_json_type("application/manifest+json"));
        assert!(is_json_type("Application/JSON"));
        assert!(!is_json_type("text/plain;charset=UTF-8"));
        assert!(!is_json_type("application/jsonp"));
        assert!(!is_json_type(""));
    }

    #[test]
    fn test_media_type() {
        assert_eq!(media_type("text/html;charset=UTF-8"), "text/html");
        assert_eq!(media_type("image/png"), "image/png");
        assert_eq!(media_type(""), "");
    }

    #[test]
    fn test_encode_url() {
        assert_eq!(encode_url("http://x.com/😓"), "http://x.com/%F0%9F%98%93");
        assert_eq!(encode_url("/foo bar"), "/foo%20bar");
        assert_eq!(encode_url("/a?b=[1]&c=<d>"), "/a?b=[1]&c=%3Cd%3E");
        assert_eq!(encode_url("/caf%C3%A9"), "/caf%C3%A9");
    }

    #[test]
    fn test_encode_url_broken_escapes() {
        assert_eq!(encode_url("/%zz"), "/%25zz");
        assert_eq!(encode_url("/100%"), "/100%25");
        assert_eq!(encode_url("/%a%41"), "/%25a%2541");
        assert_eq!(encode_url("/%%41"), "/%25%2541");
        assert_eq!(encode_url("/%|"), "/%25%7C");
        assert_eq!(encode_url("/%a"), "/%a");
    }
}
