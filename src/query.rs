// URL query-string utilities — parsing, form encoding, and parameter merging.

use std::collections::HashMap;

use crate::template::{encode_url_argument, pct_decode};

/// Multi-valued query parameters keyed by lowercased name.
pub type Parameters = HashMap<String, Vec<String>>;

/// Escape a string for use as a URL argument: every character outside the
/// RFC 3986 unreserved set is percent-encoded.
pub fn escape_url_argument(input: &str) -> String {
    encode_url_argument(input)
}

/// Unescape a URL argument: `+` becomes a space, percent triplets are
/// decoded.
pub fn unescape_url_argument(input: &str) -> String {
    pct_decode(&input.replace('+', " "))
}

/// Split a URL string into its non-query part and its parsed query
/// parameters. Keys are lowercased; repeated keys accumulate values in
/// encounter order; pair separators are `&` and `;`.
///
/// A string with no `?` and no `k=v` pairs is treated as all base; a bare
/// query string (no `?`, contains pairs) is treated as all query.
pub fn parse_url_with_query(url: &str) -> (Option<String>, Parameters) {
    let mut base: Option<String> = None;
    let query = match url.find('?') {
        Some(loc) => {
            base = Some(url[..loc].to_string());
            &url[loc + 1..]
        }
        None => url,
    };

    let mut parameters = Parameters::new();
    for pair in query.split(['&', ';']) {
        if let Some(loc) = pair.find('=') {
            let key = &pair[..loc];
            if key.is_empty() {
                continue;
            }
            let key = key.to_lowercase();
            let value = unescape_url_argument(&pair[loc + 1..]);
            parameters.entry(key).or_default().push(value);
        }
    }

    if base.is_none() && parameters.is_empty() {
        base = Some(url.to_string());
    }
    (base, parameters)
}

/// Join parameters into a form-urlencoded string. Keys are sorted
/// case-insensitively ascending, values sorted within each key, values
/// escaped. Deterministic for any input.
pub fn form_encode(parameters: &Parameters) -> String {
    let mut keys: Vec<&String> = parameters.keys().collect();
    keys.sort_by_key(|k| k.to_lowercase());

    let mut parts: Vec<String> = Vec::new();
    for key in keys {
        let mut values = parameters[key].clone();
        values.sort_by_key(|v| v.to_lowercase());
        for value in values {
            parts.push(format!("{}={}", key, escape_url_argument(&value)));
        }
    }
    parts.join("&")
}

/// Merge query parameters into a URL. Keys are folded to lowercase;
/// duplicate keys across the URL and the supplied set are concatenated,
/// never overwritten. Merging an empty set returns the URL unchanged.
pub fn merge_parameters_to_url(url: &str, parameters: &Parameters) -> String {
    if parameters.is_empty() {
        return url.to_string();
    }

    let (base, mut existing) = parse_url_with_query(url);
    for (key, values) in parameters {
        let key = key.to_lowercase();
        existing.entry(key).or_default().extend(values.iter().cloned());
    }

    let query = form_encode(&existing);
    let mut parts: Vec<String> = Vec::new();
    if let Some(base) = base {
        parts.push(base);
    }
    if !query.is_empty() {
        parts.push(query);
    }
    parts.join("?")
}

/// Parse a Content-Type-like header (`text/html; charset=UTF-8`) into the
/// type itself and a map of lowercased parameter names to unquoted values.
pub fn parse_content_type_like_header(header: &str) -> (Option<String>, HashMap<String, String>) {
    let mut parts = header.split(';');
    let kind = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut parameters = HashMap::new();
    for part in parts {
        if let Some(loc) = part.find('=') {
            let key = part[..loc].trim();
            if key.is_empty() {
                continue;
            }
            let value = part[loc + 1..].trim().trim_matches(['"', '\'']);
            parameters.insert(key.to_lowercase(), value.to_string());
        }
    }
    (kind, parameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, &[&str])]) -> Parameters {
        entries
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_parse_url_with_query() {
        let (base, parameters) = parse_url_with_query("http://x.test/p?a=1&b=2&a=3");
        assert_eq!(base.as_deref(), Some("http://x.test/p"));
        assert_eq!(parameters["a"], vec!["1", "3"]);
        assert_eq!(parameters["b"], vec!["2"]);
    }

    #[test]
    fn test_parse_url_without_query() {
        let (base, parameters) = parse_url_with_query("http://x.test/p");
        assert_eq!(base.as_deref(), Some("http://x.test/p"));
        assert!(parameters.is_empty());
    }

    #[test]
    fn test_parse_bare_query_string() {
        let (base, parameters) = parse_url_with_query("a=1;b=hello+world");
        assert_eq!(base, None);
        assert_eq!(parameters["a"], vec!["1"]);
        assert_eq!(parameters["b"], vec!["hello world"]);
    }

    #[test]
    fn test_parse_keys_lowercased() {
        let (_, parameters) = parse_url_with_query("x?KEY=v");
        assert_eq!(parameters["key"], vec!["v"]);
    }

    #[test]
    fn test_form_encode_sorted_and_escaped() {
        let p = params(&[("b", &["2"]), ("a", &["z", "a"]), ("c", &["x y"])]);
        assert_eq!(form_encode(&p), "a=a&a=z&b=2&c=x%20y");
    }

    #[test]
    fn test_merge_empty_is_identity() {
        let url = "http://x.test/p?b=2&a=1";
        assert_eq!(merge_parameters_to_url(url, &Parameters::new()), url);
    }

    #[test]
    fn test_merge_concatenates_duplicates() {
        let merged = merge_parameters_to_url("http://x.test/p?a=1", &params(&[("A", &["2"])]));
        assert_eq!(merged, "http://x.test/p?a=1&a=2");
    }

    #[test]
    fn test_merge_into_url_without_query() {
        let merged = merge_parameters_to_url("http://x.test/p", &params(&[("k", &["v"])]));
        assert_eq!(merged, "http://x.test/p?k=v");
    }

    #[test]
    fn test_parse_content_type_like_header() {
        let (kind, parameters) =
            parse_content_type_like_header("text/html; charset=\"UTF-8\"; boundary=abc");
        assert_eq!(kind.as_deref(), Some("text/html"));
        assert_eq!(parameters["charset"], "UTF-8");
        assert_eq!(parameters["boundary"], "abc");
    }

    #[test]
    fn test_parse_content_type_plain() {
        let (kind, parameters) = parse_content_type_like_header("application/json");
        assert_eq!(kind.as_deref(), Some("application/json"));
        assert!(parameters.is_empty());
    }
}
