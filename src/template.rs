// RFC 6570 URI Template expansion — two-state scanner with best-effort error recovery.
//
// The engine never fails outright: structural problems are recorded as
// (error, byte offset) diagnostics and the scanner keeps producing the most
// useful output it can, re-emitting unparseable fragments verbatim.

use std::collections::HashMap;

/// Structural problems found while expanding a template. Diagnostics only —
/// expansion always produces an output string alongside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateError {
    MalformedPctEncodedInLiteral,
    NonLiteralsCharacterFoundInLiteral,
    ExpressionEndedWithoutClosing,
    NonExpressionFound,
    InvalidOperator,
    MalformedVarSpec,
}

/// A value a template variable can expand to.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(String),
    List(Vec<String>),
    /// Pairs are rendered in descending case-insensitive key order.
    Map(Vec<(String, String)>),
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::Text(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        TemplateValue::Text(value)
    }
}

impl From<Vec<&str>> for TemplateValue {
    fn from(value: Vec<&str>) -> Self {
        TemplateValue::List(value.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for TemplateValue {
    fn from(value: Vec<String>) -> Self {
        TemplateValue::List(value)
    }
}

impl From<Vec<(&str, &str)>> for TemplateValue {
    fn from(value: Vec<(&str, &str)>) -> Self {
        TemplateValue::Map(
            value
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Named values for one expansion call.
#[derive(Debug, Clone, Default)]
pub struct TemplateValues {
    entries: HashMap<String, TemplateValue>,
}

impl TemplateValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<TemplateValue>) -> &mut Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.entries.get(name)
    }
}

impl<K: Into<String>, V: Into<TemplateValue>> FromIterator<(K, V)> for TemplateValues {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut values = TemplateValues::new();
        for (k, v) in iter {
            values.set(k, v);
        }
        values
    }
}

/// Percent-encoding policy for expanded values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Allow {
    /// Encode everything outside the unreserved set.
    U,
    /// Also leave reserved characters un-encoded (operators `+` and `#`).
    Ur,
}

/// Operator behavior: leading separator, item separator, `name=` emission,
/// empty-value suffix, and the encoding policy.
struct Behavior {
    first: &'static str,
    sep: &'static str,
    named: bool,
    ifemp: &'static str,
    allow: Allow,
}

const BEHAVIOR_DEFAULT: Behavior = Behavior { first: "", sep: ",", named: false, ifemp: "", allow: Allow::U };
const BEHAVIOR_PLUS: Behavior = Behavior { first: "", sep: ",", named: false, ifemp: "", allow: Allow::Ur };
const BEHAVIOR_DOT: Behavior = Behavior { first: ".", sep: ".", named: false, ifemp: "", allow: Allow::U };
const BEHAVIOR_SLASH: Behavior = Behavior { first: "/", sep: "/", named: false, ifemp: "", allow: Allow::U };
const BEHAVIOR_SEMI: Behavior = Behavior { first: ";", sep: ";", named: true, ifemp: "", allow: Allow::U };
const BEHAVIOR_QUERY: Behavior = Behavior { first: "?", sep: "&", named: true, ifemp: "=", allow: Allow::U };
const BEHAVIOR_AMP: Behavior = Behavior { first: "&", sep: "&", named: true, ifemp: "=", allow: Allow::U };
const BEHAVIOR_HASH: Behavior = Behavior { first: "#", sep: ",", named: false, ifemp: "", allow: Allow::Ur };

fn behavior_for_operator(op: Option<char>) -> Option<&'static Behavior> {
    match op {
        None => Some(&BEHAVIOR_DEFAULT),
        Some('+') => Some(&BEHAVIOR_PLUS),
        Some('.') => Some(&BEHAVIOR_DOT),
        Some('/') => Some(&BEHAVIOR_SLASH),
        Some(';') => Some(&BEHAVIOR_SEMI),
        Some('?') => Some(&BEHAVIOR_QUERY),
        Some('&') => Some(&BEHAVIOR_AMP),
        Some('#') => Some(&BEHAVIOR_HASH),
        Some(_) => None,
    }
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn is_reserved(c: char) -> bool {
    matches!(
        c,
        ':' | '/' | '?' | '#' | '[' | ']' | '@' | '!' | '$' | '&' | '\'' | '(' | ')' | '*' | '+'
            | ',' | ';' | '='
    )
}

fn is_varchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

fn push_pct_encoded(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    for b in c.encode_utf8(&mut buf).bytes() {
        out.push('%');
        out.push(HEX_UPPER[(b >> 4) as usize] as char);
        out.push(HEX_UPPER[(b & 0x0f) as usize] as char);
    }
}

fn pct_encode(input: &str, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if keep(c) {
            out.push(c);
        } else {
            push_pct_encoded(&mut out, c);
        }
    }
    out
}

/// Encode a literal fragment: everything outside reserved ∪ unreserved is
/// percent-encoded. Existing percent triplets are handled by the scanner,
/// not here.
pub(crate) fn encode_literal(input: &str) -> String {
    pct_encode(input, |c| is_unreserved(c) || is_reserved(c))
}

fn encode_value(input: &str, allow: Allow) -> String {
    match allow {
        Allow::U => pct_encode(input, is_unreserved),
        Allow::Ur => encode_literal(input),
    }
}

/// Percent-encode everything outside the unreserved set. Used for URL
/// query arguments.
pub(crate) fn encode_url_argument(input: &str) -> String {
    pct_encode(input, is_unreserved)
}

/// Decode percent triplets; malformed triplets are copied through.
pub(crate) fn pct_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Expand `template` against `values`, discarding diagnostics.
pub fn expand_uri_template(template: &str, values: &TemplateValues) -> String {
    process_uri_template(template, values).0
}

/// Expand `template` against `values`, returning the expansion together with
/// every structural error and the byte offset it was found at.
pub fn process_uri_template(
    template: &str,
    values: &TemplateValues,
) -> (String, Vec<(TemplateError, usize)>) {
    enum ScanState {
        Literal,
        Expression,
    }

    let mut state = ScanState::Literal;
    let mut result = String::with_capacity(template.len());
    let mut pct_window = String::new();
    let mut expression = String::new();
    let mut expression_count = 0usize;
    let mut errors: Vec<(TemplateError, usize)> = Vec::new();

    for (index, c) in template.char_indices() {
        match state {
            ScanState::Literal => {
                if c == '{' {
                    state = ScanState::Expression;
                    expression_count += 1;
                    expression.clear();
                } else if !pct_window.is_empty() {
                    // Inside a %XX window: either complete it or flush it as
                    // a literal-encoded fragment.
                    let complete = pct_window.len() == 2;
                    if c.is_ascii() && hex_value(c as u8).is_some() {
                        pct_window.push(c);
                        if complete {
                            result.push_str(&pct_window);
                            pct_window.clear();
                        }
                    } else {
                        errors.push((TemplateError::MalformedPctEncodedInLiteral, index));
                        result.push_str(&encode_literal(&pct_window));
                        let mut one = String::new();
                        one.push(c);
                        result.push_str(&encode_literal(&one));
                        pct_window.clear();
                    }
                } else if c == '%' {
                    pct_window.push(c);
                } else if is_unreserved(c) || is_reserved(c) {
                    result.push(c);
                } else {
                    errors.push((TemplateError::NonLiteralsCharacterFoundInLiteral, index));
                    result.push(c);
                }
            }
            ScanState::Expression => {
                if c == '}' {
                    state = ScanState::Literal;
                    expand_expression(&expression, values, index, &mut result, &mut errors);
                } else {
                    expression.push(c);
                }
            }
        }
    }

    let end = template.len();
    match state {
        ScanState::Literal => {
            if !pct_window.is_empty() {
                errors.push((TemplateError::MalformedPctEncodedInLiteral, end));
                result.push_str(&encode_literal(&pct_window));
            }
        }
        ScanState::Expression => {
            errors.push((TemplateError::ExpressionEndedWithoutClosing, end));
            result.push('{');
            result.push_str(&expression);
        }
    }
    if expression_count == 0 {
        errors.push((TemplateError::NonExpressionFound, end));
    }

    (result, errors)
}

/// Determine the expression operator. The operator may itself arrive
/// percent-encoded (`%2B` for `+`). `Ok(None)` means default behavior.
fn find_operator(expression: &str) -> Result<Option<char>, TemplateError> {
    let mut chars = expression.chars();
    let first = chars.next().ok_or(TemplateError::InvalidOperator)?;

    let op = if first == '%' {
        let c1 = chars.next().ok_or(TemplateError::InvalidOperator)?;
        let c2 = chars.next().ok_or(TemplateError::InvalidOperator)?;
        if !c1.is_ascii() || !c2.is_ascii() {
            return Err(TemplateError::InvalidOperator);
        }
        let (hi, lo) = match (hex_value(c1 as u8), hex_value(c2 as u8)) {
            (Some(hi), Some(lo)) => (hi, lo),
            _ => return Err(TemplateError::InvalidOperator),
        };
        ((hi << 4) | lo) as char
    } else {
        first
    };

    if behavior_for_operator(Some(op)).is_none() {
        if is_varchar(op) {
            // A plain variable name: no operator.
            return Ok(None);
        }
        return Err(TemplateError::InvalidOperator);
    }
    Ok(Some(op))
}

/// Parse and render one `{...}` expression body (braces stripped).
/// `close_index` is the byte offset of the closing brace, used for
/// diagnostics.
fn expand_expression(
    expression: &str,
    values: &TemplateValues,
    close_index: usize,
    result: &mut String,
    errors: &mut Vec<(TemplateError, usize)>,
) {
    let op = match find_operator(expression) {
        Ok(op) => op,
        Err(_) => {
            errors.push((TemplateError::InvalidOperator, close_index));
            result.push('{');
            result.push_str(expression);
            result.push('}');
            return;
        }
    };
    let behavior = behavior_for_operator(op).unwrap_or(&BEHAVIOR_DEFAULT);

    // Strip the operator (1 raw character, or 3 when percent-encoded), then
    // decode the varspec list before parsing it.
    let skip = match op {
        Some(_) if expression.starts_with('%') => 3,
        Some(_) => 1,
        None => 0,
    };
    let body: String = pct_decode(&expression.chars().skip(skip).collect::<String>());

    enum VarState {
        Name,
        Modifier,
    }

    let chars: Vec<char> = body.chars().collect();
    let mut rendered_count = 0usize;
    let mut var_state = VarState::Name;
    let mut var_name = String::new();
    let mut modifier: Option<char> = None;
    let mut prefix_len = 0usize;
    let mut failure: Option<usize> = None;

    let mut emit = |name: &str, modifier: Option<char>, prefix_len: usize, count: &mut usize, out: &mut String| {
        if let Some(expanded) = expand_varspec(name, modifier, prefix_len, behavior, values) {
            out.push_str(if *count == 0 { behavior.first } else { behavior.sep });
            out.push_str(&expanded);
            *count += 1;
        }
    };

    for (j, &c) in chars.iter().enumerate() {
        if c == ',' {
            emit(&var_name, modifier, prefix_len, &mut rendered_count, result);
            var_state = VarState::Name;
            var_name.clear();
            modifier = None;
            prefix_len = 0;
            continue;
        }

        match var_state {
            VarState::Name => {
                if c == '*' || c == ':' {
                    if var_name.is_empty() {
                        failure = Some(j);
                        break;
                    }
                    modifier = Some(c);
                    var_state = VarState::Modifier;
                } else if is_varchar(c) || c == '.' {
                    var_name.push(c);
                } else {
                    failure = Some(j);
                    break;
                }
            }
            VarState::Modifier => {
                // `*` takes nothing after it; `:` takes up to three digits.
                if modifier == Some('*') {
                    failure = Some(j);
                    break;
                }
                match c.to_digit(10) {
                    Some(d) => {
                        prefix_len = prefix_len * 10 + d as usize;
                        if prefix_len >= 1000 {
                            failure = Some(j);
                            break;
                        }
                    }
                    None => {
                        failure = Some(j);
                        break;
                    }
                }
            }
        }
    }

    match failure {
        Some(j) => {
            errors.push((TemplateError::MalformedVarSpec, close_index + j));
            // Re-emit the unparsed remainder, operator re-prefixed.
            let remainder: String = chars[j..].iter().collect();
            result.push('{');
            if let Some(op) = op {
                result.push(op);
            }
            result.push_str(&remainder);
            result.push('}');
        }
        None => {
            emit(&var_name, modifier, prefix_len, &mut rendered_count, result);
        }
    }
}

/// Render a single varspec. `None` means the variable is undefined (absent,
/// or an empty list/map) and contributes neither output nor a separator.
fn expand_varspec(
    name: &str,
    modifier: Option<char>,
    prefix_len: usize,
    behavior: &Behavior,
    values: &TemplateValues,
) -> Option<String> {
    if name.is_empty() {
        return None;
    }

    match values.get(name)? {
        TemplateValue::Text(s) => {
            let mut out = String::new();
            if behavior.named {
                out.push_str(&encode_literal(name));
                if s.is_empty() {
                    out.push_str(behavior.ifemp);
                    return Some(out);
                }
                out.push('=');
            }
            let truncated;
            let rendered = if modifier == Some(':') && prefix_len < s.chars().count() {
                truncated = s.chars().take(prefix_len).collect::<String>();
                truncated.as_str()
            } else {
                s.as_str()
            };
            out.push_str(&encode_value(rendered, behavior.allow));
            Some(out)
        }
        TemplateValue::List(items) => {
            if items.is_empty() {
                return None;
            }
            let mut out = String::new();
            if modifier == Some('*') {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(behavior.sep);
                    }
                    if behavior.named {
                        out.push_str(&encode_literal(name));
                        if item.is_empty() {
                            out.push_str(behavior.ifemp);
                            continue;
                        }
                        out.push('=');
                    }
                    out.push_str(&encode_value(item, behavior.allow));
                }
            } else {
                if behavior.named {
                    out.push_str(&encode_literal(name));
                    out.push('=');
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&encode_value(item, behavior.allow));
                }
            }
            Some(out)
        }
        TemplateValue::Map(pairs) => {
            if pairs.is_empty() {
                return None;
            }
            let mut ordered: Vec<&(String, String)> = pairs.iter().collect();
            ordered.sort_by(|a, b| b.0.to_lowercase().cmp(&a.0.to_lowercase()));

            let mut out = String::new();
            if modifier == Some('*') {
                // Map explosion always emits per-pair names.
                for (i, (k, v)) in ordered.iter().enumerate() {
                    if i > 0 {
                        out.push_str(behavior.sep);
                    }
                    out.push_str(&encode_literal(k));
                    if v.is_empty() {
                        out.push_str(behavior.ifemp);
                        continue;
                    }
                    out.push('=');
                    out.push_str(&encode_value(v, behavior.allow));
                }
            } else {
                if behavior.named {
                    out.push_str(&encode_literal(name));
                    out.push('=');
                }
                for (i, (k, v)) in ordered.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&encode_value(k, behavior.allow));
                    out.push(',');
                    out.push_str(&encode_value(v, behavior.allow));
                }
            }
            Some(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(entries: &[(&str, TemplateValue)]) -> TemplateValues {
        entries.iter().cloned().collect()
    }

    #[test]
    fn test_simple_substitution() {
        let v = values(&[("var", "value".into())]);
        assert_eq!(expand_uri_template("{var}", &v), "value");
        assert_eq!(expand_uri_template("X{var}Y", &v), "XvalueY");
    }

    #[test]
    fn test_operator_forms() {
        let mut v = TemplateValues::new();
        v.set("id", "value");
        v.set("x", "1");
        v.set("y", "2");
        assert_eq!(expand_uri_template("{/id}", &v), "/value");
        assert_eq!(expand_uri_template("{?x,y}", &v), "?x=1&y=2");
        assert_eq!(expand_uri_template("{&x}", &v), "&x=1");
        assert_eq!(expand_uri_template("{;x,y}", &v), ";x=1;y=2");
        assert_eq!(expand_uri_template("{.x,y}", &v), ".1.2");
    }

    #[test]
    fn test_reserved_expansion() {
        let v = values(&[("path", "/foo/bar".into())]);
        assert_eq!(expand_uri_template("{+path}", &v), "/foo/bar");
        assert_eq!(expand_uri_template("{path}", &v), "%2Ffoo%2Fbar");
        assert_eq!(expand_uri_template("{#path}", &v), "#/foo/bar");
    }

    #[test]
    fn test_pct_encoded_operator() {
        let v = values(&[("path", "/foo".into())]);
        assert_eq!(expand_uri_template("{%2Bpath}", &v), "/foo");
    }

    #[test]
    fn test_prefix_modifier() {
        let v = values(&[("x", "hello".into())]);
        assert_eq!(expand_uri_template("{x:3}", &v), "hel");
        assert_eq!(expand_uri_template("{x:10}", &v), "hello");
    }

    #[test]
    fn test_prefix_modifier_char_boundaries() {
        let v = values(&[("x", "héllo".into())]);
        assert_eq!(expand_uri_template("{+x:2}", &v), "h%C3%A9");
    }

    #[test]
    fn test_list_expansion() {
        let v = values(&[("x", vec!["a", "b"].into())]);
        assert_eq!(expand_uri_template("{x*}", &v), "a,b");
        assert_eq!(expand_uri_template("{x}", &v), "a,b");
        assert_eq!(expand_uri_template("{/x*}", &v), "/a/b");
        assert_eq!(expand_uri_template("{?x*}", &v), "?x=a&x=b");
        assert_eq!(expand_uri_template("{?x}", &v), "?x=a,b");
    }

    #[test]
    fn test_map_expansion_descending_order() {
        let v = values(&[("m", vec![("alpha", "1"), ("beta", "2")].into())]);
        assert_eq!(expand_uri_template("{?m*}", &v), "?beta=2&alpha=1");
        assert_eq!(expand_uri_template("{m}", &v), "beta,2,alpha,1");
        assert_eq!(expand_uri_template("{?m}", &v), "?m=beta,2,alpha,1");
    }

    #[test]
    fn test_named_empty_values() {
        let mut v = TemplateValues::new();
        v.set("empty", "");
        assert_eq!(expand_uri_template("{?empty}", &v), "?empty=");
        assert_eq!(expand_uri_template("{;empty}", &v), ";empty");
    }

    #[test]
    fn test_absent_values_contribute_nothing() {
        let v = values(&[("y", "2".into())]);
        assert_eq!(expand_uri_template("{?x,y}", &v), "?y=2");
        assert_eq!(expand_uri_template("{x}", &v), "");
        let empty = TemplateValues::new();
        assert_eq!(expand_uri_template("{?x,y}", &empty), "");
    }

    #[test]
    fn test_no_expression_flagged() {
        let v = TemplateValues::new();
        let (out, errors) = process_uri_template("plain/path", &v);
        assert_eq!(out, "plain/path");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, TemplateError::NonExpressionFound);
    }

    #[test]
    fn test_malformed_pct_in_literal() {
        let v = TemplateValues::new();
        let (out, errors) = process_uri_template("a%zq{x}", &v);
        assert_eq!(errors[0], (TemplateError::MalformedPctEncodedInLiteral, 2));
        // The lone % is literal-encoded, the offending character kept.
        assert_eq!(out, "a%25zq");
    }

    #[test]
    fn test_valid_pct_in_literal_passthrough() {
        let v = TemplateValues::new();
        let (out, errors) = process_uri_template("a%20b{x}", &v);
        assert!(errors.is_empty());
        assert_eq!(out, "a%20b");
    }

    #[test]
    fn test_pct_window_open_at_end() {
        let v = TemplateValues::new();
        let (out, errors) = process_uri_template("{x}abc%4", &v);
        assert_eq!(out, "abc%254");
        assert_eq!(errors[0], (TemplateError::MalformedPctEncodedInLiteral, 8));
    }

    #[test]
    fn test_unclosed_expression() {
        let v = values(&[("x", "1".into())]);
        let (out, errors) = process_uri_template("a{x,y", &v);
        assert_eq!(out, "a{x,y");
        assert_eq!(errors[0], (TemplateError::ExpressionEndedWithoutClosing, 5));
    }

    #[test]
    fn test_invalid_operator_reemits_expression() {
        let v = TemplateValues::new();
        let (out, errors) = process_uri_template("{<x>}", &v);
        assert_eq!(out, "{<x>}");
        assert_eq!(errors[0].0, TemplateError::InvalidOperator);
    }

    #[test]
    fn test_malformed_varspec() {
        let v = values(&[("x", "1".into())]);
        let (out, errors) = process_uri_template("{?x,y<}", &v);
        assert_eq!(errors[0].0, TemplateError::MalformedVarSpec);
        assert!(out.starts_with('{'));
        assert!(out.contains('?'));
    }

    #[test]
    fn test_prefix_length_overflow() {
        let v = values(&[("x", "1".into())]);
        let (_, errors) = process_uri_template("{x:1000}", &v);
        assert_eq!(errors[0].0, TemplateError::MalformedVarSpec);
    }

    #[test]
    fn test_explode_modifier_trailing_garbage() {
        let v = values(&[("x", vec!["a"].into())]);
        let (_, errors) = process_uri_template("{x*y}", &v);
        assert_eq!(errors[0].0, TemplateError::MalformedVarSpec);
    }

    #[test]
    fn test_value_encoding() {
        let v = values(&[("q", "hello world!".into())]);
        assert_eq!(expand_uri_template("{?q}", &v), "?q=hello%20world%21");
    }

    #[test]
    fn test_dotted_variable_names() {
        let v = values(&[("a.b", "1".into())]);
        assert_eq!(expand_uri_template("{a.b}", &v), "1");
    }

    #[test]
    fn test_non_literal_character_recorded() {
        let v = TemplateValues::new();
        let (out, errors) = process_uri_template("a b{x}", &v);
        assert_eq!(out, "a b");
        assert_eq!(errors[0], (TemplateError::NonLiteralsCharacterFoundInLiteral, 1));
    }
}
