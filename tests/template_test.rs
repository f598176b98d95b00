// RFC 6570 conformance spread for the URI Template engine.

use http_cycles::{expand_uri_template, process_uri_template, TemplateError, TemplateValues};

fn rfc_values() -> TemplateValues {
    let mut values = TemplateValues::new();
    values.set("var", "value");
    values.set("hello", "Hello World!");
    values.set("empty", "");
    values.set("path", "/foo/bar");
    values.set("x", "1024");
    values.set("y", "768");
    values.set("list", vec!["red", "green", "blue"]);
    values.set("keys", vec![("semi", ";"), ("dot", "."), ("comma", ",")]);
    values
}

#[test]
fn test_level_1_simple_expansion() {
    let v = rfc_values();
    assert_eq!(expand_uri_template("{var}", &v), "value");
    assert_eq!(expand_uri_template("{hello}", &v), "Hello%20World%21");
}

#[test]
fn test_level_2_reserved_and_fragment() {
    let v = rfc_values();
    assert_eq!(expand_uri_template("{+var}", &v), "value");
    assert_eq!(expand_uri_template("{+path}/here", &v), "/foo/bar/here");
    assert_eq!(expand_uri_template("{#var}", &v), "#value");
    assert_eq!(expand_uri_template("{#path}", &v), "#/foo/bar");
}

#[test]
fn test_level_3_multi_variable() {
    let v = rfc_values();
    assert_eq!(expand_uri_template("map?{x,y}", &v), "map?1024,768");
    assert_eq!(expand_uri_template("{x,hello,y}", &v), "1024,Hello%20World%21,768");
    assert_eq!(expand_uri_template("{.x,y}", &v), ".1024.768");
    assert_eq!(expand_uri_template("{/var,x}/here", &v), "/value/1024/here");
    assert_eq!(expand_uri_template("{;x,y,empty}", &v), ";x=1024;y=768;empty");
    assert_eq!(expand_uri_template("{?x,y,empty}", &v), "?x=1024&y=768&empty=");
    assert_eq!(expand_uri_template("?fixed=yes{&x}", &v), "?fixed=yes&x=1024");
}

#[test]
fn test_level_4_modifiers() {
    let v = rfc_values();
    assert_eq!(expand_uri_template("{var:3}", &v), "val");
    assert_eq!(expand_uri_template("{var:30}", &v), "value");
    assert_eq!(expand_uri_template("{list}", &v), "red,green,blue");
    assert_eq!(expand_uri_template("{list*}", &v), "red,green,blue");
    assert_eq!(expand_uri_template("{/list*}", &v), "/red/green/blue");
    assert_eq!(expand_uri_template("{?list}", &v), "?list=red,green,blue");
    assert_eq!(expand_uri_template("{?list*}", &v), "?list=red&list=green&list=blue");
    assert_eq!(expand_uri_template("{&list*}", &v), "&list=red&list=green&list=blue");
}

#[test]
fn test_map_explosion_descending_key_order() {
    let v = rfc_values();
    // Keys render in descending case-insensitive order.
    assert_eq!(expand_uri_template("{?keys*}", &v), "?semi=%3B&dot=.&comma=%2C");
    assert_eq!(expand_uri_template("{keys}", &v), "semi,%3B,dot,.,comma,%2C");
}

#[test]
fn test_specified_round_trip_cases() {
    let mut v = TemplateValues::new();
    v.set("id", "value");
    assert_eq!(expand_uri_template("{/id}", &v), "/value");

    let mut v = TemplateValues::new();
    v.set("x", "1");
    v.set("y", "2");
    assert_eq!(expand_uri_template("{?x,y}", &v), "?x=1&y=2");

    let mut v = TemplateValues::new();
    v.set("x", "hello");
    assert_eq!(expand_uri_template("{x:3}", &v), "hel");

    let mut v = TemplateValues::new();
    v.set("x", vec!["a", "b"]);
    assert_eq!(expand_uri_template("{x*}", &v), "a,b");
}

#[test]
fn test_template_without_expression_is_flagged() {
    let (out, errors) = process_uri_template("/plain/path", &TemplateValues::new());
    assert_eq!(out, "/plain/path");
    assert!(errors
        .iter()
        .any(|(kind, _)| *kind == TemplateError::NonExpressionFound));
}

#[test]
fn test_lone_percent_is_diagnosed_and_encoded() {
    let (out, errors) = process_uri_template("{x}50%", &TemplateValues::new());
    assert_eq!(out, "50%25");
    assert_eq!(errors.len(), 1);
    let (kind, offset) = errors[0];
    assert_eq!(kind, TemplateError::MalformedPctEncodedInLiteral);
    assert_eq!(offset, 6);
}

#[test]
fn test_absent_variables_render_nothing() {
    let v = rfc_values();
    assert_eq!(expand_uri_template("{undef}", &v), "");
    assert_eq!(expand_uri_template("{?undef,x}", &v), "?x=1024");
    assert_eq!(expand_uri_template("O{undef}X", &v), "OX");
}

#[test]
fn test_diagnostics_do_not_abort_expansion() {
    let mut v = TemplateValues::new();
    v.set("x", "1");
    let (out, errors) = process_uri_template("a%G0b{x}", &v);
    assert!(!errors.is_empty());
    // Best-effort output still carries the expanded expression.
    assert!(out.ends_with('1'));
}
