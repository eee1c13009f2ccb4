use nodesel::parser::{CompareOperator, ConnectExpression, ConnectOperator, Expression, ValueExpression};
use nodesel::{ErrorKind, Selector, SelectorError};

fn parse(source: &str) -> Selector {
    Selector::parse(source).unwrap_or_else(|e| panic!("{source}: {e:?}"))
}

fn parse_err(source: &str) -> SelectorError {
    match Selector::parse(source) {
        Ok(s) => panic!("{source} parsed as {s}"),
        Err(e) => e,
    }
}

#[test]
fn test_connectors_in_chain_order() {
    let selector = parse("[id=\"a\"] << [id=\"b\"] < [id=\"c\"] > [id=\"d\"] + [id=\"e\"] - [id=\"f\"]");
    let operators: Vec<_> = selector.connectors().iter().map(|c| c.operator).collect();
    // the chain runs from the last written segment back to the first
    assert_eq!(
        operators,
        vec![
            ConnectOperator::AfterBrother,
            ConnectOperator::BeforeBrother,
            ConnectOperator::Ancestor,
            ConnectOperator::Child,
            ConnectOperator::Descendant,
        ]
    );
    assert_eq!(selector.wrapper().len(), 6);
}

#[test]
fn test_and_binds_tighter_than_or() {
    let selector = parse("[id=\"a\" || text=\"b\" && clickable=true]");
    match &selector.wrapper().segment.expression {
        Expression::Or(_, right) => assert!(matches!(**right, Expression::And(_, _))),
        other => panic!("unexpected shape {other:?}"),
    }

    let keywords = parse("[id=\"a\" or text=\"b\" and clickable=true]");
    assert_eq!(keywords, selector);
}

#[test]
fn test_parentheses_group() {
    let selector = parse("[(id=\"a\" || text=\"b\") && clickable=true]");
    assert!(matches!(
        selector.wrapper().segment.expression,
        Expression::And(_, _)
    ));
}

#[test]
fn test_compare_operators() {
    let cases = [
        ("=", CompareOperator::Equal),
        ("!=", CompareOperator::NotEqual),
        ("^=", CompareOperator::StartWith),
        ("!^=", CompareOperator::NotStartWith),
        ("*=", CompareOperator::Include),
        ("!*=", CompareOperator::NotInclude),
        ("$=", CompareOperator::EndWith),
        ("!$=", CompareOperator::NotEndWith),
    ];
    for (text, operator) in cases {
        let selector = parse(&format!("[text{text}\"x\"]"));
        match &selector.wrapper().segment.expression {
            Expression::Binary(b) => assert_eq!(b.operator, operator, "{text}"),
            other => panic!("unexpected shape {other:?}"),
        }
    }

    for text in [">", ">=", "<", "<="] {
        parse(&format!("[childCount{text}3]"));
    }
}

#[test]
fn test_literals() {
    let selector = parse("[text='it\\'s' && left=-12 && parent=null && checked=false]");
    let binaries = selector.wrapper().segment.expression.binaries();
    assert!(matches!(&binaries[0].right, ValueExpression::String(s) if s.value == "it's"));
    assert!(matches!(binaries[1].right, ValueExpression::Int { value: -12, .. }));
    assert!(matches!(binaries[2].right, ValueExpression::Null { .. }));
    assert!(matches!(binaries[3].right, ValueExpression::Boolean { value: false, .. }));
}

#[test]
fn test_escapes() {
    let selector = parse(r#"[text="a\"b\\c\n\x41中"]"#);
    let binaries = selector.wrapper().segment.expression.binaries();
    assert!(matches!(&binaries[0].right, ValueExpression::String(s) if s.value == "a\"b\\c\nA中"));

    let e = parse_err(r#"[text="\q"]"#);
    assert!(matches!(&e, SelectorError::InvalidEscape { sequence, .. } if sequence == "\\q"));
    assert_eq!(e.kind(), ErrorKind::Syntax);

    assert!(matches!(parse_err(r#"[text="\x4"]"#), SelectorError::InvalidEscape { .. }));
}

#[test]
fn test_member_and_call_expressions() {
    parse("[parent.parent.text=\"a\"]");
    parse("[getChild(0).text.length>2]");
    parse("[text.substring(0, 2)=\"ab\"]");
    parse("[prev.getChild(1).id=\"x\"]");
    parse("[equal(childCount, 2)=true]");
}

#[test]
fn test_windows() {
    let cases = [
        ("{2}", ConnectExpression::new(2, Some(2))),
        ("{2,}", ConnectExpression::new(2, None)),
        ("{,3}", ConnectExpression::new(0, Some(3))),
        ("{1,3}", ConnectExpression::new(1, Some(3))),
    ];
    for (window, expected) in cases {
        let selector = parse(&format!("[id=\"a\"] + [id=\"b\"]{window}"));
        assert_eq!(selector.connectors()[0].expression, expected, "{window}");
    }

    let plain = parse("[id=\"a\"] + [id=\"b\"]");
    assert_eq!(plain.connectors()[0].expression, ConnectExpression::default());
}

#[test]
fn test_invalid_windows() {
    assert!(matches!(
        parse_err("[id=\"a\"] + [id=\"b\"]{3,1}"),
        SelectorError::InvalidOffsetRange { .. }
    ));
    assert!(matches!(
        parse_err("[id=\"a\"] + [id=\"b\"]{99999999999}"),
        SelectorError::InvalidOffsetRange { .. }
    ));
    // nothing to bound on the first segment
    assert!(matches!(
        parse_err("[id=\"a\"]{1} + [id=\"b\"]"),
        SelectorError::Malformed { .. }
    ));
}

#[test]
fn test_target_marker() {
    assert_eq!(parse("@[id=\"a\"] > [id=\"b\"]").target_index(), 0);
    assert!(matches!(
        parse_err("@[id=\"a\"] > @[id=\"b\"]"),
        SelectorError::Malformed { .. }
    ));
}

#[test]
fn test_patterns() {
    parse("[text~=\"(?is)skip.*\"]");
    parse("[text~=\"(?is).*close\"]");
    parse("[text!~=\"(?is).*跳过.*\"]");

    let e = parse_err("[text~=\"ab+c\"]");
    assert!(matches!(&e, SelectorError::UnsupportedPattern { pattern, .. } if pattern == "\"ab+c\""));
    assert_eq!(e.kind(), ErrorKind::Syntax);
}

#[test]
fn test_syntax_errors() {
    for source in [
        "",
        "[]",
        "[id=\"a\"",
        "id=\"a\"",
        "[id=]",
        "[id=\"a]",
        "[id=\"a\"] <",
        "[id=\"a\"] [id=\"b\"]",
        "[id==\"a\"]",
    ] {
        let e = parse_err(source);
        assert_eq!(e.kind(), ErrorKind::Syntax, "{source}: {e:?}");
    }
}

#[test]
fn test_syntax_error_location() {
    match parse_err("[id=\"a\"] < [id=]") {
        SelectorError::Syntax { line, col, .. } => {
            assert_eq!(line, 1);
            assert_eq!(col, 16);
        }
        other => panic!("expected syntax error, got {other:?}"),
    }
}

#[test]
fn test_int_overflow_is_rejected() {
    assert!(matches!(
        parse_err("[childCount=99999999999]"),
        SelectorError::Malformed { .. }
    ));
}

#[test]
fn test_stringify_is_canonical() {
    let selector = parse("@[ id = 'a' ]<<[text^=\"b\"]{,2}");
    let canonical = selector.stringify();
    assert_eq!(canonical, "@[id=\"a\"] << [text^=\"b\"]{0,2}");
    assert_eq!(parse(&canonical), selector);
}
