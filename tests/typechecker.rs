use nodesel::{ErrorKind, Schema, Selector, SelectorError};

/// Helper function to parse and typecheck a selector
fn check(source: &str) -> Result<(), SelectorError> {
    let selector = Selector::parse(source).unwrap_or_else(|e| panic!("{source}: {e:?}"));
    selector.check_type(&Schema::standard())
}

fn check_err(source: &str) -> SelectorError {
    let e = check(source).expect_err(source);
    assert_eq!(e.kind(), ErrorKind::TypeCheck, "{source}: {e:?}");
    e
}

#[test]
fn test_well_typed_selectors() {
    for source in [
        "[id=\"a\" && clickable=true]",
        "[text^=\"Skip\" || desc*=\"close\"]",
        "[childCount>=2 && index<3 && depth>0]",
        "[parent=null]",
        "[text=null]",
        "[parent.parent.id=\"root\"]",
        "[getChild(0).text=\"a\"]",
        "[text.length>2]",
        "[text.substring(0, 2)=\"ab\"]",
        "[text.indexOf(\"b\")=1]",
        "[childCount.plus(1).more(2)=true]",
        "[clickable.or(focusable)=true]",
        "[clickable.ifElse(1, 2)=1]",
        "[equal(text, \"a\")=true]",
        "[notEqual(childCount, 0)=true]",
        "[prev.text=\"a\"] << [id=\"b\"]",
        "[getPrev(0).id=\"a\"] < [id=\"b\"]",
        "[current.parent=null]",
        "[text~=\"(?is).*close\"]",
        "[width>100 && height<=50]",
    ] {
        if let Err(e) = check(source) {
            panic!("{source}: {e:?}");
        }
    }
}

#[test]
fn test_unknown_identifier() {
    let e = check_err("[nope=\"a\"]");
    assert!(matches!(e, SelectorError::UnknownIdentifier { name, .. } if name == "nope"));
}

#[test]
fn test_unknown_member() {
    let e = check_err("[parent.nope=1]");
    assert!(
        matches!(e, SelectorError::UnknownMember { member, owner, .. } if member == "nope" && owner == "node")
    );

    // prev belongs to a context, not a plain node
    let e = check_err("[parent.prev=null]");
    assert!(matches!(e, SelectorError::UnknownMember { member, .. } if member == "prev"));

    let e = check_err("[text.nope=1]");
    assert!(matches!(e, SelectorError::UnknownMember { owner, .. } if owner == "string"));
}

#[test]
fn test_unknown_global_method() {
    let e = check_err("[nope(1)=1]");
    assert!(matches!(e, SelectorError::UnknownIdentifierMethod { name, .. } if name == "nope"));

    let e = check_err("[getChild(0, 1).id=\"a\"]");
    assert!(matches!(
        e,
        SelectorError::UnknownIdentifierMethodParams { name, arity: 2, .. } if name == "getChild"
    ));
}

#[test]
fn test_unknown_member_method() {
    let e = check_err("[text.nope()=1]");
    assert!(matches!(
        e,
        SelectorError::UnknownMemberMethod { method, owner, .. } if method == "nope" && owner == "string"
    ));

    let e = check_err("[childCount.plus()=1]");
    assert!(matches!(
        e,
        SelectorError::UnknownMemberMethodParams { method, owner, arity: 0, .. }
            if method == "plus" && owner == "int"
    ));
}

#[test]
fn test_argument_type_mismatch() {
    let e = check_err("[getChild(\"0\").id=\"a\"]");
    assert!(matches!(e, SelectorError::MismatchParamType { found, .. } if found == "string"));

    let e = check_err("[equal(text, 1)=true]");
    assert!(matches!(e, SelectorError::MismatchParamType { .. }));
}

#[test]
fn test_expression_type_mismatch() {
    let e = check_err("[text=1]");
    assert!(
        matches!(e, SelectorError::MismatchExpressionType { left, right, .. } if left == "string" && right == "int")
    );

    assert!(matches!(
        check_err("[clickable=\"true\"]"),
        SelectorError::MismatchExpressionType { .. }
    ));
    assert!(matches!(
        check_err("[childCount^=\"1\"]"),
        SelectorError::MismatchExpressionType { .. }
    ));
}

#[test]
fn test_operator_type_mismatch() {
    // ordering needs int operands, string matching needs string operands
    for source in [
        "[text>\"a\"]",
        "[clickable^=true]",
        "[clickable^=clickable]",
        "[text>text]",
        "[text~=text]",
    ] {
        let e = check_err(source);
        assert!(
            matches!(e, SelectorError::MismatchOperatorType { .. }),
            "{source}: {e:?}"
        );
    }
}

#[test]
fn test_every_segment_is_checked() {
    let e = check_err("[nope=1] < [id=\"a\"]");
    assert!(matches!(e, SelectorError::UnknownIdentifier { .. }));
}

#[test]
fn test_error_renders_with_source() {
    let e = check_err("[id=\"a\" && nope=1]");
    let rendered = format!("{:?}", miette::Report::new(e));
    assert!(rendered.contains("nope"), "{rendered}");
}
