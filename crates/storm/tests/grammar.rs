//! The grammar runtime: the .bnf reader, the parser, repetition
//! equivalence, the info tree, and transforms.

use std::{path::PathBuf, sync::Arc};

use storm::{
    EntityId, FileInfo, FileReader, Parser, Production, RepType, Scope, SimplePart, Token, Value, World,
    syntax::{
        IndentInfo, IndentType, TextIndent,
        bnf::BnfFileReader,
        tree::SynValue,
    },
};

fn test_pkg(w: &mut World) -> EntityId {
    let pkg = w.new_package("test");
    let root = w.root();
    w.add_to(root, pkg).unwrap();
    pkg
}

fn file_info(pkg: EntityId, name: &str, contents: &str) -> FileInfo {
    FileInfo {
        contents: Arc::new(contents.to_string()),
        start: 0,
        url: Arc::new(PathBuf::from(name)),
        pkg,
    }
}

fn read_bnf(w: &mut World, pkg: EntityId, source: &str) {
    let info = file_info(pkg, "test.bnf", source);
    let mut reader = BnfFileReader::new(info).unwrap();
    reader.read_syntax_rules(w).unwrap();
    reader.read_syntax_productions(w).unwrap();
}

fn find_rule(w: &mut World, pkg: EntityId, name: &str) -> EntityId {
    let scope = Scope::with_default(pkg);
    w.find_in(pkg, &SimplePart::new(name), &scope).unwrap().unwrap()
}

fn strip_ws(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Parsing and re-emitting a grammar file: `void Start() : "a"+ = test;`
/// declares one rule and one production, and prints back the same text up
/// to whitespace.
#[test]
fn bnf_round_trip() {
    let source = r#"void Start() : "a"+ = test;"#;
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    read_bnf(&mut w, pkg, source);

    let rule = find_rule(&mut w, pkg, "Start");
    let data = w.rule_data(rule).unwrap();
    assert!(data.result.is_void());
    assert_eq!(data.productions.len(), 1);

    let prod_id = data.productions[0];
    let prod = w.production(prod_id);
    assert_eq!(prod.tokens.len(), 1);
    assert_eq!(prod.rep_start, 0);
    assert_eq!(prod.rep_end, 1);
    assert_eq!(prod.rep, RepType::OnePlus);
    assert_eq!(prod.name.as_deref(), Some("test"));

    let printed = w.production(prod_id).to_bnf(&w);
    assert_eq!(strip_ws(&printed), strip_ws(source));
}

/// The production type is a fresh subclass of its rule.
#[test]
fn production_types_subclass_their_rule() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    read_bnf(&mut w, pkg, r#"void Start() : "a" = test;"#);

    let rule = find_rule(&mut w, pkg, "Start");
    let prod_id = w.rule_data(rule).unwrap().productions[0];
    let ty = w.production(prod_id).ty.unwrap();
    assert!(w.is_a(ty, rule));
    assert_eq!(w.entity(ty).name, "test");
}

/// A parse produces the match end and an info tree that reproduces the
/// source exactly.
#[test]
fn parse_and_round_trip_the_info_tree() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    read_bnf(&mut w, pkg, r#"void Start() : "a"+ = test;"#);
    let rule = find_rule(&mut w, pkg, "Start");

    let mut parser = Parser::new(rule);
    assert!(parser.parse(&w, "aaa", None, 0));
    assert_eq!(parser.match_end(), Some(3));
    assert!(parser.has_tree());
    assert_eq!(parser.info_tree().unwrap().to_source(), "aaa");

    assert!(!parser.parse(&w, "b", None, 0));
    assert!(parser.error().is_some());
}

/// `(X)+` accepts the same strings as `X (X)*`, and the captured arrays
/// have equal total length and contents.
#[test]
fn repetition_equivalence() {
    let mut w = World::bare();

    let rule_a = w.new_rule("A", Value::VOID).unwrap();
    let prod_a = Production::new(rule_a, vec![Token::regex("x").unwrap().store_in("items")])
        .repeat(0, 1, RepType::OnePlus);
    w.attach_production(prod_a).unwrap();

    let rule_b = w.new_rule("B", Value::VOID).unwrap();
    let prod_b = Production::new(
        rule_b,
        vec![
            Token::regex("x").unwrap().store_in("first"),
            Token::regex("x").unwrap().store_in("rest"),
        ],
    )
    .repeat(1, 2, RepType::ZeroPlus);
    w.attach_production(prod_b).unwrap();

    for input in ["", "x", "xx", "xxxxx", "xy"] {
        let mut pa = Parser::new(rule_a);
        let mut pb = Parser::new(rule_b);
        let ok_a = pa.parse(&w, input, None, 0);
        let ok_b = pb.parse(&w, input, None, 0);
        assert_eq!(ok_a, ok_b, "the two grammars disagree on {input:?}");
        if !ok_a {
            continue;
        }
        assert_eq!(pa.match_end(), pb.match_end(), "different match length on {input:?}");

        let count_a = {
            let tree = pa.tree().unwrap();
            let root = tree.root().unwrap();
            match tree.node(root).members.get("items") {
                Some(SynValue::Array(items)) => items.len(),
                other => panic!("expected an array, got {other:?}"),
            }
        };
        let count_b = {
            let tree = pb.tree().unwrap();
            let root = tree.root().unwrap();
            let rest = match tree.node(root).members.get("rest") {
                Some(SynValue::Array(items)) => items.len(),
                other => panic!("expected an array, got {other:?}"),
            };
            1 + rest
        };
        assert_eq!(count_a, count_b, "different capture counts on {input:?}");
    }
}

/// `?` captures become maybes: present on a match, absent otherwise.
#[test]
fn optional_captures_have_maybe_shape() {
    let mut w = World::bare();
    let rule = w.new_rule("Opt", Value::VOID).unwrap();
    let prod = Production::new(
        rule,
        vec![
            Token::regex("a").unwrap(),
            Token::regex("b").unwrap().store_in("tail"),
        ],
    )
    .repeat(1, 2, RepType::ZeroOne);
    w.attach_production(prod).unwrap();

    let mut parser = Parser::new(rule);
    assert!(parser.parse(&w, "ab", None, 0));
    {
        let tree = parser.tree().unwrap();
        let root = tree.root().unwrap();
        assert!(matches!(tree.node(root).members.get("tail"), Some(SynValue::Maybe(Some(_)))));
    }

    assert!(parser.parse(&w, "a", None, 0));
    let tree = parser.tree().unwrap();
    let root = tree.root().unwrap();
    assert!(matches!(tree.node(root).members.get("tail"), Some(SynValue::Maybe(None))));
}

/// Priorities order production attempts: higher first.
#[test]
fn priorities_pick_the_preferred_production() {
    let mut w = World::bare();
    let rule = w.new_rule("P", Value::VOID).unwrap();
    let mut low = Production::new(rule, vec![Token::regex("a+").unwrap().store_in("m")]);
    low.priority = 0;
    low.name = Some("low".to_string());
    w.attach_production(low).unwrap();
    let mut high = Production::new(rule, vec![Token::regex("aa").unwrap().store_in("m")]);
    high.priority = 10;
    high.name = Some("high".to_string());
    w.attach_production(high).unwrap();

    let mut parser = Parser::new(rule);
    assert!(parser.parse(&w, "aa", None, 0));
    let tree = parser.tree().unwrap();
    let root = tree.root().unwrap();
    let prod = tree.node(root).production;
    assert_eq!(w.production(prod).name.as_deref(), Some("high"));
}

/// Error recovery quantifies its work, and outcomes are comparable.
#[test]
fn approximate_parsing_counts_repairs() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    read_bnf(&mut w, pkg, r#"void Start() : "a"+ = test;"#);
    let rule = find_rule(&mut w, pkg, "Start");

    let mut clean = Parser::new(rule);
    let perfect = clean.parse_approx(&w, "aaa", None);
    assert!(perfect.success);
    assert_eq!(perfect.skipped, 0);

    let mut broken = Parser::new(rule);
    let repaired = broken.parse_approx(&w, "aaba", None);
    assert!(repaired.success);
    assert_eq!(repaired.skipped, 1);
    assert!(perfect.better_than(&repaired));

    // The root of a repaired tree carries the error flag.
    let tree = broken.info_tree().unwrap();
    let root = tree.root().unwrap();
    assert!(tree.error(root));
}

/// Indent annotations apply to positions inside the annotated token range.
#[test]
fn indent_annotations_adjust_positions_in_range() {
    let mut w = World::bare();
    let rule = w.new_rule("I", Value::VOID).unwrap();
    let mut prod = Production::new(
        rule,
        vec![
            Token::regex("\\{").unwrap(),
            Token::regex("[a-z]+").unwrap(),
            Token::regex("\\}").unwrap(),
        ],
    );
    prod.indent = Some(IndentInfo {
        start: 1,
        end: 2,
        kind: IndentType::Increase,
    });
    w.attach_production(prod).unwrap();

    let mut parser = Parser::new(rule);
    assert!(parser.parse(&w, "{abc}", None, 0));
    let tree = parser.info_tree().unwrap();
    let root = tree.root().unwrap();
    assert_eq!(tree.indent_at(root, 0), TextIndent::Level(0));
    assert_eq!(tree.indent_at(root, 2), TextIndent::Level(1));
    assert_eq!(tree.indent_at(root, 4), TextIndent::Level(0));
}

/// Transforming a production with a declared result yields the named
/// member's (transformed) value.
#[test]
fn transform_returns_the_declared_result() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    read_bnf(
        &mut w,
        pkg,
        r#"
void Word() : "[a-z]+" w = word;
void Start() => w : Word w = start;
"#,
    );
    let start = find_rule(&mut w, pkg, "Start");

    let mut parser = Parser::new(start);
    assert!(parser.parse(&w, "hello", None, 0));
    let tree = parser.tree().unwrap();
    let root = tree.root().unwrap();
    let result = tree.transform(&mut w, root).unwrap();

    // Start's result is its Word child; Word's default result is its own
    // production instance, carrying the captured text.
    match result {
        SynValue::Node(node) => match tree.node(node).members.get("w") {
            Some(SynValue::Str(text, _)) => assert_eq!(text, "hello"),
            other => panic!("expected the captured text, got {other:?}"),
        },
        other => panic!("expected a node, got {other:?}"),
    }
}

/// Two parsers share a syntax exactly when they share the root rule.
#[test]
fn same_syntax_compares_roots() {
    let mut w = World::bare();
    let a = w.new_rule("A", Value::VOID).unwrap();
    let b = w.new_rule("B", Value::VOID).unwrap();
    let p1 = Parser::new(a);
    let p2 = Parser::new(a);
    let p3 = Parser::new(b);
    assert!(p1.same_syntax(&p2));
    assert!(!p1.same_syntax(&p3));
}

/// Delimiter tokens resolve to the declared delimiter rules at load time.
#[test]
fn delimiters_resolve_to_declared_rules() {
    let mut w = World::bare();
    let pkg = test_pkg(&mut w);
    read_bnf(
        &mut w,
        pkg,
        r#"
void Ws() : "\s*" = ws;
optional = Ws;
void Pair() : "a", "b" = pair;
"#,
    );
    let pair = find_rule(&mut w, pkg, "Pair");
    let prod = w.rule_data(pair).unwrap().productions[0];

    let mut parser = Parser::new(pair);
    assert!(parser.parse(&w, "a  b", None, 0));
    assert_eq!(parser.match_end(), Some(4));
    assert!(parser.parse(&w, "ab", None, 0));
    assert_eq!(w.production(prod).tokens.len(), 3);
}
