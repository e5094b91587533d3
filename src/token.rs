//! Pattern token classification
//!
//! A pattern is a sequence of elements. Each element is a node token
//! (`name<Type>`), an edge token (`-name<Type>->` or `<-name<Type>-`), or a
//! constraint marker (`:when`, `:when-let`, `:let`, `:while`) followed by
//! its body. Classification is purely by surface syntax.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use std::fmt;

use crate::error::CompileError;
use crate::expr::{Expr, parse_bindings, parse_expr};

#[derive(Parser)]
#[grammar = "pattern.pest"]
pub(crate) struct PatternParser;

/// Direction of an edge token relative to the element written before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Out,
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "out"),
            Direction::In => write!(f, "in"),
        }
    }
}

/// A type name, possibly qualified (`genealogy.Member`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeSpec(String);

impl TypeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node token; `_` and bare `<Type>` are anonymous
#[derive(Debug, Clone, PartialEq)]
pub struct NodeToken {
    pub name: Option<String>,
    pub ty: Option<TypeSpec>,
}

/// An edge token with its direction marker stripped
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeToken {
    pub name: Option<String>,
    pub ty: Option<TypeSpec>,
    pub direction: Direction,
}

impl fmt::Display for EdgeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.as_deref().unwrap_or("");
        let ty = self
            .ty
            .as_ref()
            .map(|ty| format!("<{ty}>"))
            .unwrap_or_default();
        match self.direction {
            Direction::Out => write!(f, "-{name}{ty}->"),
            Direction::In => write!(f, "<-{name}{ty}-"),
        }
    }
}

/// Auxiliary forms interleaved with the structural tokens
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintForm {
    /// `:when expr` drops the partial match when `expr` is false
    When(Expr),
    /// `:while expr` stops the innermost generator when `expr` is false
    While(Expr),
    /// `:let [x = expr, ...]`
    Let(Vec<(String, Expr)>),
    /// `:when-let [x = expr, ...]`, aborting on the first nil binding
    WhenLet(Vec<(String, Expr)>),
}

impl ConstraintForm {
    pub fn keyword(&self) -> &'static str {
        match self {
            ConstraintForm::When(_) => ":when",
            ConstraintForm::While(_) => ":while",
            ConstraintForm::Let(_) => ":let",
            ConstraintForm::WhenLet(_) => ":when-let",
        }
    }
}

/// A classified pattern element
#[derive(Debug, Clone, PartialEq)]
pub enum PatternToken {
    Node(NodeToken),
    Edge(EdgeToken),
    Constraint(ConstraintForm),
}

/// Which constraint form a marker introduces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    When,
    WhenLet,
    Let,
    While,
}

/// Classification of a single element, before marker bodies are attached
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Node(NodeToken),
    Edge(EdgeToken),
    Marker(ConstraintKind),
}

/// Parse `text` with a whole-input rule and return the rule's first child
fn parse_single(rule: Rule, text: &str) -> Option<Pair<'_, Rule>> {
    PatternParser::parse(rule, text)
        .ok()?
        .next()?
        .into_inner()
        .next()
}

/// Classify one pattern element
pub fn classify(element: &str) -> Result<Classified, CompileError> {
    let element = element.trim();

    if let Some(marker) = parse_single(Rule::marker_token, element) {
        return marker_kind(&marker).map(Classified::Marker);
    }
    if let Some(edge) = parse_single(Rule::edge_token, element) {
        return Ok(Classified::Edge(edge_token(edge)));
    }
    if let Some(node) = parse_single(Rule::node_token, element) {
        return Ok(Classified::Node(node_token(node)));
    }

    Err(CompileError::malformed(
        element,
        "not a node token, edge token or constraint marker",
    ))
}

/// Classify a sequence of pattern elements, attaching each marker's body
pub fn classify_all<S: AsRef<str>>(elements: &[S]) -> Result<Vec<PatternToken>, CompileError> {
    let mut tokens = Vec::with_capacity(elements.len());
    let mut iter = elements.iter().map(AsRef::as_ref);

    while let Some(element) = iter.next() {
        match classify(element)? {
            Classified::Node(node) => tokens.push(PatternToken::Node(node)),
            Classified::Edge(edge) => tokens.push(PatternToken::Edge(edge)),
            Classified::Marker(kind) => {
                let Some(body) = iter.next() else {
                    return Err(CompileError::malformed(
                        element,
                        "constraint marker without a body",
                    ));
                };
                tokens.push(PatternToken::Constraint(constraint_body(kind, body)?));
            }
        }
    }

    Ok(tokens)
}

/// Parse a complete pattern written as one string
///
/// Guard bodies must be parenthesized here (`:when (x.age > 3)`), and
/// binding lists bracketed (`:let [n = x.name]`).
pub fn tokenize(pattern: &str) -> Result<Vec<PatternToken>, CompileError> {
    let mut pairs = PatternParser::parse(Rule::pattern, pattern)?;
    let Some(root) = pairs.next() else {
        return Ok(Vec::new());
    };

    let mut tokens = Vec::new();
    for pair in root.into_inner() {
        match pair.as_rule() {
            Rule::node => tokens.push(PatternToken::Node(node_token(pair))),
            Rule::out_edge | Rule::in_edge => tokens.push(PatternToken::Edge(edge_token(pair))),
            Rule::guard_form | Rule::binding_form => {
                let text = pair.as_str();
                let mut inner = pair.into_inner();
                let Some(marker) = inner.next() else {
                    return Err(CompileError::malformed(text, "missing constraint marker"));
                };
                let kind = marker_kind(&marker)?;
                let form = match kind {
                    ConstraintKind::When | ConstraintKind::While => {
                        let Some(body) = inner.next() else {
                            return Err(CompileError::malformed(text, "missing guard expression"));
                        };
                        guard_form(kind, parse_expr(body)?)
                    }
                    ConstraintKind::Let | ConstraintKind::WhenLet => {
                        binding_form(kind, parse_bindings(inner)?)
                    }
                };
                tokens.push(PatternToken::Constraint(form));
            }
            _ => {} // EOI
        }
    }

    Ok(tokens)
}

fn marker_kind(pair: &Pair<Rule>) -> Result<ConstraintKind, CompileError> {
    match pair.as_rule() {
        Rule::when_marker => Ok(ConstraintKind::When),
        Rule::when_let_marker => Ok(ConstraintKind::WhenLet),
        Rule::let_marker => Ok(ConstraintKind::Let),
        Rule::while_marker => Ok(ConstraintKind::While),
        _ => Err(CompileError::malformed(pair.as_str(), "unknown constraint marker")),
    }
}

fn constraint_body(kind: ConstraintKind, body: &str) -> Result<ConstraintForm, CompileError> {
    let body_error = |e: pest::error::Error<Rule>| {
        CompileError::malformed(body, e.variant.message().into_owned())
    };

    match kind {
        ConstraintKind::When | ConstraintKind::While => {
            let mut pairs = PatternParser::parse(Rule::guard_body, body).map_err(body_error)?;
            let expr = pairs
                .next()
                .and_then(|p| p.into_inner().next())
                .ok_or_else(|| CompileError::malformed(body, "empty guard expression"))?;
            Ok(guard_form(kind, parse_expr(expr)?))
        }
        ConstraintKind::Let | ConstraintKind::WhenLet => {
            let mut pairs = PatternParser::parse(Rule::bindings_body, body).map_err(body_error)?;
            let list = pairs
                .next()
                .and_then(|p| p.into_inner().next())
                .ok_or_else(|| CompileError::malformed(body, "empty binding list"))?;
            Ok(binding_form(kind, parse_bindings(list.into_inner())?))
        }
    }
}

fn guard_form(kind: ConstraintKind, expr: Expr) -> ConstraintForm {
    if kind == ConstraintKind::While {
        ConstraintForm::While(expr)
    } else {
        ConstraintForm::When(expr)
    }
}

fn binding_form(kind: ConstraintKind, bindings: Vec<(String, Expr)>) -> ConstraintForm {
    if kind == ConstraintKind::WhenLet {
        ConstraintForm::WhenLet(bindings)
    } else {
        ConstraintForm::Let(bindings)
    }
}

/// Pull the optional name and type out of a node or edge pair
fn name_and_type(pair: Pair<Rule>) -> (Option<String>, Option<TypeSpec>) {
    let mut name = None;
    let mut ty = None;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::elem_name if part.as_str() != "_" => name = Some(part.as_str().to_string()),
            Rule::type_annot => {
                ty = part
                    .into_inner()
                    .next()
                    .map(|type_name| TypeSpec::new(type_name.as_str()));
            }
            _ => {}
        }
    }
    (name, ty)
}

fn node_token(pair: Pair<Rule>) -> NodeToken {
    let (name, ty) = name_and_type(pair);
    NodeToken { name, ty }
}

fn edge_token(pair: Pair<Rule>) -> EdgeToken {
    let direction = if pair.as_rule() == Rule::in_edge {
        Direction::In
    } else {
        Direction::Out
    };
    let (name, ty) = name_and_type(pair);
    EdgeToken {
        name,
        ty,
        direction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{CmpOp, Literal};

    fn node(name: Option<&str>, ty: Option<&str>) -> Classified {
        Classified::Node(NodeToken {
            name: name.map(str::to_string),
            ty: ty.map(TypeSpec::new),
        })
    }

    fn edge(name: Option<&str>, ty: Option<&str>, direction: Direction) -> Classified {
        Classified::Edge(EdgeToken {
            name: name.map(str::to_string),
            ty: ty.map(TypeSpec::new),
            direction,
        })
    }

    #[test]
    fn test_classify_nodes() {
        assert_eq!(classify("f").unwrap(), node(Some("f"), None));
        assert_eq!(classify("f<Family>").unwrap(), node(Some("f"), Some("Family")));
        assert_eq!(classify("<Family>").unwrap(), node(None, Some("Family")));
        assert_eq!(classify("_").unwrap(), node(None, None));
        assert_eq!(classify("_<Member>").unwrap(), node(None, Some("Member")));
        assert_eq!(
            classify("m<genealogy.Member>").unwrap(),
            node(Some("m"), Some("genealogy.Member"))
        );
    }

    #[test]
    fn test_classify_edges() {
        assert_eq!(
            classify("-hf<HasFather>->").unwrap(),
            edge(Some("hf"), Some("HasFather"), Direction::Out)
        );
        assert_eq!(classify("-->").unwrap(), edge(None, None, Direction::Out));
        assert_eq!(
            classify("-<HasSon>->").unwrap(),
            edge(None, Some("HasSon"), Direction::Out)
        );
        assert_eq!(classify("-e->").unwrap(), edge(Some("e"), None, Direction::Out));
        assert_eq!(
            classify("<-e<Contains>-").unwrap(),
            edge(Some("e"), Some("Contains"), Direction::In)
        );
        assert_eq!(classify("<--").unwrap(), edge(None, None, Direction::In));
    }

    #[test]
    fn test_classify_markers() {
        assert_eq!(
            classify(":when").unwrap(),
            Classified::Marker(ConstraintKind::When)
        );
        assert_eq!(
            classify(":when-let").unwrap(),
            Classified::Marker(ConstraintKind::WhenLet)
        );
        assert_eq!(
            classify(":let").unwrap(),
            Classified::Marker(ConstraintKind::Let)
        );
        assert_eq!(
            classify(":while").unwrap(),
            Classified::Marker(ConstraintKind::While)
        );
    }

    #[test]
    fn test_classify_malformed() {
        for bad in ["", "-e>", "a<", "<>", "--", ":whenever", "a b", "1abc"] {
            assert!(
                matches!(classify(bad), Err(CompileError::MalformedToken { .. })),
                "expected {bad:?} to be malformed"
            );
        }
    }

    #[test]
    fn test_classify_all_attaches_bodies() {
        let tokens = classify_all(&[
            "m<Member>",
            ":when",
            "m.age >= 18",
            ":let",
            "[n = m.name, k = 1]",
        ])
        .unwrap();

        assert_eq!(tokens.len(), 3);
        match &tokens[1] {
            PatternToken::Constraint(ConstraintForm::When(Expr::Compare(op, _, rhs))) => {
                assert_eq!(*op, CmpOp::Ge);
                assert_eq!(**rhs, Expr::Literal(Literal::Int(18)));
            }
            other => panic!("Expected :when guard, got {other:?}"),
        }
        match &tokens[2] {
            PatternToken::Constraint(ConstraintForm::Let(bindings)) => {
                assert_eq!(bindings.len(), 2);
                assert_eq!(bindings[0].0, "n");
                assert_eq!(bindings[1].1, Expr::Literal(Literal::Int(1)));
            }
            other => panic!("Expected :let form, got {other:?}"),
        }
    }

    #[test]
    fn test_marker_without_body() {
        let result = classify_all(&["a", ":when"]);
        assert!(matches!(
            result,
            Err(CompileError::MalformedToken { token, .. }) if token == ":when"
        ));
    }

    #[test]
    fn test_bad_marker_body() {
        let result = classify_all(&["a", ":when", "a.x =="]);
        assert!(matches!(
            result,
            Err(CompileError::MalformedToken { token, .. }) if token == "a.x =="
        ));
    }

    #[test]
    fn test_tokenize_whole_pattern() {
        let tokens = tokenize(
            r#"
            // fathers of families named Smith
            f<Family> -hf<HasFather>-> m<Member>
            :when (f.lastName == "Smith")
            :when-let [n = m.firstName]
            "#,
        )
        .unwrap();

        assert_eq!(tokens.len(), 5);
        assert!(matches!(&tokens[0], PatternToken::Node(n) if n.name.as_deref() == Some("f")));
        assert!(matches!(
            &tokens[1],
            PatternToken::Edge(e)
                if e.direction == Direction::Out && e.name.as_deref() == Some("hf")
        ));
        assert!(matches!(&tokens[3], PatternToken::Constraint(ConstraintForm::When(_))));
        assert!(matches!(
            &tokens[4],
            PatternToken::Constraint(ConstraintForm::WhenLet(b)) if b.len() == 1
        ));
    }

    #[test]
    fn test_tokenize_without_spaces() {
        let tokens = tokenize("a-->_<X><--b").unwrap();
        assert_eq!(tokens.len(), 5);
        assert!(matches!(&tokens[3], PatternToken::Edge(e) if e.direction == Direction::In));
    }

    #[test]
    fn test_tokenize_syntax_error() {
        assert!(matches!(tokenize("a -e-> :when x"), Err(CompileError::Syntax(_))));
    }
}
