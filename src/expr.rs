//! Constraint expressions
//!
//! The bodies of `:when`, `:while`, `:let` and `:when-let` are parsed into
//! an [`Expr`] tree. The compiler also builds its own checks (type tests,
//! edge ends, reachability membership) as `Expr` nodes, so the executor has
//! a single thing to interpret.

use pest::iterators::Pair;
use std::fmt;

use crate::error::CompileError;
use crate::plan::Source;
use crate::token::{Direction, Rule, TypeSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Var(String),
    /// `x.attr`
    Attr(Box<Expr>, String),
    /// `f(a, b)`, resolved by the executor's function table
    Call(String, Vec<Expr>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),

    // Forms produced by the compiler only
    /// The externally supplied value of an argument
    Argument(String),
    IsInstance(Box<Expr>, TypeSpec),
    /// The far end of edge `edge` when traversed in `direction`
    EdgeEnd { edge: String, direction: Direction },
    /// Edge `edge` leaves `node` in `direction` and has type `ty`
    IncidentAt {
        edge: String,
        node: String,
        ty: Option<TypeSpec>,
        direction: Direction,
    },
    /// Variable is bound to something other than nil
    IsPresent(String),
    NonEmpty(Source),
    Member(String, Source),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    /// Visit this expression and every sub-expression, pre-order
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Attr(inner, _) | Expr::Not(inner) | Expr::IsInstance(inner, _) => {
                inner.walk(visit)
            }
            Expr::Call(_, args) | Expr::And(args) | Expr::Or(args) => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Compare(_, lhs, rhs) => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            _ => {}
        }
    }

    /// Variables this expression reads, in first-use order
    pub fn free_vars(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |expr| match expr {
            Expr::Var(name) | Expr::IsPresent(name) => names.push(name.as_str()),
            Expr::EdgeEnd { edge, .. } => names.push(edge.as_str()),
            Expr::IncidentAt { edge, node, .. } => {
                names.push(edge.as_str());
                names.push(node.as_str());
            }
            Expr::NonEmpty(source) => names.extend(source.input()),
            Expr::Member(var, source) => {
                names.push(var.as_str());
                names.extend(source.input());
            }
            _ => {}
        });
        let mut vars: Vec<&str> = Vec::with_capacity(names.len());
        for name in names {
            if !vars.contains(&name) {
                vars.push(name);
            }
        }
        vars
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Nil => write!(f, "nil"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        f.write_str(op)
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Var(name) => f.write_str(name),
            Expr::Attr(inner, attr) => write!(f, "{inner}.{attr}"),
            Expr::Call(name, args) => {
                write!(f, "{name}(")?;
                write_joined(f, args, ", ")?;
                f.write_str(")")
            }
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::And(items) => {
                f.write_str("(")?;
                write_joined(f, items, " && ")?;
                f.write_str(")")
            }
            Expr::Or(items) => {
                f.write_str("(")?;
                write_joined(f, items, " || ")?;
                f.write_str(")")
            }
            Expr::Compare(op, lhs, rhs) => write!(f, "{lhs} {op} {rhs}"),
            Expr::Argument(name) => write!(f, "arg({name})"),
            Expr::IsInstance(inner, ty) => write!(f, "{inner} is {ty}"),
            Expr::EdgeEnd { edge, direction } => write!(f, "end({edge}, {direction})"),
            Expr::IncidentAt {
                edge,
                node,
                ty,
                direction,
            } => match ty {
                Some(ty) => write!(f, "incident({edge}, {node}, {direction}, {ty})"),
                None => write!(f, "incident({edge}, {node}, {direction})"),
            },
            Expr::IsPresent(name) => write!(f, "present({name})"),
            Expr::NonEmpty(source) => write!(f, "nonempty({source})"),
            Expr::Member(name, source) => write!(f, "{name} in {source}"),
        }
    }
}

/// Parse an `expr` pair
pub(crate) fn parse_expr(pair: Pair<Rule>) -> Result<Expr, CompileError> {
    match pair.as_rule() {
        Rule::expr => first_child(pair).and_then(parse_expr),
        Rule::disjunction => fold_children(pair, Expr::Or),
        Rule::conjunction => fold_children(pair, Expr::And),
        Rule::comparison => parse_comparison(pair),
        Rule::unary => parse_unary(pair),
        Rule::postfix => parse_postfix(pair),
        Rule::call => parse_call(pair),
        Rule::var => Ok(Expr::Var(pair.as_str().to_string())),
        Rule::nil => Ok(Expr::Literal(Literal::Nil)),
        Rule::boolean => Ok(Expr::Literal(Literal::Bool(pair.as_str() == "true"))),
        Rule::integer => pair
            .as_str()
            .parse::<i64>()
            .map(|i| Expr::Literal(Literal::Int(i)))
            .map_err(|e| CompileError::malformed(pair.as_str(), e.to_string())),
        Rule::string => {
            let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Expr::Literal(Literal::Str(unescape(inner))))
        }
        _ => Err(CompileError::malformed(
            pair.as_str(),
            "unexpected expression element",
        )),
    }
}

/// Parse a sequence of `binding` pairs into `(name, expr)` pairs
pub(crate) fn parse_bindings<'i>(
    pairs: impl Iterator<Item = Pair<'i, Rule>>,
) -> Result<Vec<(String, Expr)>, CompileError> {
    let mut bindings = Vec::new();
    for pair in pairs {
        if pair.as_rule() != Rule::binding {
            continue;
        }
        let text = pair.as_str();
        let mut inner = pair.into_inner();
        let (Some(name), Some(value)) = (inner.next(), inner.next()) else {
            return Err(CompileError::malformed(text, "incomplete binding"));
        };
        bindings.push((name.as_str().to_string(), parse_expr(value)?));
    }
    Ok(bindings)
}

fn first_child(pair: Pair<Rule>) -> Result<Pair<Rule>, CompileError> {
    let text = pair.as_str();
    pair.into_inner()
        .next()
        .ok_or_else(|| CompileError::malformed(text, "empty expression"))
}

/// Parse all children; a single child stands for itself
fn fold_children(pair: Pair<Rule>, combine: fn(Vec<Expr>) -> Expr) -> Result<Expr, CompileError> {
    let mut items = pair
        .into_inner()
        .map(parse_expr)
        .collect::<Result<Vec<_>, _>>()?;
    if items.len() == 1 {
        Ok(items.remove(0))
    } else {
        Ok(combine(items))
    }
}

fn parse_comparison(pair: Pair<Rule>) -> Result<Expr, CompileError> {
    let text = pair.as_str();
    let mut inner = pair.into_inner();
    let lhs = parse_expr(first_or(&mut inner, text)?)?;
    let Some(op) = inner.next() else {
        return Ok(lhs);
    };
    let op = match op.as_str() {
        "==" => CmpOp::Eq,
        "!=" => CmpOp::Ne,
        "<" => CmpOp::Lt,
        "<=" => CmpOp::Le,
        ">" => CmpOp::Gt,
        ">=" => CmpOp::Ge,
        other => return Err(CompileError::malformed(other, "unknown comparison operator")),
    };
    let rhs = parse_expr(first_or(&mut inner, text)?)?;
    Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
}

fn parse_unary(pair: Pair<Rule>) -> Result<Expr, CompileError> {
    let mut negations = 0;
    let mut operand = None;
    for part in pair.into_inner() {
        if part.as_rule() == Rule::negation {
            negations += 1;
        } else {
            operand = Some(parse_expr(part)?);
        }
    }
    let mut expr = operand.unwrap_or(Expr::Literal(Literal::Nil));
    for _ in 0..negations {
        expr = Expr::Not(Box::new(expr));
    }
    Ok(expr)
}

fn parse_postfix(pair: Pair<Rule>) -> Result<Expr, CompileError> {
    let text = pair.as_str();
    let mut inner = pair.into_inner();
    let mut expr = parse_expr(first_or(&mut inner, text)?)?;
    for attr in inner {
        expr = Expr::Attr(Box::new(expr), attr.as_str().to_string());
    }
    Ok(expr)
}

fn parse_call(pair: Pair<Rule>) -> Result<Expr, CompileError> {
    let text = pair.as_str();
    let mut inner = pair.into_inner();
    let name = first_or(&mut inner, text)?.as_str().to_string();
    let args = inner.map(parse_expr).collect::<Result<Vec<_>, _>>()?;
    Ok(Expr::Call(name, args))
}

fn first_or<'i>(
    inner: &mut pest::iterators::Pairs<'i, Rule>,
    text: &str,
) -> Result<Pair<'i, Rule>, CompileError> {
    inner
        .next()
        .ok_or_else(|| CompileError::malformed(text, "incomplete expression"))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::PatternParser;
    use pest::Parser;

    fn parse(text: &str) -> Expr {
        let body = PatternParser::parse(Rule::guard_body, text)
            .unwrap()
            .next()
            .unwrap();
        parse_expr(body.into_inner().next().unwrap()).unwrap()
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse("nil"), Expr::Literal(Literal::Nil));
        assert_eq!(parse("true"), Expr::Literal(Literal::Bool(true)));
        assert_eq!(parse("-42"), Expr::Literal(Literal::Int(-42)));
        assert_eq!(
            parse(r#""say \"hi\"""#),
            Expr::Literal(Literal::Str("say \"hi\"".to_string()))
        );
        // keywords only match as whole words
        assert_eq!(parse("nilly"), Expr::var("nilly"));
    }

    #[test]
    fn test_parse_attribute_chain() {
        assert_eq!(
            parse("m.family.name"),
            Expr::Attr(
                Box::new(Expr::Attr(Box::new(Expr::var("m")), "family".to_string())),
                "name".to_string()
            )
        );
    }

    #[test]
    fn test_parse_precedence() {
        // && binds tighter than ||
        let expr = parse("a || b && !c");
        match expr {
            Expr::Or(items) => {
                assert_eq!(items[0], Expr::var("a"));
                assert_eq!(
                    items[1],
                    Expr::And(vec![Expr::var("b"), Expr::Not(Box::new(Expr::var("c")))])
                );
            }
            other => panic!("Expected Or, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_call_and_comparison() {
        let expr = parse(r#"has_type(m, "Member") == (x.age != 3)"#);
        match expr {
            Expr::Compare(CmpOp::Eq, lhs, rhs) => {
                assert!(matches!(
                    *lhs,
                    Expr::Call(ref name, ref args) if name == "has_type" && args.len() == 2
                ));
                assert!(matches!(*rhs, Expr::Compare(CmpOp::Ne, _, _)));
            }
            other => panic!("Expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_free_vars() {
        let expr = parse("f(a.x, b) && a == c");
        assert_eq!(expr.free_vars(), vec!["a", "b", "c"]);

        let member = Expr::Member(
            "t".to_string(),
            Source::Reachables {
                from: "s".to_string(),
                path: Default::default(),
            },
        );
        assert_eq!(member.free_vars(), vec!["t", "s"]);
    }

    #[test]
    fn test_display_round_trips_surface_syntax() {
        let expr = parse(r#"m.age >= 18 && m.name != "Bob""#);
        assert_eq!(expr.to_string(), r#"(m.age >= 18 && m.name != "Bob")"#);
    }
}
