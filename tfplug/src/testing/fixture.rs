//! Typed configuration fixtures
//!
//! A [`Fixture`] is the structured equivalent of a Terraform configuration
//! file: an ordered list of `resource` and `data` blocks whose bodies hold
//! literal values, references to other blocks and nested blocks. Fixtures
//! render to HCL through `Display` so logs show exactly what was applied.

use super::state::{ResourceMode, TestState};
use crate::types::{format_number, AttributePath, Dynamic};
use std::collections::BTreeMap;
use std::fmt;

/// A configuration made of resource and data source blocks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fixture {
    blocks: Vec<Block>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `resource "<type_name>" "<name>" { ... }`
    pub fn resource(self, type_name: &str, name: &str, body: impl FnOnce(Body) -> Body) -> Self {
        self.push(ResourceMode::Managed, type_name, name, body)
    }

    /// Declare `data "<type_name>" "<name>" { ... }`
    pub fn data(self, type_name: &str, name: &str, body: impl FnOnce(Body) -> Body) -> Self {
        self.push(ResourceMode::Data, type_name, name, body)
    }

    fn push(
        mut self,
        mode: ResourceMode,
        type_name: &str,
        name: &str,
        body: impl FnOnce(Body) -> Body,
    ) -> Self {
        self.blocks.push(Block {
            mode,
            type_name: type_name.to_string(),
            name: name.to_string(),
            body: body(Body::default()),
        });
        self
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, address: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.address() == address)
    }

    /// Blocks ordered so that every block comes after the blocks it
    /// references. Fails on references to undeclared addresses and cycles.
    pub fn apply_order(&self) -> Result<Vec<&Block>, String> {
        for block in &self.blocks {
            for reference in block.body.references() {
                if self.block(&reference.address).is_none() {
                    return Err(format!(
                        "{} references undeclared resource {}",
                        block.address(),
                        reference.address
                    ));
                }
            }
        }

        let mut ordered: Vec<&Block> = Vec::with_capacity(self.blocks.len());
        let mut pending: Vec<&Block> = self.blocks.iter().collect();

        while !pending.is_empty() {
            let before = pending.len();
            let mut still_pending = Vec::new();

            for block in pending {
                let ready = block
                    .body
                    .references()
                    .iter()
                    .all(|r| ordered.iter().any(|done| done.address() == r.address));
                if ready {
                    ordered.push(block);
                } else {
                    still_pending.push(block);
                }
            }

            if still_pending.len() == before {
                let names: Vec<String> = still_pending.iter().map(|b| b.address()).collect();
                return Err(format!("cycle between {}", names.join(", ")));
            }
            pending = still_pending;
        }

        Ok(ordered)
    }
}

impl fmt::Display for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, block) in self.blocks.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}

/// One top-level `resource` or `data` block
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub mode: ResourceMode,
    pub type_name: String,
    pub name: String,
    pub body: Body,
}

impl Block {
    /// `aws_customer_gateway.test` or `data.aws_customer_gateway.test`
    pub fn address(&self) -> String {
        address(self.mode, &self.type_name, &self.name)
    }
}

pub(crate) fn address(mode: ResourceMode, type_name: &str, name: &str) -> String {
    match mode {
        ResourceMode::Managed => format!("{}.{}", type_name, name),
        ResourceMode::Data => format!("data.{}.{}", type_name, name),
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self.mode {
            ResourceMode::Managed => "resource",
            ResourceMode::Data => "data",
        };
        writeln!(f, "{} {:?} {:?} {{", keyword, self.type_name, self.name)?;
        self.body.render(f, 1)?;
        writeln!(f, "}}")
    }
}

/// Attributes and nested blocks of a block body, in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    pub attributes: Vec<(String, Expr)>,
    pub blocks: Vec<(String, Body)>,
}

impl Body {
    pub fn attr(mut self, name: &str, value: impl Into<Expr>) -> Self {
        self.attributes.push((name.to_string(), value.into()));
        self
    }

    pub fn block(mut self, name: &str, body: impl FnOnce(Body) -> Body) -> Self {
        self.blocks.push((name.to_string(), body(Body::default())));
        self
    }

    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        for (_, expr) in &self.attributes {
            expr.collect_references(&mut out);
        }
        for (_, body) in &self.blocks {
            out.extend(body.references());
        }
        out
    }

    /// Evaluate into an object value. Repeated nested blocks accumulate
    /// into a list under their block name.
    pub fn evaluate(&self, state: &TestState) -> Result<Dynamic, String> {
        let mut out = BTreeMap::new();
        for (name, expr) in &self.attributes {
            out.insert(name.clone(), expr.evaluate(state)?);
        }
        for (name, body) in &self.blocks {
            let value = body.evaluate(state)?;
            match out
                .entry(name.clone())
                .or_insert_with(|| Dynamic::List(Vec::new()))
            {
                Dynamic::List(items) => items.push(value),
                _ => return Err(format!("{} is both an attribute and a block", name)),
            }
        }
        Ok(Dynamic::Map(out))
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        let width = self
            .attributes
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0);

        for (name, expr) in &self.attributes {
            write!(f, "{}{:<width$} = ", indent, name, width = width)?;
            expr.render(f, depth)?;
            writeln!(f)?;
        }
        let mut separate = !self.attributes.is_empty();
        for (name, body) in &self.blocks {
            if separate {
                writeln!(f)?;
            }
            separate = true;
            writeln!(f, "{}{} {{", indent, name)?;
            body.render(f, depth + 1)?;
            writeln!(f, "{}}}", indent)?;
        }
        Ok(())
    }
}

/// A reference to an attribute of another block, e.g.
/// `aws_customer_gateway.test.tags.Name`
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub address: String,
    pub attribute: String,
}

impl Reference {
    /// Split a dotted traversal into block address and attribute path
    pub fn parse(traversal: &str) -> Self {
        let segments: Vec<&str> = traversal.split('.').collect();
        let split = if segments.first() == Some(&"data") { 3 } else { 2 };
        let split = split.min(segments.len());
        Self {
            address: segments[..split].join("."),
            attribute: segments[split..].join("."),
        }
    }

    fn evaluate(&self, state: &TestState) -> Result<Dynamic, String> {
        let resource = state
            .get(&self.address)
            .ok_or_else(|| format!("{} has not been applied", self.address))?;

        let value = resource
            .value
            .get(&AttributePath::parse(&self.attribute))
            .map_err(|_| format!("{} has no attribute {:?}", self.address, self.attribute))?;

        if !value.is_fully_known() {
            return Err(format!("{} is not known after apply", self));
        }
        Ok(value.clone())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attribute.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{}.{}", self.address, self.attribute)
        }
    }
}

/// Expressions allowed on the right-hand side of an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Dynamic),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Reference(Reference),
}

/// `aws_acm_certificate.test.arn` as an expression
pub fn reference(traversal: &str) -> Expr {
    Expr::Reference(Reference::parse(traversal))
}

pub fn list<I, E>(items: I) -> Expr
where
    I: IntoIterator<Item = E>,
    E: Into<Expr>,
{
    Expr::List(items.into_iter().map(Into::into).collect())
}

pub fn map<I, K, E>(entries: I) -> Expr
where
    I: IntoIterator<Item = (K, E)>,
    K: Into<String>,
    E: Into<Expr>,
{
    Expr::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}

impl Expr {
    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Reference(r) => out.push(r),
            Expr::List(items) => items.iter().for_each(|i| i.collect_references(out)),
            Expr::Map(entries) => entries.iter().for_each(|(_, v)| v.collect_references(out)),
        }
    }

    pub fn evaluate(&self, state: &TestState) -> Result<Dynamic, String> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Reference(r) => r.evaluate(state),
            Expr::List(items) => items
                .iter()
                .map(|i| i.evaluate(state))
                .collect::<Result<Vec<_>, _>>()
                .map(Dynamic::List),
            Expr::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.evaluate(state).map(|v| (k.clone(), v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Dynamic::Map),
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            Expr::Literal(value) => render_literal(f, value, depth),
            Expr::Reference(r) => write!(f, "{}", r),
            Expr::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    item.render(f, depth)?;
                }
                write!(f, "]")
            }
            Expr::Map(entries) => {
                let indent = "  ".repeat(depth + 1);
                let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
                writeln!(f, "{{")?;
                for (key, value) in entries {
                    write!(f, "{}{:<width$} = ", indent, key, width = width)?;
                    value.render(f, depth + 1)?;
                    writeln!(f)?;
                }
                write!(f, "{}}}", "  ".repeat(depth))
            }
        }
    }
}

fn render_literal(f: &mut fmt::Formatter<'_>, value: &Dynamic, depth: usize) -> fmt::Result {
    match value {
        Dynamic::Null | Dynamic::Unknown => write!(f, "null"),
        Dynamic::Bool(b) => write!(f, "{}", b),
        Dynamic::Number(n) => write!(f, "{}", format_number(*n)),
        Dynamic::String(s) => write!(f, "\"{}\"", escape(s)),
        Dynamic::List(items) => {
            Expr::List(items.iter().cloned().map(Expr::Literal).collect()).render(f, depth)
        }
        Dynamic::Map(entries) => Expr::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), Expr::Literal(v.clone())))
                .collect(),
        )
        .render(f, depth),
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace("${", "$${")
}

impl From<Dynamic> for Expr {
    fn from(value: Dynamic) -> Self {
        Expr::Literal(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Literal(Dynamic::from(value))
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::Literal(Dynamic::from(value))
    }
}

impl From<&String> for Expr {
    fn from(value: &String) -> Self {
        Expr::Literal(Dynamic::from(value.as_str()))
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Literal(Dynamic::from(value))
    }
}

impl From<u32> for Expr {
    fn from(value: u32) -> Self {
        Expr::Literal(Dynamic::from(value))
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Literal(Dynamic::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chained() -> Fixture {
        Fixture::new()
            .resource("aws_customer_gateway", "test", |b| {
                b.attr("certificate_arn", reference("aws_acm_certificate.test.arn"))
            })
            .resource("aws_acm_certificate", "test", |b| {
                b.attr(
                    "certificate_authority_arn",
                    reference("aws_acmpca_certificate_authority.test.arn"),
                )
            })
            .resource("aws_acmpca_certificate_authority", "test", |b| {
                b.attr("type", "ROOT")
            })
    }

    #[test]
    fn reference_parse_splits_address_and_attribute() {
        let managed = Reference::parse("aws_customer_gateway.test.tags.Name");
        assert_eq!(managed.address, "aws_customer_gateway.test");
        assert_eq!(managed.attribute, "tags.Name");

        let data = Reference::parse("data.aws_customer_gateway.test.id");
        assert_eq!(data.address, "data.aws_customer_gateway.test");
        assert_eq!(data.attribute, "id");
    }

    #[test]
    fn apply_order_follows_references() {
        let fixture = chained();
        let order: Vec<String> = fixture
            .apply_order()
            .unwrap()
            .iter()
            .map(|b| b.address())
            .collect();

        assert_eq!(
            order,
            vec![
                "aws_acmpca_certificate_authority.test",
                "aws_acm_certificate.test",
                "aws_customer_gateway.test",
            ]
        );
    }

    #[test]
    fn apply_order_rejects_undeclared_reference() {
        let fixture = Fixture::new()
            .resource("aws_acm_certificate", "cert", |b| b.attr("domain_name", "x"))
            .resource("aws_customer_gateway", "test", |b| {
                b.attr("certificate_arn", reference("aws_acm_certificate.test.arn"))
            });

        let err = fixture.apply_order().unwrap_err();
        assert!(err.contains("undeclared resource aws_acm_certificate.test"));
    }

    #[test]
    fn apply_order_rejects_cycles() {
        let fixture = Fixture::new()
            .resource("a", "x", |b| b.attr("v", reference("b.y.id")))
            .resource("b", "y", |b| b.attr("v", reference("a.x.id")));

        assert!(fixture.apply_order().unwrap_err().starts_with("cycle between"));
    }

    #[test]
    fn renders_hcl() {
        let fixture = Fixture::new()
            .resource("aws_customer_gateway", "test", |b| {
                b.attr("bgp_asn", 65001u32)
                    .attr("ip_address", "50.0.0.77")
                    .attr("type", "ipsec.1")
                    .attr("tags", map([("Name", "test-filter-xyz")]))
            })
            .data("aws_customer_gateway", "test", |b| {
                b.block("filter", |f| {
                    f.attr("name", "tag:Name")
                        .attr("values", list([reference("aws_customer_gateway.test.tags.Name")]))
                })
            });

        let expected = r#"resource "aws_customer_gateway" "test" {
  bgp_asn    = 65001
  ip_address = "50.0.0.77"
  type       = "ipsec.1"
  tags       = {
    Name = "test-filter-xyz"
  }
}

data "aws_customer_gateway" "test" {
  filter {
    name   = "tag:Name"
    values = [aws_customer_gateway.test.tags.Name]
  }
}
"#;
        assert_eq!(fixture.to_string(), expected);
    }

    #[test]
    fn evaluate_collects_repeated_blocks_into_a_list() {
        let body = Body::default()
            .block("filter", |f| f.attr("name", "a"))
            .block("filter", |f| f.attr("name", "b"));

        let value = body.evaluate(&TestState::default()).unwrap();
        let Dynamic::Map(entries) = value else {
            panic!("expected an object");
        };
        assert!(matches!(entries.get("filter"), Some(Dynamic::List(items)) if items.len() == 2));
    }

    #[test]
    fn evaluate_fails_for_unapplied_reference() {
        let expr = reference("aws_customer_gateway.test.id");
        let err = expr.evaluate(&TestState::default()).unwrap_err();
        assert!(err.contains("has not been applied"));
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(escape(r#"a"b${c}"#), r#"a\"b$${c}"#);
    }
}
