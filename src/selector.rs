//! Compiled selectors and the backtracking match over a [`Transform`]

use std::fmt;

use itertools::{Either, Itertools};
use serde::{Deserialize, Serialize};

use crate::{
    eval::{context::Context, eval_expression, mentions},
    parser::{
        CompareOperator, ConnectExpression, ConnectOperator, ConnectWrapper, Expression,
        PropertyWrapper, RawParser, SelectorError, Typechecker, ValueExpression,
    },
    schema::{Schema, Symbol},
    transform::{FastQuery, Transform},
};

/// How a query may seed its candidate start nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOption {
    /// Seed from a single indexed key when the selector has exactly one
    pub quick_find: bool,
    /// Seed from every indexed key, and use them for descendant connectors too
    pub fast_query: bool,
}

/// Names whose evaluation reaches back into the tree structure
const STRUCTURAL: &[Symbol] = &[
    Symbol::Index,
    Symbol::Parent,
    Symbol::Depth,
    Symbol::GetChild,
];

#[derive(Debug, Clone)]
pub struct Selector {
    source: String,
    wrapper: PropertyWrapper,
    target_index: usize,
    fast_queries: Vec<FastQuery>,
    match_root: bool,
    use_cache: bool,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let wrapper = RawParser::parse_selector(source)?;
        Ok(Selector::new(source.to_string(), wrapper))
    }

    fn new(source: String, wrapper: PropertyWrapper) -> Self {
        let links = wrapper.links();
        let target_index = links
            .iter()
            .position(|link| link.segment.target)
            .map_or(links.len() - 1, |k| links.len() - 1 - k);

        let fast_queries = fast_query_keys(&wrapper.segment.expression);
        let match_root = wrapper
            .segment
            .expression
            .conjuncts()
            .iter()
            .any(|b| is_parent_null(&b.left, b.operator, &b.right));

        let use_cache = wrapper.to.is_some()
            || links.iter().any(|link| {
                link.segment.expression.binaries().iter().any(|b| {
                    mentions(&b.left, STRUCTURAL) || mentions(&b.right, STRUCTURAL)
                })
            });

        Selector {
            source,
            wrapper,
            target_index,
            fast_queries,
            match_root,
            use_cache,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn wrapper(&self) -> &PropertyWrapper {
        &self.wrapper
    }

    /// Steps back from the final context to the node a match returns
    pub fn target_index(&self) -> usize {
        self.target_index
    }

    /// Indexed keys every node accepted by the first tested segment satisfies
    pub fn fast_queries(&self) -> &[FastQuery] {
        &self.fast_queries
    }

    pub fn quick_find_key(&self) -> Option<&FastQuery> {
        match self.fast_queries.as_slice() {
            [key] => Some(key),
            _ => None,
        }
    }

    /// Only the tree root can match
    pub fn is_match_root(&self) -> bool {
        self.match_root
    }

    /// Matching revisits tree structure, so a memoizing transform pays off
    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    /// Connectors in chain order
    pub fn connectors(&self) -> Vec<&ConnectWrapper> {
        self.wrapper
            .links()
            .into_iter()
            .filter_map(|link| link.to.as_ref())
            .collect()
    }

    pub fn check_type(&self, schema: &Schema) -> Result<(), SelectorError> {
        Typechecker::check(&self.wrapper, schema, &self.source)
    }

    pub fn stringify(&self) -> String {
        self.wrapper.to_string()
    }

    /// Whether a query with `option` may have to walk whole subtrees
    pub fn is_slow(&self, option: MatchOption) -> bool {
        if option.quick_find && self.quick_find_key().is_none() && !self.match_root {
            return true;
        }
        if (!option.fast_query || self.fast_queries.is_empty()) && !self.match_root {
            return true;
        }
        self.connectors().iter().any(|c| {
            c.operator == ConnectOperator::Descendant
                && !(option.fast_query && connector_fast_keys(c).is_some())
        })
    }

    /// Match the chain starting at `node`, returning the final context
    pub fn match_context<T: Transform + ?Sized>(
        &self,
        node: &T::Node,
        t: &T,
        option: MatchOption,
    ) -> Option<Context<T::Node>> {
        let start = if self.match_root {
            t.root().unwrap_or_else(|| node.clone())
        } else {
            node.clone()
        };
        self.match_wrapper(&self.wrapper, Context::new(start), t, option)
    }

    /// Match the chain starting at `node`, returning the target node
    pub fn match_node<T: Transform + ?Sized>(
        &self,
        node: &T::Node,
        t: &T,
        option: MatchOption,
    ) -> Option<T::Node> {
        let context = self.match_context(node, t, option)?;
        context.get(self.target_index).cloned()
    }

    /// First match among `node` and its descendants
    pub fn query<T: Transform + ?Sized>(
        &self,
        node: &T::Node,
        t: &T,
        option: MatchOption,
    ) -> Option<T::Node> {
        if self.match_root {
            return self.match_node(node, t, option);
        }
        self.starts(node, t, option)
            .find_map(|start| self.match_node(&start, t, option))
    }

    /// Every distinct match among `node` and its descendants, in traversal order
    pub fn query_all<T: Transform + ?Sized>(
        &self,
        node: &T::Node,
        t: &T,
        option: MatchOption,
    ) -> Vec<T::Node> {
        if self.match_root {
            return self.match_node(node, t, option).into_iter().collect();
        }
        self.starts(node, t, option)
            .filter_map(|start| self.match_node(&start, t, option))
            .unique()
            .collect()
    }

    fn starts<'t, T: Transform + ?Sized>(
        &self,
        node: &T::Node,
        t: &'t T,
        option: MatchOption,
    ) -> impl Iterator<Item = T::Node> + 't {
        let seeded = (option.fast_query && !self.fast_queries.is_empty())
            || (option.quick_find && self.quick_find_key().is_some());
        if seeded {
            Either::Left(t.fast_query_descendants(node, &self.fast_queries).into_iter())
        } else {
            Either::Right(std::iter::once(node.clone()).chain(t.descendants(node)))
        }
    }

    fn match_wrapper<T: Transform + ?Sized>(
        &self,
        wrapper: &PropertyWrapper,
        context: Context<T::Node>,
        t: &T,
        option: MatchOption,
    ) -> Option<Context<T::Node>> {
        if !eval_expression(&wrapper.segment.expression, &context, t) {
            return None;
        }
        let Some(connect) = &wrapper.to else {
            return Some(context);
        };
        let node = context.current().clone();
        self.candidates(connect, &node, t, option)
            .find_map(|candidate| self.match_wrapper(&connect.to, context.push(candidate), t, option))
    }

    fn candidates<'t, T: Transform + ?Sized>(
        &self,
        connect: &ConnectWrapper,
        node: &T::Node,
        t: &'t T,
        option: MatchOption,
    ) -> impl Iterator<Item = T::Node> + 't {
        match connector_fast_keys(connect).filter(|_| option.fast_query) {
            Some(keys) => {
                let mut found = t.fast_query_descendants(node, &keys);
                found.retain(|n| n != node);
                Either::Left(found.into_iter())
            }
            None => Either::Right(t.traverse(connect.operator, node, connect.expression)),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wrapper)
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.wrapper == other.wrapper
    }
}

/// Keys a descendant connector can be answered with instead of a full walk
fn connector_fast_keys(connect: &ConnectWrapper) -> Option<Vec<FastQuery>> {
    if connect.operator != ConnectOperator::Descendant
        || connect.expression != ConnectExpression::default()
    {
        return None;
    }
    let keys = fast_query_keys(&connect.to.segment.expression);
    (!keys.is_empty()).then_some(keys)
}

/// Indexed keys implied by an expression: any node it accepts satisfies one of them
fn fast_query_keys(expression: &Expression) -> Vec<FastQuery> {
    match expression {
        Expression::Binary(b) => {
            let (ValueExpression::Identifier { name, .. }, ValueExpression::String(literal)) =
                (&b.left, &b.right)
            else {
                return Vec::new();
            };
            if literal.value.is_empty() {
                return Vec::new();
            }
            let value = literal.value.clone();
            let key = match (name.symbol(), b.operator) {
                (Some(Symbol::Id), CompareOperator::Equal) => FastQuery::Id(value),
                (Some(Symbol::Vid), CompareOperator::Equal) => FastQuery::Vid(value),
                (
                    Some(Symbol::Text),
                    CompareOperator::Equal
                    | CompareOperator::StartWith
                    | CompareOperator::Include
                    | CompareOperator::EndWith,
                ) => FastQuery::Text(value),
                _ => return Vec::new(),
            };
            vec![key]
        }
        Expression::And(l, r) => {
            let left = fast_query_keys(l);
            if left.is_empty() {
                fast_query_keys(r)
            } else {
                left
            }
        }
        Expression::Or(l, r) => {
            let (left, right) = (fast_query_keys(l), fast_query_keys(r));
            if left.is_empty() || right.is_empty() {
                return Vec::new();
            }
            left.into_iter().chain(right).unique().collect()
        }
    }
}

fn is_parent_null(left: &ValueExpression, operator: CompareOperator, right: &ValueExpression) -> bool {
    let parent = |v: &ValueExpression| {
        matches!(v, ValueExpression::Identifier { name, .. } if name.symbol() == Some(Symbol::Parent))
    };
    let null = |v: &ValueExpression| matches!(v, ValueExpression::Null { .. });
    operator == CompareOperator::Equal && ((parent(left) && null(right)) || (null(left) && parent(right)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(source: &str) -> Vec<FastQuery> {
        Selector::parse(source).unwrap().fast_queries().to_vec()
    }

    #[test]
    fn test_target_index() {
        assert_eq!(Selector::parse("[id=\"a\"]").unwrap().target_index(), 0);
        assert_eq!(Selector::parse("[id=\"a\"] < [id=\"b\"]").unwrap().target_index(), 1);
        assert_eq!(Selector::parse("@[id=\"a\"] < [id=\"b\"]").unwrap().target_index(), 0);
        assert_eq!(
            Selector::parse("[id=\"a\"] < @[id=\"b\"] < [id=\"c\"]").unwrap().target_index(),
            1
        );
    }

    #[test]
    fn test_fast_query_keys() {
        assert_eq!(keys("[id=\"a\"]"), vec![FastQuery::Id("a".into())]);
        assert_eq!(keys("[clickable=true && vid=\"v\"]"), vec![FastQuery::Vid("v".into())]);
        assert_eq!(keys("[text^=\"ok\"]"), vec![FastQuery::Text("ok".into())]);
        assert_eq!(
            keys("[id=\"a\" || text=\"b\"]"),
            vec![FastQuery::Id("a".into()), FastQuery::Text("b".into())]
        );
        assert!(keys("[id=\"a\" || clickable=true]").is_empty());
        assert!(keys("[id=\"\"]").is_empty());
        assert!(keys("[id!=\"a\"]").is_empty());
        // only the first tested segment seeds
        assert!(keys("[id=\"a\"] < [clickable=true]").is_empty());
    }

    #[test]
    fn test_derived_flags() {
        let s = Selector::parse("[parent=null && childCount>0]").unwrap();
        assert!(s.is_match_root());
        assert!(s.use_cache());

        let s = Selector::parse("[text=\"a\"]").unwrap();
        assert!(!s.is_match_root());
        assert!(!s.use_cache());
        assert!(s.is_slow(MatchOption::default()));
        assert!(!s.is_slow(MatchOption {
            quick_find: true,
            fast_query: true
        }));

        let s = Selector::parse("[clickable=true] << [id=\"x\"]").unwrap();
        assert!(s.use_cache());
        assert!(s.is_slow(MatchOption {
            quick_find: false,
            fast_query: true
        }));
    }
}
