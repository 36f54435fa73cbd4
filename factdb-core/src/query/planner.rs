//! Query planner for building join plans
//!
//! A plan is an ordered list of join steps, one per root. Each step records
//! how candidate facts of its root are found (prejoin key and remainder), how
//! they are matched against the roots bound by earlier steps (join key and
//! postjoin filter) and where sorting happens.

use super::ast::{CompareOp, Comparison};
use super::index_selector::IndexSelector;
use super::normalize::{ClauseBlock, NormalizedCondition};
use super::path::{Path, Root};
use super::placeholder::{Args, Placeholder};
use crate::error::{FactDbError, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One `order_by` key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub path: Path,
    pub descending: bool,
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "desc({})", self.path)
        } else {
            write!(f, "asc({})", self.path)
        }
    }
}

/// Ascending order on `path`
pub fn asc(path: &Path) -> OrderKey {
    OrderKey {
        path: path.clone(),
        descending: false,
    }
}

/// Descending order on `path`
pub fn desc(path: &Path) -> OrderKey {
    OrderKey {
        path: path.clone(),
        descending: true,
    }
}

impl From<Path> for OrderKey {
    fn from(path: Path) -> Self {
        OrderKey {
            path,
            descending: false,
        }
    }
}

impl From<&Path> for OrderKey {
    fn from(path: &Path) -> Self {
        asc(path)
    }
}

/// Inputs available to a join-order strategy
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    /// Roots in declaration order
    pub roots: &'a [Root],
    /// Validated join comparisons
    pub joins: &'a [Comparison],
    /// Normalized query condition
    pub condition: &'a NormalizedCondition,
    /// Indexed fields
    pub indexes: &'a IndexSelector,
}

impl PlanContext<'_> {
    /// Whether some join links `root` to one of `bound`
    pub fn is_joined(&self, root: &Root, bound: &[Root]) -> bool {
        self.joins.iter().any(|j| {
            let roots = j.roots();
            roots.contains(root) && bound.iter().any(|b| roots.contains(b))
        })
    }
}

/// Pluggable join-order heuristic.
///
/// Must return a permutation of `context.roots`.
pub trait JoinOrderStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn order(&self, context: &PlanContext<'_>) -> Vec<Root>;
}

/// Join roots in the order they were declared
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarationOrder;

impl JoinOrderStrategy for DeclarationOrder {
    fn name(&self) -> &str {
        "declaration"
    }

    fn order(&self, context: &PlanContext<'_>) -> Vec<Root> {
        context.roots.to_vec()
    }
}

/// Most restricted roots first, avoiding cross-products where possible.
///
/// A root scores by its best prejoin key (indexed equality, membership,
/// range) or by whether it has any filter at all. The most selective root
/// goes first; each following pick prefers roots joined to the ones already
/// placed, then the best score, then declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectivityOrder;

impl SelectivityOrder {
    fn score(context: &PlanContext<'_>, root: &Root) -> u8 {
        let block = context.condition.block(root);
        match context.indexes.select_prejoin_key(&block) {
            Some(i) => block.clauses()[i]
                .as_comparison()
                .map_or(5, |cmp| IndexSelector::score(cmp.op)),
            None if !block.is_empty() => 5,
            None => 6,
        }
    }
}

impl JoinOrderStrategy for SelectivityOrder {
    fn name(&self) -> &str {
        "selectivity"
    }

    fn order(&self, context: &PlanContext<'_>) -> Vec<Root> {
        let scores: Vec<u8> = context
            .roots
            .iter()
            .map(|r| Self::score(context, r))
            .collect();
        let mut placed: Vec<Root> = Vec::with_capacity(context.roots.len());
        let mut remaining: Vec<usize> = (0..context.roots.len()).collect();
        while !remaining.is_empty() {
            let pick = remaining
                .iter()
                .enumerate()
                .min_by_key(|&(_, &i)| {
                    let joined = placed.is_empty() || context.is_joined(&context.roots[i], &placed);
                    (!joined, scores[i], i)
                })
                .map(|(pos, _)| pos)
                .unwrap_or(0);
            let i = remaining.remove(pick);
            placed.push(context.roots[i].clone());
        }
        placed
    }
}

/// Plan for one root
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    /// Root joined at this step
    pub root: Root,
    /// Roots bound by earlier steps
    pub bound: Vec<Root>,
    /// Single comparison answered by an index lookup
    pub prejoin_key: Option<Comparison>,
    /// Remaining clauses on this root, checked per candidate
    pub prejoin_clauses: ClauseBlock,
    /// Comparison matched against the bound tuple, this root on the left
    pub join_key: Option<Comparison>,
    /// Other join comparisons fully bound at this step
    pub postjoin_filter: Vec<Comparison>,
    /// Cross-root clauses fully bound at this step
    pub postjoin_clauses: ClauseBlock,
    /// Sort applied to candidates (first step only)
    pub prejoin_order: Vec<OrderKey>,
    /// Sort applied to extended tuples
    pub postjoin_order: Vec<OrderKey>,
}

impl JoinStep {
    /// Whether candidates need filtering beyond the store's full set
    pub fn has_prejoin_filter(&self) -> bool {
        self.prejoin_key.is_some() || !self.prejoin_clauses.is_empty()
    }

    fn ground(&self, args: &Args) -> Result<JoinStep> {
        Ok(JoinStep {
            root: self.root.clone(),
            bound: self.bound.clone(),
            prejoin_key: self
                .prejoin_key
                .as_ref()
                .map(|k| k.ground(args))
                .transpose()?,
            prejoin_clauses: self.prejoin_clauses.ground(args)?,
            join_key: self.join_key.clone(),
            postjoin_filter: self.postjoin_filter.clone(),
            postjoin_clauses: self.postjoin_clauses.ground(args)?,
            prejoin_order: self.prejoin_order.clone(),
            postjoin_order: self.postjoin_order.clone(),
        })
    }

    fn placeholders(&self) -> BTreeSet<Placeholder> {
        let mut found: BTreeSet<Placeholder> = self
            .prejoin_key
            .iter()
            .flat_map(|k| k.placeholders())
            .cloned()
            .collect();
        found.extend(self.prejoin_clauses.to_condition().placeholders());
        found.extend(self.postjoin_clauses.to_condition().placeholders());
        found
    }
}

fn write_keys(f: &mut fmt::Formatter<'_>, label: &str, keys: &[OrderKey]) -> fmt::Result {
    if keys.is_empty() {
        return Ok(());
    }
    let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
    writeln!(f, "    {}: {}", label, keys.join(", "))
}

impl fmt::Display for JoinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  {}:", self.root)?;
        match &self.prejoin_key {
            Some(key) => writeln!(f, "    index lookup: {}", key)?,
            None => writeln!(f, "    full scan")?,
        }
        if !self.prejoin_clauses.is_empty() {
            writeln!(f, "    prejoin filter: {}", self.prejoin_clauses)?;
        }
        write_keys(f, "prejoin order", &self.prejoin_order)?;
        match &self.join_key {
            Some(key) => writeln!(f, "    join key: {}", key)?,
            None if !self.bound.is_empty() => writeln!(f, "    join key: cross-product")?,
            None => {}
        }
        for cmp in &self.postjoin_filter {
            writeln!(f, "    postjoin filter: {}", cmp)?;
        }
        if !self.postjoin_clauses.is_empty() {
            writeln!(f, "    postjoin clauses: {}", self.postjoin_clauses)?;
        }
        write_keys(f, "postjoin order", &self.postjoin_order)
    }
}

/// Ordered join steps, one per root
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub steps: Vec<JoinStep>,
}

impl QueryPlan {
    /// Roots in join order
    pub fn roots(&self) -> Vec<Root> {
        self.steps.iter().map(|s| s.root.clone()).collect()
    }

    /// New plan with every placeholder replaced by its argument
    pub fn ground(&self, args: &Args) -> Result<QueryPlan> {
        args.validate()?;
        Ok(QueryPlan {
            steps: self
                .steps
                .iter()
                .map(|s| s.ground(args))
                .collect::<Result<_>>()?,
        })
    }

    /// Placeholders still awaiting arguments
    pub fn placeholders(&self) -> BTreeSet<Placeholder> {
        self.steps.iter().flat_map(JoinStep::placeholders).collect()
    }

    /// Human-readable plan description
    pub fn explain(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "QueryPlan:")?;
        for step in &self.steps {
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

/// Query planner for creating join plans
#[derive(Debug, Clone)]
pub struct QueryPlanner {
    index_selector: IndexSelector,
    strategy: Arc<dyn JoinOrderStrategy>,
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlanner {
    /// Create a planner with no indexes and the selectivity heuristic
    pub fn new() -> Self {
        Self {
            index_selector: IndexSelector::new(),
            strategy: Arc::new(SelectivityOrder),
        }
    }

    pub fn with_indexes(mut self, index_selector: IndexSelector) -> Self {
        self.index_selector = index_selector;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn JoinOrderStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn index_selector(&self) -> &IndexSelector {
        &self.index_selector
    }

    /// Create a plan for validated joins and a normalized condition
    pub fn create_plan(
        &self,
        roots: &[Root],
        joins: &[Comparison],
        condition: &NormalizedCondition,
        order_by: &[OrderKey],
    ) -> Result<QueryPlan> {
        let context = PlanContext {
            roots,
            joins,
            condition,
            indexes: &self.index_selector,
        };
        let order = self.strategy.order(&context);
        self.check_permutation(roots, &order)?;

        let mut joins_left: Vec<&Comparison> = joins.iter().collect();
        let mut catch_all_left: Vec<_> = condition.catch_all.clauses().iter().collect();
        let mut keys_placed = vec![false; order_by.len()];
        let mut steps = Vec::with_capacity(order.len());

        for (k, root) in order.iter().enumerate() {
            let bound = order[..k].to_vec();
            let in_scope = |roots: &BTreeSet<Root>| roots.iter().all(|r| r == root || bound.contains(r));

            let block = condition.block(root);
            let key_pos = self.index_selector.select_prejoin_key(&block);
            let prejoin_key = key_pos.and_then(|i| block.clauses()[i].as_comparison().cloned());
            let prejoin_clauses = ClauseBlock::new(
                block
                    .clauses()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| Some(*i) != key_pos)
                    .map(|(_, c)| c.clone())
                    .collect(),
            );

            let (ready, pending): (Vec<&Comparison>, Vec<&Comparison>) =
                joins_left.into_iter().partition(|j| in_scope(&j.roots()));
            joins_left = pending;
            let join_pos = ready
                .iter()
                .enumerate()
                .filter(|(_, j)| j.has_native_order())
                .filter_map(|(i, j)| join_score(j.op).map(|s| (s, i)))
                .min()
                .map(|(_, i)| i);
            let join_key = join_pos.and_then(|i| ready[i].oriented_to(root));
            let postjoin_filter: Vec<Comparison> = ready
                .iter()
                .enumerate()
                .filter(|(i, _)| join_key.is_none() || Some(*i) != join_pos)
                .map(|(_, j)| (*j).clone())
                .collect();

            let (ready, pending): (Vec<_>, Vec<_>) = catch_all_left
                .into_iter()
                .partition(|c| in_scope(&c.roots()));
            catch_all_left = pending;
            let postjoin_clauses = ClauseBlock::new(ready.into_iter().cloned().collect());

            let mut newly_placed = false;
            for (placed, key) in keys_placed.iter_mut().zip(order_by) {
                if !*placed && in_scope(&BTreeSet::from([key.path.root().clone()])) {
                    *placed = true;
                    newly_placed = true;
                }
            }
            let placed_keys: Vec<OrderKey> = order_by
                .iter()
                .zip(&keys_placed)
                .filter(|(_, placed)| **placed)
                .map(|(key, _)| key.clone())
                .collect();
            let (prejoin_order, postjoin_order) = match (k, newly_placed) {
                (0, true) => (placed_keys, Vec::new()),
                (_, true) => (Vec::new(), placed_keys),
                _ => (Vec::new(), Vec::new()),
            };

            steps.push(JoinStep {
                root: root.clone(),
                bound,
                prejoin_key,
                prejoin_clauses,
                join_key,
                postjoin_filter,
                postjoin_clauses,
                prejoin_order,
                postjoin_order,
            });
        }

        let plan = QueryPlan { steps };
        debug!(
            strategy = self.strategy.name(),
            join_order = %plan.roots().iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            index_lookups = plan.steps.iter().filter(|s| s.prejoin_key.is_some()).count(),
            "Built query plan"
        );
        Ok(plan)
    }

    fn check_permutation(&self, roots: &[Root], order: &[Root]) -> Result<()> {
        let expected: BTreeSet<&Root> = roots.iter().collect();
        let got: BTreeSet<&Root> = order.iter().collect();
        if order.len() != roots.len() || expected != got {
            return Err(FactDbError::Plan(format!(
                "join order strategy '{}' returned [{}], not a permutation of the query roots",
                self.strategy.name(),
                order
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(())
    }
}

/// Join key preference, lower is better; membership never keys a join.
///
/// Comparisons on custom-ordered fields are left to the postjoin filter.
fn join_score(op: CompareOp) -> Option<u8> {
    match op {
        CompareOp::Eq => Some(0),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => Some(1),
        CompareOp::Ne => Some(2),
        CompareOp::In | CompareOp::NotIn => None,
    }
}
