//! Query declaration and execution entry points

use super::ast::Condition;
use super::executor::{facts_of_root, QueryExecutor};
use super::index_selector::IndexSelector;
use super::join::{validate_joins, JoinSpec};
use super::normalize::{partition, to_cnf, validate, NormalizedCondition};
use super::output::{Output, Projection, Selection};
use super::path::{Path, Root};
use super::placeholder::{Args, Placeholder};
use super::planner::{JoinOrderStrategy, OrderKey, QueryPlan, QueryPlanner, SelectivityOrder};
use crate::config::EngineConfig;
use crate::error::{FactDbError, Result};
use crate::fact::Fact;
use crate::monitoring::SlowQueryLog;
use crate::storage::FactBase;
use crate::value::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Builder for a query definition.
///
/// Declaration errors from `where_`, `order_by` and `select` are recorded
/// and the first one is returned by `build`.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    roots: Vec<Root>,
    joins: Vec<JoinSpec>,
    conditions: Vec<Condition>,
    order_by: Vec<OrderKey>,
    selection: Selection,
    unique: bool,
    tuple: bool,
    strategy: Arc<dyn JoinOrderStrategy>,
    indexes: Vec<Path>,
    slow_query_log: Option<SlowQueryLog>,
    error: Option<FactDbError>,
}

impl QueryBuilder {
    fn new(roots: Vec<Root>) -> Self {
        Self {
            roots,
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            selection: Selection::Roots,
            unique: false,
            tuple: false,
            strategy: Arc::new(SelectivityOrder),
            indexes: Vec::new(),
            slow_query_log: None,
            error: None,
        }
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }

    fn check_paths<'p>(&self, paths: impl IntoIterator<Item = &'p Path>, what: &str) -> Result<()> {
        for path in paths {
            if !self.roots.contains(path.root()) {
                return Err(FactDbError::schema(format!(
                    "{} '{}' does not belong to a declared root",
                    what, path
                )));
            }
        }
        Ok(())
    }

    /// Declare a join between two roots
    pub fn join(mut self, join: impl Into<JoinSpec>) -> Self {
        self.joins.push(join.into());
        self
    }

    /// Add a filter; several calls are combined with AND
    pub fn where_(mut self, condition: impl Into<Condition>) -> Self {
        match validate(&condition.into(), &self.roots) {
            Ok(validated) => self.conditions.push(validated),
            Err(e) => self.record(Err(e)),
        }
        self
    }

    /// Append sort keys
    pub fn order_by<K>(mut self, keys: impl IntoIterator<Item = K>) -> Self
    where
        K: Into<OrderKey>,
    {
        let keys: Vec<OrderKey> = keys.into_iter().map(Into::into).collect();
        let checked = self.check_paths(keys.iter().map(|k| &k.path), "order key");
        self.record(checked);
        self.order_by.extend(keys);
        self
    }

    /// Output the listed paths; a root path outputs the whole fact
    pub fn select(mut self, paths: impl IntoIterator<Item = Path>) -> Self {
        let paths: Vec<Path> = paths.into_iter().collect();
        let checked = self.check_paths(&paths, "selected path");
        self.record(checked);
        self.selection = Selection::Paths(paths);
        self
    }

    /// Output `f` applied to the values of the listed paths
    pub fn select_with<F>(mut self, paths: impl IntoIterator<Item = Path>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        let paths: Vec<Path> = paths.into_iter().collect();
        let checked = self.check_paths(&paths, "selected path");
        self.record(checked);
        self.selection = Selection::Transform {
            paths,
            func: Arc::new(f),
        };
        self
    }

    /// Drop repeated output values
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Wrap single-column output in a tuple
    pub fn tuple(mut self) -> Self {
        self.tuple = true;
        self
    }

    pub fn join_order(mut self, strategy: Arc<dyn JoinOrderStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Paths the planner may answer with index lookups
    pub fn with_indexes(mut self, paths: impl IntoIterator<Item = Path>) -> Self {
        self.indexes.extend(paths);
        self
    }

    /// Apply the configured join order and slow-query threshold
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.strategy = config.strategy();
        self.slow_query_log = Some(SlowQueryLog::from_settings(&config.logging));
        self
    }

    /// Report result streams open longer than the log's threshold
    pub fn slow_query_log(mut self, log: SlowQueryLog) -> Self {
        self.slow_query_log = Some(log);
        self
    }

    /// Validate the declaration and build the query plan
    pub fn build(self) -> Result<Query> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.roots.is_empty() {
            return Err(FactDbError::condition("a query needs at least one root"));
        }
        let distinct: BTreeSet<&Root> = self.roots.iter().collect();
        if distinct.len() != self.roots.len() {
            return Err(FactDbError::join(
                "a root is declared twice; alias one of them for a self-join",
            ));
        }

        let joins = validate_joins(&self.roots, &self.joins)?;
        let condition = self
            .conditions
            .into_iter()
            .reduce(Condition::and);
        let normalized = match &condition {
            Some(condition) => partition(to_cnf(condition)),
            None => NormalizedCondition::default(),
        };

        let plan = QueryPlanner::new()
            .with_indexes(IndexSelector::with_indexes(self.indexes))
            .with_strategy(self.strategy)
            .create_plan(&self.roots, &joins, &normalized, &self.order_by)?;

        let description = describe(&self.roots, condition.as_ref(), &self.order_by);
        Ok(Query {
            plan,
            projection: Arc::new(Projection {
                roots: self.roots,
                selection: self.selection,
                tuple: self.tuple,
                order_keys: self.order_by,
            }),
            unique: self.unique,
            slow_query_log: self.slow_query_log,
            description,
        })
    }
}

/// Longest condition text kept in a query description, in characters
const DESCRIBED_CONDITION_LIMIT: usize = 200;

fn describe(roots: &[Root], condition: Option<&Condition>, order_by: &[OrderKey]) -> String {
    let mut text = roots
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if let Some(condition) = condition {
        let full = condition.to_string();
        let mut chars = full.chars();
        let shown: String = chars.by_ref().take(DESCRIBED_CONDITION_LIMIT).collect();
        text.push_str(" where ");
        text.push_str(&shown);
        if chars.next().is_some() {
            text.push_str("...");
        }
    }
    if !order_by.is_empty() {
        let keys: Vec<String> = order_by.iter().map(ToString::to_string).collect();
        text.push_str(&format!(" order by {}", keys.join(", ")));
    }
    text
}

/// Immutable query definition; run it any number of times
#[derive(Debug, Clone)]
pub struct Query {
    plan: QueryPlan,
    projection: Arc<Projection>,
    unique: bool,
    slow_query_log: Option<SlowQueryLog>,
    description: String,
}

impl Query {
    /// Start declaring a query over `roots`
    pub fn builder<I, R>(roots: I) -> QueryBuilder
    where
        I: IntoIterator<Item = R>,
        R: Into<Root>,
    {
        QueryBuilder::new(roots.into_iter().map(Into::into).collect())
    }

    /// Roots in declaration order
    pub fn roots(&self) -> &[Root] {
        &self.projection.roots
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Placeholders awaiting arguments
    pub fn placeholders(&self) -> BTreeSet<Placeholder> {
        self.plan.placeholders()
    }

    pub fn explain(&self) -> String {
        self.plan.explain()
    }

    /// New query with the placeholders replaced by `args`
    pub fn bind(&self, args: &Args) -> Result<Query> {
        Ok(Query {
            plan: self.plan.ground(args)?,
            ..self.clone()
        })
    }

    /// Execute against a fact base; results are produced lazily
    pub fn run<'a>(&self, factbase: &'a FactBase, args: &Args) -> Result<Output<'a>> {
        let plan = self.plan.ground(args)?;
        let join_roots = plan.roots();
        let tuples = QueryExecutor::new(factbase).execute(plan)?;
        let tracker = self
            .slow_query_log
            .as_ref()
            .map(|log| log.start_query(self.description.clone()));
        Ok(Output::new(
            tuples,
            join_roots,
            self.projection.clone(),
            self.unique,
            tracker,
        ))
    }

    /// Remove every matched fact of the selected roots.
    ///
    /// All matches are collected before the first removal. Returns the
    /// number of facts removed.
    pub fn delete(&self, factbase: &mut FactBase, args: &Args) -> Result<usize> {
        let targets = self.projection.selection.delete_targets(&self.projection.roots);
        let matched: BTreeSet<Fact> = {
            let plan = self.plan.ground(args)?;
            let join_roots = plan.roots();
            let tuples: Vec<Vec<Fact>> = QueryExecutor::new(factbase).execute(plan)?.collect();
            targets
                .iter()
                .flat_map(|root| facts_of_root(&tuples, &join_roots, root))
                .collect()
        };

        let removed = matched.iter().filter(|fact| factbase.discard(fact)).count();
        debug!(
            query = %self.description,
            targets = targets.len(),
            removed,
            "Deleted matching facts"
        );
        Ok(removed)
    }
}
