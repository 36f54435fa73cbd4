//! Query executor for running join plans against a fact base
//!
//! A plan compiles into a chain of lazy iterators, one per join step. Each
//! stage pulls tuples from the stage before it, so nothing is computed until
//! results are consumed, except where a step has to sort.

use super::ast::{Binding, Comparison, Operand};
use super::normalize::{Atom, Clause, ClauseBlock};
use super::path::Root;
use super::planner::{JoinStep, OrderKey, QueryPlan};
use crate::error::{FactDbError, Result};
use crate::fact::Fact;
use crate::index::FactIndex;
use crate::storage::{FactBase, RecordStore};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

/// Lazy stream of fact tuples in join order
pub type TupleStream<'a> = Box<dyn Iterator<Item = Vec<Fact>> + 'a>;

/// Query executor over one fact base
#[derive(Debug, Clone, Copy)]
pub struct QueryExecutor<'a> {
    factbase: &'a FactBase,
}

/// Where a join step finds the facts matching a bound tuple
enum JoinSource<'a> {
    /// Index owned by the fact base
    Store(&'a FactIndex),
    /// Index built over this step's prejoin candidates
    Transient(FactIndex),
    /// Every prejoin candidate (no join key)
    Scan(Vec<Fact>),
}

/// Postjoin checks of one step
struct PostJoin {
    scope: Vec<Root>,
    join_key: Option<Comparison>,
    filters: Vec<Comparison>,
    clauses: ClauseBlock,
}

impl PostJoin {
    fn accepts(&self, tuple: &[Fact]) -> bool {
        let binding = Binding::new(&self.scope, tuple);
        self.filters.iter().all(|c| c.evaluate(&binding)) && self.clauses.evaluate(&binding)
    }
}

impl<'a> QueryExecutor<'a> {
    pub fn new(factbase: &'a FactBase) -> Self {
        Self { factbase }
    }

    /// Compile a grounded plan into a lazy tuple stream
    pub fn execute(&self, plan: QueryPlan) -> Result<TupleStream<'a>> {
        let placeholders = plan.placeholders();
        if let Some(ph) = placeholders.iter().next() {
            return Err(FactDbError::placeholder(format!(
                "placeholder {} has no value; bind arguments before running",
                ph
            )));
        }

        let mut stream: Option<TupleStream<'a>> = None;
        for step in plan.steps {
            trace!(
                root = %step.root,
                index_lookup = step.prejoin_key.is_some(),
                join_key = step.join_key.is_some(),
                "Compiling join step"
            );
            stream = Some(match stream {
                None => self.first_step(step)?,
                Some(upstream) => self.join_step(upstream, step)?,
            });
        }
        Ok(stream.unwrap_or_else(|| Box::new(std::iter::empty())))
    }

    fn store(&self, root: &Root) -> Result<Option<&'a RecordStore>> {
        match self.factbase.store(&root.record_type().name) {
            Some(store) if !store.record_type().same_layout(root.record_type()) => {
                Err(FactDbError::schema(format!(
                    "stored '{}' facts do not match the layout queried through '{}'",
                    root.record_type().name,
                    root
                )))
            }
            found => Ok(found),
        }
    }

    /// Facts of the step's root passing its prejoin key and clauses
    fn candidates(&self, step: &JoinStep) -> Result<Box<dyn Iterator<Item = Fact> + 'a>> {
        let store = match self.store(&step.root)? {
            Some(store) => store,
            None => return Ok(Box::new(std::iter::empty())),
        };

        let mut residual = step.prejoin_clauses.clone();
        let lookup = step.prejoin_key.as_ref().and_then(|key| {
            let index = store.index(key.left.as_path()?)?;
            match &key.right {
                Operand::Literal(value) => Some(index.find(key.op, value)),
                _ => None,
            }
        });
        let base: Box<dyn Iterator<Item = Fact> + 'a> = match lookup {
            Some(found) => Box::new(found.into_iter()),
            None => {
                // no usable index in this fact base: check the key per fact
                if let Some(key) = &step.prejoin_key {
                    residual.push(Clause::new(vec![Atom::Compare(key.clone())]));
                }
                Box::new(store.iter().cloned())
            }
        };

        if residual.is_empty() {
            return Ok(base);
        }
        let root = step.root.clone();
        Ok(Box::new(base.filter(move |fact| {
            residual.evaluate(&Binding::new(
                std::slice::from_ref(&root),
                std::slice::from_ref(fact),
            ))
        })))
    }

    fn first_step(&self, step: JoinStep) -> Result<TupleStream<'a>> {
        let mut stream: TupleStream<'a> = Box::new(self.candidates(&step)?.map(|fact| vec![fact]));
        if !step.prejoin_order.is_empty() {
            stream = Box::new(SortedStream::new(
                stream,
                vec![step.root.clone()],
                step.prejoin_order.clone(),
            ));
        }
        if !step.postjoin_clauses.is_empty() {
            let post = PostJoin {
                scope: vec![step.root.clone()],
                join_key: None,
                filters: Vec::new(),
                clauses: step.postjoin_clauses.clone(),
            };
            stream = Box::new(stream.filter(move |tuple| post.accepts(tuple)));
        }
        Ok(stream)
    }

    fn join_step(&self, upstream: TupleStream<'a>, step: JoinStep) -> Result<TupleStream<'a>> {
        let source = match &step.join_key {
            Some(key) => {
                let path = key.left.as_path().ok_or_else(|| {
                    FactDbError::Plan(format!("join key '{}' has no field of '{}'", key, step.root))
                })?;
                let store_index = match self.store(&step.root)? {
                    Some(store) if !step.has_prejoin_filter() => store.index(path),
                    _ => None,
                };
                match store_index {
                    Some(index) => JoinSource::Store(index),
                    None => {
                        let candidates: Vec<Fact> = self.candidates(&step)?.collect();
                        JoinSource::Transient(FactIndex::build(path.clone(), &candidates)?)
                    }
                }
            }
            None => JoinSource::Scan(self.candidates(&step)?.collect()),
        };

        let mut scope = step.bound.clone();
        scope.push(step.root.clone());
        let post = Arc::new(PostJoin {
            scope,
            join_key: step.join_key.clone(),
            filters: step.postjoin_filter.clone(),
            clauses: step.postjoin_clauses.clone(),
        });
        let source = Arc::new(source);

        let mut stream: TupleStream<'a> = Box::new(upstream.flat_map(move |tuple| {
            let matches: Vec<Fact> = match (source.as_ref(), &post.join_key) {
                (JoinSource::Scan(candidates), _) => candidates.clone(),
                (JoinSource::Store(index), Some(key)) => lookup(index, key, &post.scope, &tuple),
                (JoinSource::Transient(index), Some(key)) => lookup(index, key, &post.scope, &tuple),
                (_, None) => Vec::new(),
            };
            let post = post.clone();
            matches.into_iter().filter_map(move |fact| {
                let mut extended = tuple.clone();
                extended.push(fact);
                post.accepts(&extended).then_some(extended)
            })
        }));

        if !step.postjoin_order.is_empty() {
            let mut scope = step.bound.clone();
            scope.push(step.root.clone());
            stream = Box::new(SortedStream::new(stream, scope, step.postjoin_order.clone()));
        }
        Ok(stream)
    }
}

/// Facts of the new root matching the join key against a bound tuple
fn lookup(index: &FactIndex, key: &Comparison, scope: &[Root], tuple: &[Fact]) -> Vec<Fact> {
    let binding = Binding::new(scope, tuple);
    match key.right.value(&binding) {
        Some(value) => index.find(key.op, &value).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Compare two tuples by a list of order keys
pub fn compare_tuples(scope: &[Root], keys: &[OrderKey], a: &[Fact], b: &[Fact]) -> Ordering {
    let (left, right) = (Binding::new(scope, a), Binding::new(scope, b));
    for key in keys {
        let ord = match (left.resolve(&key.path), right.resolve(&key.path)) {
            (Some(x), Some(y)) => key.path.compare_values(&x, &y),
            (x, y) => x.is_some().cmp(&y.is_some()),
        };
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable sort deferred until the first tuple is requested
struct SortedStream<'a> {
    source: Option<TupleStream<'a>>,
    sorted: std::vec::IntoIter<Vec<Fact>>,
    scope: Vec<Root>,
    keys: Vec<OrderKey>,
}

impl<'a> SortedStream<'a> {
    fn new(source: TupleStream<'a>, scope: Vec<Root>, keys: Vec<OrderKey>) -> Self {
        Self {
            source: Some(source),
            sorted: Vec::new().into_iter(),
            scope,
            keys,
        }
    }
}

impl Iterator for SortedStream<'_> {
    type Item = Vec<Fact>;

    fn next(&mut self) -> Option<Vec<Fact>> {
        if let Some(source) = self.source.take() {
            let mut tuples: Vec<Vec<Fact>> = source.collect();
            tuples.sort_by(|a, b| compare_tuples(&self.scope, &self.keys, a, b));
            self.sorted = tuples.into_iter();
        }
        self.sorted.next()
    }
}

/// Distinct facts of one root across a set of tuples
pub(crate) fn facts_of_root(
    tuples: &[Vec<Fact>],
    roots: &[Root],
    root: &Root,
) -> BTreeSet<Fact> {
    tuples
        .iter()
        .filter_map(|tuple| Binding::new(roots, tuple).fact(root).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::index_selector::IndexSelector;
    use crate::query::join::{validate_joins, JoinSpec};
    use crate::query::normalize::normalize;
    use crate::query::placeholder::{ph1, Args};
    use crate::query::planner::{asc, desc, DeclarationOrder, QueryPlanner};
    use crate::schema::{FieldType, RecordType};
    use crate::value::Value;

    struct Fixture {
        fb: FactBase,
        person: Root,
        likes: Root,
    }

    fn fixture(indexed: bool) -> Fixture {
        let person_type = RecordType::builder("person")
            .field("id", FieldType::Integer)
            .field("name", FieldType::String)
            .build()
            .unwrap();
        let likes_type = RecordType::builder("likes")
            .field("id", FieldType::Integer)
            .field("liked", FieldType::Integer)
            .build()
            .unwrap();
        let person = Root::new(&person_type);
        let likes = Root::new(&likes_type);
        let paths = if indexed {
            vec![person.field("id").unwrap(), likes.field("id").unwrap()]
        } else {
            Vec::new()
        };
        let mut fb = FactBase::with_indexes(paths).unwrap();
        for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
            fb.add(Fact::new(&person_type, vec![Value::Int(id), Value::from(name)]).unwrap())
                .unwrap();
        }
        for (id, liked) in [(1, 2), (2, 1), (2, 3), (3, 3)] {
            fb.add(Fact::new(&likes_type, vec![Value::Int(id), Value::Int(liked)]).unwrap())
                .unwrap();
        }
        Fixture { fb, person, likes }
    }

    fn run(fx: &Fixture, plan: QueryPlan) -> Vec<(i64, i64)> {
        QueryExecutor::new(&fx.fb)
            .execute(plan)
            .unwrap()
            .map(|t| (t[0].get(0).unwrap().as_int().unwrap(), t[1].get(1).unwrap().as_int().unwrap()))
            .collect()
    }

    fn plan(fx: &Fixture, cond: &crate::query::ast::Condition, order: &[OrderKey]) -> QueryPlan {
        let roots = [fx.person.clone(), fx.likes.clone()];
        let joins = validate_joins(
            &roots,
            &[JoinSpec::from(
                fx.person.field("id").unwrap().eq(fx.likes.field("id").unwrap()),
            )],
        )
        .unwrap();
        let normalized = normalize(cond, &roots).unwrap();
        QueryPlanner::new()
            .with_indexes(IndexSelector::with_indexes(fx.fb.indexed_paths()))
            .with_strategy(Arc::new(DeclarationOrder))
            .create_plan(&roots, &joins, &normalized, order)
            .unwrap()
    }

    #[test]
    fn test_join_with_and_without_indexes() {
        for indexed in [false, true] {
            let fx = fixture(indexed);
            let cond = fx.likes.field("liked").unwrap().ge(2);
            let order = [asc(&fx.person.field("id").unwrap()), desc(&fx.likes.field("liked").unwrap())];
            let rows = run(&fx, plan(&fx, &cond, &order));
            assert_eq!(rows, vec![(1, 2), (2, 3), (3, 3)]);
        }
    }

    #[test]
    fn test_unbound_placeholder_rejected() {
        let fx = fixture(true);
        let cond = fx.likes.field("liked").unwrap().eq(ph1());
        let p = plan(&fx, &cond, &[]);
        assert!(matches!(
            QueryExecutor::new(&fx.fb).execute(p.clone()),
            Err(FactDbError::Placeholder(_))
        ));
        let rows = run(&fx, p.ground(&Args::positional([1])).unwrap());
        assert_eq!(rows, vec![(2, 1)]);
    }

    #[test]
    fn test_postjoin_order_sorts_across_steps() {
        let fx = fixture(false);
        let cond = fx.likes.field("liked").unwrap().ge(1);
        let order = [desc(&fx.likes.field("liked").unwrap()), asc(&fx.person.field("id").unwrap())];
        let rows = run(&fx, plan(&fx, &cond, &order));
        assert_eq!(rows, vec![(2, 3), (3, 3), (1, 2), (2, 1)]);
    }
}
