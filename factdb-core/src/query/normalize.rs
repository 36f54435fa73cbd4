//! Condition validation and conjunctive normal form
//!
//! Normalization runs in three passes, each driven by an explicit work stack
//! so deeply nested conditions cannot exhaust the call stack:
//! 1. negation push-down combined with static simplification
//! 2. distribution of OR over AND into clauses
//! 3. partitioning of clauses by the roots they reference

use super::ast::{Binding, Comparison, Condition, FunctorPredicate, Operand};
use super::path::Root;
use super::placeholder::Args;
use crate::error::{FactDbError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Atomic member of a clause
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Compare(Comparison),
    Func(FunctorPredicate),
}

impl Atom {
    pub fn roots(&self) -> BTreeSet<Root> {
        match self {
            Atom::Compare(cmp) => cmp.roots(),
            Atom::Func(fp) => fp.roots(),
        }
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        match self {
            Atom::Compare(cmp) => cmp.evaluate(binding),
            Atom::Func(fp) => fp.evaluate(binding),
        }
    }

    pub fn ground(&self, args: &Args) -> Result<Atom> {
        match self {
            Atom::Compare(cmp) => Ok(Atom::Compare(cmp.ground(args)?)),
            Atom::Func(fp) => Ok(Atom::Func(fp.ground(args)?)),
        }
    }

    fn key(&self) -> AtomKey {
        match self {
            Atom::Compare(cmp) => AtomKey::Compare(cmp.clone()),
            Atom::Func(fp) => AtomKey::Func(fp.identity()),
        }
    }

    fn into_condition(self) -> Condition {
        match self {
            Atom::Compare(cmp) => Condition::Compare(cmp),
            Atom::Func(fp) => Condition::Func(fp),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Compare(cmp) => write!(f, "{}", cmp),
            Atom::Func(fp) => write!(f, "{}", fp),
        }
    }
}

/// Ordered identity of an atom, for deduplication
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum AtomKey {
    Compare(Comparison),
    Func((usize, Option<Vec<Operand>>, bool)),
}

impl AtomKey {
    fn of(condition: &Condition) -> Option<AtomKey> {
        match condition {
            Condition::Compare(cmp) => Some(AtomKey::Compare(cmp.clone())),
            Condition::Func(fp) => Some(AtomKey::Func(fp.identity())),
            _ => None,
        }
    }
}

/// Disjunction of atoms; an empty clause is false
#[derive(Debug, Clone, Default)]
pub struct Clause {
    atoms: Vec<Atom>,
    keys: BTreeSet<AtomKey>,
}

impl PartialEq for Clause {
    fn eq(&self, other: &Self) -> bool {
        self.atoms == other.atoms
    }
}

impl Clause {
    pub fn new(atoms: Vec<Atom>) -> Self {
        let mut clause = Self::default();
        for atom in atoms {
            clause.push(atom);
        }
        clause
    }

    fn push(&mut self, atom: Atom) {
        if self.keys.insert(atom.key()) {
            self.atoms.push(atom);
        }
    }

    fn union(&self, other: &Clause) -> Clause {
        let mut merged = self.clone();
        for atom in &other.atoms {
            merged.push(atom.clone());
        }
        merged
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn roots(&self) -> BTreeSet<Root> {
        self.atoms.iter().flat_map(Atom::roots).collect()
    }

    /// The comparison, if this clause is a single comparison
    pub fn as_comparison(&self) -> Option<&Comparison> {
        match self.atoms.as_slice() {
            [Atom::Compare(cmp)] => Some(cmp),
            _ => None,
        }
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        self.atoms.iter().any(|a| a.evaluate(binding))
    }

    pub fn ground(&self, args: &Args) -> Result<Clause> {
        Ok(Clause::new(
            self.atoms
                .iter()
                .map(|a| a.ground(args))
                .collect::<Result<_>>()?,
        ))
    }

    pub fn to_condition(&self) -> Condition {
        match self.atoms.len() {
            0 => Condition::Static(false),
            1 => self.atoms[0].clone().into_condition(),
            _ => Condition::Or(self.atoms.iter().cloned().map(Atom::into_condition).collect()),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.atoms.is_empty() {
            return write!(f, "false");
        }
        for (i, atom) in self.atoms.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", atom)?;
        }
        Ok(())
    }
}

/// Conjunction of clauses; an empty block is true
#[derive(Debug, Clone, Default)]
pub struct ClauseBlock {
    clauses: Vec<Clause>,
    /// Atom sets of the held clauses; clauses are equal regardless of order
    seen: BTreeSet<BTreeSet<AtomKey>>,
}

impl PartialEq for ClauseBlock {
    fn eq(&self, other: &Self) -> bool {
        self.clauses == other.clauses
    }
}

impl ClauseBlock {
    pub fn new(clauses: Vec<Clause>) -> Self {
        let mut block = Self::default();
        for clause in clauses {
            block.push(clause);
        }
        block
    }

    pub fn push(&mut self, clause: Clause) {
        if self.seen.insert(clause.keys.clone()) {
            self.clauses.push(clause);
        }
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn roots(&self) -> BTreeSet<Root> {
        self.clauses.iter().flat_map(Clause::roots).collect()
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        self.clauses.iter().all(|c| c.evaluate(binding))
    }

    pub fn ground(&self, args: &Args) -> Result<ClauseBlock> {
        Ok(ClauseBlock::new(
            self.clauses
                .iter()
                .map(|c| c.ground(args))
                .collect::<Result<_>>()?,
        ))
    }

    pub fn to_condition(&self) -> Condition {
        match self.clauses.len() {
            0 => Condition::Static(true),
            1 => self.clauses[0].to_condition(),
            _ => Condition::And(self.clauses.iter().map(Clause::to_condition).collect()),
        }
    }
}

impl fmt::Display for ClauseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "true");
        }
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " & ")?;
            }
            if clause.atoms.len() > 1 {
                write!(f, "({})", clause)?;
            } else {
                write!(f, "{}", clause)?;
            }
        }
        Ok(())
    }
}

/// Normalized condition partitioned by root
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedCondition {
    /// Clauses referencing exactly one root
    pub per_root: BTreeMap<Root, ClauseBlock>,
    /// Clauses referencing zero or several roots
    pub catch_all: ClauseBlock,
}

impl NormalizedCondition {
    /// Clause block of one root (empty when it has none)
    pub fn block(&self, root: &Root) -> ClauseBlock {
        self.per_root.get(root).cloned().unwrap_or_default()
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        self.per_root.values().all(|b| b.evaluate(binding)) && self.catch_all.evaluate(binding)
    }
}

/// Check a condition against the declared roots.
///
/// Every path must belong to a declared root, literal-only conditions are
/// rejected and raw predicates are bound to the root when there is exactly
/// one. Literals are fitted to the type of the field they are compared with.
pub fn validate(condition: &Condition, roots: &[Root]) -> Result<Condition> {
    for path in condition.paths() {
        if !roots.contains(path.root()) {
            return Err(FactDbError::schema(format!(
                "path '{}' does not belong to a declared root",
                path
            )));
        }
    }
    let has_raw = condition.has_raw_predicate();
    if condition.paths().is_empty() && !has_raw {
        return Err(FactDbError::condition(format!(
            "condition '{}' references no record field",
            condition
        )));
    }
    let raw_root = match (has_raw, roots) {
        (false, _) => None,
        (true, [root]) => Some(root),
        (true, _) => {
            return Err(FactDbError::condition(
                "a predicate without a path signature needs a single-root query",
            ))
        }
    };
    condition.try_map_leaves(|leaf| match leaf {
        Condition::Compare(cmp) => Ok(Condition::Compare(cmp.typed()?)),
        Condition::Func(fp) => Ok(Condition::Func(match raw_root {
            Some(root) => fp.bind_raw(root),
            None => fp.clone(),
        })),
        other => Ok(other.clone()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Connective {
    And,
    Or,
}

enum Frame<'a> {
    Enter(&'a Condition, bool),
    Exit(Connective, usize),
}

/// Push negations down to the atoms and fold static sub-results.
///
/// The result contains no `Not` nodes, no nested connective of the same kind
/// and no `Static` below the top level.
pub fn simplify(condition: &Condition) -> Condition {
    let mut frames = vec![Frame::Enter(condition, false)];
    let mut out: Vec<Condition> = Vec::new();
    while let Some(frame) = frames.pop() {
        match frame {
            Frame::Enter(node, negated) => match node {
                Condition::Static(b) => out.push(Condition::Static(*b != negated)),
                Condition::Compare(cmp) => {
                    let cmp = if negated { cmp.negate() } else { cmp.clone() };
                    out.push(simplify_comparison(cmp));
                }
                Condition::Func(fp) => {
                    out.push(Condition::Func(if negated { fp.negate() } else { fp.clone() }))
                }
                Condition::Not(inner) => frames.push(Frame::Enter(inner, !negated)),
                Condition::And(children) | Condition::Or(children) => {
                    let is_and = matches!(node, Condition::And(_));
                    let connective = if is_and != negated {
                        Connective::And
                    } else {
                        Connective::Or
                    };
                    frames.push(Frame::Exit(connective, children.len()));
                    for child in children.iter().rev() {
                        frames.push(Frame::Enter(child, negated));
                    }
                }
            },
            Frame::Exit(connective, count) => {
                let children = out.split_off(out.len() - count);
                out.push(combine(connective, children));
            }
        }
    }
    out.pop().unwrap_or(Condition::Static(true))
}

fn simplify_comparison(cmp: Comparison) -> Condition {
    match (&cmp.left, &cmp.right) {
        (Operand::Literal(l), Operand::Literal(r)) => Condition::Static(cmp.op.apply(l, r)),
        (Operand::Path(a), Operand::Path(b)) if a == b => match cmp.op.reflexive_result() {
            Some(result) => Condition::Static(result),
            None => Condition::Compare(cmp),
        },
        (left, Operand::Path(_)) if left.is_constant() => match cmp.swapped() {
            Some(swapped) => Condition::Compare(swapped),
            None => Condition::Compare(cmp),
        },
        _ => Condition::Compare(cmp),
    }
}

fn combine(connective: Connective, children: Vec<Condition>) -> Condition {
    // the absorbing constant short-circuits; the neutral one is dropped
    let absorbing = connective == Connective::Or;
    let mut items = Vec::with_capacity(children.len());
    let mut seen = BTreeSet::new();
    for child in children {
        let flattened = match child {
            Condition::Static(b) if b == absorbing => return Condition::Static(absorbing),
            Condition::Static(_) => continue,
            Condition::And(nested) if connective == Connective::And => nested,
            Condition::Or(nested) if connective == Connective::Or => nested,
            other => vec![other],
        };
        for item in flattened {
            let fresh = match AtomKey::of(&item) {
                Some(key) => seen.insert(key),
                None => !items.contains(&item),
            };
            if fresh {
                items.push(item);
            }
        }
    }
    match items.len() {
        0 => Condition::Static(!absorbing),
        1 => items.remove(0),
        _ if connective == Connective::And => Condition::And(items),
        _ => Condition::Or(items),
    }
}

/// Normalized negation of a condition
pub fn negate(condition: &Condition) -> Condition {
    simplify(&Condition::Not(Box::new(condition.clone())))
}

/// Conjunctive normal form: a list of clauses that must all hold
pub fn to_cnf(condition: &Condition) -> Vec<Clause> {
    let simplified = simplify(condition);
    let mut frames = vec![Frame::Enter(&simplified, false)];
    let mut out: Vec<Vec<Clause>> = Vec::new();
    while let Some(frame) = frames.pop() {
        match frame {
            Frame::Enter(node, _) => match node {
                Condition::Static(true) => out.push(Vec::new()),
                Condition::Static(false) => out.push(vec![Clause::default()]),
                Condition::Compare(cmp) => out.push(vec![Clause::new(vec![Atom::Compare(cmp.clone())])]),
                Condition::Func(fp) => out.push(vec![Clause::new(vec![Atom::Func(fp.clone())])]),
                Condition::And(children) | Condition::Or(children) => {
                    let connective = if matches!(node, Condition::And(_)) {
                        Connective::And
                    } else {
                        Connective::Or
                    };
                    frames.push(Frame::Exit(connective, children.len()));
                    for child in children.iter().rev() {
                        frames.push(Frame::Enter(child, false));
                    }
                }
                // simplify removed every negation node
                Condition::Not(_) => out.push(Vec::new()),
            },
            Frame::Exit(Connective::And, count) => {
                let parts = out.split_off(out.len() - count);
                out.push(parts.into_iter().flatten().collect());
            }
            Frame::Exit(Connective::Or, count) => {
                let parts = out.split_off(out.len() - count);
                let mut product = vec![Clause::default()];
                for part in parts {
                    product = product
                        .iter()
                        .flat_map(|acc| part.iter().map(move |c| acc.union(c)))
                        .collect();
                }
                out.push(product);
            }
        }
    }
    ClauseBlock::new(out.pop().unwrap_or_default()).clauses
}

/// Validate, convert to CNF and partition by root
pub fn normalize(condition: &Condition, roots: &[Root]) -> Result<NormalizedCondition> {
    let validated = validate(condition, roots)?;
    Ok(partition(to_cnf(&validated)))
}

/// Group single-root clauses by root; the rest form the catch-all block
pub fn partition(clauses: Vec<Clause>) -> NormalizedCondition {
    let mut normalized = NormalizedCondition::default();
    for clause in clauses {
        let roots = clause.roots();
        match roots.iter().next() {
            Some(root) if roots.len() == 1 => normalized
                .per_root
                .entry(root.clone())
                .or_default()
                .push(clause),
            _ => normalized.catch_all.push(clause),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Fact;
    use crate::query::ast::func;
    use crate::query::placeholder::ph1;
    use crate::schema::{FieldType, RecordType};
    use crate::value::Value;
    use std::sync::Arc;

    fn pair_type(name: &str) -> Arc<RecordType> {
        RecordType::builder(name)
            .field("a", FieldType::Integer)
            .field("b", FieldType::Integer)
            .build()
            .unwrap()
    }

    #[test]
    fn test_negation_pushdown() {
        let t = pair_type("t");
        let root = Root::new(&t);
        let a = root.field("a").unwrap();
        let b = root.field("b").unwrap();

        let cond = !(a.lt(1) | b.ge(2));
        assert_eq!(simplify(&cond), a.ge(1) & b.lt(2));
        assert_eq!(negate(&negate(&cond)), simplify(&cond));
    }

    #[test]
    fn test_static_simplification() {
        let t = pair_type("t");
        let a = Root::new(&t).field("a").unwrap();

        assert_eq!(simplify(&a.le(&a)), Condition::Static(true));
        assert_eq!(simplify(&a.ne(&a)), Condition::Static(false));
        assert_eq!(simplify(&(a.eq(1) | a.eq(&a))), Condition::Static(true));
        assert_eq!(simplify(&(a.eq(1) & a.gt(&a))), Condition::Static(false));
        let lit = Condition::Compare(Comparison::new(
            crate::query::ast::CompareOp::Lt,
            Operand::from(1),
            Operand::from(2),
        ));
        assert_eq!(simplify(&(a.eq(1) & lit)), a.eq(1));
    }

    #[test]
    fn test_constant_moves_right() {
        let t = pair_type("t");
        let a = Root::new(&t).field("a").unwrap();
        let flipped = Condition::Compare(Comparison::new(
            crate::query::ast::CompareOp::Lt,
            Operand::from(3),
            Operand::from(&a),
        ));
        assert_eq!(simplify(&flipped), a.gt(3));
    }

    #[test]
    fn test_cnf_distribution() {
        let t = pair_type("t");
        let root = Root::new(&t);
        let a = root.field("a").unwrap();
        let b = root.field("b").unwrap();

        let cond = (a.eq(1) & b.eq(2)) | a.eq(3);
        let clauses = to_cnf(&cond);
        assert_eq!(clauses.len(), 2);
        assert!(clauses.iter().all(|c| c.atoms().len() == 2));

        let fact = Fact::new(&t, vec![Value::Int(3), Value::Int(9)]).unwrap();
        let roots = [root];
        let facts = [fact];
        let binding = Binding::new(&roots, &facts);
        assert_eq!(
            cond.evaluate(&binding),
            clauses.iter().all(|c| c.evaluate(&binding))
        );
    }

    #[test]
    fn test_wide_conjunction_deduplicates() {
        let a = Root::new(&pair_type("t")).field("a").unwrap();
        let cond = (0..20_000)
            .map(|i| a.ne(i % 10_000))
            .reduce(Condition::and)
            .unwrap();
        assert_eq!(to_cnf(&cond).len(), 10_000);

        let either = (0..2_000)
            .map(|i| a.eq(i % 1_000))
            .reduce(Condition::or)
            .unwrap();
        let clauses = to_cnf(&either);
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].atoms().len(), 1_000);
    }

    #[test]
    fn test_validate_fits_literals() {
        let t = RecordType::builder("m")
            .field("x", FieldType::Float)
            .build()
            .unwrap();
        let root = Root::new(&t);
        let x = root.field("x").unwrap();
        let validated = validate(&x.gt(1), &[root.clone()]).unwrap();
        assert_eq!(validated, x.gt(1.0));
        assert!(matches!(
            validate(&(x.lt(2.0) | x.eq(true)), &[root]),
            Err(FactDbError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_partition() {
        let t = pair_type("t");
        let u = pair_type("u");
        let rt = Root::new(&t);
        let ru = Root::new(&u);
        let ta = rt.field("a").unwrap();
        let ua = ru.field("a").unwrap();

        let cond = ta.eq(1) & ua.gt(2) & (ta.eq(&ua) | ua.eq(5));
        let normalized = normalize(&cond, &[rt.clone(), ru.clone()]).unwrap();
        assert_eq!(normalized.block(&rt).len(), 1);
        assert_eq!(normalized.block(&ru).len(), 1);
        assert_eq!(normalized.catch_all.len(), 1);
    }

    #[test]
    fn test_validation_errors() {
        let t = pair_type("t");
        let u = pair_type("u");
        let rt = Root::new(&t);
        let ru = Root::new(&u);
        let ua = ru.field("a").unwrap();

        assert!(matches!(
            validate(&ua.eq(1), &[rt.clone()]),
            Err(FactDbError::SchemaMismatch(_))
        ));
        assert!(matches!(
            validate(&Condition::Static(true), &[rt.clone()]),
            Err(FactDbError::Condition(_))
        ));
        assert!(matches!(
            validate(&func([ph1()], |_| true), &[rt.clone()]),
            Err(FactDbError::Condition(_))
        ));
        let raw = crate::query::ast::raw(|_| true);
        assert!(validate(&raw, &[rt.clone()]).is_ok());
        assert!(matches!(
            validate(&raw, &[rt, ru]),
            Err(FactDbError::Condition(_))
        ));
    }
}
