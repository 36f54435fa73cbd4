//! Query condition definitions
//!
//! A condition is a tree of comparisons, functor predicates and boolean
//! connectives. Conditions are plain values: they are built once per query
//! definition, grounded into fresh instances, and never mutated.

use super::path::{Path, Root};
use super::placeholder::{Args, Placeholder};
use crate::error::{FactDbError, Result};
use crate::fact::Fact;
use crate::schema::FieldDescriptor;
use crate::value::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Right operand is a tuple containing the left operand
    In,
    /// Right operand is a tuple not containing the left operand
    NotIn,
}

impl CompareOp {
    /// Operator matching exactly the complement
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::In => CompareOp::NotIn,
            CompareOp::NotIn => CompareOp::In,
        }
    }

    /// Operator for swapped operands; membership cannot be swapped
    pub fn swap(self) -> Option<Self> {
        match self {
            CompareOp::Eq => Some(CompareOp::Eq),
            CompareOp::Ne => Some(CompareOp::Ne),
            CompareOp::Lt => Some(CompareOp::Gt),
            CompareOp::Le => Some(CompareOp::Ge),
            CompareOp::Gt => Some(CompareOp::Lt),
            CompareOp::Ge => Some(CompareOp::Le),
            CompareOp::In | CompareOp::NotIn => None,
        }
    }

    /// Evaluate the operator on two values
    pub fn apply(self, left: &Value, right: &Value) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::In => right.as_tuple().map_or(false, |items| items.contains(left)),
            CompareOp::NotIn => !right.as_tuple().map_or(false, |items| items.contains(left)),
        }
    }

    /// Evaluate the operator under a field-specific ordering
    pub fn apply_by(
        self,
        left: &Value,
        right: &Value,
        cmp: impl Fn(&Value, &Value) -> Ordering,
    ) -> bool {
        let member = |items: &[Value]| items.iter().any(|item| cmp(left, item) == Ordering::Equal);
        match self {
            CompareOp::Eq => cmp(left, right) == Ordering::Equal,
            CompareOp::Ne => cmp(left, right) != Ordering::Equal,
            CompareOp::Lt => cmp(left, right) == Ordering::Less,
            CompareOp::Le => cmp(left, right) != Ordering::Greater,
            CompareOp::Gt => cmp(left, right) == Ordering::Greater,
            CompareOp::Ge => cmp(left, right) != Ordering::Less,
            CompareOp::In => right.as_tuple().map_or(false, member),
            CompareOp::NotIn => !right.as_tuple().map_or(false, member),
        }
    }

    /// Result of comparing a value with itself, for the ordering operators
    pub fn reflexive_result(self) -> Option<bool> {
        match self {
            CompareOp::Eq | CompareOp::Le | CompareOp::Ge => Some(true),
            CompareOp::Ne | CompareOp::Lt | CompareOp::Gt => Some(false),
            CompareOp::In | CompareOp::NotIn => None,
        }
    }

    pub fn is_range(self) -> bool {
        matches!(
            self,
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge
        )
    }

    pub fn is_membership(self) -> bool {
        matches!(self, CompareOp::In | CompareOp::NotIn)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Comparison operand
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operand {
    Path(Path),
    Placeholder(Placeholder),
    Literal(Value),
}

impl Operand {
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Operand::Path(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_path(&self) -> bool {
        matches!(self, Operand::Path(_))
    }

    /// Literal or placeholder: a value known before any record is bound
    pub fn is_constant(&self) -> bool {
        !self.is_path()
    }

    /// Resolve against a tuple binding; placeholders never resolve here
    pub fn value<'a>(&'a self, binding: &Binding<'a>) -> Option<Cow<'a, Value>> {
        match self {
            Operand::Path(path) => binding.resolve(path),
            Operand::Literal(value) => Some(Cow::Borrowed(value)),
            Operand::Placeholder(_) => None,
        }
    }

    fn ground(&self, args: &Args) -> Result<Operand> {
        match self {
            Operand::Placeholder(ph) => Ok(Operand::Literal(args.resolve(ph)?)),
            other => Ok(other.clone()),
        }
    }

    fn map_path(&self, f: &impl Fn(&Path) -> Path) -> Operand {
        match self {
            Operand::Path(path) => Operand::Path(f(path)),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Path(path) => write!(f, "{}", path),
            Operand::Placeholder(ph) => write!(f, "{}", ph),
            Operand::Literal(value) => write!(f, "{}", value),
        }
    }
}

impl From<Path> for Operand {
    fn from(path: Path) -> Self {
        Operand::Path(path)
    }
}

impl From<&Path> for Operand {
    fn from(path: &Path) -> Self {
        Operand::Path(path.clone())
    }
}

impl From<Placeholder> for Operand {
    fn from(ph: Placeholder) -> Self {
        Operand::Placeholder(ph)
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Literal(value)
    }
}

macro_rules! literal_operand {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Operand {
                fn from(v: $t) -> Self {
                    Operand::Literal(Value::from(v))
                }
            }
        )*
    };
}

literal_operand!(bool, i32, i64, f64, &str, String, Fact, Vec<Value>);

/// Binary comparison between two operands
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Comparison {
    pub op: CompareOp,
    pub left: Operand,
    pub right: Operand,
}

impl Comparison {
    pub fn new(op: CompareOp, left: Operand, right: Operand) -> Self {
        Self { op, left, right }
    }

    /// Complementary comparison
    pub fn negate(&self) -> Self {
        Self::new(self.op.negate(), self.left.clone(), self.right.clone())
    }

    /// Same comparison with operands exchanged, when the operator allows it
    pub fn swapped(&self) -> Option<Self> {
        self.op
            .swap()
            .map(|op| Self::new(op, self.right.clone(), self.left.clone()))
    }

    /// Roots referenced by either operand
    pub fn roots(&self) -> BTreeSet<Root> {
        [&self.left, &self.right]
            .into_iter()
            .filter_map(Operand::as_path)
            .map(|p| p.root().clone())
            .collect()
    }

    /// Whether both operands are paths on distinct roots
    pub fn is_join(&self) -> bool {
        match (&self.left, &self.right) {
            (Operand::Path(a), Operand::Path(b)) => a.root() != b.root(),
            _ => false,
        }
    }

    /// Oriented so that the operand on `root` is on the left
    pub fn oriented_to(&self, root: &Root) -> Option<Self> {
        match &self.left {
            Operand::Path(p) if p.root() == root => Some(self.clone()),
            _ => match &self.right {
                Operand::Path(p) if p.root() == root => self.swapped(),
                _ => None,
            },
        }
    }

    pub fn placeholders(&self) -> Vec<&Placeholder> {
        [&self.left, &self.right]
            .into_iter()
            .filter_map(|o| match o {
                Operand::Placeholder(ph) => Some(ph),
                _ => None,
            })
            .collect()
    }

    /// Membership needs a tuple on the right once grounded
    fn check_membership(&self) -> Result<()> {
        if self.op.is_membership() {
            if let Operand::Literal(value) = &self.right {
                if value.as_tuple().is_none() {
                    return Err(FactDbError::condition(format!(
                        "'{}' needs a tuple on the right, got {} '{}'",
                        self.op,
                        value.kind_name(),
                        value
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fit literal operands to the type of the field they are compared with.
    ///
    /// Integers widen for float fields; a literal the field type cannot
    /// hold is a schema mismatch.
    pub(crate) fn typed(&self) -> Result<Self> {
        self.check_membership()?;
        let fit = |path: &Path, value: &Value| -> Result<Value> {
            let field_type = match path.field_type() {
                Some(field_type) => field_type,
                None => return Ok(value.clone()),
            };
            let fitted = if self.op.is_membership() {
                value
                    .as_tuple()
                    .unwrap_or_default()
                    .iter()
                    .map(|item| field_type.fit(item))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Tuple)
            } else {
                field_type.fit(value)
            };
            fitted.ok_or_else(|| {
                FactDbError::schema(format!(
                    "{} '{}' cannot be compared with '{}' of type {}",
                    value.kind_name(),
                    value,
                    path,
                    field_type.type_name()
                ))
            })
        };
        match (&self.left, &self.right) {
            (Operand::Path(path), Operand::Literal(value)) => Ok(Self::new(
                self.op,
                self.left.clone(),
                Operand::Literal(fit(path, value)?),
            )),
            (Operand::Literal(value), Operand::Path(path)) if !self.op.is_membership() => Ok(
                Self::new(self.op, Operand::Literal(fit(path, value)?), self.right.clone()),
            ),
            _ => Ok(self.clone()),
        }
    }

    pub fn ground(&self, args: &Args) -> Result<Self> {
        Self::new(self.op, self.left.ground(args)?, self.right.ground(args)?).typed()
    }

    /// Path whose descriptor orders this comparison, when it is not native
    fn custom_order(&self) -> Option<&Path> {
        [&self.left, &self.right]
            .into_iter()
            .filter_map(Operand::as_path)
            .find(|p| !p.has_native_order())
    }

    /// Whether an index keyed on the native value order can answer this
    pub fn has_native_order(&self) -> bool {
        self.custom_order().is_none()
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        match (self.left.value(binding), self.right.value(binding)) {
            (Some(l), Some(r)) => match self.custom_order() {
                Some(path) => self.op.apply_by(&l, &r, |a, b| path.compare_values(a, b)),
                None => self.op.apply(&l, &r),
            },
            _ => false,
        }
    }

    pub(crate) fn map_paths(&self, f: &impl Fn(&Path) -> Path) -> Self {
        Self::new(self.op, self.left.map_path(f), self.right.map_path(f))
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

/// Argument signature of a functor predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Signature {
    /// Called with the whole fact of the single query root
    Raw,
    /// Called with the resolved values of these operands
    Args(Vec<Operand>),
}

/// User-supplied boolean test over resolved operand values
#[derive(Clone)]
pub struct FunctorPredicate {
    func: Arc<dyn Fn(&[Value]) -> bool + Send + Sync>,
    signature: Signature,
    negated: bool,
}

impl FunctorPredicate {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Same predicate with the negation flag flipped
    pub fn negate(&self) -> Self {
        Self {
            func: self.func.clone(),
            signature: self.signature.clone(),
            negated: !self.negated,
        }
    }

    /// Bind a raw predicate to the whole fact of `root`
    pub(crate) fn bind_raw(&self, root: &Root) -> Self {
        match self.signature {
            Signature::Raw => Self {
                func: self.func.clone(),
                signature: Signature::Args(vec![Operand::Path(root.path())]),
                negated: self.negated,
            },
            Signature::Args(_) => self.clone(),
        }
    }

    /// Identity used to deduplicate predicates: function pointer, operands
    /// (none for a raw signature) and negation
    pub(crate) fn identity(&self) -> (usize, Option<Vec<Operand>>, bool) {
        let operands = match &self.signature {
            Signature::Raw => None,
            Signature::Args(ops) => Some(ops.clone()),
        };
        (
            Arc::as_ptr(&self.func) as *const () as usize,
            operands,
            self.negated,
        )
    }

    pub fn operands(&self) -> &[Operand] {
        match &self.signature {
            Signature::Raw => &[],
            Signature::Args(args) => args,
        }
    }

    pub fn roots(&self) -> BTreeSet<Root> {
        self.operands()
            .iter()
            .filter_map(Operand::as_path)
            .map(|p| p.root().clone())
            .collect()
    }

    pub fn ground(&self, args: &Args) -> Result<Self> {
        let signature = match &self.signature {
            Signature::Raw => Signature::Raw,
            Signature::Args(ops) => {
                Signature::Args(ops.iter().map(|o| o.ground(args)).collect::<Result<_>>()?)
            }
        };
        Ok(Self {
            func: self.func.clone(),
            signature,
            negated: self.negated,
        })
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        let values: Option<Vec<Value>> = self
            .operands()
            .iter()
            .map(|o| o.value(binding).map(Cow::into_owned))
            .collect();
        match values {
            Some(values) if !values.is_empty() => (self.func)(&values) != self.negated,
            _ => false,
        }
    }

    pub(crate) fn map_paths(&self, f: &impl Fn(&Path) -> Path) -> Self {
        let signature = match &self.signature {
            Signature::Raw => Signature::Raw,
            Signature::Args(ops) => Signature::Args(ops.iter().map(|o| o.map_path(f)).collect()),
        };
        Self {
            func: self.func.clone(),
            signature,
            negated: self.negated,
        }
    }
}

impl PartialEq for FunctorPredicate {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.func) as *const (),
            Arc::as_ptr(&other.func) as *const (),
        ) && self.signature == other.signature
            && self.negated == other.negated
    }
}

impl fmt::Debug for FunctorPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctorPredicate")
            .field("signature", &self.signature)
            .field("negated", &self.negated)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for FunctorPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "~")?;
        }
        match &self.signature {
            Signature::Raw => write!(f, "raw(..)"),
            Signature::Args(ops) => {
                write!(f, "func(")?;
                for (i, op) in ops.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", op)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Custom predicate over the values of `args`
pub fn func<I, O, F>(args: I, f: F) -> Condition
where
    I: IntoIterator<Item = O>,
    O: Into<Operand>,
    F: Fn(&[Value]) -> bool + Send + Sync + 'static,
{
    Condition::Func(FunctorPredicate {
        func: Arc::new(f),
        signature: Signature::Args(args.into_iter().map(Into::into).collect()),
        negated: false,
    })
}

/// Custom predicate over the whole fact; single-root queries only
pub fn raw<F>(f: F) -> Condition
where
    F: Fn(&Fact) -> bool + Send + Sync + 'static,
{
    Condition::Func(FunctorPredicate {
        func: Arc::new(move |values: &[Value]| {
            values.first().and_then(Value::as_fact).map_or(false, &f)
        }),
        signature: Signature::Raw,
        negated: false,
    })
}

/// Query condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Constant produced by simplification
    Static(bool),
    Compare(Comparison),
    Func(FunctorPredicate),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn and(self, other: Condition) -> Condition {
        match self {
            Condition::And(mut children) => {
                children.push(other);
                Condition::And(children)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Condition) -> Condition {
        match self {
            Condition::Or(mut children) => {
                children.push(other);
                Condition::Or(children)
            }
            first => Condition::Or(vec![first, other]),
        }
    }

    pub fn as_compare(&self) -> Option<&Comparison> {
        match self {
            Condition::Compare(cmp) => Some(cmp),
            _ => None,
        }
    }

    /// Roots referenced anywhere in the condition
    pub fn roots(&self) -> BTreeSet<Root> {
        let mut roots = BTreeSet::new();
        self.visit(&mut |node| match node {
            Condition::Compare(cmp) => roots.extend(cmp.roots()),
            Condition::Func(fp) => roots.extend(fp.roots()),
            _ => {}
        });
        roots
    }

    /// Paths referenced anywhere in the condition
    pub fn paths(&self) -> Vec<Path> {
        let mut paths = Vec::new();
        self.visit(&mut |node| {
            let operands: Vec<&Operand> = match node {
                Condition::Compare(cmp) => vec![&cmp.left, &cmp.right],
                Condition::Func(fp) => fp.operands().iter().collect(),
                _ => Vec::new(),
            };
            paths.extend(operands.into_iter().filter_map(Operand::as_path).cloned());
        });
        paths
    }

    /// Placeholders referenced anywhere in the condition
    pub fn placeholders(&self) -> BTreeSet<Placeholder> {
        let mut found = BTreeSet::new();
        self.visit(&mut |node| {
            let operands: Vec<&Operand> = match node {
                Condition::Compare(cmp) => vec![&cmp.left, &cmp.right],
                Condition::Func(fp) => fp.operands().iter().collect(),
                _ => Vec::new(),
            };
            for operand in operands {
                if let Operand::Placeholder(ph) = operand {
                    found.insert(ph.clone());
                }
            }
        });
        found
    }

    /// Whether any raw (signature-less) predicate is present
    pub fn has_raw_predicate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |node| {
            if let Condition::Func(fp) = node {
                found |= matches!(fp.signature, Signature::Raw);
            }
        });
        found
    }

    fn visit(&self, f: &mut impl FnMut(&Condition)) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            f(node);
            match node {
                Condition::And(children) | Condition::Or(children) => stack.extend(children),
                Condition::Not(inner) => stack.push(inner),
                _ => {}
            }
        }
    }

    /// Rebuild the tree with every leaf replaced by `f(leaf)`.
    ///
    /// Walks with an explicit stack; connectives keep their shape.
    pub(crate) fn try_map_leaves<E>(
        &self,
        mut f: impl FnMut(&Condition) -> std::result::Result<Condition, E>,
    ) -> std::result::Result<Condition, E> {
        enum Step<'c> {
            Enter(&'c Condition),
            Exit(&'c Condition),
        }
        let mut steps = vec![Step::Enter(self)];
        let mut built: Vec<Condition> = Vec::new();
        while let Some(step) = steps.pop() {
            match step {
                Step::Enter(node) => match node {
                    Condition::And(children) | Condition::Or(children) => {
                        steps.push(Step::Exit(node));
                        steps.extend(children.iter().rev().map(Step::Enter));
                    }
                    Condition::Not(inner) => {
                        steps.push(Step::Exit(node));
                        steps.push(Step::Enter(inner));
                    }
                    leaf => built.push(f(leaf)?),
                },
                // every Exit is preceded by its children's results
                Step::Exit(node) => {
                    let rebuilt = match node {
                        Condition::And(children) => {
                            Condition::And(built.split_off(built.len() - children.len()))
                        }
                        Condition::Or(children) => {
                            Condition::Or(built.split_off(built.len() - children.len()))
                        }
                        _ => Condition::Not(Box::new(
                            built.pop().unwrap_or(Condition::Static(false)),
                        )),
                    };
                    built.push(rebuilt);
                }
            }
        }
        Ok(built.pop().unwrap_or_else(|| self.clone()))
    }

    pub(crate) fn map_leaves(&self, mut f: impl FnMut(&Condition) -> Condition) -> Condition {
        match self.try_map_leaves(|leaf| Ok::<_, Infallible>(f(leaf))) {
            Ok(condition) => condition,
            Err(never) => match never {},
        }
    }

    /// New condition with every placeholder replaced by its argument
    pub fn ground(&self, args: &Args) -> Result<Condition> {
        self.try_map_leaves(|leaf| {
            Ok(match leaf {
                Condition::Compare(cmp) => Condition::Compare(cmp.ground(args)?),
                Condition::Func(fp) => Condition::Func(fp.ground(args)?),
                other => other.clone(),
            })
        })
    }

    /// New condition with every path moved onto the unaliased root
    pub fn dealias(&self) -> Condition {
        self.map_paths(&|p: &Path| p.dealias())
    }

    pub(crate) fn map_paths(&self, f: &impl Fn(&Path) -> Path) -> Condition {
        self.map_leaves(|leaf| match leaf {
            Condition::Compare(cmp) => Condition::Compare(cmp.map_paths(f)),
            Condition::Func(fp) => Condition::Func(fp.map_paths(f)),
            other => other.clone(),
        })
    }

    /// Evaluate against a tuple of bound facts
    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        match self {
            Condition::Static(b) => *b,
            Condition::Compare(cmp) => cmp.evaluate(binding),
            Condition::Func(fp) => fp.evaluate(binding),
            Condition::And(children) => children.iter().all(|c| c.evaluate(binding)),
            Condition::Or(children) => children.iter().any(|c| c.evaluate(binding)),
            Condition::Not(inner) => !inner.evaluate(binding),
        }
    }
}

impl BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Condition) -> Condition {
        self.and(rhs)
    }
}

impl BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Condition) -> Condition {
        self.or(rhs)
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        Condition::Not(Box::new(self))
    }
}

impl From<bool> for Condition {
    fn from(b: bool) -> Self {
        Condition::Static(b)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        enum Piece<'c> {
            Node(&'c Condition),
            Text(&'static str),
        }
        let mut pieces = vec![Piece::Node(self)];
        while let Some(piece) = pieces.pop() {
            let node = match piece {
                Piece::Text(text) => {
                    f.write_str(text)?;
                    continue;
                }
                Piece::Node(node) => node,
            };
            match node {
                Condition::Static(b) => write!(f, "{}", b)?,
                Condition::Compare(cmp) => write!(f, "{}", cmp)?,
                Condition::Func(fp) => write!(f, "{}", fp)?,
                Condition::Not(inner) => {
                    f.write_str("~")?;
                    pieces.push(Piece::Node(inner));
                }
                Condition::And(children) | Condition::Or(children) => {
                    let sep = if matches!(node, Condition::And(_)) { " & " } else { " | " };
                    f.write_str("(")?;
                    pieces.push(Piece::Text(")"));
                    for (i, child) in children.iter().enumerate().rev() {
                        pieces.push(Piece::Node(child));
                        if i > 0 {
                            pieces.push(Piece::Text(sep));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Facts bound to roots during evaluation
#[derive(Debug, Clone, Copy)]
pub struct Binding<'a> {
    roots: &'a [Root],
    facts: &'a [Fact],
}

impl<'a> Binding<'a> {
    /// Pair `roots[i]` with `facts[i]`; extra roots stay unbound
    pub fn new(roots: &'a [Root], facts: &'a [Fact]) -> Self {
        Self { roots, facts }
    }

    pub fn fact(&self, root: &Root) -> Option<&'a Fact> {
        self.roots
            .iter()
            .position(|r| r == root)
            .and_then(|i| self.facts.get(i))
    }

    pub fn resolve(&self, path: &Path) -> Option<Cow<'a, Value>> {
        self.fact(path.root()).and_then(|fact| path.resolve(fact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::placeholder::ph1;
    use crate::schema::{FieldType, RecordType};

    fn person() -> Arc<RecordType> {
        RecordType::builder("person")
            .field("id", FieldType::Integer)
            .field("name", FieldType::String)
            .build()
            .unwrap()
    }

    #[test]
    fn test_operator_negation_and_swap() {
        for op in [
            CompareOp::Eq,
            CompareOp::Ne,
            CompareOp::Lt,
            CompareOp::Le,
            CompareOp::Gt,
            CompareOp::Ge,
            CompareOp::In,
            CompareOp::NotIn,
        ] {
            assert_eq!(op.negate().negate(), op);
        }
        assert_eq!(CompareOp::Lt.swap(), Some(CompareOp::Gt));
        assert_eq!(CompareOp::In.swap(), None);
        let set = Value::tuple([Value::Int(1), Value::Int(2)]);
        assert!(CompareOp::In.apply(&Value::Int(2), &set));
        assert!(CompareOp::NotIn.apply(&Value::Int(3), &set));
    }

    #[test]
    fn test_evaluate_and_ground() {
        let p = person();
        let root = Root::new(&p);
        let id = root.field("id").unwrap();
        let name = root.field("name").unwrap();
        let cond = id.gt(ph1()) & !name.eq("b");

        assert_eq!(cond.placeholders().len(), 1);
        assert!(cond.ground(&Args::none()).is_err());
        let grounded = cond.ground(&Args::positional([1])).unwrap();
        assert!(grounded.placeholders().is_empty());

        let roots = [root];
        let fact = Fact::new(&p, vec![Value::Int(2), Value::from("a")]).unwrap();
        let facts = [fact];
        assert!(grounded.evaluate(&Binding::new(&roots, &facts)));
        assert_eq!(grounded.to_string(), "(person.id > 1 & ~person.name == \"b\")");
    }

    #[test]
    fn test_membership_needs_tuple() {
        let p = person();
        let id = Root::new(&p).field("id").unwrap();
        let cond = id.in_(ph1());
        assert!(matches!(
            cond.ground(&Args::positional([3])),
            Err(FactDbError::Condition(_))
        ));
        assert!(cond
            .ground(&Args::positional([Value::tuple([Value::Int(3)])]))
            .is_ok());
    }

    #[test]
    fn test_literal_typing() {
        let p = person();
        let root = Root::new(&p);
        let id = root.field("id").unwrap();
        let name = root.field("name").unwrap();

        let typed = id.eq("1").as_compare().unwrap().typed();
        assert!(matches!(typed, Err(FactDbError::SchemaMismatch(_))));
        let typed = name.in_(vec![Value::from("a"), Value::Int(2)]);
        assert!(matches!(
            typed.as_compare().unwrap().typed(),
            Err(FactDbError::SchemaMismatch(_))
        ));
        assert!(id.le(3).as_compare().unwrap().typed().is_ok());
        assert!(matches!(
            id.gt(ph1()).ground(&Args::positional(["x"])),
            Err(FactDbError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_apply_by_custom_ordering() {
        let reversed = |a: &Value, b: &Value| b.cmp(a);
        let (one, three) = (Value::Int(1), Value::Int(3));
        assert!(CompareOp::Lt.apply_by(&three, &one, reversed));
        assert!(!CompareOp::Lt.apply_by(&one, &three, reversed));
        assert!(CompareOp::Ge.apply_by(&one, &one, reversed));
        let set = Value::tuple([one.clone()]);
        assert!(CompareOp::In.apply_by(&one, &set, reversed));
        assert!(CompareOp::NotIn.apply_by(&three, &set, reversed));
    }

    #[test]
    fn test_display_deep_negation() {
        let p = person();
        let mut cond = Root::new(&p).field("id").unwrap().eq(1);
        for _ in 0..3 {
            cond = !cond;
        }
        assert_eq!(cond.to_string(), "~~~person.id == 1");
    }

    #[test]
    fn test_raw_predicate() {
        let p = person();
        let root = Root::new(&p);
        let cond = raw(|f: &Fact| f.get(0) == Some(&Value::Int(1)));
        assert!(cond.has_raw_predicate());
        let bound = match &cond {
            Condition::Func(fp) => Condition::Func(fp.bind_raw(&root)),
            _ => unreachable!(),
        };
        let roots = [root];
        let facts = [Fact::new(&p, vec![Value::Int(1), Value::from("a")]).unwrap()];
        assert!(bound.evaluate(&Binding::new(&roots, &facts)));
        assert!(!cond.evaluate(&Binding::new(&roots, &facts)));
    }

    #[test]
    fn test_dealias() {
        let p = person();
        let alias = Root::new(&p).alias("other");
        let cond = alias.field("id").unwrap().eq(1);
        assert_eq!(
            cond.dealias().roots().into_iter().collect::<Vec<_>>(),
            vec![Root::new(&p)]
        );
    }
}
