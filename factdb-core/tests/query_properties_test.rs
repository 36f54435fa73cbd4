//! Property tests for indexes, normalization and planned execution

use factdb_core::query::normalize::{negate, simplify, to_cnf};
use factdb_core::{
    Args, Binding, CompareOp, Comparison, Condition, DeclarationOrder, Fact, FactBase, FactIndex,
    FieldType, JoinOrderStrategy, Operand, RecordType, Root, SelectivityOrder, Value, ph1,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn pair_type() -> Arc<RecordType> {
    RecordType::builder("pair")
        .field("a", FieldType::Integer)
        .field("b", FieldType::Integer)
        .build()
        .unwrap()
}

fn pair(rt: &Arc<RecordType>, a: i64, b: i64) -> Fact {
    Fact::new(rt, vec![Value::Int(a), Value::Int(b)]).unwrap()
}

fn op_strategy() -> impl Strategy<Value = CompareOp> {
    prop::sample::select(vec![
        CompareOp::Eq,
        CompareOp::Ne,
        CompareOp::Lt,
        CompareOp::Le,
        CompareOp::Gt,
        CompareOp::Ge,
    ])
}

fn condition_strategy(root: Root) -> impl Strategy<Value = Condition> {
    let a = root.field("a").unwrap();
    let b = root.field("b").unwrap();
    let (a2, a3) = (a.clone(), a.clone());
    let leaf = prop_oneof![
        (op_strategy(), 0i64..4).prop_map(move |(op, v)| {
            Condition::Compare(Comparison::new(
                op,
                Operand::Path(a.clone()),
                Operand::Literal(Value::Int(v)),
            ))
        }),
        (op_strategy(), 0i64..4).prop_map(move |(op, v)| {
            Condition::Compare(Comparison::new(
                op,
                Operand::Literal(Value::Int(v)),
                Operand::Path(b.clone()),
            ))
        }),
        op_strategy().prop_map(move |op| {
            Condition::Compare(Comparison::new(
                op,
                Operand::Path(a2.clone()),
                Operand::Path(a3.clone()),
            ))
        }),
        any::<bool>().prop_map(Condition::Static),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(Condition::And),
            prop::collection::vec(inner.clone(), 1..4).prop_map(Condition::Or),
            inner.prop_map(|c| Condition::Not(Box::new(c))),
        ]
    })
}

fn holds(condition: &Condition, root: &Root, fact: &Fact) -> bool {
    let roots = [root.clone()];
    let facts = [fact.clone()];
    condition.evaluate(&Binding::new(&roots, &facts))
}

fn cnf_holds(condition: &Condition, root: &Root, fact: &Fact) -> bool {
    let roots = [root.clone()];
    let facts = [fact.clone()];
    let binding = Binding::new(&roots, &facts);
    to_cnf(condition).iter().all(|clause| clause.evaluate(&binding))
}

proptest! {
    #[test]
    fn prop_index_tracks_adds_and_removes(
        ops in prop::collection::vec((0i64..6, 0i64..3, any::<bool>()), 0..40)
    ) {
        let rt = pair_type();
        let path = Root::new(&rt).field("a").unwrap();
        let mut index = FactIndex::new(path);
        let mut model: BTreeSet<Fact> = BTreeSet::new();

        for (a, b, add) in ops {
            let fact = pair(&rt, a, b);
            if add {
                index.add(&fact).unwrap();
                model.insert(fact);
            } else {
                let removed = index.remove(&fact, false).unwrap();
                prop_assert_eq!(removed, model.remove(&fact));
                prop_assert!(!index.find(CompareOp::Eq, &Value::Int(a)).contains(&fact));
            }
        }

        let keys: Vec<Value> = index.keys().cloned().collect();
        let expected: Vec<Value> = model
            .iter()
            .map(|f| f.get(0).cloned().unwrap())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        prop_assert_eq!(keys, expected);
        prop_assert_eq!(index.len(), model.len());
    }

    #[test]
    fn prop_cnf_preserves_meaning(
        condition in condition_strategy(Root::new(&pair_type())),
        a in 0i64..4,
        b in 0i64..4,
    ) {
        let rt = pair_type();
        let root = Root::new(&rt);
        let fact = pair(&rt, a, b);
        prop_assert_eq!(holds(&condition, &root, &fact), cnf_holds(&condition, &root, &fact));
        prop_assert_eq!(
            holds(&negate(&condition), &root, &fact),
            !holds(&condition, &root, &fact)
        );
    }

    #[test]
    fn prop_double_negation_is_identity(condition in condition_strategy(Root::new(&pair_type()))) {
        prop_assert_eq!(simplify(&negate(&negate(&condition))), simplify(&condition));
    }

    #[test]
    fn prop_plan_matches_naive_cross_product(
        persons in prop::collection::btree_set((0i64..5, 0i64..3), 0..8),
        likes in prop::collection::btree_set((0i64..5, 0i64..5), 0..8),
        min_liked in 0i64..5,
        indexed in any::<bool>(),
        by_selectivity in any::<bool>(),
    ) {
        let person_type = pair_type();
        let likes_type = RecordType::builder("likes")
            .field("a", FieldType::Integer)
            .field("b", FieldType::Integer)
            .build()
            .unwrap();
        let person = Root::new(&person_type);
        let like = Root::new(&likes_type);
        let index_paths = if indexed {
            vec![like.field("a").unwrap(), like.field("b").unwrap()]
        } else {
            Vec::new()
        };
        let mut fb = FactBase::with_indexes(index_paths).unwrap();
        let person_facts: Vec<Fact> = persons.iter().map(|(a, b)| pair(&person_type, *a, *b)).collect();
        let like_facts: Vec<Fact> = likes.iter().map(|(a, b)| pair(&likes_type, *a, *b)).collect();
        fb.extend(person_facts.iter().cloned()).unwrap();
        fb.extend(like_facts.iter().cloned()).unwrap();

        let strategy: Arc<dyn JoinOrderStrategy> = if by_selectivity {
            Arc::new(SelectivityOrder)
        } else {
            Arc::new(DeclarationOrder)
        };
        let query = fb
            .query([&person, &like])
            .join(person.field("a").unwrap().eq(like.field("a").unwrap()))
            .where_(like.field("b").unwrap().ge(min_liked) & person.field("b").unwrap().le(like.field("b").unwrap()))
            .join_order(strategy)
            .build()
            .unwrap();
        let got: BTreeSet<Value> = query.run(&fb, &Args::none()).unwrap().collect();

        let mut expected = BTreeSet::new();
        for p in &person_facts {
            for l in &like_facts {
                let (pa, pb) = (p.get(0).unwrap(), p.get(1).unwrap());
                let (la, lb) = (l.get(0).unwrap(), l.get(1).unwrap());
                if pa == la && lb >= &Value::Int(min_liked) && pb <= lb {
                    expected.insert(Value::tuple([Value::Fact(p.clone()), Value::Fact(l.clone())]));
                }
            }
        }
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_grounding_is_idempotent(arg in 0i64..10) {
        let rt = pair_type();
        let root = Root::new(&rt);
        let query = FactBase::new()
            .query([&root])
            .where_(root.field("a").unwrap().lt(ph1()) | root.field("b").unwrap().eq(ph1()))
            .build()
            .unwrap();
        let args = Args::positional([arg]);
        let once = query.plan().ground(&args).unwrap();
        let twice = once.ground(&args).unwrap();
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.placeholders().is_empty());
    }
}
