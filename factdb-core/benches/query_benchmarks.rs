//! Query engine performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use factdb_core::{
    desc, normalize, ph1, Args, CompareOp, Condition, Fact, FactBase, FactIndex, FieldType, Query,
    RecordType, Root, Value,
};

struct Dataset {
    fb: FactBase,
    person: Root,
    likes: Root,
}

fn dataset(size: i64, indexed: bool) -> Dataset {
    let person_type = RecordType::builder("person")
        .field("id", FieldType::Integer)
        .field("age", FieldType::Integer)
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
        vec![person.field("id").unwrap(), likes.field("liked").unwrap()]
    } else {
        Vec::new()
    };
    let mut fb = FactBase::with_indexes(paths).unwrap();
    fb.extend((0..size).map(|i| {
        Fact::new(&person_type, vec![Value::Int(i), Value::Int(i % 90)]).unwrap()
    }))
    .unwrap();
    fb.extend((0..size * 4).map(|i| {
        Fact::new(&likes_type, vec![Value::Int(i % size), Value::Int((i * 7) % size)]).unwrap()
    }))
    .unwrap();

    Dataset { fb, person, likes }
}

fn join_query(data: &Dataset) -> Query {
    data.fb
        .query([&data.person, &data.likes])
        .join(data.person.field("id").unwrap().eq(data.likes.field("id").unwrap()))
        .where_(data.likes.field("liked").unwrap().eq(ph1()))
        .build()
        .unwrap()
}

fn bench_index_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_operations");
    let data = dataset(10_000, false);
    let facts: Vec<Fact> = data.fb.facts_of("person").cloned().collect();
    let path = data.person.field("age").unwrap();

    group.bench_function("build_10k", |b| {
        b.iter(|| FactIndex::build(path.clone(), black_box(&facts)).unwrap());
    });

    let index = FactIndex::build(path, &facts).unwrap();
    group.bench_function("find_eq", |b| {
        b.iter(|| index.find(CompareOp::Eq, black_box(&Value::Int(42))));
    });
    group.bench_function("find_range", |b| {
        b.iter(|| index.find(CompareOp::Ge, black_box(&Value::Int(80))));
    });

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let data = dataset(1, false);
    let id = data.person.field("id").unwrap();
    let age = data.person.field("age").unwrap();
    let condition: Condition = (0..6)
        .map(|i| id.eq(i) & (age.lt(i * 10) | !age.ge(i * 5)))
        .reduce(Condition::or)
        .unwrap();
    let roots = [data.person.clone()];

    c.bench_function("normalize_disjunction", |b| {
        b.iter(|| normalize(black_box(&condition), &roots).unwrap());
    });
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("join");

    for size in [1_000, 10_000] {
        for indexed in [false, true] {
            let data = dataset(size, indexed);
            let query = join_query(&data);
            let label = if indexed { "indexed" } else { "scan" };
            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, _| {
                b.iter(|| {
                    query
                        .run(&data.fb, &Args::positional([black_box(7)]))
                        .unwrap()
                        .count()
                });
            });
        }
    }

    group.finish();
}

fn bench_ordered_scan(c: &mut Criterion) {
    let data = dataset(10_000, true);
    let age = data.person.field("age").unwrap();
    let query = data
        .fb
        .query([&data.person])
        .where_(age.gt(30))
        .order_by([desc(&age)])
        .select([data.person.field("id").unwrap()])
        .build()
        .unwrap();

    c.bench_function("ordered_scan_10k", |b| {
        b.iter(|| query.run(&data.fb, &Args::none()).unwrap().take(100).count());
    });
}

criterion_group!(
    benches,
    bench_index_operations,
    bench_normalize,
    bench_join,
    bench_ordered_scan
);
criterion_main!(benches);
