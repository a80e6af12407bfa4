use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use dynamic_models::{Config, DynamicModels, FieldKind, FieldSpec};

#[derive(serde::Serialize, serde::Deserialize)]
struct TestRow {
    string_col: String,
    int_col: i64,
    date_col: String,
}

fn build_test_rows(row_count: usize) -> Vec<TestRow> {
    let mut ret = vec![];

    for i in 0..row_count {
        ret.push(TestRow {
            string_col: format!("string{}", i),
            int_col: i as i64,
            date_col: "2022-01-01T00:00:00Z".into(),
        });
    }

    ret
}

fn build_models(path: &std::path::Path) -> (DynamicModels, i64) {
    let models = DynamicModels::open(path, Config::default()).unwrap();
    let schema = models.create_model("bench").unwrap();
    for spec in [
        FieldSpec::new("string_col", FieldKind::Char).max_length(64),
        FieldSpec::new("int_col", FieldKind::Integer),
        FieldSpec::new("date_col", FieldKind::DateTime),
    ] {
        models.add_field(schema.id, spec).unwrap();
    }
    (models, schema.id)
}

pub fn benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("inserting");
    for size in [5, 10, 20, 50, 100, 500, 5000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, size| {
            let tdir = tempfile::TempDir::new().expect("Should create");
            let (models, id) = build_models(tdir.path());
            let model = models.get_dynamic_model(id).unwrap();
            let rows = build_test_rows(*size as usize);

            b.iter(move || {
                for r in rows.iter() {
                    models.insert(&model, r).unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
