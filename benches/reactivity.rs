use criterion::{black_box, criterion_group, criterion_main, Criterion};

use atomflow::{autorun, batch, ComputedValue, ObservableValue, Runtime};

fn propagate_chain(c: &mut Criterion) {
    c.bench_function("propagate through 32 computed stages", |b| {
        let mut rt = Runtime::new();
        let base = ObservableValue::new(0i64);
        let mut stage: ComputedValue<i64> = {
            let base = base.clone();
            ComputedValue::new(move |sc| base.get(sc))
        };
        for _ in 0..32 {
            let prev = stage.clone();
            stage = ComputedValue::new(move |sc| prev.get(sc) + 1);
        }
        let top = stage.clone();
        let _sub = autorun(rt.ac(), move |rcx| {
            black_box(top.get(rcx.sc()));
        });

        let mut n = 0;
        b.iter(|| {
            n += 1;
            base.set(n, rt.ac());
        });
    });
}

fn fan_out(c: &mut Criterion) {
    c.bench_function("one write fanning out to 100 reactions", |b| {
        let mut rt = Runtime::new();
        let source = ObservableValue::new(0i64);
        let _subs: Vec<_> = (0..100)
            .map(|_| {
                let source = source.clone();
                autorun(rt.ac(), move |rcx| {
                    black_box(source.get(rcx.sc()));
                })
            })
            .collect();

        let mut n = 0;
        b.iter(|| {
            n += 1;
            source.set(n, rt.ac());
        });
    });
}

fn batched_writes(c: &mut Criterion) {
    c.bench_function("100 batched writes, one re-run", |b| {
        let mut rt = Runtime::new();
        let atoms: Vec<_> = (0..100).map(|_| ObservableValue::new(0i64)).collect();
        let reader = atoms.clone();
        let _sub = autorun(rt.ac(), move |rcx| {
            let total: i64 = reader.iter().map(|a| a.get(rcx.sc())).sum();
            black_box(total);
        });

        let mut n = 0;
        b.iter(|| {
            n += 1;
            batch(rt.ac(), |ac| {
                for atom in &atoms {
                    atom.set(n, ac);
                }
            });
        });
    });
}

criterion_group!(benches, propagate_chain, fan_out, batched_writes);
criterion_main!(benches);
