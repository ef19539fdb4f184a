use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flirt_sigtree::{Config, ModuleDescriptor, SignatureTree, SignatureTreeBuilder};

// deterministic pseudo-random function bodies, with a call and its
// relocated target every so often.
fn synthesize(count: usize) -> Vec<(Vec<u8>, BTreeSet<usize>)> {
    let mut state: u32 = 0x1234_5678;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };

    (0..count)
        .map(|_| {
            let size = 8 + (next() % 120) as usize;
            let mut bytes: Vec<u8> = (0..size).map(|_| next() as u8).collect();
            let mut relocs = BTreeSet::new();
            if size > 48 {
                let call = 40 + (next() as usize % (size - 45));
                bytes[call] = 0xE8;
                relocs.extend(call + 1..call + 5);
            }
            (bytes, relocs)
        })
        .collect()
}

fn build(bodies: &[(Vec<u8>, BTreeSet<usize>)]) -> SignatureTree {
    let config = Config::default();
    let mut b = SignatureTreeBuilder::new(config.clone());
    for (i, (bytes, relocs)) in bodies.iter().enumerate() {
        let _ = b.insert(ModuleDescriptor::from_bytes(
            &format!("sub_{i:x}"),
            bytes,
            relocs.iter().cloned(),
            &config,
        ));
    }
    b.build()
}

fn tree_benchmark(c: &mut Criterion) {
    let bodies = synthesize(10_000);

    c.bench_function("build 10k", |b| b.iter(|| build(black_box(&bodies))));

    let tree = build(&bodies);
    c.bench_function("match hit", |b| {
        b.iter(|| {
            for (bytes, relocs) in bodies.iter().take(100) {
                black_box(tree.r#match(bytes, relocs));
            }
        })
    });

    let misses: Vec<Vec<u8>> = bodies
        .iter()
        .take(100)
        .map(|(bytes, _)| bytes.iter().map(|b| b.wrapping_add(1)).collect())
        .collect();
    let empty = BTreeSet::new();
    c.bench_function("match miss", |b| {
        b.iter(|| {
            for bytes in misses.iter() {
                black_box(tree.r#match(bytes, &empty));
            }
        })
    });
}

criterion_group!(benches, tree_benchmark);
criterion_main!(benches);
