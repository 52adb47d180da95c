//! Benchmark: expansion of a nested, repeated layout, then the per-command path
//! (JSON populate, validate, encode) and the reply path (decode, render JSON).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use devdecl::{
    expand, populate_from_bytes, populate_from_json, to_bytes, to_json, validate, Expression,
    ExprEvaluator, Field, SchemaRegistry, Structure,
};
use serde_json::json;

fn layout() -> Structure {
    let mut reg = SchemaRegistry::new();
    reg.insert(
        Structure::new("led")
            .with_field(Field::of_type("r", "uint8", &reg).expect("r"))
            .with_field(Field::of_type("g", "uint8", &reg).expect("g"))
            .with_field(Field::of_type("b", "uint8", &reg).expect("b"))
            .with_field(
                Field::of_type("duration", "uint16", &reg)
                    .expect("duration")
                    .with_range(0, 5000),
            ),
    )
    .expect("led");
    Structure::new("frame")
        .with_field(Field::of_type("count", "uint8", &reg).expect("count").with_range(1, 64))
        .with_field(
            Field::of_type("start", "uint8", &reg)
                .expect("start")
                .with_deferred(Expression::new("range(0, count - 1)")),
        )
        .with_field(Field::of_type("leds", "led", &reg).expect("leds").repeated(64).expect("rep"))
        .with_field(Field::of_type("crc", "uint32", &reg).expect("crc"))
}

fn command() -> serde_json::Value {
    let leds: Vec<_> = (0..64u32)
        .map(|i| json!({"r": i, "g": 255 - i, "b": i * 2, "duration": i * 10}))
        .collect();
    json!({"count": 64, "start": 3, "leds": leds, "crc": 0xDEADBEEFu32})
}

fn bench_expand_encode(c: &mut Criterion) {
    let structure = layout();
    let doc = command();
    let expanded = expand(&structure);
    let mut filled = expanded.clone();
    populate_from_json(&mut filled, &doc, None).expect("populate");
    let bytes = to_bytes(&filled);

    c.bench_function("expand", |b| b.iter(|| expand(black_box(&structure))));

    c.bench_function("json_validate_encode", |b| {
        b.iter(|| {
            let mut s = expanded.clone();
            populate_from_json(&mut s, black_box(&doc), None).expect("populate");
            validate(&s, &ExprEvaluator).expect("valid");
            to_bytes(&s)
        })
    });

    c.bench_function("decode_to_json", |b| {
        b.iter(|| {
            let mut s = expanded.clone();
            populate_from_bytes(&mut s, black_box(&bytes)).expect("decode");
            to_json(&s, None).expect("to_json")
        })
    });
}

criterion_group!(benches, bench_expand_encode);
criterion_main!(benches);
