use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cardlift::chunk::{self, Chunk, ChunkType};
use cardlift::locate::MetadataLocator;
use cardlift::normalize::{normalize, NormalizeOptions};
use cardlift::writer;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn card_json() -> String {
    let lore: Vec<String> = (0..200)
        .map(|i| format!(r#"{{"key":"entry{i}","value":"{{character}} remembers item {i}"}}"#))
        .collect();
    format!(
        r#"{{"character":{{"aiName":"Bench","aiPersona":"{}","loreItems":[{}]}}}}"#,
        "{character} is thorough. ".repeat(100),
        lore.join(",")
    )
}

/// IHDR, `extra`, 1 MiB of IDAT, IEND.
fn image(extra: Chunk) -> Vec<u8> {
    chunk::serialize(&[
        Chunk::new(ChunkType::IHDR, vec![0, 0, 2, 0, 0, 0, 2, 0, 8, 6, 0, 0, 0]),
        extra,
        Chunk::new(ChunkType::IDAT, vec![0x5a; 1024 * 1024]),
        Chunk::new(ChunkType::IEND, Vec::new()),
    ])
    .unwrap()
}

fn bench_locate(c: &mut Criterion) {
    let encoded = STANDARD.encode(card_json());
    let standard = image(Chunk::text("chara", encoded.as_bytes()));

    let mut legacy = b"ASCII\0".to_vec();
    legacy.extend_from_slice(encoded.as_bytes());
    legacy.extend_from_slice(b"\0IDATx");
    let legacy = image(Chunk::new(ChunkType(*b"prVt"), legacy));

    let locator = MetadataLocator::default();
    c.bench_function("locate_standard_chunk_1mb", |b| b.iter(|| locator.locate(black_box(&standard))));
    c.bench_function("locate_legacy_marker_1mb", |b| b.iter(|| locator.locate(black_box(&legacy))));
}

fn bench_embed(c: &mut Criterion) {
    let value: serde_json::Value = serde_json::from_str(&card_json()).unwrap();
    let opts = NormalizeOptions { now_ms: Some(0), ..NormalizeOptions::default() };
    let record = normalize(value.as_object().unwrap(), None, &opts);
    let base = image(Chunk::text("Comment", b"bench"));

    c.bench_function("normalize_200_lore_items", |b| {
        b.iter(|| normalize(black_box(value.as_object().unwrap()), None, &opts))
    });
    c.bench_function("embed_1mb", |b| b.iter(|| writer::embed(black_box(&record), black_box(&base))));
}

criterion_group!(benches, bench_locate, bench_embed);
criterion_main!(benches);
