use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use trove::layout::LayoutDescriptor;
use trove::writer::{RecordWriter, WriterOptions};
use trove::{RecordKind, StreamId};

const PAYLOAD_SIZE: usize = 4096;

fn bench_append(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let stream = StreamId::new(100, 1);
    let payload = vec![0xA5u8; PAYLOAD_SIZE];

    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Bytes(PAYLOAD_SIZE as u64));

    for (label, compression_level) in [("raw", None), ("zstd", Some(3))] {
        let path = dir.path().join(format!("bench_{label}.trv"));
        let mut options = WriterOptions::default();
        options.compression_level = compression_level;
        let mut writer =
            RecordWriter::create(&path.to_string_lossy(), options).expect("create writer");
        writer
            .register_stream(stream, 0.0, &LayoutDescriptor::default())
            .expect("register");
        let mut timestamp = 0.0f64;

        group.bench_function(format!("record_4k_{label}"), |b| {
            b.iter(|| {
                timestamp += 1.0;
                writer
                    .create_record(timestamp, stream, RecordKind::Data, 1, &payload)
                    .expect("create record");
                writer.write_records_up_to(timestamp).expect("write pass");
            })
        });
        writer.finalize().expect("finalize");
    }
    group.finish();
}

criterion_group!(benches, bench_append);
criterion_main!(benches);
