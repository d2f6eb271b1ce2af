use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ferry_core::{Frame, Sender, SenderConfig};
use ferry_transport::{Message, MessageSink, TransportResult};

/// Discards everything it is given
struct NullSink;

#[async_trait]
impl MessageSink for NullSink {
    async fn send(&mut self, msg: Message) -> TransportResult<()> {
        black_box(msg);
        Ok(())
    }
}

fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec");

    for size in [4 * 1024, 1024 * 1024] {
        let payload = vec![0x5A; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &payload, |b, payload| {
            b.iter(|| Frame::data(payload.clone(), 0xFEED).encode())
        });

        let encoded = Frame::data(payload.clone(), 0xFEED).encode();
        group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, msg| {
            b.iter(|| Frame::decode(black_box(msg.clone())))
        });
    }

    group.finish();
}

fn bench_sender_session(c: &mut Criterion) {
    let mut group = c.benchmark_group("sender_session");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    let source = vec![0xC3u8; 32 * 1024 * 1024];
    group.throughput(Throughput::Bytes(source.len() as u64));
    group.sample_size(10);

    for read_ahead in [false, true] {
        let name = if read_ahead { "read_ahead" } else { "sequential" };
        group.bench_function(name, |b| {
            b.iter(|| {
                runtime.block_on(async {
                    let mut sender = Sender::new(SenderConfig {
                        chunk_size: 1024 * 1024,
                        read_ahead,
                    })
                    .unwrap();
                    sender
                        .send_reader(std::io::Cursor::new(source.clone()), &mut NullSink)
                        .await
                        .unwrap()
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_codec, bench_sender_session);
criterion_main!(benches);
