use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rnp_protocol::core::codec::PacketCodec;
use rnp_protocol::core::packet::{
    decode_header, encode_header, Packet, PacketFlags, PacketHeader, PacketType,
};
use tokio_util::codec::{Decoder, Encoder};

fn bench_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("header");
    let header = PacketHeader::new(
        PacketType::WorldState,
        PacketFlags::RELIABLE | PacketFlags::ACK_REQ,
        123_456,
        7,
        480,
    );
    let bytes = encode_header(&header);

    group.bench_function("encode", |b| b.iter(|| encode_header(&header)));
    group.bench_function("decode", |b| b.iter(|| decode_header(&bytes)));
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let payload_sizes = [0usize, 64, 256, 512];

    for &size in &payload_sizes {
        let packet =
            Packet::new(PacketType::EntityEvent, PacketFlags::empty(), 1, 7, vec![0u8; size]).unwrap();
        let bytes = packet.to_bytes();
        group.throughput(Throughput::Bytes((bytes.len()) as u64));

        group.bench_function(format!("to_bytes_{size}b"), |b| b.iter(|| packet.to_bytes()));
        group.bench_function(format!("from_bytes_{size}b"), |b| {
            b.iter(|| {
                let decoded = Packet::from_bytes(&bytes);
                assert!(decoded.is_ok());
            })
        });
        group.bench_function(format!("codec_roundtrip_{size}b"), |b| {
            b.iter_batched(
                || packet.clone(),
                |p| {
                    let mut buf = BytesMut::with_capacity(size + 16);
                    let mut codec = PacketCodec::default();
                    codec.encode(p, &mut buf).unwrap();
                    codec.decode(&mut buf).unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_header, bench_packet_encode_decode);
criterion_main!(benches);
