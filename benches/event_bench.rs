use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rnp_protocol::core::event::{deserialize_events, serialize_events, EntityEvents, EventRecord, EventType};
use rnp_protocol::core::packet::PacketType;
use rnp_protocol::protocol::message::{EntityState, Message, WorldState};

fn sample_events() -> Vec<EventRecord> {
    (0..20)
        .map(|i| EventRecord::new(EventType::Damage, i, vec![i as u8; 16]))
        .collect()
}

#[allow(clippy::unwrap_used)]
fn bench_event_tlv(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_tlv");
    let events = sample_events();
    let blob = serialize_events(&events).unwrap();

    group.bench_function("serialize", |b| {
        b.iter_batched(
            || events.clone(),
            |records| serialize_events(&records).unwrap(),
            BatchSize::SmallInput,
        )
    });
    group.bench_function("deserialize", |b| {
        b.iter(|| deserialize_events(&blob).unwrap())
    });

    let batch = EntityEvents::new(1200, events);
    let batch_blob = batch.encode().unwrap();
    group.bench_function("batch_decode", |b| {
        b.iter(|| EntityEvents::decode(&batch_blob).unwrap())
    });

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_world_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_state");
    let state = Message::WorldState(WorldState {
        server_tick: 99,
        entities: (0..20)
            .map(|id| EntityState {
                id,
                entity_type: 1,
                x: id as f32,
                y: 0.5,
                vx: 1.0,
                vy: -1.0,
                state_flags: 0,
            })
            .collect(),
    });
    let payload = state.encode_payload().unwrap();

    group.bench_function("encode", |b| b.iter(|| state.encode_payload().unwrap()));
    group.bench_function("decode", |b| {
        b.iter(|| Message::decode(PacketType::WorldState, &payload).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_event_tlv, bench_world_state);
criterion_main!(benches);
