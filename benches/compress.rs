use criterion::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rohc_compressor::compressor::Compressor;
use rohc_compressor::config::CompressorConfig;
use rohc_compressor::context::{CidMode, ProfileId};

/// A deterministic-seeded stand-in for the real SN-seed RNG a caller would
/// supply in production, so benchmark iterations stay reproducible across
/// runs.
fn seeded_random_cb(seed: u64) -> Box<dyn FnMut() -> u16> {
    let mut rng = StdRng::seed_from_u64(seed);
    Box::new(move || rng.random())
}

fn udp_packet(id: u16) -> Vec<u8> {
    let builder = etherparse::PacketBuilder::ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64).udp(1000, 2000);
    let payload = [0xABu8; 160];
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, &payload).unwrap();
    out[4] = (id >> 8) as u8;
    out[5] = (id & 0xFF) as u8;
    out
}

fn settled_compressor() -> (Compressor, Vec<u8>) {
    let mut comp = Compressor::new(CompressorConfig::new(CidMode::Small, 15, 1500));
    comp.activate_profile(ProfileId::Udp).unwrap();
    comp.set_random_cb(seeded_random_cb(1));

    let mut out = [0u8; 256];
    for i in 0..10u16 {
        comp.compress(&udp_packet(i), &mut out).unwrap();
    }
    (comp, udp_packet(10))
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut compress = c.benchmark_group("compress");

    let first = udp_packet(0);
    compress.throughput(Throughput::Bytes(first.len() as u64));
    compress.bench_function("ir_first_packet", |b| {
        b.iter_batched(
            || Compressor::new(CompressorConfig::new(CidMode::Small, 15, 1500)),
            |mut comp| {
                comp.activate_profile(ProfileId::Udp).unwrap();
                comp.set_random_cb(seeded_random_cb(2));
                let mut out = [0u8; 256];
                comp.compress(black_box(&first), &mut out).unwrap();
            },
            BatchSize::SmallInput,
        )
    });

    let (mut settled, steady) = settled_compressor();
    compress.throughput(Throughput::Bytes(steady.len() as u64));
    compress.bench_function("uo0_steady_state", |b| {
        let mut out = [0u8; 256];
        b.iter(|| {
            settled.compress(black_box(&steady), &mut out).unwrap();
        })
    });

    compress.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
