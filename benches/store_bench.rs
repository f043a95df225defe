//! Benchmarks for the Voirie store and proximity search
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::tempdir;

use voirie::service::geo::haversine_km;
use voirie::service::{BudgetService, Notifier, SignalementService};
use voirie::storage::{NewSignalement, SignalementFilter, Statut, Store, StoreConfig};

/// Antananarivo city centre
const CENTER: (f64, f64) = (-18.8792, 47.5079);

/// Spread `count` reports over roughly 20 km around the centre
fn populate(store: &Store, count: usize) {
    for i in 0..count {
        let dlat = ((i * 37) % 200) as f64 / 1000.0 - 0.1;
        let dlng = ((i * 53) % 200) as f64 / 1000.0 - 0.1;
        let status = match i % 4 {
            0 => Statut::Nouveau,
            1 => Statut::EnCours,
            2 => Statut::Termine,
            _ => Statut::Annule,
        };
        store
            .insert_signalement(
                &NewSignalement {
                    latitude: CENTER.0 + dlat,
                    longitude: CENTER.1 + dlng,
                    description: format!("Nid de poule #{}", i),
                    status: Some(status),
                    surface: Some(1.0 + (i % 10) as f64),
                    niveau: Some((i % 10 + 1) as u8),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
    }
}

fn service(store: &Store) -> SignalementService {
    let budget = BudgetService::new(store.clone(), 10_000.0);
    let notifier = Notifier::new(store.clone(), None);
    SignalementService::new(store.clone(), budget, notifier)
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.throughput(Throughput::Elements(1));

    group.bench_function("insert_signalement_file", |b| {
        let dir = tempdir().unwrap();
        let store = Store::open(&StoreConfig::new(dir.path().join("bench.db"))).unwrap();
        let new = NewSignalement {
            latitude: CENTER.0,
            longitude: CENTER.1,
            description: "Chaussée effondrée".to_string(),
            ..Default::default()
        };

        b.iter(|| store.insert_signalement(black_box(&new), None).unwrap());
    });

    group.finish();
}

fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("list");

    for size in [100, 1000, 10000] {
        let store = Store::open_in_memory().unwrap();
        populate(&store, size);

        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("list_all_{}", size), |b| {
            let filter = SignalementFilter::new();
            b.iter(|| store.list_signalements(black_box(&filter)).unwrap())
        });

        group.bench_function(format!("list_by_status_{}", size), |b| {
            let filter = SignalementFilter::new().status(Statut::EnCours);
            b.iter(|| store.list_signalements(black_box(&filter)).unwrap())
        });

        group.bench_function(format!("search_{}", size), |b| {
            let filter = SignalementFilter::new().search("#42");
            b.iter(|| store.list_signalements(black_box(&filter)).unwrap())
        });
    }

    group.finish();
}

fn bench_location(c: &mut Criterion) {
    let mut group = c.benchmark_group("location");

    group.bench_function("haversine", |b| {
        b.iter(|| haversine_km(black_box(CENTER.0), black_box(CENTER.1), -18.91, 47.52))
    });

    for size in [1000, 10000] {
        let store = Store::open_in_memory().unwrap();
        populate(&store, size);
        let signalements = service(&store);

        for radius in [1.0, 5.0] {
            group.bench_function(format!("find_by_location_{}_{}km", size, radius), |b| {
                b.iter(|| {
                    signalements
                        .find_by_location(black_box(CENTER.0), black_box(CENTER.1), Some(radius))
                        .unwrap()
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_list, bench_location);
criterion_main!(benches);
