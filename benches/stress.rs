use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use fleetbook::auth::RequestContext;
use fleetbook::clock::ManualClock;
use fleetbook::config::Policy;
use fleetbook::engine::Engine;
use fleetbook::model::*;

const HOUR: i64 = 3_600_000; // 1 hour in ms
const DAY1: i64 = 1_767_225_600_000; // 2026-01-01T00:00:00Z

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn new_booking(vehicle_id: VehicleId, start: Ms, end: Ms) -> NewBooking {
    NewBooking {
        id: Ulid::new(),
        vehicle_id,
        client_id: Ulid::new(),
        span: Span::new(start, end),
        terms: BookingTerms {
            total_amount: 10_000,
            deposit_required: false,
            deposit_amount: None,
            deposit_source: None,
        },
    }
}

async fn setup(n_vehicles: usize) -> (Arc<Engine>, Arc<ManualClock>, RequestContext, Vec<VehicleId>) {
    let clock = Arc::new(ManualClock::new(DAY1));
    let engine = Arc::new(Engine::in_memory(Policy::default(), clock.clone()));
    let ctx = RequestContext::new(Ulid::new(), Ulid::new(), "bench");
    engine
        .configure_agency(AgencyConfig {
            agency_id: ctx.agency_id,
            preparation_minutes: Some(30),
            capacity: None,
        })
        .await
        .unwrap();
    let mut vehicles = Vec::with_capacity(n_vehicles);
    for _ in 0..n_vehicles {
        let id = Ulid::new();
        engine
            .register_vehicle(Vehicle {
                id,
                agency_id: ctx.agency_id,
                status: VehicleStatus::Available,
            })
            .await
            .unwrap();
        vehicles.push(id);
    }
    println!("  registered {n_vehicles} vehicles");
    (engine, clock, ctx, vehicles)
}

async fn phase1_sequential(engine: &Engine, ctx: &RequestContext, vehicle_id: VehicleId) {
    let n = 5_000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        // Two-hour slots leave room for the 30 minute preparation buffer.
        let s = DAY1 + (i as i64) * 2 * HOUR;
        let t = Instant::now();
        engine
            .create_booking(ctx, new_booking(vehicle_id, s, s + HOUR), true)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create+submit latency", &mut latencies);
}

async fn phase2_concurrent(engine: Arc<Engine>, ctx: RequestContext, vehicles: &[VehicleId]) {
    let n_tasks = 16;
    let n_per_task = 500;

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        let ctx = ctx.clone();
        let vehicle_id = vehicles[task % vehicles.len()];
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(n_per_task);
            let mut conflicts = 0usize;
            for i in 0..n_per_task {
                // Tasks sharing a vehicle compete for the same slots.
                let s = DAY1 + 400 * 24 * HOUR + (i as i64) * 2 * HOUR;
                let t = Instant::now();
                if engine
                    .create_booking(&ctx, new_booking(vehicle_id, s, s + HOUR), true)
                    .await
                    .is_err()
                {
                    conflicts += 1;
                }
                latencies.push(t.elapsed());
            }
            (latencies, conflicts)
        }));
    }

    let mut all_latencies = Vec::new();
    let mut total_conflicts = 0;
    for h in handles {
        let (latencies, conflicts) = h.await.unwrap();
        all_latencies.extend(latencies);
        total_conflicts += conflicts;
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {total} attempts across {n_tasks} tasks in {:.2}s = {:.0} ops/sec ({total_conflicts} conflicts)",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    print_latency("contended create latency", &mut all_latencies);
}

async fn phase3_queries(engine: &Engine, vehicle_id: VehicleId) {
    let n = 2_000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let s = DAY1 + (i as i64 % 5_000) * 2 * HOUR;
        let t = Instant::now();
        engine
            .free_windows(vehicle_id, Span::new(s, s + 7 * 24 * HOUR), Some(HOUR))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("free windows (1 week)", &mut latencies);
}

async fn phase4_sweep(engine: &Engine, clock: &ManualClock) {
    // Every pending booking is long past its no-show deadline.
    clock.set(DAY1 + 2 * 366 * 24 * HOUR);
    let t = Instant::now();
    let reports = engine.sweep(engine.now_ms()).await;
    println!(
        "  swept {} bookings in {:.2}ms",
        reports.len(),
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== fleetbook stress benchmark ===\n");

    println!("[setup]");
    let (engine, clock, ctx, vehicles) = setup(8).await;

    println!("\n[phase 1] sequential create+submit throughput");
    phase1_sequential(&engine, &ctx, vehicles[0]).await;

    println!("\n[phase 2] concurrent create+submit (2 tasks per vehicle)");
    phase2_concurrent(engine.clone(), ctx.clone(), &vehicles).await;

    println!("\n[phase 3] availability queries");
    phase3_queries(&engine, vehicles[0]).await;

    println!("\n[phase 4] lifecycle sweep");
    phase4_sweep(&engine, &clock).await;

    println!("\n=== benchmark complete ===");
}
