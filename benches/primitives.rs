use coop_threads::sync::{Mutex, RecursiveLock, Semaphore};
use coop_threads::{genwait, scheduler};
use std::time::Instant;

fn main() {
    println!("\n=== coop-threads primitive benchmarks ===\n");

    scheduler::init().expect("scheduler init");

    println!("Benchmark 1: Thread creation");
    println!("----------------------------");
    let start = Instant::now();
    let mut ids = Vec::new();
    for _ in 0..16 {
        ids.push(scheduler::spawn(|| 0).unwrap());
    }
    let creation = start.elapsed();
    println!("Created 16 threads in: {:?}", creation);
    println!("Average per thread: {:?}", creation / 16);

    println!("\nBenchmark 2: Uncontended mutex lock/unlock");
    println!("------------------------------------------");
    let m = Mutex::normal();
    let start = Instant::now();
    for _ in 0..100_000 {
        m.lock().unwrap();
        m.unlock().unwrap();
    }
    let locked = start.elapsed();
    println!("100k lock/unlock pairs in: {:?}", locked);
    println!("Average per pair: {:?}", locked / 100_000);

    println!("\nBenchmark 3: Recursive lock nesting");
    println!("-----------------------------------");
    let r = RecursiveLock::new();
    let start = Instant::now();
    for _ in 0..10_000 {
        for _ in 0..8 {
            r.lock().unwrap();
        }
        for _ in 0..8 {
            r.unlock().unwrap();
        }
    }
    let nested = start.elapsed();
    println!("10k x 8-deep nests in: {:?}", nested);

    println!("\nBenchmark 4: Semaphore signal/try_wait");
    println!("--------------------------------------");
    let sem = Semaphore::new(0);
    let start = Instant::now();
    for _ in 0..100_000 {
        sem.signal();
        sem.try_wait().unwrap();
    }
    let semtime = start.elapsed();
    println!("100k signal/try_wait pairs in: {:?}", semtime);

    println!("\nBenchmark 5: Wake with empty wait table");
    println!("---------------------------------------");
    let start = Instant::now();
    for i in 0..100_000usize {
        genwait::wake_all(0x1000 + (i & 0xFF));
    }
    let wake = start.elapsed();
    println!("100k no-op wakes in: {:?}", wake);

    println!("\nDone. {} threads alive.", scheduler::stats().threads_alive);
}
