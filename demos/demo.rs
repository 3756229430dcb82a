use memque::{MsgQueue, SharedMemory};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

fn main() {
    println!("memque demo");
    println!("===========\n");

    let region_size = 4 << 20;
    let shm = SharedMemory::anonymous(region_size).expect("failed to map region");
    let que = MsgQueue::new(&shm).expect("failed to attach");
    assert!(que.init());
    println!("region:      {} KiB anonymous shared mapping", region_size / 1024);

    // Single-threaded round trip
    assert!(que.enq(b"hello, shared memory"));
    let mut buf = Vec::new();
    assert!(que.deq(&mut buf));
    println!("round trip:  {:?}", String::from_utf8_lossy(&buf));

    // Vectored enqueue
    assert!(que.enqv(&[b"head", b"+", b"tail"]));
    assert!(que.deq(&mut buf));
    println!("enqv:        {:?}", String::from_utf8_lossy(&buf));

    // Multi-threaded ping-pong
    let nproducers = 2u64;
    let nconsumers = 2;
    let per_producer = 100_000u64;
    let expected = nproducers * per_producer;

    println!("\nthroughput ({nproducers} producers x {per_producer} msgs, {nconsumers} consumers):");
    let done = AtomicBool::new(false);
    let start = Instant::now();

    let consumed: u64 = std::thread::scope(|s| {
        let producers: Vec<_> = (0..nproducers)
            .map(|p| {
                let que = &que;
                s.spawn(move || {
                    let mut sent = 0u64;
                    for seq in 0..per_producer {
                        let payload = (p * per_producer + seq).to_le_bytes();
                        while !que.enq(&payload) {
                            std::thread::yield_now();
                        }
                        sent += 1;
                    }
                    sent
                })
            })
            .collect();

        let consumers: Vec<_> = (0..nconsumers)
            .map(|_| {
                let que = &que;
                let done = &done;
                s.spawn(move || {
                    let mut got = 0u64;
                    let mut buf = Vec::new();
                    loop {
                        if que.deq(&mut buf) {
                            got += 1;
                        } else if done.load(Ordering::Acquire) && !que.deq(&mut buf) {
                            break;
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                    got
                })
            })
            .collect();

        for h in producers {
            h.join().unwrap();
        }
        done.store(true, Ordering::Release);

        consumers.into_iter().map(|h| h.join().unwrap()).sum()
    });

    let elapsed = start.elapsed();
    println!(
        "  {} messages in {:.3}s ({:.0} msg/s)",
        consumed,
        elapsed.as_secs_f64(),
        consumed as f64 / elapsed.as_secs_f64()
    );
    assert_eq!(consumed, expected);
    assert!(que.is_empty());
    println!("  overflows: {}", que.overflowed_count());

    #[cfg(feature = "stats")]
    println!("\nstats: {:#?}", memque::stats::snapshot());
}
