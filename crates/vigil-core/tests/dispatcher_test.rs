//! Dispatcher acotado: fallo parcial, conteos agregados y cota de
//! concurrencia.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use vigil_core::{BatchOutcome, DispatchJob, ParallelDispatcher};

#[test]
fn e2e_partial_failure_keeps_siblings() {
    // Jobs [a: ok, b: falla, c: ok] con concurrencia 2.
    let jobs = vec![DispatchJob::new("a", false, ()),
                    DispatchJob::new("b", true, ()),
                    DispatchJob::new("c", false, ())];
    let dispatcher = ParallelDispatcher::new(2);
    let outcome = dispatcher.run(jobs,
                                 |fails: &bool| {
                                     if *fails {
                                         Err("deterministic failure".to_string())
                                     } else {
                                         Ok(1usize)
                                     }
                                 },
                                 |_result, _ctx| 1)
                            .expect("batch");

    assert_eq!(outcome, BatchOutcome { total: 2,
                                       failed: vec!["b".to_string()] });
}

#[test]
fn total_is_the_sum_of_handler_counts() {
    // El handler devuelve conteos distintos por job; total = suma exacta,
    // sin importar el orden de finalización.
    let jobs: Vec<DispatchJob<usize, usize>> =
        (0..8).map(|i| DispatchJob::new(format!("job-{i}"), i, i)).collect();
    let dispatcher = ParallelDispatcher::new(3);
    let outcome = dispatcher.run(jobs, |i: &usize| Ok::<usize, String>(*i), |result, ctx| {
                                assert_eq!(result, ctx);
                                result
                            })
                            .expect("batch");

    assert_eq!(outcome.total, (0..8).sum::<usize>());
    assert!(outcome.failed.is_empty());
}

#[test]
fn k_deterministic_failures_yield_exactly_k_labels() {
    let jobs: Vec<DispatchJob<usize, ()>> =
        (0..20).map(|i| DispatchJob::new(format!("job-{i}"), i, ())).collect();
    let dispatcher = ParallelDispatcher::new(4);
    let outcome = dispatcher.run(jobs,
                                 |i: &usize| {
                                     if i % 5 == 0 {
                                         Err(format!("job {i} refused"))
                                     } else {
                                         Ok(())
                                     }
                                 },
                                 |_r, _c| 1)
                            .expect("batch");

    assert_eq!(outcome.total, 16);
    let mut failed = outcome.failed.clone();
    failed.sort();
    assert_eq!(failed, vec!["job-0", "job-10", "job-15", "job-5"]);
}

#[test]
fn in_flight_jobs_never_exceed_the_bound() {
    const LIMIT: usize = 3;
    let in_flight = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    let jobs: Vec<DispatchJob<(), ()>> =
        (0..24).map(|i| DispatchJob::new(format!("job-{i}"), (), ())).collect();
    let dispatcher = ParallelDispatcher::new(LIMIT);
    let outcome = dispatcher.run(jobs,
                                 |_: &()| {
                                     let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                                     peak.fetch_max(current, Ordering::SeqCst);
                                     std::thread::sleep(Duration::from_millis(5));
                                     in_flight.fetch_sub(1, Ordering::SeqCst);
                                     Ok::<(), String>(())
                                 },
                                 |_r, _c| 1)
                            .expect("batch");

    assert_eq!(outcome.total, 24);
    assert!(peak.load(Ordering::SeqCst) <= LIMIT,
            "peak {} > limit {}",
            peak.load(Ordering::SeqCst),
            LIMIT);
}

#[test]
fn handler_failures_do_not_abort_the_batch() {
    // El handler persiste; si decide no almacenar nada devuelve 0 y el batch
    // continúa (la contención por unidad es responsabilidad del handler).
    let jobs: Vec<DispatchJob<usize, ()>> =
        (0..4).map(|i| DispatchJob::new(format!("job-{i}"), i, ())).collect();
    let dispatcher = ParallelDispatcher::new(2);
    let outcome = dispatcher.run(jobs, |i: &usize| Ok::<usize, String>(*i), |result, _ctx| {
                                if result % 2 == 0 {
                                    0
                                } else {
                                    1
                                }
                            })
                            .expect("batch");
    assert_eq!(outcome.total, 2);
    assert!(outcome.failed.is_empty());
}
