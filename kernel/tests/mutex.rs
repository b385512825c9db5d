mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use common::{HostWaitQueue, current_thread, wait_until};
use kestrel::{KernelError, Mutex, RawMutex, Timeout, WaitQueue};

#[test]
fn infinite_acquire_waits_for_release() {
    let m = Arc::new(RawMutex::<HostWaitQueue>::init());
    m.acquire(Timeout::Infinite).unwrap();

    let acquired = Arc::new(AtomicBool::new(false));
    let waiter = {
        let (m, acquired) = (m.clone(), acquired.clone());
        thread::spawn(move || {
            m.acquire(Timeout::Infinite).unwrap();
            acquired.store(true, Ordering::SeqCst);
            assert!(m.is_held_by_caller());
            m.release();
        })
    };

    wait_until("waiter to block", || m.queue().len() == 1);
    thread::sleep(Duration::from_millis(20));
    assert!(!acquired.load(Ordering::SeqCst));
    assert!(m.is_held_by_caller());

    m.release();
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
    assert_eq!(m.holder(), None);
}

#[test]
fn release_hands_the_mutex_to_the_waiter() {
    let m = Arc::new(RawMutex::<HostWaitQueue>::init());
    m.acquire(Timeout::Infinite).unwrap();

    let (tx, rx) = mpsc::channel();
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let waiter = {
        let m = m.clone();
        thread::spawn(move || {
            tx.send(current_thread()).unwrap();
            m.acquire(Timeout::Infinite).unwrap();
            go_rx.recv().unwrap();
            m.release();
        })
    };
    let waiter_id = rx.recv().unwrap();
    wait_until("waiter to block", || m.queue().len() == 1);

    m.release();
    // Ownership moved at release time, whether or not the waiter has run.
    assert_eq!(m.holder(), Some(waiter_id));
    assert!(!m.is_held_by_caller());
    assert_eq!(m.acquire(Timeout::ZERO), Err(KernelError::TimedOut));

    go_tx.send(()).unwrap();
    waiter.join().unwrap();
    assert_eq!(m.holder(), None);
}

#[test]
fn zero_timeout_on_held_mutex_fails_immediately() {
    let m = Arc::new(RawMutex::<HostWaitQueue>::init());
    m.acquire(Timeout::Infinite).unwrap();

    let result = {
        let m = m.clone();
        thread::spawn(move || {
            let r = m.acquire(Timeout::ZERO);
            (r, m.is_held_by_caller())
        })
        .join()
        .unwrap()
    };

    assert_eq!(result, (Err(KernelError::TimedOut), false));
    assert_eq!(m.queue().blocked_total(), 0);
    assert!(m.is_held_by_caller());
    m.release();
}

#[test]
fn timed_acquire_expires_and_leaves_no_trace() {
    let m = Arc::new(RawMutex::<HostWaitQueue>::init());
    m.acquire(Timeout::Infinite).unwrap();
    let me = current_thread();

    let (result, waited) = {
        let m = m.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let r = m.acquire(Timeout::from_millis(30));
            (r, start.elapsed())
        })
        .join()
        .unwrap()
    };

    assert_eq!(result, Err(KernelError::TimedOut));
    assert!(waited >= Duration::from_millis(30));
    assert_eq!(m.queue().len(), 0);
    assert_eq!(m.holder(), Some(me));

    // Nobody is waiting any more, so release frees the mutex outright.
    m.release();
    assert_eq!(m.holder(), None);
    m.acquire(Timeout::ZERO).unwrap();
    m.release();
}

#[test]
fn timed_acquire_succeeds_when_released_in_time() {
    let m = Arc::new(RawMutex::<HostWaitQueue>::init());
    m.acquire(Timeout::Infinite).unwrap();

    let waiter = {
        let m = m.clone();
        thread::spawn(move || {
            let r = m.acquire(Timeout::from_millis(5_000));
            let held = m.is_held_by_caller();
            if r.is_ok() {
                m.release();
            }
            (r, held)
        })
    };
    wait_until("waiter to block", || m.queue().len() == 1);
    m.release();

    assert_eq!(waiter.join().unwrap(), (Ok(()), true));
}

#[test]
fn data_mutex_serializes_increments() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let m = Arc::new(Mutex::new(0usize, HostWaitQueue::default()));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let m = m.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let mut g = m.lock();
                    let v = *g;
                    thread::yield_now();
                    *g = v + 1;
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(*m.lock(), THREADS * ROUNDS);
    assert!(!m.is_held_by_caller());
}

#[test]
fn lock_timeout_reports_timed_out() {
    let m = Arc::new(Mutex::new(Vec::<u32>::new(), HostWaitQueue::default()));
    let guard = m.lock();

    let r = {
        let m = m.clone();
        thread::spawn(move || m.lock_timeout(Timeout::from_millis(10)).map(|_| ()))
            .join()
            .unwrap()
    };
    assert_eq!(r, Err(KernelError::TimedOut));
    assert_eq!(KernelError::TimedOut.status(), -13);

    guard.release();
    m.try_lock().expect("free after release").push(1);
    assert_eq!(*m.lock(), [1]);
}

#[test]
#[should_panic(expected = "does not hold it")]
fn release_from_another_thread_is_fatal() {
    // Leaked: a mutex held by another thread must not be destroyed either.
    let m = common::leak(RawMutex::<HostWaitQueue>::init());
    thread::spawn(move || m.acquire(Timeout::Infinite).unwrap())
        .join()
        .unwrap();
    m.release();
}
