//! Channel ordering and delivery across coroutines and OS threads

use lume_runtime::{Channel, Function, Options, Runtime, Value};
use std::collections::HashSet;

fn runtime() -> Runtime {
    Runtime::with_options(Options::default())
}

#[test]
fn test_fifo_between_interleaved_coroutines() {
    let rt = runtime();
    let ch = Channel::unbounded();

    let tx = ch.clone();
    let producer = rt.spawn(Function::native(rt.globals(), move |thread, _| {
        for i in 1..=3 {
            tx.send(thread, Value::from(i * 10))?;
            tx.send(thread, Value::from(i * 10 + 1))?;
            thread.yield_values(vec![])?;
        }
        tx.close();
        Ok(vec![])
    }));

    let rx = ch.clone();
    let consumer = rt.spawn(Function::native(rt.globals(), move |thread, _| {
        while let Some(v) = rx.receive(thread)? {
            thread.yield_values(vec![v])?;
        }
        Ok(vec![Value::from("drained")])
    }));

    let mut received = Vec::new();
    for _ in 0..3 {
        rt.resume(&producer, vec![]).unwrap();
        received.extend(rt.resume(&consumer, vec![]).unwrap());
        received.extend(rt.resume(&consumer, vec![]).unwrap());
    }
    rt.resume(&producer, vec![]).unwrap();
    assert_eq!(
        rt.resume(&consumer, vec![]).unwrap(),
        vec![Value::from("drained")]
    );

    let expected: Vec<Value> = [10, 11, 20, 21, 30, 31].into_iter().map(Value::from).collect();
    assert_eq!(received, expected);
}

#[test]
fn test_per_sender_order_under_concurrency() {
    let rt = runtime();
    let ch = Channel::unbounded();
    let per_sender = 200;

    let senders: Vec<_> = (0..2)
        .map(|sender| {
            let ch = ch.clone();
            let thread = rt.main_thread().clone();
            std::thread::spawn(move || {
                for i in 0..per_sender {
                    ch.send(&thread, Value::from(sender * 1000 + i)).unwrap();
                }
            })
        })
        .collect();
    for s in senders {
        s.join().unwrap();
    }
    ch.close();

    let mut last = [-1i64; 2];
    let mut count = 0;
    while let Some(v) = ch.receive(rt.main_thread()).unwrap() {
        let n = v.as_number().truncate();
        let sender = (n / 1000) as usize;
        let seq = n % 1000;
        assert!(seq > last[sender], "sender {} reordered: {} after {}", sender, seq, last[sender]);
        last[sender] = seq;
        count += 1;
    }
    assert_eq!(count, 2 * per_sender);
}

#[test]
fn test_each_value_delivered_once() {
    let rt = runtime();
    let ch = Channel::bounded(4);
    let total = 300;

    let receivers: Vec<_> = (0..3)
        .map(|_| {
            let ch = ch.clone();
            let thread = rt.main_thread().clone();
            std::thread::spawn(move || {
                let mut got = Vec::new();
                while let Some(v) = ch.receive(&thread).unwrap() {
                    got.push(v.as_number().truncate());
                }
                got
            })
        })
        .collect();

    for i in 0..total {
        ch.send(rt.main_thread(), Value::from(i)).unwrap();
    }
    ch.close();

    let mut seen = HashSet::new();
    for r in receivers {
        for n in r.join().unwrap() {
            assert!(seen.insert(n), "value {} delivered twice", n);
        }
    }
    assert_eq!(seen.len(), total as usize);
}

#[test]
fn test_channel_values_are_shared_handles() {
    let rt = runtime();
    let outer = Channel::unbounded();
    let inner = Channel::unbounded();
    outer.send(rt.main_thread(), Value::from(inner.clone())).unwrap();

    let got = outer.receive(rt.main_thread()).unwrap().unwrap();
    let got = got.as_channel().unwrap();
    assert_eq!(got, &inner);
    got.send(rt.main_thread(), Value::from("via copy")).unwrap();
    assert_eq!(
        inner.receive(rt.main_thread()).unwrap(),
        Some(Value::from("via copy"))
    );
}
