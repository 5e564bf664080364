//! Loom tests for the marking deque's owner/thief races.

use std::sync::Arc;

use region_gc::gc::{Steal, StealQueue};
use region_gc::Addr;

const QUEUE_SIZE: usize = 4;

fn addr(i: usize) -> Addr {
    Addr::new((i + 1) * 8)
}

/// A steal racing with a push sees either nothing or the pushed item.
#[test]
#[ignore = "loom test - run with cargo test --release -- --ignored loom"]
fn loom_steal_during_push() {
    loom::model(|| {
        let queue: Arc<StealQueue<QUEUE_SIZE>> = Arc::new(StealQueue::new());

        let push_thread = loom::thread::spawn({
            let queue = Arc::clone(&queue);
            move || queue.push(addr(0))
        });
        let steal_thread = loom::thread::spawn({
            let queue = Arc::clone(&queue);
            move || queue.steal()
        });

        assert!(push_thread.join().unwrap());
        match steal_thread.join().unwrap() {
            Steal::Success(item) => {
                assert_eq!(item, addr(0));
                assert!(queue.is_empty());
            }
            Steal::Empty | Steal::Retry => assert_eq!(queue.pop(), Some(addr(0))),
        }
    });
}

/// The owner popping and a thief stealing never take the same item.
#[test]
#[ignore = "loom test - run with cargo test --release -- --ignored loom"]
fn loom_pop_and_steal_take_each_item_once() {
    loom::model(|| {
        let queue: Arc<StealQueue<QUEUE_SIZE>> = Arc::new(StealQueue::new());
        assert!(queue.push(addr(0)));
        assert!(queue.push(addr(1)));

        let steal_thread = loom::thread::spawn({
            let queue = Arc::clone(&queue);
            move || match queue.steal() {
                Steal::Success(item) => Some(item),
                Steal::Empty | Steal::Retry => None,
            }
        });

        let mut taken = Vec::new();
        while let Some(item) = queue.pop() {
            taken.push(item);
        }
        if let Some(item) = steal_thread.join().unwrap() {
            taken.push(item);
        }
        while let Some(item) = queue.pop() {
            taken.push(item);
        }

        taken.sort();
        assert_eq!(taken, vec![addr(0), addr(1)]);
    });
}

/// The last item goes to exactly one of the owner and the thief.
#[test]
#[ignore = "loom test - run with cargo test --release -- --ignored loom"]
fn loom_last_item_has_one_winner() {
    loom::model(|| {
        let queue: Arc<StealQueue<QUEUE_SIZE>> = Arc::new(StealQueue::new());
        assert!(queue.push(addr(0)));

        let steal_thread = loom::thread::spawn({
            let queue = Arc::clone(&queue);
            move || queue.steal()
        });
        let popped = queue.pop();
        let stolen = steal_thread.join().unwrap();

        match (popped, stolen) {
            (Some(item), Steal::Empty | Steal::Retry) | (None, Steal::Success(item)) => {
                assert_eq!(item, addr(0));
            }
            (popped, stolen) => panic!("both or neither won: {popped:?} {stolen:?}"),
        }
        assert!(queue.is_empty());
    });
}
