// Ordered, best-effort fan-out list.
//
// Subscribers are kept in insertion order and each gets every broadcast item
// in that order. Delivery is fire-and-forget: a subscriber whose delivery
// fails is logged and removed, and the remaining subscribers still receive
// the item. Ids are never reused within one list.

use std::sync::mpsc;

/// Handle returned by `Subscribers::add`, used to remove the entry later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

/// Something that can receive broadcast items.
pub trait Subscriber<T>: Send {
    /// Deliver one item. An error drops this subscriber from its list.
    fn deliver(&mut self, item: &T) -> Result<(), String>;
}

impl<T: Clone + Send> Subscriber<T> for mpsc::Sender<T> {
    fn deliver(&mut self, item: &T) -> Result<(), String> {
        self.send(item.clone())
            .map_err(|_| "receiver disconnected".to_string())
    }
}

pub struct Subscribers<T> {
    next_id: u64,
    entries: Vec<(SubscriberId, Box<dyn Subscriber<T>>)>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Subscribers {
            next_id: 1,
            entries: Vec::new(),
        }
    }
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subscriber: Box<dyn Subscriber<T>>) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, subscriber));
        tracing::debug!("added subscriber {}, total {}", id.0, self.entries.len());
        id
    }

    /// Remove a subscriber. Returns false if it was not (or no longer) present.
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        before != self.entries.len()
    }

    /// Whether `id` is still registered. Subscribers dropped by `broadcast`
    /// are gone.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }

    /// Deliver `item` to every subscriber in insertion order. Returns the
    /// number of successful deliveries.
    pub fn broadcast(&mut self, item: &T) -> usize {
        let mut delivered = 0;
        self.entries.retain_mut(|(id, subscriber)| match subscriber.deliver(item) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(e) => {
                tracing::warn!("dropping subscriber {}: {e}", id.0);
                false
            }
        });
        delivered
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Appends `(name, item)` to a shared log.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<(&'static str, u32)>>>,
    }

    impl Subscriber<u32> for Recorder {
        fn deliver(&mut self, item: &u32) -> Result<(), String> {
            self.log.lock().unwrap().push((self.name, *item));
            Ok(())
        }
    }

    struct Broken;

    impl Subscriber<u32> for Broken {
        fn deliver(&mut self, _item: &u32) -> Result<(), String> {
            Err("socket closed".into())
        }
    }

    #[test]
    fn broadcast_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Subscribers::new();
        for name in ["a", "b", "c"] {
            subs.add(Box::new(Recorder {
                name,
                log: Arc::clone(&log),
            }));
        }
        assert_eq!(subs.broadcast(&7), 3);
        assert_eq!(*log.lock().unwrap(), vec![("a", 7), ("b", 7), ("c", 7)]);
    }

    #[test]
    fn failing_subscriber_is_dropped_without_blocking_others() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Subscribers::new();
        let broken = subs.add(Box::new(Broken));
        let ok = subs.add(Box::new(Recorder {
            name: "ok",
            log: Arc::clone(&log),
        }));
        assert_eq!(subs.broadcast(&1), 1);
        assert_eq!(subs.len(), 1);
        assert!(!subs.contains(broken));
        assert!(subs.contains(ok));
        assert_eq!(subs.broadcast(&2), 1);
        assert_eq!(*log.lock().unwrap(), vec![("ok", 1), ("ok", 2)]);
    }

    #[test]
    fn remove_and_channel_subscribers() {
        let mut subs: Subscribers<u32> = Subscribers::new();
        let (tx, rx) = mpsc::channel();
        let id = subs.add(Box::new(tx));
        assert_eq!(subs.broadcast(&5), 1);
        assert_eq!(rx.try_recv(), Ok(5));
        assert!(subs.remove(id));
        assert!(!subs.remove(id));
        assert!(subs.is_empty());

        // A dropped receiver makes the sender fail and get removed.
        let (tx, rx) = mpsc::channel::<u32>();
        subs.add(Box::new(tx));
        drop(rx);
        assert_eq!(subs.broadcast(&6), 0);
        assert!(subs.is_empty());
    }
}
