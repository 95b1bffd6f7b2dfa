//! A minimal synchronous observer registry. `Blockchain` and
//! `PartialLightChainSynchronizer` both fire their events ("head-changed",
//! "complete", ...) through one of these rather than ad hoc channels -
//! listeners run synchronously, in registration order, inside the task
//! that raised the event (spec.md §5 "Ordering").

pub type Listener<'n, E> = Box<dyn Fn(&E) + Send + 'n>;

pub struct Notifier<'n, E> {
    listeners: Vec<Listener<'n, E>>,
}

impl<'n, E> Notifier<'n, E> {
    pub fn new() -> Self {
        Notifier { listeners: Vec::new() }
    }

    pub fn register<L: Fn(&E) + Send + 'n>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener));
    }

    pub fn notify(&self, event: E) {
        for listener in &self.listeners {
            listener(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<'n, E> Default for Notifier<'n, E> {
    fn default() -> Self {
        Notifier::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum Event {
        Ping,
    }

    #[test]
    fn it_notifies_all_registered_listeners() {
        let mut notifier: Notifier<Event> = Notifier::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = count.clone();
        notifier.register(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = count.clone();
        notifier.register(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        notifier.notify(Event::Ping);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
