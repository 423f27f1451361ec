use parking_lot::Mutex;

/// Named 64-bit tally guarded by a mutex
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: Mutex<u64>,
}

impl Counter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            value: Mutex::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn increment(&self) {
        *self.value.lock() += 1;
    }

    /// Decrement the value, stopping at zero
    pub fn decrement(&self) {
        let mut value = self.value.lock();
        *value = value.saturating_sub(1);
    }

    /// Current value
    pub fn count(&self) -> u64 {
        *self.value.lock()
    }

    pub fn reset(&self) {
        *self.value.lock() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_and_decrement() {
        let counter = Counter::new("test");

        counter.increment();
        counter.increment();
        counter.increment();
        assert_eq!(counter.count(), 3);

        counter.decrement();
        assert_eq!(counter.count(), 2);
        assert_eq!(counter.name(), "test");
    }

    #[test]
    fn test_decrement_stops_at_zero() {
        let counter = Counter::new("gauge");
        counter.decrement();
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_reset() {
        let counter = Counter::new("test");
        counter.increment();
        counter.reset();
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let counter = Arc::new(Counter::new("concurrent"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.count(), 8000);
    }
}
