use crate::buffer::Buffer;
use crate::image::Image;

enum Deferred {
    Buffer(Buffer),
    Image(Image),
    Callback(Box<dyn FnOnce()>),
}

/// Resources kept alive until the frame that used them is known to be finished.
///
/// Flushed in reverse insertion order, so dependents pushed after what they
/// depend on go first.
#[derive(Default)]
pub struct DeletionQueue {
    entries: Vec<Deferred>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_buffer(&mut self, buffer: Buffer) {
        self.entries.push(Deferred::Buffer(buffer));
    }

    pub fn push_image(&mut self, image: Image) {
        self.entries.push(Deferred::Image(image));
    }

    pub fn push_fn(&mut self, f: impl FnOnce() + 'static) {
        self.entries.push(Deferred::Callback(Box::new(f)));
    }

    /// Release everything, newest first. Returns how many entries were released.
    pub fn flush(&mut self) -> usize {
        let count = self.entries.len();
        while let Some(entry) = self.entries.pop() {
            match entry {
                Deferred::Buffer(buffer) => drop(buffer),
                Deferred::Image(image) => drop(image),
                Deferred::Callback(f) => f(),
            }
        }
        count
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn flushes_newest_first() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeletionQueue::new();
        for id in 0..3 {
            let order = order.clone();
            queue.push_fn(move || order.borrow_mut().push(id));
        }

        assert_eq!(queue.flush(), 3);
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn flushing_an_empty_queue_does_nothing() {
        let mut queue = DeletionQueue::new();
        assert_eq!(queue.flush(), 0);
    }

    #[test]
    fn drop_flushes_pending_entries() {
        let released = Rc::new(RefCell::new(false));
        {
            let mut queue = DeletionQueue::new();
            let released = released.clone();
            queue.push_fn(move || *released.borrow_mut() = true);
        }
        assert!(*released.borrow());
    }
}
