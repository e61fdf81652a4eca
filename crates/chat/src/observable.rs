use std::sync::Arc;

use tokio::sync::watch;

/// A value that notifies subscribers whenever it changes.
///
/// Clones share the same underlying value. Setting an equal value is a no-op
/// and wakes nobody.
#[derive(Debug)]
pub struct Observable<T> {
    sender: Arc<watch::Sender<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + PartialEq,
{
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Returns true when the stored value changed.
    pub fn set(&self, value: T) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        })
    }

    /// Mutates in place; `modify` reports whether anything changed.
    pub fn update(&self, modify: impl FnOnce(&mut T) -> bool) -> bool {
        self.sender.send_if_modified(modify)
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    pub fn view(&self) -> ObservableView<T> {
        ObservableView {
            inner: self.clone(),
        }
    }
}

/// Read-only handle handed to presentation code.
#[derive(Debug)]
pub struct ObservableView<T> {
    inner: Observable<T>,
}

impl<T> Clone for ObservableView<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ObservableView<T>
where
    T: Clone + PartialEq,
{
    pub fn get(&self) -> T {
        self.inner.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.inner.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_only_real_changes() {
        let flag = Observable::new(false);
        assert!(!flag.set(false));
        assert!(flag.set(true));
        assert!(flag.get());
    }

    #[tokio::test]
    async fn subscribers_see_changes_through_clones() {
        let value = Observable::new(1_u32);
        let mut receiver = value.view().subscribe();

        let writer = value.clone();
        writer.set(2);

        receiver.changed().await.expect("sender alive");
        assert_eq!(*receiver.borrow_and_update(), 2);

        writer.set(2);
        assert!(!receiver.has_changed().expect("sender alive"));
    }

    #[test]
    fn update_mutates_in_place() {
        let items = Observable::new(vec![1, 2]);
        assert!(items.update(|items| {
            items.push(3);
            true
        }));
        assert_eq!(items.get(), vec![1, 2, 3]);
    }
}
