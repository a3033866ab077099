use anyhow::Result;
use futures::prelude::*;
use kube::runtime::watcher;
use std::pin::Pin;

/// A change observed on a watch.
#[derive(Clone, Debug, PartialEq)]
pub enum Change<T> {
    /// A resource was created or updated.
    Applied(T),
    Deleted(T),
    /// The watch was (re)started with a fresh listing. Any previously observed resource that is
    /// not listed must be assumed deleted.
    Restarted(Vec<T>),
}

/// A stream of changes for a single resource kind.
///
/// Every stream begins with a `Restarted` listing. Errors are surfaced as items and do not end
/// the stream; it is up to the caller to end the subscription and re-open it.
pub type ChangeStream<T> = Pin<Box<dyn Stream<Item = Result<Change<T>>> + Send + 'static>>;

// === impl Change ===

impl<T> Change<T> {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted(_))
    }
}

impl<T> From<watcher::Event<T>> for Change<T> {
    fn from(event: watcher::Event<T>) -> Self {
        match event {
            watcher::Event::Applied(r) => Self::Applied(r),
            watcher::Event::Deleted(r) => Self::Deleted(r),
            watcher::Event::Restarted(rs) => Self::Restarted(rs),
        }
    }
}

/// Translates watcher events into a change stream.
pub fn changes<T, S>(events: S) -> ChangeStream<T>
where
    T: Send + 'static,
    S: Stream<Item = watcher::Result<watcher::Event<T>>> + Send + 'static,
{
    events
        .map(|ev| ev.map(Change::<T>::from).map_err(anyhow::Error::from))
        .boxed()
}
