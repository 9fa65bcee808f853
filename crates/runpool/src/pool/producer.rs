//! Lazy, single-use sources of pool items

use std::fmt;

use super::item::PoolItem;
use crate::error::PoolError;

/// Items yielded by a producer; an `Err` aborts the draining generator pool
pub type ItemStream = Box<dyn Iterator<Item = anyhow::Result<PoolItem>> + Send>;

type Factory = Box<dyn FnOnce() -> ItemStream + Send>;

enum Source {
    /// Not invoked yet
    Factory(Factory),
    /// Invoked, items left to pull
    Stream(ItemStream),
    /// Drained or failed
    Exhausted,
}

/// A lazy, finite, non-restartable sequence of pool items
///
/// The factory is invoked on the first pull, at most once. Items are pulled
/// one at a time and never re-pulled. After the stream ends or yields an
/// error the producer is exhausted for good.
///
/// # Example
///
/// ```
/// use runpool::{CallbackRun, PoolItem, Producer};
///
/// let mut producer = Producer::new(|| {
///     (0..3).map(|_| Ok(PoolItem::from(CallbackRun::new(|| Ok(true)))))
/// });
///
/// assert_eq!(producer.by_ref().count(), 3);
/// assert!(producer.is_exhausted());
/// ```
pub struct Producer {
    source: Source,
    pulled: usize,
}

impl Producer {
    /// Create a producer from a factory returning fallible items
    pub fn new<F, I>(factory: F) -> Self
    where
        F: FnOnce() -> I + Send + 'static,
        I: IntoIterator<Item = anyhow::Result<PoolItem>> + 'static,
        I::IntoIter: Send + 'static,
    {
        Self {
            source: Source::Factory(Box::new(move || Box::new(factory().into_iter()))),
            pulled: 0,
        }
    }

    /// Create a producer over an existing fallible iterator
    pub fn from_results<I>(items: I) -> Self
    where
        I: IntoIterator<Item = anyhow::Result<PoolItem>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            source: Source::Stream(Box::new(items.into_iter())),
            pulled: 0,
        }
    }

    /// Create a producer over infallible items
    pub fn from_items<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Into<PoolItem> + 'static,
    {
        Self::from_results(items.into_iter().map(|item| Ok(item.into())))
    }

    /// Pull the next item
    ///
    /// Producer errors are returned as [`PoolError::Producer`].
    pub fn next_item(&mut self) -> Option<Result<PoolItem, PoolError>> {
        if let Source::Factory(_) = self.source {
            if let Source::Factory(factory) = std::mem::replace(&mut self.source, Source::Exhausted)
            {
                self.source = Source::Stream(factory());
            }
        }

        let Source::Stream(stream) = &mut self.source else {
            return None;
        };

        match stream.next() {
            Some(Ok(item)) => {
                self.pulled += 1;
                Some(Ok(item))
            }
            Some(Err(e)) => {
                self.source = Source::Exhausted;
                Some(Err(PoolError::Producer(e)))
            }
            None => {
                self.source = Source::Exhausted;
                None
            }
        }
    }

    /// Number of items pulled so far
    pub fn pulled(&self) -> usize {
        self.pulled
    }

    /// Whether the factory has been invoked
    pub fn is_invoked(&self) -> bool {
        !matches!(self.source, Source::Factory(_))
    }

    /// Whether no further items will be produced
    pub fn is_exhausted(&self) -> bool {
        matches!(self.source, Source::Exhausted)
    }
}

impl Iterator for Producer {
    type Item = Result<PoolItem, PoolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.source {
            Source::Factory(_) => "pending",
            Source::Stream(_) => "draining",
            Source::Exhausted => "exhausted",
        };
        f.debug_struct("Producer")
            .field("state", &state)
            .field("pulled", &self.pulled)
            .finish()
    }
}
