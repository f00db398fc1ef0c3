use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use crate::errors::{CellError, LoadError};

/// A value that must be fetched asynchronously and may be refreshed, with at
/// most one refresh in flight at a time.
///
/// The guard lives inside the cell so the owning aggregate can refresh
/// different cells concurrently through `&self`; each cell still rejects a
/// second refresh of itself with [`CellError::AlreadyLoading`]. Loader
/// futures are always driven to completion by their callers; the lock is
/// never held across an await point.
#[derive(Debug, Default)]
pub struct LoadableCell<T> {
    inner: Mutex<Inner<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    value: Option<T>,
    loading: bool,
}

impl<T> Default for Inner<T> {
    fn default() -> Self {
        Self {
            value: None,
            loading: false,
        }
    }
}

impl<T: Clone> LoadableCell<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_value(value: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: Some(value),
                loading: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_available(&self) -> bool {
        self.lock().value.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn can_be_initialized(&self) -> bool {
        let inner = self.lock();
        !inner.loading && inner.value.is_none()
    }

    pub fn value(&self) -> Result<T, CellError> {
        self.lock().value.clone().ok_or(CellError::Unavailable)
    }

    /// Directly store a value. Rejected while a refresh is in flight.
    pub fn set(&self, value: T) -> Result<(), CellError> {
        let mut inner = self.lock();
        if inner.loading {
            return Err(CellError::InvalidState);
        }
        inner.value = Some(value);
        Ok(())
    }

    /// Directly discard the value. Rejected while a refresh is in flight.
    pub fn unset(&self) -> Result<(), CellError> {
        let mut inner = self.lock();
        if inner.loading {
            return Err(CellError::InvalidState);
        }
        inner.value = None;
        Ok(())
    }

    /// Like [`update`](Self::update), but fails with
    /// [`CellError::AlreadyInitialized`] if a value is already present.
    pub async fn initialize<F, Fut, E>(&self, loader: F) -> Result<T, LoadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.is_available() {
            return Err(LoadError::Cell(CellError::AlreadyInitialized));
        }
        self.update(loader).await
    }

    /// Run `loader` and store its result.
    ///
    /// The previous value is discarded for the duration of the refresh. On
    /// loader failure the cell reverts to empty and the error is re-raised;
    /// the loading flag is cleared in both outcomes.
    pub async fn update<F, Fut, E>(&self, loader: F) -> Result<T, LoadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.lock();
            if inner.loading {
                return Err(LoadError::Cell(CellError::AlreadyLoading));
            }
            inner.loading = true;
            inner.value = None;
        }

        let outcome = loader().await;

        let mut inner = self.lock();
        inner.loading = false;
        match outcome {
            Ok(value) => {
                inner.value = Some(value.clone());
                Ok(value)
            }
            Err(err) => {
                inner.value = None;
                Err(LoadError::Refresh(err))
            }
        }
    }
}
