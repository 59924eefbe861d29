use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::acl::Auth;
use crate::router::Router;
use crate::shared::Shared;
use crate::storage::MessageStorage;

/// Read guard over one pluggable slot.
pub struct Entry<'a, T: ?Sized>(RwLockReadGuard<'a, Box<T>>);

impl<T: ?Sized> Deref for Entry<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Write guard over one pluggable slot, used to swap implementations in.
pub struct EntryMut<'a, T: ?Sized>(RwLockWriteGuard<'a, Box<T>>);

impl<T: ?Sized> Deref for EntryMut<'_, T> {
    type Target = Box<T>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: ?Sized> DerefMut for EntryMut<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Holds the swappable broker internals. Defaults are installed at
/// context setup and can be replaced before the server starts serving.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

struct Inner {
    shared: RwLock<Box<dyn Shared>>,
    router: RwLock<Box<dyn Router>>,
    auth: RwLock<Box<dyn Auth>>,
    storage: RwLock<Box<dyn MessageStorage>>,
}

impl Manager {
    pub(crate) fn new(
        shared: Box<dyn Shared>,
        router: Box<dyn Router>,
        auth: Box<dyn Auth>,
        storage: Box<dyn MessageStorage>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: RwLock::new(shared),
                router: RwLock::new(router),
                auth: RwLock::new(auth),
                storage: RwLock::new(storage),
            }),
        }
    }

    pub async fn shared(&self) -> Entry<'_, dyn Shared> {
        Entry(self.inner.shared.read().await)
    }

    pub async fn shared_mut(&self) -> EntryMut<'_, dyn Shared> {
        EntryMut(self.inner.shared.write().await)
    }

    pub async fn router(&self) -> Entry<'_, dyn Router> {
        Entry(self.inner.router.read().await)
    }

    pub async fn router_mut(&self) -> EntryMut<'_, dyn Router> {
        EntryMut(self.inner.router.write().await)
    }

    pub async fn auth(&self) -> Entry<'_, dyn Auth> {
        Entry(self.inner.auth.read().await)
    }

    pub async fn auth_mut(&self) -> EntryMut<'_, dyn Auth> {
        EntryMut(self.inner.auth.write().await)
    }

    pub async fn storage(&self) -> Entry<'_, dyn MessageStorage> {
        Entry(self.inner.storage.read().await)
    }

    pub async fn storage_mut(&self) -> EntryMut<'_, dyn MessageStorage> {
        EntryMut(self.inner.storage.write().await)
    }
}
