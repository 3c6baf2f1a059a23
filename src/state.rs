use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::db::Store;

/// Shared handler state. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Store,
    admin_password: SecretString,
}

impl AppState {
    pub fn new(store: Store, admin_password: SecretString) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                admin_password,
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn admin_password_matches(&self, candidate: &str) -> bool {
        self.inner.admin_password.expose_secret() == candidate
    }
}
