use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::users::{
    repo::{Filter, StoreError, StoreResult, UserStore},
    repo_types::{NewUser, User},
};

/// In-process store with the same unique constraints as the `users` table.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    rows: BTreeMap<i32, User>,
    last_id: i32,
}

impl Inner {
    fn check_unique(&self, id: Option<i32>, name: &str, email: &str) -> StoreResult<()> {
        for row in self.rows.values().filter(|r| Some(r.id) != id) {
            if row.name == name {
                return Err(StoreError::UniqueViolation("users_name_key".into()));
            }
            if row.email == email {
                return Err(StoreError::UniqueViolation("users_email_key".into()));
            }
        }
        Ok(())
    }
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_all(&self) -> StoreResult<Vec<User>> {
        Ok(self.inner.read().await.rows.values().cloned().collect())
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.rows.values().find(|u| filter.matches(u)).cloned())
    }

    async fn find_by_id(&self, id: i32) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn insert(&self, user: NewUser) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        inner.check_unique(None, &user.name, &user.email)?;
        inner.last_id += 1;
        let row = user.into_user(inner.last_id);
        inner.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn save(&self, user: &User) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        if !inner.rows.contains_key(&user.id) {
            return Err(StoreError::NotFound);
        }
        inner.check_unique(Some(user.id), &user.name, &user.email)?;
        inner.rows.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn delete(&self, filter: &Filter) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.rows.len();
        inner.rows.retain(|_, u| !filter.matches(u));
        Ok((before - inner.rows.len()) as u64)
    }
}
