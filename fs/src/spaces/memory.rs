use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::{Space, SpaceService};
use crate::inodes::Inodes;
use crate::Error;

#[derive(Clone)]
pub struct MemorySpaceService {
    inodes: Inodes,
    db: Arc<RwLock<HashMap<Uuid, Space>>>,
}

impl MemorySpaceService {
    pub fn new(inodes: Inodes) -> Self {
        Self {
            inodes,
            db: Default::default(),
        }
    }
}

#[async_trait]
impl SpaceService for MemorySpaceService {
    #[instrument(skip(self, owners), fields(user.id=%user), err)]
    async fn create(&self, user: &Uuid, name: &str, owners: Vec<Uuid>) -> Result<Space, Error> {
        let space = Space::build(&self.inodes, user, name, owners).await?;
        self.db.write().insert(space.id, space.clone());

        Ok(space)
    }

    #[instrument(skip(self), fields(space.id=%id))]
    async fn get(&self, id: &Uuid) -> Result<Space, Error> {
        self.db
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("space {}", id)))
    }

    #[instrument(skip(self), fields(user.id=%user, space.id=%space))]
    async fn get_user_space(&self, user: &Uuid, space: &Uuid) -> Result<Space, Error> {
        match self.db.read().get(space) {
            Some(s) if s.is_owned_by(user) => Ok(s.clone()),
            _ => Err(Error::NotFound(format!("space {}", space))),
        }
    }

    #[instrument(skip(self), fields(user.id=%user))]
    async fn list_user_spaces(&self, user: &Uuid) -> Result<Vec<Space>, Error> {
        let mut spaces: Vec<Space> = self
            .db
            .read()
            .values()
            .filter(|s| s.is_owned_by(user))
            .cloned()
            .collect();
        spaces.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(spaces)
    }
}
