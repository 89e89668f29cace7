use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inodes::Inodes;
use crate::Error;

mod from_addr;
mod memory;
mod redb;

#[cfg(test)]
mod tests;

pub use self::from_addr::from_addr;
pub use self::memory::MemorySpaceService;
pub use self::redb::RedbSpaceService;

const MAX_NAME_LEN: usize = 30;

/// A logical storage area owned by one or more users, backed by its own
/// node tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Space {
    pub id: Uuid,
    pub name: String,
    /// Shared between several owners.
    pub is_public: bool,
    pub owners: Vec<Uuid>,
    /// Root directory node of the space tree.
    pub root: Uuid,
    pub created_at: DateTime<Utc>,
    pub created_by: Uuid,
}

impl Space {
    pub fn is_owned_by(&self, user: &Uuid) -> bool {
        self.owners.contains(user)
    }

    /// Validates the name and creates the root directory of a new space.
    async fn build(
        inodes: &Inodes,
        user: &Uuid,
        name: &str,
        mut owners: Vec<Uuid>,
    ) -> Result<Self, Error> {
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(Error::Invalid(format!("invalid space name {:?}", name)));
        }

        if !owners.contains(user) {
            owners.push(*user);
        }

        let now = Utc::now();
        let root = inodes.create_root(now).await?;

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_public: owners.len() > 1,
            owners,
            root: root.id,
            created_at: now,
            created_by: *user,
        })
    }
}

#[async_trait]
pub trait SpaceService: Send + Sync {
    /// Creates a new space along with its root directory. `owners` always
    /// ends up containing `user`.
    async fn create(&self, user: &Uuid, name: &str, owners: Vec<Uuid>) -> Result<Space, Error>;

    /// Looks up a space by id.
    async fn get(&self, id: &Uuid) -> Result<Space, Error>;

    /// Returns the space if `user` is one of its owners. Spaces the user
    /// cannot access are reported as [Error::NotFound].
    async fn get_user_space(&self, user: &Uuid, space: &Uuid) -> Result<Space, Error>;

    /// Lists all spaces owned by `user`, ordered by name.
    async fn list_user_spaces(&self, user: &Uuid) -> Result<Vec<Space>, Error>;

    /// Returns the space of `user` called `name`, creating it when there is
    /// none yet.
    async fn get_or_create(&self, user: &Uuid, name: &str) -> Result<Space, Error> {
        let existing = self
            .list_user_spaces(user)
            .await?
            .into_iter()
            .find(|s| s.name == name);

        match existing {
            Some(space) => Ok(space),
            None => self.create(user, name, vec![]).await,
        }
    }
}

#[async_trait]
impl<A> SpaceService for A
where
    A: AsRef<dyn SpaceService> + Send + Sync,
{
    async fn create(&self, user: &Uuid, name: &str, owners: Vec<Uuid>) -> Result<Space, Error> {
        self.as_ref().create(user, name, owners).await
    }

    async fn get(&self, id: &Uuid) -> Result<Space, Error> {
        self.as_ref().get(id).await
    }

    async fn get_user_space(&self, user: &Uuid, space: &Uuid) -> Result<Space, Error> {
        self.as_ref().get_user_space(user, space).await
    }

    async fn list_user_spaces(&self, user: &Uuid) -> Result<Vec<Space>, Error> {
        self.as_ref().list_user_spaces(user).await
    }
}
