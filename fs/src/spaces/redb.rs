use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::{path::PathBuf, sync::Arc};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{Space, SpaceService};
use crate::inodes::Inodes;
use crate::Error;

/// Every space, json encoded.
const SPACE_TABLE: TableDefinition<u128, Vec<u8>> = TableDefinition::new("space");

/// Keeps spaces in redb, so they and the link to their root directory
/// survive restarts.
#[derive(Clone)]
pub struct RedbSpaceService {
    inodes: Inodes,
    db: Arc<Database>,
}

impl RedbSpaceService {
    pub async fn new(inodes: Inodes, path: PathBuf) -> Result<Self, Error> {
        if path == PathBuf::from("/") {
            return Err(Error::StorageError(
                "cowardly refusing to open / with redb".to_string(),
            ));
        }

        let db = tokio::task::spawn_blocking(|| -> Result<_, redb::Error> {
            let db = redb::Database::create(path)?;
            create_schema(&db)?;
            Ok(db)
        })
        .await??;

        Ok(Self {
            inodes,
            db: Arc::new(db),
        })
    }

    pub fn new_temporary(inodes: Inodes) -> Result<Self, Error> {
        let db =
            redb::Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;

        create_schema(&db)?;

        Ok(Self {
            inodes,
            db: Arc::new(db),
        })
    }

    async fn read(&self, id: &Uuid) -> Result<Option<Space>, Error> {
        let db = self.db.clone();
        let id = id.as_u128();

        tokio::task::spawn_blocking(move || -> Result<Option<Space>, Error> {
            let txn = db.begin_read()?;
            let spaces = txn.open_table(SPACE_TABLE)?;
            match spaces.get(id)? {
                None => Ok(None),
                Some(data) => decode(&data.value()).map(Some),
            }
        })
        .await?
    }
}

fn create_schema(db: &redb::Database) -> Result<(), redb::Error> {
    let txn = db.begin_write()?;
    txn.open_table(SPACE_TABLE)?;
    txn.commit()?;

    Ok(())
}

fn decode(data: &[u8]) -> Result<Space, Error> {
    serde_json::from_slice(data).map_err(|e| {
        warn!(err=%e, "failed to parse Space");
        Error::StorageError("failed to parse Space".to_string())
    })
}

#[async_trait]
impl SpaceService for RedbSpaceService {
    #[instrument(skip(self, owners), fields(user.id=%user), err)]
    async fn create(&self, user: &Uuid, name: &str, owners: Vec<Uuid>) -> Result<Space, Error> {
        let space = Space::build(&self.inodes, user, name, owners).await?;

        let db = self.db.clone();
        let id = space.id.as_u128();
        let data = serde_json::to_vec(&space)?;
        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            let txn = db.begin_write()?;
            {
                let mut spaces = txn.open_table(SPACE_TABLE)?;
                spaces.insert(id, data)?;
            }
            txn.commit()?;
            Ok(())
        })
        .await??;

        Ok(space)
    }

    #[instrument(skip(self), fields(space.id=%id))]
    async fn get(&self, id: &Uuid) -> Result<Space, Error> {
        self.read(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("space {}", id)))
    }

    #[instrument(skip(self), fields(user.id=%user, space.id=%space))]
    async fn get_user_space(&self, user: &Uuid, space: &Uuid) -> Result<Space, Error> {
        match self.read(space).await? {
            Some(s) if s.is_owned_by(user) => Ok(s),
            _ => Err(Error::NotFound(format!("space {}", space))),
        }
    }

    #[instrument(skip(self), fields(user.id=%user))]
    async fn list_user_spaces(&self, user: &Uuid) -> Result<Vec<Space>, Error> {
        let db = self.db.clone();
        let user = *user;

        tokio::task::spawn_blocking(move || -> Result<Vec<Space>, Error> {
            let txn = db.begin_read()?;
            let table = txn.open_table(SPACE_TABLE)?;

            let mut spaces = Vec::new();
            for entry in table.iter()? {
                let (_, data) = entry?;
                let space = decode(&data.value())?;
                if space.is_owned_by(&user) {
                    spaces.push(space);
                }
            }
            spaces.sort_by(|a, b| a.name.cmp(&b.name));

            Ok(spaces)
        })
        .await?
    }
}
