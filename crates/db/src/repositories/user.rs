use async_trait::async_trait;
use sqlx::Row;

use greenlight_core::domain::roles::Role;
use greenlight_core::domain::user::{UserId, UserProfile};
use greenlight_core::workflow::{StoreError, UserDirectory};

use super::{backend, decode};
use crate::DbPool;

pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, profile: UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO app_user (id, display_name, role, team_id)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 role = excluded.role,
                 team_id = excluded.team_id",
        )
        .bind(&profile.id.0)
        .bind(&profile.display_name)
        .bind(profile.role.as_str())
        .bind(&profile.team_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

#[async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn resolve(&self, id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT id, display_name, role, team_id FROM app_user WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };

        let id: String = row.try_get("id").map_err(|e| decode("id", e))?;
        let display_name: String =
            row.try_get("display_name").map_err(|e| decode("display_name", e))?;
        let role_str: String = row.try_get("role").map_err(|e| decode("role", e))?;
        let team_id: Option<String> =
            row.try_get("team_id").map_err(|e| decode("team_id", e))?;

        Ok(Some(UserProfile {
            id: UserId(id),
            display_name,
            role: Role::parse(&role_str).map_err(|e| decode("role", e))?,
            team_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use greenlight_core::domain::roles::Role;
    use greenlight_core::domain::user::{UserId, UserProfile};
    use greenlight_core::workflow::UserDirectory;

    use super::SqlUserDirectory;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlUserDirectory {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlUserDirectory::new(pool)
    }

    #[tokio::test]
    async fn upsert_and_resolve_round_trips_role() {
        let directory = setup().await;
        directory
            .upsert(UserProfile {
                id: UserId("u-admin".to_string()),
                display_name: "Ada Admin".to_string(),
                role: Role::Admin,
                team_id: None,
            })
            .await
            .expect("upsert");

        let profile = directory
            .resolve(&UserId("u-admin".to_string()))
            .await
            .expect("resolve")
            .expect("exists");
        assert_eq!(profile.role, Role::Admin);
        assert_eq!(profile.display_name, "Ada Admin");
    }

    #[tokio::test]
    async fn unknown_user_resolves_to_none() {
        let directory = setup().await;
        let missing = directory.resolve(&UserId("u-missing".to_string())).await.expect("resolve");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_the_existing_profile() {
        let directory = setup().await;
        let id = UserId("u-1".to_string());

        directory
            .upsert(UserProfile {
                id: id.clone(),
                display_name: "Sam".to_string(),
                role: Role::SalesRep,
                team_id: Some("t-east".to_string()),
            })
            .await
            .expect("first upsert");
        directory
            .upsert(UserProfile {
                id: id.clone(),
                display_name: "Sam".to_string(),
                role: Role::Manager,
                team_id: Some("t-east".to_string()),
            })
            .await
            .expect("second upsert");

        let profile = directory.resolve(&id).await.expect("resolve").expect("exists");
        assert_eq!(profile.role, Role::Manager);
    }
}
