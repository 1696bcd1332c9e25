use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use tracing::info;

use crate::config::NewsDefinitionConfig;
use crate::store::{FeedConfiguration, NewsDefinition, NewsStore};

#[derive(Debug, Clone, FromRow)]
struct SubscriptionRow {
    id: i64,
    subscribe_id: String,
    active: bool,
    parameters: String,
    definition_id: i64,
    name: String,
    class_name: String,
    definition_parameters: String,
}

impl SubscriptionRow {
    fn into_configuration(self) -> anyhow::Result<FeedConfiguration> {
        Ok(FeedConfiguration {
            id: self.id,
            subscribe_id: self.subscribe_id,
            active: self.active,
            parameters: serde_json::from_str(&self.parameters)?,
            definition: NewsDefinition {
                id: self.definition_id,
                name: self.name,
                class_name: self.class_name,
                parameters: serde_json::from_str(&self.definition_parameters)?,
            },
        })
    }
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news_definitions (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                class_name TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS definition_roles (
                definition_id INTEGER NOT NULL REFERENCES news_definitions(id),
                role TEXT NOT NULL,
                UNIQUE(definition_id, role)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news_configurations (
                id INTEGER PRIMARY KEY,
                subscribe_id TEXT NOT NULL,
                definition_id INTEGER NOT NULL REFERENCES news_definitions(id),
                active INTEGER NOT NULL DEFAULT 0,
                parameters TEXT NOT NULL DEFAULT '{}',
                UNIQUE(subscribe_id, definition_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_configurations_subscriber
            ON news_configurations(subscribe_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upserts configured definitions by name and replaces their role grants.
    /// Definitions no longer in the configuration lose all their grants, so
    /// nobody new is subscribed to them. Existing subscriptions are kept.
    pub async fn sync_definitions(&self, configs: &[NewsDefinitionConfig]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut synced = HashSet::new();

        for config in configs {
            let parameters =
                serde_json::to_string(&HashMap::from([("url", config.url.as_str())]))?;

            let (id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO news_definitions (name, class_name, parameters)
                VALUES (?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET
                    class_name = excluded.class_name,
                    parameters = excluded.parameters
                RETURNING id
                "#,
            )
            .bind(&config.name)
            .bind(&config.adapter)
            .bind(&parameters)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM definition_roles WHERE definition_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            for role in &config.roles {
                sqlx::query("INSERT OR IGNORE INTO definition_roles (definition_id, role) VALUES (?, ?)")
                    .bind(id)
                    .bind(role)
                    .execute(&mut *tx)
                    .await?;
            }
            synced.insert(id);
        }

        let known: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM news_definitions")
            .fetch_all(&mut *tx)
            .await?;
        for (id, name) in known.into_iter().filter(|(id, _)| !synced.contains(id)) {
            let revoked = sqlx::query("DELETE FROM definition_roles WHERE definition_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if revoked > 0 {
                info!("Retired news definition '{}', revoked {} role grants", name, revoked);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn get_all_definitions(&self) -> anyhow::Result<Vec<NewsDefinition>> {
        let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
            "SELECT id, name, class_name, parameters FROM news_definitions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, name, class_name, parameters)| {
                Ok(NewsDefinition {
                    id,
                    name,
                    class_name,
                    parameters: serde_json::from_str(&parameters)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl NewsStore for Database {
    async fn list_configured_role_names(&self) -> anyhow::Result<Vec<String>> {
        let roles: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT role FROM definition_roles ORDER BY role")
                .fetch_all(&self.pool)
                .await?;
        Ok(roles.into_iter().map(|(role,)| role).collect())
    }

    async fn materialize_role_subscriptions(
        &self,
        subscribe_id: &str,
        roles: &HashSet<String>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let (existing,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM news_configurations WHERE subscribe_id = ?")
                .bind(subscribe_id)
                .fetch_one(&mut *tx)
                .await?;

        let grants: Vec<(i64, String)> = sqlx::query_as(
            "SELECT definition_id, role FROM definition_roles ORDER BY definition_id",
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut granted: Vec<i64> = grants
            .into_iter()
            .filter(|(_, role)| roles.contains(role))
            .map(|(id, _)| id)
            .collect();
        granted.dedup();

        // A first-time subscriber gets their first feed switched on.
        let mut activate_next = existing == 0;
        for definition_id in granted {
            let inserted = sqlx::query(
                r#"
                INSERT OR IGNORE INTO news_configurations (subscribe_id, definition_id, active)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(subscribe_id)
            .bind(definition_id)
            .bind(activate_next)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() > 0 {
                activate_next = false;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        subscribe_id: &str,
    ) -> anyhow::Result<Vec<FeedConfiguration>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT c.id, c.subscribe_id, c.active, c.parameters,
                   d.id AS definition_id, d.name, d.class_name,
                   d.parameters AS definition_parameters
            FROM news_configurations c
            JOIN news_definitions d ON d.id = c.definition_id
            WHERE c.subscribe_id = ?
            ORDER BY c.id
            "#,
        )
        .bind(subscribe_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(SubscriptionRow::into_configuration)
            .collect()
    }

    async fn save_subscription(&self, config: &FeedConfiguration) -> anyhow::Result<()> {
        let parameters = serde_json::to_string(&config.parameters)?;
        let result = sqlx::query(
            r#"
            UPDATE news_configurations
            SET active = ?, parameters = ?
            WHERE id = ?
            "#,
        )
        .bind(config.active)
        .bind(&parameters)
        .bind(config.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("no subscription with id {}", config.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NewsDefinitionConfig;

    async fn create_test_db() -> Database {
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Database { pool };
        db.initialize().await.unwrap();
        db
    }

    fn create_definition(name: &str, url: &str, roles: &[&str]) -> NewsDefinitionConfig {
        NewsDefinitionConfig {
            name: name.to_string(),
            url: url.to_string(),
            adapter: "rss".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn role_set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|r| r.to_string()).collect()
    }

    mod initialization_tests {
        use super::*;

        #[tokio::test]
        async fn test_database_initialization() {
            let db = create_test_db().await;
            let definitions = db.get_all_definitions().await.unwrap();
            assert!(definitions.is_empty());
        }

        #[tokio::test]
        async fn test_double_initialization_is_safe() {
            let db = create_test_db().await;
            let result = db.initialize().await;
            assert!(result.is_ok());
        }
    }

    mod sync_definitions_tests {
        use super::*;

        #[tokio::test]
        async fn test_sync_stores_url_parameter() {
            let db = create_test_db().await;
            db.sync_definitions(&[create_definition(
                "World News",
                "https://world.example.com/rss",
                &["student"],
            )])
            .await
            .unwrap();

            let definitions = db.get_all_definitions().await.unwrap();
            assert_eq!(definitions.len(), 1);
            assert_eq!(definitions[0].name, "World News");
            assert_eq!(definitions[0].class_name, "rss");
            assert_eq!(
                definitions[0].parameters.get("url").map(String::as_str),
                Some("https://world.example.com/rss")
            );
        }

        #[tokio::test]
        async fn test_sync_updates_existing_definition() {
            let db = create_test_db().await;
            db.sync_definitions(&[create_definition("World News", "https://old.example.com", &["student"])])
                .await
                .unwrap();
            db.sync_definitions(&[create_definition("World News", "https://new.example.com", &["staff"])])
                .await
                .unwrap();

            let definitions = db.get_all_definitions().await.unwrap();
            assert_eq!(definitions.len(), 1);
            assert_eq!(
                definitions[0].parameters.get("url").map(String::as_str),
                Some("https://new.example.com")
            );

            let roles = db.list_configured_role_names().await.unwrap();
            assert_eq!(roles, vec!["staff"]);
        }

        #[tokio::test]
        async fn test_role_names_are_distinct() {
            let db = create_test_db().await;
            db.sync_definitions(&[
                create_definition("A", "https://a.example.com", &["student", "staff"]),
                create_definition("B", "https://b.example.com", &["student"]),
                create_definition("C", "https://c.example.com", &[]),
            ])
            .await
            .unwrap();

            let roles = db.list_configured_role_names().await.unwrap();
            assert_eq!(roles, vec!["staff", "student"]);
        }

        #[tokio::test]
        async fn test_removed_definition_loses_its_grants() {
            let db = create_test_db().await;
            db.sync_definitions(&[
                create_definition("old", "https://old.example.com", &["alumni"]),
                create_definition("keep", "https://keep.example.com", &["student"]),
            ])
            .await
            .unwrap();
            db.materialize_role_subscriptions("grad", &role_set(&["alumni"]))
                .await
                .unwrap();

            db.sync_definitions(&[create_definition("keep", "https://keep.example.com", &["student"])])
                .await
                .unwrap();

            let roles = db.list_configured_role_names().await.unwrap();
            assert_eq!(roles, vec!["student"]);

            db.materialize_role_subscriptions("newgrad", &role_set(&["alumni"]))
                .await
                .unwrap();
            assert!(db.list_subscriptions("newgrad").await.unwrap().is_empty());

            // existing subscribers keep what they had
            let kept = db.list_subscriptions("grad").await.unwrap();
            assert_eq!(kept.len(), 1);
            assert_eq!(kept[0].definition.name, "old");
        }
    }

    mod subscription_tests {
        use super::*;

        async fn seeded_db() -> Database {
            let db = create_test_db().await;
            db.sync_definitions(&[
                create_definition("World News", "https://world.example.com", &["student", "staff"]),
                create_definition("Tech Times", "https://tech.example.com", &["staff"]),
                create_definition("Campus", "https://campus.example.com", &["student"]),
            ])
            .await
            .unwrap();
            db
        }

        #[tokio::test]
        async fn test_materialize_granted_definitions() {
            let db = seeded_db().await;
            db.materialize_role_subscriptions("jdoe", &role_set(&["staff"]))
                .await
                .unwrap();

            let configs = db.list_subscriptions("jdoe").await.unwrap();
            let names: Vec<&str> = configs.iter().map(|c| c.definition.name.as_str()).collect();
            assert_eq!(names, vec!["World News", "Tech Times"]);
            assert!(configs[0].active);
            assert!(!configs[1].active);
        }

        #[tokio::test]
        async fn test_materialize_is_idempotent() {
            let db = seeded_db().await;
            let roles = role_set(&["student"]);
            db.materialize_role_subscriptions("jdoe", &roles).await.unwrap();
            db.materialize_role_subscriptions("jdoe", &roles).await.unwrap();

            let configs = db.list_subscriptions("jdoe").await.unwrap();
            assert_eq!(configs.len(), 2);
            assert_eq!(configs.iter().filter(|c| c.active).count(), 1);
        }

        #[tokio::test]
        async fn test_materialize_without_roles() {
            let db = seeded_db().await;
            db.materialize_role_subscriptions("jdoe", &HashSet::new())
                .await
                .unwrap();

            assert!(db.list_subscriptions("jdoe").await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_subscriptions_are_per_subscriber() {
            let db = seeded_db().await;
            db.materialize_role_subscriptions("jdoe", &role_set(&["staff"]))
                .await
                .unwrap();
            db.materialize_role_subscriptions("asmith", &role_set(&["student"]))
                .await
                .unwrap();

            let jdoe = db.list_subscriptions("jdoe").await.unwrap();
            let asmith = db.list_subscriptions("asmith").await.unwrap();
            assert!(jdoe.iter().all(|c| c.subscribe_id == "jdoe"));
            assert!(asmith.iter().all(|c| c.subscribe_id == "asmith"));
            assert_eq!(asmith[1].definition.name, "Campus");
        }

        #[tokio::test]
        async fn test_save_subscription_persists_active_flag() {
            let db = seeded_db().await;
            db.materialize_role_subscriptions("jdoe", &role_set(&["staff"]))
                .await
                .unwrap();

            let mut configs = db.list_subscriptions("jdoe").await.unwrap();
            configs[0].active = false;
            configs[1].active = true;
            configs[1]
                .parameters
                .insert("url".to_string(), "https://mirror.example.com".to_string());
            for config in &configs {
                db.save_subscription(config).await.unwrap();
            }

            let reloaded = db.list_subscriptions("jdoe").await.unwrap();
            assert!(!reloaded[0].active);
            assert!(reloaded[1].active);
            assert_eq!(reloaded[1].parameter("url"), Some("https://mirror.example.com"));
        }

        #[tokio::test]
        async fn test_save_unknown_subscription_fails() {
            let db = seeded_db().await;
            let config = FeedConfiguration {
                id: 404,
                subscribe_id: "jdoe".to_string(),
                definition: db.get_all_definitions().await.unwrap().remove(0),
                active: true,
                parameters: HashMap::new(),
            };

            assert!(db.save_subscription(&config).await.is_err());
        }
    }
}
