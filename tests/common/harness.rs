//! Shared Postgres test infrastructure. The container starts once per test
//! binary run and every test gets its own connection pool against it, with
//! migrations applied once on first use.

use anyhow::{Context, Result};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedInfra {
    db_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedInfra> = OnceCell::const_new();

impl SharedInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .start()
            .await
            .context("failed to start postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect to test postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA.get_or_init(|| async { Self::init().await.expect("shared test infra init") }).await
    }
}

/// Per-test handle: a fresh pool against the shared container, plus a
/// convenience source/site pair every test can anchor foreign keys to.
pub struct PgContext {
    pub pool: PgPool,
    pub source_id: uuid::Uuid,
}

impl PgContext {
    /// Inserts a site with the given scope/alert_mode and returns its id.
    pub async fn insert_site(&self, scope: &str, alert_mode: &str) -> uuid::Uuid {
        let row: (uuid::Uuid,) = sqlx::query_as(
            "INSERT INTO sites (name, scope, alert_mode, source_id) VALUES ($1, $1, $2::alert_mode, $3) RETURNING id",
        )
        .bind(scope)
        .bind(alert_mode)
        .bind(self.source_id)
        .fetch_one(&self.pool)
        .await
        .expect("insert site");
        row.0
    }
}

impl AsyncTestContext for PgContext {
    async fn setup() -> Self {
        let infra = SharedInfra::get().await;
        let pool = PgPool::connect(&infra.db_url).await.expect("connect test pool");

        let row: (uuid::Uuid,) = sqlx::query_as("INSERT INTO sources (name) VALUES ('test-source') RETURNING id")
            .fetch_one(&pool)
            .await
            .expect("insert test source");

        Self { pool, source_id: row.0 }
    }

    async fn teardown(self) {
        self.pool.close().await;
    }
}
