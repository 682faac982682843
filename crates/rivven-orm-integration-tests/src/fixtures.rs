//! Database containers for the engine tests
//!
//! Each fixture starts one server, waits until it answers `SELECT 1`
//! through the matching rivven-orm driver adapter and hands out the
//! [`DatabaseConfig`] an engine is built from.

use anyhow::Result;
use rivven_orm::connection::{Connection, ConnectionConfig, ConnectionFactory};
use rivven_orm::prelude::*;
use rivven_orm::target;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{ContainerAsync, Image};
use tokio::time::sleep;
use tracing::info;

/// Database created in every container
pub const TEST_DB: &str = "testdb";

async fn mapped_port<I: Image>(container: &ContainerAsync<I>, port: u16, name: &str) -> Result<u16> {
    // Retry port retrieval to handle testcontainers race condition
    for i in 0..10 {
        match container.get_host_port_ipv4(port).await {
            Ok(p) => return Ok(p),
            Err(e) => {
                tracing::debug!("Waiting for {} port exposure (attempt {}): {}", name, i + 1, e);
                sleep(Duration::from_millis(100 * (i + 1) as u64)).await;
            }
        }
    }
    anyhow::bail!("{} port not exposed after retries", name)
}

async fn wait_for(
    factory: &dyn ConnectionFactory,
    target: &str,
    name: &str,
) -> Result<Box<dyn Connection>> {
    let config = ConnectionConfig::new(target);
    for i in 0..60 {
        match factory.connect(&config).await {
            Ok(conn) => {
                if conn.query("SELECT 1", &[]).await.is_ok() {
                    info!("{} ready after {} attempts", name, i + 1);
                    return Ok(conn);
                }
            }
            Err(e) => {
                tracing::debug!("Waiting for {} (attempt {}): {}", name, i + 1, e);
            }
        }
        sleep(Duration::from_millis(500)).await;
    }
    anyhow::bail!("{} did not become ready in time", name)
}

async fn run_statements(conn: &dyn Connection, statements: &[&str]) -> Result<()> {
    for statement in statements {
        conn.execute(statement, &[]).await?;
    }
    Ok(())
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// PostgreSQL server
pub struct TestPostgres {
    pub container: ContainerAsync<testcontainers_modules::postgres::Postgres>,
    pub host: String,
    pub port: u16,
}

impl TestPostgres {
    /// Start the container and wait for it to accept queries
    pub async fn start() -> Result<Self> {
        use testcontainers::{runners::AsyncRunner, ImageExt};
        use testcontainers_modules::postgres::Postgres;

        let container = Postgres::default()
            .with_env_var("POSTGRES_DB", TEST_DB)
            .with_env_var("POSTGRES_USER", "testuser")
            .with_env_var("POSTGRES_PASSWORD", "testpass")
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        let port = mapped_port(&container, 5432, "PostgreSQL").await?;
        let fixture = Self {
            container,
            host,
            port,
        };

        let conn = wait_for(
            &rivven_orm::postgres::PgConnectionFactory,
            &target::resolve(&fixture.config())?,
            "PostgreSQL",
        )
        .await?;
        conn.close().await?;
        Ok(fixture)
    }

    /// Engine configuration for the test database
    pub fn config(&self) -> DatabaseConfig {
        DatabaseConfig::new(DatabaseDriver::Postgres)
            .with_host(&self.host)
            .with_port(self.port)
            .with_database_name(TEST_DB)
            .with_credentials("testuser", "testpass")
    }

    /// Build an engine over the test database
    pub async fn engine(&self) -> Result<Arc<dyn Orm>> {
        Ok(rivven_orm::connect(&self.config()).await?)
    }

    /// Run DDL statements one by one
    pub async fn apply_schema(&self, statements: &[&str]) -> Result<()> {
        let config = ConnectionConfig::new(target::resolve(&self.config())?);
        let conn = rivven_orm::postgres::PgConnectionFactory
            .connect(&config)
            .await?;
        run_statements(conn.as_ref(), statements).await?;
        conn.close().await?;
        Ok(())
    }
}

// ============================================================================
// MySQL
// ============================================================================

/// MySQL server
pub struct TestMysql {
    pub container: ContainerAsync<testcontainers_modules::mysql::Mysql>,
    pub host: String,
    pub port: u16,
}

impl TestMysql {
    /// Start the container and wait for it to accept queries
    pub async fn start() -> Result<Self> {
        use testcontainers::{runners::AsyncRunner, ImageExt};
        use testcontainers_modules::mysql::Mysql;

        let container = Mysql::default()
            .with_env_var("MYSQL_ROOT_PASSWORD", "rootpass")
            .with_env_var("MYSQL_DATABASE", TEST_DB)
            .with_env_var("MYSQL_USER", "testuser")
            .with_env_var("MYSQL_PASSWORD", "testpass")
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        let port = mapped_port(&container, 3306, "MySQL").await?;
        let fixture = Self {
            container,
            host,
            port,
        };

        let conn = wait_for(
            &rivven_orm::mysql::MySqlConnectionFactory,
            &target::resolve(&fixture.config())?,
            "MySQL",
        )
        .await?;
        conn.close().await?;
        Ok(fixture)
    }

    /// Engine configuration for the test database
    pub fn config(&self) -> DatabaseConfig {
        DatabaseConfig::new(DatabaseDriver::MySql)
            .with_host(&self.host)
            .with_port(self.port)
            .with_database_name(TEST_DB)
            .with_credentials("testuser", "testpass")
    }

    /// Build an engine over the test database
    pub async fn engine(&self) -> Result<Arc<dyn Orm>> {
        Ok(rivven_orm::connect(&self.config()).await?)
    }

    /// Run DDL statements one by one
    pub async fn apply_schema(&self, statements: &[&str]) -> Result<()> {
        let config = ConnectionConfig::new(target::resolve(&self.config())?);
        let conn = rivven_orm::mysql::MySqlConnectionFactory
            .connect(&config)
            .await?;
        run_statements(conn.as_ref(), statements).await?;
        conn.close().await?;
        Ok(())
    }
}

// ============================================================================
// SQL Server
// ============================================================================

/// SQL Server sa password (MssqlServer default)
pub const SA_PASSWORD: &str = "yourStrong(!)Password";

/// SQL Server with a freshly created test database
pub struct TestSqlServer {
    pub container: ContainerAsync<testcontainers_modules::mssql_server::MssqlServer>,
    pub host: String,
    pub port: u16,
}

impl TestSqlServer {
    /// Start the container, wait for it and create [`TEST_DB`]
    pub async fn start() -> Result<Self> {
        use testcontainers::runners::AsyncRunner;
        use testcontainers_modules::mssql_server::MssqlServer;

        let container = MssqlServer::default().with_accept_eula().start().await?;

        let host = container.get_host().await?.to_string();
        let port = mapped_port(&container, 1433, "SQL Server").await?;
        let fixture = Self {
            container,
            host,
            port,
        };

        let master = fixture.config_for("master");
        let conn = wait_for(
            &rivven_orm::sqlserver::SqlServerConnectionFactory,
            &target::resolve(&master)?,
            "SQL Server",
        )
        .await?;
        conn.execute(&format!("CREATE DATABASE {}", TEST_DB), &[])
            .await?;
        conn.close().await?;
        Ok(fixture)
    }

    fn config_for(&self, database: &str) -> DatabaseConfig {
        DatabaseConfig::new(DatabaseDriver::SqlServer)
            .with_host(&self.host)
            .with_port(self.port)
            .with_database_name(database)
            .with_credentials("sa", SA_PASSWORD)
    }

    /// Engine configuration for the test database
    pub fn config(&self) -> DatabaseConfig {
        self.config_for(TEST_DB)
    }

    /// Build an engine over the test database
    pub async fn engine(&self) -> Result<Arc<dyn Orm>> {
        Ok(rivven_orm::connect(&self.config()).await?)
    }

    /// Run DDL statements one by one
    pub async fn apply_schema(&self, statements: &[&str]) -> Result<()> {
        let config = ConnectionConfig::new(target::resolve(&self.config())?);
        let conn = rivven_orm::sqlserver::SqlServerConnectionFactory
            .connect(&config)
            .await?;
        run_statements(conn.as_ref(), statements).await?;
        conn.close().await?;
        Ok(())
    }
}
