//! Connection target resolution
//!
//! Turns a [`DatabaseConfig`] into the string each driver connects with.
//! Required fields are checked in a fixed order and the first empty one is
//! reported as [`Error::MissingField`].
//!
//! | Driver | Target |
//! |--------|--------|
//! | postgres | `host=H port=P dbname=D sslmode=disable [user=U] [password=W]` |
//! | mysql | `mysql://U:W@H:P/D` |
//! | sqlserver | `sqlserver://U:W@H:P?database=D` |
//! | sqlite3 | `url`, verbatim |

use url::Url;

use crate::config::{DatabaseConfig, DatabaseDriver};
use crate::error::{Error, Result};

/// Resolve the connection target for the configured driver
pub fn resolve(config: &DatabaseConfig) -> Result<String> {
    match config.driver {
        DatabaseDriver::Postgres => postgres_target(config),
        DatabaseDriver::MySql => mysql_target(config),
        DatabaseDriver::SqlServer => sqlserver_target(config),
        DatabaseDriver::Sqlite3 => sqlite_target(config),
    }
}

fn require_server(config: &DatabaseConfig) -> Result<()> {
    if config.host.is_empty() {
        return Err(Error::missing_field("host"));
    }
    if config.database_name.is_empty() {
        return Err(Error::missing_field("database name"));
    }
    if config.port == 0 {
        return Err(Error::missing_field("port"));
    }
    Ok(())
}

fn require_credentials(config: &DatabaseConfig) -> Result<()> {
    if config.user.is_empty() {
        return Err(Error::missing_field("user"));
    }
    if config.password.is_empty() {
        return Err(Error::missing_field("password"));
    }
    Ok(())
}

/// libpq key/value target; user and password are optional (peer/trust auth)
pub fn postgres_target(config: &DatabaseConfig) -> Result<String> {
    require_server(config)?;

    let mut target = format!(
        "host={} port={} dbname={} sslmode=disable",
        quote_pg_value(&config.host),
        config.port,
        quote_pg_value(&config.database_name)
    );
    if !config.user.is_empty() {
        target.push_str(" user=");
        target.push_str(&quote_pg_value(&config.user));
    }
    if !config.password.is_empty() {
        target.push_str(" password=");
        target.push_str(&quote_pg_value(config.password.expose_secret()));
    }
    Ok(target)
}

/// `mysql://` URL target with percent-encoded credentials
pub fn mysql_target(config: &DatabaseConfig) -> Result<String> {
    require_server(config)?;
    require_credentials(config)?;
    server_url("mysql", config, |url| url.set_path(&config.database_name))
}

/// `sqlserver://` URL target; the database travels as a query parameter
pub fn sqlserver_target(config: &DatabaseConfig) -> Result<String> {
    require_server(config)?;
    require_credentials(config)?;
    server_url("sqlserver", config, |url| {
        url.query_pairs_mut()
            .append_pair("database", &config.database_name);
    })
}

/// The configured URL, verbatim
pub fn sqlite_target(config: &DatabaseConfig) -> Result<String> {
    if config.url.is_empty() {
        return Err(Error::missing_field("url"));
    }
    Ok(config.url.clone())
}

fn server_url(
    scheme: &str,
    config: &DatabaseConfig,
    finish: impl FnOnce(&mut Url),
) -> Result<String> {
    let mut url = Url::parse(&format!("{}://{}:{}", scheme, config.host, config.port))
        .map_err(|e| Error::config(format!("invalid host {}: {}", config.host, e)))?;
    url.set_username(&config.user)
        .and_then(|_| url.set_password(Some(config.password.expose_secret())))
        .map_err(|_| Error::config(format!("host {} cannot carry credentials", config.host)))?;
    finish(&mut url);
    Ok(url.to_string())
}

/// Quote a libpq connection-string value when it needs it
fn quote_pg_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\' || c == '=');
    if !needs_quotes {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(driver: DatabaseDriver) -> DatabaseConfig {
        DatabaseConfig::new(driver)
            .with_host("db.internal")
            .with_port(4000)
            .with_database_name("orders")
            .with_credentials("app", "secret")
    }

    #[test]
    fn test_quote_pg_value() {
        assert_eq!(quote_pg_value("plain"), "plain");
        assert_eq!(quote_pg_value("two words"), "'two words'");
        assert_eq!(quote_pg_value(r"it's"), r"'it\'s'");
    }

    #[test]
    fn test_sqlserver_url_path_is_empty() {
        let target = sqlserver_target(&server(DatabaseDriver::SqlServer)).unwrap();
        let url = Url::parse(&target).unwrap();
        assert_eq!(url.path(), "");
        assert_eq!(url.port(), Some(4000));
    }
}
