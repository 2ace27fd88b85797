//! Configuration loading and data-directory resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Data directory resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable (`OPINE_DATA_DIR`)
/// 3. TOML config file (`data_dir` key)
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("OPINE_DATA_DIR") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = find_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(data_dir) = config.get("data_dir").and_then(|v| v.as_str()) {
                    return PathBuf::from(data_dir);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_data_dir()
}

/// Database file path inside the resolved data directory
pub fn database_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("opine.db")
}

/// Locate the platform config file, if one exists
fn find_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/opine/config.toml first, then /etc/opine/config.toml
        if let Some(path) = dirs::config_dir().map(|d| d.join("opine").join("config.toml")) {
            if path.exists() {
                return Ok(path);
            }
        }
        let system_config = PathBuf::from("/etc/opine/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("opine").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!("Config file not found: {:?}", path)))
        }
    }
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("opine"))
        .unwrap_or_else(|| PathBuf::from("./opine_data"))
}

/// Read an integer setting from the settings table, falling back to a default.
///
/// Unparseable stored values fall back as well; the caller gets a usable
/// number either way.
pub async fn setting_i64(db: &sqlx::SqlitePool, key: &str, default: i64) -> Result<i64> {
    let row: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    Ok(row.and_then(|v| v.parse().ok()).unwrap_or(default))
}

/// Write a setting value (insert or replace)
pub async fn set_setting(db: &sqlx::SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_schema;
    use sqlx::SqlitePool;

    #[test]
    fn test_cli_arg_wins() {
        let dir = resolve_data_dir(Some("/tmp/opine-test"));
        assert_eq!(dir, PathBuf::from("/tmp/opine-test"));
    }

    // Serialized: manipulates the process environment
    #[test]
    #[serial_test::serial]
    fn test_env_var_when_no_cli_arg() {
        std::env::set_var("OPINE_DATA_DIR", "/tmp/opine-env-test");
        let dir = resolve_data_dir(None);
        std::env::remove_var("OPINE_DATA_DIR");
        assert_eq!(dir, PathBuf::from("/tmp/opine-env-test"));
    }

    #[test]
    fn test_database_path() {
        let path = database_path(std::path::Path::new("/var/lib/opine"));
        assert_eq!(path, PathBuf::from("/var/lib/opine/opine.db"));
    }

    #[tokio::test]
    async fn test_setting_i64_default_when_missing() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        init_schema(&pool).await.unwrap();

        let value = setting_i64(&pool, "ri_page_size", 500).await.unwrap();
        assert_eq!(value, 500);
    }

    #[tokio::test]
    async fn test_setting_i64_reads_stored_value() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        init_schema(&pool).await.unwrap();

        set_setting(&pool, "ri_page_size", "250").await.unwrap();
        let value = setting_i64(&pool, "ri_page_size", 500).await.unwrap();
        assert_eq!(value, 250);
    }

    #[tokio::test]
    async fn test_setting_i64_default_when_unparseable() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        init_schema(&pool).await.unwrap();

        set_setting(&pool, "ri_page_size", "not-a-number")
            .await
            .unwrap();
        let value = setting_i64(&pool, "ri_page_size", 500).await.unwrap();
        assert_eq!(value, 500);
    }
}
