use super::types::{DbConfig, TableConfig};
use crate::error::{Result, SealDbError};
use std::path::Path;

/// Parse a configuration file. `.json` files are read as JSON, anything else as YAML.
pub fn parse_config(path: &Path) -> Result<DbConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SealDbError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    let config: DbConfig = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };
    validate_config(&config)?;
    Ok(config)
}

/// Parse a YAML (or JSON, which YAML accepts) configuration string
pub fn parse_config_str(content: &str) -> Result<DbConfig> {
    let config: DbConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject configurations the store cannot start with.
pub fn validate_config(config: &DbConfig) -> Result<()> {
    if config.file.as_os_str().is_empty() {
        return Err(SealDbError::Configuration("'file' is required".into()));
    }
    if config.encryption_key.is_empty() {
        return Err(SealDbError::Configuration(
            "'encryptionKey' is required".into(),
        ));
    }
    for (name, table) in &config.tables {
        validate_table(name, table)?;
    }
    for policy in &config.backups {
        policy.period()?;
    }
    Ok(())
}

/// Reject a table configuration the store cannot enforce.
pub fn validate_table(name: &str, table: &TableConfig) -> Result<()> {
    if table.primary_key.is_empty() {
        return Err(SealDbError::Configuration(format!(
            "table '{name}' has an empty primaryKey"
        )));
    }
    for field in &table.unique {
        if field == &table.primary_key {
            return Err(SealDbError::Configuration(format!(
                "table '{name}': primary key '{field}' is implicitly unique"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldType;

    const SAMPLE: &str = r#"
file: data/app.sdb
encryptionKey: s3cret
connectionTimeout: 5000
tables:
  usuarios:
    unique: [email]
    schema:
      nombre: { type: text, required: true }
      edad: { type: number }
      tags: { type: list }
  orders:
    primaryKey: orderId
backups:
  - interval: 1
  - interval: 0.5
"#;

    #[test]
    fn test_parse_yaml_config() {
        let config = parse_config_str(SAMPLE).unwrap();
        assert_eq!(config.encryption_key, "s3cret");
        assert_eq!(config.connection_timeout, Some(5000));
        assert_eq!(config.backups.len(), 2);

        let usuarios = &config.tables["usuarios"];
        assert_eq!(usuarios.primary_key, "id");
        assert_eq!(usuarios.unique, vec!["email".to_string()]);
        assert_eq!(usuarios.schema["nombre"].field_type, FieldType::String);
        assert!(usuarios.schema["nombre"].required);
        assert_eq!(usuarios.schema["tags"].field_type, FieldType::Array);

        assert_eq!(config.tables["orders"].primary_key, "orderId");
    }

    #[test]
    fn test_default_backup_dir_is_next_to_file() {
        let config = parse_config_str(SAMPLE).unwrap();
        assert_eq!(
            config.resolved_backup_dir(),
            Path::new("data").join("backups")
        );
    }

    #[test]
    fn test_missing_key_rejected() {
        let result = parse_config_str("file: data.sdb\nencryptionKey: ''");
        assert!(matches!(result, Err(SealDbError::Configuration(_))));
    }

    #[test]
    fn test_bad_backup_interval_rejected() {
        let result =
            parse_config_str("file: data.sdb\nencryptionKey: k\nbackups:\n  - interval: 0");
        assert!(matches!(result, Err(SealDbError::Configuration(_))));
    }

    #[test]
    fn test_oversized_backup_interval_rejected() {
        let result =
            parse_config_str("file: data.sdb\nencryptionKey: k\nbackups:\n  - interval: 1.0e+300");
        assert!(matches!(result, Err(SealDbError::Configuration(_))));
    }

    #[test]
    fn test_unknown_field_type_rejected() {
        let result = parse_config_str(
            "file: d.sdb\nencryptionKey: k\ntables:\n  t:\n    schema:\n      a: { type: blob }",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_json_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"file": "db.sdb", "encryptionKey": "k", "tables": {"t": {"unique": ["email"]}}}"#,
        )
        .unwrap();
        let config = parse_config(&path).unwrap();
        assert_eq!(config.tables["t"].unique, vec!["email".to_string()]);
    }
}
