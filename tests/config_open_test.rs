//! Opening databases from configuration

use xitdb::error::{Error, Result};
use xitdb::{Database, DatabaseConfig, HashAlgorithm, Tag, WriteHashMap};

#[test]
fn test_from_config_file_backend() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = DatabaseConfig {
        hash: HashAlgorithm::Sha256,
        ..DatabaseConfig::for_file(dir.path().join("sha256.db"))
    };

    {
        let db = Database::from_config(&config)?;
        assert_eq!(db.header().hash_size, 32);
        let map = WriteHashMap::new(&db.root_cursor())?;
        map.put("greeting", "hello")?;
        db.sync()?;
    }

    let db = Database::from_config(&config)?;
    assert_eq!(db.header().tag, Tag::HashMap);
    let map = xitdb::ReadHashMap::new(db.root_read_cursor())?;
    let value = map.get_cursor("greeting")?.ok_or(Error::KeyNotFound)?;
    assert_eq!(value.read_bytes(None)?, b"hello");

    // the digest length is part of the file format
    let sha1 = DatabaseConfig {
        hash: HashAlgorithm::Sha1,
        ..config.clone()
    };
    assert!(matches!(
        Database::from_config(&sha1),
        Err(Error::InvalidHashSize { expected: 20, found: 32 })
    ));
    Ok(())
}

#[test]
fn test_from_config_read_only_rejects_missing_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = DatabaseConfig {
        read_only: true,
        ..DatabaseConfig::for_file(dir.path().join("missing.db"))
    };
    assert!(matches!(Database::from_config(&config), Err(Error::Io(_))));
    Ok(())
}

#[test]
fn test_from_toml_in_memory() -> Result<()> {
    let config = DatabaseConfig::from_toml_str("sync_on_commit = false\n")?;
    let db = Database::from_config(&config)?;
    assert!(!db.sync_on_commit());
    assert_eq!(db.header().tag, Tag::None);
    Ok(())
}
