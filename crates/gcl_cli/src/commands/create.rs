//! Create command implementation.

use super::CommandResult;
use gcl_core::metadata::ids;
use gcl_core::{LogStore, MetadataSet, Name, StoreConfig, Timestamp};
use std::path::Path;

/// Runs the create command.
pub fn run(dir: &Path, name: &str, meta: &[String]) -> CommandResult {
    let metadata = build_metadata(meta, Timestamp::now())?;
    std::fs::create_dir_all(dir)?;
    let config = StoreConfig::default().log_dir(dir);
    let identity = Name::parse(name);
    let store = LogStore::create(&config, identity, &metadata)?;
    println!("Created log {name}");
    println!("  identity: {}", identity.printable());
    println!("  path:     {}", config.log_path(&identity).display());
    println!("  metadata: {} entries", store.metadata().len());
    store.close()?;
    Ok(())
}

/// Builds metadata from `id=value` arguments, adding a creation time
/// unless one is given.
pub fn build_metadata(entries: &[String], now: Timestamp) -> CommandResult<MetadataSet> {
    let mut metadata = MetadataSet::new();
    for entry in entries {
        let (id, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("metadata {entry:?} is not id=value"))?;
        metadata.add(parse_id(id)?, value.as_bytes())?;
    }
    if metadata.find(ids::CREATION_TIME).is_none() {
        metadata.add(ids::CREATION_TIME, now.to_string().as_bytes())?;
    }
    Ok(metadata)
}

/// Parses a metadata id: a well-known name, a decimal or `0x` hex number.
pub fn parse_id(text: &str) -> CommandResult<u32> {
    let id = match text.to_ascii_lowercase().as_str() {
        "xid" => ids::XID,
        "nonce" => ids::NONCE,
        "ctime" => ids::CREATION_TIME,
        "pubkey" => ids::PUBKEY,
        other => match other.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16)?,
            None => other.parse()?,
        },
    };
    if id == ids::END_OF_LIST {
        return Err("metadata id 0 is reserved".into());
    }
    Ok(id)
}

/// Short label for a metadata id.
pub fn id_label(id: u32) -> String {
    match id {
        ids::XID => "xid".into(),
        ids::NONCE => "nonce".into(),
        ids::CREATION_TIME => "ctime".into(),
        ids::PUBKEY => "pubkey".into(),
        other => format!("0x{other:08x}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse() {
        assert_eq!(parse_id("XID").unwrap(), ids::XID);
        assert_eq!(parse_id("0x10").unwrap(), 16);
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(parse_id("0").is_err());
        assert!(parse_id("bogus").is_err());
        assert_eq!(id_label(ids::PUBKEY), "pubkey");
        assert_eq!(id_label(7), "0x00000007");
    }

    #[test]
    fn metadata_gets_creation_time() {
        let now = Timestamp::new(10, 0, 0).unwrap();
        let meta = build_metadata(&["xid=sensor".to_string()], now).unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.find(ids::XID), Some(&b"sensor"[..]));
        assert!(meta.find(ids::CREATION_TIME).is_some());

        let meta = build_metadata(&["ctime=yesterday".to_string()], now).unwrap();
        assert_eq!(meta.len(), 1);
        assert!(build_metadata(&["novalue".to_string()], now).is_err());
    }

    #[test]
    fn create_then_conflict() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), "fresh", &[]).unwrap();
        assert!(run(dir.path(), "fresh", &[]).is_err());
    }
}
