use std::path::PathBuf;

use log::{error, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::error::StoreError;

/// A whole-file JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the document. A missing file, or one that is not JSON at all,
    /// is replaced by `default`, which is written back and returned. Valid
    /// JSON that does not fit `T` is an error and the file is left alone.
    pub async fn load_or_init<T>(&self, default: T) -> Result<T, StoreError>
    where
        T: Serialize + DeserializeOwned,
    {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    info!("Loaded {}", self.path.display());
                    return Ok(value);
                }
                Err(e) if matches!(e.classify(), Category::Syntax | Category::Eof) => warn!(
                    "Failed to parse {}: {}. Recreating with defaults.",
                    self.path.display(),
                    e
                ),
                Err(e) => {
                    error!("{} does not match the expected schema: {}", self.path.display(), e);
                    return Err(e.into());
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("{} missing, creating it", self.path.display());
            }
            Err(e) => return Err(e.into()),
        }

        self.save(&default).await?;
        Ok(default)
    }

    /// Replaces the file contents: write a sibling temp file, then rename.
    pub async fn save<T: Serialize>(&self, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// (De)serializes `Vec<(String, T)>` as a JSON object, keeping file order.
pub mod ordered_map {
    use std::fmt;
    use std::marker::PhantomData;

    use serde::de::{MapAccess, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(entries: &[(String, T)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        serializer.collect_map(entries.iter().map(|(k, v)| (k, v)))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = Vec<(String, T)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, T>()? {
                    out.push(entry);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        #[serde(with = "ordered_map", default)]
        users: Vec<(String, u32)>,
    }

    #[tokio::test]
    async fn missing_file_is_created_with_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let store = JsonStore::new(&path);

        let doc: Doc = store.load_or_init(Doc::default()).await.unwrap();
        assert_eq!(doc, Doc::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = JsonStore::new(&path);
        let doc: Doc = store
            .load_or_init(Doc { users: vec![("x".into(), 1)] })
            .await
            .unwrap();
        assert_eq!(doc.users, vec![("x".to_string(), 1)]);

        let on_disk: Doc = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, doc);
    }

    #[tokio::test]
    async fn truncated_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"{\"users\": {\"amy\": 1").unwrap();

        let doc: Doc = JsonStore::new(&path).load_or_init(Doc::default()).await.unwrap();
        assert_eq!(doc, Doc::default());
    }

    #[tokio::test]
    async fn schema_mismatch_keeps_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let original = br#"{"users": {"amy": 2, "zed": null}}"#;
        std::fs::write(&path, original).unwrap();

        let err = JsonStore::new(&path)
            .load_or_init(Doc::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
        assert_eq!(std::fs::read(&path).unwrap(), original.to_vec());
    }

    #[tokio::test]
    async fn save_then_load_keeps_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("doc.json"));
        let doc = Doc {
            users: vec![("zed".into(), 3), ("amy".into(), 1), ("mo".into(), 2)],
        };
        store.save(&doc).await.unwrap();

        let loaded: Doc = store.load_or_init(Doc::default()).await.unwrap();
        assert_eq!(loaded, doc);
        assert!(!dir.path().join("doc.json.tmp").exists());
    }
}
