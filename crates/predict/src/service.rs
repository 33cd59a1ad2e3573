//! Engine facade: manage, query and persistence surfaces over one shared index.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::config::PredictConfig;
use crate::error::{PredictError, Result};
use crate::keeper::Keeper;
use crate::persistence::{self, SavedSnapshot, SnapshotWorker};
use crate::query::{Query, QueryCompiler};
use crate::search::Seeker;
use crate::shared::{IndexData, SharedIndex};
use crate::types::{extract_item_id, IndexStats, Item};

/// Response to a prediction query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictResponse {
    pub items: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<Value>,
}

/// Cheap to clone; clones share the same index.
#[derive(Debug, Clone)]
pub struct PredictService {
    config: Arc<PredictConfig>,
    shared: Arc<SharedIndex>,
    keeper: Keeper,
    seeker: Seeker,
    compiler: QueryCompiler,
    /// Generation of the last saved snapshot. Held for the whole save.
    saved_generation: Arc<Mutex<u64>>,
}

impl PredictService {
    /// Validates `config` and builds the service, restoring the last
    /// snapshot when `restore_on_start` is set.
    pub fn open(config: PredictConfig) -> Result<Self> {
        config.validate()?;

        let data = if config.restore_on_start {
            let (index_path, items_path) = artifact_paths(&config)?;
            match persistence::load_snapshot(&index_path, &items_path)? {
                Some(data) => data,
                None => {
                    tracing::info!(
                        index = %index_path.display(),
                        "No snapshot found, starting with an empty index"
                    );
                    IndexData::default()
                }
            }
        } else {
            IndexData::default()
        };

        let service = Self::with_data(config, data);
        let stats = service.stats();
        tracing::info!(
            keys = stats.keys,
            items = stats.items,
            "Opened predict service"
        );
        Ok(service)
    }

    fn with_data(config: PredictConfig, data: IndexData) -> Self {
        let config = Arc::new(config);
        let shared = Arc::new(SharedIndex::new(data));
        Self {
            keeper: Keeper::new(Arc::clone(&shared), Arc::clone(&config)),
            seeker: Seeker::new(Arc::clone(&shared), Arc::clone(&config)),
            compiler: QueryCompiler::new(Arc::clone(&config)),
            saved_generation: Arc::new(Mutex::new(shared.generation())),
            config,
            shared,
        }
    }

    pub fn config(&self) -> &PredictConfig {
        &self.config
    }

    /// Attaches `document` to every key, replacing it when `upsert` is set.
    pub fn attach<K: AsRef<[u8]>>(&self, keys: &[K], document: Value, upsert: bool) -> Result<bool> {
        let item = Item::from_document(document, &self.config.id_key)?;
        self.keeper.attach(keys, item, upsert)
    }

    /// Detaches the item identified by `document` from every key.
    ///
    /// Only the id member of `document` is read.
    pub fn detach<K: AsRef<[u8]>>(&self, keys: &[K], document: &Value) -> Result<bool> {
        let Value::Object(document) = document else {
            return Err(PredictError::InvalidInput(
                "item must be a JSON object".to_string(),
            ));
        };
        let id = extract_item_id(document, &self.config.id_key)?;
        self.keeper.detach(keys, id)
    }

    /// Runs a query given as raw JSON.
    pub fn predict(&self, payload: &[u8]) -> Result<PredictResponse> {
        let query = self
            .compiler
            .compile_bytes(payload)
            .inspect_err(|error| tracing::debug!(%error, "Rejected query payload"))?;
        Ok(self.execute(&query))
    }

    /// Runs a query given as decoded JSON.
    pub fn predict_value(&self, payload: &Value) -> Result<PredictResponse> {
        let query = self
            .compiler
            .compile(payload)
            .inspect_err(|error| tracing::debug!(%error, "Rejected query payload"))?;
        Ok(self.execute(&query))
    }

    /// Runs a compiled query. Projection happens after the read lock is released.
    pub fn execute(&self, query: &Query) -> PredictResponse {
        let result = self.seeker.seek(query);
        PredictResponse {
            items: result
                .items
                .iter()
                .map(|item| query.projection.apply(&item.document))
                .collect(),
            echo: query.echo.clone(),
        }
    }

    pub fn stats(&self) -> IndexStats {
        self.shared.stats()
    }

    /// Writes a snapshot to the configured data directory.
    pub fn save(&self) -> Result<SavedSnapshot> {
        let mut saved_generation = self.saved_generation.lock();
        let snapshot = self.save_locked()?;
        *saved_generation = snapshot.generation;
        Ok(snapshot)
    }

    /// Writes a snapshot only if the index changed since the last one.
    pub fn save_if_dirty(&self) -> Result<Option<SavedSnapshot>> {
        let mut saved_generation = self.saved_generation.lock();
        if self.shared.generation() == *saved_generation {
            return Ok(None);
        }
        let snapshot = self.save_locked()?;
        *saved_generation = snapshot.generation;
        Ok(Some(snapshot))
    }

    fn save_locked(&self) -> Result<SavedSnapshot> {
        let (index_path, items_path) = artifact_paths(&self.config)?;
        persistence::save_snapshot(&self.shared, &index_path, &items_path)
    }

    /// Starts the background snapshot worker described by the config.
    ///
    /// Returns None when neither periodic snapshots nor `store_on_exit` are
    /// configured.
    pub fn spawn_snapshot_worker(&self) -> Result<Option<SnapshotWorker>> {
        let interval = match self.config.store_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        if interval.is_none() && !self.config.store_on_exit {
            return Ok(None);
        }
        SnapshotWorker::spawn(self.clone(), interval, self.config.store_on_exit).map(Some)
    }
}

fn artifact_paths(config: &PredictConfig) -> Result<(PathBuf, PathBuf)> {
    match (config.index_path(), config.items_path()) {
        (Some(index), Some(items)) => Ok((index, items)),
        _ => Err(PredictError::InvalidConfig(
            "data_dir is required for persistence".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    fn service() -> PredictService {
        PredictService::open(PredictConfig::default()).unwrap()
    }

    fn ids(response: &PredictResponse) -> Vec<u64> {
        response
            .items
            .iter()
            .map(|item| item["id"].as_u64().unwrap())
            .collect()
    }

    #[test]
    fn scenario_overlapping_keys() {
        let service = service();
        assert!(service
            .attach(
                &["abcdefg", "abcdefghi", "abdef"],
                json!({"id": 10086, "name": "wumch"}),
                false
            )
            .unwrap());
        assert!(service
            .attach(
                &["abcdrg", "abcdef454i", "abdefy"],
                json!({"id": 10087, "name": "predict"}),
                false
            )
            .unwrap());

        let response = service.predict(br#"{"prefix": "abc", "num": 10}"#).unwrap();
        let mut found = ids(&response);
        found.sort_unstable();
        assert_eq!(found, vec![10086, 10087]);

        let response = service.predict(br#"{"prefix": "abdef"}"#).unwrap();
        let mut found = ids(&response);
        found.sort_unstable();
        assert_eq!(found, vec![10086, 10087]);
    }

    #[test]
    fn attach_then_query_round_trip() {
        let service = service();
        service
            .attach(&["hello"], json!({"id": 1, "title": "Hello"}), false)
            .unwrap();
        let response = service.predict_value(&json!({"prefix": "hel"})).unwrap();
        assert_eq!(response.items, vec![json!({"id": 1, "title": "Hello"})]);
    }

    #[test]
    fn upsert_replaces_document() {
        let service = service();
        service
            .attach(&["abc"], json!({"id": 1, "v": 1}), false)
            .unwrap();
        assert!(!service
            .attach(&["abc"], json!({"id": 1, "v": 2}), false)
            .unwrap());
        assert!(service
            .attach(&["abc"], json!({"id": 1, "v": 3}), true)
            .unwrap());

        let response = service.predict_value(&json!({"prefix": "ab"})).unwrap();
        assert_eq!(response.items, vec![json!({"id": 1, "v": 3})]);
    }

    #[test]
    fn detach_removes_item_everywhere() {
        let service = service();
        service
            .attach(&["abc", "abd"], json!({"id": 1}), false)
            .unwrap();
        service.attach(&["abe"], json!({"id": 2}), false).unwrap();

        assert!(service.detach(&["abc"], &json!({"id": 1})).unwrap());
        assert_eq!(
            ids(&service.predict_value(&json!({"prefix": "ab"})).unwrap()),
            vec![1, 2]
        );
        assert!(service.detach(&["abd"], &json!({"id": 1})).unwrap());
        assert_eq!(
            ids(&service.predict_value(&json!({"prefix": "ab"})).unwrap()),
            vec![2]
        );
        assert_eq!(service.stats().items, 1);
        assert_eq!(service.stats().keys, 1);

        assert!(!service.detach(&["abc"], &json!({"id": 1})).unwrap());
        assert!(service.detach(&["abc"], &json!({"name": "x"})).is_err());
    }

    #[test]
    fn partial_detach_keeps_remaining_keys() {
        let service = service();
        service
            .attach(&["ab", "abc"], json!({"id": 1}), false)
            .unwrap();
        assert!(service.detach(&["ab"], &json!({"id": 1})).unwrap());

        {
            let data = service.shared.read();
            assert_eq!(data.trie.lookup(b"ab"), None);
            assert!(data.trie.lookup(b"abc").is_some());
            assert!(data.farm.contains_item(1));
        }
        assert_eq!(
            ids(&service.predict_value(&json!({"prefix": "abc"})).unwrap()),
            vec![1]
        );

        assert!(service.detach(&["abc"], &json!({"id": 1})).unwrap());
        assert!(service
            .predict_value(&json!({"prefix": "ab"}))
            .unwrap()
            .items
            .is_empty());
        assert_eq!(service.stats().items, 0);
        assert_eq!(service.stats().nodes, 1);
    }

    #[test]
    fn null_filter_tests_absence() {
        let service = PredictService::open(PredictConfig {
            prefix_min_len: 1,
            ..PredictConfig::default()
        })
        .unwrap();
        service
            .attach(&["a"], json!({"id": 1, "age": 30}), false)
            .unwrap();
        service.attach(&["a"], json!({"id": 2}), false).unwrap();

        let query = |payload: Value| ids(&service.predict_value(&payload).unwrap());
        assert_eq!(query(json!({"prefix": "a", "filters": {"age": null}})), vec![2]);
        assert_eq!(query(json!({"prefix": "a", "filters": {"age": 30}})), vec![1]);
        assert_eq!(query(json!({"prefix": "a", "excludes": [2]})), vec![1]);
    }

    #[test]
    fn exclude_vetoes_filter() {
        let service = service();
        service
            .attach(&["abc"], json!({"id": 1, "kind": "a"}), false)
            .unwrap();
        let response = service
            .predict_value(&json!({
                "prefix": "ab",
                "filters": {"kind": "a"},
                "excludes": {"kind": "a"},
            }))
            .unwrap();
        assert!(response.items.is_empty());
    }

    #[test]
    fn echo_and_projection_in_response() {
        let service = PredictService::open(PredictConfig {
            invisible_fields: vec!["secret".to_string()],
            ..PredictConfig::default()
        })
        .unwrap();
        service
            .attach(
                &["abc"],
                json!({"id": 1, "name": "n", "secret": "s"}),
                false,
            )
            .unwrap();

        let response = service
            .predict_value(&json!({"prefix": "ab", "echo": {"seq": 4}}))
            .unwrap();
        assert_eq!(response.items, vec![json!({"id": 1, "name": "n"})]);
        assert_eq!(response.echo, Some(json!({"seq": 4})));

        let response = service
            .predict_value(&json!({"prefix": "ab", "fields": ["name", "secret"]}))
            .unwrap();
        assert_eq!(response.items, vec![json!({"name": "n"})]);

        let serialized = serde_json::to_value(&response).unwrap();
        assert_eq!(serialized, json!({"items": [{"name": "n"}]}));
    }

    #[test]
    fn malformed_requests_are_classified() {
        let service = service();
        let error = service.predict(b"[1, 2]").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Malformed);
        let error = service
            .attach(&["abc"], json!({"name": "no id"}), false)
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn save_and_restore_preserve_results() {
        let dir = tempfile::tempdir().unwrap();
        let config = PredictConfig {
            data_dir: Some(dir.path().to_path_buf()),
            restore_on_start: true,
            ..PredictConfig::default()
        };

        let service = PredictService::open(config.clone()).unwrap();
        for (id, keys) in [(1, vec!["apple", "apricot"]), (2, vec!["apple"]), (3, vec!["banana"])] {
            service
                .attach(&keys, json!({"id": id, "n": id * 10}), false)
                .unwrap();
        }
        let queries = [
            json!({"prefix": "ap"}),
            json!({"prefix": "ba"}),
            json!({"prefix": "ap", "filters": {"n": {"$min": 15}}}),
        ];
        let before: Vec<_> = queries
            .iter()
            .map(|query| service.predict_value(query).unwrap())
            .collect();
        service.save().unwrap();
        assert!(service.save_if_dirty().unwrap().is_none());

        let restored = PredictService::open(config).unwrap();
        let after: Vec<_> = queries
            .iter()
            .map(|query| restored.predict_value(query).unwrap())
            .collect();
        assert_eq!(before, after);
        assert_eq!(restored.stats(), service.stats());
    }

    #[test]
    fn restore_without_artifacts_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let service = PredictService::open(PredictConfig {
            data_dir: Some(dir.path().to_path_buf()),
            restore_on_start: true,
            ..PredictConfig::default()
        })
        .unwrap();
        assert_eq!(service.stats().items, 0);
    }

    #[test]
    fn save_without_data_dir_is_a_config_error() {
        assert!(matches!(
            service().save(),
            Err(PredictError::InvalidConfig(_))
        ));
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let service = service();
        let writers: Vec<_> = (0..4u32)
            .map(|writer| {
                let service = service.clone();
                thread::spawn(move || {
                    for n in 0..50u32 {
                        let id = writer * 1000 + n;
                        let key = format!("key{writer}-{n}");
                        let keys = [key.as_str(), "key-shared"];
                        service.attach(&keys, json!({"id": id}), false).unwrap();
                        if n % 2 == 1 {
                            assert!(service.detach(&keys, &json!({"id": id})).unwrap());
                        }
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        {
                            let data = service.shared.read();
                            for (funnel, members) in data.farm.funnels() {
                                assert!(!members.is_empty(), "empty funnel {funnel:?} kept");
                                for id in members.iter() {
                                    assert!(data.farm.contains_item(id), "dangling member {id}");
                                    assert!(data.farm.memberships(id) > 0);
                                }
                            }
                        }
                        let response = service
                            .predict_value(&json!({"prefix": "key", "num": 100}))
                            .unwrap();
                        let mut ids: Vec<u64> = response
                            .items
                            .iter()
                            .filter_map(|item| item["id"].as_u64())
                            .collect();
                        assert_eq!(ids.len(), response.items.len());
                        ids.sort_unstable();
                        ids.dedup();
                        assert_eq!(ids.len(), response.items.len());
                    }
                })
            })
            .collect();
        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }

        let stats = service.stats();
        assert_eq!(stats.items, 100);
        assert_eq!(stats.keys, 101);
        assert_eq!(stats.funnels, 101);
        let shared = service
            .predict_value(&json!({"prefix": "key-shared", "num": 100}))
            .unwrap();
        assert_eq!(shared.items.len(), 100);
        assert!(shared
            .items
            .iter()
            .all(|item| item["id"].as_u64().is_some_and(|id| id % 2 == 0)));
    }
}
