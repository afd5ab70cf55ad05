//! Fire-and-forget import/export.
//!
//! Each `spawn_*` method schedules the corresponding synchronous operation
//! on the blocking pool and returns immediately. Failures are logged, not
//! returned; completion order between overlapping jobs is unspecified,
//! though each job itself runs under the store lock.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::error;

use tagstore_types::TypeKey;

use crate::store::Store;

impl Store {
    fn spawn_io(
        self: &Arc<Self>,
        op: &'static str,
        path: PathBuf,
        run: impl FnOnce(&Store, &PathBuf) -> crate::error::StoreResult<()> + Send + 'static,
    ) {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = run(&store, &path) {
                error!(op, path = %path.display(), error = %e, "background store i/o failed");
            }
        });
    }

    /// Schedule a JSON export on the blocking pool.
    pub fn spawn_export_json(self: &Arc<Self>, path: PathBuf) {
        self.spawn_io("export_json", path, |s, p| s.export_json(p));
    }

    /// Schedule a JSON import on the blocking pool.
    pub fn spawn_import_json(self: &Arc<Self>, path: PathBuf) {
        self.spawn_io("import_json", path, |s, p| s.import_json(p).map(|_| ()));
    }

    /// Schedule a binary export on the blocking pool.
    pub fn spawn_export_binary(self: &Arc<Self>, path: PathBuf) {
        self.spawn_io("export_binary", path, |s, p| s.export_binary(p));
    }

    /// Schedule a binary import on the blocking pool.
    pub fn spawn_import_binary(self: &Arc<Self>, path: PathBuf) {
        self.spawn_io("import_binary", path, |s, p| s.import_binary(p).map(|_| ()));
    }

    /// Schedule an XML export on the blocking pool.
    pub fn spawn_export_xml(self: &Arc<Self>, path: PathBuf) {
        self.spawn_io("export_xml", path, |s, p| s.export_xml(p));
    }

    /// Schedule an XML import on the blocking pool.
    pub fn spawn_import_xml(self: &Arc<Self>, path: PathBuf) {
        self.spawn_io("import_xml", path, |s, p| s.import_xml(p).map(|_| ()));
    }

    /// Schedule a CSV export on the blocking pool.
    pub fn spawn_export_csv(self: &Arc<Self>, path: PathBuf) {
        self.spawn_io("export_csv", path, |s, p| s.export_csv(p));
    }

    /// Schedule a CSV import on the blocking pool.
    pub fn spawn_import_csv(self: &Arc<Self>, path: PathBuf) {
        self.spawn_io("import_csv", path, |s, p| s.import_csv(p).map(|_| ()));
    }

    /// Schedule a single-object JSON import on the blocking pool.
    pub fn spawn_import_single_json(self: &Arc<Self>, path: PathBuf, type_key: TypeKey, tag: String) {
        self.spawn_io("import_single_json", path, move |s, p| {
            s.import_single_json(p, &type_key, &tag).map(|_| ())
        });
    }

    /// Schedule a single-object binary import on the blocking pool.
    pub fn spawn_import_single_binary(self: &Arc<Self>, path: PathBuf, type_key: TypeKey, tag: String) {
        self.spawn_io("import_single_binary", path, move |s, p| {
            s.import_single_binary(p, &type_key, &tag).map(|_| ())
        });
    }

    /// Schedule a single-object XML import on the blocking pool.
    pub fn spawn_import_single_xml(self: &Arc<Self>, path: PathBuf, type_key: TypeKey, tag: String) {
        self.spawn_io("import_single_xml", path, move |s, p| {
            s.import_single_xml(p, &type_key, &tag).map(|_| ())
        });
    }

    /// Schedule a single-object CSV import on the blocking pool.
    pub fn spawn_import_single_csv(self: &Arc<Self>, path: PathBuf, type_key: TypeKey, tag: String) {
        self.spawn_io("import_single_csv", path, move |s, p| {
            s.import_single_csv(p, &type_key, &tag).map(|_| ())
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::tempdir;

    use crate::store::Store;

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("background job did not finish in time");
    }

    #[tokio::test]
    async fn background_export_writes_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Arc::new(Store::new());
        store.add(42i32, "item1");

        store.spawn_export_json(path.clone());
        wait_for(|| path.exists()).await;

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"item1\""));
    }

    #[tokio::test]
    async fn background_import_lands_items() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");
        let source = Arc::new(Store::new());
        source.add(42i32, "item1");
        source.export_binary(&path).unwrap();

        let target = Arc::new(Store::new());
        target.add(0i32, "seed_i32");
        target.spawn_import_binary(path);
        wait_for(|| target.has_item("item1")).await;

        assert_eq!(target.get::<i32>("item1"), Some(42));
    }

    #[tokio::test]
    async fn background_failure_does_not_poison_the_store() {
        let store = Arc::new(Store::new());
        store.add(1i32, "a");
        store.spawn_import_json("/nonexistent/store.json".into());

        // Give the blocking task a chance to run and fail.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get::<i32>("a"), Some(1));
    }
}
