//! End-to-end sync passes against the in-memory backend

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assetsync_core::config::Settings;
use assetsync_storage::{MemoryStorage, Storage as _};
use assetsync_sync::{AssetOutcome, Outcome, Source, SyncObserver, SyncReport, Syncer};
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: impl AsRef<[u8]>) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn settings(root: &Path) -> Settings {
    Settings {
        backend: "dummy".to_string(),
        media_root: root.to_path_buf(),
        processors: Vec::new(),
        ..Settings::default()
    }
}

fn syncer(settings: Settings, storage: &Arc<MemoryStorage>) -> Syncer {
    Syncer::new(settings, storage.clone()).unwrap()
}

fn outcome_of<'a>(report: &'a SyncReport, path: &str) -> &'a Outcome {
    report
        .get(path)
        .unwrap_or_else(|| panic!("no outcome for {path}: {report:?}"))
}

#[tokio::test]
async fn test_second_pass_uploads_nothing() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "css/site.css", "a{color:red}");
    write(dir.path(), "img/a.png", [0u8, 1, 2, 3]);

    let storage = Arc::new(MemoryStorage::default());
    let syncer = syncer(settings(dir.path()), &storage);

    let first = syncer.run(false).await.unwrap();
    assert_eq!(first.uploaded(), 2);
    assert_eq!(storage.write_count(), 2);

    let second = syncer.run(false).await.unwrap();
    assert_eq!(second.uploaded(), 0);
    assert_eq!(second.skipped(), 2);
    assert_eq!(*outcome_of(&second, "img/a.png"), Outcome::SkippedUnchanged);
    assert_eq!(storage.write_count(), 2);
}

#[tokio::test]
async fn test_force_uploads_unchanged_assets() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "docs/a.txt", "a");

    let storage = Arc::new(MemoryStorage::default());
    let syncer = syncer(settings(dir.path()), &storage);

    syncer.run(false).await.unwrap();
    let forced = syncer.run(true).await.unwrap();
    assert_eq!(*outcome_of(&forced, "docs/a.txt"), Outcome::Uploaded);
    assert_eq!(storage.write_count(), 2);
}

#[tokio::test]
async fn test_changed_file_is_uploaded_again() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "docs/a.txt", "one");
    write(dir.path(), "docs/b.txt", "same");

    let storage = Arc::new(MemoryStorage::default());
    let syncer = syncer(settings(dir.path()), &storage);
    syncer.run(false).await.unwrap();

    write(dir.path(), "docs/a.txt", "two");
    let report = syncer.run(false).await.unwrap();
    assert_eq!(*outcome_of(&report, "docs/a.txt"), Outcome::Uploaded);
    assert_eq!(*outcome_of(&report, "docs/b.txt"), Outcome::SkippedUnchanged);
    assert_eq!(storage.get("docs/a.txt").unwrap().body.as_ref(), b"two");
}

#[tokio::test]
async fn test_joined_css_bundle() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "css/1.css", "a{color:red}");
    write(dir.path(), "css/2.css", "b{color:blue}");

    let mut settings = settings(dir.path());
    settings.css_path = "css".to_string();
    settings.joined.insert(
        "joined.css".to_string(),
        vec!["1.css".to_string(), "2.css".to_string()],
    );

    let storage = Arc::new(MemoryStorage::default());
    let report = syncer(settings, &storage).run(false).await.unwrap();

    assert_eq!(*outcome_of(&report, "css/joined.css"), Outcome::Uploaded);
    let bundle = storage.get("css/joined.css").unwrap();
    assert_eq!(bundle.body.as_ref(), b"a{color:red}\nb{color:blue}\n");
    assert_eq!(bundle.content_type, "text/css");

    // Bundle members are still synced as regular files
    assert!(storage.get("css/1.css").is_some());
    assert!(storage.get("css/2.css").is_some());
    assert_eq!(report.outcomes[0].remote_path, "css/joined.css");
}

#[tokio::test]
async fn test_bundle_output_shadows_tree_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "css/1.css", "a{}");
    write(dir.path(), "css/joined.css", "stale build output");

    let mut settings = settings(dir.path());
    settings.css_path = "css".to_string();
    settings
        .joined
        .insert("joined.css".to_string(), vec!["1.css".to_string()]);

    let storage = Arc::new(MemoryStorage::default());
    let report = syncer(settings, &storage).run(false).await.unwrap();

    let for_bundle = report
        .outcomes
        .iter()
        .filter(|o| o.remote_path == "css/joined.css")
        .count();
    assert_eq!(for_bundle, 1);
    assert_eq!(storage.get("css/joined.css").unwrap().body.as_ref(), b"a{}\n");
}

#[tokio::test]
async fn test_non_css_js_bundle_is_not_combinable() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", "a");

    let mut settings = settings(dir.path());
    settings
        .joined
        .insert("notes.txt".to_string(), vec!["a.txt".to_string()]);

    let storage = Arc::new(MemoryStorage::default());
    let report = syncer(settings, &storage).run(false).await.unwrap();

    assert_eq!(*outcome_of(&report, "notes.txt"), Outcome::SkippedNotCombinable);
    assert!(storage.paths().is_empty());
}

#[tokio::test]
async fn test_non_css_js_bundle_keeps_tree_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "img/logo.png", [0x89u8, b'P', b'N', b'G']);

    let mut settings = settings(dir.path());
    settings
        .joined
        .insert("img/logo.png".to_string(), vec!["a.png".to_string()]);

    let storage = Arc::new(MemoryStorage::default());
    let report = syncer(settings, &storage).run(false).await.unwrap();

    let outcomes: Vec<&Outcome> = report
        .outcomes
        .iter()
        .filter(|o| o.remote_path == "img/logo.png")
        .map(|o| &o.outcome)
        .collect();
    assert_eq!(outcomes, vec![&Outcome::SkippedNotCombinable, &Outcome::Uploaded]);
    assert_eq!(storage.paths(), vec!["img/logo.png"]);
    assert_eq!(
        storage.get("img/logo.png").unwrap().body.as_ref(),
        &[0x89u8, b'P', b'N', b'G']
    );
}

#[tokio::test]
async fn test_hidden_private_and_root_files_are_not_synced() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "top.txt", "root files are ignored");
    write(dir.path(), ".hidden/x.txt", "x");
    write(dir.path(), "_private/y.txt", "y");
    write(dir.path(), "docs/.secret", "s");
    write(dir.path(), "docs/_draft.txt", "d");
    write(dir.path(), "docs/_drafts/old.txt", "o");
    write(dir.path(), "docs/ok.txt", "ok");
    write(dir.path(), "docs/nested/deep.txt", "deep");

    let storage = Arc::new(MemoryStorage::default());
    let report = syncer(settings(dir.path()), &storage).run(false).await.unwrap();

    assert_eq!(storage.paths(), vec!["docs/nested/deep.txt", "docs/ok.txt"]);
    assert_eq!(report.outcomes.len(), 2);
}

#[tokio::test]
async fn test_failed_asset_does_not_stop_the_pass() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "docs/a.txt", "a");
    write(dir.path(), "docs/b.txt", "b");
    write(dir.path(), "docs/c.txt", "c");

    let storage = Arc::new(MemoryStorage::default());
    storage.fail_on("docs/b.txt");
    let report = syncer(settings(dir.path()), &storage).run(false).await.unwrap();

    assert_eq!(report.uploaded(), 2);
    assert_eq!(report.failed(), 1);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "docs/b.txt");
    assert!(failures[0].1.contains("injected failure"));
    assert_eq!(storage.close_count(), 1);
}

#[tokio::test]
async fn test_open_failure_aborts_without_uploads() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "docs/a.txt", "a");

    let storage = Arc::new(MemoryStorage::default().failing_open());
    let result = syncer(settings(dir.path()), &storage).run(false).await;

    assert!(result.is_err());
    assert_eq!(storage.write_count(), 0);
    assert_eq!(storage.close_count(), 0);
}

#[tokio::test]
async fn test_close_failure_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "docs/a.txt", "a");

    let storage = Arc::new(MemoryStorage::default().failing_close());
    let report = syncer(settings(dir.path()), &storage).run(false).await.unwrap();

    assert_eq!(report.uploaded(), 1);
    assert!(report.close_error.is_some());
    assert!(!report.is_clean());
}

#[tokio::test]
async fn test_parallel_uploads_are_bounded() {
    let dir = TempDir::new().unwrap();
    for i in 0..12 {
        write(dir.path(), &format!("docs/{i:02}.txt"), format!("file {i}"));
    }

    let storage = Arc::new(MemoryStorage::default().with_write_delay(Duration::from_millis(20)));
    let mut settings = settings(dir.path());
    settings.workers = 4;
    let report = syncer(settings, &storage).run(false).await.unwrap();

    assert_eq!(report.uploaded(), 12);
    assert_eq!(storage.paths().len(), 12);
    let peak = storage.max_concurrent_writes();
    assert!(peak > 1, "uploads never overlapped");
    assert!(peak <= 4, "{peak} uploads ran at once");
    assert_eq!(storage.close_count(), 1);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_external_processor_runs_alongside_uploads() {
    let dir = TempDir::new().unwrap();
    for i in 0..6 {
        write(dir.path(), &format!("docs/{i}.txt"), format!("file {i}"));
    }

    let storage = Arc::new(MemoryStorage::default().with_write_delay(Duration::from_millis(20)));
    let mut settings = settings(dir.path());
    settings.workers = 3;
    settings.processors = vec!["command:tr a-z A-Z".to_string()];
    let report = syncer(settings, &storage).run(false).await.unwrap();

    assert_eq!(report.uploaded(), 6);
    for i in 0..6 {
        let object = storage.get(&format!("docs/{i}.txt")).unwrap();
        assert_eq!(object.body.as_ref(), format!("FILE {i}").as_bytes());
    }
}

#[tokio::test]
async fn test_minifiers_follow_serve_remote() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "css/site.css", "a {\n  color: red;\n}\n");

    let local = Settings {
        serve_remote: false,
        processors: vec!["css-minifier".to_string()],
        ..settings(dir.path())
    };
    let storage = Arc::new(MemoryStorage::default());
    syncer(local, &storage).run(false).await.unwrap();
    assert_eq!(
        storage.get("css/site.css").unwrap().body.as_ref(),
        b"a {\n  color: red;\n}\n"
    );

    let remote = Settings {
        serve_remote: true,
        processors: vec!["css-minifier".to_string()],
        ..settings(dir.path())
    };
    let storage = Arc::new(MemoryStorage::default());
    syncer(remote, &storage).run(false).await.unwrap();
    assert_eq!(storage.get("css/site.css").unwrap().body.as_ref(), b"a{color:red;}");
}

#[test]
fn test_unknown_processor_is_rejected_up_front() {
    let dir = TempDir::new().unwrap();
    let settings = Settings {
        processors: vec!["nope".to_string()],
        ..settings(dir.path())
    };
    let err = Syncer::new(settings, Arc::new(MemoryStorage::default())).unwrap_err();
    assert!(err.downcast_ref::<assetsync_core::ConfigError>().is_some());
}

#[tokio::test]
async fn test_large_text_gets_gzip_companion_once() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "docs/big.txt", vec![b'x'; 2000]);
    write(dir.path(), "docs/small.txt", vec![b'x'; 1024]);

    let storage = Arc::new(MemoryStorage::default());
    let syncer = syncer(settings(dir.path()), &storage);

    let report = syncer.run(false).await.unwrap();
    assert_eq!(report.uploaded(), 2);
    assert_eq!(
        storage.paths(),
        vec!["docs/big.txt", "docs/big.txt.gz", "docs/small.txt"]
    );
    assert_eq!(storage.get("docs/big.txt.gz").unwrap().content_encoding, Some("gzip"));
    assert_eq!(storage.write_count(), 3);

    let again = syncer.run(false).await.unwrap();
    assert_eq!(again.uploaded(), 0);
    assert_eq!(storage.write_count(), 3);
}

#[tokio::test]
async fn test_upload_single_asset() {
    let dir = TempDir::new().unwrap();
    let settings = Settings {
        serve_remote: false,
        processors: vec!["css-minifier".to_string()],
        ..settings(dir.path())
    };
    let storage = Arc::new(MemoryStorage::default());
    let syncer = syncer(settings, &storage);

    let outcome = syncer
        .upload("/css/", "extra.css", b"a {  }".to_vec(), false)
        .await
        .unwrap();
    assert_eq!(outcome.remote_path, "css/extra.css");
    assert_eq!(outcome.outcome, Outcome::Uploaded);
    // Processors run as if serving remotely
    assert_eq!(storage.get("css/extra.css").unwrap().body.as_ref(), b"a{}");
    assert_eq!(storage.open_count(), 1);
    assert_eq!(storage.close_count(), 1);

    let again = syncer
        .upload("css", "extra.css", b"a {  }".to_vec(), false)
        .await
        .unwrap();
    assert_eq!(again.outcome, Outcome::SkippedUnchanged);
}

#[tokio::test]
async fn test_render_bundle_does_not_upload() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "js/a.js", "var a = 1");
    write(dir.path(), "js/b.js", "var b = 2");

    let mut settings = settings(dir.path());
    settings.js_path = "js".to_string();
    settings.joined.insert(
        "app.js".to_string(),
        vec!["a.js".to_string(), "b.js".to_string()],
    );
    let storage = Arc::new(MemoryStorage::default());
    let syncer = syncer(settings, &storage);

    let asset = syncer.render_bundle("app.js").unwrap().unwrap();
    assert_eq!(asset.remote_path, "js/app.js");
    assert_eq!(asset.bytes, b"var a = 1;\nvar b = 2;\n");
    assert!(storage.paths().is_empty());
    assert_eq!(storage.open_count(), 0);

    assert!(syncer.render_bundle("missing.js").is_err());
}

#[tokio::test]
async fn test_media_url() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new("http://cdn.example.com/"));

    let local = Settings {
        serve_remote: false,
        media_url: "/static/".to_string(),
        ..settings(dir.path())
    };
    assert_eq!(syncer(local, &storage).media_url(false).await.unwrap(), "/static");

    let remote = settings(dir.path());
    let syncer = syncer(remote, &storage);
    assert_eq!(syncer.media_url(false).await.unwrap(), "http://cdn.example.com");
    assert_eq!(syncer.media_url(true).await.unwrap(), "http://cdn.example.com");
}

#[tokio::test]
async fn test_plan_lists_bundles_then_tree() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "css/1.css", "a");
    write(dir.path(), "img/a.png", "png");

    let mut settings = settings(dir.path());
    settings.css_path = "css".to_string();
    settings
        .joined
        .insert("all.css".to_string(), vec!["1.css".to_string()]);

    let storage = Arc::new(MemoryStorage::default());
    let plan = syncer(settings, &storage).plan();
    let paths: Vec<_> = plan.iter().map(|p| p.remote_path.as_str()).collect();
    assert_eq!(paths, vec!["css/all.css", "css/1.css", "img/a.png"]);
    assert!(matches!(plan[0].source, Source::Bundle { .. }));
    assert_eq!(plan[2].content_type, "image/png");
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl SyncObserver for Recorder {
    fn on_start(&self, storage: &str, total: usize) {
        self.events.lock().unwrap().push(format!("start {storage} {total}"));
    }

    fn on_outcome(&self, outcome: &AssetOutcome) {
        self.events
            .lock()
            .unwrap()
            .push(format!("asset {}", outcome.remote_path));
    }

    fn on_finish(&self, report: &SyncReport) {
        self.events
            .lock()
            .unwrap()
            .push(format!("finish {}", report.outcomes.len()));
    }
}

#[tokio::test]
async fn test_observer_sees_start_outcomes_and_finish() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "docs/a.txt", "a");
    write(dir.path(), "docs/b.txt", "b");

    let storage = Arc::new(MemoryStorage::default());
    let recorder = Arc::new(Recorder::default());
    syncer(settings(dir.path()), &storage)
        .with_observer(recorder.clone())
        .run(false)
        .await
        .unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec!["start dummy 2", "asset docs/a.txt", "asset docs/b.txt", "finish 2"]
    );
    // Session was released after the pass
    assert!(storage.stored_checksum("docs/a.txt").await.is_err());
}
