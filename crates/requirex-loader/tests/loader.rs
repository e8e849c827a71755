//! Loader Integration Tests
//!
//! Each test builds a small module tree in a temporary directory and drives
//! it through the public loader API.

use requirex_loader::{
    Disposition, EventKind, Exports, ImportOptions, Loader, LoaderConfig, LoaderError,
    LoaderEvent, ResolveOptions, Resolved, WorkspaceId,
};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::{TempDir, tempdir};

/// Create a temporary tree from `(relative path, contents)` pairs and return
/// it with its canonical root
fn tree(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    for (name, contents) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
    (dir, root)
}

/// Count `Evaluate` events per loader
fn count_evaluations(loader: &Loader) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    loader.events().on(EventKind::Evaluate, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Disposition::Propagate
    });
    count
}

fn options(root: &Path) -> ResolveOptions {
    ResolveOptions::new().basedir(root)
}

// Resolution

#[tokio::test]
async fn test_resolve_is_idempotent_and_cached() {
    let (_dir, root) = tree(&[("lib/util.js", "exports.ok = true")]);
    let loader = Loader::default();
    let options = options(&root);

    let first = loader.resolve("./lib/util", &options).await.unwrap();
    let ops = loader.probe().fs_operations();
    let second = loader.resolve("./lib/util", &options).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, Resolved::Path(root.join("lib/util.js")));
    assert_eq!(loader.probe().fs_operations(), ops);
    assert!(loader.resolve_cache().hits() >= 1);
}

#[tokio::test]
async fn test_extension_precedence() {
    let (_dir, root) = tree(&[("data.js", "exports.kind = \"js\""), ("data.json", "{\"kind\":\"json\"}")]);
    let loader = Loader::default();

    let default = loader.resolve("./data", &options(&root)).await.unwrap();
    assert_eq!(default.path(), Some(root.join("data.js").as_path()));

    let json_first = options(&root).extensions([".json", ".js"]);
    let resolved = loader.resolve("./data", &json_first).await.unwrap();
    assert_eq!(resolved.path(), Some(root.join("data.json").as_path()));
}

#[tokio::test]
async fn test_module_directory_walk_and_manifest() {
    let (_dir, root) = tree(&[
        ("node_modules/shared/index.js", "exports.name = \"shared\""),
        ("node_modules/pkg/package.json", "{\"main\": \"lib/entry\"}"),
        ("node_modules/pkg/lib/entry.js", "exports.name = \"pkg\""),
        ("app/src/main.js", "exports.shared = require(\"shared\").name\nexports.pkg = require(\"pkg\").name"),
    ]);
    let loader = Loader::default();

    let main = loader
        .require_with(&options(&root.join("app/src")), "./main")
        .await
        .unwrap();
    assert_eq!(main.get("shared"), Some(&json!("shared")));
    assert_eq!(main.get("pkg"), Some(&json!("pkg")));

    let pkg = loader.resolve("pkg", &options(&root.join("app"))).await.unwrap();
    assert_eq!(pkg.path(), Some(root.join("node_modules/pkg/lib/entry.js").as_path()));
}

#[tokio::test]
async fn test_missing_module_is_not_found() {
    let (_dir, root) = tree(&[]);
    let loader = Loader::default();

    let err = loader.require_with(&options(&root), "./nope").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, LoaderError::ModuleNotFound { .. }));

    // The miss is cached until the path is invalidated
    let ops = loader.probe().fs_operations();
    assert!(loader.resolve("./nope", &options(&root)).await.is_err());
    assert_eq!(loader.probe().fs_operations(), ops);

    fs::write(root.join("nope.js"), "exports.found = true").unwrap();
    loader.invalidate(root.join("nope.js"));
    let exports = loader.require_with(&options(&root), "./nope").await.unwrap();
    assert_eq!(exports.get("found"), Some(&json!(true)));
}

// Loading

#[tokio::test]
async fn test_concurrent_loads_evaluate_once() {
    let (_dir, root) = tree(&[("slow.js", "sleep(30)\nexports.value = 7")]);
    let loader = Loader::default();
    let evaluations = count_evaluations(&loader);
    let options = options(&root);

    let loads = (0..8).map(|_| loader.require_with(&options, "./slow"));
    let results = futures::future::join_all(loads).await;

    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    for exports in results {
        assert_eq!(exports.unwrap().get("value"), Some(&json!(7)));
    }
    assert_eq!(loader.content().reads(), 1);
}

#[tokio::test]
async fn test_require_all_preserves_order() {
    let (_dir, root) = tree(&[
        ("slow.js", "sleep(50)\nexports.name = \"slow\""),
        ("fast.js", "exports.name = \"fast\""),
        ("data.json", "{\"name\": \"data\"}"),
    ]);
    let loader = Loader::default();

    let exports = loader
        .require_all(&options(&root), &["./slow", "./fast", "./data.json"])
        .await
        .unwrap();
    let names: Vec<_> = exports.iter().map(|e| e.get("name").cloned()).collect();
    assert_eq!(names, vec![Some(json!("slow")), Some(json!("fast")), Some(json!("data"))]);
}

#[tokio::test]
async fn test_require_callback() {
    let (_dir, root) = tree(&[("a.js", "exports.a = 1"), ("b.json", "[1, 2]")]);
    let loader = Loader::default();
    let (tx, rx) = tokio::sync::oneshot::channel();

    let handle = loader.require_callback(
        options(&root),
        vec!["./a".to_string(), "./b.json".to_string()],
        move |outcome| {
            let _ = tx.send(outcome);
        },
    );
    handle.await.unwrap();

    let exports = rx.await.unwrap().unwrap();
    assert_eq!(exports[0].get("a"), Some(&json!(1)));
    assert_eq!(exports[1].to_json(), json!([1, 2]));
}

#[test]
fn test_load_sync_without_runtime() {
    let (_dir, root) = tree(&[
        ("main.js", "const dep = require(\"./dep\")\nexports.total = dep.n\nexports.file = __filename"),
        ("dep.js", "#!/usr/bin/env node\nexports.n = 3"),
    ]);
    let loader = Loader::default();

    let exports = loader.load_sync(&options(&root), "./main").unwrap();
    assert_eq!(exports.get("total"), Some(&json!(3)));
    assert_eq!(
        exports.get("file"),
        Some(&json!(root.join("main.js").display().to_string()))
    );
    assert!(loader.modules().contains(&root.join("dep.js")));
}

#[tokio::test]
async fn test_require_sync_variants() {
    let (_dir, root) = tree(&[
        ("main.js", "const dep = require(\"./dep\")\nexports.total = dep.n"),
        ("dep.js", "exports.n = 3"),
        ("data.json", "{\"name\": \"data\"}"),
    ]);
    let loader = Loader::default();
    let options = options(&root);

    let main = loader.require_sync_with(&options, "./main").await.unwrap();
    assert_eq!(main.get("total"), Some(&json!(3)));
    assert!(loader.modules().contains(&root.join("dep.js")));

    let all = loader
        .require_sync_all(&options, &["./data.json", "./dep", "./main"])
        .await
        .unwrap();
    assert_eq!(all[0].get("name"), Some(&json!("data")));
    assert_eq!(all[1].get("n"), Some(&json!(3)));
    assert_eq!(all[2].get("total"), Some(&json!(3)));

    let err = loader
        .require_sync_all(&options, &["./dep", "./absent"])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_require_waits_for_pending_load() {
    let (_dir, root) = tree(&[("slow.js", "sleep(200)\nexports.value = 7")]);
    let loader = Loader::default();
    let evaluations = count_evaluations(&loader);
    let options = options(&root);

    let pending = tokio::spawn({
        let loader = loader.clone();
        let options = options.clone();
        async move { loader.require_with(&options, "./slow").await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(loader.modules().contains(&root.join("slow.js")));

    let sync = loader.require_sync_with(&options, "./slow").await.unwrap();
    assert_eq!(sync.get("value"), Some(&json!(7)));

    let background = pending.await.unwrap().unwrap();
    assert_eq!(background.get("value"), Some(&json!(7)));
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_try_module_falls_back() {
    let (_dir, root) = tree(&[("second.js", "exports.picked = 2"), ("broken.js", "throw \"bad\"")]);
    let loader = Loader::default();
    let options = options(&root);

    let picked = loader
        .try_module_with(&options, &["./first", "./broken", "./second"], Exports::empty())
        .await;
    assert_eq!(picked.get("picked"), Some(&json!(2)));

    let fallback = loader
        .try_module_with(&options, &["./none"], Exports::from(json!("default")))
        .await;
    assert_eq!(fallback.to_json(), json!("default"));
}

#[tokio::test]
async fn test_json_module() {
    let (_dir, root) = tree(&[("config.json", "\u{feff}{\"port\": 8080}"), ("bad.json", "{port}")]);
    let loader = Loader::default();

    let config = loader.require_with(&options(&root), "./config.json").await.unwrap();
    assert_eq!(config.get("port"), Some(&json!(8080)));

    let err = loader.require_with(&options(&root), "./bad.json").await.unwrap_err();
    assert!(matches!(err, LoaderError::Json { .. }));
}

// Failure handling

#[tokio::test]
async fn test_failed_module_is_evicted_and_retried() {
    let (_dir, root) = tree(&[("flaky.js", "throw \"not yet\"")]);
    let loader = Loader::default();
    let evaluations = count_evaluations(&loader);
    let path = root.join("flaky.js");

    let err = loader.require_with(&options(&root), "./flaky").await.unwrap_err();
    assert!(err.is_evaluation());
    assert!(err.to_string().contains("not yet"));
    assert!(!loader.modules().contains(&path));

    fs::write(&path, "exports.ready = true").unwrap();
    loader.invalidate(&path);
    let exports = loader.require_with(&options(&root), "./flaky").await.unwrap();
    assert_eq!(exports.get("ready"), Some(&json!(true)));
    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_ignored_error_becomes_value() {
    let (_dir, root) = tree(&[("broken.js", "exports.partial = 1\nthrow \"boom\"")]);
    let loader = Loader::default();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    loader.events().on(EventKind::Error, move |event| {
        if let LoaderEvent::Error { target, .. } = event {
            log.lock().unwrap().push(target.clone());
        }
        Disposition::Ignore
    });

    let exports = loader.require_with(&options(&root), "./broken").await.unwrap();
    assert!(exports.is_error());
    assert!(exports.as_error().unwrap().to_string().contains("boom"));
    assert!(loader.modules().contains(&root.join("broken.js")));
    assert_eq!(*seen.lock().unwrap(), vec![root.join("broken.js")]);
}

#[tokio::test]
async fn test_ignored_error_is_linked_to_parent() {
    let (_dir, root) = tree(&[
        ("main.js", "const b = require(\"./broken\")\nexports.ok = true"),
        ("broken.js", "throw \"boom\""),
    ]);
    let loader = Loader::default();
    loader.events().on(EventKind::Error, |_| Disposition::Ignore);

    let main = loader.require_with(&options(&root), "./main").await.unwrap();
    assert_eq!(main.get("ok"), Some(&json!(true)));

    let record = loader.modules().get(&root.join("main.js")).unwrap();
    let children: Vec<PathBuf> = record
        .children()
        .iter()
        .map(|child| child.filename().to_path_buf())
        .collect();
    assert_eq!(children, vec![root.join("broken.js")]);
    assert!(loader.modules().get(&children[0]).unwrap().exports().is_error());
}

#[tokio::test]
async fn test_evaluation_timeout() {
    let (_dir, root) = tree(&[("hang.js", "sleep(2000)\nexports.done = true")]);
    let loader = Loader::new(LoaderConfig {
        evaluation_timeout_ms: 50,
        ..LoaderConfig::default()
    });

    let err = loader.require_with(&options(&root), "./hang").await.unwrap_err();
    assert!(matches!(err, LoaderError::Timeout { .. }));
    assert!(!loader.modules().contains(&root.join("hang.js")));
}

#[tokio::test]
async fn test_script_error_reports_line() {
    let (_dir, root) = tree(&[("typo.js", "exports.a = 1\nexports.b = missing")]);
    let loader = Loader::default();

    let err = loader.require_with(&options(&root), "./typo").await.unwrap_err();
    assert!(err.to_string().contains("line 2"));
}

// Events

/// Record every non-error event the loader emits
fn record_events(loader: &Loader) -> Arc<Mutex<Vec<LoaderEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::Load, EventKind::Loaded, EventKind::Evaluate, EventKind::Evaluated] {
        let log = Arc::clone(&events);
        loader.events().on(kind, move |event| {
            log.lock().unwrap().push(event.clone());
            Disposition::Propagate
        });
    }
    events
}

const DEP_SOURCE: &str = "exports.n = 3";

#[tokio::test]
async fn test_event_payloads() {
    let (_dir, root) = tree(&[
        ("main.js", "const dep = require(\"./dep\")\nexports.n = dep.n"),
        ("dep.js", DEP_SOURCE),
    ]);
    let main = root.join("main.js");
    let dep = root.join("dep.js");
    let loader = Loader::default();
    let events = record_events(&loader);

    loader.require_with(&options(&root), "./main").await.unwrap();
    let events = events.lock().unwrap();

    let kinds: Vec<(EventKind, &PathBuf)> = events.iter().map(|e| (e.kind(), e.target())).collect();
    assert_eq!(
        kinds,
        vec![
            (EventKind::Load, &main),
            (EventKind::Loaded, &main),
            (EventKind::Evaluate, &main),
            (EventKind::Load, &dep),
            (EventKind::Loaded, &dep),
            (EventKind::Evaluate, &dep),
            (EventKind::Evaluated, &dep),
            (EventKind::Evaluated, &main),
        ]
    );

    for event in events.iter() {
        match event {
            LoaderEvent::Load { target, source, sync } | LoaderEvent::Evaluate { target, source, sync } => {
                assert!(!sync);
                let expected = if *target == dep { Some(&main) } else { None };
                assert_eq!(source.as_ref(), expected);
            }
            LoaderEvent::Loaded { target, source, size, .. } => {
                if *target == dep {
                    assert_eq!(source.as_ref(), Some(&main));
                    assert_eq!(*size, DEP_SOURCE.len());
                } else {
                    assert_eq!(*source, None);
                }
            }
            LoaderEvent::Evaluated { target, source, cache_size, sync, .. } => {
                assert!(!sync);
                assert_eq!(*cache_size, 2);
                let expected = if *target == dep { Some(&main) } else { None };
                assert_eq!(source.as_ref(), expected);
            }
            LoaderEvent::Error { .. } => unreachable!(),
        }
    }
}

#[tokio::test]
async fn test_sync_path_flags_events() {
    let (_dir, root) = tree(&[
        ("main.js", "const dep = require(\"./dep\")\nexports.n = dep.n"),
        ("dep.js", DEP_SOURCE),
    ]);
    let loader = Loader::default();
    let events = record_events(&loader);

    loader.require_sync_with(&options(&root), "./main").await.unwrap();

    let events = events.lock().unwrap();
    let flags: Vec<(EventKind, bool)> = events
        .iter()
        .filter_map(|event| match event {
            LoaderEvent::Load { sync, .. }
            | LoaderEvent::Evaluate { sync, .. }
            | LoaderEvent::Evaluated { sync, .. } => Some((event.kind(), *sync)),
            _ => None,
        })
        .collect();
    assert_eq!(flags.len(), 6);
    assert!(flags.iter().all(|(_, sync)| *sync));

    let dep_evaluated = events.iter().find_map(|event| match event {
        LoaderEvent::Evaluated { target, source, .. } if *target == root.join("dep.js") => {
            Some(source.clone())
        }
        _ => None,
    });
    assert_eq!(dep_evaluated, Some(Some(root.join("main.js"))));
}

// Cycles

#[tokio::test]
async fn test_cycle_sees_partial_exports() {
    let (_dir, root) = tree(&[
        ("a.js", "exports.name = \"a\"\nconst b = require(\"./b\")\nexports.fromB = b.name\nexports.bSawA = b.fromA"),
        ("b.js", "exports.name = \"b\"\nconst a = require(\"./a\")\nexports.fromA = a.name\nexports.aHadB = a.fromB"),
    ]);
    let loader = Loader::default();

    let a = loader.require_with(&options(&root), "./a").await.unwrap();
    assert_eq!(a.get("fromB"), Some(&json!("b")));
    assert_eq!(a.get("bSawA"), Some(&json!("a")));

    let b = loader.require_with(&options(&root), "./b").await.unwrap();
    assert_eq!(b.get("aHadB"), Some(&serde_json::Value::Null));

    let record = loader.modules().get(&root.join("a.js")).unwrap();
    assert_eq!(record.children().len(), 1);
}

// Caching

#[cfg(unix)]
#[tokio::test]
async fn test_hard_links_share_one_module() {
    let (_dir, root) = tree(&[("original.js", "exports.id = \"one\"")]);
    fs::hard_link(root.join("original.js"), root.join("alias.js")).unwrap();
    let loader = Loader::new(LoaderConfig {
        link_aware_cache: true,
        ..LoaderConfig::default()
    });
    let evaluations = count_evaluations(&loader);

    let first = loader.require_with(&options(&root), "./original").await.unwrap();
    let second = loader.require_with(&options(&root), "./alias").await.unwrap();

    assert_eq!(first.get("id"), second.get("id"));
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    assert_eq!(loader.modules().len(), 1);
}

#[tokio::test]
async fn test_clear_caches_reloads() {
    let (_dir, root) = tree(&[("count.js", "exports.n = 1")]);
    let loader = Loader::default();
    let evaluations = count_evaluations(&loader);

    loader.require_with(&options(&root), "./count").await.unwrap();
    loader.require_with(&options(&root), "./count").await.unwrap();
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);

    loader.clear_caches();
    assert!(loader.modules().is_empty());
    loader.require_with(&options(&root), "./count").await.unwrap();
    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
}

// Workspaces

#[tokio::test]
async fn test_workspace_bindings_are_shared() {
    let (_dir, root) = tree(&[
        ("writer.js", "global.shared = 42"),
        ("reader.js", "exports.seen = shared"),
        ("outsider.js", "exports.seen = global.shared"),
    ]);
    let loader = Loader::default();
    let id = WorkspaceId::generate();
    let shared = options(&root).workspaces([id]);

    loader.require_with(&shared, "./writer").await.unwrap();
    let reader = loader.require_with(&shared, "./reader").await.unwrap();
    assert_eq!(reader.get("seen"), Some(&json!(42)));
    assert_eq!(
        loader.workspaces().exported_get(id).unwrap().get("shared"),
        Some(&json!(42))
    );

    let outsider = loader.require_with(&options(&root), "./outsider").await.unwrap();
    assert_eq!(outsider.get("seen"), Some(&serde_json::Value::Null));
}

// Directory import

#[tokio::test]
async fn test_import_directory() {
    let (_dir, root) = tree(&[
        ("plugins/alpha.js", "exports.alpha = 1"),
        ("plugins/beta.json", "{\"beta\": 2}"),
        ("plugins/skip.js", "throw \"never loaded\""),
        ("plugins/notes.txt", "not a module"),
    ]);
    let loader = Loader::default();
    let order = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&order);

    let imports = loader
        .import_directory(
            root.join("plugins"),
            ImportOptions::new()
                .exclude("skip")
                .onload(move |path, _| log.lock().unwrap().push(path.to_path_buf())),
        )
        .await
        .unwrap();

    assert_eq!(imports.get("alpha"), Some(&json!({ "alpha": 1 })));
    assert_eq!(imports.get("beta"), Some(&json!({ "beta": 2 })));
    assert_eq!(imports.len(), 2);
    assert_eq!(
        *order.lock().unwrap(),
        vec![root.join("plugins/alpha.js"), root.join("plugins/beta.json")]
    );

    let merged = loader
        .import_directory(root.join("plugins"), ImportOptions::new().exclude("skip.js").merge(true))
        .await
        .unwrap();
    assert_eq!(merged.get("alpha"), Some(&json!(1)));
    assert_eq!(merged.get("beta"), Some(&json!(2)));
}

#[tokio::test]
async fn test_import_normalizes_extensions() {
    let (_dir, root) = tree(&[
        ("mods/a.js", "exports.a = 1"),
        ("mods/foojs", "throw \"not a module\""),
        ("mods/b.json", "{\"b\": 2}"),
    ]);
    let loader = Loader::default();

    let imports = loader
        .import_directory(root.join("mods"), ImportOptions::new().extensions(["js"]))
        .await
        .unwrap();
    let keys: Vec<String> = imports.keys().cloned().collect();
    assert_eq!(keys, vec!["a".to_string()]);

    let both = loader
        .import_directory(root.join("mods"), ImportOptions::new().extensions(["json", ".js", "js"]))
        .await
        .unwrap();
    assert_eq!(both.get("a"), Some(&json!({ "a": 1 })));
    assert_eq!(both.get("b"), Some(&json!({ "b": 2 })));
    assert_eq!(both.len(), 2);
}

#[tokio::test]
async fn test_import_missing_directory() {
    let (_dir, root) = tree(&[]);
    let loader = Loader::default();
    let mut initial = serde_json::Map::new();
    initial.insert("kept".to_string(), json!(true));

    let imports = loader
        .import_directory(root.join("absent"), ImportOptions::new().imports(initial))
        .await
        .unwrap();
    assert_eq!(imports.get("kept"), Some(&json!(true)));
    assert_eq!(imports.len(), 1);
}
