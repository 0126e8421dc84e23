//! End-to-end orchestration tests against a real SQLite store and a
//! recording container runtime.

mod common;

use std::fs;
use std::sync::Barrier;
use std::thread;

use serde_json::json;

use common::{FAKE_COMMIT, Harness, create_user, spec, update};
use dockhand::deploy::{ContainerRuntime, ContainerStatus};
use dockhand::error::Error;
use dockhand::store::Store;
use dockhand::types::{ChallengeMethod, DbCredentials, SiteStatus};

#[test]
fn php_site_gets_one_service_plain_http_routing_and_welcome_page() {
    let h = Harness::new();

    let outcome = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Demo", "type": "php", "domain": "demo.test" })),
        )
        .unwrap();

    let site = outcome.site;
    assert!(outcome.warning.is_none(), "unexpected warning: {:?}", outcome.warning);
    assert!(site.container_name.starts_with("php_demo_"));
    assert_eq!(site.status, SiteStatus::Running);

    let doc = h.topology(&site);
    assert_eq!(doc.services.len(), 1);
    let app = doc.service(&site.container_name).unwrap();

    let router_labels: Vec<&String> = app
        .labels
        .iter()
        .filter(|l| l.contains(".routers."))
        .collect();
    assert_eq!(router_labels.len(), 2, "labels: {:?}", app.labels);
    assert!(app.labels.iter().all(|l| !l.contains("tls")));
    assert_eq!(
        app.label(&format!("traefik.http.routers.{}.rule", site.container_name)),
        Some("Host(`demo.test`)")
    );

    let page = h.runtime.copied("/var/www/html/index.php").unwrap();
    assert!(page.contains("Demo"));
    assert_eq!(h.runtime.status_of(&site.container_name), ContainerStatus::Running);

    let stored = h.store.get_compose_config(site.id).unwrap().unwrap();
    assert_eq!(
        stored.content,
        fs::read_to_string(h.topology_path(&site)).unwrap()
    );
}

#[test]
fn instance_port_collision_is_rejected_before_any_container_exists() {
    let h = Harness::new();
    let executor = h.orchestrator.executor();

    let first = executor
        .create(
            &h.owner,
            spec(json!({ "name": "db one", "type": "database", "db_type": "mariadb", "db_port": 3307 })),
        )
        .unwrap();
    assert!(first.site.container_name.starts_with("mariadb_db_one_"));
    let containers = h.runtime.container_count();
    let ups = h.runtime.calls_matching("up ").len();

    let result = executor.create(
        &h.owner,
        spec(json!({ "name": "db two", "type": "database", "db_type": "mariadb", "db_port": 3307 })),
    );

    assert!(matches!(result, Err(Error::Validation(_))), "got {result:?}");
    assert_eq!(h.runtime.container_count(), containers);
    assert_eq!(h.runtime.calls_matching("up ").len(), ups);
    assert_eq!(h.store.list_database_instances().unwrap().len(), 1);
}

#[test]
fn bootstrap_failure_keeps_site_stopped_and_redeploy_reuses_name() {
    let h = Harness::new();
    h.runtime.fail_exec_containing("chown");

    let outcome = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Flaky", "type": "php", "domain": "flaky.test" })),
        )
        .unwrap();

    let warning = outcome.warning.expect("degraded create returns a warning");
    assert!(warning.contains("bootstrapping"), "warning: {warning}");
    assert_eq!(outcome.site.status, SiteStatus::Stopped);
    assert!(outcome.site.status_message.is_some());
    let name = outcome.site.container_name.clone();

    h.runtime.clear_exec_failure();
    let retried = h.orchestrator.executor().redeploy(outcome.site.id).unwrap();

    assert!(retried.warning.is_none());
    assert_eq!(retried.site.container_name, name);
    assert_eq!(retried.site.status, SiteStatus::Running);
    assert!(retried.site.status_message.is_none());
    assert!(h.runtime.calls_matching("up ").last().unwrap().ends_with("force=true"));
}

#[test]
fn bring_up_failure_degrades_to_stopped_site() {
    let h = Harness::new();
    h.runtime.fail_bring_up(true);

    let outcome = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Blog", "type": "wordpress", "domain": "blog.test" })),
        )
        .unwrap();

    assert!(outcome.warning.unwrap().contains("starting"));
    assert_eq!(h.site(outcome.site.id).status, SiteStatus::Stopped);
}

#[test]
fn second_identical_update_does_not_recreate() {
    let h = Harness::new();
    let created = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Shop", "type": "wordpress", "domain": "shop.test" })),
        )
        .unwrap();
    let reconciler = h.orchestrator.reconciler();

    let first = reconciler
        .update(created.site.id, update(json!({ "domain": "Shop2.test" })))
        .unwrap();
    assert!(first.recreated);
    assert_eq!(first.site.domain, "shop2.test");
    let doc = h.topology(&first.site);
    let app = doc.service(&first.site.container_name).unwrap();
    assert!(app.labels.iter().any(|l| l.contains("Host(`shop2.test`)")));

    let second = reconciler
        .update(created.site.id, update(json!({ "domain": "shop2.test" })))
        .unwrap();
    assert!(!second.recreated);

    let renamed = reconciler
        .update(created.site.id, update(json!({ "name": "Shop Renamed" })))
        .unwrap();
    assert!(!renamed.recreated);
    assert_eq!(renamed.site.container_name, created.site.container_name);
}

#[test]
fn delete_without_keep_data_removes_volumes_directory_and_row() {
    let h = Harness::new();
    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Gone", "type": "wordpress", "domain": "gone.test", "db_type": "dedicated" })),
        )
        .unwrap()
        .site;
    let dir = h.topology_path(&site).parent().unwrap().to_path_buf();
    assert!(!h.runtime.volumes().is_empty());

    let report = h.orchestrator.lifecycle().delete(site.id, false).unwrap();

    assert!(report.is_clean(), "failures: {:?}", report.failures().collect::<Vec<_>>());
    assert!(h.runtime.volumes().iter().all(|v| !v.starts_with(&site.container_name)));
    assert!(!dir.exists());
    assert!(h.store.get_site(site.id).unwrap().is_none());
    assert!(h.store.get_compose_config(site.id).unwrap().is_none());
}

#[test]
fn delete_with_keep_data_leaves_volumes() {
    let h = Harness::new();
    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Kept", "type": "wordpress", "domain": "kept.test", "db_type": "dedicated" })),
        )
        .unwrap()
        .site;
    let volumes = h.runtime.volumes();

    h.orchestrator.lifecycle().delete(site.id, true).unwrap();

    assert_eq!(h.runtime.volumes(), volumes);
    assert!(h.runtime.calls_matching("volume rm").is_empty());
    assert_eq!(h.runtime.status_of(&site.container_name), ContainerStatus::Missing);
    assert!(h.store.get_site(site.id).unwrap().is_none());
}

#[test]
fn dedicated_databases_are_private_to_their_site() {
    let h = Harness::new();
    let executor = h.orchestrator.executor();

    let a = executor
        .create(
            &h.owner,
            spec(json!({ "name": "Alpha", "type": "wordpress", "domain": "alpha.test", "db_type": "dedicated" })),
        )
        .unwrap()
        .site;
    let b = executor
        .create(
            &h.owner,
            spec(json!({ "name": "Beta", "type": "wordpress", "domain": "beta.test", "db_type": "dedicated" })),
        )
        .unwrap()
        .site;

    let doc_a = h.topology(&a);
    let doc_b = h.topology(&b);
    let db_a = format!("{}_db", a.container_name);
    let db_b = format!("{}_db", b.container_name);

    assert!(doc_a.service(&db_a).is_some());
    assert!(doc_a.service(&db_b).is_none());
    assert!(doc_b.service(&db_b).is_some());
    assert_eq!(a.db_host.as_deref(), Some(db_a.as_str()));
    assert_eq!(b.db_host.as_deref(), Some(db_b.as_str()));

    let creds_a: DbCredentials = serde_json::from_str(a.db_password.as_deref().unwrap()).unwrap();
    let creds_b: DbCredentials = serde_json::from_str(b.db_password.as_deref().unwrap()).unwrap();
    assert_ne!(creds_a.root, creds_b.root);
    assert_ne!(creds_a.user, creds_b.user);
    assert_ne!(creds_a.root, creds_a.user);

    let yaml_a = fs::read_to_string(h.topology_path(&a)).unwrap();
    assert!(!yaml_a.contains(&creds_b.user));
    assert!(!yaml_a.contains(&b.container_name));
}

#[test]
fn start_restores_missing_topology_from_stored_config() {
    let h = Harness::new();
    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Drift", "type": "php", "domain": "drift.test" })),
        )
        .unwrap()
        .site;
    let path = h.topology_path(&site);
    let original = fs::read_to_string(&path).unwrap();

    fs::remove_file(&path).unwrap();
    h.orchestrator.lifecycle().stop(site.id).unwrap();
    assert_eq!(h.site(site.id).status, SiteStatus::Stopped);

    // The container is gone too, so start has to go through the topology.
    h.runtime.remove(&site.container_name).unwrap();
    let started = h.orchestrator.lifecycle().start(site.id).unwrap();

    assert_eq!(started.site.status, SiteStatus::Running);
    assert_eq!(fs::read_to_string(&path).unwrap(), original);
    assert!(h.runtime.calls_matching("up ").last().unwrap().ends_with("force=false"));
}

#[test]
fn rebuild_recreates_from_fresh_topology() {
    let h = Harness::new();
    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Again", "type": "wordpress", "domain": "again.test" })),
        )
        .unwrap()
        .site;
    h.runtime.clear_calls();

    let rebuilt = h.orchestrator.lifecycle().rebuild(site.id).unwrap();

    assert_eq!(rebuilt.site.status, SiteStatus::Running);
    let calls = h.runtime.calls();
    let down = calls.iter().position(|c| c.starts_with("down ")).unwrap();
    let up = calls.iter().position(|c| c.starts_with("up ")).unwrap();
    assert!(down < up);
    assert!(calls[down].ends_with("volumes=false"));
    assert!(calls[up].ends_with("force=true"));
}

#[test]
fn github_source_deploy_records_commit() {
    let h = Harness::new();
    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({
                "name": "App",
                "type": "php",
                "domain": "app.test",
                "github_repo": "acme/app"
            })),
        )
        .unwrap()
        .site;

    assert_eq!(site.github_branch.as_deref(), Some("main"));
    assert_eq!(site.github_last_commit.as_deref(), Some(FAKE_COMMIT));
    assert_eq!(h.source.deploys(), vec![site.container_name.clone()]);
    assert!(h.runtime.copied("/var/www/html/index.php").is_none());
}

#[test]
fn failed_source_deploy_degrades() {
    let h = Harness::new();
    h.source.fail_with("repository not found");

    let outcome = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({
                "name": "Missing",
                "type": "laravel",
                "domain": "missing.test",
                "github_repo": "acme/missing"
            })),
        )
        .unwrap();

    assert!(outcome.warning.unwrap().contains("repository not found"));
    assert_eq!(outcome.site.status, SiteStatus::Stopped);
}

#[test]
fn users_without_create_rights_are_refused() {
    let h = Harness::new();
    let viewer = create_user(h.store.as_ref(), "viewer", false);

    let result = h.orchestrator.executor().create(
        &viewer,
        spec(json!({ "name": "Nope", "type": "php", "domain": "nope.test" })),
    );

    assert!(matches!(result, Err(Error::Forbidden)));
    assert!(h.runtime.calls().is_empty());
}

#[test]
fn duplicate_domains_conflict() {
    let h = Harness::new();
    let executor = h.orchestrator.executor();
    executor
        .create(
            &h.owner,
            spec(json!({ "name": "One", "type": "php", "domain": "same.test" })),
        )
        .unwrap();

    let result = executor.create(
        &h.owner,
        spec(json!({ "name": "Two", "type": "wordpress", "domain": "same.test" })),
    );

    assert!(matches!(result, Err(Error::Conflict(_))), "got {result:?}");
}

#[test]
fn missing_runtime_image_falls_back_to_build_context() {
    let h = Harness::new();
    h.runtime.report_missing_images();

    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Built", "type": "laravel", "domain": "built.test", "php_version": "8.2" })),
        )
        .unwrap()
        .site;

    let doc = h.topology(&site);
    let app = doc.service(&site.container_name).unwrap();
    let build = app.build.as_ref().expect("build context");
    assert_eq!(build.args.get("PHP_VERSION").map(String::as_str), Some("8.2"));
    assert!(h.apps_base().join("laravel/runtime/Dockerfile").exists());
}

#[test]
fn concurrent_instances_cannot_share_an_exposed_port() {
    for round in 0..10 {
        let h = Harness::new();
        let barrier = Barrier::new(2);

        let results: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = ["db left", "db right"]
                .into_iter()
                .map(|name| {
                    let (h, barrier) = (&h, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        h.orchestrator.executor().create(
                            &h.owner,
                            spec(json!({ "name": name, "type": "database", "db_type": "mariadb", "db_port": 3306 })),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|t| t.join().unwrap()).collect()
        });

        let created = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(created, 1, "round {round}: {results:?}");
        assert!(
            results.iter().any(|r| matches!(r, Err(Error::Validation(_)))),
            "round {round}: {results:?}"
        );
        let exposed = h
            .store
            .list_database_instances()
            .unwrap()
            .into_iter()
            .filter(|s| s.db_port == Some(3306))
            .count();
        assert_eq!(exposed, 1);
    }
}

#[test]
fn moving_an_instance_onto_a_taken_port_is_rejected() {
    let h = Harness::new();
    let executor = h.orchestrator.executor();
    executor
        .create(
            &h.owner,
            spec(json!({ "name": "first", "type": "database", "db_type": "mysql", "db_port": 3310 })),
        )
        .unwrap();
    let second = executor
        .create(
            &h.owner,
            spec(json!({ "name": "second", "type": "database", "db_type": "mysql", "db_port": 3311 })),
        )
        .unwrap()
        .site;
    h.runtime.clear_calls();

    let result = h
        .orchestrator
        .reconciler()
        .update(second.id, update(json!({ "db_port": 3310 })));

    assert!(matches!(result, Err(Error::Validation(_))), "got {result:?}");
    assert_eq!(h.site(second.id).db_port, Some(3311));
    assert!(h.runtime.calls_matching("up ").is_empty());
}

#[test]
fn rotating_dns_credentials_keeps_challenge_and_resolver() {
    let h = Harness::new();
    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({
                "name": "Secure",
                "type": "php",
                "domain": "secure.test",
                "ssl_enabled": true,
                "ssl_config": {
                    "challenge": "dns",
                    "dns_provider": "cloudflare",
                    "credentials": { "CF_DNS_API_TOKEN": "old" }
                }
            })),
        )
        .unwrap()
        .site;
    let resolver_key = format!(
        "traefik.http.routers.{}-secure.tls.certresolver",
        site.container_name
    );
    h.runtime.clear_calls();

    let outcome = h
        .orchestrator
        .reconciler()
        .update(
            site.id,
            update(json!({ "ssl_config": { "credentials": { "CF_DNS_API_TOKEN": "rotated" } } })),
        )
        .unwrap();

    assert!(!outcome.recreated);
    assert!(h.runtime.calls_matching("up ").is_empty());
    let stored = h.site(site.id);
    assert_eq!(stored.ssl_config.challenge, ChallengeMethod::Dns);
    assert_eq!(stored.ssl_config.credentials["CF_DNS_API_TOKEN"], "rotated");

    let doc = h.topology(&stored);
    let app = doc.service(&stored.container_name).unwrap();
    assert_eq!(app.label(&resolver_key), Some("letsencrypt-dns"));
}

#[test]
fn ssl_toggle_recreates_once_per_change() {
    let h = Harness::new();
    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Toggle", "type": "php", "domain": "toggle.test" })),
        )
        .unwrap()
        .site;
    let reconciler = h.orchestrator.reconciler();
    let resolver_key = format!(
        "traefik.http.routers.{}-secure.tls.certresolver",
        site.container_name
    );

    let on = reconciler
        .update(site.id, update(json!({ "ssl_enabled": true })))
        .unwrap();
    assert!(on.recreated);
    let doc = h.topology(&on.site);
    let app = doc.service(&site.container_name).unwrap();
    assert_eq!(app.label(&resolver_key), Some("letsencrypt"));
    assert!(h.runtime.calls_matching("up ").last().unwrap().ends_with("force=true"));

    let again = reconciler
        .update(site.id, update(json!({ "ssl_enabled": true })))
        .unwrap();
    assert!(!again.recreated);

    let off = reconciler
        .update(site.id, update(json!({ "ssl_enabled": false })))
        .unwrap();
    assert!(off.recreated);
    let doc = h.topology(&off.site);
    let app = doc.service(&site.container_name).unwrap();
    assert!(app.labels.iter().all(|l| !l.contains("tls")));
}

#[test]
fn include_www_toggle_recreates_and_repeat_does_not() {
    let h = Harness::new();
    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Www", "type": "wordpress", "domain": "www-toggle.test" })),
        )
        .unwrap()
        .site;
    let reconciler = h.orchestrator.reconciler();

    let first = reconciler
        .update(site.id, update(json!({ "include_www": true })))
        .unwrap();
    assert!(first.recreated);
    let doc = h.topology(&first.site);
    let app = doc.service(&site.container_name).unwrap();
    assert!(app.labels.iter().any(|l| l.contains("www.www-toggle.test")));

    let second = reconciler
        .update(site.id, update(json!({ "include_www": true })))
        .unwrap();
    assert!(!second.recreated);
}

#[test]
fn switching_to_dedicated_database_adds_sidecar_and_volume() {
    let h = Harness::new();
    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Grow", "type": "php", "domain": "grow.test" })),
        )
        .unwrap()
        .site;
    let db_service = format!("{}_db", site.container_name);
    let db_volume = format!("{}_db_data", site.container_name);
    assert!(h.topology(&site).service(&db_service).is_none());

    let switched = h
        .orchestrator
        .reconciler()
        .update(site.id, update(json!({ "db_type": "dedicated" })))
        .unwrap();

    assert!(switched.recreated);
    assert_eq!(switched.site.status, SiteStatus::Running);
    assert_eq!(switched.site.db_host.as_deref(), Some(db_service.as_str()));
    let doc = h.topology(&switched.site);
    assert!(doc.service(&db_service).is_some());
    assert!(doc.volume_names().contains(&db_volume.as_str()));
    assert!(h.runtime.volumes().contains(&db_volume));
    assert_eq!(h.runtime.status_of(&db_service), ContainerStatus::Running);

    let repeated = h
        .orchestrator
        .reconciler()
        .update(site.id, update(json!({ "db_type": "dedicated" })))
        .unwrap();
    assert!(!repeated.recreated);
}

#[test]
fn wordpress_cache_option_installs_object_cache_after_init() {
    let h = Harness::new();
    let site = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Cached", "type": "wordpress", "domain": "cached.test", "options": { "cache": true } })),
        )
        .unwrap()
        .site;

    assert_eq!(site.status, SiteStatus::Running);
    let cache = format!("{}_redis", site.container_name);
    assert!(h.topology(&site).service(&cache).is_some());

    let execs = h.runtime.calls_matching("exec ");
    let ready = execs.iter().position(|c| c.contains("wp-config.php")).unwrap();
    let plugin = execs.iter().position(|c| c.contains("wp redis enable")).unwrap();
    assert!(ready < plugin);
}

#[test]
fn failed_cache_plugin_setup_leaves_site_stopped() {
    let h = Harness::new();
    h.runtime.fail_exec_containing("wp redis enable");

    let outcome = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Nocache", "type": "wordpress", "domain": "nocache.test", "options": { "cache": true } })),
        )
        .unwrap();

    assert!(outcome.warning.unwrap().contains("cache plugin setup"));
    let stored = h.site(outcome.site.id);
    assert_eq!(stored.status, SiteStatus::Stopped);
    assert!(stored.status_message.unwrap().contains("cache plugin setup"));
}

#[test]
fn wordpress_that_never_initializes_skips_cache_plugin() {
    let h = Harness::new();
    h.runtime.fail_exec_containing("wp-config.php");

    let outcome = h
        .orchestrator
        .executor()
        .create(
            &h.owner,
            spec(json!({ "name": "Slow", "type": "wordpress", "domain": "slow.test", "options": { "cache": true } })),
        )
        .unwrap();

    assert!(outcome.warning.unwrap().contains("did not finish initializing"));
    assert_eq!(outcome.site.status, SiteStatus::Stopped);
    assert!(h
        .runtime
        .calls_matching("exec ")
        .iter()
        .all(|c| !c.contains("wp redis enable")));
}
