//! Integration tests for the Frontdesk data layer

mod screen_flow_tests {
    use frontdesk_data::{
        AppError, AuthListener, CacheKey, MutationOptions, QueryCache, QueryOptions, RawFailure,
    };
    use futures_util::FutureExt;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Location {
        id: String,
        name: String,
        capacity: u32,
    }

    fn northside() -> Location {
        Location {
            id: "42".to_string(),
            name: "Northside Gym".to_string(),
            capacity: 30,
        }
    }

    /// Wait until no fetch is running for the key.
    async fn settled(cache: &QueryCache, key: &CacheKey) {
        let mut changes = cache.changes();
        while cache.peek::<serde_json::Value>(key).is_fetching {
            changes.changed().await.expect("cache dropped");
        }
    }

    #[tokio::test]
    async fn rename_flow_invalidates_list_and_detail_but_not_sessions() {
        let cache = QueryCache::new();
        let list_loads = Arc::new(AtomicUsize::new(0));
        let detail_loads = Arc::new(AtomicUsize::new(0));
        let session_loads = Arc::new(AtomicUsize::new(0));

        let list_key = CacheKey::new(["locations", "list"]);
        let detail_key = CacheKey::new(["locations", "42"]);
        let sessions_key = CacheKey::new(["sessions", "today"]);

        let load_list = |loads: &Arc<AtomicUsize>, name: &str| {
            let loads = Arc::clone(loads);
            let name = name.to_string();
            move || {
                loads.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok::<_, RawFailure>(vec![Location {
                        name,
                        ..northside()
                    }])
                }
                .boxed()
            }
        };
        let load_detail = |loads: &Arc<AtomicUsize>, name: &str| {
            let loads = Arc::clone(loads);
            let name = name.to_string();
            move || {
                loads.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok::<_, RawFailure>(Location {
                        name,
                        ..northside()
                    })
                }
                .boxed()
            }
        };
        let load_sessions = {
            let loads = Arc::clone(&session_loads);
            move || {
                loads.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, RawFailure>(vec!["09:00 kids".to_string()]) }.boxed()
            }
        };

        // Screen comes up: list, detail modal, and the schedule rail load.
        cache
            .query::<Vec<Location>, _, _>(
                list_key.clone(),
                load_list(&list_loads, "Northside Gym"),
                QueryOptions::new(),
            )
            .await;
        cache
            .query::<Location, _, _>(
                detail_key.clone(),
                load_detail(&detail_loads, "Northside Gym"),
                QueryOptions::new(),
            )
            .await;
        cache
            .query::<Vec<String>, _, _>(sessions_key.clone(), load_sessions, QueryOptions::new())
            .await;

        // Rename succeeds and invalidates everything under "locations".
        let renamed = cache
            .mutate(
                |name: String| {
                    async move {
                        Ok::<_, RawFailure>(Location {
                            name,
                            ..northside()
                        })
                    }
                    .boxed()
                },
                "Northside Strength".to_string(),
                MutationOptions::new().invalidates([CacheKey::new(["locations"])]),
            )
            .await
            .expect("rename failed");
        assert_eq!(renamed.name, "Northside Strength");

        // Both location reads refetch; the schedule rail does not.
        let list = cache
            .query::<Vec<Location>, _, _>(
                list_key.clone(),
                load_list(&list_loads, "Northside Strength"),
                QueryOptions::new(),
            )
            .await;
        assert!(list.is_fetching, "stale list should revalidate");
        settled(&cache, &list_key).await;

        cache
            .query::<Location, _, _>(
                detail_key.clone(),
                load_detail(&detail_loads, "Northside Strength"),
                QueryOptions::new(),
            )
            .await;
        settled(&cache, &detail_key).await;

        let sessions_again = {
            let loads = Arc::clone(&session_loads);
            move || {
                loads.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, RawFailure>(vec![]) }.boxed()
            }
        };
        cache
            .query::<Vec<String>, _, _>(sessions_key, sessions_again, QueryOptions::new())
            .await;

        assert_eq!(list_loads.load(Ordering::SeqCst), 2);
        assert_eq!(detail_loads.load(Ordering::SeqCst), 2);
        assert_eq!(session_loads.load(Ordering::SeqCst), 1);

        let fresh = cache.peek::<Vec<Location>>(&list_key);
        assert_eq!(fresh.data.unwrap()[0].name, "Northside Strength");
    }

    #[tokio::test]
    async fn clones_share_one_fetch_per_key() {
        let cache = QueryCache::new();
        let loads = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new(["locations", "list"]);

        let task = |cache: QueryCache, key: CacheKey, loads: Arc<AtomicUsize>| {
            tokio::spawn(async move {
                let loader = move || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    async move {
                        sleep(Duration::from_millis(25)).await;
                        Ok::<_, RawFailure>(vec![northside()])
                    }
                    .boxed()
                };
                cache
                    .query::<Vec<Location>, _, _>(key, loader, QueryOptions::new())
                    .await
            })
        };

        let a = task(cache.clone(), key.clone(), Arc::clone(&loads));
        let b = task(cache.clone(), key.clone(), Arc::clone(&loads));
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(a.data, b.data);
        assert_eq!(a.data.unwrap()[0].id, "42");
    }

    #[tokio::test]
    async fn aborted_caller_does_not_cancel_the_fetch() {
        let cache = QueryCache::new();
        let loads = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new(["sessions", "today"]);

        // A screen unmounts mid-load: its query task goes away.
        let caller = {
            let cache = cache.clone();
            let key = key.clone();
            let loads = Arc::clone(&loads);
            tokio::spawn(async move {
                let loader = move || {
                    loads.fetch_add(1, Ordering::SeqCst);
                    async move {
                        sleep(Duration::from_millis(100)).await;
                        Ok::<_, RawFailure>(vec!["09:00 kids".to_string()])
                    }
                    .boxed()
                };
                cache
                    .query::<Vec<String>, _, _>(key, loader, QueryOptions::new())
                    .await
            })
        };
        sleep(Duration::from_millis(10)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        // The spawned fetch still resolves and populates the shared entry.
        settled(&cache, &key).await;
        let state = cache.peek::<Vec<String>>(&key);
        assert_eq!(state.data.as_deref(), Some(&["09:00 kids".to_string()][..]));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_value_is_served_while_revalidating() {
        let cache = QueryCache::new();
        let key = CacheKey::new(["kids", "list"]);

        cache
            .query::<Vec<String>, _, _>(
                key.clone(),
                || async { Ok::<_, RawFailure>(vec!["Maya".to_string()]) }.boxed(),
                QueryOptions::new(),
            )
            .await;
        cache.invalidate(&[CacheKey::new(["kids"])]);

        // The stale roster renders immediately; no flash to empty.
        let result = cache
            .query::<Vec<String>, _, _>(
                key.clone(),
                || {
                    async {
                        sleep(Duration::from_millis(30)).await;
                        Ok::<_, RawFailure>(vec!["Maya".to_string(), "Leo".to_string()])
                    }
                    .boxed()
                },
                QueryOptions::new(),
            )
            .await;
        assert_eq!(result.data.as_deref(), Some(&["Maya".to_string()][..]));
        assert!(result.is_fetching);
        assert!(!result.is_loading);

        settled(&cache, &key).await;
        let fresh = cache.peek::<Vec<String>>(&key);
        assert_eq!(fresh.data.map(|names| names.len()), Some(2));
    }

    #[tokio::test]
    async fn missing_entity_surfaces_not_found() {
        let cache = QueryCache::new();

        let result = cache
            .query::<Location, _, _>(
                CacheKey::new(["locations", "9000"]),
                || async { Err::<Location, _>(RawFailure::http(404)) }.boxed(),
                QueryOptions::new(),
            )
            .await;

        assert!(result.data.is_none());
        let error = result.error.expect("expected a classified error");
        assert_eq!(error.status, Some(404));
        assert_eq!(error.message, "Requested resource was not found.");
        assert!(!error.is_auth_error());
    }

    #[tokio::test]
    async fn expired_session_triggers_the_auth_listener() {
        struct SignOut(Arc<Mutex<Vec<Option<u16>>>>);

        #[async_trait::async_trait]
        impl AuthListener for SignOut {
            async fn on_auth_error(&self, error: &AppError) {
                self.0.lock().unwrap().push(error.status);
            }
        }

        let cache = QueryCache::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        cache.set_auth_listener(Arc::new(SignOut(Arc::clone(&fired))));

        let result = cache
            .query::<Location, _, _>(
                CacheKey::new(["me"]),
                || async { Err::<Location, _>(RawFailure::http(401)) }.boxed(),
                QueryOptions::new(),
            )
            .await;

        let error = result.error.expect("expected an auth error");
        assert!(error.is_auth_error());
        assert_eq!(error.message, "Session expired. Please sign in again.");

        for _ in 0..50 {
            if !fired.lock().unwrap().is_empty() {
                break;
            }
            sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(fired.lock().unwrap().as_slice(), &[Some(401)]);
    }

    #[tokio::test]
    async fn validation_failure_reaches_the_error_callback() {
        let cache = QueryCache::new();
        let toast = Arc::new(Mutex::new(None::<String>));
        let toast_in_callback = Arc::clone(&toast);

        let result = cache
            .mutate(
                |_: ()| {
                    async {
                        Err::<Location, _>(RawFailure::validation([
                            ("capacity", "Capacity must be positive"),
                            ("name", "Name is required"),
                        ]))
                    }
                    .boxed()
                },
                (),
                MutationOptions::new().on_error(move |error| {
                    *toast_in_callback.lock().unwrap() = Some(error.message.clone());
                }),
            )
            .await;

        let error = result.unwrap_err();
        assert_eq!(
            error.message,
            "Capacity must be positive, Name is required"
        );
        assert_eq!(toast.lock().unwrap().as_deref(), Some(error.message.as_str()));
    }
}

mod modal_flow_tests {
    use frontdesk_data::{CacheKey, ModalMode, ModalResolver, QueryCache, QueryOptions, RawFailure};
    use futures_util::FutureExt;
    use url::Url;

    #[tokio::test]
    async fn deep_link_drives_a_detail_query() {
        let cache = QueryCache::new();
        let resolver = ModalResolver::new("locationId");
        let url = Url::parse("https://admin.frontdesk.test/locations?modal=details&locationId=42")
            .unwrap();

        let state = resolver.state(&url);
        assert!(state.is_open());
        let id = state.entity_id.clone().unwrap();

        let result = cache
            .query::<String, _, _>(
                CacheKey::new(["locations"]).child(id.as_str()),
                || async { Ok::<_, RawFailure>("Northside Gym".to_string()) }.boxed(),
                QueryOptions::new().enabled(state.entity_id.is_some()),
            )
            .await;
        assert_eq!(result.data.as_deref(), Some("Northside Gym"));
    }

    #[tokio::test]
    async fn closed_modal_disables_the_detail_query() {
        let cache = QueryCache::new();
        let resolver = ModalResolver::new("locationId");
        let url = Url::parse("https://admin.frontdesk.test/locations?tab=hours").unwrap();

        let state = resolver.state(&url);
        assert!(!state.is_open());

        let result = cache
            .query::<String, _, _>(
                CacheKey::new(["locations", "unknown"]),
                || async { Ok::<_, RawFailure>("never loaded".to_string()) }.boxed(),
                QueryOptions::new().enabled(state.entity_id.is_some()),
            )
            .await;
        assert!(result.data.is_none());
        assert!(result.error.is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn open_edit_close_preserves_unrelated_state() {
        let resolver = ModalResolver::new("locationId");
        let original =
            Url::parse("https://admin.frontdesk.test/locations?tab=hours&week=2024-W30&q=north%20side")
                .unwrap();

        let details = resolver.open(&original, ModalMode::Details, Some("42"));
        assert_eq!(
            details.as_str(),
            "https://admin.frontdesk.test/locations?tab=hours&week=2024-W30&q=north%20side&modal=details&locationId=42"
        );

        let edit = resolver.open(&details, ModalMode::Edit, Some("42"));
        assert_eq!(resolver.state(&edit).mode, Some(ModalMode::Edit));

        let closed = resolver.close(&edit);
        assert_eq!(closed.as_str(), original.as_str());
    }
}

mod wire_contract_tests {
    use frontdesk_data::{classify_value, ErrorKind};
    use serde_json::json;

    #[test]
    fn timeout_shape_maps_to_timeout() {
        let error = classify_value(&json!({ "message": "Request timeout" }));
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert!(error.is_timeout());
    }

    #[test]
    fn fetch_error_shape_maps_to_network() {
        let error = classify_value(&json!({ "status": "FETCH_ERROR", "error": "TypeError" }));
        assert_eq!(error.kind, ErrorKind::Network);
        assert!(error.is_network_error());
    }

    #[test]
    fn http_shape_carries_status_and_server_code() {
        let error = classify_value(&json!({
            "status": 403,
            "data": { "message": "Admins only.", "code": "ROLE_REQUIRED" }
        }));
        assert_eq!(error.kind, ErrorKind::Permission);
        assert_eq!(error.status, Some(403));
        assert_eq!(error.code.as_deref(), Some("ROLE_REQUIRED"));
    }

    #[test]
    fn field_details_shape_joins_deterministically() {
        let error = classify_value(&json!({
            "data": { "error": { "details": {
                "name": "Name is required",
                "capacity": "Capacity must be positive"
            } } }
        }));
        assert_eq!(error.kind, ErrorKind::Validation);
        // BTreeMap field order: capacity before name, every run.
        assert_eq!(
            error.message,
            "Capacity must be positive, Name is required"
        );
    }

    #[test]
    fn unrecognized_shapes_fall_back_to_generic() {
        for value in [json!(null), json!("boom"), json!([1, 2]), json!({})] {
            let error = classify_value(&value);
            assert_eq!(error.kind, ErrorKind::Generic);
            assert_eq!(error.message, "Something went wrong. Please try again.");
        }
    }
}

mod config_flow_tests {
    use frontdesk_data::config::{Config, ConfigManager};
    use frontdesk_data::{CacheKey, ModalMode, ModalResolver, QueryCache, QueryOptions, RawFailure};
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::sleep;

    #[tokio::test]
    async fn configured_window_refetches_aged_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        tokio::fs::write(&path, "[cache]\nstale_after_secs = 1\n")
            .await
            .unwrap();

        let config = ConfigManager::with_path(path).load().await.unwrap();
        let cache = QueryCache::with_settings(config.cache);
        let loads = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new(["sessions", "today"]);

        let loader = |loads: &Arc<AtomicUsize>| {
            let loads = Arc::clone(loads);
            move || {
                loads.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, RawFailure>("roster".to_string()) }.boxed()
            }
        };

        cache
            .query::<String, _, _>(key.clone(), loader(&loads), QueryOptions::new())
            .await;
        cache
            .query::<String, _, _>(key.clone(), loader(&loads), QueryOptions::new())
            .await;
        assert_eq!(loads.load(Ordering::SeqCst), 1, "inside the window");

        sleep(Duration::from_millis(1100)).await;
        let aged = cache
            .query::<String, _, _>(key.clone(), loader(&loads), QueryOptions::new())
            .await;
        assert_eq!(aged.data.as_deref(), Some("roster"));
        assert!(aged.is_fetching, "aged entry revalidates in the background");

        let mut changes = cache.changes();
        while cache.peek::<String>(&key).is_fetching {
            changes.changed().await.unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn configured_modal_param_reaches_the_resolver() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        tokio::fs::write(&path, "[modal]\nmodal_param = \"overlay\"\n")
            .await
            .unwrap();

        let config = ConfigManager::with_path(path).load().await.unwrap();
        let resolver = ModalResolver::from_settings("kidId", &config.modal);
        assert_eq!(resolver.modal_param(), "overlay");
        assert_eq!(resolver.id_param(), "kidId");

        let url = url::Url::parse("https://portal.frontdesk.test/kids").unwrap();
        let opened = resolver.open(&url, ModalMode::Details, Some("7"));
        assert_eq!(
            opened.as_str(),
            "https://portal.frontdesk.test/kids?overlay=details&kidId=7"
        );
    }

    #[tokio::test]
    async fn saved_config_round_trips() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));

        let mut config = Config::default();
        config.cache.stale_after_secs = 300;
        manager.save(&config).await.unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.cache.stale_after_secs, 300);
    }
}
