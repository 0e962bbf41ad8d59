//! Client and hub talking over in-memory ports

use std::sync::Arc;
use std::time::Duration;

use crosshub::hub::{self, Hub, HubStatus};
use crosshub::protocol::{READY, RequestEnvelope, ResponseEnvelope};
use crosshub::transport::{MemoryPort, Port, pair};
use crosshub::ttl::ManualClock;
use crosshub::{Client, ClientError, ClientOptions, Method, Origin, PermissionEntry, PermissionTable, TargetOrigin};
use kvstore::{DisabledStore, KeyValueStore, MemoryStore, SharedStore};
use serde_json::{Value, json};

const HUB_URL: &str = "https://hub.example.com/storage.html";

fn hub_origin() -> Origin {
    Origin::new("https://hub.example.com")
}

fn www() -> Origin {
    Origin::new("https://www.example.com")
}

fn sub() -> Origin {
    Origin::new("https://sub.example.com")
}

fn example_permissions() -> PermissionTable {
    PermissionTable::new(vec![
        PermissionEntry::new(r"\.example\.com$", [Method::Get]).unwrap(),
        PermissionEntry::new(r"(www\.)?example\.com$", [Method::Get, Method::Set, Method::Del]).unwrap(),
    ])
}

async fn start_hub<S: KeyValueStore>(hub: Hub<S>, app: Origin) -> MemoryPort {
    let (app_port, hub_port) = pair(app, hub_origin());
    match hub::init(hub, hub_port).await {
        HubStatus::Running(_) => {}
        HubStatus::Unavailable(e) => panic!("hub did not start: {e}"),
    }
    app_port
}

async fn connected_client<S: KeyValueStore>(hub: Hub<S>, app: Origin) -> Client {
    let port = start_hub(hub, app).await;
    let client = Client::new(HUB_URL, ClientOptions::default(), port).unwrap();
    client.on_connect().await.unwrap();
    client
}

async fn open_client() -> Client {
    connected_client(Hub::new(MemoryStore::new(), PermissionTable::allow_all().unwrap()), www()).await
}

/// A client whose other end is driven by the test
fn client_with_fake_hub(options: ClientOptions) -> (Client, MemoryPort) {
    let (app_port, hub_port) = pair(www(), hub_origin());
    let client = Client::new(HUB_URL, options, app_port).unwrap();
    (client, hub_port)
}

async fn next_request(hub_port: &mut MemoryPort) -> RequestEnvelope {
    let message = hub_port.recv().await.unwrap();
    serde_json::from_str(&message.data).unwrap()
}

async fn reply(hub_port: &MemoryPort, response: ResponseEnvelope) {
    hub_port
        .send(serde_json::to_string(&response).unwrap(), &TargetOrigin::Exact(www()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_set_then_get_returns_value() {
    let client = open_client().await;
    let value = json!({"theme": "dark", "sizes": [1, 2, 3], "enabled": true});

    client.set("prefs", &value, None).await.unwrap();
    assert_eq!(client.get(&["prefs"]).await.unwrap(), value);
}

#[tokio::test]
async fn test_get_many_keeps_request_order() {
    let client = open_client().await;
    client.set("a", 1, None).await.unwrap();
    client.set("c", "three", None).await.unwrap();

    let values = client.get(&["c", "missing", "a"]).await.unwrap();
    assert_eq!(values, json!(["three", null, 1]));
    assert_eq!(client.get(&["missing"]).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_get_without_keys_is_rejected_locally() {
    let client = open_client().await;
    assert!(matches!(client.get(&[]).await, Err(ClientError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_del_then_get_is_null() {
    let client = open_client().await;
    client.set("k1", "v1", None).await.unwrap();

    client.del(&["k1", "k2"]).await.unwrap();
    assert_eq!(client.get(&["k1", "k2"]).await.unwrap(), json!([null, null]));
}

#[tokio::test]
async fn test_get_keys_and_clear() {
    let client = open_client().await;
    client.set("b", 2, None).await.unwrap();
    client.set("a", 1, None).await.unwrap();

    let mut keys = client.get_keys().await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

    client.clear().await.unwrap();
    assert!(client.get_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_as_typed_value() {
    let client = open_client().await;
    client.set("count", 42, None).await.unwrap();

    assert_eq!(client.get_as::<u32>("count").await.unwrap(), Some(42));
    assert_eq!(client.get_as::<u32>("nothing").await.unwrap(), None);
}

#[tokio::test]
async fn test_ttl_expires_lazily() {
    let clock = ManualClock::new(1_000_000);
    let hub = Hub::new(MemoryStore::new(), PermissionTable::allow_all().unwrap()).with_clock(Arc::new(clock.clone()));
    let client = connected_client(hub, www()).await;

    client.set("token", "abc", Some(Duration::from_millis(500))).await.unwrap();
    assert_eq!(client.get(&["token"]).await.unwrap(), json!("abc"));

    clock.advance(499);
    assert_eq!(client.get(&["token"]).await.unwrap(), json!("abc"));

    clock.advance(1);
    assert_eq!(client.get(&["token"]).await.unwrap(), Value::Null);
    assert!(client.get_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sub_millisecond_ttl_still_expires() {
    let clock = ManualClock::new(1_000_000);
    let hub = Hub::new(MemoryStore::new(), PermissionTable::allow_all().unwrap()).with_clock(Arc::new(clock.clone()));
    let client = connected_client(hub, www()).await;

    client.set("k", "v", Some(Duration::from_micros(500))).await.unwrap();
    assert_eq!(client.get(&["k"]).await.unwrap(), json!("v"));

    clock.advance(10_000_000);
    assert_eq!(client.get(&["k"]).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_huge_ttl_is_stored_with_expiry() {
    let clock = ManualClock::new(1_000_000);
    let store = SharedStore::new(MemoryStore::new());
    let hub = Hub::new(store.clone(), PermissionTable::allow_all().unwrap()).with_clock(Arc::new(clock.clone()));
    let client = connected_client(hub, www()).await;

    client.set("k", "v", Some(Duration::MAX)).await.unwrap();
    let raw: Value = serde_json::from_str(&store.get("k").unwrap().unwrap()).unwrap();
    assert!(raw["expireAt"].as_i64().is_some());

    clock.advance(10_000_000);
    assert_eq!(client.get(&["k"]).await.unwrap(), json!("v"));
}

#[tokio::test]
async fn test_non_integer_ttl_fails() {
    let client = open_client().await;
    let err = client
        .request(Method::Set, json!({"key": "a", "value": 1, "ttl": "soon"}))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::Remote("ttl must be a number".to_string()));
    assert_eq!(client.get(&["a"]).await.unwrap(), Value::Null);
}

#[tokio::test]
async fn test_permission_scenario() {
    let store = SharedStore::new(MemoryStore::new());
    let sub_client = connected_client(Hub::new(store.clone(), example_permissions()), sub()).await;
    let www_client = connected_client(Hub::new(store.clone(), example_permissions()), www()).await;

    let err = sub_client.set("greeting", "hi", None).await.unwrap_err();
    assert_eq!(err, ClientError::Remote("Invalid permissions for set".to_string()));
    assert_eq!(err.to_string(), "Invalid permissions for set");
    assert!(store.keys().unwrap().is_empty());

    www_client.set("greeting", "hi", None).await.unwrap();
    assert_eq!(www_client.get(&["greeting"]).await.unwrap(), json!("hi"));
    assert_eq!(sub_client.get(&["greeting"]).await.unwrap(), json!("hi"));
}

#[tokio::test]
async fn test_denied_method_leaves_store_untouched() {
    let store = SharedStore::new(MemoryStore::new());
    let sub_client = connected_client(Hub::new(store.clone(), example_permissions()), sub()).await;
    let www_client = connected_client(Hub::new(store.clone(), example_permissions()), www()).await;
    www_client.set("keep", true, None).await.unwrap();

    for result in [sub_client.clear().await, sub_client.del(&["keep"]).await] {
        assert!(matches!(result, Err(ClientError::Remote(msg)) if msg.starts_with("Invalid permissions for")));
    }
    assert_eq!(www_client.get(&["keep"]).await.unwrap(), json!(true));
}

#[tokio::test(start_paused = true)]
async fn test_silent_endpoint_times_out() {
    let options = ClientOptions::default().with_timeout(Duration::from_millis(300));
    let (client, mut hub_port) = client_with_fake_hub(options);

    assert!(tokio::time::timeout(Duration::from_secs(2), client.on_connect()).await.is_err());
    assert!(!client.is_connected());

    let err = client.get(&["a"]).await.unwrap_err();
    assert_eq!(err, ClientError::Timeout(Method::Get));
    assert_eq!(err.to_string(), "Timeout: could not perform get");

    // the request did go out
    let request = next_request(&mut hub_port).await;
    assert_eq!(request.method, Method::Get);
}

#[tokio::test(start_paused = true)]
async fn test_late_response_after_timeout_is_discarded() {
    let options = ClientOptions::default().with_timeout(Duration::from_millis(100));
    let (client, mut hub_port) = client_with_fake_hub(options);

    let err = client.get(&["a"]).await.unwrap_err();
    assert_eq!(err, ClientError::Timeout(Method::Get));

    let stale = next_request(&mut hub_port).await;
    reply(&hub_port, ResponseEnvelope::success(stale.id, Some(json!("late")))).await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.get(&["b"]).await })
    };
    let fresh = next_request(&mut hub_port).await;
    reply(&hub_port, ResponseEnvelope::success(fresh.id, Some(json!("fresh")))).await;
    assert_eq!(pending.await.unwrap().unwrap(), json!("fresh"));
}

#[tokio::test]
async fn test_reversed_responses_reach_their_callers() {
    let (client, mut hub_port) = client_with_fake_hub(ClientOptions::default());

    let fake_hub = async {
        let first = next_request(&mut hub_port).await;
        let second = next_request(&mut hub_port).await;
        let answer = |request: &RequestEnvelope| request.params["keys"][0].as_str().unwrap().to_uppercase();
        let (first_answer, second_answer) = (answer(&first), answer(&second));
        reply(&hub_port, ResponseEnvelope::success(second.id, Some(json!(second_answer)))).await;
        reply(&hub_port, ResponseEnvelope::success(first.id, Some(json!(first_answer)))).await;
    };

    let (a, b, ()) = tokio::join!(client.get(&["a"]), client.get(&["b"]), fake_hub);
    assert_eq!(a.unwrap(), json!("A"));
    assert_eq!(b.unwrap(), json!("B"));
}

#[tokio::test]
async fn test_request_ids_are_unique() {
    let (client, mut hub_port) = client_with_fake_hub(ClientOptions::default());

    let fake_hub = async {
        let mut ids = Vec::new();
        for _ in 0..3 {
            let request = next_request(&mut hub_port).await;
            ids.push(request.id.clone());
            reply(&hub_port, ResponseEnvelope::success(request.id, None)).await;
        }
        ids
    };

    let (a, b, c, ids) = tokio::join!(
        client.set("a", 1, None),
        client.set("b", 2, None),
        client.set("c", 3, None),
        fake_hub
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());
}

#[tokio::test]
async fn test_malformed_payloads_from_hub_are_dropped() {
    let (client, mut hub_port) = client_with_fake_hub(ClientOptions::default());

    let fake_hub = async {
        let request = next_request(&mut hub_port).await;
        for junk in ["{oops", "[1,2]", r#"{"id":5}"#, r#"{"id":"x","error":7}"#] {
            hub_port.send(junk.to_string(), &TargetOrigin::Exact(www())).await.unwrap();
        }
        reply(&hub_port, ResponseEnvelope::success(request.id, Some(json!("ok")))).await;
    };

    let (value, ()) = tokio::join!(client.get(&["a"]), fake_hub);
    assert_eq!(value.unwrap(), json!("ok"));

    // the listener is still serving afterwards
    let fake_hub = async {
        let request = next_request(&mut hub_port).await;
        reply(&hub_port, ResponseEnvelope::success(request.id, Some(json!(2)))).await;
    };
    let (value, ()) = tokio::join!(client.get(&["b"]), fake_hub);
    assert_eq!(value.unwrap(), json!(2));
}

#[tokio::test]
async fn test_remote_error_is_verbatim() {
    let (client, mut hub_port) = client_with_fake_hub(ClientOptions::default());

    let fake_hub = async {
        let request = next_request(&mut hub_port).await;
        reply(&hub_port, ResponseEnvelope::failure(request.id, "disk on fire")).await;
    };

    let (result, ()) = tokio::join!(client.clear(), fake_hub);
    assert_eq!(result.unwrap_err(), ClientError::Remote("disk on fire".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_closed_client_fails_fast_without_sending() {
    let (client, mut hub_port) = client_with_fake_hub(ClientOptions::default());

    client.close().await;
    assert!(client.is_closed());
    assert!(!client.is_connected());

    assert_eq!(client.get(&["a"]).await.unwrap_err(), ClientError::Closed);
    assert_eq!(client.set("a", 1, None).await.unwrap_err(), ClientError::Closed);
    assert_eq!(client.on_connect().await.unwrap_err(), ClientError::Closed);

    match tokio::time::timeout(Duration::from_millis(100), hub_port.recv()).await {
        Ok(Some(message)) => panic!("closed client sent {:?}", message.data),
        Ok(None) | Err(_) => {}
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_leaves_in_flight_requests_to_time_out() {
    let options = ClientOptions::default().with_timeout(Duration::from_millis(250));
    let (client, mut hub_port) = client_with_fake_hub(options);

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.get(&["a"]).await })
    };
    next_request(&mut hub_port).await;

    client.close().await;
    assert_eq!(pending.await.unwrap().unwrap_err(), ClientError::Timeout(Method::Get));
}

#[tokio::test(start_paused = true)]
async fn test_messages_from_other_origins_are_ignored() {
    let (app_port, mut hub_port) = pair(www(), hub_origin());
    let evil = app_port.sender_as(Origin::new("https://evil.test")).unwrap();
    let client = Client::new(HUB_URL, ClientOptions::default(), app_port).unwrap();

    evil.post(READY, TargetOrigin::Any).unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(500), client.on_connect()).await.is_err());
    assert!(!client.is_connected());

    let fake_hub = async {
        let request = next_request(&mut hub_port).await;
        let forged = ResponseEnvelope::success(request.id.clone(), Some(json!("forged")));
        evil.post(serde_json::to_string(&forged).unwrap(), TargetOrigin::Any).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        reply(&hub_port, ResponseEnvelope::success(request.id, Some(json!("genuine")))).await;
    };

    let (value, ()) = tokio::join!(client.get(&["a"]), fake_hub);
    assert_eq!(value.unwrap(), json!("genuine"));
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_channel_id_polls_hub() {
    let options = ClientOptions::default().with_channel_id("frame-1");
    let (client, mut hub_port) = client_with_fake_hub(options);

    let message = hub_port.recv().await.unwrap();
    assert_eq!(message.origin, www());
    assert_eq!(message.data, "poll");

    hub_port.send(READY.to_string(), &TargetOrigin::Exact(www())).await.unwrap();
    client.on_connect().await.unwrap();
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_poll_against_running_hub() {
    let port = start_hub(Hub::new(MemoryStore::new(), PermissionTable::allow_all().unwrap()), www()).await;
    let client = Client::new(HUB_URL, ClientOptions::default().with_channel_id("frame-1"), port).unwrap();

    client.on_connect().await.unwrap();
    client.set("x", 1, None).await.unwrap();
    assert_eq!(client.get(&["x"]).await.unwrap(), json!(1));
}

#[tokio::test(start_paused = true)]
async fn test_on_connect_settles_every_waiter_once() {
    let (client, hub_port) = client_with_fake_hub(ClientOptions::default());

    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.on_connect().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!client.is_connected());

    hub_port.send(READY.to_string(), &TargetOrigin::Any).await.unwrap();
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    assert!(client.is_connected());

    // late callers settle immediately
    client.on_connect().await.unwrap();
}

#[tokio::test]
async fn test_unavailable_hub_closes_client() {
    let (app_port, hub_port) = pair(www(), hub_origin());
    let hub = Hub::new(DisabledStore::default(), PermissionTable::allow_all().unwrap());
    assert!(matches!(hub::init(hub, hub_port).await, HubStatus::Unavailable(_)));

    let client = Client::new(HUB_URL, ClientOptions::default(), app_port).unwrap();
    let err = client.on_connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Unavailable | ClientError::Closed));

    tokio::time::timeout(Duration::from_secs(1), async {
        while !client.is_closed() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(client.get(&["a"]).await.unwrap_err(), ClientError::Closed);
}

#[tokio::test]
async fn test_listen_forwards_changes_from_other_clients() {
    let store = SharedStore::new(MemoryStore::new());
    let permissions = PermissionTable::allow_all().unwrap();
    let watcher = connected_client(Hub::new(store.clone(), permissions.clone()), sub()).await;
    let writer = connected_client(Hub::new(store.clone(), permissions), www()).await;

    let mut subscription = watcher.listen("prefs-changed").await.unwrap();
    assert_eq!(subscription.event_key(), "prefs-changed");

    writer.set("color", "red", None).await.unwrap();
    let notice = subscription.recv().await.unwrap();
    assert_eq!(notice.event_key, "prefs-changed");
    assert_eq!(notice.key.as_deref(), Some("color"));
    assert_eq!(notice.old_value, Value::Null);
    assert_eq!(notice.new_value, json!("red"));

    writer.set("color", "blue", None).await.unwrap();
    let notice = subscription.recv().await.unwrap();
    assert_eq!(notice.old_value, json!("red"));
    assert_eq!(notice.new_value, json!("blue"));

    writer.clear().await.unwrap();
    let notice = subscription.recv().await.unwrap();
    assert_eq!(notice.key, None);

    watcher.unlisten("prefs-changed").await.unwrap();
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn test_listen_key_cannot_be_reused() {
    let client = open_client().await;
    let _subscription = client.listen("changes").await.unwrap();

    let err = client.listen("changes").await.unwrap_err();
    assert_eq!(err, ClientError::Remote("Can't reuse eventKeys".to_string()));
}

#[tokio::test]
async fn test_listen_requires_capability() {
    let client = connected_client(Hub::new(MemoryStore::new(), example_permissions()), www()).await;
    let err = client.listen("changes").await.unwrap_err();
    assert_eq!(err, ClientError::Remote("Invalid permissions for listen".to_string()));
}

#[tokio::test]
async fn test_hub_without_listeners_rejects_listen() {
    let hub = Hub::new(MemoryStore::new(), PermissionTable::allow_all().unwrap()).without_listeners();
    let client = connected_client(hub, www()).await;
    let err = client.listen("changes").await.unwrap_err();
    assert_eq!(err, ClientError::Remote("listen is not supported".to_string()));
}

#[tokio::test]
async fn test_invalid_target_url() {
    let (app_port, _hub_port) = pair(www(), hub_origin());
    let result = Client::new("not a url", ClientOptions::default(), app_port);
    assert!(matches!(result, Err(ClientError::Url(_))));
}
