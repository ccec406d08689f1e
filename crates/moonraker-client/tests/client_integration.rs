//! # Moonraker Client Integration Tests
//!
//! Drives a full `MoonrakerClient` against a scripted websocket server.
//!
//! ## Test Categories
//!
//! 1. **Handshake**: readiness polling, subscription, resync
//! 2. **Correlation**: concurrent calls, timeouts, remote errors, close
//! 3. **Supervision**: klippy link loss, dropped sockets, queue overflow
//! 4. **Lifecycle**: notifications in, lifecycle events out
//! 5. **Printer facts**: ETA over the wire
//! 6. **Addressing**: moonraker.conf and unreachable hosts

mod common;

use common::{eventually, notification, print_stats, test_config, FakeMoonraker, Reply};
use moonraker_client::connection::handshake::subscription_params;
use moonraker_client::{
    ClientConfig, EventChannelSink, HostAddress, LifecycleEvent, MoonrakerClient, RpcError,
    StaticAddress,
};
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

// =============================================================================
// TEST HELPERS
// =============================================================================

fn client_for(
    server: &FakeMoonraker,
    config: ClientConfig,
) -> (Arc<MoonrakerClient>, UnboundedReceiver<LifecycleEvent>) {
    let (sink, events) = EventChannelSink::new();
    let client = MoonrakerClient::with_address_source(
        config,
        Arc::new(StaticAddress(server.address.clone())),
        Arc::new(sink),
    )
    .unwrap();
    (Arc::new(client), events)
}

async fn started_client(
    server: &FakeMoonraker,
    config: ClientConfig,
) -> (Arc<MoonrakerClient>, UnboundedReceiver<LifecycleEvent>) {
    let (client, events) = client_for(server, config);
    assert!(client.start());
    wait_translating(&client).await;
    (client, events)
}

async fn wait_translating(client: &MoonrakerClient) {
    eventually("client ready and translating", || async move {
        client.is_ready().await && client.is_translating()
    })
    .await;
}

async fn next_event(events: &mut UnboundedReceiver<LifecycleEvent>) -> LifecycleEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("lifecycle event within 5s")
        .expect("sink still open")
}

// =============================================================================
// HANDSHAKE
// =============================================================================

#[tokio::test]
async fn test_handshake_waits_for_klippy_startup() {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let server = FakeMoonraker::with_script(move |method, _| {
        if method == "server.info" && counter.fetch_add(1, Ordering::SeqCst) < 3 {
            return Reply::Result(json!({"klippy_state": "startup"}));
        }
        Reply::Default
    })
    .await;

    let (client, _events) = started_client(&server, test_config()).await;

    assert!(polls.load(Ordering::SeqCst) >= 4);
    // Exactly one subscription per ready socket
    assert_eq!(
        server.requests("printer.objects.subscribe"),
        vec![subscription_params()]
    );
    assert_eq!(server.connections(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_failure_reconnects() {
    // The first subscription is rejected, the second one succeeds
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let server = FakeMoonraker::with_script(move |method, _| {
        if method == "printer.objects.subscribe" && counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Reply::Error(503, "Klippy Host not connected".into());
        }
        Reply::Default
    })
    .await;

    let (client, _events) = started_client(&server, test_config()).await;
    // Translation only starts on the second socket
    assert_eq!(server.connections(), 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    client.shutdown().await;
}

/// Answer the first `server.info` with `first_probe`, then behave normally.
async fn assert_first_probe_forces_reconnect(
    first_probe: impl Fn() -> Reply + Send + Sync + 'static,
    config: ClientConfig,
) {
    let probes = Arc::new(AtomicUsize::new(0));
    let counter = probes.clone();
    let server = FakeMoonraker::with_script(move |method, _| {
        if method == "server.info" && counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return first_probe();
        }
        Reply::Default
    })
    .await;

    let (client, _events) = started_client(&server, config).await;
    assert_eq!(server.connections(), 2);
    // The first socket never got past the probe
    assert_eq!(server.requests("printer.objects.subscribe").len(), 1);
    assert!(probes.load(Ordering::SeqCst) >= 2);
    client.shutdown().await;
}

#[tokio::test]
async fn test_probe_timeout_reconnects() {
    let config = ClientConfig {
        request_timeout: Duration::from_millis(300),
        ..test_config()
    };
    assert_first_probe_forces_reconnect(|| Reply::Silent, config).await;
}

#[tokio::test]
async fn test_unknown_klippy_state_reconnects() {
    assert_first_probe_forces_reconnect(
        || Reply::Result(json!({"klippy_state": "bogus"})),
        test_config(),
    )
    .await;
}

#[tokio::test]
async fn test_missing_klippy_state_reconnects() {
    assert_first_probe_forces_reconnect(
        || Reply::Result(json!({"klippy_connected": false})),
        test_config(),
    )
    .await;
}

#[tokio::test]
async fn test_probe_error_reconnects() {
    assert_first_probe_forces_reconnect(
        || Reply::Error(500, "Internal Server Error".into()),
        test_config(),
    )
    .await;
}

#[tokio::test]
async fn test_handshake_for_replaced_socket_is_abandoned() {
    // Klippy keeps starting until the first socket is gone
    let released = Arc::new(AtomicBool::new(false));
    let gate = released.clone();
    let server = FakeMoonraker::with_script(move |method, _| match method {
        "server.info" if !gate.load(Ordering::SeqCst) => {
            Reply::Result(json!({"klippy_state": "startup"}))
        }
        _ => Reply::Default,
    })
    .await;
    let (client, _events) = client_for(&server, test_config());
    client.start();

    server.wait_for_requests("server.info", 2).await;
    server.kill_connections();
    server.wait_for_connections(2).await;
    released.store(true, Ordering::SeqCst);
    wait_translating(&client).await;

    assert_eq!(server.requests("printer.objects.subscribe").len(), 1);
    // Nothing keeps polling once the live socket is ready
    let polls = server.requests("server.info").len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.requests("server.info").len(), polls);
    client.shutdown().await;
}

#[tokio::test]
async fn test_resync_restores_running_print() {
    let server = FakeMoonraker::with_script(|method, _| match method {
        "printer.objects.query" => {
            Reply::Result(print_stats("printing", "long.gcode", 3600.0, 3500.0))
        }
        _ => Reply::Default,
    })
    .await;

    let (client, mut events) = started_client(&server, test_config()).await;
    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::Started {
            file_name: "long.gcode".into(),
            restored: true
        }
    );
    client.shutdown().await;
}

#[tokio::test]
async fn test_requests_before_ready_are_not_sent() {
    let server = FakeMoonraker::with_script(|method, _| match method {
        "server.info" => Reply::Result(json!({"klippy_state": "startup"})),
        _ => Reply::Default,
    })
    .await;
    let (client, _events) = client_for(&server, test_config());
    client.start();

    server.wait_for_requests("server.info", 1).await;
    assert_eq!(
        client.request("printer.info", None, false).await,
        Err(RpcError::NotConnected)
    );
    // Forced requests go out while klippy is still starting
    assert_eq!(
        client.request("server.info", None, true).await,
        Ok(json!({"klippy_state": "startup"}))
    );
    assert!(server.requests("printer.info").is_empty());
    client.shutdown().await;
}

// =============================================================================
// CORRELATION
// =============================================================================

#[tokio::test]
async fn test_concurrent_requests_resolve_out_of_order() {
    // Later requests are answered first
    let server = FakeMoonraker::with_script(|method, params| match method {
        "test.echo" => {
            let n = params["n"].as_u64().unwrap_or(0);
            Reply::After(Duration::from_millis((10 - n) * 20), params.clone())
        }
        _ => Reply::Default,
    })
    .await;
    let (client, _events) = started_client(&server, test_config()).await;

    let calls: Vec<_> = (0..10u64)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move {
                (n, client.request("test.echo", Some(json!({"n": n})), false).await)
            })
        })
        .collect();

    for call in calls {
        let (n, outcome) = call.await.unwrap();
        assert_eq!(outcome, Ok(json!({"n": n})));
    }
    client.shutdown().await;
}

#[tokio::test]
async fn test_request_times_out() {
    let server = FakeMoonraker::with_script(|method, _| match method {
        "test.silent" => Reply::Silent,
        _ => Reply::Default,
    })
    .await;
    let config = ClientConfig {
        request_timeout: Duration::from_millis(300),
        ..test_config()
    };
    let (client, _events) = started_client(&server, config).await;

    let started = Instant::now();
    let outcome = client.request("test.silent", None, false).await;
    let elapsed = started.elapsed();

    assert_eq!(outcome, Err(RpcError::TimedOut));
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    // A timeout does not tear the socket down
    assert!(client.is_ready().await);
    client.shutdown().await;
}

#[tokio::test]
async fn test_remote_error_is_reported() {
    let server = FakeMoonraker::with_script(|method, _| match method {
        "server.files.metadata" => Reply::Error(404, "File does not exist".into()),
        _ => Reply::Default,
    })
    .await;
    let (client, _events) = started_client(&server, test_config()).await;

    assert_eq!(
        client
            .request("server.files.metadata", Some(json!({"filename": "x"})), false)
            .await,
        Err(RpcError::Remote {
            code: 404,
            message: "File does not exist".into()
        })
    );
    client.shutdown().await;
}

#[tokio::test]
async fn test_close_releases_outstanding_requests() {
    let server = FakeMoonraker::with_script(|method, _| match method {
        "test.silent" => Reply::Silent,
        _ => Reply::Default,
    })
    .await;
    let config = ClientConfig {
        request_timeout: Duration::from_secs(60),
        ..test_config()
    };
    let (client, _events) = started_client(&server, config).await;

    let calls: Vec<_> = (0..5)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.request("test.silent", None, false).await })
        })
        .collect();
    server.wait_for_requests("test.silent", 5).await;

    client.close().await;
    for call in calls {
        let outcome = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("released promptly")
            .unwrap();
        assert_eq!(outcome, Err(RpcError::NotConnected));
    }

    // The supervisor opens a new socket after the backoff
    server.wait_for_connections(2).await;
    wait_translating(&client).await;
    client.shutdown().await;
}

// =============================================================================
// SUPERVISION
// =============================================================================

#[tokio::test]
async fn test_klippy_disconnect_emits_error_and_reconnects() {
    let server = FakeMoonraker::start().await;
    let (client, mut events) = started_client(&server, test_config()).await;

    server.push(json!({"jsonrpc": "2.0", "method": "notify_klippy_disconnected"}));

    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::Error {
            message: "Klipper Disconnected".into()
        }
    );
    server.wait_for_connections(2).await;
    wait_translating(&client).await;
    assert_eq!(server.requests("printer.objects.subscribe").len(), 2);
    client.shutdown().await;
}

#[tokio::test]
async fn test_dropped_socket_reconnects() {
    let server = FakeMoonraker::start().await;
    let (client, mut events) = started_client(&server, test_config()).await;

    server.kill_connections();

    server.wait_for_connections(2).await;
    wait_translating(&client).await;
    // A dropped socket alone is not a klippy error
    assert!(events.try_recv().is_err());
    client.shutdown().await;
}

#[tokio::test]
async fn test_queue_overflow_restarts_connection() {
    // Resync answers at once, every later query stalls the worker
    let queries = Arc::new(AtomicUsize::new(0));
    let counter = queries.clone();
    let server = FakeMoonraker::with_script(move |method, _| match method {
        "printer.objects.query" if counter.fetch_add(1, Ordering::SeqCst) > 0 => Reply::After(
            Duration::from_secs(2),
            print_stats("paused", "part.gcode", 10.0, 10.0),
        ),
        _ => Reply::Default,
    })
    .await;
    let config = ClientConfig {
        dispatch_queue_capacity: 2,
        ..test_config()
    };
    let (client, _events) = started_client(&server, config).await;

    for _ in 0..10 {
        server.push(notification(
            "notify_status_update",
            json!({"print_stats": {"state": "paused"}}),
        ));
    }

    server.wait_for_connections(2).await;
    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_reconnecting() {
    let server = FakeMoonraker::start().await;
    let (client, _events) = started_client(&server, test_config()).await;

    tokio::time::timeout(Duration::from_secs(5), client.shutdown())
        .await
        .expect("shutdown completes");
    assert!(!client.is_ready().await);
    assert_eq!(
        client.request("server.info", None, true).await,
        Err(RpcError::NotConnected)
    );

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connections(), 1);
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
async fn test_print_lifecycle_events() {
    let server = FakeMoonraker::start().await;
    let (client, mut events) = started_client(&server, test_config()).await;

    server.push(notification(
        "notify_history_changed",
        json!({"action": "added", "job": {"filename": "cube.gcode", "status": "in_progress"}}),
    ));
    for _ in 0..2 {
        server.push(notification(
            "notify_status_update",
            json!({"virtual_sdcard": {"progress": 0.5}}),
        ));
    }
    server.push(notification(
        "notify_history_changed",
        json!({
            "action": "finished",
            "job": {"filename": "cube.gcode", "total_duration": 42.0, "status": "cancelled"}
        }),
    ));

    let expected = vec![
        LifecycleEvent::Started {
            file_name: "cube.gcode".into(),
            restored: false,
        },
        LifecycleEvent::Progress { percent: 50.0 },
        LifecycleEvent::HeightMilestone,
        LifecycleEvent::Progress { percent: 50.0 },
        LifecycleEvent::Failed {
            file_name: "cube.gcode".into(),
            duration_secs: "42.0".into(),
            reason: "cancelled".into(),
        },
    ];
    for want in expected {
        assert_eq!(next_event(&mut events).await, want);
    }
    client.shutdown().await;
}

#[tokio::test]
async fn test_pause_and_complete_events() {
    let server = FakeMoonraker::with_script(|method, _| match method {
        "printer.objects.query" => Reply::Result(print_stats("paused", "part.gcode", 50.0, 40.0)),
        _ => Reply::Default,
    })
    .await;
    let (client, mut events) = started_client(&server, test_config()).await;
    // Resync picks up the paused print
    assert!(matches!(
        next_event(&mut events).await,
        LifecycleEvent::Started { restored: true, .. }
    ));

    server.push(notification(
        "notify_status_update",
        json!({"print_stats": {"state": "paused"}}),
    ));
    server.push(notification(
        "notify_status_update",
        json!({"print_stats": {"state": "complete"}}),
    ));

    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::Paused {
            file_name: Some("part.gcode".into())
        }
    );
    let LifecycleEvent::Done {
        file_name,
        duration_secs,
    } = next_event(&mut events).await
    else {
        panic!("expected done");
    };
    assert_eq!(file_name.as_deref(), Some("part.gcode"));
    assert!(duration_secs.unwrap() >= 50.0);
    client.shutdown().await;
}

#[tokio::test]
async fn test_chatty_notifications_are_dropped() {
    let server = FakeMoonraker::start().await;
    let (client, mut events) = started_client(&server, test_config()).await;

    server.push(notification("notify_gcode_response", json!("ok")));
    server.push(notification("notify_proc_stat_update", json!({"cpu_temp": 40.0})));
    server.push(notification(
        "notify_status_update",
        json!({"virtual_sdcard": {"progress": 0.1}}),
    ));

    assert_eq!(
        next_event(&mut events).await,
        LifecycleEvent::Progress { percent: 10.0 }
    );
    client.shutdown().await;
}

// =============================================================================
// PRINTER FACTS
// =============================================================================

#[tokio::test]
async fn test_eta_over_the_wire() {
    let server = FakeMoonraker::with_script(|method, params| match method {
        "printer.objects.query" if params["objects"].get("gcode_move").is_some() => {
            Reply::Result(json!({
                "status": {
                    "print_stats": {"print_duration": 10.0, "filename": "cube.gcode"},
                    "virtual_sdcard": {"progress": 0.25},
                    "gcode_move": {"speed_factor": 1.0}
                }
            }))
        }
        "server.files.metadata" => Reply::Result(json!({"estimated_time": 1000.0})),
        _ => Reply::Default,
    })
    .await;
    let (client, _events) = started_client(&server, test_config()).await;
    let printer = client.printer();

    assert_eq!(printer.estimate_remaining_seconds().await, 750);
    assert_eq!(printer.estimate_remaining_seconds().await, 750);
    assert_eq!(server.requests("server.files.metadata").len(), 1);

    // Idle printer from the default script
    assert!(!printer.should_timers_run().await);
    assert!(!printer.is_warming_up().await);
    client.shutdown().await;
}

#[tokio::test]
async fn test_printer_facts_degrade_when_disconnected() {
    let (sink, _events) = EventChannelSink::new();
    let client = MoonrakerClient::with_address_source(
        test_config(),
        Arc::new(StaticAddress(HostAddress::new("127.0.0.1", 1))),
        Arc::new(sink),
    )
    .unwrap();
    let printer = client.printer();

    assert_eq!(printer.estimate_remaining_seconds().await, -1);
    assert!(!printer.is_warming_up().await);
    assert!(printer.should_timers_run().await);
    assert_eq!(printer.current_z_offset().await, -1.0);
}

// =============================================================================
// ADDRESSING
// =============================================================================

#[tokio::test]
async fn test_address_read_from_moonraker_conf() {
    let server = FakeMoonraker::start().await;
    let mut conf = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        conf,
        "[server]\nhost: 0.0.0.0\nport: {}\n\n[authorization]\ntrusted_clients:\n  127.0.0.1",
        server.address.port
    )
    .unwrap();

    let (sink, _events) = EventChannelSink::new();
    let config = ClientConfig {
        moonraker_config_path: conf.path().to_path_buf(),
        ..test_config()
    };
    let client = MoonrakerClient::new(config, Arc::new(sink)).unwrap();
    assert_eq!(client.address(), HostAddress::new("127.0.0.1", 7125));

    client.start();
    wait_translating(&client).await;
    assert_eq!(client.address(), server.address);
    client.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_host_keeps_retrying() {
    let (sink, _events) = EventChannelSink::new();
    let client = MoonrakerClient::with_address_source(
        test_config(),
        Arc::new(StaticAddress(HostAddress::new("127.0.0.1", 1))),
        Arc::new(sink),
    )
    .unwrap();
    client.start();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!client.is_ready().await);
    assert_eq!(
        client.request("server.info", None, true).await,
        Err(RpcError::NotConnected)
    );
    tokio::time::timeout(Duration::from_secs(5), client.shutdown())
        .await
        .expect("shutdown completes");
}
