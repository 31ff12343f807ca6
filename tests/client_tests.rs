//! `RemoteObjectClient` against a live server.
//!
//! # Test Coverage
//! - Discovery populates functions, properties, signals and enums
//! - Calls resolve overloads and surface server-side failures
//! - Property get and set round-trip typed values
//! - Signal subscriptions deliver decoded arguments; unsubscribing the
//!   last listener stops delivery
//!
//! # Test Strategy
//! Each test connects a real client over loopback. Signal delivery is
//! asynchronous, so assertions poll with a bounded deadline instead of a
//! fixed sleep.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use objgate::config::{ClientConfig, HttpConfig};
use objgate::remote::{ClientError, RemoteObjectClient};
use objgate::server::StopMode;
use objgate::{Variant, VariantKind};

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    done()
}

#[test]
fn discovery_populates_all_member_kinds() {
    let fixture = common::start_object_server();
    let client = RemoteObjectClient::connect(&fixture.address).unwrap();

    let mut names: Vec<&str> = client.functions().iter().map(|f| f.name.as_str()).collect();
    names.dedup();
    assert_eq!(names, ["add", "greet", "fail"]);
    let add_int = &client.functions()[0];
    assert_eq!(add_int.params, [VariantKind::Int, VariantKind::Int]);
    assert_eq!(add_int.returns, Some(VariantKind::Int));

    assert_eq!(client.properties().len(), 1);
    assert_eq!(client.properties()[0].name, "count");
    assert_eq!(client.properties()[0].kind, VariantKind::Int);

    let signals: Vec<&str> = client.signals().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(signals, ["tick", "changed"]);

    assert_eq!(client.enums().len(), 1);
    assert_eq!(client.enums()[0].name, "Mode");
    assert_eq!(
        client.enums()[0].members,
        [("Off".to_string(), 0), ("On".to_string(), 1)]
    );

    drop(client);
    fixture.handle.stop(StopMode::WaitClients);
}

#[test]
fn calls_round_trip_typed_values() {
    let fixture = common::start_object_server();
    let client = RemoteObjectClient::connect(&fixture.address).unwrap();

    let sum = client
        .call("add", &[Variant::Int(2), Variant::Int(40)])
        .unwrap();
    assert_eq!(sum, Some(Variant::Int(42)));

    let sum = client
        .call("add", &[Variant::Double(0.5), Variant::Double(1.25)])
        .unwrap();
    assert_eq!(sum, Some(Variant::Double(1.75)));

    let greeting = client
        .call("greet", &[Variant::from("ada")])
        .unwrap();
    assert_eq!(greeting, Some(Variant::String("hello ada".into())));

    match client.call("fail", &[]) {
        Err(ClientError::Status(err)) => assert_eq!(err.status.as_u16(), 500),
        other => panic!("expected a 500 status error, got {other:?}"),
    }

    drop(client);
    fixture.handle.stop(StopMode::WaitClients);
}

#[test]
fn properties_round_trip() {
    let fixture = common::start_object_server();
    let client = RemoteObjectClient::connect(&fixture.address).unwrap();

    assert_eq!(client.get_property("count").unwrap(), Variant::Int(0));
    client.set_property("count", &Variant::Int(13)).unwrap();
    assert_eq!(client.get_property("count").unwrap(), Variant::Int(13));

    client.set_properties(&[("count", Variant::Int(3))]).unwrap();
    assert_eq!(client.get_property("count").unwrap(), Variant::Int(3));

    drop(client);
    fixture.handle.stop(StopMode::WaitClients);
}

#[test]
fn signal_listeners_receive_decoded_arguments() {
    let fixture = common::start_object_server();
    let client = RemoteObjectClient::connect(&fixture.address).unwrap();

    let seen: Arc<Mutex<Vec<Vec<Variant>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let token = client
        .subscribe("changed", move |args| {
            sink.lock().unwrap().push(args.to_vec());
        })
        .unwrap();

    fixture.remote.emit("changed", &[Variant::Int(5)]).unwrap();
    assert!(wait_until(Duration::from_secs(5), || !seen
        .lock()
        .unwrap()
        .is_empty()));
    assert_eq!(seen.lock().unwrap()[0], [Variant::Int(5)]);

    // After the last listener goes, emissions stop arriving.
    client.unsubscribe(&token).unwrap();
    fixture.remote.emit("changed", &[Variant::Int(6)]).unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(seen.lock().unwrap().len(), 1);

    drop(client);
    fixture.handle.stop(StopMode::WaitClients);
}

#[test]
fn quiet_channel_outlives_the_request_read_timeout() {
    let fixture = common::start_object_server();
    let limits = HttpConfig {
        read_timeout: Duration::from_millis(300),
        ..HttpConfig::default()
    };
    let client =
        RemoteObjectClient::connect_with(&fixture.address, ClientConfig::default(), limits)
            .unwrap();

    let ticks: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let sink = ticks.clone();
    let _token = client
        .subscribe("tick", move |_| *sink.lock().unwrap() += 1)
        .unwrap();

    // Nothing is emitted for well past the request timeout; the push
    // stream must stay attached rather than cycle through reconnects.
    std::thread::sleep(Duration::from_millis(1000));
    assert_eq!(fixture.remote.core().unwrap().channel_count(), 1);

    fixture.remote.emit("tick", &[]).unwrap();
    assert!(wait_until(Duration::from_secs(5), || *ticks.lock().unwrap() == 1));

    drop(client);
    fixture.handle.stop(StopMode::WaitClients);
}

#[test]
fn two_listeners_share_one_channel() {
    let fixture = common::start_object_server();
    let client = RemoteObjectClient::connect(&fixture.address).unwrap();

    let ticks: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let changes: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let tick_sink = ticks.clone();
    let change_sink = changes.clone();
    let _tick_token = client
        .subscribe("tick", move |_| *tick_sink.lock().unwrap() += 1)
        .unwrap();
    let _change_token = client
        .subscribe("changed", move |_| *change_sink.lock().unwrap() += 1)
        .unwrap();

    // One channel serves both subscriptions.
    assert_eq!(fixture.remote.core().unwrap().channel_count(), 1);

    fixture.remote.emit("tick", &[]).unwrap();
    fixture.remote.emit("changed", &[Variant::Int(1)]).unwrap();
    fixture.remote.emit("tick", &[]).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        *ticks.lock().unwrap() == 2 && *changes.lock().unwrap() == 1
    }));

    drop(client);
    fixture.handle.stop(StopMode::WaitClients);
}
