//! Remote object HTTP surface.
//!
//! # Test Coverage
//! - Discovery listings for functions, properties, signals and enums
//! - Function calls with query arguments, bodies and overload selection
//! - Status codes for unknown names, unresolved calls and failures
//! - Property get and set, including read-only rejection semantics
//! - Instance services: new, per-instance routing, delete
//!
//! # Test Strategy
//! Raw HTTP against a served test object, asserting the exact text/plain
//! payloads a foreign client would parse.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use objgate::config::{HttpConfig, RemoteServerConfig};
use objgate::remote::RemoteObjectServer;
use objgate::router::HttpRouter;
use objgate::server::{HttpServer, StopMode};
use objgate::ServerAddress;

#[test]
fn discovery_lists_every_member_kind() {
    let fixture = common::start_object_server();
    let addr = fixture.socket_addr();

    let (status, body) = common::http_get(addr, "/counter");
    assert_eq!(status, 200);
    assert_eq!(body, "functions/\nsignals/\nproperties/\nenums/\nchannels/\nping\n");

    let (status, body) = common::http_get(addr, "/counter/ping");
    assert_eq!(status, 200);
    assert!(body.is_empty());

    let (_, functions) = common::http_get(addr, "/counter/functions");
    assert_eq!(
        functions,
        "int add(int,int)\ndouble add(double,double)\nstring greet(string)\nfail()\n"
    );

    let (_, properties) = common::http_get(addr, "/counter/properties");
    assert_eq!(properties, "int count\n");

    let (_, signals) = common::http_get(addr, "/counter/signals");
    assert_eq!(signals, "tick()\nchanged(int)\n");

    let (_, enums) = common::http_get(addr, "/counter/enums");
    assert_eq!(enums, "Mode\n");

    let (_, members) = common::http_get(addr, "/counter/enums/Mode");
    assert_eq!(members, "Off 0\nOn 1\n");

    fixture.handle.stop(StopMode::WaitClients);
}

#[test]
fn function_calls_pick_the_right_overload() {
    let fixture = common::start_object_server();
    let addr = fixture.socket_addr();

    let (status, body) = common::http_get(addr, "/counter/functions/add?a=2&b=3");
    assert_eq!(status, 200);
    assert_eq!(body, "5");

    let (status, body) = common::http_get(addr, "/counter/functions/add?a=1.5&b=2.25");
    assert_eq!(status, 200);
    assert_eq!(body, "3.75");

    // Strings travel quoted so they stay strings.
    let (status, body) = common::http_get(addr, "/counter/functions/greet?name=%22bob%22");
    assert_eq!(status, 200);
    assert_eq!(body, "\"hello bob\"");

    fixture.handle.stop(StopMode::WaitClients);
}

#[test]
fn call_errors_map_to_statuses() {
    let fixture = common::start_object_server();
    let addr = fixture.socket_addr();

    // Unknown function name.
    let (status, _) = common::http_get(addr, "/counter/functions/subtract");
    assert_eq!(status, 404);

    // Known name, no overload for these kinds.
    let (status, _) = common::http_get(addr, "/counter/functions/add?a=%22x%22&b=%22y%22");
    assert_eq!(status, 400);

    // Int and double coerce toward both overloads equally.
    let (status, _) = common::http_get(addr, "/counter/functions/add?a=1&b=2.5");
    assert_eq!(status, 400);

    // Implementation failure.
    let (status, _) = common::http_get(addr, "/counter/functions/fail");
    assert_eq!(status, 500);

    fixture.handle.stop(StopMode::WaitClients);
}

#[test]
fn property_round_trip_over_the_wire() {
    let fixture = common::start_object_server();
    let addr = fixture.socket_addr();

    let (status, body) = common::http_get(addr, "/counter/properties/count");
    assert_eq!(status, 200);
    assert_eq!(body, "0");

    let (status, _) = common::http_get(addr, "/counter/properties/count?value=42");
    assert_eq!(status, 200);
    assert_eq!(fixture.count.load(Ordering::SeqCst), 42);

    let (_, body) = common::http_get(addr, "/counter/properties/count");
    assert_eq!(body, "42");

    // Set also travels as a request body.
    let (status, _) =
        common::http_request(addr, "POST", "/counter/properties/count", Some(b"7"));
    assert_eq!(status, 200);
    assert_eq!(fixture.count.load(Ordering::SeqCst), 7);

    let (status, _) = common::http_get(addr, "/counter/properties/missing");
    assert_eq!(status, 404);

    fixture.handle.stop(StopMode::WaitClients);
}

#[test]
fn bare_properties_path_batch_sets_from_items() {
    let fixture = common::start_object_server();
    let addr = fixture.socket_addr();

    let (status, _) = common::http_get(addr, "/counter/properties?count=9");
    assert_eq!(status, 200);
    assert_eq!(fixture.count.load(Ordering::SeqCst), 9);

    // An unknown name fails the whole request.
    let (status, _) = common::http_get(addr, "/counter/properties?missing=1");
    assert_eq!(status, 404);

    // Without items the path still serves the listing.
    let (_, body) = common::http_get(addr, "/counter/properties");
    assert_eq!(body, "int count\n");

    fixture.handle.stop(StopMode::WaitClients);
}

#[test]
fn instance_service_routes_per_instance() {
    common::init_tracing();
    let remote = Arc::new(RemoteObjectServer::service(
        || common::test_object().0,
        RemoteServerConfig::default(),
    ));
    let router = Arc::new(HttpRouter::new(HttpConfig::default()));
    router.register("/service", remote.clone());
    let address: ServerAddress = "tcp://127.0.0.1:0/".parse().unwrap();
    let handle = HttpServer::new(router).serve(&address).unwrap();
    handle.wait_ready().unwrap();
    let addr = handle.local_addr().unwrap();

    let (status, first) = common::http_get(addr, "/service/new");
    assert_eq!(status, 200);
    let (_, second) = common::http_get(addr, "/service/new");
    assert_ne!(first, second);
    assert_eq!(remote.instance_count(), 2);

    // Instances hold independent state.
    let (status, _) =
        common::http_get(addr, &format!("/service/{first}/properties/count?value=5"));
    assert_eq!(status, 200);
    let (_, body) = common::http_get(addr, &format!("/service/{first}/properties/count"));
    assert_eq!(body, "5");
    let (_, body) = common::http_get(addr, &format!("/service/{second}/properties/count"));
    assert_eq!(body, "0");

    let (status, body) = common::http_get(addr, &format!("/service/{first}/functions/add?a=1&b=2"));
    assert_eq!(status, 200);
    assert_eq!(body, "3");

    let (status, _) = common::http_get(addr, &format!("/service/delete?id={first}"));
    assert_eq!(status, 200);
    assert_eq!(remote.instance_count(), 1);
    let (status, _) = common::http_get(addr, &format!("/service/{first}/properties/count"));
    assert_eq!(status, 404);

    handle.stop(StopMode::WaitClients);
}
