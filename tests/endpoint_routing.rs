mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use media_endpoint::endpoint::{Listener, RegistrationError, VirtualHost};
use media_endpoint::routing::matcher::RequestTarget;
use media_endpoint::routing::RouteError;

#[tokio::test]
async fn register_route_and_tear_down() {
    let manager = common::ipv4_manager();
    let (media, mut queue) = VirtualHost::new("media");
    let media: Arc<dyn Listener> = media;

    manager.add_prefix("http://*:38096/media/", media.clone()).await.unwrap();
    let endpoint = manager.endpoint_for("http://*:38096/media/").unwrap().unwrap();
    assert!(!endpoint.dual_mode());

    let client = tokio::spawn(common::send_request(
        common::local(38096),
        "anything:38096",
        "/media/stream.ts",
    ));

    let mut context = tokio::time::timeout(Duration::from_secs(5), queue.recv())
        .await
        .expect("context not dispatched")
        .expect("queue closed");
    assert_eq!(context.listener().map(|l| l.name()), Some("media"));
    assert_eq!(context.url().host_str(), Some("anything"));
    assert_eq!(context.url().path(), "/media/stream.ts");
    assert_eq!(endpoint.pending_connections(), 0);

    context.respond(200, "OK", "streaming").await.unwrap();
    context.finish();
    let response = client.await.unwrap().unwrap();
    assert_eq!(common::status(&response), Some(200));
    assert!(response.ends_with("streaming"));

    let target = RequestTarget::new(Some("anything".into()), 38096, "/media/stream.ts");
    assert!(endpoint.resolve(&target).is_some());

    let (other, _other_queue) = VirtualHost::new("other");
    let err = manager.add_prefix("http://+:38096/media/", other).await.unwrap_err();
    assert!(matches!(err, RegistrationError::Route(RouteError::AlreadyExists { .. })));

    manager.remove_prefix("http://*:38096/media/", &media).await.unwrap();
    assert!(endpoint.resolve(&target).is_none());
    assert!(endpoint.is_closed());
    assert_eq!(manager.endpoint_count(), 0);
    assert!(TcpStream::connect(common::local(38096)).await.is_err());
}

#[tokio::test]
async fn unmatched_request_gets_not_found() {
    let manager = common::ipv4_manager();
    let (web, mut queue) = VirtualHost::new("web");
    manager.add_prefix("http://*:38097/web/", web).await.unwrap();
    let endpoint = manager.endpoint_for("http://*:38097/").unwrap().unwrap();

    let response = common::send_request(common::local(38097), "anything:38097", "/api/items")
        .await
        .unwrap();
    assert_eq!(common::status(&response), Some(404));
    assert!(common::eventually(|| endpoint.pending_connections() == 0).await);
    assert!(queue.try_recv().is_err());

    manager.close_all().await;
}

#[tokio::test]
async fn exact_host_and_longest_path_pick_the_listener() {
    let manager = common::ipv4_manager();
    let (root, mut root_queue) = VirtualHost::new("root");
    let (library, mut library_queue) = VirtualHost::new("library");
    let (local_host, mut local_queue) = VirtualHost::new("localhost");

    manager.add_prefix("http://+:38098/", root).await.unwrap();
    manager.add_prefix("http://*:38098/library/", library).await.unwrap();
    manager.add_prefix("http://localhost:38098/library/", local_host).await.unwrap();

    for (host, path) in [
        ("media.lan:38098", "/index.html"),
        ("media.lan:38098", "/library/items"),
        ("localhost:38098", "/library/items"),
    ] {
        let addr = common::local(38098);
        tokio::spawn(async move {
            let _ = common::send_request(addr, host, path).await;
        });
    }

    let wait = Duration::from_secs(5);
    let from_root = tokio::time::timeout(wait, root_queue.recv()).await.unwrap().unwrap();
    let from_library = tokio::time::timeout(wait, library_queue.recv()).await.unwrap().unwrap();
    let from_local = tokio::time::timeout(wait, local_queue.recv()).await.unwrap().unwrap();

    assert_eq!(from_root.url().path(), "/index.html");
    assert_eq!(from_library.url().host_str(), Some("media.lan"));
    assert_eq!(from_local.url().host_str(), Some("localhost"));

    for context in [from_root, from_library, from_local] {
        context.finish();
    }
    manager.close_all().await;
}

#[tokio::test]
async fn closing_endpoint_drops_waiting_connections() {
    let manager = common::ipv4_manager();
    let (web, _queue) = VirtualHost::new("web");
    manager.add_prefix("http://*:38099/", web).await.unwrap();
    let endpoint = manager.endpoint_for("http://*:38099/").unwrap().unwrap();

    // Connected but never sends a full head.
    let mut idle = TcpStream::connect(common::local(38099)).await.unwrap();
    idle.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
    assert!(common::eventually(|| endpoint.pending_connections() == 1).await);

    manager.close_all().await;
    assert_eq!(endpoint.pending_connections(), 0);
    assert!(common::eventually(|| endpoint.live_connections() == 0).await);
}

#[tokio::test]
async fn listener_unbind_is_reported() {
    let manager = common::ipv4_manager();
    let (host, mut queue) = VirtualHost::new("web");
    manager.add_prefix("http://*:38100/", host.clone()).await.unwrap();

    let client = tokio::spawn(common::send_request(common::local(38100), "anything", "/"));
    let mut context = tokio::time::timeout(Duration::from_secs(5), queue.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(host.in_flight(), 1);

    context.respond(204, "No Content", "").await.unwrap();
    context.finish();
    assert_eq!(host.in_flight(), 0);
    assert_eq!(host.completed(), 1);
    assert_eq!(common::status(&client.await.unwrap().unwrap()), Some(204));

    manager.close_all().await;
}

#[tokio::test]
async fn host_carrying_a_path_is_rejected() {
    let manager = common::ipv4_manager();
    let (media, mut queue) = VirtualHost::new("media");
    manager.add_prefix("http://*:38101/media/", media).await.unwrap();

    let response = common::send_request(common::local(38101), "anything:38101/media", "/stream.ts")
        .await
        .unwrap();
    assert_eq!(common::status(&response), Some(400));
    assert!(queue.try_recv().is_err());

    manager.close_all().await;
}
