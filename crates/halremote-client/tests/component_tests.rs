//! End-to-end session tests for the remote component.
//!
//! Each test stands up a mock haltalk-style server on loopback TCP: one
//! listener speaking the command-channel conventions (greeting, pings,
//! bind replies) and one speaking the update-channel conventions
//! (subscription ops in, topic-framed updates out).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use halremote_client::{
    ComponentConfig, ComponentEvent, ConnectionError, ConnectionState, RemoteComponent,
};
use halremote_proto::transport::{command_frames, parse_container, update_frames};
use halremote_proto::{
    ComponentRecord, Container, FrameCodec, MessageType, PinRecord, ProtocolParameters,
    GREETING_OP, SUBSCRIBE_OP, UNSUBSCRIBE_OP,
};
use halremote_types::{HalPin, PinDirection, PinType, PinValue};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

const COMPONENT: &str = "testcomp";

#[derive(Clone)]
enum BindReply {
    Confirm,
    Reject(Vec<String>),
    Ignore,
}

#[derive(Debug)]
enum RpcInbound {
    Greeting(String),
    Message(Container),
}

/// Command-channel mock: greets, acks pings while allowed, answers binds
/// per the configured reply, and forwards everything else for assertions.
async fn spawn_rpc(
    bind_reply: BindReply,
    ack_pings: Arc<AtomicBool>,
) -> (String, mpsc::UnboundedReceiver<RpcInbound>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let uri = format!("tcp://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let mut framed = Framed::new(stream, FrameCodec::new());

            let Some(Ok(greeting)) = framed.next().await else {
                continue;
            };
            if greeting.len() == 2 && greeting[0].as_ref() == [GREETING_OP] {
                let _ = tx.send(RpcInbound::Greeting(
                    String::from_utf8_lossy(&greeting[1]).into_owned(),
                ));
            }

            while let Some(Ok(frames)) = framed.next().await {
                let container = parse_container(&frames[0]).unwrap();
                match container.msg_type {
                    MessageType::Ping => {
                        if ack_pings.load(Ordering::SeqCst) {
                            framed
                                .send(command_frames(&Container::ping_acknowledge()).unwrap())
                                .await
                                .unwrap();
                        }
                    }
                    MessageType::HalrcompBind => {
                        let _ = tx.send(RpcInbound::Message(container));
                        let reply = match &bind_reply {
                            BindReply::Confirm => {
                                Some(Container::new(MessageType::HalrcompBindConfirm))
                            }
                            BindReply::Reject(notes) => {
                                let mut container =
                                    Container::new(MessageType::HalrcompBindReject);
                                container.notes = notes.clone();
                                Some(container)
                            }
                            BindReply::Ignore => None,
                        };
                        if let Some(reply) = reply {
                            framed
                                .send(command_frames(&reply).unwrap())
                                .await
                                .unwrap();
                        }
                    }
                    _ => {
                        let _ = tx.send(RpcInbound::Message(container));
                    }
                }
            }
        }
    });

    (uri, rx)
}

/// Update-channel mock: records subscription ops and publishes whatever
/// the test pushes through the returned sender.
async fn spawn_sub() -> (
    String,
    mpsc::UnboundedReceiver<(u8, String)>,
    mpsc::UnboundedSender<(String, Container)>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let uri = format!("tcp://{}", listener.local_addr().unwrap());
    let (subs_tx, subs_rx) = mpsc::unbounded_channel();
    let (publish_tx, mut publish_rx) = mpsc::unbounded_channel::<(String, Container)>();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let mut framed = Framed::new(stream, FrameCodec::new());

            loop {
                tokio::select! {
                    frames = framed.next() => match frames {
                        Some(Ok(frames)) if frames.len() == 2 => {
                            let _ = subs_tx.send((
                                frames[0][0],
                                String::from_utf8_lossy(&frames[1]).into_owned(),
                            ));
                        }
                        Some(_) => {}
                        None => break,
                    },
                    publish = publish_rx.recv() => match publish {
                        Some((topic, container)) => {
                            framed
                                .send(update_frames(&topic, &container).unwrap())
                                .await
                                .unwrap();
                        }
                        None => return,
                    },
                }
            }
        }
    });

    (uri, subs_rx, publish_tx)
}

fn test_pins() -> (Arc<HalPin>, Arc<HalPin>, Arc<HalPin>) {
    let a = Arc::new(
        HalPin::new("a", PinType::Float, PinDirection::Out)
            .with_value(PinValue::Float(1.0))
            .unwrap(),
    );
    let b = Arc::new(HalPin::new("b", PinType::Bit, PinDirection::Out));
    let c = Arc::new(HalPin::new("c", PinType::Bit, PinDirection::In));
    (a, b, c)
}

fn full_update(keepalive_ms: u64) -> Container {
    let mut container = Container::new(MessageType::HalrcompFullUpdate).with_component(
        ComponentRecord {
            name: COMPONENT.to_string(),
            no_create: false,
            pins: vec![
                PinRecord {
                    name: Some(format!("{COMPONENT}.a")),
                    handle: Some(7),
                    dir: None,
                    value: PinValue::Float(2.0),
                },
                PinRecord {
                    name: Some(format!("{COMPONENT}.b")),
                    handle: Some(8),
                    dir: None,
                    value: PinValue::Bit(true),
                },
            ],
        },
    );
    container.pparams = Some(ProtocolParameters {
        keepalive_timer_ms: keepalive_ms,
    });
    container
}

async fn wait_for_state(
    events: &mut mpsc::UnboundedReceiver<ComponentEvent>,
    want: ConnectionState,
) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            if event == ComponentEvent::StateChanged(want) {
                return;
            }
        }
        panic!("event stream ended before reaching {want}");
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want}"));
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting until {what}");
}

#[tokio::test]
async fn test_happy_path() {
    let ack = Arc::new(AtomicBool::new(true));
    let (rpc_uri, mut rpc_rx) = spawn_rpc(BindReply::Confirm, ack).await;
    let (sub_uri, mut subs_rx, publish) = spawn_sub().await;

    let (a, b, _c) = test_pins();
    let config = ComponentConfig::new(rpc_uri, sub_uri)
        .with_component_name(COMPONENT)
        .with_heartbeat_period_ms(200);
    let (component, handle, mut events) =
        RemoteComponent::new(config, vec![a.clone(), b.clone()]).unwrap();
    tokio::spawn(component.run());

    handle.set_ready(true);

    // Identity greeting, then the bind carrying the full pin schema
    match rpc_rx.recv().await.unwrap() {
        RpcInbound::Greeting(identity) => assert!(identity.contains('-')),
        other => panic!("expected greeting, got {other:?}"),
    }
    match rpc_rx.recv().await.unwrap() {
        RpcInbound::Message(container) => {
            assert_eq!(container.msg_type, MessageType::HalrcompBind);
            let comp = &container.components[0];
            assert_eq!(comp.name, COMPONENT);
            assert!(!comp.no_create);

            let mut names: Vec<_> = comp
                .pins
                .iter()
                .map(|p| p.name.clone().unwrap())
                .collect();
            names.sort();
            assert_eq!(names, vec!["testcomp.a", "testcomp.b"]);

            let pin_a = comp
                .pins
                .iter()
                .find(|p| p.name.as_deref() == Some("testcomp.a"))
                .unwrap();
            assert_eq!(pin_a.value, PinValue::Float(1.0));
            assert_eq!(pin_a.dir, Some(PinDirection::Out));
        }
        other => panic!("expected bind, got {other:?}"),
    }

    // Bind confirm makes the client subscribe
    let (op, topic) = subs_rx.recv().await.unwrap();
    assert_eq!(op, SUBSCRIBE_OP);
    assert_eq!(topic, COMPONENT);

    publish
        .send((COMPONENT.to_string(), full_update(500)))
        .unwrap();

    wait_for_state(&mut events, ConnectionState::Connected).await;

    // The state change precedes the value application; give the update
    // a moment to land.
    wait_until("pins are synced", || a.synced() && b.synced()).await;
    assert_eq!(a.value(), PinValue::Float(2.0));
    assert_eq!(b.value(), PinValue::Bit(true));
    assert_eq!(a.handle(), Some(7));
    assert_eq!(b.handle(), Some(8));

    // Nothing was mutated locally, so no set message goes upstream
    let quiet = tokio::time::timeout(Duration::from_millis(150), rpc_rx.recv()).await;
    assert!(quiet.is_err(), "unexpected upstream traffic: {quiet:?}");
}

#[tokio::test]
async fn test_bind_reject_tears_session_down() {
    let ack = Arc::new(AtomicBool::new(true));
    let (rpc_uri, _rpc_rx) =
        spawn_rpc(BindReply::Reject(vec!["name taken".to_string()]), ack).await;
    let (sub_uri, _subs_rx, _publish) = spawn_sub().await;

    let (a, b, _c) = test_pins();
    let config = ComponentConfig::new(rpc_uri, sub_uri).with_component_name(COMPONENT);
    let (component, handle, mut events) = RemoteComponent::new(config, vec![a, b]).unwrap();
    tokio::spawn(component.run());

    handle.set_ready(true);

    let mut got_error = false;
    let mut got_text = false;
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            match event {
                ComponentEvent::ErrorChanged(Some(ConnectionError::Bind)) => got_error = true,
                ComponentEvent::ErrorStringChanged(text) if !text.is_empty() => {
                    assert_eq!(text, "name taken\n");
                    got_text = true;
                }
                _ => {}
            }
            if got_error && got_text {
                return;
            }
        }
        panic!("event stream ended");
    })
    .await
    .expect("timed out waiting for bind reject");

    // The teardown settles into Disconnected
    wait_for_state(&mut events, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn test_incremental_update_with_unknown_handle_ignored() {
    let ack = Arc::new(AtomicBool::new(true));
    let (rpc_uri, mut rpc_rx) = spawn_rpc(BindReply::Confirm, ack).await;
    let (sub_uri, _subs_rx, publish) = spawn_sub().await;

    let (a, b, _c) = test_pins();
    let config = ComponentConfig::new(rpc_uri, sub_uri)
        .with_component_name(COMPONENT)
        .with_heartbeat_period_ms(200);
    let (component, handle, mut events) =
        RemoteComponent::new(config, vec![a.clone(), b.clone()]).unwrap();
    tokio::spawn(component.run());

    handle.set_ready(true);
    rpc_rx.recv().await.unwrap(); // greeting
    rpc_rx.recv().await.unwrap(); // bind
    publish
        .send((COMPONENT.to_string(), full_update(500)))
        .unwrap();
    wait_for_state(&mut events, ConnectionState::Connected).await;

    // A delta for a handle nobody owns, then one for a known handle
    publish
        .send((
            COMPONENT.to_string(),
            Container::new(MessageType::HalrcompIncrementalUpdate)
                .with_pin(PinRecord::keyed(99, PinValue::Bit(true))),
        ))
        .unwrap();
    publish
        .send((
            COMPONENT.to_string(),
            Container::new(MessageType::HalrcompIncrementalUpdate)
                .with_pin(PinRecord::keyed(7, PinValue::Float(5.0))),
        ))
        .unwrap();

    wait_until("pin a mirrors the delta", || {
        a.value() == PinValue::Float(5.0)
    })
    .await;
    assert!(a.synced());
    assert_eq!(b.value(), PinValue::Bit(true), "other pins untouched");

    // The unknown handle produced no state change and no error
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ComponentEvent::ErrorChanged(Some(_))),
            "unexpected error event: {event:?}"
        );
        assert!(
            !matches!(event, ComponentEvent::StateChanged(_)),
            "unexpected state change: {event:?}"
        );
    }
}

#[tokio::test]
async fn test_local_change_while_disconnected_not_sent() {
    let ack = Arc::new(AtomicBool::new(true));
    let (rpc_uri, mut rpc_rx) = spawn_rpc(BindReply::Ignore, ack).await;
    let (sub_uri, _subs_rx, _publish) = spawn_sub().await;

    let (a, b, _c) = test_pins();
    let config = ComponentConfig::new(rpc_uri, sub_uri)
        .with_component_name(COMPONENT)
        .with_heartbeat_period_ms(200);
    let (component, handle, _events) =
        RemoteComponent::new(config, vec![a.clone(), b]).unwrap();
    tokio::spawn(component.run());

    handle.set_ready(true);
    rpc_rx.recv().await.unwrap(); // greeting
    rpc_rx.recv().await.unwrap(); // bind, never confirmed

    a.set_value(PinValue::Float(3.0)).unwrap();

    let quiet = tokio::time::timeout(Duration::from_millis(200), rpc_rx.recv()).await;
    assert!(quiet.is_err(), "set must not reach the wire: {quiet:?}");
    assert_eq!(a.value(), PinValue::Float(3.0));
    assert!(!a.synced());
}

#[tokio::test]
async fn test_subscriber_timeout_and_recovery() {
    let ack = Arc::new(AtomicBool::new(true));
    let (rpc_uri, mut rpc_rx) = spawn_rpc(BindReply::Confirm, ack).await;
    let (sub_uri, mut subs_rx, publish) = spawn_sub().await;

    let (a, b, _c) = test_pins();
    let config = ComponentConfig::new(rpc_uri, sub_uri)
        .with_component_name(COMPONENT)
        .with_heartbeat_period_ms(100);
    let (component, handle, mut events) =
        RemoteComponent::new(config, vec![a.clone(), b.clone()]).unwrap();
    tokio::spawn(component.run());

    handle.set_ready(true);
    rpc_rx.recv().await.unwrap(); // greeting
    rpc_rx.recv().await.unwrap(); // bind

    let (op, _) = subs_rx.recv().await.unwrap();
    assert_eq!(op, SUBSCRIBE_OP);

    // keepalive 50ms -> 100ms supervision window, then starvation
    publish
        .send((COMPONENT.to_string(), full_update(50)))
        .unwrap();
    wait_for_state(&mut events, ConnectionState::Connected).await;

    wait_for_state(&mut events, ConnectionState::Timeout).await;
    assert!(!a.synced());
    assert!(!b.synced());

    // Any message after the lapse triggers a fresh join
    publish
        .send((COMPONENT.to_string(), Container::ping()))
        .unwrap();

    let (op, topic) = subs_rx.recv().await.unwrap();
    assert_eq!((op, topic.as_str()), (UNSUBSCRIBE_OP, COMPONENT));
    let (op, topic) = subs_rx.recv().await.unwrap();
    assert_eq!((op, topic.as_str()), (SUBSCRIBE_OP, COMPONENT));

    // The fresh full update restores handles and the session
    publish
        .send((COMPONENT.to_string(), full_update(50)))
        .unwrap();
    wait_for_state(&mut events, ConnectionState::Connected).await;
    wait_until("pin a resynced", || a.synced()).await;
    assert_eq!(a.handle(), Some(7));
}

#[tokio::test]
async fn test_rpc_ping_attrition() {
    let ack = Arc::new(AtomicBool::new(true));
    let (rpc_uri, mut rpc_rx) = spawn_rpc(BindReply::Confirm, ack.clone()).await;
    let (sub_uri, _subs_rx, publish) = spawn_sub().await;

    let (a, b, _c) = test_pins();
    let config = ComponentConfig::new(rpc_uri, sub_uri)
        .with_component_name(COMPONENT)
        .with_heartbeat_period_ms(50)
        .with_rpc_ping_error_threshold(2);
    let (component, handle, mut events) =
        RemoteComponent::new(config, vec![a.clone(), b]).unwrap();
    tokio::spawn(component.run());

    handle.set_ready(true);
    rpc_rx.recv().await.unwrap(); // greeting
    rpc_rx.recv().await.unwrap(); // bind
    publish
        .send((COMPONENT.to_string(), full_update(1000)))
        .unwrap();
    wait_for_state(&mut events, ConnectionState::Connected).await;

    // The server goes deaf; the third unanswered probe drops the link
    ack.store(false, Ordering::SeqCst);

    wait_for_state(&mut events, ConnectionState::Timeout).await;
    assert!(!a.synced());
}

#[tokio::test]
async fn test_outbound_pin_change_batches_and_filters() {
    let ack = Arc::new(AtomicBool::new(true));
    let (rpc_uri, mut rpc_rx) = spawn_rpc(BindReply::Confirm, ack).await;
    let (sub_uri, _subs_rx, publish) = spawn_sub().await;

    let (a, b, c) = test_pins();
    let config = ComponentConfig::new(rpc_uri, sub_uri)
        .with_component_name(COMPONENT)
        .with_heartbeat_period_ms(200);
    let (component, handle, mut events) =
        RemoteComponent::new(config, vec![a.clone(), b.clone(), c.clone()]).unwrap();
    tokio::spawn(component.run());

    handle.set_ready(true);
    rpc_rx.recv().await.unwrap(); // greeting
    rpc_rx.recv().await.unwrap(); // bind

    let mut update = full_update(500);
    update.components[0].pins.push(PinRecord {
        name: Some(format!("{COMPONENT}.c")),
        handle: Some(9),
        dir: None,
        value: PinValue::Bit(false),
    });
    publish.send((COMPONENT.to_string(), update)).unwrap();
    wait_for_state(&mut events, ConnectionState::Connected).await;

    // An in pin never goes upstream; the out pin does
    c.set_value(PinValue::Bit(true)).unwrap();
    a.set_value(PinValue::Float(7.5)).unwrap();

    match tokio::time::timeout(Duration::from_secs(2), rpc_rx.recv())
        .await
        .expect("timed out waiting for set")
        .unwrap()
    {
        RpcInbound::Message(container) => {
            assert_eq!(container.msg_type, MessageType::HalrcompSet);
            assert_eq!(container.pins.len(), 1);
            assert_eq!(container.pins[0].handle, Some(7));
            assert_eq!(container.pins[0].value, PinValue::Float(7.5));
        }
        other => panic!("expected set, got {other:?}"),
    }
}

#[tokio::test]
async fn test_repeated_full_update_is_idempotent() {
    let ack = Arc::new(AtomicBool::new(true));
    let (rpc_uri, mut rpc_rx) = spawn_rpc(BindReply::Confirm, ack).await;
    let (sub_uri, _subs_rx, publish) = spawn_sub().await;

    let (a, b, _c) = test_pins();
    let config = ComponentConfig::new(rpc_uri, sub_uri)
        .with_component_name(COMPONENT)
        .with_heartbeat_period_ms(200);
    let (component, handle, mut events) =
        RemoteComponent::new(config, vec![a.clone(), b.clone()]).unwrap();
    tokio::spawn(component.run());

    handle.set_ready(true);
    rpc_rx.recv().await.unwrap(); // greeting
    rpc_rx.recv().await.unwrap(); // bind
    publish
        .send((COMPONENT.to_string(), full_update(500)))
        .unwrap();
    wait_for_state(&mut events, ConnectionState::Connected).await;

    publish
        .send((COMPONENT.to_string(), full_update(500)))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(a.handle(), Some(7));
    assert_eq!(b.handle(), Some(8));
    assert_eq!(a.value(), PinValue::Float(2.0));
    assert!(a.synced());

    // Still connected, no error surfaced
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                ComponentEvent::StateChanged(_) | ComponentEvent::ErrorChanged(Some(_))
            ),
            "unexpected event: {event:?}"
        );
    }
}
