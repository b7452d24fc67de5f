//! End-to-end tests against a server bound to an ephemeral port

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Code, Streaming};
use tonic_reflection::pb::server_reflection_client::ServerReflectionClient;
use tonic_reflection::pb::server_reflection_request::MessageRequest;
use tonic_reflection::pb::server_reflection_response::MessageResponse;
use tonic_reflection::pb::ServerReflectionRequest;

use fx_core::CurrencyCode;
use fx_grpc_server::proto::currency_client::CurrencyClient;
use fx_grpc_server::proto::streaming_rate_response::Message;
use fx_grpc_server::proto::{RateRequest, StreamingRateResponse};
use fx_grpc_server::{CurrencyServiceImpl, GrpcServer, GrpcServerConfig};
use fx_rate_feed::{FluctuationConfig, RateTable, StaticRates};

struct TestServer {
    service: CurrencyServiceImpl,
    client: CurrencyClient<Channel>,
    _shutdown: oneshot::Sender<()>,
}

async fn start_server() -> TestServer {
    let table = RateTable::load(&StaticRates::new([("USD", 1.1), ("GBP", 0.85)]))
        .await
        .unwrap();
    let service = CurrencyServiceImpl::new(Arc::new(table));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server = GrpcServer::with_service(GrpcServerConfig::default(), service.clone());
    tokio::spawn(async move {
        server
            .serve_listener(listener, async {
                shutdown_rx.await.ok();
            })
            .await
            .unwrap();
    });

    let client = CurrencyClient::connect(format!("http://{addr}")).await.unwrap();

    TestServer {
        service,
        client,
        _shutdown: shutdown_tx,
    }
}

fn request(base: &str, destination: &str) -> RateRequest {
    RateRequest {
        base: base.to_string(),
        destination: destination.to_string(),
    }
}

async fn subscribe(
    client: &mut CurrencyClient<Channel>,
) -> (mpsc::Sender<RateRequest>, Streaming<StreamingRateResponse>) {
    let (tx, rx) = mpsc::channel(8);
    let inbound = client
        .subscribe_rates(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();
    (tx, inbound)
}

async fn next_message(stream: &mut Streaming<StreamingRateResponse>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("timeout waiting for message")
        .unwrap()
        .and_then(|response| response.message)
        .expect("stream ended")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_unary_lookups() {
    let mut server = start_server().await;

    let response = server.client.get_rate(request("EUR", "USD")).await.unwrap().into_inner();
    assert_eq!(response.base, "EUR");
    assert_eq!(response.destination, "USD");
    assert_eq!(response.rate, 1.1);

    let response = server.client.get_rate(request("GBP", "USD")).await.unwrap().into_inner();
    assert!((response.rate - 1.1 / 0.85).abs() < 1e-12);
}

#[tokio::test]
async fn test_same_currency_rejected() {
    let mut server = start_server().await;

    let status = server.client.get_rate(request("USD", "USD")).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = server.client.get_rate(request("EUR", "JPY")).await.unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    // Table unaffected by the rejected call
    let response = server.client.get_rate(request("EUR", "USD")).await.unwrap().into_inner();
    assert_eq!(response.rate, 1.1);
}

#[tokio::test]
async fn test_duplicate_subscription_reported_in_band() {
    let mut server = start_server().await;
    let (tx, mut inbound) = subscribe(&mut server.client).await;

    tx.send(request("EUR", "GBP")).await.unwrap();
    tx.send(request("EUR", "GBP")).await.unwrap();

    match next_message(&mut inbound).await {
        Message::Error(err) => {
            assert_eq!(err.code, Code::InvalidArgument as i32);
            let rejected = err.request.unwrap();
            assert_eq!(rejected.base, "EUR");
            assert_eq!(rejected.destination, "GBP");
        }
        other => panic!("unexpected message {other:?}"),
    }
    assert_eq!(server.service.registry().subscription_count(), 1);

    // Stream stays usable after the rejection
    server.service.broadcaster().on_tick();
    match next_message(&mut inbound).await {
        Message::RateResponse(rr) => {
            assert_eq!(rr.destination, "GBP");
            assert_eq!(rr.rate, 0.85);
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_does_not_affect_other_subscribers() {
    let mut server = start_server().await;
    let registry = server.service.registry();

    let (a_tx, a_inbound) = subscribe(&mut server.client).await;
    let (b_tx, mut b_inbound) = subscribe(&mut server.client).await;
    a_tx.send(request("EUR", "USD")).await.unwrap();
    b_tx.send(request("EUR", "USD")).await.unwrap();
    wait_until(|| registry.subscription_count() == 2).await;

    drop(a_tx);
    drop(a_inbound);
    wait_until(|| registry.connection_count() == 1).await;

    let table = server.service.table();
    table.fluctuate(&mut StdRng::seed_from_u64(7), &FluctuationConfig::default());
    let expected = table
        .get_rate(&CurrencyCode::base(), &"USD".parse().unwrap())
        .unwrap();

    server.service.broadcaster().on_tick();

    match next_message(&mut b_inbound).await {
        Message::RateResponse(rr) => assert_eq!(rr.rate, expected),
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn test_fluctuation_driver_pushes_updates() {
    let table = RateTable::load(&StaticRates::new([("USD", 1.1)])).await.unwrap();
    let config = fx_grpc_server::ServiceConfig {
        fluctuation: FluctuationConfig {
            interval: Duration::from_millis(50),
            ..FluctuationConfig::default()
        },
        outbound_buffer: 8,
    };
    let service = CurrencyServiceImpl::with_config(Arc::new(table), config);
    service.start();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GrpcServer::with_service(GrpcServerConfig::default(), service.clone());
    let (_shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .serve_listener(listener, async {
                shutdown_rx.await.ok();
            })
            .await
            .unwrap();
    });

    let mut client = CurrencyClient::connect(format!("http://{addr}")).await.unwrap();
    let (tx, mut inbound) = subscribe(&mut client).await;
    tx.send(request("EUR", "USD")).await.unwrap();

    match next_message(&mut inbound).await {
        Message::RateResponse(rr) => {
            assert_eq!(rr.base, "EUR");
            assert_eq!(rr.destination, "USD");
            assert!(rr.rate > 0.0);
        }
        other => panic!("unexpected message {other:?}"),
    }

    service.stop();
}

async fn spawn_server(
    service: CurrencyServiceImpl,
) -> (SocketAddr, oneshot::Sender<()>, JoinHandle<anyhow::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GrpcServer::with_service(GrpcServerConfig::default(), service);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve_listener(listener, async {
                shutdown_rx.await.ok();
            })
            .await
    });
    (addr, shutdown_tx, handle)
}

#[tokio::test]
async fn test_graceful_shutdown_with_open_subscription() {
    let table = RateTable::load(&StaticRates::new([("USD", 1.1)])).await.unwrap();
    let service = CurrencyServiceImpl::new(Arc::new(table));
    let registry = service.registry();
    let (addr, shutdown_tx, handle) = spawn_server(service).await;

    let mut client = CurrencyClient::connect(format!("http://{addr}")).await.unwrap();
    let (tx, mut inbound) = subscribe(&mut client).await;
    tx.send(request("EUR", "USD")).await.unwrap();
    wait_until(|| registry.subscription_count() == 1).await;

    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not finish after shutdown")
        .unwrap()
        .unwrap();

    // Subscriber sees its stream end rather than hang
    let end = tokio::time::timeout(Duration::from_secs(5), inbound.message())
        .await
        .expect("stream did not end");
    assert!(!matches!(end, Ok(Some(_))));
    assert_eq!(registry.connection_count(), 0);
}

#[tokio::test]
async fn test_reflection_lists_currency_service() {
    let table = RateTable::load(&StaticRates::new([("USD", 1.1)])).await.unwrap();
    let (addr, _shutdown, _handle) = spawn_server(CurrencyServiceImpl::new(Arc::new(table))).await;

    let mut reflection = ServerReflectionClient::new(
        Channel::from_shared(format!("http://{addr}"))
            .unwrap()
            .connect()
            .await
            .unwrap(),
    );
    let request = ServerReflectionRequest {
        host: String::new(),
        message_request: Some(MessageRequest::ListServices(String::new())),
    };
    let mut responses = reflection
        .server_reflection_info(tokio_stream::iter(vec![request]))
        .await
        .unwrap()
        .into_inner();

    let response = responses.message().await.unwrap().unwrap();
    match response.message_response {
        Some(MessageResponse::ListServicesResponse(list)) => {
            assert!(list.service.iter().any(|s| s.name == "currency.v1.Currency"));
        }
        other => panic!("unexpected reflection response {other:?}"),
    }
}
