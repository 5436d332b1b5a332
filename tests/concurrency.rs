use bytes::BytesMut;
use polyrpc::core::registry::Registry;
use polyrpc::protocol::binary::{BinaryFrame, BinarySessionBuilder};
use polyrpc::protocol::json::{JsonCodec, JsonFrame};
use polyrpc::protocol::router::Router;
use std::sync::Arc;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encode_decode_heavy() {
    let iterations = 20_000usize;
    let body_sizes = [0usize, 64, 512, 4096];
    let registry = Arc::new(Registry::with_builtin());

    let mut tasks = JoinSet::new();
    for &size in &body_sizes {
        let registry = registry.clone();
        tasks.spawn(async move {
            let codec = registry.codec::<BinaryFrame>("bin").unwrap();
            let mut buf = BytesMut::new();
            for i in 0..iterations {
                let body = vec![((i + size) & 0xFF) as u8; size];
                let frame = BinaryFrame::request(i as u32, 7, body);
                codec.encode(&frame, &mut buf).unwrap();
                assert_eq!(codec.decode(&buf).unwrap(), frame);
                buf.clear();
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn lookups_proceed_while_registering() {
    let registry = Arc::new(Registry::with_builtin());
    let mut tasks = JoinSet::new();

    for w in 0..4u32 {
        let registry = registry.clone();
        tasks.spawn(async move {
            for i in 0..500u32 {
                registry.register_session_builder::<BinaryFrame, _>(
                    "bin",
                    BinarySessionBuilder::new().with_command(w * 1000 + i, "Echo"),
                );
                registry.register_codec(&format!("json-{w}-{i}"), JsonCodec);
                tokio::task::yield_now().await;
            }
        });
    }

    for _ in 0..4 {
        let registry = registry.clone();
        tasks.spawn(async move {
            for _ in 0..5_000 {
                // Builtins are never removed, so every lookup must succeed.
                assert!(registry.codec::<JsonFrame>("json").is_ok());
                assert!(registry.session_builder::<BinaryFrame>("bin").is_ok());
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    assert_eq!(registry.protocols().len(), 2 + 4 * 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn router_registration_is_thread_safe() {
    let router = Arc::new(Router::new());
    let mut tasks = JoinSet::new();

    for w in 0..8 {
        let router = router.clone();
        tasks.spawn(async move {
            for i in 0..100 {
                router
                    .register_fn(format!("Svc{w}.M{i}"), |ctx| async move {
                        Ok(ctx.body().clone())
                    })
                    .unwrap();
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    assert_eq!(router.len(), 800);
    assert!(router.route_name("Svc3.M42").is_ok());
}
