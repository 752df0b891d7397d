//! End-to-end scenarios (spec §8): real adapter pairs wired together over
//! an in-memory duplex for the client side and a loopback listener for
//! whatever sits on the other side of the egress, the same shape
//! `session.rs` drives in production minus the registry/router lookup.

use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::adapter::direct::DirectEgress;
use crate::adapter::http::HttpIngress;
use crate::adapter::shadowsocks::{ShadowsocksEgress, ShadowsocksIngress};
use crate::adapter::socks5::Socks5Ingress;
use crate::adapter::tunnel::TunnelIngress;
use crate::adapter::BoxedStream;
use crate::error::Error;
use crate::model::{self, AdapterType, BalanceType, CryptoMethod, Endpoint};
use crate::vo::{Credentials, EgressVo, IngressVo, ShadowsocksOption, TunnelOption};

fn ingress_vo(r#type: AdapterType) -> IngressVo {
    IngressVo {
        r#type,
        binds: Vec::new(),
        credentials: Credentials::default(),
        tls: None,
        ss_option: None,
        tunnel_option: None,
        trojan_option: None,
        websocket_option: None,
    }
}

/// S1. SOCKS5 CONNECT no-auth, DIRECT egress: method-select and CONNECT
/// replies match the literal bytes, and traffic relays verbatim. The
/// target port is an ephemeral loopback listener rather than the
/// literal `:80` from spec.md, since binding that requires privileges.
#[tokio::test]
async fn s1_socks5_connect_no_auth_direct_egress() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = listener.local_addr().unwrap();
    let echo = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        sock.read_exact(&mut buf).await.unwrap();
        sock.write_all(&buf).await.unwrap();
    });

    let ingress = Socks5Ingress::new(&ingress_vo(AdapterType::Socks5));
    let (mut client, ingress_side) = tokio::io::duplex(256);

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut request = vec![0x05, 0x01, 0x00];
    model::serialize_endpoint(
        &Endpoint::new("127.0.0.1", remote_addr.port().to_string()).unwrap(),
        &mut request,
    )
    .unwrap();
    client.write_all(&request).await.unwrap();

    let boxed: BoxedStream = Box::pin(ingress_side);
    let (mut stream, accepted) = ingress.accept(boxed).await.unwrap();
    assert_eq!(accepted.remote.host, "127.0.0.1");
    assert_eq!(accepted.remote.port_u16(), remote_addr.port());

    let egress = DirectEgress;
    let (egress_stream, bound) = egress.connect(&accepted.remote, &[]).await.unwrap();
    ingress.confirm(&mut stream, &bound).await.unwrap();

    let mut method_reply = [0u8; 2];
    client.read_exact(&mut method_reply).await.unwrap();
    assert_eq!(method_reply, [0x05, 0x00]);

    let mut connect_reply = [0u8; 10];
    client.read_exact(&mut connect_reply).await.unwrap();
    assert_eq!(connect_reply, [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);

    let bridge = tokio::spawn(async move {
        let mut stream = stream;
        let mut egress_stream = egress_stream;
        let _ = tokio::io::copy_bidirectional(&mut stream, &mut egress_stream).await;
    });

    client.write_all(b"hello").await.unwrap();
    let mut relayed = [0u8; 5];
    client.read_exact(&mut relayed).await.unwrap();
    assert_eq!(&relayed, b"hello");

    drop(client);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), bridge).await;
    echo.await.unwrap();
}

/// S2. SOCKS5 with credentials, bad password: the method-select and
/// auth-failure replies are sent, `accept` fails, and no egress is ever
/// touched.
#[tokio::test]
async fn s2_socks5_bad_password_closes_without_egress() {
    let mut passwords = HashMap::new();
    passwords.insert("u".to_string(), "p".to_string());
    let vo = IngressVo {
        credentials: Credentials::UserPass(passwords),
        ..ingress_vo(AdapterType::Socks5)
    };
    let ingress = Socks5Ingress::new(&vo);

    let (mut client, ingress_side) = tokio::io::duplex(256);
    client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    client.write_all(&[0x01, 1, b'u', 1, b'x']).await.unwrap();

    let boxed: BoxedStream = Box::pin(ingress_side);
    let err = ingress.accept(boxed).await.unwrap_err();
    assert!(matches!(err, Error::Unauthenticated(_)));

    let mut method_reply = [0u8; 2];
    client.read_exact(&mut method_reply).await.unwrap();
    assert_eq!(method_reply, [0x05, 0x02]);

    let mut auth_reply = [0u8; 2];
    client.read_exact(&mut auth_reply).await.unwrap();
    assert_eq!(auth_reply, [0x01, 0x01]);
}

/// S3. HTTP CONNECT through the HTTP ingress: exact success-reply bytes
/// once the (DIRECT) egress has connected.
#[tokio::test]
async fn s3_http_connect_reply_exact_bytes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = listener.local_addr().unwrap();
    let echo = tokio::spawn(async move {
        let _ = listener.accept().await.unwrap();
    });

    let ingress = HttpIngress::new(&ingress_vo(AdapterType::Http));
    let (mut client, ingress_side) = tokio::io::duplex(512);

    let request = format!(
        "CONNECT 127.0.0.1:{port} HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n",
        port = remote_addr.port()
    );
    client.write_all(request.as_bytes()).await.unwrap();

    let boxed: BoxedStream = Box::pin(ingress_side);
    let (mut stream, accepted) = ingress.accept(boxed).await.unwrap();
    assert_eq!(accepted.remote.port_u16(), remote_addr.port());

    let egress = DirectEgress;
    let (_egress_stream, _bound) = egress.connect(&accepted.remote, &[]).await.unwrap();
    ingress.confirm(&mut stream).await.unwrap();

    let expected = b"HTTP/1.1 200 Connection established\r\n\r\n";
    let mut reply = vec![0u8; expected.len()];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, expected);

    echo.await.unwrap();
}

/// S4. Shadowsocks AEAD round-trip (aes-128-gcm): a real ingress/egress
/// pair sharing password "p" over a loopback socket exercises both
/// directions' lazily-established crypto (the egress's recv half is
/// only known once the ingress replies).
#[tokio::test]
async fn s4_shadowsocks_aead_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = listener.local_addr().unwrap();

    let ss_option = ShadowsocksOption {
        method: CryptoMethod::Aes128Gcm,
        password: "p".to_string(),
    };
    let vo = IngressVo {
        ss_option: Some(ss_option),
        ..ingress_vo(AdapterType::Ss)
    };
    let ingress = ShadowsocksIngress::new(&vo).unwrap();

    let server = tokio::spawn(async move {
        let (sock, _) = listener.accept().await.unwrap();
        let boxed: BoxedStream = Box::pin(sock);
        let (mut stream, accepted) = ingress.accept(boxed).await.unwrap();

        let mut received = accepted.prelude.clone();
        let mut buf = [0u8; 256];
        while received.len() < b"hello world".len() {
            let n = stream.read(&mut buf).await.unwrap();
            assert_ne!(n, 0, "server stream closed before full message arrived");
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"hello world");

        stream.write_all(b"hello world").await.unwrap();
        accepted.remote
    });

    let egress_vo = EgressVo {
        r#type: AdapterType::Ss,
        host: Some("127.0.0.1".to_string()),
        port: Some(server_addr.port().to_string()),
        method: Some(CryptoMethod::Aes128Gcm),
        password: Some("p".to_string()),
        mode: None,
        delay: None,
        credential: None,
        tls: None,
        websocket_option: None,
    };
    let egress = ShadowsocksEgress::new(&egress_vo).unwrap();
    let target = Endpoint::new("example.com", "443").unwrap();
    let (mut client_stream, _bound) = egress.connect(&target).await.unwrap();

    client_stream.write_all(b"hello world").await.unwrap();

    let mut reply = vec![0u8; b"hello world".len()];
    client_stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"hello world");

    let remote = server.await.unwrap();
    assert_eq!(remote.host, "example.com");
    assert_eq!(remote.port_u16(), 443);
}

/// S5. TUNNEL with round-robin over two destinations: five sequential
/// accepts select A,B,A,B,A.
#[tokio::test]
async fn s5_tunnel_round_robin_destination_sequence() {
    let a = Endpoint::new("10.0.0.1", "1000").unwrap();
    let b = Endpoint::new("10.0.0.2", "2000").unwrap();
    let vo = IngressVo {
        tunnel_option: Some(TunnelOption {
            destinations: vec![a.clone(), b.clone()],
            balance: BalanceType::RoundRobin,
        }),
        ..ingress_vo(AdapterType::Tunnel)
    };
    let tunnel = TunnelIngress::new(&vo).unwrap();

    let mut picks = Vec::new();
    for _ in 0..5 {
        let (client, ingress_side) = tokio::io::duplex(8);
        drop(client);
        let boxed: BoxedStream = Box::pin(ingress_side);
        let (_stream, accepted) = tunnel.accept(boxed).await.unwrap();
        picks.push(accepted.remote.clone());
        tunnel.release(accepted.balancer_index.unwrap());
    }

    assert_eq!(picks, vec![a.clone(), b.clone(), a.clone(), b.clone(), a]);
}
