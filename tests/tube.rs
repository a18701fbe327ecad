//! End-to-end tube scenarios over real transports: TCP loopback, child
//! processes, and connected in-memory pairs.

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tubes::{Direction, RecvTimeout, Tube, TubeConfig, TubeErrorKind};

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

async fn tcp_tube_with_peer() -> (Tube, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connect = TcpStream::connect(addr);
    let (client, accepted) = tokio::join!(connect, listener.accept());
    let (server, _) = accepted.unwrap();
    (Tube::from_tcp(client.unwrap()), server)
}

#[tokio::test]
async fn recv_serves_buffered_bytes_in_one_call() {
    let tube = Tube::from_static(b"Hello, world".to_vec());
    assert_eq!(tube.recv(4096).await.unwrap(), b"Hello, world");
    assert!(tube.recv(4096).await.unwrap_err().is_eof());
}

#[tokio::test]
async fn unrecv_bytes_come_back_before_the_transport() {
    let (a, b) = Tube::pair();
    b.send(b"transport bytes").await.unwrap();

    a.unrecv(b"Woohoo").await.unwrap();
    assert_eq!(a.recv(4096).await.unwrap(), b"Woohoo");
    assert_eq!(a.recv(4096).await.unwrap(), b"transport bytes");
}

#[tokio::test]
async fn recv_line_strips_crlf_and_reports_eof() {
    let tube = Tube::from_static(b"A\r\nB\n".to_vec());
    assert_eq!(tube.recv_line().await.unwrap(), b"A");
    assert_eq!(tube.recv_line().await.unwrap(), b"B");

    let err = tube.recv_line().await.unwrap_err();
    assert!(err.is_eof());
    assert!(err.partial().is_empty());
}

#[tokio::test]
async fn recv_until_consumes_exactly_through_the_delimiter() {
    let tube = Tube::from_static(b"Wow, such data".to_vec());
    assert_eq!(tube.recv_until(true, b",").await.unwrap(), b"Wow");
    assert_eq!(tube.recv_n(5).await.unwrap(), b" such");
    assert_eq!(tube.recv(4096).await.unwrap(), b" data");
}

#[tokio::test]
async fn recv_until_leftmost_delimiter_wins() {
    let tube = Tube::from_static(b"a;b,c".to_vec());
    // ';' sits left of ',' regardless of listing order.
    assert_eq!(tube.recv_until(false, b",;").await.unwrap(), b"a;");
}

#[tokio::test]
async fn recv_regex_stops_at_first_match() {
    let tube = Tube::from_static(b"prefix DATA-123 suffix".to_vec());
    let re = regex::bytes::Regex::new(r"DATA-\d{3}").unwrap();
    assert_eq!(tube.recv_regex(&re, false).await.unwrap(), b"prefix DATA-123");
    assert_eq!(tube.recv(4096).await.unwrap(), b" suffix");
}

#[tokio::test]
async fn timed_out_bytes_are_redelivered_later() {
    let (a, b) = Tube::pair();
    a.set_recv_timeout(RecvTimeout::Bounded(Duration::from_millis(30)));

    // Nothing to read yet: the bounded receive must give up empty-handed.
    let err = a.recv(16).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.partial().is_empty());

    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        b.send(b"late arrival").await.unwrap();
        b
    });

    a.set_recv_timeout(RecvTimeout::Bounded(Duration::from_secs(5)));
    assert_eq!(a.recv(16).await.unwrap(), b"late arrival");
    drop(writer.await.unwrap());
}

#[tokio::test]
async fn bounded_recv_returns_within_the_timeout() {
    let (a, _b) = Tube::pair();
    a.set_recv_timeout(RecvTimeout::Bounded(Duration::from_millis(50)));

    let start = std::time::Instant::now();
    let err = a.recv(16).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout());
    assert!(
        elapsed >= Duration::from_millis(45),
        "returned before the timeout: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(250),
        "overran the timeout: {elapsed:?}"
    );
}

#[tokio::test]
async fn recv_until_spends_at_most_its_budget() {
    let (a, b) = Tube::pair();
    a.set_recv_timeout(RecvTimeout::Bounded(Duration::from_millis(60)));
    b.send(b"no stop byte in sight").await.unwrap();

    // The budget is cumulative across peek rounds, not per round.
    let start = std::time::Instant::now();
    let err = a.recv_until(true, b"X").await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout());
    assert_eq!(err.partial(), b"no stop byte in sight");
    assert!(
        elapsed < Duration::from_millis(250),
        "overran the cumulative budget: {elapsed:?}"
    );
}

#[tokio::test]
async fn tcp_roundtrip_and_half_close() -> anyhow::Result<()> {
    init_tracing();
    let (tube, mut peer) = tcp_tube_with_peer().await;

    tube.send_line(b"ping").await?;
    let mut buf = vec![0u8; 16];
    let n = peer.read(&mut buf).await?;
    assert_eq!(&buf[..n], b"ping\n");

    peer.write_all(b"pong\n").await?;
    assert_eq!(tube.recv_line().await?, b"pong");

    // FIN from our side: the peer reads EOF, our read half still works.
    tube.shutdown(Direction::Send).await?;
    assert_eq!(peer.read(&mut buf).await?, 0);
    peer.write_all(b"still open\n").await?;
    assert_eq!(tube.recv_line().await?, b"still open");
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn child_process_roundtrip() -> anyhow::Result<()> {
    use std::process::Stdio;
    use tokio::process::Command;

    init_tracing();
    let child = Command::new("cat")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let tube = Tube::from_child(child)?;

    tube.send_line(b"1").await?;
    tube.send_line(b"2").await?;

    // Closing stdin ends cat; buffered output still drains, then EOF.
    tube.shutdown(Direction::Send).await?;
    assert_eq!(tube.recv_line().await?, b"1");
    assert_eq!(tube.recv_line().await?, b"2");
    assert_eq!(tube.recv_all().await?, b"");

    tube.close().await?;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn child_stderr_is_part_of_the_stream() {
    use std::process::Stdio;
    use tokio::process::Command;

    let child = Command::new("sh")
        .args(["-c", "echo out; echo err 1>&2"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let tube = Tube::from_child(child).unwrap();

    let (lines, err) = tube.recv_lines(2).await;
    assert!(err.is_none());
    let mut lines: Vec<Vec<u8>> = lines;
    lines.sort();
    assert_eq!(lines, vec![b"err".to_vec(), b"out".to_vec()]);

    tube.close().await.unwrap();
}

#[tokio::test]
async fn recv_all_drains_until_peer_half_closes() {
    let (a, b) = Tube::pair();
    b.send(b"first ").await.unwrap();
    b.send(b"second").await.unwrap();
    b.shutdown(Direction::Send).await.unwrap();

    assert_eq!(a.recv_all().await.unwrap(), b"first second");
}

#[tokio::test]
async fn recv_line_contains_skips_noise() {
    let (a, b) = Tube::pair();
    b.send(b"log: starting\nlog: ready for input\nlog: done\n")
        .await
        .unwrap();

    let line = a.recv_line_contains(&[b"ready"]).await.unwrap();
    assert_eq!(line, b"log: ready for input");
    assert_eq!(a.recv_line().await.unwrap(), b"log: done");
}

#[tokio::test]
async fn clean_discards_pending_then_can_recv_reflects_state() {
    let (a, b) = Tube::pair();
    a.set_recv_timeout(RecvTimeout::Bounded(Duration::from_millis(30)));

    b.send(b"banner noise\n").await.unwrap();
    assert!(a.can_recv().await);
    a.clean().await.unwrap();
    assert!(!a.can_recv().await);

    b.send(b"the real payload").await.unwrap();
    assert_eq!(a.recv(64).await.unwrap(), b"the real payload");
}

#[tokio::test]
async fn send_then_synchronizes_on_the_prompt() {
    let (a, b) = Tube::pair();

    let peer = tokio::spawn(async move {
        assert_eq!(b.recv_line().await.unwrap(), b"version");
        b.send(b"v2.1 >").await.unwrap();
        b
    });

    a.send_line_then(b"version", b">").await.unwrap();
    drop(peer.await.unwrap());
}

#[tokio::test]
async fn close_interrupts_a_blocked_receive() {
    let (a, _b) = Tube::pair();
    let a = std::sync::Arc::new(a);

    let receiver = {
        let a = std::sync::Arc::clone(&a);
        tokio::spawn(async move {
            a.set_recv_timeout(RecvTimeout::Unlimited);
            a.recv(16).await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    a.close().await.unwrap();

    let err = receiver.await.unwrap().unwrap_err();
    assert!(matches!(err.kind(), TubeErrorKind::Cancelled));

    // Idempotent close, and later operations fail fast.
    a.close().await.unwrap();
    assert!(matches!(
        a.recv(1).await.unwrap_err().kind(),
        TubeErrorKind::Closed
    ));
}

#[tokio::test]
async fn config_builder_applies_to_new_tube() {
    let (a, b) = Tube::pair();
    let a = a.with_config(
        TubeConfig::new()
            .with_newline(b"\r\n".to_vec())
            .with_keep_line_ending(true)
            .with_recv_timeout(RecvTimeout::Bounded(Duration::from_secs(2))),
    );

    a.send_line(b"hello").await.unwrap();
    assert_eq!(b.recv(16).await.unwrap(), b"hello\r\n");

    b.send(b"reply\r\n").await.unwrap();
    assert_eq!(a.recv_line().await.unwrap(), b"reply\r\n");
}

#[tokio::test]
async fn string_receives_decode_lossily() {
    let tube = Tube::from_static(b"line one\nrest of it".to_vec());
    assert_eq!(tube.recv_line_string().await.unwrap(), "line one");
    assert_eq!(tube.recv_all_string().await.unwrap(), "rest of it");
}
