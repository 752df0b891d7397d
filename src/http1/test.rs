use super::*;

use std::io::Cursor;

#[tokio::test]
async fn test_req() -> Result<()> {
    let req = b"\
        GET /req-path?n1=v1&v2=v2 HTTP/1.1\r\n\
        Host: my-host.local\r\n\
        User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:136.0) Gecko/20100101 Firefox/172.0\r\n\
        Accept: */*\r\n\
        Connection: keep-alive\r\n\
        Content-Length: 5\r\n\
        \r\n\
        hello";

    let mut input = BufReader::new(Cursor::new(req));
    let mut r = Reader::new(&mut input, None);

    let request = r.request_line(1024).await?;
    assert_eq!(request.method(), b"GET");
    assert_eq!(request.path(), b"/req-path?n1=v1&v2=v2");

    loop {
        match r.header(1024).await? {
            HeaderRead::EndOfHeader => break,
            HeaderRead::Header(hdr) if hdr.is(b"Host") => {
                assert_eq!(hdr.value(), b"my-host.local");
            }
            HeaderRead::Header(_) => {}
        }
    }

    assert_eq!(Some(5), r.content_length);

    Ok(())
}

#[tokio::test]
async fn test_resp() -> Result<()> {
    let req = b"\
        HTTP/1.1 200 OK\r\n\
        Content-Type: application/json; charset=utf-8\r\n\
        X-Custom: CustomValue\r\n\
        \r\n\
        response\n\
        content";

    let mut input = BufReader::new(Cursor::new(req));
    let mut r = Reader::new(&mut input, None);

    let status = r.status_line(1024).await?;
    assert_eq!(status.status(), b"200 OK");

    for (n, v) in &[
        ("Content-Type", "application/json; charset=utf-8"),
        ("X-Custom", "CustomValue"),
    ] {
        match r.header(1024).await? {
            HeaderRead::Header(hdr) => {
                assert!(hdr.is(n.as_bytes()));
                assert_eq!(hdr.value(), v.as_bytes());
            }
            HeaderRead::EndOfHeader => panic!("unexpected end of header"),
        }
    }

    assert!(matches!(r.header(1024).await?, HeaderRead::EndOfHeader));
    assert_eq!(None, r.content_length);

    Ok(())
}

#[tokio::test]
async fn header_line_over_limit_fails() {
    let req = b"GET / HTTP/1.1\r\nX-Long: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n";
    let mut input = BufReader::new(Cursor::new(req));
    let mut r = Reader::new(&mut input, Some(20));

    assert!(r.request_line(20).await.is_ok());
    assert!(matches!(r.header(20).await, Err(Error::LimitReached)));
}
