//! Multipart encoding through both transfer modes, with real files.

use bytes::BufMut;
use relaynet::http::multipart::{BodyState, ChannelTransfer, Form, MultipartBody, Part, PartStream, WritableChannel};
use std::io::{self, Cursor, Read};
use std::path::Path;

fn drain_buffered(body: &mut MultipartBody, window: usize) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut buf = Vec::with_capacity(window);
        let state = body.transfer_to(&mut (&mut buf).limit(window)).unwrap();
        out.extend_from_slice(&buf);
        if state == BodyState::Stop {
            return out;
        }
    }
}

fn drain_channel<W: WritableChannel>(body: &mut MultipartBody, channel: &mut W) {
    while let ChannelTransfer::Moved(_) = body.transfer_to_channel(channel).unwrap() {}
}

fn sample_form(file: &Path) -> Form {
    Form::with_boundary("b0undary")
        .text("title", "q3 \"final\" report")
        .part("blob", Part::bytes(vec![0xabu8; 3000]).file_name("blob.bin"))
        .part("file", Part::file(file))
        .part("slice", Part::file_range(file, 100, 5000).content_type("text/plain"))
}

fn write_fixture(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("data.txt");
    let content: Vec<u8> = (0..30_000u32).map(|i| b'a' + (i % 26) as u8).collect();
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_declared_length_matches_both_modes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let form = sample_form(&path);
    let declared = form.content_length();
    assert!(declared > 30_000 + 5000 + 3000);

    let buffered = drain_buffered(&mut form.clone().into_body(), 1000);
    assert_eq!(buffered.len() as i64, declared);

    let mut channel = Vec::new();
    let mut body = form.into_body();
    drain_channel(&mut body, &mut channel);
    assert_eq!(channel, buffered);
    assert_eq!(body.transferred() as i64, declared);
    assert!(body.is_done());
}

#[test]
fn test_file_range_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("digits.txt");
    std::fs::write(&path, b"0123456789").unwrap();

    let form = Form::with_boundary("B").part("r", Part::file_range(&path, 3, 4));
    let out = drain_buffered(&mut form.into_body(), 64);
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("\r\n\r\n3456\r\n--B--\r\n"));
}

/// Accepts a few bytes, then refuses on every other call.
#[derive(Default)]
struct TrickleChannel {
    data: Vec<u8>,
    calls: usize,
}

impl WritableChannel for TrickleChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.calls += 1;
        if self.calls % 2 == 0 {
            return Ok(0);
        }
        let n = buf.len().min(7);
        self.data.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

#[test]
fn test_slow_channel_resumes_without_loss() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let form = Form::with_boundary("slow").text("a", "1").part("file", Part::file_range(&path, 0, 200));
    let expected = drain_buffered(&mut form.clone().into_body(), 4096);

    let mut body = form.into_body();
    let mut channel = TrickleChannel::default();
    let mut rounds = 0;
    while let ChannelTransfer::Moved(moved) = body.transfer_to_channel(&mut channel).unwrap() {
        assert!(moved <= 7 * 2, "a slow channel ends the call early");
        rounds += 1;
    }
    assert!(rounds > 10);
    assert_eq!(channel.data, expected);
}

#[test]
fn test_file_channel_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let form = sample_form(&path);
    let expected = drain_buffered(&mut form.clone().into_body(), 8192);

    let mut out = tempfile::tempfile().unwrap();
    drain_channel(&mut form.into_body(), &mut out);

    let mut written = Vec::new();
    use std::io::Seek;
    out.rewind().unwrap();
    out.read_to_end(&mut written).unwrap();
    assert_eq!(written, expected);
}

#[test]
fn test_unknown_stream_length() {
    let form = Form::with_boundary("s")
        .text("k", "v")
        .part("s", Part::stream(None, || Ok(Box::new(Cursor::new(b"streamed".to_vec())) as Box<dyn PartStream>)));
    assert_eq!(form.content_length(), -1);

    let mut body = form.into_body();
    assert_eq!(body.known_length(), None);
    let out = String::from_utf8(drain_buffered(&mut body, 5)).unwrap();
    assert!(out.contains("\r\n\r\nstreamed\r\n--s--\r\n"));
}

#[test]
fn test_truncated_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let form = Form::new().part("file", Part::file(&path));
    let mut body = form.into_body();

    // Shrink the file after its length was taken
    std::fs::write(&path, b"short").unwrap();

    let mut err = None;
    for _ in 0..100 {
        let mut buf = Vec::new();
        match body.transfer_to(&mut (&mut buf).limit(4096)) {
            Ok(BodyState::Stop) => break,
            Ok(BodyState::Continue) => {}
            Err(e) => {
                err = Some(e);
                break;
            }
        }
    }
    assert_eq!(err.map(|e| e.kind()), Some(io::ErrorKind::UnexpectedEof));
}

#[test]
fn test_close_mid_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let mut body = sample_form(&path).into_body();

    let mut buf = Vec::new();
    body.transfer_to(&mut (&mut buf).limit(100)).unwrap();
    body.close();
    body.close();
    assert!(body.is_closed());

    let mut buf = Vec::new();
    assert!(body.transfer_to(&mut (&mut buf).limit(100)).is_err());
    assert!(body.transfer_to_channel(&mut Vec::new()).is_err());
}
