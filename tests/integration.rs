//! End-to-end tests: spawn the compiled binary and drive its stdin/stdout
//! directly, exercising the identity and order-preservation laws rather
//! than any internal module.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;

fn petabuf() -> Command {
    Command::new(env!("CARGO_BIN_EXE_petabuf"))
}

fn roundtrip(input: Vec<u8>) -> (Vec<u8>, std::process::ExitStatus) {
    let mut child = petabuf()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn petabuf");

    let mut stdin = child.stdin.take().unwrap();
    let writer = thread::spawn(move || {
        stdin.write_all(&input).expect("write to petabuf stdin");
        // Dropping `stdin` here closes it, signalling end-of-input.
    });

    let mut output = Vec::new();
    child
        .stdout
        .take()
        .unwrap()
        .read_to_end(&mut output)
        .expect("read petabuf stdout");

    writer.join().expect("writer thread panicked");
    let status = child.wait().expect("wait on petabuf");
    (output, status)
}

#[test]
fn passthrough_small_string() {
    let (output, status) = roundtrip(b"hello world".to_vec());
    assert!(status.success());
    assert_eq!(output, b"hello world");
}

#[test]
fn empty_input_exits_cleanly() {
    let (output, status) = roundtrip(Vec::new());
    assert!(status.success());
    assert!(output.is_empty());
}

#[test]
fn byte_order_is_preserved_across_a_page_boundary() {
    const PAGESZ: usize = 1 << 24;
    // PAGESZ + 5 bytes of a repeating, position-dependent pattern so any
    // reordering or truncation across the page boundary is detectable.
    let input: Vec<u8> = (0..PAGESZ + 5).map(|i| (i % 251) as u8).collect();
    let (output, status) = roundtrip(input.clone());
    assert!(status.success());
    assert_eq!(output.len(), input.len());
    assert_eq!(output, input);
}

#[test]
fn rejects_any_argument() {
    let status = petabuf()
        .arg("foo")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("spawn petabuf");
    assert_eq!(status.code(), Some(1));
}
