#![allow(missing_docs)]

//! Deeply nested graphs and hostile nesting.

use std::io;

use persistream::constants::MAX_DEPTH;
use persistream::{
    Handle, InputStream, OutputStream, PersistError, Persistence, Persistent, Registry,
};

#[derive(Default, Persistent)]
#[persist(name = "t::Node")]
struct Node {
    id: u32,
    next: Option<Handle>,
}

fn registry() -> Registry {
    Registry::builder()
        .register::<Node>()
        .build()
        .expect("registry")
}

/// Builds `len` nodes linked head to tail, ids counting up from 0.
fn chain(len: u32) -> Handle {
    let mut head: Option<Handle> = None;
    for id in (0..len).rev() {
        head = Some(Handle::new(Node { id, next: head }));
    }
    head.expect("non-empty chain")
}

/// Takes a chain apart link by link so dropping it does not recurse.
fn unlink(head: Handle) {
    let mut cursor = Some(head);
    while let Some(handle) = cursor {
        cursor = handle.borrow_mut::<Node>().and_then(|mut node| node.next.take());
    }
}

#[test]
fn long_chains_round_trip() {
    let registry = registry();
    let facade = Persistence::new(&registry);
    let head = chain(5_000);

    let bytes = facade.to_bytes(Some(&head)).expect("write");
    let back = facade.from_bytes(&bytes).expect("read").expect("head");

    let mut cursor = Some(back.clone());
    let mut expected = 0;
    while let Some(handle) = cursor {
        let node = handle.borrow::<Node>().expect("node");
        assert_eq!(node.id, expected);
        expected += 1;
        cursor = node.next.clone();
    }
    assert_eq!(expected, 5_000);

    unlink(head);
    unlink(back);
}

#[test]
fn writers_refuse_excessive_nesting() {
    let registry = registry();

    let deepest = chain(MAX_DEPTH as u32);
    let mut out = OutputStream::new(&registry, io::sink());
    out.write_object(Some(&deepest)).expect("at the limit");
    out.close().expect("close");
    unlink(deepest);

    let too_deep = chain(MAX_DEPTH as u32 + 1);
    let mut out = OutputStream::new(&registry, io::sink());
    let err = out
        .write_object(Some(&too_deep))
        .expect_err("one level too many");
    assert!(matches!(err, PersistError::Internal(_)));
    assert!(!out.good());
    drop(out);
    unlink(too_deep);
}

#[test]
fn readers_refuse_excessive_nesting() {
    let registry = registry();
    let mut bytes = b"PST\n1\n{%t::Node\n1\n0\n0\n".to_vec();
    for _ in 0..MAX_DEPTH {
        bytes.extend_from_slice(b"{#0\n0\n");
    }

    let mut input = InputStream::new(&registry, bytes.as_slice()).expect("open");
    let err = input.read_object().expect_err("nesting limit");
    assert!(matches!(err, PersistError::ReadFailure { .. }));
    assert!(!input.good());
}

#[test]
fn readers_refuse_excessive_class_nesting() {
    let registry = registry();
    let mut bytes = b"PST\n1\n{".to_vec();
    for _ in 0..=MAX_DEPTH {
        bytes.extend_from_slice(b"%t::Node\n1\n1\n");
    }

    let mut input = InputStream::new(&registry, bytes.as_slice()).expect("open");
    assert!(matches!(
        input.read_object(),
        Err(PersistError::ReadFailure { .. })
    ));
}
