#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};

use persistream::{Complex, Handle, Persistence, Persistent, Registry};

#[derive(Default, Persistent)]
struct Plain {
    value: i64,
}

#[derive(Default, Persistent)]
#[persist(name = "macro::Pair", version = 3)]
struct Pair(u32, String);

#[derive(Default, Persistent)]
#[persist(name = "macro::Base", abstract_class)]
struct Base {
    tag: char,
}

#[derive(Default, Persistent)]
#[persist(name = "macro::Rich")]
struct Rich {
    #[persist(base)]
    base: Base,
    flags: (bool, bool),
    impedance: Complex,
    lookup: BTreeMap<String, Vec<u8>>,
    seen: HashSet<i32>,
    #[persist(skip)]
    cache: u64,
}

fn registry() -> Registry {
    Registry::builder()
        .register::<Plain>()
        .register::<Pair>()
        .register::<Base>()
        .register::<Rich>()
        .build()
        .expect("registry")
}

#[test]
fn test_macro_defaults() {
    assert_eq!(Plain::CLASS_NAME, "macro_test::Plain");
    assert_eq!(Plain::VERSION, 1);
    assert_eq!(Pair::CLASS_NAME, "macro::Pair");
    assert_eq!(Pair::VERSION, 3);

    let registry = registry();
    assert!(registry.get("macro::Base").expect("base").is_abstract());
    let rich = registry.lookup::<Rich>().expect("rich");
    assert!(!rich.is_abstract());
    assert_eq!(
        rich.bases().iter().map(|b| b.name()).collect::<Vec<_>>(),
        ["macro::Base"]
    );
}

#[test]
fn test_tuple_struct_round_trip() {
    let registry = registry();
    let facade = Persistence::new(&registry);
    let bytes = facade
        .to_bytes(Some(&Handle::new(Pair(8, "eight".into()))))
        .expect("write");
    assert_eq!(bytes, b"PST\n1\n{%macro::Pair\n3\n0\n8\neight\n}".to_vec());

    let back = facade.from_bytes(&bytes).expect("read").expect("pair");
    let pair = back.borrow::<Pair>().expect("pair");
    assert_eq!((pair.0, pair.1.as_str()), (8, "eight"));
}

#[test]
fn test_macro_ergonomics() {
    let registry = registry();
    let facade = Persistence::new(&registry);

    let mut lookup = BTreeMap::new();
    lookup.insert("a{b}".to_owned(), vec![1, 2, 3]);
    lookup.insert(String::new(), Vec::new());
    let rich = Handle::new(Rich {
        base: Base { tag: '%' },
        flags: (true, false),
        impedance: Complex::new(50.0, -0.25),
        lookup: lookup.clone(),
        seen: [3, -1, 7].into(),
        cache: 12345,
    });

    let bytes = facade.to_bytes(Some(&rich)).expect("write");
    let back = facade.from_bytes(&bytes).expect("read").expect("rich");
    let back = back.borrow::<Rich>().expect("rich");

    assert_eq!(back.base.tag, '%');
    assert_eq!(back.flags, (true, false));
    assert_eq!(back.impedance, Complex::new(50.0, -0.25));
    assert_eq!(back.lookup, lookup);
    assert_eq!(back.seen, HashSet::from([-1, 3, 7]));
    assert_eq!(back.cache, 0);
}

#[test]
fn test_global_registry_installs_once() {
    assert!(Registry::global().is_none());
    let installed = registry().install().expect("first install");
    assert!(installed.lookup::<Rich>().is_some());
    assert!(Registry::global().is_some_and(|g| std::ptr::eq(g, installed)));
    assert!(matches!(
        registry().install(),
        Err(persistream::PersistError::Registry(_))
    ));
}
