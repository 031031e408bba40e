#![allow(missing_docs)]

//! Reading streams written by programs with different class sets.

use persistream::{
    ClassResolver, Handle, InputStream, ModuleResolver, OutputStream, PersistError, Persistence,
    Persistent, ReadMode, Registry,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// --- MOCK DATA STRUCTURES ---

#[derive(Default, Persistent)]
#[persist(name = "zoo::Animal")]
struct Animal {
    name: String,
    friend: Option<Handle>,
}

#[derive(Default, Persistent)]
#[persist(name = "zoo::Dog", version = 2)]
struct Dog {
    #[persist(base)]
    animal: Animal,
    tricks: Vec<String>,
    rival: Option<Handle>,
}

#[derive(Default, Persistent)]
#[persist(name = "zoo::Flea")]
struct Flea {
    bites: u64,
}

mod old {
    use persistream::Persistent;

    #[derive(Default, Persistent)]
    #[persist(name = "lab::Sensor")]
    pub struct Sensor {
        pub id: u32,
    }
}

mod new {
    use persistream::Persistent;

    #[derive(Persistent)]
    #[persist(name = "lab::Sensor", version = 2)]
    pub struct Sensor {
        pub id: u32,
        #[persist(since = 2)]
        pub unit: String,
    }

    impl Default for Sensor {
        fn default() -> Self {
            Self {
                id: 0,
                unit: "celsius".into(),
            }
        }
    }
}

// --- HELPERS ---

fn full_registry() -> Registry {
    Registry::builder()
        .register::<Animal>()
        .register::<Dog>()
        .register::<Flea>()
        .build()
        .expect("writer registry")
}

fn animals_only() -> Registry {
    Registry::builder()
        .register::<Animal>()
        .build()
        .expect("reader registry")
}

fn dog(name: &str, rival: Option<Handle>) -> Handle {
    Handle::new(Dog {
        animal: Animal {
            name: name.into(),
            friend: None,
        },
        tricks: vec!["sit".into(), "roll|over".into()],
        rival,
    })
}

fn write_all(registry: &Registry, roots: &[&Handle]) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut out = OutputStream::new(registry, &mut bytes);
    for root in roots {
        out.write_object(Some(root)).expect("write");
    }
    out.close().expect("close");
    bytes
}

// --- TESTS ---

#[test]
fn pedantic_rejects_unknown_subclass() {
    init_tracing();
    let writer = full_registry();
    let bytes = write_all(&writer, &[&dog("rex", None)]);

    let reader = animals_only();
    let mut input = InputStream::new(&reader, bytes.as_slice()).expect("open");
    let err = input.read_object().expect_err("Dog is unknown");
    assert!(matches!(&err, PersistError::MissingClass(name) if name == "zoo::Dog"));
    assert!(!input.good());
    assert!(matches!(input.read_object(), Err(PersistError::MissingClass(_))));
    assert!(input.close().is_err());
}

#[test]
fn tolerant_reads_unknown_subclass_as_ancestor() {
    init_tracing();
    let writer = full_registry();
    let bytes = write_all(&writer, &[&dog("rex", None)]);

    let reader = animals_only();
    let mut input = InputStream::new(&reader, bytes.as_slice())
        .expect("open")
        .with_mode(ReadMode::Tolerant);
    let animal = input.read_object().expect("tolerant read").expect("animal");
    assert!(animal.is::<Animal>());
    assert_eq!(animal.borrow::<Animal>().expect("animal").name, "rex");
    assert!(input.at_end().expect("end"));
    input.close().expect("good");
}

#[test]
fn skipped_parts_keep_object_indices_in_step() {
    init_tracing();
    let writer = full_registry();
    let rival = Handle::new(Animal {
        name: "tom".into(),
        friend: None,
    });
    let rex = dog("rex", Some(rival.clone()));
    let bytes = write_all(&writer, &[&rex, &rival]);

    let reader = animals_only();
    let mut input = InputStream::new(&reader, bytes.as_slice())
        .expect("open")
        .with_mode(ReadMode::Tolerant);
    let rex = input.read_object().expect("rex").expect("rex");
    let tom = input.read_object().expect("tom").expect("tom");
    assert!(rex.is::<Animal>());
    assert_eq!(tom.borrow::<Animal>().expect("tom").name, "tom");
    assert_eq!(input.object_count(), 2);
}

#[test]
fn unconstructible_objects_inside_skipped_parts() {
    init_tracing();
    let writer = full_registry();
    let flea = Handle::new(Flea { bites: 3 });
    let rex = dog("rex", Some(flea.clone()));
    let bytes = write_all(&writer, &[&rex, &flea]);

    let reader = animals_only();
    let mut input = InputStream::new(&reader, bytes.as_slice())
        .expect("open")
        .with_mode(ReadMode::Tolerant);
    let rex = input.read_object().expect("rex survives").expect("rex");
    assert!(rex.is::<Animal>());
    // The flea's slot exists but holds nothing a live field could point to,
    // and the failure names the class that could not be built.
    let err = input.read_object().expect_err("flea is unconstructible");
    assert!(matches!(err, PersistError::MissingClass(ref name) if name == "zoo::Flea"));
    assert!(!input.good());
}

#[test]
fn tolerant_mode_still_needs_a_concrete_ancestor() {
    let writer = full_registry();
    let bytes = write_all(&writer, &[&Handle::new(Flea { bites: 1 })]);
    let reader = animals_only();
    let facade = Persistence::builder(&reader).mode(ReadMode::Tolerant).build();
    assert!(matches!(
        facade.from_bytes(&bytes),
        Err(PersistError::MissingClass(name)) if name == "zoo::Flea"
    ));
}

#[test]
fn older_streams_leave_new_fields_at_their_defaults() {
    let old_registry = Registry::builder()
        .register::<old::Sensor>()
        .build()
        .expect("old");
    let bytes = Persistence::new(&old_registry)
        .to_bytes(Some(&Handle::new(old::Sensor { id: 11 })))
        .expect("write");

    let new_registry = Registry::builder()
        .register::<new::Sensor>()
        .build()
        .expect("new");
    let sensor = Persistence::new(&new_registry)
        .from_bytes(&bytes)
        .expect("read")
        .expect("sensor");
    let sensor = sensor.borrow::<new::Sensor>().expect("sensor");
    assert_eq!(sensor.id, 11);
    assert_eq!(sensor.unit, "celsius");
}

#[test]
fn newer_streams_skip_unknown_trailing_fields() {
    let new_registry = Registry::builder()
        .register::<new::Sensor>()
        .build()
        .expect("new");
    let written = Handle::new(new::Sensor {
        id: 4,
        unit: "kelvin".into(),
    });
    let mut bytes = Vec::new();
    let mut out = OutputStream::new(&new_registry, &mut bytes);
    out.write_object(Some(&written)).expect("sensor");
    out.write_primitive(&99u8).expect("trailer");
    out.close().expect("close");

    let old_registry = Registry::builder()
        .register::<old::Sensor>()
        .build()
        .expect("old");
    let mut input = InputStream::new(&old_registry, bytes.as_slice()).expect("open");
    let sensor = input.read_object().expect("pedantic read").expect("sensor");
    assert_eq!(sensor.borrow::<old::Sensor>().expect("sensor").id, 4);
    assert_eq!(input.read_primitive::<u8>().expect("trailer"), 99);
}

#[test]
fn resolver_loads_missing_classes_on_demand() {
    init_tracing();
    let writer = full_registry();
    let bytes = write_all(&writer, &[&dog("rex", None)]);

    let core = Registry::builder().build().expect("core");
    let resolver = ModuleResolver::new().module("zoo", ["zoo::Animal", "zoo::Dog"], || {
        Registry::builder()
            .register::<Animal>()
            .register::<Dog>()
            .build()
    });
    assert!(!resolver.is_loaded("zoo"));

    let facade = Persistence::builder(&core).resolver(&resolver).build();
    let rex = facade.from_bytes(&bytes).expect("read").expect("rex");
    assert!(resolver.is_loaded("zoo"));

    let rex_dog = rex.borrow::<Dog>().expect("a real Dog");
    assert_eq!(rex_dog.animal.name, "rex");
    assert_eq!(rex_dog.tricks, ["sit", "roll|over"]);
    drop(rex_dog);

    // Once loaded, the module's types can be written through the same resolver.
    assert_eq!(facade.to_bytes(Some(&rex)).expect("write back"), bytes);
}

#[test]
fn resolver_is_only_consulted_for_unknown_names() {
    let registry = full_registry();
    let resolver = ModuleResolver::new().module("zoo", ["zoo::Dog"], || {
        Err(PersistError::Registry("must not load".into()))
    });
    let bytes = write_all(&registry, &[&dog("rex", None)]);
    let mut input = InputStream::new(&registry, bytes.as_slice())
        .expect("open")
        .with_resolver(&resolver);
    assert!(input.read_object().expect("read").is_some());
    assert!(!resolver.is_loaded("zoo"));
    assert!(resolver.resolve("zoo::Dog").is_none());
}
