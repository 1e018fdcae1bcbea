use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use trellis_core::{
    Container, Error, Inject, Injectable, Provider, ProviderOptions, RequestContext, Resolver,
    Scope, Token,
};

struct Database {
    url: String,
}

impl Provider for Database {}

impl Injectable for Database {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(Database {
            url: "postgres://localhost/app".to_string(),
        })
    }
}

struct UserRepository {
    db: Arc<Database>,
}

impl Provider for UserRepository {}

impl Injectable for UserRepository {
    fn construct(resolver: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(UserRepository {
            db: resolver.get()?,
        })
    }
}

#[test]
fn test_singleton_identity() {
    let container = Container::new();
    container.register::<Database>(ProviderOptions::singleton());

    let a = container.resolve::<Database>().unwrap();
    let b = container.resolve::<Database>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_transient_distinctness() {
    let container = Container::new();
    container.register::<Database>(ProviderOptions::transient());

    let a = container.resolve::<Database>().unwrap();
    let b = container.resolve::<Database>().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));

    // Also within one request scope
    RequestContext::run(|| {
        let c = container.resolve::<Database>().unwrap();
        let d = container.resolve::<Database>().unwrap();
        assert!(!Arc::ptr_eq(&c, &d));
    });
}

#[test]
fn test_transient_shares_singleton_dependencies() {
    let container = Container::new();
    container.register::<Database>(ProviderOptions::singleton());
    container.register::<UserRepository>(ProviderOptions::transient());

    let a = container.resolve::<UserRepository>().unwrap();
    let b = container.resolve::<UserRepository>().unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a.db, &b.db));
    assert_eq!(a.db.url, "postgres://localhost/app");
}

#[test]
fn test_unknown_provider_names_token() {
    let container = Container::new();
    let err = container.resolve::<Database>().err().unwrap();
    match err {
        Error::UnknownProvider(name) => assert!(name.contains("Database")),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_missing_dependency_is_unknown_provider() {
    let container = Container::new();
    container.register::<UserRepository>(ProviderOptions::singleton());

    let err = container.resolve::<UserRepository>().err().unwrap();
    assert!(matches!(err, Error::UnknownProvider(_)));
    assert!(!container.is_instantiated(&Token::of::<UserRepository>()));
}

// A -> B -> A through constructors

struct ServiceA {
    _b: Arc<ServiceB>,
}

struct ServiceB {
    _a: Arc<ServiceA>,
}

impl Provider for ServiceA {}
impl Provider for ServiceB {}

impl Injectable for ServiceA {
    fn construct(resolver: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(ServiceA { _b: resolver.get()? })
    }
}

impl Injectable for ServiceB {
    fn construct(resolver: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(ServiceB { _a: resolver.get()? })
    }
}

#[test]
fn test_constructor_cycle_is_detected() {
    let container = Container::new();
    container.register::<ServiceA>(ProviderOptions::singleton());
    container.register::<ServiceB>(ProviderOptions::singleton());

    let err = container.resolve::<ServiceA>().err().unwrap();
    match &err {
        Error::CircularDependency { chain } => {
            assert_eq!(chain.len(), 3);
            assert!(chain[0].ends_with("ServiceA"));
            assert!(chain[1].ends_with("ServiceB"));
            assert!(chain[2].ends_with("ServiceA"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains(" -> "));

    // Nothing half-built is left behind
    assert!(!container.is_instantiated(&Token::of::<ServiceA>()));
    assert!(!container.is_instantiated(&Token::of::<ServiceB>()));
}

#[test]
fn test_transient_self_cycle_is_detected() {
    struct Looping;
    impl Provider for Looping {}
    impl Injectable for Looping {
        fn construct(resolver: &mut Resolver<'_>) -> Result<Self, Error> {
            let _again: Arc<Looping> = resolver.get()?;
            Ok(Looping)
        }
    }

    let container = Container::new();
    container.register::<Looping>(ProviderOptions::transient());
    assert!(matches!(
        container.resolve::<Looping>(),
        Err(Error::CircularDependency { .. })
    ));
}

// Field back-references do not count as cycles

struct Parent {
    child: Inject<Child>,
}

struct Child {
    parent: Inject<Parent>,
}

impl Provider for Parent {}
impl Provider for Child {}

impl Injectable for Parent {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(Parent {
            child: Inject::new(),
        })
    }

    fn inject(&self, resolver: &mut Resolver<'_>) -> Result<(), Error> {
        self.child.resolve(resolver)
    }
}

impl Injectable for Child {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(Child {
            parent: Inject::new(),
        })
    }

    fn inject(&self, resolver: &mut Resolver<'_>) -> Result<(), Error> {
        self.parent.resolve(resolver)
    }
}

#[test]
fn test_field_back_references_resolve() {
    let container = Container::new();
    container.register::<Parent>(ProviderOptions::singleton());
    container.register::<Child>(ProviderOptions::singleton());

    let parent = container.resolve::<Parent>().unwrap();
    let child = parent.child.get().unwrap();
    assert!(Arc::ptr_eq(child.parent.get().unwrap(), &parent));
    assert!(Arc::ptr_eq(child, &container.resolve::<Child>().unwrap()));
}

#[test]
fn test_failed_field_injection_publishes_nothing() {
    struct Lonely {
        missing: Inject<Database>,
    }
    impl Provider for Lonely {}
    impl Injectable for Lonely {
        fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
            Ok(Lonely {
                missing: Inject::new(),
            })
        }
        fn inject(&self, resolver: &mut Resolver<'_>) -> Result<(), Error> {
            self.missing.resolve(resolver)
        }
    }

    let container = Container::new();
    container.register::<Lonely>(ProviderOptions::singleton());
    assert!(container.resolve::<Lonely>().is_err());
    assert!(!container.is_instantiated(&Token::of::<Lonely>()));

    container.register::<Database>(ProviderOptions::singleton());
    let lonely = container.resolve::<Lonely>().unwrap();
    assert!(lonely.missing.is_injected());
}

struct Producer {
    consumer: Inject<Consumer>,
}

struct Consumer {
    producer: Inject<Producer>,
}

impl Provider for Producer {}
impl Provider for Consumer {}

impl Injectable for Producer {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(Producer {
            consumer: Inject::new(),
        })
    }

    fn inject(&self, resolver: &mut Resolver<'_>) -> Result<(), Error> {
        self.consumer.resolve(resolver)
    }
}

impl Injectable for Consumer {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(Consumer {
            producer: Inject::new(),
        })
    }

    fn inject(&self, resolver: &mut Resolver<'_>) -> Result<(), Error> {
        self.producer.resolve(resolver)
    }
}

#[test]
fn test_transient_field_cycle_terminates() {
    let container = Container::new();
    container.register::<Producer>(ProviderOptions::transient());
    container.register::<Consumer>(ProviderOptions::transient());

    let producer = container.resolve::<Producer>().unwrap();
    let consumer = producer.consumer.get().unwrap();
    assert!(Arc::ptr_eq(consumer.producer.get().unwrap(), &producer));

    // Each top-level resolution still builds a fresh graph
    let other = container.resolve::<Producer>().unwrap();
    assert!(!Arc::ptr_eq(&producer, &other));
}

struct Gate {
    entered: Barrier,
    first: AtomicBool,
}

struct Slow {
    db: Inject<Database>,
}

impl Provider for Slow {}

impl Injectable for Slow {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(Slow { db: Inject::new() })
    }

    fn inject(&self, resolver: &mut Resolver<'_>) -> Result<(), Error> {
        let gate: Arc<Gate> = resolver.get()?;
        if gate.first.swap(false, Ordering::SeqCst) {
            gate.entered.wait();
            thread::sleep(Duration::from_millis(100));
        }
        self.db.resolve(resolver)
    }
}

#[test]
fn test_singleton_is_not_visible_before_fields_are_wired() {
    let container = Container::new();
    container.register_instance(Gate {
        entered: Barrier::new(2),
        first: AtomicBool::new(true),
    });
    container.register::<Database>(ProviderOptions::singleton());
    container.register::<Slow>(ProviderOptions::singleton());
    let gate = container.resolve::<Gate>().unwrap();

    let wiring = {
        let container = container.clone();
        thread::spawn(move || container.resolve::<Slow>())
    };

    // The first resolution is now inside `inject`
    gate.entered.wait();
    let other = container.resolve::<Slow>().unwrap();
    assert!(other.db.is_injected());

    let first = wiring.join().unwrap().unwrap();
    assert!(first.db.is_injected());
    assert!(Arc::ptr_eq(&first, &other));
}

// Request scope

struct RequestState {
    id: usize,
}

static REQUEST_STATES: AtomicUsize = AtomicUsize::new(0);

impl Provider for RequestState {}

impl Injectable for RequestState {
    fn construct(_: &mut Resolver<'_>) -> Result<Self, Error> {
        Ok(RequestState {
            id: REQUEST_STATES.fetch_add(1, Ordering::SeqCst),
        })
    }
}

#[test]
fn test_scope_violation_outside_request() {
    let container = Container::new();
    container.register::<RequestState>(ProviderOptions::request());

    let err = container.resolve::<RequestState>().err().unwrap();
    assert!(matches!(err, Error::ScopeViolation(_)));
    assert!(err.to_string().contains("outside of a request context"));
}

#[test]
fn test_request_scoped_is_cached_per_scope() {
    let container = Container::new();
    container.register::<RequestState>(ProviderOptions::request());

    let (first, again) = RequestContext::run(|| {
        let a = container.resolve::<RequestState>().unwrap();
        let b = container.resolve::<RequestState>().unwrap();
        (a, b)
    });
    assert!(Arc::ptr_eq(&first, &again));

    let other = RequestContext::run(|| container.resolve::<RequestState>().unwrap());
    assert_ne!(first.id, other.id);
}

#[test]
fn test_named_tokens_and_values() {
    let container = Container::new();
    let primary = Token::named("db.primary");
    let replica = Token::named("db.replica");

    container.register_value(primary, "primary".to_string());
    container.register_factory(replica, ProviderOptions::transient(), |_| {
        Ok("replica".to_string())
    });

    assert_eq!(*container.resolve_token::<String>(&primary).unwrap(), "primary");
    assert_eq!(*container.resolve_token::<String>(&replica).unwrap(), "replica");
    assert_eq!(container.scope_of(&primary), Some(Scope::Singleton));
    assert_eq!(container.scope_of(&replica), Some(Scope::Transient));

    // Wrong type for the token is an error, not a panic
    assert!(container.resolve_token::<u32>(&primary).is_err());
}

#[test]
fn test_reset_clears_everything() {
    let container = Container::new();
    container.register::<Database>(ProviderOptions::singleton());
    let before = container.resolve::<Database>().unwrap();

    container.reset();
    assert!(container.resolve::<Database>().is_err());

    container.register::<Database>(ProviderOptions::singleton());
    let after = container.resolve::<Database>().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
}
