//! End-to-end scenarios against the public engine contract.
//!
//! Each test builds an engine, drives it only through public methods, and
//! asserts what subscribers observed.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kinet_core::{
    Computed, Kinet, KinetError, KinetOptions, Module, ModuleDescriptor, Node, Notification,
    ReattachPolicy, WeakKinet, computed,
};
use serde_json::{Value, json};

type Seen = Rc<RefCell<Vec<(String, Value, Option<Value>, Option<String>)>>>;

fn engine(data: Value) -> Kinet {
    Kinet::new(data, KinetOptions::default()).expect("valid tree")
}

fn record(seen: &Seen) -> impl Fn(&Notification<'_>) + 'static {
    let seen = Rc::clone(seen);
    move |n| {
        seen.borrow_mut().push((
            n.path.to_owned(),
            n.value.clone(),
            n.old.cloned(),
            n.set_by.map(str::to_owned),
        ))
    }
}

fn paths(seen: &Seen) -> Vec<String> {
    seen.borrow().iter().map(|(p, ..)| p.clone()).collect()
}

// ── Basic contract ──────────────────────────────────────────────────────

#[test]
fn counter_scenario() {
    let kinet = engine(json!({"count": 0}));
    let seen = Seen::default();
    kinet.subscribe("count", record(&seen)).unwrap();

    kinet.set_by_path("count", json!(5), None).unwrap();

    assert_eq!(
        *seen.borrow(),
        [("count".to_string(), json!(5), Some(json!(0)), None)]
    );
    assert_eq!(kinet.get_by_path("count").unwrap().value().unwrap(), json!(5));
}

#[test]
fn items_append_scenario() {
    let kinet = engine(json!({"items": [1, 2]}));
    let seen = Seen::default();
    kinet.subscribe("items", record(&seen)).unwrap();

    assert_eq!(kinet.push("items", [json!(3)]).unwrap(), 3);

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].1, json!([1, 2, 3]));
    assert_eq!(kinet.get_by_path("items").unwrap().value().unwrap(), json!([1, 2, 3]));
}

#[test]
fn provenance_suppresses_self_echo() {
    let kinet = engine(json!({"a": 0, "b": 0}));
    let fired = Rc::new(Cell::new(0));

    // Mirror a -> b unless the write came from the mirror itself, and
    // b -> a the same way.
    for (from, to) in [("a", "b"), ("b", "a")] {
        let weak = kinet.downgrade();
        let fired = Rc::clone(&fired);
        kinet
            .subscribe(from, move |n| {
                if n.is_from("self") {
                    return;
                }
                fired.set(fired.get() + 1);
                let kinet = weak.upgrade().unwrap();
                kinet.set_by_path(to, n.value.clone(), Some("self")).unwrap();
            })
            .unwrap();
    }

    kinet.set("a", json!(3)).unwrap();

    assert_eq!(fired.get(), 1);
    assert_eq!(kinet.get("b").unwrap(), json!(3));
}

#[test]
fn subscribe_handle_supports_initial_sync() {
    let kinet = engine(json!({"title": "hi"}));
    let seen = Seen::default();
    let subscription = kinet.subscribe("title", record(&seen)).unwrap();
    subscription.sync().unwrap();
    assert_eq!(seen.borrow()[0].1, json!("hi"));
}

// ── Deep subscription and reattachment ──────────────────────────────────

#[test]
fn deep_subscribe_registers_on_every_descendant() {
    let kinet = engine(json!({"p": {"a": 1, "b": {"c": 2}}}));
    let seen = Seen::default();
    kinet.subscribe_deep("p", record(&seen)).unwrap();

    for path in ["p", "p.a", "p.b", "p.b.c"] {
        assert_eq!(kinet.subscriber_count(path).unwrap(), 1, "{path}");
    }

    kinet.set("p.a", json!(10)).unwrap();
    kinet.set("p.b.c", json!(20)).unwrap();
    assert_eq!(paths(&seen), ["p.a", "p.b.c"]);
}

#[test]
fn deep_subscriber_follows_replaced_container() {
    let kinet = engine(json!({"p": {"a": 1, "b": {"c": 2}}}));
    let seen = Seen::default();
    kinet.subscribe_deep("p", record(&seen)).unwrap();

    kinet
        .set("p", json!({"a": 5, "b": {"c": 6, "d": 7}}))
        .unwrap();
    kinet.set("p.b.d", json!(8)).unwrap();
    kinet.set("p.b.c", json!(9)).unwrap();

    assert_eq!(paths(&seen), ["p", "p.b.d", "p.b.c"]);
    let (_, value, old, _) = seen.borrow()[0].clone();
    assert_eq!(value, json!({"a": 5, "b": {"c": 6, "d": 7}}));
    assert_eq!(old, Some(json!({"a": 1, "b": {"c": 2}})));
}

#[test]
fn nested_shallow_subscriber_is_lost_on_ancestor_replace() {
    let kinet = engine(json!({"p": {"b": {"c": 2}}}));
    let seen = Seen::default();
    kinet.subscribe("p.b.c", record(&seen)).unwrap();

    kinet.set("p", json!({"b": {"c": 3}})).unwrap();
    kinet.set("p.b.c", json!(4)).unwrap();

    // The old p.b.c cell and its subscriber were discarded with the subtree.
    assert!(seen.borrow().is_empty());
    assert_eq!(kinet.subscriber_count("p.b.c").unwrap(), 0);
}

#[test]
fn shallow_subscriber_of_replaced_path_survives_by_default() {
    let kinet = engine(json!({"p": {"x": 1}}));
    let seen = Seen::default();
    kinet.subscribe("p", record(&seen)).unwrap();

    kinet.set("p", json!({"x": 2})).unwrap();
    kinet.set("p", json!({"x": 3})).unwrap();

    assert_eq!(paths(&seen), ["p", "p"]);
}

#[test]
fn deep_only_policy_drops_shallow_subscribers() {
    let kinet = Kinet::new(
        json!({"p": {"x": 1}}),
        KinetOptions::default().with_reattach(ReattachPolicy::DeepOnly),
    )
    .unwrap();
    let shallow = Seen::default();
    let deep = Seen::default();
    kinet.subscribe("p", record(&shallow)).unwrap();
    kinet.subscribe_deep("p", record(&deep)).unwrap();

    // The replace notifies the new cell, which the shallow subscriber
    // never reaches.
    kinet.set("p", json!({"x": 2})).unwrap();
    kinet.set("p.x", json!(3)).unwrap();
    assert!(shallow.borrow().is_empty());
    assert_eq!(paths(&deep), ["p", "p.x"]);
}

#[test]
fn bindings_below_a_replace_fail_loud() {
    let kinet = engine(json!({"p": {"b": {"c": 2}}}));
    let binding = kinet.get_by_path("p.b.c").unwrap();

    kinet.set("p", json!({"b": {"c": 3}})).unwrap();

    assert!(matches!(
        binding.value(),
        Err(KinetError::StaleReference { ref path }) if path == "p.b.c"
    ));
    assert!(matches!(
        binding.force_update(),
        Err(KinetError::StaleReference { .. })
    ));
}

// ── Computed values ─────────────────────────────────────────────────────

#[test]
fn computed_chain_updates_transitively() {
    let kinet = Kinet::new(
        Node::map([
            ("price", Node::from(json!(2))),
            ("qty", Node::from(json!(3))),
            (
                "total",
                Node::from(Computed::new(["price", "qty"], |v| {
                    json!(v.number("price") * v.number("qty"))
                })),
            ),
            (
                "label",
                Node::from(Computed::new(["total"], |v| {
                    json!(format!("total: {}", v.number("total")))
                })),
            ),
        ]),
        KinetOptions::default(),
    )
    .unwrap();
    let totals = Seen::default();
    let labels = Seen::default();
    kinet.subscribe("total", record(&totals)).unwrap();
    kinet.subscribe("label", record(&labels)).unwrap();

    kinet.set("qty", json!(5)).unwrap();

    assert_eq!(totals.borrow()[0].1, json!(10.0));
    assert_eq!(labels.borrow()[0].1, json!("total: 10"));
    assert_eq!(kinet.get("label").unwrap(), json!("total: 10"));
}

/// `base` followed by `links` computed cells, each one more than the last.
fn chain(links: usize, options: KinetOptions) -> Kinet {
    let mut entries = vec![("base".to_owned(), Node::from(json!(0)))];
    for i in 0..links {
        let dependency = if i == 0 { "base".to_owned() } else { format!("c{}", i - 1) };
        let read = dependency.clone();
        entries.push((
            format!("c{i}"),
            Node::from(Computed::new([dependency], move |v| json!(v.number(&read) + 1.0))),
        ));
    }
    Kinet::new(Node::map(entries), options).unwrap()
}

#[test]
fn long_computed_chain_delivers_within_raised_depth() {
    let kinet = chain(80, KinetOptions::default().with_max_update_depth(128));
    let tail = Seen::default();
    kinet.subscribe("c79", record(&tail)).unwrap();

    kinet.set("base", json!(1)).unwrap();

    assert_eq!(tail.borrow().len(), 1);
    assert_eq!(tail.borrow()[0].1, json!(81.0));
}

#[test]
fn chain_past_the_depth_limit_stops_delivery_but_reads_stay_correct() {
    let kinet = chain(80, KinetOptions::default());
    let head = Seen::default();
    let tail = Seen::default();
    kinet.subscribe("c0", record(&head)).unwrap();
    kinet.subscribe("c79", record(&tail)).unwrap();

    kinet.set("base", json!(1)).unwrap();

    assert_eq!(head.borrow().len(), 1);
    assert!(tail.borrow().is_empty());
    assert_eq!(kinet.get("c79").unwrap(), json!(81.0));
}

#[test]
fn scanned_computed_tracks_accessor_paths() {
    let kinet = Kinet::new(
        Node::map([
            ("first", Node::from("Ada")),
            ("last", Node::from("Lovelace")),
            (
                "full",
                Node::from(computed!(|s| json!(format!(
                    "{} {}",
                    s.text("first"),
                    s.text("last")
                )))),
            ),
        ]),
        KinetOptions::default(),
    )
    .unwrap();
    let seen = Seen::default();
    kinet.subscribe("full", record(&seen)).unwrap();

    kinet.set("last", json!("Byron")).unwrap();

    assert_eq!(seen.borrow()[0].1, json!("Ada Byron"));
}

#[test]
fn computed_dependency_survives_container_replace() {
    let kinet = Kinet::new(
        Node::map([
            ("cart", Node::from(json!({"n": 1}))),
            (
                "double",
                Node::from(Computed::new(["cart.n"], |v| json!(v.number("cart.n") * 2.0))),
            ),
        ]),
        KinetOptions::default(),
    )
    .unwrap();
    let seen = Seen::default();
    kinet.subscribe("double", record(&seen)).unwrap();

    kinet.set("cart", json!({"n": 4})).unwrap();
    kinet.set("cart.n", json!(7)).unwrap();

    assert_eq!(seen.borrow().last().unwrap().1, json!(14.0));
}

#[test]
fn replacing_a_computed_with_a_scalar_unwires_it() {
    let kinet = Kinet::new(
        Node::map([
            ("a", Node::from(json!(1))),
            ("c", Node::from(Computed::new(["a"], |v| v.get("a")))),
        ]),
        KinetOptions::default(),
    )
    .unwrap();
    let seen = Seen::default();
    kinet.subscribe("c", record(&seen)).unwrap();

    kinet.set("c", json!("fixed")).unwrap();
    kinet.set("a", json!(2)).unwrap();

    assert_eq!(paths(&seen), ["c"]);
    assert_eq!(kinet.get("c").unwrap(), json!("fixed"));
    assert_eq!(kinet.subscriber_count("a").unwrap(), 0);
}

// ── Modules and callables ───────────────────────────────────────────────

struct Audit {
    kinet: WeakKinet,
    readies: Cell<usize>,
    changes: Rc<Cell<usize>>,
}

impl Module for Audit {
    fn name(&self) -> &str {
        "audit"
    }

    fn ready(&self, kinet: &Kinet) {
        self.readies.set(self.readies.get() + 1);
        assert!(kinet.is_ready());
        assert!(self.kinet.upgrade().is_some());
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

fn audit_descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new("audit", json!({"path": "count"}), |options, kinet| {
        let path = options["path"].as_str().unwrap_or("count").to_owned();
        let changes = Rc::new(Cell::new(0));
        let counter = Rc::clone(&changes);
        kinet.subscribe(&path, move |_| counter.set(counter.get() + 1))?;
        kinet.register_callable("audit.changes", {
            let changes = Rc::clone(&changes);
            move |_| json!(changes.get())
        });
        let module: Rc<dyn Module> = Rc::new(Audit {
            kinet: kinet.downgrade(),
            readies: Cell::new(0),
            changes,
        });
        Ok(module)
    })
}

#[test]
fn modules_load_subscribe_and_receive_ready_once() {
    let kinet = Kinet::new(
        json!({"count": 0}),
        KinetOptions::default().with_module(audit_descriptor()),
    )
    .unwrap();

    kinet.set("count", json!(1)).unwrap();
    kinet.set("count", json!(2)).unwrap();

    assert!(kinet.signal_ready());
    assert!(!kinet.signal_ready());

    let audit = kinet.find_module::<Audit>().expect("loaded");
    assert_eq!(audit.readies.get(), 1);
    assert_eq!(audit.changes.get(), 2);
    assert_eq!(kinet.run_callable("audit.changes", Value::Null).unwrap(), json!(2));
    assert_eq!(kinet.modules().len(), 1);
}

#[test]
fn failing_module_fails_construction() {
    let descriptor = ModuleDescriptor::new("broken", json!({}), |_, kinet| {
        kinet.subscribe("missing", |_| {})?;
        unreachable!("subscribe to a missing path fails");
    });
    let err = Kinet::new(json!({"a": 1}), KinetOptions::default().with_module(descriptor))
        .unwrap_err();

    match err {
        KinetError::Module { name, source } => {
            assert_eq!(name, "broken");
            assert!(matches!(*source, KinetError::NotFound { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}
