//! Reclaims environments that only reference cycles keep alive.
//!
//! A function declared in a scope is stored in that scope and closes over
//! it, so after the scope is exited the two still hold each other.  The
//! collector keeps a weak handle on every environment the interpreter
//! creates and, once enough have accumulated, looks for the ones nothing
//! outside the object graph can reach.  Their bindings are cleared, which
//! breaks the cycle and lets `Rc` free them.
//!
//! Reachability is decided by trial deletion: an object whose strong count
//! exceeds the references found inside the graph is held from outside it,
//! by the interpreter's current scope, a value on the Rust stack, or an
//! embedder.  Everything reachable from such an object is live.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use log::{debug, info};

use crate::callable::{BoundMethod, Callable, Function};
use crate::class::{Instance, LoxClass};
use crate::environment::{EnvRef, Environment};
use crate::value::Value;

/// Tracked environments before the first collection.
const INITIAL_THRESHOLD: usize = 1024;

/// Reference-counted objects that can take part in a cycle.
enum Object {
    Env(EnvRef),
    Function(Rc<Function>),
    Class(Rc<LoxClass>),
    Instance(Rc<Instance>),
    Bound(Rc<BoundMethod>),
}

impl Object {
    fn address(&self) -> usize {
        match self {
            Object::Env(rc) => Rc::as_ptr(rc) as *const () as usize,
            Object::Function(rc) => Rc::as_ptr(rc) as *const () as usize,
            Object::Class(rc) => Rc::as_ptr(rc) as *const () as usize,
            Object::Instance(rc) => Rc::as_ptr(rc) as *const () as usize,
            Object::Bound(rc) => Rc::as_ptr(rc) as *const () as usize,
        }
    }

    fn strong_count(&self) -> usize {
        match self {
            Object::Env(rc) => Rc::strong_count(rc),
            Object::Function(rc) => Rc::strong_count(rc),
            Object::Class(rc) => Rc::strong_count(rc),
            Object::Instance(rc) => Rc::strong_count(rc),
            Object::Bound(rc) => Rc::strong_count(rc),
        }
    }

    /// Every reference this object holds to another object, one entry per
    /// `Rc` it owns.  `None` when the object is mid-mutation and cannot be
    /// inspected.
    fn children(&self) -> Option<Vec<Object>> {
        let mut children = Vec::new();

        match self {
            Object::Env(env) => {
                let env = env.try_borrow().ok()?;
                if let Some(parent) = env.enclosing() {
                    children.push(Object::Env(Rc::clone(parent)));
                }
                children.extend(env.values().filter_map(value_object));
            }
            Object::Function(function) => {
                children.push(Object::Env(Rc::clone(&function.closure)));
            }
            Object::Class(class) => {
                if let Some(superclass) = &class.superclass {
                    children.push(Object::Class(Rc::clone(superclass)));
                }
                children.extend(class.methods().map(|m| Object::Function(Rc::clone(m))));
            }
            Object::Instance(instance) => {
                children.push(Object::Class(Rc::clone(&instance.class)));
                children.extend(instance.field_values()?.iter().filter_map(value_object));
            }
            Object::Bound(bound) => {
                children.push(Object::Function(Rc::clone(&bound.method)));
                children.push(Object::Instance(Rc::clone(&bound.receiver)));
            }
        }

        Some(children)
    }

    /// Drops the references that can close a cycle.
    fn clear(&self) {
        match self {
            Object::Env(env) => {
                if let Ok(mut env) = env.try_borrow_mut() {
                    env.clear();
                }
            }
            Object::Instance(instance) => instance.clear_fields(),
            Object::Function(_) | Object::Class(_) | Object::Bound(_) => {}
        }
    }
}

fn value_object(value: &Value) -> Option<Object> {
    match value {
        Value::Callable(Callable::Function(function)) => {
            Some(Object::Function(Rc::clone(function)))
        }
        Value::Callable(Callable::BoundMethod(bound)) => Some(Object::Bound(Rc::clone(bound))),
        Value::Class(class) => Some(Object::Class(Rc::clone(class))),
        Value::Instance(instance) => Some(Object::Instance(Rc::clone(instance))),
        _ => None,
    }
}

struct Node {
    object: Object,
    edges: Vec<usize>,
    incoming: usize,
    /// Contents could not be read; treated as held from outside.
    opaque: bool,
}

/// Counters reported after each collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    pub collections: usize,
    pub reclaimed: usize,
}

#[derive(Debug)]
pub struct Collector {
    environments: Vec<Weak<RefCell<Environment>>>,
    instances: Vec<Weak<Instance>>,
    next_collection: usize,
    stats: CollectorStats,
}

impl Default for Collector {
    fn default() -> Self {
        Collector {
            environments: Vec::new(),
            instances: Vec::new(),
            next_collection: INITIAL_THRESHOLD,
            stats: CollectorStats::default(),
        }
    }
}

impl Collector {
    pub fn new() -> Self {
        Collector::default()
    }

    pub fn track(&mut self, env: &EnvRef) {
        self.environments.push(Rc::downgrade(env));
    }

    pub fn track_instance(&mut self, instance: &Rc<Instance>) {
        self.instances.push(Rc::downgrade(instance));
    }

    pub fn should_collect(&self) -> bool {
        self.environments.len() + self.instances.len() >= self.next_collection
    }

    /// Tracked environments that are still allocated.
    pub fn live_environments(&self) -> usize {
        self.environments
            .iter()
            .filter(|env| env.strong_count() > 0)
            .count()
    }

    fn prune(&mut self) {
        self.environments.retain(|env| env.strong_count() > 0);
        self.instances.retain(|instance| instance.strong_count() > 0);
    }

    pub fn stats(&self) -> CollectorStats {
        self.stats
    }

    /// Breaks every unreachable cycle among the tracked objects and returns
    /// how many environments were reclaimed.
    pub fn collect(&mut self) -> usize {
        self.prune();

        let mut nodes: HashMap<usize, Node> = HashMap::new();
        let mut pending: Vec<usize> = Vec::new();

        let seeds = self
            .environments
            .iter()
            .filter_map(Weak::upgrade)
            .map(Object::Env)
            .chain(
                self.instances
                    .iter()
                    .filter_map(Weak::upgrade)
                    .map(Object::Instance),
            );

        for object in seeds {
            let address = object.address();
            nodes.entry(address).or_insert_with(|| {
                pending.push(address);
                Node {
                    object,
                    edges: Vec::new(),
                    incoming: 0,
                    opaque: false,
                }
            });
        }

        while let Some(address) = pending.pop() {
            let children = nodes.get(&address).and_then(|node| node.object.children());

            let Some(children) = children else {
                if let Some(node) = nodes.get_mut(&address) {
                    node.opaque = true;
                }
                continue;
            };

            let mut edges = Vec::with_capacity(children.len());
            for child in children {
                let child_address = child.address();
                match nodes.get_mut(&child_address) {
                    Some(node) => node.incoming += 1,
                    None => {
                        nodes.insert(
                            child_address,
                            Node {
                                object: child,
                                edges: Vec::new(),
                                incoming: 1,
                                opaque: false,
                            },
                        );
                        pending.push(child_address);
                    }
                }
                edges.push(child_address);
            }

            if let Some(node) = nodes.get_mut(&address) {
                node.edges = edges;
            }
        }

        // Each node owns one clone of its object; anything beyond that and
        // the references found in the graph comes from outside.
        let mut live: Vec<usize> = nodes
            .iter()
            .filter(|(_, node)| node.opaque || node.object.strong_count() > node.incoming + 1)
            .map(|(&address, _)| address)
            .collect();

        let mut reachable = HashSet::with_capacity(nodes.len());
        while let Some(address) = live.pop() {
            if !reachable.insert(address) {
                continue;
            }
            if let Some(node) = nodes.get(&address) {
                live.extend(node.edges.iter().copied());
            }
        }

        let mut reclaimed = 0;
        for (address, node) in &nodes {
            if reachable.contains(address) {
                continue;
            }
            if matches!(node.object, Object::Env(_)) {
                reclaimed += 1;
            }
            node.object.clear();
        }

        drop(nodes);
        self.prune();
        self.next_collection =
            INITIAL_THRESHOLD.max((self.environments.len() + self.instances.len()) * 2);

        self.stats.collections += 1;
        self.stats.reclaimed += reclaimed;

        debug!(
            "Collection #{}: reclaimed {} environment(s), {} still live",
            self.stats.collections,
            reclaimed,
            self.environments.len()
        );
        if reclaimed > 0 {
            info!("Reclaimed {} unreachable environment(s)", reclaimed);
        }

        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ast::{FunctionDecl, Stmt};

    fn declaration(source: &str) -> Rc<FunctionDecl> {
        match crate::parse(source).ok().and_then(|mut program| program.pop()) {
            Some(Stmt::Function(decl)) => decl,
            other => panic!("expected a function declaration, got {:?}", other),
        }
    }

    fn scopes(collector: &mut Collector) -> (EnvRef, EnvRef) {
        let globals = Rc::new(RefCell::new(Environment::new()));
        let frame = Environment::child(&globals);
        collector.track(&globals);
        collector.track(&frame);
        (globals, frame)
    }

    /// Stores a function in the scope it closes over.
    fn declare_in(frame: &EnvRef, source: &str) -> Rc<Function> {
        let decl = declaration(source);
        let name = decl.name.name.clone();
        let function = Rc::new(Function::new(decl, Rc::clone(frame), false));
        frame
            .borrow_mut()
            .define(&name, Value::Callable(Callable::Function(Rc::clone(&function))));
        function
    }

    #[test]
    fn exited_frame_with_local_function_is_freed() {
        let mut collector = Collector::new();
        let (_globals, frame) = scopes(&mut collector);
        drop(declare_in(&frame, "fun inner() { return 1; }"));

        let weak = Rc::downgrade(&frame);
        drop(frame);
        assert!(weak.upgrade().is_some());

        assert_eq!(collector.collect(), 1);
        assert!(weak.upgrade().is_none());
        assert_eq!(collector.live_environments(), 1);
    }

    #[test]
    fn frame_held_by_escaped_closure_survives() {
        let mut collector = Collector::new();
        let (_globals, frame) = scopes(&mut collector);
        frame.borrow_mut().define("n", Value::Number(3.0));
        let escaped = declare_in(&frame, "fun count() { return n; }");

        let weak = Rc::downgrade(&frame);
        drop(frame);

        assert_eq!(collector.collect(), 0);
        let survivor = match weak.upgrade() {
            Some(frame) => frame,
            None => panic!("frame freed while a closure still held it"),
        };
        assert_eq!(survivor.borrow().get("n"), Some(Value::Number(3.0)));
        drop(survivor);

        drop(escaped);
        assert_eq!(collector.collect(), 1);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn frame_reachable_from_globals_survives() {
        let mut collector = Collector::new();
        let (globals, frame) = scopes(&mut collector);
        let function = declare_in(&frame, "fun inner() {}");
        globals
            .borrow_mut()
            .define("kept", Value::Callable(Callable::Function(function)));

        let weak = Rc::downgrade(&frame);
        drop(frame);

        assert_eq!(collector.collect(), 0);
        assert!(weak.upgrade().is_some());
        assert_eq!(collector.stats().collections, 1);
    }

    #[test]
    fn instance_cycle_through_fields_is_broken() {
        let mut collector = Collector::new();

        let class = Rc::new(LoxClass::new("Node", None, HashMap::new()));
        let instance = Rc::new(Instance::new(class));
        collector.track_instance(&instance);
        instance.set("me", Value::Instance(Rc::clone(&instance)));

        let weak = Rc::downgrade(&instance);
        drop(instance);
        assert!(weak.upgrade().is_some());

        assert_eq!(collector.collect(), 0);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn instance_in_a_live_scope_keeps_its_fields() {
        let mut collector = Collector::new();
        let (globals, _frame) = scopes(&mut collector);

        let class = Rc::new(LoxClass::new("Node", None, HashMap::new()));
        let instance = Rc::new(Instance::new(class));
        collector.track_instance(&instance);
        instance.set("me", Value::Instance(Rc::clone(&instance)));
        globals
            .borrow_mut()
            .define("node", Value::Instance(Rc::clone(&instance)));

        collector.collect();
        assert_eq!(instance.field_values().map(|fields| fields.len()), Some(1));
    }

    #[test]
    fn threshold_grows_with_live_environments() {
        let mut collector = Collector::new();
        let globals = Rc::new(RefCell::new(Environment::new()));

        let held: Vec<EnvRef> = (0..INITIAL_THRESHOLD)
            .map(|_| {
                let scope = Environment::child(&globals);
                collector.track(&scope);
                scope
            })
            .collect();

        assert!(collector.should_collect());
        assert_eq!(collector.collect(), 0);
        assert!(!collector.should_collect());
        assert_eq!(collector.live_environments(), held.len());
    }
}
