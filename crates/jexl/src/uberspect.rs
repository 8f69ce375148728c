//! Introspection and dispatch over host objects ("uberspect").
//!
//! Rust has no runtime reflection, so hosts describe their objects with a
//! [`ClassDescriptor`]: named getters/setters, fields, methods,
//! constructors, operator overloads and equality/ordering delegates, all as
//! `Send + Sync` closures. The uberspect resolves a property or method
//! request against the registered descriptor for the receiver's class,
//! after the configured strategy has tried the duck/map/list shapes.
//!
//! Permissions and the sandbox gate every descriptor resolution before it
//! is returned; a denied member is indistinguishable from a missing one.
//! Misses are reported with the `TRY_FAILED` sentinel ([`TryResult::Failed]`)
//! so the interpreter can decide between an error and a null under the
//! `strict`/`safe` options.
//!
//! Resolutions are cached per `(class, operation, member, arity)` with a
//! generation counter; [`Uberspect::bump_generation`] invalidates the whole
//! cache when the host swaps out its registered classes.

use std::{
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use ahash::AHashMap;

use crate::{
    context::JexlContext,
    permissions::{JexlPermissions, Sandbox, SandboxAction},
    value::{MapKey, Value},
};

/// A host-provided member implementation: `(receiver, args) -> value`.
///
/// Getters receive no arguments, setters exactly one, constructors a null
/// receiver. Errors are plain strings; the interpreter attaches locations.
pub type NativeFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync>;

/// A plain function implementing a built-in pseudo-method on lists, maps,
/// sets, strings, ranges and patterns.
pub(crate) type BuiltinFn = fn(&Value, &[Value]) -> Result<Value, String>;

/// A resolvable method with its expected argument count.
#[derive(Clone)]
pub struct MethodEntry {
    pub(crate) arity: usize,
    pub(crate) varargs: bool,
    pub(crate) func: NativeFn,
}

impl MethodEntry {
    fn accepts(&self, argc: usize) -> bool {
        if self.varargs { argc >= self.arity } else { argc == self.arity }
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodEntry(arity: {}, varargs: {})", self.arity, self.varargs)
    }
}

/// Operators a host class may overload. Each has a fixed method-style name
/// used in error messages; resolution is keyed by the opcode itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "camelCase")]
pub enum JexlOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Shru,
    Negate,
    Complement,
    Not,
    Contains,
    StartsWith,
    EndsWith,
    Empty,
    Size,
}

/// An opaque host object carried by [`Value::Object`].
///
/// `class_name` ties the instance to a registered [`ClassDescriptor`] and
/// to permission/sandbox entries. The duck hooks let an object answer
/// property requests directly, ahead of descriptor resolution.
pub trait HostObject: fmt::Debug {
    /// Dotted class identity, e.g. `"host.model.Point"`.
    fn class_name(&self) -> &str;

    /// Concrete-type access for descriptor closures:
    /// `receiver.as_any().downcast_ref::<MyType>()`.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Duck-typed property read; `None` defers to the other strategies.
    fn duck_get(&self, _key: &str) -> Option<Value> {
        None
    }

    /// Duck-typed property write; `false` defers to the other strategies.
    fn duck_set(&self, _key: &str, _value: Value) -> bool {
        false
    }
}

/// Factory invoked once per evaluation to produce a namespace instance.
pub trait NamespaceFunctor: Send + Sync {
    fn create(&self, ctx: &mut dyn JexlContext) -> Value;
}

/// A callable namespace as registered on the engine or options.
#[derive(Clone)]
pub enum Namespace {
    /// Static methods: calls dispatch to the descriptor with a null receiver.
    Class(Arc<ClassDescriptor>),
    /// Per-evaluation instances: the functor runs once, the produced value
    /// receives the method calls.
    Functor(Arc<dyn NamespaceFunctor>),
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(desc) => write!(f, "Namespace::Class({})", desc.name),
            Self::Functor(_) => f.write_str("Namespace::Functor"),
        }
    }
}

/// Host description of one class: how to read, write, call and construct it.
pub struct ClassDescriptor {
    name: String,
    getters: AHashMap<String, NativeFn>,
    setters: AHashMap<String, NativeFn>,
    fields: AHashMap<String, NativeFn>,
    field_setters: AHashMap<String, NativeFn>,
    methods: AHashMap<String, Vec<MethodEntry>>,
    constructors: Vec<MethodEntry>,
    operators: AHashMap<JexlOperator, NativeFn>,
    equals: Option<NativeFn>,
    compare: Option<NativeFn>,
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassDescriptor({})", self.name)
    }
}

impl ClassDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            getters: AHashMap::new(),
            setters: AHashMap::new(),
            fields: AHashMap::new(),
            field_setters: AHashMap::new(),
            methods: AHashMap::new(),
            constructors: Vec::new(),
            operators: AHashMap::new(),
            equals: None,
            compare: None,
        }
    }

    /// The dotted class name this descriptor describes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a property getter (the `getX`/`isX` analogue).
    #[must_use]
    pub fn getter(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.getters.insert(name.into(), Arc::new(move |recv, _| f(recv)));
        self
    }

    /// Registers a property setter.
    #[must_use]
    pub fn setter(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.setters
            .insert(name.into(), Arc::new(move |recv, args| f(recv, &args[0]).map(|()| Value::Null)));
        self
    }

    /// Registers a public-field read accessor; fields resolve after getters.
    #[must_use]
    pub fn field(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.fields.insert(name.into(), Arc::new(move |recv, _| f(recv)));
        self
    }

    /// Registers a public-field write accessor.
    #[must_use]
    pub fn field_setter(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.field_setters
            .insert(name.into(), Arc::new(move |recv, args| f(recv, &args[0]).map(|()| Value::Null)));
        self
    }

    /// Registers a method with a fixed argument count. A name may carry
    /// several arities; resolution picks the matching one.
    #[must_use]
    pub fn method(
        mut self,
        name: impl Into<String>,
        arity: usize,
        f: impl Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.methods.entry(name.into()).or_default().push(MethodEntry {
            arity,
            varargs: false,
            func: Arc::new(f),
        });
        self
    }

    /// Registers a method accepting `min_arity` or more arguments.
    #[must_use]
    pub fn vararg_method(
        mut self,
        name: impl Into<String>,
        min_arity: usize,
        f: impl Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.methods.entry(name.into()).or_default().push(MethodEntry {
            arity: min_arity,
            varargs: true,
            func: Arc::new(f),
        });
        self
    }

    /// Registers a constructor; the receiver passed to `f` is null.
    #[must_use]
    pub fn constructor(
        mut self,
        arity: usize,
        f: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.constructors.push(MethodEntry {
            arity,
            varargs: false,
            func: Arc::new(move |_, args| f(args)),
        });
        self
    }

    /// Resolves a method on this descriptor by name and argument count.
    pub(crate) fn find_method(&self, name: &str, argc: usize) -> Option<MethodEntry> {
        self.methods
            .get(name)
            .and_then(|entries| entries.iter().find(|e| e.accepts(argc)))
            .cloned()
    }

    /// Registers an operator overload: `f(lhs, rhs)` (unary operators
    /// receive the operand as `lhs` and null as `rhs`).
    #[must_use]
    pub fn operator(
        mut self,
        op: JexlOperator,
        f: impl Fn(&Value, &Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        self.operators
            .insert(op, Arc::new(move |lhs, args| f(lhs, args.first().unwrap_or(&Value::Null))));
        self
    }

    /// Registers an equality delegate consulted by `==`.
    #[must_use]
    pub fn equals_with(mut self, f: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static) -> Self {
        self.equals = Some(Arc::new(move |lhs, args| {
            Ok(Value::Bool(f(lhs, args.first().unwrap_or(&Value::Null))))
        }));
        self
    }

    /// Registers an ordering delegate consulted by `<`, `<=`, `>`, `>=`.
    #[must_use]
    pub fn compare_with(
        mut self,
        f: impl Fn(&Value, &Value) -> Result<std::cmp::Ordering, String> + Send + Sync + 'static,
    ) -> Self {
        self.compare = Some(Arc::new(move |lhs, args| {
            f(lhs, args.first().unwrap_or(&Value::Null)).map(|ord| Value::Int(ord as i64))
        }));
        self
    }
}

/// The strategy orders property resolution tries for a given receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverStrategy {
    /// Duck, map, list, bean getter, field — the permissive default.
    #[default]
    Jexl,
    /// Bean getter, field, map, list; no duck typing.
    Strict,
    /// Duck, bean getter, field, map, list.
    Powerful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Duck,
    Map,
    List,
    Bean,
    Field,
}

impl ResolverStrategy {
    fn order(self) -> &'static [Step] {
        match self {
            Self::Jexl => &[Step::Duck, Step::Map, Step::List, Step::Bean, Step::Field],
            Self::Strict => &[Step::Bean, Step::Field, Step::Map, Step::List],
            Self::Powerful => &[Step::Duck, Step::Bean, Step::Field, Step::Map, Step::List],
        }
    }
}

/// Internal miss sentinel: a resolution either produced something or
/// "try failed" — the interpreter decides what a failure means.
#[derive(Debug, Clone)]
pub(crate) enum TryResult<T> {
    Ok(T),
    Failed,
}

/// Outcome of a property read/write.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    /// The access succeeded with this value (null for writes).
    Value(Value),
    /// No strategy resolved the access (or it was denied).
    Miss,
    /// A host accessor ran and failed.
    Error(String),
}

/// A resolved method, ready to invoke.
#[derive(Debug, Clone)]
pub(crate) enum MethodHandle {
    Descriptor(MethodEntry),
    Builtin(BuiltinFn),
}

impl MethodHandle {
    pub fn invoke(&self, receiver: &Value, args: &[Value]) -> Result<Value, String> {
        match self {
            Self::Descriptor(entry) => (entry.func)(receiver, args),
            Self::Builtin(f) => f(receiver, args),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum OpKind {
    Get,
    Set,
    Method,
    Constructor,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    class: String,
    kind: OpKind,
    member: String,
    arity: u8,
}

struct CacheSlot {
    generation: u64,
    entry: Option<MethodEntry>,
}

/// The dispatch engine: class registry, resolution cache and gates.
pub struct Uberspect {
    classes: RwLock<AHashMap<String, Arc<ClassDescriptor>>>,
    cache: RwLock<AHashMap<CacheKey, CacheSlot>>,
    generation: AtomicU64,
    strategy: ResolverStrategy,
    permissions: JexlPermissions,
    sandbox: Option<Sandbox>,
}

impl fmt::Debug for Uberspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Uberspect(strategy: {:?}, generation: {})",
            self.strategy,
            self.generation.load(AtomicOrdering::Relaxed)
        )
    }
}

impl Uberspect {
    #[must_use]
    pub fn new(strategy: ResolverStrategy, permissions: JexlPermissions, sandbox: Option<Sandbox>) -> Self {
        Self {
            classes: RwLock::new(AHashMap::new()),
            cache: RwLock::new(AHashMap::new()),
            generation: AtomicU64::new(0),
            strategy,
            permissions,
            sandbox,
        }
    }

    /// Registers (or replaces) a class descriptor.
    pub fn register(&self, descriptor: ClassDescriptor) {
        let mut classes = self.classes.write().expect("uberspect registry lock");
        classes.insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    /// Invalidates every cached resolution (the class-loader-change
    /// analogue). Registered descriptors stay; only cached lookups drop.
    pub fn bump_generation(&self) {
        self.generation.fetch_add(1, AtomicOrdering::SeqCst);
        self.cache.write().expect("uberspect cache lock").clear();
    }

    /// Number of live cache entries; exposed for tests.
    #[must_use]
    pub fn cached_resolutions(&self) -> usize {
        self.cache.read().expect("uberspect cache lock").len()
    }

    fn descriptor(&self, class: &str) -> Option<Arc<ClassDescriptor>> {
        self.classes.read().expect("uberspect registry lock").get(class).cloned()
    }

    /// Looks up a registered descriptor by class name.
    pub(crate) fn find_class(&self, class: &str) -> Option<Arc<ClassDescriptor>> {
        self.descriptor(class)
    }

    /// Method-call permission check for descriptors resolved outside the
    /// registry (namespace classes).
    pub(crate) fn member_permitted(&self, class: &str, member: &str) -> bool {
        self.permitted(class, member, SandboxAction::Execute)
    }

    fn permitted(&self, class: &str, member: &str, action: SandboxAction) -> bool {
        self.permissions.allows(class, member)
            && self.sandbox.as_ref().is_none_or(|sb| sb.permits(class, action, member))
    }

    fn cache_get(&self, key: &CacheKey) -> Option<Option<MethodEntry>> {
        let generation = self.generation.load(AtomicOrdering::Acquire);
        let cache = self.cache.read().expect("uberspect cache lock");
        cache
            .get(key)
            .filter(|slot| slot.generation == generation)
            .map(|slot| slot.entry.clone())
    }

    fn cache_put(&self, key: CacheKey, entry: Option<MethodEntry>) {
        let generation = self.generation.load(AtomicOrdering::Acquire);
        let mut cache = self.cache.write().expect("uberspect cache lock");
        cache.insert(key, CacheSlot { generation, entry });
    }

    /// Resolves a cached class member, consulting permissions before any
    /// positive entry is stored.
    fn resolve_member(
        &self,
        class: &str,
        kind: OpKind,
        member: &str,
        arity: usize,
        action: SandboxAction,
    ) -> Option<MethodEntry> {
        let key = CacheKey {
            class: class.to_string(),
            kind,
            member: member.to_string(),
            arity: u8::try_from(arity).unwrap_or(u8::MAX),
        };
        if let Some(cached) = self.cache_get(&key) {
            return cached;
        }
        let resolved = if self.permitted(class, member, action) {
            self.descriptor(class).and_then(|desc| match kind {
                OpKind::Get => desc
                    .getters
                    .get(member)
                    .or_else(|| desc.fields.get(member))
                    .map(|f| MethodEntry {
                        arity: 0,
                        varargs: false,
                        func: Arc::clone(f),
                    }),
                OpKind::Set => desc
                    .setters
                    .get(member)
                    .or_else(|| desc.field_setters.get(member))
                    .map(|f| MethodEntry {
                        arity: 1,
                        varargs: false,
                        func: Arc::clone(f),
                    }),
                OpKind::Method => desc
                    .methods
                    .get(member)
                    .and_then(|entries| entries.iter().find(|e| e.accepts(arity)))
                    .cloned(),
                OpKind::Constructor => desc.constructors.iter().find(|e| e.accepts(arity)).cloned(),
            })
        } else {
            None
        };
        self.cache_put(key, resolved.clone());
        resolved
    }

    /// Reads a property off any receiver, trying the strategy's steps in
    /// order.
    pub(crate) fn get_property(&self, receiver: &Value, key: &Value) -> Resolution {
        for step in self.strategy.order() {
            match step {
                Step::Duck => {
                    if let (Value::Object(obj), Value::Str(name)) = (receiver, key) {
                        if !self.permitted(obj.class_name(), name, SandboxAction::Read) {
                            return Resolution::Miss;
                        }
                        if let Some(value) = obj.duck_get(name) {
                            return Resolution::Value(value);
                        }
                    }
                }
                Step::Map => {
                    if let Value::Map(map) = receiver {
                        let Ok(map_key) = MapKey::try_new(key.clone()) else {
                            continue;
                        };
                        if let Some(value) = map.borrow().get(&map_key) {
                            return Resolution::Value(value.clone());
                        }
                    }
                }
                Step::List => match (receiver, index_of(key)) {
                    (Value::List(list), Some(index)) => {
                        let list = list.borrow();
                        match usize::try_from(index).ok().and_then(|i| list.get(i)) {
                            Some(value) => return Resolution::Value(value.clone()),
                            None => return Resolution::Miss,
                        }
                    }
                    (Value::Str(s), Some(index)) => {
                        match usize::try_from(index).ok().and_then(|i| s.chars().nth(i)) {
                            Some(ch) => return Resolution::Value(Value::string(ch.to_string())),
                            None => return Resolution::Miss,
                        }
                    }
                    _ => {}
                },
                Step::Bean | Step::Field => {
                    // getters and fields resolve together through the cache
                    if *step == Step::Field {
                        continue;
                    }
                    if let (Value::Object(obj), Value::Str(name)) = (receiver, key) {
                        if let Some(entry) = self.resolve_member(obj.class_name(), OpKind::Get, name, 0, SandboxAction::Read)
                        {
                            return match (entry.func)(receiver, &[]) {
                                Ok(value) => Resolution::Value(value),
                                Err(err) => Resolution::Error(err),
                            };
                        }
                    }
                }
            }
        }
        Resolution::Miss
    }

    /// Writes a property on any receiver.
    pub(crate) fn set_property(&self, receiver: &Value, key: &Value, value: Value) -> Resolution {
        match receiver {
            Value::Object(obj) => {
                let Value::Str(name) = key else {
                    return Resolution::Miss;
                };
                if !self.permitted(obj.class_name(), name, SandboxAction::Write) {
                    return Resolution::Miss;
                }
                if obj.duck_set(name, value.clone()) {
                    return Resolution::Value(Value::Null);
                }
                match self.resolve_member(obj.class_name(), OpKind::Set, name, 1, SandboxAction::Write) {
                    Some(entry) => match (entry.func)(receiver, std::slice::from_ref(&value)) {
                        Ok(_) => Resolution::Value(Value::Null),
                        Err(err) => Resolution::Error(err),
                    },
                    None => Resolution::Miss,
                }
            }
            Value::Map(map) => match MapKey::try_new(key.clone()) {
                Ok(map_key) => {
                    map.borrow_mut().insert(map_key, value);
                    Resolution::Value(Value::Null)
                }
                Err(type_name) => Resolution::Error(format!("{type_name} is not a valid map key")),
            },
            Value::List(list) => match index_of(key) {
                Some(index) => {
                    let mut list = list.borrow_mut();
                    match usize::try_from(index).ok().filter(|&i| i < list.len()) {
                        Some(i) => {
                            list[i] = value;
                            Resolution::Value(Value::Null)
                        }
                        None => Resolution::Miss,
                    }
                }
                None => Resolution::Miss,
            },
            _ => Resolution::Miss,
        }
    }

    /// Resolves a method by name and argument count.
    pub(crate) fn get_method(&self, receiver: &Value, name: &str, argc: usize) -> TryResult<MethodHandle> {
        if let Value::Object(obj) = receiver {
            if !self.permitted(obj.class_name(), name, SandboxAction::Execute) {
                return TryResult::Failed;
            }
            return match self.resolve_member(obj.class_name(), OpKind::Method, name, argc, SandboxAction::Execute) {
                Some(entry) => TryResult::Ok(MethodHandle::Descriptor(entry)),
                None => TryResult::Failed,
            };
        }
        match builtins::lookup(receiver, name, argc) {
            Some(f) => TryResult::Ok(MethodHandle::Builtin(f)),
            None => TryResult::Failed,
        }
    }

    /// Resolves a constructor by class name and argument count.
    pub(crate) fn get_constructor(&self, class: &str, argc: usize) -> TryResult<MethodEntry> {
        match self.resolve_member(class, OpKind::Constructor, "new", argc, SandboxAction::Execute) {
            Some(entry) => TryResult::Ok(entry),
            None => TryResult::Failed,
        }
    }

    /// Finds a user-defined operator overload on either operand's class.
    /// Unary operators pass the single operand as `lhs`.
    pub(crate) fn get_operator(&self, op: JexlOperator, lhs: &Value, rhs: Option<&Value>) -> Option<NativeFn> {
        for operand in [Some(lhs), rhs].into_iter().flatten() {
            if let Value::Object(obj) = operand {
                let class = obj.class_name();
                if !self.permitted(class, &op.to_string(), SandboxAction::Execute) {
                    continue;
                }
                if let Some(desc) = self.descriptor(class) {
                    if let Some(f) = desc.operators.get(&op) {
                        return Some(Arc::clone(f));
                    }
                }
            }
        }
        None
    }

    /// Equality delegate for host objects, if either operand declares one.
    pub(crate) fn object_equals(&self, lhs: &Value, rhs: &Value) -> Option<bool> {
        for (a, b) in [(lhs, rhs), (rhs, lhs)] {
            if let Value::Object(obj) = a {
                if let Some(desc) = self.descriptor(obj.class_name()) {
                    if let Some(eq) = &desc.equals {
                        if let Ok(Value::Bool(result)) = eq(a, std::slice::from_ref(b)) {
                            return Some(result);
                        }
                    }
                }
            }
        }
        None
    }

    /// Ordering delegate for host objects.
    pub(crate) fn object_compare(&self, lhs: &Value, rhs: &Value) -> Option<Result<std::cmp::Ordering, String>> {
        if let Value::Object(obj) = lhs {
            if let Some(desc) = self.descriptor(obj.class_name()) {
                if let Some(cmp) = &desc.compare {
                    return Some(cmp(lhs, std::slice::from_ref(rhs)).map(|v| match v {
                        Value::Int(i) => i.cmp(&0),
                        _ => std::cmp::Ordering::Equal,
                    }));
                }
            }
        }
        // reflected comparison through the right operand
        if let Value::Object(obj) = rhs {
            if let Some(desc) = self.descriptor(obj.class_name()) {
                if let Some(cmp) = &desc.compare {
                    return Some(cmp(rhs, std::slice::from_ref(lhs)).map(|v| match v {
                        Value::Int(i) => 0.cmp(&i),
                        _ => std::cmp::Ordering::Equal,
                    }));
                }
            }
        }
        None
    }
}

fn index_of(key: &Value) -> Option<i64> {
    match key {
        Value::Int(i) => Some(*i),
        Value::Str(s) => s.parse().ok(),
        _ => None,
    }
}

/// Built-in pseudo-methods on non-object values.
///
/// These stand in for the collection/string APIs reflection would surface
/// in a dynamic host; the interpreter reaches them through `get_method`
/// like any other method.
mod builtins {

    use super::BuiltinFn;
    use crate::value::{MapKey, Value, value_eq};

    pub(super) fn lookup(receiver: &Value, name: &str, argc: usize) -> Option<BuiltinFn> {
        let found: BuiltinFn = match (receiver, name, argc) {
            (_, "size", 0) => size,
            (_, "isEmpty", 0) => is_empty,
            (_, "toString", 0) => to_string,
            (Value::List(_) | Value::Set(_) | Value::Range(_) | Value::Str(_), "contains", 1) => contains,
            (Value::List(_), "add", 1) => list_add,
            (Value::List(_), "get", 1) => list_get,
            (Value::List(_) | Value::Str(_), "indexOf", 1) => index_of,
            (Value::Set(_), "add", 1) => set_add,
            (Value::Map(_), "get", 1) => map_get,
            (Value::Map(_), "put", 2) => map_put,
            (Value::Map(_), "containsKey", 1) => map_contains_key,
            (Value::Str(_), "length", 0) => size,
            (Value::Str(_), "startsWith", 1) => str_starts_with,
            (Value::Str(_), "endsWith", 1) => str_ends_with,
            (Value::Str(_), "substring", 1 | 2) => str_substring,
            (Value::Str(_), "toUpperCase", 0) => str_upper,
            (Value::Str(_), "toLowerCase", 0) => str_lower,
            (Value::Str(_), "trim", 0) => str_trim,
            (Value::Pattern(_), "matches", 1) => pattern_matches,
            _ => return None,
        };
        Some(found)
    }

    fn size(recv: &Value, _: &[Value]) -> Result<Value, String> {
        recv.length()
            .map(|n| Value::Int(n as i64))
            .ok_or_else(|| format!("size is undefined for {}", recv.type_name()))
    }

    fn is_empty(recv: &Value, _: &[Value]) -> Result<Value, String> {
        recv.length()
            .map(|n| Value::Bool(n == 0))
            .ok_or_else(|| format!("isEmpty is undefined for {}", recv.type_name()))
    }

    fn to_string(recv: &Value, _: &[Value]) -> Result<Value, String> {
        Ok(Value::string(recv.to_string()))
    }

    fn contains(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let needle = &args[0];
        let found = match recv {
            Value::List(list) => list.borrow().iter().any(|v| value_eq(v, needle)),
            Value::Set(set) => MapKey::try_new(needle.clone()).is_ok_and(|k| set.borrow().contains(&k)),
            Value::Range(range) => matches!(needle, Value::Int(i) if range.contains(*i)),
            Value::Str(s) => matches!(needle, Value::Str(sub) if s.contains(&**sub)),
            _ => false,
        };
        Ok(Value::Bool(found))
    }

    fn list_add(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let Value::List(list) = recv else { unreachable!() };
        list.borrow_mut().push(args[0].clone());
        Ok(Value::Bool(true))
    }

    fn list_get(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let Value::List(list) = recv else { unreachable!() };
        let Value::Int(i) = args[0] else {
            return Err("get expects an integer index".to_string());
        };
        let list = list.borrow();
        usize::try_from(i)
            .ok()
            .and_then(|i| list.get(i).cloned())
            .ok_or_else(|| format!("index {i} out of bounds for length {}", list.len()))
    }

    fn index_of(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let index = match (recv, &args[0]) {
            (Value::List(list), needle) => list.borrow().iter().position(|v| value_eq(v, needle)),
            (Value::Str(s), Value::Str(sub)) => s.find(&**sub).map(|byte| s[..byte].chars().count()),
            _ => None,
        };
        Ok(Value::Int(index.map_or(-1, |i| i as i64)))
    }

    fn set_add(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let Value::Set(set) = recv else { unreachable!() };
        let key = MapKey::try_new(args[0].clone()).map_err(|t| format!("{t} is not hashable"))?;
        Ok(Value::Bool(set.borrow_mut().insert(key)))
    }

    fn map_get(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let Value::Map(map) = recv else { unreachable!() };
        let Ok(key) = MapKey::try_new(args[0].clone()) else {
            return Ok(Value::Null);
        };
        Ok(map.borrow().get(&key).cloned().unwrap_or(Value::Null))
    }

    fn map_put(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let Value::Map(map) = recv else { unreachable!() };
        let key = MapKey::try_new(args[0].clone()).map_err(|t| format!("{t} is not a valid map key"))?;
        Ok(map.borrow_mut().insert(key, args[1].clone()).unwrap_or(Value::Null))
    }

    fn map_contains_key(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let Value::Map(map) = recv else { unreachable!() };
        let found = MapKey::try_new(args[0].clone()).is_ok_and(|k| map.borrow().contains_key(&k));
        Ok(Value::Bool(found))
    }

    fn str_starts_with(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let (Value::Str(s), Value::Str(prefix)) = (recv, &args[0]) else {
            return Err("startsWith expects a string argument".to_string());
        };
        Ok(Value::Bool(s.starts_with(&**prefix)))
    }

    fn str_ends_with(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let (Value::Str(s), Value::Str(suffix)) = (recv, &args[0]) else {
            return Err("endsWith expects a string argument".to_string());
        };
        Ok(Value::Bool(s.ends_with(&**suffix)))
    }

    fn str_substring(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let Value::Str(s) = recv else { unreachable!() };
        let chars: Vec<char> = s.chars().collect();
        let start = match args[0] {
            Value::Int(i) if i >= 0 => i as usize,
            _ => return Err("substring expects non-negative integer bounds".to_string()),
        };
        let end = match args.get(1) {
            None => chars.len(),
            Some(Value::Int(i)) if *i >= 0 => *i as usize,
            Some(_) => return Err("substring expects non-negative integer bounds".to_string()),
        };
        if start > end || end > chars.len() {
            return Err(format!("substring bounds {start}..{end} out of range for length {}", chars.len()));
        }
        Ok(Value::string(chars[start..end].iter().collect::<String>()))
    }

    fn str_upper(recv: &Value, _: &[Value]) -> Result<Value, String> {
        let Value::Str(s) = recv else { unreachable!() };
        Ok(Value::string(s.to_uppercase()))
    }

    fn str_lower(recv: &Value, _: &[Value]) -> Result<Value, String> {
        let Value::Str(s) = recv else { unreachable!() };
        Ok(Value::string(s.to_lowercase()))
    }

    fn str_trim(recv: &Value, _: &[Value]) -> Result<Value, String> {
        let Value::Str(s) = recv else { unreachable!() };
        Ok(Value::string(s.trim()))
    }

    fn pattern_matches(recv: &Value, args: &[Value]) -> Result<Value, String> {
        let Value::Pattern(re) = recv else { unreachable!() };
        let Value::Str(s) = &args[0] else {
            return Err("matches expects a string argument".to_string());
        };
        Ok(Value::Bool(re.is_match(s)))
    }
}
