use glint_core::{
    Error,
    expr::{self, Compiled, ast::Expr, ast::MemberKey},
    service::{DefaultTypeResolver, Services, TypeResolver},
    types::{Constructor, Method, Property, Type, builtins},
    value::{Object, Value, Variables},
};
use pretty_assertions::assert_eq;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tracing_test::traced_test;

fn run(src: &str) -> Value {
    expr::eval(src, Value::Null, &Variables::new()).unwrap()
}

fn run_on(src: &str, root: Value) -> Value {
    expr::eval(src, root, &Variables::new()).unwrap()
}

fn ints(values: &[i64]) -> Value {
    Value::list(values.iter().copied().map(Value::Int))
}

#[test]
fn literals_round_trip() {
    for src in [
        "'single'",
        "\"dou\\\"ble\\n\"",
        "42",
        "0x1F",
        "1.5e3",
        "2.5E-2",
        "1e999",
        "-1e999",
        "true",
        "false",
        "null",
        "[1, 'a', [2.0]]",
        "{a: 1, 'b': [true]}",
    ] {
        let compiled = expr::parse_expression(src).unwrap();
        let printed = compiled.root().to_string();
        let reparsed = expr::parse_expression(printed.as_str()).unwrap();

        let expected = compiled.execute(Value::Null, &Variables::new()).unwrap();
        let actual = reparsed.execute(Value::Null, &Variables::new()).unwrap();
        assert_eq!(actual, expected, "{src} printed as {printed}");
    }
}

#[test]
fn precedence() {
    assert_eq!(run("1 + 2 * 3"), Value::Int(7));
    assert_eq!(run("(1 + 2) * 3"), Value::Int(9));
    assert_eq!(run("2 - 3 - 4"), Value::Int(-5));
    assert_eq!(run("16 / 4 / 2"), Value::Int(2));
    assert_eq!(run("1 + 1 == 2 && 3 > 2"), Value::Bool(true));
    assert_eq!(run("1 | 2 ^ 3 & 4"), Value::Int(3));
}

#[test]
fn logical_operators_short_circuit() {
    let reads = Arc::new(AtomicUsize::new(0));
    let counter = reads.clone();
    let probe = Type::builder("test.Probe")
        .computed("b", &builtins().boolean, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Bool(true))
        })
        .build();
    let root = Value::Object(Object::new(probe));
    let compiled = expr::parse_expression("$a || b").unwrap();

    let mut variables = Variables::new();
    variables.insert("a".to_string(), Value::Bool(true));
    let value = compiled.execute(root.clone(), &variables).unwrap();
    assert_eq!(value, Value::Bool(true));
    assert_eq!(reads.load(Ordering::SeqCst), 0);

    variables.insert("a".to_string(), Value::Bool(false));
    let value = compiled.execute(root.clone(), &variables).unwrap();
    assert_eq!(value, Value::Bool(true));
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    let value = run_on("false && b", root);
    assert_eq!(value, Value::Bool(false));
    assert_eq!(reads.load(Ordering::SeqCst), 1);
}

#[test]
fn numeric_equality_tolerance() {
    assert_eq!(run("1.0000001 == 1.0000002"), Value::Bool(true));
    assert_eq!(run("1.0 == 2.0"), Value::Bool(false));
    assert_eq!(run("1 == 1.0000001"), Value::Bool(true));
    assert_eq!(run("9007199254740993 == 9007199254740992"), Value::Bool(false));
}

#[test]
fn null_safe_chaining() {
    assert_eq!(run_on("?.length", Value::Null), Value::Null);
    assert_eq!(run_on("?.length", Value::string("abc")), Value::Int(3));
    assert_eq!(run("$missing?.a?.b"), Value::Null);

    let err = expr::eval(".length", Value::Null, &Variables::new()).unwrap_err();
    assert!(matches!(err, Error::NullReceiver { .. }));
}

#[test]
fn loop_control_flow() {
    let value = run(
        "$n = 0; $sum = 0;
        for($x : [1, 2, 3, 4]) {
            if ($x == 3) { break }
            $n = $n + 1;
            $sum = $sum + $x
        }
        [$n, $sum]",
    );
    assert_eq!(value, ints(&[2, 3]));

    let value = run("$odd = []; for($x : [1, 2, 3, 4, 5]) { if ($x % 2 == 0) { continue } $odd.add($x) }; $odd");
    assert_eq!(value, ints(&[1, 3, 5]));

    assert_eq!(run("return 1; 2"), Value::Int(1));
}

#[test]
fn selection_and_projection() {
    let list = ints(&[1, 2, 3, 4]);
    assert_eq!(run_on("~[$self > 2]", list.clone()), ints(&[3, 4]));
    assert_eq!(run_on("^[$self > 2]", list.clone()), Value::Int(3));
    assert_eq!(run_on("&[$self < 3]", list.clone()), Value::Int(2));
    assert_eq!(run_on("![$self * 2]", list.clone()), ints(&[2, 4, 6, 8]));
    assert_eq!(run_on("^[$self > 9]", list), Value::Null);

    assert_eq!(run_on("~[true]", Value::Null), Value::list([]));
    assert_eq!(run_on("^[true]", Value::Null), Value::Null);
    assert_eq!(run("[1, 2, 3, 4]~[$self % 2 == 0]![$self * 10]"), ints(&[20, 40]));
}

#[test]
fn templates() {
    assert_eq!(run("`a<%1+1%>b`"), Value::string("a2b"));

    let compiled = expr::parse_template("<%# for ($i : $items) { %>[<% $i %>]<%# } %>").unwrap();
    let mut variables = Variables::new();
    variables.insert("items".to_string(), ints(&[1, 2]));
    let value = compiled.execute(Value::Null, &variables).unwrap();
    assert_eq!(value, Value::string("[1][2]"));
}

/// Delegates to the default resolver, counting method lookups.
#[derive(Default)]
struct CountingResolver {
    inner: DefaultTypeResolver,
    methods: AtomicUsize,
}

impl TypeResolver for CountingResolver {
    fn resolve(&self, name: &str) -> Result<Arc<Type>, Error> {
        self.inner.resolve(name)
    }

    fn find_getter(&self, ty: &Arc<Type>, name: &str) -> Option<Property> {
        self.inner.find_getter(ty, name)
    }

    fn find_method(&self, ty: &Arc<Type>, name: &str, arity: usize) -> Option<Arc<Method>> {
        self.methods.fetch_add(1, Ordering::SeqCst);
        self.inner.find_method(ty, name, arity)
    }

    fn find_constructor(&self, ty: &Arc<Type>, arity: usize) -> Option<Arc<Constructor>> {
        self.inner.find_constructor(ty, arity)
    }
}

#[test]
#[traced_test]
fn member_resolution_is_cached() {
    let resolver = Arc::new(CountingResolver::default());
    let services = Services::default().with_types(resolver.clone());
    let compiled = Arc::new(expr::parse_expression("substring(1, 2)").unwrap());

    let root = Value::string("abc");
    for _ in 0..2 {
        let value = compiled
            .execute_with(root.clone(), &Variables::new(), &services)
            .unwrap();
        assert_eq!(value, Value::string("b"));
    }

    let handles = (0..4)
        .map(|_| {
            let compiled = compiled.clone();
            let services = services.clone();
            std::thread::spawn(move || {
                compiled
                    .execute_with(Value::string("xyz"), &Variables::new(), &services)
                    .unwrap()
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Value::string("y"));
    }
    assert_eq!(resolver.methods.load(Ordering::SeqCst), 1);

    let Expr::Method(method) = compiled.root() else {
        panic!("expected a method call");
    };
    let string = &builtins().string;
    let cached = method.cache.get(&MemberKey::new(string, "substring", 2)).unwrap();
    let declared = string.method("substring", 2).unwrap();
    assert!(Arc::ptr_eq(&cached, declared));
    assert_eq!(method.cache.len(), 1);
}

#[test]
fn concurrent_evaluations_are_isolated() {
    let compiled: Arc<Compiled> =
        Arc::new(expr::parse_expression("$total = $x * 2; $total + $y").unwrap());

    let handles = (0..8_i64)
        .map(|idx| {
            let compiled = compiled.clone();
            std::thread::spawn(move || {
                let mut variables = Variables::new();
                variables.insert("x".to_string(), Value::Int(idx));
                variables.insert("y".to_string(), Value::Int(idx * 100));
                for _ in 0..200 {
                    let value = compiled.execute(Value::Null, &variables).unwrap();
                    assert_eq!(value, Value::Int(idx * 2 + idx * 100));
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }
}
