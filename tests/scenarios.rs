//! End-to-end scenarios straight from the language's acceptance examples:
//! compile a `.ns` program to a linked bytecode image, run it, and check
//! both the final result and what it printed.

use std::fs;
use std::path::PathBuf;

use notscheme::linker::link_program;
use notscheme::value::Value;
use notscheme::vm::Vm;

struct TempDir(PathBuf);

impl TempDir {
    fn new(tag: &str) -> TempDir {
        let dir = std::env::temp_dir().join(format!("notscheme_test_{}_{}", tag, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        TempDir(dir)
    }

    fn write(&self, module: &str, source: &str) -> PathBuf {
        let path = self.0.join(format!("{}.ns", module));
        fs::write(&path, source).unwrap();
        path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        fs::remove_dir_all(&self.0).ok();
    }
}

fn run(source: &str) -> (Option<Value>, Vec<String>) {
    let dir = TempDir::new("scenario");
    let main = dir.write("main", source);
    let image = link_program(&main).expect("link should succeed");
    let mut vm = Vm::load(image).expect("load should succeed");
    let result = vm.run();
    (result, vm.prints().to_vec())
}

fn assert_int(v: Option<Value>, expected: i64) {
    match v {
        Some(Value::Int(n)) => assert_eq!(n, expected),
        other => panic!("expected Int({}), got {:?}", expected, other),
    }
}

#[test]
fn scenario_1_static_bindings() {
    let (result, _) = run("(static a 10)(static b (+ a 5)) b");
    assert_int(result, 15);
}

#[test]
fn scenario_2_function_call() {
    let (result, _) = run("(fn add (x y) (+ x y))(static r (add 10 20)) r");
    assert_int(result, 30);
}

#[test]
fn scenario_3_print_variety_and_arithmetic_result() {
    let (result, prints) = run(r#"(print "Hello")(print 123)(print true)(print nil)(+ 1 1)"#);
    assert_int(result, 2);
    assert_eq!(prints, vec!["Hello", "123", "true", "nil"]);
}

#[test]
fn scenario_4_lists_and_mutation_free_list_ops() {
    let source = r#"
        (static L (list 1 (+ 1 1) "three"))
        (print (first L))
        (print (rest L))
        (static L2 (cons 0 L))
        (print L2)
        (print (is_nil nil))
        (print (is_nil L2))
        (first (list "final"))
    "#;
    let (result, prints) = run(source);
    match result {
        Some(Value::Str(s)) => assert_eq!(*s, "final"),
        other => panic!("expected Str(\"final\"), got {:?}", other),
    }
    assert_eq!(
        prints,
        vec!["1", "[2, \"three\"]", "[0, 1, 2, \"three\"]", "true", "false"]
    );
}

#[test]
fn scenario_5_quoted_symbol_distinct_from_string() {
    let (result, prints) = run("(print 'my_symbol)");
    assert!(matches!(result, Some(Value::Nil)));
    assert_eq!(prints, vec!["my_symbol"]);
}

#[test]
fn scenario_6_mutually_dependent_modules_no_infinite_loop() {
    let dir = TempDir::new("mutual");
    dir.write(
        "module_a",
        "(use module_b *)\n(static a_val 10)\n(fn a_uses_b () (+ a_val (b_val)))",
    );
    dir.write(
        "module_b",
        "(use module_a *)\n(static b_base 20)\n(fn b_val () b_base)",
    );
    let main = dir.write(
        "main",
        "(use module_a *)\n(use module_b *)\n(a_uses_b)",
    );
    let image = link_program(&main).expect("circular use must still link");
    let mut vm = Vm::load(image).unwrap();
    let result = vm.run();
    assert_int(result, 30);
}

#[test]
fn scenario_7_recursive_fibonacci() {
    let source = "(fn fib (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))) (fib 10)";
    let (result, _) = run(source);
    assert_int(result, 55);
}

#[test]
fn closure_captures_let_bindings_after_let_ends() {
    let source = r#"
        (fn make_adder (n) (let ((captured n)) (lambda (x) (+ x captured))))
        (static add5 (make_adder 5))
        (add5 10)
    "#;
    let (result, _) = run(source);
    assert_int(result, 15);
}

#[test]
fn struct_mutation_is_visible_through_aliased_binding() {
    let source = r#"
        (struct Point (x y))
        (static p1 (Point 1 2))
        (static p2 p1)
        (set p2 x 99)
        (get p1 x)
    "#;
    let (result, _) = run(source);
    assert_int(result, 99);
}

#[test]
fn while_loop_accumulates_via_struct_field() {
    let source = r#"
        (struct Counter (n))
        (static c (Counter 0))
        (while (< (get c n) 3) (set c n (+ (get c n) 1)))
        (get c n)
    "#;
    let (result, _) = run(source);
    assert_int(result, 3);
}

#[test]
fn runtime_division_by_zero_halts_without_panicking() {
    let (result, _) = run("(/ 1 0)");
    assert!(result.is_none());
}

#[test]
fn file_extension_and_existence_are_validated_by_the_cli() {
    // Exercised at the CLI boundary in main.rs; covered here at the library
    // boundary by confirming a missing file surfaces as a module error
    // rather than panicking.
    let missing = PathBuf::from("/nonexistent/path/to/program.ns");
    assert!(link_program(&missing).is_err());
}
