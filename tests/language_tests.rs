// Integration tests for the Dictu interpreter.
//
// These run complete programs through the scanner, compiler and VM and use
// the language's own assert() as the oracle: a program that reaches the end
// without a runtime error interprets to Ok. Coverage:
// - Closures, upvalue capture and closing
// - Classes, traits, inheritance and super
// - Control flow, break/continue, loops
// - Dict literals vs blocks, subscripts, slices
// - Optional parameters and compound assignment
// - String interning and escapes
// - GC stress equivalence
// - Imports (file modules and built-in modules)
// - with-statement file cleanup

use dictu::errors::InterpretResult;
use dictu::vm::Vm;

fn run(source: &str) -> InterpretResult {
    let mut vm = Vm::new(false);
    vm.interpret(source)
}

fn assert_ok(source: &str) {
    assert_eq!(run(source), InterpretResult::Ok, "program failed:\n{}", source);
}

fn assert_runtime_error(source: &str) {
    assert_eq!(run(source), InterpretResult::RuntimeError, "expected runtime error:\n{}", source);
}

fn assert_compile_error(source: &str) {
    assert_eq!(run(source), InterpretResult::CompileError, "expected compile error:\n{}", source);
}

// ---------------------------------------------------------------------
// Core language scenarios
// ---------------------------------------------------------------------

#[test]
fn closures_capture_by_variable() {
    assert_ok(
        r#"
        def make(x) { def g() { return x; } return g; }
        var a = make(1); var b = make(2);
        assert(a() == 1); assert(b() == 2);
        "#,
    );
}

#[test]
fn counter_closure_mutates_captured_variable() {
    assert_ok(
        r#"
        def makeCounter() {
            var count = 0;
            def increment() { count = count + 1; return count; }
            return increment;
        }
        var counter = makeCounter();
        counter(); counter();
        assert(counter() == 3);
        var other = makeCounter();
        assert(other() == 1);
        "#,
    );
}

#[test]
fn upvalues_close_per_scope() {
    assert_ok(
        r#"
        var fs = [];
        for (var i = 0; i < 3; i = i + 1) {
            var j = i;
            def g() { return j; }
            fs.push(g);
        }
        assert(fs[0]() == 0);
        assert(fs[1]() == 1);
        assert(fs[2]() == 2);
        "#,
    );
}

#[test]
fn flattened_capture_through_intermediate_function() {
    assert_ok(
        r#"
        def outer() {
            var x = "captured";
            def middle() {
                def inner() { return x; }
                return inner;
            }
            return middle();
        }
        assert(outer()() == "captured");
        "#,
    );
}

#[test]
fn trait_composition() {
    assert_ok(
        r#"
        trait T { def greet() { return "hi"; } }
        class C { use T; }
        assert(C().greet() == "hi");
        "#,
    );
}

#[test]
fn class_method_overrides_trait_method() {
    assert_ok(
        r#"
        trait T { def f() { return 1; } def g() { return 10; } }
        class C {
            use T;
            def f() { return 2; }
        }
        assert(C().f() == 2);
        assert(C().g() == 10);
        "#,
    );
}

#[test]
fn trait_methods_bind_this_in_adopting_class() {
    assert_ok(
        r#"
        trait Named { def describe() { return this.name; } }
        class Person {
            use Named;
            def init(name) { this.name = name; }
        }
        assert(Person("ada").describe() == "ada");
        "#,
    );
}

#[test]
fn multiple_traits_in_one_use() {
    assert_ok(
        r#"
        trait A { def a() { return 1; } }
        trait B { def b() { return 2; } }
        class C { use A, B; }
        var c = C();
        assert(c.a() + c.b() == 3);
        "#,
    );
}

#[test]
fn inheritance_override_with_super() {
    assert_ok(
        r#"
        class A { def f() { return 1; } }
        class B < A { def f() { return super.f() + 1; } }
        assert(B().f() == 2);
        "#,
    );
}

#[test]
fn method_resolution_walks_the_copied_tables() {
    assert_ok(
        r#"
        class A { def f() { return "a"; } def g() { return "ga"; } }
        class B < A { def f() { return "b"; } }
        class C < B { def h() { return "c"; } }
        var c = C();
        assert(c.f() == "b");
        assert(c.g() == "ga");
        assert(c.h() == "c");
        "#,
    );
}

#[test]
fn instance_field_shadows_class_method() {
    assert_ok(
        r#"
        class C { def f() { return 1; } }
        def g() { return 2; }
        var c = C();
        assert(c.f() == 1);
        c.f = g;
        assert(c.f() == 2);
        "#,
    );
}

#[test]
fn initializers_and_fields() {
    assert_ok(
        r#"
        class Point {
            def init(x, y) { this.x = x; this.y = y; }
            def sum() { return this.x + this.y; }
        }
        var p = Point(3, 4);
        assert(p.x == 3);
        assert(p.sum() == 7);
        p.x = 10;
        assert(p.sum() == 14);
        "#,
    );
}

#[test]
fn static_methods_are_called_on_the_class() {
    assert_ok(
        r#"
        class Factory {
            static def make() { return 42; }
        }
        assert(Factory.make() == 42);
        "#,
    );
}

#[test]
fn bound_methods_remember_their_receiver() {
    assert_ok(
        r#"
        class C {
            def init(v) { this.v = v; }
            def get() { return this.v; }
        }
        var m = C(9).get;
        assert(m() == 9);
        "#,
    );
}

// ---------------------------------------------------------------------
// Control flow
// ---------------------------------------------------------------------

#[test]
fn break_stops_loop() {
    assert_ok(
        r#"
        var s = 0;
        for (var i = 0; i < 10; i = i + 1) { if (i == 5) break; s = s + i; }
        assert(s == 10);
        "#,
    );
}

#[test]
fn continue_skips_iteration() {
    assert_ok(
        r#"
        var s = 0;
        for (var i = 0; i < 10; i = i + 1) {
            if (i % 2 == 1) continue;
            s = s + i;
        }
        assert(s == 20);
        "#,
    );
}

#[test]
fn while_loop_with_break_and_continue() {
    assert_ok(
        r#"
        var n = 0;
        var seen = 0;
        while (true) {
            n = n + 1;
            if (n > 100) break;
            if (n % 10 != 0) continue;
            seen = seen + 1;
        }
        assert(seen == 10);
        "#,
    );
}

#[test]
fn nested_loop_break_only_exits_inner() {
    assert_ok(
        r#"
        var total = 0;
        for (var i = 0; i < 3; i = i + 1) {
            for (var j = 0; j < 10; j = j + 1) {
                if (j == 2) break;
                total = total + 1;
            }
        }
        assert(total == 6);
        "#,
    );
}

#[test]
fn if_else_and_logic_operators() {
    assert_ok(
        r#"
        var x = 5;
        var result = "";
        if (x > 3 and x < 10) { result = "mid"; } else { result = "out"; }
        assert(result == "mid");
        assert(false or "fallback" == "fallback");
        assert((nil or 2) == 2);
        assert((false and 2) == false);
        "#,
    );
}

// ---------------------------------------------------------------------
// Dicts, lists, subscripts and slices
// ---------------------------------------------------------------------

#[test]
fn dict_literals_vs_blocks() {
    assert_ok(
        r#"
        { }
        { var x = 1; }
        { };
        assert({"a": 1}["a"] == 1);
        "#,
    );
}

#[test]
fn dict_statement_with_key_is_an_expression() {
    assert_ok(
        r#"
        { "k": 1 };
        var d = {1: "one", true: "yes", nil: "none"};
        assert(d[1] == "one");
        assert(d[true] == "yes");
        assert(d[nil] == "none");
        "#,
    );
}

#[test]
fn dict_methods_agree_with_subscript() {
    assert_ok(
        r#"
        var d = {"a": 1, "b": 2};
        assert(d.exists("a"));
        assert(!d.exists("z"));
        assert(d.get("a") == 1);
        assert(d.get("z") == nil);
        assert(d.get("z", 9) == 9);
        assert(d.len() == 2);
        d["c"] = 3;
        assert(d.exists("c"));
        assert(d.len() == 3);
        d.remove("a");
        assert(!d.exists("a"));
        assert(d.len() == 2);
        assert(d.keys().len() == 2);
        "#,
    );
}

#[test]
fn missing_dict_key_is_a_runtime_error() {
    assert_runtime_error(r#"var d = {"a": 1}; d["missing"];"#);
}

#[test]
fn list_operations() {
    assert_ok(
        r#"
        var l = [1, 2, 3];
        assert(l.len() == 3);
        l.push(4);
        assert(l.len() == 4);
        assert(l[3] == 4);
        assert(l.pop() == 4);
        assert(l.contains(2));
        assert(!l.contains(9));
        l.insert(0, 0);
        assert(l[0] == 0);
        l.remove(0);
        assert(l[0] == 1);
        var cat = [1] + [2];
        assert(cat.len() == 2);
        assert(cat[1] == 2);
        var joined = ["a", "b"].join("-");
        assert(joined == "a-b");
        "#,
    );
}

#[test]
fn list_identity_equality() {
    assert_ok(
        r#"
        var a = [1, 2];
        var b = a;
        assert(a == b);
        assert(!(a == [1, 2]));
        "#,
    );
}

#[test]
fn negative_indices_count_from_the_end() {
    assert_ok(
        r#"
        var l = [10, 20, 30];
        assert(l[-1] == 30);
        assert(l[-3] == 10);
        assert("abc"[-1] == "c");
        l[-1] = 99;
        assert(l[2] == 99);
        "#,
    );
}

#[test]
fn slices_with_elided_bounds() {
    assert_ok(
        r#"
        var l = [0, 1, 2, 3, 4];
        assert(l[1:3].len() == 2);
        assert(l[1:3][0] == 1);
        assert(l[:2].len() == 2);
        assert(l[3:].len() == 2);
        assert(l[:].len() == 5);
        assert(l[-2:].len() == 2);
        assert(l[4:2].len() == 0);
        assert("hello"[1:4] == "ell");
        assert("hello"[:2] == "he");
        assert("hello"[3:] == "lo");
        "#,
    );
}

#[test]
fn out_of_bounds_indexing_errors() {
    assert_runtime_error("var l = [1]; l[5];");
    assert_runtime_error("var l = [1]; l[-2];");
    assert_runtime_error(r#""ab"[7];"#);
}

#[test]
fn strings_cannot_be_assigned_through_subscript() {
    assert_runtime_error(r#"var s = "abc"; s[0] = "z";"#);
}

// ---------------------------------------------------------------------
// Functions, optional parameters, compound assignment
// ---------------------------------------------------------------------

#[test]
fn optional_parameters_use_defaults_for_the_missing_tail() {
    assert_ok(
        r#"
        def f(a, b = 2, c = 3) { return a * 100 + b * 10 + c; }
        assert(f(1) == 123);
        assert(f(1, 9) == 193);
        assert(f(1, 9, 8) == 198);
        "#,
    );
}

#[test]
fn optional_parameter_defaults_can_reference_earlier_parameters() {
    assert_ok(
        r#"
        def f(a, b = a) { return a + b; }
        assert(f(3) == 6);
        assert(f(3, 4) == 7);
        "#,
    );
}

#[test]
fn arity_errors_mention_the_expected_range() {
    assert_runtime_error("def f(a, b = 1) { return a; } f();");
    assert_runtime_error("def f(a, b = 1) { return a; } f(1, 2, 3);");
    assert_runtime_error("def f(a) { return a; } f(1, 2);");
}

#[test]
fn non_optional_after_optional_is_a_compile_error() {
    assert_compile_error("def f(a = 1, b) { return b; }");
}

#[test]
fn compound_assignment_on_every_target_kind() {
    assert_ok(
        r#"
        var g = 10;
        g += 5; assert(g == 15);
        g -= 3; assert(g == 12);
        g *= 2; assert(g == 24);
        g /= 4; assert(g == 6);
        g &= 3; assert(g == 2);
        g |= 5; assert(g == 7);
        g ^= 1; assert(g == 6);

        def local() {
            var x = 1;
            x += 4; assert(x == 5);
            x *= 3; assert(x == 15);
            return x;
        }
        assert(local() == 15);

        def upvalue() {
            var captured = 2;
            def bump() { captured += 8; }
            bump();
            return captured;
        }
        assert(upvalue() == 10);

        class Box { def init() { this.v = 1; } }
        var box = Box();
        box.v += 9; assert(box.v == 10);
        box.v -= 4; assert(box.v == 6);

        var list = [1, 2];
        list[0] += 10; assert(list[0] == 11);
        list[1] *= 5; assert(list[1] == 10);

        var dict = {"n": 3};
        dict["n"] += 4; assert(dict["n"] == 7);
        "#,
    );
}

#[test]
fn prefix_increment_and_decrement() {
    assert_ok(
        r#"
        var a = 1;
        ++a;
        assert(a == 2);
        --a; --a;
        assert(a == 0);

        class C { def init() { this.n = 5; } }
        var c = C();
        ++c.n;
        assert(c.n == 6);
        --c.n;
        assert(c.n == 5);
        "#,
    );
}

#[test]
fn prefix_increment_rejects_subscript_targets() {
    assert_runtime_error("var a = [1]; ++a[0];");
}

#[test]
fn exponent_is_right_associative() {
    assert_ok(
        r#"
        assert(2 ** 3 == 8);
        assert(2 ** 3 ** 2 == 512);
        assert(1 | 2 ^ 3 & 2 == 1);
        assert((5 & 3) == 1);
        assert((5 | 2) == 7);
        assert((5 ^ 1) == 4);
        assert(7 % 3 == 1);
        "#,
    );
}

#[test]
fn returning_from_an_initializer_value_is_a_compile_error() {
    assert_compile_error("class C { def init() { return 1; } }");
}

#[test]
fn top_level_return_is_a_compile_error() {
    assert_compile_error("return 1;");
}

#[test]
fn break_outside_loop_is_a_compile_error() {
    assert_compile_error("break;");
}

#[test]
fn this_outside_a_class_is_a_compile_error() {
    assert_compile_error("this;");
    assert_compile_error("class C { static def f() { return this; } }");
}

#[test]
fn super_without_superclass_is_a_compile_error() {
    assert_compile_error("class C { def f() { return super.f(); } }");
}

#[test]
fn reading_local_in_its_own_initializer_is_a_compile_error() {
    assert_compile_error("{ var a = a; }");
}

#[test]
fn duplicate_local_declaration_is_a_compile_error() {
    assert_compile_error("{ var a = 1; var a = 2; }");
}

#[test]
fn self_inheritance_is_a_compile_error() {
    assert_compile_error("class C < C {}");
}

// ---------------------------------------------------------------------
// Strings and interning
// ---------------------------------------------------------------------

#[test]
fn string_escapes_and_interning() {
    assert_ok(
        r#"
        assert("a\nb".len() == 3);
        assert("abc" == "ab" + "c");
        assert("tab\there".contains("\t"));
        assert('single' == "single");
        assert("quote\"inside".len() == 12);
        "#,
    );
}

#[test]
fn unknown_escapes_pass_through() {
    assert_ok(r#"assert("a\zb".len() == 4);"#);
}

#[test]
fn string_methods() {
    assert_ok(
        r#"
        assert("Hello".lower() == "hello");
        assert("Hello".upper() == "HELLO");
        assert("hello".contains("ell"));
        assert("hello".startsWith("he"));
        assert("hello".endsWith("lo"));
        assert("  pad  ".trim() == "pad");
        var parts = "a,b,c".split(",");
        assert(parts.len() == 3);
        assert(parts[1] == "b");
        assert("a-b".replace("-", "+") == "a+b");
        assert("hello".find("llo") == 2);
        assert("hello".find("x") == -1);
        assert("42".toNumber() == 42);
        assert("3.5".toNumber() == 3.5);
        "#,
    );
}

#[test]
fn number_to_string_and_str() {
    assert_ok(
        r#"
        assert((3).toString() == "3");
        assert((2.5).toString() == "2.5");
        assert(str(3) == "3");
        assert(str(true) == "true");
        assert(str(nil) == "nil");
        assert(type(3) == "number");
        assert(type("x") == "string");
        assert(type([]) == "list");
        assert(type({}) == "dict");
        assert(type(nil) == "nil");
        "#,
    );
}

// ---------------------------------------------------------------------
// Runtime errors
// ---------------------------------------------------------------------

#[test]
fn undefined_variable_is_a_runtime_error() {
    assert_runtime_error("missing;");
    assert_runtime_error("missing = 1;");
}

#[test]
fn calling_a_non_callable_is_a_runtime_error() {
    assert_runtime_error("var x = 3; x();");
    assert_runtime_error(r#""text"();"#);
}

#[test]
fn type_errors_in_operators() {
    assert_runtime_error(r#"1 + "a";"#);
    assert_runtime_error("-[1];");
    assert_runtime_error("[1] < [2];");
    assert_runtime_error("var t = true; ++t;");
}

#[test]
fn failed_assert_is_a_runtime_error() {
    assert_runtime_error("assert(false);");
    assert_runtime_error("assert(nil);");
    assert_ok("assert(0);"); // only nil and false are falsey
}

#[test]
fn deep_recursion_overflows_the_frame_stack() {
    assert_runtime_error("def f() { return f(); } f();");
}

// ---------------------------------------------------------------------
// Garbage collection
// ---------------------------------------------------------------------

fn run_stressed(source: &str) -> InterpretResult {
    let mut vm = Vm::new(false);
    vm.set_stress_gc(true);
    vm.interpret(source)
}

#[test]
fn gc_stress_does_not_change_results() {
    let program = r#"
        def makeCounter() {
            var count = 0;
            def inc() { count = count + 1; return count; }
            return inc;
        }
        var c = makeCounter();
        c(); c();

        trait T { def greet() { return "hi " + this.name; } }
        class Person {
            use T;
            def init(name) { this.name = name; }
        }
        var people = [];
        for (var i = 0; i < 20; i = i + 1) {
            people.push(Person("p" + str(i)));
        }
        assert(people[7].greet() == "hi p7");

        var dict = {};
        for (var i = 0; i < 50; i = i + 1) {
            dict["key" + str(i)] = i * 2;
        }
        assert(dict["key25"] == 50);
        assert(dict.len() == 50);

        assert(c() == 3);
    "#;
    assert_eq!(run(program), InterpretResult::Ok);
    assert_eq!(run_stressed(program), InterpretResult::Ok);
}

#[test]
fn gc_stress_with_string_churn() {
    let program = r#"
        var kept = "";
        for (var i = 0; i < 100; i = i + 1) {
            var tmp = "chunk" + str(i);
            if (i % 10 == 0) {
                kept = kept + tmp;
            }
        }
        assert(kept.contains("chunk90"));
        assert(kept.contains("chunk0"));
    "#;
    assert_eq!(run_stressed(program), InterpretResult::Ok);
}

// ---------------------------------------------------------------------
// Imports
// ---------------------------------------------------------------------

#[test]
fn builtin_math_module() {
    assert_ok(
        r#"
        import Math;
        assert(Math.abs(-4) == 4);
        assert(Math.floor(2.9) == 2);
        assert(Math.ceil(2.1) == 3);
        assert(Math.sqrt(16) == 4);
        assert(Math.min(4, 2, 9) == 2);
        assert(Math.max(4, 2, 9) == 9);
        assert(Math.sum(1, 2, 3) == 6);
        assert(Math.average(2, 4) == 3);
        import Math;
        assert(Math.abs(1) == 1);
        "#,
    );
}

#[test]
fn builtin_json_module() {
    assert_ok(
        r#"
        import JSON;
        var parsed = JSON.parse("{\"a\": [1, 2, true, null], \"b\": \"text\"}");
        assert(parsed["b"] == "text");
        assert(parsed["a"][0] == 1);
        assert(parsed["a"][2] == true);
        assert(parsed["a"][3] == nil);
        var round = JSON.parse(JSON.stringify({"k": [1, false, nil]}));
        assert(round["k"][0] == 1);
        assert(round["k"][1] == false);
        assert(round["k"][2] == nil);
        "#,
    );
}

#[test]
fn builtin_env_module() {
    assert_ok(
        r#"
        import Env;
        Env.set("DICTU_TEST_VAR", "configured");
        assert(Env.get("DICTU_TEST_VAR") == "configured");
        Env.set("DICTU_TEST_VAR", nil);
        assert(Env.get("DICTU_TEST_VAR") == nil);
        "#,
    );
}

#[test]
fn builtin_path_module() {
    assert_ok(
        r#"
        import Path;
        assert(Path.basename("/tmp/file.du") == "file.du");
        assert(Path.dirname("/tmp/file.du") == "/tmp");
        assert(Path.extname("/tmp/file.du") == ".du");
        assert(Path.join("a", "b", "c.du") == "a/b/c.du");
        assert(Path.exists("/"));
        assert(Path.isDir("/"));
        "#,
    );
}

#[test]
fn builtin_random_module_stays_in_range() {
    assert_ok(
        r#"
        import Random;
        for (var i = 0; i < 50; i = i + 1) {
            var n = Random.range(1, 6);
            assert(n >= 1 and n <= 6);
            var f = Random.random();
            assert(f >= 0 and f < 1);
        }
        assert(Random.select([7]) == 7);
        "#,
    );
}

#[test]
fn builtin_sqlite_module() {
    assert_ok(
        r#"
        import Sqlite;
        var db = Sqlite.connect(":memory:");
        db.execute("CREATE TABLE people (name TEXT, age INTEGER)");
        db.execute("INSERT INTO people VALUES (?, ?)", ["ada", 36]);
        db.execute("INSERT INTO people VALUES (?, ?)", ["alan", 41]);
        var rows = db.execute("SELECT name, age FROM people ORDER BY age");
        assert(rows.len() == 2);
        assert(rows[0]["name"] == "ada");
        assert(rows[0]["age"] == 36);
        assert(rows[1]["name"] == "alan");
        db.close();
        "#,
    );
}

#[test]
fn sqlite_use_after_close_errors() {
    assert_runtime_error(
        r#"
        import Sqlite;
        var db = Sqlite.connect(":memory:");
        db.close();
        db.execute("SELECT 1");
        "#,
    );
}

#[test]
fn file_imports_execute_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let module_path = dir.path().join("module.du");
    std::fs::write(&module_path, "sideEffects = sideEffects + 1;\n").expect("write module");

    let source = format!(
        r#"
        var sideEffects = 0;
        import "{path}";
        import "{path}";
        assert(sideEffects == 1);
        "#,
        path = module_path.display()
    );
    assert_ok(&source);
}

#[test]
fn importing_a_missing_file_is_a_runtime_error() {
    assert_runtime_error(r#"import "does_not_exist.du";"#);
}

// ---------------------------------------------------------------------
// Files and the with statement
// ---------------------------------------------------------------------

#[test]
fn with_statement_writes_and_reads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file_path = dir.path().join("out.txt");
    let source = format!(
        r#"
        with("{path}", "w") {{
            file.write("line one\n");
            file.writeLine("line two");
        }}
        with("{path}", "r") {{
            var contents = file.read();
            assert(contents == "line one\nline two\n");
        }}
        "#,
        path = file_path.display()
    );
    assert_ok(&source);
}

#[test]
fn with_statement_closes_on_early_return() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file_path = dir.path().join("early.txt");
    let source = format!(
        r#"
        def writeAndBail() {{
            with("{path}", "w") {{
                file.write("written before return");
                return "done";
            }}
        }}
        assert(writeAndBail() == "done");
        with("{path}", "r") {{
            assert(file.read() == "written before return");
        }}
        "#,
        path = file_path.display()
    );
    assert_ok(&source);
}

#[test]
fn with_statement_closes_on_break() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file_path = dir.path().join("break.txt");
    let source = format!(
        r#"
        for (var i = 0; i < 3; i = i + 1) {{
            with("{path}", "w") {{
                file.write("iteration " + str(i));
                if (i == 1) break;
            }}
        }}
        with("{path}", "r") {{
            assert(file.read() == "iteration 1");
        }}
        "#,
        path = file_path.display()
    );
    assert_ok(&source);
}

#[test]
fn file_read_line_iterates_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file_path = dir.path().join("lines.txt");
    std::fs::write(&file_path, "first\nsecond\nthird").expect("write lines");
    let source = format!(
        r#"
        with("{path}", "r") {{
            assert(file.readLine() == "first");
            assert(file.readLine() == "second");
            assert(file.readLine() == "third");
            assert(file.readLine() == nil);
        }}
        "#,
        path = file_path.display()
    );
    assert_ok(&source);
}

#[test]
fn opening_a_missing_file_for_reading_errors() {
    assert_runtime_error(r#"with("definitely_not_here.txt", "r") { file.read(); }"#);
}

#[test]
fn manual_close_is_allowed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file_path = dir.path().join("manual.txt");
    let source = format!(
        r#"
        with("{path}", "w") {{
            file.write("x");
            file.close();
        }}
        "#,
        path = file_path.display()
    );
    assert_ok(&source);
}
