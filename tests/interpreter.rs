#[cfg(test)]
mod interpreter_tests {
    use lox_engine as lox;

    use lox::error::{LoxError, RuntimeError};
    use lox::output::CapturedOutput;
    use lox::Lox;

    fn session() -> (Lox, CapturedOutput) {
        let out = CapturedOutput::new();
        (Lox::with_output(Box::new(out.clone())), out)
    }

    fn run(source: &str) -> (Vec<String>, Result<(), LoxError>) {
        let (mut lox, out) = session();
        let result = lox.run(source);
        (out.lines(), result)
    }

    fn output_of(source: &str) -> Vec<String> {
        match run(source) {
            (lines, Ok(())) => lines,
            (_, Err(e)) => panic!("script failed: {}", e),
        }
    }

    fn runtime_error(source: &str) -> RuntimeError {
        match run(source) {
            (_, Err(LoxError::Runtime(e))) => e,
            (_, other) => panic!("expected a runtime error, got {:?}", other),
        }
    }

    fn static_errors(source: &str) -> Vec<String> {
        match run(source) {
            (lines, Err(LoxError::Static(errors))) => {
                assert!(lines.is_empty(), "nothing may run after a static error");
                errors.iter().map(ToString::to_string).collect()
            }
            (_, other) => panic!("expected static errors, got {:?}", other),
        }
    }

    // ── closures and scoping ────────────────────────────────────────────

    #[test]
    fn test_binding_is_fixed_before_shadowing() {
        let source = r#"
            var a = "global";
            {
              fun showA() {
                print a;
              }

              showA();
              var a = "block";
              showA();
            }
        "#;

        assert_eq!(output_of(source), ["global", "global"]);
    }

    #[test]
    fn test_closure_keeps_counter_state() {
        let source = r#"
            fun makeCounter() {
              var i = 0;
              fun count() {
                i = i + 1;
                print i;
              }
              return count;
            }

            var counter = makeCounter();
            counter();
            counter();
        "#;

        assert_eq!(output_of(source), ["1", "2"]);
    }

    #[test]
    fn test_separate_counters_do_not_share_state() {
        let source = r#"
            fun makeCounter() {
              var i = 0;
              fun count() { i = i + 1; return i; }
              return count;
            }

            var a = makeCounter();
            var b = makeCounter();
            a(); a();
            print a();
            print b();
        "#;

        assert_eq!(output_of(source), ["3", "1"]);
    }

    #[test]
    fn test_for_loop_scopes() {
        let source = r#"
            var i = "before";
            for (var i = 0; i < 1; i = i + 1) {
              print i;
              var i = -1;
              print i;
            }
            print i;
        "#;

        assert_eq!(output_of(source), ["0", "-1", "before"]);
    }

    #[test]
    fn test_globals_are_late_bound() {
        let source = r#"
            fun first() { return second(); }
            fun second() { return "second"; }
            print first();
        "#;

        assert_eq!(output_of(source), ["second"]);
    }

    #[test]
    fn test_global_redeclaration_is_allowed() {
        assert_eq!(output_of("var a = 1; var a = 2; print a;"), ["2"]);
    }

    #[test]
    fn test_global_read_in_own_initializer_fails_at_run_time() {
        let err = runtime_error("var a = a;");
        assert_eq!(
            err,
            RuntimeError::UndefinedVariable {
                name: "a".into(),
                line: 1
            }
        );
    }

    // ── expressions ─────────────────────────────────────────────────────

    #[test]
    fn test_logical_operators_return_operands() {
        let source = r#"
            print "hi" or 2;
            print nil or "yes";
            print nil and 1;
            print 1 and 2;
            print false or false;
        "#;

        assert_eq!(output_of(source), ["hi", "yes", "nil", "2", "false"]);
    }

    #[test]
    fn test_short_circuit_skips_right_operand() {
        let source = r#"
            fun loud() { print "evaluated"; return true; }
            print true or loud();
            print false and loud();
        "#;

        assert_eq!(output_of(source), ["true", "false"]);
    }

    #[test]
    fn test_arithmetic_and_number_display() {
        let source = r#"
            print 2 + 1;
            print 7 / 2;
            print 1 / 0;
            print -0;
            print (1 + 2) * 3 - 4;
            print "foo" + "bar";
        "#;

        assert_eq!(output_of(source), ["3", "3.5", "inf", "-0", "5", "foobar"]);
    }

    #[test]
    fn test_truthiness() {
        let source = r#"
            if (0) print "zero";
            if ("") print "empty";
            if (nil) print "nil"; else print "else";
            print !nil;
            print !0;
        "#;

        assert_eq!(output_of(source), ["zero", "empty", "else", "true", "false"]);
    }

    #[test]
    fn test_equality_rules() {
        let source = r#"
            print 1 == "1";
            print nil == false;
            print nil == nil;
            print "a" == "a";
            fun f() {}
            print f == f;
            class A {}
            print A() == A();
            var a = A();
            print a == a;
            print A == A;
            print 1 != 2;
        "#;

        assert_eq!(
            output_of(source),
            ["false", "false", "true", "true", "true", "false", "true", "true", "true"]
        );
    }

    #[test]
    fn test_display_forms() {
        let source = r#"
            fun f() {}
            class K { m() {} }
            print f;
            print clock;
            print K;
            print K();
            print K().m;
            print nil;
        "#;

        assert_eq!(
            output_of(source),
            ["<fn f>", "<native fn>", "K", "K instance", "<fn m>", "nil"]
        );
    }

    #[test]
    fn test_clock_returns_seconds() {
        assert_eq!(output_of("print clock() > 1000000000;"), ["true"]);
    }

    // ── functions ───────────────────────────────────────────────────────

    #[test]
    fn test_recursion() {
        let source = r#"
            fun fib(n) {
              if (n < 2) return n;
              return fib(n - 1) + fib(n - 2);
            }
            print fib(10);
        "#;

        assert_eq!(output_of(source), ["55"]);
    }

    #[test]
    fn test_deep_recursion_below_the_limit() {
        let source = r#"
            fun down(n) {
              if (n == 0) return "bottom";
              return down(n - 1);
            }
            print down(1000);
        "#;

        assert_eq!(output_of(source), ["bottom"]);
    }

    #[test]
    fn test_return_unwinds_through_loops_and_blocks() {
        let source = r#"
            fun find() {
              for (var i = 0; i < 10; i = i + 1) {
                while (true) {
                  if (i == 3) { return i; }
                  i = i + 1;
                }
              }
              return -1;
            }
            print find();
            fun nothing() { return; }
            print nothing();
            fun fallsOff() {}
            print fallsOff();
        "#;

        assert_eq!(output_of(source), ["3", "nil", "nil"]);
    }

    #[test]
    fn test_arity_mismatch_skips_body() {
        let source = "fun f(a, b) { print \"body ran\"; }\nf(1);";
        let (lines, result) = run(source);

        assert!(lines.is_empty());
        match result {
            Err(LoxError::Runtime(e)) => assert_eq!(
                e,
                RuntimeError::ArityMismatch {
                    expected: 2,
                    got: 1,
                    line: 2
                }
            ),
            other => panic!("expected arity mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_native_arity_is_checked() {
        assert!(matches!(
            runtime_error("clock(1);"),
            RuntimeError::ArityMismatch {
                expected: 0,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_arguments_evaluate_left_to_right() {
        let source = r#"
            fun show(x) { print x; return x; }
            fun three(a, b, c) { return a + b + c; }
            print three(show(1), show(2), show(3));
        "#;

        assert_eq!(output_of(source), ["1", "2", "3", "6"]);
    }

    // ── classes ─────────────────────────────────────────────────────────

    #[test]
    fn test_super_runs_parent_method_first() {
        let source = r#"
            class Dish {
              cook() { print "base cooking"; }
            }
            class Pasta < Dish {
              cook() {
                super.cook();
                print "boiling pasta";
              }
            }
            Pasta().cook();
        "#;

        assert_eq!(output_of(source), ["base cooking", "boiling pasta"]);
    }

    #[test]
    fn test_super_binds_current_instance() {
        let source = r#"
            class A { name() { return this.kind; } }
            class B < A { name() { return "B:" + super.name(); } }
            var b = B();
            b.kind = "child";
            print b.name();
        "#;

        assert_eq!(output_of(source), ["B:child"]);
    }

    #[test]
    fn test_super_starts_at_declaring_superclass() {
        let source = r#"
            class A { method() { print "A method"; } }
            class B < A {
              method() { print "B method"; }
              test() { super.method(); }
            }
            class C < B {}
            C().test();
        "#;

        assert_eq!(output_of(source), ["A method"]);
    }

    #[test]
    fn test_inherited_methods_and_fields() {
        let source = r#"
            class A { m() { return "method"; } greet() { return "hi"; } }
            class B < A {}
            var b = B();
            print b.greet();
            b.m = "field";
            print b.m;
        "#;

        assert_eq!(output_of(source), ["hi", "field"]);
    }

    #[test]
    fn test_bound_method_keeps_receiver() {
        let source = r#"
            class Box {
              init(n) { this.n = n; }
              get() { return this.n; }
            }
            var g = Box(7).get;
            print g();
        "#;

        assert_eq!(output_of(source), ["7"]);
    }

    #[test]
    fn test_initializer_semantics() {
        let source = r#"
            class Point {
              init(x, y) {
                this.x = x;
                this.y = y;
                if (x > 100) return;
              }
              sum() { return this.x + this.y; }
            }
            var p = Point(1, 2);
            print p.sum();
            print p.init(3, 4) == p;
            print p.sum();
            print Point(200, 1).x;
        "#;

        assert_eq!(output_of(source), ["3", "true", "7", "200"]);
    }

    #[test]
    fn test_inherited_initializer_sets_arity() {
        assert_eq!(
            output_of("class A { init(n) { this.n = n; } } class B < A {} print B(5).n;"),
            ["5"]
        );
        assert!(matches!(
            runtime_error("class A { init(n) {} }\nA();"),
            RuntimeError::ArityMismatch {
                expected: 1,
                got: 0,
                line: 2
            }
        ));
        assert!(matches!(
            runtime_error("class E {} E(1);"),
            RuntimeError::ArityMismatch {
                expected: 0,
                got: 1,
                ..
            }
        ));
    }

    // ── runtime errors ──────────────────────────────────────────────────

    #[test]
    fn test_undefined_variable() {
        let err = runtime_error("print 1;\nprint missing;");
        assert_eq!(err.to_string(), "[line 2] Undefined variable 'missing'.");

        assert!(matches!(
            runtime_error("x = 1;"),
            RuntimeError::UndefinedVariable { .. }
        ));
    }

    #[test]
    fn test_unbounded_recursion_is_a_stack_overflow() {
        let err = runtime_error("fun f() {\n  f();\n}\nf();");

        assert_eq!(err, RuntimeError::StackOverflow { line: 2 });
        assert_eq!(err.to_string(), "[line 2] Stack overflow.");
        assert_eq!(LoxError::Runtime(err).exit_code(), 70);
    }

    #[test]
    fn test_undefined_property() {
        let err = runtime_error("class A {}\nA().nope;");
        assert_eq!(err.to_string(), "[line 2] Undefined property 'nope'.");
    }

    #[test]
    fn test_type_mismatch_names_operator_and_operand() {
        assert_eq!(
            runtime_error("\"a\" + 1;").to_string(),
            "[line 1] Operand of '+' must be two numbers or two strings, got number 1."
        );
        assert_eq!(
            runtime_error("-\"x\";").to_string(),
            "[line 1] Operand of '-' must be a number, got string \"x\"."
        );
        assert_eq!(
            runtime_error("1 < nil;").to_string(),
            "[line 1] Operand of '<' must be numbers, got nil."
        );
        assert_eq!(
            runtime_error("\"s\".len;").to_string(),
            "[line 1] Operand of '.' must be an instance, got string \"s\"."
        );
        assert!(matches!(
            runtime_error("var n = 3; n.field = 1;"),
            RuntimeError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_not_callable() {
        assert_eq!(
            runtime_error("\"s\"();"),
            RuntimeError::NotCallable { line: 1 }
        );
    }

    #[test]
    fn test_invalid_superclass() {
        let err = runtime_error("var NotClass = 1;\nclass A < NotClass {}");
        assert_eq!(err, RuntimeError::InvalidSuperclass { line: 2 });
        assert_eq!(err.to_string(), "[line 2] Superclass must be a class.");
    }

    #[test]
    fn test_runtime_error_stops_the_script() {
        let (lines, result) = run("print 1;\nprint missing;\nprint 2;");

        assert_eq!(lines, ["1"]);
        let err = match result {
            Err(e) => e,
            Ok(()) => panic!("expected failure"),
        };
        assert_eq!(err.exit_code(), 70);
        assert_eq!(err.line(), Some(2));
    }

    // ── static errors ───────────────────────────────────────────────────

    #[test]
    fn test_static_error_messages() {
        let cases = [
            ("{ var a = a; }", "Can't read local variable in its own initializer."),
            ("return 1;", "Can't return from top-level code."),
            ("print this;", "Can't use 'this' outside of a class."),
            ("fun f() { super.x(); }", "Can't use 'super' outside of a class."),
            (
                "class A { m() { super.m(); } }",
                "Can't use 'super' in a class with no superclass.",
            ),
            ("class A < A {}", "A class can't inherit from itself."),
            ("{ var a; var a; }", "Already a variable with this name in this scope."),
            ("fun f(a, a) {}", "Already a variable with this name in this scope."),
            (
                "class A { init() { return 1; } }",
                "Can't return a value from an initializer.",
            ),
        ];

        for (source, message) in cases {
            assert_eq!(
                static_errors(source),
                [format!("[line 1] Error: {}", message)],
                "source: {}",
                source
            );
        }
    }

    #[test]
    fn test_all_static_errors_are_reported_and_nothing_runs() {
        let source = "print \"ran\";\nreturn 1;\n{ var a = a; }";
        let errors = static_errors(source);

        assert_eq!(
            errors,
            [
                "[line 2] Error: Can't return from top-level code.",
                "[line 3] Error: Can't read local variable in its own initializer.",
            ]
        );
    }

    #[test]
    fn test_static_errors_exit_with_65() {
        let (_, result) = run("return;");
        assert!(matches!(&result, Err(e) if e.exit_code() == 65));
    }

    // ── sessions ────────────────────────────────────────────────────────

    #[test]
    fn test_globals_persist_across_runs() {
        let (mut lox, out) = session();

        assert!(lox.run("var a = 1; fun inc() { a = a + 1; }").is_ok());
        assert!(lox.run("inc(); print a;").is_ok());
        assert!(lox.run("print missing;").is_err());
        assert!(lox.run("inc(); print a;").is_ok());

        assert_eq!(out.lines(), ["2", "3"]);

        let globals = lox.interpreter().globals().borrow();
        assert_eq!(globals.get("a"), Some(lox::value::Value::Number(3.0)));
    }

    #[test]
    fn test_environment_restored_after_error_in_block() {
        let (mut lox, out) = session();

        assert!(lox
            .run("var a = \"outer\"; { var a = \"inner\"; print missing; }")
            .is_err());
        assert!(lox.run("print a;").is_ok());

        assert_eq!(out.lines(), ["outer"]);
    }

    #[test]
    fn test_session_recovers_after_stack_overflow() {
        let (mut lox, out) = session();

        let result = lox.run("fun loop(n) { return loop(n + 1); }\nloop(0);");
        assert!(matches!(
            result,
            Err(LoxError::Runtime(RuntimeError::StackOverflow { line: 1 }))
        ));

        assert!(lox.run("print \"after\";").is_ok());
        assert!(lox
            .run("fun count(n) { if (n == 0) return 0; return 1 + count(n - 1); }\nprint count(900);")
            .is_ok());

        assert_eq!(out.lines(), ["after", "900"]);
    }

    #[test]
    fn test_frames_of_finished_calls_are_reclaimed() {
        let (mut lox, out) = session();

        let source = r#"
            fun outer() {
              fun inner() { return 1; }
              return inner();
            }
            var total = 0;
            for (var i = 0; i < 5000; i = i + 1) total = total + outer();
            print total;
        "#;
        assert!(lox.run(source).is_ok());
        assert_eq!(out.lines(), ["5000"]);

        // Each `outer` frame holds `inner`, which closes over that frame.
        assert!(lox.interpreter().live_environments() < 1024);

        lox.interpreter_mut().collect_cycles();
        assert_eq!(lox.interpreter().live_environments(), 1);
    }

    #[test]
    fn test_closures_survive_collection() {
        let (mut lox, out) = session();

        let source = r#"
            fun makeCounter() {
              var n = 0;
              fun count() { n = n + 1; return n; }
              return count;
            }
            var kept = makeCounter();
            for (var i = 0; i < 3000; i = i + 1) {
              makeCounter()();
              kept();
            }
            print kept();
        "#;
        assert!(lox.run(source).is_ok());

        lox.interpreter_mut().collect_cycles();
        assert!(lox.run("print kept() + makeCounter()();").is_ok());

        assert_eq!(out.lines(), ["3001", "3003"]);
    }

    #[test]
    fn test_objects_referring_to_themselves_are_reclaimed() {
        let (mut lox, _out) = session();

        let source = r#"
            class Node {
              init() { this.me = this; }
              link() { fun back() { return this; } this.back = back; }
            }
            fun churn() {
              var node = Node();
              node.link();
            }
            for (var i = 0; i < 100; i = i + 1) churn();
        "#;
        assert!(lox.run(source).is_ok());

        lox.interpreter_mut().collect_cycles();
        assert_eq!(lox.interpreter().live_environments(), 1);
    }

    #[test]
    fn test_resolved_locals_grow_only_with_local_references() {
        let (mut lox, out) = session();

        for _ in 0..50 {
            assert!(lox.run("var a = 1; a = a + 1;").is_ok());
        }
        assert_eq!(lox.interpreter().resolved_locals(), 0);

        assert!(lox.run("fun id(x) { return x; }").is_ok());
        assert_eq!(lox.interpreter().resolved_locals(), 1);

        // Later runs still find the annotation made for `id`'s body.
        assert!(lox.run("print id(3);").is_ok());
        assert_eq!(lox.interpreter().resolved_locals(), 1);
        assert_eq!(out.lines(), ["3"]);
    }

    #[test]
    fn test_captured_output_can_be_cleared() {
        let (mut lox, out) = session();

        assert!(lox.run("print 1;").is_ok());
        out.clear();
        assert!(lox.run("print 2;").is_ok());

        assert_eq!(out.lines(), ["2"]);
    }
}
