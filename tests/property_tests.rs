use bffpp::{BfInstruction, BfInterpreter, Program, Registry};
use proptest::prelude::*;

fn run(source: &str, input: &[u8]) -> (Vec<u8>, u8) {
    let registry = Registry::new();
    let mut output = vec![];
    let mut interpreter = BfInterpreter::new(source, &registry, input, &mut output)
        .unwrap_or_else(|e| panic!("cannot load {source:?}: {e}"));
    interpreter
        .run()
        .unwrap_or_else(|e| panic!("cannot run {source:?}: {e}"));
    let head = interpreter.head_value();
    drop(interpreter);
    (output, head)
}

/// Balanced bracket programs mixed with the plain cell instructions.
fn balanced() -> impl Strategy<Value = String> {
    let leaf = prop::sample::select(vec!["+", "-", ">", "<", "."]).prop_map(str::to_owned);
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop::collection::vec(inner, 0..8).prop_map(|parts| format!("[{}]", parts.concat()))
    })
}

proptest! {
    #[test]
    fn increment_wraps_after_256(start in 0usize..256) {
        let source = format!("{}{}", "+".repeat(start), "+".repeat(256));
        let (_, head) = run(&source, b"");
        prop_assert_eq!(usize::from(head), start);
    }

    #[test]
    fn decrement_wraps_after_256(start in 0usize..256) {
        let source = format!("{}{}", "+".repeat(start), "-".repeat(256));
        let (_, head) = run(&source, b"");
        prop_assert_eq!(usize::from(head), start);
    }

    #[test]
    fn read_then_print_echoes(byte in 0x20u8..0x7f) {
        let (output, _) = run(",.", &[byte, b'\n']);
        prop_assert_eq!(output, vec![byte]);
    }

    #[test]
    fn bracket_table_is_bijective(parts in prop::collection::vec(balanced(), 1..6)) {
        let program = Program::parse(&parts.concat()).expect("balanced program must load");
        for (index, instruction) in program.instructions().iter().enumerate() {
            let is_bracket = matches!(instruction, BfInstruction::LoopStart | BfInstruction::LoopEnd);
            match program.matching(index) {
                Some(partner) => {
                    prop_assert!(is_bracket);
                    prop_assert_eq!(program.matching(partner), Some(index));
                    prop_assert_ne!(partner, index);
                }
                None => prop_assert!(!is_bracket),
            }
        }
    }

    #[test]
    fn loader_does_not_panic(s in "\\PC*") {
        let _ = Program::parse(&s);
    }

    #[test]
    fn external_arguments_arrive_in_order(args in prop::collection::vec(0u64..1_000_000, 0..6)) {
        use std::cell::RefCell;
        use std::rc::Rc;

        let seen = Rc::new(RefCell::new(vec![]));
        let sink = Rc::clone(&seen);
        let mut registry = Registry::new();
        registry.register("collect", move |_: &mut [u8], args: &[u64]| {
            sink.borrow_mut().push(args.to_vec());
            Ok(())
        });
        let rendered: Vec<String> = args.iter().map(u64::to_string).collect();
        let source = format!("&collect {}+.", rendered.join(" "));
        let mut output = vec![];
        let interpreter = BfInterpreter::new(&source, &registry, &b""[..], &mut output)
            .expect("external call must load");
        interpreter.execute().expect("external call must run");
        prop_assert_eq!(output, vec![1]);
        prop_assert_eq!(seen.borrow().clone(), vec![args]);
    }
}
