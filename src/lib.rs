use std::io::{BufRead, Write};
use std::num::NonZeroUsize;

use thiserror::Error;
use tracing::trace;

pub mod builtins;
pub mod import;
pub mod program;
pub mod registry;

pub use import::{ImportError, Importer};
pub use program::{BfInstruction, FunctionBody, LoadError, Program};
pub use registry::{ExternalFunction, Registry};

pub const DEFAULT_TAPE_SIZE: usize = 30_000;

#[derive(Debug)]
pub struct BfInterpreter<'r, I, O> {
    program: Program,
    instruction_pointer: usize,
    call_stack: Vec<usize>,
    tape: Vec<u8>,
    tape_pointer: usize,
    registry: &'r Registry,
    input: I,
    output: O,
}

impl<'r, I, O> BfInterpreter<'r, I, O>
where
    I: BufRead,
    O: Write,
{
    pub fn new(
        source: &str,
        registry: &'r Registry,
        input: I,
        output: O,
    ) -> Result<Self, LoadError> {
        let program = Program::parse(source)?;
        Ok(Self::from_program(program, registry, input, output))
    }

    pub fn from_program(program: Program, registry: &'r Registry, input: I, output: O) -> Self {
        Self {
            program,
            instruction_pointer: 0,
            call_stack: vec![],
            tape: vec![0; DEFAULT_TAPE_SIZE],
            tape_pointer: 0,
            registry,
            input,
            output,
        }
    }

    /// Replaces the tape with `size` zeroed cells.
    pub fn with_tape_size(mut self, size: NonZeroUsize) -> Self {
        self.tape = vec![0; size.get()];
        self.tape_pointer = 0;
        self
    }

    pub fn is_end(&self) -> bool {
        self.instruction_pointer >= self.program.len()
    }

    pub fn head_value(&self) -> u8 {
        self.tape[self.tape_pointer]
    }

    pub fn tape(&self) -> &[u8] {
        &self.tape
    }

    pub fn tape_pointer(&self) -> usize {
        self.tape_pointer
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn current_instruction(&self) -> Option<&BfInstruction> {
        self.program.instruction(self.instruction_pointer)
    }

    pub fn step(&mut self) -> Result<(), RuntimeError> {
        let program = &self.program;
        let here = self.instruction_pointer;
        let Some(instruction) = program.instruction(here) else {
            return Ok(());
        };
        let mut next = here + 1;
        match instruction {
            BfInstruction::GoRight => {
                if self.tape_pointer + 1 >= self.tape.len() {
                    return Err(RuntimeError::SeekOverRightmost {
                        capacity: self.tape.len(),
                    });
                }
                self.tape_pointer += 1;
            }
            BfInstruction::GoLeft => {
                if self.tape_pointer == 0 {
                    return Err(RuntimeError::SeekOverLeftmost);
                }
                self.tape_pointer -= 1;
            }
            BfInstruction::Increment => {
                let cell = &mut self.tape[self.tape_pointer];
                *cell = cell.wrapping_add(1);
            }
            BfInstruction::Decrement => {
                let cell = &mut self.tape[self.tape_pointer];
                *cell = cell.wrapping_sub(1);
            }
            BfInstruction::GetInput => {
                // Pending output, such as a prompt, must be visible before blocking on input.
                self.output.flush()?;
                let mut token = vec![];
                self.input.read_until(b'\n', &mut token)?;
                let Some(&first) = token.first().filter(|&&b| b != b'\n' && b != b'\r') else {
                    return Err(RuntimeError::LackOfInput);
                };
                self.tape[self.tape_pointer] = first;
            }
            BfInstruction::PutOutput => {
                self.output.write_all(&[self.tape[self.tape_pointer]])?;
            }
            BfInstruction::LoopStart => {
                if self.tape[self.tape_pointer] == 0 {
                    next = program.jump_target(here) + 1;
                }
            }
            BfInstruction::LoopEnd => {
                if self.tape[self.tape_pointer] != 0 {
                    next = program.jump_target(here) + 1;
                }
            }
            BfInstruction::Call(id) => {
                let id = id.ok_or(RuntimeError::MissingFunctionId)?;
                let body = program
                    .function(id)
                    .ok_or(RuntimeError::UndefinedFunction(id))?;
                trace!(id, depth = self.call_stack.len() + 1, "call");
                self.call_stack.push(next);
                next = body.start;
            }
            // Definitions met in straight-line flow are skipped; bodies run only through `@`.
            BfInstruction::FunctionStart(_) => {
                next = program.jump_target(here) + 1;
            }
            BfInstruction::FunctionEnd => {
                if let Some(return_to) = self.call_stack.pop() {
                    trace!(depth = self.call_stack.len(), "return");
                    next = return_to;
                }
            }
            BfInstruction::External { name, args } => {
                let function = self
                    .registry
                    .get(name)
                    .ok_or_else(|| RuntimeError::UnknownExternal(name.clone()))?;
                trace!(name = %name, ?args, "external call");
                function(self.tape.as_mut_slice(), args.as_slice()).map_err(|source| {
                    RuntimeError::ExternalFailed {
                        name: name.clone(),
                        source,
                    }
                })?;
            }
        }
        while next >= program.len() {
            let Some(return_to) = self.call_stack.pop() else {
                break;
            };
            trace!(depth = self.call_stack.len(), "return at end of program");
            next = return_to;
        }
        self.instruction_pointer = next;
        Ok(())
    }

    /// Runs until the program ends, then flushes the output.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let mut result = Ok(());
        while !self.is_end() {
            result = self.step();
            if result.is_err() {
                break;
            }
        }
        let flushed = self.output.flush();
        result?;
        flushed?;
        Ok(())
    }

    pub fn execute(mut self) -> Result<(), RuntimeError> {
        self.run()
    }
}

/// Loads `source` and runs it on a default-sized tape.
pub fn run<I, O>(source: &str, registry: &Registry, input: I, output: O) -> Result<(), BfError>
where
    I: BufRead,
    O: Write,
{
    BfInterpreter::new(source, registry, input, output)?.execute()?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot seek over leftmost of tape")]
    SeekOverLeftmost,
    #[error("cannot seek over rightmost of tape ({capacity} cells)")]
    SeekOverRightmost { capacity: usize },
    #[error("lack of input")]
    LackOfInput,
    #[error("function :{0} not defined")]
    UndefinedFunction(u8),
    #[error("function not defined: `@` must be followed by a function id 0-9")]
    MissingFunctionId,
    #[error("external function '{0}' not found")]
    UnknownExternal(String),
    #[error("external function '{name}' failed")]
    ExternalFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("input/output error")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BfError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[cfg(test)]
fn run_with(source: &str, registry: &Registry, input: &[u8]) -> anyhow::Result<(Vec<u8>, u8)> {
    let mut output = vec![];
    let mut interpreter = BfInterpreter::new(source, registry, input, &mut output)?;
    interpreter.run()?;
    let head = interpreter.head_value();
    drop(interpreter);
    Ok((output, head))
}

#[test]
fn test_echo() -> anyhow::Result<()> {
    let input = std::io::BufReader::new(&b"H\ni\n!\n\0\n"[..]);
    let mut output = vec![];
    let registry = Registry::new();
    let interpreter = BfInterpreter::new(",[.,]", &registry, input, &mut output)?;
    interpreter.execute()?;
    assert_eq!(output, b"Hi!");
    Ok(())
}

#[test]
fn test_reverse() -> anyhow::Result<()> {
    let input = std::io::BufReader::new(&b"a\nb\nc\n\0"[..]);
    let mut output = vec![];
    let registry = Registry::new();
    let interpreter = BfInterpreter::new(">,[>,]<[.<]", &registry, input, &mut output)?;
    interpreter.execute()?;
    assert_eq!(output, b"cba");
    Ok(())
}

#[test]
fn test_hello_world() -> anyhow::Result<()> {
    let registry = Registry::new();
    let (output, _) = run_with(
        "++++++++++[>+++++++>++++++++++>+++>++++<
<<<-]>++.>+.+++++++..+++.>>++++.<++.<+++
+++++.--------.+++.------.--------.>+.",
        &registry,
        b"",
    )?;
    assert_eq!(output, b"Hello, world!");
    Ok(())
}

#[test]
fn test_sum_n() -> anyhow::Result<()> {
    let registry = Registry::new();
    let (output, _) = run_with(",[[->>+>+<<<]>>>[-<<<+>>>]<[-<+>]<<-]>.", &registry, &[3])?;
    assert_eq!(output, [6]);
    Ok(())
}

#[test]
fn test_increment_twice_prints_two() -> anyhow::Result<()> {
    let (output, _) = run_with("++.", &Registry::new(), b"")?;
    assert_eq!(output, [2]);
    Ok(())
}

#[test]
fn test_read_then_print() -> anyhow::Result<()> {
    let (output, _) = run_with(",.", &Registry::new(), b"A")?;
    assert_eq!(output, b"A");
    Ok(())
}

#[test]
fn test_only_first_character_of_token() -> anyhow::Result<()> {
    let (output, _) = run_with(",.,.", &Registry::new(), b"xyz\r\nq\n")?;
    assert_eq!(output, b"xq");
    Ok(())
}

#[test]
fn test_clear_loop() -> anyhow::Result<()> {
    let (output, head) = run_with("+[-]", &Registry::new(), b"")?;
    assert!(output.is_empty());
    assert_eq!(head, 0);
    Ok(())
}

#[test]
fn test_skip_loop_on_zero() -> anyhow::Result<()> {
    let (output, _) = run_with("[+.]>+.", &Registry::new(), b"")?;
    assert_eq!(output, [1]);
    Ok(())
}

#[test]
fn test_wraparound() -> anyhow::Result<()> {
    let (_, head) = run_with("-", &Registry::new(), b"")?;
    assert_eq!(head, 255);
    let (_, head) = run_with(&"+".repeat(256), &Registry::new(), b"")?;
    assert_eq!(head, 0);
    Ok(())
}

#[test]
fn test_call_twice() -> anyhow::Result<()> {
    let (_, head) = run_with(":1+:@1@1", &Registry::new(), b"")?;
    assert_eq!(head, 2);
    Ok(())
}

#[test]
fn test_call_resumes_after_call_site() -> anyhow::Result<()> {
    let (output, _) = run_with(":5++:@5.@5.", &Registry::new(), b"")?;
    assert_eq!(output, [2, 4]);
    Ok(())
}

#[test]
fn test_function_defined_after_call() -> anyhow::Result<()> {
    let (output, _) = run_with("@7.:7+++:", &Registry::new(), b"")?;
    assert_eq!(output, [3]);
    Ok(())
}

#[test]
fn test_nested_calls_return_in_order() -> anyhow::Result<()> {
    let (output, _) = run_with(":1@2+.::2@3+.::3+.:@1+.", &Registry::new(), b"")?;
    assert_eq!(output, [1, 2, 3, 4]);
    Ok(())
}

#[test]
fn test_recursion() -> anyhow::Result<()> {
    // :0 decrements and recurses until the cell is zero, printing on the way back.
    let (output, _) = run_with(":0[-@0.]:+++@0", &Registry::new(), b"")?;
    assert_eq!(output, [0, 0, 0]);
    Ok(())
}

#[test]
fn test_definition_skipped_in_linear_flow() -> anyhow::Result<()> {
    let (output, head) = run_with(":1+++:.:2>:.", &Registry::new(), b"")?;
    assert_eq!(output, [0, 0]);
    assert_eq!(head, 0);
    Ok(())
}

#[test]
fn test_call_stack_unwinds() -> anyhow::Result<()> {
    let registry = Registry::new();
    let mut output = vec![];
    let mut interpreter = BfInterpreter::new(":1@2::2+:@1", &registry, &b""[..], &mut output)?;
    let mut deepest = 0;
    while !interpreter.is_end() {
        interpreter.step()?;
        deepest = deepest.max(interpreter.call_depth());
    }
    assert_eq!(deepest, 2);
    assert_eq!(interpreter.call_depth(), 0);
    assert_eq!(interpreter.head_value(), 1);
    assert_eq!(interpreter.current_instruction(), None);
    assert_eq!(interpreter.program().len(), 7);
    Ok(())
}

#[test]
fn test_step_exposes_tape_state() -> anyhow::Result<()> {
    let registry = Registry::new();
    let mut output = vec![];
    let mut interpreter = BfInterpreter::new("+>++>+++<", &registry, &b""[..], &mut output)?
        .with_tape_size(NonZeroUsize::new(4).expect("non-zero"));
    assert_eq!(interpreter.current_instruction(), Some(&BfInstruction::Increment));
    interpreter.step()?;
    assert_eq!(interpreter.current_instruction(), Some(&BfInstruction::GoRight));
    interpreter.run()?;
    assert_eq!(interpreter.tape(), [1, 2, 3, 0]);
    assert_eq!(interpreter.tape_pointer(), 1);
    Ok(())
}

#[test]
fn test_prompt_visible_before_read() -> anyhow::Result<()> {
    use std::cell::RefCell;
    use std::io::{BufWriter, Read};
    use std::rc::Rc;

    /// Shares its bytes so a reader can look at what reached it.
    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Records what the sink held the first time input was requested.
    struct WatchingReader {
        input: &'static [u8],
        sink: SharedSink,
        seen_at_read: Option<Vec<u8>>,
    }

    impl Read for WatchingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let available = self.fill_buf()?;
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            self.consume(n);
            Ok(n)
        }
    }

    impl BufRead for WatchingReader {
        fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
            if self.seen_at_read.is_none() {
                self.seen_at_read = Some(self.sink.0.borrow().clone());
            }
            Ok(self.input)
        }

        fn consume(&mut self, amt: usize) {
            self.input = &self.input[amt..];
        }
    }

    let sink = SharedSink::default();
    let mut reader = WatchingReader {
        input: b"A\n",
        sink: sink.clone(),
        seen_at_read: None,
    };
    let registry = Registry::new();
    let mut interpreter = BfInterpreter::new(
        "++++++++[>++++++++<-]>+.,.",
        &registry,
        &mut reader,
        BufWriter::new(sink.clone()),
    )?;
    interpreter.run()?;
    drop(interpreter);
    assert_eq!(reader.seen_at_read, Some(b"A".to_vec()));
    assert_eq!(*sink.0.borrow(), b"AA");
    Ok(())
}

#[test]
fn test_external_call() -> anyhow::Result<()> {
    use std::cell::RefCell;
    use std::rc::Rc;

    let calls = Rc::new(RefCell::new(vec![]));
    let mut registry = Registry::new();
    let seen = Rc::clone(&calls);
    registry.register("record", move |tape: &mut [u8], args: &[u64]| {
        seen.borrow_mut().push(args.to_vec());
        tape[0] = args.len() as u8;
        Ok(())
    });
    let (output, _) = run_with("&record 1 22  333+.&record.", &registry, b"")?;
    assert_eq!(output, [4, 0]);
    assert_eq!(*calls.borrow(), [vec![1, 22, 333], vec![]]);
    Ok(())
}

#[test]
fn test_builtin_external_calls() -> anyhow::Result<()> {
    let mut registry = Registry::new();
    builtins::register_all(&mut registry);
    let (output, _) = run_with("&set 0 72 .&set 1 5 &add 0 1 0 .", &registry, b"")?;
    assert_eq!(output, b"HM");
    Ok(())
}

#[test]
fn test_undefined_function() -> anyhow::Result<()> {
    let err = run_with("+@4", &Registry::new(), b"").expect_err("must fail");
    let err = err.downcast::<RuntimeError>()?;
    assert!(matches!(err, RuntimeError::UndefinedFunction(4)));
    let err = run_with("@", &Registry::new(), b"").expect_err("must fail");
    assert!(matches!(err.downcast::<RuntimeError>()?, RuntimeError::MissingFunctionId));
    Ok(())
}

#[test]
fn test_unknown_external() -> anyhow::Result<()> {
    let err = run_with("&missing 1", &Registry::new(), b"").expect_err("must fail");
    let err = err.downcast::<RuntimeError>()?;
    assert!(matches!(err, RuntimeError::UnknownExternal(name) if name == "missing"));
    Ok(())
}

#[test]
fn test_failing_external() -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register("fail", |_: &mut [u8], _: &[u64]| anyhow::bail!("boom"));
    let err = run_with("&fail", &registry, b"").expect_err("must fail");
    let err = err.downcast::<RuntimeError>()?;
    assert!(matches!(err, RuntimeError::ExternalFailed { ref name, .. } if name == "fail"));
    Ok(())
}

#[test]
fn test_lack_of_input() -> anyhow::Result<()> {
    let err = run_with(",", &Registry::new(), b"").expect_err("must fail");
    assert!(matches!(err.downcast::<RuntimeError>()?, RuntimeError::LackOfInput));
    let err = run_with(",", &Registry::new(), b"\n").expect_err("must fail");
    assert!(matches!(err.downcast::<RuntimeError>()?, RuntimeError::LackOfInput));
    Ok(())
}

#[test]
fn test_seek_over_tape_edges() -> anyhow::Result<()> {
    let err = run_with("<", &Registry::new(), b"").expect_err("must fail");
    assert!(matches!(err.downcast::<RuntimeError>()?, RuntimeError::SeekOverLeftmost));

    let registry = Registry::new();
    let mut output = vec![];
    let interpreter = BfInterpreter::new(">>", &registry, &b""[..], &mut output)?
        .with_tape_size(NonZeroUsize::new(2).expect("non-zero"));
    let err = interpreter.execute().expect_err("must fail");
    assert!(matches!(err, RuntimeError::SeekOverRightmost { capacity: 2 }));
    Ok(())
}

#[test]
fn test_output_flushed_before_error() -> anyhow::Result<()> {
    let registry = Registry::new();
    let mut output = vec![];
    let interpreter = BfInterpreter::new("+.<", &registry, &b""[..], &mut output)?;
    assert!(interpreter.execute().is_err());
    assert_eq!(output, [1]);
    Ok(())
}

#[test]
fn test_load_error_through_run() -> anyhow::Result<()> {
    let err = run("[", &Registry::new(), &b""[..], vec![]).expect_err("must fail");
    assert!(matches!(err, BfError::Load(LoadError::LoopNotEnded { position: 0 })));
    Ok(())
}
